//! Company denylist applied to extractor output.

use regex::{Regex, RegexBuilder};

use facetharvest_shared::{FacetHarvestError, Result};

/// Case-insensitive alternation over configured group-name patterns.
#[derive(Debug, Clone, Default)]
pub struct Denylist {
    pattern: Option<Regex>,
}

impl Denylist {
    /// Compile `patterns` (each a regex fragment) into one matcher.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let fragments: Vec<&str> = patterns
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .collect();
        if fragments.is_empty() {
            return Ok(Self::default());
        }

        let pattern = RegexBuilder::new(&format!("({})", fragments.join("|")))
            .case_insensitive(true)
            .build()
            .map_err(|e| FacetHarvestError::config(format!("invalid denylist: {e}")))?;

        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// Whether a record with this group name must be discarded.
    ///
    /// Unknown names are never denied.
    pub fn is_denied(&self, group_name: Option<&str>) -> bool {
        let Some(pattern) = &self.pattern else {
            return false;
        };
        match group_name.map(str::trim) {
            None | Some("") | Some("N/A") => false,
            Some(name) => pattern.is_match(name),
        }
    }
}
