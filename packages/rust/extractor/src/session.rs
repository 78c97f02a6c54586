//! Session credentials consumed from the login collaborator.
//!
//! The login flow (outside this workspace) exports browser cookies as JSON.
//! We only read them, derive the CSRF token the API expects, and turn them
//! into default request headers. An expired session is a setup failure: it
//! needs an external refresh, never a retry.

use std::path::Path;

use reqwest::header::{ACCEPT, COOKIE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Deserialize;

use facetharvest_shared::{FacetHarvestError, Result};

/// Cookie carrying the session id the CSRF token is derived from.
const SESSION_COOKIE: &str = "JSESSIONID";

/// Content type for the provider's normalized JSON responses.
const NORMALIZED_JSON: &str = "application/vnd.linkedin.normalized+json+2.1";

/// One exported browser cookie.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: Option<String>,
}

/// An authorized session: cookies plus the derived CSRF token.
#[derive(Debug, Clone)]
pub struct Session {
    cookies: Vec<SessionCookie>,
    csrf_token: String,
}

impl Session {
    /// Load cookies exported by the login helper.
    pub fn from_cookie_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FacetHarvestError::session(format!(
                "no saved cookies at {}; run the login helper first",
                path.display()
            )));
        }
        let content =
            std::fs::read_to_string(path).map_err(|e| FacetHarvestError::io(path, e))?;
        let cookies: Vec<SessionCookie> = serde_json::from_str(&content).map_err(|e| {
            FacetHarvestError::session(format!("malformed cookie file {}: {e}", path.display()))
        })?;
        Self::from_cookies(cookies)
    }

    /// Build a session from cookies; `JSESSIONID` is required.
    pub fn from_cookies(cookies: Vec<SessionCookie>) -> Result<Self> {
        let session_id = cookies
            .iter()
            .find(|c| c.name == SESSION_COOKIE)
            .map(|c| c.value.trim_matches('"'))
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                FacetHarvestError::session(format!("{SESSION_COOKIE} cookie missing or empty"))
            })?;

        let session_id = session_id.strip_prefix("ajax:").unwrap_or(session_id);
        let csrf_token = format!("ajax:{session_id}");

        Ok(Self {
            cookies,
            csrf_token,
        })
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    /// `Cookie` header value (`name=value; name=value`).
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|c| format!("{}={}", c.name, c.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Default headers for every authorized request.
    pub fn headers(&self, user_agent: &str) -> Result<HeaderMap> {
        let invalid = |what: &str| FacetHarvestError::session(format!("invalid {what} header value"));

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(NORMALIZED_JSON));
        headers.insert(
            COOKIE,
            HeaderValue::from_str(&self.cookie_header()).map_err(|_| invalid("cookie"))?,
        );
        headers.insert(
            HeaderName::from_static("csrf-token"),
            HeaderValue::from_str(&self.csrf_token).map_err(|_| invalid("csrf-token"))?,
        );
        headers.insert(
            HeaderName::from_static("x-restli-protocol-version"),
            HeaderValue::from_static("2.0.0"),
        );
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(user_agent).map_err(|_| invalid("user-agent"))?,
        );
        Ok(headers)
    }
}
