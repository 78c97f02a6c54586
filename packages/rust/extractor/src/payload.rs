//! Typed parsing of the provider's job posting detail payload.
//!
//! Every field is optional. Fields with loosely specified shapes (nested text
//! blocks, company details, apply methods) are kept as [`Value`] and narrowed
//! by small helpers, so an unexpected shape degrades to `None` instead of
//! dropping the whole record.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use facetharvest_shared::{ExtractionPath, Record, RecordId, RecordPayload};

/// Raw detail payload as returned by the posting endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostingDetail {
    #[serde(default)]
    pub title: Option<String>,
    /// Currently listed timestamp (epoch ms).
    #[serde(default)]
    pub listed_at: Option<f64>,
    /// Originally listed timestamp (epoch ms).
    #[serde(default)]
    pub original_listed_at: Option<f64>,
    /// Explicit repost marker.
    #[serde(default)]
    pub reposted_job_posting: Option<Value>,
    #[serde(default)]
    pub time_at: Option<f64>,
    #[serde(default)]
    pub posted_at: Option<f64>,
    #[serde(default)]
    pub created_at: Option<f64>,
    /// Slug like `ml-engineer-at-acme-robotics-4289326695`.
    #[serde(default)]
    pub url_path_segment: Option<String>,
    #[serde(default)]
    pub company_details: Option<Value>,
    #[serde(default)]
    pub apply_method: Option<Value>,
    #[serde(default)]
    pub formatted_location: Option<String>,
    #[serde(default)]
    pub description: Option<Value>,
    #[serde(default)]
    pub company_description: Option<Value>,
    #[serde(default)]
    pub formatted_salary_description: Option<String>,
    #[serde(default)]
    pub skills_description: Option<String>,
    #[serde(default)]
    pub education_description: Option<String>,
    #[serde(default)]
    pub formatted_employment_status: Option<String>,
    #[serde(default)]
    pub employment_status: Option<String>,
    #[serde(default)]
    pub workplace_types: Vec<Value>,
    #[serde(default)]
    pub formatted_industries: Vec<Value>,
    #[serde(default)]
    pub formatted_job_functions: Vec<Value>,
    #[serde(default)]
    pub benefits: Vec<Value>,
    #[serde(default)]
    pub inferred_benefits: Vec<Value>,
    #[serde(default)]
    pub work_remote_allowed: Option<bool>,
    #[serde(default)]
    pub sponsored: Option<bool>,
    #[serde(default)]
    pub applies: Option<u64>,
    #[serde(default)]
    pub views: Option<u64>,
}

impl PostingDetail {
    /// Parse a detail response body; the posting may be wrapped in `data`.
    pub fn from_body(body: &Value) -> serde_json::Result<Self> {
        let posting = body.get("data").filter(|d| d.is_object()).unwrap_or(body);
        Self::deserialize(posting)
    }

    /// Repost when listed/original timestamps differ or the explicit marker is truthy.
    pub fn is_repost(&self) -> bool {
        let timestamps_differ = matches!(
            (self.listed_at, self.original_listed_at),
            (Some(listed), Some(original)) if listed != original
        );
        timestamps_differ || self.reposted_job_posting.as_ref().is_some_and(is_truthy)
    }

    /// First available posting time among `timeAt`, `listedAt`, `postedAt`.
    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        [self.time_at, self.listed_at, self.posted_at]
            .into_iter()
            .flatten()
            .next()
            .and_then(millis_to_utc)
    }

    /// Company name from the URL slug, falling back to `companyDetails`.
    pub fn company_name(&self) -> Option<String> {
        self.url_path_segment
            .as_deref()
            .and_then(company_from_slug)
            .or_else(|| self.company_details.as_ref().and_then(company_from_details))
    }

    /// Company apply URL when the posting links off-site.
    pub fn company_apply_url(&self) -> Option<String> {
        let method = self.apply_method.as_ref()?;
        find_string(method, "companyApplyUrl")
    }

    /// Convert into a primary-path record.
    pub fn into_record(self, id: RecordId, base_url: &str) -> Record {
        let is_repost = self.is_repost();
        let posted_at = self.posted_at();
        let company_name = self.company_name();
        let url = self.company_apply_url().unwrap_or_else(|| job_view_url(base_url, &id));

        let mut benefits = strings(&self.benefits);
        benefits.extend(strings(&self.inferred_benefits));

        let payload = RecordPayload {
            title: self.title,
            company_name,
            url: Some(url),
            location: self.formatted_location,
            description: self.description.as_ref().and_then(text_of),
            company_description: self.company_description.as_ref().and_then(text_of),
            salary: self.formatted_salary_description,
            skills: self.skills_description,
            education: self.education_description,
            employment_status: self.formatted_employment_status.or(self.employment_status),
            workplace_types: strings(&self.workplace_types),
            industries: strings(&self.formatted_industries),
            job_functions: strings(&self.formatted_job_functions),
            benefits,
            remote_allowed: self.work_remote_allowed,
            sponsored: self.sponsored,
            applies: self.applies,
            views: self.views,
            created_at: self.created_at.and_then(millis_to_utc),
        };

        Record {
            id,
            payload,
            source: ExtractionPath::Primary,
            is_repost,
            posted_at,
        }
    }
}

/// Provider job page for a record id.
pub fn job_view_url(base_url: &str, id: &RecordId) -> String {
    format!("{}/jobs/view/{id}/", base_url.trim_end_matches('/'))
}

fn millis_to_utc(millis: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis as i64)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `{"text": "..."}` blocks or plain strings.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(o) => o
            .get("text")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from),
        _ => None,
    }
}

fn strings(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect()
}

/// Look up `key` on the object or on any directly nested object.
fn find_string(value: &Value, key: &str) -> Option<String> {
    let object = value.as_object()?;
    if let Some(found) = object.get(key).and_then(Value::as_str) {
        return Some(found.to_string());
    }
    object
        .values()
        .filter_map(Value::as_object)
        .find_map(|nested| nested.get(key).and_then(Value::as_str))
        .map(String::from)
}

fn company_from_slug(slug: &str) -> Option<String> {
    let (_, rest) = slug.split_once("-at-")?;
    let mut words: Vec<&str> = rest.split('-').collect();
    // Trailing segment is the posting id.
    words.pop();
    let name = words
        .iter()
        .filter(|w| !w.is_empty())
        .map(|w| title_case(w))
        .collect::<Vec<_>>()
        .join(" ");
    (!name.is_empty()).then_some(name)
}

fn company_from_details(details: &Value) -> Option<String> {
    find_string(details, "companyName").or_else(|| {
        details
            .get("company")
            .and_then(|c| c.get("name"))
            .and_then(Value::as_str)
            .map(String::from)
    })
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn load_fixture(name: &str) -> Value {
        let path = format!("../../../fixtures/json/{name}");
        let content = std::fs::read_to_string(&path)
            .unwrap_or_else(|_| panic!("missing fixture: {path}"));
        serde_json::from_str(&content).expect("fixture json")
    }

    #[test]
    fn detail_fixture_parses() {
        let body = load_fixture("posting_detail.json");
        let detail = PostingDetail::from_body(&body).expect("parse");
        let record = detail.into_record(RecordId::new("4289326695"), "https://www.linkedin.com");

        assert_eq!(record.payload.title.as_deref(), Some("Machine Learning Engineer"));
        assert_eq!(record.payload.company_name.as_deref(), Some("Acme Robotics"));
        assert_eq!(
            record.payload.url.as_deref(),
            Some("https://careers.acme.example/jobs/123")
        );
        assert_eq!(record.payload.description.as_deref(), Some("Build models."));
        assert_eq!(record.payload.workplace_types, vec!["remote".to_string()]);
        assert_eq!(record.source, ExtractionPath::Primary);
        assert!(record.posted_at.is_some());
        assert!(!record.is_repost);
    }

    #[test]
    fn repost_when_timestamps_differ() {
        let detail = PostingDetail {
            listed_at: Some(1_755_000_000_000.0),
            original_listed_at: Some(1_750_000_000_000.0),
            ..Default::default()
        };
        assert!(detail.is_repost());
    }

    #[test]
    fn repost_when_marker_truthy() {
        let detail = PostingDetail {
            reposted_job_posting: Some(json!(true)),
            ..Default::default()
        };
        assert!(detail.is_repost());

        let detail = PostingDetail {
            reposted_job_posting: Some(json!({"urn": "urn:li:fs_jobPosting:1"})),
            ..Default::default()
        };
        assert!(detail.is_repost());
    }

    #[test]
    fn not_repost_without_signals() {
        assert!(!PostingDetail::default().is_repost());

        let detail = PostingDetail {
            listed_at: Some(1_755_000_000_000.0),
            original_listed_at: Some(1_755_000_000_000.0),
            reposted_job_posting: Some(Value::Null),
            ..Default::default()
        };
        assert!(!detail.is_repost());
    }

    #[test]
    fn posted_at_prefers_time_at() {
        let detail = PostingDetail {
            time_at: Some(0.0),
            listed_at: Some(1_000.0),
            ..Default::default()
        };
        assert_eq!(detail.posted_at().map(|d| d.timestamp_millis()), Some(0));
        assert!(PostingDetail::default().posted_at().is_none());
    }

    #[test]
    fn company_from_slug_and_details() {
        assert_eq!(
            company_from_slug("junior-legal-specialist-at-robin-ai-4289326695").as_deref(),
            Some("Robin Ai")
        );
        assert_eq!(company_from_slug("no-company-here-123"), None);

        let detail = PostingDetail {
            company_details: Some(json!({
                "com.linkedin.voyager.jobs.JobPostingCompanyName": {"companyName": "Initech"}
            })),
            ..Default::default()
        };
        assert_eq!(detail.company_name().as_deref(), Some("Initech"));
    }

    #[test]
    fn missing_fields_default_to_provider_url() {
        let detail = PostingDetail::from_body(&json!({"data": {}})).expect("parse");
        let record = detail.into_record(RecordId::new("7"), "https://provider.example/");
        assert_eq!(
            record.payload.url.as_deref(),
            Some("https://provider.example/jobs/view/7/")
        );
        assert!(record.payload.company_name.is_none());
        assert!(record.posted_at.is_none());
    }
}
