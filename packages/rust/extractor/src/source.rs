//! Primary structured channel: listing and detail calls against the provider API.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use facetharvest_shared::{
    FacetHarvestError, ProviderConfig, QueryConfig, RawCandidate, Record, RecordId, Result,
    ShardDescriptor,
};

use crate::payload::PostingDetail;
use crate::session::Session;

/// Decoration requested from the listing endpoint.
const LISTING_DECORATION: &str =
    "com.linkedin.voyager.dash.deco.jobs.search.JobSearchCardsCollectionLite-88";

/// Search radius filter sent with every listing query.
const DISTANCE_MILES: u32 = 25;

static POSTING_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)").expect("static posting id pattern"));

/// One page of listing results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    /// Elements returned, parsed or not; drives pagination.
    pub element_count: usize,
    pub candidates: Vec<RawCandidate>,
}

/// The provider's structured listing/detail channel.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Verify the session is accepted before any shard runs.
    async fn probe(&self) -> Result<()>;

    /// Fetch the listing page starting at offset `start`.
    async fn list_page(
        &self,
        shard: &ShardDescriptor,
        start: usize,
        count: usize,
    ) -> Result<ListingPage>;

    /// Resolve one candidate to a full record.
    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<Record>;
}

/// Parse a listing response body into candidates.
///
/// A body without an `elements` array is an empty page, not an error.
pub fn parse_listing(body: &Value) -> ListingPage {
    let elements = body
        .pointer("/data/elements")
        .or_else(|| body.get("elements"))
        .and_then(Value::as_array);

    let Some(elements) = elements else {
        return ListingPage::default();
    };

    let candidates = elements
        .iter()
        .filter_map(|element| {
            let urn = element
                .get("jobCardUnion")
                .and_then(|u| u.get("*jobPostingCard"))
                .and_then(Value::as_str)?;
            let id = POSTING_ID.captures(urn)?.get(1)?.as_str();
            Some(RawCandidate {
                id: RecordId::new(id),
                urn: urn.to_string(),
            })
        })
        .collect();

    ListingPage {
        element_count: elements.len(),
        candidates,
    }
}

/// Percent-encode a query component with `%20` for spaces.
fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

// ---------------------------------------------------------------------------
// HttpCatalogSource
// ---------------------------------------------------------------------------

/// [`CatalogSource`] backed by the provider's HTTP API.
pub struct HttpCatalogSource {
    client: Client,
    base_url: String,
    query: QueryConfig,
    listing_timeout: Duration,
    detail_timeout: Duration,
}

impl HttpCatalogSource {
    /// Build an authorized client from provider settings and a session.
    pub fn new(provider: &ProviderConfig, query: &QueryConfig, session: &Session) -> Result<Self> {
        let client = Client::builder()
            .default_headers(session.headers(&provider.user_agent)?)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| {
                FacetHarvestError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: provider.base_url.trim_end_matches('/').to_string(),
            query: query.clone(),
            listing_timeout: Duration::from_secs(provider.listing_timeout_secs),
            detail_timeout: Duration::from_secs(provider.detail_timeout_secs),
        })
    }

    /// Listing URL for one shard page.
    pub fn listing_url(&self, shard: &ShardDescriptor, start: usize, count: usize) -> Result<Url> {
        let filters = shard
            .facets
            .iter()
            .map(|f| format!("{}:List({})", f.api_filter, f.code))
            .collect::<Vec<_>>()
            .join(",");

        let query = format!(
            "(origin:JOB_SEARCH_PAGE_JOB_FILTER,keywords:{keywords},locationUnion:(geoId:{geo}),\
             selectedFilters:(distance:List({DISTANCE_MILES}),{filters},timePostedRange:List({window})),\
             spellCorrectionEnabled:true)",
            keywords = encode_component(&self.query.keywords),
            geo = self.query.geo_id,
            window = self.query.time_window.as_filter(),
        );

        let raw = format!(
            "{base}/voyager/api/voyagerJobsDashJobCards?decorationId={LISTING_DECORATION}\
             &count={count}&q=jobSearch&query={query}&servedEventEnabled=false&start={start}",
            base = self.base_url,
        );

        Url::parse(&raw).map_err(|e| FacetHarvestError::validation(format!("bad listing URL: {e}")))
    }

    async fn get_json(&self, url: &str, timeout: Duration) -> Result<Value> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| FacetHarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FacetHarvestError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| FacetHarvestError::parse(format!("{url}: invalid JSON: {e}")))
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn probe(&self) -> Result<()> {
        let url = format!("{}/voyager/api/me", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(self.detail_timeout)
            .send()
            .await
            .map_err(|e| FacetHarvestError::session(format!("provider unreachable: {e}")))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(FacetHarvestError::session(
                format!("session rejected (HTTP {}); refresh cookies", response.status()),
            )),
            status if status.is_success() => Ok(()),
            status => Err(FacetHarvestError::session(format!(
                "session probe failed: HTTP {status}"
            ))),
        }
    }

    async fn list_page(
        &self,
        shard: &ShardDescriptor,
        start: usize,
        count: usize,
    ) -> Result<ListingPage> {
        let url = self.listing_url(shard, start, count)?;
        debug!(shard = %shard.key, start, count, "requesting listing page");
        let body = self.get_json(url.as_str(), self.listing_timeout).await?;
        Ok(parse_listing(&body))
    }

    async fn fetch_detail(&self, candidate: &RawCandidate) -> Result<Record> {
        let url = format!("{}/voyager/api/jobs/jobPostings/{}", self.base_url, candidate.id);
        let body = self.get_json(&url, self.detail_timeout).await?;
        let detail = PostingDetail::from_body(&body)
            .map_err(|e| FacetHarvestError::parse(format!("{url}: {e}")))?;
        Ok(detail.into_record(candidate.id.clone(), &self.base_url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionCookie;
    use facetharvest_shared::{ShardFacet, TimeWindow};
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn session() -> Session {
        Session::from_cookies(vec![SessionCookie {
            name: "JSESSIONID".into(),
            value: "ajax:1".into(),
            domain: None,
        }])
        .unwrap()
    }

    fn source(base_url: &str) -> HttpCatalogSource {
        let provider = ProviderConfig {
            base_url: base_url.into(),
            ..Default::default()
        };
        let query = QueryConfig {
            keywords: "\"AI\" OR LLM".into(),
            time_window: TimeWindow::Daily,
            ..Default::default()
        };
        HttpCatalogSource::new(&provider, &query, &session()).unwrap()
    }

    fn shard() -> ShardDescriptor {
        ShardDescriptor::new(
            0,
            vec![
                ShardFacet {
                    dimension: "experience".into(),
                    api_filter: "experience".into(),
                    page_param: "f_E".into(),
                    code: "2".into(),
                    label: "entry".into(),
                },
                ShardFacet {
                    dimension: "job_type".into(),
                    api_filter: "jobType".into(),
                    page_param: "f_JT".into(),
                    code: "F".into(),
                    label: "full_time".into(),
                },
            ],
        )
    }

    #[test]
    fn parse_listing_extracts_ids() {
        let body = json!({"data": {"elements": [
            {"jobCardUnion": {"*jobPostingCard": "urn:li:fsd_jobPostingCard:(4289326695,JOBS_SEARCH)"}},
            {"jobCardUnion": {}},
            {"jobCardUnion": {"*jobPostingCard": "urn:li:fsd_jobPostingCard:(4100000001,JOBS_SEARCH)"}}
        ]}});
        let page = parse_listing(&body);
        assert_eq!(page.element_count, 3);
        let ids: Vec<_> = page.candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["4289326695", "4100000001"]);
    }

    #[test]
    fn parse_listing_without_elements_is_empty() {
        assert_eq!(parse_listing(&json!({"data": {}})), ListingPage::default());
    }

    #[test]
    fn listing_url_scopes_to_shard() {
        let url = source("https://www.linkedin.com")
            .listing_url(&shard(), 200, 100)
            .unwrap();
        let s = url.as_str();
        assert!(s.contains("experience:List(2)"));
        assert!(s.contains("jobType:List(F)"));
        assert!(s.contains("timePostedRange:List(r86400)"));
        assert!(s.contains("keywords:%22AI%22%20OR%20LLM"));
        assert!(s.ends_with("start=200"));
        assert!(s.contains("count=100"));
    }

    #[test]
    fn listing_fixture_parses() {
        let path = "../../../fixtures/json/listing_page.json";
        let content = std::fs::read_to_string(path).expect("read fixture");
        let body: Value = serde_json::from_str(&content).expect("fixture json");
        let page = parse_listing(&body);
        assert_eq!(page.element_count, 3);
        assert_eq!(page.candidates.len(), 3);
    }

    #[tokio::test]
    async fn list_page_against_mock_server() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/voyager/api/voyagerJobsDashJobCards"))
            .and(query_param("start", "0"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"elements": [
                {"jobCardUnion": {"*jobPostingCard": "urn:li:fsd_jobPostingCard:(11,JOBS_SEARCH)"}}
            ]}})))
            .mount(&server)
            .await;

        let page = source(&server.uri()).list_page(&shard(), 0, 100).await.unwrap();
        assert_eq!(page.element_count, 1);
        assert_eq!(page.candidates[0].id.as_str(), "11");
    }

    #[tokio::test]
    async fn list_page_http_error_is_network_error() {
        let server = MockServer::start().await;

        Mock::given(path("/voyager/api/voyagerJobsDashJobCards"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = source(&server.uri()).list_page(&shard(), 0, 100).await.unwrap_err();
        assert!(matches!(err, FacetHarvestError::Network(_)));
    }

    #[tokio::test]
    async fn fetch_detail_builds_record() {
        let server = MockServer::start().await;

        Mock::given(path("/voyager/api/jobs/jobPostings/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {
                "title": "Data Scientist",
                "urlPathSegment": "data-scientist-at-globex-11",
                "listedAt": 1755000000000i64,
                "originalListedAt": 1750000000000i64
            }})))
            .mount(&server)
            .await;

        let candidate = RawCandidate {
            id: RecordId::new("11"),
            urn: "urn:li:fsd_jobPostingCard:(11,JOBS_SEARCH)".into(),
        };
        let record = source(&server.uri()).fetch_detail(&candidate).await.unwrap();
        assert_eq!(record.payload.title.as_deref(), Some("Data Scientist"));
        assert_eq!(record.payload.company_name.as_deref(), Some("Globex"));
        assert!(record.is_repost);
    }

    #[tokio::test]
    async fn probe_rejects_expired_session() {
        let server = MockServer::start().await;

        Mock::given(path("/voyager/api/me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = source(&server.uri()).probe().await.unwrap_err();
        assert!(err.is_setup_failure());
    }

    #[tokio::test]
    async fn probe_accepts_valid_session() {
        let server = MockServer::start().await;

        Mock::given(path("/voyager/api/me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        assert!(source(&server.uri()).probe().await.is_ok());
    }

    #[tokio::test]
    async fn unreachable_provider_at_start_is_setup_failure() {
        let server = MockServer::start().await;
        let uri = server.uri();
        drop(server);

        let err = source(&uri).probe().await.unwrap_err();
        assert!(err.is_setup_failure());
        assert!(err.to_string().contains("provider unreachable"));
    }

    #[tokio::test]
    async fn server_error_at_start_is_setup_failure() {
        let server = MockServer::start().await;

        Mock::given(path("/voyager/api/me"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = source(&server.uri()).probe().await.unwrap_err();
        assert!(err.is_setup_failure());
    }
}
