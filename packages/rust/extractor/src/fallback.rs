//! Secondary channel: extract records from the rendered search page.
//!
//! Used only when the structured listing fails. Markup carries no repost
//! signal, so every record from this path has `is_repost = false`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use facetharvest_shared::{
    ExtractionPath, FacetHarvestError, ProviderConfig, QueryConfig, Record, RecordId,
    RecordPayload, Result, ShardDescriptor,
};

use crate::payload::job_view_url;
use crate::session::Session;

/// Turns a search URL into final markup.
///
/// Implementations may drive a real browser; the harvesting core only needs
/// the settled HTML back.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render `url` and return its markup once content has had `settle` to load.
    async fn render(&self, url: &Url, settle: Duration) -> Result<String>;
}

/// [`PageRenderer`] for server-rendered search pages.
///
/// The provider's guest search pages are complete on arrival, so `settle` is
/// spent as a plain pause before the markup is handed back.
pub struct HttpPageRenderer {
    client: Client,
}

impl HttpPageRenderer {
    pub fn new(provider: &ProviderConfig, session: &Session) -> Result<Self> {
        let mut headers = session.headers(&provider.user_agent)?;
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("text/html"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(provider.listing_timeout_secs))
            .build()
            .map_err(|e| FacetHarvestError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageRenderer for HttpPageRenderer {
    async fn render(&self, url: &Url, settle: Duration) -> Result<String> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FacetHarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FacetHarvestError::Network(format!("{url}: HTTP {status}")));
        }

        let body = response
            .text()
            .await
            .map_err(|e| FacetHarvestError::Network(format!("{url}: body read failed: {e}")))?;

        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
        Ok(body)
    }
}

/// Browsable search page URL for one shard.
pub fn search_page_url(base_url: &str, query: &QueryConfig, shard: &ShardDescriptor) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/jobs/search", base_url.trim_end_matches('/')))
        .map_err(|e| FacetHarvestError::validation(format!("bad search URL: {e}")))?;
    {
        let mut pairs = url.query_pairs_mut();
        pairs
            .append_pair("keywords", &query.keywords)
            .append_pair("location", &query.location)
            .append_pair("geoId", &query.geo_id);
        for facet in &shard.facets {
            pairs.append_pair(&facet.page_param, &facet.code);
        }
        pairs
            .append_pair("f_TPR", query.time_window.as_filter())
            .append_pair("sortBy", "DD");
    }
    Ok(url)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| FacetHarvestError::parse(format!("selector {css}: {e}")))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// `time[datetime]` values are RFC 3339 or bare dates.
fn parse_card_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Extract up to `max_cards` records from rendered search markup.
///
/// A "no results" banner, or a page without cards, yields an empty list.
pub fn parse_search_page(html: &str, base_url: &str, max_cards: usize) -> Result<Vec<Record>> {
    let doc = Html::parse_document(html);

    let no_results = selector(".jobs-search-no-results-banner")?;
    if doc.select(&no_results).next().is_some() {
        debug!("search page reports no results");
        return Ok(Vec::new());
    }

    let card_sel = selector("li[data-occludable-job-id]")?;
    let title_sel = selector("h3 a span[title]")?;
    let heading_sel = selector("h3")?;
    let company_sel = selector("h4 a")?;
    let time_sel = selector("time[datetime]")?;

    let mut records = Vec::new();
    for card in doc.select(&card_sel).take(max_cards) {
        let Some(id) = card
            .value()
            .attr("data-occludable-job-id")
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            continue;
        };
        let id = RecordId::new(id);

        let title = card
            .select(&title_sel)
            .next()
            .and_then(|el| el.value().attr("title"))
            .map(|t| t.trim().to_string())
            .or_else(|| card.select(&heading_sel).next().map(text_of))
            .filter(|t| !t.is_empty());

        let company_name = card
            .select(&company_sel)
            .next()
            .map(text_of)
            .filter(|c| !c.is_empty());

        let posted_at = card
            .select(&time_sel)
            .next()
            .and_then(|el| el.value().attr("datetime"))
            .and_then(parse_card_date);

        let url = job_view_url(base_url, &id);
        records.push(Record {
            id,
            payload: RecordPayload {
                title,
                company_name,
                url: Some(url),
                ..Default::default()
            },
            source: ExtractionPath::Fallback,
            is_repost: false,
            posted_at,
        });
    }

    Ok(records)
}
