//! Per-shard extraction: paginated listing, concurrent detail resolution,
//! denylist filtering, and the rendered-page fallback.
//!
//! A shard never fails the run. Everything that goes wrong inside one shard
//! is folded into its [`ShardOutcome`].

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use facetharvest_shared::{
    ExtractionPath, FacetHarvestError, HarvestConfig, QueryConfig, RawCandidate, Record, Result,
    ShardDescriptor, ShardOutcome,
};

use crate::denylist::Denylist;
use crate::fallback::{HttpPageRenderer, PageRenderer, parse_search_page, search_page_url};
use crate::source::CatalogSource;

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// What one shard produced.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// Records that survived detail resolution and the denylist.
    pub records: Vec<Record>,
    pub outcome: ShardOutcome,
    /// Channel that produced the records; `None` when both channels failed.
    pub path: Option<ExtractionPath>,
    /// Listing pages requested on the primary channel.
    pub pages: usize,
}

impl Extraction {
    fn failed(reason: String, pages: usize) -> Self {
        Self {
            records: Vec::new(),
            outcome: ShardOutcome::Failed { reason },
            path: None,
            pages,
        }
    }
}

/// Anything that can turn a shard into records.
#[async_trait]
pub trait ShardExtractor: Send + Sync {
    /// Run once before the first shard. An error here aborts the run.
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Extract one shard. Infallible: failures are reported in the outcome.
    async fn extract(&self, shard: &ShardDescriptor) -> Extraction;
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tuning knobs for [`RecordExtractor`].
#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub page_size: usize,
    pub max_pages: usize,
    pub detail_workers: usize,
    /// Pause between listing pages of the same shard.
    pub page_delay: Duration,
    /// Cards taken from one rendered page.
    pub max_cards: usize,
    /// Settle time handed to the renderer.
    pub settle: Duration,
}

impl From<&HarvestConfig> for ExtractorSettings {
    fn from(config: &HarvestConfig) -> Self {
        Self {
            page_size: config.page_size,
            max_pages: config.max_pages,
            detail_workers: config.detail_workers,
            page_delay: Duration::from_millis(config.page_delay_ms),
            max_cards: config.fallback.max_cards,
            settle: Duration::from_millis(config.fallback.settle_ms),
        }
    }
}

// ---------------------------------------------------------------------------
// RecordExtractor
// ---------------------------------------------------------------------------

/// Two-channel extractor: structured listing first, rendered page second.
pub struct RecordExtractor<S, R = HttpPageRenderer> {
    source: S,
    renderer: Option<R>,
    settings: ExtractorSettings,
    denylist: Denylist,
    query: QueryConfig,
    base_url: String,
}

impl<S: CatalogSource> RecordExtractor<S> {
    /// Primary channel only; attach a renderer with [`Self::with_fallback`].
    pub fn new(source: S, config: &HarvestConfig) -> Result<Self> {
        Ok(Self {
            source,
            renderer: None,
            settings: ExtractorSettings::from(config),
            denylist: Denylist::new(&config.denylist)?,
            query: config.query.clone(),
            base_url: config.provider.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl<S: CatalogSource, R: PageRenderer> RecordExtractor<S, R> {
    /// Enable the rendered-page fallback.
    pub fn with_fallback<F: PageRenderer>(self, renderer: F) -> RecordExtractor<S, F> {
        RecordExtractor {
            source: self.source,
            renderer: Some(renderer),
            settings: self.settings,
            denylist: self.denylist,
            query: self.query,
            base_url: self.base_url,
        }
    }

    /// Walk listing pages and collect unique candidates.
    ///
    /// An error on the first page is returned; on a later page the candidates
    /// gathered so far are kept and paging stops.
    async fn gather(&self, shard: &ShardDescriptor) -> Result<(Vec<RawCandidate>, usize)> {
        let page_size = self.settings.page_size;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        let mut pages = 0;

        for page_index in 0..self.settings.max_pages {
            if page_index > 0 && !self.settings.page_delay.is_zero() {
                tokio::time::sleep(self.settings.page_delay).await;
            }

            let page = match self
                .source
                .list_page(shard, page_index * page_size, page_size)
                .await
            {
                Ok(page) => page,
                Err(e) if page_index == 0 => return Err(e),
                Err(e) => {
                    warn!(page = page_index, error = %e, "listing page failed, keeping earlier pages");
                    break;
                }
            };
            pages += 1;

            for candidate in page.candidates {
                if seen.insert(candidate.id.clone()) {
                    candidates.push(candidate);
                }
            }

            if page.element_count < page_size {
                break;
            }
        }

        Ok((candidates, pages))
    }

    /// Fetch details concurrently; failed identifiers are dropped.
    async fn resolve(&self, candidates: Vec<RawCandidate>) -> Vec<Record> {
        let total = candidates.len();
        let records: Vec<Record> = stream::iter(candidates)
            .map(|candidate| async move {
                let result = self.source.fetch_detail(&candidate).await;
                (candidate, result)
            })
            .buffer_unordered(self.settings.detail_workers)
            .filter_map(|(candidate, result)| async move {
                match result {
                    Ok(record) => Some(record),
                    Err(e) => {
                        debug!(id = %candidate.id, error = %e, "detail fetch failed, dropping");
                        None
                    }
                }
            })
            .collect()
            .await;

        if records.len() < total {
            debug!(
                resolved = records.len(),
                total,
                "some details could not be resolved"
            );
        }
        records
    }

    fn finish(&self, mut records: Vec<Record>, path: ExtractionPath, pages: usize) -> Extraction {
        let before = records.len();
        records.retain(|r| !self.denylist.is_denied(r.payload.company_name.as_deref()));
        if records.len() < before {
            debug!(
                removed = before - records.len(),
                "denylist filtered records"
            );
        }

        let outcome = if records.is_empty() {
            ShardOutcome::Empty
        } else {
            ShardOutcome::Success
        };
        Extraction {
            records,
            outcome,
            path: Some(path),
            pages,
        }
    }

    async fn fallback(&self, shard: &ShardDescriptor, primary: FacetHarvestError) -> Extraction {
        let Some(renderer) = &self.renderer else {
            return Extraction::failed(primary.to_string(), 0);
        };

        let rendered = async {
            let url = search_page_url(&self.base_url, &self.query, shard)?;
            let html = renderer.render(&url, self.settings.settle).await?;
            parse_search_page(&html, &self.base_url, self.settings.max_cards)
        }
        .await;

        match rendered {
            Ok(records) => {
                info!(cards = records.len(), "fallback extraction succeeded");
                self.finish(records, ExtractionPath::Fallback, 0)
            }
            Err(e) => {
                warn!(error = %e, "fallback extraction failed");
                Extraction::failed(format!("primary: {primary}; fallback: {e}"), 0)
            }
        }
    }
}

#[async_trait]
impl<S: CatalogSource, R: PageRenderer> ShardExtractor for RecordExtractor<S, R> {
    async fn prepare(&self) -> Result<()> {
        self.source.probe().await
    }

    #[instrument(skip_all, fields(shard = %shard.key, facets = %shard.labels()))]
    async fn extract(&self, shard: &ShardDescriptor) -> Extraction {
        match self.gather(shard).await {
            Ok((candidates, pages)) if candidates.is_empty() => {
                debug!(pages, "listing returned no candidates");
                Extraction {
                    records: Vec::new(),
                    outcome: ShardOutcome::Empty,
                    path: Some(ExtractionPath::Primary),
                    pages,
                }
            }
            Ok((candidates, pages)) => {
                debug!(candidates = candidates.len(), pages, "resolving details");
                let records = self.resolve(candidates).await;
                self.finish(records, ExtractionPath::Primary, pages)
            }
            Err(e) => {
                warn!(error = %e, "primary listing failed");
                self.fallback(shard, e).await
            }
        }
    }
}
