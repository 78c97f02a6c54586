//! Record extraction against the job provider.
//!
//! This crate provides:
//! - [`session`]: cookie-based session credentials and request headers
//! - [`source`]: the structured listing/detail channel ([`CatalogSource`])
//! - [`fallback`]: the rendered search page channel ([`PageRenderer`])
//! - [`payload`]: typed parsing of the detail payload
//! - [`denylist`]: group-name filtering
//! - [`extract`]: the per-shard [`RecordExtractor`]

pub mod denylist;
pub mod extract;
pub mod fallback;
pub mod payload;
pub mod session;
pub mod source;

pub use denylist::Denylist;
pub use extract::{Extraction, ExtractorSettings, RecordExtractor, ShardExtractor};
pub use fallback::{HttpPageRenderer, PageRenderer, parse_search_page, search_page_url};
pub use payload::{PostingDetail, job_view_url};
pub use session::{Session, SessionCookie};
pub use source::{CatalogSource, HttpCatalogSource, ListingPage, parse_listing};
