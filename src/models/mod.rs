//! Data models for postharvest.

mod filters;
mod item;
mod query;
mod session;

pub use filters::{matches_keywords, EngagementFilters};
pub use item::{post_link, EngagementCounts, NormalizedItem};
pub use query::{
    extract_post_id, BackendKind, ExportFormat, QueryError, QueryMode, ScrapeQuery, TimeWindow,
};
pub(crate) use session::short_id;
pub use session::{SessionState, SessionStatus};
