pub mod click;
pub mod link;
pub mod user;

pub use click::{
    ClickEvent, EnrichStatus, Enrichment, KeyCount, NewClick, PendingClick, TimeBucketCount,
};
pub use link::{CreateUrlRequest, ShortLink, ShortLinkSummary};
pub use user::{User, ANONYMOUS_USERNAME};
