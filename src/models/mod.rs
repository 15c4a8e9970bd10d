pub mod catalog;
pub mod channel;
pub mod event;
pub mod rules;
pub mod summary;

pub use catalog::{Catalog, CatalogChannel, CatalogStream};
pub use channel::{sort_channels, CategoryDocument, Channel};
pub use event::{EventsDocument, ScheduledEvent};
pub use rules::{CategoryRules, FilterRule, Matcher};
pub use summary::{FileSummary, RunSummary};
