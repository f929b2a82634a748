pub mod event_log;
pub mod model;
pub mod registry;

pub use event_log::{EventLog, LogEntry, LogLevel};
pub use model::{
    Article, ArticleDiff, ArticleField, ArticleId, ArticleObservation, AuctionEndState, ContextId,
    PersistedArticle, Price, NO_GROUP,
};
pub use registry::{ArticleRegistry, RemoveOutcome};
