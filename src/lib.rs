pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod feed;
pub mod orchestration;
pub mod runtime;

pub use config::Config;
pub use db::{init_db, Repository};
pub use domain::{Decimal, Idpos, Period, StoreId, SubscriberId};
pub use error::AppError;
pub use feed::{FeedError, MockRecordFeed, RecordFeed};
pub use runtime::{KeyValueStore, MemoryStore, TaskDispatcher, TokioDispatcher};
