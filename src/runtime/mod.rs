//! Explicit ports for shared ephemeral state and background work.
//!
//! - `kv`: TTL-bounded key-value store with atomic counters
//! - `dispatch`: worker pool with allow-failures batches and continuations

pub mod dispatch;
pub mod kv;

pub use dispatch::{
    BatchOutcome, Continuation, DispatchError, Task, TaskDispatcher, TaskError, TaskHandle,
    TokioDispatcher,
};
pub use kv::{get_json, put_json, put_once_json, take_json, KeyValueStore, KvError, MemoryStore};
