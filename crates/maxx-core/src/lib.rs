//! Data-plane core: router/executor state machine, token auth, model
//! mapping, retry policy, quota polling with auto-sort, and the janitor.

pub mod auth;
pub mod engine;
pub mod events;
pub mod janitor;
pub mod mapping;
pub mod quota;
pub mod recalc;
pub mod retry;

pub use auth::TokenAuth;
pub use engine::{ProxyEngine, ServeBody, ServeOutcome};
pub use events::{Event, EventHub};
pub use janitor::Janitor;
pub use quota::QuotaManager;
pub use retry::RetryPolicy;

use maxx_common::ErrorKind;
use maxx_storage::StoreError;

pub fn store_error_kind(err: StoreError) -> ErrorKind {
    match err {
        StoreError::NotFound(what) => ErrorKind::NotFound(what),
        StoreError::Conflict(what) => ErrorKind::Conflict(what),
        StoreError::InvalidInput(what) => ErrorKind::InvalidInput(what),
        StoreError::Db(err) => ErrorKind::Internal(err.to_string()),
    }
}
