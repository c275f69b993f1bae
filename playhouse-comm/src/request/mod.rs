//! Request/reply correlation with per-request timeouts.

mod cache;

pub use cache::{ReplyFuture, RequestCache};
