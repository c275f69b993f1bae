//! # playhouse-api - Stateless Gateway Handlers
//!
//! The api server half of PlayHouse: a table of `msg_id -> handler`
//! functions built at bootstrap, an [`ApiSender`] handed to each call for
//! replying and for driving stage creation/join on play servers, and the
//! dispatcher that runs one task per inbound packet.
//!
//! Api servers hold no session or stage state; anything durable lives on
//! play servers or behind the user's own storage.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod sender;
pub mod service;

// Re-export commonly used types
pub use config::ApiConfig;
pub use dispatcher::ApiDispatcher;
pub use error::ApiError;
pub use handler::HandlerRegistry;
pub use sender::ApiSender;
pub use service::ApiService;
