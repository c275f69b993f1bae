//! # playhouse-play - Stage/Actor Runtime
//!
//! The play server half of PlayHouse: game rooms (`Stage`) with strictly
//! serialized per-stage execution, player actors with an authentication
//! gate and reconnection binding, stage timers and a fixed-timestep game
//! loop, all reachable from the mesh through the play dispatcher.
//!
//! # Execution model
//!
//! Each stage owns a FIFO mailbox and an atomic claim flag. Whoever
//! enqueues into an idle mailbox schedules a worker on the shared tokio
//! runtime; the worker drains messages one at a time, running user
//! callbacks to completion. Await points suspend the worker without
//! releasing the claim, so per-stage handlers never interleave - with far
//! fewer workers than stages.
//!
//! # Module Organization
//!
//! - [`stage`] - Stage trait, mailbox event loop, timers, game loop
//! - [`actor`] - Actor trait, lifecycle, session binding
//! - [`dispatch`] - Play dispatcher (stage registry + base protocol)
//! - [`service`] - Service wiring and graceful shutdown
//! - [`config`] / [`error`] - Configuration and error codes

pub mod actor;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod service;
pub mod stage;

// Re-export commonly used types
pub use actor::{Actor, ActorEntry};
pub use config::{PlayConfig, DEFAULT_AUTHENTICATE_MSG_ID};
pub use dispatch::PlayDispatcher;
pub use error::PlayError;
pub use service::PlayService;
pub use stage::{GameLoopConfig, Stage, StageCell, StageContext, StageRegistry, TimerId};
