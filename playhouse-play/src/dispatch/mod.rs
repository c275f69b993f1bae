//! Inbound routing for the play service.

mod play_dispatcher;

pub use play_dispatcher::PlayDispatcher;
