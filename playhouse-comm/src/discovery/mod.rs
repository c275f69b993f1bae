//! Server discovery: live-server registry, selection, heartbeat controller.

mod center;
mod controller;
mod server_info;

pub use center::{ServerChange, ServerInfoCenter};
pub use controller::{DiscoveryController, ServerInfoProvider};
pub use server_info::{ServerInfo, ServerState, ServiceType};
