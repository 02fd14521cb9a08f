pub mod client;
pub mod server;

pub use client::{DisabledRelay, HttpLogRelay, LogRelay, RelayEvent};
pub use server::{run_relay_server, RelayServerConfig};
