//! WebSocket transport: wire messages, close codes, upgrade handling and
//! inbound message routing.

mod handler;
mod message;

pub use handler::ws_handler;
pub use message::{close_code, ClientMessage, Outbound, ServerMessage, SnapshotSummary};
