//! Transports for the dockwatch console.
//!
//! Provides:
//! - WebSocket endpoint for browser clients (feature: websocket)
//! - Agent uplink to a master, with reconnect

pub mod uplink;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use uplink::{UplinkConfig, UplinkError, UplinkSession};

#[cfg(feature = "websocket")]
pub use websocket::{WsState, create_ws_router};
