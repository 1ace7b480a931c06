//! Server side of the dockwatch console.
//!
//! Provides:
//! - `Server` - Per-session command dispatch behind the authentication gate
//! - Resource, node and agent handlers
//! - `AgentRegistry` / `SessionRegistry` - Master-side routing tables
//! - `MetricsRegistry` - Container usage history and pollers

pub mod auth;
pub mod config;
mod handlers;
pub mod hosts;
pub mod metrics;
pub mod registry;
pub mod server;

pub use config::{AuthConfig, ListingConfig, MetricsConfig, Role, ServerConfig};
pub use hosts::{Engines, HostEngine, HostsError, parse_hosts};
pub use metrics::{MetricPoint, MetricsError, MetricsRegistry};
pub use registry::{AgentRegistry, RegistryError, SessionRegistry};
pub use server::{AGENT_KEY, Recipient, Server};

#[cfg(test)]
mod test_support;
