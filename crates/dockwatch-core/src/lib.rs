//! Core abstractions for the dockwatch console.
//!
//! This crate provides the fundamental building blocks:
//! - `Session` - Per-connection key/value state with tenant namespacing
//! - `RingBuffer` - Fixed-capacity sample store with resumable reads
//! - `LongTask` - Progress / error / completion signalling for background work
//! - `Command` / `Notification` - Wire protocol types

pub mod protocol;
pub mod ring_buffer;
pub mod session;
pub mod task;

pub use protocol::{
    AGENT_REPLY, ArgsError, Category, Command, Notification, NotificationType, Row, Tab,
};
pub use ring_buffer::RingBuffer;
pub use session::{
    INITIATOR_KEY, KeyStore, LocalSession, METRICS_KEY, STREAM_KEY, Session, SessionValue,
    StreamHandle, TTY_KEY, TransportError,
};
pub use task::{LongTask, Monitor, TaskObserver};
