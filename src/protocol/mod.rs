//! # Wyoming Protocol
//!
//! Framing and typed messages for the Wyoming event protocol spoken by Home
//! Assistant voice satellites and pipelines.
//!
//! ## Key Components:
//! - **Event framing**: JSON header line, data block and binary payload
//! - **Messages**: typed views for the events this server sends and receives
//! - **Info**: the capability document returned for `describe`

pub mod event; // Frame codec
pub mod info; // Capability document
pub mod messages; // Typed events

pub use event::{read_event, write_event, Event, FrameLimits, PROTOCOL_VERSION};
pub use info::Info;
pub use messages::Eventable;
