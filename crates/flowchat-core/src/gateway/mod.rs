//! Gateway adapter - typed HTTP calls and the event stream
//!
//! The client is a stateless adapter: it classifies failures but never
//! retries. Retry policy belongs to the callers that own the resource
//! (campaign sender, media worker).

pub mod client;
pub mod events;
pub mod socket;

pub use client::{GatewayClient, GatewayError, SendReceipt};
pub use events::{GatewayEvent, InboundEvent, InboundMessage};
pub use socket::EventSocket;
