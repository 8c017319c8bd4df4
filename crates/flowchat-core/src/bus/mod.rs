//! Two-lane task bus
//!
//! The fast lane is a redis list: low latency, at-least-once, gone on a
//! crash. The durable lane is a transactional jobs table with per-message
//! acknowledgement and retry backoff. Consumers on both lanes dedupe
//! against the store before acting, so redelivery is harmless.

pub mod durable;
pub mod fast;

pub use durable::{DurableQueue, JobEnvelope, JobKind, QUEUE_CAMPAIGN_SEND, QUEUE_PROCESS_MEDIA};
pub use fast::FastLane;
