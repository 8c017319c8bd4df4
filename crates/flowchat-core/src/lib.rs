//! Flow Chat Core - Messaging dispatcher
//!
//! This crate provides the core dispatcher functionality for Flow Chat:
//! the gateway client, instance registry, task bus, inbound ingestor,
//! conversation service, campaign engine, routing, realtime fan-out and
//! the entitlement gate.

pub mod bus;
pub mod campaigns;
pub mod conversations;
pub mod entitlements;
pub mod gateway;
pub mod ingest;
pub mod media;
pub mod metrics;
pub mod profile;
pub mod realtime;
pub mod registry;
pub mod routing;

pub use bus::{DurableQueue, FastLane, JobEnvelope, JobKind};
pub use campaigns::{CampaignEngine, CampaignError, SendConsumer};
pub use conversations::ConversationService;
pub use entitlements::EntitlementGate;
pub use gateway::{EventSocket, GatewayClient, GatewayError, InboundEvent, SendReceipt};
pub use ingest::{IngestOutcome, Ingestor};
pub use media::MediaWorker;
pub use metrics::Metrics;
pub use profile::ProfileWorker;
pub use realtime::{RealtimeEvent, RealtimeHub};
pub use registry::InstanceRegistry;
pub use routing::Router;
