//! Campaign engine
//!
//! Turns a campaign into an ordered, paced stream of sends: one supervised
//! runner per running campaign feeds the durable lane, and a pool of send
//! consumers performs the gateway calls.

pub mod calendar;
pub mod engine;
pub mod sender;
pub mod template;

pub use calendar::BusinessCalendar;
pub use engine::{CampaignEngine, CampaignError};
pub use sender::SendConsumer;
pub use template::render_template;
