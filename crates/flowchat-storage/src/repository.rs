//! Repository layer for data access

pub mod api_keys;
pub mod attachments;
pub mod calendar;
pub mod campaign_contacts;
pub mod campaign_logs;
pub mod campaigns;
pub mod contacts;
pub mod conversations;
pub mod departments;
pub mod entitlements;
pub mod fingerprints;
pub mod instances;
pub mod messages;
pub mod tenants;

// Re-export concrete repository implementations with simple names
pub use api_keys::DbApiKeyRepository as ApiKeyRepository;
pub use tenants::DbTenantRepository as TenantRepository;

// Re-export repository traits
pub use api_keys::ApiKeyRepository as ApiKeyRepositoryTrait;
pub use tenants::TenantRepository as TenantRepositoryTrait;

pub use attachments::AttachmentRepository;
pub use calendar::CalendarRepository;
pub use campaign_contacts::{CampaignContactCounts, CampaignContactRepository};
pub use campaign_logs::CampaignLogRepository;
pub use campaigns::CampaignRepository;
pub use contacts::ContactRepository;
pub use conversations::ConversationRepository;
pub use departments::DepartmentRepository;
pub use entitlements::EntitlementRepository;
pub use fingerprints::FingerprintRepository;
pub use instances::InstanceRepository;
pub use messages::MessageRepository;
