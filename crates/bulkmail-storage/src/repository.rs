//! Repository layer for data access

pub mod campaigns;
pub mod email_logs;
pub mod premium_requests;
pub mod quotas;
pub mod recipients;
pub mod smtp_accounts;
pub mod templates;
pub mod unsubscribes;
pub mod users;

use crate::db::DatabasePool;
use crate::memory::MemoryStore;
use std::sync::Arc;

// Re-export repository traits
pub use campaigns::CampaignRepository;
pub use email_logs::EmailLogRepository;
pub use premium_requests::PremiumRequestRepository;
pub use quotas::QuotaRepository;
pub use recipients::RecipientRepository;
pub use smtp_accounts::SmtpAccountRepository;
pub use templates::TemplateRepository;
pub use unsubscribes::UnsubscribeRepository;
pub use users::{SessionRepository, UserRepository};

// Re-export database implementations
pub use campaigns::DbCampaignRepository;
pub use email_logs::DbEmailLogRepository;
pub use premium_requests::DbPremiumRequestRepository;
pub use quotas::DbQuotaRepository;
pub use recipients::DbRecipientRepository;
pub use smtp_accounts::DbSmtpAccountRepository;
pub use templates::DbTemplateRepository;
pub use unsubscribes::DbUnsubscribeRepository;
pub use users::{DbSessionRepository, DbUserRepository};

/// Every repository the service needs, behind trait objects
#[derive(Clone)]
pub struct Repositories {
    pub users: Arc<dyn UserRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub smtp_accounts: Arc<dyn SmtpAccountRepository>,
    pub templates: Arc<dyn TemplateRepository>,
    pub campaigns: Arc<dyn CampaignRepository>,
    pub recipients: Arc<dyn RecipientRepository>,
    pub quotas: Arc<dyn QuotaRepository>,
    pub email_logs: Arc<dyn EmailLogRepository>,
    pub premium_requests: Arc<dyn PremiumRequestRepository>,
    pub unsubscribes: Arc<dyn UnsubscribeRepository>,
}

impl Repositories {
    /// PostgreSQL-backed repositories sharing one pool
    pub fn postgres(pool: DatabasePool) -> Self {
        Self {
            users: Arc::new(DbUserRepository::new(pool.clone())),
            sessions: Arc::new(DbSessionRepository::new(pool.clone())),
            smtp_accounts: Arc::new(DbSmtpAccountRepository::new(pool.clone())),
            templates: Arc::new(DbTemplateRepository::new(pool.clone())),
            campaigns: Arc::new(DbCampaignRepository::new(pool.clone())),
            recipients: Arc::new(DbRecipientRepository::new(pool.clone())),
            quotas: Arc::new(DbQuotaRepository::new(pool.clone())),
            email_logs: Arc::new(DbEmailLogRepository::new(pool.clone())),
            premium_requests: Arc::new(DbPremiumRequestRepository::new(pool.clone())),
            unsubscribes: Arc::new(DbUnsubscribeRepository::new(pool)),
        }
    }

    /// Repositories over a fresh in-memory store
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(MemoryStore::new()))
    }

    /// Repositories over a shared in-memory store
    pub fn from_memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            sessions: store.clone(),
            smtp_accounts: store.clone(),
            templates: store.clone(),
            campaigns: store.clone(),
            recipients: store.clone(),
            quotas: store.clone(),
            email_logs: store.clone(),
            premium_requests: store.clone(),
            unsubscribes: store,
        }
    }
}
