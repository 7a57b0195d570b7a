//! Bulkmail Core - Campaign dispatch and mail delivery
//!
//! This crate provides the sending side of Bulkmail: daily quotas, template
//! rendering, the SMTP transport, the campaign dispatcher and its runner,
//! the direct single and bulk send paths, and signed unsubscribe links.

pub mod csv_import;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod pacing;
pub mod quota;
pub mod runner;
pub mod sender;
pub mod template;
pub mod tracking;
pub mod transport;
pub mod unsubscribe;

pub use csv_import::{parse_recipient_csv, CsvImport, ImportedRow};
pub use delivery::Delivery;
pub use dispatcher::{CampaignDispatcher, DispatchSummary};
pub use error::{CampaignError, SendError};
pub use pacing::Pacer;
pub use quota::{QuotaReservation, QuotaTracker, QuotaUsage};
pub use runner::CampaignRunner;
pub use sender::{BulkDefaults, BulkReport, BulkRowResult, EmailSender, RowStatus, SendReceipt, SendRequest};
pub use template::{TemplateRenderer, TemplateVars};
pub use tracking::{pixel_url, TRACKING_PIXEL};
pub use transport::{LettreTransport, MailTransport, OutgoingEmail, SendOutcome, SmtpCredentials};
pub use unsubscribe::{UnsubscribeSigner, UnsubscribeToken};
