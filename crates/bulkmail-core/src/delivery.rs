//! Shared send path for campaigns and direct sends
//!
//! Holds the transport, the process-wide send slots, the tracking settings
//! and the unsubscribe link signer.
//! A slot is held only for the transport round-trip.

use crate::tracking;
use crate::transport::{MailTransport, OutgoingEmail, SendOutcome, SmtpCredentials};
use crate::unsubscribe::UnsubscribeSigner;
use bulkmail_common::config::TrackingConfig;
use bulkmail_common::types::EmailLogId;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Transport plus concurrency limit
#[derive(Clone)]
pub struct Delivery {
    transport: Arc<dyn MailTransport>,
    send_slots: Arc<Semaphore>,
    tracking: TrackingConfig,
    unsubscribe: UnsubscribeSigner,
}

impl Delivery {
    pub fn new(transport: Arc<dyn MailTransport>, send_slots: usize, tracking: TrackingConfig) -> Self {
        Self {
            transport,
            send_slots: Arc::new(Semaphore::new(send_slots.max(1))),
            unsubscribe: UnsubscribeSigner::from_config(&tracking),
            tracking,
        }
    }

    pub fn unsubscribe(&self) -> &UnsubscribeSigner {
        &self.unsubscribe
    }

    /// Send one message, adding the open pixel for `log_id` to the HTML part
    pub async fn deliver(
        &self,
        credentials: &SmtpCredentials,
        mut email: OutgoingEmail,
        log_id: EmailLogId,
    ) -> SendOutcome {
        if self.tracking.open_pixel {
            if let Some(html) = email.html_body.as_deref() {
                let url = tracking::pixel_url(&self.tracking.public_base_url, log_id);
                email.html_body = Some(tracking::append_pixel(html, &url));
            }
        }

        let _permit = match self.send_slots.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                warn!(error = %e, "Send slots closed");
                return SendOutcome::failure("Sender is shutting down");
            }
        };

        self.transport.send(credentials, &email).await
    }

    /// Test a set of credentials
    pub async fn verify(&self, credentials: &SmtpCredentials) -> SendOutcome {
        self.transport.verify(credentials).await
    }
}
