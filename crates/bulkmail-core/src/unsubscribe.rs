//! Signed unsubscribe links
//!
//! A token is the URL-safe base64 of `email:user:campaign:tag`. The campaign
//! part is `-` for direct sends, and `tag` is a truncated HMAC-SHA256 of the
//! rest under the configured secret.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use bulkmail_common::config::TrackingConfig;
use bulkmail_common::types::{CampaignId, UserId};
use hmac::digest::{KeyInit, Output};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Bytes of the MAC kept in a token
const TAG_LEN: usize = 16;

/// Outcome reported for addresses that opted out
pub const UNSUBSCRIBED_MESSAGE: &str = "Recipient unsubscribed";

/// What an unsubscribe link refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribeToken {
    pub email: String,
    pub user_id: UserId,
    pub campaign_id: Option<CampaignId>,
}

/// Issues and checks unsubscribe links
#[derive(Clone)]
pub struct UnsubscribeSigner {
    base_url: String,
    /// Secret stretched to the HMAC block size
    key: Output<Sha512>,
}

impl fmt::Debug for UnsubscribeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnsubscribeSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl UnsubscribeSigner {
    /// Links live under `<public_base_url>/unsubscribe`
    pub fn new(public_base_url: &str, secret: &[u8]) -> Self {
        Self {
            base_url: format!("{}/unsubscribe", public_base_url.trim_end_matches('/')),
            key: Sha512::digest(secret),
        }
    }

    /// Signer for `tracking.unsubscribe_secret`, or a random per-process key
    pub fn from_config(config: &TrackingConfig) -> Self {
        match config.unsubscribe_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => Self::new(&config.public_base_url, secret.as_bytes()),
            None => {
                warn!("tracking.unsubscribe_secret is not set; unsubscribe links stop working after a restart");
                let mut secret = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut secret);
                Self::new(&config.public_base_url, &secret)
            }
        }
    }

    pub fn url(&self, email: &str, user_id: UserId, campaign_id: Option<CampaignId>) -> String {
        format!("{}/{}", self.base_url, self.token(email, user_id, campaign_id))
    }

    pub fn token(&self, email: &str, user_id: UserId, campaign_id: Option<CampaignId>) -> String {
        let campaign = campaign_id.map_or_else(|| "-".to_string(), |id| id.to_string());
        let payload = format!("{}:{}:{}", email.to_lowercase(), user_id, campaign);

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let tag = hex::encode(&mac.finalize().into_bytes()[..TAG_LEN]);

        URL_SAFE_NO_PAD.encode(format!("{}:{}", payload, tag))
    }

    /// Decode a token, rejecting malformed or forged ones
    pub fn verify(&self, token: &str) -> Option<UnsubscribeToken> {
        let decoded = URL_SAFE_NO_PAD.decode(token).ok()?;
        let data = String::from_utf8(decoded).ok()?;
        let (payload, tag) = data.rsplit_once(':')?;

        let tag = hex::decode(tag).ok()?;
        if tag.len() != TAG_LEN {
            return None;
        }
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        mac.verify_truncated_left(&tag).ok()?;

        let mut parts = payload.rsplitn(3, ':');
        let campaign_id = match parts.next()? {
            "-" => None,
            id => Some(id.parse().ok()?),
        };
        let user_id = parts.next()?.parse().ok()?;
        let email = parts.next()?.to_string();

        Some(UnsubscribeToken {
            email,
            user_id,
            campaign_id,
        })
    }

    fn mac(&self) -> HmacSha256 {
        <HmacSha256 as KeyInit>::new(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn signer() -> UnsubscribeSigner {
        UnsubscribeSigner::new("https://mail.example.com/", b"secret")
    }

    #[test]
    fn test_token_roundtrip() {
        let user_id = Uuid::now_v7();
        let campaign_id = Uuid::now_v7();
        let signer = signer();

        let url = signer.url("Jane@Example.com", user_id, Some(campaign_id));
        let token = url
            .strip_prefix("https://mail.example.com/unsubscribe/")
            .unwrap();

        assert_eq!(
            signer.verify(token),
            Some(UnsubscribeToken {
                email: "jane@example.com".to_string(),
                user_id,
                campaign_id: Some(campaign_id),
            })
        );
    }

    #[test]
    fn test_direct_send_token_has_no_campaign() {
        let user_id = Uuid::now_v7();
        let signer = signer();
        let token = signer.token("a@x.com", user_id, None);
        assert_eq!(signer.verify(&token).unwrap().campaign_id, None);
    }

    #[test]
    fn test_forged_tokens_are_rejected() {
        let user_id = Uuid::now_v7();
        let token = signer().token("a@x.com", user_id, None);

        let other_key = UnsubscribeSigner::new("https://mail.example.com", b"other");
        assert_eq!(other_key.verify(&token), None);

        let unsigned = URL_SAFE_NO_PAD.encode(format!("b@x.com:{}:-:00", user_id));
        assert_eq!(signer().verify(&unsigned), None);
        assert_eq!(signer().verify("not base64!"), None);
    }
}
