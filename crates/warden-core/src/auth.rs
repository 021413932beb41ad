//! Authenticator - remote agent との間のメッセージ署名
//!
//! HMAC-SHA256, hex encoded. Each sender has its own key; this process signs
//! with `messaging.signing_key`. With `auth_enabled = false` signing returns an
//! empty signature and validation accepts everything.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::config::MessagingConfig;
use crate::error::{Result, WardenError};

type HmacSha256 = Hmac<Sha256>;

/// Resolves the key a sender signs its messages with.
#[async_trait]
pub trait SenderKeys: Send + Sync {
    async fn key_for(&self, sender_id: &str) -> Option<Vec<u8>>;
}

/// Fixed sender → key table.
#[derive(Debug, Clone, Default)]
pub struct StaticSenderKeys {
    keys: HashMap<String, Vec<u8>>,
}

impl StaticSenderKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, sender_id: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(sender_id.into(), key.into());
        self
    }
}

#[async_trait]
impl SenderKeys for StaticSenderKeys {
    async fn key_for(&self, sender_id: &str) -> Option<Vec<u8>> {
        self.keys.get(sender_id).cloned()
    }
}

#[derive(Clone)]
pub struct Authenticator {
    enabled: bool,
    signing_key: Vec<u8>,
    senders: Arc<dyn SenderKeys>,
}

impl Authenticator {
    pub fn new(config: &MessagingConfig, senders: Arc<dyn SenderKeys>) -> Self {
        Self {
            enabled: config.auth_enabled,
            signing_key: config.signing_key.as_bytes().to_vec(),
            senders,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn sign(&self, message: &[u8]) -> Result<String> {
        if !self.enabled {
            return Ok(String::new());
        }
        let mut mac = HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|_| WardenError::InvalidValue(vec!["messaging.signing_key".to_string()]))?;
        mac.update(message);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Checks `signature` against the sender's key.
    pub async fn validate(&self, sender_id: &str, message: &[u8], signature: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let failed = || WardenError::ValidationFailed {
            sender_id: sender_id.to_string(),
        };
        let Some(key) = self.senders.key_for(sender_id).await else {
            warn!(sender_id, "message from unknown sender");
            return Err(failed());
        };
        let signature = hex::decode(signature).map_err(|_| failed())?;
        let mut mac = HmacSha256::new_from_slice(&key).map_err(|_| failed())?;
        mac.update(message);
        mac.verify_slice(&signature).map_err(|_| {
            warn!(sender_id, "signature mismatch");
            failed()
        })
    }
}
