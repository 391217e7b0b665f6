use std::sync::Arc;

use anyhow::{Context, Result};
use oo7::Keyring;

use crate::config::APP_ID;

/// Secrets kept in the desktop keyring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Secret {
    GeminiApiKey,
    FirebaseRefreshToken,
}

impl Secret {
    fn key_ref(self) -> &'static str {
        match self {
            Secret::GeminiApiKey => "gemini-api-key",
            Secret::FirebaseRefreshToken => "firebase-refresh-token",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Secret::GeminiApiKey => "Xgpt Gemini API Key",
            Secret::FirebaseRefreshToken => "Xgpt Google Sign-In",
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyringService {
    keyring: Arc<Keyring>,
}

impl KeyringService {
    pub async fn new() -> Result<Self> {
        let keyring = Keyring::new()
            .await
            .context("Failed to initialize keyring")?;
        Ok(Self {
            keyring: Arc::new(keyring),
        })
    }

    pub async fn store(&self, secret: Secret, value: &str) -> Result<()> {
        self.keyring
            .create_item(secret.label(), &Self::attributes(secret), value, true)
            .await
            .with_context(|| format!("Failed to store {} in keyring", secret.key_ref()))?;
        Ok(())
    }

    pub async fn retrieve(&self, secret: Secret) -> Result<Option<String>> {
        let items = self
            .keyring
            .search_items(&Self::attributes(secret))
            .await
            .context("Failed to search keyring")?;

        let Some(item) = items.first() else {
            return Ok(None);
        };
        let raw = item.secret().await.context("Failed to read secret")?;
        let value = String::from_utf8(raw.to_vec()).context("Secret is not valid UTF-8")?;
        Ok(Some(value).filter(|v| !v.trim().is_empty()))
    }

    pub async fn delete(&self, secret: Secret) -> Result<()> {
        self.keyring
            .delete(&Self::attributes(secret))
            .await
            .with_context(|| format!("Failed to delete {} from keyring", secret.key_ref()))?;
        Ok(())
    }

    fn attributes(secret: Secret) -> Vec<(&'static str, &'static str)> {
        vec![("application", APP_ID), ("key-ref", secret.key_ref())]
    }
}
