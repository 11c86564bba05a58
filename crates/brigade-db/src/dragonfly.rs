//! `Dragonfly` (Redis-compatible) connection and typed operations.
//!
//! `Dragonfly` backs the durable tier of the sync bus. Every shadow slot
//! lives as one field of a single hash so a restarted engine can load the
//! whole tier with one `HGETALL`.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `brigade:shadow` | Hash | Shadow slot key -> JSON [`ShadowEntry`](brigade_sync::ShadowEntry) |

use std::collections::HashMap;

use fred::prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::DbError;

/// Hash holding every shadow slot.
pub const SHADOW_HASH: &str = "brigade:shadow";

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl std::fmt::Debug for DragonflyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyPool").finish_non_exhaustive()
    }
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Serialize every value as JSON and store them as fields of `hash`
    /// in one round-trip.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if serialization fails.
    /// Returns [`DbError::Dragonfly`] if the write fails.
    pub async fn hset_json<T: Serialize>(
        &self,
        hash: &str,
        fields: &[(String, T)],
    ) -> Result<(), DbError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut encoded: Vec<(String, String)> = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            encoded.push((field.clone(), serde_json::to_string(value)?));
        }
        let _: u64 = self.client.hset(hash, encoded).await?;
        Ok(())
    }

    /// Read every field of `hash` and deserialize each value from JSON.
    ///
    /// A missing hash reads as empty.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if a value does not decode.
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn hgetall_json<T: DeserializeOwned>(
        &self,
        hash: &str,
    ) -> Result<Vec<(String, T)>, DbError> {
        let raw: HashMap<String, String> = self.client.hgetall(hash).await?;
        let mut decoded = Vec::with_capacity(raw.len());
        for (field, value) in raw {
            decoded.push((field, serde_json::from_str(&value)?));
        }
        Ok(decoded)
    }

    /// Remove `fields` from `hash` in one round-trip.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the delete fails.
    pub async fn hdel(&self, hash: &str, fields: Vec<String>) -> Result<(), DbError> {
        if fields.is_empty() {
            return Ok(());
        }
        let _: u64 = self.client.hdel(hash, fields).await?;
        Ok(())
    }
}
