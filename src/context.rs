// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Application context handed to every command handler

use std::sync::Arc;
use tracing::info;

use crate::advisor::Advisor;
use crate::config::{api_key_from_env, AppConfig};
use crate::db::{KeyValueStore, SqliteStorage};
use crate::gemini::{AnalysisClient, GeminiClient};
use crate::scanner::ScanQueue;
use crate::store::RecordStore;
use crate::Result;

/// Everything a command needs: configuration, the collection and the AI client
pub struct AppContext {
    pub config: AppConfig,
    pub store: RecordStore,
    pub gemini: GeminiClient,
    client: Arc<dyn AnalysisClient>,
}

impl AppContext {
    /// Open the on-disk archive and build a client from the environment key
    pub fn open(config: AppConfig) -> Result<Self> {
        let storage = SqliteStorage::open(&config.storage.path)?;
        info!("Archive: {}", config.storage.path);
        let gemini = GeminiClient::new(&config, api_key_from_env())?;
        Self::with_parts(config, Arc::new(storage), gemini)
    }

    /// Assemble a context from explicit parts
    pub fn with_parts(config: AppConfig, storage: Arc<dyn KeyValueStore>, gemini: GeminiClient) -> Result<Self> {
        let store = RecordStore::load(storage, &config.albums)?;
        let client: Arc<dyn AnalysisClient> = Arc::new(gemini.clone());
        Ok(Self { config, store, gemini, client })
    }

    /// A fresh, empty scan queue bound to this context's client
    pub fn scan_queue(&self) -> ScanQueue {
        ScanQueue::new(Arc::clone(&self.client), &self.config.scanner)
    }

    /// Start an advisor conversation over the current collection
    pub fn advisor(&self) -> Advisor {
        Advisor::open(self.client.as_ref(), self.store.stamps())
    }

    /// Album to use when none is given: the configured default, else the first known album
    pub fn default_album(&self) -> String {
        let configured = self.config.scanner.default_album.trim();
        if !configured.is_empty() {
            return configured.to_string();
        }
        self.store
            .albums()
            .first()
            .cloned()
            .unwrap_or_else(|| "Allgemein".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryStorage;

    fn context() -> AppContext {
        let config = AppConfig::default();
        let gemini = GeminiClient::new(&config, None).unwrap();
        AppContext::with_parts(config, Arc::new(MemoryStorage::new()), gemini).unwrap()
    }

    #[test]
    fn test_context_loads_default_albums() {
        let ctx = context();
        assert_eq!(ctx.store.albums().len(), 5);
        assert_eq!(ctx.default_album(), "Master Archiv");
        assert!(ctx.scan_queue().is_empty());
    }

    #[tokio::test]
    async fn test_scan_without_key_aborts_with_auth_error() {
        let mut ctx = context();
        ctx.config.scanner.throttle_ms = 0;
        let mut queue = ctx.scan_queue();
        queue.ingest_bytes("stamp.jpg", vec![0xFF, 0xD8, 0xFF]).unwrap();

        let report = queue.analyze_all().await;
        assert_eq!(report.aborted, Some(crate::error::AnalysisError::AuthInvalid));

        let created = queue.promote_all(&mut ctx.store, "Master Archiv").unwrap();
        assert!(created.is_empty());
        assert!(ctx.store.is_empty());
    }
}
