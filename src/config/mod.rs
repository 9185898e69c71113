// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Configuration management for Stampvault

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variables consulted for the API key, in order
pub const API_KEY_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];

/// Main application configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    /// AI engine configuration
    pub ai_engine: EngineConfig,

    /// Scan queue settings
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Local archive settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Albums offered before the user creates any
    #[serde(default = "default_albums")]
    pub albums: Vec<String>,

    /// Web UI settings
    #[serde(default)]
    pub web: WebConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EngineConfig {
    pub url: String,
    pub models: ModelConfig,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Extra attempts after a quota/rate-limit response
    #[serde(default = "default_quota_retries")]
    pub quota_retries: u32,
    /// Backoff unit; attempt n waits n times this long
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ModelConfig {
    pub vision: String,
    #[serde(default = "default_chat_model")]
    pub chat: String,
    #[serde(default = "default_chat_model")]
    pub news: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    /// Pause between two analysis calls in a batch
    #[serde(default = "default_throttle")]
    pub throttle_ms: u64,
    #[serde(default = "default_max_citations")]
    pub max_citations: usize,
    /// Longest image side sent to the model
    #[serde(default = "default_max_dimension")]
    pub max_dimension: u32,
    #[serde(default = "default_album")]
    pub default_album: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

// Default value functions
fn default_timeout() -> u64 { 120 }
fn default_quota_retries() -> u32 { 1 }
fn default_retry_backoff() -> u64 { 2000 }
fn default_chat_model() -> String { "gemini-3-flash-preview".to_string() }
fn default_max_file_bytes() -> u64 { 20 * 1024 * 1024 }
fn default_throttle() -> u64 { 1500 }
fn default_max_citations() -> usize { 5 }
fn default_max_dimension() -> u32 { 1024 }
fn default_album() -> String { "Master Archiv".to_string() }
fn default_db_path() -> String { "stampvault.db".to_string() }
fn default_web_host() -> String { "127.0.0.1".to_string() }
fn default_web_port() -> u16 { 8080 }

fn default_albums() -> Vec<String> {
    vec![
        "Master Archiv",
        "Europa Klassik",
        "Investment Portfolio",
        "Seltenheiten",
        "Auktions-Vorbereitung",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ai_engine: EngineConfig {
                url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
                models: ModelConfig {
                    vision: "gemini-3-pro-image-preview".to_string(),
                    chat: default_chat_model(),
                    news: default_chat_model(),
                },
                timeout_secs: default_timeout(),
                quota_retries: default_quota_retries(),
                retry_backoff_ms: default_retry_backoff(),
            },
            scanner: ScannerConfig::default(),
            storage: StorageConfig::default(),
            albums: default_albums(),
            web: WebConfig::default(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_bytes: default_max_file_bytes(),
            throttle_ms: default_throttle(),
            max_citations: default_max_citations(),
            max_dimension: default_max_dimension(),
            default_album: default_album(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = serde_json::from_str(&content)
                .map_err(|e| crate::StampvaultError::Config(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            tracing::info!("Config file not found at {:?}, using defaults", path);
            Ok(Self::default())
        }
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject values that would make the scanner unusable
    pub fn validate(&self) -> crate::Result<()> {
        if self.ai_engine.url.trim().is_empty() {
            return Err(crate::StampvaultError::Config("ai_engine.url is empty".to_string()));
        }
        if self.ai_engine.models.vision.trim().is_empty() {
            return Err(crate::StampvaultError::Config("ai_engine.models.vision is empty".to_string()));
        }
        if self.scanner.max_file_bytes == 0 {
            return Err(crate::StampvaultError::Config("scanner.max_file_bytes must be positive".to_string()));
        }
        if self.scanner.default_album.trim().is_empty() {
            return Err(crate::StampvaultError::Config("scanner.default_album is empty".to_string()));
        }
        Ok(())
    }
}

/// Read the API key from the environment
pub fn api_key_from_env() -> Option<String> {
    API_KEY_VARS
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.scanner.max_file_bytes, 20 * 1024 * 1024);
        assert_eq!(config.ai_engine.quota_retries, 1);
        assert_eq!(config.albums.len(), 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{
            "ai_engine": {
                "url": "http://localhost:9000",
                "models": { "vision": "test-vision" }
            }
        }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.ai_engine.models.chat, "gemini-3-flash-preview");
        assert_eq!(config.ai_engine.retry_backoff_ms, 2000);
        assert_eq!(config.scanner.throttle_ms, 1500);
        assert_eq!(config.albums[0], "Master Archiv");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.web.port = 9191;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.web.port, 9191);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(loaded.storage.path, "stampvault.db");
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut config = AppConfig::default();
        config.scanner.max_file_bytes = 0;
        assert!(config.validate().is_err());
    }
}
