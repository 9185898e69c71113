// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Stampvault: AI Stamp Scanner & Collection Appraiser
//!
//! Identifies postage stamps from photos with a remote vision model, keeps the
//! collection in a local archive and tracks expert appraisals.

pub mod advisor;
pub mod collection;
pub mod config;
pub mod context;
pub mod currency;
pub mod db;
pub mod error;
pub mod gemini;
pub mod imaging;
pub mod model;
pub mod scanner;
pub mod store;
pub mod web;

pub use config::AppConfig;
pub use error::{Result, StampvaultError};
