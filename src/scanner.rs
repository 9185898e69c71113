// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Batch scan queue
//!
//! Photos are ingested as idle items, analyzed one call at a time, and the
//! finished results are promoted into the collection. The queue is only
//! ever driven through `&mut self`, so at most one item is `analyzing`.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::ScannerConfig;
use crate::error::{AnalysisError, ErrorCode, IngestError};
use crate::gemini::AnalysisClient;
use crate::imaging::ImagePayload;
use crate::model::{Stamp, StampDraft};
use crate::store::RecordStore;
use crate::{Result, StampvaultError};

const PROGRESS_PREPARING: &str = "Preparing image";
const PROGRESS_MATCHING: &str = "Matching against catalogs and auction records";
const PROGRESS_VALUING: &str = "Compiling valuation";

/// Lifecycle of a scan item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Idle,
    Analyzing,
    Done,
    Error,
}

/// One photo waiting for, undergoing or finished with analysis
#[derive(Debug, Clone)]
pub struct ScanItem {
    pub id: String,
    pub file_name: String,
    pub image: ImagePayload,
    pub status: ScanStatus,
    pub progress: Option<String>,
    pub result: Option<StampDraft>,
    pub error: Option<ErrorCode>,
}

/// Outcome of an ingestion call
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Ids of the items appended, in arrival order
    pub added: Vec<String>,
    pub rejected: Vec<IngestError>,
}

/// Outcome of a batch run
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchReport {
    pub analyzed: usize,
    pub failed: usize,
    /// Items not attempted because the batch stopped early
    pub skipped: usize,
    /// Set when an auth or quota failure ended the batch
    pub aborted: Option<AnalysisError>,
    pub cancelled: bool,
}

type Observer = Box<dyn FnMut(&[ScanItem]) + Send>;

/// Queue of photos to identify
pub struct ScanQueue {
    client: Arc<dyn AnalysisClient>,
    items: Vec<ScanItem>,
    hints: String,
    max_file_bytes: u64,
    throttle: Duration,
    observer: Option<Observer>,
}

impl ScanQueue {
    /// Create an empty queue
    pub fn new(client: Arc<dyn AnalysisClient>, config: &ScannerConfig) -> Self {
        Self {
            client,
            items: Vec::new(),
            hints: String::new(),
            max_file_bytes: config.max_file_bytes,
            throttle: Duration::from_millis(config.throttle_ms),
            observer: None,
        }
    }

    /// Free-text hints sent along with every image
    pub fn set_hints(&mut self, hints: impl Into<String>) {
        self.hints = hints.into();
    }

    /// Called with the whole queue after every status or progress change
    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: FnMut(&[ScanItem]) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn items(&self) -> &[ScanItem] {
        &self.items
    }

    pub fn get(&self, id: &str) -> Option<&ScanItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items in `status`
    pub fn count(&self, status: ScanStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    /// Read files into the queue, preserving order.
    ///
    /// Oversized or unreadable files are reported individually and the rest
    /// of the batch is still ingested.
    pub async fn ingest(&mut self, paths: &[PathBuf]) -> IngestReport {
        let mut report = IngestReport::default();

        for path in paths {
            match self.read_file(path).await {
                Ok(bytes) => {
                    let name = display_name(path);
                    let id = self.push(name, ImagePayload::from_bytes(bytes, Some(path)));
                    report.added.push(id);
                }
                Err(e) => {
                    warn!("Skipping {:?}: {}", path, e);
                    report.rejected.push(e);
                }
            }
        }

        info!("Ingested {} files, rejected {}", report.added.len(), report.rejected.len());
        self.notify();
        report
    }

    /// Append an in-memory image, applying the same size ceiling as files
    pub fn ingest_bytes(&mut self, file_name: &str, bytes: Vec<u8>) -> std::result::Result<String, IngestError> {
        let size = bytes.len() as u64;
        if size > self.max_file_bytes {
            return Err(IngestError::FileTooLarge {
                path: PathBuf::from(file_name),
                size,
                limit: self.max_file_bytes,
            });
        }

        let payload = ImagePayload::from_bytes(bytes, Some(Path::new(file_name)));
        let id = self.push(file_name.to_string(), payload);
        self.notify();
        Ok(id)
    }

    async fn read_file(&self, path: &Path) -> std::result::Result<Vec<u8>, IngestError> {
        let unreadable = |source| IngestError::Unreadable { path: path.to_path_buf(), source };

        let size = tokio::fs::metadata(path).await.map_err(unreadable)?.len();
        if size > self.max_file_bytes {
            return Err(IngestError::FileTooLarge {
                path: path.to_path_buf(),
                size,
                limit: self.max_file_bytes,
            });
        }

        let bytes = tokio::fs::read(path).await.map_err(unreadable)?;
        // The file may have grown since the metadata call
        if bytes.len() as u64 > self.max_file_bytes {
            return Err(IngestError::FileTooLarge {
                path: path.to_path_buf(),
                size: bytes.len() as u64,
                limit: self.max_file_bytes,
            });
        }
        Ok(bytes)
    }

    fn push(&mut self, file_name: String, image: ImagePayload) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        debug!("Queued {} as {} ({} bytes)", file_name, id, image.len());
        self.items.push(ScanItem {
            id: id.clone(),
            file_name,
            image,
            status: ScanStatus::Idle,
            progress: None,
            result: None,
            error: None,
        });
        id
    }

    /// Analyze a single item.
    ///
    /// Returns `Ok(false)` without doing anything when the item is already
    /// analyzing or done. A failed call leaves the item in `error` with its
    /// code and hands the typed error back.
    pub async fn analyze_one(&mut self, id: &str) -> Result<bool> {
        let idx = self
            .items
            .iter()
            .position(|i| i.id == id)
            .ok_or_else(|| StampvaultError::ScanItemNotFound(id.to_string()))?;

        if matches!(self.items[idx].status, ScanStatus::Analyzing | ScanStatus::Done) {
            debug!("Item {} is {:?}, nothing to do", id, self.items[idx].status);
            return Ok(false);
        }

        {
            let item = &mut self.items[idx];
            item.status = ScanStatus::Analyzing;
            item.error = None;
            item.progress = Some(PROGRESS_PREPARING.to_string());
        }
        self.notify();

        self.set_progress(idx, PROGRESS_MATCHING);
        let outcome = self.client.identify(&self.items[idx].image, &self.hints).await;
        self.set_progress(idx, PROGRESS_VALUING);

        let item = &mut self.items[idx];
        item.progress = None;
        let result = match outcome {
            Ok(draft) => {
                info!("{}: {}", item.file_name, draft.name.as_deref().unwrap_or("unidentified"));
                item.status = ScanStatus::Done;
                item.result = Some(draft);
                Ok(true)
            }
            Err(e) => {
                error!("{}: {}", item.file_name, e);
                item.status = ScanStatus::Error;
                item.error = Some(e.code());
                Err(StampvaultError::Analysis(e))
            }
        };
        self.notify();
        result
    }

    /// Analyze every idle or failed item, in order, one call at a time
    pub async fn analyze_all(&mut self) -> BatchReport {
        let (_tx, rx) = watch::channel(false);
        self.analyze_all_until(&rx).await
    }

    /// Like [`ScanQueue::analyze_all`], stopping before the next call once
    /// `cancel` turns true. A call already in flight always completes.
    pub async fn analyze_all_until(&mut self, cancel: &watch::Receiver<bool>) -> BatchReport {
        let pending: Vec<String> = self
            .items
            .iter()
            .filter(|i| matches!(i.status, ScanStatus::Idle | ScanStatus::Error))
            .map(|i| i.id.clone())
            .collect();

        let mut report = BatchReport::default();
        info!("Analyzing {} items", pending.len());

        for (n, id) in pending.iter().enumerate() {
            if n > 0 && !self.throttle.is_zero() {
                tokio::time::sleep(self.throttle).await;
            }
            if *cancel.borrow() {
                report.cancelled = true;
                report.skipped = pending.len() - n;
                info!("Batch cancelled, {} items left", report.skipped);
                break;
            }

            match self.analyze_one(id).await {
                Ok(true) => report.analyzed += 1,
                Ok(false) => {}
                Err(StampvaultError::Analysis(e)) if e.is_batch_fatal() => {
                    report.failed += 1;
                    report.skipped = pending.len() - n - 1;
                    warn!("Batch stopped: {} ({} items left)", e, report.skipped);
                    report.aborted = Some(e);
                    break;
                }
                Err(_) => report.failed += 1,
            }
        }

        report
    }

    /// Move every finished result into the collection, then empty the queue.
    ///
    /// Items that are idle or failed are dropped. The records are saved in
    /// one write; if that fails the queue is left as it was so the promotion
    /// can be retried. Returns the ids of the new records.
    pub fn promote_all(&mut self, store: &mut RecordStore, album: &str) -> Result<Vec<String>> {
        let stamps: Vec<Stamp> = self
            .items
            .iter()
            .filter(|item| item.status == ScanStatus::Done)
            .filter_map(|item| {
                let draft = item.result.as_ref()?;
                Some(Stamp::from_draft(draft, item.image.to_data_url(), album))
            })
            .collect();
        let created: Vec<String> = stamps.iter().map(|s| s.id.clone()).collect();

        store.add_many(stamps)?;

        let discarded = self.items.len() - created.len();
        if discarded > 0 {
            debug!("Discarding {} unfinished scan items", discarded);
        }
        info!("Saved {} stamps to '{}'", created.len(), album);
        self.clear();
        Ok(created)
    }

    /// Drop everything in the queue
    pub fn clear(&mut self) {
        self.items.clear();
        self.notify();
    }

    fn set_progress(&mut self, idx: usize, text: &str) {
        self.items[idx].progress = Some(text.to_string());
        self.notify();
    }

    fn notify(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&self.items);
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}
