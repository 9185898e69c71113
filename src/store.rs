// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! The persisted stamp collection and album list

use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::db::KeyValueStore;
use crate::model::{ExpertStatus, Stamp};
use crate::{Result, StampvaultError};

/// Storage key of the serialized collection
pub const COLLECTION_KEY: &str = "philately_pro_v4_archive";
/// Storage key of user-created albums
pub const ALBUMS_KEY: &str = "philately_pro_v4_albums";

/// Note recorded when an expert confirms a stamp without writing one
pub const DEFAULT_APPRAISAL_NOTE: &str = "Bestätigtes Original nach fachmännischer Begutachtung.";

/// Authoritative collection of stamps, written through on every mutation.
///
/// Every mutation starts from what is currently stored, so several stores
/// over the same backend (CLI and web dashboard) do not overwrite each other.
pub struct RecordStore {
    backend: Arc<dyn KeyValueStore>,
    stamps: Vec<Stamp>,
    albums: Vec<String>,
}

impl RecordStore {
    /// Load the collection once from storage.
    ///
    /// A malformed archive is logged, deleted and replaced by an empty
    /// collection; nothing is salvaged from it.
    pub fn load(backend: Arc<dyn KeyValueStore>, default_albums: &[String]) -> Result<Self> {
        let stamps = match backend.get_item(COLLECTION_KEY)? {
            Some(raw) => match decode_collection(&raw) {
                Ok(stamps) => stamps,
                Err(e) => {
                    error!("Archive load error, starting with an empty collection: {}", e);
                    backend.remove_item(COLLECTION_KEY)?;
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut albums: Vec<String> = Vec::new();
        for name in default_albums {
            push_unique(&mut albums, name);
        }
        if let Some(raw) = backend.get_item(ALBUMS_KEY)? {
            match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(stored) => stored.iter().for_each(|name| push_unique(&mut albums, name)),
                Err(e) => error!("Album list unreadable, using defaults: {}", e),
            }
        }

        info!("Loaded {} stamps in {} albums", stamps.len(), albums.len());
        Ok(Self { backend, stamps, albums })
    }

    /// All stamps, most recent first
    pub fn stamps(&self) -> &[Stamp] {
        &self.stamps
    }

    pub fn albums(&self) -> &[String] {
        &self.albums
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Stamp> {
        self.stamps.iter().find(|s| s.id == id)
    }

    /// Stored size of the serialized collection in bytes
    pub fn stored_bytes(&self) -> Result<Option<usize>> {
        self.backend.value_size(COLLECTION_KEY)
    }

    /// Pick up changes written by another process sharing the same storage
    pub fn refresh(&mut self) -> Result<()> {
        self.stamps = self.latest_stamps()?;
        self.albums = self.latest_albums()?;
        Ok(())
    }

    /// Prepend a stamp; its id must not be in the collection yet
    pub fn add(&mut self, stamp: Stamp) -> Result<()> {
        self.add_many(vec![stamp])
    }

    /// Prepend several stamps in order with a single write, so the last one
    /// ends up first. Either all of them are stored or none.
    pub fn add_many(&mut self, new: Vec<Stamp>) -> Result<()> {
        self.commit(move |stamps| {
            for stamp in new {
                if stamps.iter().any(|s| s.id == stamp.id) {
                    return Err(StampvaultError::DuplicateId(stamp.id));
                }
                debug!("Adding stamp {} ({})", stamp.id, stamp.name);
                stamps.insert(0, stamp);
            }
            Ok(())
        })
    }

    /// Delete by id; returns whether anything was removed
    pub fn remove(&mut self, id: &str) -> Result<bool> {
        self.commit(|stamps| {
            let before = stamps.len();
            stamps.retain(|s| s.id != id);
            Ok(stamps.len() != before)
        })
    }

    /// Replace the stamp with the same id; no-op when absent.
    ///
    /// A changed review status must be a legal transition.
    pub fn update(&mut self, stamp: Stamp) -> Result<bool> {
        self.commit(move |stamps| {
            let Some(slot) = stamps.iter_mut().find(|s| s.id == stamp.id) else {
                return Ok(false);
            };
            let (from, to) = (slot.expert_status, stamp.expert_status);
            if from != to && !from.can_transition_to(to) {
                return Err(StampvaultError::InvalidTransition { id: stamp.id, from, to });
            }
            *slot = stamp;
            Ok(true)
        })
    }

    /// Append an album name if it is new and not blank
    pub fn add_album(&mut self, name: &str) -> Result<bool> {
        let name = name.trim();
        let mut albums = self.latest_albums()?;
        if name.is_empty() || albums.iter().any(|a| a == name) {
            self.albums = albums;
            return Ok(false);
        }
        albums.push(name.to_string());
        let json = serde_json::to_string(&albums)?;
        self.backend.set_item(ALBUMS_KEY, &json)?;
        self.albums = albums;
        info!("Created album '{}'", name);
        Ok(true)
    }

    /// Ask for an expert review (none → pending)
    pub fn request_appraisal(&mut self, id: &str) -> Result<Stamp> {
        self.transition(id, ExpertStatus::Pending, |_| {})
    }

    /// Record an expert's verdict (pending → appraised).
    ///
    /// A blank valuation keeps the model estimate and a blank note gets the
    /// standard confirmation text.
    pub fn appraise(&mut self, id: &str, valuation: Option<&str>, note: Option<&str>) -> Result<Stamp> {
        let valuation = valuation.filter(|v| !v.trim().is_empty()).map(str::to_string);
        let note = note.filter(|n| !n.trim().is_empty()).map(str::to_string);

        self.transition(id, ExpertStatus::Appraised, move |stamp| {
            let estimate = stamp.estimated_value.clone();
            stamp.expert_valuation = Some(valuation.unwrap_or(estimate));
            stamp.expert_note = Some(note.unwrap_or_else(|| DEFAULT_APPRAISAL_NOTE.to_string()));
        })
    }

    /// Withdraw or reject a review (pending|appraised → none)
    pub fn reject(&mut self, id: &str) -> Result<Stamp> {
        self.transition(id, ExpertStatus::None, |_| {})
    }

    fn transition<F>(&mut self, id: &str, next: ExpertStatus, apply: F) -> Result<Stamp>
    where
        F: FnOnce(&mut Stamp),
    {
        let updated = self.commit(|stamps| {
            let current = stamps
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| StampvaultError::NotFound(id.to_string()))?;
            if !current.expert_status.can_transition_to(next) {
                return Err(StampvaultError::InvalidTransition {
                    id: id.to_string(),
                    from: current.expert_status,
                    to: next,
                });
            }
            current.expert_status = next;
            apply(current);
            Ok(current.clone())
        })?;
        info!("Stamp {} is now '{}'", id, next);
        Ok(updated)
    }

    /// The whole collection as pretty JSON
    pub fn export_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.stamps)?)
    }

    /// Write an export file into `dir`, named after `date`
    pub fn export_to(&self, dir: &Path, date: NaiveDate) -> Result<PathBuf> {
        let path = dir.join(export_filename(date));
        std::fs::write(&path, self.export_json()?)?;
        info!("Exported {} stamps to {:?}", self.stamps.len(), path);
        Ok(path)
    }

    /// Apply `change` to the latest stored collection, write it back, and
    /// only then adopt it. A failed change or write leaves memory untouched.
    fn commit<T, F>(&mut self, change: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Stamp>) -> Result<T>,
    {
        let mut next = self.latest_stamps()?;
        let outcome = change(&mut next)?;
        let json = serde_json::to_string(&next)?;
        self.backend.set_item(COLLECTION_KEY, &json)?;
        self.stamps = next;
        Ok(outcome)
    }

    fn latest_stamps(&self) -> Result<Vec<Stamp>> {
        match self.backend.get_item(COLLECTION_KEY)? {
            Some(raw) => match decode_collection(&raw) {
                Ok(stamps) => Ok(stamps),
                Err(e) => {
                    warn!("Stored collection unreadable, keeping the loaded copy: {}", e);
                    Ok(self.stamps.clone())
                }
            },
            None => Ok(Vec::new()),
        }
    }

    fn latest_albums(&self) -> Result<Vec<String>> {
        let mut albums = self.albums.clone();
        if let Some(raw) = self.backend.get_item(ALBUMS_KEY)? {
            match serde_json::from_str::<Vec<String>>(&raw) {
                Ok(stored) => stored.iter().for_each(|name| push_unique(&mut albums, name)),
                Err(e) => warn!("Stored album list unreadable: {}", e),
            }
        }
        Ok(albums)
    }
}

/// File name used for collection exports
pub fn export_filename(date: NaiveDate) -> String {
    format!("PhilatelyAI_Export_{}.json", date.format("%Y-%m-%d"))
}

fn decode_collection(raw: &str) -> Result<Vec<Stamp>> {
    serde_json::from_str(raw).map_err(|e| StampvaultError::StorageLoad(e.to_string()))
}

fn push_unique(albums: &mut Vec<String>, name: &str) {
    let name = name.trim();
    if !name.is_empty() && !albums.iter().any(|a| a == name) {
        albums.push(name.to_string());
    }
}
