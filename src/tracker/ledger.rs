//! Durable status ledger
//!
//! Each key is stored as its own JSON document at
//! `<root>/<report_type>/<cycle>/<participant>.json` and replaced atomically,
//! so a write either lands completely or not at all. Writers to the same key
//! are serialized by a per-key lock; writers to different keys never wait on
//! each other.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{NaiveDateTime, Utc};
use dashmap::DashMap;

use crate::error::util::{atomic_write, ensure_directory, safe_read_to_string};
use crate::error::{Result, StudyError};

use super::{AuditRecord, MarkOrigin, MarkOutcome, ReportState, StatusEntry, StatusKey};

type Slot = Arc<Mutex<Option<StatusEntry>>>;

/// Keyed, audited store of report states
#[derive(Debug)]
pub struct StatusTracker {
    root: PathBuf,
    entries: DashMap<StatusKey, Slot>,
}

impl StatusTracker {
    /// Open the ledger rooted at `root`, loading every persisted entry
    pub fn open(root: &Path) -> Result<Self> {
        ensure_directory(root, "status ledger")?;
        let entries = DashMap::new();

        for report_dir in read_dirs(root)? {
            for cycle_dir in read_dirs(&report_dir)? {
                for file in read_entries(&cycle_dir)? {
                    if file.extension().is_none_or(|ext| ext != "json") {
                        continue;
                    }
                    let entry = read_entry(&file)?;
                    entries.insert(entry.key.clone(), Arc::new(Mutex::new(Some(entry))));
                }
            }
        }

        log::info!(
            "Loaded {} status entries from {}",
            entries.len(),
            root.display()
        );
        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    fn slot(&self, key: &StatusKey) -> Slot {
        // Clone the Arc so the shard lock is released before the key is locked
        Arc::clone(self.entries.entry(key.clone()).or_default().value())
    }

    fn entry_path(&self, key: &StatusKey) -> Result<PathBuf> {
        for part in [&key.report_type, &key.cycle, &key.participant] {
            if part.is_empty() || part.contains(['/', '\\']) || part.starts_with('.') {
                return Err(StudyError::Ledger(format!("invalid ledger key component '{part}'")));
            }
        }
        Ok(self
            .root
            .join(&key.report_type)
            .join(&key.cycle)
            .join(format!("{}.json", key.participant)))
    }

    fn persist(&self, entry: &StatusEntry) -> Result<()> {
        let path = self.entry_path(&entry.key)?;
        if let Some(parent) = path.parent() {
            ensure_directory(parent, "status ledger")?;
        }
        let data = serde_json::to_vec_pretty(entry)?;
        atomic_write(&path, &data)
    }

    /// Set the state of a key
    ///
    /// Automatic marks never replace `ExcludedManual`.
    pub fn mark(&self, key: &StatusKey, state: ReportState, origin: MarkOrigin) -> Result<MarkOutcome> {
        self.mark_at(key, state, origin, Utc::now().naive_utc())
    }

    /// [`StatusTracker::mark`] with an explicit audit timestamp
    pub fn mark_at(
        &self,
        key: &StatusKey,
        state: ReportState,
        origin: MarkOrigin,
        at: NaiveDateTime,
    ) -> Result<MarkOutcome> {
        self.update(key, state, origin, at, false)
    }

    fn update(
        &self,
        key: &StatusKey,
        state: ReportState,
        origin: MarkOrigin,
        at: NaiveDateTime,
        create_only: bool,
    ) -> Result<MarkOutcome> {
        // Validate before taking the lock so bad keys never reach the map
        let path = self.entry_path(key)?;
        let slot = self.slot(key);
        let mut guard = slot
            .lock()
            .map_err(|_| StudyError::Ledger(format!("lock for {key} poisoned")))?;

        // Another process may have written the key since it was loaded
        if path.exists() {
            *guard = Some(read_entry(&path)?);
        }

        let previous = guard.as_ref().map(|e| e.state);
        if let (true, Some(current)) = (create_only, previous) {
            return Ok(MarkOutcome::Unchanged(current));
        }
        if previous == Some(ReportState::ExcludedManual) && !origin.is_manual() {
            log::debug!("{key}: automatic {state} ignored, manually excluded");
            return Ok(MarkOutcome::Overridden);
        }
        if previous == Some(state) && !origin.is_manual() {
            return Ok(MarkOutcome::Unchanged(state));
        }

        let mut entry = guard.clone().unwrap_or_else(|| StatusEntry {
            key: key.clone(),
            state,
            history: Vec::new(),
        });
        entry.state = state;
        entry.history.push(AuditRecord {
            at,
            origin,
            previous,
            state,
        });

        // Persist first; memory only changes once the write landed
        self.persist(&entry)?;
        *guard = Some(entry);
        Ok(MarkOutcome::Applied(state))
    }

    /// Current state of a key
    #[must_use]
    pub fn query(&self, key: &StatusKey) -> Option<ReportState> {
        let slot = self.entries.get(key).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock().ok()?;
        guard.as_ref().map(|e| e.state)
    }

    /// Full entry including audit history
    #[must_use]
    pub fn entry(&self, key: &StatusKey) -> Option<StatusEntry> {
        let slot = self.entries.get(key).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock().ok()?;
        guard.clone()
    }

    /// Participants that belong in the report for (report type, cycle)
    ///
    /// Pending and submitted participants are in scope; manually excluded
    /// ones never are.
    #[must_use]
    pub fn scope_for(&self, report_type: &str, cycle: &str) -> BTreeSet<String> {
        self.entries_for(report_type, cycle)
            .into_iter()
            .filter(|e| e.state.in_scope())
            .map(|e| e.key.participant)
            .collect()
    }

    /// Every entry for (report type, cycle), sorted by participant
    #[must_use]
    pub fn entries_for(&self, report_type: &str, cycle: &str) -> Vec<StatusEntry> {
        let slots: Vec<Slot> = self
            .entries
            .iter()
            .filter(|e| e.key().report_type == report_type && e.key().cycle == cycle)
            .map(|e| Arc::clone(e.value()))
            .collect();

        let mut entries: Vec<StatusEntry> = slots
            .iter()
            .filter_map(|slot| slot.lock().ok().and_then(|g| g.clone()))
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Record newly eligible participants as pending
    ///
    /// Existing entries, whatever their state, are left untouched.
    ///
    /// # Returns
    /// Number of entries created
    pub fn register_candidates<'p>(
        &self,
        report_type: &str,
        cycle: &str,
        participants: impl IntoIterator<Item = &'p str>,
    ) -> Result<usize> {
        let mut created = 0;
        for participant in participants {
            let key = StatusKey::new(participant, report_type, cycle);
            if self.query(&key).is_some() {
                continue;
            }
            let outcome = self.update(
                &key,
                ReportState::Pending,
                MarkOrigin::Automatic,
                Utc::now().naive_utc(),
                true,
            )?;
            if let MarkOutcome::Applied(_) = outcome {
                created += 1;
            }
        }
        Ok(created)
    }
}

fn read_entry(path: &Path) -> Result<StatusEntry> {
    let text = safe_read_to_string(path, "status entry")?;
    Ok(serde_json::from_str(&text)?)
}

fn read_entries(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StudyError::io_with_path(e, dir))? {
        paths.push(entry.map_err(|e| StudyError::io_with_path(e, dir))?.path());
    }
    paths.sort();
    Ok(paths)
}

fn read_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(read_entries(dir)?.into_iter().filter(|p| p.is_dir()).collect())
}
