//! Persistence seams: the preset store the host provides, and the local
//! crash-recovery backup.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::snapshot::{PresetSnapshot, SnapshotPatch};

/// File name of the local recovery backup.
pub const BACKUP_FILE: &str = "oscbot_local_backup.json";

/// Seconds of quiet after the last edit before the backup is written.
pub const AUTOSAVE_DELAY: f64 = 1.0;

/// Where named presets live. Remote or account-backed stores implement
/// this outside the core.
pub trait SnapshotStore {
    fn load(&self, id: &str) -> Result<PresetSnapshot, StoreError>;
    /// Store `snapshot` under `id`, or under a fresh id when `None`.
    /// Returns the id used.
    fn save(&mut self, id: Option<&str>, snapshot: &PresetSnapshot) -> Result<String, StoreError>;
    fn list(&self) -> Result<Vec<String>, StoreError>;
    fn delete(&mut self, id: &str) -> Result<(), StoreError>;
}

/// A [`SnapshotStore`] that keeps serialised presets in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    presets: BTreeMap<String, String>,
    next_id: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self, id: &str) -> Result<PresetSnapshot, StoreError> {
        let json = self
            .presets
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(PresetSnapshot::from_json(json)?)
    }

    fn save(&mut self, id: Option<&str>, snapshot: &PresetSnapshot) -> Result<String, StoreError> {
        let id = match id {
            Some(id) => id.to_string(),
            None => loop {
                self.next_id += 1;
                let candidate = format!("preset-{}", self.next_id);
                if !self.presets.contains_key(&candidate) {
                    break candidate;
                }
            },
        };
        self.presets.insert(id.clone(), snapshot.to_json()?);
        Ok(id)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.presets.keys().cloned().collect())
    }

    fn delete(&mut self, id: &str) -> Result<(), StoreError> {
        self.presets
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

/// The last session, kept on local disk so an unexpected exit loses at
/// most one autosave interval.
#[derive(Debug, Clone)]
pub struct RecoveryBackup {
    path: PathBuf,
}

impl RecoveryBackup {
    /// Backup file inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        RecoveryBackup {
            path: dir.join(BACKUP_FILE),
        }
    }

    /// Backup file in the platform data directory, if one exists.
    #[cfg(feature = "storage")]
    pub fn default_location() -> Option<Self> {
        let dirs = directories::ProjectDirs::from("", "", "oscbot")?;
        Some(Self::in_dir(dirs.data_dir()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, snapshot: &PresetSnapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, snapshot.to_json()?)?;
        log::debug!("recovery backup written to {}", self.path.display());
        Ok(())
    }

    /// The stored session, or `None` when there is no backup.
    pub fn load(&self) -> Result<Option<SnapshotPatch>, StoreError> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(SnapshotPatch::from_json(&json)?))
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Debounce for the recovery backup.
///
/// Feed it the sequencer's revision and a host clock reading on every
/// tick; it reports when a save is due.
#[derive(Debug, Clone)]
pub struct Autosave {
    delay: f64,
    saved_revision: u64,
    seen_revision: u64,
    changed_at: f64,
}

impl Autosave {
    /// Treat `revision` as already saved.
    pub fn new(revision: u64, delay: f64) -> Self {
        Autosave {
            delay,
            saved_revision: revision,
            seen_revision: revision,
            changed_at: 0.0,
        }
    }

    /// Whether the state at `revision` should be saved now. Each new
    /// revision restarts the wait.
    pub fn poll(&mut self, revision: u64, now: f64) -> bool {
        if revision != self.seen_revision {
            self.seen_revision = revision;
            self.changed_at = now;
        }
        revision != self.saved_revision && now - self.changed_at >= self.delay
    }

    pub fn mark_saved(&mut self, revision: u64) {
        self.saved_revision = revision;
    }

    pub fn is_dirty(&self) -> bool {
        self.seen_revision != self.saved_revision
    }
}

impl Default for Autosave {
    fn default() -> Self {
        Self::new(0, AUTOSAVE_DELAY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tempo::NoteDuration;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("oscbot-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryStore::new();
        let mut snapshot = PresetSnapshot::default();
        snapshot.bpm = 88;
        let id = store.save(None, &snapshot).unwrap();
        assert_eq!(store.load(&id).unwrap(), snapshot);
        assert_eq!(store.list().unwrap(), vec![id.clone()]);

        snapshot.note_duration = NoteDuration::Half;
        assert_eq!(store.save(Some(&id), &snapshot).unwrap(), id);
        assert_eq!(store.load(&id).unwrap().note_duration, NoteDuration::Half);

        store.delete(&id).unwrap();
        assert!(matches!(store.load(&id), Err(StoreError::NotFound(_))));
        assert!(store.delete(&id).is_err());
    }

    #[test]
    fn fresh_ids_do_not_collide() {
        let mut store = MemoryStore::new();
        store.save(Some("preset-1"), &PresetSnapshot::default()).unwrap();
        let id = store.save(None, &PresetSnapshot::default()).unwrap();
        assert_ne!(id, "preset-1");
        assert_eq!(store.list().unwrap().len(), 2);
    }

    #[test]
    fn backup_round_trip() {
        let dir = scratch_dir("backup");
        let backup = RecoveryBackup::in_dir(&dir);
        assert!(backup.load().unwrap().is_none());

        let mut snapshot = PresetSnapshot::default();
        snapshot.sequence_max = 3;
        backup.save(&snapshot).unwrap();
        let restored = backup.load().unwrap().unwrap();
        assert_eq!(restored.apply_to(&PresetSnapshot::default()), snapshot);

        backup.clear().unwrap();
        backup.clear().unwrap();
        assert!(backup.load().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn corrupt_backup_is_an_error() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        let backup = RecoveryBackup::in_dir(&dir);
        std::fs::write(backup.path(), "{not json").unwrap();
        assert!(matches!(backup.load(), Err(StoreError::Snapshot(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn autosave_waits_for_quiet() {
        let mut autosave = Autosave::new(0, 1.0);
        assert!(!autosave.poll(0, 5.0), "nothing changed");
        assert!(!autosave.poll(1, 10.0));
        assert!(!autosave.poll(2, 10.5), "a new edit restarts the wait");
        assert!(!autosave.poll(2, 11.0));
        assert!(autosave.poll(2, 11.5));
        autosave.mark_saved(2);
        assert!(!autosave.is_dirty());
        assert!(!autosave.poll(2, 20.0));
    }
}
