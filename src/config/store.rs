//! # Config Store
//!
//! Loads and atomically persists the stream catalogue as a single YAML document
//!. `Save` writes to a sibling temp file in the catalogue's
//! directory, fsyncs it, then renames it over the target — so a crash mid-write
//! leaves either the old file or the new one, never a partial one.
//!
//! Unknown fields on each record are preserved across round-trips: every record is
//! deserialized as the typed [`Stream`] plus a flattened `serde_yaml::Mapping` of
//! whatever keys the typed struct didn't claim, and both are re-emitted on save.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

use crate::config::model::Stream;
use crate::error::AppError;

/// One catalogue entry as it round-trips through YAML: the fields this binary
/// understands, plus anything else under `#[serde(flatten)]` so a newer or older
/// version of the schema doesn't lose data it doesn't recognize.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawRecord {
    #[serde(flatten)]
    known: Stream,
    #[serde(flatten)]
    extra: serde_yaml::Mapping,
}

/// Handle to the on-disk catalogue file. Stateless beyond the path; callers are
/// expected to serialize access to `save` themselves (the Registry's writer lock
/// does this).
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalogue, validating each record against the §3 invariants this
    /// binary enforces. Missing file is not an error: an empty catalogue is created
    /// in memory (and on first save, on disk). Each record comes back paired with
    /// its unknown-field [`RawRecord::extra`] mapping so the caller can hold onto
    /// it and hand it back to [`Self::save`] unchanged.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn load(&self) -> Result<Vec<(Stream, serde_yaml::Mapping)>, AppError> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("catalogue file absent, starting with an empty one");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        let records: Vec<RawRecord> = serde_yaml::from_str(&contents)?;
        let mut out = Vec::with_capacity(records.len());
        for record in records {
            validate_record(&record.known)?;
            out.push((record.known, record.extra));
        }
        Ok(out)
    }

    /// Persist the full catalogue via temp-write + fsync + atomic rename.
    /// `extras`, keyed by stream id, is re-attached to each record so unknown
    /// fields a prior [`Self::load`] preserved round-trip unchanged; a stream with
    /// no entry (e.g. freshly created) gets an empty mapping.
    #[instrument(skip(self, streams, extras), fields(path = %self.path.display(), count = streams.len()))]
    pub fn save(&self, streams: &[Stream], extras: &HashMap<String, serde_yaml::Mapping>) -> Result<(), AppError> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let records: Vec<RawRecord> = streams
            .iter()
            .cloned()
            .map(|known| {
                let extra = extras.get(&known.id).cloned().unwrap_or_default();
                RawRecord { known, extra }
            })
            .collect();
        let yaml = serde_yaml::to_string(&records)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(yaml.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| AppError::from(e.error))?;
        Ok(())
    }
}

fn validate_record(stream: &Stream) -> Result<(), AppError> {
    super::model::validate_name(&stream.name)?;
    super::model::validate_rtsp_url(&stream.rtsp_url)?;
    for param in &stream.ffmpeg_params {
        if super::model::contains_shell_metachar(param) {
            return Err(AppError::schema(format!(
                "ffmpeg_params element '{param}' contains a shell metacharacter"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::StreamStatus;

    fn sample(order: u32) -> Stream {
        Stream {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("Camera {order}"),
            rtsp_url: "rtsp://10.0.0.5/s".to_string(),
            created_at: chrono::Utc::now(),
            order,
            status: StreamStatus::Stopped,
            hw_accel_enabled: true,
            ffmpeg_params: vec![],
            target_fps: 5,
            zones: vec![],
        }
    }

    fn no_extras() -> HashMap<String, serde_yaml::Mapping> {
        HashMap::new()
    }

    #[test]
    fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.yml"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.yml"));
        let streams = vec![sample(0), sample(1)];
        store.save(&streams, &no_extras()).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].0.name, "Camera 0");
        assert_eq!(loaded[1].0.order, 1);
    }

    #[test]
    fn unknown_fields_survive_a_save_after_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let stream = sample(0);
        std::fs::write(
            &path,
            format!(
                "- id: {}\n  name: \"{}\"\n  rtsp_url: \"{}\"\n  created_at: {}\n  order: 0\n  status: stopped\n  future_field: kept\n",
                stream.id,
                stream.name,
                stream.rtsp_url,
                stream.created_at.to_rfc3339(),
            ),
        )
        .unwrap();
        let store = ConfigStore::new(&path);

        let loaded = store.load().unwrap();
        assert_eq!(loaded.len(), 1);
        let extra = loaded[0].1.get("future_field").unwrap().as_str().unwrap();
        assert_eq!(extra, "kept");

        let streams: Vec<Stream> = loaded.iter().map(|(s, _)| s.clone()).collect();
        let extras: HashMap<String, serde_yaml::Mapping> =
            loaded.into_iter().map(|(s, extra)| (s.id, extra)).collect();
        store.save(&streams, &extras).unwrap();

        let reloaded = store.load().unwrap();
        let extra = reloaded[0].1.get("future_field").unwrap().as_str().unwrap();
        assert_eq!(extra, "kept");
    }

    #[test]
    fn save_is_atomic_with_respect_to_a_prior_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let store = ConfigStore::new(&path);

        store.save(&[sample(0)], &no_extras()).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();

        store.save(&[sample(0), sample(1)], &no_extras()).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        assert_ne!(before, after);

        // No stray temp files left behind in the catalogue directory.
        let leftover = std::fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().file_name() != std::ffi::OsStr::new("config.yml")
            })
            .count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn rejects_invalid_record_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        std::fs::write(&path, "- id: x\n  name: \"\"\n  rtsp_url: rtsp://h/s\n  created_at: 2024-01-01T00:00:00Z\n  order: 0\n  status: stopped\n").unwrap();
        let store = ConfigStore::new(&path);
        assert!(store.load().is_err());
    }
}
