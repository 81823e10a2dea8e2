//! Run identifiers and the on-disk layout of run snapshots
//!
//! Every run owns two artifacts named after its [`RunId`]:
//! `<data-dir>/state/<run-id>.json` and `<data-dir>/output/<run-id>.json`.

use crate::config::OutputConfig;
use crate::storage::StorageResult;
use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Timelike, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// External text encoding of run ids, used as artifact file stems
const RUN_ID_FORMAT: &str = "%Y%m%dT%H%M%SZ";

const ARTIFACT_EXTENSION: &str = "json";

/// Identifies a run by its creation time (UTC, second resolution)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId(DateTime<Utc>);

impl RunId {
    /// Creates a run id for the given instant, truncated to whole seconds
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.with_nanosecond(0).unwrap_or(at))
    }

    /// Parses the external encoding (e.g. `20261016T120000Z`)
    pub fn parse(s: &str) -> Option<Self> {
        NaiveDateTime::parse_from_str(s, RUN_ID_FORMAT)
            .ok()
            .map(|naive| Self(Utc.from_utc_datetime(&naive)))
    }

    /// When this run was created
    pub fn created_at(&self) -> DateTime<Utc> {
        self.0
    }

    /// The run id one second later
    pub fn successor(&self) -> Self {
        Self(self.0 + Duration::seconds(1))
    }

    /// Whole days elapsed between the run's creation and `now`
    pub fn days_since(&self, now: DateTime<Utc>) -> i64 {
        (now - self.0).num_days()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(RUN_ID_FORMAT))
    }
}

/// File-system layout of run snapshots and the published alias
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotLayout {
    state_dir: PathBuf,
    output_dir: PathBuf,
    latest_path: PathBuf,
}

impl SnapshotLayout {
    pub fn new(data_dir: impl AsRef<Path>, latest_path: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.as_ref();
        Self {
            state_dir: data_dir.join("state"),
            output_dir: data_dir.join("output"),
            latest_path: latest_path.into(),
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.data_dir, config.latest_path())
    }

    pub fn state_path(&self, run: RunId) -> PathBuf {
        self.state_dir
            .join(format!("{}.{}", run, ARTIFACT_EXTENSION))
    }

    pub fn output_path(&self, run: RunId) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", run, ARTIFACT_EXTENSION))
    }

    pub fn latest_path(&self) -> &Path {
        &self.latest_path
    }

    /// Creates the artifact directories if they are missing
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(&self.state_dir)?;
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }

    /// Lists every run with at least one artifact on disk, newest first
    ///
    /// Files whose stem is not a valid run id are ignored.
    pub fn list_runs(&self) -> StorageResult<Vec<RunId>> {
        let mut runs = BTreeSet::new();
        collect_run_ids(&self.state_dir, &mut runs)?;
        collect_run_ids(&self.output_dir, &mut runs)?;
        Ok(runs.into_iter().rev().collect())
    }
}

fn collect_run_ids(dir: &Path, runs: &mut BTreeSet<RunId>) -> StorageResult<()> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(ARTIFACT_EXTENSION) {
            continue;
        }
        match path.file_stem().and_then(|stem| stem.to_str()).and_then(RunId::parse) {
            Some(run) => {
                runs.insert(run);
            }
            None => tracing::debug!("Ignoring unrecognized artifact {}", path.display()),
        }
    }

    Ok(())
}

/// Writes `bytes` to `path` through a synced temporary file and a rename
///
/// Readers observe either the previous content or the new content, never a
/// partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = File::create(&temp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}
