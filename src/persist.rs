//! JSON export of analysis state.
//!
//! Flat serde_json files so downstream tooling and replays can consume the
//! engine's output without linking the crate.

use crate::alerts::Alert;
use crate::playback::HistoricalSnapshot;
use crate::signal::Signal;
use crate::types::{Coin, FlowData};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One coin's full exported state.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportBundle {
    pub coin: Coin,
    pub exported_at: DateTime<Utc>,
    pub flow: FlowData,
    pub active_signal: Option<Signal>,
    pub alerts: Vec<Alert>,
}

pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), PersistError> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(BufWriter::new(file), value)?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, PersistError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn export_bundle(path: &Path, bundle: &ExportBundle) -> Result<(), PersistError> {
    write_json(path, bundle)
}

pub fn import_bundle(path: &Path) -> Result<ExportBundle, PersistError> {
    read_json(path)
}

/// Export a playback ring for offline replay.
pub fn export_snapshots(path: &Path, snapshots: &[HistoricalSnapshot]) -> Result<(), PersistError> {
    write_json(path, &snapshots)
}

pub fn import_snapshots(path: &Path) -> Result<Vec<HistoricalSnapshot>, PersistError> {
    read_json(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FlowMetrics, TimeWindow};
    use std::path::PathBuf;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("hyperflow-{}-{}", std::process::id(), name))
    }

    fn bundle() -> ExportBundle {
        let now = Utc::now();
        ExportBundle {
            coin: Coin::Btc,
            exported_at: now,
            flow: FlowData {
                coin: Coin::Btc,
                window: TimeWindow::M15,
                nodes: Vec::new(),
                metrics: FlowMetrics::default(),
                series: Vec::new(),
                current_price: Some(50_000.0),
                generated_at: now,
            },
            active_signal: None,
            alerts: Vec::new(),
        }
    }

    #[test]
    fn test_bundle_round_trip() {
        let path = temp_path("bundle.json");
        let out = bundle();
        export_bundle(&path, &out).unwrap();
        let back = import_bundle(&path).unwrap();
        assert_eq!(back.coin, Coin::Btc);
        assert_eq!(back.flow.current_price, Some(50_000.0));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = import_bundle(Path::new("/nonexistent/hyperflow.json")).unwrap_err();
        assert!(matches!(err, PersistError::Io(_)));
    }

    #[test]
    fn test_malformed_json_is_json_error() {
        let path = temp_path("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        let err = import_bundle(&path).unwrap_err();
        assert!(matches!(err, PersistError::Json(_)));
        std::fs::remove_file(&path).ok();
    }
}
