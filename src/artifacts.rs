//! Derived artifacts written next to each saved download.
//!
//! Every saved file gets a companion metadata record so shore-side tooling
//! can ingest downloads without re-deriving context. Fixed-gear deployments
//! additionally get a position metric record, since a fixed-gear haul is
//! meaningful only together with where the gear sat.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{GpsFix, LoggerIdentity};

/// Companion record for one saved download.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadMetadata {
    pub file_name: String,
    pub size_bytes: u64,
    pub logger_mac: String,
    pub logger_sn: String,
    pub logger_type: String,
    pub downloaded_at_utc: DateTime<Utc>,
    pub lat: f64,
    pub lon: f64,
}

/// Position metric for fixed-gear deployments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixedGearMetric {
    pub file_name: String,
    pub logger_sn: String,
    pub lat: f64,
    pub lon: f64,
    pub recorded_at_utc: DateTime<Utc>,
}

fn sibling_path(saved_path: &Path, suffix: &str) -> PathBuf {
    let mut name = saved_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    name.push_str(suffix);
    saved_path.with_file_name(name)
}

/// Write the metadata record next to a saved file. Returns its path.
pub fn write_download_metadata(
    saved_path: &Path,
    identity: &LoggerIdentity,
    size_bytes: u64,
    fix: &GpsFix,
) -> std::io::Result<PathBuf> {
    let meta = DownloadMetadata {
        file_name: saved_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        size_bytes,
        logger_mac: identity.mac.to_string(),
        logger_sn: identity.serial_number.clone(),
        logger_type: identity.kind.to_string(),
        downloaded_at_utc: Utc::now(),
        lat: fix.lat,
        lon: fix.lon,
    };
    let path = sibling_path(saved_path, ".meta.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&meta)?)?;
    debug!(path = %path.display(), "Wrote download metadata");
    Ok(path)
}

/// Write the fixed-gear position metric next to a saved file.
pub fn write_fixed_gear_metric(
    saved_path: &Path,
    identity: &LoggerIdentity,
    fix: &GpsFix,
) -> std::io::Result<PathBuf> {
    let metric = FixedGearMetric {
        file_name: saved_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default(),
        logger_sn: identity.serial_number.clone(),
        lat: fix.lat,
        lon: fix.lon,
        recorded_at_utc: Utc::now(),
    };
    let path = sibling_path(saved_path, ".gpq.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&metric)?)?;
    debug!(path = %path.display(), "Wrote fixed-gear metric");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LoggerType, MacAddr};

    fn identity() -> LoggerIdentity {
        LoggerIdentity {
            mac: MacAddr::parse("aa:bb:cc:dd:ee:01").unwrap(),
            serial_number: "1805501".into(),
            kind: LoggerType::Tdo,
        }
    }

    fn fix() -> GpsFix {
        GpsFix {
            lat: -41.2865,
            lon: 174.7762,
            timestamp: Utc::now(),
            speed_knots: 0.2,
        }
    }

    #[test]
    fn metadata_lands_next_to_download() {
        let tmp = tempfile::tempdir().unwrap();
        let saved = tmp.path().join("2305778_BIL_v2.lid");
        std::fs::write(&saved, b"payload").unwrap();

        let meta_path = write_download_metadata(&saved, &identity(), 7, &fix()).unwrap();
        assert_eq!(meta_path, tmp.path().join("2305778_BIL_v2.lid.meta.json"));
        let meta: DownloadMetadata =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        assert_eq!(meta.size_bytes, 7);
        assert_eq!(meta.logger_type, "TDO");
    }

    #[test]
    fn fixed_gear_metric_written() {
        let tmp = tempfile::tempdir().unwrap();
        let saved = tmp.path().join("f.lid");
        std::fs::write(&saved, b"x").unwrap();

        let path = write_fixed_gear_metric(&saved, &identity(), &fix()).unwrap();
        assert!(path.to_string_lossy().ends_with(".gpq.json"));
        let metric: FixedGearMetric =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert!((metric.lat - -41.2865).abs() < 1e-9);
    }
}
