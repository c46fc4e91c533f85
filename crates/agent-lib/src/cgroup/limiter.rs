//! `io.max` limit management
//!
//! Writes per-device bandwidth limits into container cgroups and confirms
//! the kernel retained them.

use super::IO_MAX_FILE;
use crate::models::{BandwidthLimit, CgroupTarget, DeviceId};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;
use tokio::fs;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LimitError {
    /// The cgroup directory disappeared between resolution and write.
    #[error("cgroup vanished: {0}")]
    CgroupGone(String),
    #[error("permission denied writing {0}")]
    PermissionDenied(String),
    /// The write succeeded but a re-read did not show the requested
    /// values. The kernel rejects entries it cannot honor.
    #[error("kernel did not retain limit for {device} in {path}")]
    NotRetained { path: String, device: DeviceId },
    #[error("malformed io.max content in {path}: {detail}")]
    Malformed { path: String, detail: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One `io.max` value: either a byte rate or the unlimited sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitValue {
    Max,
    Bytes(u64),
}

impl LimitValue {
    fn parse(s: &str) -> Result<Self, String> {
        if s == "max" {
            return Ok(LimitValue::Max);
        }
        s.parse()
            .map(LimitValue::Bytes)
            .map_err(|_| format!("invalid limit value {:?}", s))
    }
}

impl fmt::Display for LimitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimitValue::Max => write!(f, "max"),
            LimitValue::Bytes(n) => write!(f, "{}", n),
        }
    }
}

/// One parsed `io.max` line for a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoMaxEntry {
    pub device: DeviceId,
    pub rbps: LimitValue,
    pub wbps: LimitValue,
}

impl IoMaxEntry {
    fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let device = parts
            .next()
            .ok_or_else(|| "empty line".to_string())?
            .parse::<DeviceId>()?;

        let mut rbps = LimitValue::Max;
        let mut wbps = LimitValue::Max;
        for token in parts {
            let Some((key, value)) = token.split_once('=') else {
                return Err(format!("malformed token {:?}", token));
            };
            match key {
                "rbps" => rbps = LimitValue::parse(value)?,
                "wbps" => wbps = LimitValue::parse(value)?,
                // riops/wiops are not managed here
                _ => {}
            }
        }
        Ok(IoMaxEntry { device, rbps, wbps })
    }

    fn is_unlimited(&self) -> bool {
        self.rbps == LimitValue::Max && self.wbps == LimitValue::Max
    }
}

impl fmt::Display for IoMaxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rbps={} wbps={}", self.device, self.rbps, self.wbps)
    }
}

/// Whether an apply call changed kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The requested limit was already in force; nothing was written.
    Unchanged,
}

/// Writes and clears `io.max` bandwidth limits.
///
/// Every mutation is read back and verified, so a returned `Applied` means
/// the kernel actually holds the limit. Lines for other devices are
/// preserved untouched.
#[derive(Debug, Default)]
pub struct BandwidthLimiter;

impl BandwidthLimiter {
    pub fn new() -> Self {
        Self
    }

    /// Apply a read/write limit for the target's device.
    pub async fn apply(
        &self,
        target: &CgroupTarget,
        limit: BandwidthLimit,
    ) -> Result<ApplyOutcome, LimitError> {
        let path = target.cgroup_path.join(IO_MAX_FILE);
        let entries = self.read_entries(&path).await?;

        let desired = IoMaxEntry {
            device: target.device,
            rbps: LimitValue::Bytes(limit.read_bps),
            wbps: LimitValue::Bytes(limit.write_bps),
        };

        if entries.iter().any(|e| *e == desired) {
            return Ok(ApplyOutcome::Unchanged);
        }

        let mut rewritten: Vec<IoMaxEntry> = entries
            .into_iter()
            .filter(|e| e.device != target.device)
            .collect();
        rewritten.push(desired);
        self.write_entries(&path, &rewritten).await?;

        let confirmed = self.read_entries(&path).await?;
        if !confirmed.iter().any(|e| *e == desired) {
            return Err(LimitError::NotRetained {
                path: path.display().to_string(),
                device: target.device,
            });
        }

        debug!(
            cgroup = %target.cgroup_path.display(),
            device = %target.device,
            read_bps = limit.read_bps,
            write_bps = limit.write_bps,
            "Limit applied"
        );
        Ok(ApplyOutcome::Applied)
    }

    /// Remove any limit for the target's device.
    ///
    /// The kernel drops fully-unlimited entries from the file, so after a
    /// successful clear the device either has no entry or an unlimited one.
    pub async fn clear(&self, target: &CgroupTarget) -> Result<ApplyOutcome, LimitError> {
        let path = target.cgroup_path.join(IO_MAX_FILE);
        let entries = self.read_entries(&path).await?;

        let current = entries.iter().find(|e| e.device == target.device);
        if current.map(|e| e.is_unlimited()).unwrap_or(true) {
            return Ok(ApplyOutcome::Unchanged);
        }

        let mut rewritten: Vec<IoMaxEntry> = entries
            .into_iter()
            .filter(|e| e.device != target.device)
            .collect();
        rewritten.push(IoMaxEntry {
            device: target.device,
            rbps: LimitValue::Max,
            wbps: LimitValue::Max,
        });
        self.write_entries(&path, &rewritten).await?;

        let confirmed = self.read_entries(&path).await?;
        let remaining = confirmed.iter().find(|e| e.device == target.device);
        if remaining.map(|e| !e.is_unlimited()).unwrap_or(false) {
            return Err(LimitError::NotRetained {
                path: path.display().to_string(),
                device: target.device,
            });
        }

        debug!(
            cgroup = %target.cgroup_path.display(),
            device = %target.device,
            "Limit cleared"
        );
        Ok(ApplyOutcome::Applied)
    }

    /// The limits currently in force for a cgroup.
    pub async fn current_limits(&self, cgroup_path: &Path) -> Result<Vec<IoMaxEntry>, LimitError> {
        self.read_entries(&cgroup_path.join(IO_MAX_FILE)).await
    }

    async fn read_entries(&self, path: &Path) -> Result<Vec<IoMaxEntry>, LimitError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => return Err(self.map_io_error(e, path)),
        };

        let mut entries = Vec::new();
        for line in content.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let entry = IoMaxEntry::parse(line).map_err(|detail| LimitError::Malformed {
                path: path.display().to_string(),
                detail,
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn write_entries(&self, path: &Path, entries: &[IoMaxEntry]) -> Result<(), LimitError> {
        let mut content = String::new();
        for entry in entries {
            content.push_str(&entry.to_string());
            content.push('\n');
        }
        fs::write(path, content)
            .await
            .map_err(|e| self.map_io_error(e, path))
    }

    fn map_io_error(&self, e: std::io::Error, path: &Path) -> LimitError {
        match e.kind() {
            ErrorKind::NotFound => LimitError::CgroupGone(path.display().to_string()),
            ErrorKind::PermissionDenied => {
                LimitError::PermissionDenied(path.display().to_string())
            }
            _ => LimitError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn target(dir: &TempDir, device: DeviceId) -> CgroupTarget {
        CgroupTarget {
            cgroup_path: dir.path().to_path_buf(),
            device,
            container_id: "a".repeat(64),
        }
    }

    fn device() -> DeviceId {
        DeviceId {
            major: 259,
            minor: 4,
        }
    }

    async fn read_io_max(dir: &TempDir) -> String {
        tokio::fs::read_to_string(dir.path().join(IO_MAX_FILE))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_apply_writes_and_confirms() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IO_MAX_FILE), "").unwrap();

        let limiter = BandwidthLimiter::new();
        let outcome = limiter
            .apply(&target(&dir, device()), BandwidthLimit::new(209715200, 52428800))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(
            read_io_max(&dir).await,
            "259:4 rbps=209715200 wbps=52428800\n"
        );
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(IO_MAX_FILE),
            "259:4 rbps=209715200 wbps=52428800\n",
        )
        .unwrap();

        let limiter = BandwidthLimiter::new();
        let outcome = limiter
            .apply(&target(&dir, device()), BandwidthLimit::new(209715200, 52428800))
            .await
            .unwrap();

        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_apply_preserves_other_devices() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IO_MAX_FILE), "8:0 rbps=1000 wbps=2000\n").unwrap();

        let limiter = BandwidthLimiter::new();
        limiter
            .apply(&target(&dir, device()), BandwidthLimit::new(300, 400))
            .await
            .unwrap();

        assert_eq!(
            read_io_max(&dir).await,
            "8:0 rbps=1000 wbps=2000\n259:4 rbps=300 wbps=400\n"
        );
    }

    #[tokio::test]
    async fn test_clear_removes_limit() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(IO_MAX_FILE),
            "259:4 rbps=209715200 wbps=52428800\n",
        )
        .unwrap();

        let limiter = BandwidthLimiter::new();
        let outcome = limiter.clear(&target(&dir, device())).await.unwrap();

        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(read_io_max(&dir).await, "259:4 rbps=max wbps=max\n");
    }

    #[tokio::test]
    async fn test_clear_unlimited_is_noop() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IO_MAX_FILE), "259:4 rbps=max wbps=max\n").unwrap();

        let limiter = BandwidthLimiter::new();
        let outcome = limiter.clear(&target(&dir, device())).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_clear_missing_entry_is_noop() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IO_MAX_FILE), "").unwrap();

        let limiter = BandwidthLimiter::new();
        let outcome = limiter.clear(&target(&dir, device())).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Unchanged);
    }

    #[tokio::test]
    async fn test_missing_cgroup_maps_to_gone() {
        let limiter = BandwidthLimiter::new();
        let gone = CgroupTarget {
            cgroup_path: PathBuf::from("/nonexistent/cgroup/path"),
            device: device(),
            container_id: "a".repeat(64),
        };

        let err = limiter
            .apply(&gone, BandwidthLimit::new(100, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, LimitError::CgroupGone(_)));
    }

    #[tokio::test]
    async fn test_current_limits_parses_entries() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(IO_MAX_FILE),
            "8:0 rbps=1000 wbps=max\n259:4 rbps=max wbps=500\n",
        )
        .unwrap();

        let limiter = BandwidthLimiter::new();
        let entries = limiter.current_limits(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0],
            IoMaxEntry {
                device: DeviceId { major: 8, minor: 0 },
                rbps: LimitValue::Bytes(1000),
                wbps: LimitValue::Max,
            }
        );
        assert_eq!(entries[1].wbps, LimitValue::Bytes(500));
    }

    #[tokio::test]
    async fn test_malformed_content_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(IO_MAX_FILE), "banana\n").unwrap();

        let limiter = BandwidthLimiter::new();
        let err = limiter.current_limits(dir.path()).await.unwrap_err();
        assert!(matches!(err, LimitError::Malformed { .. }));
    }
}
