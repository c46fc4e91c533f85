//! Core data model for the DRC-IO controller

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Priority class assigned to a workload via its priority label.
///
/// Only High and Low are managed; any other (or missing) label value means
/// the pod is outside the controller's responsibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityClass {
    High,
    Low,
    Unmanaged,
}

impl PriorityClass {
    /// Parse a priority label value (`hp` / `lp`).
    pub fn from_label_value(value: &str) -> Self {
        match value {
            "hp" => PriorityClass::High,
            "lp" => PriorityClass::Low,
            _ => PriorityClass::Unmanaged,
        }
    }

    pub fn is_managed(&self) -> bool {
        !matches!(self, PriorityClass::Unmanaged)
    }
}

/// Pod data returned by the orchestration API, reduced to what the
/// controller needs.
#[derive(Debug, Clone)]
pub struct PodSummary {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub labels: std::collections::BTreeMap<String, String>,
    pub phase: String,
    pub container_ids: Vec<String>,
}

/// One locally running container with its priority classification.
///
/// Records are produced wholesale on every discovery cycle; they are never
/// mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub container_id: String,
    pub pod_name: String,
    pub namespace: String,
    pub pod_uid: String,
    pub priority: PriorityClass,
    pub discovered_at: i64,
}

/// Block device identity, as the kernel keys `io.max` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    pub major: u32,
    pub minor: u32,
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

impl FromStr for DeviceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid device id {:?}", s))?;
        Ok(DeviceId {
            major: major
                .parse()
                .map_err(|_| format!("invalid major in {:?}", s))?,
            minor: minor
                .parse()
                .map_err(|_| format!("invalid minor in {:?}", s))?,
        })
    }
}

/// A container's cgroup directory together with the device its I/O limits
/// are keyed on. Derived by the resolver, read-only elsewhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupTarget {
    pub cgroup_path: PathBuf,
    pub device: DeviceId,
    pub container_id: String,
}

/// Read/write byte-rate limit for one cgroup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthLimit {
    pub read_bps: u64,
    pub write_bps: u64,
}

impl BandwidthLimit {
    pub fn new(read_bps: u64, write_bps: u64) -> Self {
        Self {
            read_bps,
            write_bps,
        }
    }

    /// Clamp into the configured band. Limits are never zero and never
    /// exceed the ceiling.
    pub fn clamp_to(self, floor: BandwidthLimit, ceiling: BandwidthLimit) -> BandwidthLimit {
        BandwidthLimit {
            read_bps: self
                .read_bps
                .clamp(floor.read_bps.max(1), ceiling.read_bps.max(1)),
            write_bps: self
                .write_bps
                .clamp(floor.write_bps.max(1), ceiling.write_bps.max(1)),
        }
    }
}

/// Contention decision produced by the estimator each tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentionSignal {
    /// Low-priority activity is not threatening High-priority I/O.
    #[default]
    None,
    /// Elevated activity observed, throttling not yet engaged.
    Building,
    /// Sustained contention; the Low class is held at the floor limit.
    Active,
}

impl ContentionSignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentionSignal::None => "none",
            ContentionSignal::Building => "building",
            ContentionSignal::Active => "active",
        }
    }
}

/// A limit currently in force on one cgroup, as shown in the status
/// document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedLimit {
    pub container_id: String,
    pub pod_name: String,
    pub namespace: String,
    pub cgroup_path: String,
    pub device: String,
    pub read_bps: u64,
    pub write_bps: u64,
}

/// Outcome of one control loop tick, kept in a bounded history for
/// diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickDecision {
    pub timestamp: i64,
    pub signal: ContentionSignal,
    pub resolved: usize,
    pub skipped: usize,
    pub applied: usize,
    pub errors: usize,
}

/// Immutable view of the controller published after every tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerSnapshot {
    pub node_name: String,
    pub high_priority_pods: usize,
    pub low_priority_pods: usize,
    pub contention: ContentionSignal,
    pub low_class_limit: Option<BandwidthLimit>,
    pub smoothed_low_bps: u64,
    pub throttled: Vec<AppliedLimit>,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_update: Option<i64>,
    pub decisions: Vec<TickDecision>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_from_label_value() {
        assert_eq!(PriorityClass::from_label_value("hp"), PriorityClass::High);
        assert_eq!(PriorityClass::from_label_value("lp"), PriorityClass::Low);
        assert_eq!(
            PriorityClass::from_label_value("batch"),
            PriorityClass::Unmanaged
        );
        assert_eq!(PriorityClass::from_label_value(""), PriorityClass::Unmanaged);
        assert!(!PriorityClass::Unmanaged.is_managed());
        assert!(PriorityClass::High.is_managed());
    }

    #[test]
    fn test_device_id_roundtrip() {
        let device: DeviceId = "259:4".parse().unwrap();
        assert_eq!(
            device,
            DeviceId {
                major: 259,
                minor: 4
            }
        );
        assert_eq!(device.to_string(), "259:4");
    }

    #[test]
    fn test_device_id_rejects_garbage() {
        assert!("nvme0n1".parse::<DeviceId>().is_err());
        assert!("8:".parse::<DeviceId>().is_err());
        assert!(":0".parse::<DeviceId>().is_err());
        assert!("8:0:1".parse::<DeviceId>().is_err());
    }

    #[test]
    fn test_limit_clamps_into_band() {
        let floor = BandwidthLimit::new(50, 10);
        let ceiling = BandwidthLimit::new(1000, 500);

        let below = BandwidthLimit::new(1, 1).clamp_to(floor, ceiling);
        assert_eq!(below, BandwidthLimit::new(50, 10));

        let above = BandwidthLimit::new(u64::MAX, u64::MAX).clamp_to(floor, ceiling);
        assert_eq!(above, BandwidthLimit::new(1000, 500));

        let inside = BandwidthLimit::new(200, 100).clamp_to(floor, ceiling);
        assert_eq!(inside, BandwidthLimit::new(200, 100));
    }

    #[test]
    fn test_limit_never_zero() {
        let zero_floor = BandwidthLimit::new(0, 0);
        let clamped = BandwidthLimit::new(0, 0).clamp_to(zero_floor, BandwidthLimit::new(100, 100));
        assert!(clamped.read_bps >= 1);
        assert!(clamped.write_bps >= 1);
    }

    #[test]
    fn test_contention_signal_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ContentionSignal::Building).unwrap(),
            "\"building\""
        );
        assert_eq!(ContentionSignal::Active.as_str(), "active");
    }
}
