//! cgroup-v2 filesystem access
//!
//! Path resolution, `io.max` limit management and `io.stat` sampling for
//! container control groups.

mod limiter;
mod resolver;

pub use limiter::{ApplyOutcome, BandwidthLimiter, IoMaxEntry, LimitError, LimitValue};
pub use resolver::{discover_block_device, CgroupResolver, ResolveError};

use crate::models::DeviceId;

pub const IO_MAX_FILE: &str = "io.max";
pub const IO_STAT_FILE: &str = "io.stat";

/// Extract a container id from one cgroup directory name.
///
/// Handles containerd (`cri-containerd-<id>.scope`), CRI-O
/// (`crio-<id>.scope`), systemd docker (`docker-<id>.scope`) and plain
/// 64-hex directory names.
pub fn extract_container_id(component: &str) -> Option<String> {
    let name = component.strip_suffix(".scope").unwrap_or(component);

    for prefix in ["cri-containerd-", "crio-", "docker-"] {
        if let Some(id) = name.strip_prefix(prefix) {
            if is_hex_id(id) {
                return Some(id.to_string());
            }
        }
    }

    if is_hex_id(name) {
        return Some(name.to_string());
    }

    None
}

fn is_hex_id(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse `io.stat` content and return cumulative `(rbytes, wbytes)` for one
/// device, or `None` when the device has no entry yet.
pub fn parse_io_stat(content: &str, device: DeviceId) -> Option<(u64, u64)> {
    for line in content.lines() {
        let mut parts = line.split_whitespace();
        let Some(dev) = parts.next() else { continue };
        if dev.parse::<DeviceId>().ok() != Some(device) {
            continue;
        }

        let mut rbytes = 0u64;
        let mut wbytes = 0u64;
        for token in parts {
            if let Some((key, value)) = token.split_once('=') {
                match key {
                    "rbytes" => rbytes = value.parse().unwrap_or(0),
                    "wbytes" => wbytes = value.parse().unwrap_or(0),
                    _ => {}
                }
            }
        }
        return Some((rbytes, wbytes));
    }
    None
}
