//! Container cgroup resolution
//!
//! Maps a discovered container to its cgroup-v2 directory and determines
//! the block device backing the node's shared data volume.

use super::{extract_container_id, IO_MAX_FILE};
use crate::models::{CgroupTarget, ContainerRecord, DeviceId};
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ResolveError {
    /// No populated cgroup for this container yet, or it has gone away.
    /// The control loop skips such containers for the current tick.
    #[error("no cgroup found for container {0}")]
    NotFound(String),
    #[error("block device for {0} not discovered")]
    NoDevice(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

struct CacheEntry {
    target: CgroupTarget,
    resolved_at: Instant,
}

/// Resolves container records to cgroup targets.
///
/// Results are cached with a short TTL; entries are dropped when the
/// backing path disappears or the owning record vanishes from discovery.
pub struct CgroupResolver {
    cgroup_root: PathBuf,
    proc_path: PathBuf,
    mount_path: PathBuf,
    mountinfo_path: PathBuf,
    partitions_path: PathBuf,
    device: Option<DeviceId>,
    cache: HashMap<String, CacheEntry>,
    ttl: Duration,
}

impl CgroupResolver {
    pub fn new(
        cgroup_root: impl Into<PathBuf>,
        mount_path: impl Into<PathBuf>,
        ttl: Duration,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            proc_path: PathBuf::from("/proc"),
            mount_path: mount_path.into(),
            mountinfo_path: PathBuf::from("/proc/self/mountinfo"),
            partitions_path: PathBuf::from("/proc/partitions"),
            device: None,
            cache: HashMap::new(),
            ttl,
        }
    }

    /// Override proc-derived paths (for testing).
    pub fn with_paths(
        mut self,
        proc_path: impl Into<PathBuf>,
        mountinfo_path: impl Into<PathBuf>,
        partitions_path: impl Into<PathBuf>,
    ) -> Self {
        self.proc_path = proc_path.into();
        self.mountinfo_path = mountinfo_path.into();
        self.partitions_path = partitions_path.into();
        self
    }

    /// Pre-seed the backing device (for testing).
    pub fn with_device(mut self, device: DeviceId) -> Self {
        self.device = Some(device);
        self
    }

    /// The backing device for the shared volume, discovering it on first
    /// use. Discovery failing at startup is not fatal; the loop retries on
    /// a later tick.
    pub async fn ensure_device(&mut self) -> Result<DeviceId, ResolveError> {
        if let Some(device) = self.device {
            return Ok(device);
        }

        let discovered = discover_block_device(
            &self.mount_path,
            &self.mountinfo_path,
            &self.partitions_path,
        )
        .await?;

        match discovered {
            Some(device) => {
                info!(device = %device, mount = %self.mount_path.display(), "Discovered block device for shared volume");
                self.device = Some(device);
                Ok(device)
            }
            None => Err(ResolveError::NoDevice(
                self.mount_path.display().to_string(),
            )),
        }
    }

    /// Resolve a container record to its cgroup target.
    pub async fn resolve(
        &mut self,
        record: &ContainerRecord,
    ) -> Result<CgroupTarget, ResolveError> {
        let device = self.ensure_device().await?;
        let id = record.container_id.as_str();

        if let Some(entry) = self.cache.get(id) {
            // A cached path can outlive the container it belonged to.
            if entry.resolved_at.elapsed() < self.ttl
                && entry.target.cgroup_path.join(IO_MAX_FILE).exists()
            {
                return Ok(entry.target.clone());
            }
            self.cache.remove(id);
        }

        let path = match self.find_via_proc(id).await {
            Some(path) => Some(path),
            None => self.find_via_walk(id).await,
        };

        let Some(cgroup_path) = path else {
            debug!(container_id = %id, "No cgroup path found");
            return Err(ResolveError::NotFound(id.to_string()));
        };

        let target = CgroupTarget {
            cgroup_path,
            device,
            container_id: id.to_string(),
        };
        self.cache.insert(
            id.to_string(),
            CacheEntry {
                target: target.clone(),
                resolved_at: Instant::now(),
            },
        );
        Ok(target)
    }

    /// Drop cache entries for containers no longer present in discovery.
    pub fn retain(&mut self, live: &HashSet<String>) {
        self.cache.retain(|id, _| live.contains(id));
    }

    /// Scan `/proc/<pid>/cgroup` (`0::/path` lines) for a path embedding
    /// the container id, the way the runtime names its scopes.
    async fn find_via_proc(&self, container_id: &str) -> Option<PathBuf> {
        let mut entries = fs::read_dir(&self.proc_path).await.ok()?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }

            let Ok(content) = fs::read_to_string(entry.path().join("cgroup")).await else {
                continue;
            };

            for line in content.lines() {
                let Some(rel) = line.strip_prefix("0::") else { continue };
                if !rel.contains(container_id) {
                    continue;
                }
                let path = self.cgroup_root.join(rel.trim_start_matches('/'));
                if path.join(IO_MAX_FILE).exists() {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Walk the kubepods and system slices looking for a directory whose
    /// name embeds the container id and that carries an `io.max` file.
    async fn find_via_walk(&self, container_id: &str) -> Option<PathBuf> {
        for slice in ["kubepods.slice", "system.slice"] {
            let root = self.cgroup_root.join(slice);
            if !root.exists() {
                continue;
            }
            if let Some(found) = Self::walk(&root, container_id).await {
                return Some(found);
            }
        }
        None
    }

    async fn walk(dir: &Path, container_id: &str) -> Option<PathBuf> {
        let mut entries = fs::read_dir(dir).await.ok()?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().to_string();
            let matched = extract_container_id(&name)
                .map(|id| id == container_id)
                .unwrap_or(false)
                || name.contains(container_id);

            if matched && path.join(IO_MAX_FILE).exists() {
                return Some(path);
            }

            if let Some(found) = Box::pin(Self::walk(&path, container_id)).await {
                return Some(found);
            }
        }
        None
    }
}

/// Discover the block device behind a mount point by parsing mountinfo.
///
/// The `major:minor` field is used directly when it names a real device;
/// virtual filesystems (major 0) fall back to resolving the mount source:
/// stat of the device node (following symlinks, covering NVMe naming), then
/// a `/proc/partitions` lookup by base name.
pub async fn discover_block_device(
    mount_path: &Path,
    mountinfo_path: &Path,
    partitions_path: &Path,
) -> std::io::Result<Option<DeviceId>> {
    let content = fs::read_to_string(mountinfo_path).await?;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // <id> <parent> <major:minor> <root> <mount point> ... - <fstype> <source> <opts>
        if fields.len() < 10 {
            continue;
        }
        if Path::new(fields[4]) != mount_path {
            continue;
        }

        if let Ok(device) = fields[2].parse::<DeviceId>() {
            if device.major != 0 {
                return Ok(Some(device));
            }
        }

        let source = fields
            .iter()
            .position(|f| *f == "-")
            .and_then(|i| fields.get(i + 2))
            .copied();

        if let Some(source) = source {
            if let Some(device) = stat_block_device(source).await {
                return Ok(Some(device));
            }
            if let Some(device) = lookup_partition(partitions_path, source).await {
                return Ok(Some(device));
            }
        }
        return Ok(None);
    }

    Ok(None)
}

async fn stat_block_device(path: &str) -> Option<DeviceId> {
    let resolved = fs::canonicalize(path).await.ok()?;
    let meta = fs::metadata(&resolved).await.ok()?;
    if !meta.file_type().is_block_device() {
        return None;
    }
    let rdev = meta.rdev();
    Some(DeviceId {
        major: nix::sys::stat::major(rdev) as u32,
        minor: nix::sys::stat::minor(rdev) as u32,
    })
}

async fn lookup_partition(partitions_path: &Path, device: &str) -> Option<DeviceId> {
    let base = Path::new(device)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(device);
    let content = fs::read_to_string(partitions_path).await.ok()?;

    for line in content.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 4 && fields[3] == base {
            if let (Ok(major), Ok(minor)) = (fields[0].parse(), fields[1].parse()) {
                return Some(DeviceId { major, minor });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PriorityClass;
    use tempfile::TempDir;

    const HEX_ID: &str = "abc123def456789012345678901234567890123456789012345678901234abcd";

    fn record(container_id: &str) -> ContainerRecord {
        ContainerRecord {
            container_id: container_id.to_string(),
            pod_name: "batch-job".to_string(),
            namespace: "default".to_string(),
            pod_uid: "uid-1".to_string(),
            priority: PriorityClass::Low,
            discovered_at: 0,
        }
    }

    fn test_device() -> DeviceId {
        DeviceId { major: 8, minor: 0 }
    }

    /// Build a cgroup tree with one container scope carrying io.max.
    fn cgroup_tree(root: &Path, container_id: &str) -> PathBuf {
        let scope = root
            .join("kubepods.slice")
            .join("kubepods-besteffort.slice")
            .join(format!("cri-containerd-{}.scope", container_id));
        std::fs::create_dir_all(&scope).unwrap();
        std::fs::write(scope.join(IO_MAX_FILE), "").unwrap();
        scope
    }

    fn resolver(root: &Path, empty: &TempDir) -> CgroupResolver {
        CgroupResolver::new(root, "/mnt/data", Duration::from_secs(30))
            .with_paths(
                empty.path(),
                empty.path().join("mountinfo"),
                empty.path().join("partitions"),
            )
            .with_device(test_device())
    }

    #[tokio::test]
    async fn test_resolve_via_directory_walk() {
        let root = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        let scope = cgroup_tree(root.path(), HEX_ID);

        let mut resolver = resolver(root.path(), &empty);
        let target = resolver.resolve(&record(HEX_ID)).await.unwrap();

        assert_eq!(target.cgroup_path, scope);
        assert_eq!(target.device, test_device());
        assert_eq!(target.container_id, HEX_ID);
    }

    #[tokio::test]
    async fn test_resolve_not_found_for_unknown_container() {
        let root = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        cgroup_tree(root.path(), HEX_ID);

        let mut resolver = resolver(root.path(), &empty);
        let other = "f".repeat(64);
        let err = resolver.resolve(&record(&other)).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_not_found_without_io_max() {
        let root = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        // Directory exists but the io controller is not populated yet.
        let scope = root
            .path()
            .join("kubepods.slice")
            .join(format!("cri-containerd-{}.scope", HEX_ID));
        std::fs::create_dir_all(&scope).unwrap();

        let mut resolver = resolver(root.path(), &empty);
        let err = resolver.resolve(&record(HEX_ID)).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_detects_removed_cgroup() {
        let root = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        let scope = cgroup_tree(root.path(), HEX_ID);

        let mut resolver = resolver(root.path(), &empty);
        resolver.resolve(&record(HEX_ID)).await.unwrap();

        // Container exits between ticks; the cached path must not be
        // handed out again.
        std::fs::remove_dir_all(&scope).unwrap();
        let err = resolver.resolve(&record(HEX_ID)).await.unwrap_err();
        assert!(matches!(err, ResolveError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_via_proc_scan() {
        let root = TempDir::new().unwrap();
        let proc_dir = TempDir::new().unwrap();

        let scope = root
            .path()
            .join("system.slice")
            .join(format!("docker-{}.scope", HEX_ID));
        std::fs::create_dir_all(&scope).unwrap();
        std::fs::write(scope.join(IO_MAX_FILE), "").unwrap();

        let pid_dir = proc_dir.path().join("4242");
        std::fs::create_dir_all(&pid_dir).unwrap();
        std::fs::write(
            pid_dir.join("cgroup"),
            format!("0::/system.slice/docker-{}.scope\n", HEX_ID),
        )
        .unwrap();

        let mut resolver = CgroupResolver::new(root.path(), "/mnt/data", Duration::from_secs(30))
            .with_paths(
                proc_dir.path(),
                proc_dir.path().join("mountinfo"),
                proc_dir.path().join("partitions"),
            )
            .with_device(test_device());

        let target = resolver.resolve(&record(HEX_ID)).await.unwrap();
        assert_eq!(target.cgroup_path, scope);
    }

    #[tokio::test]
    async fn test_retain_drops_stale_cache_entries() {
        let root = TempDir::new().unwrap();
        let empty = TempDir::new().unwrap();
        cgroup_tree(root.path(), HEX_ID);

        let mut resolver = resolver(root.path(), &empty);
        resolver.resolve(&record(HEX_ID)).await.unwrap();
        assert_eq!(resolver.cache.len(), 1);

        resolver.retain(&HashSet::new());
        assert!(resolver.cache.is_empty());
    }

    #[tokio::test]
    async fn test_discover_block_device_direct_major_minor() {
        let dir = TempDir::new().unwrap();
        let mountinfo = dir.path().join("mountinfo");
        std::fs::write(
            &mountinfo,
            "36 25 259:4 / /mnt/data rw,relatime shared:1 - ext4 /dev/nvme1n1 rw\n",
        )
        .unwrap();

        let device = discover_block_device(
            Path::new("/mnt/data"),
            &mountinfo,
            &dir.path().join("partitions"),
        )
        .await
        .unwrap();

        assert_eq!(
            device,
            Some(DeviceId {
                major: 259,
                minor: 4
            })
        );
    }

    #[tokio::test]
    async fn test_discover_block_device_partitions_fallback() {
        let dir = TempDir::new().unwrap();
        let mountinfo = dir.path().join("mountinfo");
        let partitions = dir.path().join("partitions");
        // Virtual major forces source resolution; the device node does not
        // exist here, so the partitions table is the only way out.
        std::fs::write(
            &mountinfo,
            "36 25 0:52 / /mnt/data rw,relatime shared:1 - ext4 /dev/nvme1n1 rw\n",
        )
        .unwrap();
        std::fs::write(
            &partitions,
            "major minor  #blocks  name\n\n 259        4  524288000 nvme1n1\n",
        )
        .unwrap();

        let device = discover_block_device(Path::new("/mnt/data"), &mountinfo, &partitions)
            .await
            .unwrap();

        assert_eq!(
            device,
            Some(DeviceId {
                major: 259,
                minor: 4
            })
        );
    }

    #[tokio::test]
    async fn test_discover_block_device_unknown_mount() {
        let dir = TempDir::new().unwrap();
        let mountinfo = dir.path().join("mountinfo");
        std::fs::write(
            &mountinfo,
            "36 25 8:1 / /var/lib rw,relatime shared:1 - ext4 /dev/sda1 rw\n",
        )
        .unwrap();

        let device = discover_block_device(
            Path::new("/mnt/data"),
            &mountinfo,
            &dir.path().join("partitions"),
        )
        .await
        .unwrap();
        assert_eq!(device, None);
    }
}
