//! Bandwidth control loop
//!
//! Ties discovery, cgroup resolution, contention estimation and limit
//! application together into the periodic tick that keeps Low-priority
//! disk traffic inside its configured band.

use crate::cgroup::{
    parse_io_stat, ApplyOutcome, BandwidthLimiter, CgroupResolver, LimitError, ResolveError,
    IO_STAT_FILE,
};
use crate::contention::{ContentionConfig, ContentionEstimator, IoSample};
use crate::discovery::{PodLister, WorkloadIndex};
use crate::health::{components, HealthRegistry};
use crate::models::{
    AppliedLimit, BandwidthLimit, ContainerRecord, ContentionSignal, ControllerSnapshot,
    PriorityClass, TickDecision,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::state::StateHandle;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How many tick decisions the status document retains.
const DECISION_HISTORY: usize = 20;

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub node_name: String,
    /// Tick period (default: 5 seconds)
    pub poll_interval: Duration,
    /// Pod label carrying the priority class
    pub priority_label: String,
    /// Limit held during active contention
    pub floor: BandwidthLimit,
    /// Limit held otherwise
    pub ceiling: BandwidthLimit,
    pub contention: ContentionConfig,
    /// Remove all managed limits when the loop shuts down
    pub clear_on_exit: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            poll_interval: Duration::from_secs(5),
            priority_label: "drcio.io/priority".to_string(),
            floor: BandwidthLimit::new(50 * 1024 * 1024, 10 * 1024 * 1024),
            ceiling: BandwidthLimit::new(200 * 1024 * 1024, 50 * 1024 * 1024),
            contention: ContentionConfig::default(),
            clear_on_exit: true,
        }
    }
}

/// The node-local bandwidth controller.
///
/// A single instance owns all mutable control state; API handlers only
/// ever see the snapshots it publishes through the [`StateHandle`].
pub struct Controller {
    config: ControllerConfig,
    index: WorkloadIndex,
    resolver: CgroupResolver,
    limiter: BandwidthLimiter,
    estimator: ContentionEstimator,
    state: StateHandle,
    health: HealthRegistry,
    metrics: ControllerMetrics,
    logger: StructuredLogger,
    /// Limits currently in force, keyed by container id.
    limited: HashMap<String, AppliedLimit>,
    error_count: u64,
    last_error: Option<String>,
    last_update: Option<i64>,
    decisions: VecDeque<TickDecision>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        lister: Arc<dyn PodLister>,
        resolver: CgroupResolver,
        state: StateHandle,
        health: HealthRegistry,
    ) -> Self {
        let index = WorkloadIndex::new(
            lister,
            config.node_name.clone(),
            config.priority_label.clone(),
        );
        let estimator = ContentionEstimator::new(config.contention.clone());
        let logger = StructuredLogger::new(config.node_name.clone());

        Self {
            config,
            index,
            resolver,
            limiter: BandwidthLimiter::new(),
            estimator,
            state,
            health,
            metrics: ControllerMetrics::new(),
            logger,
            limited: HashMap::new(),
            error_count: 0,
            last_error: None,
            last_update: None,
            decisions: VecDeque::new(),
        }
    }

    /// Run the control loop until a shutdown signal arrives.
    pub async fn run(mut self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            node = %self.config.node_name,
            "Starting bandwidth control loop"
        );

        for component in [
            components::DISCOVERY,
            components::RESOLVER,
            components::LIMITER,
            components::CONTROL_LOOP,
        ] {
            self.health.register(component).await;
        }

        let mut ticker = interval(self.config.poll_interval);
        // A slow tick must not cause a burst of catch-up ticks.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    self.tick().await;
                    self.metrics.observe_tick_duration(start.elapsed().as_secs_f64());
                    self.health.set_healthy(components::CONTROL_LOOP).await;
                    self.health.set_ready(true).await;
                }
                _ = shutdown.recv() => {
                    let cleared = if self.config.clear_on_exit {
                        self.clear_all_limits().await
                    } else {
                        0
                    };
                    self.logger.log_shutdown("signal", cleared);
                    break;
                }
            }
        }
    }

    /// One control cycle: refresh discovery, sample Low-class I/O, update
    /// the contention signal and converge every Low container's `io.max`
    /// onto the decided limit.
    pub async fn tick(&mut self) {
        let discovery_ok = match self.index.refresh().await {
            Ok(()) => {
                self.health.set_healthy(components::DISCOVERY).await;
                true
            }
            Err(e) => {
                self.metrics.inc_discovery_errors();
                self.logger.log_discovery_failure(&e.to_string());
                self.health
                    .set_degraded(components::DISCOVERY, e.to_string())
                    .await;
                false
            }
        };

        let high_pods = self.pod_count(PriorityClass::High);
        let low_pods = self.pod_count(PriorityClass::Low);
        self.metrics
            .set_managed_pods(high_pods as i64, low_pods as i64);

        let low_records: Vec<ContainerRecord> =
            self.index.records(PriorityClass::Low).cloned().collect();

        // Resolve every Low container up front; skips are counted but do
        // not fail the tick.
        let mut targets = Vec::new();
        let mut skipped = 0usize;
        let mut errors = 0usize;
        let mut resolver_failed = false;

        for record in &low_records {
            match self.resolver.resolve(record).await {
                Ok(target) => targets.push((record.clone(), target)),
                Err(ResolveError::NotFound(_)) => {
                    self.metrics.inc_resolve_skips();
                    skipped += 1;
                }
                Err(e) => {
                    self.record_error(e.to_string());
                    resolver_failed = true;
                    errors += 1;
                }
            }
        }

        let live: HashSet<String> = low_records
            .iter()
            .map(|r| r.container_id.clone())
            .collect();
        self.resolver.retain(&live);

        if resolver_failed {
            self.health
                .set_degraded(components::RESOLVER, "resolution failures this tick")
                .await;
        } else {
            self.health.set_healthy(components::RESOLVER).await;
        }

        let samples = self.sample_io(&targets).await;
        // The poll interval is the sampling period; wall-clock drift
        // within a tick is noise at these rates.
        let previous = self.estimator.signal();
        let signal = self
            .estimator
            .observe(&samples, self.config.poll_interval, high_pods);
        if signal != previous {
            self.logger.log_contention_transition(
                previous.as_str(),
                signal.as_str(),
                self.estimator.smoothed_bps(),
            );
        }
        self.metrics.set_contention_state(signal_gauge(signal));
        self.metrics
            .set_low_class_bps(self.estimator.smoothed_bps() as i64);

        let limit = self.decide_limit(signal);
        let applied = self.converge(&targets, limit, &mut errors).await;
        self.clear_departed(&live).await;

        if errors == 0 {
            self.health.set_healthy(components::LIMITER).await;
        } else {
            self.health
                .set_degraded(components::LIMITER, "limit failures this tick")
                .await;
        }

        if discovery_ok {
            self.last_update = Some(chrono::Utc::now().timestamp());
        }

        self.push_decision(TickDecision {
            timestamp: chrono::Utc::now().timestamp(),
            signal,
            resolved: targets.len(),
            skipped,
            applied,
            errors,
        });

        debug!(
            signal = signal.as_str(),
            resolved = targets.len(),
            skipped = skipped,
            applied = applied,
            errors = errors,
            "Tick complete"
        );

        self.publish(high_pods, low_pods, signal, limit);
    }

    /// Remove every managed limit, e.g. on shutdown. Returns how many
    /// cgroups were actually cleared.
    pub async fn clear_all_limits(&mut self) -> usize {
        let records: Vec<ContainerRecord> = self
            .index
            .records(PriorityClass::Low)
            .cloned()
            .collect();

        let mut cleared = 0usize;
        for record in &records {
            let Ok(target) = self.resolver.resolve(record).await else {
                continue;
            };
            match self.limiter.clear(&target).await {
                Ok(ApplyOutcome::Applied) => {
                    cleared += 1;
                    self.metrics.inc_limits_cleared();
                    self.logger.log_limit_cleared(
                        &record.container_id,
                        &record.pod_name,
                        &target.device.to_string(),
                    );
                }
                Ok(ApplyOutcome::Unchanged) => {}
                Err(LimitError::CgroupGone(_)) => {}
                Err(e) => warn!(
                    container_id = %record.container_id,
                    error = %e,
                    "Failed to clear limit on shutdown"
                ),
            }
        }
        self.limited.clear();
        cleared
    }

    /// The limit the Low class should run at under the given signal.
    fn decide_limit(&self, signal: ContentionSignal) -> BandwidthLimit {
        let base = match signal {
            ContentionSignal::Active => self.config.floor,
            ContentionSignal::None | ContentionSignal::Building => self.config.ceiling,
        };
        base.clamp_to(self.config.floor, self.config.ceiling)
    }

    /// Write the decided limit into every resolved Low cgroup.
    async fn converge(
        &mut self,
        targets: &[(ContainerRecord, crate::models::CgroupTarget)],
        limit: BandwidthLimit,
        errors: &mut usize,
    ) -> usize {
        let mut applied = 0usize;

        for (record, target) in targets {
            match self.limiter.apply(target, limit).await {
                Ok(ApplyOutcome::Applied) => {
                    applied += 1;
                    self.metrics.inc_limits_applied();
                    self.logger.log_limit_applied(
                        &record.container_id,
                        &record.pod_name,
                        &record.namespace,
                        &target.device.to_string(),
                        limit.read_bps,
                        limit.write_bps,
                    );
                }
                Ok(ApplyOutcome::Unchanged) => {}
                Err(LimitError::CgroupGone(_)) => {
                    // Raced with container teardown; discovery catches up
                    // next tick.
                    self.metrics.inc_resolve_skips();
                    continue;
                }
                Err(e) => {
                    *errors += 1;
                    self.metrics.inc_limit_errors();
                    self.record_error(e.to_string());
                    continue;
                }
            }

            self.limited.insert(
                record.container_id.clone(),
                AppliedLimit {
                    container_id: record.container_id.clone(),
                    pod_name: record.pod_name.clone(),
                    namespace: record.namespace.clone(),
                    cgroup_path: target.cgroup_path.display().to_string(),
                    device: target.device.to_string(),
                    read_bps: limit.read_bps,
                    write_bps: limit.write_bps,
                },
            );
        }

        applied
    }

    /// Drop limit records for containers that left the Low class. Their
    /// cgroups usually die with the container; when one survives (a pod
    /// relabel) the limit is removed explicitly.
    async fn clear_departed(&mut self, live: &HashSet<String>) {
        let departed: Vec<AppliedLimit> = self
            .limited
            .iter()
            .filter(|(id, _)| !live.contains(*id))
            .map(|(_, limit)| limit.clone())
            .collect();

        for entry in departed {
            self.limited.remove(&entry.container_id);

            let target = crate::models::CgroupTarget {
                cgroup_path: entry.cgroup_path.clone().into(),
                device: match entry.device.parse() {
                    Ok(device) => device,
                    Err(_) => continue,
                },
                container_id: entry.container_id.clone(),
            };

            match self.limiter.clear(&target).await {
                Ok(ApplyOutcome::Applied) => {
                    self.metrics.inc_limits_cleared();
                    self.logger.log_limit_cleared(
                        &entry.container_id,
                        &entry.pod_name,
                        &entry.device,
                    );
                }
                Ok(ApplyOutcome::Unchanged) | Err(LimitError::CgroupGone(_)) => {}
                Err(e) => {
                    self.metrics.inc_limit_errors();
                    self.record_error(e.to_string());
                }
            }
        }
    }

    async fn sample_io(
        &self,
        targets: &[(ContainerRecord, crate::models::CgroupTarget)],
    ) -> Vec<IoSample> {
        let mut samples = Vec::with_capacity(targets.len());

        for (record, target) in targets {
            let path = target.cgroup_path.join(IO_STAT_FILE);
            let Ok(content) = tokio::fs::read_to_string(&path).await else {
                continue;
            };
            // No entry yet means the cgroup has done no I/O on the device.
            let (rbytes, wbytes) = parse_io_stat(&content, target.device).unwrap_or((0, 0));
            samples.push(IoSample {
                container_id: record.container_id.clone(),
                rbytes,
                wbytes,
            });
        }

        samples
    }

    fn pod_count(&self, class: PriorityClass) -> usize {
        self.index
            .records(class)
            .map(|r| r.pod_uid.as_str())
            .collect::<HashSet<_>>()
            .len()
    }

    fn record_error(&mut self, message: String) {
        self.error_count += 1;
        self.last_error = Some(message);
    }

    fn push_decision(&mut self, decision: TickDecision) {
        self.decisions.push_back(decision);
        while self.decisions.len() > DECISION_HISTORY {
            self.decisions.pop_front();
        }
    }

    fn publish(
        &self,
        high_pods: usize,
        low_pods: usize,
        signal: ContentionSignal,
        limit: BandwidthLimit,
    ) {
        let mut throttled: Vec<AppliedLimit> = self.limited.values().cloned().collect();
        throttled.sort_by(|a, b| a.container_id.cmp(&b.container_id));
        self.metrics.set_throttled_cgroups(throttled.len() as i64);

        self.state.publish(ControllerSnapshot {
            node_name: self.config.node_name.clone(),
            high_priority_pods: high_pods,
            low_priority_pods: low_pods,
            contention: signal,
            low_class_limit: if low_pods > 0 { Some(limit) } else { None },
            smoothed_low_bps: self.estimator.smoothed_bps(),
            throttled,
            error_count: self.error_count,
            last_error: self.last_error.clone(),
            last_update: self.last_update,
            decisions: self.decisions.iter().cloned().collect(),
        });
    }
}

fn signal_gauge(signal: ContentionSignal) -> i64 {
    match signal {
        ContentionSignal::None => 0,
        ContentionSignal::Building => 1,
        ContentionSignal::Active => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cgroup::IO_MAX_FILE;
    use crate::models::{DeviceId, PodSummary};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DEVICE: DeviceId = DeviceId {
        major: 259,
        minor: 4,
    };

    /// Lister returning a fixed pod set, swappable between ticks.
    struct FixedLister {
        pods: Mutex<anyhow::Result<Vec<PodSummary>>>,
    }

    impl FixedLister {
        fn new(pods: Vec<PodSummary>) -> Arc<Self> {
            Arc::new(Self {
                pods: Mutex::new(Ok(pods)),
            })
        }

        fn set(&self, pods: anyhow::Result<Vec<PodSummary>>) {
            *self.pods.lock().unwrap() = pods;
        }
    }

    #[async_trait]
    impl PodLister for FixedLister {
        async fn list_node_pods(&self, _node_name: &str) -> anyhow::Result<Vec<PodSummary>> {
            match &*self.pods.lock().unwrap() {
                Ok(pods) => Ok(pods.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn pod(name: &str, class: &str, ids: &[&str]) -> PodSummary {
        let mut labels = BTreeMap::new();
        labels.insert("drcio.io/priority".to_string(), class.to_string());
        PodSummary {
            name: name.to_string(),
            namespace: "default".to_string(),
            uid: format!("uid-{}", name),
            labels,
            phase: "Running".to_string(),
            container_ids: ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn hex_id(seed: u8) -> String {
        format!("{:02x}", seed).repeat(32)
    }

    /// Create a container scope with io.max and io.stat files.
    fn make_cgroup(root: &Path, container_id: &str) -> std::path::PathBuf {
        let scope = root
            .join("kubepods.slice")
            .join(format!("cri-containerd-{}.scope", container_id));
        std::fs::create_dir_all(&scope).unwrap();
        std::fs::write(scope.join(IO_MAX_FILE), "").unwrap();
        std::fs::write(scope.join(IO_STAT_FILE), "").unwrap();
        scope
    }

    fn set_io_stat(scope: &Path, rbytes: u64, wbytes: u64) {
        std::fs::write(
            scope.join(IO_STAT_FILE),
            format!(
                "{} rbytes={} wbytes={} rios=0 wios=0 dbytes=0 dios=0\n",
                DEVICE, rbytes, wbytes
            ),
        )
        .unwrap();
    }

    fn read_io_max(scope: &Path) -> String {
        std::fs::read_to_string(scope.join(IO_MAX_FILE)).unwrap()
    }

    struct Harness {
        controller: Controller,
        state: StateHandle,
        _root: TempDir,
        _empty: TempDir,
    }

    fn harness(lister: Arc<dyn PodLister>, root: TempDir, config: ControllerConfig) -> Harness {
        let empty = TempDir::new().unwrap();
        let resolver = CgroupResolver::new(root.path(), "/mnt/data", Duration::from_secs(300))
            .with_paths(
                empty.path(),
                empty.path().join("mountinfo"),
                empty.path().join("partitions"),
            )
            .with_device(DEVICE);

        let state = StateHandle::default();
        let controller = Controller::new(
            config,
            lister,
            resolver,
            state.clone(),
            HealthRegistry::new(),
        );
        Harness {
            controller,
            state,
            _root: root,
            _empty: empty,
        }
    }

    fn test_config() -> ControllerConfig {
        ControllerConfig {
            node_name: "node-1".to_string(),
            poll_interval: Duration::from_secs(5),
            floor: BandwidthLimit::new(100, 50),
            ceiling: BandwidthLimit::new(1000, 500),
            contention: ContentionConfig {
                saturation_bps: 1000,
                trigger_ticks: 2,
                cooldown_ticks: 2,
                ema_alpha: 1.0,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_tick_applies_ceiling_to_low_pods() {
        let root = TempDir::new().unwrap();
        let id = hex_id(0xaa);
        let scope = make_cgroup(root.path(), &id);

        let lister = FixedLister::new(vec![
            pod("fraud-svc", "hp", &[&hex_id(0xff)]),
            pod("batch-job", "lp", &[&id]),
        ]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;

        assert_eq!(read_io_max(&scope), "259:4 rbps=1000 wbps=500\n");
        let snapshot = h.state.load();
        assert_eq!(snapshot.high_priority_pods, 1);
        assert_eq!(snapshot.low_priority_pods, 1);
        assert_eq!(snapshot.contention, ContentionSignal::None);
        assert_eq!(snapshot.low_class_limit, Some(BandwidthLimit::new(1000, 500)));
        assert_eq!(snapshot.throttled.len(), 1);
    }

    #[tokio::test]
    async fn test_high_priority_cgroups_never_written() {
        let root = TempDir::new().unwrap();
        let high_id = hex_id(0xff);
        let low_id = hex_id(0xaa);
        let high_scope = make_cgroup(root.path(), &high_id);
        make_cgroup(root.path(), &low_id);

        let lister = FixedLister::new(vec![
            pod("fraud-svc", "hp", &[&high_id]),
            pod("batch-job", "lp", &[&low_id]),
        ]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;

        // The High container's cgroup exists but must stay untouched.
        assert_eq!(read_io_max(&high_scope), "");
    }

    #[tokio::test]
    async fn test_random_discovery_sets_never_touch_high_cgroups() {
        let root = TempDir::new().unwrap();
        let lister = FixedLister::new(vec![]);
        let mut h = harness(lister.clone(), root, test_config());

        // Deterministic xorshift so a failure is reproducible.
        let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        let mut seed = 0u8;
        let mut high_scopes = Vec::new();

        for round in 0..8 {
            let mut pods = Vec::new();
            for p in 0..(next() % 4 + 1) {
                seed = seed.wrapping_add(1);
                let id = hex_id(seed);
                let scope = make_cgroup(h._root.path(), &id);
                let class = if next() % 2 == 0 { "hp" } else { "lp" };
                if class == "hp" {
                    high_scopes.push(scope);
                }
                pods.push(pod(&format!("pod-{}-{}", round, p), class, &[&id]));
            }
            lister.set(Ok(pods));
            h.controller.tick().await;

            for scope in &high_scopes {
                assert_eq!(read_io_max(scope), "", "High cgroup was written");
            }
        }
    }

    #[tokio::test]
    async fn test_zero_low_pods_is_a_noop() {
        let root = TempDir::new().unwrap();
        let high_id = hex_id(0xff);
        let high_scope = make_cgroup(root.path(), &high_id);

        let lister = FixedLister::new(vec![pod("fraud-svc", "hp", &[&high_id])]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;

        assert_eq!(read_io_max(&high_scope), "");
        let snapshot = h.state.load();
        assert_eq!(snapshot.low_priority_pods, 0);
        assert_eq!(snapshot.low_class_limit, None);
        assert!(snapshot.throttled.is_empty());
        assert_eq!(snapshot.decisions[0].applied, 0);
    }

    #[tokio::test]
    async fn test_sustained_load_drops_to_floor() {
        let root = TempDir::new().unwrap();
        let id = hex_id(0xaa);
        let scope = make_cgroup(root.path(), &id);

        let lister = FixedLister::new(vec![
            pod("fraud-svc", "hp", &[&hex_id(0xff)]),
            pod("batch-job", "lp", &[&id]),
        ]);
        let mut h = harness(lister, root, test_config());

        // Baseline tick establishes the counter.
        h.controller.tick().await;

        // 50_000 bytes per 5s tick = 10_000 B/s, far above 1000 B/s.
        set_io_stat(&scope, 50_000, 0);
        h.controller.tick().await;
        assert_eq!(h.state.load().contention, ContentionSignal::Building);
        assert_eq!(read_io_max(&scope), "259:4 rbps=1000 wbps=500\n");

        set_io_stat(&scope, 100_000, 0);
        h.controller.tick().await;
        assert_eq!(h.state.load().contention, ContentionSignal::Active);
        assert_eq!(read_io_max(&scope), "259:4 rbps=100 wbps=50\n");
    }

    #[tokio::test]
    async fn test_cooldown_restores_ceiling() {
        let root = TempDir::new().unwrap();
        let id = hex_id(0xaa);
        let scope = make_cgroup(root.path(), &id);

        let lister = FixedLister::new(vec![
            pod("fraud-svc", "hp", &[&hex_id(0xff)]),
            pod("batch-job", "lp", &[&id]),
        ]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;
        set_io_stat(&scope, 50_000, 0);
        h.controller.tick().await;
        set_io_stat(&scope, 100_000, 0);
        h.controller.tick().await;
        assert_eq!(h.state.load().contention, ContentionSignal::Active);

        // Two quiet ticks release the throttle.
        h.controller.tick().await;
        assert_eq!(h.state.load().contention, ContentionSignal::Active);
        h.controller.tick().await;
        assert_eq!(h.state.load().contention, ContentionSignal::None);
        assert_eq!(read_io_max(&scope), "259:4 rbps=1000 wbps=500\n");
    }

    #[tokio::test]
    async fn test_no_high_pods_means_no_throttle() {
        let root = TempDir::new().unwrap();
        let id = hex_id(0xaa);
        let scope = make_cgroup(root.path(), &id);

        let lister = FixedLister::new(vec![pod("batch-job", "lp", &[&id])]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;
        set_io_stat(&scope, 50_000, 0);
        h.controller.tick().await;
        set_io_stat(&scope, 100_000, 0);
        h.controller.tick().await;

        // Heavy Low-class traffic but nobody to protect.
        assert_eq!(h.state.load().contention, ContentionSignal::None);
        assert_eq!(read_io_max(&scope), "259:4 rbps=1000 wbps=500\n");
    }

    #[tokio::test]
    async fn test_unresolvable_container_is_skipped() {
        let root = TempDir::new().unwrap();
        let resolved = hex_id(0xaa);
        make_cgroup(root.path(), &resolved);
        // Second container has no cgroup on disk.
        let missing = hex_id(0xbb);

        let lister = FixedLister::new(vec![pod("batch-job", "lp", &[&resolved, &missing])]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;

        let snapshot = h.state.load();
        assert_eq!(snapshot.decisions.len(), 1);
        assert_eq!(snapshot.decisions[0].resolved, 1);
        assert_eq!(snapshot.decisions[0].skipped, 1);
        assert_eq!(snapshot.decisions[0].errors, 0);
        assert_eq!(snapshot.error_count, 0);
    }

    #[tokio::test]
    async fn test_discovery_failure_keeps_limits_in_force() {
        let root = TempDir::new().unwrap();
        let id = hex_id(0xaa);
        let scope = make_cgroup(root.path(), &id);

        let lister = FixedLister::new(vec![
            pod("fraud-svc", "hp", &[&hex_id(0xff)]),
            pod("batch-job", "lp", &[&id]),
        ]);
        let mut h = harness(lister.clone(), root, test_config());

        h.controller.tick().await;
        assert_eq!(h.state.load().low_priority_pods, 1);

        lister.set(Err(anyhow::anyhow!("API timeout")));
        let before = h.state.load().last_update;
        h.controller.tick().await;

        // The stale snapshot still drives the loop and staleness shows in
        // last_update.
        let snapshot = h.state.load();
        assert_eq!(snapshot.low_priority_pods, 1);
        assert_eq!(snapshot.last_update, before);
        assert_eq!(read_io_max(&scope), "259:4 rbps=1000 wbps=500\n");
    }

    #[tokio::test]
    async fn test_departed_container_limit_cleared() {
        let root = TempDir::new().unwrap();
        let id = hex_id(0xaa);
        let scope = make_cgroup(root.path(), &id);

        let lister = FixedLister::new(vec![pod("batch-job", "lp", &[&id])]);
        let mut h = harness(lister.clone(), root, test_config());

        h.controller.tick().await;
        assert_eq!(read_io_max(&scope), "259:4 rbps=1000 wbps=500\n");

        // The pod is relabeled out of the Low class; its cgroup survives.
        lister.set(Ok(vec![pod("batch-job", "other", &[&id])]));
        h.controller.tick().await;

        assert_eq!(read_io_max(&scope), "259:4 rbps=max wbps=max\n");
        assert!(h.state.load().throttled.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_limits_on_shutdown() {
        let root = TempDir::new().unwrap();
        let a = hex_id(0xaa);
        let b = hex_id(0xbb);
        let scope_a = make_cgroup(root.path(), &a);
        let scope_b = make_cgroup(root.path(), &b);

        let lister = FixedLister::new(vec![pod("batch-job", "lp", &[&a, &b])]);
        let mut h = harness(lister, root, test_config());

        h.controller.tick().await;
        let cleared = h.controller.clear_all_limits().await;

        assert_eq!(cleared, 2);
        assert_eq!(read_io_max(&scope_a), "259:4 rbps=max wbps=max\n");
        assert_eq!(read_io_max(&scope_b), "259:4 rbps=max wbps=max\n");
    }

    #[tokio::test]
    async fn test_decision_history_is_bounded() {
        let root = TempDir::new().unwrap();
        let lister = FixedLister::new(vec![]);
        let mut h = harness(lister, root, test_config());

        for _ in 0..(DECISION_HISTORY + 5) {
            h.controller.tick().await;
        }

        assert_eq!(h.state.load().decisions.len(), DECISION_HISTORY);
    }
}
