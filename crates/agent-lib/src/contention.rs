//! Contention estimation with hysteresis
//!
//! Turns cumulative per-container I/O counters into a smoothed aggregate
//! rate for the Low class, and holds a three-state contention signal that
//! requires sustained evidence before engaging or releasing throttling.

use crate::models::ContentionSignal;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ContentionConfig {
    /// Aggregate Low-class throughput above which the device is considered
    /// contended.
    pub saturation_bps: u64,
    /// Consecutive elevated ticks required before Active engages.
    pub trigger_ticks: u32,
    /// Consecutive quiet ticks required before Active releases.
    pub cooldown_ticks: u32,
    /// EMA smoothing factor in (0, 1]; 1 disables smoothing.
    pub ema_alpha: f64,
}

impl Default for ContentionConfig {
    fn default() -> Self {
        Self {
            saturation_bps: 100 * 1024 * 1024,
            trigger_ticks: 3,
            cooldown_ticks: 3,
            ema_alpha: 0.5,
        }
    }
}

/// Cumulative I/O counters for one container, as read from `io.stat`.
#[derive(Debug, Clone)]
pub struct IoSample {
    pub container_id: String,
    pub rbytes: u64,
    pub wbytes: u64,
}

impl IoSample {
    fn total(&self) -> u64 {
        self.rbytes.saturating_add(self.wbytes)
    }
}

/// Tracks Low-class throughput across ticks and drives the contention
/// state machine.
pub struct ContentionEstimator {
    config: ContentionConfig,
    last_totals: HashMap<String, u64>,
    smoothed_bps: f64,
    signal: ContentionSignal,
    elevated_streak: u32,
    quiet_streak: u32,
}

impl ContentionEstimator {
    pub fn new(config: ContentionConfig) -> Self {
        Self {
            config,
            last_totals: HashMap::new(),
            smoothed_bps: 0.0,
            signal: ContentionSignal::None,
            elevated_streak: 0,
            quiet_streak: 0,
        }
    }

    /// Feed one tick's samples and return the updated signal.
    ///
    /// `high_count` is the number of High-priority pods on the node; with
    /// none present there is nobody to protect and the signal is forced to
    /// None regardless of Low-class activity.
    pub fn observe(
        &mut self,
        samples: &[IoSample],
        elapsed: Duration,
        high_count: usize,
    ) -> ContentionSignal {
        let raw_bps = self.aggregate_rate(samples, elapsed);

        let alpha = self.config.ema_alpha.clamp(0.0, 1.0);
        self.smoothed_bps = alpha * raw_bps + (1.0 - alpha) * self.smoothed_bps;

        if high_count == 0 {
            self.elevated_streak = 0;
            self.quiet_streak = 0;
            self.signal = ContentionSignal::None;
            return self.signal;
        }

        let elevated = self.smoothed_bps >= self.config.saturation_bps as f64;

        match self.signal {
            ContentionSignal::None => {
                if elevated {
                    self.elevated_streak = 1;
                    self.signal = if self.elevated_streak >= self.config.trigger_ticks {
                        ContentionSignal::Active
                    } else {
                        ContentionSignal::Building
                    };
                }
            }
            ContentionSignal::Building => {
                if elevated {
                    self.elevated_streak += 1;
                    if self.elevated_streak >= self.config.trigger_ticks {
                        self.signal = ContentionSignal::Active;
                    }
                } else {
                    // One quiet tick aborts the build-up entirely.
                    self.elevated_streak = 0;
                    self.signal = ContentionSignal::None;
                }
            }
            ContentionSignal::Active => {
                if elevated {
                    self.quiet_streak = 0;
                } else {
                    self.quiet_streak += 1;
                    if self.quiet_streak >= self.config.cooldown_ticks {
                        self.quiet_streak = 0;
                        self.elevated_streak = 0;
                        self.signal = ContentionSignal::None;
                    }
                }
            }
        }

        self.signal
    }

    pub fn signal(&self) -> ContentionSignal {
        self.signal
    }

    /// Smoothed aggregate Low-class throughput in bytes per second.
    pub fn smoothed_bps(&self) -> u64 {
        self.smoothed_bps as u64
    }

    /// Sum the per-container counter deltas and divide by elapsed time.
    ///
    /// A counter that went backwards means the container restarted; its
    /// current total is the delta since restart. Containers seen for the
    /// first time contribute nothing until the next tick.
    fn aggregate_rate(&mut self, samples: &[IoSample], elapsed: Duration) -> f64 {
        let mut delta_sum = 0u64;
        let mut totals = HashMap::with_capacity(samples.len());

        for sample in samples {
            let total = sample.total();
            match self.last_totals.get(&sample.container_id) {
                Some(&prev) if total >= prev => delta_sum += total - prev,
                Some(_) => delta_sum += total,
                None => {}
            }
            totals.insert(sample.container_id.clone(), total);
        }

        // Vanished containers drop their baselines with the wholesale swap.
        self.last_totals = totals;

        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        delta_sum as f64 / secs
    }
}
