//! Tempo-derived tick arithmetic. All intervals and anchors are integer
//! nanoseconds on the engine's monotonic timeline; floats appear only in
//! progress output.

use std::time::Duration;

use crate::config::RunConfig;

pub const SECOND: u64 = 1_000_000_000;
const NANOS_PER_MIN: u64 = 60 * SECOND;

#[derive(Debug, Clone)]
pub struct TempoClock {
    n_quants: u8,
    n_steps: u8,
    /// Latency cushion folded into the first sync capture only.
    init_time: u64,
    pub quant_interval: u64,
    pub step_interval: u64,
    pub part_interval: u64,
    /// Monotonic origin anchoring all scheduled tick offsets; 0 while idle.
    pub clock_sync: u64,
}

impl TempoClock {
    pub fn new(cfg: &RunConfig) -> Self {
        let mut clock = TempoClock {
            n_quants: cfg.n_quants,
            n_steps: cfg.n_steps,
            init_time: cfg.init_time.as_nanos() as u64,
            quant_interval: 0,
            step_interval: 0,
            part_interval: 0,
            clock_sync: 0,
        };
        clock.reset_intervals(cfg.init_tempo);
        clock
    }

    /// Recomputes the three interval scalars from the current BPM. Called at
    /// the top of every engine iteration, so tempo edits shift only ticks
    /// that have not been scheduled yet.
    pub fn reset_intervals(&mut self, bpm: u32) {
        self.quant_interval = NANOS_PER_MIN / (bpm.max(1) as u64 * self.n_quants as u64);
        self.step_interval = self.quant_interval * self.n_quants as u64;
        self.part_interval = self.step_interval * self.n_steps as u64;
    }

    /// Captures the playback origin once: the next whole second after
    /// `now + init_time`, never before one second so 0 stays the idle
    /// marker. No-op while already synced.
    pub fn sync(&mut self, now: u64) {
        if self.clock_sync == 0 {
            self.clock_sync = (now + self.init_time).div_ceil(SECOND).max(1) * SECOND;
        }
    }

    pub fn is_synced(&self) -> bool {
        self.clock_sync > 0
    }

    pub fn clear(&mut self) {
        self.clock_sync = 0;
    }

    /// Re-anchors after a full pattern pass; the next expansion lands one
    /// span later on the same grid, without the start-up cushion.
    pub fn advance(&mut self, span: u64) {
        self.clock_sync += span;
    }

    pub fn quant_secs(&self) -> f64 {
        self.quant_interval as f64 / SECOND as f64
    }
}

pub fn duration_to_nanos(d: Duration) -> u64 {
    d.as_nanos() as u64
}
