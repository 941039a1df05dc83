use std::time::Duration;

/// Fixed dimensions and pacing for one sequencer run.
///
/// Everything here is decided at startup; the engine never resizes the grid
/// mid-session. Tempo is the one timing input that stays live-editable, via
/// the settings state rather than this struct.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Steps per part.
    pub n_steps: u8,
    /// Parts per pattern.
    pub n_parts: u8,
    /// Quantization subdivisions per step; note lengths count these.
    pub n_quants: u8,
    /// MIDI channels addressable per port.
    pub n_channels: u8,
    /// Octave span of the note table.
    pub octaves: u8,
    /// Keypad size; note/motion tables insert a paging marker every
    /// `n_keys - 1` entries.
    pub n_keys: u8,
    /// Resolution of the motion (CC sweep) table.
    pub n_motions: u8,
    /// Buttons per navigation row in the front-end.
    pub n_buttons: u8,
    /// Connection slots in a mapping document.
    pub max_conns: usize,
    /// Instrument tags per connection slot.
    pub max_instr: usize,

    /// Tempo values are `tempo_step * i` for `i in tempo_min..=tempo_max`.
    pub tempo_min: u32,
    pub tempo_max: u32,
    pub tempo_step: u32,
    pub init_tempo: u32,

    pub velocity_min: u8,
    pub velocity_max: u8,
    pub velocity_step: u8,

    /// Preset name slots offered by the front-end.
    pub music_count: u8,
    pub map_count: u8,

    /// Engine loop pause between iterations.
    pub sleep: Duration,
    /// Start-up latency cushion added to the first clock anchor. Zero in
    /// production; tests raise it so the first tick is safely in the future.
    pub init_time: Duration,
    /// Slows the loop and dumps the pattern store to JSON on every write.
    pub debug: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            n_steps: 16,
            n_parts: 16,
            n_quants: 4,
            n_channels: 16,
            octaves: 5,
            n_keys: 8,
            n_motions: 21,
            n_buttons: 8,
            max_conns: 8,
            max_instr: 3,
            tempo_min: 5,
            tempo_max: 20,
            tempo_step: 10,
            init_tempo: 120,
            velocity_min: 0,
            velocity_max: 127,
            velocity_step: 1,
            music_count: 10,
            map_count: 10,
            sleep: Duration::from_micros(100),
            init_time: Duration::ZERO,
            debug: false,
        }
    }
}

impl RunConfig {
    /// Variant used by the test suites: slow loop, one-second cushion.
    pub fn debug() -> Self {
        RunConfig {
            sleep: Duration::from_millis(10),
            init_time: Duration::from_secs(1),
            debug: true,
            ..RunConfig::default()
        }
    }

    /// The selectable tempo list, in BPM.
    pub fn tempo_values(&self) -> Vec<u32> {
        (self.tempo_min..=self.tempo_max)
            .map(|i| i * self.tempo_step)
            .collect()
    }

    /// The selectable velocity list.
    pub fn velocity_values(&self) -> Vec<u8> {
        (self.velocity_min..=self.velocity_max)
            .step_by(self.velocity_step.max(1) as usize)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tempo_values_cover_range() {
        let cfg = RunConfig::default();
        let tempos = cfg.tempo_values();
        assert_eq!(tempos.first(), Some(&50));
        assert_eq!(tempos.last(), Some(&200));
        assert!(tempos.contains(&cfg.init_tempo));
    }

    #[test]
    fn velocity_values_dense() {
        let cfg = RunConfig::default();
        let vels = cfg.velocity_values();
        assert_eq!(vels.len(), 128);
        assert_eq!(vels[100], 100);
    }
}
