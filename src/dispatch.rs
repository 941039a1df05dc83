//! Per-output-port scheduler. Expands the parts the engine reports as
//! playing into a tick-keyed schedule of out-mode instances, then emits the
//! due rows as channel messages. Multi-phase events re-enqueue themselves:
//! a row whose message carries a Length field plants the mode's next row
//! that many quants later. A live-echo queue lets recorded or translated
//! input sound immediately while its note-off still joins the schedule.

use std::collections::BTreeMap;

use crate::clock::TempoClock;
use crate::config::RunConfig;
use crate::driver::MidiSink;
use crate::error::Result;
use crate::mode::{Catalog, OutMode};
use crate::pattern::PatternStore;

pub struct OutputDispatcher {
    midi_id: i32,
    sink: Box<dyn MidiSink>,
    /// Modes whose instrument tag appears on a mapping slot for this port;
    /// anything else is dropped silently at emission.
    allowed_out_modes: Vec<String>,
    /// step_tick → channel → pending instances, ascending tick order.
    scheduled_steps: BTreeMap<u64, BTreeMap<u8, Vec<OutMode>>>,
    /// Immediate-play queue for live input echo.
    unscheduled_step: Vec<(u8, OutMode)>,
    /// End of the furthest expanded part, as a tick offset.
    max_part_tick: u64,
}

impl OutputDispatcher {
    pub fn new(midi_id: i32, sink: Box<dyn MidiSink>, allowed_out_modes: Vec<String>) -> Self {
        OutputDispatcher {
            midi_id,
            sink,
            allowed_out_modes,
            scheduled_steps: BTreeMap::new(),
            unscheduled_step: Vec::new(),
            max_part_tick: 0,
        }
    }

    pub fn midi_id(&self) -> i32 {
        self.midi_id
    }

    pub fn set_allowed_out_modes(&mut self, allowed: Vec<String>) {
        self.allowed_out_modes = allowed;
    }

    pub fn is_drained(&self) -> bool {
        self.scheduled_steps.is_empty()
    }

    /// True when anything is still waiting to sound.
    pub fn has_pending(&self) -> bool {
        !self.scheduled_steps.is_empty() || !self.unscheduled_step.is_empty()
    }

    pub fn min_step_tick(&self) -> Option<u64> {
        self.scheduled_steps.keys().next().copied()
    }

    pub fn max_part_tick(&self) -> u64 {
        self.max_part_tick
    }

    pub fn reset_max_part_tick(&mut self) {
        self.max_part_tick = 0;
    }

    pub fn push_live(&mut self, channel: u8, mode: OutMode) {
        self.unscheduled_step.push((channel, mode));
    }

    /// Expands the playing `(midi, channel, part)` triples into step rows.
    /// Runs only when this dispatcher is drained and the wall clock has
    /// passed the end of the previous expansion, so re-expansion cannot
    /// double-book a pattern pass.
    pub fn schedule_parts(
        &mut self,
        now: u64,
        clock: &TempoClock,
        triples: &[(i32, u8, u8)],
        store: &PatternStore,
        catalog: &Catalog,
        cfg: &RunConfig,
    ) {
        if !self.is_drained() || now < clock.clock_sync + self.max_part_tick {
            return;
        }
        for (midi, channel, part) in triples {
            if *midi != self.midi_id {
                continue;
            }
            let part_tick = (*part as u64 - 1) * clock.part_interval;
            for step in 1..=cfg.n_steps {
                let step_tick = part_tick + (step as u64 - 1) * clock.step_interval;
                for (mode_id, indexes) in store.modes_at(*midi, *channel, *part, step) {
                    let Some(template) = catalog
                        .mode_name(mode_id)
                        .and_then(|name| catalog.out(name))
                    else {
                        continue;
                    };
                    let instance = template.instantiate_with(indexes);
                    if instance.button_is_na(0) {
                        continue;
                    }
                    self.scheduled_steps
                        .entry(step_tick)
                        .or_default()
                        .entry(*channel)
                        .or_default()
                        .push(instance);
                }
            }
            self.max_part_tick = self.max_part_tick.max(clock.part_interval * *part as u64);
        }
    }

    /// Drains the live-echo queue: each mode's next row sounds immediately,
    /// and its follow-up row (if any) joins the schedule at the Length
    /// offset from now.
    pub fn play_now_and_schedule(&mut self, now: u64, clock: &TempoClock) -> Result<()> {
        let pending = std::mem::take(&mut self.unscheduled_step);
        let base_tick = now.saturating_sub(clock.clock_sync);
        for (channel, mut mode) in pending {
            if !self.allowed_out_modes.iter().any(|m| m == mode.name()) {
                log::debug!("midi {}: dropping unmapped mode {}", self.midi_id, mode.name());
                continue;
            }
            let message = mode.get_as_message();
            self.transmit(&message, channel)?;
            if message.len() > 3 && mode.has_next() {
                let next_tick = base_tick + message[3].max(0) as u64 * clock.quant_interval;
                self.scheduled_steps
                    .entry(next_tick)
                    .or_default()
                    .entry(channel)
                    .or_default()
                    .push(mode);
            }
        }
        Ok(())
    }

    /// Emits the single smallest due tick, if any. One tick per call bounds
    /// the work per engine iteration and keeps emission time-ordered.
    pub fn emit_due(&mut self, now: u64, clock: &TempoClock) -> Result<()> {
        let Some(tick) = self.min_step_tick() else {
            return Ok(());
        };
        if now < tick + clock.clock_sync {
            return Ok(());
        }
        let channels = self.scheduled_steps.remove(&tick).unwrap_or_default();
        let mut follow_ups: Vec<(u64, u8, OutMode)> = Vec::new();
        for (channel, modes) in channels {
            for mut mode in modes {
                if !self.allowed_out_modes.iter().any(|m| m == mode.name()) {
                    log::debug!("midi {}: dropping unmapped mode {}", self.midi_id, mode.name());
                    continue;
                }
                let message = mode.get_as_message();
                self.transmit(&message, channel)?;
                if message.len() > 3 && mode.has_next() {
                    let next_tick = tick + message[3].max(0) as u64 * clock.quant_interval;
                    follow_ups.push((next_tick, channel, mode));
                }
            }
        }
        for (next_tick, channel, mode) in follow_ups {
            self.scheduled_steps
                .entry(next_tick)
                .or_default()
                .entry(channel)
                .or_default()
                .push(mode);
        }
        Ok(())
    }

    /// Three-byte channel message: status nibble merged with the zero-based
    /// channel, data masked to 7 bits. Rows with short or negative payloads
    /// never reach the wire.
    fn transmit(&mut self, message: &[i64], channel: u8) -> Result<bool> {
        if message.len() < 3 || message.iter().any(|b| *b < 0) {
            return Ok(false);
        }
        let status = (message[0] as u8 & 0xF0) | (channel.wrapping_sub(1) & 0x0F);
        let bytes = [status, (message[1] & 0x7F) as u8, (message[2] & 0x7F) as u8];
        self.sink.send(&bytes)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SECOND;
    use crate::defaults;
    use crate::driver::mock::MockDriver;
    use crate::driver::{MidiDriver, PortDesc};
    use crate::mode::Catalog;

    fn out_port() -> PortDesc {
        PortDesc { port_id: 0, name: "Mock Out".into(), is_out: true }
    }

    fn fixture(tempo: u32) -> (RunConfig, Catalog, TempoClock, MockDriver) {
        let cfg = RunConfig::default();
        let catalog = defaults::catalog(&cfg);
        let mut clock = TempoClock::new(&cfg);
        clock.reset_intervals(tempo);
        let driver = MockDriver::new(vec![out_port()]);
        (cfg, catalog, clock, driver)
    }

    /// A store where midi 0 / channel 1 carries the generic voices and
    /// (0, 1, part 1, step 1) holds an armed C-4.
    fn armed_store(catalog: &Catalog, cfg: &RunConfig) -> PatternStore {
        let mut out_dict = std::collections::BTreeMap::new();
        out_dict.insert(0, [(1u8, vec!["GeVo1Out".to_string(), "GeVo2Out".to_string()])].into());
        let mut store = PatternStore::init_data(catalog, &out_dict, cfg, "Mappings_00");
        let template = catalog.out("GeVo1Out").unwrap();
        let mut armed = template.instantiate();
        armed.reset_offsets(0);
        let note_col = template.col("Note").unwrap();
        let c4 = template.data[note_col].iter().position(|n| n == "C-4").unwrap();
        armed.set_indexes_with_lab_and_off("Note", c4, None).unwrap();
        armed.set_indexes_with_lab_and_val("Velocity", "100", Some(0)).unwrap();
        armed.set_indexes_with_lab_and_val("Length", "4", Some(0)).unwrap();
        let id = catalog.mode_id("GeVo1Out").unwrap();
        assert!(store.put(0, 1, 1, 1, id, armed.get_indexes()));
        store
    }

    fn dispatcher(driver: &mut MockDriver, allowed: &[&str]) -> OutputDispatcher {
        let sink = driver.open_output(&out_port()).unwrap();
        OutputDispatcher::new(0, sink, allowed.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn note_pair_self_propagates_one_second_apart() {
        // 60 BPM, 4 quants: quant 0.25 s, so Length 4 delays the off-row 1 s
        let (cfg, catalog, mut clock, mut driver) = fixture(60);
        let store = armed_store(&catalog, &cfg);
        let mut d = dispatcher(&mut driver, &["GeVo1Out", "GeVo2Out"]);
        clock.sync(2 * SECOND - 1);
        assert_eq!(clock.clock_sync, 2 * SECOND);

        d.schedule_parts(2 * SECOND, &clock, &[(0, 1, 1)], &store, &catalog, &cfg);
        assert_eq!(d.min_step_tick(), Some(0));
        assert_eq!(d.max_part_tick(), clock.part_interval);

        d.emit_due(2 * SECOND - 1, &clock).unwrap();
        assert!(driver.sent_on(0).is_empty());

        d.emit_due(2 * SECOND, &clock).unwrap();
        assert_eq!(driver.sent_on(0), vec![vec![0x90, 60, 100]]);
        // the off-row waits a full second
        d.emit_due(2 * SECOND, &clock).unwrap();
        d.emit_due(3 * SECOND - 1, &clock).unwrap();
        assert_eq!(driver.sent_on(0).len(), 1);

        d.emit_due(3 * SECOND, &clock).unwrap();
        assert_eq!(driver.sent_on(0), vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]);

        d.emit_due(30 * SECOND, &clock).unwrap();
        assert_eq!(driver.sent_on(0).len(), 2);
        assert!(d.is_drained());
    }

    #[test]
    fn disarmed_steps_are_never_scheduled() {
        let (cfg, catalog, mut clock, mut driver) = fixture(120);
        // default prototypes only: every button column still holds NA
        let mut out_dict = std::collections::BTreeMap::new();
        out_dict.insert(0, [(1u8, vec!["GeVo1Out".to_string()])].into());
        let store = PatternStore::init_data(&catalog, &out_dict, &cfg, "Mappings_00");
        let mut d = dispatcher(&mut driver, &["GeVo1Out"]);
        clock.sync(1);
        d.schedule_parts(SECOND, &clock, &[(0, 1, 1)], &store, &catalog, &cfg);
        assert!(d.is_drained());
    }

    #[test]
    fn one_tick_per_call_in_ascending_order() {
        let (cfg, catalog, mut clock, mut driver) = fixture(60);
        let mut store = armed_store(&catalog, &cfg);
        // arm step 3 as well
        let id = catalog.mode_id("GeVo1Out").unwrap();
        let rows = store.get(0, 1, 1, 1, id).unwrap().clone();
        store.put(0, 1, 1, 3, id, rows);
        let mut d = dispatcher(&mut driver, &["GeVo1Out"]);
        clock.sync(SECOND - 1);

        d.schedule_parts(SECOND, &clock, &[(0, 1, 1)], &store, &catalog, &cfg);
        let first = d.min_step_tick().unwrap();
        // far in the future, but each call still processes one tick only
        d.emit_due(60 * SECOND, &clock).unwrap();
        assert_eq!(driver.sent_on(0).len(), 1);
        let second = d.min_step_tick().unwrap();
        assert!(second >= first);
        d.emit_due(60 * SECOND, &clock).unwrap();
        assert_eq!(driver.sent_on(0).len(), 2);
    }

    #[test]
    fn unmapped_modes_are_dropped_silently() {
        let (cfg, catalog, mut clock, mut driver) = fixture(120);
        let store = armed_store(&catalog, &cfg);
        // the mapping slot for this port lists no instrument covering GeVo1Out
        let mut d = dispatcher(&mut driver, &["VBCutEGIOut"]);
        clock.sync(1);
        d.schedule_parts(SECOND, &clock, &[(0, 1, 1)], &store, &catalog, &cfg);
        assert!(!d.is_drained());
        d.emit_due(60 * SECOND, &clock).unwrap();
        assert!(driver.sent_on(0).is_empty());
        assert!(d.is_drained());
    }

    #[test]
    fn live_echo_fires_now_and_plants_the_off_row() {
        let (_cfg, catalog, mut clock, mut driver) = fixture(60);
        let mut d = dispatcher(&mut driver, &["GeVo1Out"]);
        clock.sync(SECOND - 1);

        let template = catalog.out("GeVo1Out").unwrap();
        let mut mode = template.instantiate();
        mode.reset_offsets(0);
        let note_col = template.col("Note").unwrap();
        let c4 = template.data[note_col].iter().position(|n| n == "C-4").unwrap();
        mode.set_indexes_with_lab_and_off("Note", c4, None).unwrap();
        mode.set_indexes_with_lab_and_val("Velocity", "100", Some(0)).unwrap();
        mode.set_indexes_with_lab_and_val("Length", "2", Some(0)).unwrap();

        let now = 5 * SECOND;
        d.push_live(1, mode);
        assert!(d.has_pending());
        d.play_now_and_schedule(now, &clock).unwrap();
        assert_eq!(driver.sent_on(0), vec![vec![0x90, 60, 100]]);
        // Length 2 at 60 BPM is half a second
        let off_tick = d.min_step_tick().unwrap();
        assert_eq!(off_tick, now - clock.clock_sync + SECOND / 2);
        d.emit_due(off_tick + clock.clock_sync, &clock).unwrap();
        assert_eq!(driver.sent_on(0).len(), 2);
        assert_eq!(driver.sent_on(0)[1], vec![0x80, 60, 0]);
    }

    #[test]
    fn channel_index_lands_in_the_status_byte() {
        let (cfg, catalog, mut clock, mut driver) = fixture(120);
        let mut out_dict = std::collections::BTreeMap::new();
        out_dict.insert(0, [(10u8, vec!["GeVo1Out".to_string()])].into());
        let mut store = PatternStore::init_data(&catalog, &out_dict, &cfg, "Mappings_00");
        let template = catalog.out("GeVo1Out").unwrap();
        let mut armed = template.instantiate();
        armed.reset_offsets(0);
        let note_col = template.col("Note").unwrap();
        let a2 = template.data[note_col].iter().position(|n| n == "A-2").unwrap();
        armed.set_indexes_with_lab_and_off("Note", a2, None).unwrap();
        let id = catalog.mode_id("GeVo1Out").unwrap();
        store.put(0, 10, 1, 1, id, armed.get_indexes());

        let mut d = dispatcher(&mut driver, &["GeVo1Out"]);
        clock.sync(1);
        d.schedule_parts(SECOND, &clock, &[(0, 10, 1)], &store, &catalog, &cfg);
        d.emit_due(60 * SECOND, &clock).unwrap();
        let sent = driver.sent_on(0);
        assert_eq!(sent[0][0], 0x99); // note-on nibble, channel 10
        assert_eq!(sent[0][1], 45); // A-2
    }
}
