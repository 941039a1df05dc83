//! Per-input-port rule engine. Drains whatever the driver buffered each
//! engine iteration, steps every active in-mode's rule state, and yields
//! synthesized out-mode instances once a rule list completes. Purely
//! reactive: never blocks, never sleeps.

use crate::driver::MidiSource;
use crate::mode::input::normalize;
use crate::mode::{Catalog, InMode, OutMode};

pub struct InputTranslator {
    midi_id: i32,
    source: Box<dyn MidiSource>,
    /// Mutable clones of the in modes this port's mapping slots allow.
    in_modes: Vec<InMode>,
}

impl InputTranslator {
    pub fn new(
        midi_id: i32,
        source: Box<dyn MidiSource>,
        catalog: &Catalog,
        allowed_in_modes: &[String],
        now: u64,
    ) -> Self {
        let in_modes = allowed_in_modes
            .iter()
            .filter_map(|name| catalog.in_(name))
            .map(|template| template.instantiate(now))
            .collect();
        InputTranslator { midi_id, source, in_modes }
    }

    pub fn midi_id(&self) -> i32 {
        self.midi_id
    }

    /// Replaces the active in-mode set after a mapping change.
    pub fn reset_in_modes(&mut self, catalog: &Catalog, allowed_in_modes: &[String], now: u64) {
        self.in_modes = allowed_in_modes
            .iter()
            .filter_map(|name| catalog.in_(name))
            .map(|template| template.instantiate(now))
            .collect();
    }

    /// One pump: feed every buffered message through every active in-mode,
    /// convert the completed ones. Sentinel `-1` endpoints in the yielded
    /// triples are resolved by the engine against the edit cursor.
    pub fn translate_ins_to_out(
        &mut self,
        now: u64,
        catalog: &Catalog,
        tempo: u32,
        n_quants: u8,
    ) -> Vec<(i32, i32, OutMode)> {
        let mut yielded = Vec::new();
        while let Some(raw) = self.source.poll() {
            let Some(message) = normalize(&raw.bytes) else {
                continue;
            };
            for in_mode in &mut self.in_modes {
                in_mode.set_with_message_and_time(&message, (now, raw.delta));
                if !in_mode.has_next() {
                    if let Some(triple) =
                        in_mode.convert_with_out_modes_and_tempo(catalog, tempo, n_quants)
                    {
                        yielded.push(triple);
                    }
                }
            }
        }
        yielded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SECOND;
    use crate::config::RunConfig;
    use crate::defaults;
    use crate::driver::mock::MockDriver;
    use crate::driver::{MidiDriver, PortDesc};

    fn in_port() -> PortDesc {
        PortDesc { port_id: 0, name: "Mock In".into(), is_out: false }
    }

    fn translator(driver: &mut MockDriver, catalog: &Catalog) -> InputTranslator {
        let source = driver.open_input(&in_port()).unwrap();
        InputTranslator::new(4, source, catalog, &["GeVo1In".to_string()], 0)
    }

    #[test]
    fn buffered_note_pair_yields_one_out_mode() {
        let cfg = RunConfig::default();
        let catalog = defaults::catalog(&cfg);
        let mut driver = MockDriver::new(vec![in_port()]);
        let mut t = translator(&mut driver, &catalog);

        driver.push_input(0, &[0x90, 60, 100], 0);
        driver.push_input(0, &[0x80, 60, 0], SECOND / 2);

        let yielded = t.translate_ins_to_out(10 * SECOND, &catalog, 60, cfg.n_quants);
        assert_eq!(yielded.len(), 1);
        let (midi, channel, out) = &yielded[0];
        assert_eq!((*midi, *channel), (-1, -1));
        assert_eq!(out.name(), "GeVo1Out");
        assert_eq!(out.value_by_lab(0, "Length").unwrap(), "2");
    }

    #[test]
    fn unmatched_traffic_yields_nothing() {
        let cfg = RunConfig::default();
        let catalog = defaults::catalog(&cfg);
        let mut driver = MockDriver::new(vec![in_port()]);
        let mut t = translator(&mut driver, &catalog);

        // control changes never satisfy the note-pair rules
        driver.push_input(0, &[0xB0, 1, 64], 0);
        driver.push_input(0, &[0xB0, 1, 65], 1000);
        let yielded = t.translate_ins_to_out(SECOND, &catalog, 120, cfg.n_quants);
        assert!(yielded.is_empty());
    }

    #[test]
    fn pump_drains_the_whole_buffer() {
        let cfg = RunConfig::default();
        let catalog = defaults::catalog(&cfg);
        let mut driver = MockDriver::new(vec![in_port()]);
        let mut t = translator(&mut driver, &catalog);

        // two complete captures buffered in one iteration
        driver.push_input(0, &[0x90, 60, 100], 0);
        driver.push_input(0, &[0x80, 60, 0], SECOND / 4);
        driver.push_input(0, &[0x90, 62, 90], 0);
        driver.push_input(0, &[0x80, 62, 0], SECOND / 4);
        let yielded = t.translate_ins_to_out(SECOND, &catalog, 60, cfg.n_quants);
        assert_eq!(yielded.len(), 2);
        assert_eq!(yielded[1].2.value_by_lab(0, "Key").unwrap(), "62");
    }
}
