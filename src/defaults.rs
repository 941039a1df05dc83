//! Built-in templates, mapping banks and the starter pattern. These are the
//! in-memory fallbacks at startup and the documents `-c presets` writes out.

use crate::config::RunConfig;
use crate::mapping::{Conn, Mappings};
use crate::mode::input::{InModeTemplate, OutRule, Rule};
use crate::mode::out::OutModeTemplate;
use crate::mode::Catalog;
use crate::notes;
use crate::pattern::{Music, PatternStore};

pub const GENERIC_OUT: &str = "GenericOut";
pub const GENERIC_IN: &str = "GenericIn";
pub const VOLCA_DRUM_OUT: &str = "Volca Drum Out";
pub const VOLCA_KEYS_OUT: &str = "Volca Keys Out";
pub const VOLCA_BASS_OUT: &str = "Volca Bass Out";
pub const VOLCA_FM2_OUT: &str = "Volca FM2 Out";

/// Generic two-row note voice: row 0 starts the note, row 1 stops it after
/// the Length column's quant count.
fn voice(name: &str, cfg: &RunConfig) -> OutModeTemplate {
    let key_domain: Vec<String> = std::iter::once("-1".to_string())
        .chain((0..128).map(|k| k.to_string()))
        .collect();
    let velocity_domain: Vec<String> =
        cfg.velocity_values().iter().map(|v| v.to_string()).collect();
    let note_domain = notes::note_values(cfg);
    let c4 = note_domain.iter().position(|n| n == "C-4").unwrap_or(1);
    OutModeTemplate {
        name: name.to_string(),
        indexes: vec![vec![1, 0, 100, 1, 0, 0], vec![2, 0, 0, 0, 0, 0]],
        labels: ["Code", "Key", "Velocity", "Length", "Note", "Scale"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        offsets: vec![1, 0, 100, 1, c4, 0],
        data: vec![
            vec!["0".to_string(), "144".to_string(), "128".to_string()],
            key_domain,
            velocity_domain,
            notes::length_values(),
            note_domain,
            notes::scale_values(),
        ],
        vis_ind: [0, 1],
        but_ind: [0, 4],
        instruments: vec![GENERIC_OUT.to_string()],
        comment: "Generic MIDI start and stop of a note".to_string(),
    }
}

/// Volca Bass cutoff EG intensity: a single CC row per step.
fn cutoff_eg_int(cfg: &RunConfig) -> OutModeTemplate {
    let cc_domain: Vec<String> = std::iter::once("-1".to_string())
        .chain((0..128).map(|k| k.to_string()))
        .collect();
    OutModeTemplate {
        name: "VBCutEGIOut".to_string(),
        // control change, CC 43, sweep value
        indexes: vec![vec![1, 44, 0]],
        labels: ["Code", "Control", "Cutoff"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        offsets: vec![1, 1, 1],
        data: vec![
            vec!["0".to_string(), "176".to_string()],
            cc_domain,
            notes::motion_values(cfg),
        ],
        vis_ind: [0, 2],
        but_ind: [0, 2],
        instruments: vec![VOLCA_BASS_OUT.to_string()],
        comment: "Volca Bass Cutoff EG Intensity CC".to_string(),
    }
}

pub fn out_templates(cfg: &RunConfig) -> Vec<OutModeTemplate> {
    vec![voice("GeVo1Out", cfg), voice("GeVo2Out", cfg), cutoff_eg_int(cfg)]
}

fn voice_in(name: &str, out_name: &str) -> InModeTemplate {
    InModeTemplate {
        name: name.to_string(),
        in_rules: vec![
            vec![Rule::Equal(0x90), Rule::Wildcard],
            vec![Rule::Equal(0x80), Rule::MatchPrevious],
        ],
        out_rules: vec![
            OutRule { mode: out_name.to_string(), midi_id: -1, channel: -1 },
            OutRule { mode: String::new(), midi_id: -1, channel: -1 },
        ],
        data: Vec::new(),
        instruments: vec![GENERIC_IN.to_string()],
        comment: String::new(),
    }
}

pub fn in_templates() -> Vec<InModeTemplate> {
    vec![voice_in("GeVo1In", "GeVo1Out"), voice_in("GeVo2In", "GeVo2Out")]
}

pub fn catalog(cfg: &RunConfig) -> Catalog {
    Catalog::new(out_templates(cfg), in_templates())
}

fn conn(midi_id: i32, port_name: &str, channel: i32, is_out: bool, instruments: &[&str]) -> Conn {
    Conn {
        midi_id,
        port_name: port_name.to_string(),
        channel,
        is_out,
        instruments: instruments.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn mappings_bank(cfg: &RunConfig) -> Vec<Mappings> {
    let usb = Mappings {
        name: "Mappings_00".to_string(),
        comment: String::new(),
        conns: vec![
            conn(0, "USB MIDI Interface", 1, true, &[GENERIC_OUT]),
            conn(1, "USB2.0-MIDI Port 2", 1, true, &[GENERIC_OUT]),
            conn(2, "USB MIDI Interface", 1, true, &[GENERIC_OUT]),
            conn(3, "USB2.0-MIDI Port 2", 1, true, &[GENERIC_OUT]),
            conn(4, "USB MIDI Interface", 1, false, &[GENERIC_IN]),
            conn(4, "USB MIDI Interface", 2, false, &[GENERIC_IN]),
        ],
    };
    let volca = Mappings {
        name: "Mappings_01".to_string(),
        comment: String::new(),
        conns: vec![
            conn(0, "", 1, true, &[VOLCA_DRUM_OUT, GENERIC_OUT]),
            conn(1, "", 1, true, &[VOLCA_BASS_OUT, GENERIC_OUT]),
            conn(2, "", 1, true, &[VOLCA_KEYS_OUT, GENERIC_OUT]),
            conn(3, "", 1, true, &[VOLCA_FM2_OUT, GENERIC_OUT]),
        ],
    };
    vec![usb.normalized(cfg), volca.normalized(cfg)]
}

/// The starter pattern: every mapped slot at its template defaults.
pub fn starter_music(cfg: &RunConfig) -> Music {
    let catalog = catalog(cfg);
    let mappings = mappings_bank(cfg).remove(0);
    let out_dict = mappings.to_out_dict(&catalog);
    let store = PatternStore::init_data(&catalog, &out_dict, cfg, &mappings.name);
    let mut music = store.dump(&catalog);
    music.name = "Music_00".to_string();
    music.comment = "Starter package".to_string();
    music
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bank_slots_are_padded_to_config() {
        let cfg = RunConfig::default();
        for mappings in mappings_bank(&cfg) {
            assert_eq!(mappings.conns.len(), cfg.max_conns);
            for conn in &mappings.conns {
                assert_eq!(conn.instruments.len(), cfg.max_instr);
            }
        }
    }

    #[test]
    fn starter_music_references_its_mappings() {
        let cfg = RunConfig::default();
        let music = starter_music(&cfg);
        assert_eq!(music.mappings_name, "Mappings_00");
        assert!(!music.data.is_empty());
    }

    #[test]
    fn cutoff_row_emits_a_control_change() {
        let cfg = RunConfig::default();
        let catalog = catalog(&cfg);
        let template = catalog.out("VBCutEGIOut").unwrap();
        let mut mode = template.instantiate();
        mode.set_indexes_with_lab_and_val("Cutoff", "64", None).unwrap();
        let message = mode.get_as_message();
        assert_eq!(message[0], 0xB0 as i64);
        assert_eq!(message[1], 43);
        assert!(message[2] >= 0);
    }
}
