//! Cursor and toggle state: a closed enumeration of setting keys, each
//! holding an index into its fixed value list. Two parallel position
//! cursors address the pattern space — the edit cursor drives writes, the
//! view cursor drives read-only visualization.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::config::RunConfig;
use crate::notes;

pub const ON: &str = "On";
pub const OFF: &str = "Off";

/// Play-function button values.
pub const PLAY_NA: &str = "NA";
pub const PLAY_PART: &str = "PPrt";
pub const PLAY_PARTS: &str = "PPrts";
pub const PLAY_ALL: &str = "PAll";

/// View-function button values.
pub const VIEW_ONLY: &str = "VOnly";
pub const VIEW_REC: &str = "VRec";
pub const VIEW_PLAY: &str = "VPlay";

/// Presets-menu values, music and mappings sides.
pub const PRESETS_OFF_MUSIC: &str = "MusOff";
pub const PRESETS_OFF_MAP: &str = "MapOff";
pub const PRESETS_ON_MUSIC: &str = "MusOn";
pub const PRESETS_ON_MAP: &str = "MapOn";
pub const PRESETS_L_MUSIC: &str = "LoMusic";
pub const PRESETS_S_MUSIC: &str = "SaMusic";
pub const PRESETS_L_MAP: &str = "LoMap";
pub const PRESETS_S_MAP: &str = "SaMap";
pub const PRESETS_E_MAP_ON: &str = "EdMaOn";
pub const PRESETS_E_MAP_OFF: &str = "EdMaOff";

/// The closed set of setting keys. The display form is the wire name used
/// in setting envelopes and preset documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display, EnumString)]
pub enum SettingKey {
    #[strum(serialize = "EMiDiO")]
    EMidiO,
    #[strum(serialize = "EChannel")]
    EChannel,
    #[strum(serialize = "EPart")]
    EPart,
    #[strum(serialize = "EStep")]
    EStep,
    #[strum(serialize = "EOMode")]
    EOMode,
    #[strum(serialize = "VMiDiO")]
    VMidiO,
    #[strum(serialize = "VChannel")]
    VChannel,
    #[strum(serialize = "VPart")]
    VPart,
    #[strum(serialize = "VStep")]
    VStep,
    #[strum(serialize = "VOMode")]
    VOMode,
    #[strum(serialize = "ViewS")]
    ViewShow,
    #[strum(serialize = "ViewF")]
    ViewFunction,
    #[strum(serialize = "PlayS")]
    PlayShow,
    #[strum(serialize = "PlayF")]
    PlayFunction,
    #[strum(serialize = "Record")]
    Record,
    #[strum(serialize = "COPY")]
    Copy,
    #[strum(serialize = "Tempo")]
    Tempo,
    #[strum(serialize = "Presets")]
    Presets,
    #[strum(serialize = "MusName")]
    MusName,
    #[strum(serialize = "MapName")]
    MapName,
    #[strum(serialize = "MapEditConn")]
    MapEConn,
    #[strum(serialize = "MapEditMidi")]
    MapEMidi,
    #[strum(serialize = "MapEditDir")]
    MapEDir,
    #[strum(serialize = "MapEditCh")]
    MapECh,
    #[strum(serialize = "MapEditPortName")]
    MapEPName,
    #[strum(serialize = "MapEditInstr1")]
    MapEInstr1,
    #[strum(serialize = "MapEditInstr2")]
    MapEInstr2,
}

impl SettingKey {
    pub fn from_name(name: &str) -> Option<SettingKey> {
        name.parse().ok()
    }
}

/// A value a setting can take.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Text(String),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Text(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

/// One setting: a name, an index, and the list the index points into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub ind: usize,
    pub values: Vec<Value>,
}

impl Setting {
    fn new(key: SettingKey, values: Vec<Value>) -> Self {
        Setting { name: key.to_string(), ind: 0, values }
    }

    pub fn value(&self) -> &Value {
        &self.values[self.ind]
    }

    pub fn int_value(&self) -> i64 {
        self.value().as_int().unwrap_or(-1)
    }

    pub fn set_ind(&mut self, ind: usize) {
        if ind < self.values.len() {
            self.ind = ind;
        }
    }

    /// Moves the index by `direction`, wrapping at both ends.
    pub fn change(&mut self, direction: i64) {
        let len = self.values.len() as i64;
        self.ind = (self.ind as i64 + direction).rem_euclid(len) as usize;
    }

    pub fn next_ind(&mut self) {
        self.change(1);
    }

    /// Points the index at `value`; false when the value is not in the list.
    pub fn set_value(&mut self, value: &Value) -> bool {
        match self.values.iter().position(|v| v == value) {
            Some(ind) => {
                self.ind = ind;
                true
            }
            None => false,
        }
    }
}

/// The two position cursors share this shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub midi: i32,
    pub channel: u8,
    pub part: u8,
    pub step: u8,
    pub mode: String,
}

#[derive(Clone)]
pub struct Settings {
    map: BTreeMap<SettingKey, Setting>,
}

impl Settings {
    #[allow(clippy::too_many_arguments)]
    pub fn init(
        cfg: &RunConfig,
        midi_ids: &[i32],
        out_mode_names: &[String],
        port_names: &[String],
        out_instruments: &[String],
        in_instruments: &[String],
    ) -> Self {
        let mut midi_ids: Vec<i64> = midi_ids.iter().map(|m| *m as i64).collect();
        midi_ids.sort_unstable();
        let ints = |range: std::ops::RangeInclusive<i64>| -> Vec<Value> {
            range.map(Value::Int).collect()
        };
        let texts = |items: &[&str]| -> Vec<Value> {
            items.iter().map(|s| Value::from(*s)).collect()
        };
        // empty bindings still need addressable (if useless) cursors
        let mut midi_values: Vec<Value> = midi_ids.into_iter().map(Value::Int).collect();
        if midi_values.is_empty() {
            midi_values.push(Value::Int(-1));
        }
        let mut mode_values: Vec<Value> =
            out_mode_names.iter().map(|m| Value::from(m.as_str())).collect();
        if mode_values.is_empty() {
            mode_values.push(Value::from(notes::NA));
        }
        let channel_values = ints(1..=cfg.n_channels as i64);
        let part_values = ints(1..=cfg.n_parts as i64);
        let step_values = ints(1..=cfg.n_steps as i64);

        let mut instruments: Vec<String> = vec![String::new()];
        for tag in out_instruments.iter().chain(in_instruments) {
            if !instruments.contains(tag) {
                instruments.push(tag.clone());
            }
        }
        let instrument_values: Vec<Value> =
            instruments.iter().map(|s| Value::from(s.as_str())).collect();

        let mut unique_ports: Vec<String> = vec![String::new()];
        for name in port_names {
            if !unique_ports.contains(name) {
                unique_ports.push(name.clone());
            }
        }
        let port_values: Vec<Value> =
            unique_ports.iter().map(|s| Value::from(s.as_str())).collect();

        let mut tempo = Setting::new(
            SettingKey::Tempo,
            cfg.tempo_values().iter().map(|t| Value::Int(*t as i64)).collect(),
        );
        tempo.set_value(&Value::Int(cfg.init_tempo as i64));

        let mut map = BTreeMap::new();
        let mut put = |key: SettingKey, values: Vec<Value>| {
            map.insert(key, Setting::new(key, values));
        };
        put(SettingKey::EMidiO, midi_values.clone());
        put(SettingKey::EChannel, channel_values.clone());
        put(SettingKey::EPart, part_values.clone());
        put(SettingKey::EStep, step_values.clone());
        put(SettingKey::EOMode, mode_values.clone());
        put(SettingKey::VMidiO, midi_values);
        put(SettingKey::VChannel, channel_values.clone());
        put(SettingKey::VPart, part_values);
        put(SettingKey::VStep, step_values);
        put(SettingKey::VOMode, mode_values);
        put(SettingKey::ViewShow, texts(&[OFF, ON]));
        put(SettingKey::ViewFunction, texts(&[VIEW_ONLY, VIEW_PLAY, VIEW_REC]));
        put(SettingKey::PlayShow, texts(&[OFF, ON]));
        put(
            SettingKey::PlayFunction,
            texts(&[PLAY_NA, PLAY_PART, PLAY_PARTS, PLAY_ALL]),
        );
        put(SettingKey::Record, texts(&[OFF, ON]));
        put(SettingKey::Copy, texts(&[OFF, ON]));
        put(
            SettingKey::Presets,
            texts(&[
                PRESETS_OFF_MUSIC,
                PRESETS_OFF_MAP,
                PRESETS_ON_MUSIC,
                PRESETS_ON_MAP,
                PRESETS_L_MUSIC,
                PRESETS_S_MUSIC,
                PRESETS_L_MAP,
                PRESETS_S_MAP,
                PRESETS_E_MAP_ON,
                PRESETS_E_MAP_OFF,
            ]),
        );
        put(
            SettingKey::MusName,
            (0..cfg.music_count)
                .map(|i| Value::Text(format!("Music_{i:02}")))
                .collect(),
        );
        put(
            SettingKey::MapName,
            (0..cfg.map_count)
                .map(|i| Value::Text(format!("Mappings_{i:02}")))
                .collect(),
        );
        put(SettingKey::MapEConn, ints(0..=cfg.max_conns as i64 - 1));
        put(SettingKey::MapEMidi, ints(0..=cfg.max_conns as i64 - 1));
        put(SettingKey::MapEDir, texts(&["True", "False"]));
        put(SettingKey::MapECh, channel_values);
        put(SettingKey::MapEPName, port_values);
        put(SettingKey::MapEInstr1, instrument_values.clone());
        put(SettingKey::MapEInstr2, instrument_values);
        map.insert(SettingKey::Tempo, tempo);
        Settings { map }
    }

    pub fn get(&self, key: SettingKey) -> &Setting {
        &self.map[&key]
    }

    pub fn get_mut(&mut self, key: SettingKey) -> &mut Setting {
        self.map.get_mut(&key).expect("closed key set")
    }

    fn cursor(&self, keys: [SettingKey; 5]) -> Cursor {
        let [midi, channel, part, step, mode] = keys;
        Cursor {
            midi: self.get(midi).int_value() as i32,
            channel: self.get(channel).int_value().max(1) as u8,
            part: self.get(part).int_value().max(1) as u8,
            step: self.get(step).int_value().max(1) as u8,
            mode: self.get(mode).value().to_string(),
        }
    }

    pub fn edit_cursor(&self) -> Cursor {
        self.cursor([
            SettingKey::EMidiO,
            SettingKey::EChannel,
            SettingKey::EPart,
            SettingKey::EStep,
            SettingKey::EOMode,
        ])
    }

    pub fn view_cursor(&self) -> Cursor {
        self.cursor([
            SettingKey::VMidiO,
            SettingKey::VChannel,
            SettingKey::VPart,
            SettingKey::VStep,
            SettingKey::VOMode,
        ])
    }

    fn is_on(&self, key: SettingKey) -> bool {
        self.get(key).value().to_string() == ON
    }

    pub fn record_on(&self) -> bool {
        self.is_on(SettingKey::Record)
    }

    pub fn copy_on(&self) -> bool {
        self.is_on(SettingKey::Copy)
    }

    pub fn play_show_on(&self) -> bool {
        self.is_on(SettingKey::PlayShow)
    }

    pub fn view_show_on(&self) -> bool {
        self.is_on(SettingKey::ViewShow)
    }

    pub fn play_function(&self) -> &str {
        match self.get(SettingKey::PlayFunction).value() {
            Value::Text(s) => s,
            Value::Int(_) => PLAY_NA,
        }
    }

    pub fn view_function(&self) -> &str {
        match self.get(SettingKey::ViewFunction).value() {
            Value::Text(s) => s,
            Value::Int(_) => VIEW_ONLY,
        }
    }

    pub fn tempo_bpm(&self) -> u32 {
        self.get(SettingKey::Tempo).int_value().max(1) as u32
    }

    /// Advances the edit step after a recorded write; mirrors the view step
    /// when view-follows-record is active.
    pub fn advance_edit_step(&mut self) {
        self.get_mut(SettingKey::EStep).next_ind();
        if self.view_show_on() && self.view_function() == VIEW_REC {
            self.get_mut(SettingKey::VStep).next_ind();
        }
    }

    /// Resets both cursors to their first populated values, as after a
    /// pattern-store swap.
    pub fn reset_cursors(&mut self) {
        for key in [
            SettingKey::EMidiO,
            SettingKey::EChannel,
            SettingKey::EPart,
            SettingKey::EStep,
            SettingKey::EOMode,
            SettingKey::VMidiO,
            SettingKey::VChannel,
            SettingKey::VPart,
            SettingKey::VStep,
            SettingKey::VOMode,
        ] {
            self.get_mut(key).set_ind(0);
        }
    }
}
