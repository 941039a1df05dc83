//! The pattern store: every recorded step row, keyed by a packed
//! `(midi, channel, part, step, mode)` tuple. A slot exists only where the
//! mapping registry gave that `(midi, channel)` pair at least one
//! instrument-compatible mode; writes to absent slots are dropped. The
//! store lives in the engine thread and is swapped wholesale on music load.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::error::{Result, SeqError};
use crate::mode::{Catalog, Indexes, ModeId};
use crate::settings::{Cursor, Setting, SettingKey, Settings};

/// Packed slot address; ordering makes per-step mode scans range queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct StepKey {
    pub midi: u8,
    pub channel: u8,
    pub part: u8,
    pub step: u8,
    pub mode: ModeId,
}

/// On-disk shape of a pattern document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Music {
    pub name: String,
    pub mappings_name: String,
    #[serde(default)]
    pub comment: String,
    pub data: MusicData,
}

pub type MusicData =
    BTreeMap<u8, BTreeMap<u8, BTreeMap<u8, BTreeMap<u8, BTreeMap<String, Indexes>>>>>;

/// A cursor axis the front-end can rotate along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Midi,
    Channel,
    Part,
    Step,
    Mode,
}

impl Axis {
    fn key(self, view: bool) -> SettingKey {
        match (self, view) {
            (Axis::Midi, false) => SettingKey::EMidiO,
            (Axis::Channel, false) => SettingKey::EChannel,
            (Axis::Part, false) => SettingKey::EPart,
            (Axis::Step, false) => SettingKey::EStep,
            (Axis::Mode, false) => SettingKey::EOMode,
            (Axis::Midi, true) => SettingKey::VMidiO,
            (Axis::Channel, true) => SettingKey::VChannel,
            (Axis::Part, true) => SettingKey::VPart,
            (Axis::Step, true) => SettingKey::VStep,
            (Axis::Mode, true) => SettingKey::VOMode,
        }
    }
}

#[derive(Clone, Default)]
pub struct PatternStore {
    slots: BTreeMap<StepKey, Indexes>,
    pub name: String,
    pub mappings_name: String,
    pub comment: String,
}

impl PatternStore {
    /// Hydrates the store from the registry's out-dict: one slot per
    /// populated `(midi, channel)` pair, part, step and compatible mode,
    /// each carrying the template's default rows.
    pub fn init_data(
        catalog: &Catalog,
        out_dict: &BTreeMap<i32, BTreeMap<u8, Vec<String>>>,
        cfg: &RunConfig,
        mappings_name: &str,
    ) -> Self {
        let mut slots = BTreeMap::new();
        for (midi, channels) in out_dict {
            if *midi < 0 {
                continue;
            }
            for (channel, modes) in channels {
                for mode_name in modes {
                    let (Some(id), Some(template)) =
                        (catalog.mode_id(mode_name), catalog.out(mode_name))
                    else {
                        continue;
                    };
                    for part in 1..=cfg.n_parts {
                        for step in 1..=cfg.n_steps {
                            slots.insert(
                                StepKey {
                                    midi: *midi as u8,
                                    channel: *channel,
                                    part,
                                    step,
                                    mode: id,
                                },
                                template.indexes.clone(),
                            );
                        }
                    }
                }
            }
        }
        PatternStore {
            slots,
            name: "Music_00".to_string(),
            mappings_name: mappings_name.to_string(),
            comment: String::new(),
        }
    }

    fn key(midi: i32, channel: u8, part: u8, step: u8, mode: ModeId) -> Option<StepKey> {
        u8::try_from(midi).ok().map(|midi| StepKey {
            midi,
            channel,
            part,
            step,
            mode,
        })
    }

    pub fn get(
        &self,
        midi: i32,
        channel: u8,
        part: u8,
        step: u8,
        mode: ModeId,
    ) -> Option<&Indexes> {
        Self::key(midi, channel, part, step, mode).and_then(|k| self.slots.get(&k))
    }

    /// The single write path. Never resizes the store; writing to an absent
    /// slot is a no-op and returns false.
    pub fn put(
        &mut self,
        midi: i32,
        channel: u8,
        part: u8,
        step: u8,
        mode: ModeId,
        indexes: Indexes,
    ) -> bool {
        let Some(key) = Self::key(midi, channel, part, step, mode) else {
            return false;
        };
        match self.slots.get_mut(&key) {
            Some(slot) => {
                *slot = indexes;
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, cursor: &Cursor, catalog: &Catalog) -> bool {
        catalog
            .mode_id(&cursor.mode)
            .and_then(|mode| Self::key(cursor.midi, cursor.channel, cursor.part, cursor.step, mode))
            .map(|key| self.slots.contains_key(&key))
            .unwrap_or(false)
    }

    /// Modes populated at one `(midi, channel, part, step)` coordinate.
    pub fn modes_at(
        &self,
        midi: i32,
        channel: u8,
        part: u8,
        step: u8,
    ) -> Vec<(ModeId, &Indexes)> {
        let Some(lo) = Self::key(midi, channel, part, step, ModeId(0)) else {
            return Vec::new();
        };
        let hi = StepKey { mode: ModeId(u16::MAX), ..lo };
        self.slots
            .range(lo..=hi)
            .map(|(key, indexes)| (key.mode, indexes))
            .collect()
    }

    /// Distinct `(midi, channel, part)` triples with at least one slot.
    pub fn play_triples(&self) -> Vec<(i32, u8, u8)> {
        let mut triples: Vec<(i32, u8, u8)> = Vec::new();
        for key in self.slots.keys() {
            let triple = (key.midi as i32, key.channel, key.part);
            if triples.last() != Some(&triple) && !triples.contains(&triple) {
                triples.push(triple);
            }
        }
        triples
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Serializes to the nested document shape.
    pub fn dump(&self, catalog: &Catalog) -> Music {
        let mut data: MusicData = BTreeMap::new();
        for (key, indexes) in &self.slots {
            let Some(mode_name) = catalog.mode_name(key.mode) else {
                continue;
            };
            data.entry(key.midi)
                .or_default()
                .entry(key.channel)
                .or_default()
                .entry(key.part)
                .or_default()
                .entry(key.step)
                .or_default()
                .insert(mode_name.to_string(), indexes.clone());
        }
        Music {
            name: self.name.clone(),
            mappings_name: self.mappings_name.clone(),
            comment: self.comment.clone(),
            data,
        }
    }

    /// Replaces the whole store from a document. Rows naming modes absent
    /// from the catalog are dropped; indices are normalized through the
    /// template so every stored row stays inside its column domains.
    pub fn load(&mut self, doc: Music, catalog: &Catalog) {
        let mut slots = BTreeMap::new();
        for (midi, channels) in doc.data {
            for (channel, parts) in channels {
                for (part, steps) in parts {
                    for (step, modes) in steps {
                        for (mode_name, indexes) in modes {
                            let (Some(id), Some(template)) =
                                (catalog.mode_id(&mode_name), catalog.out(&mode_name))
                            else {
                                log::warn!("dropping rows for unknown mode {mode_name}");
                                continue;
                            };
                            let normalized = template.instantiate_with(&indexes).get_indexes();
                            slots.insert(
                                StepKey { midi, channel, part, step, mode: id },
                                normalized,
                            );
                        }
                    }
                }
            }
        }
        self.slots = slots;
        self.name = doc.name;
        self.mappings_name = doc.mappings_name;
        self.comment = doc.comment;
    }

    /// Debug aid: dumps the whole store as indented JSON next to the
    /// working directory, one file per process.
    pub fn debug_dump(&self, dir: &Path, catalog: &Catalog) -> Result<()> {
        let path = dir.join(format!("PatternStore.{}.json", std::process::id()));
        let file = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &self.dump(catalog))
            .map_err(|_| SeqError::PresetWrite(self.name.clone()))?;
        Ok(())
    }
}

/// Rotates one cursor axis to the next value with a populated slot at the
/// remaining coordinates. Returns the updated setting, or `SlotMissing`
/// when no value on the axis has one.
pub fn next_slot(
    store: &PatternStore,
    settings: &mut Settings,
    axis: Axis,
    view: bool,
    catalog: &Catalog,
) -> Result<Setting> {
    let cursor = if view { settings.view_cursor() } else { settings.edit_cursor() };
    let key = axis.key(view);
    let len = settings.get(key).values.len();
    let start = settings.get(key).ind;
    for i in 1..=len {
        let ind = (start + i) % len;
        let candidate = settings.get(key).values[ind].clone();
        let mut probe = cursor.clone();
        match axis {
            Axis::Midi => probe.midi = candidate.as_int().unwrap_or(-1) as i32,
            Axis::Channel => probe.channel = candidate.as_int().unwrap_or(0).max(0) as u8,
            Axis::Part => probe.part = candidate.as_int().unwrap_or(0).max(0) as u8,
            Axis::Step => probe.step = candidate.as_int().unwrap_or(0).max(0) as u8,
            Axis::Mode => probe.mode = candidate.to_string(),
        }
        if store.contains(&probe, catalog) {
            let setting = settings.get_mut(key);
            setting.set_ind(ind);
            return Ok(setting.clone());
        }
    }
    Err(SeqError::SlotMissing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults;

    fn fixture() -> (Catalog, PatternStore, RunConfig) {
        let cfg = RunConfig::default();
        let catalog = defaults::catalog(&cfg);
        let mappings = defaults::mappings_bank(&cfg).remove(0);
        let out_dict = mappings.to_out_dict(&catalog);
        let store = PatternStore::init_data(&catalog, &out_dict, &cfg, &mappings.name);
        (catalog, store, cfg)
    }

    fn settings_for(store_midis: &[i32], catalog: &Catalog, cfg: &RunConfig) -> Settings {
        Settings::init(
            cfg,
            store_midis,
            &catalog.out_names(),
            &[],
            &catalog.out_instruments(),
            &catalog.in_instruments(),
        )
    }

    #[test]
    fn init_populates_only_mapped_pairs() {
        let (catalog, store, cfg) = fixture();
        let voice = catalog.mode_id("GeVo1Out").unwrap();
        assert!(store.get(0, 1, 1, 1, voice).is_some());
        // channel 2 is not mapped for midi 0
        assert!(store.get(0, 2, 1, 1, voice).is_none());
        // the Volca-only mode has no compatible mapping slot
        let cutoff = catalog.mode_id("VBCutEGIOut").unwrap();
        assert!(store.get(0, 1, 1, 1, cutoff).is_none());
        // uniform across parts and steps
        assert!(store.get(0, 1, cfg.n_parts, cfg.n_steps, voice).is_some());
    }

    #[test]
    fn put_is_a_no_op_on_missing_slots() {
        let (catalog, mut store, _) = fixture();
        let voice = catalog.mode_id("GeVo1Out").unwrap();
        let before = store.len();
        assert!(!store.put(9, 1, 1, 1, voice, vec![vec![0; 6]]));
        assert_eq!(store.len(), before);
        assert!(store.put(0, 1, 1, 1, voice, vec![vec![1, 61, 100, 1, 5, 0], vec![2, 61, 0, 0, 5, 0]]));
        assert_eq!(store.get(0, 1, 1, 1, voice).unwrap()[0][1], 61);
    }

    #[test]
    fn axis_rotation_returns_after_full_cycle() {
        let (catalog, store, cfg) = fixture();
        let mut settings = settings_for(&[0, 1, 2, 3], &catalog, &cfg);
        let start = settings.get(SettingKey::EMidiO).ind;
        let populated = 4; // midis 0..=3 all carry generic modes
        for _ in 0..populated {
            next_slot(&store, &mut settings, Axis::Midi, false, &catalog).unwrap();
        }
        assert_eq!(settings.get(SettingKey::EMidiO).ind, start);
    }

    #[test]
    fn mode_axis_skips_unpopulated_modes() {
        let (catalog, store, cfg) = fixture();
        let mut settings = settings_for(&[0, 1, 2, 3], &catalog, &cfg);
        // rotating the mode axis never lands on the unmapped Volca mode
        for _ in 0..6 {
            let setting = next_slot(&store, &mut settings, Axis::Mode, false, &catalog).unwrap();
            assert_ne!(setting.value().to_string(), "VBCutEGIOut");
        }
    }

    #[test]
    fn dump_load_round_trip() {
        let (catalog, mut store, _) = fixture();
        let voice = catalog.mode_id("GeVo1Out").unwrap();
        store.put(0, 1, 1, 3, voice, vec![vec![1, 61, 90, 1, 4, 0], vec![2, 61, 0, 0, 4, 0]]);
        let doc = store.dump(&catalog);
        let mut other = PatternStore::default();
        other.load(doc.clone(), &catalog);
        assert_eq!(other.len(), store.len());
        assert_eq!(other.dump(&catalog), doc);
        assert_eq!(other.get(0, 1, 1, 3, voice).unwrap()[0][1], 61);
    }

    #[test]
    fn load_drops_unknown_modes_and_clamps_indices() {
        let (catalog, mut store, _) = fixture();
        let mut doc = store.dump(&catalog);
        let steps = doc
            .data
            .get_mut(&0)
            .unwrap()
            .get_mut(&1)
            .unwrap()
            .get_mut(&1)
            .unwrap()
            .get_mut(&1)
            .unwrap();
        steps.insert("NoSuchMode".to_string(), vec![vec![0; 6]]);
        steps.insert("GeVo1Out".to_string(), vec![vec![9999; 6], vec![0; 6]]);
        store.load(doc, &catalog);
        let voice = catalog.mode_id("GeVo1Out").unwrap();
        let rows = store.get(0, 1, 1, 1, voice).unwrap();
        let template = catalog.out("GeVo1Out").unwrap();
        for (col, ind) in rows[0].iter().enumerate() {
            assert!(*ind < template.data[col].len());
        }
    }
}
