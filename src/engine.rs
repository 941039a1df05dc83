//! The sequencer engine: a single thread owning the pattern store, the
//! settings state, the mapping registry and every per-port dispatcher and
//! translator. Each iteration drains at most one front-end command, pumps
//! the input translators, publishes progress, then advances and emits the
//! output schedules. Recoverable errors are logged and playback continues;
//! a preset shape mismatch or a portless driver ends the run.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::thread::JoinHandle;
use std::time::Instant;

use rand::seq::SliceRandom;

use crate::clock::{duration_to_nanos, TempoClock};
use crate::command::{
    command_channel, progress_channel, Command, CopyVariant, ModeEnvelope, Progress,
    SettingEnvelope,
};
use crate::config::RunConfig;
use crate::dispatch::OutputDispatcher;
use crate::driver::{MidiDriver, MidiSink, NullSink, PortDesc};
use crate::error::{Result, SeqError};
use crate::mapping::{ConnField, Mappings};
use crate::mode::{Catalog, OutMode};
use crate::pattern::{self, Axis, PatternStore};
use crate::preset;
use crate::settings::{self, Setting, SettingKey, Settings, Value};
use crate::translate::InputTranslator;

pub struct Engine {
    cfg: RunConfig,
    preset_dir: PathBuf,
    driver: Box<dyn MidiDriver>,
    catalog: Catalog,
    mappings: Mappings,
    settings: Settings,
    store: PatternStore,
    clock: TempoClock,
    dispatchers: Vec<OutputDispatcher>,
    translators: Vec<InputTranslator>,
    cmd_tx: Sender<Command>,
    cmd_rx: Receiver<Command>,
    progress_tx: SyncSender<Progress>,
    progress_rx: Option<Receiver<Progress>>,
    origin: Instant,
    was_playing: bool,
}

/// Front-end copy of the engine state at detach time.
pub struct Mirror {
    pub settings: Settings,
    pub store: PatternStore,
}

/// Channels into a detached engine thread.
pub struct EngineHandle {
    pub cmd_tx: Sender<Command>,
    pub progress_rx: Receiver<Progress>,
    pub join: JoinHandle<()>,
}

impl Engine {
    pub fn new(
        cfg: RunConfig,
        driver: Box<dyn MidiDriver>,
        preset_dir: PathBuf,
    ) -> Result<Engine> {
        let (cmd_tx, cmd_rx) = command_channel();
        let (progress_tx, progress_rx) = progress_channel();
        let catalog = crate::defaults::catalog(&cfg);
        let mappings = crate::defaults::mappings_bank(&cfg).remove(0);
        let clock = TempoClock::new(&cfg);
        let mut engine = Engine {
            settings: Settings::init(&cfg, &[], &[], &[], &[], &[]),
            store: PatternStore::default(),
            cfg,
            preset_dir,
            driver,
            catalog,
            mappings,
            clock,
            dispatchers: Vec::new(),
            translators: Vec::new(),
            cmd_tx,
            cmd_rx,
            progress_tx,
            progress_rx: Some(progress_rx),
            origin: Instant::now(),
            was_playing: false,
        };
        engine.attach()?;
        Ok(engine)
    }

    /// Rebinds physical ports and rebuilds everything derived from the
    /// mapping registry: settings value lists, pattern store, dispatchers
    /// and translators. Runs at startup and after a mapping load.
    fn attach(&mut self) -> Result<()> {
        let ports = self.driver.ports()?;
        if ports.is_empty() {
            return Err(SeqError::NoPorts);
        }
        let outs = self.mappings.init_midi_outs(&ports);
        let ins = self.mappings.init_midi_ins(&ports);
        let midi_ids: Vec<i32> = outs.keys().copied().collect();
        let port_names: Vec<String> = ports.iter().map(|p| p.name.clone()).collect();
        self.settings = Settings::init(
            &self.cfg,
            &midi_ids,
            &self.catalog.out_names(),
            &port_names,
            &self.catalog.out_instruments(),
            &self.catalog.in_instruments(),
        );
        let out_dict = self.mappings.to_out_dict(&self.catalog);
        self.store =
            PatternStore::init_data(&self.catalog, &out_dict, &self.cfg, &self.mappings.name);

        self.dispatchers.clear();
        for (midi_id, endpoint) in &outs {
            let sink: Box<dyn MidiSink> = if endpoint.port_id >= 0 {
                self.driver.open_output(&PortDesc {
                    port_id: endpoint.port_id,
                    name: endpoint.port_name.clone(),
                    is_out: true,
                })?
            } else {
                log::info!("midi {midi_id} runs without a physical port");
                Box::new(NullSink)
            };
            self.dispatchers.push(OutputDispatcher::new(
                *midi_id,
                sink,
                self.mappings.out_modes_for_midi(*midi_id, &self.catalog),
            ));
        }

        self.translators.clear();
        let now = duration_to_nanos(self.origin.elapsed());
        for (midi_id, endpoint) in &ins {
            if endpoint.port_id < 0 {
                continue;
            }
            let source = self.driver.open_input(&PortDesc {
                port_id: endpoint.port_id,
                name: endpoint.port_name.clone(),
                is_out: false,
            })?;
            self.translators.push(InputTranslator::new(
                *midi_id,
                source,
                &self.catalog,
                &self.mappings.in_modes_for_midi(*midi_id, &self.catalog),
                now,
            ));
        }
        Ok(())
    }

    pub fn command_sender(&self) -> Sender<Command> {
        self.cmd_tx.clone()
    }

    pub fn take_progress(&mut self) -> Option<Receiver<Progress>> {
        self.progress_rx.take()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &PatternStore {
        &self.store
    }

    pub fn clock(&self) -> &TempoClock {
        &self.clock
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn next_edit_slot(&mut self, axis: Axis) -> Result<Setting> {
        pattern::next_slot(&self.store, &mut self.settings, axis, false, &self.catalog)
    }

    pub fn next_view_slot(&mut self, axis: Axis) -> Result<Setting> {
        pattern::next_slot(&self.store, &mut self.settings, axis, true, &self.catalog)
    }

    /// A read-only copy of the engine-side state for a front-end mirror,
    /// taken before `detach`. After that the mirror advances by replaying
    /// the commands the front-end itself sends.
    pub fn mirror(&self) -> Mirror {
        Mirror {
            settings: self.settings.clone(),
            store: self.store.clone(),
        }
    }

    /// Spawns the run loop on its own thread.
    pub fn detach(mut self) -> EngineHandle {
        let cmd_tx = self.cmd_tx.clone();
        let progress_rx = self.take_progress().expect("progress receiver already taken");
        let join = std::thread::spawn(move || self.run());
        EngineHandle { cmd_tx, progress_rx, join }
    }

    pub fn run(mut self) {
        let sleeper = spin_sleep::SpinSleeper::new(1_012_550_000)
            .with_spin_strategy(spin_sleep::SpinStrategy::SpinLoopHint);
        loop {
            let now = duration_to_nanos(self.origin.elapsed());
            if let Err(e) = self.tick(now) {
                log::error!("engine stopped: {e}");
                break;
            }
            sleeper.sleep(self.cfg.sleep);
        }
    }

    /// One engine iteration at monotonic time `now`. Errors returned here
    /// are fatal; everything recoverable is logged inside.
    pub fn tick(&mut self, now: u64) -> Result<()> {
        self.clock.reset_intervals(self.settings.tempo_bpm());

        if let Err(e) = self.drain_command(now) {
            match e {
                SeqError::PresetTypeMismatch { .. } | SeqError::NoPorts => return Err(e),
                recoverable => log::warn!("command dropped: {recoverable}"),
            }
        }

        self.pump_inputs(now);
        self.publish_progress();
        self.pump_dispatchers(now);
        Ok(())
    }

    fn drain_command(&mut self, now: u64) -> Result<()> {
        let Ok(command) = self.cmd_rx.try_recv() else {
            return Ok(());
        };
        match command {
            Command::Mode(envelope) => self.apply_mode(envelope, now),
            Command::Setting(envelope) => self.apply_setting(envelope),
            Command::Copy { midi, channel, part, mode, variant } => {
                self.apply_copy(midi, channel, part, &mode, variant)
            }
        }
    }

    /// A mode envelope: reconstruct the instance, write it at the edit
    /// cursor when recording, and echo it on the current output port.
    fn apply_mode(&mut self, envelope: ModeEnvelope, now: u64) -> Result<()> {
        let template = self
            .catalog
            .out(&envelope.name)
            .ok_or_else(|| SeqError::LabelNotFound(envelope.name.clone()))?;
        let mode = template.instantiate_with(&envelope.indexes);
        self.record_step(&mode);
        let cursor = self.settings.edit_cursor();
        self.push_echo(cursor.midi, cursor.channel, mode, now);
        Ok(())
    }

    /// The single write path into the store; advances the edit step on
    /// success, as recording does.
    fn record_step(&mut self, mode: &OutMode) {
        if !self.settings.record_on() {
            return;
        }
        let Some(id) = self.catalog.mode_id(mode.name()) else {
            return;
        };
        let cursor = self.settings.edit_cursor();
        if self.store.put(
            cursor.midi,
            cursor.channel,
            cursor.part,
            cursor.step,
            id,
            mode.get_indexes(),
        ) {
            self.settings.advance_edit_step();
            if self.cfg.debug {
                if let Err(e) = self.store.debug_dump(&self.preset_dir, &self.catalog) {
                    log::warn!("debug dump failed: {e}");
                }
            }
        }
    }

    fn push_echo(&mut self, midi: i32, channel: u8, mode: OutMode, now: u64) {
        match self.dispatchers.iter_mut().find(|d| d.midi_id() == midi) {
            Some(dispatcher) => {
                dispatcher.push_live(channel, mode);
                // anything pending must be anchored
                self.clock.sync(now);
            }
            None => log::debug!("no output dispatcher for midi {midi}"),
        }
    }

    fn apply_setting(&mut self, envelope: SettingEnvelope) -> Result<()> {
        let key = SettingKey::from_name(&envelope.name)
            .ok_or_else(|| SeqError::LabelNotFound(envelope.name.clone()))?;
        self.settings.get_mut(key).set_ind(envelope.ind);
        match key {
            // only one of record/copy may drive writes
            SettingKey::Record if self.settings.record_on() => {
                self.settings.get_mut(SettingKey::Copy).set_ind(0);
            }
            SettingKey::Copy if self.settings.copy_on() => {
                self.settings.get_mut(SettingKey::Record).set_ind(0);
            }
            SettingKey::Presets => return self.presets_action(),
            SettingKey::MapEConn => self.load_conn_into_settings(),
            SettingKey::MapEMidi => return self.edit_conn(ConnField::MidiId, key),
            SettingKey::MapEDir => return self.edit_conn(ConnField::Direction, key),
            SettingKey::MapECh => return self.edit_conn(ConnField::Channel, key),
            SettingKey::MapEPName => return self.edit_conn(ConnField::PortName, key),
            SettingKey::MapEInstr1 => return self.edit_conn(ConnField::Instr(0), key),
            SettingKey::MapEInstr2 => return self.edit_conn(ConnField::Instr(1), key),
            _ => {}
        }
        Ok(())
    }

    /// Load/save actions fired by the presets menu; the menu position
    /// itself was already stored.
    fn presets_action(&mut self) -> Result<()> {
        let action = self.settings.get(SettingKey::Presets).value().to_string();
        match action.as_str() {
            settings::PRESETS_L_MUSIC => {
                let name = self.settings.get(SettingKey::MusName).value().to_string();
                let music = preset::load_music(&self.preset_dir, &name)?;
                // store and cursors swap together, before any later command
                self.store.load(music, &self.catalog);
                self.settings.reset_cursors();
            }
            settings::PRESETS_S_MUSIC => {
                let name = self.settings.get(SettingKey::MusName).value().to_string();
                let mut music = self.store.dump(&self.catalog);
                music.name = name;
                preset::save_music(&self.preset_dir, &music)?;
            }
            settings::PRESETS_L_MAP => {
                let name = self.settings.get(SettingKey::MapName).value().to_string();
                self.mappings = preset::load_mappings(&self.preset_dir, &name, &self.cfg)?;
                self.attach()?;
            }
            settings::PRESETS_S_MAP => {
                let name = self.settings.get(SettingKey::MapName).value().to_string();
                let mut mappings = self.mappings.clone();
                mappings.name = name;
                preset::save_mappings(&self.preset_dir, &mappings)?;
            }
            settings::PRESETS_E_MAP_ON => self.load_conn_into_settings(),
            settings::PRESETS_E_MAP_OFF => self.refresh_allowed_modes(),
            _ => {}
        }
        Ok(())
    }

    fn selected_conn(&self) -> usize {
        self.settings.get(SettingKey::MapEConn).int_value().max(0) as usize
    }

    /// Mirrors the selected slot's fields into the map-edit settings so the
    /// front-end pages start from current values.
    fn load_conn_into_settings(&mut self) {
        let Some(conn) = self.mappings.conns.get(self.selected_conn()).cloned() else {
            return;
        };
        self.settings
            .get_mut(SettingKey::MapEMidi)
            .set_value(&Value::Int(conn.midi_id as i64));
        self.settings
            .get_mut(SettingKey::MapEDir)
            .set_value(&Value::from(if conn.is_out { "True" } else { "False" }));
        self.settings
            .get_mut(SettingKey::MapECh)
            .set_value(&Value::Int(conn.channel as i64));
        self.settings
            .get_mut(SettingKey::MapEPName)
            .set_value(&Value::Text(conn.port_name.clone()));
        if let Some(tag) = conn.instruments.first() {
            self.settings
                .get_mut(SettingKey::MapEInstr1)
                .set_value(&Value::Text(tag.clone()));
        }
        if let Some(tag) = conn.instruments.get(1) {
            self.settings
                .get_mut(SettingKey::MapEInstr2)
                .set_value(&Value::Text(tag.clone()));
        }
    }

    fn edit_conn(&mut self, field: ConnField, key: SettingKey) -> Result<()> {
        let value = self.settings.get(key).value().clone();
        self.mappings.edit_slot(self.selected_conn(), field, &value)
    }

    /// Re-derives the per-port allowed mode lists after slot edits; port
    /// re-binding itself only happens on a mapping load.
    fn refresh_allowed_modes(&mut self) {
        for dispatcher in &mut self.dispatchers {
            dispatcher.set_allowed_out_modes(
                self.mappings.out_modes_for_midi(dispatcher.midi_id(), &self.catalog),
            );
        }
        let now = duration_to_nanos(self.origin.elapsed());
        for translator in &mut self.translators {
            translator.reset_in_modes(
                &self.catalog,
                &self.mappings.in_modes_for_midi(translator.midi_id(), &self.catalog),
                now,
            );
        }
    }

    /// Copies one part's steps for one mode into the current edit part.
    fn apply_copy(
        &mut self,
        midi: i32,
        channel: u8,
        part: u8,
        mode: &str,
        variant: CopyVariant,
    ) -> Result<()> {
        if !self.settings.copy_on() {
            return Ok(());
        }
        let id = self
            .catalog
            .mode_id(mode)
            .ok_or_else(|| SeqError::LabelNotFound(mode.to_string()))?;
        let target_part = self.settings.edit_cursor().part;
        let n_steps = self.cfg.n_steps;
        let mut permutation: Vec<u8> = (1..=n_steps).collect();
        if variant == CopyVariant::Random {
            permutation.shuffle(&mut rand::thread_rng());
        }
        let moves: Vec<(u8, crate::mode::Indexes)> = (1..=n_steps)
            .filter_map(|step| {
                let target = match variant {
                    CopyVariant::AsIs => step,
                    CopyVariant::Reverse => n_steps - step + 1,
                    CopyVariant::Random => permutation[step as usize - 1],
                };
                self.store
                    .get(midi, channel, part, step, id)
                    .cloned()
                    .map(|rows| (target, rows))
            })
            .collect();
        for (target_step, rows) in moves {
            self.store.put(midi, channel, target_part, target_step, id, rows);
        }
        if self.cfg.debug {
            if let Err(e) = self.store.debug_dump(&self.preset_dir, &self.catalog) {
                log::warn!("debug dump failed: {e}");
            }
        }
        Ok(())
    }

    /// Drains every input translator; synthesized modes record at the edit
    /// cursor and echo on their resolved endpoint.
    fn pump_inputs(&mut self, now: u64) {
        let tempo = self.settings.tempo_bpm();
        let mut yielded = Vec::new();
        for translator in &mut self.translators {
            yielded.extend(translator.translate_ins_to_out(
                now,
                &self.catalog,
                tempo,
                self.cfg.n_quants,
            ));
        }
        for (midi, channel, mode) in yielded {
            self.record_step(&mode);
            let cursor = self.settings.edit_cursor();
            let midi = if midi < 0 { cursor.midi } else { midi };
            let channel = if channel <= 0 { cursor.channel } else { channel as u8 };
            self.push_echo(midi, channel, mode, now);
        }
    }

    fn publish_progress(&mut self) {
        let Some(min_tick) = self.dispatchers.iter().filter_map(|d| d.min_step_tick()).min()
        else {
            return;
        };
        let step = min_tick as f64 / self.clock.step_interval as f64;
        if step <= self.cfg.n_steps as f64 {
            let _ = self.progress_tx.try_send(Progress {
                step,
                playing: self.settings.play_show_on(),
            });
        }
    }

    /// The `(midi, channel, part)` triples currently playing.
    fn play_positions(&self) -> Vec<(i32, u8, u8)> {
        let cursor = self.settings.edit_cursor();
        match self.settings.play_function() {
            settings::PLAY_PART => vec![(cursor.midi, cursor.channel, cursor.part)],
            settings::PLAY_PARTS => (1..=self.cfg.n_parts)
                .map(|part| (cursor.midi, cursor.channel, part))
                .collect(),
            settings::PLAY_ALL => self.store.play_triples(),
            _ => Vec::new(),
        }
    }

    fn pump_dispatchers(&mut self, now: u64) {
        let playing = self.settings.play_show_on()
            && self.settings.play_function() != settings::PLAY_NA;

        if playing {
            if !self.was_playing {
                self.clock.sync(now);
            }
            // a finished pass re-anchors the grid one span later
            if self.dispatchers.iter().all(|d| d.is_drained()) {
                let span = self
                    .dispatchers
                    .iter()
                    .map(|d| d.max_part_tick())
                    .max()
                    .unwrap_or(0);
                if span > 0 && now >= self.clock.clock_sync + span {
                    self.clock.advance(span);
                    for dispatcher in &mut self.dispatchers {
                        dispatcher.reset_max_part_tick();
                    }
                }
            }
            let triples = self.play_positions();
            for dispatcher in &mut self.dispatchers {
                dispatcher.schedule_parts(
                    now,
                    &self.clock,
                    &triples,
                    &self.store,
                    &self.catalog,
                    &self.cfg,
                );
            }
        }

        if !self.clock.is_synced() && self.dispatchers.iter().any(|d| d.has_pending()) {
            self.clock.sync(now);
        }

        for dispatcher in &mut self.dispatchers {
            if let Err(e) = dispatcher.play_now_and_schedule(now, &self.clock) {
                log::warn!("midi {}: echo failed: {e}", dispatcher.midi_id());
            }
            if let Err(e) = dispatcher.emit_due(now, &self.clock) {
                log::warn!("midi {}: emit failed: {e}", dispatcher.midi_id());
            }
        }

        // only a fully drained engine lets go of the anchor
        if !playing
            && self.clock.is_synced()
            && self.dispatchers.iter().all(|d| !d.has_pending())
        {
            self.clock.clear();
        }
        self.was_playing = playing;
    }
}
