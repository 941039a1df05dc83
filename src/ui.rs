//! Terminal front-end. Runs in its own context and talks to the engine
//! exclusively through the command channel and the one-slot progress
//! channel; everything it draws comes from a local mirror it advances by
//! replaying its own commands. The engine never depends on this module.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::Stylize,
    symbols::border,
    text::{Line, Text},
    widgets::{Block, Paragraph, Widget, Wrap},
    DefaultTerminal, Frame,
};

use crate::command::{Command, CopyVariant, ModeEnvelope, Progress, SettingEnvelope};
use crate::config::RunConfig;
use crate::engine::Mirror;
use crate::error::SeqError;
use crate::mode::{Catalog, OutMode};
use crate::pattern::{self, Axis, PatternStore};
use crate::preset;
use crate::settings::{self, Cursor, SettingKey, Settings, Value};

pub struct App {
    cmd_tx: Sender<Command>,
    progress_rx: Receiver<Progress>,
    cfg: RunConfig,
    preset_dir: PathBuf,
    catalog: Catalog,
    settings: Settings,
    store: PatternStore,
    /// The instance the keypad shapes before it is sent.
    edit_mode: OutMode,
    /// Position captured when copy mode was armed.
    copy_source: Option<Cursor>,
    last_progress: Progress,
    last_progress_at: Instant,
    status: String,
    exit: bool,
    refresh_interval: Duration,
    last_refresh: Instant,
}

/// An engine that publishes nothing for this long while playing is dead.
const ENGINE_TIMEOUT: Duration = Duration::from_secs(5);

impl App {
    pub fn new(
        cfg: RunConfig,
        preset_dir: PathBuf,
        mirror: Mirror,
        cmd_tx: Sender<Command>,
        progress_rx: Receiver<Progress>,
    ) -> App {
        let catalog = crate::defaults::catalog(&cfg);
        let cursor = mirror.settings.edit_cursor();
        let edit_mode = match catalog.out(&cursor.mode) {
            Some(template) => template.instantiate(),
            None => catalog
                .out_modes()
                .next()
                .expect("built-in catalog is never empty")
                .instantiate(),
        };
        App {
            cmd_tx,
            progress_rx,
            cfg,
            preset_dir,
            catalog,
            settings: mirror.settings,
            store: mirror.store,
            edit_mode,
            copy_source: None,
            last_progress: Progress::default(),
            last_progress_at: Instant::now(),
            status: String::new(),
            exit: false,
            refresh_interval: Duration::from_secs_f32(1.0 / 30.0),
            last_refresh: Instant::now(),
        }
    }

    /// Runs the front-end loop until the user quits.
    pub fn run(&mut self, terminal: &mut DefaultTerminal) -> std::io::Result<()> {
        while !self.exit {
            while let Ok(progress) = self.progress_rx.try_recv() {
                self.last_progress = progress;
                self.last_progress_at = Instant::now();
            }
            if self.last_progress.playing
                && self.last_progress_at.elapsed() > ENGINE_TIMEOUT
            {
                self.status = "engine unresponsive".to_string();
                self.last_progress.playing = false;
            }
            let now = Instant::now();
            if now.duration_since(self.last_refresh) > self.refresh_interval {
                terminal.draw(|frame| self.draw(frame))?;
                self.last_refresh = now;
            }
            self.handle_events()?;
        }
        Ok(())
    }

    fn draw(&self, frame: &mut Frame) {
        frame.render_widget(self, frame.area());
    }

    fn handle_events(&mut self) -> std::io::Result<()> {
        if event::poll(Duration::from_millis(5))? {
            match event::read()? {
                Event::Key(key_event) if key_event.kind == KeyEventKind::Press => {
                    self.handle_key_event(key_event)
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn handle_key_event(&mut self, key_event: KeyEvent) {
        match key_event.code {
            KeyCode::Char('q') => self.exit = true,
            KeyCode::Char('p') => self.toggle_play(),
            KeyCode::Char('r') => self.toggle(SettingKey::Record),
            KeyCode::Char('c') => self.toggle_copy(),
            KeyCode::Char('a') => self.send_copy(CopyVariant::AsIs),
            KeyCode::Char('s') => self.send_copy(CopyVariant::Reverse),
            KeyCode::Char('d') => self.send_copy(CopyVariant::Random),
            KeyCode::Char('[') => self.change_tempo(-1),
            KeyCode::Char(']') => self.change_tempo(1),
            KeyCode::Left | KeyCode::Right => self.rotate_axis(Axis::Step),
            KeyCode::Up | KeyCode::Down => self.rotate_axis(Axis::Part),
            KeyCode::Char('m') => self.rotate_axis(Axis::Midi),
            KeyCode::Char('h') => self.rotate_axis(Axis::Channel),
            KeyCode::Char('o') => self.rotate_axis(Axis::Mode),
            KeyCode::Char('n') => self.next_page(),
            KeyCode::Char('x') => self.send_delete(),
            KeyCode::Char('w') => self.presets(settings::PRESETS_S_MUSIC),
            KeyCode::Char('e') => self.presets(settings::PRESETS_L_MUSIC),
            KeyCode::Char(c) if c.is_ascii_digit() && c != '0' && c != '9' => {
                self.press_key(c as usize - '1' as usize)
            }
            _ => {}
        }
    }

    /// Mirrors a setting change locally and sends the envelope.
    fn set_setting(&mut self, key: SettingKey, value: Value) {
        if !self.settings.get_mut(key).set_value(&value) {
            self.status = format!("{key} has no value {value}");
            return;
        }
        self.send_setting(key);
    }

    fn send_setting(&mut self, key: SettingKey) {
        let envelope = SettingEnvelope::from(self.settings.get(key));
        if self.cmd_tx.send(Command::Setting(envelope)).is_err() {
            self.status = "engine is gone".to_string();
            self.exit = true;
        }
    }

    fn toggle(&mut self, key: SettingKey) {
        let value = if self.settings.get(key).value().to_string() == settings::ON {
            settings::OFF
        } else {
            settings::ON
        };
        self.set_setting(key, Value::from(value));
        // the engine keeps record and copy mutually exclusive; mirror that
        if key == SettingKey::Record && self.settings.record_on() {
            self.settings.get_mut(SettingKey::Copy).set_ind(0);
        }
    }

    fn toggle_play(&mut self) {
        if self.settings.play_show_on() {
            self.set_setting(SettingKey::PlayFunction, Value::from(settings::PLAY_NA));
            self.set_setting(SettingKey::PlayShow, Value::from(settings::OFF));
        } else {
            self.set_setting(SettingKey::PlayShow, Value::from(settings::ON));
            self.set_setting(SettingKey::PlayFunction, Value::from(settings::PLAY_PART));
        }
    }

    fn toggle_copy(&mut self) {
        self.toggle(SettingKey::Copy);
        if self.settings.copy_on() {
            self.settings.get_mut(SettingKey::Record).set_ind(0);
            self.copy_source = Some(self.settings.edit_cursor());
            self.status = "copy armed from current part".to_string();
        } else {
            self.copy_source = None;
        }
    }

    fn send_copy(&mut self, variant: CopyVariant) {
        let Some(source) = self.copy_source.clone() else {
            self.status = "arm copy first".to_string();
            return;
        };
        let command = Command::Copy {
            midi: source.midi,
            channel: source.channel,
            part: source.part,
            mode: source.mode.clone(),
            variant,
        };
        let _ = self.cmd_tx.send(command);
        self.mirror_copy(&source, variant);
    }

    // The engine's random copy rolls its own permutation, so after Random
    // the mirror grid is approximate until the next load.
    fn mirror_copy(&mut self, source: &Cursor, variant: CopyVariant) {
        let Some(id) = self.catalog.mode_id(&source.mode) else {
            return;
        };
        let target_part = self.settings.edit_cursor().part;
        let n_steps = self.cfg.n_steps;
        let moves: Vec<(u8, crate::mode::Indexes)> = (1..=n_steps)
            .filter_map(|step| {
                let target = match variant {
                    CopyVariant::Reverse => n_steps - step + 1,
                    _ => step,
                };
                self.store
                    .get(source.midi, source.channel, source.part, step, id)
                    .cloned()
                    .map(|rows| (target, rows))
            })
            .collect();
        for (step, rows) in moves {
            self.store.put(source.midi, source.channel, target_part, step, id, rows);
        }
    }

    fn change_tempo(&mut self, direction: i64) {
        self.settings.get_mut(SettingKey::Tempo).change(direction);
        self.send_setting(SettingKey::Tempo);
    }

    /// Rotates a cursor axis to the next populated slot, against the mirror.
    fn rotate_axis(&mut self, axis: Axis) {
        match pattern::next_slot(&self.store, &mut self.settings, axis, false, &self.catalog) {
            Ok(_) => {
                let key = match axis {
                    Axis::Midi => SettingKey::EMidiO,
                    Axis::Channel => SettingKey::EChannel,
                    Axis::Part => SettingKey::EPart,
                    Axis::Step => SettingKey::EStep,
                    Axis::Mode => SettingKey::EOMode,
                };
                self.send_setting(key);
                if axis == Axis::Mode {
                    self.reload_edit_mode();
                }
                self.status.clear();
            }
            Err(SeqError::SlotMissing) => self.status = "cannot advance".to_string(),
            Err(e) => self.status = e.to_string(),
        }
    }

    fn reload_edit_mode(&mut self) {
        let cursor = self.settings.edit_cursor();
        if let Some(template) = self.catalog.out(&cursor.mode) {
            self.edit_mode = template.instantiate();
        }
    }

    /// Keypad press: shape the current mode's button column and send it.
    fn press_key(&mut self, sub_ind: usize) {
        let label = self.edit_mode.but_label().to_string();
        if let Err(e) = self.edit_mode.set_indexes_with_lab_and_off(&label, sub_ind, None) {
            self.status = e.to_string();
            return;
        }
        self.send_mode(self.edit_mode.clone());
    }

    fn next_page(&mut self) {
        let label = self.edit_mode.but_label().to_string();
        let by = self.cfg.n_keys.max(2) as usize - 1;
        if let Err(e) = self.edit_mode.update_offsets_with_lab(&label, by) {
            self.status = e.to_string();
        }
    }

    /// Clears the current step by sending the template defaults.
    fn send_delete(&mut self) {
        let cursor = self.settings.edit_cursor();
        if let Some(template) = self.catalog.out(&cursor.mode) {
            self.send_mode(template.instantiate());
        }
    }

    fn send_mode(&mut self, mode: OutMode) {
        // replay the engine's record path on the mirror
        if self.settings.record_on() {
            if let Some(id) = self.catalog.mode_id(mode.name()) {
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
                }
            }
        }
        let _ = self.cmd_tx.send(Command::Mode(ModeEnvelope::from(&mode)));
    }

    fn presets(&mut self, action: &str) {
        self.set_setting(SettingKey::Presets, Value::from(action));
        if action == settings::PRESETS_L_MUSIC {
            // the engine loads the same document; keep the mirror in step
            let name = self.settings.get(SettingKey::MusName).value().to_string();
            match preset::load_music(&self.preset_dir, &name) {
                Ok(music) => {
                    self.store.load(music, &self.catalog);
                    self.settings.reset_cursors();
                    self.status = format!("loaded {name}");
                }
                Err(e) => self.status = e.to_string(),
            }
        } else {
            self.status = "saved".to_string();
        }
    }

    fn grid_line(&self) -> String {
        let cursor = self.settings.edit_cursor();
        let Some(id) = self.catalog.mode_id(&cursor.mode) else {
            return String::new();
        };
        let playhead = if self.last_progress.playing {
            Some(self.last_progress.step as u8 % self.cfg.n_steps)
        } else {
            None
        };
        let mut line = String::new();
        for step in 1..=self.cfg.n_steps {
            let armed = self
                .store
                .get(cursor.midi, cursor.channel, cursor.part, step, id)
                .and_then(|rows| {
                    self.catalog
                        .out(&cursor.mode)
                        .map(|t| !t.instantiate_with(rows).button_is_na(0))
                })
                .unwrap_or(false);
            let symbol = if playhead == Some(step - 1) {
                'O'
            } else if step == cursor.step {
                if armed { '#' } else { '.' }
            } else if armed {
                'X'
            } else {
                '_'
            };
            line.push(symbol);
            line.push(' ');
        }
        line
    }

    fn keypad_line(&self) -> String {
        let label = self.edit_mode.but_label().to_string();
        let mut line = format!("{label}: ");
        for i in 0..self.cfg.n_keys.max(2) as usize - 1 {
            let value = self.edit_mode.value_by_off(&label, i).unwrap_or("?");
            line.push_str(&format!("[{}]{} ", i + 1, value));
        }
        line
    }
}

impl Widget for &App {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = Line::from(" gridseq ".bold());
        let instructions = Line::from(vec![
            " Play ".into(),
            "<P>".blue().bold(),
            " Rec ".into(),
            "<R>".blue().bold(),
            " Copy ".into(),
            "<C/A/S/D>".blue().bold(),
            " Quit ".into(),
            "<Q> ".blue().bold(),
        ]);
        let block = Block::bordered()
            .title(title.centered())
            .title_bottom(instructions.centered())
            .border_set(border::THICK);

        let cursor = self.settings.edit_cursor();
        let flags = format!(
            "tempo {} | rec {} | copy {} | play {} {}",
            self.settings.tempo_bpm(),
            if self.settings.record_on() { settings::ON } else { settings::OFF },
            if self.settings.copy_on() { settings::ON } else { settings::OFF },
            if self.settings.play_show_on() { settings::ON } else { settings::OFF },
            self.settings.play_function(),
        );
        let position = format!(
            "midi {} ch {} part {} step {} mode {}",
            cursor.midi, cursor.channel, cursor.part, cursor.step, cursor.mode,
        );
        let lines = vec![
            Line::from(position),
            Line::from(self.grid_line()),
            Line::from(self.keypad_line()),
            Line::from(flags),
            Line::from(self.status.clone()),
        ];
        Paragraph::new(Text::from(lines))
            .centered()
            .block(block)
            .wrap(Wrap { trim: true })
            .render(area, buf);
    }
}
