//! Engine-level tests: a mock MIDI driver on both sides, synthetic time,
//! commands sent exactly as the front-end sends them.

use std::path::PathBuf;
use std::sync::mpsc::Sender;

use gridseq::clock::SECOND;
use gridseq::command::{Command, CopyVariant, ModeEnvelope, SettingEnvelope};
use gridseq::config::RunConfig;
use gridseq::driver::mock::MockDriver;
use gridseq::driver::PortDesc;
use gridseq::engine::Engine;
use gridseq::error::SeqError;
use gridseq::mode::OutMode;

fn ports() -> Vec<PortDesc> {
    vec![
        PortDesc { port_id: 0, name: "USB MIDI Interface".into(), is_out: true },
        PortDesc { port_id: 1, name: "USB2.0-MIDI Port 2".into(), is_out: true },
        PortDesc { port_id: 0, name: "USB MIDI Interface".into(), is_out: false },
    ]
}

struct Rig {
    driver: MockDriver,
    engine: Engine,
    cmd_tx: Sender<Command>,
    _dir: tempfile::TempDir,
}

fn rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new(ports());
    let engine = Engine::new(
        RunConfig::default(),
        Box::new(driver.clone()),
        PathBuf::from(dir.path()),
    )
    .unwrap();
    let cmd_tx = engine.command_sender();
    Rig { driver, engine, cmd_tx, _dir: dir }
}

fn send_setting(rig: &Rig, name: &str, ind: usize) {
    rig.cmd_tx
        .send(Command::Setting(SettingEnvelope {
            name: name.to_string(),
            ind,
            values: Vec::new(),
        }))
        .unwrap();
}

/// A GeVo1Out instance armed with C-4 at the given velocity.
fn armed_voice(engine: &Engine, velocity: &str) -> OutMode {
    let template = engine.catalog().out("GeVo1Out").unwrap().clone();
    let mut mode = template.instantiate();
    mode.reset_offsets(0);
    let note_col = template.col("Note").unwrap();
    let c4 = template.data[note_col].iter().position(|n| n == "C-4").unwrap();
    mode.set_indexes_with_lab_and_off("Note", c4, None).unwrap();
    mode.set_indexes_with_lab_and_val("Velocity", velocity, Some(0)).unwrap();
    mode.set_indexes_with_lab_and_val("Length", "4", Some(0)).unwrap();
    mode
}

fn send_mode(rig: &Rig, mode: &OutMode) {
    rig.cmd_tx.send(Command::Mode(ModeEnvelope::from(mode))).unwrap();
}

fn armed_at(engine: &Engine, midi: i32, channel: u8, part: u8, step: u8) -> bool {
    let catalog = engine.catalog();
    let id = catalog.mode_id("GeVo1Out").unwrap();
    let template = catalog.out("GeVo1Out").unwrap();
    engine
        .store()
        .get(midi, channel, part, step, id)
        .map(|rows| !template.instantiate_with(rows).button_is_na(0))
        .unwrap_or(false)
}

#[test]
fn engine_refuses_to_start_without_ports() {
    let dir = tempfile::tempdir().unwrap();
    let driver = MockDriver::new(Vec::new());
    let result = Engine::new(
        RunConfig::default(),
        Box::new(driver),
        PathBuf::from(dir.path()),
    );
    assert!(matches!(result, Err(SeqError::NoPorts)));
}

#[test]
fn record_then_play_emits_on_the_first_step() {
    let mut rig = rig();
    rig.engine.tick(0).unwrap();

    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();
    assert!(rig.engine.settings().record_on());

    let mode = armed_voice(&rig.engine, "100");
    send_mode(&rig, &mode);
    rig.engine.tick(SECOND).unwrap();

    // the write landed at the edit cursor and the step advanced
    assert!(armed_at(&rig.engine, 0, 1, 1, 1));
    assert_eq!(rig.engine.settings().edit_cursor().step, 2);
    // the live echo fired immediately
    assert_eq!(rig.driver.sent_on(0)[0], vec![0x90, 60, 100]);
    // anything pending keeps the clock anchored
    assert!(rig.engine.clock().is_synced());

    // drain the echo's note-off, then the idle engine lets the anchor go
    rig.engine.tick(2 * SECOND).unwrap();
    rig.engine.tick(2 * SECOND).unwrap();
    assert!(!rig.engine.clock().is_synced());
    rig.driver.clear_sent();

    send_setting(&rig, "PlayS", 1);
    rig.engine.tick(3 * SECOND).unwrap();
    send_setting(&rig, "PlayF", 1); // play the current part
    rig.engine.tick(3 * SECOND).unwrap();

    // sync captured 3 s, the armed first step is at tick 0
    assert_eq!(rig.engine.clock().clock_sync, 3 * SECOND);
    assert_eq!(rig.driver.sent_on(0), vec![vec![0x90, 60, 100]]);

    // Length 4 at 120 BPM is half a second
    rig.engine.tick(3 * SECOND + SECOND / 2).unwrap();
    assert_eq!(
        rig.driver.sent_on(0),
        vec![vec![0x90, 60, 100], vec![0x80, 60, 0]]
    );
}

#[test]
fn pattern_replays_one_span_later() {
    let mut rig = rig();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();
    let mode = armed_voice(&rig.engine, "90");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();
    send_setting(&rig, "Record", 0);
    rig.engine.tick(0).unwrap();
    // flush the echo pair
    rig.engine.tick(2 * SECOND).unwrap();
    rig.engine.tick(2 * SECOND).unwrap();
    rig.driver.clear_sent();

    send_setting(&rig, "PlayS", 1);
    rig.engine.tick(3 * SECOND).unwrap();
    send_setting(&rig, "PlayF", 1);
    rig.engine.tick(3 * SECOND).unwrap();
    rig.engine.tick(3 * SECOND + SECOND / 2).unwrap();
    assert_eq!(rig.driver.sent_on(0).len(), 2);

    // one part at 120 BPM spans 8 s; the grid re-anchors there
    for t in [5, 7, 10] {
        rig.engine.tick(t * SECOND).unwrap();
    }
    assert_eq!(rig.driver.sent_on(0).len(), 2);
    rig.engine.tick(11 * SECOND).unwrap();
    assert_eq!(rig.engine.clock().clock_sync, 11 * SECOND);
    assert_eq!(rig.driver.sent_on(0).len(), 3);
    assert_eq!(rig.driver.sent_on(0)[2], vec![0x90, 60, 90]);
}

#[test]
fn copy_reverse_mirrors_the_armed_steps() {
    let mut rig = rig();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();

    // arm steps 1, 3, 5 of part 1
    for step_ind in [0usize, 2, 4] {
        send_setting(&rig, "EStep", step_ind);
        rig.engine.tick(0).unwrap();
        let mode = armed_voice(&rig.engine, "100");
        send_mode(&rig, &mode);
        rig.engine.tick(0).unwrap();
    }

    // copy drives writes instead of record now
    send_setting(&rig, "COPY", 1);
    rig.engine.tick(0).unwrap();
    assert!(!rig.engine.settings().record_on());

    // aim the edit cursor at part 2 and copy part 1 reversed
    send_setting(&rig, "EPart", 1);
    rig.engine.tick(0).unwrap();
    rig.cmd_tx
        .send(Command::Copy {
            midi: 0,
            channel: 1,
            part: 1,
            mode: "GeVo1Out".to_string(),
            variant: CopyVariant::Reverse,
        })
        .unwrap();
    rig.engine.tick(0).unwrap();

    let n = RunConfig::default().n_steps;
    for step in [n, n - 2, n - 4] {
        assert!(armed_at(&rig.engine, 0, 1, 2, step), "step {step} should be armed");
    }
    for step in [1, 2, n - 1, n - 3] {
        assert!(!armed_at(&rig.engine, 0, 1, 2, step), "step {step} should be empty");
    }
    // the source part is untouched
    for step in [1, 3, 5] {
        assert!(armed_at(&rig.engine, 0, 1, 1, step));
    }
}

#[test]
fn tempo_change_leaves_scheduled_ticks_in_place() {
    let mut rig = rig();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();
    // arm steps 1 and 2
    let mode = armed_voice(&rig.engine, "100");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();
    let mode = armed_voice(&rig.engine, "80");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();
    send_setting(&rig, "Record", 0);
    rig.engine.tick(0).unwrap();
    rig.engine.tick(2 * SECOND).unwrap();
    rig.engine.tick(2 * SECOND).unwrap();
    rig.engine.tick(2 * SECOND).unwrap();
    assert!(!rig.engine.clock().is_synced());
    rig.driver.clear_sent();

    // 60 BPM: step interval 1 s
    send_setting(&rig, "Tempo", 1);
    rig.engine.tick(3 * SECOND - 1).unwrap();
    send_setting(&rig, "PlayS", 1);
    rig.engine.tick(3 * SECOND - 1).unwrap();
    send_setting(&rig, "PlayF", 1);
    rig.engine.tick(3 * SECOND).unwrap();
    // step 1 fired at the anchor; step 2 sits at tick 1 s
    assert_eq!(rig.driver.sent_on(0).len(), 1);

    // doubling the tempo must not move the already-scheduled tick
    send_setting(&rig, "Tempo", 7);
    rig.engine.tick(3 * SECOND + SECOND / 2).unwrap();
    assert_eq!(rig.engine.settings().tempo_bpm(), 120);
    // at 120 BPM a step would be 0.5 s, but the old 1 s offset holds
    rig.engine.tick(4 * SECOND - 1).unwrap();
    let before: Vec<Vec<u8>> = rig.driver.sent_on(0);
    assert!(!before.contains(&vec![0x90, 60, 80]));
    rig.engine.tick(4 * SECOND).unwrap();
    assert!(rig.driver.sent_on(0).contains(&vec![0x90, 60, 80]));
}

#[test]
fn translated_input_records_and_echoes() {
    let mut rig = rig();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();

    // a half-second C-4 played into the mapped input port
    rig.driver.push_input(0, &[0x90, 60, 100], 0);
    rig.driver.push_input(0, &[0x80, 60, 0], SECOND / 2);
    rig.engine.tick(SECOND).unwrap();

    // recorded at the edit cursor with the captured velocity
    assert!(armed_at(&rig.engine, 0, 1, 1, 1));
    let id = rig.engine.catalog().mode_id("GeVo1Out").unwrap();
    let rows = rig.engine.store().get(0, 1, 1, 1, id).unwrap();
    let template = rig.engine.catalog().out("GeVo1Out").unwrap();
    let captured = template.instantiate_with(rows);
    assert_eq!(captured.value_by_lab(0, "Velocity").unwrap(), "100");
    // 0.5 s at 120 BPM is 4 quants
    assert_eq!(captured.value_by_lab(0, "Length").unwrap(), "4");
    // the echo fired on the resolved endpoint
    assert_eq!(rig.driver.sent_on(0)[0], vec![0x90, 60, 100]);
}

#[test]
fn progress_is_published_while_ticks_are_pending() {
    let mut rig = rig();
    let progress_rx = rig.engine.take_progress().unwrap();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();
    let mode = armed_voice(&rig.engine, "100");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();
    // the echo's pending note-off is the minimum upcoming tick
    rig.engine.tick(SECOND / 4).unwrap();
    let progress = progress_rx.try_recv().unwrap();
    assert!(progress.step >= 0.0);
    assert!(progress.step <= RunConfig::default().n_steps as f64);
}

#[test]
fn music_save_and_load_round_trips_through_the_engine() {
    let mut rig = rig();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();
    let mode = armed_voice(&rig.engine, "100");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();

    // save, then scribble over step 2, then load the saved document back
    send_setting(&rig, "Presets", 5);
    rig.engine.tick(0).unwrap();
    let mode = armed_voice(&rig.engine, "80");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();
    assert!(armed_at(&rig.engine, 0, 1, 1, 2));

    send_setting(&rig, "Presets", 4);
    rig.engine.tick(0).unwrap();
    assert!(armed_at(&rig.engine, 0, 1, 1, 1));
    assert!(!armed_at(&rig.engine, 0, 1, 1, 2));
    // a load never leaves the cursors pointing at stale coordinates
    assert_eq!(rig.engine.settings().edit_cursor().step, 1);
}

#[test]
fn malformed_preset_stops_the_load_but_keeps_state() {
    let mut rig = rig();
    send_setting(&rig, "Record", 1);
    rig.engine.tick(0).unwrap();
    let mode = armed_voice(&rig.engine, "100");
    send_mode(&rig, &mode);
    rig.engine.tick(0).unwrap();

    // write garbage where the music document should be
    let music_dir = rig._dir.path().join("MMusic");
    std::fs::create_dir_all(&music_dir).unwrap();
    std::fs::write(music_dir.join("Music_00.yaml"), "conns: []\n").unwrap();

    send_setting(&rig, "Presets", 4);
    let result = rig.engine.tick(0);
    assert!(matches!(result, Err(SeqError::PresetTypeMismatch { .. })));
    // prior in-memory state survives the failed load
    assert!(armed_at(&rig.engine, 0, 1, 1, 1));
}
