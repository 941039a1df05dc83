use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use gridseq::config::RunConfig;
use gridseq::driver::midir_backend::MidirDriver;
use gridseq::engine::Engine;
use gridseq::error::{Result, SeqError};
use gridseq::preset;
use gridseq::ui::App;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RunMode {
    /// Terminal front-end plus engine.
    App,
    /// Write the built-in preset documents and exit.
    Presets,
    /// Engine only, controlled over MIDI input.
    Headless,
}

#[derive(Parser)]
#[command(name = "gridseq", about = "text-terminal MIDI step sequencer")]
struct Args {
    #[arg(short = 'c', long = "command", value_enum, default_value = "headless")]
    command: RunMode,
    /// Working directory holding the preset type directories.
    #[arg(short = 'd', long = "dir", default_value = "./presets")]
    dir: PathBuf,
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        log::error!("{e}");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    let cfg = RunConfig::default();
    match args.command {
        RunMode::Presets => preset::write_all_defaults(&args.dir, &cfg),
        RunMode::Headless => {
            let engine = Engine::new(cfg, Box::new(MidirDriver::new()), args.dir)?;
            engine.run();
            Ok(())
        }
        RunMode::App => {
            let engine =
                Engine::new(cfg.clone(), Box::new(MidirDriver::new()), args.dir.clone())?;
            let mirror = engine.mirror();
            let handle = engine.detach();
            let mut terminal = ratatui::init();
            let mut app = App::new(cfg, args.dir, mirror, handle.cmd_tx, handle.progress_rx);
            let result = app.run(&mut terminal);
            ratatui::restore();
            result.map_err(SeqError::Io)
        }
    }
}
