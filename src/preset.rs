//! Preset documents on disk: one directory per document type under the
//! working directory, one YAML file per name. Loads validate structurally
//! and leave in-memory state untouched on mismatch; saves overwrite by
//! name. Playback never writes here — only explicit save commands do.

use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::RunConfig;
use crate::defaults;
use crate::error::{Result, SeqError};
use crate::mapping::Mappings;
use crate::mode::input::InModeTemplate;
use crate::mode::out::OutModeTemplate;
use crate::pattern::Music;

pub const MAPPINGS_DIR: &str = "MMappings";
pub const OUT_MODES_DIR: &str = "MOutFunctionality";
pub const IN_MODES_DIR: &str = "MInFunctionality";
pub const MUSIC_DIR: &str = "MMusic";

fn doc_path(root: &Path, type_dir: &str, name: &str) -> PathBuf {
    root.join(type_dir).join(format!("{name}.yaml"))
}

fn write_doc<T: Serialize>(root: &Path, type_dir: &str, name: &str, doc: &T) -> Result<()> {
    fs::create_dir_all(root.join(type_dir))?;
    let path = doc_path(root, type_dir, name);
    let file = BufWriter::new(fs::File::create(&path)?);
    serde_yaml::to_writer(file, doc).map_err(|_| SeqError::PresetWrite(name.to_string()))?;
    log::info!("saved {type_dir}/{name}");
    Ok(())
}

fn read_doc<T: DeserializeOwned>(
    root: &Path,
    type_dir: &'static str,
    name: &str,
) -> Result<T> {
    let path = doc_path(root, type_dir, name);
    let text = fs::read_to_string(&path)?;
    serde_yaml::from_str(&text).map_err(|e| SeqError::PresetTypeMismatch {
        expected: type_dir,
        path,
        reason: e.to_string(),
    })
}

pub fn save_mappings(root: &Path, mappings: &Mappings) -> Result<()> {
    write_doc(root, MAPPINGS_DIR, &mappings.name, mappings)
}

pub fn load_mappings(root: &Path, name: &str, cfg: &RunConfig) -> Result<Mappings> {
    let mappings: Mappings = read_doc(root, MAPPINGS_DIR, name)?;
    Ok(mappings.normalized(cfg))
}

pub fn save_music(root: &Path, music: &Music) -> Result<()> {
    write_doc(root, MUSIC_DIR, &music.name, music)
}

pub fn load_music(root: &Path, name: &str) -> Result<Music> {
    read_doc(root, MUSIC_DIR, name)
}

pub fn save_out_mode(root: &Path, template: &OutModeTemplate) -> Result<()> {
    write_doc(root, OUT_MODES_DIR, &template.name, template)
}

pub fn load_out_mode(root: &Path, name: &str) -> Result<OutModeTemplate> {
    let template: OutModeTemplate = read_doc(root, OUT_MODES_DIR, name)?;
    template.validate().map_err(|e| SeqError::PresetTypeMismatch {
        expected: OUT_MODES_DIR,
        path: doc_path(root, OUT_MODES_DIR, name),
        reason: e.to_string(),
    })?;
    Ok(template)
}

pub fn save_in_mode(root: &Path, template: &InModeTemplate) -> Result<()> {
    write_doc(root, IN_MODES_DIR, &template.name, template)
}

pub fn load_in_mode(root: &Path, name: &str) -> Result<InModeTemplate> {
    read_doc(root, IN_MODES_DIR, name)
}

/// Writes every built-in document; the `-c presets` run mode.
pub fn write_all_defaults(root: &Path, cfg: &RunConfig) -> Result<()> {
    for template in defaults::out_templates(cfg) {
        save_out_mode(root, &template)?;
    }
    for template in defaults::in_templates() {
        save_in_mode(root, &template)?;
    }
    for mappings in defaults::mappings_bank(cfg) {
        save_mappings(root, &mappings)?;
    }
    save_music(root, &defaults::starter_music(cfg))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documents_round_trip_structurally() {
        let cfg = RunConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_all_defaults(root, &cfg).unwrap();

        let mappings = load_mappings(root, "Mappings_00", &cfg).unwrap();
        assert_eq!(mappings, defaults::mappings_bank(&cfg).remove(0));

        let music = load_music(root, "Music_00").unwrap();
        assert_eq!(music, defaults::starter_music(&cfg));

        for template in defaults::out_templates(&cfg) {
            assert_eq!(load_out_mode(root, &template.name).unwrap(), template);
        }
        for template in defaults::in_templates() {
            assert_eq!(load_in_mode(root, &template.name).unwrap(), template);
        }
    }

    #[test]
    fn shape_mismatch_names_the_expected_type() {
        let cfg = RunConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write_all_defaults(root, &cfg).unwrap();
        // a music document dropped into the mappings directory
        fs::create_dir_all(root.join(MAPPINGS_DIR)).unwrap();
        fs::copy(
            doc_path(root, MUSIC_DIR, "Music_00"),
            doc_path(root, MAPPINGS_DIR, "Imposter"),
        )
        .unwrap();
        match load_mappings(root, "Imposter", &cfg) {
            Err(SeqError::PresetTypeMismatch { expected, .. }) => {
                assert_eq!(expected, MAPPINGS_DIR)
            }
            other => panic!("expected a type mismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_documents_surface_as_io_errors() {
        let cfg = RunConfig::default();
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_mappings(dir.path(), "Nope", &cfg),
            Err(SeqError::Io(_))
        ));
    }
}
