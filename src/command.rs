//! Envelopes carried from the front-end to the engine, and the one-slot
//! progress channel flowing the other way. Multiple producers may hold a
//! sender; the engine is the only consumer and drains without blocking.

use std::sync::mpsc::{self, Receiver, Sender, SyncSender};

use serde::{Deserialize, Serialize};

use crate::mode::{Indexes, OutMode};
use crate::settings::{Setting, Value};

/// A mode edit: the full public surface of an out-mode instance. Only
/// `name` and `indexes` drive the engine's reconstruction; the remaining
/// fields let any consumer display the envelope without catalog access.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeEnvelope {
    pub name: String,
    pub indexes: Indexes,
    pub labels: Vec<String>,
    pub offsets: Vec<usize>,
    pub data: Vec<Vec<String>>,
    pub vis_ind: [usize; 2],
    pub but_ind: [usize; 2],
    pub instruments: Vec<String>,
    #[serde(default)]
    pub comment: String,
}

impl From<&OutMode> for ModeEnvelope {
    fn from(mode: &OutMode) -> Self {
        let template = mode.template();
        ModeEnvelope {
            name: template.name.clone(),
            indexes: mode.get_indexes(),
            labels: template.labels.clone(),
            offsets: template.offsets.clone(),
            data: template.data.clone(),
            vis_ind: template.vis_ind,
            but_ind: template.but_ind,
            instruments: template.instruments.clone(),
            comment: template.comment.clone(),
        }
    }
}

/// A setting edit, mirroring [`Setting`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingEnvelope {
    pub name: String,
    pub ind: usize,
    pub values: Vec<Value>,
}

impl From<&Setting> for SettingEnvelope {
    fn from(setting: &Setting) -> Self {
        SettingEnvelope {
            name: setting.name.clone(),
            ind: setting.ind,
            values: setting.values.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CopyVariant {
    AsIs,
    Reverse,
    Random,
}

/// One front-end edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Mode(ModeEnvelope),
    Setting(SettingEnvelope),
    /// Copy one part's steps for one mode into the current edit part.
    Copy {
        midi: i32,
        channel: u8,
        part: u8,
        mode: String,
        variant: CopyVariant,
    },
}

/// Engine → front-end heartbeat; the playhead for display.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Progress {
    /// Minimum upcoming step across dispatchers, in step units.
    pub step: f64,
    pub playing: bool,
}

pub fn command_channel() -> (Sender<Command>, Receiver<Command>) {
    mpsc::channel()
}

/// One-slot channel: the engine overwrites by dropping sends that find the
/// slot full, so a slow front-end never backs playback up.
pub fn progress_channel() -> (SyncSender<Progress>, Receiver<Progress>) {
    mpsc::sync_channel(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelopes_survive_serialization() {
        let setting = Setting {
            name: "Tempo".to_string(),
            ind: 3,
            values: vec![Value::Int(50), Value::Int(60)],
        };
        let cmd = Command::Setting(SettingEnvelope::from(&setting));
        let text = serde_json::to_string(&cmd).unwrap();
        let back: Command = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cmd);
    }

    #[test]
    fn progress_channel_never_blocks_the_sender() {
        let (tx, rx) = progress_channel();
        assert!(tx.try_send(Progress { step: 1.0, playing: true }).is_ok());
        // slot full: the engine drops the update instead of waiting
        assert!(tx.try_send(Progress { step: 2.0, playing: true }).is_err());
        assert_eq!(rx.recv().unwrap().step, 1.0);
    }
}
