//! The seam to the concrete MIDI I/O layer: ports are enumerated as
//! `(port_id, name, direction)` descriptors, outputs are byte sinks and
//! inputs are polled byte sources with driver-reported inter-message
//! deltas. The engine owns one sink per output endpoint and one source per
//! input endpoint; handles release on drop.

pub mod midir_backend;
pub mod mock;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub port_id: i32,
    pub name: String,
    pub is_out: bool,
}

pub trait MidiSink: Send {
    fn send(&mut self, message: &[u8]) -> Result<()>;
}

/// One buffered incoming message. `delta` is the driver-reported time since
/// the previous message in nanoseconds, 0 for the first of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    pub bytes: Vec<u8>,
    pub delta: u64,
}

pub trait MidiSource: Send {
    /// Non-blocking: the next buffered message, if any.
    fn poll(&mut self) -> Option<RawMessage>;
}

pub trait MidiDriver: Send {
    fn ports(&mut self) -> Result<Vec<PortDesc>>;
    fn open_output(&mut self, port: &PortDesc) -> Result<Box<dyn MidiSink>>;
    fn open_input(&mut self, port: &PortDesc) -> Result<Box<dyn MidiSource>>;
}

/// Sink for endpoints whose mapping slot matched no physical port; the
/// schedule still runs, the bytes go nowhere.
pub struct NullSink;

impl MidiSink for NullSink {
    fn send(&mut self, _message: &[u8]) -> Result<()> {
        Ok(())
    }
}
