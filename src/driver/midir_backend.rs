//! `midir`-backed driver: the production MIDI layer.

use std::sync::mpsc::{self, Receiver};

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use super::{MidiDriver, MidiSink, MidiSource, PortDesc, RawMessage};
use crate::error::{Result, SeqError};

const CLIENT_NAME: &str = "gridseq";

fn driver_err<E: std::fmt::Display>(e: E) -> SeqError {
    SeqError::Driver(e.to_string())
}

pub struct MidirDriver;

impl MidirDriver {
    pub fn new() -> Self {
        MidirDriver
    }
}

impl Default for MidirDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MidiDriver for MidirDriver {
    /// Output ports first, then input ports; ids are the backend's port
    /// positions per direction.
    fn ports(&mut self) -> Result<Vec<PortDesc>> {
        let mut descs = Vec::new();
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(driver_err)?;
        for (i, port) in midi_out.ports().iter().enumerate() {
            descs.push(PortDesc {
                port_id: i as i32,
                name: midi_out.port_name(port).map_err(driver_err)?,
                is_out: true,
            });
        }
        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(driver_err)?;
        midi_in.ignore(Ignore::None);
        for (i, port) in midi_in.ports().iter().enumerate() {
            descs.push(PortDesc {
                port_id: i as i32,
                name: midi_in.port_name(port).map_err(driver_err)?,
                is_out: false,
            });
        }
        Ok(descs)
    }

    fn open_output(&mut self, port: &PortDesc) -> Result<Box<dyn MidiSink>> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(driver_err)?;
        let ports = midi_out.ports();
        let target = ports
            .get(port.port_id as usize)
            .ok_or_else(|| SeqError::Driver(format!("output port {} vanished", port.port_id)))?;
        let conn = midi_out.connect(target, CLIENT_NAME).map_err(driver_err)?;
        log::info!("opened output {} ({})", port.port_id, port.name);
        Ok(Box::new(MidirSink { conn }))
    }

    fn open_input(&mut self, port: &PortDesc) -> Result<Box<dyn MidiSource>> {
        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(driver_err)?;
        midi_in.ignore(Ignore::None);
        let ports = midi_in.ports();
        let target = ports
            .get(port.port_id as usize)
            .ok_or_else(|| SeqError::Driver(format!("input port {} vanished", port.port_id)))?;
        let (tx, rx) = mpsc::channel();
        let conn = midi_in
            .connect(
                target,
                CLIENT_NAME,
                move |stamp_micros, bytes, _| {
                    let _ = tx.send((stamp_micros, bytes.to_vec()));
                },
                (),
            )
            .map_err(driver_err)?;
        log::info!("opened input {} ({})", port.port_id, port.name);
        Ok(Box::new(MidirSource { _conn: conn, rx, last_stamp: None }))
    }
}

struct MidirSink {
    conn: MidiOutputConnection,
}

impl MidiSink for MidirSink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.conn.send(message).map_err(driver_err)
    }
}

struct MidirSource {
    // Held so the callback keeps feeding the channel; closed on drop.
    _conn: MidiInputConnection<()>,
    rx: Receiver<(u64, Vec<u8>)>,
    last_stamp: Option<u64>,
}

impl MidiSource for MidirSource {
    fn poll(&mut self) -> Option<RawMessage> {
        let (stamp, bytes) = self.rx.try_recv().ok()?;
        let delta = match self.last_stamp {
            Some(last) => stamp.saturating_sub(last) * 1_000,
            None => 0,
        };
        self.last_stamp = Some(stamp);
        Some(RawMessage { bytes, delta })
    }
}
