//! Connection table binding logical MIDI ids to physical ports, channels,
//! directions and instrument tags. Rebuilt whenever a mapping document is
//! loaded; consulted by the engine to decide which out modes each endpoint
//! may emit and which in modes each input port runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::driver::PortDesc;
use crate::error::{Result, SeqError};
use crate::mode::Catalog;
use crate::settings::Value;

/// One connection slot. Empty slots keep the `-1` / empty-string sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conn {
    pub midi_id: i32,
    pub port_name: String,
    pub channel: i32,
    pub is_out: bool,
    pub instruments: Vec<String>,
}

impl Default for Conn {
    fn default() -> Self {
        Conn {
            midi_id: -1,
            port_name: String::new(),
            channel: -1,
            is_out: true,
            instruments: Vec::new(),
        }
    }
}

impl Conn {
    pub fn is_empty(&self) -> bool {
        self.midi_id < 0
    }
}

/// Editable fields of a connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnField {
    MidiId,
    PortName,
    Channel,
    Direction,
    Instr(usize),
}

/// A logical endpoint after port binding: one midi id, its physical port
/// (`-1` when off), and every channel its slots claim.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub midi_id: i32,
    pub port_id: i32,
    pub port_name: String,
    pub is_out: bool,
    pub channels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mappings {
    pub name: String,
    #[serde(default)]
    pub comment: String,
    pub conns: Vec<Conn>,
}

impl Mappings {
    /// Pads the slot list to `max_conns` and every instrument list to
    /// `max_instr`, the shape the documents carry on disk.
    pub fn normalized(mut self, cfg: &RunConfig) -> Self {
        self.conns.truncate(cfg.max_conns);
        while self.conns.len() < cfg.max_conns {
            self.conns.push(Conn::default());
        }
        for conn in &mut self.conns {
            conn.instruments.truncate(cfg.max_instr);
            while conn.instruments.len() < cfg.max_instr {
                conn.instruments.push(String::new());
            }
        }
        self
    }

    pub fn sorted(&self) -> Vec<&Conn> {
        let mut conns: Vec<&Conn> = self.conns.iter().collect();
        conns.sort_by_key(|c| c.midi_id);
        conns
    }

    /// Binds physical ports to slots: scan ports in enumeration order, each
    /// binding the first unbound slot with matching `(port_name, is_out)`.
    /// Returns the bound port id per slot, `-1` where no port matched.
    fn bind_ports(&self, ports: &[PortDesc]) -> Vec<i32> {
        let mut bound = vec![-1; self.conns.len()];
        for port in ports {
            for (j, conn) in self.conns.iter().enumerate() {
                if bound[j] < 0
                    && !conn.is_empty()
                    && conn.port_name == port.name
                    && conn.is_out == port.is_out
                {
                    bound[j] = port.port_id;
                    break;
                }
            }
        }
        bound
    }

    fn endpoints(&self, ports: &[PortDesc], want_out: bool) -> BTreeMap<i32, Endpoint> {
        let bound = self.bind_ports(ports);
        let mut endpoints: BTreeMap<i32, Endpoint> = BTreeMap::new();
        for (j, conn) in self.conns.iter().enumerate() {
            if conn.is_empty() || conn.is_out != want_out {
                continue;
            }
            let endpoint = endpoints.entry(conn.midi_id).or_insert_with(|| Endpoint {
                midi_id: conn.midi_id,
                port_id: -1,
                port_name: conn.port_name.clone(),
                is_out: want_out,
                channels: Vec::new(),
            });
            if endpoint.port_id < 0 && bound[j] >= 0 {
                endpoint.port_id = bound[j];
                endpoint.port_name = conn.port_name.clone();
            }
            if conn.channel > 0 {
                let channel = conn.channel as u8;
                if !endpoint.channels.contains(&channel) {
                    endpoint.channels.push(channel);
                }
            }
        }
        endpoints
    }

    pub fn init_midi_outs(&self, ports: &[PortDesc]) -> BTreeMap<i32, Endpoint> {
        self.endpoints(ports, true)
    }

    pub fn init_midi_ins(&self, ports: &[PortDesc]) -> BTreeMap<i32, Endpoint> {
        self.endpoints(ports, false)
    }

    /// Inverts the registry against the catalog: which out modes each
    /// `(midi_id, channel)` pair may carry. This is the authority for
    /// pattern-store population.
    pub fn to_out_dict(&self, catalog: &Catalog) -> BTreeMap<i32, BTreeMap<u8, Vec<String>>> {
        let mut dict: BTreeMap<i32, BTreeMap<u8, Vec<String>>> = BTreeMap::new();
        for conn in &self.conns {
            if conn.is_empty() || conn.channel <= 0 || !conn.is_out {
                continue;
            }
            let modes = catalog.out_names_for_instruments(&conn.instruments);
            let slot = dict
                .entry(conn.midi_id)
                .or_default()
                .entry(conn.channel as u8)
                .or_default();
            for mode in modes {
                if !slot.contains(&mode) {
                    slot.push(mode);
                }
            }
        }
        dict
    }

    /// Out modes an output endpoint may emit, across all its slots.
    pub fn out_modes_for_midi(&self, midi_id: i32, catalog: &Catalog) -> Vec<String> {
        let mut modes = Vec::new();
        for conn in &self.conns {
            if conn.midi_id == midi_id && conn.is_out {
                for mode in catalog.out_names_for_instruments(&conn.instruments) {
                    if !modes.contains(&mode) {
                        modes.push(mode);
                    }
                }
            }
        }
        modes
    }

    /// In modes an input endpoint runs, across all its slots.
    pub fn in_modes_for_midi(&self, midi_id: i32, catalog: &Catalog) -> Vec<String> {
        let mut modes = Vec::new();
        for conn in &self.conns {
            if conn.midi_id == midi_id && !conn.is_out {
                for mode in catalog.in_names_for_instruments(&conn.instruments) {
                    if !modes.contains(&mode) {
                        modes.push(mode);
                    }
                }
            }
        }
        modes
    }

    /// Applies one front-end edit to a slot field.
    pub fn edit_slot(&mut self, conn_id: usize, field: ConnField, value: &Value) -> Result<()> {
        let conn = self
            .conns
            .get_mut(conn_id)
            .ok_or(SeqError::SlotMissing)?;
        match field {
            ConnField::MidiId => conn.midi_id = value.as_int().unwrap_or(-1) as i32,
            ConnField::PortName => conn.port_name = value.to_string(),
            ConnField::Channel => conn.channel = value.as_int().unwrap_or(-1) as i32,
            ConnField::Direction => conn.is_out = value.to_string() == "True",
            ConnField::Instr(i) => {
                if i < conn.instruments.len() {
                    conn.instruments[i] = value.to_string();
                } else {
                    return Err(SeqError::SlotMissing);
                }
            }
        }
        Ok(())
    }
}
