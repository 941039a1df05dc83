//! In-memory driver for the test suites: scripted inputs, captured outputs,
//! no hardware and no clocks.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use super::{MidiDriver, MidiSink, MidiSource, PortDesc, RawMessage};
use crate::error::Result;

#[derive(Clone, Default)]
pub struct MockDriver {
    ports: Vec<PortDesc>,
    sent: Arc<Mutex<BTreeMap<i32, Vec<Vec<u8>>>>>,
    queues: Arc<Mutex<BTreeMap<i32, VecDeque<RawMessage>>>>,
}

impl MockDriver {
    pub fn new(ports: Vec<PortDesc>) -> Self {
        MockDriver { ports, ..MockDriver::default() }
    }

    /// Everything transmitted on an output port so far.
    pub fn sent_on(&self, port_id: i32) -> Vec<Vec<u8>> {
        self.sent
            .lock()
            .unwrap()
            .get(&port_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Forgets captured output, for assertions scoped to one test phase.
    pub fn clear_sent(&self) {
        self.sent.lock().unwrap().clear();
    }

    /// Scripts one incoming message on an input port.
    pub fn push_input(&self, port_id: i32, bytes: &[u8], delta: u64) {
        self.queues
            .lock()
            .unwrap()
            .entry(port_id)
            .or_default()
            .push_back(RawMessage { bytes: bytes.to_vec(), delta });
    }
}

impl MidiDriver for MockDriver {
    fn ports(&mut self) -> Result<Vec<PortDesc>> {
        Ok(self.ports.clone())
    }

    fn open_output(&mut self, port: &PortDesc) -> Result<Box<dyn MidiSink>> {
        Ok(Box::new(MockSink {
            port_id: port.port_id,
            sent: Arc::clone(&self.sent),
        }))
    }

    fn open_input(&mut self, port: &PortDesc) -> Result<Box<dyn MidiSource>> {
        Ok(Box::new(MockSource {
            port_id: port.port_id,
            queues: Arc::clone(&self.queues),
        }))
    }
}

pub struct MockSink {
    port_id: i32,
    sent: Arc<Mutex<BTreeMap<i32, Vec<Vec<u8>>>>>,
}

impl MidiSink for MockSink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.sent
            .lock()
            .unwrap()
            .entry(self.port_id)
            .or_default()
            .push(message.to_vec());
        Ok(())
    }
}

pub struct MockSource {
    port_id: i32,
    queues: Arc<Mutex<BTreeMap<i32, VecDeque<RawMessage>>>>,
}

impl MidiSource for MockSource {
    fn poll(&mut self) -> Option<RawMessage> {
        self.queues
            .lock()
            .unwrap()
            .get_mut(&self.port_id)
            .and_then(VecDeque::pop_front)
    }
}
