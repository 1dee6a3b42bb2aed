//! In-memory transport and connector.
//!
//! Nothing leaves the process: written frames are kept so they can be
//! decoded again, and responses are injected with
//! [`Connection::receive_response`] or [`Connection::receive_data`].

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::codec::MsgPackCodec;
use crate::connection::Connection;
use crate::error::{FraggleError, Result};
use crate::protocol::FrameBuffer;
use crate::request::RequestRecord;
use crate::scheduler::Scheduler;
use crate::writer::OutboundFrame;

use super::{Connector, Transport};

/// Transport that records every written byte.
#[derive(Default)]
pub struct MemoryTransport {
    written: RefCell<Vec<u8>>,
    closed: Cell<bool>,
    fail_writes: Cell<bool>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// All bytes written so far, prefixes included.
    pub fn written(&self) -> Vec<u8> {
        self.written.borrow().clone()
    }

    /// Decode the written frames back into request records.
    pub fn sent_records(&self) -> Vec<RequestRecord> {
        let mut buffer = FrameBuffer::new();
        let frames = match buffer.push(&self.written.borrow()) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable frames in memory transport");
                return Vec::new();
            }
        };

        frames
            .iter()
            .filter_map(|frame| MsgPackCodec::decode_request(frame).ok())
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Make subsequent writes fail, as a broken stream would.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }
}

impl Transport for MemoryTransport {
    fn write(&self, frame: OutboundFrame) -> Result<()> {
        if self.closed.get() || self.fail_writes.get() {
            return Err(FraggleError::Disconnected);
        }
        let mut written = self.written.borrow_mut();
        written.extend_from_slice(&frame.prefix);
        written.extend_from_slice(&frame.record);
        Ok(())
    }

    fn close(&self) {
        self.closed.set(true);
    }
}

/// Connector handing out [`MemoryTransport`]-backed connections.
#[derive(Default)]
pub struct MemoryConnector {
    dialed: RefCell<Vec<(Connection, Rc<MemoryTransport>)>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses dialed so far, in order.
    pub fn dialed(&self) -> Vec<String> {
        self.dialed.borrow().iter().map(|(cn, _)| cn.addr()).collect()
    }

    /// Transport of the most recent connection.
    pub fn last_transport(&self) -> Option<Rc<MemoryTransport>> {
        self.dialed.borrow().last().map(|(_, t)| t.clone())
    }

    /// Transport backing `cn`, if this connector created it.
    pub fn transport_of(&self, cn: &Connection) -> Option<Rc<MemoryTransport>> {
        self.dialed
            .borrow()
            .iter()
            .find(|(c, _)| c.same_as(cn))
            .map(|(_, t)| t.clone())
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, addr: &str, scheduler: Rc<dyn Scheduler>) -> Connection {
        let transport = Rc::new(MemoryTransport::new());
        let cn = Connection::new(addr, transport.clone(), scheduler);
        self.dialed.borrow_mut().push((cn.clone(), transport));
        cn
    }
}
