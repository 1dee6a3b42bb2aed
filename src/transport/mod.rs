//! Transport module - the byte-stream and connect collaborators.
//!
//! The core only needs two narrow seams:
//! - [`Transport`]: fire-and-forget writes plus close
//! - [`Connector`]: build a [`Connection`] to a candidate address
//!
//! Inbound bytes are pushed into [`Connection::receive_data`] by whoever
//! owns the read side.
//!
//! Provided implementations:
//! - [`MemoryTransport`] / [`MemoryConnector`]: in-memory, records writes
//! - [`TcpConnector`] / [`TokioScheduler`]: tokio TCP driver on a `LocalSet`

mod memory;
mod tcp;

use std::rc::Rc;

use crate::connection::Connection;
use crate::error::Result;
use crate::scheduler::Scheduler;
use crate::writer::OutboundFrame;

pub use memory::{MemoryConnector, MemoryTransport};
pub use tcp::{TcpConnector, TcpTransport, TokioScheduler};

/// Outbound side of a byte stream.
pub trait Transport {
    /// Queue a frame for writing. Never blocks.
    fn write(&self, frame: OutboundFrame) -> Result<()>;

    /// Close the stream. Inbound delivery stops.
    fn close(&self);
}

/// Establishes connections to candidate addresses.
pub trait Connector {
    /// Create a connection to `addr`. Connecting may complete later; writes
    /// made in the meantime are buffered, and failure unbinds the connection.
    fn connect(&self, addr: &str, scheduler: Rc<dyn Scheduler>) -> Connection;
}
