//! Tokio TCP driver.
//!
//! Connections and clients are single-task (`!Send`), so everything here
//! runs on a `tokio::task::LocalSet`:
//! - [`TokioScheduler`] maps turns and timers onto `spawn_local`
//! - [`TcpConnector`] dials with `TcpStream`, pumps reads into the
//!   connection and hands the write half to the writer task
//!
//! # Example
//!
//! ```ignore
//! use fraggle_client::Client;
//!
//! let local = tokio::task::LocalSet::new();
//! local.run_until(async {
//!     let client = Client::builder()
//!         .addrs(["10.0.0.1:8046", "10.0.0.2:8046"])
//!         .build()?;
//!     let req = client.get("/ctl/name", 0)?;
//!     req.on_valid(|res| println!("{:?}", res.value));
//!     Ok::<_, fraggle_client::FraggleError>(())
//! }).await?;
//! ```

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::Notify;

use crate::connection::Connection;
use crate::error::Result;
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::scheduler::{Scheduler, Task};
use crate::writer::{spawn_writer_task, writer_channel, OutboundFrame, WriterConfig, WriterHandle, WriterQueue};

use super::{Connector, Transport};

/// Read buffer size per connection.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Scheduler backed by the current `LocalSet`.
///
/// Must be used from within a `LocalSet`; `spawn_local` panics otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn next_tick(&self, task: Task) {
        tokio::task::spawn_local(async move { task() });
    }

    fn timer(&self, delay: Duration, task: Task) {
        tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            task()
        });
    }
}

/// Write side of a TCP connection.
pub struct TcpTransport {
    writer: WriterHandle,
    shutdown: Arc<Notify>,
}

impl Transport for TcpTransport {
    fn write(&self, frame: OutboundFrame) -> Result<()> {
        self.writer.try_send(frame)
    }

    fn close(&self) {
        self.shutdown.notify_one();
    }
}

/// Connector dialing plain TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    writer_config: WriterConfig,
    max_payload_size: u32,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            writer_config: WriterConfig::default(),
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

impl TcpConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writer_config(mut self, config: WriterConfig) -> Self {
        self.writer_config = config;
        self
    }

    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.max_payload_size = max;
        self
    }
}

impl Connector for TcpConnector {
    fn connect(&self, addr: &str, scheduler: Rc<dyn Scheduler>) -> Connection {
        let (writer, queue) = writer_channel(&self.writer_config);
        let shutdown = Arc::new(Notify::new());
        let transport = Rc::new(TcpTransport {
            writer,
            shutdown: shutdown.clone(),
        });
        let cn = Connection::with_max_payload(addr, transport, scheduler, self.max_payload_size);

        tokio::task::spawn_local(drive(addr.to_string(), cn.clone(), queue, shutdown));
        cn
    }
}

/// Connect, then pump inbound bytes until EOF, error or close.
async fn drive(addr: String, cn: Connection, queue: WriterQueue, shutdown: Arc<Notify>) {
    let stream = tokio::select! {
        res = TcpStream::connect(&addr) => res,
        _ = shutdown.notified() => {
            cn.unbind();
            return;
        }
    };

    let stream = match stream {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(%addr, error = %e, "connect failed");
            cn.unbind();
            return;
        }
    };

    tracing::info!(%addr, "connected");
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%addr, error = %e, "set_nodelay failed");
    }

    let (mut reader, write_half) = stream.into_split();
    let writer_task = spawn_writer_task(write_half, queue);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            res = reader.read(&mut buf) => match res {
                Ok(0) => {
                    tracing::info!(%addr, "connection closed by peer");
                    break;
                }
                Ok(n) => cn.receive_data(&buf[..n]),
                Err(e) => {
                    tracing::warn!(%addr, error = %e, "read failed");
                    break;
                }
            },
            _ = shutdown.notified() => break,
        }

        if cn.is_errored() {
            break;
        }
    }

    writer_task.abort();
    cn.unbind();
}
