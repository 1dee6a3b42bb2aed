//! # fraggle-client
//!
//! Rust client for a doozer-style coordination service.
//!
//! Requests are multiplexed over one stream connection by tag and travel
//! as length-prefixed MessagePack records. The [`Client`] layers failover
//! and retry on top of a [`Connection`]:
//! - `send`: no retry; connection loss resolves with `Disconnected`
//! - `resend`: replayed after every reconnect until resolved
//! - `idemp`: replayed only when conditioned on a definite revision
//!
//! Everything runs on one logical task. Time and deferred work go through
//! the [`scheduler::Scheduler`] seam, bytes through the
//! [`transport::Transport`] seam, so the core can be driven by tokio
//! ([`transport::TcpConnector`]) or by hand in tests
//! ([`transport::MemoryConnector`], [`scheduler::ManualScheduler`]).
//!
//! ## Architecture
//!
//! ```text
//! Client ──► Connection::send ──► Transport::write ──► stream
//!   ▲                                                   │
//!   └── valid/error/done ◄── tag dispatch ◄── FrameBuffer
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use fraggle_client::Client;
//!
//! let local = tokio::task::LocalSet::new();
//! local
//!     .run_until(async {
//!         let client = Client::builder()
//!             .addrs(["10.0.0.1:8046", "10.0.0.2:8046"])
//!             .build()?;
//!
//!         let req = client.get("/ctl/node", 0)?;
//!         req.on_valid(|res| println!("{:?} @ {:?}", res.value, res.rev));
//!         req.on_error(|err| eprintln!("get failed: {err}"));
//!         Ok::<_, fraggle_client::FraggleError>(())
//!     })
//!     .await?;
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod request;
pub mod responder;
pub mod response;
pub mod scheduler;
pub mod transport;
pub mod writer;

mod client;

pub use client::{Client, ClientBuilder, ClientConfig};
pub use connection::Connection;
pub use error::{FraggleError, Result};
pub use request::{Request, RequestHandle, Verb};
pub use responder::{Event, Responder, Value};
pub use response::{ErrCode, Response};
