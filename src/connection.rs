//! Tag multiplexer over one stream connection.
//!
//! A [`Connection`] assigns each request a tag, writes it as a
//! length-prefixed record, and routes responses back by tag.
//!
//! # Dispatch contract
//!
//! Each registration gets at most one dispatch. The entry for a tag is
//! removed on the *first* response for it, DONE or not. A caller that
//! expects several VALID deliveries must [`Connection::rearm`] after each
//! partial one; the client layer does exactly that.
//!
//! On teardown ([`Connection::unbind`]) every outstanding registration
//! receives [`Response::disconnected`] once and the map is emptied.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;

use crate::codec::MsgPackCodec;
use crate::error::{FraggleError, Result};
use crate::protocol::{FrameBuffer, DEFAULT_MAX_PAYLOAD_SIZE};
use crate::request::RequestHandle;
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::transport::Transport;
use crate::writer::OutboundFrame;

/// Tags live in `0..2^31`.
pub const TAG_SPACE: u32 = 1 << 31;

/// Callback receiving the single dispatch for one registration.
pub type OnResponse = Box<dyn FnOnce(Response)>;

struct Pending {
    request: RequestHandle,
    on_response: OnResponse,
}

struct ConnectionState {
    addr: String,
    outstanding: BTreeMap<u32, Pending>,
    buffer: FrameBuffer,
    errored: bool,
}

impl ConnectionState {
    /// Lowest tag not currently outstanding.
    fn allocate_tag(&self) -> Option<u32> {
        let mut tag = 0;
        for &used in self.outstanding.keys() {
            if used != tag {
                break;
            }
            tag += 1;
        }
        (tag < TAG_SPACE).then_some(tag)
    }
}

/// One logical connection to one server address.
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct Connection {
    state: Rc<RefCell<ConnectionState>>,
    transport: Rc<dyn Transport>,
    scheduler: Rc<dyn Scheduler>,
}

impl Connection {
    pub fn new(
        addr: impl Into<String>,
        transport: Rc<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        Self::with_max_payload(addr, transport, scheduler, DEFAULT_MAX_PAYLOAD_SIZE)
    }

    /// Create a connection whose frame buffer rejects records above `max_payload_size`.
    pub fn with_max_payload(
        addr: impl Into<String>,
        transport: Rc<dyn Transport>,
        scheduler: Rc<dyn Scheduler>,
        max_payload_size: u32,
    ) -> Self {
        Self {
            state: Rc::new(RefCell::new(ConnectionState {
                addr: addr.into(),
                outstanding: BTreeMap::new(),
                buffer: FrameBuffer::with_max_payload(max_payload_size),
                errored: false,
            })),
            transport,
            scheduler,
        }
    }

    pub fn addr(&self) -> String {
        self.state.borrow().addr.clone()
    }

    pub fn is_errored(&self) -> bool {
        self.state.borrow().errored
    }

    /// Number of registrations awaiting a response.
    pub fn outstanding(&self) -> usize {
        self.state.borrow().outstanding.len()
    }

    pub fn same_as(&self, other: &Connection) -> bool {
        Rc::ptr_eq(&self.state, &other.state)
    }

    /// Tag, register and write `request`.
    ///
    /// On an errored connection the request is returned untouched and
    /// `on_response` receives `Disconnected` on the next scheduling turn.
    ///
    /// # Errors
    ///
    /// `AlreadySent` if the request carries a tag; encode errors otherwise.
    pub fn send(&self, request: RequestHandle, on_response: OnResponse) -> Result<RequestHandle> {
        if let Some(tag) = request.tag() {
            return Err(FraggleError::AlreadySent { tag });
        }

        if self.is_errored() {
            self.defer_disconnected(on_response);
            return Ok(request);
        }

        let tag = self
            .state
            .borrow()
            .allocate_tag()
            .ok_or_else(|| FraggleError::Protocol("Tag space exhausted".to_string()))?;
        request.set_tag(tag);

        let record = match request
            .record()
            .and_then(|record| MsgPackCodec::encode_request(&record))
        {
            Ok(record) => record,
            Err(e) => {
                request.clear_tag();
                return Err(e);
            }
        };

        self.state.borrow_mut().outstanding.insert(
            tag,
            Pending {
                request: request.clone(),
                on_response,
            },
        );

        if let Err(e) = self.transport.write(OutboundFrame::new(Bytes::from(record))) {
            tracing::warn!(addr = %self.addr(), error = %e, "write failed, tearing down connection");
            let cn = self.clone();
            self.scheduler.next_tick(Box::new(move || cn.unbind()));
        }

        Ok(request)
    }

    /// Register `request` again under its existing tag, without writing.
    ///
    /// Used after a VALID delivery that was not DONE.
    pub fn rearm(&self, request: RequestHandle, on_response: OnResponse) -> Result<()> {
        let tag = request
            .tag()
            .ok_or_else(|| FraggleError::Protocol("Cannot rearm an unsent request".to_string()))?;

        if self.is_errored() {
            self.defer_disconnected(on_response);
            return Ok(());
        }

        self.state.borrow_mut().outstanding.insert(
            tag,
            Pending {
                request,
                on_response,
            },
        );
        Ok(())
    }

    /// Feed raw bytes from the transport.
    ///
    /// A framing or decode failure unbinds the connection.
    pub fn receive_data(&self, data: &[u8]) {
        let frames = {
            let mut state = self.state.borrow_mut();
            if state.errored {
                return;
            }
            state.buffer.push(data)
        };

        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(addr = %self.addr(), error = %e, "framing error");
                self.unbind();
                return;
            }
        };

        for frame in frames {
            match MsgPackCodec::decode_response(&frame) {
                Ok(res) => self.receive_response(res),
                Err(e) => {
                    tracing::warn!(addr = %self.addr(), error = %e, "undecodable response");
                    self.unbind();
                    return;
                }
            }
        }
    }

    /// Route one decoded response to its registration, if any.
    pub fn receive_response(&self, res: Response) {
        let pending = {
            let mut state = self.state.borrow_mut();
            if state.errored {
                return;
            }
            state.outstanding.remove(&res.tag)
        };

        match pending {
            Some(pending) => (pending.on_response)(res),
            None => tracing::debug!(tag = res.tag, "dropping response for unknown tag"),
        }
    }

    /// Mark the connection errored and disconnect every registration.
    pub fn unbind(&self) {
        let pending = {
            let mut state = self.state.borrow_mut();
            state.errored = true;
            state.buffer.clear();
            std::mem::take(&mut state.outstanding)
        };

        tracing::debug!(addr = %self.addr(), outstanding = pending.len(), "connection unbound");

        for (_, pending) in pending {
            (pending.on_response)(Response::disconnected());
        }
    }

    /// Close the transport, then unbind.
    pub fn close(&self) {
        tracing::info!(addr = %self.addr(), "closing connection");
        self.transport.close();
        self.unbind();
    }

    fn defer_disconnected(&self, on_response: OnResponse) {
        self.scheduler
            .next_tick(Box::new(move || on_response(Response::disconnected())));
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Connection")
            .field("addr", &state.addr)
            .field("outstanding", &state.outstanding.len())
            .field("errored", &state.errored)
            .finish()
    }
}
