//! Requests and their callback registries.
//!
//! A [`Request`] is built by value, then turned into a shared
//! [`RequestHandle`] when it is submitted. The handle is what the
//! connection, the client's retry set and the caller all hold, so the
//! client can advance `rev`/`offset` in place between replays.
//!
//! # Example
//!
//! ```
//! use fraggle_client::{Request, Verb};
//!
//! let req = Request::new(Verb::Walk)
//!     .path("/foo/*")
//!     .rev(4)
//!     .on_valid(|res| println!("got {:?}", res.path))
//!     .on_done(|| println!("walk finished"));
//!
//! assert_eq!(req.verb(), Verb::Walk);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{FraggleError, Result};
use crate::response::Response;

/// Verbs understood by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Verb {
    Get,
    Set,
    Del,
    Rev,
    Nop,
    Walk,
    GetDir,
    Stat,
}

impl Verb {
    /// Verbs that page through results with an offset cursor.
    pub fn paginates(self) -> bool {
        matches!(self, Verb::Walk | Verb::GetDir)
    }
}

impl From<Verb> for i32 {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Get => 1,
            Verb::Set => 2,
            Verb::Del => 3,
            Verb::Rev => 5,
            Verb::Nop => 7,
            Verb::Walk => 9,
            Verb::GetDir => 14,
            Verb::Stat => 16,
        }
    }
}

impl TryFrom<i32> for Verb {
    type Error = FraggleError;

    fn try_from(code: i32) -> Result<Self> {
        Ok(match code {
            1 => Verb::Get,
            2 => Verb::Set,
            3 => Verb::Del,
            5 => Verb::Rev,
            7 => Verb::Nop,
            9 => Verb::Walk,
            14 => Verb::GetDir,
            16 => Verb::Stat,
            other => return Err(FraggleError::Protocol(format!("Unknown verb {}", other))),
        })
    }
}

/// The request as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub tag: u32,
    pub verb: Verb,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

type ValidFn = Box<dyn FnMut(&Response)>;
type ErrorFn = Box<dyn FnMut(&FraggleError)>;
type DoneFn = Box<dyn FnOnce()>;

/// Ordered handler lists. `done` is singular and fires at most once.
#[derive(Default)]
struct Callbacks {
    valid: Vec<ValidFn>,
    error: Vec<ErrorFn>,
    done: Option<DoneFn>,
    resolved: bool,
}

/// A request under construction.
pub struct Request {
    verb: Verb,
    path: Option<String>,
    value: Option<Bytes>,
    rev: Option<i64>,
    offset: u64,
    tag: Option<u32>,
    callbacks: Callbacks,
}

impl Request {
    pub fn new(verb: Verb) -> Self {
        Self {
            verb,
            path: None,
            value: None,
            rev: None,
            offset: 0,
            tag: None,
            callbacks: Callbacks::default(),
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn value(mut self, value: impl Into<Bytes>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Positive values are a causal precondition; zero and negatives mean "latest".
    pub fn rev(mut self, rev: i64) -> Self {
        self.rev = Some(rev);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Register a handler for every VALID delivery.
    pub fn on_valid(mut self, f: impl FnMut(&Response) + 'static) -> Self {
        self.callbacks.valid.push(Box::new(f));
        self
    }

    /// Register a handler for the resolving error, if any.
    pub fn on_error(mut self, f: impl FnMut(&FraggleError) + 'static) -> Self {
        self.callbacks.error.push(Box::new(f));
        self
    }

    /// Set the done handler, replacing any earlier one.
    pub fn on_done(mut self, f: impl FnOnce() + 'static) -> Self {
        self.callbacks.done = Some(Box::new(f));
        self
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("verb", &self.verb)
            .field("path", &self.path)
            .field("rev", &self.rev)
            .field("offset", &self.offset)
            .field("tag", &self.tag)
            .field("resolved", &self.callbacks.resolved)
            .finish()
    }
}

/// Shared handle to a submitted request.
///
/// Cloning is cheap and every clone sees the same `rev`, `offset` and tag.
#[derive(Clone, Debug)]
pub struct RequestHandle(Rc<RefCell<Request>>);

impl From<Request> for RequestHandle {
    fn from(req: Request) -> Self {
        RequestHandle(Rc::new(RefCell::new(req)))
    }
}

impl RequestHandle {
    pub fn verb(&self) -> Verb {
        self.0.borrow().verb
    }

    pub fn path(&self) -> Option<String> {
        self.0.borrow().path.clone()
    }

    pub fn value(&self) -> Option<Bytes> {
        self.0.borrow().value.clone()
    }

    pub fn rev(&self) -> Option<i64> {
        self.0.borrow().rev
    }

    pub fn offset(&self) -> u64 {
        self.0.borrow().offset
    }

    /// The tag assigned by the connection, or `None` if never sent.
    pub fn tag(&self) -> Option<u32> {
        self.0.borrow().tag
    }

    /// True once the done handler has fired (or would have).
    pub fn is_resolved(&self) -> bool {
        self.0.borrow().callbacks.resolved
    }

    /// Replay on an unchanged precondition is safe only for a definite revision.
    pub fn has_precise_rev(&self) -> bool {
        self.rev().is_some_and(|rev| rev > 0)
    }

    pub fn same_as(&self, other: &RequestHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn on_valid(&self, f: impl FnMut(&Response) + 'static) {
        self.0.borrow_mut().callbacks.valid.push(Box::new(f));
    }

    pub fn on_error(&self, f: impl FnMut(&FraggleError) + 'static) {
        self.0.borrow_mut().callbacks.error.push(Box::new(f));
    }

    pub fn on_done(&self, f: impl FnOnce() + 'static) {
        self.0.borrow_mut().callbacks.done = Some(Box::new(f));
    }

    pub(crate) fn set_tag(&self, tag: u32) {
        self.0.borrow_mut().tag = Some(tag);
    }

    pub(crate) fn clear_tag(&self) {
        self.0.borrow_mut().tag = None;
    }

    /// Wire record for the current state. Requires an assigned tag.
    pub(crate) fn record(&self) -> Result<RequestRecord> {
        let req = self.0.borrow();
        let tag = req
            .tag
            .ok_or_else(|| FraggleError::Protocol("Request has no tag".to_string()))?;
        let offset = (req.verb.paginates() || req.offset != 0).then_some(req.offset);

        Ok(RequestRecord {
            tag,
            verb: req.verb,
            path: req.path.clone(),
            value: req.value.clone(),
            rev: req.rev,
            offset,
        })
    }

    /// Advance consistency state from a VALID delivery.
    ///
    /// `rev` only moves forward; `offset` counts consumed items.
    pub(crate) fn observe(&self, res: &Response) {
        let mut req = self.0.borrow_mut();
        if let Some(seen) = res.rev {
            req.rev = Some(req.rev.map_or(seen, |rev| rev.max(seen)));
        }
        req.offset += 1;
    }

    pub(crate) fn fire_valid(&self, res: &Response) {
        let mut handlers = {
            let mut req = self.0.borrow_mut();
            if req.callbacks.resolved {
                return;
            }
            std::mem::take(&mut req.callbacks.valid)
        };

        for handler in handlers.iter_mut() {
            handler(res);
        }

        // Keep registration order; anything added by a handler goes last.
        let mut req = self.0.borrow_mut();
        if req.callbacks.resolved {
            return;
        }
        handlers.append(&mut req.callbacks.valid);
        req.callbacks.valid = handlers;
    }

    /// Fire the error handlers, then resolve.
    pub(crate) fn fail(&self, err: &FraggleError) {
        let mut handlers = {
            let mut req = self.0.borrow_mut();
            if req.callbacks.resolved {
                return;
            }
            std::mem::take(&mut req.callbacks.error)
        };

        for handler in handlers.iter_mut() {
            handler(err);
        }

        self.resolve();
    }

    /// Fire the done handler exactly once and drop every other handler.
    pub(crate) fn resolve(&self) {
        let done = {
            let mut req = self.0.borrow_mut();
            if req.callbacks.resolved {
                return;
            }
            req.callbacks.resolved = true;
            req.callbacks.valid.clear();
            req.callbacks.error.clear();
            req.callbacks.done.take()
        };

        if let Some(done) = done {
            done();
        }
    }
}
