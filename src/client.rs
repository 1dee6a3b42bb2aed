//! Client: failover, idempotent retry and consistency tracking.
//!
//! The [`Client`] owns the candidate address list and the active
//! [`Connection`]. Every submitted request falls into one retry policy:
//!
//! | mode     | replayed after reconnect?                        |
//! |----------|--------------------------------------------------|
//! | `send`   | never; resolves with `Disconnected`              |
//! | `resend` | always, with its current `rev`/`offset`          |
//! | `idemp`  | only if `rev` is a definite revision (`> 0`)     |
//!
//! VALID deliveries advance the request in place: `rev` moves to the
//! newest revision seen and `offset` counts delivered items, so a replayed
//! walk resumes where it stopped.
//!
//! On connection loss (close, transport failure or a READONLY answer) the
//! client drops the failed address, dials the next candidate exactly once,
//! fails the non-retryable requests and replays the rest.
//!
//! # Example
//!
//! ```
//! use std::rc::Rc;
//! use fraggle_client::scheduler::ManualScheduler;
//! use fraggle_client::transport::MemoryConnector;
//! use fraggle_client::Client;
//!
//! let connector = Rc::new(MemoryConnector::new());
//! let client = Client::builder()
//!     .addrs(["1.1.1.1:1", "2.2.2.2:2"])
//!     .connector(connector.clone())
//!     .scheduler(Rc::new(ManualScheduler::new()))
//!     .build()
//!     .unwrap();
//!
//! let req = client.get("/foo", 0).unwrap();
//! assert_eq!(req.tag(), Some(0));
//! assert_eq!(client.current_addr(), "1.1.1.1:1");
//! ```

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::time::Duration;

use bytes::Bytes;

use crate::connection::{Connection, OnResponse};
use crate::error::{FraggleError, Result};
use crate::protocol::DEFAULT_MAX_PAYLOAD_SIZE;
use crate::request::{Request, RequestHandle, Verb};
use crate::response::Response;
use crate::scheduler::Scheduler;
use crate::transport::{Connector, TcpConnector, TokioScheduler};

/// Default initial delay before retrying when no address is left.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// Default cap for the reconnect backoff.
pub const DEFAULT_MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Reconnect tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// First delay after the candidate list runs dry.
    pub reconnect_delay: Duration,
    /// Upper bound for the doubling delay.
    pub max_reconnect_delay: Duration,
    /// Largest inbound record accepted by the default TCP connector.
    pub max_payload_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_delay: DEFAULT_MAX_RECONNECT_DELAY,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// Without an explicit connector/scheduler the client uses
/// [`TcpConnector`] and [`TokioScheduler`], and `build` must then run
/// inside a `tokio::task::LocalSet`.
pub struct ClientBuilder {
    addrs: Vec<String>,
    connector: Option<Rc<dyn Connector>>,
    scheduler: Option<Rc<dyn Scheduler>>,
    config: ClientConfig,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            addrs: Vec::new(),
            connector: None,
            scheduler: None,
            config: ClientConfig::default(),
        }
    }

    /// Append one candidate address.
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }

    /// Append candidate addresses, in priority order.
    pub fn addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs.extend(addrs.into_iter().map(Into::into));
        self
    }

    pub fn connector(mut self, connector: Rc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Default: 100ms
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.reconnect_delay = delay;
        self
    }

    /// Default: 30s
    pub fn max_reconnect_delay(mut self, delay: Duration) -> Self {
        self.config.max_reconnect_delay = delay;
        self
    }

    /// Default: 64 MiB. Only applies when no connector is given.
    pub fn max_payload_size(mut self, max: u32) -> Self {
        self.config.max_payload_size = max;
        self
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to the first candidate and return the client.
    ///
    /// # Errors
    ///
    /// `NoAddresses` if no candidate was given.
    pub fn build(self) -> Result<Client> {
        let mut addrs: VecDeque<String> = self.addrs.into_iter().collect();
        let first = addrs.pop_front().ok_or(FraggleError::NoAddresses)?;

        let max_payload_size = self.config.max_payload_size;
        let connector = self
            .connector
            .unwrap_or_else(|| Rc::new(TcpConnector::new().max_payload_size(max_payload_size)));
        let scheduler = self.scheduler.unwrap_or_else(|| Rc::new(TokioScheduler));

        tracing::info!(addr = %first, candidates = addrs.len(), "connecting");
        let cn = connector.connect(&first, scheduler.clone());

        Ok(Client {
            inner: Rc::new(RefCell::new(ClientState {
                addrs,
                cn,
                connector,
                scheduler,
                retry: Vec::new(),
                parked: Vec::new(),
                reconnect_pending: false,
                backoff: self.config.reconnect_delay,
                config: self.config,
                closed: false,
            })),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ClientState {
    /// Candidates not yet tried, in priority order.
    addrs: VecDeque<String>,
    cn: Connection,
    connector: Rc<dyn Connector>,
    scheduler: Rc<dyn Scheduler>,
    /// Unresolved requests that survive reconnection.
    retry: Vec<RequestHandle>,
    /// Retryable requests waiting for a live connection.
    parked: Vec<RequestHandle>,
    reconnect_pending: bool,
    backoff: Duration,
    config: ClientConfig,
    closed: bool,
}

/// Client for one coordination service cluster.
///
/// Cheap to clone; all clones share state. Not `Send`: drive it from a
/// single task.
#[derive(Clone)]
pub struct Client {
    inner: Rc<RefCell<ClientState>>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Submit without retry: connection loss resolves with `Disconnected`.
    pub fn send(&self, req: impl Into<RequestHandle>) -> Result<RequestHandle> {
        self.submit(req.into(), |_| false)
    }

    /// Submit and replay after every reconnect until resolved.
    pub fn resend(&self, req: impl Into<RequestHandle>) -> Result<RequestHandle> {
        self.submit(req.into(), |_| true)
    }

    /// Replay only when conditioned on a definite revision; otherwise like `send`.
    pub fn idemp(&self, req: impl Into<RequestHandle>) -> Result<RequestHandle> {
        self.submit(req.into(), RequestHandle::has_precise_rev)
    }

    pub fn nop(&self) -> Result<RequestHandle> {
        self.send(Request::new(Verb::Nop))
    }

    pub fn get(&self, path: &str, rev: i64) -> Result<RequestHandle> {
        self.resend(Request::new(Verb::Get).path(path).rev(rev))
    }

    pub fn set(&self, path: &str, value: impl Into<Bytes>, rev: i64) -> Result<RequestHandle> {
        self.idemp(Request::new(Verb::Set).path(path).value(value).rev(rev))
    }

    pub fn del(&self, path: &str, rev: i64) -> Result<RequestHandle> {
        self.idemp(Request::new(Verb::Del).path(path).rev(rev))
    }

    pub fn getdir(&self, path: &str, rev: i64, offset: u64) -> Result<RequestHandle> {
        self.resend(Request::new(Verb::GetDir).path(path).rev(rev).offset(offset))
    }

    pub fn rev(&self) -> Result<RequestHandle> {
        self.resend(Request::new(Verb::Rev))
    }

    pub fn stat(&self, path: &str, rev: i64) -> Result<RequestHandle> {
        self.resend(Request::new(Verb::Stat).path(path).rev(rev))
    }

    pub fn walk(&self, path: &str, rev: i64, offset: u64) -> Result<RequestHandle> {
        self.resend(Request::new(Verb::Walk).path(path).rev(rev).offset(offset))
    }

    /// Address of the active connection.
    pub fn current_addr(&self) -> String {
        self.inner.borrow().cn.addr()
    }

    /// Remaining candidates, in the order they will be tried.
    pub fn addrs(&self) -> Vec<String> {
        self.inner.borrow().addrs.iter().cloned().collect()
    }

    pub fn connection(&self) -> Connection {
        self.inner.borrow().cn.clone()
    }

    /// Unresolved requests that will be replayed on reconnect.
    pub fn pending_retries(&self) -> usize {
        self.inner.borrow().retry.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    /// Add a candidate learned from discovery. Known addresses are ignored.
    ///
    /// If the client gave up reconnecting, it dials again right away.
    pub fn add_addr(&self, addr: impl Into<String>) {
        let addr = addr.into();
        let idle = {
            let mut state = self.inner.borrow_mut();
            if state.cn.addr() == addr || state.addrs.contains(&addr) {
                return;
            }
            tracing::debug!(%addr, "candidate address added");
            state.addrs.push_back(addr);
            !state.closed && !state.reconnect_pending && state.cn.is_errored()
        };

        if idle {
            self.reconnect();
            self.flush_parked();
        }
    }

    /// Close the active connection and stop reconnecting.
    ///
    /// Every outstanding request resolves with `Disconnected`.
    pub fn close(&self) {
        let cn = {
            let mut state = self.inner.borrow_mut();
            if state.closed {
                return;
            }
            state.closed = true;
            state.cn.clone()
        };

        cn.close();

        let (parked, retry) = {
            let mut state = self.inner.borrow_mut();
            (
                std::mem::take(&mut state.parked),
                std::mem::take(&mut state.retry),
            )
        };
        for req in parked.iter().chain(retry.iter()) {
            req.fail(&FraggleError::Disconnected);
        }
    }

    fn submit(
        &self,
        req: RequestHandle,
        retryable: impl FnOnce(&RequestHandle) -> bool,
    ) -> Result<RequestHandle> {
        if let Some(tag) = req.tag() {
            return Err(FraggleError::AlreadySent { tag });
        }

        if retryable(&req) {
            self.inner.borrow_mut().retry.push(req.clone());
        }

        if let Err(e) = self.dispatch(&req) {
            self.forget(&req);
            return Err(e);
        }
        Ok(req)
    }

    fn dispatch(&self, req: &RequestHandle) -> Result<RequestHandle> {
        let cn = self.inner.borrow().cn.clone();
        let on_response = self.on_response(req.clone(), cn.clone());
        cn.send(req.clone(), on_response)
    }

    fn on_response(&self, req: RequestHandle, cn: Connection) -> OnResponse {
        let weak: Weak<RefCell<ClientState>> = Rc::downgrade(&self.inner);
        Box::new(move |res| match weak.upgrade() {
            Some(inner) => Client { inner }.handle_response(req, cn, res),
            None => req.fail(&FraggleError::Disconnected),
        })
    }

    fn handle_response(&self, req: RequestHandle, cn: Connection, res: Response) {
        if res.is_readonly() {
            tracing::info!(
                addr = %cn.addr(),
                redirect = ?res.err_detail,
                "server is readonly, rotating address"
            );
            self.connection_lost(&cn);
            cn.close();
            self.retry_or_fail(req);
            return;
        }

        if let Some(err) = res.error() {
            if err.is_disconnected() {
                self.connection_lost(&cn);
                self.retry_or_fail(req);
            } else {
                self.forget(&req);
                req.fail(&err);
            }
            return;
        }

        if res.is_valid() {
            req.observe(&res);
        }

        // Re-register before handlers run so a request they submit cannot
        // take this tag.
        if !res.is_done() {
            let on_response = self.on_response(req.clone(), cn.clone());
            if let Err(e) = cn.rearm(req.clone(), on_response) {
                tracing::error!(error = %e, "cannot rearm request");
                self.forget(&req);
                req.fail(&e);
                return;
            }
        }

        if res.is_valid() {
            req.fire_valid(&res);
        }

        if res.is_done() {
            self.forget(&req);
            req.resolve();
        }
    }

    /// React to the loss of `cn`. Only the first signal for the active
    /// connection reconnects; the rest are no-ops.
    fn connection_lost(&self, cn: &Connection) {
        let should_reconnect = {
            let state = self.inner.borrow();
            !state.closed && !state.reconnect_pending && state.cn.same_as(cn)
        };
        if should_reconnect {
            self.reconnect();
        }
    }

    fn reconnect(&self) {
        let (failed, next) = {
            let mut state = self.inner.borrow_mut();
            let failed = state.cn.addr();
            state.addrs.retain(|addr| *addr != failed);
            (failed, state.addrs.pop_front())
        };

        match next {
            Some(addr) => {
                let (connector, scheduler) = {
                    let mut state = self.inner.borrow_mut();
                    state.backoff = state.config.reconnect_delay;
                    (state.connector.clone(), state.scheduler.clone())
                };

                tracing::info!(%failed, %addr, "reconnecting");
                let cn = connector.connect(&addr, scheduler);
                self.inner.borrow_mut().cn = cn;
            }
            None => {
                let (delay, scheduler) = {
                    let mut state = self.inner.borrow_mut();
                    state.reconnect_pending = true;
                    let delay = state.backoff;
                    state.backoff = (delay * 2).min(state.config.max_reconnect_delay);
                    (delay, state.scheduler.clone())
                };

                tracing::warn!(%failed, ?delay, "no candidate addresses left, retrying later");
                let weak = Rc::downgrade(&self.inner);
                scheduler.timer(
                    delay,
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            Client { inner }.retry_reconnect();
                        }
                    }),
                );
            }
        }
    }

    /// Backoff timer expiry. With nothing parked the client stops retrying
    /// until `add_addr` or the next submission on the dead connection.
    fn retry_reconnect(&self) {
        let (errored, idle) = {
            let mut state = self.inner.borrow_mut();
            state.reconnect_pending = false;
            if state.closed {
                return;
            }
            (state.cn.is_errored(), state.parked.is_empty())
        };

        if errored && idle {
            tracing::debug!("nothing to replay, reconnect backoff stopped");
            return;
        }
        if errored {
            self.reconnect();
        }
        self.flush_parked();
    }

    fn retry_or_fail(&self, req: RequestHandle) {
        let retryable = {
            let state = self.inner.borrow();
            !state.closed && state.retry.iter().any(|r| r.same_as(&req))
        };

        if !retryable {
            self.forget(&req);
            req.fail(&FraggleError::Disconnected);
            return;
        }

        req.clear_tag();
        self.inner.borrow_mut().parked.push(req);
        self.flush_parked();
    }

    /// Replay parked requests once a usable connection exists.
    fn flush_parked(&self) {
        let parked = {
            let mut state = self.inner.borrow_mut();
            if state.closed || state.reconnect_pending || state.cn.is_errored() {
                return;
            }
            std::mem::take(&mut state.parked)
        };

        for req in parked {
            tracing::debug!(verb = ?req.verb(), path = ?req.path(), "replaying request");
            if let Err(e) = self.dispatch(&req) {
                self.forget(&req);
                req.fail(&e);
            }
        }
    }

    fn forget(&self, req: &RequestHandle) {
        let mut state = self.inner.borrow_mut();
        state.retry.retain(|r| !r.same_as(req));
        state.parked.retain(|r| !r.same_as(req));
    }
}
