//! Connection to the local forwarder: interest expression, interest filters, upcall dispatch.
//!
//! All operations on one connection are serialized by an API lock. `run` holds it for its
//! whole duration; upcalls invoked from inside `run` (on the same thread) skip the lock and
//! only queue outbound frames. Callbacks never run on runtime worker threads.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use tokio::io::{Interest as Readiness, Ready};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use ndn_core::protocol::FORW_DEFAULT;
use ndn_core::{
    decode_frame, encode_frame, frame_len, ContentError, ContentObject, FrameDecodeError,
    Interest, Key, Message, Name, PublicKeyId, Verification, PROTOCOL_VERSION,
};

use crate::config::ClientConfig;
use crate::ClientError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 64 * 1024;

/// Why a handler is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpcallKind {
    /// The connection holds no more references to the handler.
    Final,
    /// An interest arrived under a registered prefix.
    Interest,
    /// An interest already consumed by a longer-prefix filter.
    ConsumedInterest,
    /// Content matching an expressed interest, signature valid.
    Content,
    /// Content whose key is not available locally.
    ContentUnverified,
    /// Content whose signature does not verify.
    ContentBad,
    InterestTimedOut,
}

/// Handler verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpcallResult {
    Ok,
    Err,
    /// Express the same interest again (fresh nonce and lifetime).
    Reexpress,
    /// This handler answered the interest.
    InterestConsumed,
}

#[derive(Debug, Clone, Default)]
pub struct UpcallInfo {
    pub interest: Option<Interest>,
    pub content: Option<ContentObject>,
    /// Number of name components of the interest (or filter prefix) that matched.
    pub matched_comps: usize,
}

type UpcallFn = dyn FnMut(&Connection, UpcallKind, &UpcallInfo) -> UpcallResult + Send;

/// Shareable callback. One handler may serve many interests and filters.
#[derive(Clone)]
pub struct Handler(Arc<Mutex<Box<UpcallFn>>>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: FnMut(&Connection, UpcallKind, &UpcallInfo) -> UpcallResult + Send + 'static,
    {
        Handler(Arc::new(Mutex::new(Box::new(f))))
    }

    fn same(&self, other: &Handler) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn call(&self, conn: &Connection, kind: UpcallKind, info: &UpcallInfo) -> UpcallResult {
        let mut f = self.0.lock();
        (*f)(conn, kind, info)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler({:p})", Arc::as_ptr(&self.0))
    }
}

struct PendingInterest {
    interest: Interest,
    handler: Handler,
    deadline: Instant,
}

struct Filter {
    prefix: Name,
    handler: Handler,
}

struct State {
    stream: Option<Arc<TcpStream>>,
    read_buf: Vec<u8>,
    outbound: VecDeque<Vec<u8>>,
    /// Bytes of the front outbound frame already written.
    written: usize,
    pending: BTreeMap<u64, PendingInterest>,
    filters: Vec<Filter>,
    /// Handlers that may have lost their last reference.
    finals: Vec<Handler>,
    keys: BTreeMap<PublicKeyId, Key>,
    next_id: u64,
    tick_interval: Duration,
    next_tick: Instant,
}

impl State {
    fn ensure_connected(&self) -> Result<&Arc<TcpStream>, ClientError> {
        self.stream.as_ref().ok_or(ClientError::NotConnected)
    }

    fn enqueue(&mut self, msg: &Message) -> Result<(), ClientError> {
        self.ensure_connected()?;
        self.outbound.push_back(encode_frame(msg)?);
        Ok(())
    }

    fn send_interest(&mut self, mut interest: Interest, handler: Handler) -> Result<(), ClientError> {
        interest.refresh_nonce();
        let deadline = Instant::now() + interest.effective_lifetime();
        self.enqueue(&Message::Interest(interest.clone()))?;
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingInterest {
                interest,
                handler,
                deadline,
            },
        );
        Ok(())
    }

    fn references(&self, handler: &Handler) -> bool {
        self.pending.values().any(|p| p.handler.same(handler))
            || self.filters.iter().any(|f| f.handler.same(handler))
    }

    fn push_final(&mut self, handler: Handler) {
        if !self.finals.iter().any(|h| h.same(&handler)) {
            self.finals.push(handler);
        }
    }

    /// Drop the transport and every registration. Handlers are queued for `Final`.
    fn teardown(&mut self) {
        self.stream = None;
        let pending = std::mem::take(&mut self.pending);
        for p in pending.into_values() {
            self.push_final(p.handler);
        }
        let filters = std::mem::take(&mut self.filters);
        for f in filters {
            self.push_final(f.handler);
        }
        self.read_buf.clear();
        self.outbound.clear();
        self.written = 0;
    }

    fn flush(&mut self) -> Result<(), ClientError> {
        let Some(stream) = self.stream.clone() else {
            return Ok(());
        };
        while let Some(front) = self.outbound.front() {
            match stream.try_write(&front[self.written..]) {
                Ok(0) => return Err(ClientError::Connection("forwarder stopped reading".into())),
                Ok(n) => {
                    self.written += n;
                    if self.written == front.len() {
                        self.outbound.pop_front();
                        self.written = 0;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(ClientError::Connection(format!("write failed: {}", e))),
            }
        }
        Ok(())
    }

    /// Read until the socket would block. Returns true on end of stream.
    fn read_available(&mut self, stream: &TcpStream) -> Result<bool, ClientError> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match stream.try_read(&mut chunk) {
                Ok(0) => return Ok(true),
                Ok(n) => self.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) => return Err(ClientError::Connection(format!("read failed: {}", e))),
            }
        }
    }

    /// Decode every complete frame in the read buffer. Malformed frames are skipped.
    fn decode_frames(&mut self) -> Result<Vec<Message>, ClientError> {
        let mut out = Vec::new();
        let mut consumed = 0;
        loop {
            let rest = &self.read_buf[consumed..];
            match decode_frame(rest) {
                Ok((msg, n)) => {
                    consumed += n;
                    out.push(msg);
                }
                Err(FrameDecodeError::NeedMore) => break,
                Err(FrameDecodeError::Decode(e)) => {
                    let n = frame_len(rest).unwrap_or(rest.len());
                    warn!(error = %e, len = n, "dropping malformed frame");
                    consumed += n;
                }
                Err(e @ FrameDecodeError::TooLarge) => {
                    warn!("oversized frame from forwarder, closing connection");
                    self.teardown();
                    return Err(ClientError::Decode(e));
                }
            }
        }
        self.read_buf.drain(..consumed);
        Ok(out)
    }
}

struct RunClock {
    active: bool,
    deadline: Option<Instant>,
}

struct Shared {
    config: ClientConfig,
    runtime: Arc<Runtime>,
    default_key: Option<Key>,
    api: Mutex<()>,
    dispatching: Mutex<Option<ThreadId>>,
    state: Mutex<State>,
    clock: Mutex<RunClock>,
    wake: Notify,
    /// Upcalls currently executing; `Final` delivery waits until this is zero.
    upcall_depth: AtomicUsize,
}

/// Handle to one forwarder connection. Clones share the connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

/// Marks the current thread as dispatching; restores the previous owner on drop.
struct DispatchGuard<'a> {
    shared: &'a Shared,
    previous: Option<ThreadId>,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        *self.shared.dispatching.lock() = self.previous;
    }
}

struct ClockGuard<'a>(&'a Shared);

impl Drop for ClockGuard<'_> {
    fn drop(&mut self) {
        let mut clock = self.0.clock.lock();
        clock.active = false;
        clock.deadline = None;
    }
}

impl Connection {
    /// Disconnected connection with its own single-worker runtime.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("ndn-io")
            .enable_all()
            .build()?;
        Self::with_runtime(config, Arc::new(runtime))
    }

    /// Disconnected connection sharing `runtime` (e.g. with other connections of an event loop).
    pub fn with_runtime(config: ClientConfig, runtime: Arc<Runtime>) -> Result<Self, ClientError> {
        let default_key = config.default_key()?;
        let mut keys = BTreeMap::new();
        if let Some(key) = &default_key {
            keys.insert(*key.public_key_id(), key.to_public());
        }
        let tick_interval = config.tick_interval();
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                runtime,
                default_key,
                api: Mutex::new(()),
                dispatching: Mutex::new(None),
                state: Mutex::new(State {
                    stream: None,
                    read_buf: Vec::new(),
                    outbound: VecDeque::new(),
                    written: 0,
                    pending: BTreeMap::new(),
                    filters: Vec::new(),
                    finals: Vec::new(),
                    keys,
                    next_id: 0,
                    tick_interval,
                    next_tick: Instant::now(),
                }),
                clock: Mutex::new(RunClock {
                    active: false,
                    deadline: None,
                }),
                wake: Notify::new(),
                upcall_depth: AtomicUsize::new(0),
            }),
        })
    }

    /// Create and connect.
    pub fn open(config: ClientConfig) -> Result<Self, ClientError> {
        let conn = Self::new(config)?;
        conn.connect()?;
        Ok(conn)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.shared.runtime
    }

    /// Key loaded from the configured key file.
    pub fn default_key(&self) -> Option<&Key> {
        self.shared.default_key.as_ref()
    }

    /// Trust `key` for verifying content that names it as publisher.
    pub fn add_key(&self, key: &Key) {
        self.shared
            .state
            .lock()
            .keys
            .insert(*key.public_key_id(), key.to_public());
    }

    pub fn is_connected(&self) -> bool {
        self.shared.state.lock().stream.is_some()
    }

    /// Whether some thread is currently dispatching upcalls for this connection.
    pub fn is_dispatching(&self) -> bool {
        self.shared.dispatching.lock().is_some()
    }

    fn in_dispatch(&self) -> bool {
        *self.shared.dispatching.lock() == Some(thread::current().id())
    }

    fn lock_api(&self) -> Option<MutexGuard<'_, ()>> {
        if self.in_dispatch() {
            None
        } else {
            Some(self.shared.api.lock())
        }
    }

    fn enter_dispatch(&self) -> DispatchGuard<'_> {
        let previous = self
            .shared
            .dispatching
            .lock()
            .replace(thread::current().id());
        DispatchGuard {
            shared: &self.shared,
            previous,
        }
    }

    fn stream(&self) -> Option<Arc<TcpStream>> {
        self.shared.state.lock().stream.clone()
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        let _api = self.lock_api();
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }
        let addr = self.shared.config.forwarder_addr.clone();
        let connected = self.shared.runtime.block_on(async {
            tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr.as_str())).await
        });
        let stream = match connected {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(ClientError::Connection(format!("{}: {}", addr, e))),
            Err(_) => return Err(ClientError::Connection(format!("{}: connect timed out", addr))),
        };
        stream.set_nodelay(true)?;
        let hello = encode_frame(&Message::Hello {
            protocol_version: PROTOCOL_VERSION,
        })?;
        {
            let mut state = self.shared.state.lock();
            state.teardown();
            state.next_id = 0;
            state.next_tick = Instant::now();
            state.stream = Some(Arc::new(stream));
            state.outbound.push_back(hello);
        }
        self.release_unused();
        self.flush()?;
        info!(addr = %addr, "connected to forwarder");
        Ok(())
    }

    /// Close the connection. Every pending interest and filter is dropped.
    pub fn disconnect(&self) -> Result<(), ClientError> {
        let _api = self.lock_api();
        {
            let mut state = self.shared.state.lock();
            state.ensure_connected()?;
            state.teardown();
        }
        info!("disconnected from forwarder");
        self.release_unused();
        Ok(())
    }

    /// Express an interest for `name`, selectors taken from `template`.
    /// `handler` receives the content, or `InterestTimedOut` once the lifetime passes.
    pub fn express_interest(
        &self,
        name: &Name,
        handler: &Handler,
        template: Option<&Interest>,
    ) -> Result<(), ClientError> {
        let _api = self.lock_api();
        let mut interest = match template {
            Some(t) => Interest::from_template(t, name.clone()),
            None => Interest::new(name.clone()),
        };
        interest
            .lifetime
            .get_or_insert(self.shared.config.default_interest_lifetime());
        self.shared
            .state
            .lock()
            .send_interest(interest, handler.clone())?;
        self.flush()?;
        debug!(name = %name, "expressed interest");
        Ok(())
    }

    /// Route interests under `prefix` to `handler`. Replaces an existing filter on the same prefix.
    pub fn set_interest_filter(
        &self,
        prefix: &Name,
        handler: &Handler,
        flags: Option<u32>,
    ) -> Result<(), ClientError> {
        let _api = self.lock_api();
        {
            let mut state = self.shared.state.lock();
            state.enqueue(&Message::Register {
                prefix: prefix.clone(),
                flags: flags.unwrap_or(FORW_DEFAULT),
            })?;
            if let Some(i) = state.filters.iter().position(|f| &f.prefix == prefix) {
                let old = state.filters.remove(i);
                state.push_final(old.handler);
            }
            state.filters.push(Filter {
                prefix: prefix.clone(),
                handler: handler.clone(),
            });
        }
        self.release_unused();
        self.flush()?;
        debug!(prefix = %prefix, "interest filter set");
        Ok(())
    }

    pub fn clear_interest_filter(&self, prefix: &Name) -> Result<(), ClientError> {
        let _api = self.lock_api();
        {
            let mut state = self.shared.state.lock();
            state.enqueue(&Message::Unregister {
                prefix: prefix.clone(),
            })?;
            if let Some(i) = state.filters.iter().position(|f| &f.prefix == prefix) {
                let old = state.filters.remove(i);
                state.push_final(old.handler);
            }
        }
        self.release_unused();
        self.flush()
    }

    /// Express an interest and run until matching content arrives or `timeout` passes.
    /// Content whose signature does not verify ends the wait with [`ClientError::Verification`].
    pub fn get(
        &self,
        name: &Name,
        template: Option<&Interest>,
        timeout: Duration,
    ) -> Result<ContentObject, ClientError> {
        if self.in_dispatch() {
            return Err(ClientError::Reentrancy("get called from an upcall"));
        }
        let slot: Arc<Mutex<Option<Result<ContentObject, ClientError>>>> = Arc::default();
        let sink = slot.clone();
        let wanted = name.clone();
        let handler = Handler::new(move |conn, kind, info| {
            match kind {
                UpcallKind::Content | UpcallKind::ContentUnverified => {
                    *sink.lock() = info.content.clone().map(Ok);
                    conn.set_run_timeout(Duration::ZERO);
                }
                UpcallKind::ContentBad => {
                    let bad = info
                        .content
                        .as_ref()
                        .and_then(ContentObject::name)
                        .unwrap_or(&wanted)
                        .clone();
                    *sink.lock() = Some(Err(ClientError::Verification(bad)));
                    conn.set_run_timeout(Duration::ZERO);
                }
                UpcallKind::InterestTimedOut => conn.set_run_timeout(Duration::ZERO),
                _ => {}
            }
            UpcallResult::Ok
        });
        let mut interest = template.cloned().unwrap_or_default();
        interest.lifetime.get_or_insert(timeout);
        self.express_interest(name, &handler, Some(&interest))?;
        self.run(Some(timeout))?;
        let outcome = slot.lock().take();
        outcome.unwrap_or(Err(ClientError::Timeout))
    }

    /// Send a signed content object to the forwarder.
    pub fn put(&self, co: &ContentObject) -> Result<(), ClientError> {
        if !co.is_signed() {
            return Err(ContentError::Unsigned.into());
        }
        let _api = self.lock_api();
        self.shared.state.lock().enqueue(&Message::Data(co.clone()))?;
        self.flush()
    }

    /// Dispatch network input and housekeeping until `timeout` passes (`None`: until
    /// [`Connection::set_run_timeout`] or disconnect). A zero timeout processes what is
    /// ready and returns.
    pub fn run(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        if self.in_dispatch() {
            return Err(ClientError::Reentrancy("run called from an upcall"));
        }
        let _api = self.shared.api.lock();
        let _dispatch = self.enter_dispatch();
        let _clock = self.start_clock(timeout);
        let mut stream = self.stream().ok_or(ClientError::NotConnected)?;
        loop {
            let next_tick = self.housekeeping();
            self.flush()?;
            let wait = self.run_remaining().map_or(next_tick, |r| r.min(next_tick));
            let (messages, closed) = self.poll_input(&stream, wait)?;
            for msg in messages {
                self.dispatch(msg);
                self.release_unused();
            }
            if closed {
                warn!("forwarder closed the connection");
                self.shared.state.lock().teardown();
                self.release_unused();
                return Err(ClientError::Connection("forwarder closed the connection".into()));
            }
            if self.run_expired() {
                break;
            }
            match self.stream() {
                Some(s) => stream = s,
                None => break,
            }
        }
        Ok(())
    }

    /// Move the deadline of an active `run` to `timeout` from now. No effect when idle.
    pub fn set_run_timeout(&self, timeout: Duration) {
        let mut clock = self.shared.clock.lock();
        if clock.active {
            clock.deadline = Some(Instant::now() + timeout);
            drop(clock);
            self.shared.wake.notify_one();
        }
    }

    /// Write queued frames. A write failure drops the transport and releases its handlers.
    fn flush(&self) -> Result<(), ClientError> {
        let flushed = {
            let mut state = self.shared.state.lock();
            let flushed = state.flush();
            if flushed.is_err() {
                state.teardown();
            }
            flushed
        };
        if let Err(e) = &flushed {
            warn!(error = %e, "write to forwarder failed, connection closed");
            self.release_unused();
        }
        flushed
    }

    fn start_clock(&self, timeout: Option<Duration>) -> ClockGuard<'_> {
        let mut clock = self.shared.clock.lock();
        clock.active = true;
        clock.deadline = timeout.map(|t| Instant::now() + t);
        ClockGuard(&self.shared)
    }

    fn run_remaining(&self) -> Option<Duration> {
        let clock = self.shared.clock.lock();
        clock
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    fn run_expired(&self) -> bool {
        let clock = self.shared.clock.lock();
        clock.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Run due housekeeping (interest expiry). Returns the time until the next tick.
    pub fn process_scheduled(&self) -> Result<Duration, ClientError> {
        if self.in_dispatch() {
            return Err(ClientError::Reentrancy("process_scheduled called from an upcall"));
        }
        let _api = self.shared.api.lock();
        let _dispatch = self.enter_dispatch();
        Ok(self.housekeeping())
    }

    /// Whether queued frames are waiting for the socket to become writable.
    pub fn output_is_pending(&self) -> bool {
        !self.shared.state.lock().outbound.is_empty()
    }

    pub fn set_tick_interval(&self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let mut state = self.shared.state.lock();
        state.tick_interval = interval;
        state.next_tick = state.next_tick.min(Instant::now() + interval);
    }

    pub fn tick_interval(&self) -> Duration {
        self.shared.state.lock().tick_interval
    }

    /// Resolves when the socket is readable, or writable while output is pending.
    pub async fn ready(&self) -> Result<(), ClientError> {
        let (stream, want_write) = {
            let state = self.shared.state.lock();
            (state.stream.clone(), !state.outbound.is_empty())
        };
        let stream = stream.ok_or(ClientError::NotConnected)?;
        stream.ready(readiness(want_write)).await?;
        Ok(())
    }

    fn housekeeping(&self) -> Duration {
        let now = Instant::now();
        let expired: Vec<PendingInterest> = {
            let mut state = self.shared.state.lock();
            if now < state.next_tick {
                return state.next_tick - now;
            }
            state.next_tick = now + state.tick_interval;
            let ids: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.pending.remove(&id))
                .collect()
        };
        for p in expired {
            debug!(name = %p.interest.name, "interest timed out");
            let info = UpcallInfo {
                interest: Some(p.interest.clone()),
                content: None,
                matched_comps: 0,
            };
            let result = self.upcall(&p.handler, UpcallKind::InterestTimedOut, &info);
            self.settle(p, result);
        }
        self.release_unused();
        self.shared
            .state
            .lock()
            .next_tick
            .saturating_duration_since(Instant::now())
    }

    /// Re-express on `Reexpress`, otherwise let the handler go.
    fn settle(&self, p: PendingInterest, result: UpcallResult) {
        let mut state = self.shared.state.lock();
        if result == UpcallResult::Reexpress {
            let name = p.interest.name.clone();
            match state.send_interest(p.interest, p.handler.clone()) {
                Ok(()) => debug!(name = %name, "re-expressed interest"),
                Err(e) => {
                    warn!(name = %name, error = %e, "cannot re-express interest");
                    state.push_final(p.handler);
                }
            }
        } else {
            state.push_final(p.handler);
        }
    }

    /// Deliver `Final` to queued handlers that lost their last reference.
    /// Called from inside an upcall it does nothing; dispatch retries once the upcall returns.
    fn release_unused(&self) {
        if self.shared.upcall_depth.load(Ordering::SeqCst) > 0 {
            return;
        }
        let _dispatch = self.enter_dispatch();
        loop {
            let next = {
                let mut state = self.shared.state.lock();
                let mut found = None;
                while let Some(h) = state.finals.pop() {
                    if !state.references(&h) {
                        found = Some(h);
                        break;
                    }
                }
                found
            };
            let Some(handler) = next else {
                break;
            };
            self.upcall(&handler, UpcallKind::Final, &UpcallInfo::default());
        }
    }

    fn upcall(&self, handler: &Handler, kind: UpcallKind, info: &UpcallInfo) -> UpcallResult {
        self.shared.upcall_depth.fetch_add(1, Ordering::SeqCst);
        let result = handler.call(self, kind, info);
        self.shared.upcall_depth.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn poll_input(
        &self,
        stream: &Arc<TcpStream>,
        wait: Duration,
    ) -> Result<(Vec<Message>, bool), ClientError> {
        let want_write = self.output_is_pending();
        let ready: Option<Ready> = self.shared.runtime.block_on(async {
            tokio::select! {
                biased;
                r = tokio::time::timeout(wait, stream.ready(readiness(want_write))) => match r {
                    Ok(Ok(ready)) => Ok(Some(ready)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Ok(None),
                },
                _ = self.shared.wake.notified() => Ok(None),
            }
        })?;
        let Some(ready) = ready else {
            return Ok((Vec::new(), false));
        };
        if ready.is_writable() {
            self.flush()?;
        }
        let mut state = self.shared.state.lock();
        let mut closed = false;
        if ready.is_readable() || ready.is_read_closed() {
            closed = state.read_available(stream)?;
        }
        let messages = state.decode_frames()?;
        Ok((messages, closed))
    }

    fn dispatch(&self, msg: Message) {
        match msg {
            Message::Interest(interest) => self.dispatch_interest(interest),
            Message::Data(co) => self.dispatch_content(co),
            Message::Hello { protocol_version } => {
                debug!(protocol_version, "forwarder hello");
            }
            Message::Register { .. } | Message::Unregister { .. } => {
                warn!("ignoring registration message from forwarder");
            }
        }
    }

    /// Offer an incoming interest to every filter whose prefix matches, longest prefix first.
    fn dispatch_interest(&self, interest: Interest) {
        let mut filters: Vec<(usize, Handler)> = {
            let state = self.shared.state.lock();
            state
                .filters
                .iter()
                .filter(|f| f.prefix.is_prefix_of(&interest.name))
                .map(|f| (f.prefix.len(), f.handler.clone()))
                .collect()
        };
        if filters.is_empty() {
            debug!(name = %interest.name, "no filter for incoming interest");
            return;
        }
        filters.sort_by(|a, b| b.0.cmp(&a.0));
        let mut info = UpcallInfo {
            interest: Some(interest),
            content: None,
            matched_comps: 0,
        };
        let mut consumed = false;
        for (matched, handler) in filters {
            info.matched_comps = matched;
            let kind = if consumed {
                UpcallKind::ConsumedInterest
            } else {
                UpcallKind::Interest
            };
            if self.upcall(&handler, kind, &info) == UpcallResult::InterestConsumed {
                consumed = true;
            }
        }
    }

    /// Hand content to every pending interest it satisfies.
    fn dispatch_content(&self, co: ContentObject) {
        let matched: Vec<PendingInterest> = {
            let mut state = self.shared.state.lock();
            let ids: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, p)| co.matches_interest(&p.interest))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.pending.remove(&id))
                .collect()
        };
        if matched.is_empty() {
            debug!(name = ?co.name(), "unsolicited content");
            return;
        }
        let kind = match self.verify(&co) {
            Verification::Valid => UpcallKind::Content,
            Verification::Unverified => UpcallKind::ContentUnverified,
            Verification::Invalid => {
                warn!(name = ?co.name(), "content failed verification");
                UpcallKind::ContentBad
            }
        };
        let content = Some(co);
        for p in matched {
            let info = UpcallInfo {
                interest: Some(p.interest.clone()),
                content: content.clone(),
                matched_comps: p.interest.name.len(),
            };
            let result = self.upcall(&p.handler, kind, &info);
            self.settle(p, result);
        }
    }

    /// Verify with a trusted key named by the publisher digest, else the key locator.
    fn verify(&self, co: &ContentObject) -> Verification {
        let trusted = co
            .signed_info()
            .and_then(|si| si.publisher_key_digest)
            .and_then(|digest| self.shared.state.lock().keys.get(&digest).cloned());
        co.verify(trusted.as_ref())
    }
}

fn readiness(want_write: bool) -> Readiness {
    if want_write {
        Readiness::READABLE | Readiness::WRITABLE
    } else {
        Readiness::READABLE
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("forwarder_addr", &self.shared.config.forwarder_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}
