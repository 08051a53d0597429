//! # MessageBus: typed request/reply and publish/subscribe across processes.
//!
//! The bus owns:
//! - a **handler table** `kind → [handler]` for the local process;
//! - one **link** per attached peer (a child process, or the parent for a worker):
//!   a writer task fed by an unbounded queue, a reader task, the map of
//!   requests still waiting for that peer's reply, and the kinds the peer hosts.
//!
//! Every bus advertises the kinds it has local handlers for with a `Hosts`
//! frame: once on attach, then whenever a kind gains its first handler or loses
//! its last one. Dispatch counts local handlers and hosting peers together:
//!
//! ```text
//! dispatch(msg)
//!   ├─ 1 local handler, no hosting peer ──► spawn handler ──► Pending resolves
//!   ├─ 0 local handlers, 1 hosting peer ──► Request frame ──► ... ──► Reply frame ──► Pending resolves
//!   ├─ nothing hosts the kind           ──► upstream link if any, else NoHandler
//!   └─ more than one                    ──► AmbiguousHandler
//!
//! reader task (per link):
//!   Request  ──► single local handler ──► Reply frame on the same link
//!   Reply    ──► pending[id].send(outcome)
//!   Publish  ──► every local handler, in order, before the next frame
//!   Hosts    ──► replaces the kinds recorded for that peer
//!   EOF/err  ──► link removed, pending → PeerLost
//! ```
//!
//! ## Rules
//! - Critical sections (`parking_lot` locks) never span an `.await`.
//! - Frames leave a link in the order they were queued (one writer task per link).
//! - `close()` cancels every link and rejects every pending result with `Closed`.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{FutureExt, SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

use super::frame::{Frame, Outcome};
use super::message::Message;
use super::pending::{Pending, ReplySender};
use crate::error::IpcError;

/// Default upper bound for one frame body.
pub(crate) const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

/// Identifier of an attached peer link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub u64);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Token returned by [`MessageBus::subscribe`]; pass it to [`MessageBus::unsubscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: &'static str,
    id: u64,
}

impl Subscription {
    /// Message kind this subscription is registered for.
    pub fn kind(&self) -> &'static str {
        self.kind
    }
}

type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, IpcError>> + Send + Sync>;

struct Link {
    outbound: mpsc::UnboundedSender<Bytes>,
    pending: HashMap<u64, ReplySender>,
    hosts: HashSet<String>,
    cancel: CancellationToken,
    writer: Option<JoinHandle<()>>,
}

struct Inner {
    handlers: RwLock<HashMap<&'static str, Vec<(u64, Handler)>>>,
    links: Mutex<HashMap<PeerId, Link>>,
    upstream: Mutex<Option<PeerId>>,
    next_peer: AtomicU64,
    next_request: AtomicU64,
    next_subscription: AtomicU64,
    max_frame_length: usize,
    closed: CancellationToken,
}

/// Cross-process message bus.
///
/// Cheap to clone; all clones share the same handlers and links.
///
/// ## Example
/// ```rust
/// use serde::{Deserialize, Serialize};
/// use procvisor::{Message, MessageBus};
///
/// #[derive(Serialize, Deserialize)]
/// struct Add(u32, u32);
///
/// impl Message for Add {
///     const KIND: &'static str = "add";
///     type Reply = u32;
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let bus = MessageBus::new();
/// bus.subscribe(|Add(a, b): Add| async move { Ok::<_, String>(a + b) });
/// assert_eq!(bus.dispatch(&Add(2, 3)).await.unwrap(), 5);
/// # }
/// ```
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<Inner>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBus")
            .field("links", &self.inner.links.lock().len())
            .field("upstream", &*self.inner.upstream.lock())
            .field("closed", &self.inner.closed.is_cancelled())
            .finish()
    }
}

impl MessageBus {
    /// Creates a bus with the default frame size limit (8 MiB).
    pub fn new() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }

    /// Creates a bus that refuses frames larger than `max` bytes.
    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                handlers: RwLock::new(HashMap::new()),
                links: Mutex::new(HashMap::new()),
                upstream: Mutex::new(None),
                next_peer: AtomicU64::new(1),
                next_request: AtomicU64::new(1),
                next_subscription: AtomicU64::new(1),
                max_frame_length: max.max(1),
                closed: CancellationToken::new(),
            }),
        }
    }

    /// Registers a handler for `M` in this process.
    ///
    /// Any number of handlers may subscribe to one kind for [`publish`](Self::publish);
    /// [`dispatch`](Self::dispatch) requires exactly one. The handler's error is
    /// delivered to the requester as [`IpcError::Remote`].
    pub fn subscribe<M, F, Fut, E>(&self, handler: F) -> Subscription
    where
        M: Message,
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<M::Reply, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let erased: Handler = Arc::new(move |payload: Value| {
            let msg = match serde_json::from_value::<M>(payload) {
                Ok(msg) => msg,
                Err(e) => {
                    let err = IpcError::Deserialize {
                        kind: M::KIND.to_string(),
                        reason: e.to_string(),
                    };
                    return futures::future::ready(Err(err)).boxed();
                }
            };
            let fut = handler(msg);
            async move {
                match fut.await {
                    Ok(reply) => serde_json::to_value(reply).map_err(|e| IpcError::Serialize {
                        kind: M::KIND.to_string(),
                        reason: e.to_string(),
                    }),
                    Err(e) => Err(IpcError::Remote {
                        message: e.to_string(),
                    }),
                }
            }
            .boxed()
        });

        let id = self.inner.next_subscription.fetch_add(1, Ordering::Relaxed);
        let first = {
            let mut handlers = self.inner.handlers.write();
            let list = handlers.entry(M::KIND).or_default();
            list.push((id, erased));
            list.len() == 1
        };
        if first {
            self.advertise();
        }
        Subscription { kind: M::KIND, id }
    }

    /// Removes a handler. Returns `false` if it was already removed.
    pub fn unsubscribe(&self, sub: &Subscription) -> bool {
        let (removed, last) = {
            let mut handlers = self.inner.handlers.write();
            let Some(list) = handlers.get_mut(sub.kind) else {
                return false;
            };
            let before = list.len();
            list.retain(|(id, _)| *id != sub.id);
            let removed = list.len() != before;
            let last = list.is_empty();
            if last {
                handlers.remove(sub.kind);
            }
            (removed, last)
        };
        if last {
            self.advertise();
        }
        removed
    }

    /// Number of local handlers registered for `kind`.
    pub fn handler_count(&self, kind: &str) -> usize {
        self.inner.handlers.read().get(kind).map_or(0, Vec::len)
    }

    /// Kinds `peer` advertised handlers for, sorted.
    pub fn peer_hosts(&self, peer: PeerId) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .inner
            .links
            .lock()
            .get(&peer)
            .map(|link| link.hosts.iter().cloned().collect())
            .unwrap_or_default();
        kinds.sort();
        kinds
    }

    /// Sends a request to the single handler of `M::KIND`, wherever it lives.
    ///
    /// The handler may be local or on an attached peer that advertised the kind.
    /// When nothing is known to host the kind, the request goes to the upstream
    /// peer, if any.
    pub fn dispatch<M: Message>(&self, msg: &M) -> Pending<M::Reply> {
        if self.inner.closed.is_cancelled() {
            return Pending::failed(M::KIND, IpcError::Closed);
        }
        let payload = match encode_payload(msg) {
            Ok(v) => v,
            Err(e) => return Pending::failed(M::KIND, e),
        };

        let local = self.local_handlers(M::KIND);
        let remote = self.hosting_peers(M::KIND);
        match (local.len(), remote.as_slice()) {
            (1, []) => {
                let (tx, pending) = Pending::channel(M::KIND);
                let handler = Arc::clone(&local[0]);
                let closed = self.inner.closed.clone();
                tokio::spawn(async move {
                    let outcome = tokio::select! {
                        res = handler(payload) => res,
                        _ = closed.cancelled() => Err(IpcError::Closed),
                    };
                    let _ = tx.send(outcome);
                });
                pending
            }
            (0, [peer]) => self.request(*peer, M::KIND, payload),
            (0, []) => {
                let upstream = *self.inner.upstream.lock();
                match upstream {
                    Some(peer) => self.request(peer, M::KIND, payload),
                    None => Pending::failed(
                        M::KIND,
                        IpcError::NoHandler {
                            kind: M::KIND.to_string(),
                        },
                    ),
                }
            }
            (count, peers) => Pending::failed(
                M::KIND,
                IpcError::AmbiguousHandler {
                    kind: M::KIND.to_string(),
                    count: count + peers.len(),
                },
            ),
        }
    }

    /// Sends a request to the handler registered on a specific peer.
    pub fn dispatch_to<M: Message>(&self, peer: PeerId, msg: &M) -> Pending<M::Reply> {
        if self.inner.closed.is_cancelled() {
            return Pending::failed(M::KIND, IpcError::Closed);
        }
        match encode_payload(msg) {
            Ok(payload) => self.request(peer, M::KIND, payload),
            Err(e) => Pending::failed(M::KIND, e),
        }
    }

    /// Delivers `msg` to every local subscriber (in registration order), then
    /// forwards it to the upstream peer, if any.
    ///
    /// Handler failures are logged, not returned; only encoding and transport
    /// errors are.
    pub async fn publish<M: Message>(&self, msg: &M) -> Result<(), IpcError> {
        if self.inner.closed.is_cancelled() {
            return Err(IpcError::Closed);
        }
        let payload = encode_payload(msg)?;
        fan_out(&self.local_handlers(M::KIND), M::KIND, &payload).await;

        let upstream = *self.inner.upstream.lock();
        if let Some(peer) = upstream {
            let frame = Frame::Publish {
                kind: M::KIND.to_string(),
                payload,
            };
            self.send_frame(peer, &frame)?;
        }
        Ok(())
    }

    /// Attaches a peer link over a byte-stream pair and starts its reader/writer tasks.
    pub fn attach<R, W>(&self, reader: R, writer: W) -> PeerId
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = PeerId(self.inner.next_peer.fetch_add(1, Ordering::Relaxed));
        let cancel = self.inner.closed.child_token();
        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();

        let codec = self.codec();
        let writer = tokio::spawn(write_loop(
            FramedWrite::new(writer, codec.clone()),
            rx,
            cancel.clone(),
            peer,
        ));
        {
            // Under the links lock so a concurrent advertise cannot slip between
            // the snapshot and the insert.
            let mut links = self.inner.links.lock();
            if let Some(bytes) = self.hosts_frame() {
                let _ = tx.send(bytes);
            }
            links.insert(
                peer,
                Link {
                    outbound: tx,
                    pending: HashMap::new(),
                    hosts: HashSet::new(),
                    cancel: cancel.clone(),
                    writer: Some(writer),
                },
            );
        }
        tokio::spawn(read_loop(
            self.clone(),
            FramedRead::new(reader, codec),
            cancel,
            peer,
        ));
        tracing::debug!(target: "procvisor::ipc", %peer, "peer attached");
        peer
    }

    /// Attaches the link to the parent process and makes it the dispatch fallback.
    pub fn attach_upstream<R, W>(&self, reader: R, writer: W) -> PeerId
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let peer = self.attach(reader, writer);
        *self.inner.upstream.lock() = Some(peer);
        peer
    }

    /// Detaches a peer; its pending results are rejected with `PeerLost`.
    ///
    /// Returns `false` if the peer was not attached (already lost or detached).
    pub fn detach(&self, peer: PeerId) -> bool {
        let link = self.inner.links.lock().remove(&peer);
        {
            let mut upstream = self.inner.upstream.lock();
            if *upstream == Some(peer) {
                *upstream = None;
            }
        }
        match link {
            Some(link) => {
                link.cancel.cancel();
                let lost = link.pending.len();
                for (_, tx) in link.pending {
                    let _ = tx.send(Err(IpcError::PeerLost { peer }));
                }
                tracing::debug!(target: "procvisor::ipc", %peer, lost, "peer detached");
                true
            }
            None => false,
        }
    }

    /// Detaches a peer after every frame already queued for it was written.
    ///
    /// Used by a worker right before it exits so its last notifications reach
    /// the supervisor. Pending results are rejected with `PeerLost`.
    pub async fn disconnect(&self, peer: PeerId) {
        let link = self.inner.links.lock().remove(&peer);
        {
            let mut upstream = self.inner.upstream.lock();
            if *upstream == Some(peer) {
                *upstream = None;
            }
        }
        let Some(mut link) = link else { return };
        for (_, tx) in link.pending.drain() {
            let _ = tx.send(Err(IpcError::PeerLost { peer }));
        }
        let writer = link.writer.take();
        drop(link.outbound);
        if let Some(writer) = writer {
            let _ = writer.await;
        }
        link.cancel.cancel();
    }

    /// The parent link, if this bus runs inside a worker.
    pub fn upstream(&self) -> Option<PeerId> {
        *self.inner.upstream.lock()
    }

    /// Returns `true` while `peer` is attached.
    pub fn is_attached(&self, peer: PeerId) -> bool {
        self.inner.links.lock().contains_key(&peer)
    }

    /// Closes the bus: every link is torn down and every pending result is
    /// rejected with `Closed`. Further dispatches fail immediately.
    pub fn close(&self) {
        self.inner.closed.cancel();
        let links: Vec<Link> = self.inner.links.lock().drain().map(|(_, l)| l).collect();
        *self.inner.upstream.lock() = None;
        for link in links {
            for (_, tx) in link.pending {
                let _ = tx.send(Err(IpcError::Closed));
            }
        }
    }

    /// Returns `true` once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .max_frame_length(self.inner.max_frame_length)
            .new_codec()
    }

    /// Encoded `Hosts` frame for the current handler table; `None` when empty.
    fn hosts_frame(&self) -> Option<Bytes> {
        let mut kinds: Vec<String> = self
            .inner
            .handlers
            .read()
            .keys()
            .map(|k| k.to_string())
            .collect();
        if kinds.is_empty() {
            return None;
        }
        kinds.sort();
        match self.checked_encode(&Frame::Hosts { kinds }) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!(target: "procvisor::ipc", error = %e, "cannot encode hosted kinds");
                None
            }
        }
    }

    /// Sends the current set of hosted kinds to every peer.
    fn advertise(&self) {
        let links = self.inner.links.lock();
        if links.is_empty() {
            return;
        }
        let bytes = match self.hosts_frame() {
            Some(bytes) => bytes,
            None => match self.checked_encode(&Frame::Hosts { kinds: Vec::new() }) {
                Ok(bytes) => bytes,
                Err(_) => return,
            },
        };
        for link in links.values() {
            let _ = link.outbound.send(bytes.clone());
        }
    }

    fn set_hosts(&self, peer: PeerId, kinds: Vec<String>) {
        if let Some(link) = self.inner.links.lock().get_mut(&peer) {
            tracing::debug!(target: "procvisor::ipc", %peer, ?kinds, "peer hosts");
            link.hosts = kinds.into_iter().collect();
        }
    }

    fn hosting_peers(&self, kind: &str) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self
            .inner
            .links
            .lock()
            .iter()
            .filter(|(_, link)| link.hosts.contains(kind))
            .map(|(peer, _)| *peer)
            .collect();
        peers.sort();
        peers
    }

    fn local_handlers(&self, kind: &str) -> Vec<Handler> {
        self.inner
            .handlers
            .read()
            .get(kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    fn request<T>(&self, peer: PeerId, kind: &'static str, payload: Value) -> Pending<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let id = self.inner.next_request.fetch_add(1, Ordering::Relaxed);
        let frame = Frame::Request {
            id,
            kind: kind.to_string(),
            payload,
        };
        let bytes = match self.checked_encode(&frame) {
            Ok(b) => b,
            Err(e) => return Pending::failed(kind, e),
        };

        let (tx, pending) = Pending::channel(kind);
        let mut links = self.inner.links.lock();
        let Some(link) = links.get_mut(&peer) else {
            let _ = tx.send(Err(IpcError::UnknownPeer { peer }));
            return pending;
        };
        if link.outbound.send(bytes).is_err() {
            let _ = tx.send(Err(IpcError::PeerLost { peer }));
            return pending;
        }
        link.pending.insert(id, tx);
        pending
    }

    fn send_frame(&self, peer: PeerId, frame: &Frame) -> Result<(), IpcError> {
        let bytes = self.checked_encode(frame)?;
        let links = self.inner.links.lock();
        let link = links.get(&peer).ok_or(IpcError::UnknownPeer { peer })?;
        link.outbound
            .send(bytes)
            .map_err(|_| IpcError::PeerLost { peer })
    }

    fn checked_encode(&self, frame: &Frame) -> Result<Bytes, IpcError> {
        let bytes = frame.encode()?;
        if bytes.len() > self.inner.max_frame_length {
            return Err(IpcError::Io {
                reason: format!(
                    "frame of {} bytes exceeds limit of {} bytes",
                    bytes.len(),
                    self.inner.max_frame_length
                ),
            });
        }
        Ok(bytes)
    }

    fn resolve(&self, peer: PeerId, id: u64, outcome: Outcome) {
        let tx = self
            .inner
            .links
            .lock()
            .get_mut(&peer)
            .and_then(|link| link.pending.remove(&id));
        let Some(tx) = tx else {
            tracing::debug!(target: "procvisor::ipc", %peer, id, "reply without pending request");
            return;
        };
        let result = match outcome {
            Outcome::Ok(body) => Ok(body),
            Outcome::Err(message) => Err(IpcError::Remote { message }),
        };
        let _ = tx.send(result);
    }

    fn answer(&self, peer: PeerId, id: u64, kind: String, payload: Value) {
        let handlers = self.local_handlers(&kind);
        let bus = self.clone();
        tokio::spawn(async move {
            let result = match handlers.len() {
                1 => {
                    tokio::select! {
                        res = handlers[0](payload) => res,
                        _ = bus.inner.closed.cancelled() => return,
                    }
                }
                0 => Err(IpcError::NoHandler { kind }),
                count => Err(IpcError::AmbiguousHandler { kind, count }),
            };
            let outcome = match result {
                Ok(body) => Outcome::Ok(body),
                Err(IpcError::Remote { message }) => Outcome::Err(message),
                Err(e) => Outcome::Err(e.to_string()),
            };
            if let Err(e) = bus.send_frame(peer, &Frame::Reply { id, outcome }) {
                tracing::debug!(target: "procvisor::ipc", %peer, id, error = %e, "reply dropped");
            }
        });
    }
}

fn encode_payload<M: Message>(msg: &M) -> Result<Value, IpcError> {
    serde_json::to_value(msg).map_err(|e| IpcError::Serialize {
        kind: M::KIND.to_string(),
        reason: e.to_string(),
    })
}

async fn fan_out(handlers: &[Handler], kind: &str, payload: &Value) {
    for handler in handlers {
        if let Err(e) = handler(payload.clone()).await {
            tracing::warn!(target: "procvisor::ipc", kind, error = %e, "subscriber failed");
        }
    }
}

async fn write_loop<W>(
    mut sink: FramedWrite<W, LengthDelimitedCodec>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    cancel: CancellationToken,
    peer: PeerId,
) where
    W: AsyncWrite + Send + Unpin + 'static,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = rx.recv() => {
                let Some(bytes) = next else { break };
                if let Err(e) = sink.send(bytes).await {
                    tracing::debug!(target: "procvisor::ipc", %peer, error = %e, "write failed");
                    break;
                }
            }
        }
    }
}

async fn read_loop<R>(
    bus: MessageBus,
    mut stream: FramedRead<R, LengthDelimitedCodec>,
    cancel: CancellationToken,
    peer: PeerId,
) where
    R: AsyncRead + Send + Unpin + 'static,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return,
            next = stream.next() => next,
        };
        let body = match next {
            Some(Ok(body)) => body,
            Some(Err(e)) => {
                tracing::warn!(target: "procvisor::ipc", %peer, error = %e, "link read failed");
                break;
            }
            None => break,
        };
        match Frame::decode(&body) {
            Ok(Frame::Request { id, kind, payload }) => bus.answer(peer, id, kind, payload),
            Ok(Frame::Reply { id, outcome }) => bus.resolve(peer, id, outcome),
            Ok(Frame::Publish { kind, payload }) => {
                fan_out(&bus.local_handlers(&kind), &kind, &payload).await;
            }
            Ok(Frame::Hosts { kinds }) => bus.set_hosts(peer, kinds),
            Err(e) => {
                tracing::warn!(
                    target: "procvisor::ipc",
                    %peer,
                    error = %e,
                    "malformed frame skipped"
                );
            }
        }
    }
    if bus.detach(peer) {
        tracing::debug!(target: "procvisor::ipc", %peer, "peer lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::{Handshake, HandshakeAck, LifecycleEvent};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    struct Echo(String);

    impl Message for Echo {
        const KIND: &'static str = "echo";
        type Reply = String;
    }

    #[derive(Serialize, Deserialize)]
    struct Stall;

    impl Message for Stall {
        const KIND: &'static str = "stall";
        type Reply = ();
    }

    /// Two buses wired together as parent (`left`) and child (`right`).
    fn linked() -> (MessageBus, PeerId, MessageBus) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let parent = MessageBus::new();
        let child = MessageBus::new();
        let peer = parent.attach(a_read, a_write);
        child.attach_upstream(b_read, b_write);
        (parent, peer, child)
    }

    /// Attaches one more child under `parent`.
    fn attach_child(parent: &MessageBus) -> (PeerId, MessageBus) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (a_read, a_write) = tokio::io::split(a);
        let (b_read, b_write) = tokio::io::split(b);
        let child = MessageBus::new();
        let peer = parent.attach(a_read, a_write);
        child.attach_upstream(b_read, b_write);
        (peer, child)
    }

    async fn until_hosts(bus: &MessageBus, peer: PeerId, kinds: &[&str]) {
        for _ in 0..200 {
            if bus.peer_hosts(peer) == kinds {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("{peer} never advertised {kinds:?}");
    }

    #[tokio::test]
    async fn test_dispatch_local_handler() {
        let bus = MessageBus::new();
        bus.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s.to_uppercase()) });
        assert_eq!(bus.dispatch(&Echo("hi".into())).await.unwrap(), "HI");
    }

    #[tokio::test]
    async fn test_dispatch_without_handler_is_routing_failure() {
        let bus = MessageBus::new();
        let err = bus.dispatch(&Echo("hi".into())).await.unwrap_err();
        assert!(matches!(err, IpcError::NoHandler { ref kind } if kind == "echo"));
    }

    #[tokio::test]
    async fn test_dispatch_with_two_handlers_is_ambiguous() {
        let bus = MessageBus::new();
        bus.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s) });
        bus.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s) });
        let err = bus.dispatch(&Echo("hi".into())).await.unwrap_err();
        assert!(matches!(err, IpcError::AmbiguousHandler { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handler() {
        let bus = MessageBus::new();
        let sub = bus.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s) });
        assert!(bus.unsubscribe(&sub));
        assert!(!bus.unsubscribe(&sub));
        assert_eq!(bus.handler_count("echo"), 0);
    }

    #[tokio::test]
    async fn test_handler_error_is_remote() {
        let bus = MessageBus::new();
        bus.subscribe(|_: Echo| async move { Err::<String, _>("nope") });
        let err = bus.dispatch(&Echo("x".into())).await.unwrap_err();
        assert!(matches!(err, IpcError::Remote { ref message } if message == "nope"));
    }

    #[tokio::test]
    async fn test_request_reply_across_link() {
        let (parent, _peer, child) = linked();
        parent.subscribe(|h: Handshake| async move {
            Ok::<_, String>(HandshakeAck { worker: h.worker })
        });
        let ack = child
            .dispatch(&Handshake {
                pid: 10,
                worker: "web".into(),
                handled_by: vec![],
            })
            .await
            .unwrap();
        assert_eq!(ack.worker, "web");
    }

    #[tokio::test]
    async fn test_publish_preserves_order_across_link() {
        let (parent, _peer, child) = linked();
        let (tx, mut rx) = mpsc::unbounded_channel();
        parent.subscribe(move |ev: LifecycleEvent| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(ev);
                Ok::<_, String>(())
            }
        });

        for delta in 1..=20 {
            child
                .publish(&LifecycleEvent::RequestCounterIncrease { pid: 1, delta })
                .await
                .unwrap();
        }
        for expected in 1..=20 {
            match rx.recv().await.unwrap() {
                LifecycleEvent::RequestCounterIncrease { delta, .. } => assert_eq!(delta, expected),
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_handler_hosted_by_child() {
        let (parent, peer, child) = linked();
        child.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s.to_uppercase()) });
        until_hosts(&parent, peer, &["echo"]).await;

        assert_eq!(parent.dispatch(&Echo("hi".into())).await.unwrap(), "HI");
    }

    #[tokio::test]
    async fn test_hosts_advertised_before_attach_are_sent_on_attach() {
        let parent = MessageBus::new();
        parent.subscribe(|h: Handshake| async move {
            Ok::<_, String>(HandshakeAck { worker: h.worker })
        });
        let (peer, child) = attach_child(&parent);
        let upstream = child.upstream().unwrap();
        until_hosts(&child, upstream, &["handshake"]).await;
        assert!(parent.peer_hosts(peer).is_empty());
    }

    #[tokio::test]
    async fn test_two_hosting_children_are_ambiguous_until_one_withdraws() {
        let parent = MessageBus::new();
        let (first, a) = attach_child(&parent);
        let (second, b) = attach_child(&parent);
        a.subscribe(|_: Echo| async move { Ok::<_, String>("a".to_string()) });
        let sub = b.subscribe(|_: Echo| async move { Ok::<_, String>("b".to_string()) });
        until_hosts(&parent, first, &["echo"]).await;
        until_hosts(&parent, second, &["echo"]).await;

        let err = parent.dispatch(&Echo("hi".into())).await.unwrap_err();
        assert!(matches!(err, IpcError::AmbiguousHandler { count: 2, .. }));
        let reply = parent.dispatch_to(second, &Echo("hi".into())).await;
        assert_eq!(reply.unwrap(), "b");

        assert!(b.unsubscribe(&sub));
        until_hosts(&parent, second, &[]).await;
        assert_eq!(parent.dispatch(&Echo("hi".into())).await.unwrap(), "a");
    }

    #[tokio::test]
    async fn test_local_and_remote_host_are_ambiguous() {
        let (parent, peer, child) = linked();
        child.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s) });
        parent.subscribe(|Echo(s): Echo| async move { Ok::<_, String>(s) });
        until_hosts(&parent, peer, &["echo"]).await;

        let err = parent.dispatch(&Echo("hi".into())).await.unwrap_err();
        assert!(matches!(err, IpcError::AmbiguousHandler { count: 2, .. }));
    }

    #[tokio::test]
    async fn test_peer_loss_rejects_pending() {
        let (parent, peer, child) = linked();
        child.subscribe(|_: Stall| async move {
            futures::future::pending::<()>().await;
            Ok::<_, String>(())
        });
        let pending = parent.dispatch_to(peer, &Stall);
        tokio::time::sleep(Duration::from_millis(20)).await;
        child.close();

        let err = pending.await.unwrap_err();
        assert!(matches!(err, IpcError::PeerLost { peer: p } if p == peer));
        assert!(!parent.is_attached(peer));
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_later_dispatches() {
        let bus = MessageBus::new();
        bus.subscribe(|_: Stall| async move {
            futures::future::pending::<()>().await;
            Ok::<_, String>(())
        });
        let pending = bus.dispatch(&Stall);
        tokio::task::yield_now().await;
        bus.close();
        assert!(matches!(pending.await, Err(IpcError::Closed)));
        assert!(matches!(bus.dispatch(&Stall).await, Err(IpcError::Closed)));
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (a, _b) = tokio::io::duplex(1024);
        let (r, w) = tokio::io::split(a);
        let bus = MessageBus::with_max_frame_length(64);
        bus.attach_upstream(r, w);
        let err = bus.dispatch(&Echo("x".repeat(256))).await.unwrap_err();
        assert_eq!(err.as_label(), "ipc_io");
    }
}
