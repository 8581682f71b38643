//! Transport sessions.
//!
//! # Responsibilities
//! - Give each accept or connect stream an id for the pair registry
//! - Read into shared buffers so decoded bodies reference the read storage
//! - Expose a close handle with listener registration, so closing one
//!   side of a pair can close the other
//!
//! # Design Decisions
//! - The close handle is separate from the stream: the registry and the
//!   shutdown path hold handles, only the owning task holds the stream.
//! - A pending read returns `None` as soon as the handle is closed.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

use crate::buffer::{BufferFlags, GatewayBuffer};

static SESSION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

const READ_CHUNK: usize = 16 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Next process-unique id.
    pub fn new() -> Self {
        Self(SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// Faces the client.
    Accept,
    /// Faces the backend.
    Connect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseMode {
    /// Flush pending writes first.
    Graceful,
    Immediate,
}

/// Identity resolved by an authentication layer in front of the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal(pub String);

type CloseListener = Box<dyn FnOnce(CloseMode) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey(u64);

struct CloseInner {
    state: watch::Sender<Option<CloseMode>>,
    listeners: Mutex<Vec<(ListenerKey, CloseListener)>>,
    next_key: AtomicU64,
}

/// Shared close signal of one session.
#[derive(Clone)]
pub struct CloseHandle {
    inner: Arc<CloseInner>,
}

impl std::fmt::Debug for CloseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloseHandle")
            .field("mode", &self.mode())
            .finish()
    }
}

impl Default for CloseHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CloseHandle {
    /// An open handle with no listeners.
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        Self {
            inner: Arc::new(CloseInner {
                state,
                listeners: Mutex::new(Vec::new()),
                next_key: AtomicU64::new(1),
            }),
        }
    }

    /// Mark the session closed and run its listeners. Returns `false` when
    /// it was already closed.
    pub fn close(&self, immediate: bool) -> bool {
        let mode = if immediate {
            CloseMode::Immediate
        } else {
            CloseMode::Graceful
        };
        let first = self.inner.state.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(mode);
            true
        });
        if first {
            let listeners = match self.inner.listeners.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            for (_, listener) in listeners {
                listener(mode);
            }
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.borrow().is_some()
    }

    /// How the session was closed, once it has been.
    pub fn mode(&self) -> Option<CloseMode> {
        *self.inner.state.borrow()
    }

    /// Resolves once the session is closed.
    pub fn closed(&self) -> impl Future<Output = CloseMode> + Send + 'static {
        let mut rx = self.inner.state.subscribe();
        async move {
            match rx.wait_for(Option::is_some).await {
                Ok(state) => (*state).unwrap_or(CloseMode::Immediate),
                // The sender lives as long as any handle, including ours.
                Err(_) => CloseMode::Immediate,
            }
        }
    }

    /// Run `listener` when the session closes; immediately if it already has.
    pub fn on_close(&self, listener: impl FnOnce(CloseMode) + Send + 'static) -> ListenerKey {
        let key = ListenerKey(self.inner.next_key.fetch_add(1, Ordering::Relaxed));
        let mut guard = match self.inner.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Checked under the lock: `close` takes the list under the same lock.
        if let Some(mode) = self.mode() {
            drop(guard);
            listener(mode);
            return key;
        }
        guard.push((key, Box::new(listener)));
        key
    }

    /// Drop a listener before it runs. `false` when it already ran or was
    /// removed.
    pub fn remove_listener(&self, key: ListenerKey) -> bool {
        let mut guard = match self.inner.listeners.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = guard.len();
        guard.retain(|(k, _)| *k != key);
        guard.len() != before
    }
}

/// One side of a proxied flow.
pub struct Session<S> {
    id: SessionId,
    role: SessionRole,
    stream: S,
    close: CloseHandle,
    principal: Option<Principal>,
    read_buf: BytesMut,
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("close", &self.close)
            .finish()
    }
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Session for a client connection.
    pub fn accept(stream: S) -> Self {
        Self::new(SessionRole::Accept, stream)
    }

    /// Session for a backend connection.
    pub fn connect(stream: S) -> Self {
        Self::new(SessionRole::Connect, stream)
    }

    fn new(role: SessionRole, stream: S) -> Self {
        Self {
            id: SessionId::new(),
            role,
            stream,
            close: CloseHandle::new(),
            principal: None,
            read_buf: BytesMut::with_capacity(READ_CHUNK),
        }
    }

    /// Attach the authenticated client identity.
    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn role(&self) -> SessionRole {
        self.role
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    /// Handle other tasks use to close this session.
    pub fn close_handle(&self) -> &CloseHandle {
        &self.close
    }

    pub fn is_closed(&self) -> bool {
        self.close.is_closed()
    }

    /// Next chunk of input as a shared buffer; `None` at end of stream or
    /// once the session is closed.
    pub async fn read(&mut self) -> std::io::Result<Option<GatewayBuffer>> {
        if self.close.is_closed() {
            return Ok(None);
        }
        if self.read_buf.capacity() < READ_CHUNK {
            self.read_buf.reserve(READ_CHUNK);
        }
        let closed = self.close.closed();
        let n = tokio::select! {
            read = self.stream.read_buf(&mut self.read_buf) => read?,
            _ = closed => return Ok(None),
        };
        if n == 0 {
            return Ok(None);
        }
        let chunk = self.read_buf.split().freeze();
        Ok(Some(GatewayBuffer::wrap(chunk, BufferFlags::SHARED)))
    }

    /// Write all of `buffer`. Not flushed.
    pub async fn write(&mut self, buffer: GatewayBuffer) -> std::io::Result<()> {
        if buffer.has_remaining() {
            self.stream.write_all(buffer.as_slice()).await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> std::io::Result<()> {
        self.stream.flush().await
    }

    /// Close the session. A graceful close flushes and shuts down the write
    /// half first; errors doing so are ignored since the peer may be gone.
    pub async fn close(&mut self, immediate: bool) {
        if !immediate && self.close.mode() != Some(CloseMode::Immediate) {
            let _ = self.stream.flush().await;
            let _ = self.stream.shutdown().await;
        }
        if self.close.close(immediate) {
            tracing::trace!(session = %self.id, role = ?self.role, immediate, "session closed");
        }
    }

    /// The underlying stream, for raw forwarding.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}
