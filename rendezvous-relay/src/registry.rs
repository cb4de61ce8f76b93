use std::{
    collections::HashMap,
    fmt, io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::{
    io::{AsyncWrite, AsyncWriteExt},
    select,
    sync::{Mutex, watch},
};

use crate::protocol::write_line;

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The sending side of one accepted stream.
///
/// The read half stays with the handler task that owns the connection; this
/// handle is what other handlers reach through the [`Registry`].
pub struct Connection {
    id: ConnectionId,
    label: String,
    writer: Mutex<BoxedWriter>,
    closed: watch::Sender<bool>,
}

impl Connection {
    pub fn new<W>(label: impl Into<String>, writer: W) -> Arc<Self>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Arc::new(Self {
            id: ConnectionId::next(),
            label: label.into(),
            writer: Mutex::new(Box::new(writer)),
            closed,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address, used only in diagnostics.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Writes one already framed line. Concurrent senders are serialized.
    ///
    /// Fails with `ConnectionAborted` once the connection is closed, including
    /// while waiting on the lock or on a peer that stopped reading.
    pub async fn send_line(&self, line: &[u8]) -> io::Result<()> {
        select! {
            biased;
            _ = self.closed() => Err(io::ErrorKind::ConnectionAborted.into()),
            result = async {
                let mut writer = self.writer.lock().await;
                write_line(&mut *writer, line).await
            } => result,
        }
    }

    /// Asks the owning handler to stop serving this connection.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Resolves once [`Connection::close`] has been called.
    pub async fn closed(&self) {
        let mut receiver = self.closed.subscribe();
        // The sender lives in `self`, so the channel cannot be dropped here.
        let _ = receiver.wait_for(|closed| *closed).await;
    }

    /// Half-closes the write side so the peer observes end of stream.
    ///
    /// Never waits for the writer. If a forward still holds it, nothing is
    /// done here and the stream closes when the last handle is dropped.
    pub async fn shutdown(&self) -> io::Result<()> {
        match self.writer.try_lock() {
            Ok(mut writer) => writer.shutdown().await,
            Err(_) => Ok(()),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Maps each identity to the connection currently claiming it.
///
/// Identities are compared as raw bytes.
///
/// Every operation is a single critical section. A connection is reachable
/// under an identity only while the entry holds that exact connection, so
/// callers compare by [`ConnectionId`], never by identity alone.
#[derive(Default)]
pub struct Registry {
    connections: Mutex<HashMap<Vec<u8>, Arc<Connection>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `connection` under `identity`, overwriting any previous entry.
    ///
    /// Returns the displaced connection when it was a different one. The
    /// caller is responsible for closing it.
    pub async fn register(
        &self,
        identity: &[u8],
        connection: Arc<Connection>,
    ) -> Option<Arc<Connection>> {
        let id = connection.id();
        let mut connections = self.connections.lock().await;
        connections
            .insert(identity.to_vec(), connection)
            .filter(|existing| existing.id() != id)
    }

    pub async fn lookup(&self, identity: &[u8]) -> Option<Arc<Connection>> {
        let connections = self.connections.lock().await;
        connections.get(identity).cloned()
    }

    /// Removes the entry for `identity` only if it still points at `id`.
    pub async fn remove_if_current(&self, identity: &[u8], id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.get(identity) {
            Some(current) if current.id() == id => {
                connections.remove(identity);
                true
            }
            _ => false,
        }
    }

    pub async fn is_current(&self, identity: &[u8], id: ConnectionId) -> bool {
        let connections = self.connections.lock().await;
        connections
            .get(identity)
            .is_some_and(|current| current.id() == id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn identities(&self) -> Vec<Vec<u8>> {
        let connections = self.connections.lock().await;
        let mut identities: Vec<Vec<u8>> = connections.keys().cloned().collect();
        identities.sort();
        identities
    }
}
