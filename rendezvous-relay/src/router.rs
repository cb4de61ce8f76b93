use std::{io, sync::Arc};

use tokio::{
    io::{AsyncBufRead, AsyncWrite},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    protocol::{RoutingDirective, encode_forward, lossy, parse_identity, read_line},
    registry::{Connection, Registry},
};

/// Why a connection handler stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
    /// The stream ended before an identity line arrived.
    BeforeIdentity,
    /// The peer hung up or its stream failed.
    PeerClosed { identity: Vec<u8> },
    /// The relay closed it: displaced by a newer registration, or evicted
    /// after a forward to it failed.
    ClosedByRelay { identity: Vec<u8> },
}

/// How the routing loop ended.
enum StreamEnd {
    Eof,
    Failed(io::Error),
    ClosedByRelay,
}

/// Serves one client from registration until disconnect.
///
/// The reader is owned by this handler; the writer becomes the shared
/// [`Connection`] other handlers forward into.
pub async fn serve_connection<R, W>(
    mut reader: R,
    writer: W,
    label: String,
    registry: Arc<Registry>,
) -> Disconnect
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Send + Unpin + 'static,
{
    let mut line = Vec::new();

    let identity = match read_line(&mut reader, &mut line).await {
        Ok(true) => parse_identity(&line),
        Ok(false) => {
            info!(peer = %label, "aborting connection before client identity was received");
            return Disconnect::BeforeIdentity;
        }
        Err(err) => {
            info!(
                peer = %label,
                error = %err,
                "aborting connection before client identity was received"
            );
            return Disconnect::BeforeIdentity;
        }
    };

    let connection = Connection::new(label, writer);
    register_identity(&registry, &identity, &connection).await;

    let end = run_routing_loop(&registry, &identity, &connection, &mut reader, &mut line).await;
    cleanup_connection(&registry, identity, &connection, end).await
}

async fn register_identity(registry: &Registry, identity: &[u8], connection: &Arc<Connection>) {
    if let Some(existing) = registry.register(identity, Arc::clone(connection)).await {
        info!(
            identity = %lossy(identity),
            peer = existing.label(),
            replacement = connection.label(),
            "closing connection to make room for new registration"
        );
        existing.close();
    }
    info!(
        identity = %lossy(identity),
        peer = connection.label(),
        id = %connection.id(),
        "client registered"
    );
}

async fn run_routing_loop<R>(
    registry: &Registry,
    identity: &[u8],
    connection: &Connection,
    reader: &mut R,
    line: &mut Vec<u8>,
) -> StreamEnd
where
    R: AsyncBufRead + Unpin,
{
    loop {
        select! {
            biased;
            _ = connection.closed() => return StreamEnd::ClosedByRelay,
            result = read_line(reader, line) => match result {
                Ok(true) => route_line(registry, identity, connection, line).await,
                Ok(false) => return StreamEnd::Eof,
                Err(err) => return StreamEnd::Failed(err),
            },
        }
    }
}

async fn route_line(registry: &Registry, sender: &[u8], connection: &Connection, line: &[u8]) {
    let Some(directive) = RoutingDirective::parse(line) else {
        info!(
            identity = %lossy(sender),
            peer = connection.label(),
            line = %lossy(line).trim_end(),
            "ignoring malformed input"
        );
        return;
    };

    let Some(destination) = registry.lookup(&directive.destination).await else {
        info!(
            identity = %lossy(sender),
            peer = connection.label(),
            destination = %lossy(&directive.destination),
            "ignoring message, destination peer not found"
        );
        return;
    };

    let message = encode_forward(sender, &directive.payload);
    match destination.send_line(&message).await {
        Ok(()) => debug!(
            identity = %lossy(sender),
            peer = connection.label(),
            destination = %lossy(&directive.destination),
            bytes = directive.payload.len(),
            "forwarded message"
        ),
        Err(err) => evict_destination(registry, &directive.destination, &destination, err).await,
    }
}

async fn evict_destination(
    registry: &Registry,
    identity: &[u8],
    destination: &Arc<Connection>,
    err: io::Error,
) {
    let removed = registry.remove_if_current(identity, destination.id()).await;
    warn!(
        destination = %lossy(identity),
        peer = destination.label(),
        error = %err,
        removed,
        "failed to forward message, closing destination"
    );
    destination.close();
}

/// Unregisters before touching the writer, which a stalled forward may hold.
async fn cleanup_connection(
    registry: &Registry,
    identity: Vec<u8>,
    connection: &Connection,
    end: StreamEnd,
) -> Disconnect {
    // Aborts forwards still blocked on this connection.
    connection.close();

    if registry.remove_if_current(&identity, connection.id()).await {
        info!(identity = %lossy(&identity), peer = connection.label(), "connection closed");
    } else {
        // Superseded: the registry already points at the replacement.
        debug!(
            identity = %lossy(&identity),
            peer = connection.label(),
            "connection closed after being replaced"
        );
    }

    if let Err(err) = connection.shutdown().await {
        debug!(
            identity = %lossy(&identity),
            peer = connection.label(),
            error = %err,
            "failed to shut down writer"
        );
    }

    match end {
        StreamEnd::ClosedByRelay => Disconnect::ClosedByRelay { identity },
        StreamEnd::Failed(err) => {
            debug!(
                identity = %lossy(&identity),
                peer = connection.label(),
                error = %err,
                "read failed"
            );
            Disconnect::PeerClosed { identity }
        }
        StreamEnd::Eof => Disconnect::PeerClosed { identity },
    }
}
