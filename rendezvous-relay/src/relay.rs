use std::{
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use anyhow::{Context, Result};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{registry::Registry, router::serve_connection};

pub const DEFAULT_PORT: u16 = 10000;

pub struct Relay {
    listener: TcpListener,
    registry: Arc<Registry>,
}

impl Relay {
    /// Binds `0.0.0.0:<port>`. Port `0` picks an ephemeral port.
    pub async fn bind(port: u16) -> Result<Self> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {addr}"))?;
        Ok(Self::new(listener))
    }

    pub fn new(listener: TcpListener) -> Self {
        Self {
            listener,
            registry: Arc::new(Registry::new()),
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accepts connections until `shutdown` resolves.
    ///
    /// Any accept error is fatal and is returned to the caller.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let Relay { listener, registry } = self;
        tokio::pin!(shutdown);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!("relay shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    let (stream, peer) = accept_result.context("failed to accept connection")?;
                    spawn_connection_handler(stream, peer, &registry);
                }
            }
        }

        Ok(())
    }

    pub async fn run_until_ctrl_c(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = ?err, "failed to install ctrl-c handler");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn spawn_connection_handler(stream: TcpStream, peer: SocketAddr, registry: &Arc<Registry>) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(peer = %peer, error = ?err, "failed to set TCP_NODELAY");
    }

    let registry = Arc::clone(registry);
    tokio::spawn(async move {
        let (reader, writer) = stream.into_split();
        let outcome =
            serve_connection(BufReader::new(reader), writer, peer.to_string(), registry).await;
        debug!(peer = %peer, ?outcome, "connection handler finished");
    });
}
