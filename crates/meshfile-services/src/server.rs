//! TCP listener: accepts peers and hands each to its own dispatcher task.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::dispatch::{ConnectionDispatcher, NodeContext};

pub struct NodeServer {
    listener: TcpListener,
    dispatcher: ConnectionDispatcher,
}

impl NodeServer {
    pub async fn bind(addr: &str, ctx: Arc<NodeContext>) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            dispatcher: ConnectionDispatcher::new(ctx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("listener has no local address")
    }

    /// Accept until shutdown. Connections are unbounded; the loop never
    /// waits on any one of them.
    pub async fn run(self, shutdown: broadcast::Sender<()>) -> Result<()> {
        let mut stop = shutdown.subscribe();
        tracing::info!(addr = %self.local_addr()?, "node listening");

        loop {
            tokio::select! {
                _ = stop.recv() => {
                    tracing::info!("listener shutting down");
                    return Ok(());
                }

                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(a) => a,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "set_nodelay failed");
                    }
                    let dispatcher = self.dispatcher.clone();
                    let conn_shutdown = shutdown.subscribe();
                    tokio::spawn(async move {
                        dispatcher.serve(stream, peer.to_string(), conn_shutdown).await;
                    });
                }
            }
        }
    }
}
