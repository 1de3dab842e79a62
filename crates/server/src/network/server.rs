//! USB/IP TCP server
//!
//! Listens on the USB/IP port and serves one client at a time. Every new
//! connection restarts the command pipeline so replies queued for a previous
//! client are never delivered to the next one.

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use super::session::Session;
use crate::config::ServerConfig;
use crate::pipeline::CommandPipeline;
use crate::usb::{DescriptorSet, StandardControlHandler, SwoTrace};
use crate::usbip::{EndpointDispatcher, Stage1Handler};

/// Pause after a failed accept before trying again
pub const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// USB/IP server exporting a single debug probe
pub struct UsbIpServer {
    listener: TcpListener,
    /// Command pipeline shared by consecutive sessions
    pipeline: CommandPipeline,
    stage1: Stage1Handler,
    descriptors: Arc<DescriptorSet>,
    /// SWO trace source, `None` when disabled
    trace: Option<SwoTrace>,
    tcp_nodelay: bool,
}

impl UsbIpServer {
    /// Bind the listener described by `config`
    pub async fn bind(
        config: &ServerConfig,
        pipeline: CommandPipeline,
        trace: Option<SwoTrace>,
    ) -> Result<Self> {
        let stage1 = Stage1Handler::from_settings(&config.device)
            .context("Invalid device description")?;
        let descriptors = Arc::new(DescriptorSet::new(&config.device));

        let listener = TcpListener::bind(&config.server.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;

        info!(
            "USB/IP server listening on {} (busid {})",
            listener.local_addr()?,
            config.device.busid
        );

        Ok(Self {
            listener,
            pipeline,
            stage1,
            descriptors,
            trace,
            tcp_nodelay: config.server.tcp_nodelay,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept and serve clients one after another
    ///
    /// Only returns if the DAP worker is gone.
    pub async fn run(mut self) -> Result<()> {
        info!("Waiting for USB/IP clients...");

        loop {
            let listener = &self.listener;
            let (stream, peer) = accept_retrying(|| listener.accept(), ACCEPT_RETRY_DELAY).await;

            info!("Accepted connection from {}", peer);

            self.pipeline
                .restart()
                .await
                .context("DAP worker stopped")?;

            if let Err(e) = self.serve(stream, peer).await {
                error!("Connection error from {}: {:#}", peer, e);
            }

            let stats = self.pipeline.stats().snapshot();
            info!(
                requests = stats.requests_queued,
                responses = stats.responses_produced,
                fast_path = stats.fast_path_deliveries,
                empty_polls = stats.empty_polls,
                faults = stats.consistency_faults,
                restarts = stats.restarts,
                "Session with {} ended",
                peer
            );
        }
    }

    async fn serve(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if self.tcp_nodelay
            && let Err(e) = stream.set_nodelay(true)
        {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        let control = StandardControlHandler::new(self.descriptors.clone());
        let dispatcher = EndpointDispatcher::new(Box::new(control), self.trace.clone());

        let mut session = Session::new(&self.stage1, dispatcher, &self.pipeline);
        session.run(stream).await?;

        debug!("Session with {} finished in state {:?}", peer, session.state());
        Ok(())
    }
}

/// Call `accept` until it succeeds, pausing `delay` after each failure
///
/// Errors like EMFILE persist until something closes, so retrying at once
/// would only spin.
async fn accept_retrying<F, Fut, T>(mut accept: F, delay: Duration) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(conn) => return conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
