//! DAP worker thread
//!
//! Dedicated thread that executes probe commands. It blocks on the request
//! queue, runs each packet through the [`CommandProcessor`] and pushes the
//! reply onto the response queue. Commands can take a while (target memory
//! access, SWD line turnarounds) so they never run on the network task.
//!
//! When the network side restarts the pipeline it closes the current
//! queues. The worker notices on its next receive, builds a fresh queue
//! pair and hands the network half back over a rendezvous channel.

use crate::config::PipelineSettings;
use crate::pipeline::CommandPipeline;
use async_channel::Sender;
use common::dap::{ID_DAP_EXECUTE_COMMANDS, ID_DAP_INVALID, ID_DAP_QUEUE_COMMANDS, response_len};
use common::{
    CommandProcessor, DAP_PACKET_SIZE, DapBridge, DapWorker, PipelineStats, RequestItem,
    ResponseItem, create_dap_bridge,
};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, trace};

/// Name of the worker thread
pub const WORKER_THREAD_NAME: &str = "dap-worker";

/// DAP worker thread state
pub struct DapWorkerThread<P: CommandProcessor> {
    processor: P,
    /// Current queue pair
    worker: DapWorker,
    /// Where replacement queues are sent after a restart
    handoff_tx: Sender<DapBridge>,
    queue_depth: usize,
    stats: Arc<PipelineStats>,
    response: [u8; DAP_PACKET_SIZE],
}

impl<P: CommandProcessor> DapWorkerThread<P> {
    /// Run until the network side is gone
    pub fn run(mut self) {
        info!("DAP worker thread started");

        loop {
            let mut request = match self.worker.recv_request() {
                Ok(request) => request,
                Err(_) => {
                    if self.recreate_queues() {
                        continue;
                    }
                    break;
                }
            };

            if self.worker.is_closed() {
                // Queued before a restart; its reply would go to nobody
                trace!(?request, "Discarding stale request");
                continue;
            }

            let response = self.execute(&mut request);

            match self.worker.send_response(response) {
                Ok(()) => self.stats.record_response(),
                Err(_) => debug!("Response queue closed, reply discarded"),
            }
        }

        info!("DAP worker thread stopped");
    }

    /// Run one request through the processor
    fn execute(&mut self, request: &mut RequestItem) -> ResponseItem {
        let buffer = request.buffer_mut();
        if buffer[0] == ID_DAP_QUEUE_COMMANDS {
            buffer[0] = ID_DAP_EXECUTE_COMMANDS;
        }

        self.response.fill(0);

        // A panicking processor still owes the host one reply per request
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            self.processor
                .process_command(request.buffer(), &mut self.response)
        }));

        match result {
            Ok(result) => {
                let len = response_len(result).min(DAP_PACKET_SIZE);
                trace!(command = request.buffer()[0], len, "DAP command executed");
                ResponseItem::from_payload(&self.response[..len])
            }
            Err(e) => {
                error!("Panic in DAP command processor: {:?}", e);
                ResponseItem::from_payload(&[ID_DAP_INVALID])
            }
        }
    }

    /// Build a fresh queue pair and hand its network half over
    ///
    /// Returns false once nobody is left to receive it.
    fn recreate_queues(&mut self) -> bool {
        let (bridge, worker) = create_dap_bridge(self.queue_depth);
        self.worker = worker;

        match self.handoff_tx.send_blocking(bridge) {
            Ok(()) => {
                self.stats.record_restart();
                debug!("DAP worker switched to fresh queues");
                true
            }
            Err(_) => {
                debug!("Network side gone, DAP worker exiting");
                false
            }
        }
    }
}

/// Start the worker thread for `processor`
///
/// Returns the network half of the pipeline and the thread handle. The
/// thread exits after the returned [`CommandPipeline`] is dropped.
pub fn spawn_dap_worker<P: CommandProcessor>(
    processor: P,
    settings: &PipelineSettings,
    stats: Arc<PipelineStats>,
) -> std::io::Result<(CommandPipeline, JoinHandle<()>)> {
    let (bridge, worker) = create_dap_bridge(settings.queue_depth);
    let (handoff_tx, handoff_rx) = async_channel::bounded(1);

    let worker_thread = DapWorkerThread {
        processor,
        worker,
        handoff_tx,
        queue_depth: settings.queue_depth,
        stats: stats.clone(),
        response: [0u8; DAP_PACKET_SIZE],
    };

    let handle = thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || worker_thread.run())?;

    let pipeline = CommandPipeline::new(
        bridge,
        handoff_rx,
        settings.fast_path_timeout(),
        stats,
    );
    Ok((pipeline, handle))
}
