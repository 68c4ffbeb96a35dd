//! Capsule-facing TCP server
//!
//! One framed connection per capsule. Every request gets exactly one reply;
//! the capsule blocks on each region close until its `Instruction` arrives,
//! which is what lets the scheduler pace the workload.

use crate::watch::{StepContext, Verdict};
use crate::Scheduler;
use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use gpuscope_shared::protocol::wire::{Reply, ReplyFrame, Request, RequestFrame};
use gpuscope_shared::types::instruction::Instruction;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, info, warn};

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

impl Scheduler {
    /// Bind the listen address and start accepting capsule connections in
    /// the background. Idempotent: a second call is a no-op, so embedding
    /// code can call it defensively.
    pub async fn serve(self: &Arc<Self>) -> Result<()> {
        if self.serving_flag().swap(true, Ordering::SeqCst) {
            debug!("scheduler already serving");
            return Ok(());
        }

        let listener = TcpListener::bind(&self.config().listen_addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config().listen_addr))?;
        let addr = listener.local_addr()?;
        self.set_local_addr(addr);
        info!(%addr, world_size = self.config().world_size, "scheduler listening");

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let scheduler = Arc::clone(&scheduler);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(scheduler, stream).await {
                                warn!(%peer, "capsule connection failed: {e:#}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                }
            }
        });
        Ok(())
    }
}

async fn handle_connection(scheduler: Arc<Scheduler>, stream: TcpStream) -> Result<()> {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    let mut framed = Framed::new(stream, codec);

    // Learned from the Hello; a capsule that dies mid-run is cleaned up on
    // stream end.
    let mut pid: Option<u32> = None;

    while let Some(frame) = framed.next().await {
        let bytes = frame.context("failed to read request frame")?;
        let reply = match RequestFrame::from_bytes(&bytes) {
            Ok(frame) => handle_request(&scheduler, frame.body, &mut pid),
            Err(e) => {
                warn!("undecodable request frame: {e:#}");
                Reply::Error(format!("undecodable request: {e:#}"))
            }
        };
        let bytes = ReplyFrame::new(reply).to_bytes()?;
        framed.send(bytes.into()).await?;
    }

    if let Some(pid) = pid {
        debug!(pid, "capsule disconnected");
        scheduler.registry().deregister(pid);
        scheduler.trace().drop_capsule(pid);
    }
    Ok(())
}

fn handle_request(scheduler: &Scheduler, request: Request, conn_pid: &mut Option<u32>) -> Reply {
    match request {
        Request::Hello { pid } => {
            *conn_pid = Some(pid);
            scheduler.registry().register(pid);
            Reply::Welcome
        }
        Request::RegionOpen {
            pid,
            begin_hash,
            name,
            ..
        } => {
            scheduler.trace().note_open(pid, begin_hash, &name);
            Reply::Ack
        }
        Request::RegionReport { pid, event } => {
            let name = event.name.clone();
            if let Err(e) = scheduler.trace().complete(pid, event.clone()) {
                warn!(pid, region = %name, "region report rejected: {e}");
                return Reply::Error(e.to_string());
            }

            // A pending profile plan takes precedence over the watch policy:
            // the region is re-run with counter collection enabled.
            if let Some(metric_names) = scheduler.plan().reconfigure_metrics(&name) {
                return Reply::Instruction(Instruction::Reconfigure { metric_names });
            }

            Reply::Instruction(decide(scheduler, event))
        }
        Request::CounterReport {
            pid,
            region_name,
            metrics,
        } => {
            debug!(pid, region = %region_name, count = metrics.len(), "counter snapshot");
            scheduler.plan().record(&region_name, metrics);
            Reply::Ack
        }
        Request::Goodbye { pid } => {
            scheduler.registry().deregister(pid);
            scheduler.trace().drop_capsule(pid);
            Reply::Ack
        }
    }
}

/// Run the watch policy over a completed region. Policy failure stops the
/// reporting capsule; a policy *error* does not, it only warns.
fn decide(scheduler: &Scheduler, event: gpuscope_shared::types::region::RegionEvent) -> Instruction {
    let name = event.name.clone();
    let ctx = StepContext {
        recent_events: scheduler.trace().recent(32),
        counters: scheduler.plan().latest(&name).unwrap_or_default(),
        device: None,
        event,
    };
    let mut policy = scheduler.policy().lock().expect("watch policy poisoned");
    match policy.decide(&ctx) {
        Ok(Verdict::Pass) => Instruction::Continue,
        Ok(Verdict::Warn(msg)) => {
            warn!(region = %name, policy = policy.name(), "watch policy warning: {msg}");
            Instruction::Continue
        }
        Ok(Verdict::Fail(msg)) => {
            warn!(region = %name, policy = policy.name(), "watch policy failed: {msg}");
            Instruction::Stop
        }
        Err(e) => {
            warn!(region = %name, policy = policy.name(), "watch policy error: {e:#}");
            Instruction::Continue
        }
    }
}
