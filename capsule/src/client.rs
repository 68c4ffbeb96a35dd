//! Blocking RPC client to the scheduler
//!
//! The correlation handoff suspends the calling capsule thread until the
//! scheduler replies, so this client is deliberately synchronous: one
//! `std::net::TcpStream`, one in-flight request at a time, no timeout.
//! Frames are u32 big-endian length-prefixed bincode, matching the
//! `LengthDelimitedCodec` framing on the scheduler side.

use anyhow::{Context, Result};
use gpuscope_shared::protocol::wire::{Reply, ReplyFrame, Request, RequestFrame};
use gpuscope_shared::types::instruction::Instruction;
use gpuscope_shared::types::region::{RegionEvent, RegionHash};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Mutex;

/// Upper bound on a single reply frame; anything larger is a corrupt stream.
const MAX_FRAME_BYTES: u32 = 16 * 1024 * 1024;

/// Synchronous, single-flight client for one capsule process.
pub struct SchedulerClient {
    stream: Mutex<TcpStream>,
    pid: u32,
}

impl SchedulerClient {
    /// Connect and perform the initial handshake, registering this process
    /// in the capsule world.
    pub fn connect(addr: &str, pid: u32) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("failed to connect to scheduler at {}", addr))?;
        stream.set_nodelay(true)?;

        let client = Self {
            stream: Mutex::new(stream),
            pid,
        };
        match client.call(Request::Hello { pid })? {
            Reply::Welcome => Ok(client),
            other => anyhow::bail!("handshake rejected: {:?}", other),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Notify the scheduler that a region opened. Fire-and-forget aside from
    /// the acknowledgement.
    pub fn report_open(
        &self,
        begin_hash: RegionHash,
        name: &str,
        begin_location: &str,
    ) -> Result<()> {
        match self.call(Request::RegionOpen {
            pid: self.pid,
            begin_hash,
            name: name.to_string(),
            begin_location: begin_location.to_string(),
        })? {
            Reply::Ack => Ok(()),
            Reply::Error(e) => anyhow::bail!("scheduler rejected region open: {}", e),
            other => anyhow::bail!("unexpected reply to region open: {:?}", other),
        }
    }

    /// The correlation handoff: submit a closed region and block until the
    /// scheduler answers with an instruction. No timeout by design; the
    /// scheduler must eventually reply or this thread stays suspended.
    pub fn report_and_wait(&self, event: RegionEvent) -> Result<Instruction> {
        match self.call(Request::RegionReport {
            pid: self.pid,
            event,
        })? {
            Reply::Instruction(instruction) => Ok(instruction),
            Reply::Error(e) => anyhow::bail!("region report failed: {}", e),
            other => anyhow::bail!("unexpected reply to region report: {:?}", other),
        }
    }

    /// Push a counter snapshot collected after a `Reconfigure` instruction.
    pub fn report_counters(&self, region_name: &str, metrics: Vec<(String, f64)>) -> Result<()> {
        match self.call(Request::CounterReport {
            pid: self.pid,
            region_name: region_name.to_string(),
            metrics,
        })? {
            Reply::Ack => Ok(()),
            Reply::Error(e) => anyhow::bail!("counter report failed: {}", e),
            other => anyhow::bail!("unexpected reply to counter report: {:?}", other),
        }
    }

    /// Orderly disconnect.
    pub fn goodbye(&self) -> Result<()> {
        match self.call(Request::Goodbye { pid: self.pid })? {
            Reply::Ack => Ok(()),
            other => anyhow::bail!("unexpected reply to goodbye: {:?}", other),
        }
    }

    fn call(&self, request: Request) -> Result<Reply> {
        let mut stream = self.stream.lock().expect("client stream poisoned");
        write_frame(&mut *stream, &RequestFrame::new(request).to_bytes()?)?;
        let bytes = read_frame(&mut *stream)?;
        Ok(ReplyFrame::from_bytes(&bytes)?.body)
    }
}

fn write_frame(stream: &mut TcpStream, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len()).context("frame too large")?;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream
        .read_exact(&mut len_bytes)
        .context("scheduler closed the connection")?;
    let len = u32::from_be_bytes(len_bytes);
    anyhow::ensure!(len <= MAX_FRAME_BYTES, "oversized frame: {} bytes", len);
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Minimal frame-level scheduler stand-in: answers Hello with Welcome
    /// and everything else with a canned reply.
    fn serve_once(reply: Reply) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            // Handshake
            let bytes = read_frame(&mut stream).unwrap();
            let frame = RequestFrame::from_bytes(&bytes).unwrap();
            assert!(matches!(frame.body, Request::Hello { .. }));
            write_frame(
                &mut stream,
                &ReplyFrame::new(Reply::Welcome).to_bytes().unwrap(),
            )
            .unwrap();
            // One request, canned reply
            let _ = read_frame(&mut stream).unwrap();
            write_frame(&mut stream, &ReplyFrame::new(reply).to_bytes().unwrap()).unwrap();
        });
        addr
    }

    #[test]
    fn test_handshake_and_instruction() {
        let addr = serve_once(Reply::Instruction(Instruction::Continue));
        let client = SchedulerClient::connect(&addr, 42).unwrap();
        let event = RegionEvent {
            name: "matmul".to_string(),
            begin_hash: 1,
            end_hash: 1,
            begin_location: "a.py:10".to_string(),
            end_location: "a.py:10".to_string(),
            started_ms: 0,
            completed_ms: 5,
        };
        let instruction = client.report_and_wait(event).unwrap();
        assert_eq!(instruction, Instruction::Continue);
    }

    #[test]
    fn test_error_reply_surfaces_as_error() {
        let addr = serve_once(Reply::Error("no matching open region".to_string()));
        let client = SchedulerClient::connect(&addr, 7).unwrap();
        let event = RegionEvent {
            name: "orphan".to_string(),
            begin_hash: 9,
            end_hash: 9,
            begin_location: "b.py:1".to_string(),
            end_location: "b.py:1".to_string(),
            started_ms: 0,
            completed_ms: 1,
        };
        assert!(client.report_and_wait(event).is_err());
    }

    #[test]
    fn test_connect_refused() {
        // Port 1 is essentially never listening
        assert!(SchedulerClient::connect("127.0.0.1:1", 1).is_err());
    }
}
