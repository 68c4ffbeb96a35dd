//! Region open/close flow against a frame-level scheduler stand-in.

use anyhow::Result;
use gpuscope_capsule::engine::{CaptureCall, RecordingEngine};
use gpuscope_capsule::{source_location, Capsule};
use gpuscope_shared::protocol::wire::{Reply, ReplyFrame, Request, RequestFrame};
use gpuscope_shared::types::instruction::Instruction;
use gpuscope_shared::types::region::region_hash;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;

fn read_frame(stream: &mut TcpStream) -> Result<Vec<u8>> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes)?;
    let mut payload = vec![0u8; u32::from_be_bytes(len_bytes) as usize];
    stream.read_exact(&mut payload)?;
    Ok(payload)
}

fn write_reply(stream: &mut TcpStream, reply: Reply) -> Result<()> {
    let payload = ReplyFrame::new(reply).to_bytes()?;
    stream.write_all(&(payload.len() as u32).to_be_bytes())?;
    stream.write_all(&payload)?;
    Ok(())
}

/// Answers every request with the obvious reply; `close_instruction`
/// controls what region reports get back. Returns the listen address and a
/// join handle yielding the observed region reports.
fn spawn_stub_scheduler(
    close_instruction: Instruction,
) -> (String, thread::JoinHandle<Vec<Request>>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut seen = Vec::new();
        loop {
            let bytes = match read_frame(&mut stream) {
                Ok(b) => b,
                Err(_) => break, // capsule hung up
            };
            let request = RequestFrame::from_bytes(&bytes).unwrap().body;
            let reply = match &request {
                Request::Hello { .. } => Reply::Welcome,
                Request::RegionOpen { .. } => Reply::Ack,
                Request::RegionReport { .. } => Reply::Instruction(close_instruction.clone()),
                Request::CounterReport { .. } => Reply::Ack,
                Request::Goodbye { .. } => {
                    seen.push(request);
                    write_reply(&mut stream, Reply::Ack).unwrap();
                    break;
                }
            };
            seen.push(request);
            write_reply(&mut stream, reply).unwrap();
        }
        seen
    });
    (addr, handle)
}

#[test]
fn test_open_close_reports_matching_hashes() -> Result<()> {
    let (addr, handle) = spawn_stub_scheduler(Instruction::Continue);
    let engine = Arc::new(RecordingEngine::default());
    let capsule = Capsule::connect(&addr, Box::new(Arc::clone(&engine)))?;

    let region = capsule.open_region("matmul", "a.py:10")?;
    assert_eq!(region.begin_hash(), region_hash("a.py:10"));
    let instruction = region.close("a.py:10")?;
    assert_eq!(instruction, Instruction::Continue);
    assert!(!capsule.is_stopped());
    capsule.shutdown()?;

    // Engine saw a balanced capture bracket with equal hashes (identical
    // open and close locations).
    let calls = engine.calls();
    assert_eq!(calls.len(), 2);
    match (&calls[0], &calls[1]) {
        (
            CaptureCall::Start { begin_hash, .. },
            CaptureCall::Stop {
                begin_hash: stop_begin,
                end_hash,
                ..
            },
        ) => {
            assert_eq!(begin_hash, stop_begin);
            assert_eq!(begin_hash, end_hash);
        }
        other => panic!("unexpected capture calls: {:?}", other),
    }

    // Scheduler saw open before report, with the same identity hash.
    let seen = handle.join().unwrap();
    let open_hash = seen.iter().find_map(|r| match r {
        Request::RegionOpen { begin_hash, .. } => Some(*begin_hash),
        _ => None,
    });
    let report = seen.iter().find_map(|r| match r {
        Request::RegionReport { event, .. } => Some(event.clone()),
        _ => None,
    });
    let report = report.expect("no region report seen");
    assert_eq!(open_hash, Some(report.begin_hash));
    assert_eq!(report.name, "matmul");
    assert!(report.completed_ms >= report.started_ms);
    Ok(())
}

#[test]
fn test_distinct_close_site_yields_distinct_end_hash() -> Result<()> {
    let (addr, handle) = spawn_stub_scheduler(Instruction::Continue);
    let capsule = Capsule::connect(&addr, Box::new(RecordingEngine::default()))?;

    let region = capsule.open_region("span", "train.rs:5")?;
    region.close("train.rs:40")?;
    capsule.shutdown()?;

    let seen = handle.join().unwrap();
    let event = seen
        .iter()
        .find_map(|r| match r {
            Request::RegionReport { event, .. } => Some(event.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(event.begin_hash, region_hash("train.rs:5"));
    assert_eq!(event.end_hash, region_hash("train.rs:40"));
    assert_ne!(event.begin_hash, event.end_hash);
    Ok(())
}

#[test]
fn test_stop_instruction_sets_stop_flag() -> Result<()> {
    let (addr, _handle) = spawn_stub_scheduler(Instruction::Stop);
    let capsule = Capsule::connect(&addr, Box::new(RecordingEngine::default()))?;

    let region = capsule.open_region("diverged", "loss.rs:88")?;
    let instruction = region.close(source_location!())?;
    assert_eq!(instruction, Instruction::Stop);
    assert!(capsule.is_stopped());
    Ok(())
}

#[test]
fn test_drop_closes_unclosed_region() -> Result<()> {
    let (addr, handle) = spawn_stub_scheduler(Instruction::Continue);
    let engine = Arc::new(RecordingEngine::default());
    let capsule = Capsule::connect(&addr, Box::new(Arc::clone(&engine)))?;

    {
        let _region = capsule.open_region("early-return", "a.py:10")?;
        // dropped without close()
    }
    capsule.shutdown()?;

    let seen = handle.join().unwrap();
    let event = seen
        .iter()
        .find_map(|r| match r {
            Request::RegionReport { event, .. } => Some(event.clone()),
            _ => None,
        })
        .expect("drop did not report the region");
    // Implicit close happens at the opening location
    assert_eq!(event.end_location, "a.py:10");
    assert_eq!(event.begin_hash, event.end_hash);
    Ok(())
}
