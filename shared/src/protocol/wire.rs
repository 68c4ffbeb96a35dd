//! Wire protocol for scheduler-capsule communication.
//!
//! Uses bincode with an explicit config so both sides always use the same
//! encoding (fixint for lengths and enum tags), avoiding version/skew
//! mismatches. Frames on the wire are length-prefixed (u32 big-endian, the
//! `LengthDelimitedCodec` default) with one encoded `RequestFrame` or
//! `ReplyFrame` per frame.
//!
//! Every request is answered with exactly one reply; the capsule side is a
//! synchronous, single-flight client, so no request pipelining exists.

use crate::types::instruction::Instruction;
use crate::types::region::{RegionEvent, RegionHash};
use anyhow::Result;
use bincode::Options;
use serde::{Deserialize, Serialize};

/// Protocol version
pub const PROTOCOL_VERSION: u32 = 1;

/// Single bincode config for the wire format: fixint encoding so vec lengths
/// and enum tags have a fixed size and cannot be misinterpreted across builds.
fn wire_bincode() -> impl bincode::config::Options {
    bincode::config::DefaultOptions::new()
        .with_fixint_encoding()
        .allow_trailing_bytes()
}

/// Capsule-to-scheduler request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Initial handshake; registers the capsule in the world
    Hello { pid: u32 },

    /// A region was opened; lets the scheduler track the open set
    RegionOpen {
        pid: u32,
        begin_hash: RegionHash,
        name: String,
        begin_location: String,
    },

    /// A region was closed; the capsule blocks until the reply arrives
    RegionReport { pid: u32, event: RegionEvent },

    /// Counter snapshot collected after an `Instruction::Reconfigure`
    CounterReport {
        pid: u32,
        region_name: String,
        metrics: Vec<(String, f64)>,
    },

    /// Orderly disconnect
    Goodbye { pid: u32 },
}

/// Scheduler-to-capsule reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Handshake accepted
    Welcome,

    /// Fire-and-forget request acknowledged
    Ack,

    /// Scheduling decision for a blocked region close
    Instruction(Instruction),

    /// Protocol error; the interaction failed (e.g. close without open)
    Error(String),
}

/// Versioned request envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub version: u32,
    pub body: Request,
}

/// Versioned reply envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyFrame {
    pub version: u32,
    pub body: Reply,
}

impl RequestFrame {
    pub fn new(body: Request) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            body,
        }
    }

    /// Serialize to bytes (bincode, fixint encoding).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire_bincode().serialize(self).map_err(Into::into)
    }

    /// Deserialize from bytes, validating the protocol version.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: Self = wire_bincode().deserialize(bytes)?;
        if frame.version != PROTOCOL_VERSION {
            anyhow::bail!(
                "unsupported protocol version {} (expected {})",
                frame.version,
                PROTOCOL_VERSION
            );
        }
        Ok(frame)
    }
}

impl ReplyFrame {
    pub fn new(body: Reply) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            body,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        wire_bincode().serialize(self).map_err(Into::into)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let frame: Self = wire_bincode().deserialize(bytes)?;
        if frame.version != PROTOCOL_VERSION {
            anyhow::bail!(
                "unsupported protocol version {} (expected {})",
                frame.version,
                PROTOCOL_VERSION
            );
        }
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let frame = RequestFrame::new(Request::Hello { pid: 42 });
        let bytes = frame.to_bytes().unwrap();
        let decoded = RequestFrame::from_bytes(&bytes).unwrap();
        assert_eq!(decoded.version, PROTOCOL_VERSION);
        assert_eq!(decoded.body, Request::Hello { pid: 42 });
    }

    #[test]
    fn test_reply_roundtrip() {
        let frame = ReplyFrame::new(Reply::Instruction(Instruction::Reconfigure {
            metric_names: vec!["sm__warps_active.avg".to_string()],
        }));
        let bytes = frame.to_bytes().unwrap();
        let decoded = ReplyFrame::from_bytes(&bytes).unwrap();
        match decoded.body {
            Reply::Instruction(Instruction::Reconfigure { metric_names }) => {
                assert_eq!(metric_names, vec!["sm__warps_active.avg".to_string()]);
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_region_report_roundtrip() {
        let event = RegionEvent {
            name: "matmul".to_string(),
            begin_hash: 0x1122334455667788,
            end_hash: 0x99aabbccddeeff00,
            begin_location: "a.py:10".to_string(),
            end_location: "a.py:10".to_string(),
            started_ms: 0,
            completed_ms: 5,
        };
        let frame = RequestFrame::new(Request::RegionReport {
            pid: 7,
            event: event.clone(),
        });
        let decoded = RequestFrame::from_bytes(&frame.to_bytes().unwrap()).unwrap();
        match decoded.body {
            Request::RegionReport { pid, event: e } => {
                assert_eq!(pid, 7);
                assert_eq!(e, event);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_bytes_fail() {
        let bytes = vec![0xFF; 20];
        assert!(RequestFrame::from_bytes(&bytes).is_err());
        assert!(ReplyFrame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_version_mismatch_rejected() {
        let mut frame = RequestFrame::new(Request::Goodbye { pid: 1 });
        frame.version = 99;
        let bytes = wire_bincode().serialize(&frame).unwrap();
        assert!(RequestFrame::from_bytes(&bytes).is_err());
    }
}
