//! Pure Rust implementation of the CRI message layer
//!
//! Every message between client and controller travels as an ASCII frame
//! `CRISTART <counter> <body> CRIEND` with a cyclic message counter. The
//! controller streams STATUS broadcasts, acknowledges commands by counter
//! id and reports motion completion as separate execution messages.

use crate::state::RobotState;
use crate::{CriError, Result};
use regex::Regex;
use std::sync::atomic::{AtomicU32, Ordering};

pub const FRAME_START: &str = "CRISTART";
pub const FRAME_END: &str = "CRIEND";

/// Highest message counter value before wrapping back to 1
pub const COUNTER_MAX: u32 = 9999;

/// Cyclic message counter shared by all senders on a session
#[derive(Debug, Default)]
pub struct MessageCounter(AtomicU32);

impl MessageCounter {
    pub fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// Next counter value in 1..=[`COUNTER_MAX`]
    pub fn next(&self) -> u32 {
        let n = self.0.fetch_add(1, Ordering::Relaxed);
        (n % COUNTER_MAX) + 1
    }
}

/// Wrap a message body into a complete wire frame
pub fn frame(counter: u32, body: &str) -> String {
    format!("{} {} {} {}\n", FRAME_START, counter, body, FRAME_END)
}

/// Keepalive body: zero jog on all nine axes
pub fn alive_jog() -> String {
    format!("ALIVEJOG{}", " 0.0".repeat(9))
}

/// Request or give up active control of the robot
pub fn set_active(active: bool) -> String {
    format!("CMD Active {}", active)
}

/// Motion speed override in percent
pub fn set_override(percent: f64) -> String {
    format!("CMD Override {:.1}", percent)
}

/// Relative motion in the base coordinate system: six pose deltas, three
/// external axis deltas and a velocity
pub fn move_relative_base(delta: [f64; 6], external: [f64; 3], velocity: f64) -> String {
    let mut body = String::from("CMD Move RelativeBase");
    for value in delta.iter().chain(external.iter()) {
        body.push_str(&format!(" {:.3}", value));
    }
    body.push_str(&format!(" {:.1}", velocity));
    body
}

/// Stop any running motion
pub fn stop_motion() -> String {
    "CMD Move Stop".to_string()
}

/// A parsed message from the controller
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Periodic state broadcast
    Status(RobotState),
    /// Command accepted by the controller
    CommandAck { id: u32 },
    /// Command refused by the controller
    CommandRejected { id: u32, reason: String },
    /// Motion command finished executing
    MotionFinished { id: u32 },
    /// Motion command aborted by the controller
    MotionFailed { id: u32, reason: String },
    /// Free-text log line from the controller
    Info(String),
    /// Controller-side keepalive echo
    Keepalive,
    /// Message kind this client does not interpret
    Unknown(String),
}

/// Parse the body of an extracted frame
pub fn parse_body(body: &str) -> Result<Message> {
    let mut parts = body.splitn(2, char::is_whitespace);
    let kind = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or("").trim();

    match kind {
        "STATUS" => Ok(Message::Status(RobotState::from_status_body(rest)?)),
        "CMDACK" => Ok(Message::CommandAck {
            id: parse_id(kind, rest)?,
        }),
        "CMDERROR" => {
            let (id, reason) = parse_id_and_reason(kind, rest)?;
            Ok(Message::CommandRejected { id, reason })
        }
        "EXECEND" => Ok(Message::MotionFinished {
            id: parse_id(kind, rest)?,
        }),
        "EXECERROR" => {
            let (id, reason) = parse_id_and_reason(kind, rest)?;
            Ok(Message::MotionFailed { id, reason })
        }
        "MESSAGE" => Ok(Message::Info(rest.to_string())),
        "ALIVEJOG" => Ok(Message::Keepalive),
        other => Ok(Message::Unknown(other.to_string())),
    }
}

fn parse_id(kind: &str, rest: &str) -> Result<u32> {
    rest.split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .ok_or_else(|| CriError::Protocol(format!("{} without a command id: {:?}", kind, rest)))
}

fn parse_id_and_reason(kind: &str, rest: &str) -> Result<(u32, String)> {
    let id = parse_id(kind, rest)?;
    let reason = rest
        .split_whitespace()
        .skip(1)
        .collect::<Vec<_>>()
        .join(" ");
    Ok((id, reason))
}

/// Streaming frame extractor
///
/// Feed raw received text into a buffer and drain complete frames out of
/// it; partial frames stay in the buffer until the rest arrives.
pub struct MessageParser {
    frame_pattern: Regex,
}

impl MessageParser {
    pub fn new() -> Result<Self> {
        let frame_pattern = Regex::new(r"^CRISTART\s+(\d+)\s+(.*)\s+CRIEND$")
            .map_err(|e| CriError::Protocol(format!("Invalid frame pattern: {}", e)))?;

        Ok(Self { frame_pattern })
    }

    /// Pull every complete frame out of the receive buffer
    ///
    /// Bytes that cannot be part of a frame are discarded, except for a
    /// short tail that could still be a split start marker.
    pub fn drain_frames(&self, buffer: &mut String) -> Vec<(u32, String)> {
        let mut frames = Vec::new();

        loop {
            let Some(start) = buffer.find(FRAME_START) else {
                // keep a tail that could still be a split start marker; the
                // cut must not land inside a multi-byte replacement char
                let cut = buffer.len().saturating_sub(FRAME_START.len());
                if buffer.is_char_boundary(cut) {
                    buffer.drain(..cut);
                }
                break;
            };

            let Some(end) = buffer[start..].find(FRAME_END) else {
                if start > 0 {
                    buffer.drain(..start);
                }
                break;
            };

            let end = start + end + FRAME_END.len();
            let raw = buffer[start..end].to_string();
            buffer.drain(..end);

            match self.parse_frame(&raw) {
                Some(parsed) => frames.push(parsed),
                None => tracing::warn!("Dropping malformed frame: {:?}", raw),
            }
        }

        frames
    }

    /// Split a single extracted frame into counter and body
    fn parse_frame(&self, raw: &str) -> Option<(u32, String)> {
        let captures = self.frame_pattern.captures(raw)?;
        let counter = captures.get(1)?.as_str().parse().ok()?;
        let body = captures.get(2)?.as_str().trim().to_string();
        Some((counter, body))
    }
}
