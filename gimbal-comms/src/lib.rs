//! Wire protocol between the vision core and the gimbal micro-controller.
//!
//! Both directions are fixed-layout packed byte frames: a start byte, a
//! contiguous little-endian payload, and a tail byte. The [`Framer`] scans
//! the incoming byte stream for attitude frames, resynchronizing by
//! advancing one byte whenever the start/tail check fails.

use std::collections::VecDeque;

use byteorder::{ByteOrder, LittleEndian};

/// Start byte of a micro-controller → vision frame.
pub const RECV_START: u8 = 0x3A;
/// Start byte of a vision → micro-controller frame.
pub const SEND_START: u8 = 0xA3;
/// Tail byte of both frame kinds.
pub const FRAME_TAIL: u8 = 0xAA;

/// [start][f32 roll][f32 pitch][f32 yaw][ally][aim][shoot][hp][tail]
pub const RECV_FRAME_LEN: usize = 18;
/// [start][f32 pitch][f32 yaw][found][fire][done_fitting][patrolling][updated][tail]
pub const SEND_FRAME_LEN: usize = 15;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("frame too short: got {got}, need {need}")]
    Truncated { got: usize, need: usize },
    #[error("bad start byte {0:#04x}")]
    BadStart(u8),
    #[error("bad tail byte {0:#04x}")]
    BadTail(u8),
}

/// Attitude message as laid out on the wire. Angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeFrame {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub ally_color: u8,
    pub aim_mode: u8,
    pub shoot_decision: u8,
    pub remaining_hp: u8,
}

impl AttitudeFrame {
    pub fn decode(buf: &[u8]) -> Result<AttitudeFrame> {
        if buf.len() < RECV_FRAME_LEN {
            return Err(Error::Truncated {
                got: buf.len(),
                need: RECV_FRAME_LEN,
            });
        }
        if buf[0] != RECV_START {
            return Err(Error::BadStart(buf[0]));
        }
        if buf[RECV_FRAME_LEN - 1] != FRAME_TAIL {
            return Err(Error::BadTail(buf[RECV_FRAME_LEN - 1]));
        }
        Ok(AttitudeFrame {
            roll: LittleEndian::read_f32(&buf[1..5]),
            pitch: LittleEndian::read_f32(&buf[5..9]),
            yaw: LittleEndian::read_f32(&buf[9..13]),
            ally_color: buf[13],
            aim_mode: buf[14],
            shoot_decision: buf[15],
            remaining_hp: buf[16],
        })
    }

    pub fn encode(&self) -> [u8; RECV_FRAME_LEN] {
        let mut buf = [0u8; RECV_FRAME_LEN];
        buf[0] = RECV_START;
        LittleEndian::write_f32(&mut buf[1..5], self.roll);
        LittleEndian::write_f32(&mut buf[5..9], self.pitch);
        LittleEndian::write_f32(&mut buf[9..13], self.yaw);
        buf[13] = self.ally_color;
        buf[14] = self.aim_mode;
        buf[15] = self.shoot_decision;
        buf[16] = self.remaining_hp;
        buf[17] = FRAME_TAIL;
        buf
    }
}

/// Aiming command as laid out on the wire. Angles in degrees; flags are one
/// byte each, zero or one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandFrame {
    pub pitch: f32,
    pub yaw: f32,
    pub found: u8,
    pub fire: u8,
    pub done_fitting: u8,
    pub patrolling: u8,
    pub updated: u8,
}

impl CommandFrame {
    pub fn encode(&self) -> [u8; SEND_FRAME_LEN] {
        let mut buf = [0u8; SEND_FRAME_LEN];
        buf[0] = SEND_START;
        LittleEndian::write_f32(&mut buf[1..5], self.pitch);
        LittleEndian::write_f32(&mut buf[5..9], self.yaw);
        buf[9] = self.found;
        buf[10] = self.fire;
        buf[11] = self.done_fitting;
        buf[12] = self.patrolling;
        buf[13] = self.updated;
        buf[14] = FRAME_TAIL;
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<CommandFrame> {
        if buf.len() < SEND_FRAME_LEN {
            return Err(Error::Truncated {
                got: buf.len(),
                need: SEND_FRAME_LEN,
            });
        }
        if buf[0] != SEND_START {
            return Err(Error::BadStart(buf[0]));
        }
        if buf[SEND_FRAME_LEN - 1] != FRAME_TAIL {
            return Err(Error::BadTail(buf[SEND_FRAME_LEN - 1]));
        }
        Ok(CommandFrame {
            pitch: LittleEndian::read_f32(&buf[1..5]),
            yaw: LittleEndian::read_f32(&buf[5..9]),
            found: buf[9],
            fire: buf[10],
            done_fitting: buf[11],
            patrolling: buf[12],
            updated: buf[13],
        })
    }
}

/// Incremental scanner for attitude frames in a raw byte stream.
///
/// On a start-byte and tail-byte match the framer consumes one whole frame;
/// on any mismatch it advances a single byte. Garbage between frames is
/// therefore skipped without ever emitting a spurious frame.
#[derive(Default)]
pub struct Framer {
    buf: VecDeque<u8>,
}

impl Framer {
    pub fn new() -> Framer {
        Framer::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend(bytes);
    }

    /// Number of bytes currently buffered.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Extract the next complete attitude frame, if any.
    pub fn next_frame(&mut self) -> Option<AttitudeFrame> {
        while self.buf.len() >= RECV_FRAME_LEN {
            if self.buf[0] == RECV_START && self.buf[RECV_FRAME_LEN - 1] == FRAME_TAIL {
                let raw: Vec<u8> = self.buf.drain(..RECV_FRAME_LEN).collect();
                // Start and tail were just checked; decode cannot fail.
                return AttitudeFrame::decode(&raw).ok();
            }
            self.buf.pop_front();
        }
        None
    }
}
