//! Per-session reliable byte stream built on top of LRCP packets.
//!
//! A `Session` never touches a socket; it only turns incoming packets
//! and outgoing application data into more packets to send, so the
//! retransmission and line-reversal logic can be tested without any
//! networking.
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::packets::Packet;

const RETRY_TIMEOUT: Duration = Duration::from_secs(1);
const EXPIRE_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_CHUNK: usize = 950;

pub struct Session {
    pub id: i32,
    pub peer: SocketAddr,
    pub closed: bool,
    recv_len: i32,
    recv_buf: Vec<u8>,
    send_ack_len: i32,
    send_len: i32,
    send_buf: VecDeque<u8>,
    ack_timer: Option<Instant>,
}

impl Session {
    #[must_use]
    pub fn new(id: i32, peer: SocketAddr) -> Self {
        Self {
            id,
            peer,
            closed: false,
            recv_len: 0,
            recv_buf: Vec::new(),
            send_ack_len: 0,
            send_len: 0,
            send_buf: VecDeque::new(),
            ack_timer: None,
        }
    }

    /// Accepts an incoming `data` packet at `pos`, appending any bytes
    /// not already received, and returns the ack to send back.
    pub fn on_data(&mut self, data: &[u8], pos: i32) -> Packet {
        if pos > self.recv_len {
            return Packet::Ack {
                session: self.id,
                length: self.recv_len,
            };
        }

        let overlap = usize::try_from(self.recv_len - pos).unwrap_or(0);
        let new_data = data.get(overlap..).unwrap_or(&[]);

        self.recv_len += i32::try_from(new_data.len()).unwrap_or(0);
        self.recv_buf.extend_from_slice(new_data);

        Packet::Ack {
            session: self.id,
            length: self.recv_len,
        }
    }

    /// Pulls every complete, newline-terminated line out of the receive
    /// buffer, leaving any trailing partial line in place.
    pub fn take_lines(&mut self) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        while let Some(pos) = self.recv_buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.recv_buf.drain(..=pos).collect();
            lines.push(line[..line.len() - 1].to_vec());
        }
        lines
    }

    /// Queues more application data to send and returns the packet that
    /// carries the current retransmission window.
    pub fn queue_send(&mut self, data: &[u8]) -> Packet {
        self.send_buf.extend(data.iter().copied());
        self.send_len += i32::try_from(data.len()).unwrap_or(0);
        if self.ack_timer.is_none() {
            self.ack_timer = Some(Instant::now());
        }
        self.current_chunk()
    }

    fn current_chunk(&self) -> Packet {
        let chunk: Vec<u8> = self.send_buf.iter().take(MAX_CHUNK).copied().collect();
        Packet::Data {
            session: self.id,
            pos: self.send_ack_len,
            data: chunk,
        }
    }

    /// Applies an incoming ack. Returns a packet to send immediately:
    /// either a retransmission of the still-unacked window, or a
    /// `close` if the peer acked data we never sent.
    pub fn on_ack(&mut self, length: i32) -> Option<Packet> {
        if length <= self.send_ack_len {
            return None;
        }
        if length > self.send_len {
            self.closed = true;
            return Some(self.close_packet());
        }

        let confirmed = usize::try_from(length - self.send_ack_len).unwrap_or(0);
        let drop = confirmed.min(self.send_buf.len());
        self.send_buf.drain(..drop);
        self.send_ack_len = length;

        if self.send_ack_len == self.send_len {
            self.ack_timer = None;
            None
        } else {
            self.ack_timer = Some(Instant::now());
            Some(self.current_chunk())
        }
    }

    #[must_use]
    pub fn retry_packet(&self) -> Option<Packet> {
        if self.send_ack_len < self.send_len {
            Some(self.current_chunk())
        } else {
            None
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: Instant) -> bool {
        self.ack_timer
            .is_some_and(|t| now.saturating_duration_since(t) > EXPIRE_TIMEOUT)
    }

    #[must_use]
    pub fn needs_retry(&self, now: Instant) -> bool {
        self.ack_timer
            .is_some_and(|t| now.saturating_duration_since(t) > RETRY_TIMEOUT)
    }

    #[must_use]
    pub fn close_packet(&self) -> Packet {
        Packet::Close { session: self.id }
    }
}
