//! Frame wrapper shared by every message: `u8 type | u32 length | payload |
//! u8 checksum`, where `length` counts the whole frame and the checksum
//! makes the byte sum of the frame equal 0 mod 256.
use std::marker::PhantomData;
use std::ops::ControlFlow;

use bytes::{Bytes, BytesMut};
use thiserror::Error;

pub mod packets;

pub const WRAPPER_SIZE: usize = 6;
pub const MAX_LENGTH: usize = 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unknown packet type {0:#04x}")]
    UnknownPacket(u8),
    #[error("message is too long")]
    TooLong,
    #[error("message is too short")]
    TooShort,
    #[error("invalid checksum")]
    Checksum,
    #[error("unexpected message type {0:#04x}")]
    UnexpectedType(u8),
    #[error("unexpected protocol or version")]
    BadHello,
    #[error("did not get Hello")]
    MissingHello,
    #[error("authority site mismatch")]
    SiteMismatch,
    #[error("conflicting target for species {0:?}")]
    ConflictingTarget(String),
    #[error("conflicting counts for species {0:?}")]
    ConflictingCount(String),
    #[error("failed to connect to authority: {0}")]
    AuthorityDial(String),
    #[error("unused trailing bytes in message")]
    TrailingBytes,
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

/// A single frame's worth of bytes, already checksum- and length-validated,
/// ready to be handed to one concrete packet's decoder.
pub struct RawPacket<D> {
    data: Bytes,
    _decoder: PhantomData<D>,
}

impl<D: RawPacketDecoder> RawPacket<D> {
    pub fn decode(&self) -> Result<D::Decoded<'_>, Error> {
        let mut parser = Parser::new(&self.data);
        let decoded = D::decode(&mut parser);

        if parser.remaining() > 0 {
            return Err(Error::TrailingBytes);
        }

        Ok(decoded)
    }
}

pub trait RawPacketDecoder {
    type Decoded<'a>;

    fn decode<'a>(parser: &mut Parser<'a>) -> Self::Decoded<'a>;
}

/// Byte-cursor over a single packet's framed bytes (type + length + payload,
/// checksum excluded). Reads past the end of the buffer yield zeroed/empty
/// values rather than panicking — a packet whose declared fields overrun its
/// own frame decodes to truncated data instead of crashing the connection.
pub struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn read_u8(&mut self) -> u8 {
        let b = self.data.get(self.pos).copied().unwrap_or(0);
        self.pos += 1;
        b
    }

    pub fn read_u32(&mut self) -> u32 {
        let end = self.pos + 4;
        let mut bytes = [0u8; 4];
        let available = self.data.get(self.pos..end.min(self.data.len())).unwrap_or(&[]);
        bytes[..available.len()].copy_from_slice(available);
        self.pos = end;
        u32::from_be_bytes(bytes)
    }

    /// Bytes left unread between the cursor and the end of this packet's
    /// framed data.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_str(&mut self) -> String {
        let len = self.read_u32() as usize;
        let end = self.pos + len;
        let slice = self.data.get(self.pos..end.min(self.data.len())).unwrap_or(&[]);
        let s = String::from_utf8_lossy(slice).into_owned();
        self.pos = end;
        s
    }
}

/// Writer for the outbound half: fields are appended after a placeholder
/// header, `finalize` backfills the length and appends the checksum.
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    #[must_use]
    pub fn new(packet_type: u8) -> Self {
        Self { buf: vec![packet_type, 0, 0, 0, 0] }
    }

    pub fn write_u8(&mut self, n: u8) -> &mut Self {
        self.buf.push(n);
        self
    }

    pub fn write_u32(&mut self, n: u32) -> &mut Self {
        self.buf.extend_from_slice(&n.to_be_bytes());
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.write_u32(u32::try_from(s.len()).expect("packet strings fit u32"));
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    #[must_use]
    pub fn finalize(mut self) -> Vec<u8> {
        let length = u32::try_from(self.buf.len() + 1).expect("packet length fits u32");
        self.buf[1..5].copy_from_slice(&length.to_be_bytes());
        let sum: u32 = self.buf.iter().map(|&b| u32::from(b)).sum();
        let checksum = (256 - sum % 256) % 256;
        self.buf.push(u8::try_from(checksum).expect("checksum fits u8"));
        self.buf
    }
}

/// Drives the header/length/checksum checks shared by every packet type;
/// `raw_packet` hands off the validated frame to a concrete decoder.
pub struct Validator<'a> {
    src: &'a mut BytesMut,
    declared_length: usize,
}

impl<'a> Validator<'a> {
    #[must_use]
    pub fn new(src: &'a mut BytesMut) -> Self {
        Self { src, declared_length: 0 }
    }

    pub fn validate_type(&self) -> ControlFlow<Result<Option<packets::Packet>, Error>> {
        if self.src.len() < 5 {
            return ControlFlow::Break(Ok(None));
        }
        ControlFlow::Continue(())
    }

    pub fn validate_length(&mut self) -> ControlFlow<Result<Option<packets::Packet>, Error>> {
        let declared = u32::from_be_bytes([self.src[1], self.src[2], self.src[3], self.src[4]]) as usize;
        if declared >= MAX_LENGTH {
            return ControlFlow::Break(Err(Error::TooLong));
        }
        if declared < WRAPPER_SIZE {
            return ControlFlow::Break(Err(Error::TooShort));
        }
        self.declared_length = declared;
        ControlFlow::Continue(())
    }

    pub fn validate_u32(&self) -> ControlFlow<Result<Option<packets::Packet>, Error>> {
        if self.src.len() < self.declared_length {
            return ControlFlow::Break(Ok(None));
        }
        ControlFlow::Continue(())
    }

    pub fn validate_checksum(&self) -> ControlFlow<Result<Option<packets::Packet>, Error>> {
        let frame = &self.src[..self.declared_length];
        let sum: u32 = frame.iter().map(|&b| u32::from(b)).sum();
        if sum % 256 == 0 {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(Err(Error::Checksum))
        }
    }

    pub fn raw_packet<D: RawPacketDecoder>(&mut self) -> Result<RawPacket<D>, Error> {
        let frame = self.src.split_to(self.declared_length).freeze();
        let data = frame.slice(0..self.declared_length - 1);
        Ok(RawPacket { data, _decoder: PhantomData })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_backfills_length_and_checksum() {
        let mut writer = Writer::new(0x56);
        writer.write_u32(123);
        let bytes = writer.finalize();
        assert_eq!(bytes, [0x56, 0x00, 0x00, 0x00, 0x0a, 0x00, 0x00, 0x00, 0x7b, 0x25]);
    }

    #[test]
    fn parser_reads_big_endian_fields() {
        let data = [0x00, 0x00, 0x00, 0x7b];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_u32(), 123);
    }

    #[test]
    fn parser_reads_str_length_prefix() {
        let mut buf = Writer::new(0x50);
        buf.write_str("pestcontrol");
        let frame = buf.finalize();
        let mut parser = Parser::new(&frame[5..frame.len() - 1]);
        assert_eq!(parser.read_str(), "pestcontrol");
    }

    #[test]
    fn parser_never_panics_past_the_end_of_a_short_buffer() {
        let mut parser = Parser::new(&[0x00]);
        assert_eq!(parser.read_u32(), 0);
        assert_eq!(parser.read_str(), String::new());
    }

    #[test]
    fn parser_reports_remaining_bytes() {
        let mut parser = Parser::new(&[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(parser.remaining(), 4);
        parser.read_u8();
        assert_eq!(parser.remaining(), 3);
        parser.read_u32();
        assert_eq!(parser.remaining(), 0);
    }
}
