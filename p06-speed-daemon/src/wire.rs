//! Wire format for the speed daemon binary protocol.
//!
//! Every message starts with a single `u8` tag. Multi-byte integers are
//! big-endian; strings are length-prefixed by a single `u8` giving their
//! byte length (ASCII content).
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::controller::Ticket;

/// Associates a message type with its wire tag.
pub trait TaggedMessage {
    const TAG: u8;
}

/// Reads a message's payload (the tag itself has already been consumed).
pub trait ReadFrom: Sized {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error>;
}

/// Writes a message, tag included.
pub trait WriteTo {
    async fn write_to<W: AsyncWrite + Unpin + Send>(&self, write: &mut W)
        -> Result<(), anyhow::Error>;
}

async fn read_str<R: AsyncRead + Unpin + Send>(read: &mut R) -> Result<String, anyhow::Error> {
    let len = read.read_u8().await?;
    let mut buf = vec![0_u8; usize::from(len)];
    read.read_exact(&mut buf).await?;
    Ok(String::from_utf8(buf)?)
}

async fn write_str<W: AsyncWrite + Unpin + Send>(
    write: &mut W,
    s: &str,
) -> Result<(), anyhow::Error> {
    let bytes = s.as_bytes();
    write
        .write_u8(u8::try_from(bytes.len()).map_err(|_| anyhow::anyhow!("string too long"))?)
        .await?;
    write.write_all(bytes).await?;
    Ok(())
}

/// `0x10`: `Error` (server -> client).
#[derive(Debug, Clone)]
pub struct Error {
    pub msg: String,
}

impl TaggedMessage for Error {
    const TAG: u8 = 0x10;
}

impl WriteTo for Error {
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error> {
        write.write_u8(Self::TAG).await?;
        write_str(write, &self.msg).await
    }
}

/// `0x20`: `Plate` (client -> server).
#[derive(Debug, Clone)]
pub struct Plate {
    pub plate: String,
    pub timestamp: u32,
}

impl TaggedMessage for Plate {
    const TAG: u8 = 0x20;
}

impl ReadFrom for Plate {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let plate = read_str(read).await?;
        let timestamp = read.read_u32().await?;
        Ok(Self { plate, timestamp })
    }
}

/// `0x21`: `Ticket` (server -> client).
impl TaggedMessage for Ticket {
    const TAG: u8 = 0x21;
}

impl WriteTo for Ticket {
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error> {
        write.write_u8(Self::TAG).await?;
        write_str(write, &self.plate).await?;
        write.write_u16(self.road).await?;
        write.write_u16(self.mile1).await?;
        write.write_u32(self.timestamp1).await?;
        write.write_u16(self.mile2).await?;
        write.write_u32(self.timestamp2).await?;
        write.write_u16(self.speed).await?;
        Ok(())
    }
}

/// `0x40`: `WantHeartbeat` (client -> server).
#[derive(Debug, Clone)]
pub struct WantHeartbeat {
    pub interval: u32,
}

impl TaggedMessage for WantHeartbeat {
    const TAG: u8 = 0x40;
}

impl ReadFrom for WantHeartbeat {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let interval = read.read_u32().await?;
        Ok(Self { interval })
    }
}

/// `0x41`: `Heartbeat` (server -> client). No fields.
#[derive(Debug, Clone, Copy)]
pub struct Heartbeat;

impl TaggedMessage for Heartbeat {
    const TAG: u8 = 0x41;
}

impl WriteTo for Heartbeat {
    async fn write_to<W: AsyncWrite + Unpin + Send>(
        &self,
        write: &mut W,
    ) -> Result<(), anyhow::Error> {
        write.write_u8(Self::TAG).await?;
        Ok(())
    }
}

/// `0x80`: `IAmCamera` (client -> server).
#[derive(Debug, Clone, Copy)]
pub struct IAmCamera {
    pub road: u16,
    pub mile: u16,
    pub limit: u16,
}

impl TaggedMessage for IAmCamera {
    const TAG: u8 = 0x80;
}

impl ReadFrom for IAmCamera {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let road = read.read_u16().await?;
        let mile = read.read_u16().await?;
        let limit = read.read_u16().await?;
        Ok(Self { road, mile, limit })
    }
}

/// `0x81`: `IAmDispatcher` (client -> server).
#[derive(Debug, Clone)]
pub struct IAmDispatcher {
    pub roads: Vec<u16>,
}

impl TaggedMessage for IAmDispatcher {
    const TAG: u8 = 0x81;
}

impl ReadFrom for IAmDispatcher {
    async fn read_payload_from<R: AsyncRead + Unpin + Send>(
        read: &mut R,
    ) -> Result<Self, anyhow::Error> {
        let numroads = read.read_u8().await?;
        let mut roads = Vec::with_capacity(usize::from(numroads));
        for _ in 0..numroads {
            roads.push(read.read_u16().await?);
        }
        Ok(Self { roads })
    }
}
