use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Cull,
    Conserve,
}

impl Action {
    #[must_use]
    pub fn as_u8(self) -> u8 {
        match self {
            Action::Cull => 0x90,
            Action::Conserve => 0xA0,
        }
    }

    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0x90 => Some(Action::Cull),
            0xA0 => Some(Action::Conserve),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub species: String,
    pub action: Option<Action>,
}

impl Packet {
    #[must_use]
    pub fn new(species: impl Into<String>, action: Action) -> Self {
        Self { species: species.into(), action: Some(action) }
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x55);

        writer.write_str(&self.species);
        writer.write_u8(self.action.expect("write_packet requires a known action").as_u8());

        writer.finalize()
    }
}

#[derive(Debug, PartialEq)]
pub struct PacketDecoder;

impl RawPacketDecoder for PacketDecoder {
    type Decoded<'a> = Packet;

    fn decode<'a>(parser: &mut Parser<'a>) -> Self::Decoded<'a> {
        parser.read_u8();
        parser.read_u32();
        let species = parser.read_str();
        let action = Action::from_u8(parser.read_u8());

        Packet { species, action }
    }
}

pub(crate) fn read_packet(src: &mut BytesMut) -> Result<Option<packets::Packet>, Error> {
    let mut validator = Validator::new(src);

    if let ControlFlow::Break(b) = validator.validate_type() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_length() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_u32() {
        return b;
    }

    if let ControlFlow::Break(b) = validator.validate_checksum() {
        return b;
    }

    let raw_packet = validator.raw_packet::<PacketDecoder>()?;

    Ok(Some(raw_packet.decode()?.into()))
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, TryStreamExt};

    use tokio_util::codec::{FramedRead, FramedWrite};

    use crate::codec::packets::PacketCodec;
    use crate::tests::init_tracing_subscriber;

    use super::*;

    #[tokio::test]
    async fn test_write_and_read_round_trip() {
        init_tracing_subscriber();

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer.send(Packet::new("CommonKrait", Action::Cull).into()).await.unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::CreatePolicy(raw_packet) = reader.try_next().await.unwrap().unwrap()
        else {
            panic!("invalid packet");
        };
        assert_eq!(Packet::new("CommonKrait", Action::Cull), raw_packet);
    }
}
