use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub species: String,
    pub count: u32,
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub site: u32,
    pub populations: Vec<Observation>,
}

impl Packet {
    #[must_use]
    pub fn new(site: u32, populations: Vec<Observation>) -> Self {
        Self { site, populations }
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x58);

        writer.write_u32(self.site);
        writer.write_u32(u32::try_from(self.populations.len()).expect("population count fits u32"));
        for observation in &self.populations {
            writer.write_str(&observation.species);
            writer.write_u32(observation.count);
        }

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
        let site = parser.read_u32();
        let count = parser.read_u32();
        let populations = (0..count)
            .map(|_| {
                let species = parser.read_str();
                let count = parser.read_u32();
                Observation { species, count }
            })
            .collect();

        Packet::new(site, populations)
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

        let populations = vec![
            Observation { species: "CommonKrait".to_string(), count: 3 },
            Observation { species: "RoyalPython".to_string(), count: 0 },
        ];

        let mut buffer = vec![];
        {
            let mut writer = FramedWrite::new(&mut buffer, PacketCodec::new());
            writer.send(Packet::new(42, populations.clone()).into()).await.unwrap();
        }

        let mut reader = FramedRead::new(buffer.as_slice(), PacketCodec::new());
        let packets::Packet::SiteVisit(raw_packet) = reader.try_next().await.unwrap().unwrap()
        else {
            panic!("invalid packet");
        };
        assert_eq!(Packet::new(42, populations), raw_packet);
    }
}
