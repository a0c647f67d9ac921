use std::ops::ControlFlow;

use bytes::BytesMut;

use crate::codec::{packets, Error, Parser, RawPacketDecoder, Validator, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub species: String,
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, PartialEq)]
pub struct Packet {
    pub site: u32,
    pub targets: Vec<Target>,
}

impl Packet {
    #[must_use]
    pub fn new(site: u32, targets: Vec<Target>) -> Self {
        Self { site, targets }
    }

    pub(crate) fn write_packet(&self) -> Vec<u8> {
        let mut writer = Writer::new(0x54);

        writer.write_u32(self.site);
        writer.write_u32(u32::try_from(self.targets.len()).expect("target count fits u32"));
        for target in &self.targets {
            writer.write_str(&target.species);
            writer.write_u32(target.min);
            writer.write_u32(target.max);
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
        let targets = (0..count)
            .map(|_| {
                let species = parser.read_str();
                let min = parser.read_u32();
                let max = parser.read_u32();
                Target { species, min, max }
            })
            .collect();

        Packet::new(site, targets)
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
