//! Means to an end
//!
//! Binary records of `u8 type | i32 a | i32 b`, 9 bytes each, big-endian.
//!
//! - `'I'` inserts `(timestamp=a, price=b)`.
//! - `'Q'` asks for the mean price with `mintime=a, maxtime=b`, replying a
//!   single big-endian `i32`. The mean is `0` if the range is empty or
//!   inverted (`maxtime < mintime`).
//!
//! Any other record type is a fixed error: the server writes a message
//! and closes the connection.
use std::collections::BTreeMap;

use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};

use tracing::{debug, info, instrument, warn};

#[derive(Debug, PartialEq, Eq)]
enum Message {
    Insert { timestamp: i32, price: i32 },
    Query { mintime: i32, maxtime: i32 },
}

#[derive(Debug, Error)]
enum Error {
    #[error("invalid record type: 0x{0:02x}")]
    InvalidRecordType(u8),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn parse(record: [u8; 9]) -> Result<Message, Error> {
    let a = i32::from_be_bytes(record[1..5].try_into().expect("slice of length 4"));
    let b = i32::from_be_bytes(record[5..9].try_into().expect("slice of length 4"));

    match record[0] {
        b'I' => Ok(Message::Insert { timestamp: a, price: b }),
        b'Q' => Ok(Message::Query { mintime: a, maxtime: b }),
        other => Err(Error::InvalidRecordType(other)),
    }
}

/// Decodes fixed 9-byte records; encodes a query's `i32` reply.
struct RecordCodec;

impl Decoder for RecordCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if src.len() < 9 {
            return Ok(None);
        }

        let record: [u8; 9] = src.split_to(9)[..].try_into().expect("split_to(9) yields 9 bytes");

        parse(record).map(Some)
    }
}

impl Encoder<i32> for RecordCodec {
    type Error = Error;

    fn encode(&mut self, item: i32, dst: &mut BytesMut) -> Result<(), Error> {
        dst.extend_from_slice(&item.to_be_bytes());

        Ok(())
    }
}

fn mean(prices: &BTreeMap<i32, i32>, mintime: i32, maxtime: i32) -> i32 {
    if maxtime < mintime {
        return 0;
    }

    let mut count: i64 = 0;
    let mut sum: i64 = 0;
    for price in prices.range(mintime..=maxtime).map(|(_, price)| *price) {
        count += 1;
        sum += i64::from(price);
    }

    if count == 0 {
        0
    } else {
        i32::try_from(sum / count).unwrap_or(if sum < 0 { i32::MIN } else { i32::MAX })
    }
}

#[instrument(skip(socket))]
pub async fn handler(socket: TcpStream) {
    let mut prices = BTreeMap::new();
    let mut conn = Framed::new(socket, RecordCodec);

    loop {
        match conn.next().await {
            Some(Ok(Message::Insert { timestamp, price })) => {
                debug!("insert {timestamp} {price}");
                prices.insert(timestamp, price);
            }
            Some(Ok(Message::Query { mintime, maxtime })) => {
                let value = mean(&prices, mintime, maxtime);
                debug!("query {mintime} {maxtime} -> {value}");
                if conn.send(value).await.is_err() {
                    return;
                }
            }
            Some(Err(err)) => {
                warn!("{err}");
                conn.get_mut().write_all(b"undefined!!!1111!! rm -rf /\n").await.ok();
                return;
            }
            None => {
                info!("connection closed");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mean, parse, Message};
    use std::collections::BTreeMap;

    #[test]
    fn parses_insert() {
        let mut record = [0_u8; 9];
        record[0] = b'I';
        record[1..5].copy_from_slice(&100_i32.to_be_bytes());
        record[5..9].copy_from_slice(&(-5_i32).to_be_bytes());

        assert_eq!(
            parse(record).unwrap(),
            Message::Insert {
                timestamp: 100,
                price: -5
            }
        );
    }

    #[test]
    fn parses_query() {
        let mut record = [0_u8; 9];
        record[0] = b'Q';
        record[1..5].copy_from_slice(&0_i32.to_be_bytes());
        record[5..9].copy_from_slice(&1000_i32.to_be_bytes());

        assert_eq!(
            parse(record).unwrap(),
            Message::Query {
                mintime: 0,
                maxtime: 1000
            }
        );
    }

    #[test]
    fn rejects_unknown_type() {
        let record = [b'X'; 9];
        assert!(parse(record).is_err());
    }

    #[test]
    fn mean_of_range() {
        let mut prices = BTreeMap::new();
        prices.insert(12345, 101);
        prices.insert(12346, 102);
        prices.insert(12347, 100);
        prices.insert(40960, 5);

        assert_eq!(mean(&prices, 12288, 16384), 101);
    }

    #[test]
    fn mean_of_empty_range_is_zero() {
        let prices = BTreeMap::new();
        assert_eq!(mean(&prices, 0, 100), 0);
    }

    #[test]
    fn mean_of_inverted_range_is_zero() {
        let mut prices = BTreeMap::new();
        prices.insert(1, 100);
        assert_eq!(mean(&prices, 100, 1), 0);
    }
}
