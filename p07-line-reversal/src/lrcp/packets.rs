//! LRCP packet framing: escaped, slash-delimited ASCII records over UDP.
//!
//! A packet is `/type/field/field/.../`. Fields are escaped so that a
//! literal `\` becomes `\\` and a literal `/` becomes `\/`. A datagram
//! shorter than 3 bytes, 1000 bytes or longer, or not starting and
//! ending with `/` is simply not an LRCP packet.
const MAX_PACKET_LEN: usize = 999;
const MIN_PACKET_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect { session: i32 },
    Data { session: i32, pos: i32, data: Vec<u8> },
    Ack { session: i32, length: i32 },
    Close { session: i32 },
}

impl Packet {
    #[must_use]
    pub fn session(&self) -> i32 {
        match self {
            Self::Connect { session }
            | Self::Data { session, .. }
            | Self::Ack { session, .. }
            | Self::Close { session } => *session,
        }
    }

    #[must_use]
    pub fn parse(datagram: &[u8]) -> Option<Self> {
        if datagram.len() < MIN_PACKET_LEN || datagram.len() > MAX_PACKET_LEN {
            return None;
        }
        if datagram[0] != b'/' || datagram[datagram.len() - 1] != b'/' {
            return None;
        }

        let fields = unescape_split(datagram);
        if fields.len() < 3 {
            return None;
        }

        let m_type = &fields[1];
        let args = &fields[2..fields.len() - 1];

        match m_type.as_slice() {
            b"connect" => {
                let [session] = args else {
                    return None;
                };
                Some(Self::Connect {
                    session: valid_int(session)?,
                })
            }
            b"data" => {
                let [session, pos, data] = args else {
                    return None;
                };
                Some(Self::Data {
                    session: valid_int(session)?,
                    pos: valid_int(pos)?,
                    data: data.clone(),
                })
            }
            b"ack" => {
                let [session, length] = args else {
                    return None;
                };
                Some(Self::Ack {
                    session: valid_int(session)?,
                    length: valid_int(length)?,
                })
            }
            b"close" => {
                let [session] = args else {
                    return None;
                };
                Some(Self::Close {
                    session: valid_int(session)?,
                })
            }
            _ => None,
        }
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Connect { session } => encode_fields(b"connect", &[int_field(*session)]),
            Self::Data { session, pos, data } => {
                encode_fields(b"data", &[int_field(*session), int_field(*pos), data.clone()])
            }
            Self::Ack { session, length } => {
                encode_fields(b"ack", &[int_field(*session), int_field(*length)])
            }
            Self::Close { session } => encode_fields(b"close", &[int_field(*session)]),
        }
    }
}

fn int_field(value: i32) -> Vec<u8> {
    value.to_string().into_bytes()
}

fn encode_fields(m_type: &[u8], args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = vec![b'/'];
    out.extend_from_slice(m_type);
    out.push(b'/');
    for arg in args {
        out.extend(escape(arg));
        out.push(b'/');
    }
    out
}

fn escape(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\\' || b == b'/' {
            out.push(b'\\');
        }
        out.push(b);
    }
    out
}

fn unescape_split(data: &[u8]) -> Vec<Vec<u8>> {
    let mut fields = Vec::new();
    let mut current = Vec::new();
    let mut escaped = false;

    for &b in data {
        if b == b'\\' {
            if escaped {
                current.push(b'\\');
                escaped = false;
            } else {
                escaped = true;
            }
            continue;
        }
        if escaped {
            current.push(b);
            escaped = false;
            continue;
        }
        if b == b'/' {
            fields.push(std::mem::take(&mut current));
        } else {
            current.push(b);
        }
    }
    fields.push(current);
    fields
}

/// A non-negative integer strictly less than 2^31, per the session/pos/
/// length field rules.
fn valid_int(bytes: &[u8]) -> Option<i32> {
    let s = std::str::from_utf8(bytes).ok()?;
    let value: i64 = s.trim().parse().ok()?;
    if !(0..2_147_483_648_i64).contains(&value) {
        return None;
    }
    i32::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::Packet;

    #[test]
    fn parses_connect() {
        assert_eq!(
            Packet::parse(b"/connect/12345/"),
            Some(Packet::Connect { session: 12345 })
        );
    }

    #[test]
    fn parses_data_with_escapes() {
        assert_eq!(
            Packet::parse(b"/data/1234/0/hello\\/world/"),
            Some(Packet::Data {
                session: 1234,
                pos: 0,
                data: b"hello/world".to_vec(),
            })
        );
    }

    #[test]
    fn parses_ack() {
        assert_eq!(
            Packet::parse(b"/ack/1234/10/"),
            Some(Packet::Ack {
                session: 1234,
                length: 10
            })
        );
    }

    #[test]
    fn parses_close() {
        assert_eq!(
            Packet::parse(b"/close/1234/"),
            Some(Packet::Close { session: 1234 })
        );
    }

    #[test]
    fn rejects_missing_trailing_slash() {
        assert_eq!(Packet::parse(b"/connect/1234"), None);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(Packet::parse(b"/connect/1234/5678/"), None);
    }

    #[test]
    fn rejects_oversized_session() {
        assert_eq!(Packet::parse(b"/connect/99999999999999999999/"), None);
    }

    #[test]
    fn rejects_negative_session() {
        assert_eq!(Packet::parse(b"/connect/-1/"), None);
    }

    #[test]
    fn round_trips_escaped_payload() {
        let packet = Packet::Data {
            session: 1,
            pos: 0,
            data: b"a\\b/c".to_vec(),
        };
        let encoded = packet.encode();
        assert_eq!(Packet::parse(&encoded), Some(packet));
    }
}
