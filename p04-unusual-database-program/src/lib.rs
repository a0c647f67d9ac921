//! Unusual database program
//!
//! A single UDP socket holds a `key=value` map. A datagram containing `=`
//! inserts (splitting on the first `=`, so values may contain further `=`
//! bytes); a datagram with no `=` is a retrieve, and the reply is
//! `key=value` (empty value if the key is unset). The key `version` is
//! immutable and always reads back a fixed banner; inserts to it are
//! silently ignored.
use std::collections::HashMap;
use std::sync::Mutex;

use tokio::net::UdpSocket;

use tracing::{debug, instrument, warn};

const VERSION_KEY: &[u8] = b"version";
const VERSION_VALUE: &[u8] = b"Unusual Database Program 1.0";

/// Maximum UDP payload this service will read or write, per spec.
const MAX_PACKET: usize = 1000;

pub struct Store {
    entries: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn insert(&self, key: &[u8], value: &[u8]) {
        if key == VERSION_KEY {
            return;
        }
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_vec(), value.to_vec());
    }

    fn retrieve(&self, key: &[u8]) -> Vec<u8> {
        if key == VERSION_KEY {
            return VERSION_VALUE.to_vec();
        }
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }
}

fn respond(store: &Store, datagram: &[u8]) -> Option<Vec<u8>> {
    match datagram.iter().position(|&b| b == b'=') {
        Some(pos) => {
            let (key, rest) = datagram.split_at(pos);
            let value = &rest[1..];
            store.insert(key, value);
            None
        }
        None => {
            let value = store.retrieve(datagram);
            let mut reply = Vec::with_capacity(datagram.len() + 1 + value.len());
            reply.extend_from_slice(datagram);
            reply.push(b'=');
            reply.extend_from_slice(&value);
            Some(reply)
        }
    }
}

#[instrument(skip(socket))]
pub async fn run(socket: UdpSocket) -> Result<(), std::io::Error> {
    let store = Store::new();
    let mut buf = [0_u8; MAX_PACKET];

    loop {
        let (len, peer) = socket.recv_from(&mut buf).await?;
        let datagram = &buf[..len];
        debug!(?peer, len, "datagram received");

        if let Some(reply) = respond(&store, datagram) {
            if let Err(err) = socket.send_to(&reply, peer).await {
                warn!("send to {peer} failed: {err:?}");
            }
        }
    }
}
