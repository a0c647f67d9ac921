//! Line reversal
//!
//! LRCP (Line Reversal Control Protocol) is a reliable byte stream
//! built on unreliable UDP datagrams. Each session is a bidirectional
//! stream of bytes identified by a session ID chosen by the peer; this
//! application reverses each line it receives and sends the result
//! back down the same session.
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::time::{self, Duration};

use tracing::{debug, info, instrument, warn};

pub mod lrcp;

use lrcp::packets::Packet;
use lrcp::session::Session;

const MAX_DATAGRAM: usize = 2048;
const TICK: Duration = Duration::from_millis(100);

async fn send(socket: &UdpSocket, packet: &Packet, peer: SocketAddr) {
    if let Err(err) = socket.send_to(&packet.encode(), peer).await {
        warn!("send to {peer} failed: {err:?}");
    }
}

#[instrument(skip(socket))]
pub async fn run(socket: UdpSocket) -> Result<(), std::io::Error> {
    let mut sessions: HashMap<i32, Session> = HashMap::new();
    let mut buf = [0_u8; MAX_DATAGRAM];
    let mut ticker = time::interval(TICK);

    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, peer) = received?;
                let Some(packet) = Packet::parse(&buf[..len]) else {
                    continue;
                };
                handle_packet(&socket, &mut sessions, packet, peer).await;
            }

            _ = ticker.tick() => {
                tick(&socket, &mut sessions).await;
            }
        }
    }
}

async fn handle_packet(
    socket: &UdpSocket,
    sessions: &mut HashMap<i32, Session>,
    packet: Packet,
    peer: SocketAddr,
) {
    let id = packet.session();

    match packet {
        Packet::Connect { session } => {
            let s = sessions.entry(session).or_insert_with(|| Session::new(session, peer));
            send(
                socket,
                &Packet::Ack {
                    session: s.id,
                    length: 0,
                },
                peer,
            )
            .await;
        }

        Packet::Data { pos, data, .. } => {
            let Some(s) = sessions.get_mut(&id) else {
                send(socket, &Packet::Close { session: id }, peer).await;
                return;
            };

            let ack = s.on_data(&data, pos);
            send(socket, &ack, peer).await;

            for line in s.take_lines() {
                debug!("reversing line of {} bytes", line.len());
                let mut reversed: Vec<u8> = line.into_iter().rev().collect();
                reversed.push(b'\n');
                let data_packet = s.queue_send(&reversed);
                send(socket, &data_packet, peer).await;
            }
        }

        Packet::Ack { length, .. } => {
            let Some(s) = sessions.get_mut(&id) else {
                send(socket, &Packet::Close { session: id }, peer).await;
                return;
            };

            if let Some(reply) = s.on_ack(length) {
                let closed = s.closed;
                send(socket, &reply, peer).await;
                if closed {
                    sessions.remove(&id);
                    info!("session {id} closed by peer ack overrun");
                }
            }
        }

        Packet::Close { .. } => {
            if sessions.remove(&id).is_some() {
                debug!("session {id} closed by peer");
            }
        }
    }
}

async fn tick(socket: &UdpSocket, sessions: &mut HashMap<i32, Session>) {
    let now = Instant::now();
    let mut expired = Vec::new();

    for (id, session) in sessions.iter() {
        if session.is_expired(now) {
            expired.push((*id, session.peer));
        } else if session.needs_retry(now) {
            if let Some(packet) = session.retry_packet() {
                send(socket, &packet, session.peer).await;
            }
        }
    }

    for (id, peer) in expired {
        send(socket, &Packet::Close { session: id }, peer).await;
        sessions.remove(&id);
        info!("session {id} expired");
    }
}
