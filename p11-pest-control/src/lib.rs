//! Pest control
//!
//! Sites report their wildlife populations; an upstream authority server
//! declares target population ranges per species per site. This service
//! sits between the two, keeping each site's policies in sync with
//! whatever the latest reported population demands: conserve a species
//! that's under its minimum, cull one that's over its maximum, or do
//! nothing once both sides agree.
use std::collections::HashMap;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use tracing::{info, instrument, warn};

pub mod codec;
pub mod mediator;

use codec::packets::{self, error, hello, site_visit, PacketCodec};
use codec::Error;
use mediator::Mediator;

type ClientConn = Framed<TcpStream, PacketCodec>;

/// Accepts client connections, dispatching each to its own task. Every
/// task shares one `Mediator`: a site visit may need to dial (or write
/// to) an authority connection another client's visit already opened.
#[instrument(skip(listener))]
pub async fn run(
    listener: TcpListener,
    authority_host: impl Into<String> + std::fmt::Debug,
    authority_port: u16,
) -> Result<(), anyhow::Error> {
    let mediator = Arc::new(Mutex::new(Mediator::new(authority_host, authority_port)));

    loop {
        let (socket, peer) = listener.accept().await?;
        info!(%peer, "accepted client");

        tokio::spawn(handle_client(socket, mediator.clone()));
    }
}

async fn handle_client(socket: TcpStream, mediator: Arc<Mutex<Mediator>>) {
    let mut conn = Framed::new(socket, PacketCodec::new());

    if let Err(err) = handshake(&mut conn).await {
        warn!("handshake failed: {err}");
        let _ = conn.send(error::Packet::new(err.to_string()).into()).await;
        return;
    }

    loop {
        match conn.next().await {
            None => return,
            Some(Err(err)) => {
                warn!("framing error: {err}");
                let _ = conn.send(error::Packet::new(err.to_string()).into()).await;
                return;
            }
            Some(Ok(packets::Packet::SiteVisit(visit))) => {
                if let Err(err) = handle_visit(&mediator, visit).await {
                    warn!("visit failed: {err}");
                    if conn.send(error::Packet::new(err.to_string()).into()).await.is_err() {
                        return;
                    }
                }
            }
            Some(Ok(other)) => {
                let err = Error::UnexpectedType(other.type_byte());
                warn!("{err}");
                if conn.send(error::Packet::new(err.to_string()).into()).await.is_err() {
                    return;
                }
            }
        }
    }
}

async fn handshake(conn: &mut ClientConn) -> Result<(), Error> {
    conn.send(hello::Packet::new(hello::PROTOCOL, hello::VERSION).into()).await?;

    match conn.next().await {
        Some(Ok(packets::Packet::Hello(packet))) if packet.is_valid() => Ok(()),
        Some(Ok(packets::Packet::Hello(_))) => Err(Error::BadHello),
        Some(Ok(_)) => Err(Error::MissingHello),
        Some(Err(err)) => Err(err),
        None => Err(Error::MissingHello),
    }
}

async fn handle_visit(mediator: &Arc<Mutex<Mediator>>, visit: site_visit::Packet) -> Result<(), Error> {
    let mut populations = HashMap::new();
    for observation in visit.populations {
        if let Some(&existing) = populations.get(&observation.species) {
            if existing != observation.count {
                return Err(Error::ConflictingCount(observation.species));
            }
        } else {
            populations.insert(observation.species, observation.count);
        }
    }

    mediator.lock().await.visit(visit.site, &populations).await
}

#[cfg(test)]
pub(crate) mod tests {
    pub(crate) fn init_tracing_subscriber() {
        static TRACING_SUBSCRIBER_INIT: parking_lot::Once = parking_lot::Once::new();
        TRACING_SUBSCRIBER_INIT.call_once(tracing_subscriber::fmt::init);
    }
}
