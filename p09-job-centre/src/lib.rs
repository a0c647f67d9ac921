//! Job centre
//!
//! An in-memory, priority-ordered work queue service. Clients speak
//! line-delimited JSON: `put` a job onto a named queue, `get` the
//! highest-priority job across one or more queues (optionally blocking
//! until one appears), `delete` a job outright, or `abort` a job back onto
//! its queue. A client that disconnects while holding reserved jobs
//! returns them to their original queues automatically.
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use tracing::{debug, info, instrument, warn};

pub mod centre;
pub mod protocol;
pub mod queue;

use centre::Centre;
use protocol::{Request, Response};

type Reader = FramedRead<OwnedReadHalf, LinesCodec>;
type Writer = FramedWrite<OwnedWriteHalf, LinesCodec>;

#[instrument(skip(listener))]
pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    let centre = Arc::new(Mutex::new(Centre::new()));

    loop {
        let (socket, peer) = listener.accept().await?;
        let centre = centre.clone();

        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, centre).await {
                warn!(%peer, "connection ended: {err:?}");
            }
        });
    }
}

async fn handle_connection(
    socket: tokio::net::TcpStream,
    centre: Arc<Mutex<Centre>>,
) -> Result<(), LinesCodecError> {
    let client_id = centre.lock().register_client();
    let (read_half, write_half) = socket.into_split();
    let mut reader = FramedRead::new(read_half, LinesCodec::new());
    let mut writer = FramedWrite::new(write_half, LinesCodec::new());

    while let Some(line) = reader.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let Some(response) = process_line(&centre, client_id, &line, &mut reader).await else {
            break;
        };
        writer.send(response.encode()).await?;
    }

    centre.lock().disconnect(client_id);
    debug!(client_id, "disconnected");
    Ok(())
}

/// Handles one request line. Returns `None` only when a `get {wait:true}`
/// discovers mid-wait that the peer is gone, in which case the connection
/// is closed without attempting a final write.
async fn process_line(
    centre: &Mutex<Centre>,
    client_id: u64,
    line: &str,
    reader: &mut Reader,
) -> Option<Response> {
    let request = match protocol::parse(line) {
        Ok(request) => request,
        Err(msg) => return Some(Response::error(msg)),
    };

    match request {
        Request::Put { queue, pri, job } => {
            let id = centre.lock().put(queue, pri, job);
            Some(Response::put_ok(id))
        }
        Request::Get { queues, wait } => handle_get(centre, client_id, queues, wait, reader).await,
        Request::Delete { id } => {
            let ok = centre.lock().delete(id);
            Some(if ok { Response::ok() } else { Response::NoJob })
        }
        Request::Abort { id } => {
            let ok = centre.lock().abort(client_id, id);
            Some(if ok { Response::ok() } else { Response::NoJob })
        }
    }
}

async fn handle_get(
    centre: &Mutex<Centre>,
    client_id: u64,
    queues: Vec<String>,
    wait: bool,
    reader: &mut Reader,
) -> Option<Response> {
    if let Some(view) = centre.lock().get(client_id, &queues) {
        return Some(Response::job(view));
    }
    if !wait {
        return Some(Response::NoJob);
    }

    let (wait_id, rx) = centre.lock().register_wait(client_id, queues);

    tokio::select! {
        job = rx => Some(job.map_or(Response::NoJob, Response::job)),

        // The peer disconnected (or, rarer, sent another line) while we
        // were blocked; either way this wait can no longer be served.
        _ = reader.next() => {
            centre.lock().cancel_wait(wait_id);
            info!(client_id, "abandoned wait on disconnect");
            None
        }
    }
}
