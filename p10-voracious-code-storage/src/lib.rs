//! Voracious code storage
//!
//! A line-oriented protocol for storing and retrieving text files by path,
//! keeping every revision ever written. A connection greets with `READY`
//! and after every completed command except an unrecognized verb — `HELP`,
//! `GET`, `PUT`, `LIST`, and usage errors on a recognized verb all prompt
//! again; an outright unknown verb does not.
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, instrument, warn};

pub mod commands;
pub mod path;
pub mod store;

use commands::{Command, ParseError};
use store::Store;

type Reader = BufReader<OwnedReadHalf>;
type Writer = OwnedWriteHalf;

#[instrument(skip(listener))]
pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    let store = Arc::new(Store::new());
    loop {
        let (socket, peer) = listener.accept().await?;
        let store = store.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(socket, &store).await {
                warn!(%peer, "connection ended: {err}");
            }
        });
    }
}

async fn handle_connection(socket: TcpStream, store: &Store) -> Result<(), std::io::Error> {
    let (read_half, mut writer) = socket.into_split();
    let mut reader = BufReader::new(read_half);
    writer.write_all(b"READY\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            debug!("connection closed");
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        match commands::parse_line(trimmed) {
            Ok(Command::Help) => {
                writer.write_all(b"OK usage: HELP|GET|PUT|LIST\n").await?;
                writer.write_all(b"READY\n").await?;
            }
            Ok(Command::Put { path, length }) => handle_put(&mut reader, &mut writer, store, &path, length).await?,
            Ok(Command::Get { path, revision }) => {
                handle_get(&mut writer, store, &path, revision.as_deref()).await?;
            }
            Ok(Command::List { dir }) => handle_list(&mut writer, store, &dir).await?,
            Err(err @ ParseError::Usage(_)) => {
                writer.write_all(format!("ERR {err}\n").as_bytes()).await?;
                writer.write_all(b"READY\n").await?;
            }
            Err(err @ ParseError::Illegal(_)) => {
                writer.write_all(format!("ERR {err}\n").as_bytes()).await?;
            }
        }
    }
}

/// Always consumes exactly `length` bytes off the wire before reporting any
/// validation failure, so a bad path or non-text body never desyncs the
/// framing for the next command.
async fn handle_put(reader: &mut Reader, writer: &mut Writer, store: &Store, path: &str, length: i64) -> Result<(), std::io::Error> {
    let length = usize::try_from(length).expect("length already clamped to non-negative");
    let mut data = vec![0u8; length];
    reader.read_exact(&mut data).await?;

    if !path::is_valid_file_path(path) {
        writer.write_all(b"ERR illegal file name\n").await?;
        writer.write_all(b"READY\n").await?;
        return Ok(());
    }
    if !data.iter().all(|&b| is_text_byte(b)) {
        writer.write_all(b"ERR text files only\n").await?;
        writer.write_all(b"READY\n").await?;
        return Ok(());
    }
    let revision = store.save(path, data);
    writer.write_all(format!("OK r{revision}\n").as_bytes()).await?;
    writer.write_all(b"READY\n").await?;
    Ok(())
}

fn is_text_byte(b: u8) -> bool {
    b == 0x09 || b == 0x0A || (0x20..=0x7E).contains(&b)
}

async fn handle_get(writer: &mut Writer, store: &Store, path: &str, revision: Option<&str>) -> Result<(), std::io::Error> {
    if !path::is_valid_file_path(path) {
        writer.write_all(b"ERR illegal file name\n").await?;
        return Ok(());
    }
    let Some(latest) = store.latest_revision(path) else {
        writer.write_all(b"ERR no such file\n").await?;
        return Ok(());
    };
    let revision_number = match revision {
        Some(spec) => path::parse_revision(spec),
        None => i64::from(latest),
    };
    let Some(data) = store.get(path, revision_number) else {
        writer.write_all(b"ERR no such revision\n").await?;
        return Ok(());
    };
    writer.write_all(format!("OK {}\n", data.len()).as_bytes()).await?;
    writer.write_all(&data).await?;
    writer.write_all(b"READY\n").await?;
    Ok(())
}

async fn handle_list(writer: &mut Writer, store: &Store, dir: &str) -> Result<(), std::io::Error> {
    if !path::is_valid_dir_path(dir) {
        writer.write_all(b"ERR illegal dir name\n").await?;
        return Ok(());
    }
    let dir = path::normalize_dir(dir);
    let entries = store.list(&dir);
    writer.write_all(format!("OK {}\n", entries.len()).as_bytes()).await?;
    for (name, revision) in entries {
        let line = match revision {
            Some(rev) => format!("{name} r{rev}\n"),
            None => format!("{name} DIR\n"),
        };
        writer.write_all(line.as_bytes()).await?;
    }
    writer.write_all(b"READY\n").await?;
    Ok(())
}
