//! Budget chat
//!
//! A line-oriented ASCII chat room. The first line a client sends is its
//! name, which must be non-empty and alphanumeric. On a successful join
//! the room is told, and the new member is told who else is present.
//! Every subsequent line from a member is relayed to every other member
//! as `[name] line`. A disconnect is announced to the rest of the room.
use std::collections::HashSet;
use std::sync::Mutex;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
enum JoinError {
    #[error("illegal name")]
    IllegalName,
    #[error("name already taken")]
    NameTaken,
}

#[derive(Debug, Clone)]
enum Event {
    Joined(String),
    Left(String),
    Message { from: String, line: String },
}

pub struct Room {
    names: Mutex<HashSet<String>>,
    events: broadcast::Sender<Event>,
}

impl Default for Room {
    fn default() -> Self {
        Self::new()
    }
}

impl Room {
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            names: Mutex::default(),
            events,
        }
    }

    fn events(&self) -> broadcast::Sender<Event> {
        self.events.clone()
    }

    fn try_join(&self, name: &str) -> Result<Vec<String>, JoinError> {
        let mut names = self.names.lock().unwrap();
        if names.contains(name) {
            return Err(JoinError::NameTaken);
        }
        let others = names.iter().cloned().collect();
        names.insert(name.to_string());
        Ok(others)
    }

    fn leave(&self, name: &str) {
        self.names.lock().unwrap().remove(name);
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric())
}

#[instrument(skip(socket, room))]
pub async fn handler(socket: TcpStream, room: std::sync::Arc<Room>) {
    let (read, mut write) = socket.into_split();
    let mut lines = BufReader::new(read).lines();

    if write
        .write_all(b"Welcome to budgetchat! What shall I call you?\n")
        .await
        .is_err()
    {
        return;
    }

    let name = match lines.next_line().await {
        Ok(Some(line)) if is_valid_name(line.trim_end()) => line.trim_end().to_string(),
        _ => {
            write
                .write_all(format!("{}\n", JoinError::IllegalName).as_bytes())
                .await
                .ok();
            return;
        }
    };

    let others = match room.try_join(&name) {
        Ok(others) => others,
        Err(err) => {
            write.write_all(format!("{err}\n").as_bytes()).await.ok();
            return;
        }
    };

    info!("{name} joined");

    let roster = format!("* The room contains: {}\n", others.join(", "));
    if write.write_all(roster.as_bytes()).await.is_err() {
        room.leave(&name);
        return;
    }

    let mut events = room.events().subscribe();
    room.events().send(Event::Joined(name.clone())).ok();

    let result = async {
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            debug!("{name}: {line}");
                            room.events().send(Event::Message { from: name.clone(), line }).ok();
                        }
                        Ok(None) => break,
                        Err(err) => {
                            warn!("read error: {err:?}");
                            break;
                        }
                    }
                }

                event = events.recv() => {
                    match event {
                        Ok(Event::Joined(who)) if who != name => {
                            write.write_all(format!("* {who} has entered the room\n").as_bytes()).await?;
                        }
                        Ok(Event::Left(who)) if who != name => {
                            write.write_all(format!("* {who} has left the room\n").as_bytes()).await?;
                        }
                        Ok(Event::Message { from, line }) if from != name => {
                            write.write_all(format!("[{from}] {line}\n").as_bytes()).await?;
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("{name} lagged by {n} messages");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(err) = result {
        warn!("connection error for {name}: {err:?}");
    }

    room.leave(&name);
    room.events().send(Event::Left(name.clone())).ok();
    info!("{name} left");
}

#[cfg(test)]
mod tests {
    use super::is_valid_name;

    #[test]
    fn accepts_alphanumeric() {
        assert!(is_valid_name("foo123"));
    }

    #[test]
    fn rejects_empty() {
        assert!(!is_valid_name(""));
    }

    #[test]
    fn rejects_punctuation() {
        assert!(!is_valid_name("foo bar"));
        assert!(!is_valid_name("foo!"));
    }
}
