use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_chat_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let room = Arc::new(p03_budget_chat::Room::new());

    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::spawn(p03_budget_chat::handler(socket, room.clone()));
        }
    });

    addr.to_string()
}

async fn spawn_proxy(upstream_addr: String) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let (socket, _) = listener.accept().await.unwrap();
            tokio::spawn(p05_mob_in_the_middle::handler(socket, upstream_addr.clone()));
        }
    });

    addr.to_string()
}

#[tokio::test]
async fn rewrites_boguscoin_addresses_between_two_clients() {
    let chat_addr = spawn_chat_server().await;
    let proxy_addr = spawn_proxy(chat_addr).await;

    let alice = TcpStream::connect(&proxy_addr).await.unwrap();
    let (alice_read, mut alice_write) = alice.into_split();
    let mut alice_lines = BufReader::new(alice_read).lines();
    alice_lines.next_line().await.unwrap();
    alice_write.write_all(b"alice\n").await.unwrap();
    alice_lines.next_line().await.unwrap();

    let bob = TcpStream::connect(&proxy_addr).await.unwrap();
    let (bob_read, mut bob_write) = bob.into_split();
    let mut bob_lines = BufReader::new(bob_read).lines();
    bob_lines.next_line().await.unwrap();
    bob_write.write_all(b"bob\n").await.unwrap();
    bob_lines.next_line().await.unwrap();

    alice_lines.next_line().await.unwrap();

    bob_write
        .write_all(b"Send to 7F1u3wSD5RbOHQmupo9nx4TnhQ3 please\n")
        .await
        .unwrap();

    let received = alice_lines.next_line().await.unwrap().unwrap();
    assert_eq!(
        received,
        "[bob] Send to 7YWHMfk9JZe0LM0g1ZauHuiSxhI please"
    );
}
