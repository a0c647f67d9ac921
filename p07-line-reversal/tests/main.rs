use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::time::timeout;

async fn spawn_app() -> UdpSocket {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = server.local_addr().unwrap();

    tokio::spawn(async move {
        p07_line_reversal::run(server).await.unwrap();
    });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client.connect(addr).await.unwrap();
    client
}

async fn recv(client: &UdpSocket) -> Vec<u8> {
    let mut buf = [0_u8; 2048];
    let len = timeout(Duration::from_secs(2), client.recv(&mut buf))
        .await
        .expect("timed out waiting for a reply")
        .unwrap();
    buf[..len].to_vec()
}

#[tokio::test]
async fn test_session() {
    let client = spawn_app().await;

    client.send(b"/connect/12345/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/12345/0/");

    client.send(b"/data/12345/0/hello\n/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/12345/6/");
    assert_eq!(recv(&client).await, b"/data/12345/0/olleh\n/");

    client.send(b"/ack/12345/6/").await.unwrap();
    client.send(b"/close/12345/").await.unwrap();
}

#[tokio::test]
async fn test_backslash() {
    let client = spawn_app().await;

    client.send(b"/connect/1/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/1/0/");

    client.send(b"/data/1/0/a\\/b\n/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/1/4/");
    assert_eq!(recv(&client).await, b"/data/1/0/b\\/a\n/");
}

#[tokio::test]
async fn test_long_line_is_chunked_and_retransmitted_on_partial_ack() {
    let client = spawn_app().await;

    client.send(b"/connect/7/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/7/0/");

    // A real client keeps each datagram under the 1000-byte packet
    // limit, so a long line arrives as several `data` fragments.
    let mut body: Vec<u8> = (0..1200_u32).map(|i| b'a' + u8::try_from(i % 26).unwrap()).collect();
    body.push(b'\n');

    let first = &body[..900];
    let second = &body[900..];

    let mut packet = b"/data/7/0/".to_vec();
    packet.extend_from_slice(first);
    packet.push(b'/');
    client.send(&packet).await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/7/900/");

    let mut packet = format!("/data/7/{}/", first.len()).into_bytes();
    packet.extend_from_slice(second);
    packet.push(b'/');
    client.send(&packet).await.unwrap();
    assert_eq!(
        recv(&client).await,
        format!("/ack/7/{}/", body.len()).as_bytes()
    );

    let first_chunk = recv(&client).await;
    assert!(first_chunk.starts_with(b"/data/7/0/"));

    client.send(b"/ack/7/500/").await.unwrap();

    let second_chunk = recv(&client).await;
    assert!(second_chunk.starts_with(b"/data/7/500/"));
}

#[tokio::test]
async fn future_data_is_acked_but_not_applied_until_contiguous() {
    let client = spawn_app().await;

    client.send(b"/connect/42/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/42/0/");

    client.send(b"/data/42/6/world\n/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/42/0/");

    client.send(b"/data/42/0/hello \n/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/42/7/");
    assert_eq!(recv(&client).await, b"/data/42/0/ olleh\n/");
}

#[tokio::test]
async fn unexpected_ack_length_closes_the_session() {
    let client = spawn_app().await;

    client.send(b"/connect/99/").await.unwrap();
    assert_eq!(recv(&client).await, b"/ack/99/0/");

    client.send(b"/ack/99/99999/").await.unwrap();
    assert_eq!(recv(&client).await, b"/close/99/");
}

#[tokio::test]
async fn unknown_session_on_data_is_told_to_close() {
    let client = spawn_app().await;

    client.send(b"/data/404/0/hi\n/").await.unwrap();
    assert_eq!(recv(&client).await, b"/close/404/");
}
