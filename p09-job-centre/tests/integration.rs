use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

async fn spawn_app() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        p09_job_centre::run(listener).await.unwrap();
    });

    addr.to_string()
}

struct Client {
    write: tokio::net::tcp::OwnedWriteHalf,
    read: BufReader<tokio::net::tcp::OwnedReadHalf>,
}

impl Client {
    async fn connect(addr: &str) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (read, write) = stream.into_split();
        Self {
            write,
            read: BufReader::new(read),
        }
    }

    async fn send(&mut self, value: Value) {
        let mut line = serde_json::to_vec(&value).unwrap();
        line.push(b'\n');
        self.write.write_all(&line).await.unwrap();
    }

    async fn recv(&mut self) -> Value {
        let mut line = String::new();
        timeout(Duration::from_secs(2), self.read.read_line(&mut line))
            .await
            .expect("timed out waiting for a response")
            .unwrap();
        serde_json::from_str(line.trim_end()).unwrap()
    }
}

#[tokio::test]
async fn priorities_are_served_highest_first() {
    let addr = spawn_app().await;
    let mut producer = Client::connect(&addr).await;

    for pri in [5, 10, 7] {
        producer.send(json!({"request": "put", "queue": "q1", "pri": pri, "job": {}})).await;
        let resp = producer.recv().await;
        assert_eq!(resp["status"], "ok");
    }

    let mut consumer = Client::connect(&addr).await;
    for expected_pri in [10, 7, 5] {
        consumer.send(json!({"request": "get", "queues": ["q1"]})).await;
        let resp = consumer.recv().await;
        assert_eq!(resp["status"], "ok");
        assert_eq!(resp["pri"], expected_pri);
    }
}

#[tokio::test]
async fn reservation_is_reclaimed_on_disconnect() {
    let addr = spawn_app().await;
    let mut producer = Client::connect(&addr).await;
    producer.send(json!({"request": "put", "queue": "q1", "pri": 42, "job": {"task": "x"}})).await;
    let put_resp = producer.recv().await;
    let job_id = put_resp["id"].clone();

    {
        let mut holder = Client::connect(&addr).await;
        holder.send(json!({"request": "get", "queues": ["q1"]})).await;
        let resp = holder.recv().await;
        assert_eq!(resp["id"], job_id);
        // holder drops here, closing its connection
    }

    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut second = Client::connect(&addr).await;
    second.send(json!({"request": "get", "queues": ["q1"]})).await;
    let resp = second.recv().await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["id"], job_id);
    assert_eq!(resp["pri"], 42);
}

#[tokio::test]
async fn waiting_get_is_woken_by_a_later_put() {
    let addr = spawn_app().await;
    let mut waiter = Client::connect(&addr).await;
    waiter.send(json!({"request": "get", "queues": ["q1"], "wait": true})).await;

    // give the wait a moment to register before the job appears
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut producer = Client::connect(&addr).await;
    producer.send(json!({"request": "put", "queue": "q1", "pri": 1, "job": {"late": true}})).await;
    let put_resp = producer.recv().await;
    assert_eq!(put_resp["status"], "ok");

    let resp = waiter.recv().await;
    assert_eq!(resp["status"], "ok");
    assert_eq!(resp["job"]["late"], true);
}

#[tokio::test]
async fn abort_from_a_non_holder_is_rejected() {
    let addr = spawn_app().await;
    let mut producer = Client::connect(&addr).await;
    producer.send(json!({"request": "put", "queue": "q1", "pri": 1, "job": {}})).await;
    let id = producer.recv().await["id"].as_u64().unwrap();

    let mut holder = Client::connect(&addr).await;
    holder.send(json!({"request": "get", "queues": ["q1"]})).await;
    holder.recv().await;

    let mut stranger = Client::connect(&addr).await;
    stranger.send(json!({"request": "abort", "id": id})).await;
    let resp = stranger.recv().await;
    assert_eq!(resp["status"], "no-job");

    holder.send(json!({"request": "abort", "id": id})).await;
    let resp = holder.recv().await;
    assert_eq!(resp["status"], "ok");
}

#[tokio::test]
async fn malformed_request_is_reported_without_closing_the_connection() {
    let addr = spawn_app().await;
    let mut client = Client::connect(&addr).await;

    client.send(json!({"request": "put", "queue": "q1"})).await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "error");

    client.send(json!({"request": "get", "queues": ["q1"]})).await;
    let resp = client.recv().await;
    assert_eq!(resp["status"], "no-job");
}
