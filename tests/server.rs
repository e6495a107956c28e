//! End-to-end test: a real TCP session speaking the framed protocol.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rust_pubsub_db::config::Config;
use rust_pubsub_db::net;
use rust_pubsub_db::server::serve_listener;
use rust_pubsub_db::shutdown::Shutdown;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};

async fn start_server() -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    tokio::spawn(serve_listener(
        listener,
        Arc::new(Config::default()),
        shutdown.clone(),
    ));
    (addr, shutdown)
}

async fn send(stream: &mut TcpStream, request_id: u32, command: &str) {
    net::write_frame(stream, request_id, command.as_bytes())
        .await
        .unwrap();
}

async fn recv(stream: &mut TcpStream) -> (u32, Value) {
    let (request_id, body) = tokio::time::timeout(Duration::from_secs(5), net::read_frame(stream))
        .await
        .expect("timed out waiting for a frame")
        .unwrap();
    (request_id, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn full_session_round_trip() {
    let (addr, shutdown) = start_server().await;
    let mut writer_conn = TcpStream::connect(addr).await.unwrap();
    let mut sub_conn = TcpStream::connect(addr).await.unwrap();

    // insert, then promote ticker to a key
    send(
        &mut writer_conn,
        1,
        "insert into stocks (ticker, bid, ask) values (IBM, 123, 124)",
    )
    .await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 1);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["action"], "insert");
    assert_eq!(body["rows"], 1);

    send(&mut writer_conn, 2, "key stocks ticker").await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 2);
    assert_eq!(body["action"], "key");

    // a duplicate key is rejected
    send(
        &mut writer_conn,
        3,
        "insert into stocks (ticker, bid, ask) values (IBM, 1, 1)",
    )
    .await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 3);
    assert_eq!(body["status"], "err");

    // select echoes the stored row
    send(&mut writer_conn, 4, "select * from stocks").await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 4);
    assert_eq!(body["rows"], 1);
    assert_eq!(body["columns"], serde_json::json!(["id", "ticker", "bid", "ask"]));
    assert_eq!(body["data"][0], serde_json::json!(["0", "IBM", "123", "124"]));

    // subscribe from the other connection: ack, then the initial snapshot
    send(&mut sub_conn, 5, "subscribe * from stocks where ticker = IBM").await;
    let (id, body) = recv(&mut sub_conn).await;
    assert_eq!(id, 5);
    assert_eq!(body["action"], "subscribe");
    let pubsubid = body["pubsubid"].as_str().unwrap().to_string();
    let (id, body) = recv(&mut sub_conn).await;
    assert_eq!(id, 0, "events use request id 0");
    assert_eq!(body["action"], "add");
    assert_eq!(body["pubsubid"], Value::String(pubsubid.clone()));
    assert_eq!(body["rows"], 1);

    // moving the record out of the subscribed key group pushes a remove
    send(
        &mut writer_conn,
        6,
        "update stocks set ticker = MSFT where ticker = IBM",
    )
    .await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 6);
    assert_eq!(body["action"], "update");
    assert_eq!(body["rows"], 1);

    let (id, body) = recv(&mut sub_conn).await;
    assert_eq!(id, 0);
    assert_eq!(body["action"], "remove");
    assert_eq!(body["pubsubid"], Value::String(pubsubid));
    assert_eq!(body["data"][0][1], "MSFT");

    // status reports both live connections
    send(&mut writer_conn, 7, "status").await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 7);
    assert_eq!(body["action"], "status");
    assert_eq!(body["connections"], 2);

    // parse errors come back as err bodies and the session keeps going
    send(&mut writer_conn, 8, "definitely not a command").await;
    let (id, body) = recv(&mut writer_conn).await;
    assert_eq!(id, 8);
    assert_eq!(body["status"], "err");

    // stop drains every worker
    send(&mut writer_conn, 9, "stop").await;
    assert!(
        shutdown.quit_and_wait(Duration::from_secs(3)).await,
        "workers failed to drain"
    );
}

#[tokio::test]
async fn pagination_reuses_the_request_id_across_chunks() {
    let (addr, shutdown) = start_server().await;
    let config_batch = Config::default().data_batch_size;
    let rows = config_batch * 2 + 1; // three chunks
    let mut conn = TcpStream::connect(addr).await.unwrap();

    for i in 0..rows {
        send(
            &mut conn,
            10,
            &format!("insert into big (n) values ({i})"),
        )
        .await;
        recv(&mut conn).await;
    }

    send(&mut conn, 42, "select * from big").await;
    let mut seen = 0usize;
    let mut last_torow = 0u64;
    for chunk in 0..3 {
        let (id, body) = recv(&mut conn).await;
        assert_eq!(id, 42);
        assert_eq!(body["rows"].as_u64().unwrap() as usize, rows);
        let fromrow = body["fromrow"].as_u64().unwrap();
        let torow = body["torow"].as_u64().unwrap();
        assert_eq!(fromrow, last_torow + 1, "chunk {chunk} must be contiguous");
        last_torow = torow;
        seen += body["data"].as_array().unwrap().len();
    }
    assert_eq!(seen, rows);
    assert_eq!(last_torow as usize, rows);

    shutdown.quit();
    assert!(shutdown.wait(Duration::from_secs(3)).await);
}

#[tokio::test]
async fn close_terminates_only_that_connection() {
    let (addr, shutdown) = start_server().await;
    let mut doomed = TcpStream::connect(addr).await.unwrap();
    let mut survivor = TcpStream::connect(addr).await.unwrap();

    send(&mut doomed, 1, "close").await;
    // the server hangs up; the read eventually fails or returns EOF
    let hung_up = tokio::time::timeout(Duration::from_secs(5), net::read_frame(&mut doomed))
        .await
        .expect("timed out waiting for the close");
    assert!(hung_up.is_err());

    // the other connection is untouched
    send(&mut survivor, 2, "select * from t").await;
    let (id, body) = recv(&mut survivor).await;
    assert_eq!(id, 2);
    assert_eq!(body["status"], "ok");

    shutdown.quit();
    assert!(shutdown.wait(Duration::from_secs(3)).await);
}
