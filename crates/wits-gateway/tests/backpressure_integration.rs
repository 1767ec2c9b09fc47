//! A slow client's bounded outbound queue overflows and it gets
//! disconnected, while a second subscriber of the same upstream TCPSession
//! still receives every record in order.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use socket2::SockRef;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message as TMessage;

use wits_core::Config;
use wits_gateway::{create_router, GatewayState};

const RECORD_COUNT: u32 = 10;

async fn spawn_fake_upstream() -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        // give both clients time to attach before the flood starts
        tokio::time::sleep(Duration::from_millis(300)).await;
        for i in 0..RECORD_COUNT {
            let mut payload = format!("{:04}", i).into_bytes();
            payload.extend(std::iter::repeat(b'x').take(4000));
            payload.push(b'\n');
            sock.write_all(&payload).await.unwrap();
        }
    });
    (addr.ip().to_string(), addr.port())
}

async fn spawn_gateway(default_host: String, default_port: u16) -> u16 {
    let cfg = Arc::new(Config {
        default_host,
        default_port,
        client_queue_size: 4,
        ..Config::default()
    });
    let state = GatewayState::new(cfg);
    let app = create_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn slow_subscriber_is_disconnected_fast_one_gets_everything() {
    let (host, port) = spawn_fake_upstream().await;
    let gw_port = spawn_gateway(host, port).await;
    let url = format!("ws://127.0.0.1:{gw_port}/");

    // Shrink the slow client's receive window so a handful of unread,
    // padded records reliably force a real TCP-level stall, which then
    // backs up the gateway's per-client bounded outbound queue.
    let slow_stream = TcpStream::connect(("127.0.0.1", gw_port)).await.unwrap();
    SockRef::from(&slow_stream).set_recv_buffer_size(512).unwrap();
    let (mut slow_ws, _) = tokio_tungstenite::client_async(url.clone(), slow_stream)
        .await
        .unwrap();
    // consume the initial `connection` control frame, then stop reading
    let _ = tokio::time::timeout(Duration::from_secs(2), slow_ws.next()).await;

    let (fast_ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let (_, mut fast_rx) = fast_ws.split();
    let records = tokio::spawn(async move {
        let mut got = Vec::new();
        while let Some(Ok(msg)) = fast_rx.next().await {
            if let TMessage::Binary(bytes) = msg {
                got.push(bytes.to_vec());
                if got.len() == RECORD_COUNT as usize {
                    break;
                }
            }
        }
        got
    });

    let got = tokio::time::timeout(Duration::from_secs(10), records)
        .await
        .expect("fast client should receive all records before timing out")
        .unwrap();
    assert_eq!(got.len(), RECORD_COUNT as usize);
    for (i, rec) in got.iter().enumerate() {
        let text = String::from_utf8_lossy(rec);
        assert!(
            text.starts_with(&format!("{:04}", i)),
            "record {i} out of order: {}",
            &text[..4.min(text.len())]
        );
    }

    let slow_closed = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match slow_ws.next().await {
                Some(Ok(TMessage::Close(_))) | None => return true,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return true,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(slow_closed, "slow subscriber should have been disconnected");
}
