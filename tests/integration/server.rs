use std::time::Duration;

use meshfile_core::catalog::{chunk_id, CHUNK_SIZE};
use meshfile_services::{NodeEvent, PeerConnection};
use tokio::net::TcpStream;

use crate::*;

async fn read_message(lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>) -> Message {
    let line = lines.next_line().await.unwrap().expect("node closed connection");
    decode(line.as_bytes()).unwrap()
}

/// Poll until `pred` holds or two seconds pass.
async fn eventually(pred: impl Fn() -> bool) -> bool {
    for _ in 0..40 {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    pred()
}

#[tokio::test]
async fn malformed_line_keeps_connection_open() {
    let node = Node::start("malformed", &[("one.txt", b"1"), ("two.txt", b"22")]).await;
    let stream = TcpStream::connect(&node.addr).await.unwrap();
    let (r, mut w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();

    w.write_all(b"{\"type\": \"CatalogRequest\"\n").await.unwrap();
    w.write_all(&encode_line(&Message::CatalogRequest).unwrap())
        .await
        .unwrap();

    match read_message(&mut lines).await {
        Message::CatalogResponse(catalog) => {
            let mut names: Vec<_> = catalog.files.iter().map(|f| f.name.as_str()).collect();
            names.sort();
            assert_eq!(names, ["one.txt", "two.txt"]);
        }
        other => panic!("expected CatalogResponse, got {}", other.type_name()),
    }

    // Same connection still answers.
    w.write_all(&encode_line(&Message::CatalogRequest).unwrap())
        .await
        .unwrap();
    assert!(matches!(read_message(&mut lines).await, Message::CatalogResponse(_)));
    assert_eq!(
        node.observer
            .count(|e| matches!(e, NodeEvent::MalformedMessage { .. })),
        1
    );

    node.stop().await;
}

#[tokio::test]
async fn disconnect_mid_request_leaves_others_running() {
    let node = Node::start("disconnect", &[("f.txt", b"data")]).await;

    let mut live = PeerConnection::connect(&node.addr, None).await.unwrap();
    let mut dying = TcpStream::connect(&node.addr).await.unwrap();
    dying.write_all(b"{\"type\":\"FileMeta").await.unwrap();
    drop(dying);

    assert!(
        eventually(|| {
            node.observer
                .count(|e| matches!(e, NodeEvent::PeerDisconnected { .. }))
                == 1
        })
        .await,
        "dropped connection's task should exit"
    );

    let catalog = live.catalog().await.unwrap();
    assert_eq!(catalog.files.len(), 1);
    assert_eq!(live.file_metadata("f.txt").await.unwrap(), vec![chunk_id(0)]);

    node.stop().await;
}

#[tokio::test]
async fn metadata_by_name() {
    let data = patterned(CHUNK_SIZE + 1, 4);
    let node = Node::start("meta", &[("m.bin", &data[..])]).await;
    let mut conn = PeerConnection::connect(&node.addr, None).await.unwrap();

    assert_eq!(
        conn.file_metadata("m.bin").await.unwrap(),
        vec![chunk_id(0), chunk_id(1)]
    );
    assert!(conn.file_metadata("absent.bin").await.unwrap().is_empty());

    node.stop().await;
}

#[tokio::test]
async fn dropped_chunk_request_sends_nothing() {
    let node = Node::start("dropped", &[]).await;
    let mut conn = PeerConnection::connect(&node.addr, Some(Duration::from_millis(300)))
        .await
        .unwrap();

    let err = conn.chunk(&sha(b"not hosted"), "chunk_0").await.unwrap_err();
    assert!(
        matches!(err, meshfile_services::DownloadError::Timeout { .. }),
        "got {err}"
    );
    assert!(
        eventually(|| {
            node.observer
                .count(|e| matches!(e, NodeEvent::RequestDropped { .. }))
                == 1
        })
        .await
    );

    node.stop().await;
}

#[tokio::test]
async fn stop_closes_open_connections() {
    let node = Node::start("stop", &[]).await;
    let stream = TcpStream::connect(&node.addr).await.unwrap();
    let (r, _w) = stream.into_split();
    let mut lines = BufReader::new(r).lines();

    let observer = node.observer.clone();
    assert!(
        eventually(|| observer.count(|e| matches!(e, NodeEvent::PeerConnected { .. })) == 1).await
    );
    node.stop().await;

    let next = tokio::time::timeout(Duration::from_secs(2), lines.next_line())
        .await
        .expect("connection should close on shutdown");
    assert!(matches!(next, Ok(None) | Err(_)));
}
