use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use meshfile_core::catalog::{chunk_count, chunk_id, Catalog, FileEntry, CHUNK_SIZE};
use meshfile_core::wire::Message;
use meshfile_services::{DownloadError, NodeEvent};

use crate::*;

fn verified_chunks(observer: &RecordingObserver) -> Vec<(String, String)> {
    observer
        .events()
        .into_iter()
        .filter_map(|e| match e {
            NodeEvent::ChunkVerified { chunk_id, server, .. } => Some((chunk_id, server)),
            _ => None,
        })
        .collect()
}

/// Fake node advertising `data` under its real hash, chunked normally.
/// `mangle` may rewrite each chunk response before it is sent.
async fn fake_node_for<F>(name: &str, data: Vec<u8>, mangle: F) -> (String, String)
where
    F: Fn(Message) -> Option<Message> + Send + Sync + 'static,
{
    let hash = sha(&data);
    let chunks: Vec<String> = (0..chunk_count(data.len() as u64)).map(chunk_id).collect();
    let catalog = Catalog {
        files: vec![FileEntry {
            name: name.to_string(),
            size: data.len() as u64,
            hash: hash.clone(),
            chunks: chunks.clone(),
        }],
    };

    let (addr, _handle) = spawn_fake_node(move |req| match req {
        Message::CatalogRequest => Some(Message::CatalogResponse(catalog.clone())),
        Message::ChunkRequest { chunk_id, .. } => {
            let i = chunks.iter().position(|c| *c == chunk_id)?;
            let start = i * CHUNK_SIZE;
            let slice = &data[start..(start + CHUNK_SIZE).min(data.len())];
            mangle(Message::ChunkResponse {
                chunk_id,
                data: Bytes::copy_from_slice(slice),
                hash: sha(slice),
            })
        }
        _ => None,
    })
    .await;
    (addr, hash)
}

#[tokio::test]
async fn download_with_more_workers_than_chunks() {
    let data = patterned(3 * CHUNK_SIZE + 500, 7);
    let node = Node::start("w-gt-k", &[("big.bin", &data[..])]).await;
    let client = Client::new("w-gt-k-client");

    let path = client
        .downloader(10)
        .download(&sha(&data), "copy.bin", &[node.addr.clone()])
        .await
        .unwrap();

    assert_eq!(path, client.out_dir().join("copy.bin"));
    assert_eq!(std::fs::read(&path).unwrap(), data);

    let mut ids: Vec<String> = verified_chunks(&client.observer)
        .into_iter()
        .map(|(id, _)| id)
        .collect();
    ids.sort();
    let total = ids.len();
    ids.dedup();
    assert_eq!(total, 4, "every chunk fetched exactly once");
    assert_eq!(ids.len(), 4);
    assert_eq!(
        client
            .observer
            .count(|e| matches!(e, NodeEvent::DownloadFinished { .. })),
        1
    );

    node.stop().await;
}

#[tokio::test]
async fn download_spreads_chunks_round_robin() {
    let data = patterned(4 * CHUNK_SIZE + 1, 3);
    let a = Node::start("rr-a", &[("shared.bin", &data[..])]).await;
    let b = Node::start("rr-b", &[("shared.bin", &data[..])]).await;
    let servers = vec![a.addr.clone(), b.addr.clone()];
    let client = Client::new("rr-client");

    let path = client
        .downloader(3)
        .download(&sha(&data), "shared.bin", &servers)
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), data);

    let verified = verified_chunks(&client.observer);
    assert_eq!(verified.len(), 5);
    for (id, server) in &verified {
        let index: usize = id.trim_start_matches("chunk_").parse().unwrap();
        assert_eq!(server, &servers[index % servers.len()], "{id} came from the wrong node");
    }

    // Node B was never asked for its catalog; it still served its share.
    let served_chunks = |node: &Node| {
        node.observer.count(|e| {
            matches!(e, NodeEvent::RequestServed { msg_type: "ChunkRequest", .. })
        })
    };
    // Served events are recorded after the write, so give them a moment.
    for _ in 0..40 {
        if served_chunks(&a) == 3 && served_chunks(&b) == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(served_chunks(&a), 3);
    assert_eq!(served_chunks(&b), 2);

    a.stop().await;
    b.stop().await;
}

#[tokio::test]
async fn empty_file_downloads() {
    let node = Node::start("empty", &[("empty.txt", b"")]).await;
    let client = Client::new("empty-client");

    let path = client
        .downloader(4)
        .download(&sha(b""), "empty.txt", &[node.addr.clone()])
        .await
        .unwrap();
    assert_eq!(std::fs::read(&path).unwrap(), b"");

    node.stop().await;
}

#[tokio::test]
async fn unknown_hash_is_file_not_found() {
    let node = Node::start("nf", &[("a.txt", b"aaa")]).await;
    let client = Client::new("nf-client");
    let wanted = sha(b"something else");

    let err = client
        .downloader(4)
        .download(&wanted, "a.txt", &[node.addr.clone()])
        .await
        .unwrap_err();
    match err {
        DownloadError::FileNotFound(hash) => assert_eq!(hash, wanted),
        other => panic!("expected FileNotFound, got {other}"),
    }
    assert!(!client.out_dir().join("a.txt").exists());

    node.stop().await;
}

#[tokio::test]
async fn corrupted_chunk_fails_without_output() {
    let data = patterned(2 * CHUNK_SIZE + 10, 9);
    // Hash is computed over the real bytes, then the payload is altered.
    let (addr, hash) = fake_node_for("victim.bin", data, |resp| match resp {
        Message::ChunkResponse { chunk_id, data, hash } if chunk_id == "chunk_1" => {
            let mut bad = data.to_vec();
            bad[0] ^= 0xff;
            Some(Message::ChunkResponse {
                chunk_id,
                data: Bytes::from(bad),
                hash,
            })
        }
        other => Some(other),
    })
    .await;
    let client = Client::new("corrupt-client");

    let err = client
        .downloader(2)
        .download(&hash, "victim.bin", &[addr])
        .await
        .unwrap_err();
    match err {
        DownloadError::IntegrityFailure { chunk_id, .. } => {
            assert_eq!(chunk_id.as_deref(), Some("chunk_1"))
        }
        other => panic!("expected IntegrityFailure, got {other}"),
    }
    assert!(!client.out_dir().join("victim.bin").exists());
    assert_eq!(
        client
            .observer
            .count(|e| matches!(e, NodeEvent::ChunkRejected { .. })),
        1
    );
}

#[tokio::test]
async fn failed_chunk_stops_further_requests() {
    let data = patterned(5 * CHUNK_SIZE + 1, 11);
    assert_eq!(chunk_count(data.len() as u64), 6);
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = requests.clone();
    let (addr, hash) = fake_node_for("six.bin", data, move |resp| {
        seen.fetch_add(1, Ordering::SeqCst);
        match resp {
            Message::ChunkResponse { chunk_id, data, hash } if chunk_id == "chunk_0" => {
                let mut bad = data.to_vec();
                bad[0] ^= 0xff;
                Some(Message::ChunkResponse {
                    chunk_id,
                    data: Bytes::from(bad),
                    hash,
                })
            }
            other => Some(other),
        }
    })
    .await;
    let client = Client::new("fail-fast-client");

    let err = client
        .downloader(1)
        .download(&hash, "six.bin", &[addr])
        .await
        .unwrap_err();
    match err {
        DownloadError::IntegrityFailure { chunk_id, .. } => {
            assert_eq!(chunk_id.as_deref(), Some("chunk_0"))
        }
        other => panic!("expected IntegrityFailure, got {other}"),
    }
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert!(verified_chunks(&client.observer).is_empty());
    assert!(!client.out_dir().join("six.bin").exists());
}

#[tokio::test]
async fn unsafe_output_name_is_rejected_before_fetching() {
    let data = patterned(5 * CHUNK_SIZE + 1, 12);
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = requests.clone();
    let (addr, hash) = fake_node_for("escape.bin", data, move |resp| {
        seen.fetch_add(1, Ordering::SeqCst);
        Some(resp)
    })
    .await;
    let client = Client::new("bad-name-client");

    for name in ["../x", "../escape.bin", "sub/escape.bin", ".."] {
        let err = client
            .downloader(2)
            .download(&hash, name, &[addr.clone()])
            .await
            .unwrap_err();
        assert!(
            matches!(err, DownloadError::InvalidFileName(ref n) if n == name),
            "{name:?}: {err}"
        );
    }
    assert_eq!(requests.load(Ordering::SeqCst), 0);
    assert_eq!(
        client
            .observer
            .count(|e| matches!(e, NodeEvent::DownloadStarted { .. })),
        0
    );
    assert!(!client.out_dir().parent().unwrap().join("escape.bin").exists());
}

#[tokio::test]
async fn wrong_response_type_is_rejected() {
    let data = patterned(100, 1);
    let (addr, hash) = fake_node_for("odd.bin", data, |_| {
        Some(Message::CatalogResponse(Catalog::default()))
    })
    .await;
    let client = Client::new("odd-client");

    let err = client
        .downloader(1)
        .download(&hash, "odd.bin", &[addr])
        .await
        .unwrap_err();
    assert!(
        matches!(err, DownloadError::UnexpectedResponse { .. }),
        "got {err}"
    );
}

#[tokio::test]
async fn silent_node_times_out() {
    let data = patterned(100, 2);
    let (addr, hash) = fake_node_for("slow.bin", data, |_| None).await;
    let client = Client::new("slow-client");

    let err = client
        .downloader(1)
        .with_request_timeout(Some(Duration::from_millis(200)))
        .download(&hash, "slow.bin", &[addr])
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::Timeout { .. }), "got {err}");
}
