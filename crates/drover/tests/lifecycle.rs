//! Engine-level lifecycle coverage: registry + supervisor + hub driven
//! against an in-process archive server, no HTTP surface involved.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use drover::{CreateRequest, LogSubscriber, ProcessRegistry, ProcessState};

use common::{serve_archives, tar_gz_archive, test_config, wait_for, wait_gone};

const DEADLINE: Duration = Duration::from_secs(10);

fn request(app: &str, node: &str, process_type: &str, url: String) -> CreateRequest {
    CreateRequest {
        app: app.to_string(),
        node: node.to_string(),
        process_type: process_type.to_string(),
        source_url: url,
        env: BTreeMap::new(),
    }
}

fn registry(scratch: &tempfile::TempDir) -> ProcessRegistry {
    ProcessRegistry::new(test_config(scratch.path()))
}

/// Read lines until `wanted` shows up, skipping anything else (gap markers,
/// earlier output).
async fn expect_line(subscriber: &mut LogSubscriber, wanted: &str) {
    let read = async {
        while let Some(entry) = subscriber.next().await {
            if entry.line == wanted {
                return true;
            }
        }
        false
    };
    match tokio::time::timeout(DEADLINE, read).await {
        Ok(true) => {}
        Ok(false) => panic!("stream closed before {wanted:?} arrived"),
        Err(_) => panic!("timed out waiting for {wanted:?}"),
    }
}

#[tokio::test]
async fn happy_path_runs_restarts_and_streams() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/ok.tar.gz",
        tar_gz_archive(&[("Procfile", "web: echo hello\n")]),
    )])
    .await;

    let snapshot = registry
        .create(request("a", "w-0", "web", format!("{base}/ok.tar.gz")))
        .await
        .unwrap();
    assert_eq!(snapshot.state, ProcessState::Pending);

    let mut subscriber = registry.subscribe("a.w-0").await.unwrap();

    // The child exits immediately, so the descriptor oscillates between
    // running and restarting; catching either proves the spawn worked.
    wait_for(&registry, "a.w-0", DEADLINE, |s| {
        matches!(s.state, ProcessState::Running | ProcessState::Restarting)
    })
    .await;
    wait_for(&registry, "a.w-0", DEADLINE, |s| {
        s.state == ProcessState::Restarting
    })
    .await;

    // The restart loop emits the line again and again.
    expect_line(&mut subscriber, "hello").await;
    expect_line(&mut subscriber, "hello").await;

    registry.delete("a.w-0").await.unwrap();
    wait_gone(&registry, "a.w-0", DEADLINE).await;

    // Scratch space for the slug is gone with the descriptor.
    assert!(!registry.config().source_dir("a.w-0").exists());
    assert!(!registry.config().archive_path("a.w-0").exists());
}

#[tokio::test]
async fn request_env_reaches_the_child() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/env.tar.gz",
        tar_gz_archive(&[("Procfile", "web: sh -c \"echo $GREETING\"\n")]),
    )])
    .await;

    let mut req = request("a", "env", "web", format!("{base}/env.tar.gz"));
    req.env
        .insert("GREETING".to_string(), "salut".to_string());
    registry.create(req).await.unwrap();

    let mut subscriber = registry.subscribe("a.env").await.unwrap();
    expect_line(&mut subscriber, "salut").await;

    registry.delete("a.env").await.unwrap();
}

#[tokio::test]
async fn attach_before_output_sees_lines_as_they_arrive() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/late.tar.gz",
        tar_gz_archive(&[("Procfile", "web: sh -c \"sleep 0.3; echo late\"\n")]),
    )])
    .await;

    registry
        .create(request("a", "late", "web", format!("{base}/late.tar.gz")))
        .await
        .unwrap();

    // Subscribe while the descriptor is still working through the pipeline.
    let mut subscriber = registry.subscribe("a.late").await.unwrap();
    expect_line(&mut subscriber, "late").await;

    registry.delete("a.late").await.unwrap();
}

#[tokio::test]
async fn missing_archive_fails_with_http_status() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![]).await;

    registry
        .create(request("a", "bad", "web", format!("{base}/missing.tar.gz")))
        .await
        .unwrap();

    let snapshot = wait_for(&registry, "a.bad", DEADLINE, |s| {
        s.state == ProcessState::Failed
    })
    .await;
    let detail = snapshot.last_error.unwrap();
    assert!(detail.contains("http-status"), "unexpected detail: {detail}");
    assert!(detail.contains("404"), "unexpected detail: {detail}");

    // Delete clears a failed descriptor.
    registry.delete("a.bad").await.unwrap();
    wait_gone(&registry, "a.bad", DEADLINE).await;
}

#[tokio::test]
async fn unknown_process_type_fails_without_retries() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/web-only.tar.gz",
        tar_gz_archive(&[("Procfile", "web: echo hello\n")]),
    )])
    .await;

    registry
        .create(request("a", "typo", "worker", format!("{base}/web-only.tar.gz")))
        .await
        .unwrap();

    let snapshot = wait_for(&registry, "a.typo", DEADLINE, |s| {
        s.state == ProcessState::Failed
    })
    .await;
    assert!(snapshot
        .last_error
        .unwrap()
        .contains("unknown-process-type"));

    // No restart loop engages for a terminal failure.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let snapshot = registry.get("a.typo").await.unwrap();
    assert_eq!(snapshot.state, ProcessState::Failed);

    registry.delete("a.typo").await.unwrap();
}

#[tokio::test]
async fn malformed_manifest_fails_with_parse_error() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/garbled.tar.gz",
        tar_gz_archive(&[("Procfile", "this is not a manifest\n")]),
    )])
    .await;

    registry
        .create(request("a", "garbled", "web", format!("{base}/garbled.tar.gz")))
        .await
        .unwrap();

    let snapshot = wait_for(&registry, "a.garbled", DEADLINE, |s| {
        s.state == ProcessState::Failed
    })
    .await;
    assert!(snapshot.last_error.unwrap().contains("parse-error"));

    registry.delete("a.garbled").await.unwrap();
}

#[tokio::test]
async fn unspawnable_command_fails_without_retries() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/ghost.tar.gz",
        tar_gz_archive(&[("Procfile", "web: no-such-binary-4f1c\n")]),
    )])
    .await;

    registry
        .create(request("a", "ghost", "web", format!("{base}/ghost.tar.gz")))
        .await
        .unwrap();

    let snapshot = wait_for(&registry, "a.ghost", DEADLINE, |s| {
        s.state == ProcessState::Failed
    })
    .await;
    assert!(snapshot.last_error.unwrap().contains("spawn-error"));

    registry.delete("a.ghost").await.unwrap();
}

/// Serve an archive whose body never finishes, pinning a fetch in flight.
async fn serve_stalling_archive() -> String {
    use axum::body::{Body, Bytes};
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::get;
    use futures_util::stream::{self, StreamExt};

    let router = axum::Router::new().route(
        "/stall.tar.gz",
        get(|| async {
            let body = Body::from_stream(
                stream::iter([Ok::<_, std::io::Error>(Bytes::from_static(b"partial"))])
                    .chain(stream::pending()),
            );
            axum::http::Response::builder()
                .header(CONTENT_TYPE, "application/x-gtar")
                .body(body)
                .unwrap()
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn delete_during_fetch_cancels_the_download() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_stalling_archive().await;

    registry
        .create(request("a", "stall", "web", format!("{base}/stall.tar.gz")))
        .await
        .unwrap();

    // The body never completes, so the descriptor sits in fetching until
    // the delete aborts the transfer.
    wait_for(&registry, "a.stall", DEADLINE, |s| {
        s.state == ProcessState::Fetching
    })
    .await;

    let started = std::time::Instant::now();
    registry.delete("a.stall").await.unwrap();
    wait_gone(&registry, "a.stall", DEADLINE).await;
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn delete_during_unpack_cancels_extraction() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);

    // Thousands of entries plus one fat blob keep the blocking extraction
    // busy long enough for the unpacking state to be observable.
    let blob = "0".repeat(32 << 20);
    let files: Vec<(String, String)> = (0..6000)
        .map(|i| (format!("data/f{i}.txt"), "x".repeat(64)))
        .collect();
    let mut entries: Vec<(&str, &str)> = vec![
        ("Procfile", "web: echo hello\n"),
        ("data/blob.bin", blob.as_str()),
    ];
    for (path, contents) in &files {
        entries.push((path, contents));
    }
    let base = serve_archives(vec![("/big.tar.gz", tar_gz_archive(&entries))]).await;

    registry
        .create(request("a", "big", "web", format!("{base}/big.tar.gz")))
        .await
        .unwrap();

    wait_for(&registry, "a.big", DEADLINE, |s| {
        s.state == ProcessState::Unpacking
    })
    .await;

    registry.delete("a.big").await.unwrap();
    wait_gone(&registry, "a.big", DEADLINE).await;
}

#[tokio::test]
async fn delete_during_backoff_interrupts_the_sleep() {
    let scratch = tempfile::tempdir().unwrap();
    let mut config = test_config(scratch.path());
    // A long backoff makes the restarting window easy to hit.
    config.backoff_base = Duration::from_secs(2);
    config.backoff_cap = Duration::from_secs(2);
    let registry = ProcessRegistry::new(config);
    let base = serve_archives(vec![(
        "/ok.tar.gz",
        tar_gz_archive(&[("Procfile", "web: echo hello\n")]),
    )])
    .await;

    registry
        .create(request("a", "nap", "web", format!("{base}/ok.tar.gz")))
        .await
        .unwrap();
    wait_for(&registry, "a.nap", DEADLINE, |s| {
        s.state == ProcessState::Restarting
    })
    .await;

    // The sleep still has at least a second to go; cancellation cuts it
    // short instead of letting it run out.
    let started = std::time::Instant::now();
    registry.delete("a.nap").await.unwrap();
    wait_gone(&registry, "a.nap", DEADLINE).await;
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn delete_during_run_terminates_within_grace() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/sleeper.tar.gz",
        tar_gz_archive(&[("Procfile", "worker: sleep 3600\n")]),
    )])
    .await;

    registry
        .create(request("a", "sleeper", "worker", format!("{base}/sleeper.tar.gz")))
        .await
        .unwrap();
    wait_for(&registry, "a.sleeper", DEADLINE, |s| {
        s.state == ProcessState::Running
    })
    .await;

    let mut subscriber = registry.subscribe("a.sleeper").await.unwrap();

    registry.delete("a.sleeper").await.unwrap();
    wait_gone(&registry, "a.sleeper", DEADLINE).await;

    // The subscriber's stream ends cleanly once the hub closes.
    let ended = tokio::time::timeout(DEADLINE, subscriber.next()).await;
    assert!(matches!(ended, Ok(None)));
}

#[tokio::test]
async fn stubborn_child_is_killed_after_grace() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    // Ignored signal dispositions survive exec, so the sleep ignores the
    // SIGTERM and only dies to the SIGKILL escalation.
    let base = serve_archives(vec![(
        "/stubborn.tar.gz",
        tar_gz_archive(&[(
            "Procfile",
            "worker: sh -c \"trap '' TERM; exec sleep 3600\"\n",
        )]),
    )])
    .await;

    registry
        .create(request("a", "stubborn", "worker", format!("{base}/stubborn.tar.gz")))
        .await
        .unwrap();
    wait_for(&registry, "a.stubborn", DEADLINE, |s| {
        s.state == ProcessState::Running
    })
    .await;

    // First delete acknowledges at terminating; a repeat is a no-op.
    registry.delete("a.stubborn").await.unwrap();
    registry.delete("a.stubborn").await.unwrap();

    wait_gone(&registry, "a.stubborn", DEADLINE).await;
}

#[tokio::test]
async fn slug_is_reusable_after_delete_completes() {
    let scratch = tempfile::tempdir().unwrap();
    let registry = registry(&scratch);
    let base = serve_archives(vec![(
        "/ok.tar.gz",
        tar_gz_archive(&[("Procfile", "web: echo hello\n")]),
    )])
    .await;

    registry
        .create(request("a", "reuse", "web", format!("{base}/ok.tar.gz")))
        .await
        .unwrap();
    registry.delete("a.reuse").await.unwrap();
    wait_gone(&registry, "a.reuse", DEADLINE).await;

    registry
        .create(request("a", "reuse", "web", format!("{base}/ok.tar.gz")))
        .await
        .unwrap();
    registry.delete("a.reuse").await.unwrap();
}
