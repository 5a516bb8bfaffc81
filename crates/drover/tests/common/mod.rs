#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;

use axum::http::header::CONTENT_TYPE;
use axum::routing::get;
use flate2::write::GzEncoder;
use flate2::Compression;

use drover::{AgentConfig, ProcessRegistry, ProcessSnapshot};

/// Build a gzipped tarball holding the given `(path, contents)` entries.
pub fn tar_gz_archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, contents.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Serve fixed archive bodies over HTTP; returns the base URL.
pub async fn serve_archives(routes: Vec<(&'static str, Vec<u8>)>) -> String {
    let mut router = axum::Router::new();
    for (path, body) in routes {
        router = router.route(
            path,
            get(move || {
                let body = body.clone();
                async move { ([(CONTENT_TYPE, "application/x-gtar")], body) }
            }),
        );
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// Agent config with timeouts shrunk for tests.
pub fn test_config(scratch: &Path) -> AgentConfig {
    AgentConfig {
        scratch_dir: scratch.to_path_buf(),
        fetch_ceiling: Duration::from_secs(10),
        termination_grace: Duration::from_millis(500),
        backoff_base: Duration::from_millis(50),
        backoff_cap: Duration::from_millis(200),
        ..AgentConfig::default()
    }
}

/// Poll the registry until the snapshot satisfies `pred`.
pub async fn wait_for<F>(registry: &ProcessRegistry, slug: &str, deadline: Duration, pred: F) -> ProcessSnapshot
where
    F: Fn(&ProcessSnapshot) -> bool,
{
    let started = std::time::Instant::now();
    loop {
        if let Some(snapshot) = registry.get(slug).await {
            if pred(&snapshot) {
                return snapshot;
            }
            if started.elapsed() > deadline {
                panic!(
                    "{slug} stuck in {:?} ({:?})",
                    snapshot.state, snapshot.last_error
                );
            }
        } else if started.elapsed() > deadline {
            panic!("{slug} disappeared while waiting");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the registry until the slug is gone.
pub async fn wait_gone(registry: &ProcessRegistry, slug: &str, deadline: Duration) {
    let started = std::time::Instant::now();
    while registry.get(slug).await.is_some() {
        if started.elapsed() > deadline {
            panic!("{slug} never left the registry");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
