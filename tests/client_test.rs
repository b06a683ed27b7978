//! DaemonClient against a live daemon.

use scrapegate::base::NetError;
use scrapegate::daemon::{Components, Daemon};
use scrapegate::dns::{GaiResolver, Name, Resolve, Resolving};
use scrapegate::http::FetchSpec;
use scrapegate::socket::{Probe, ProbeTarget, Probing};
use scrapegate::{DaemonClient, DaemonConfig, DaemonError};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct Unreachable;

impl Probe for Unreachable {
    fn probe(&self, _target: ProbeTarget) -> Probing {
        Box::pin(async { Err(NetError::ConnectionRefused) })
    }
}

struct NoDoh;

impl Resolve for NoDoh {
    fn resolve(&self, _name: Name) -> Resolving {
        Box::pin(async { Err(NetError::NameNotResolved) })
    }
}

async fn start(dir: &Path) -> oneshot::Sender<()> {
    let config = DaemonConfig {
        port: 0,
        data_dir: dir.to_path_buf(),
        system_hosts_path: None,
        poll_interval_ms: 20,
        ..DaemonConfig::default()
    };
    let components = Components {
        prober: Arc::new(Unreachable),
        doh: Arc::new(NoDoh),
        system: Arc::new(GaiResolver::new()),
    };
    let daemon = Daemon::bind_with(config, None, components).await.unwrap();
    let (stop, rx) = oneshot::channel::<()>();
    tokio::spawn(daemon.run_until(async {
        let _ = rx.await;
    }));
    stop
}

fn client(dir: &Path) -> DaemonClient {
    DaemonClient::new(dir.join("daemon.port"))
        .with_polling(100, Duration::from_millis(20))
        .with_io_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_pinyin_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("char_map.json"),
        r#"{"重": ["chong", "zhong"], "庆": ["qing"], "行": ["xing", "hang"]}"#,
    )
    .unwrap();
    let _stop = start(dir.path()).await;
    let client = client(dir.path());

    assert_eq!(client.pinyin("重庆").await.unwrap(), "CQ|ZQ");
    assert_eq!(client.pinyin("行 2").await.unwrap(), "X2|H2");
    assert_eq!(client.pinyin("").await.unwrap(), "");
}

#[tokio::test]
async fn test_fetch_batch_through_client() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let body = r#"{"title":"Fight Club"}"#;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(response.as_bytes()).await;
            });
        }
    });

    let dir = tempfile::tempdir().unwrap();
    let _stop = start(dir.path()).await;

    let specs = [
        FetchSpec::new(format!("http://127.0.0.1:{}/3/movie/550", port)).param("language", "en"),
        FetchSpec::default(),
    ];
    let items = client(dir.path()).fetch_batch(&specs, None).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["status"], 200);
    assert_eq!(items[0]["json"], json!({"title": "Fight Club"}));
    assert_eq!(items[1], json!({"error": "No URL provided"}));
}

#[tokio::test]
async fn test_no_daemon_and_no_launcher() {
    let dir = tempfile::tempdir().unwrap();
    let client = DaemonClient::new(dir.path().join("daemon.port"))
        .with_polling(3, Duration::from_millis(10));
    let err = client.pinyin("abc").await.unwrap_err();
    assert!(matches!(err, DaemonError::Unavailable(_)));
}
