//! End-to-end tests against a daemon bound on an ephemeral loopback port.
//!
//! Upstream APIs are stood in for by a local HTTP server; the probe and DoH
//! collaborators are replaced so nothing leaves the machine.

use scrapegate::base::NetError;
use scrapegate::daemon::{Components, Daemon, DaemonHandle};
use scrapegate::dns::{GaiResolver, Name, Resolve, Resolving};
use scrapegate::socket::{Probe, ProbeTarget, Probing};
use scrapegate::DaemonConfig;
use serde_json::{json, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

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

fn components() -> Components {
    Components {
        prober: Arc::new(Unreachable),
        doh: Arc::new(NoDoh),
        system: Arc::new(GaiResolver::new()),
    }
}

fn config(dir: &Path) -> DaemonConfig {
    DaemonConfig {
        port: 0,
        data_dir: dir.to_path_buf(),
        system_hosts_path: None,
        poll_interval_ms: 20,
        idle_timeout_ms: 60_000,
        ..DaemonConfig::default()
    }
}

struct Running {
    addr: SocketAddr,
    handle: DaemonHandle,
    stop: oneshot::Sender<()>,
    task: JoinHandle<scrapegate::Result<()>>,
}

impl Running {
    async fn stop(self) {
        let _ = self.stop.send(());
        self.task.await.unwrap().unwrap();
    }
}

async fn start(config: DaemonConfig) -> Running {
    let daemon = Daemon::bind_with(config, None, components()).await.unwrap();
    let addr = daemon.local_addr();
    let handle = daemon.handle();
    let (stop, rx) = oneshot::channel::<()>();
    let task = tokio::spawn(daemon.run_until(async {
        let _ = rx.await;
    }));
    Running {
        addr,
        handle,
        stop,
        task,
    }
}

/// Writes `body`, half-closes, and reads the reply until the daemon closes.
async fn exchange(addr: SocketAddr, body: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(body).await.unwrap();
    stream.shutdown().await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    reply
}

async fn exchange_json(addr: SocketAddr, body: Value) -> Value {
    let reply = exchange(addr, body.to_string().as_bytes()).await;
    serde_json::from_slice(&reply).unwrap()
}

/// Upstream stand-in. `/delay/<ms>` answers after that many milliseconds;
/// every answer is `{"path": <request path>}`.
async fn upstream() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut sock, _)) = listener.accept().await else { return };
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = match sock.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    buf.extend_from_slice(&chunk[..n]);
                    while let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        let head = String::from_utf8_lossy(&buf[..end]).to_string();
                        buf.drain(..end + 4);
                        let path = head
                            .split_whitespace()
                            .nth(1)
                            .unwrap_or("/")
                            .to_string();
                        if let Some(ms) = path
                            .strip_prefix("/delay/")
                            .and_then(|ms| ms.parse::<u64>().ok())
                        {
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                        let body = json!({ "path": path }).to_string();
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        if sock.write_all(response.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn test_batch_preserves_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let port = upstream().await;
    let daemon = start(config(dir.path())).await;

    let url = |path: &str| format!("http://127.0.0.1:{}{}", port, path);
    let reply = exchange_json(
        daemon.addr,
        json!({
            "requests": [
                {"url": url("/delay/300")},
                {"url": url("/delay/10")},
                {"url": url("/delay/150")},
            ]
        }),
    )
    .await;

    let items = reply.as_array().unwrap();
    assert_eq!(items.len(), 3);
    for (item, path) in items.iter().zip(["/delay/300", "/delay/10", "/delay/150"]) {
        assert_eq!(item["status"], 200);
        assert_eq!(item["json"]["path"], path);
    }
    assert!(daemon.handle.dispatcher().workers().is_active());

    daemon.stop().await;
}

#[tokio::test]
async fn test_empty_url_is_an_error_item() {
    let dir = tempfile::tempdir().unwrap();
    let port = upstream().await;
    let daemon = start(config(dir.path())).await;

    let reply = exchange_json(
        daemon.addr,
        json!({
            "requests": [
                {"url": ""},
                {"url": format!("http://127.0.0.1:{}/3/movie/550", port)},
            ]
        }),
    )
    .await;

    assert_eq!(reply[0], json!({"error": "No URL provided"}));
    assert_eq!(reply[1]["status"], 200);
    assert_eq!(reply[1]["json"]["path"], "/3/movie/550");

    daemon.stop().await;
}

#[tokio::test]
async fn test_legacy_shapes() {
    let dir = tempfile::tempdir().unwrap();
    let port = upstream().await;
    let daemon = start(config(dir.path())).await;
    let url = format!("http://127.0.0.1:{}/legacy", port);

    let single = exchange_json(daemon.addr, json!({ "url": url })).await;
    assert_eq!(single["status"], 200);
    assert_eq!(single["json"]["path"], "/legacy");

    let array = exchange_json(daemon.addr, json!([{ "url": url }])).await;
    assert_eq!(array.as_array().map(Vec::len), Some(1));
    assert_eq!(array[0]["status"], 200);

    let empty = exchange_json(daemon.addr, json!({ "requests": [] })).await;
    assert_eq!(empty, json!([]));

    daemon.stop().await;
}

#[tokio::test]
async fn test_garbage_input_gets_no_reply() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start(config(dir.path())).await;

    assert!(exchange(daemon.addr, b"hello there").await.is_empty());
    assert!(exchange(daemon.addr, b"{\"requests\": 5}").await.is_empty());

    // The daemon keeps serving after a bad connection
    let reply = exchange_json(daemon.addr, json!({ "pinyin": "abc" })).await;
    assert_eq!(reply, json!({ "result": "ABC" }));

    daemon.stop().await;
}

#[tokio::test]
async fn test_dns_settings_apply_before_fetching() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start(config(dir.path())).await;

    let reply = exchange_json(
        daemon.addr,
        json!({
            "requests": [],
            "dns_settings": {"api.tmdb.org": "10.0.0.7", "trakt.tv": "not an ip"}
        }),
    )
    .await;
    assert_eq!(reply, json!([]));

    let chain = daemon.handle.dispatcher().chain().clone();
    assert_eq!(
        chain.override_for("api.tmdb.org"),
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)))
    );
    assert_eq!(chain.override_for("trakt.tv"), None);

    daemon.stop().await;
}

#[tokio::test]
async fn test_port_file_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let daemon = start(config(dir.path())).await;
    let port_file = dir.path().join("daemon.port");

    let mut published = None;
    for _ in 0..100 {
        if let Ok(text) = std::fs::read_to_string(&port_file) {
            published = text.trim().parse::<u16>().ok();
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(published, Some(daemon.addr.port()));

    daemon.stop().await;
    assert!(!port_file.exists());
}

#[tokio::test]
async fn test_idle_daemon_exits_and_clears_port_file() {
    let dir = tempfile::tempdir().unwrap();
    let config = DaemonConfig {
        idle_timeout_ms: 200,
        ..config(dir.path())
    };
    let daemon = Daemon::bind_with(config, None, components()).await.unwrap();

    tokio::time::timeout(
        Duration::from_secs(10),
        daemon.run_until(std::future::pending::<()>()),
    )
    .await
    .expect("daemon did not stop on its own")
    .unwrap();

    assert!(!dir.path().join("daemon.port").exists());
}

#[tokio::test]
async fn test_falls_back_when_port_is_taken() {
    let dir = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken_port = taken.local_addr().unwrap().port();

    let config = DaemonConfig {
        port: taken_port,
        ..config(dir.path())
    };
    let daemon = Daemon::bind_with(config, None, components()).await.unwrap();
    assert_ne!(daemon.local_addr().port(), taken_port);
    assert_ne!(daemon.local_addr().port(), 0);
}

#[tokio::test]
async fn test_reload_resets_overrides_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("scrapegate.toml");
    let write_config = |ip: &str| {
        let text = format!(
            "port = 0\ndata_dir = {:?}\npoll_interval_ms = 20\n\n[custom_ips]\n\"api.tmdb.org\" = \"{}\"\n",
            dir.path().display().to_string(),
            ip
        );
        std::fs::write(&config_path, text).unwrap();
    };

    write_config("1.2.3.4");
    let config = DaemonConfig::load(&config_path).unwrap();
    let daemon = Daemon::bind_with(config, Some(config_path.clone()), components())
        .await
        .unwrap();
    let handle = daemon.handle();
    let chain = handle.dispatcher().chain().clone();
    assert_eq!(
        chain.override_for("api.tmdb.org"),
        Some(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)))
    );

    chain.set_override("trakt.tv", "9.9.9.9");
    write_config("5.6.7.8");
    handle.reload().unwrap();

    assert_eq!(
        chain.override_for("api.tmdb.org"),
        Some(IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)))
    );
    assert_eq!(chain.override_for("trakt.tv"), None);

    // A broken file keeps the running settings
    std::fs::write(&config_path, "port = \"nope\"").unwrap();
    assert!(handle.reload().is_err());
    assert_eq!(
        chain.override_for("api.tmdb.org"),
        Some(IpAddr::V4(Ipv4Addr::new(5, 6, 7, 8)))
    );
}

#[tokio::test]
async fn test_target_domain_pinned_by_private_hosts_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("hosts"),
        "# scraper overrides\n127.0.0.1 api.tmdb.org\nbogus line\n",
    )
    .unwrap();
    let port = upstream().await;
    let daemon = start(config(dir.path())).await;

    let reply = exchange_json(
        daemon.addr,
        json!({ "url": format!("http://api.tmdb.org:{}/3/configuration", port) }),
    )
    .await;
    assert_eq!(reply["status"], 200);
    assert_eq!(reply["json"]["path"], "/3/configuration");

    daemon.stop().await;
}

#[tokio::test]
async fn test_drain_keeps_port_file_of_newer_daemon() {
    let dir = tempfile::tempdir().unwrap();
    let first = start(config(dir.path())).await;
    let port_file = dir.path().join("daemon.port");
    for _ in 0..100 {
        if port_file.exists() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // A second daemon publishes over the first one's entry
    let second = start(config(dir.path())).await;
    let second_port = second.addr.port();
    for _ in 0..100 {
        let published = std::fs::read_to_string(&port_file)
            .ok()
            .and_then(|text| text.trim().parse::<u16>().ok());
        if published == Some(second_port) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    first.stop().await;
    let published = std::fs::read_to_string(&port_file).unwrap();
    assert_eq!(published.trim().parse::<u16>().unwrap(), second_port);

    second.stop().await;
    assert!(!port_file.exists());
}
