//! Caller-side helper for talking to the daemon.
//!
//! The client finds the daemon through its port file, optionally launches it
//! when the file is missing, sends one JSON document per connection and reads
//! the reply until the daemon closes the socket.

use crate::base::context::{with_deadline, IoResultExt};
use crate::base::neterror::NetError;
use crate::daemon::PortFile;
use crate::error::{DaemonError, Result};
use crate::http::FetchSpec;
use serde_json::{json, Map, Value};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Command that starts the daemon in the background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    fn spawn(&self) -> std::io::Result<()> {
        let child = std::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .spawn()?;
        tracing::info!(program = %self.program.display(), pid = child.id(), "launched daemon");
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DaemonClient {
    host: IpAddr,
    port_file: PortFile,
    launcher: Option<LaunchCommand>,
    poll_attempts: usize,
    poll_interval: Duration,
    io_timeout: Duration,
}

impl DaemonClient {
    pub fn new(port_file: impl Into<PathBuf>) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_file: PortFile::new(port_file),
            launcher: None,
            poll_attempts: 50,
            poll_interval: Duration::from_millis(100),
            io_timeout: Duration::from_secs(35),
        }
    }

    pub fn with_launcher(mut self, launcher: LaunchCommand) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_polling(mut self, attempts: usize, interval: Duration) -> Self {
        self.poll_attempts = attempts.max(1);
        self.poll_interval = interval;
        self
    }

    /// Port of a running daemon, launching one if needed.
    pub async fn ensure_started(&self) -> Result<u16> {
        if let Some(port) = self.port_file.read() {
            return Ok(port);
        }
        self.launch()?;
        self.wait_for_port().await
    }

    fn launch(&self) -> Result<()> {
        match &self.launcher {
            Some(launcher) => Ok(launcher.spawn()?),
            None => Ok(()),
        }
    }

    /// Polls the port file until a port shows up.
    pub async fn wait_for_port(&self) -> Result<u16> {
        for _ in 0..self.poll_attempts {
            if let Some(port) = self.port_file.read() {
                return Ok(port);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
        Err(DaemonError::Unavailable(format!(
            "no port published at {}",
            self.port_file.path().display()
        )))
    }

    /// Sends `payload` and returns the parsed reply. A refused connection
    /// means the published port is stale: the file is cleared, the daemon
    /// relaunched, and the request retried once.
    pub async fn request(&self, payload: &Value) -> Result<Value> {
        let port = self.ensure_started().await?;
        match self.send(port, payload).await {
            Err(e) if is_refused(&e) => {
                tracing::warn!(port, "daemon port is stale, restarting");
                self.port_file.clear()?;
                self.launch()?;
                let port = self.wait_for_port().await?;
                Ok(self.send(port, payload).await?)
            }
            other => Ok(other?),
        }
    }

    async fn send(&self, port: u16, payload: &Value) -> std::result::Result<Value, NetError> {
        let addr = SocketAddr::new(self.host, port);
        let body = serde_json::to_vec(payload).map_err(|e| NetError::MalformedPayload(e.to_string()))?;

        with_deadline(self.io_timeout, async {
            let mut stream = TcpStream::connect(addr)
                .await
                .connection_context(&addr.ip().to_string(), port)?;
            stream.write_all(&body).await?;
            stream.shutdown().await?;

            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await?;
            if reply.is_empty() {
                return Err(NetError::EmptyResponse);
            }
            serde_json::from_slice(&reply).map_err(|e| NetError::MalformedPayload(e.to_string()))
        })
        .await
    }

    /// Runs a batch; the reply holds one item per spec, in order.
    pub async fn fetch_batch(
        &self,
        specs: &[FetchSpec],
        dns_settings: Option<&Map<String, Value>>,
    ) -> Result<Vec<Value>> {
        let mut payload = json!({
            "requests": specs.iter().map(FetchSpec::to_value).collect::<Vec<_>>(),
        });
        if let (Some(settings), Some(map)) = (dns_settings, payload.as_object_mut()) {
            map.insert("dns_settings".into(), Value::Object(settings.clone()));
        }
        match self.request(&payload).await? {
            Value::Array(items) => Ok(items),
            other => Err(DaemonError::Net(NetError::MalformedPayload(format!(
                "expected an array, got {}",
                other
            )))),
        }
    }

    /// Initial-letter permutations of `text`.
    pub async fn pinyin(&self, text: &str) -> Result<String> {
        let reply = self.request(&json!({ "pinyin": text })).await?;
        if let Some(result) = reply.get("result").and_then(Value::as_str) {
            return Ok(result.to_string());
        }
        let error = reply
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("malformed reply");
        Err(DaemonError::Net(NetError::MalformedPayload(error.to_string())))
    }
}

fn is_refused(err: &NetError) -> bool {
    match err {
        NetError::ConnectionRefused => true,
        NetError::ConnectionFailedTo { reason, .. } => {
            reason.to_ascii_lowercase().contains("refused")
        }
        _ => false,
    }
}
