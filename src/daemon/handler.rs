//! Per-connection request handling.
//!
//! A connection carries exactly one request document and gets exactly one
//! response document before it is closed. Documents that fail to parse are
//! dropped without an answer.

use crate::base::context::with_deadline;
use crate::base::neterror::NetError;
use crate::daemon::workerpool::WorkerPoolManager;
use crate::dns::HostResolver;
use crate::http::{Fetch, FetchResult, FetchSpec};
use crate::pinyin::CharMap;
use crate::protocol::{pinyin_response, Payload};
use serde::de::IgnoredAny;
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request document accepted.
pub const MAX_REQUEST_BYTES: usize = 10 * 1024 * 1024;

/// Deadline for receiving the whole request document.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

const READ_CHUNK: usize = 4096;

/// Reads until the buffer holds one complete JSON document or the peer
/// half-closes. An empty buffer means the peer sent nothing.
pub async fn read_document<S>(stream: &mut S, limit: usize) -> Result<Vec<u8>, NetError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(buf);
        }
        if buf.len() + n > limit {
            return Err(NetError::MsgTooBig);
        }
        buf.extend_from_slice(&chunk[..n]);
        if looks_complete(&buf) && serde_json::from_slice::<IgnoredAny>(&buf).is_ok() {
            return Ok(buf);
        }
    }
}

/// Objects and arrays end with a closing bracket; only then is a parse worth trying.
fn looks_complete(buf: &[u8]) -> bool {
    matches!(
        buf.iter().rev().find(|b| !b.is_ascii_whitespace()),
        Some(b'}') | Some(b']')
    )
}

/// Executes decoded payloads against the daemon's shared state.
pub struct Dispatcher {
    chain: Arc<HostResolver>,
    fetcher: Arc<dyn Fetch>,
    workers: Arc<WorkerPoolManager>,
    char_map: RwLock<Arc<CharMap>>,
}

impl Dispatcher {
    pub fn new(
        chain: Arc<HostResolver>,
        fetcher: Arc<dyn Fetch>,
        workers: Arc<WorkerPoolManager>,
        char_map: CharMap,
    ) -> Self {
        Self {
            chain,
            fetcher,
            workers,
            char_map: RwLock::new(Arc::new(char_map)),
        }
    }

    pub fn workers(&self) -> &Arc<WorkerPoolManager> {
        &self.workers
    }

    pub fn chain(&self) -> &Arc<HostResolver> {
        &self.chain
    }

    pub fn replace_char_map(&self, char_map: CharMap) {
        *self.char_map.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(char_map);
    }

    fn char_map(&self) -> Arc<CharMap> {
        self.char_map
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Produces the response document for `payload`.
    pub async fn dispatch(&self, payload: Payload) -> Value {
        if let Payload::Pinyin(text) = &payload {
            let result = match text {
                Value::String(text) => Ok(self.char_map().permutations(text)),
                Value::Null => Ok(String::new()),
                _ => Err("pinyin must be a string".to_string()),
            };
            return pinyin_response(result);
        }

        if let Payload::Batch {
            dns_settings: Some(settings),
            ..
        } = &payload
        {
            let changed = self.chain.apply_dns_settings(settings);
            if changed > 0 {
                tracing::info!(changed, "applied DNS settings");
            }
        }

        let specs = payload.specs().to_vec();
        tracing::debug!(
            count = specs.len(),
            hosts = ?specs.iter().map(describe).collect::<Vec<_>>(),
            "request"
        );
        let results = self.execute(specs).await;
        payload.respond(results)
    }

    /// One spec runs inline; two or more go through the worker pool.
    pub async fn execute(&self, mut specs: Vec<FetchSpec>) -> Vec<FetchResult> {
        match specs.len() {
            0 => Vec::new(),
            1 => {
                let spec = specs.remove(0);
                vec![self.fetcher.fetch(spec).await]
            }
            _ => self.workers.run_batch(specs).await,
        }
    }

    /// Serves one connection: read, dispatch, write, close.
    pub async fn serve<S>(&self, mut stream: S, read_timeout: Duration) -> Result<(), NetError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let bytes = with_deadline(read_timeout, read_document(&mut stream, MAX_REQUEST_BYTES)).await?;
        if bytes.is_empty() {
            return Ok(());
        }

        let payload = Payload::parse(&bytes)?;
        let response = self.dispatch(payload).await;

        let out = serde_json::to_vec(&response).map_err(|e| NetError::MalformedPayload(e.to_string()))?;
        stream.write_all(&out).await?;
        stream.shutdown().await?;
        Ok(())
    }
}

/// Host and a shortened path, for request logs.
fn describe(spec: &FetchSpec) -> String {
    let Some(url) = spec.target().and_then(|u| url::Url::parse(u).ok()) else {
        return "<no url>".to_string();
    };
    let path = url.path();
    let path = if path.chars().count() > 30 {
        let head: String = path.chars().take(15).collect();
        let tail: String = path.chars().rev().take(10).collect::<Vec<_>>().into_iter().rev().collect();
        format!("{}...{}", head, tail)
    } else {
        path.to_string()
    };
    format!("{}{}", url.host_str().unwrap_or_default(), path)
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("workers", &self.workers)
            .finish()
    }
}
