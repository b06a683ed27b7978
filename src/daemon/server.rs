//! Acceptor loop and daemon lifecycle.
//!
//! BINDING → LISTENING → (WAITING ⇄ ACCEPTING) → DRAINING → STOPPED
//!
//! The loop wakes on a connection, on the shutdown future, or every poll
//! interval. A quiet poll with nothing in flight past the idle timeout drains
//! the daemon: listener closed, port file released, worker pool dropped.

use crate::config::DaemonConfig;
use crate::daemon::announce::PortFile;
use crate::daemon::handler::{Dispatcher, DEFAULT_READ_TIMEOUT};
use crate::daemon::workerpool::WorkerPoolManager;
use crate::dns::{DohResolver, GaiResolver, HostResolver, HostsMap, InterceptingResolver, Resolve};
use crate::error::{DaemonError, Result};
use crate::http::{Fetch, SessionPool};
use crate::pinyin::CharMap;
use crate::socket::{Probe, TlsProber};
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Replaceable collaborators; the defaults talk to the network.
pub struct Components {
    pub prober: Arc<dyn Probe>,
    pub doh: Arc<dyn Resolve>,
    pub system: Arc<dyn Resolve>,
}

impl Components {
    pub fn from_config(config: &DaemonConfig) -> Self {
        Self {
            prober: Arc::new(TlsProber::new()),
            doh: Arc::new(DohResolver::new(config.doh_providers.clone(), config.doh_timeout())),
            system: Arc::new(GaiResolver::new()),
        }
    }
}

/// State shared between the acceptor and [`DaemonHandle`]s.
struct Shared {
    config: RwLock<DaemonConfig>,
    config_path: Option<PathBuf>,
    dispatcher: Arc<Dispatcher>,
}

/// Cloneable control handle for a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    shared: Arc<Shared>,
}

impl DaemonHandle {
    /// Re-reads the configuration file (when there is one), the hosts files,
    /// the target domains, the configured custom IPs and the character table.
    ///
    /// A configuration file that fails to load leaves the running
    /// configuration in place and returns the error.
    pub fn reload(&self) -> Result<()> {
        let config = match &self.shared.config_path {
            Some(path) => DaemonConfig::load(path)?,
            None => self
                .shared
                .config
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        };

        let chain = self.shared.dispatcher.chain();
        chain.replace_hosts(HostsMap::load(&config.hosts_files()));
        chain.replace_targets(config.targets());
        chain.reset_overrides(&config.custom_ips);
        self.shared
            .dispatcher
            .replace_char_map(CharMap::load_or_empty(config.char_map_file()));

        tracing::info!(
            targets = config.targets().len(),
            custom_ips = chain.override_count(),
            "settings reloaded"
        );
        *self.shared.config.write().unwrap_or_else(PoisonError::into_inner) = config;
        Ok(())
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.shared.dispatcher
    }
}

/// Decrements the in-flight count and records activity when a handler ends.
struct InFlight {
    count: Arc<AtomicUsize>,
    last_activity: Arc<Mutex<Instant>>,
}

impl InFlight {
    fn enter(count: Arc<AtomicUsize>, last_activity: Arc<Mutex<Instant>>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self {
            count,
            last_activity,
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
        self.count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A bound daemon, ready to serve.
pub struct Daemon {
    listener: TcpListener,
    local_addr: SocketAddr,
    port_file: PortFile,
    idle_timeout: Duration,
    poll_interval: Duration,
    shared: Arc<Shared>,
    in_flight: Arc<AtomicUsize>,
    last_activity: Arc<Mutex<Instant>>,
}

impl Daemon {
    /// Builds the full stack with network-backed collaborators and binds.
    pub async fn bind(config: DaemonConfig, config_path: Option<PathBuf>) -> Result<Self> {
        let components = Components::from_config(&config);
        Self::bind_with(config, config_path, components).await
    }

    /// Builds the stack around the given collaborators and binds the
    /// configured address, falling back to an ephemeral port.
    pub async fn bind_with(
        config: DaemonConfig,
        config_path: Option<PathBuf>,
        components: Components,
    ) -> Result<Self> {
        config.validate()?;

        let chain = Arc::new(
            HostResolver::new(components.prober, components.doh)
                .with_hosts(HostsMap::load(&config.hosts_files()))
                .with_targets(config.targets())
                .with_probe_timeout(config.probe_timeout()),
        );
        chain.reset_overrides(&config.custom_ips);

        let resolver = Arc::new(InterceptingResolver::new(chain.clone(), components.system));
        let sessions: Arc<dyn Fetch> = Arc::new(SessionPool::with_config(
            resolver,
            config.session_pool_config(),
        ));
        let workers = Arc::new(WorkerPoolManager::new(
            sessions.clone(),
            config.worker_count,
            config.worker_idle_timeout(),
        ));
        let char_map = CharMap::load_or_empty(config.char_map_file());
        let dispatcher = Arc::new(Dispatcher::new(chain, sessions, workers, char_map));

        let listener = bind_listener(config.listen_addr()).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "listening");

        Ok(Self {
            listener,
            local_addr,
            port_file: PortFile::new(config.port_file()),
            idle_timeout: config.idle_timeout(),
            poll_interval: config.poll_interval(),
            shared: Arc::new(Shared {
                config: RwLock::new(config),
                config_path,
                dispatcher,
            }),
            in_flight: Arc::new(AtomicUsize::new(0)),
            last_activity: Arc::new(Mutex::new(Instant::now())),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port_file(&self) -> &PortFile {
        &self.port_file
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            shared: self.shared.clone(),
        }
    }

    /// Runs until idle or until `shutdown` resolves, then drains.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.port_file.publish(self.local_addr.port())?;
        self.touch();

        tokio::pin!(shutdown);
        let workers = self.shared.dispatcher.workers().clone();
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        self.touch();
                        self.spawn_handler(stream, peer);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
                _ = tokio::time::sleep(self.poll_interval) => {
                    if self.is_idle() {
                        tracing::info!(idle_ms = self.idle_timeout.as_millis() as u64, "idle timeout reached");
                        break;
                    }
                }
            }
            workers.evict_idle();
        }

        self.drain()
    }

    fn touch(&self) {
        *self.last_activity.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn is_idle(&self) -> bool {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            return false;
        }
        self.last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .elapsed()
            > self.idle_timeout
    }

    fn spawn_handler(&self, stream: tokio::net::TcpStream, peer: SocketAddr) {
        let guard = InFlight::enter(self.in_flight.clone(), self.last_activity.clone());
        let dispatcher = self.shared.dispatcher.clone();
        tokio::spawn(async move {
            let _guard = guard;
            tracing::trace!(peer = %peer, "connection accepted");
            if let Err(e) = dispatcher.serve(stream, DEFAULT_READ_TIMEOUT).await {
                tracing::warn!(peer = %peer, code = e.as_i32(), error = %e, "connection dropped");
            }
        });
    }

    fn drain(self) -> Result<()> {
        let Daemon {
            listener,
            local_addr,
            port_file,
            shared,
            ..
        } = self;
        drop(listener);
        if let Err(e) = port_file.release(local_addr.port()) {
            tracing::warn!(path = %port_file.path().display(), error = %e, "failed to remove port file");
        }
        shared.dispatcher.workers().shutdown();
        tracing::info!("daemon stopped");
        Ok(())
    }
}

async fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(e) => {
            tracing::warn!(addr = %addr, error = %e, "preferred port unavailable, using an ephemeral port");
            let fallback = SocketAddr::new(addr.ip(), 0);
            TcpListener::bind(fallback).await.map_err(|source| DaemonError::Bind {
                addr: fallback.to_string(),
                source,
            })
        }
    }
}
