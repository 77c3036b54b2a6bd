// HandWave Linux daemon: announce, receive, maintenance, snapshot loops
// over a UDP broadcast transport.

mod config;
mod store;
mod transport;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use rand::RngCore;
use tracing::{error, info};
use wave_core::{Engine, HwAddr, KvStore, LocalIdentity, Millis};

use store::FileStore;
use transport::BroadcastTransport;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Monotonic wrapping millisecond clock. The engine works in `Millis`,
/// which rolls over; wall time never enters the protocol.
#[derive(Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> Millis {
        Millis::new(self.start.elapsed().as_millis() as u32)
    }
}

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("wave-daemon {VERSION}");
            return Ok(());
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cfg = config::load();
    let mut storage = FileStore::open(&cfg.data_path)
        .with_context(|| format!("opening store at {}", cfg.data_path.display()))?;
    let addr = local_hw_addr(&mut storage);
    let local = LocalIdentity {
        addr,
        owner: cfg.owner.clone(),
        device: cfg.device.clone(),
    };
    info!(addr = %local.addr, owner = %local.owner, device = %local.device, "starting wave-daemon");

    let mut engine = Engine::new(local, storage);
    engine.set_peer_max_age((cfg.peer_max_age_secs.saturating_mul(1000)).min(u32::MAX as u64) as u32);
    let engine = Arc::new(tokio::sync::Mutex::new(engine));
    let clock = Clock::new();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        // No transport means no discovery at all, so bring-up failure is fatal.
        let transport = Arc::new(
            BroadcastTransport::init(cfg.port)
                .await
                .context("bringing up broadcast transport")?,
        );
        info!(port = cfg.port, "broadcast transport up");

        let recv_transport = transport.clone();
        let recv_engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = recv_transport.recv_loop(recv_engine, clock).await {
                error!(%e, "receive loop terminated");
            }
        });

        let announce_engine = engine.clone();
        let announce_transport = transport.clone();
        let announce_every = Duration::from_secs(cfg.announce_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(announce_every);
            loop {
                ticker.tick().await;
                let actions = announce_engine.lock().await.announce(clock.now());
                for action in &actions {
                    announce_transport.send(action).await;
                }
            }
        });

        let maintain_engine = engine.clone();
        let maintain_every = Duration::from_secs(cfg.maintenance_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(maintain_every);
            loop {
                ticker.tick().await;
                maintain_engine.lock().await.maintain(clock.now());
            }
        });

        let snapshot_engine = engine.clone();
        let snapshot_every = Duration::from_secs(cfg.snapshot_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(snapshot_every);
            loop {
                ticker.tick().await;
                snapshot_engine.lock().await.snapshot();
            }
        });

        shutdown_signal().await?;
        info!("shutting down");
        engine.lock().await.snapshot();
        Ok::<(), anyhow::Error>(())
    })?;
    Ok(())
}

/// The persisted local hardware address. Generated once on first boot as a
/// random locally administered unicast address.
fn local_hw_addr(store: &mut FileStore) -> HwAddr {
    if let Some(addr) = store
        .get_string("hw_addr")
        .and_then(|s| s.parse::<HwAddr>().ok())
    {
        return addr;
    }
    let mut bytes = [0u8; 6];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    bytes[0] = (bytes[0] | 0x02) & 0xFE;
    let addr = HwAddr::from_bytes(bytes);
    store.set_string("hw_addr", &addr.to_string());
    info!(%addr, "generated local hardware address");
    addr
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
