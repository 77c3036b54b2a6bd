//! Transport adapter: UDP broadcast stands in for the link-layer broadcast
//! radio. Fire-and-forget sends, push delivery of exact-size frames.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};
use wave_core::{Engine, HwAddr, OutboundAction, FRAME_LEN};

use crate::store::FileStore;
use crate::Clock;

/// The broadcast link. Unicast destinations must be registered (learned
/// from inbound frames) before a send to them can succeed.
pub struct BroadcastTransport {
    socket: UdpSocket,
    broadcast_dest: SocketAddr,
    registry: Mutex<HashMap<HwAddr, SocketAddr>>,
}

impl BroadcastTransport {
    /// Bring up the socket and register the broadcast destination. Failure
    /// here is fatal to the whole daemon: no discovery without transport.
    pub async fn init(port: u16) -> std::io::Result<Self> {
        let std_sock = std::net::UdpSocket::bind(("0.0.0.0", port))?;
        std_sock.set_broadcast(true)?;
        std_sock.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(std_sock)?;
        Ok(Self {
            socket,
            broadcast_dest: SocketAddr::from((Ipv4Addr::BROADCAST, port)),
            registry: Mutex::new(HashMap::new()),
        })
    }

    /// Record where a hardware address was last heard from.
    async fn register(&self, addr: HwAddr, from: SocketAddr) {
        let mut reg = self.registry.lock().await;
        if reg.insert(addr, from).is_none() {
            debug!(%addr, %from, "registered peer destination");
        }
    }

    /// Perform one send. At-most-once: completion is logged, never
    /// propagated; a failed unicast is retried by whatever cycle produced
    /// it. An unregistered unicast destination short-circuits the send.
    pub async fn send(&self, action: &OutboundAction) {
        let (dest, bytes, kind) = match action {
            OutboundAction::Broadcast(bytes) => (self.broadcast_dest, bytes, "broadcast"),
            OutboundAction::Unicast(addr, bytes) => {
                let Some(dest) = self.registry.lock().await.get(addr).copied() else {
                    warn!(%addr, "unicast dropped: destination not registered");
                    return;
                };
                (dest, bytes, "unicast")
            }
        };
        match self.socket.send_to(bytes, dest).await {
            Ok(_) => trace!(kind, %dest, "frame sent"),
            Err(e) => warn!(kind, %dest, %e, "send failed"),
        }
    }

    /// Receive loop: datagrams of any size other than `FRAME_LEN` are
    /// discarded unparsed; everything else is handed to the engine.
    pub async fn recv_loop(
        &self,
        engine: Arc<Mutex<Engine<FileStore>>>,
        clock: Clock,
    ) -> std::io::Result<()> {
        let mut buf = [0u8; 512];
        loop {
            let (n, from) = self.socket.recv_from(&mut buf).await?;
            if n != FRAME_LEN {
                trace!(%from, len = n, "discarding datagram of unexpected size");
                continue;
            }
            // The frame opens with the sender's claimed hardware address;
            // that is the key unicast replies are addressed by.
            let mut src = [0u8; 6];
            src.copy_from_slice(&buf[..6]);
            let src = HwAddr::from_bytes(src);
            self.register(src, from).await;
            engine.lock().await.handle_frame(src, &buf[..n], clock.now());
        }
    }
}
