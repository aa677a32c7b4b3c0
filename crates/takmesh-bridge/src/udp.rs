//! IP side of the bridge: tactical events over UDP multicast
//!
//! One socket listens on the configured port (joined to the group when
//! asked, unicast to the port is always accepted). A second socket sends to
//! `group:port` with the configured multicast TTL.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::bridge::{BridgeHandle, PublishCallback};
use crate::config::MulticastConfig;
use crate::error::{BridgeError, Result};

/// Largest datagram accepted from the network
const MAX_DATAGRAM: usize = 65_535;

/// UDP multicast transport for tactical events
#[derive(Debug, Clone)]
pub struct UdpTransport {
    listener: Arc<UdpSocket>,
    sender: Arc<UdpSocket>,
    destination: SocketAddr,
}

impl UdpTransport {
    /// Bind both sockets
    ///
    /// Must be called from within a Tokio runtime. Failures are startup
    /// errors.
    pub fn bind(config: &MulticastConfig) -> Result<Self> {
        let listen_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
        let listener = listener_socket(config, listen_addr).map_err(|e| BridgeError::Bind {
            addr: listen_addr.to_string(),
            reason: e.to_string(),
        })?;
        let listener = UdpSocket::from_std(listener.into())?;

        // port 0 binds an ephemeral port; send to wherever we actually listen
        let port = listener.local_addr()?.port();
        let destination = SocketAddr::V4(SocketAddrV4::new(config.group, port));

        let sender = sender_socket(config).map_err(|e| BridgeError::Bind {
            addr: "0.0.0.0:0".to_string(),
            reason: e.to_string(),
        })?;
        let sender = UdpSocket::from_std(sender.into())?;

        info!(
            listen = %listener.local_addr()?,
            destination = %destination,
            ttl = config.ttl,
            "UDP transport bound"
        );

        Ok(Self {
            listener: Arc::new(listener),
            sender: Arc::new(sender),
            destination,
        })
    }

    /// Address of the listening socket
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Where outgoing events are sent
    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    /// Receive the next non-blank datagram as text
    ///
    /// Invalid UTF-8 is replaced, surrounding whitespace trimmed.
    pub async fn recv(&self) -> Result<String> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, peer) = self.listener.recv_from(&mut buf).await?;
            let text = String::from_utf8_lossy(&buf[..len]);
            let text = text.trim();
            if text.is_empty() {
                trace!(peer = %peer, "Ignoring blank datagram");
                continue;
            }
            debug!(peer = %peer, bytes = len, "Datagram received");
            return Ok(text.to_string());
        }
    }

    /// Send one event to the group
    pub async fn send(&self, datagram: &str) -> Result<()> {
        self.sender
            .send_to(datagram.as_bytes(), self.destination)
            .await?;
        Ok(())
    }

    /// Non-blocking send, suitable for a [`PublishCallback`]
    pub fn try_send(&self, datagram: &str) -> Result<()> {
        self.sender
            .try_send_to(datagram.as_bytes(), self.destination)?;
        Ok(())
    }

    /// Callback publishing bridge output to the group
    pub fn publisher(&self) -> PublishCallback {
        let transport = self.clone();
        Arc::new(move |datagram: String| {
            transport.try_send(&datagram).map_err(|e| e.to_string())
        })
    }

    /// Spawn the receive task feeding datagrams to the bridge
    ///
    /// The task ends when the bridge stops accepting commands; abort it to
    /// stop listening earlier.
    pub fn spawn_receiver(&self, bridge: BridgeHandle) -> JoinHandle<()> {
        let transport = self.clone();
        tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(datagram) => {
                        if bridge.forward_to_mesh(datagram).await.is_err() {
                            debug!("Bridge stopped, ending UDP receive task");
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "UDP receive failed"),
                }
            }
        })
    }
}

fn listener_socket(config: &MulticastConfig, addr: SocketAddrV4) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&SockAddr::from(addr))?;

    if config.join_group && config.group.is_multicast() {
        socket.join_multicast_v4(&config.group, &config.interface)?;
        debug!(group = %config.group, interface = %config.interface, "Joined multicast group");
    }

    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn sender_socket(config: &MulticastConfig) -> std::io::Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(config.ttl)?;
    if !config.interface.is_unspecified() {
        socket.set_multicast_if_v4(&config.interface)?;
    }
    socket.bind(&SockAddr::from(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)))?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}
