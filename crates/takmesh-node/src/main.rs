//! TAK mesh node - bridges a TAK multicast network with a Meshtastic mesh
//!
//! This binary runs one bridge with:
//! - A radio link over serial or TCP to an attached Meshtastic device
//! - A UDP multicast listener and sender for Cursor-on-Target events
//! - Periodic re-announcement of fresh mesh nodes to TAK clients

use clap::Parser;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use takmesh_bridge::config::{
    DEFAULT_BAUD_RATE, DEFAULT_CHANNEL_INDEX, DEFAULT_MAX_PARTS, DEFAULT_MULTICAST_GROUP,
    DEFAULT_TCP_PORT,
};
use takmesh_bridge::{
    find_meshtastic_device, list_available_devices, BridgeConfig, BridgeConfigBuilder,
    InterfaceConfig, MeshtasticInterface, OutboundMode, RadioLink, TakMeshBridge, UdpTransport,
    DEFAULT_COT_PORT,
};

#[derive(Parser)]
#[command(name = "takmesh-node")]
#[command(version, about = "Bridge TAK Cursor-on-Target multicast with a Meshtastic LoRa mesh")]
struct Args {
    /// Serial port of the radio, or `auto` to scan for one
    #[arg(long, short, default_value = "auto", conflicts_with = "host")]
    port: String,

    /// Serial baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD_RATE)]
    baud: u32,

    /// Reach the radio over TCP at this host instead of serial
    #[arg(long)]
    host: Option<String>,

    /// TCP port of the radio's network API
    #[arg(long, default_value_t = DEFAULT_TCP_PORT)]
    tcp_port: u16,

    /// Radio connect and read timeout
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// Mesh channel index used for all traffic
    #[arg(long, short, default_value_t = DEFAULT_CHANNEL_INDEX)]
    channel: u32,

    /// Multicast group for tactical events
    #[arg(long, default_value_t = DEFAULT_MULTICAST_GROUP)]
    group: Ipv4Addr,

    /// UDP port for tactical events
    #[arg(long, default_value_t = DEFAULT_COT_PORT)]
    cot_port: u16,

    /// Multicast TTL of published events
    #[arg(long, default_value_t = 2)]
    ttl: u32,

    /// Local interface address for multicast
    #[arg(long, default_value_t = Ipv4Addr::UNSPECIFIED)]
    interface: Ipv4Addr,

    /// Listen on the port without joining the multicast group
    #[arg(long)]
    no_join: bool,

    /// How TAK events cross the mesh: native, tunnel or both
    #[arg(long, short, default_value = "native")]
    mode: OutboundMode,

    /// Largest slice of event text per chunk, in bytes
    #[arg(long, default_value_t = 120)]
    max_chunk_bytes: usize,

    /// Pause between consecutive chunks
    #[arg(long, default_value = "500ms", value_parser = humantime::parse_duration)]
    chunk_delay: Duration,

    /// Discard incomplete chunked messages after this long
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    reassembly_timeout: Duration,

    /// Incomplete chunked messages held at once
    #[arg(long, default_value_t = 64)]
    max_pending: usize,

    /// Largest part count accepted from an inbound chunked message
    #[arg(long, default_value_t = DEFAULT_MAX_PARTS)]
    max_parts: u32,

    /// Validity window of events published to TAK
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    stale_after: Duration,

    /// Nodes not heard within this window are not announced
    #[arg(long, default_value = "3h", value_parser = humantime::parse_duration)]
    node_max_age: Duration,

    /// Interval between node announcements
    #[arg(long, default_value = "60s", value_parser = humantime::parse_duration)]
    sweep_interval: Duration,

    /// Do not send the startup announcement on the mesh
    #[arg(long)]
    quiet: bool,

    /// Remembered `(sender, packet id)` pairs for duplicate suppression
    #[arg(long, default_value_t = 1000)]
    dedup_cache_size: usize,

    /// How long a seen packet is remembered
    #[arg(long, default_value = "5m", value_parser = humantime::parse_duration)]
    dedup_ttl: Duration,

    /// List serial devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

impl Args {
    fn to_config(&self) -> anyhow::Result<BridgeConfig> {
        let builder = BridgeConfigBuilder::new()
            .channel_index(self.channel)
            .multicast(self.group, self.cot_port)
            .multicast_ttl(self.ttl)
            .multicast_interface(self.interface)
            .join_group(!self.no_join)
            .outbound_mode(self.mode)
            .max_chunk_bytes(self.max_chunk_bytes)
            .chunk_delay(self.chunk_delay)
            .reassembly_timeout(self.reassembly_timeout)
            .max_pending(self.max_pending)
            .max_parts(self.max_parts)
            .stale_after(self.stale_after)
            .node_max_age(self.node_max_age)
            .sweep_interval(self.sweep_interval)
            .announce_startup(!self.quiet)
            .dedup_cache_size(self.dedup_cache_size)
            .dedup_ttl(self.dedup_ttl);

        let builder = match &self.host {
            Some(host) => builder.tcp(host.clone(), self.tcp_port),
            None if self.port == "auto" => {
                let port = find_meshtastic_device().ok_or_else(|| {
                    anyhow::anyhow!("no Meshtastic device found, pass --port or --host")
                })?;
                info!("Auto-detected Meshtastic device: {}", port);
                builder.serial_port_with_baud(port, self.baud)
            }
            None => builder.serial_port_with_baud(&self.port, self.baud),
        };

        let config = builder.build();
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging, RUST_LOG wins over --verbose
    let level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if args.list_devices {
        let devices = list_available_devices();
        if devices.is_empty() {
            println!("No serial devices found");
        }
        for device in devices {
            println!("{}", device);
        }
        return Ok(());
    }

    let config = args.to_config()?;

    info!("Starting TAK mesh node v{}", takmesh_bridge::VERSION);

    let result = match &config.radio {
        InterfaceConfig::Tcp { host, port } => {
            let iface = takmesh_bridge::TcpInterface::new(format!("{}:{}", host, port))
                .with_timeout(args.timeout);
            run(iface, &config).await
        }
        #[cfg(feature = "serial")]
        InterfaceConfig::Serial { port, baud_rate } => {
            let iface = takmesh_bridge::SerialInterface::new(port)
                .with_baud_rate(*baud_rate)
                .with_timeout(args.timeout);
            run(iface, &config).await
        }
        #[allow(unreachable_patterns)]
        other => Err(anyhow::anyhow!(
            "this build has no support for {:?}, rebuild with the matching feature",
            other
        )),
    };

    if let Err(e) = &result {
        error!("Bridge failed: {:#}", e);
    }
    result
}

/// Bring up both sides, run until a signal or a fatal error, then tear down
async fn run<I>(iface: I, config: &BridgeConfig) -> anyhow::Result<()>
where
    I: MeshtasticInterface + 'static,
{
    let udp = UdpTransport::bind(&config.multicast)?;

    info!("Connecting to radio via {}", iface.name());
    let (link, radio, inbound) = RadioLink::new(iface);
    let link_task = link
        .with_node_retention(config.freshness.node_retention())
        .start()
        .await?;

    let (bridge, handle) = TakMeshBridge::new(config, radio.clone(), inbound, udp.publisher());
    let receiver = udp.spawn_receiver(handle.clone());
    let mut bridge_task = tokio::spawn(bridge.run());

    info!("═══════════════════════════════════════════════════════════");
    info!("  TAK events on {}", udp.destination());
    info!("  Mesh channel {} ({:?} outbound)", config.channel_index, config.outbound_mode);
    info!("═══════════════════════════════════════════════════════════");

    let outcome = tokio::select! {
        joined = &mut bridge_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(anyhow::Error::new(e).context("bridge stopped")),
            Err(e) => Err(anyhow::Error::new(e).context("bridge task panicked")),
        },
        _ = shutdown_signal() => {
            info!("Shutdown requested");
            if handle.shutdown().await.is_ok() {
                let _ = bridge_task.await;
            }
            Ok(())
        }
    };

    receiver.abort();
    if let Err(e) = radio.close().await {
        warn!("Radio link already stopped: {}", e);
    }
    let _ = link_task.await;

    info!("TAK mesh node stopped");
    outcome
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
