#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Emberlink demo entrypoint.
//! Runs a small in-process mesh over the loopback transport: one node
//! raises an SOS and the others log what the protocol engine does with
//! it. A real deployment plugs a BLE driver into the `Transport` seam
//! instead.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use emberlink::core::config::MeshConfig;
use emberlink::core::types::{GeoLocation, NodeId, SosType};
use emberlink::networking::loopback::LoopbackHub;
use emberlink::networking::node::MeshNode;

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn node_config(base: &MeshConfig, name: &str) -> MeshConfig {
    let mut cfg = base.clone();
    cfg.node_name = name.to_string();
    cfg.self_id = None;
    cfg.data_dir = None;
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .compact()
        .try_init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        build = option_env!("VERGEN_BUILD_TIMESTAMP").unwrap_or("unknown"),
        git = option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        "emberlink starting"
    );

    let base = match env("EMBERLINK_CONFIG", "").as_str() {
        "" => MeshConfig::default(),
        path => MeshConfig::load(path).context("loading config")?,
    };

    let hub = LoopbackHub::new();
    let mut nodes: Vec<MeshNode> = Vec::new();
    for name in ["alpha", "bravo", "charlie"] {
        let cfg = node_config(&base, name);
        let id = cfg.resolve_self_id().context("resolving node id")?;
        let mut cfg = cfg;
        cfg.self_id = Some(id.to_string());
        let transport = Arc::new(hub.transport(id, cfg.advertise_period_ms));
        let node = MeshNode::new(cfg, transport).context("building node")?;
        nodes.push(node);
    }

    // Chain topology: alpha - bravo - charlie.
    let ids: Vec<NodeId> = nodes.iter().map(|n| n.node_id()).collect();
    hub.link(ids[0], ids[1]);
    hub.link(ids[1], ids[2]);

    for node in &nodes {
        node.start().await.context("starting node")?;
    }

    // Log every event from the last node in the chain.
    let (_obs, mut events) = nodes[2].observe();
    let ev_task = tokio::spawn(async move {
        while let Some(ev) = events.recv().await {
            info!(?ev, "mesh event");
        }
        warn!("event channel closed");
    });

    let sos_id = nodes[0]
        .send_sos(
            "trapped near the river crossing",
            GeoLocation {
                latitude: 47.3769,
                longitude: 8.5417,
            },
            SosType::Trapped,
        )
        .await
        .context("sending sos")?;
    info!(%sos_id, node = %ids[0], "sos originated");

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    for node in &nodes {
        node.stop().await;
    }
    ev_task.abort();
    Ok(())
}
