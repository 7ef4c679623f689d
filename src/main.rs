use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;
use tracing_subscriber::EnvFilter;

use gossipmesh::{
    ConfigBuilder, Gossipmesh, Identity, SimClock, SimNetwork, TracingEventHandler,
};

/// Drives a simulated heartbeat-gossip cluster: every node joins through the
/// rendezvous node (id 1), the cluster is run for a number of rounds, and one
/// node can be killed midway to watch the others evict it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of nodes in the cluster (node 1 is the rendezvous)
    #[arg(long, default_value_t = 5)]
    nodes: u32,

    /// Number of drain+tick rounds to run
    #[arg(long, default_value_t = 60)]
    rounds: u64,

    /// Probability in [0, 1] that any single datagram is dropped
    #[arg(long, default_value_t = 0.0)]
    loss: f64,

    /// Entry age (in rounds) past which a silent member is evicted
    #[arg(long, default_value_t = 20)]
    removal_threshold: u64,

    /// Wall-clock pacing between rounds, in milliseconds
    #[arg(long, default_value_t = 50)]
    tick_ms: u64,

    /// Id of a node to fail halfway through the run
    #[arg(long)]
    fail_node: Option<u32>,
}

fn setup_tracing() {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true);

    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_tracing();

    let network = Arc::new(SimNetwork::with_loss_probability(args.loss));
    let clock = Arc::new(SimClock::new());
    let events = Arc::new(TracingEventHandler);
    let rendezvous = Identity::new(1, 0);

    let mut cluster = Vec::with_capacity(args.nodes as usize);
    for id in 1..=args.nodes {
        let config = ConfigBuilder::new()
            .with_id(id)
            .with_fail_removal_threshold(args.removal_threshold)
            .build()?;
        let mut node = Gossipmesh::with_event_handler(
            config,
            network.clone(),
            clock.clone(),
            Some(events.clone()),
        );
        node.join(rendezvous)?;
        cluster.push(node);
    }
    info!(nodes = args.nodes, rounds = args.rounds, loss = args.loss, "cluster started");

    for round in 1..=args.rounds {
        clock.advance(1);

        if round == args.rounds / 2 {
            if let Some(id) = args.fail_node {
                for node in cluster.iter_mut() {
                    if node.identity().id == id {
                        node.fail();
                    }
                }
            }
        }

        for node in cluster.iter_mut() {
            node.drain_inbound();
        }
        for node in cluster.iter_mut() {
            node.run_tick();
        }

        tokio::time::sleep(Duration::from_millis(args.tick_ms)).await;
    }

    for node in &cluster {
        info!(
            node = %node.identity(),
            active = node.is_active(),
            stopped = node.is_stopped(),
            members = node.member_count(),
            "final view",
        );
    }
    Ok(())
}
