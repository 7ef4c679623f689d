use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use parking_lot::Mutex;
use rand::Rng as _;

use crate::identity::Identity;

/// Byte-level transport boundary the engine speaks through. Delivery is
/// best-effort: a send that the underlying medium drops is simply lost, and
/// gossip redundancy across ticks is the only recovery mechanism.
pub trait Transport: Send + Sync {
    /// Queues `data` for delivery to `dest`. May silently drop downstream.
    fn send_to(&self, source: Identity, dest: Identity, data: &[u8]) -> Result<()>;

    /// Pops the next datagram queued for `dest`, if any. Never blocks.
    fn try_recv(&self, dest: Identity) -> Option<Vec<u8>>;
}

#[derive(Default)]
struct SimNetworkInner {
    queues: HashMap<Identity, VecDeque<Vec<u8>>>,
    partitioned: HashSet<Identity>,
}

/// In-memory message hub shared by every node of a simulated cluster.
/// Datagrams are delivered in FIFO order per destination; an optional loss
/// probability and per-node partitioning model an unreliable medium.
pub struct SimNetwork {
    inner: Mutex<SimNetworkInner>,
    loss_probability: f64,
}

impl SimNetwork {
    pub fn new() -> Self {
        Self::with_loss_probability(0.0)
    }

    /// `loss_probability` is the chance in `[0, 1]` that any single send is
    /// silently dropped.
    pub fn with_loss_probability(loss_probability: f64) -> Self {
        Self {
            inner: Mutex::new(SimNetworkInner::default()),
            loss_probability: loss_probability.clamp(0.0, 1.0),
        }
    }

    /// Cuts a node off: traffic from or to it is dropped until healed.
    pub fn partition(&self, node: Identity) {
        self.inner.lock().partitioned.insert(node);
    }

    pub fn heal(&self, node: Identity) {
        self.inner.lock().partitioned.remove(&node);
    }

    /// Number of datagrams currently queued for `dest`.
    pub fn queued(&self, dest: Identity) -> usize {
        self.inner
            .lock()
            .queues
            .get(&dest)
            .map(|q| q.len())
            .unwrap_or(0)
    }
}

impl Default for SimNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for SimNetwork {
    fn send_to(&self, source: Identity, dest: Identity, data: &[u8]) -> Result<()> {
        if self.loss_probability > 0.0 && rand::thread_rng().gen::<f64>() < self.loss_probability {
            return Ok(());
        }

        let mut inner = self.inner.lock();
        if inner.partitioned.contains(&source) || inner.partitioned.contains(&dest) {
            return Ok(());
        }
        inner.queues.entry(dest).or_default().push_back(data.to_vec());
        Ok(())
    }

    fn try_recv(&self, dest: Identity) -> Option<Vec<u8>> {
        self.inner.lock().queues.get_mut(&dest)?.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_delivery_per_destination() {
        let net = SimNetwork::new();
        let a = Identity::new(1, 0);
        let b = Identity::new(2, 0);

        net.send_to(a, b, b"first").unwrap();
        net.send_to(a, b, b"second").unwrap();

        assert_eq!(net.try_recv(b).unwrap(), b"first");
        assert_eq!(net.try_recv(b).unwrap(), b"second");
        assert!(net.try_recv(b).is_none());
    }

    #[test]
    fn test_partitioned_node_gets_nothing() {
        let net = SimNetwork::new();
        let a = Identity::new(1, 0);
        let b = Identity::new(2, 0);

        net.partition(b);
        net.send_to(a, b, b"dropped").unwrap();
        assert!(net.try_recv(b).is_none());

        net.heal(b);
        net.send_to(a, b, b"delivered").unwrap();
        assert_eq!(net.try_recv(b).unwrap(), b"delivered");
    }

    #[test]
    fn test_total_loss_drops_everything() {
        let net = SimNetwork::with_loss_probability(1.0);
        let a = Identity::new(1, 0);
        let b = Identity::new(2, 0);

        for _ in 0..32 {
            net.send_to(a, b, b"x").unwrap();
        }
        assert_eq!(net.queued(b), 0);
    }
}
