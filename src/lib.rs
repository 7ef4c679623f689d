use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{debug, info, warn};

mod clock;
mod codec;
pub mod config;
mod event;
mod identity;
mod members;
mod message;
mod transport;

pub use clock::{LogicalClock, SimClock};
pub use codec::CodecError;
pub use config::{Config, ConfigBuilder};
pub use event::{MembershipEventHandler, TracingEventHandler};
pub use identity::Identity;
pub use members::{MemberEntry, MembershipTable, UpsertOutcome};
pub use message::{Message, MessageType};
pub use transport::{SimNetwork, Transport};

// Heartbeat-gossip membership protocol.
//
/// This crate implements a peer-to-peer group membership protocol: every
/// participating process keeps a local, eventually-consistent view of which
/// peers are alive and evicts the ones that stop refreshing their heartbeat.
/// The pieces are:
///
/// * Gossipmesh: the protocol engine. Drives the join handshake, the
/// per-tick failure sweep, and full-membership heartbeat flooding. It is
/// externally driven and never blocks: the caller repeatedly invokes
/// `drain_inbound` and `run_tick` for each node.
///
/// * MembershipTable: the authoritative local view, one entry per known peer
/// (self included), updated only through a single `upsert` entry point whose
/// strictly-greater heartbeat guard rejects stale or duplicated gossip.
///
/// * Transport/LogicalClock/MembershipEventHandler: the collaborator seams.
/// The transport only promises best-effort "send bytes" and a non-blocking
/// inbound queue; the clock hands out monotonically non-decreasing logical
/// time; the event handler receives member-added/removed notices.
///
/// Dissemination is deliberately simple flooding: every active node, every
/// tick, sends its entire view to every peer it currently believes alive.
/// Views may transiently diverge across nodes; there is no consensus, no
/// ordering guarantee, and no authentication of membership claims.

/// Lifecycle of one engine. A node becomes `Active` only after its join
/// handshake completes (or immediately, when it is the rendezvous itself).
/// `Stopped` simulates process death and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Initialized,
    Active,
    Stopped,
}

/// The membership protocol engine for one node.
///
/// Owns the node's identity, heartbeat counter, and membership table
/// exclusively; peers influence the table only through messages interpreted
/// here. All entry points are synchronous and non-blocking, leaving
/// scheduling to the caller.
pub struct Gossipmesh {
    config: Config,
    identity: Identity,
    state: EngineState,
    heartbeat: u64,
    members: MembershipTable,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn LogicalClock>,
    events: Option<Arc<dyn MembershipEventHandler>>,
}

impl Gossipmesh {
    /// Creates an engine without an event handler. Initialization inserts a
    /// self-entry at heartbeat 0; the node is not in any group yet.
    pub fn new(config: Config, transport: Arc<dyn Transport>, clock: Arc<dyn LogicalClock>) -> Self {
        Self::with_event_handler(config, transport, clock, None)
    }

    pub fn with_event_handler(
        config: Config,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn LogicalClock>,
        events: Option<Arc<dyn MembershipEventHandler>>,
    ) -> Self {
        let identity = config.identity();
        let now = clock.now();

        let mut members = MembershipTable::new();
        members.upsert(identity, 0, now);

        Self {
            config,
            identity,
            state: EngineState::Initialized,
            heartbeat: 0,
            members,
            transport,
            clock,
            events,
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }

    pub fn is_active(&self) -> bool {
        self.state == EngineState::Active
    }

    pub fn is_stopped(&self) -> bool {
        self.state == EngineState::Stopped
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Copy of the current local view, in insertion order.
    pub fn members(&self) -> Vec<MemberEntry> {
        self.members.snapshot()
    }

    /// Starts the join handshake against the well-known rendezvous identity.
    ///
    /// The rendezvous node itself becomes `Active` immediately and boots the
    /// group without sending anything. Everyone else sends a JoinRequest and
    /// stays non-`Active` until a JoinReply arrives; there is no retry timer,
    /// so an unanswered request leaves the node joining forever unless the
    /// caller re-drives it.
    pub fn join(&mut self, rendezvous: Identity) -> Result<()> {
        if self.state == EngineState::Stopped {
            bail!("node {} has stopped", self.identity);
        }
        if rendezvous.is_null() {
            bail!("rendezvous identity is null");
        }

        if rendezvous == self.identity {
            info!(node = %self.identity, "starting up group");
            self.state = EngineState::Active;
            return Ok(());
        }

        let request = Message::JoinRequest {
            sender: self.identity,
            heartbeat: self.heartbeat,
        };
        self.send(rendezvous, &request);
        info!(node = %self.identity, rendezvous = %rendezvous, "join request sent");
        Ok(())
    }

    /// Leaves the group: clears the local view and drops back to the
    /// pre-join state. No departure message is sent; peers will evict this
    /// node once its heartbeats stop refreshing.
    pub fn leave(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }
        self.state = EngineState::Initialized;
        self.members.clear();
        info!(node = %self.identity, "left the group");
    }

    /// Simulates process death. Terminal: inbound dispatch and periodic
    /// ticks become no-ops immediately, with no graceful-leave message.
    pub fn fail(&mut self) {
        self.state = EngineState::Stopped;
        info!(node = %self.identity, "node failed");
    }

    /// Drains and processes every currently queued inbound message.
    /// Malformed or unrecognized messages are dropped without a response.
    pub fn drain_inbound(&mut self) {
        if self.state == EngineState::Stopped {
            return;
        }

        while let Some(data) = self.transport.try_recv(self.identity) {
            match Message::from_bytes(&data) {
                Ok(message) => self.dispatch(message),
                Err(e) => {
                    debug!(node = %self.identity, error = %e, "dropping malformed message");
                }
            }
        }
    }

    /// Performs one periodic maintenance round while `Active`: sweep timed
    /// out members, advance the own heartbeat, and flood the full view to
    /// every peer currently believed alive.
    pub fn run_tick(&mut self) {
        if self.state != EngineState::Active {
            return;
        }
        let now = self.clock.now();

        let removed =
            self.members
                .sweep_expired(now, self.config.fail_removal_threshold(), self.identity);
        for peer in removed {
            info!(node = %self.identity, peer = %peer, "member timed out");
            self.notify_removed(peer);
        }

        self.heartbeat += 1;
        self.members.refresh_self(self.identity, self.heartbeat, now);

        let heartbeat = Message::Heartbeat {
            snapshot: self.members.snapshot(),
        };
        let bytes = match heartbeat.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(node = %self.identity, error = %e, "failed to encode heartbeat");
                return;
            }
        };

        for entry in self.members.snapshot() {
            if entry.identity == self.identity {
                continue;
            }
            if let Err(e) = self.transport.send_to(self.identity, entry.identity, &bytes) {
                warn!(
                    node = %self.identity,
                    peer = %entry.identity,
                    error = %e,
                    "heartbeat send failed",
                );
            }
        }
    }

    fn dispatch(&mut self, message: Message) {
        match message {
            Message::JoinRequest { sender, heartbeat } => {
                self.handle_join_request(sender, heartbeat)
            }
            Message::JoinReply { snapshot } => self.handle_join_reply(snapshot),
            Message::Heartbeat { snapshot } => self.handle_heartbeat(snapshot),
        }
    }

    fn handle_join_request(&mut self, sender: Identity, heartbeat: u64) {
        let now = self.clock.now();
        if self.members.upsert(sender, heartbeat, now) == UpsertOutcome::Inserted {
            self.notify_added(sender);
        }

        let reply = Message::JoinReply {
            snapshot: self.members.snapshot(),
        };
        self.send(sender, &reply);
        debug!(node = %self.identity, joiner = %sender, "answered join request");
    }

    fn handle_join_reply(&mut self, snapshot: Vec<MemberEntry>) {
        if self.state == EngineState::Initialized {
            self.state = EngineState::Active;
            info!(node = %self.identity, "joined the group");
        }
        // A join reply is a heartbeat that additionally completes the
        // handshake, so the snapshot merge is shared.
        self.handle_heartbeat(snapshot);
    }

    fn handle_heartbeat(&mut self, snapshot: Vec<MemberEntry>) {
        // Carried timestamps are the sender's clock readings; entries are
        // re-stamped with the local clock on merge.
        let now = self.clock.now();
        for entry in snapshot {
            if self.members.upsert(entry.identity, entry.heartbeat, now) == UpsertOutcome::Inserted
            {
                self.notify_added(entry.identity);
            }
        }
    }

    fn send(&self, dest: Identity, message: &Message) {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(node = %self.identity, error = %e, "failed to encode message");
                return;
            }
        };
        if let Err(e) = self.transport.send_to(self.identity, dest, &bytes) {
            warn!(node = %self.identity, dest = %dest, error = %e, "send failed");
        }
    }

    fn notify_added(&self, peer: Identity) {
        debug!(node = %self.identity, peer = %peer, "member added");
        if let Some(events) = &self.events {
            events.member_added(self.identity, peer);
        }
    }

    fn notify_removed(&self, peer: Identity) {
        if let Some(events) = &self.events {
            events.member_removed(self.identity, peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingEvents {
        added: Mutex<Vec<(Identity, Identity)>>,
        removed: Mutex<Vec<(Identity, Identity)>>,
    }

    impl RecordingEvents {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                added: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
            })
        }
    }

    impl MembershipEventHandler for RecordingEvents {
        fn member_added(&self, local: Identity, peer: Identity) {
            self.added.lock().push((local, peer));
        }

        fn member_removed(&self, local: Identity, peer: Identity) {
            self.removed.lock().push((local, peer));
        }
    }

    fn engine(
        id: u32,
        threshold: u64,
        net: &Arc<SimNetwork>,
        clock: &Arc<SimClock>,
    ) -> Gossipmesh {
        let config = ConfigBuilder::new()
            .with_id(id)
            .with_fail_removal_threshold(threshold)
            .build()
            .unwrap();
        Gossipmesh::new(config, net.clone(), clock.clone())
    }

    fn member_ids(node: &Gossipmesh) -> Vec<u32> {
        let mut ids: Vec<u32> = node.members().iter().map(|e| e.identity.id).collect();
        ids.sort_unstable();
        ids
    }

    /// One lossless round: advance time, drain every node, tick every node.
    fn run_round(clock: &SimClock, cluster: &mut [Gossipmesh]) {
        clock.advance(1);
        for node in cluster.iter_mut() {
            node.drain_inbound();
        }
        for node in cluster.iter_mut() {
            node.run_tick();
        }
    }

    #[test]
    fn test_rendezvous_boots_group_without_sending() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);

        a.join(a.identity()).unwrap();
        assert!(a.is_active());
        assert_eq!(a.member_count(), 1);
        assert_eq!(net.queued(a.identity()), 0);
    }

    #[test]
    fn test_join_rejects_null_rendezvous() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);

        assert!(a.join(Identity::NULL).is_err());
        assert!(!a.is_active());
    }

    #[test]
    fn test_two_node_join_handshake() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        let mut b = engine(2, 20, &net, &clock);
        let rendezvous = a.identity();

        a.join(rendezvous).unwrap();
        b.join(rendezvous).unwrap();
        assert!(!b.is_active());

        // A answers the request and learns B
        a.drain_inbound();
        assert!(a.members().iter().any(|e| e.identity == b.identity()));

        // B merges the reply and activates
        b.drain_inbound();
        assert!(b.is_active());
        assert_eq!(member_ids(&b), vec![1, 2]);
    }

    #[test]
    fn test_join_reply_is_processed_like_a_heartbeat() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut b = engine(2, 20, &net, &clock);

        let reply = Message::JoinReply {
            snapshot: vec![
                MemberEntry {
                    identity: Identity::new(1, 0),
                    heartbeat: 4,
                    last_update: 99,
                },
                MemberEntry {
                    identity: Identity::new(3, 0),
                    heartbeat: 2,
                    last_update: 99,
                },
            ],
        };
        net.send_to(Identity::new(1, 0), b.identity(), &reply.to_bytes().unwrap())
            .unwrap();

        b.drain_inbound();
        assert!(b.is_active());
        // the embedded snapshot was merged exactly like a heartbeat
        assert_eq!(member_ids(&b), vec![1, 2, 3]);
    }

    #[test]
    fn test_stale_heartbeat_is_rejected() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        a.join(a.identity()).unwrap();

        let peer = Identity::new(2, 0);
        let fresh = Message::Heartbeat {
            snapshot: vec![MemberEntry { identity: peer, heartbeat: 8, last_update: 0 }],
        };
        net.send_to(peer, a.identity(), &fresh.to_bytes().unwrap()).unwrap();
        a.drain_inbound();

        clock.advance(5);
        let stale = Message::Heartbeat {
            snapshot: vec![MemberEntry { identity: peer, heartbeat: 3, last_update: 0 }],
        };
        net.send_to(peer, a.identity(), &stale.to_bytes().unwrap()).unwrap();
        a.drain_inbound();

        let entry = a.members().into_iter().find(|e| e.identity == peer).unwrap();
        assert_eq!(entry.heartbeat, 8);
        assert_eq!(entry.last_update, 0);
    }

    #[test]
    fn test_malformed_messages_are_dropped_silently() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        a.join(a.identity()).unwrap();

        net.send_to(Identity::new(9, 0), a.identity(), &[0xAB, 0x01]).unwrap();
        net.send_to(Identity::new(9, 0), a.identity(), &[]).unwrap();

        a.drain_inbound();
        assert_eq!(a.member_count(), 1);
    }

    #[test]
    fn test_timed_out_member_is_evicted_and_reported() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let events = RecordingEvents::new();

        let config = ConfigBuilder::new()
            .with_id(1)
            .with_fail_removal_threshold(5)
            .build()
            .unwrap();
        let mut a = Gossipmesh::with_event_handler(
            config,
            net.clone(),
            clock.clone(),
            Some(events.clone()),
        );
        a.join(a.identity()).unwrap();

        let b = Identity::new(2, 0);
        let c = Identity::new(3, 0);
        let hb = Message::Heartbeat {
            snapshot: vec![
                MemberEntry { identity: b, heartbeat: 1, last_update: 0 },
                MemberEntry { identity: c, heartbeat: 1, last_update: 0 },
            ],
        };
        net.send_to(b, a.identity(), &hb.to_bytes().unwrap()).unwrap();
        a.drain_inbound();
        assert_eq!(member_ids(&a), vec![1, 2, 3]);

        // only C keeps refreshing; B goes silent for 6 units
        clock.advance(6);
        let c_alive = Message::Heartbeat {
            snapshot: vec![MemberEntry { identity: c, heartbeat: 7, last_update: 0 }],
        };
        net.send_to(c, a.identity(), &c_alive.to_bytes().unwrap()).unwrap();
        a.drain_inbound();
        a.run_tick();

        assert_eq!(member_ids(&a), vec![1, 3]);
        assert_eq!(*events.removed.lock(), vec![(a.identity(), b)]);
    }

    #[test]
    fn test_cluster_converges_without_failures() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut cluster: Vec<Gossipmesh> =
            (1..=4).map(|id| engine(id, 20, &net, &clock)).collect();
        let rendezvous = cluster[0].identity();

        for node in cluster.iter_mut() {
            node.join(rendezvous).unwrap();
        }
        for _ in 0..6 {
            run_round(&clock, &mut cluster);
        }

        for node in &cluster {
            assert!(node.is_active());
            assert_eq!(member_ids(node), vec![1, 2, 3, 4]);
        }
    }

    #[test]
    fn test_failed_node_is_eventually_evicted_everywhere() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let threshold = 5;
        let mut cluster: Vec<Gossipmesh> =
            (1..=3).map(|id| engine(id, threshold, &net, &clock)).collect();
        let rendezvous = cluster[0].identity();

        for node in cluster.iter_mut() {
            node.join(rendezvous).unwrap();
        }
        for _ in 0..4 {
            run_round(&clock, &mut cluster);
        }
        let dead = cluster[2].identity();
        cluster[2].fail();

        for _ in 0..(threshold + 2) {
            run_round(&clock, &mut cluster);
        }

        for node in cluster.iter().filter(|n| !n.is_stopped()) {
            assert_eq!(member_ids(node), vec![1, 2], "node {}", node.identity());
            assert!(!node.members().iter().any(|e| e.identity == dead));
        }
    }

    #[test]
    fn test_stopped_node_ignores_everything() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        a.join(a.identity()).unwrap();
        a.fail();

        let hb = Message::Heartbeat {
            snapshot: vec![MemberEntry {
                identity: Identity::new(2, 0),
                heartbeat: 1,
                last_update: 0,
            }],
        };
        net.send_to(Identity::new(2, 0), a.identity(), &hb.to_bytes().unwrap())
            .unwrap();

        a.drain_inbound();
        a.run_tick();

        assert_eq!(a.member_count(), 1);
        assert!(a.join(Identity::new(3, 0)).is_err());
        // the queued message was never consumed
        assert_eq!(net.queued(a.identity()), 1);
    }

    #[test]
    fn test_leave_clears_the_table_and_deactivates() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        a.join(a.identity()).unwrap();

        a.leave();
        assert!(!a.is_active());
        assert_eq!(a.member_count(), 0);
        // leaving sends nothing; peers evict us by timeout
        assert_eq!(net.queued(Identity::new(2, 0)), 0);
    }

    #[test]
    fn test_tick_sends_to_every_peer_but_self() {
        let net = Arc::new(SimNetwork::new());
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        a.join(a.identity()).unwrap();

        let b = Identity::new(2, 0);
        let c = Identity::new(3, 0);
        let hb = Message::Heartbeat {
            snapshot: vec![
                MemberEntry { identity: b, heartbeat: 1, last_update: 0 },
                MemberEntry { identity: c, heartbeat: 1, last_update: 0 },
            ],
        };
        net.send_to(b, a.identity(), &hb.to_bytes().unwrap()).unwrap();
        a.drain_inbound();

        a.run_tick();
        assert_eq!(net.queued(a.identity()), 0);
        assert_eq!(net.queued(b), 1);
        assert_eq!(net.queued(c), 1);

        // the flooded snapshot carries the freshly incremented self heartbeat
        let flooded = Message::from_bytes(&net.try_recv(b).unwrap()).unwrap();
        match flooded {
            Message::Heartbeat { snapshot } => {
                let own = snapshot.iter().find(|e| e.identity == a.identity()).unwrap();
                assert_eq!(own.heartbeat, 1);
            }
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_lossy_transport_does_not_crash_the_sender() {
        let net = Arc::new(SimNetwork::with_loss_probability(1.0));
        let clock = Arc::new(SimClock::new());
        let mut a = engine(1, 20, &net, &clock);
        let mut b = engine(2, 20, &net, &clock);

        a.join(a.identity()).unwrap();
        b.join(a.identity()).unwrap();

        for _ in 0..5 {
            clock.advance(1);
            a.drain_inbound();
            b.drain_inbound();
            a.run_tick();
            b.run_tick();
        }

        // nothing got through, nobody crashed, B never joined
        assert!(!b.is_active());
        assert_eq!(a.member_count(), 1);
    }
}
