use crate::identity::Identity;

/*
 *
 * ===== Membership table =====
 *
 */

/// One row of the local membership view. `heartbeat` is the highest liveness
/// counter ever seen for the peer, `last_update` the local logical time at
/// which it was last refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberEntry {
    pub identity: Identity,
    pub heartbeat: u64,
    pub last_update: u64,
}

/// What an [`MembershipTable::upsert`] call did to the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// The identity was unknown and a fresh entry was inserted.
    Inserted,
    /// The identity was known and carried a strictly newer heartbeat.
    Refreshed,
    /// The offered heartbeat was not newer than the stored one; nothing changed.
    Stale,
}

/// The authoritative local membership view, exclusively owned and mutated by
/// one node's engine. Insertion-ordered; at most one entry per identity.
#[derive(Debug, Default)]
pub struct MembershipTable {
    entries: Vec<MemberEntry>,
}

impl MembershipTable {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Inserts the identity if absent, otherwise applies the offered heartbeat
    /// only if it is strictly greater than the stored one. The strict guard is
    /// the table's only defense against duplicate or out-of-order gossip.
    pub fn upsert(&mut self, identity: Identity, heartbeat: u64, now: u64) -> UpsertOutcome {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.identity == identity) {
            if heartbeat > entry.heartbeat {
                entry.heartbeat = heartbeat;
                entry.last_update = now;
                UpsertOutcome::Refreshed
            } else {
                UpsertOutcome::Stale
            }
        } else {
            self.entries.push(MemberEntry { identity, heartbeat, last_update: now });
            UpsertOutcome::Inserted
        }
    }

    /// Unconditionally stamps the node's own entry with its current heartbeat.
    /// Only the owning node may advance its own counter, so the monotonicity
    /// guard does not apply here.
    pub fn refresh_self(&mut self, own: Identity, heartbeat: u64, now: u64) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.identity == own) {
            entry.heartbeat = heartbeat;
            entry.last_update = now;
        }
    }

    /// Removes and returns every entry other than `own` whose age
    /// (`now - last_update`) has reached `threshold`. Entries are visited in
    /// table order and survivors keep their relative order.
    pub fn sweep_expired(&mut self, now: u64, threshold: u64, own: Identity) -> Vec<Identity> {
        let mut removed = Vec::new();
        self.entries.retain(|entry| {
            if entry.identity == own {
                return true;
            }
            if now.saturating_sub(entry.last_update) >= threshold {
                removed.push(entry.identity);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Full copy of the table in insertion order, used to populate outgoing
    /// gossip payloads.
    pub fn snapshot(&self) -> Vec<MemberEntry> {
        self.entries.clone()
    }

    pub fn get(&self, identity: Identity) -> Option<&MemberEntry> {
        self.entries.iter().find(|e| e.identity == identity)
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.get(identity).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
