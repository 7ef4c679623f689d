use tracing::info;

use crate::identity::Identity;

/// [`MembershipEventHandler`] is notified whenever a node's local view
/// changes: a previously unknown peer was inserted, or a peer was evicted
/// after exceeding the failure-removal threshold. Handlers are side-effect
/// only and must not block; the engine calls them synchronously from its
/// dispatch and tick paths.
pub trait MembershipEventHandler: Send + Sync {
    /// A previously unknown member entered `local`'s table.
    fn member_added(&self, local: Identity, peer: Identity);

    /// A member was evicted from `local`'s table after timing out.
    fn member_removed(&self, local: Identity, peer: Identity);
}

/// Default handler that writes membership notices to the tracing log.
#[derive(Debug, Default)]
pub struct TracingEventHandler;

impl MembershipEventHandler for TracingEventHandler {
    fn member_added(&self, local: Identity, peer: Identity) {
        info!(node = %local, member = %peer, "member added");
    }

    fn member_removed(&self, local: Identity, peer: Identity) {
        info!(node = %local, member = %peer, "member removed");
    }
}
