/*!
 * Retired Node Header
 * Embedded in any lock-free node eligible for deferred reclamation
 */

use std::ptr;

/// Type-erased reclamation callback: a one-method destructor capability
/// attached to each node at creation.
///
/// # Safety
///
/// Invoked at most once, by the retiring thread, after a scan has proven
/// no hazard slot covers the node. The callback owns the node from that
/// point and must free it.
pub type ReclaimFn = unsafe fn(context: *mut (), node: *mut HazardNode);

/// Header embedded in a reclaimable lock-free node
///
/// Created when the node is logically removed from its structure;
/// destroyed when a scan determines no thread can still reference it.
pub struct HazardNode {
    /// Retired-list link, owned by the retiring thread
    pub(super) next: *mut HazardNode,
    reclaim: ReclaimFn,
    context: *mut (),
}

impl HazardNode {
    pub fn new(reclaim: ReclaimFn, context: *mut ()) -> Self {
        Self {
            next: ptr::null_mut(),
            reclaim,
            context,
        }
    }

    /// Run the reclamation callback, consuming the node.
    ///
    /// # Safety
    ///
    /// `node` must point to a live, retired `HazardNode` that no hazard
    /// slot covers; it must not be used again afterwards.
    pub(super) unsafe fn reclaim(node: *mut HazardNode) {
        let reclaim = (*node).reclaim;
        let context = (*node).context;
        reclaim(context, node);
    }
}
