/*!
 * Thread Records and the Reclamation Scan
 *
 * Registration pushes a record onto a process-wide list with a single
 * CAS per attempt. The retire threshold invariant is R = 2·N·K (N =
 * registered threads, K = slots per thread): a new record computes its
 * own threshold from a pre-CAS walk so the list head is correct the
 * moment it becomes visible, then bumps every older record by 2·K with
 * independent relaxed adds.
 */

use super::node::HazardNode;
use log::{debug, info};
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Per-thread record in the registry list.
///
/// Shared fields only: hazard slots read by every scanning thread, the
/// retire threshold, and the immutable list link. The retired list and
/// scan scratch live in the owning thread's `LocalHazards`.
struct ThreadRecord {
    slots: Box<[AtomicPtr<HazardNode>]>,
    retire_threshold: AtomicUsize,
    /// Immutable once the record is published
    next: *mut ThreadRecord,
}

// The record is only ever shared through the registry list; `next` is
// written before publication and never again.
unsafe impl Send for ThreadRecord {}
unsafe impl Sync for ThreadRecord {}

/// Process-wide hazard-pointer registry
///
/// Head of the record list plus the uniform slot count K. Multiple
/// independent registries may coexist (one per test, for instance);
/// records and nodes never cross registries.
pub struct HazardRegistry {
    head: AtomicPtr<ThreadRecord>,
    slots_per_thread: usize,
}

impl HazardRegistry {
    pub fn new(slots_per_thread: usize) -> Self {
        assert!(slots_per_thread > 0, "a record needs at least one slot");
        info!(
            "hazard registry created with {} slots per thread",
            slots_per_thread
        );
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
            slots_per_thread,
        }
    }

    #[inline]
    pub fn slots_per_thread(&self) -> usize {
        self.slots_per_thread
    }

    /// Register the calling thread, returning its owning handle.
    ///
    /// Lock-free: one CAS per push attempt. The new record's threshold
    /// counts itself plus every record already in the list; after the
    /// push succeeds, the older records are each bumped by 2·K since N
    /// grew by one.
    pub fn register(&self) -> LocalHazards<'_> {
        let slots = (0..self.slots_per_thread)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let record = Box::into_raw(Box::new(ThreadRecord {
            slots,
            retire_threshold: AtomicUsize::new(0),
            next: ptr::null_mut(),
        }));

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            let mut threads = 1;
            let mut cursor = head;
            while !cursor.is_null() {
                threads += 1;
                cursor = unsafe { (*cursor).next };
            }

            // The head's threshold must be correct the instant it is
            // visible: concurrent scans size their scratch from it.
            unsafe {
                (*record).next = head;
                (*record)
                    .retire_threshold
                    .store(2 * threads * self.slots_per_thread, Ordering::Relaxed);
            }

            match self
                .head
                .compare_exchange_weak(head, record, Ordering::Release, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(actual) => head = actual,
            }
        }

        // N increased by one, so every older record's R grows by 2·K.
        let mut cursor = unsafe { (*record).next };
        while !cursor.is_null() {
            unsafe {
                (*cursor)
                    .retire_threshold
                    .fetch_add(2 * self.slots_per_thread, Ordering::Relaxed);
                cursor = (*cursor).next;
            }
        }

        LocalHazards {
            registry: self,
            record: unsafe { &*record },
            retired: ptr::null_mut(),
            retired_count: 0,
            plist: Vec::new(),
            _not_sync: PhantomData,
        }
    }

    /// Number of records currently in the list
    pub fn records(&self) -> usize {
        let mut count = 0;
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            count += 1;
            cursor = unsafe { (*cursor).next };
        }
        count
    }

    /// Every record's current retire threshold, head first (diagnostics)
    pub fn thresholds(&self) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            unsafe {
                out.push((*cursor).retire_threshold.load(Ordering::Relaxed));
                cursor = (*cursor).next;
            }
        }
        out
    }
}

impl Drop for HazardRegistry {
    fn drop(&mut self) {
        // All handles are gone (they borrow the registry), so the list
        // is ours to free.
        let mut cursor = *self.head.get_mut();
        while !cursor.is_null() {
            let record = unsafe { Box::from_raw(cursor) };
            cursor = record.next;
        }
    }
}

/// A thread's owning handle to its registry record
///
/// Holds everything only the owning thread touches: the retired list,
/// its length, and the scan scratch buffer reused across scans. Dropping
/// the handle runs one best-effort final scan; nodes still protected at
/// that point are leaked by design rather than freed unsafely.
pub struct LocalHazards<'r> {
    registry: &'r HazardRegistry,
    record: &'r ThreadRecord,
    retired: *mut HazardNode,
    retired_count: usize,
    /// Scratch buffer of announced addresses, kept across scans
    plist: Vec<usize>,
    _not_sync: PhantomData<std::cell::Cell<()>>,
}

// The raw pointers are the thread's own record and privately owned
// retired nodes; the handle may move between threads but is never
// shared.
unsafe impl Send for LocalHazards<'_> {}

impl LocalHazards<'_> {
    /// Announce `node` in hazard slot `index`.
    ///
    /// Sequentially consistent so the announcement is globally visible
    /// before the caller re-validates that the node is still reachable.
    #[inline]
    pub fn protect(&self, index: usize, node: *mut HazardNode) {
        self.record.slots[index].store(node, Ordering::SeqCst);
    }

    /// Clear hazard slot `index`.
    #[inline]
    pub fn clear(&self, index: usize) {
        self.record.slots[index].store(ptr::null_mut(), Ordering::Release);
    }

    /// Retire a node removed from its lock-free structure.
    ///
    /// The node joins this thread's retired list; once the list reaches
    /// the record's retire threshold a scan runs and frees whatever is
    /// provably unreferenced.
    ///
    /// # Safety
    ///
    /// `node` must point to a live `HazardNode` that has been removed
    /// from its structure, is not already retired, and is not reachable
    /// for new protections. The callee takes ownership.
    pub unsafe fn retire(&mut self, node: *mut HazardNode) {
        (*node).next = self.retired;
        self.retired = node;
        self.retired_count += 1;

        if self.retired_count >= self.record.retire_threshold.load(Ordering::Relaxed) {
            self.scan();
        }
    }

    /// Number of nodes currently awaiting reclamation
    #[inline]
    pub fn retired_len(&self) -> usize {
        self.retired_count
    }

    /// This record's current retire threshold (R = 2·N·K)
    #[inline]
    pub fn retire_threshold(&self) -> usize {
        self.record.retire_threshold.load(Ordering::Relaxed)
    }

    /// Two-phase reclamation pass.
    ///
    /// Phase 1 snapshots every non-empty hazard slot of every record
    /// into the sorted scratch buffer. Phase 2 rebuilds the retired
    /// list: nodes found in the snapshot stay retired, the rest are
    /// handed to their reclamation callbacks. Only this thread's retired
    /// list is touched, so there is no cross-thread free race.
    pub fn scan(&mut self) {
        let head = self.registry.head.load(Ordering::Acquire);
        debug_assert!(!head.is_null());

        // The head record always carries a correct R = 2·N·K, which
        // bounds the announcements a full walk can collect at N·K.
        let max_pointers = unsafe { (*head).retire_threshold.load(Ordering::Acquire) / 2 };
        self.plist.clear();
        if self.plist.capacity() < max_pointers {
            self.plist.reserve(max_pointers);
        }

        let mut cursor = head;
        while !cursor.is_null() {
            unsafe {
                for slot in (*cursor).slots.iter() {
                    let announced = slot.load(Ordering::SeqCst);
                    if !announced.is_null() {
                        self.plist.push(announced as usize);
                    }
                }
                cursor = (*cursor).next;
            }
        }
        self.plist.sort_unstable();

        let mut node = self.retired;
        self.retired = ptr::null_mut();
        self.retired_count = 0;
        let mut reclaimed = 0usize;

        while !node.is_null() {
            unsafe {
                let next = (*node).next;
                if self.plist.binary_search(&(node as usize)).is_ok() {
                    // Still announced somewhere: keep it retired.
                    (*node).next = self.retired;
                    self.retired = node;
                    self.retired_count += 1;
                } else {
                    HazardNode::reclaim(node);
                    reclaimed += 1;
                }
                node = next;
            }
        }

        debug!(
            "hazard scan reclaimed {} nodes, {} still protected",
            reclaimed, self.retired_count
        );
    }
}

impl Drop for LocalHazards<'_> {
    fn drop(&mut self) {
        // Best-effort final cleanup. Nodes another thread still has
        // announced at teardown are leaked rather than freed unsafely.
        if !self.retired.is_null() {
            self.scan();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    // The header must come first so a node pointer is also the header
    // pointer; the fields are only ever touched through casts.
    #[repr(C)]
    #[allow(dead_code)]
    struct CountedNode {
        hazard: HazardNode,
        payload: u64,
    }

    unsafe fn reclaim_counted(context: *mut (), node: *mut HazardNode) {
        (*(context as *const AtomicUsize)).fetch_add(1, Ordering::Relaxed);
        drop(Box::from_raw(node as *mut CountedNode));
    }

    fn counted_node(counter: &AtomicUsize) -> *mut HazardNode {
        Box::into_raw(Box::new(CountedNode {
            hazard: HazardNode::new(
                reclaim_counted,
                counter as *const AtomicUsize as *mut (),
            ),
            payload: 0xDEAD_BEEF,
        })) as *mut HazardNode
    }

    #[test]
    fn test_single_registration_threshold() {
        let registry = HazardRegistry::new(4);
        let local = registry.register();

        assert_eq!(local.retire_threshold(), 8); // 2 * 1 * 4
        assert_eq!(registry.records(), 1);
    }

    #[test]
    fn test_sequential_registrations_propagate_threshold() {
        let registry = HazardRegistry::new(4);
        let first = registry.register();
        let second = registry.register();
        let third = registry.register();

        assert_eq!(first.retire_threshold(), 24); // 2 * 3 * 4
        assert_eq!(second.retire_threshold(), 24);
        assert_eq!(third.retire_threshold(), 24);
    }

    #[test]
    fn test_scan_with_no_hazards_reclaims_everything() {
        let counter = AtomicUsize::new(0);
        let registry = HazardRegistry::new(2);
        let mut local = registry.register();

        for _ in 0..5 {
            unsafe { local.retire(counted_node(&counter)) };
        }
        local.scan();

        assert_eq!(counter.load(Ordering::Relaxed), 5);
        assert_eq!(local.retired_len(), 0);
    }

    #[test]
    fn test_protected_node_survives_scan() {
        let counter = AtomicUsize::new(0);
        let registry = HazardRegistry::new(2);
        let mut local = registry.register();

        let protected = counted_node(&counter);
        local.protect(0, protected);
        unsafe {
            local.retire(protected);
            local.retire(counted_node(&counter));
        }
        local.scan();

        // Only the unprotected node was freed
        assert_eq!(counter.load(Ordering::Relaxed), 1);
        assert_eq!(local.retired_len(), 1);

        local.clear(0);
        local.scan();
        assert_eq!(counter.load(Ordering::Relaxed), 2);
        assert_eq!(local.retired_len(), 0);
    }

    #[test]
    fn test_retire_triggers_scan_at_threshold() {
        let counter = AtomicUsize::new(0);
        let registry = HazardRegistry::new(1);
        let mut local = registry.register();
        let threshold = local.retire_threshold();

        for _ in 0..threshold {
            unsafe { local.retire(counted_node(&counter)) };
        }

        // The final retire crossed the threshold and scanned everything
        assert_eq!(counter.load(Ordering::Relaxed), threshold);
        assert_eq!(local.retired_len(), 0);
    }

    #[test]
    fn test_handle_drop_runs_final_scan() {
        let counter = AtomicUsize::new(0);
        let registry = HazardRegistry::new(2);

        {
            let mut local = registry.register();
            unsafe {
                local.retire(counted_node(&counter));
                local.retire(counted_node(&counter));
            }
        }

        assert_eq!(counter.load(Ordering::Relaxed), 2);
    }
}
