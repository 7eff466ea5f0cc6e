/*!
 * Hazard-Pointer Reclamation
 *
 * Safe memory reclamation for the runtime's lock-free structures. A
 * thread announces the addresses it may still dereference in its hazard
 * slots; removed nodes are retired rather than freed, and a periodic
 * scan frees only nodes no announcement covers.
 *
 * # Architecture
 *
 * - `HazardRegistry`: process-wide list of per-thread records, CAS-push
 *   registration, injectable so tests can run independent instances.
 * - `LocalHazards`: the registering thread's owning handle. Hazard slot
 *   publication, the retired list, and the scan loop live here. All
 *   reclamation decisions are strictly thread-local: a thread frees only
 *   nodes from its own retired list, never another thread's.
 * - `HazardNode`: header embedded in reclaimable nodes, carrying the
 *   retired-list link and a type-erased reclamation callback.
 *
 * The publish/protect discipline is the caller's contract: a thread must
 * publish a pointer in a hazard slot before the node can be observed as
 * removed by anyone else.
 */

mod node;
mod record;

pub use node::{HazardNode, ReclaimFn};
pub use record::{HazardRegistry, LocalHazards};
