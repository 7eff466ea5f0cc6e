/*!
 * Synchronization Primitives
 *
 * Low-level building blocks for the fiber handoff protocol:
 * - Single-slot mailbox used as the join/detach rendezvous point
 *
 * # Architecture
 *
 * The mailbox parks waiters on the slot's own address via
 * `parking_lot_core`, which maps to futex syscalls on Linux. Waits are
 * untimed: they are internal handoffs between cooperating fibers, never
 * exposed to users.
 */

mod mailbox;

pub use mailbox::Mailbox;
