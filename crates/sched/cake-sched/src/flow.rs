//! Flow subqueues.
//!
//! A flow is a FIFO of packets sharing a hash bucket, carrying its own DRR
//! deficit and CoDel state. List membership is tracked by a tag instead of
//! an intrusive node; the owning tin keeps index deques for the new/old
//! rotations.

use crate::codel::CodelVars;
use cake_core::packet::Packet;
use std::collections::VecDeque;

/// Which scheduling list a flow currently sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowList {
    /// Not scheduled; the queue is empty (except transiently mid-dequeue).
    #[default]
    Detached,
    /// Freshly activated; served before the old rotation.
    New,
    /// Circulated at least once; plain round-robin.
    Old,
}

/// One flow subqueue.
#[derive(Debug, Default)]
pub struct Flow {
    /// FIFO of queued packets.
    pub queue: VecDeque<Packet>,
    /// DRR byte credit; may go negative after sending an oversized packet.
    pub deficit: i32,
    /// Drops (or ECN marks) charged to this flow since activation.
    pub dropped: u32,
    /// Controlled-delay state.
    pub cvars: CodelVars,
    /// Current list membership.
    pub membership: FlowList,
}

impl Flow {
    /// True when the flow is on neither rotation.
    pub fn is_detached(&self) -> bool {
        self.membership == FlowList::Detached
    }

    /// Number of queued packets.
    pub fn qlen(&self) -> u32 {
        self.queue.len() as u32
    }
}
