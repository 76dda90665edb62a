//! Flow hashing and reduction.
//!
//! Hashes the mode-selected subset of a packet's dissected keys with a
//! per-tin perturbation seed, then reduces into the flow table by
//! multiply-shift rather than modulo. Collisions share a flow subqueue;
//! the table is direct-mapped.

use cake_core::config::FlowMode;
use cake_core::packet::FlowKeys;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Map a packet's flow identity to an index in `[0, flows_cnt)`.
pub fn flow_hash(keys: &FlowKeys, mode: FlowMode, perturbation: u32, flows_cnt: u32) -> u32 {
    if mode.is_none() || flows_cnt == 0 {
        return 0;
    }

    let mut hasher = DefaultHasher::new();
    perturbation.hash(&mut hasher);

    if mode.uses_src() {
        keys.src_addr.hash(&mut hasher);
    }
    if mode.uses_dst() {
        keys.dst_addr.hash(&mut hasher);
    }
    if mode.uses_flows() {
        keys.src_addr.hash(&mut hasher);
        keys.dst_addr.hash(&mut hasher);
        keys.src_port.hash(&mut hasher);
        keys.dst_port.hash(&mut hasher);
        keys.ip_proto.hash(&mut hasher);
    }

    let h = hasher.finish();
    let folded = (h >> 32) as u32 ^ h as u32;
    reduce(folded, flows_cnt)
}

/// Multiply-shift reduction of a 32-bit hash into `[0, limit)`.
#[inline]
fn reduce(hash: u32, limit: u32) -> u32 {
    ((u64::from(hash) * u64::from(limit)) >> 32) as u32
}
