//! Structured stats snapshots.
//!
//! Snapshots are plain serialisable values detached from engine state, so
//! callers can ship them to whatever telemetry transport they use.

use serde::Serialize;

/// Per-tin snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TinStats {
    /// Configured rate threshold for this tin, bytes per second.
    pub threshold_rate: u64,
    /// CoDel sojourn target, microseconds.
    pub target_us: u32,
    /// CoDel control interval, microseconds.
    pub interval_us: u32,
    /// Packets accepted into this tin.
    pub sent_packets: u32,
    /// Bytes accepted into this tin.
    pub sent_bytes: u64,
    /// Packets dropped in this tin (AQM and overlimit).
    pub dropped_packets: u32,
    /// Packets ECN-marked in this tin.
    pub ecn_marked_packets: u32,
    /// Current backlog, bytes.
    pub backlog_bytes: u32,
    /// Drops caused by the global buffer budget.
    pub drop_overlimit: u32,
    /// Flows currently in the old rotation; observational.
    pub bulk_flows: u16,
}

/// Whole-engine snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CakeStats {
    /// Number of active tins.
    pub tin_cnt: u16,
    /// Per-tin detail, `tin_cnt` entries.
    pub tins: Vec<TinStats>,
    /// Buffer budget, bytes.
    pub memory_limit: u32,
    /// Bytes of truesize currently held.
    pub memory_used: u32,
    /// Packets currently queued.
    pub qlen: u32,
    /// Bytes currently queued across all tins.
    pub backlog_bytes: u32,
    /// Total packets dropped.
    pub drops: u64,
    /// Dequeue attempts refused by the shaper.
    pub overlimits: u64,
}

/// Per-flow snapshot, for the class walker and tests.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FlowStats {
    /// Current DRR credit.
    pub deficit: i32,
    /// Queued packets.
    pub qlen: u32,
    /// Queued bytes.
    pub backlog_bytes: u32,
    /// Drops charged to this flow since activation.
    pub dropped: u32,
    /// CoDel drop count in the current episode.
    pub codel_count: u32,
    /// Whether the flow is in the dropping state.
    pub dropping: bool,
    /// Signed delta from now to the next scheduled drop, nanoseconds.
    pub drop_next_delta_ns: i64,
}
