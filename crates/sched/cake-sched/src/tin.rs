//! Per-tin (traffic class) state.
//!
//! A tin owns a fixed table of flow subqueues, the parallel backlog array,
//! the new/old scheduling rotations, its DRR weights and its own shaper
//! lane. Tin count is small so the size of this struct does not matter
//! much; the flow table dominates.

use crate::flow::{Flow, FlowList};
use cake_core::error::{CakeError, Result};
use cake_core::rate::ByteRate;

/// One priority tin.
#[derive(Debug)]
pub struct Tin {
    /// Flow table, direct-mapped by the reduced hash.
    pub flows: Vec<Flow>,
    /// Per-flow backlog in bytes, parallel to `flows`.
    pub backlogs: Vec<u32>,
    /// Hash perturbation seed for this tin.
    pub perturbation: u32,
    /// Per-flow DRR quantum in bytes, derived from the tin rate.
    pub quantum: u16,
    /// Flows currently in the old rotation; observational.
    pub bulk_flow_count: u16,
    /// Packets dropped because the buffer budget was exceeded.
    pub drop_overlimit: u32,

    /// Freshly activated flows, served first.
    pub new_flows: std::collections::VecDeque<u16>,
    /// Flows that have circulated at least once.
    pub old_flows: std::collections::VecDeque<u16>,

    /// This tin's shaper lane: next permitted transmit time.
    pub time_next_packet: u64,
    /// This tin's rate.
    pub rate: ByteRate,

    /// DRR weight credited while the tin is under its bandwidth share.
    pub quantum_prio: u16,
    /// DRR weight credited while the tin is over its bandwidth share.
    pub quantum_band: u16,
    /// Class-level DRR credit.
    pub deficit: i32,
    /// Total queued bytes in this tin.
    pub backlog: u32,

    /// Packets dropped (AQM or overlimit) in this tin.
    pub dropped: u32,
    /// Packets ECN-marked in this tin.
    pub ecn_mark: u32,
    /// Packets accepted into this tin.
    pub packets: u32,
    /// Bytes accepted into this tin.
    pub bytes: u64,
}

impl Tin {
    /// Allocate a tin with `flows_cnt` subqueues.
    ///
    /// Allocation failures surface as errors rather than aborting, since
    /// flow tables are the only sizeable allocation in the engine.
    pub fn new(flows_cnt: u32, perturbation: u32) -> Result<Self> {
        let n = flows_cnt as usize;

        let mut flows = Vec::new();
        flows
            .try_reserve_exact(n)
            .map_err(|_| CakeError::AllocFailed { what: "flow table" })?;
        flows.resize_with(n, Flow::default);

        let mut backlogs = Vec::new();
        backlogs
            .try_reserve_exact(n)
            .map_err(|_| CakeError::AllocFailed {
                what: "backlog table",
            })?;
        backlogs.resize(n, 0);

        Ok(Self {
            flows,
            backlogs,
            perturbation,
            quantum: cake_core::rate::MTU as u16,
            bulk_flow_count: 0,
            drop_overlimit: 0,
            new_flows: std::collections::VecDeque::new(),
            old_flows: std::collections::VecDeque::new(),
            time_next_packet: 0,
            rate: ByteRate::unlimited(),
            quantum_prio: 1,
            quantum_band: 1,
            deficit: 0,
            backlog: 0,
            dropped: 0,
            ecn_mark: 0,
            packets: 0,
            bytes: 0,
        })
    }

    /// Number of flow subqueues.
    pub fn flows_cnt(&self) -> u32 {
        self.flows.len() as u32
    }

    /// Apply a byte rate, re-deriving the per-flow quantum.
    pub fn set_rate(&mut self, bps: u64) {
        self.rate = ByteRate::from_bps(bps);
        self.quantum = self.rate.quantum();
    }

    /// Append a detached flow to the tail of the new rotation, giving it a
    /// fresh quantum of credit.
    pub fn activate(&mut self, idx: u16) {
        debug_assert!(self.flows[idx as usize].is_detached());
        self.new_flows.push_back(idx);
        let flow = &mut self.flows[idx as usize];
        flow.membership = FlowList::New;
        flow.deficit = i32::from(self.quantum);
        flow.dropped = 0;
    }

    /// Move the head of the given rotation to the tail of the old one.
    pub fn rotate_head_to_old(&mut self, from_new: bool) {
        let idx = if from_new {
            self.new_flows.pop_front()
        } else {
            self.old_flows.pop_front()
        };
        if let Some(idx) = idx {
            self.old_flows.push_back(idx);
            self.flows[idx as usize].membership = FlowList::Old;
            if from_new {
                self.bulk_flow_count = self.bulk_flow_count.saturating_add(1);
            }
        }
    }

    /// Remove the head of the given rotation from all lists.
    pub fn detach_head(&mut self, from_new: bool) {
        let idx = if from_new {
            self.new_flows.pop_front()
        } else {
            self.old_flows.pop_front()
        };
        if let Some(idx) = idx {
            self.flows[idx as usize].membership = FlowList::Detached;
            if !from_new {
                self.bulk_flow_count = self.bulk_flow_count.saturating_sub(1);
            }
        }
    }
}
