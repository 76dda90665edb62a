//! Configuration knobs.
//!
//! Deliberately small: everything has sane defaults and complete generality
//! is not a goal. Unknown enum values are rejected at the serde boundary;
//! `validate` catches the rest before a config is applied.

use crate::error::{CakeError, Result};
use serde::{Deserialize, Serialize};

/// How packets are classified into priority tins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffservMode {
    /// Single tin, no prioritisation.
    BestEffort,
    /// Eight tins keyed on the IP precedence bits.
    Precedence,
    /// Eight tins from the full Diffserv codepoint table.
    Diffserv8,
    /// Four pruned classes: background / best-effort / streaming / latency.
    #[default]
    Diffserv4,
}

/// Which header fields contribute to the flow hash.
///
/// The variants form a lattice over {src addr, dst addr, 5-tuple}; the
/// discriminants are the corresponding bit patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum FlowMode {
    /// No hashing; every packet shares flow 0.
    None = 0,
    /// Source address only.
    SrcIp = 1,
    /// Destination address only.
    DstIp = 2,
    /// Source + destination addresses.
    Hosts = 3,
    /// Full 5-tuple.
    #[default]
    Flows = 4,
    /// Source address plus the 5-tuple.
    DualSrc = 5,
    /// Destination address plus the 5-tuple.
    DualDst = 6,
    /// Both addresses plus the 5-tuple.
    Dual = 7,
}

impl FlowMode {
    const SRC_BIT: u8 = 1;
    const DST_BIT: u8 = 2;
    const FLOWS_BIT: u8 = 4;

    /// Raw bit pattern of this mode.
    pub fn bits(self) -> u8 {
        self as u8
    }

    /// Hashing is bypassed entirely.
    pub fn is_none(self) -> bool {
        self == FlowMode::None
    }

    /// The source address contributes to the hash.
    pub fn uses_src(self) -> bool {
        self.bits() & Self::SRC_BIT != 0
    }

    /// The destination address contributes to the hash.
    pub fn uses_dst(self) -> bool {
        self.bits() & Self::DST_BIT != 0
    }

    /// The full 5-tuple contributes to the hash.
    pub fn uses_flows(self) -> bool {
        self.bits() & Self::FLOWS_BIT != 0
    }
}

/// The full parameter set of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CakeConfig {
    /// Global shaper rate in bytes per second; 0 = unlimited.
    pub base_rate: u64,
    /// Classification mode.
    pub diffserv_mode: DiffservMode,
    /// Apply the 53/48 ATM cell tax to effective lengths.
    pub atm: bool,
    /// Flow hashing mode.
    pub flow_mode: FlowMode,
    /// Signed per-packet framing overhead in bytes.
    pub overhead: i32,
    /// CoDel control-loop interval (the path RTT estimate), microseconds.
    pub interval_us: u32,
    /// CoDel sojourn-time target, microseconds.
    pub target_us: u32,
    /// Reserved for ingress rate auto-adjustment; stored but inert.
    pub autorate_ingress: bool,
    /// Zero DSCP bits on egress, preserving ECN.
    pub wash: bool,
    /// Buffer budget override in bytes; 0 derives the budget from the rate.
    pub memory_limit: u32,
    /// Hard queue length limit in packets.
    pub qlen_limit: u32,
}

impl Default for CakeConfig {
    fn default() -> Self {
        Self {
            base_rate: 0,
            diffserv_mode: DiffservMode::default(),
            atm: false,
            flow_mode: FlowMode::default(),
            overhead: 0,
            interval_us: 100_000,
            target_us: 5_000,
            autorate_ingress: false,
            wash: false,
            memory_limit: 0,
            qlen_limit: 10_240,
        }
    }
}

impl CakeConfig {
    /// Check the parameter set before applying it.
    pub fn validate(&self) -> Result<()> {
        if self.qlen_limit == 0 {
            return Err(CakeError::InvalidConfig {
                field: "qlen_limit",
                message: "must be at least 1 packet".into(),
            });
        }
        // An overhead larger than a jumbo frame is a unit mistake.
        if self.overhead.abs() > 9_000 {
            return Err(CakeError::InvalidConfig {
                field: "overhead",
                message: format!("{} bytes is out of range", self.overhead),
            });
        }
        Ok(())
    }

    /// Copy with zero interval/target floored to 1 µs, as applied by the
    /// engine. Zero would make the CoDel control law degenerate.
    pub fn normalized(&self) -> Self {
        let mut cfg = *self;
        if cfg.interval_us == 0 {
            cfg.interval_us = 1;
        }
        if cfg.target_us == 0 {
            cfg.target_us = 1;
        }
        cfg
    }
}
