//! Fixed-point rate arithmetic.
//!
//! Rates are stored as ns-per-byte in fixed point so that the time to put
//! `len` bytes on the wire is a multiply and a shift, never a division on
//! the fast path.

use crate::time::NSEC_PER_SEC;

/// Default interface MTU including the Ethernet header.
pub const MTU: u32 = 1514;

/// Rates below this unwedge in reasonable time even if misconfigured.
const MIN_RATE: u64 = 64;

/// A byte rate encoded for fast transmit-time computation.
///
/// `transmit_time(len) == (len * ns) >> shft`. A rate of zero means
/// unlimited: transmit time is always zero and the shaper never throttles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ByteRate {
    bps: u64,
    ns: u64,
    shft: u16,
    quantum: u16,
}

impl ByteRate {
    /// Unlimited rate (no shaping).
    pub fn unlimited() -> Self {
        Self {
            bps: 0,
            ns: 0,
            shft: 0,
            quantum: MTU as u16,
        }
    }

    /// Encode a byte rate.
    ///
    /// Starts at a 32-bit shift and halves the mantissa until it fits in 32
    /// bits, so precision degrades gracefully for very low rates. The
    /// per-flow DRR quantum is derived here as well: one packet's worth of
    /// credit scaled down at low rates, clamped to [300, 1514].
    pub fn from_bps(rate: u64) -> Self {
        if rate == 0 {
            return Self::unlimited();
        }

        let quantum = (rate >> 12).clamp(300, u64::from(MTU)) as u16;
        let mut shft: u16 = 32;
        let mut ns: u64 = (NSEC_PER_SEC << 32) / rate.max(MIN_RATE);
        while ns >> 32 != 0 {
            ns >>= 1;
            shft -= 1;
        }

        Self {
            bps: rate,
            ns,
            shft,
            quantum,
        }
    }

    /// Configured rate in bytes per second; 0 = unlimited.
    pub fn bps(&self) -> u64 {
        self.bps
    }

    /// True when this rate applies no shaping.
    pub fn is_unlimited(&self) -> bool {
        self.bps == 0
    }

    /// Per-flow DRR quantum in bytes for this rate.
    pub fn quantum(&self) -> u16 {
        self.quantum
    }

    /// Wire time in nanoseconds for `len` bytes at this rate.
    #[inline]
    pub fn transmit_time(&self, len: u32) -> u64 {
        (u64::from(len) * self.ns) >> self.shft
    }
}

/// Effective wire length of a packet: raw length plus framing overhead,
/// then the 53/48 ATM cell tax if enabled.
///
/// The effective length is what gets charged against flow and tin deficits
/// and all shaper accumulators, not the raw byte count.
#[inline]
pub fn effective_len(len: u32, overhead: i32, atm: bool) -> u32 {
    let mut out = (i64::from(len) + i64::from(overhead)).max(0) as u32;
    if atm {
        out = (out + 47) / 48 * 53;
    }
    out
}
