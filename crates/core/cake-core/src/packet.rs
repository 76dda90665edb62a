//! Packet metadata model.
//!
//! The engine schedules packets, it does not parse them: header dissection
//! happens upstream and arrives here as pre-extracted fields. A `Packet`
//! therefore carries lengths, the TOS/TC byte, flow keys and an optional
//! GSO marker, but no payload.

use serde::{Deserialize, Serialize};

/// ECN bits within the TOS/TC byte.
const ECN_MASK: u8 = 0x03;
const ECN_NOT_ECT: u8 = 0x00;
const ECN_CE: u8 = 0x03;

/// L3 protocol of the packet, as hinted by the dissector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum L3Proto {
    Ipv4,
    Ipv6,
    /// Anything without a Diffserv field; treated as bulk best-effort.
    Other,
}

/// Pre-dissected flow identity.
///
/// Addresses are carried as 128-bit words so IPv4 and IPv6 share one
/// representation; an IPv4 address occupies the low 32 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlowKeys {
    pub src_addr: u128,
    pub dst_addr: u128,
    pub src_port: u16,
    pub dst_port: u16,
    pub ip_proto: u8,
}

/// A scheduled unit of traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Engine-assigned id, monotonically increasing per enqueue.
    pub id: u64,
    /// Wire length in bytes, before framing overhead.
    pub len: u32,
    /// Memory-accounting footprint in bytes.
    pub truesize: u32,
    /// L3 protocol hint from the dissector.
    pub proto: L3Proto,
    /// TOS/TC byte: DSCP in the upper six bits, ECN in the lower two.
    pub tos: u8,
    /// Flow identity for hashing.
    pub keys: FlowKeys,
    /// Segment size of a GSO aggregate; `None` for ordinary packets.
    pub gso_mss: Option<u16>,
    /// Timestamp set by the engine when the packet joins a queue.
    pub enqueue_time: u64,
}

impl Packet {
    /// A plain packet; truesize defaults to the wire length plus a fixed
    /// metadata estimate.
    pub fn new(len: u32, proto: L3Proto) -> Self {
        Self {
            id: 0,
            len,
            truesize: len + 64,
            proto,
            tos: 0,
            keys: FlowKeys::default(),
            gso_mss: None,
            enqueue_time: 0,
        }
    }

    /// Set the TOS/TC byte.
    pub fn with_tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    /// Set the DSCP field, leaving ECN untouched.
    pub fn with_dscp(mut self, dscp: u8) -> Self {
        self.tos = (dscp << 2) | (self.tos & ECN_MASK);
        self
    }

    /// Set the ECN field, leaving DSCP untouched.
    pub fn with_ecn(mut self, ecn: u8) -> Self {
        self.tos = (self.tos & !ECN_MASK) | (ecn & ECN_MASK);
        self
    }

    /// Set the flow identity.
    pub fn with_keys(mut self, keys: FlowKeys) -> Self {
        self.keys = keys;
        self
    }

    /// Set the memory-accounting footprint.
    pub fn with_truesize(mut self, truesize: u32) -> Self {
        self.truesize = truesize;
        self
    }

    /// Mark as a GSO aggregate with the given segment size.
    pub fn with_gso_mss(mut self, mss: u16) -> Self {
        self.gso_mss = Some(mss);
        self
    }

    /// The 6-bit Diffserv codepoint; 0 for non-IP packets.
    pub fn dscp(&self) -> u8 {
        match self.proto {
            L3Proto::Ipv4 | L3Proto::Ipv6 => self.tos >> 2,
            L3Proto::Other => 0,
        }
    }

    /// ECN bits of the TOS byte.
    pub fn ecn(&self) -> u8 {
        self.tos & ECN_MASK
    }

    /// Zero the DSCP bits, preserving ECN. No-op for non-IP packets.
    pub fn wash(&mut self) {
        if matches!(self.proto, L3Proto::Ipv4 | L3Proto::Ipv6) {
            self.tos &= ECN_MASK;
        }
    }

    /// Try to mark Congestion Experienced instead of dropping.
    ///
    /// Returns true when the packet is ECN-capable (or already CE); returns
    /// false for Not-ECT and non-IP packets, in which case the caller drops.
    pub fn try_ecn_mark(&mut self) -> bool {
        if !matches!(self.proto, L3Proto::Ipv4 | L3Proto::Ipv6) {
            return false;
        }
        match self.ecn() {
            ECN_NOT_ECT => false,
            ECN_CE => true,
            _ => {
                self.tos |= ECN_CE;
                true
            }
        }
    }

    /// True when this packet is an unsegmented GSO aggregate.
    pub fn is_gso(&self) -> bool {
        self.gso_mss.is_some()
    }

    /// Split a GSO aggregate into MSS-sized segments.
    ///
    /// Lengths are `mss` for every segment except a possibly shorter tail;
    /// truesize is split evenly with the remainder on the tail so the sum is
    /// conserved. Returns `None` when the marker is invalid (zero MSS),
    /// which is the caller's reshape-failure path.
    pub fn gso_segments(&self) -> Option<Vec<Packet>> {
        let mss = u32::from(self.gso_mss?);
        if mss == 0 || self.len == 0 {
            return None;
        }

        let nsegs = (self.len + mss - 1) / mss;
        let base_truesize = self.truesize / nsegs;
        let mut segs = Vec::with_capacity(nsegs as usize);
        let mut remaining = self.len;
        for i in 0..nsegs {
            let seg_len = remaining.min(mss);
            remaining -= seg_len;
            let truesize = if i == nsegs - 1 {
                self.truesize - base_truesize * (nsegs - 1)
            } else {
                base_truesize
            };
            segs.push(Packet {
                id: self.id,
                len: seg_len,
                truesize,
                proto: self.proto,
                tos: self.tos,
                keys: self.keys,
                gso_mss: None,
                enqueue_time: 0,
            });
        }
        Some(segs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dscp_extraction() {
        let pkt = Packet::new(100, L3Proto::Ipv4).with_dscp(0x2e);
        assert_eq!(pkt.dscp(), 0x2e);
        assert_eq!(pkt.tos, 0x2e << 2);

        let other = Packet::new(100, L3Proto::Other).with_tos(0xff);
        assert_eq!(other.dscp(), 0);
    }

    #[test]
    fn test_wash_preserves_ecn() {
        let mut pkt = Packet::new(100, L3Proto::Ipv4).with_dscp(0x2e).with_ecn(0x01);
        pkt.wash();
        assert_eq!(pkt.dscp(), 0);
        assert_eq!(pkt.ecn(), 0x01);
    }

    #[test]
    fn test_wash_ignores_non_ip() {
        let mut pkt = Packet::new(100, L3Proto::Other).with_tos(0xb8);
        pkt.wash();
        assert_eq!(pkt.tos, 0xb8);
    }

    #[test]
    fn test_ecn_mark_transitions() {
        // Not-ECT cannot be marked
        let mut pkt = Packet::new(100, L3Proto::Ipv4);
        assert!(!pkt.try_ecn_mark());
        assert_eq!(pkt.ecn(), 0);

        // ECT(0) -> CE
        let mut pkt = Packet::new(100, L3Proto::Ipv4).with_ecn(0x02);
        assert!(pkt.try_ecn_mark());
        assert_eq!(pkt.ecn(), 0x03);

        // ECT(1) -> CE
        let mut pkt = Packet::new(100, L3Proto::Ipv4).with_ecn(0x01);
        assert!(pkt.try_ecn_mark());
        assert_eq!(pkt.ecn(), 0x03);

        // already CE stays CE, still markable
        assert!(pkt.try_ecn_mark());
        assert_eq!(pkt.ecn(), 0x03);

        // non-IP is never markable
        let mut pkt = Packet::new(100, L3Proto::Other).with_ecn(0x02);
        assert!(!pkt.try_ecn_mark());
    }

    #[test]
    fn test_gso_split_conserves_bytes() {
        let agg = Packet::new(4_000, L3Proto::Ipv4)
            .with_truesize(4_500)
            .with_gso_mss(1_448);
        let segs = agg.gso_segments().unwrap();
        assert_eq!(segs.len(), 3);
        assert_eq!(segs[0].len, 1_448);
        assert_eq!(segs[1].len, 1_448);
        assert_eq!(segs[2].len, 4_000 - 2 * 1_448);
        assert_eq!(segs.iter().map(|s| s.len).sum::<u32>(), 4_000);
        assert_eq!(segs.iter().map(|s| s.truesize).sum::<u32>(), 4_500);
        assert!(segs.iter().all(|s| !s.is_gso()));
    }

    #[test]
    fn test_gso_exact_multiple() {
        let agg = Packet::new(2_896, L3Proto::Ipv6).with_gso_mss(1_448);
        let segs = agg.gso_segments().unwrap();
        assert_eq!(segs.len(), 2);
        assert!(segs.iter().all(|s| s.len == 1_448));
    }

    #[test]
    fn test_gso_invalid_mss() {
        let agg = Packet::new(4_000, L3Proto::Ipv4).with_gso_mss(0);
        assert!(agg.gso_segments().is_none());
        let plain = Packet::new(4_000, L3Proto::Ipv4);
        assert!(plain.gso_segments().is_none());
    }
}
