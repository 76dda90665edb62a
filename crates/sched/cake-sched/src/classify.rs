//! Diffserv classification profiles.
//!
//! The four modes differ only in the codepoint-to-tin map and the
//! rate/weight progression, so they all fill the same tin array shape.
//!
//! Known Diffserv codepoints, RFC 4594 classes and their pruning into the
//! eight- and four-tin layouts follow the deployed convention:
//!
//! Diffserv8 tins: 0 background (CS1), 1 high throughput (AF1x, TOS2),
//! 2 best effort, 3 video streaming (AF4x, AF3x, CS3), 4 low-latency
//! transactions (AF2x, TOS4), 5 interactive shell (CS2, TOS1), 6 minimum
//! latency (EF, VA, CS5, CS4), 7 network control (CS6, CS7).
//!
//! Diffserv4 tins: 0 background (CS1), 1 best effort, 2 streaming media,
//! 3 latency sensitive.

use crate::tin::Tin;
use cake_core::config::DiffservMode;

/// Result of applying a classification mode to the tin array.
#[derive(Debug, Clone, Copy)]
pub struct DiffservProfile {
    /// Number of tins in use.
    pub tin_cnt: u16,
    /// 64-entry codepoint-to-tin map.
    pub tin_index: [u8; 64],
}

/// Fill the tin array for the given mode and base rate, returning the
/// codepoint map. Tins beyond `tin_cnt` are left untouched; the caller
/// drains them.
pub fn apply_mode(mode: DiffservMode, tins: &mut [Tin], base_rate: u64) -> DiffservProfile {
    match mode {
        DiffservMode::BestEffort => config_besteffort(tins, base_rate),
        DiffservMode::Precedence => config_precedence(tins, base_rate),
        DiffservMode::Diffserv8 => config_diffserv8(tins, base_rate),
        DiffservMode::Diffserv4 => config_diffserv4(tins, base_rate),
    }
}

fn config_besteffort(tins: &mut [Tin], rate: u64) -> DiffservProfile {
    let b = &mut tins[0];
    b.set_rate(rate);
    b.quantum_prio = 65_535;
    b.quantum_band = 65_535;

    DiffservProfile {
        tin_cnt: 1,
        tin_index: [0; 64],
    }
}

/// Eight tins keyed on the IP precedence bits, geometric rate and weight
/// progression from tin 0 upward.
fn config_precedence(tins: &mut [Tin], base_rate: u64) -> DiffservProfile {
    let tin_cnt: u16 = 8;
    let mut tin_index = [0u8; 64];
    for (dscp, entry) in tin_index.iter_mut().enumerate() {
        *entry = ((dscp as u8) >> 3).min(tin_cnt as u8 - 1);
    }

    apply_progression(&mut tins[..tin_cnt as usize], base_rate);

    DiffservProfile { tin_cnt, tin_index }
}

fn config_diffserv8(tins: &mut [Tin], base_rate: u64) -> DiffservProfile {
    let tin_cnt: u16 = 8;

    // codepoint to class mapping, best-effort by default
    let mut tin_index = [2u8; 64];
    tin_index[0x08] = 0; // CS1
    tin_index[0x02] = 1; // TOS2
    tin_index[0x18] = 3; // CS3
    tin_index[0x04] = 4; // TOS4
    tin_index[0x01] = 5; // TOS1
    tin_index[0x10] = 5; // CS2
    tin_index[0x20] = 6; // CS4
    tin_index[0x28] = 6; // CS5
    tin_index[0x2c] = 6; // VA
    tin_index[0x2e] = 6; // EF
    tin_index[0x30] = 7; // CS6
    tin_index[0x38] = 7; // CS7
    for i in (2..=6).step_by(2) {
        tin_index[0x08 + i] = 1; // AF1x
        tin_index[0x10 + i] = 4; // AF2x
        tin_index[0x18 + i] = 3; // AF3x
        tin_index[0x20 + i] = 3; // AF4x
    }

    apply_progression(&mut tins[..tin_cnt as usize], base_rate);

    DiffservProfile { tin_cnt, tin_index }
}

fn config_diffserv4(tins: &mut [Tin], base_rate: u64) -> DiffservProfile {
    let tin_cnt: u16 = 4;

    // codepoint to class mapping, best-effort by default
    let mut tin_index = [1u8; 64];
    tin_index[0x08] = 0; // CS1

    tin_index[0x18] = 2; // CS3
    tin_index[0x04] = 2; // TOS4
    tin_index[0x01] = 2; // TOS1
    tin_index[0x10] = 2; // CS2

    tin_index[0x20] = 3; // CS4
    tin_index[0x28] = 3; // CS5
    tin_index[0x2c] = 3; // VA
    tin_index[0x2e] = 3; // EF
    tin_index[0x30] = 3; // CS6
    tin_index[0x38] = 3; // CS7
    for i in (2..=6).step_by(2) {
        tin_index[0x10 + i] = 2; // AF2x
        tin_index[0x18 + i] = 2; // AF3x
        tin_index[0x20 + i] = 2; // AF4x
    }

    // class characteristics
    tins[0].set_rate(base_rate);
    tins[1].set_rate(base_rate - (base_rate >> 4));
    tins[2].set_rate(base_rate - (base_rate >> 2));
    tins[3].set_rate(base_rate >> 2);

    // priority weights
    let quantum: u16 = 256;
    tins[0].quantum_prio = quantum >> 4;
    tins[1].quantum_prio = quantum;
    tins[2].quantum_prio = quantum << 2;
    tins[3].quantum_prio = quantum << 4;

    // bandwidth-sharing weights
    tins[0].quantum_band = quantum >> 4;
    tins[1].quantum_band = (quantum >> 3) + (quantum >> 4);
    tins[2].quantum_band = quantum >> 1;
    tins[3].quantum_band = quantum >> 2;

    DiffservProfile { tin_cnt, tin_index }
}

/// Shared progression of the eight-tin modes: each class runs at 7/8 of
/// the previous rate, with priority weight growing 3/2 per tin and
/// bandwidth weight shrinking 7/8 per tin.
fn apply_progression(tins: &mut [Tin], base_rate: u64) {
    let mut rate = base_rate;
    let mut quantum1: u32 = 256;
    let mut quantum2: u32 = 256;

    for b in tins {
        b.set_rate(rate);
        b.quantum_prio = quantum1.clamp(1, u32::from(u16::MAX)) as u16;
        b.quantum_band = quantum2.clamp(1, u32::from(u16::MAX)) as u16;

        rate = rate * 7 >> 3;
        quantum1 = quantum1 * 3 >> 1;
        quantum2 = quantum2 * 7 >> 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tins() -> Vec<Tin> {
        (0..8u32).map(|i| Tin::new(64, i).unwrap()).collect()
    }

    #[test]
    fn test_besteffort_single_tin() {
        let mut t = tins();
        let p = apply_mode(DiffservMode::BestEffort, &mut t, 1_000_000);
        assert_eq!(p.tin_cnt, 1);
        assert!(p.tin_index.iter().all(|&i| i == 0));
        assert_eq!(t[0].quantum_prio, 65_535);
        assert_eq!(t[0].quantum_band, 65_535);
        assert_eq!(t[0].rate.bps(), 1_000_000);
    }

    #[test]
    fn test_precedence_mapping() {
        let mut t = tins();
        let p = apply_mode(DiffservMode::Precedence, &mut t, 8_000_000);
        assert_eq!(p.tin_cnt, 8);
        assert_eq!(p.tin_index[0x00], 0);
        assert_eq!(p.tin_index[0x07], 0);
        assert_eq!(p.tin_index[0x08], 1);
        assert_eq!(p.tin_index[0x2e], 5);
        assert_eq!(p.tin_index[0x3f], 7);
    }

    #[test]
    fn test_precedence_progression() {
        let mut t = tins();
        apply_mode(DiffservMode::Precedence, &mut t, 8_000_000);
        // rate decays by 7/8 per tin
        assert_eq!(t[0].rate.bps(), 8_000_000);
        assert_eq!(t[1].rate.bps(), 7_000_000);
        assert_eq!(t[2].rate.bps(), 6_125_000);
        // priority weight grows, bandwidth weight shrinks
        assert_eq!(t[0].quantum_prio, 256);
        assert_eq!(t[1].quantum_prio, 384);
        assert_eq!(t[0].quantum_band, 256);
        assert_eq!(t[1].quantum_band, 224);
        // weights never collapse to zero
        assert!(t.iter().all(|b| b.quantum_prio >= 1 && b.quantum_band >= 1));
    }

    #[test]
    fn test_diffserv8_table() {
        let mut t = tins();
        let p = apply_mode(DiffservMode::Diffserv8, &mut t, 1_000_000);
        assert_eq!(p.tin_cnt, 8);
        assert_eq!(p.tin_index[0x08], 0, "CS1 is background");
        assert_eq!(p.tin_index[0x00], 2, "CS0 is best effort");
        assert_eq!(p.tin_index[0x2e], 6, "EF is minimum latency");
        assert_eq!(p.tin_index[0x38], 7, "CS7 is network control");
        assert_eq!(p.tin_index[0x0a], 1, "AF11 is high throughput");
        assert_eq!(p.tin_index[0x12], 4, "AF21 is low-latency transactions");
        assert_eq!(p.tin_index[0x1a], 3, "AF31 is video streaming");
        assert_eq!(p.tin_index[0x22], 3, "AF41 is video streaming");
    }

    #[test]
    fn test_diffserv4_table() {
        let mut t = tins();
        let p = apply_mode(DiffservMode::Diffserv4, &mut t, 1_000_000);
        assert_eq!(p.tin_cnt, 4);
        assert_eq!(p.tin_index[0x08], 0, "CS1 is background");
        assert_eq!(p.tin_index[0x00], 1, "CS0 is best effort");
        assert_eq!(p.tin_index[0x0a], 1, "AF11 stays best effort");
        assert_eq!(p.tin_index[0x12], 2, "AF21 is streaming");
        assert_eq!(p.tin_index[0x2e], 3, "EF is latency sensitive");
        assert_eq!(p.tin_index[0x38], 3, "CS7 is latency sensitive");
    }

    #[test]
    fn test_diffserv4_rates_and_weights() {
        let mut t = tins();
        apply_mode(DiffservMode::Diffserv4, &mut t, 1_600_000);
        assert_eq!(t[0].rate.bps(), 1_600_000);
        assert_eq!(t[1].rate.bps(), 1_500_000);
        assert_eq!(t[2].rate.bps(), 1_200_000);
        assert_eq!(t[3].rate.bps(), 400_000);

        assert_eq!(t[0].quantum_prio, 16);
        assert_eq!(t[1].quantum_prio, 256);
        assert_eq!(t[2].quantum_prio, 1_024);
        assert_eq!(t[3].quantum_prio, 4_096);

        assert_eq!(t[0].quantum_band, 16);
        assert_eq!(t[1].quantum_band, 48);
        assert_eq!(t[2].quantum_band, 128);
        assert_eq!(t[3].quantum_band, 64);
    }
}
