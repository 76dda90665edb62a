//! Property tests for the scheduling engine.
//!
//! Random workloads over random valid configurations must preserve the
//! engine's accounting invariants at every observation point.

use cake_core::config::{CakeConfig, DiffservMode, FlowMode};
use cake_core::packet::{FlowKeys, L3Proto, Packet};
use cake_core::time::ManualClock;
use cake_sched::{CakeSched, DEFAULT_FLOWS_CNT, MAX_TINS};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Enqueue {
        len: u32,
        port: u16,
        dscp: u8,
        ecn: u8,
    },
    Dequeue,
    DropOne,
    Advance(u64),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (64u32..1514, 0u16..6, 0u8..64, 0u8..4).prop_map(|(len, port, dscp, ecn)| {
            Op::Enqueue { len, port, dscp, ecn }
        }),
        3 => Just(Op::Dequeue),
        1 => Just(Op::DropOne),
        2 => (0u64..5_000_000u64).prop_map(Op::Advance),
    ]
}

fn config_strategy() -> impl Strategy<Value = CakeConfig> {
    (
        prop_oneof![
            Just(DiffservMode::BestEffort),
            Just(DiffservMode::Precedence),
            Just(DiffservMode::Diffserv8),
            Just(DiffservMode::Diffserv4),
        ],
        prop_oneof![
            Just(FlowMode::None),
            Just(FlowMode::SrcIp),
            Just(FlowMode::Hosts),
            Just(FlowMode::Flows),
            Just(FlowMode::Dual),
        ],
        prop_oneof![Just(0u64), Just(125_000), Just(1_250_000), Just(12_500_000)],
        prop_oneof![Just(0u32), Just(65_536), Just(262_144)],
        any::<bool>(),
        -20i32..64,
    )
        .prop_map(
            |(diffserv_mode, flow_mode, base_rate, memory_limit, atm, overhead)| CakeConfig {
                base_rate,
                diffserv_mode,
                flow_mode,
                atm,
                overhead,
                memory_limit,
                ..Default::default()
            },
        )
}

fn make_packet(len: u32, port: u16, dscp: u8, ecn: u8) -> Packet {
    Packet::new(len, L3Proto::Ipv4)
        .with_dscp(dscp)
        .with_ecn(ecn)
        .with_keys(FlowKeys {
            src_addr: 0x0a00_0001,
            dst_addr: 0x0a00_0002,
            src_port: 7_000 + port,
            dst_port: 443,
            ip_proto: 6,
        })
}

/// Per-tin backlog equals the sum of its flow backlogs, and the reported
/// backlog equals the sum over tins.
fn check_accounting(sched: &CakeSched<ManualClock>) {
    let stats = sched.dump_stats();
    let mut total: u64 = 0;
    for (t, tin_stats) in stats.tins.iter().enumerate() {
        let mut tin_sum: u64 = 0;
        for idx in 0..DEFAULT_FLOWS_CNT as usize {
            let f = sched.flow_stats(t, idx).expect("flow exists");
            tin_sum += u64::from(f.backlog_bytes);
        }
        assert_eq!(
            tin_sum,
            u64::from(tin_stats.backlog_bytes),
            "tin {t} backlog out of sync with its flows"
        );
        total += tin_sum;
    }
    assert_eq!(
        total,
        u64::from(stats.backlog_bytes),
        "reported backlog out of sync with tins"
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_accounting_conservation(
        cfg in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..120),
    ) {
        let clock = ManualClock::new(1_000_000);
        let mut sched = CakeSched::with_clock(&cfg, clock.clone()).unwrap();

        for op in ops {
            match op {
                Op::Enqueue { len, port, dscp, ecn } => {
                    sched.enqueue(make_packet(len, port, dscp, ecn)).unwrap();
                    prop_assert!(sched.buffer_used() <= sched.buffer_limit(),
                        "buffer bound violated after enqueue");
                }
                Op::Dequeue => { let _ = sched.dequeue(); }
                Op::DropOne => { let _ = sched.drop_one(); }
                Op::Advance(ns) => clock.advance(ns),
            }
        }
        check_accounting(&sched);
    }

    #[test]
    fn prop_no_lost_packets(
        cfg in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..120),
    ) {
        let clock = ManualClock::new(1_000_000);
        let mut sched = CakeSched::with_clock(&cfg, clock.clone()).unwrap();

        let mut enqueued: u64 = 0;
        let mut emitted: u64 = 0;

        for op in ops {
            match op {
                Op::Enqueue { len, port, dscp, ecn } => {
                    sched.enqueue(make_packet(len, port, dscp, ecn)).unwrap();
                    enqueued += 1;
                }
                Op::Dequeue => {
                    if sched.dequeue().is_some() {
                        emitted += 1;
                    }
                }
                Op::DropOne => { let _ = sched.drop_one(); }
                Op::Advance(ns) => clock.advance(ns),
            }
        }

        // drain what remains, stepping the clock past any shaper deadline
        loop {
            match sched.dequeue() {
                Some(_) => emitted += 1,
                None => match sched.next_wakeup() {
                    Some(deadline) => clock.set(deadline),
                    None => break,
                },
            }
        }

        let stats = sched.dump_stats();
        prop_assert_eq!(sched.qlen(), 0);
        prop_assert_eq!(
            enqueued,
            emitted + stats.drops,
            "every accepted packet must be transmitted or counted dropped"
        );
    }

    #[test]
    fn prop_fifo_within_flow(
        cfg in config_strategy(),
        lens in prop::collection::vec(64u32..1514, 1..80),
    ) {
        let clock = ManualClock::new(1_000_000);
        let mut sched = CakeSched::with_clock(&cfg, clock.clone()).unwrap();

        // one flow, same codepoint: ids must come out strictly increasing
        for len in lens {
            sched.enqueue(make_packet(len, 0, 0, 0)).unwrap();
        }

        let mut last_id = 0u64;
        loop {
            match sched.dequeue() {
                Some(pkt) => {
                    prop_assert!(pkt.id > last_id, "per-flow FIFO violated");
                    last_id = pkt.id;
                }
                None => match sched.next_wakeup() {
                    Some(deadline) => clock.set(deadline),
                    None => break,
                },
            }
        }
    }

    #[test]
    fn prop_reset_restores_fresh_state(
        cfg in config_strategy(),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let clock = ManualClock::new(1_000_000);
        let mut sched = CakeSched::with_clock(&cfg, clock.clone()).unwrap();

        for op in ops {
            match op {
                Op::Enqueue { len, port, dscp, ecn } => {
                    sched.enqueue(make_packet(len, port, dscp, ecn)).unwrap();
                }
                Op::Dequeue => { let _ = sched.dequeue(); }
                Op::DropOne => { let _ = sched.drop_one(); }
                Op::Advance(ns) => clock.advance(ns),
            }
        }

        sched.reset();

        let stats = sched.dump_stats();
        prop_assert_eq!(sched.qlen(), 0);
        prop_assert_eq!(sched.buffer_used(), 0);
        prop_assert_eq!(stats.backlog_bytes, 0);
        prop_assert_eq!(stats.drops, 0);
        for tin_stats in &stats.tins {
            prop_assert_eq!(tin_stats.sent_packets, 0);
            prop_assert_eq!(tin_stats.backlog_bytes, 0);
        }
        for t in 0..MAX_TINS {
            for idx in 0..DEFAULT_FLOWS_CNT as usize {
                let f = sched.flow_stats(t, idx).unwrap();
                prop_assert_eq!(f.qlen, 0);
                prop_assert_eq!(f.backlog_bytes, 0);
            }
        }

        // still behaves like a fresh engine
        sched.enqueue(make_packet(1_000, 0, 0, 0)).unwrap();
        let mut got = false;
        loop {
            match sched.dequeue() {
                Some(_) => { got = true; break; }
                None => match sched.next_wakeup() {
                    Some(deadline) => clock.set(deadline),
                    None => break,
                },
            }
        }
        prop_assert!(got);
    }
}
