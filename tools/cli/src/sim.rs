//! Synthetic workload driver.
//!
//! Pushes a fixed packet budget through the engine on a manual clock,
//! retrying throttled dequeues at the armed deadline exactly as a qdisc
//! framework would on watchdog expiry.

use cake_core::config::CakeConfig;
use cake_core::packet::{FlowKeys, L3Proto, Packet};
use cake_core::time::{Clock, ManualClock};
use cake_sched::{CakeSched, CakeStats};
use log::info;

/// Expedited Forwarding, for the latency-sensitive share of the workload.
const DSCP_EF: u8 = 0x2e;

pub struct Workload {
    pub flows: u16,
    pub packets: u64,
    pub len: u32,
    /// Percent of packets sent with an EF codepoint.
    pub priority_share: u8,
}

pub struct Report {
    pub stats: CakeStats,
    pub emitted: u64,
    pub emitted_bytes: u64,
    pub elapsed_ns: u64,
    pub max_sojourn_ns: u64,
}

impl Report {
    pub fn print_summary(&self) {
        let secs = self.elapsed_ns as f64 / 1e9;
        let rate = if secs > 0.0 {
            self.emitted_bytes as f64 / secs
        } else {
            0.0
        };
        println!("emitted:      {} packets / {} bytes", self.emitted, self.emitted_bytes);
        println!("virtual time: {secs:.3} s");
        println!("output rate:  {:.0} bytes/s", rate);
        println!("max sojourn:  {:.3} ms", self.max_sojourn_ns as f64 / 1e6);
        println!("drops:        {}", self.stats.drops);
        println!("overlimits:   {}", self.stats.overlimits);
        for (i, tin) in self.stats.tins.iter().enumerate() {
            println!(
                "tin {i}: rate {:>9} B/s  sent {:>6} pkts  dropped {:>5}  marked {:>5}",
                tin.threshold_rate, tin.sent_packets, tin.dropped_packets, tin.ecn_marked_packets
            );
        }
    }
}

pub fn run_workload(
    cfg: &CakeConfig,
    wl: Workload,
) -> Result<Report, Box<dyn std::error::Error>> {
    let clock = ManualClock::new(1_000_000);
    let mut sched = CakeSched::with_clock(cfg, clock.clone())?;

    info!(
        "workload: {} flows, {} packets of {} bytes, {}% priority",
        wl.flows, wl.packets, wl.len, wl.priority_share
    );

    let mut offered = 0u64;
    let mut emitted = 0u64;
    let mut emitted_bytes = 0u64;
    let mut max_sojourn = 0u64;
    let start = clock.now_ns();

    while offered < wl.packets || sched.qlen() > 0 {
        // top the queue up in small batches, round-robin over flows
        while offered < wl.packets && sched.qlen() < 4 * u32::from(wl.flows) {
            let flow = (offered % u64::from(wl.flows)) as u16;
            let dscp = if (offered % 100) < u64::from(wl.priority_share) {
                DSCP_EF
            } else {
                0
            };
            let pkt = Packet::new(wl.len, L3Proto::Ipv4)
                .with_dscp(dscp)
                .with_keys(FlowKeys {
                    src_addr: 0x0a00_0000 + u128::from(flow),
                    dst_addr: 0x0a00_ffff,
                    src_port: 40_000u16.wrapping_add(flow),
                    dst_port: 443,
                    ip_proto: 17,
                });
            sched.enqueue(pkt)?;
            offered += 1;
        }

        match sched.dequeue() {
            Some(pkt) => {
                emitted += 1;
                emitted_bytes += u64::from(pkt.len);
                max_sojourn = max_sojourn.max(clock.now_ns().wrapping_sub(pkt.enqueue_time));
            }
            None => match sched.next_wakeup() {
                Some(deadline) => clock.set(deadline),
                None => break,
            },
        }
    }

    Ok(Report {
        stats: sched.dump_stats(),
        emitted,
        emitted_bytes,
        elapsed_ns: clock.now_ns().wrapping_sub(start),
        max_sojourn_ns: max_sojourn,
    })
}
