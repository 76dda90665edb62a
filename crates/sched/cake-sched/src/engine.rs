//! The scheduler proper.
//!
//! `CakeSched` combines the Diffserv classifier, per-tin flow queues with
//! DRR service, per-flow CoDel and the dual-rate shaper behind the
//! enqueue/dequeue contract of a queueing discipline. The surrounding
//! framework serialises all calls; nothing here locks.

use crate::classify;
use crate::codel::{codel_dequeue, CodelParams, CodelVars};
use crate::flow::FlowList;
use crate::hash::flow_hash;
use crate::stats::{CakeStats, FlowStats, TinStats};
use crate::tin::Tin;
use cake_core::config::{CakeConfig, DiffservMode};
use cake_core::error::{CakeError, Result};
use cake_core::packet::{FlowKeys, Packet};
use cake_core::rate::{effective_len, ByteRate, MTU};
use cake_core::time::{tdiff, time_after, time_before, Clock, MonotonicClock};
use log::debug;

/// Upper bound on the number of tins, across all modes.
pub const MAX_TINS: usize = 8;
/// Flow subqueues per tin.
pub const DEFAULT_FLOWS_CNT: u32 = 1024;
/// Flow-table sizing unit; the table stays a multiple of this.
pub const SET_WAYS: u32 = 8;

const _: () = assert!(DEFAULT_FLOWS_CNT % SET_WAYS == 0);

/// Queue-level counters mirrored into stats dumps.
#[derive(Debug, Clone, Copy, Default)]
struct QueueCounters {
    drops: u64,
    overlimits: u64,
    backlog: u32,
}

enum TinOutcome {
    Packet(Packet),
    Restart,
}

/// The CAKE scheduling engine.
///
/// Generic over the clock so tests and simulators can drive virtual time;
/// production uses [`MonotonicClock`].
pub struct CakeSched<C: Clock = MonotonicClock> {
    clock: C,
    config: CakeConfig,

    tins: Vec<Tin>,
    tin_cnt: u16,
    tin_index: [u8; 64],

    /// Global shaper lane.
    rate: ByteRate,
    time_next_packet: u64,

    cparams: CodelParams,

    buffer_used: u32,
    buffer_limit: u32,

    qlen: u32,
    qstats: QueueCounters,

    /// Dequeue cursors, persisted across calls.
    cur_tin: usize,
    cur_flow: usize,

    next_wakeup: Option<u64>,
    next_packet_id: u64,
}

impl CakeSched<MonotonicClock> {
    /// Engine on the OS monotonic clock.
    pub fn new(cfg: &CakeConfig) -> Result<Self> {
        Self::with_clock(cfg, MonotonicClock)
    }
}

impl<C: Clock> CakeSched<C> {
    /// Engine with an explicit clock.
    pub fn with_clock(cfg: &CakeConfig, clock: C) -> Result<Self> {
        cfg.validate()?;

        let mut tins = Vec::with_capacity(MAX_TINS);
        for _ in 0..MAX_TINS {
            tins.push(Tin::new(DEFAULT_FLOWS_CNT, rand::random())?);
        }

        let mut sched = Self {
            clock,
            config: cfg.normalized(),
            tins,
            tin_cnt: 0,
            tin_index: [0; 64],
            rate: ByteRate::unlimited(),
            time_next_packet: 0,
            cparams: CodelParams::default(),
            buffer_used: 0,
            buffer_limit: 0,
            qlen: 0,
            qstats: QueueCounters::default(),
            cur_tin: 0,
            cur_flow: 0,
            next_wakeup: None,
            next_packet_id: 1,
        };
        sched.apply_config();
        Ok(sched)
    }

    /// Accept a packet.
    ///
    /// Classifies, hashes, stamps and appends; splits GSO aggregates into
    /// individual segments for flow isolation and per-packet framing cost.
    /// May shed packets from the fattest flow before returning if the
    /// buffer budget is exceeded. The only error is a failed reshape,
    /// which hands the aggregate back to the caller.
    pub fn enqueue(&mut self, mut pkt: Packet) -> Result<()> {
        let now = self.clock.now_ns();

        let tin = self.classify(&mut pkt);
        let idx = {
            let b = &self.tins[tin];
            flow_hash(&pkt.keys, self.config.flow_mode, b.perturbation, b.flows_cnt()) as usize
        };

        // an idle period must not accumulate into shaper credit
        if self.tins[tin].backlog == 0 {
            if time_before(self.tins[tin].time_next_packet, now) {
                self.tins[tin].time_next_packet = now;
            }
            if self.qlen == 0 && time_before(self.time_next_packet, now) {
                self.time_next_packet = now;
            }
        }

        if pkt.is_gso() {
            let segs = match pkt.gso_segments() {
                Some(segs) => segs,
                None => return Err(CakeError::ReshapeFailed(Box::new(pkt))),
            };
            for mut seg in segs {
                seg.id = self.next_packet_id;
                self.next_packet_id += 1;
                seg.enqueue_time = now;
                self.push_to_flow(tin, idx, seg);
            }
        } else {
            pkt.id = self.next_packet_id;
            self.next_packet_id += 1;
            pkt.enqueue_time = now;
            self.push_to_flow(tin, idx, pkt);
        }

        let b = &mut self.tins[tin];
        if b.flows[idx].is_detached() {
            b.activate(idx as u16);
        }

        if self.buffer_used > self.buffer_limit {
            let mut dropped = 0u32;
            while self.buffer_used > self.buffer_limit {
                if self.drop_one().is_none() {
                    break;
                }
                dropped += 1;
            }
            if dropped > 0 {
                self.tins[tin].drop_overlimit += dropped;
                debug!(
                    "buffer budget exceeded: shed {} packets, {} / {} bytes held",
                    dropped, self.buffer_used, self.buffer_limit
                );
            }
        }

        Ok(())
    }

    /// Pull the next packet to transmit.
    ///
    /// Returns `None` when the queue is empty or the global shaper says
    /// the next permitted transmit time is still in the future; in the
    /// latter case [`Self::next_wakeup`] carries the retry deadline.
    pub fn dequeue(&mut self) -> Option<Packet> {
        let now = self.clock.now_ns();

        loop {
            if self.qlen == 0 {
                self.next_wakeup = None;
                return None;
            }

            // global hard shaper
            if time_after(self.time_next_packet, now) {
                self.qstats.overlimits += 1;
                self.next_wakeup = Some(self.time_next_packet);
                return None;
            }
            self.next_wakeup = None;

            // choose a class: credit and skip tins with spent deficit.
            // A tin still under its own rate gets the high priority
            // weight; one running beyond it only the bandwidth weight.
            loop {
                let tin_cnt = usize::from(self.tin_cnt);
                let b = &mut self.tins[self.cur_tin];
                if b.backlog > 0 && b.deficit > 0 {
                    break;
                }
                if b.deficit <= 0 {
                    let quantum = if time_after(b.time_next_packet, now) {
                        b.quantum_band
                    } else {
                        b.quantum_prio
                    };
                    b.deficit += i32::from(quantum);
                }
                self.cur_tin += 1;
                if self.cur_tin >= tin_cnt {
                    self.cur_tin = 0;
                }
            }

            match self.service_tin(now) {
                TinOutcome::Packet(pkt) => return Some(pkt),
                TinOutcome::Restart => continue,
            }
        }
    }

    /// Serve the flow rotations of the current tin until a packet emerges
    /// or the tin needs to be re-chosen.
    fn service_tin(&mut self, now: u64) -> TinOutcome {
        loop {
            let cur_tin = self.cur_tin;

            let (flow_idx, from_new) = {
                let b = &self.tins[cur_tin];
                if let Some(&i) = b.new_flows.front() {
                    (usize::from(i), true)
                } else if let Some(&i) = b.old_flows.front() {
                    (usize::from(i), false)
                } else {
                    // backlog with no listed flows; resync and re-choose
                    self.tins[cur_tin].backlog = 0;
                    return TinOutcome::Restart;
                }
            };
            self.cur_flow = flow_idx;

            // flow-level DRR: an exhausted flow gets a fresh quantum and
            // goes to the back of the old rotation
            {
                let b = &mut self.tins[cur_tin];
                if b.flows[flow_idx].deficit <= 0 {
                    b.flows[flow_idx].deficit += i32::from(b.quantum);
                    b.rotate_head_to_old(from_new);
                    continue;
                }
            }

            // the AQM decides between transmit, mark and drop; drops on
            // the way are returned for accounting
            let force = self.buffer_used > (self.buffer_limit >> 2) + (self.buffer_limit >> 1);
            let out = {
                let CakeSched { tins, cparams, .. } = self;
                let flow = &mut tins[cur_tin].flows[flow_idx];
                codel_dequeue(&mut flow.cvars, cparams, now, force, &mut flow.queue)
            };

            {
                let CakeSched {
                    tins,
                    qstats,
                    buffer_used,
                    qlen,
                    ..
                } = self;
                let b = &mut tins[cur_tin];
                for p in &out.dropped {
                    b.backlogs[flow_idx] -= p.len;
                    b.backlog -= p.len;
                    qstats.backlog -= p.len;
                    *buffer_used = (*buffer_used).saturating_sub(p.truesize);
                    *qlen -= 1;
                    qstats.drops += 1;
                }
                let drops = u32::from(b.flows[flow_idx].cvars.drop_count);
                let marks = u32::from(b.flows[flow_idx].cvars.ecn_mark);
                b.dropped += drops;
                b.ecn_mark += marks;
                let flow = &mut b.flows[flow_idx];
                flow.dropped = flow.dropped.wrapping_add(drops);
                flow.cvars.drop_count = 0;
                flow.cvars.ecn_mark = 0;
            }

            let pkt = match out.packet {
                Some(pkt) => pkt,
                None => {
                    // the AQM drained this queue; rotate or retire it
                    let b = &mut self.tins[cur_tin];
                    if from_new && !b.old_flows.is_empty() {
                        b.rotate_head_to_old(true);
                    } else {
                        b.detach_head(from_new);
                    }
                    return TinOutcome::Restart;
                }
            };

            // charge the emitted packet: deficits see the effective wire
            // length, accounting sees raw bytes
            let len_eff = effective_len(pkt.len, self.config.overhead, self.config.atm);
            {
                let CakeSched {
                    tins,
                    qstats,
                    buffer_used,
                    qlen,
                    ..
                } = self;
                let b = &mut tins[cur_tin];
                b.backlogs[flow_idx] -= pkt.len;
                b.backlog -= pkt.len;
                qstats.backlog -= pkt.len;
                *buffer_used = (*buffer_used).saturating_sub(pkt.truesize);
                *qlen -= 1;

                b.flows[flow_idx].deficit -= len_eff as i32;
                b.deficit -= len_eff as i32;
            }

            // the selected tin and every lower one pay for the airtime,
            // as does the global shaper
            for b in self.tins[..=cur_tin].iter_mut() {
                let t = b.rate.transmit_time(len_eff);
                b.time_next_packet = b.time_next_packet.wrapping_add(t);
            }
            self.time_next_packet = self
                .time_next_packet
                .wrapping_add(self.rate.transmit_time(len_eff));

            return TinOutcome::Packet(pkt);
        }
    }

    /// Free one packet from the fattest backlogged flow across all tins.
    ///
    /// The victim stays on its rotation even if this empties it; the next
    /// dequeue pass retires it. Returns `(tin << 16) | flow_index`.
    pub fn drop_one(&mut self) -> Option<u32> {
        let mut max_backlog = 0u32;
        let mut victim: Option<(usize, usize)> = None;
        for (t, b) in self.tins[..usize::from(self.tin_cnt)].iter().enumerate() {
            for &i in b.old_flows.iter().chain(b.new_flows.iter()) {
                let backlog = b.backlogs[usize::from(i)];
                if backlog > max_backlog {
                    max_backlog = backlog;
                    victim = Some((t, usize::from(i)));
                }
            }
        }
        let (tin, idx) = victim?;

        let CakeSched {
            tins,
            qstats,
            buffer_used,
            qlen,
            ..
        } = self;
        let b = &mut tins[tin];
        let pkt = b.flows[idx].queue.pop_front()?;
        *buffer_used = (*buffer_used).saturating_sub(pkt.truesize);
        b.backlogs[idx] -= pkt.len;
        b.backlog -= pkt.len;
        qstats.backlog -= pkt.len;
        b.dropped += 1;
        b.flows[idx].dropped += 1;
        qstats.drops += 1;
        *qlen -= 1;

        Some(((tin as u32) << 16) | idx as u32)
    }

    /// Drain everything and return to the state of a freshly built engine
    /// with the same configuration.
    pub fn reset(&mut self) {
        for tin in 0..MAX_TINS {
            self.clear_tin(tin);
        }
        for b in &mut self.tins {
            b.bulk_flow_count = 0;
            b.drop_overlimit = 0;
            b.dropped = 0;
            b.ecn_mark = 0;
            b.packets = 0;
            b.bytes = 0;
            b.deficit = 0;
            b.time_next_packet = 0;
            for f in &mut b.flows {
                f.deficit = 0;
                f.dropped = 0;
                f.cvars = CodelVars::default();
            }
        }
        self.time_next_packet = 0;
        self.buffer_used = 0;
        self.qlen = 0;
        self.qstats = QueueCounters::default();
        self.cur_tin = 0;
        self.cur_flow = 0;
        self.next_wakeup = None;
    }

    /// Apply a new parameter set.
    ///
    /// Queued packets in surviving tins are preserved; tins beyond the new
    /// count are drained through the normal accounting path.
    pub fn reconfigure(&mut self, cfg: &CakeConfig) -> Result<()> {
        cfg.validate()?;
        self.config = cfg.normalized();
        self.apply_config();
        debug!(
            "reconfigured: mode={:?} rate={} B/s flows={:?} buffer_limit={}",
            self.config.diffserv_mode, self.config.base_rate, self.config.flow_mode, self.buffer_limit
        );
        Ok(())
    }

    fn apply_config(&mut self) {
        let cfg = self.config;

        let profile = classify::apply_mode(cfg.diffserv_mode, &mut self.tins, cfg.base_rate);
        self.tin_cnt = profile.tin_cnt;
        self.tin_index = profile.tin_index;

        for tin in usize::from(self.tin_cnt)..MAX_TINS {
            self.clear_tin(tin);
        }
        if self.cur_tin >= usize::from(self.tin_cnt) {
            self.cur_tin = 0;
        }

        self.rate = ByteRate::from_bps(cfg.base_rate);
        self.cparams = CodelParams::from_us(cfg.target_us, cfg.interval_us);

        let mut limit = if cfg.memory_limit != 0 {
            cfg.memory_limit
        } else if cfg.base_rate > 0 {
            // enough for a quarter second of traffic, scaled by the
            // configured control interval
            let t = cfg.base_rate.saturating_mul(u64::from(cfg.interval_us)) / 250_000;
            t.clamp(65_536, u64::from(u32::MAX)) as u32
        } else {
            u32::MAX
        };
        limit = limit.min(cfg.qlen_limit.saturating_mul(MTU).max(cfg.memory_limit));
        self.buffer_limit = limit;
    }

    /// Current configuration; `reconfigure(&config())` is observably a
    /// no-op.
    pub fn config(&self) -> CakeConfig {
        self.config
    }

    /// Structured snapshot of engine and per-tin counters.
    pub fn dump_stats(&self) -> CakeStats {
        CakeStats {
            tin_cnt: self.tin_cnt,
            tins: self.tins[..usize::from(self.tin_cnt)]
                .iter()
                .map(|b| TinStats {
                    threshold_rate: b.rate.bps(),
                    target_us: self.config.target_us,
                    interval_us: self.config.interval_us,
                    sent_packets: b.packets,
                    sent_bytes: b.bytes,
                    dropped_packets: b.dropped,
                    ecn_marked_packets: b.ecn_mark,
                    backlog_bytes: b.backlog,
                    drop_overlimit: b.drop_overlimit,
                    bulk_flows: b.bulk_flow_count,
                })
                .collect(),
            memory_limit: self.buffer_limit,
            memory_used: self.buffer_used,
            qlen: self.qlen,
            backlog_bytes: self.qstats.backlog,
            drops: self.qstats.drops,
            overlimits: self.qstats.overlimits,
        }
    }

    /// Per-flow snapshot for the class walker and tests.
    pub fn flow_stats(&self, tin: usize, flow: usize) -> Option<FlowStats> {
        let b = self.tins.get(tin)?;
        let f = b.flows.get(flow)?;
        Some(FlowStats {
            deficit: f.deficit,
            qlen: f.qlen(),
            backlog_bytes: *b.backlogs.get(flow)?,
            dropped: f.dropped,
            codel_count: f.cvars.count,
            dropping: f.cvars.dropping,
            drop_next_delta_ns: if f.cvars.dropping {
                tdiff(f.cvars.drop_next, self.clock.now_ns())
            } else {
                0
            },
        })
    }

    /// The flow index a given identity maps to in a tin, for observers.
    pub fn flow_index(&self, tin: usize, keys: &FlowKeys) -> Option<u32> {
        let b = self.tins.get(tin)?;
        Some(flow_hash(
            keys,
            self.config.flow_mode,
            b.perturbation,
            b.flows_cnt(),
        ))
    }

    /// Absolute deadline after which a throttled dequeue should be
    /// retried; `None` when the last dequeue made progress or went idle.
    pub fn next_wakeup(&self) -> Option<u64> {
        self.next_wakeup
    }

    /// The (tin, flow) position the dequeue path worked on last, for the
    /// class walker.
    pub fn cursors(&self) -> (usize, usize) {
        (self.cur_tin, self.cur_flow)
    }

    /// Packets currently queued.
    pub fn qlen(&self) -> u32 {
        self.qlen
    }

    /// Bytes currently queued across all tins.
    pub fn backlog_bytes(&self) -> u32 {
        self.qstats.backlog
    }

    /// Bytes of truesize currently held against the buffer budget.
    pub fn buffer_used(&self) -> u32 {
        self.buffer_used
    }

    /// Current buffer budget in bytes.
    pub fn buffer_limit(&self) -> u32 {
        self.buffer_limit
    }

    /// Number of active tins.
    pub fn tin_cnt(&self) -> u16 {
        self.tin_cnt
    }

    /// Map a packet to its tin, applying DSCP wash if configured.
    fn classify(&mut self, pkt: &mut Packet) -> usize {
        if self.config.diffserv_mode != DiffservMode::BestEffort {
            let dscp = pkt.dscp();
            if self.config.wash && dscp != 0 {
                pkt.wash();
            }
            let tin = usize::from(self.tin_index[usize::from(dscp & 0x3f)]);
            if tin >= usize::from(self.tin_cnt) {
                0
            } else {
                tin
            }
        } else {
            if self.config.wash {
                pkt.wash();
            }
            0
        }
    }

    fn push_to_flow(&mut self, tin: usize, idx: usize, pkt: Packet) {
        let CakeSched {
            tins,
            qstats,
            buffer_used,
            qlen,
            ..
        } = self;
        let b = &mut tins[tin];
        b.packets = b.packets.wrapping_add(1);
        b.bytes = b.bytes.wrapping_add(u64::from(pkt.len));
        b.backlogs[idx] += pkt.len;
        b.backlog += pkt.len;
        qstats.backlog += pkt.len;
        *buffer_used += pkt.truesize;
        *qlen += 1;
        b.flows[idx].queue.push_back(pkt);
    }

    /// Discard leftover packets from a tin, through normal accounting.
    fn clear_tin(&mut self, tin: usize) {
        let CakeSched {
            tins,
            qstats,
            buffer_used,
            qlen,
            ..
        } = self;
        let b = &mut tins[tin];
        for idx in 0..b.flows.len() {
            while let Some(pkt) = b.flows[idx].queue.pop_front() {
                b.backlogs[idx] -= pkt.len;
                b.backlog -= pkt.len;
                qstats.backlog -= pkt.len;
                *buffer_used = (*buffer_used).saturating_sub(pkt.truesize);
                *qlen -= 1;
            }
            b.flows[idx].membership = FlowList::Detached;
        }
        b.new_flows.clear();
        b.old_flows.clear();
    }
}
