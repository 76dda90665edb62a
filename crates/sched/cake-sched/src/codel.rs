//! Controlled-delay AQM, one instance per flow subqueue.
//!
//! Drops (or ECN-marks) from the head of a queue at an increasing rate
//! while per-packet sojourn time stays above a target, using the standard
//! inverse-square-root control law. All time comparisons are on signed
//! differences of monotonic nanosecond stamps.

use cake_core::packet::Packet;
use cake_core::time::{tdiff, time_after, time_after_eq, us_to_ns};
use std::collections::VecDeque;

const REC_INV_SQRT_BITS: u32 = 16;
const REC_INV_SQRT_SHIFT: u32 = 32 - REC_INV_SQRT_BITS;

/// Control-loop parameters shared by every flow in the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodelParams {
    /// Sojourn-time threshold in nanoseconds.
    pub target: u64,
    /// Control-loop interval in nanoseconds; an estimate of the path RTT.
    pub interval: u64,
}

impl Default for CodelParams {
    fn default() -> Self {
        Self {
            target: us_to_ns(5_000),
            interval: us_to_ns(100_000),
        }
    }
}

impl CodelParams {
    /// Parameters from configuration units (microseconds).
    pub fn from_us(target_us: u32, interval_us: u32) -> Self {
        Self {
            target: us_to_ns(target_us),
            interval: us_to_ns(interval_us),
        }
    }
}

/// Per-flow control state.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodelVars {
    /// Drops in the current dropping interval.
    pub count: u32,
    /// `count` at the most recent entry into dropping state.
    pub lastcount: u32,
    /// Currently in the dropping state.
    pub dropping: bool,
    /// 16-bit fixed point of 1/sqrt(count).
    rec_inv_sqrt: u16,
    /// When the sojourn time first exceeded target; 0 = unarmed.
    pub first_above_time: u64,
    /// Absolute time of the next scheduled drop.
    pub drop_next: u64,
    /// Drops since the owner last read and reset this tally.
    pub drop_count: u16,
    /// ECN marks since the owner last read and reset this tally.
    pub ecn_mark: u16,
}

/// Outcome of one AQM-mediated dequeue.
#[derive(Debug, Default)]
pub struct CodelDequeue {
    /// The packet to transmit, if the queue was not drained by drops.
    pub packet: Option<Packet>,
    /// Packets removed by the control law; the caller owns the accounting.
    pub dropped: Vec<Packet>,
}

impl CodelVars {
    /// One Newton iteration refining 1/sqrt(count) in fixed point.
    fn newton_step(&mut self) {
        let invsqrt = u64::from(self.rec_inv_sqrt) << REC_INV_SQRT_SHIFT;
        let invsqrt2 = (invsqrt * invsqrt) >> 32;
        let mut val = (3u64 << 32).saturating_sub(u64::from(self.count) * invsqrt2) >> 2;
        val = (val * invsqrt) >> (32 - 2 + 1);
        self.rec_inv_sqrt = (val >> REC_INV_SQRT_SHIFT) as u16;
    }

    /// Next drop time: `t + interval / sqrt(count)`.
    fn control_law(&self, t: u64, interval: u64) -> u64 {
        t + ((interval * (u64::from(self.rec_inv_sqrt) << REC_INV_SQRT_SHIFT)) >> 32)
    }

    fn reset_rec_inv_sqrt(&mut self) {
        self.rec_inv_sqrt = (!0u32 >> REC_INV_SQRT_SHIFT) as u16;
    }
}

/// Decide whether the head packet is droppable.
///
/// True when its sojourn time is at or above target and either the
/// condition has persisted for a full interval since `first_above_time`
/// was armed, or `force` (memory pressure upstream) is set.
fn should_drop(pkt: &Packet, vars: &mut CodelVars, params: &CodelParams, now: u64, force: bool) -> bool {
    let sojourn = now.wrapping_sub(pkt.enqueue_time);

    if sojourn < params.target {
        vars.first_above_time = 0;
        return false;
    }

    if force {
        return true;
    }

    if vars.first_above_time == 0 {
        // just went above target; arm and give it one interval of grace
        vars.first_above_time = now + params.interval;
        false
    } else {
        time_after(now, vars.first_above_time)
    }
}

/// Run the CoDel state machine against a flow queue and pull one packet.
///
/// Head packets may be ECN-marked or dropped on the way; dropped packets
/// are returned so the caller can update backlog and buffer accounting.
/// `packet` is `None` when the queue was empty or fully drained by drops.
pub fn codel_dequeue(
    vars: &mut CodelVars,
    params: &CodelParams,
    now: u64,
    force: bool,
    queue: &mut VecDeque<Packet>,
) -> CodelDequeue {
    let mut result = CodelDequeue::default();

    let mut pkt = match queue.pop_front() {
        Some(pkt) => pkt,
        None => {
            vars.first_above_time = 0;
            vars.dropping = false;
            return result;
        }
    };

    let mut ok_to_drop = should_drop(&pkt, vars, params, now, force);

    if vars.dropping {
        if !ok_to_drop {
            vars.dropping = false;
        } else if time_after_eq(now, vars.drop_next) {
            while vars.dropping && time_after_eq(now, vars.drop_next) {
                vars.count = vars.count.wrapping_add(1);
                vars.newton_step();

                if pkt.try_ecn_mark() {
                    vars.ecn_mark = vars.ecn_mark.wrapping_add(1);
                    vars.drop_next = vars.control_law(vars.drop_next, params.interval);
                    break;
                }

                result.dropped.push(pkt);
                vars.drop_count = vars.drop_count.wrapping_add(1);

                pkt = match queue.pop_front() {
                    Some(next) => next,
                    None => {
                        vars.dropping = false;
                        vars.first_above_time = 0;
                        return result;
                    }
                };

                ok_to_drop = should_drop(&pkt, vars, params, now, force);
                if !ok_to_drop {
                    vars.dropping = false;
                } else {
                    vars.drop_next = vars.control_law(vars.drop_next, params.interval);
                }
            }
        }
    } else if ok_to_drop {
        if pkt.try_ecn_mark() {
            vars.ecn_mark = vars.ecn_mark.wrapping_add(1);
        } else {
            result.dropped.push(pkt);
            vars.drop_count = vars.drop_count.wrapping_add(1);

            pkt = match queue.pop_front() {
                Some(next) => next,
                None => {
                    // still enter dropping state so a refill resumes the law
                    enter_dropping(vars, params, now);
                    vars.first_above_time = 0;
                    return result;
                }
            };
            should_drop(&pkt, vars, params, now, force);
        }

        enter_dropping(vars, params, now);
    }

    result.packet = Some(pkt);
    result
}

/// Enter the dropping state, smoothing `count` across a recent re-entry so
/// a flow that briefly recovered resumes near its previous drop rate.
fn enter_dropping(vars: &mut CodelVars, params: &CodelParams, now: u64) {
    vars.dropping = true;

    let delta = vars.count.wrapping_sub(vars.lastcount);
    if delta > 1 && tdiff(now, vars.drop_next) < (16 * params.interval) as i64 {
        vars.count = delta;
        vars.newton_step();
    } else {
        vars.count = 1;
        vars.reset_rec_inv_sqrt();
    }
    vars.lastcount = vars.count;
    vars.drop_next = vars.control_law(now, params.interval);
}
