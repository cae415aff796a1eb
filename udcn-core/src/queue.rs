//! Per-face output queues: three delay classes with pacing (spec.md §4.6).

use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DelayClass {
    Asap,
    Normal,
    Slow,
}

/// Pacing parameters, chosen from the face's transport kind (spec.md §4.6).
#[derive(Debug, Clone, Copy)]
pub struct PacingParams {
    pub burst_max: u32,
    pub burst_nsec_per_kib: u64,
}

impl PacingParams {
    pub const fn local() -> Self {
        Self { burst_max: 2, burst_nsec_per_kib: 100 }
    }
    pub const fn datagram() -> Self {
        Self { burst_max: 2, burst_nsec_per_kib: 500 }
    }
    pub const fn unicast_link() -> Self {
        Self { burst_max: 2, burst_nsec_per_kib: 300 }
    }
    pub const fn multicast() -> Self {
        Self { burst_max: 2, burst_nsec_per_kib: 800 }
    }
    pub const fn tcp() -> Self {
        Self { burst_max: 2, burst_nsec_per_kib: 200 }
    }
}

pub const YIELD_THRESHOLD_NS: u64 = 1_000_000;
pub const PREFERRED_PROVIDER_STREAK_MIN: u32 = 8;
pub const PREFERRED_PROVIDER_STREAK_MAX: u32 = 199;

pub struct FaceQueues {
    queues: [VecDeque<u64>; 3],
    pacing: [PacingParams; 3],
    consecutive_sends: u32,
}

impl FaceQueues {
    pub fn new(pacing: PacingParams) -> Self {
        Self {
            queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
            pacing: [pacing, pacing, pacing],
            consecutive_sends: 0,
        }
    }

    fn index(class: DelayClass) -> usize {
        match class {
            DelayClass::Asap => 0,
            DelayClass::Normal => 1,
            DelayClass::Slow => 2,
        }
    }

    pub fn enqueue(&mut self, class: DelayClass, accession: u64) {
        self.queues[Self::index(class)].push_back(accession);
    }

    pub fn is_empty(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    /// True once the queue has run for 8..199 consecutive items without
    /// starvation (spec.md §4.6); such a queue omits inter-send jitter.
    pub fn is_preferred_provider(&self) -> bool {
        (PREFERRED_PROVIDER_STREAK_MIN..=PREFERRED_PROVIDER_STREAK_MAX).contains(&self.consecutive_sends)
    }

    /// Drains up to `burst_max` items across the three classes (ASAP
    /// drained first, then NORMAL, then SLOW), charging `burst_nsec *
    /// ceil(size/1KiB)` self-imposed cost per send and stopping once the
    /// accrued cost exceeds the 1ms yield threshold.
    pub fn drain_burst(&mut self, size_of: impl Fn(u64) -> usize) -> Vec<u64> {
        let mut sent = Vec::new();
        let mut accrued_ns: u64 = 0;
        let burst_max = self.pacing[0].burst_max.max(self.pacing[1].burst_max).max(self.pacing[2].burst_max);

        'outer: for class_idx in 0..3 {
            while sent.len() < burst_max as usize {
                let Some(accession) = self.queues[class_idx].pop_front() else { break };
                let size = size_of(accession).max(1);
                let kib = (size + 1023) / 1024;
                let cost = self.pacing[class_idx].burst_nsec_per_kib * kib as u64;
                accrued_ns += cost;
                sent.push(accession);
                self.consecutive_sends = self.consecutive_sends.saturating_add(1);
                if accrued_ns > YIELD_THRESHOLD_NS {
                    break 'outer;
                }
            }
        }
        if sent.is_empty() {
            self.consecutive_sends = 0;
        }
        sent
    }

    /// Drains and discards every pending item, for face teardown (spec.md
    /// §4.6). The caller is responsible for cancelling the scheduled
    /// sender.
    pub fn drain_and_cancel(&mut self) {
        for queue in &mut self.queues {
            queue.clear();
        }
        self.consecutive_sends = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asap_drains_before_normal_and_slow() {
        let mut queues = FaceQueues::new(PacingParams { burst_max: 10, burst_nsec_per_kib: 0 });
        queues.enqueue(DelayClass::Slow, 1);
        queues.enqueue(DelayClass::Normal, 2);
        queues.enqueue(DelayClass::Asap, 3);
        let drained = queues.drain_burst(|_| 1);
        assert_eq!(drained, vec![3, 2, 1]);
    }

    #[test]
    fn yield_threshold_stops_the_burst() {
        let mut queues = FaceQueues::new(PacingParams { burst_max: 100, burst_nsec_per_kib: 2_000_000 });
        for i in 0..10 {
            queues.enqueue(DelayClass::Normal, i);
        }
        let drained = queues.drain_burst(|_| 1024);
        assert!(drained.len() < 10);
    }

    #[test]
    fn teardown_drains_every_queue() {
        let mut queues = FaceQueues::new(PacingParams::local());
        queues.enqueue(DelayClass::Asap, 1);
        queues.enqueue(DelayClass::Slow, 2);
        queues.drain_and_cancel();
        assert!(queues.is_empty());
    }
}
