/// 时间同步 (Message synchronization)
///
/// 两路消息按时间戳配对:
/// - Exact:       时间戳完全相同
/// - Approximate: 时间戳之差不超过容差
///
/// 每路缓存最多 `queue_size` 条消息,超出时丢弃时间戳最旧的一条。
/// 配对成功后,两路中被配对的消息及更旧的消息全部移除,因此每对只触发一次;
/// 之后到达的、不晚于已配对时间戳的消息直接丢弃。
use crate::msgs::{Stamped, Time};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// 同步策略
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncPolicy {
    Exact,
    Approximate { tolerance: Duration },
}

impl SyncPolicy {
    pub fn from_params(exact_sync: bool, tolerance_ms: u64) -> Self {
        if exact_sync {
            SyncPolicy::Exact
        } else {
            SyncPolicy::Approximate {
                tolerance: Duration::from_millis(tolerance_ms),
            }
        }
    }

    fn tolerance_nanos(&self) -> u64 {
        match self {
            SyncPolicy::Exact => 0,
            SyncPolicy::Approximate { tolerance } => tolerance.as_nanos().min(u64::MAX as u128) as u64,
        }
    }
}

/// 单路缓存 (按时间戳排序)
struct StampQueue<M> {
    messages: BTreeMap<Time, M>,
    capacity: usize,
    dropped: u64,
    /// 最近一次配对输出的时间戳, 不晚于它的消息直接丢弃
    watermark: Option<Time>,
}

impl<M> StampQueue<M> {
    fn new(capacity: usize) -> Self {
        Self {
            messages: BTreeMap::new(),
            capacity,
            dropped: 0,
            watermark: None,
        }
    }

    /// Buffers `msg`; returns false when it is not newer than the last emitted pair.
    fn push(&mut self, stamp: Time, msg: M) -> bool {
        if self.watermark.is_some_and(|w| stamp <= w) {
            self.dropped += 1;
            return false;
        }
        // 同一时间戳的新消息覆盖旧消息
        self.messages.insert(stamp, msg);
        while self.messages.len() > self.capacity {
            if self.messages.pop_first().is_some() {
                self.dropped += 1;
            }
        }
        true
    }

    /// 容差内最接近的时间戳, 距离相同时取较旧者
    fn closest(&self, stamp: Time, tolerance_nanos: u64) -> Option<Time> {
        let before = self.messages.range(..=stamp).next_back().map(|(t, _)| *t);
        let after = self
            .messages
            .range((std::ops::Bound::Excluded(stamp), std::ops::Bound::Unbounded))
            .next()
            .map(|(t, _)| *t);

        let best = match (before, after) {
            (Some(b), Some(a)) => {
                if stamp.abs_diff_nanos(&b) <= stamp.abs_diff_nanos(&a) {
                    b
                } else {
                    a
                }
            }
            (Some(b), None) => b,
            (None, Some(a)) => a,
            (None, None) => return None,
        };
        (stamp.abs_diff_nanos(&best) <= tolerance_nanos).then_some(best)
    }

    /// 取出 `stamp` 对应的消息, 并清除更旧的消息
    fn take_through(&mut self, stamp: Time) -> Option<M> {
        let newer = self.messages.split_off(&stamp);
        self.messages = newer;
        self.watermark = Some(stamp);
        self.messages.remove(&stamp)
    }

    fn len(&self) -> usize {
        self.messages.len()
    }
}

/// 双路时间同步器
pub struct Synchronizer<A, B> {
    policy: SyncPolicy,
    first: StampQueue<A>,
    second: StampQueue<B>,
    matched: u64,
}

impl<A: Stamped, B: Stamped> Synchronizer<A, B> {
    pub fn new(policy: SyncPolicy, queue_size: usize) -> Self {
        let queue_size = queue_size.max(1);
        Self {
            policy,
            first: StampQueue::new(queue_size),
            second: StampQueue::new(queue_size),
            matched: 0,
        }
    }

    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Adds a message to the first stream; returns the pair it completes, if any.
    pub fn add_first(&mut self, msg: A) -> Option<(A, B)> {
        let stamp = msg.stamp();
        if !self.first.push(stamp, msg) {
            return None;
        }
        let other = self.second.closest(stamp, self.policy.tolerance_nanos())?;
        self.take_pair(stamp, other)
    }

    /// Adds a message to the second stream; returns the pair it completes, if any.
    pub fn add_second(&mut self, msg: B) -> Option<(A, B)> {
        let stamp = msg.stamp();
        if !self.second.push(stamp, msg) {
            return None;
        }
        let other = self.first.closest(stamp, self.policy.tolerance_nanos())?;
        self.take_pair(other, stamp)
    }

    fn take_pair(&mut self, first_stamp: Time, second_stamp: Time) -> Option<(A, B)> {
        // 新消息可能因队列溢出已被丢弃
        if !self.first.messages.contains_key(&first_stamp)
            || !self.second.messages.contains_key(&second_stamp)
        {
            return None;
        }
        let a = self.first.take_through(first_stamp)?;
        let b = self.second.take_through(second_stamp)?;
        self.matched += 1;
        debug!(
            "synchronized pair {} / {} (pending {} / {})",
            first_stamp,
            second_stamp,
            self.first.len(),
            self.second.len()
        );
        Some((a, b))
    }

    pub fn matched_count(&self) -> u64 {
        self.matched
    }

    /// Messages evicted or rejected as late from either queue without being paired.
    pub fn dropped_count(&self) -> u64 {
        self.first.dropped + self.second.dropped
    }

    pub fn pending(&self) -> (usize, usize) {
        (self.first.len(), self.second.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Msg(Time, &'static str);

    impl Stamped for Msg {
        fn stamp(&self) -> Time {
            self.0
        }
    }

    fn t(ms: i64) -> Time {
        Time::from_millis(ms)
    }

    fn approx(ms: u64) -> SyncPolicy {
        SyncPolicy::Approximate {
            tolerance: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_exact_pairs_identical_stamps() {
        let mut sync = Synchronizer::<Msg, Msg>::new(SyncPolicy::Exact, 5);
        assert!(sync.add_first(Msg(t(100), "image")).is_none());
        let (a, b) = sync.add_second(Msg(t(100), "boxes")).unwrap();
        assert_eq!(a, Msg(t(100), "image"));
        assert_eq!(b, Msg(t(100), "boxes"));
        assert_eq!(sync.pending(), (0, 0));
    }

    #[test]
    fn test_exact_rejects_any_offset() {
        let mut sync = Synchronizer::<Msg, Msg>::new(SyncPolicy::Exact, 5);
        assert!(sync.add_first(Msg(Time::new(1, 0), "image")).is_none());
        assert!(sync.add_second(Msg(Time::new(1, 1), "boxes")).is_none());
        assert_eq!(sync.matched_count(), 0);
    }

    #[test]
    fn test_approximate_within_tolerance_fires_once() {
        let mut sync = Synchronizer::<Msg, Msg>::new(approx(50), 5);
        assert!(sync.add_first(Msg(t(100), "image")).is_none());
        assert!(sync.add_second(Msg(t(120), "boxes")).is_some());
        // 同一批消息不会再次配对
        assert!(sync.add_second(Msg(t(121), "late boxes")).is_none());
        assert_eq!(sync.matched_count(), 1);
    }

    #[test]
    fn test_approximate_outside_tolerance_does_not_fire() {
        let mut sync = Synchronizer::<Msg, Msg>::new(approx(50), 5);
        assert!(sync.add_first(Msg(t(100), "image")).is_none());
        assert!(sync.add_second(Msg(t(151), "boxes")).is_none());
        assert_eq!(sync.pending(), (1, 1));
    }

    #[test]
    fn test_approximate_picks_closest() {
        let mut sync = Synchronizer::<Msg, Msg>::new(approx(50), 5);
        sync.add_first(Msg(t(100), "far"));
        sync.add_first(Msg(t(130), "near"));
        let (a, _) = sync.add_second(Msg(t(128), "boxes")).unwrap();
        assert_eq!(a.1, "near");
        // 更旧的未配对消息被清除
        assert_eq!(sync.pending(), (0, 0));
    }

    #[test]
    fn test_matching_evicts_stale_entries() {
        let mut sync = Synchronizer::<Msg, Msg>::new(SyncPolicy::Exact, 5);
        sync.add_first(Msg(t(10), "a"));
        sync.add_first(Msg(t(20), "b"));
        sync.add_first(Msg(t(30), "c"));
        sync.add_second(Msg(t(5), "old boxes"));
        assert!(sync.add_second(Msg(t(20), "boxes")).is_some());
        assert_eq!(sync.pending(), (1, 0));
        assert!(sync.add_second(Msg(t(30), "boxes")).is_some());
    }

    #[test]
    fn test_queue_drops_oldest_when_full() {
        let mut sync = Synchronizer::<Msg, Msg>::new(SyncPolicy::Exact, 2);
        sync.add_first(Msg(t(1), "a"));
        sync.add_first(Msg(t(2), "b"));
        sync.add_first(Msg(t(3), "c"));
        assert_eq!(sync.dropped_count(), 1);
        assert!(sync.add_second(Msg(t(1), "boxes")).is_none());
        assert!(sync.add_second(Msg(t(2), "boxes")).is_some());
    }

    #[test]
    fn test_policy_from_params() {
        assert_eq!(SyncPolicy::from_params(true, 50), SyncPolicy::Exact);
        assert_eq!(SyncPolicy::from_params(false, 50), approx(50));
    }

    #[test]
    fn test_late_messages_behind_emitted_pair_are_dropped() {
        let mut sync = Synchronizer::<Msg, Msg>::new(approx(50), 5);
        sync.add_first(Msg(t(100), "image"));
        assert!(sync.add_second(Msg(t(100), "boxes")).is_some());

        // 比已输出的配对更旧 (或相同) 的消息不再参与配对
        assert!(sync.add_first(Msg(t(90), "late image")).is_none());
        assert!(sync.add_second(Msg(t(95), "late boxes")).is_none());
        assert!(sync.add_second(Msg(t(100), "duplicate boxes")).is_none());
        assert_eq!(sync.pending(), (0, 0));
        assert_eq!(sync.dropped_count(), 3);

        sync.add_first(Msg(t(133), "image"));
        assert!(sync.add_second(Msg(t(130), "boxes")).is_some());
        assert_eq!(sync.matched_count(), 2);
    }
}
