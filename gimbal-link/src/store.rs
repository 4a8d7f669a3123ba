use std::collections::VecDeque;
use std::time::{Duration, Instant};

use autoaim_types::ImuSample;

fn stamp_distance(a: Instant, b: Instant) -> Duration {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

/// Bounded store of parsed IMU samples, newest at the back.
///
/// The parser thread pushes; the capture and fire stages read. Matching a
/// sample to a frame consumes it and discards everything older, so a frame
/// is never paired with a sample an earlier frame already used.
pub(crate) struct SampleStore {
    samples: VecDeque<ImuSample>,
    capacity: usize,
}

impl SampleStore {
    pub(crate) fn new(capacity: usize) -> SampleStore {
        SampleStore {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn push(&mut self, sample: ImuSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub(crate) fn newest(&self) -> Option<ImuSample> {
        self.samples.back().copied()
    }

    /// The newest sample whose stamp is within `freshness` of
    /// `capture_time`, consuming it and discarding all older samples.
    pub(crate) fn take_for_frame(
        &mut self,
        capture_time: Instant,
        freshness: Duration,
    ) -> Option<ImuSample> {
        let pos = self
            .samples
            .iter()
            .rposition(|s| stamp_distance(s.stamp, capture_time) <= freshness)?;
        let sample = self.samples[pos];
        self.samples.drain(..=pos);
        Some(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(stamp: Instant) -> ImuSample {
        ImuSample::zero(stamp)
    }

    #[test]
    fn freshness_boundary_is_inclusive() {
        let t0 = Instant::now();
        let freshness = Duration::from_millis(10);

        let mut store = SampleStore::new(8);
        store.push(sample_at(t0));
        // Exactly 10 ms away: accepted.
        assert!(store
            .take_for_frame(t0 + Duration::from_millis(10), freshness)
            .is_some());

        let mut store = SampleStore::new(8);
        store.push(sample_at(t0));
        // 10 ms + epsilon: rejected.
        assert!(store
            .take_for_frame(t0 + Duration::from_micros(10_001), freshness)
            .is_none());
    }

    #[test]
    fn newest_matching_sample_wins_and_older_are_discarded() {
        let t0 = Instant::now();
        let freshness = Duration::from_millis(10);
        let mut store = SampleStore::new(8);
        for ms in [0u64, 2, 4, 6] {
            store.push(sample_at(t0 + Duration::from_millis(ms)));
        }
        let got = store
            .take_for_frame(t0 + Duration::from_millis(5), freshness)
            .unwrap();
        assert_eq!(got.stamp, t0 + Duration::from_millis(6));
        // Everything up to the match is gone.
        assert!(store.newest().is_none());
    }

    #[test]
    fn stale_samples_do_not_match() {
        let t0 = Instant::now();
        let freshness = Duration::from_millis(10);
        let mut store = SampleStore::new(8);
        store.push(sample_at(t0));
        // Frame captured 50 ms later than the only sample: dropped.
        assert!(store
            .take_for_frame(t0 + Duration::from_millis(50), freshness)
            .is_none());
        // The stale sample stays available to `newest` until overwritten.
        assert!(store.newest().is_some());
    }

    #[test]
    fn store_is_bounded() {
        let t0 = Instant::now();
        let mut store = SampleStore::new(4);
        for i in 0..100u64 {
            store.push(sample_at(t0 + Duration::from_millis(i)));
        }
        assert_eq!(
            store.newest().unwrap().stamp,
            t0 + Duration::from_millis(99)
        );
    }
}
