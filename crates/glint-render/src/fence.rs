// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;

/// A monotonically increasing completion counter shared between the CPU and
/// the submission queue.
///
/// A signal with value `v` guarantees that all GPU work submitted before
/// the signal point has retired once `completed_value() >= v`. Values
/// passed to [`signal`](Self::signal) must be strictly increasing.
pub trait CompletionFence {
    /// Enqueue a signal of `value` on the submission queue behind this
    /// fence. The signal lands after all previously submitted batches.
    fn signal(&mut self, value: u64) -> Result<()>;

    /// Latest counter value the GPU has retired. Monotonic non-decreasing
    /// across repeated observations.
    fn completed_value(&self) -> u64;

    /// Block the calling thread until `completed_value() >= value`.
    /// Returns immediately when the value has already been reached.
    ///
    /// There is no timeout and no cancellation: a stuck GPU stalls the
    /// caller indefinitely. The host registers at most one outstanding
    /// wait at a time, which suffices because submission is fully
    /// serialized.
    fn block_until(&mut self, value: u64) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Counter fence where completion advances only when waited on, the
    /// way a real queue retires work some time after submission.
    struct LaggingFence {
        signaled: u64,
        completed: u64,
    }

    impl CompletionFence for LaggingFence {
        fn signal(&mut self, value: u64) -> Result<()> {
            assert!(value > self.signaled, "fence values must increase");
            self.signaled = value;
            Ok(())
        }

        fn completed_value(&self) -> u64 {
            self.completed
        }

        fn block_until(&mut self, value: u64) -> Result<()> {
            if self.completed < value {
                self.completed = value.min(self.signaled);
            }
            Ok(())
        }
    }

    #[test]
    fn completed_value_is_monotonic_and_bounded_by_signals() {
        let mut fence = LaggingFence { signaled: 0, completed: 0 };
        let mut last_seen = 0;
        for value in 1..=5u64 {
            fence.signal(value).unwrap();
            let observed = fence.completed_value();
            assert!(observed >= last_seen);
            assert!(observed <= value);
            last_seen = observed;

            fence.block_until(value).unwrap();
            let observed = fence.completed_value();
            assert!(observed >= last_seen);
            assert!(observed <= value);
            last_seen = observed;
        }
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn block_until_is_noop_once_reached() {
        let mut fence = LaggingFence { signaled: 0, completed: 0 };
        fence.signal(1).unwrap();
        fence.block_until(1).unwrap();
        fence.block_until(1).unwrap();
        assert_eq!(fence.completed_value(), 1);
    }
}
