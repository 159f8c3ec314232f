//! Optimistic local edits with rollback.
//!
//! A new value is shown immediately while the backend write is in flight.
//! If the write fails the value goes back to the snapshot taken when the
//! edit began. Failed writes are not retried.

use std::future::Future;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Committed,
    /// Local value changed, write in flight.
    Pending,
    /// Write failed, value restored to the snapshot.
    Reverted,
}

#[derive(Debug, Clone)]
pub struct Optimistic<T: Clone> {
    value: T,
    snapshot: Option<T>,
    phase: Phase,
}

impl<T: Clone> Optimistic<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            snapshot: None,
            phase: Phase::Committed,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Replace the value outside of any edit cycle (e.g. after a refetch).
    pub fn reset(&mut self, value: T) {
        self.value = value;
        self.snapshot = None;
        self.phase = Phase::Committed;
    }

    /// Committed → Pending. Returns `false` (and changes nothing) if an edit
    /// is already in flight.
    pub fn begin(&mut self, new: T) -> bool {
        if self.phase == Phase::Pending {
            return false;
        }
        self.snapshot = Some(std::mem::replace(&mut self.value, new));
        self.phase = Phase::Pending;
        true
    }

    /// Pending → Committed, keeping the new value.
    pub fn ack(&mut self) {
        if self.phase == Phase::Pending {
            self.snapshot = None;
            self.phase = Phase::Committed;
        }
    }

    /// Pending → Reverted, restoring the snapshot.
    pub fn fail(&mut self) {
        if self.phase == Phase::Pending {
            if let Some(previous) = self.snapshot.take() {
                self.value = previous;
            }
            self.phase = Phase::Reverted;
        }
    }

    /// Reverted → Committed.
    pub fn settle(&mut self) {
        if self.phase == Phase::Reverted {
            self.phase = Phase::Committed;
        }
    }

    /// Show `new`, await `write`, and keep or revert depending on its result.
    /// Ends `Committed` either way; a failure is returned to the caller.
    pub async fn apply<F, E>(&mut self, new: T, write: F) -> Result<(), E>
    where
        F: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if self.phase == Phase::Pending {
            // A manual `begin` was left open; its value becomes the baseline.
            warn!("optimistic edit started while another is pending");
            self.ack();
        }
        self.begin(new);
        match write.await {
            Ok(()) => {
                self.ack();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "write failed, reverting optimistic edit");
                self.fail();
                self.settle();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let mut o = Optimistic::new(10);
        assert!(o.begin(4));
        assert_eq!(o.phase(), Phase::Pending);
        assert_eq!(*o.value(), 4);
        assert!(!o.begin(1));

        o.fail();
        assert_eq!(o.phase(), Phase::Reverted);
        assert_eq!(*o.value(), 10);
        o.settle();
        assert_eq!(o.phase(), Phase::Committed);

        assert!(o.begin(7));
        o.ack();
        assert_eq!(o.phase(), Phase::Committed);
        assert_eq!(*o.value(), 7);
    }

    #[tokio::test]
    async fn test_apply_keeps_value_on_success() {
        let mut o = Optimistic::new(vec![1, 2, 3]);
        o.apply(vec![1, 2], async { Ok::<(), String>(()) })
            .await
            .expect("write succeeds");
        assert_eq!(o.value(), &vec![1, 2]);
        assert_eq!(o.phase(), Phase::Committed);
    }

    #[tokio::test]
    async fn test_apply_rolls_back_on_failure() {
        let mut o = Optimistic::new(12.0_f64);
        let err = o
            .apply(0.0, async { Err::<(), _>("réseau indisponible".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err, "réseau indisponible");
        assert_eq!(*o.value(), 12.0);
        assert_eq!(o.phase(), Phase::Committed);
    }
}
