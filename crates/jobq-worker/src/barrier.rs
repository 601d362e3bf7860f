use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BarrierError {
    /// An `exit` without a matching `enter` pushed the counter positive.
    #[error("unbalanced exit pushed the in-flight counter positive ({0})")]
    Unbalanced(i64),

    #[error("timed out waiting for in-flight operations")]
    Timeout,
}

/// Tracks a net count of in-flight operations and lets callers wait until
/// none remain.
///
/// The counter starts at 0; `enter` decrements it when an operation begins
/// and `exit` increments it when one ends. Under balanced usage the counter
/// never rises above 0. When it returns to 0, every queued waiter is
/// released at once, in FIFO order.
pub struct QuiescenceBarrier {
    inner: Mutex<Inner>,
}

struct Inner {
    value: i64,
    next_waiter: u64,
    waiters: VecDeque<(u64, oneshot::Sender<()>)>,
}

impl QuiescenceBarrier {
    pub fn new() -> Self {
        QuiescenceBarrier {
            inner: Mutex::new(Inner {
                value: 0,
                next_waiter: 0,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Mark one more operation in flight.
    pub fn enter(&self) {
        let mut inner = self.inner.lock();
        inner.value -= 1;
    }

    /// Mark one operation done. Reaching 0 releases every queued waiter;
    /// overshooting 0 means the enter/exit pairs are unbalanced.
    pub fn exit(&self) -> Result<(), BarrierError> {
        let mut inner = self.inner.lock();
        inner.value += 1;
        match inner.value.cmp(&0) {
            Ordering::Less => Ok(()),
            Ordering::Equal => {
                let waiters = std::mem::take(&mut inner.waiters);
                drop(inner);
                for (_, waiter) in waiters {
                    // a receiver gone through its own timeout is fine
                    let _ = waiter.send(());
                }
                Ok(())
            }
            Ordering::Greater => Err(BarrierError::Unbalanced(inner.value)),
        }
    }

    /// Net counter value; 0 when idle, negative while operations are in
    /// flight.
    pub fn value(&self) -> i64 {
        self.inner.lock().value
    }

    /// Number of operations currently in flight.
    pub fn in_flight(&self) -> usize {
        let value = self.value();
        if value < 0 {
            -value as usize
        } else {
            0
        }
    }

    /// Wait until every in-flight operation has exited.
    ///
    /// Resolves immediately when nothing is in flight. A positive counter is
    /// the same consistency violation `exit` reports and fails immediately.
    /// With a timeout, an expired waiter removes itself from the queue and
    /// can no longer be resolved by a later release.
    pub async fn wait_all_done(&self, timeout: Option<Duration>) -> Result<(), BarrierError> {
        let (id, waiter) = {
            let mut inner = self.inner.lock();
            match inner.value.cmp(&0) {
                Ordering::Equal => return Ok(()),
                Ordering::Greater => return Err(BarrierError::Unbalanced(inner.value)),
                Ordering::Less => {
                    let (tx, rx) = oneshot::channel();
                    let id = inner.next_waiter;
                    inner.next_waiter += 1;
                    inner.waiters.push_back((id, tx));
                    (id, rx)
                }
            }
        };

        match timeout {
            None => {
                // the sender only drops once this waiter has been released
                // or removed, so a recv error still means "done"
                let _ = waiter.await;
                Ok(())
            }
            Some(limit) => match tokio::time::timeout(limit, waiter).await {
                Ok(_) => Ok(()),
                Err(_) => {
                    let mut inner = self.inner.lock();
                    inner.waiters.retain(|(waiter_id, _)| *waiter_id != id);
                    Err(BarrierError::Timeout)
                }
            },
        }
    }
}

impl Default for QuiescenceBarrier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_resolves_immediately_when_idle() {
        let barrier = QuiescenceBarrier::new();
        barrier.wait_all_done(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_released_when_count_returns_to_zero() {
        let barrier = Arc::new(QuiescenceBarrier::new());
        barrier.enter();
        barrier.enter();
        assert_eq!(barrier.value(), -2);

        let waiting = barrier.clone();
        let handle =
            tokio::spawn(async move { waiting.wait_all_done(None).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.exit().unwrap();
        assert!(!handle.is_finished());

        barrier.exit().unwrap();
        handle.await.unwrap().unwrap();
        assert_eq!(barrier.value(), 0);
    }

    #[tokio::test]
    async fn test_multiple_waiters_all_released_once() {
        let barrier = Arc::new(QuiescenceBarrier::new());
        barrier.enter();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let waiting = barrier.clone();
            handles.push(tokio::spawn(async move {
                waiting.wait_all_done(None).await
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.exit().unwrap();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn test_unbalanced_exit_is_reported() {
        let barrier = QuiescenceBarrier::new();
        assert_eq!(barrier.exit(), Err(BarrierError::Unbalanced(1)));
        // a waiter arriving afterwards sees the same violation
        assert_eq!(
            barrier.wait_all_done(None).await,
            Err(BarrierError::Unbalanced(1))
        );
    }

    #[tokio::test]
    async fn test_wait_timeout_removes_waiter() {
        let barrier = Arc::new(QuiescenceBarrier::new());
        barrier.enter();

        let result = barrier
            .wait_all_done(Some(Duration::from_millis(10)))
            .await;
        assert_eq!(result, Err(BarrierError::Timeout));

        // the expired waiter is gone; the release has nobody to wake and
        // the barrier stays consistent
        barrier.exit().unwrap();
        assert_eq!(barrier.value(), 0);
        barrier.wait_all_done(None).await.unwrap();
    }

    proptest! {
        #[test]
        fn prop_balanced_batches_return_to_zero(batches in proptest::collection::vec(1usize..20, 0..10)) {
            let barrier = QuiescenceBarrier::new();
            for batch in &batches {
                for _ in 0..*batch {
                    barrier.enter();
                }
                prop_assert!(barrier.value() < 0);
                for _ in 0..*batch {
                    prop_assert_eq!(barrier.exit(), Ok(()));
                    prop_assert!(barrier.value() <= 0);
                }
            }
            prop_assert_eq!(barrier.value(), 0);
        }
    }
}
