//! Download slots handed out by priority.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::entities::Priority;

struct GateState {
    available: usize,
    // Indexed by `Priority as usize`, highest served first.
    waiters: [VecDeque<oneshot::Sender<GatePermit>>; 3],
}

impl GateState {
    fn pop_waiter(&mut self) -> Option<oneshot::Sender<GatePermit>> {
        self.waiters.iter_mut().rev().find_map(VecDeque::pop_front)
    }
}

/// Semaphore whose waiters are woken highest priority first, FIFO within
/// one priority.
#[derive(Clone)]
pub struct PriorityGate {
    state: Arc<Mutex<GateState>>,
}

/// One download slot. Released on drop.
pub struct GatePermit {
    state: Option<Arc<Mutex<GateState>>>,
}

impl PriorityGate {
    /// Creates a gate with `permits` slots (at least one).
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(GateState {
                available: permits.max(1),
                waiters: Default::default(),
            })),
        }
    }

    /// Waits for a free slot. Dropping the future gives up the place in line.
    ///
    /// Returns `None` only if the gate was torn down while waiting.
    pub async fn acquire(&self, priority: Priority) -> Option<GatePermit> {
        let rx = {
            let mut state = self.state.lock();
            if state.available > 0 {
                state.available -= 1;
                return Some(GatePermit {
                    state: Some(self.state.clone()),
                });
            }
            let (tx, rx) = oneshot::channel();
            state.waiters[priority as usize].push_back(tx);
            rx
        };
        rx.await.ok()
    }

    /// Free slots right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Callers currently waiting, including abandoned ones not yet skipped.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.iter().map(VecDeque::len).sum()
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        let Some(state) = self.state.take() else {
            return;
        };
        loop {
            let tx = {
                let mut guard = state.lock();
                match guard.pop_waiter() {
                    Some(tx) => tx,
                    None => {
                        guard.available += 1;
                        return;
                    }
                }
            };
            let permit = GatePermit {
                state: Some(state.clone()),
            };
            match tx.send(permit) {
                Ok(()) => return,
                // Waiter gave up; defuse and try the next one.
                Err(mut permit) => permit.state = None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn wait_for_waiters(gate: &PriorityGate, count: usize) {
        while gate.waiting() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test]
    async fn test_acquire_within_capacity() {
        let gate = PriorityGate::new(2);
        let a = gate.acquire(Priority::Normal).await;
        let b = gate.acquire(Priority::Normal).await;
        assert!(a.is_some() && b.is_some());
        assert_eq!(gate.available(), 0);

        drop(a);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn test_high_priority_served_first() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(Priority::Normal).await;
        let (tx, mut rx) = mpsc::unbounded_channel();

        for (i, (priority, name)) in [
            (Priority::Low, "low"),
            (Priority::Normal, "normal"),
            (Priority::High, "high"),
        ]
        .into_iter()
        .enumerate()
        {
            let task_gate = gate.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = task_gate.acquire(priority).await;
                tx.send(name).unwrap();
            });
            wait_for_waiters(&gate, i + 1).await;
        }

        drop(held);
        assert_eq!(rx.recv().await, Some("high"));
        assert_eq!(rx.recv().await, Some("normal"));
        assert_eq!(rx.recv().await, Some("low"));
    }

    #[tokio::test]
    async fn test_abandoned_waiter_is_skipped() {
        let gate = PriorityGate::new(1);
        let held = gate.acquire(Priority::Normal).await;

        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.acquire(Priority::High).await.is_some() })
        };
        wait_for_waiters(&gate, 1).await;
        waiter.abort();
        let _ = waiter.await;

        drop(held);
        assert_eq!(gate.available(), 1);
        assert_eq!(gate.waiting(), 0);
    }
}
