use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use crate::types::RecordId;

/// Due-time ordered ready queue shared by all workers.
///
/// Entries are ordered by due time, then by admission sequence. An entry may be
/// stale (its record was cancelled or purged); callers re-check the record
/// before acting on an id.
#[derive(Debug, Default)]
pub struct Schedule {
    heap: Mutex<BinaryHeap<Reverse<(Instant, u64, RecordId)>>>,
    sequence: AtomicU64,
    notify: Notify,
}

impl Schedule {
    pub fn push(&self, due: Instant, id: RecordId) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.heap.lock().push(Reverse((due, sequence, id)));
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    /// Wait until the earliest entry is due and take it.
    ///
    /// Cancel safe: an entry is only removed when this future completes.
    pub async fn next_due(&self) -> RecordId {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut heap = self.heap.lock();
                match heap.peek().copied() {
                    Some(Reverse((due, _, id))) if due <= Instant::now() => {
                        heap.pop();
                        if !heap.is_empty() {
                            // Let another idle worker recompute its deadline.
                            self.notify.notify_one();
                        }
                        return id;
                    }
                    Some(Reverse((due, ..))) => Some(due),
                    None => None,
                }
            };

            match wake_at {
                Some(due) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(due) => {}
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_due_order_then_admission_order() {
        let schedule = Schedule::default();
        let now = Instant::now();
        let (a, b, c) = (RecordId::generate(), RecordId::generate(), RecordId::generate());

        schedule.push(now + Duration::from_secs(5), a);
        schedule.push(now, b);
        schedule.push(now, c);

        assert_eq!(schedule.next_due().await, b);
        assert_eq!(schedule.next_due().await, c);
        assert_eq!(schedule.len(), 1);

        assert_eq!(schedule.next_due().await, a);
        assert!(Instant::now() >= now + Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_yet_due_entry_is_not_returned_early() {
        let schedule = Schedule::default();
        schedule.push(Instant::now() + Duration::from_secs(60), RecordId::generate());

        let early = tokio::time::timeout(Duration::from_secs(30), schedule.next_due()).await;
        assert!(early.is_err());
        assert_eq!(schedule.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_wakes_on_earlier_push() {
        let schedule = std::sync::Arc::new(Schedule::default());
        schedule.push(Instant::now() + Duration::from_secs(600), RecordId::generate());

        let waiter = {
            let schedule = schedule.clone();
            tokio::spawn(async move { schedule.next_due().await })
        };
        tokio::task::yield_now().await;

        let urgent = RecordId::generate();
        schedule.push(Instant::now(), urgent);

        let got = tokio::time::timeout(Duration::from_secs(1), waiter).await;
        assert!(matches!(got, Ok(Ok(id)) if id == urgent));
    }
}
