use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(500);

pub type CommitAction = Box<dyn FnOnce() + Send>;

pub struct DebounceScheduler {
    quiet_period: Duration,
    sequence: AtomicU64,
    pending: Mutex<HashMap<&'static str, PendingCommit>>,
}

struct PendingCommit {
    generation: u64,
    handle: JoinHandle<()>,
}

pub type SharedDebounce = Arc<DebounceScheduler>;

pub fn new_debounce_scheduler(quiet_period: Duration) -> SharedDebounce {
    Arc::new(DebounceScheduler {
        quiet_period,
        sequence: AtomicU64::new(0),
        pending: Mutex::new(HashMap::new()),
    })
}

/// Arranges for `action` to run exactly once, one quiet period after the most
/// recent `schedule_commit` call for `group`. A pending commit for the same
/// group is cancelled and replaced, never stacked.
pub fn schedule_commit(scheduler: &SharedDebounce, group: &'static str, action: CommitAction) {
    let generation = scheduler.sequence.fetch_add(1, Ordering::Relaxed);
    let mut pending = scheduler.pending.lock().expect("debounce lock poisoned");
    if let Some(previous) = pending.remove(group) {
        previous.handle.abort();
    }

    let task_scheduler = scheduler.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(task_scheduler.quiet_period).await;
        fire_if_current(&task_scheduler, group, generation, action);
    });
    pending.insert(group, PendingCommit { generation, handle });
}

/// Drops the pending commit for `group` without firing it. Returns whether
/// one was pending.
pub fn cancel_commit(scheduler: &SharedDebounce, group: &'static str) -> bool {
    let mut pending = scheduler.pending.lock().expect("debounce lock poisoned");
    match pending.remove(group) {
        Some(previous) => {
            previous.handle.abort();
            true
        }
        None => false,
    }
}

// The pending-map mutex makes cancel-and-replace atomic with respect to the
// firing timer: a timer that lost its slot observes a newer generation (or an
// empty slot) and must not run its action.
fn fire_if_current(
    scheduler: &SharedDebounce,
    group: &'static str,
    generation: u64,
    action: CommitAction,
) {
    let action = {
        let mut pending = scheduler.pending.lock().expect("debounce lock poisoned");
        match pending.get(group) {
            Some(current) if current.generation == generation => {
                pending.remove(group);
                Some(action)
            }
            _ => None,
        }
    };
    if let Some(action) = action {
        action();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;
    use tokio::time::{sleep, timeout};

    fn counting_action(counter: &Arc<AtomicUsize>) -> CommitAction {
        let counter = counter.clone();
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn fires_once_after_quiet_period_never_before() {
        let scheduler = new_debounce_scheduler(Duration::from_millis(100));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let scheduled_at = Instant::now();
        schedule_commit(
            &scheduler,
            "group",
            Box::new(move || {
                let _ = tx.send(Instant::now());
            }),
        );

        let fired_at = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("commit should fire")
            .expect("sender should be alive");
        assert!(fired_at.duration_since(scheduled_at) >= Duration::from_millis(100));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn rapid_schedules_coalesce_into_last_action() {
        let scheduler = new_debounce_scheduler(Duration::from_millis(80));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for value in ["a", "ab", "abc"] {
            let tx = tx.clone();
            schedule_commit(
                &scheduler,
                "group",
                Box::new(move || {
                    let _ = tx.send(value);
                }),
            );
            sleep(Duration::from_millis(10)).await;
        }
        drop(tx);

        let committed = timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("commit should fire")
            .expect("sender should be alive");
        assert_eq!(committed, "abc");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn cancel_suppresses_pending_commit() {
        let scheduler = new_debounce_scheduler(Duration::from_millis(50));
        let counter = Arc::new(AtomicUsize::new(0));
        schedule_commit(&scheduler, "group", counting_action(&counter));

        assert!(cancel_commit(&scheduler, "group"));
        assert!(!cancel_commit(&scheduler, "group"));

        sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn groups_are_independent() {
        let scheduler = new_debounce_scheduler(Duration::from_millis(50));
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        schedule_commit(&scheduler, "first", counting_action(&first));
        schedule_commit(&scheduler, "second", counting_action(&second));

        sleep(Duration::from_millis(250)).await;
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reschedule_after_fire_runs_again() {
        let scheduler = new_debounce_scheduler(Duration::from_millis(40));
        let counter = Arc::new(AtomicUsize::new(0));

        schedule_commit(&scheduler, "group", counting_action(&counter));
        sleep(Duration::from_millis(150)).await;
        schedule_commit(&scheduler, "group", counting_action(&counter));
        sleep(Duration::from_millis(150)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }
}
