//! Background pollers feeding subscriber callbacks.
//!
//! A [`PollTracker`] owns one fetch loop: every interval it asks the state
//! provider for a fresh snapshot, hands it to the state tracker, and delivers
//! the produced events to subscribers in registration order. The loop starts
//! with the first subscriber and is torn down when the last one leaves, so an
//! idle tracker issues no fetches at all.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TapoError;
use crate::response::child::{SensorEvent, TriggerLogResponse};

/// Polling cadence and duplicate-suppression window for event-log trackers.
#[derive(Debug, Clone, Copy)]
pub struct EventSubscriptionOptions {
    pub polling_interval: Duration,
    pub debounce: Duration,
}

impl Default for EventSubscriptionOptions {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(5000),
            debounce: Duration::from_millis(700),
        }
    }
}

/// Turns a pair of state snapshots into zero or more events.
pub trait StateTracker<S, E>: Send {
    fn process(&mut self, new_state: &S, last_state: Option<&S>) -> Vec<E>;
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Async snapshot source; receives the previous snapshot, if any.
pub type StateProvider<S> =
    Arc<dyn Fn(Option<S>) -> BoxFuture<Result<S, TapoError>> + Send + Sync>;

type Subscriber<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Inner<S, E> {
    provider: StateProvider<S>,
    tracker: Mutex<Box<dyn StateTracker<S, E>>>,
    interval: Duration,
    subscribers: Mutex<Vec<(u64, Subscriber<E>)>>,
    next_id: AtomicU64,
    task: Mutex<Option<JoinHandle<()>>>,
    last_state: Mutex<Option<S>>,
}

/// Handle returned by [`PollTracker::subscribe`]. Callbacks stop before
/// `unsubscribe` returns; delivery and removal share one lock.
pub struct PollSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl PollSubscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

pub struct PollTracker<S, E> {
    inner: Arc<Inner<S, E>>,
}

impl<S, E> PollTracker<S, E>
where
    S: Clone + Send + 'static,
    E: Send + 'static,
{
    pub fn new(
        provider: StateProvider<S>,
        tracker: impl StateTracker<S, E> + 'static,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                tracker: Mutex::new(Box::new(tracker)),
                interval,
                subscribers: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
                task: Mutex::new(None),
                last_state: Mutex::new(None),
            }),
        }
    }

    /// Registers a callback and starts the fetch loop if it was idle.
    pub fn subscribe(&self, callback: impl Fn(&E) + Send + Sync + 'static) -> PollSubscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .push((id, Arc::new(callback)));
        self.ensure_running();

        let inner = Arc::clone(&self.inner);
        PollSubscription {
            cancel: Some(Box::new(move || {
                let mut subscribers = inner.subscribers.lock();
                subscribers.retain(|(sub_id, _)| *sub_id != id);
                if subscribers.is_empty() {
                    if let Some(task) = inner.task.lock().take() {
                        task.abort();
                    }
                }
            })),
        }
    }

    /// Cancels the background loop regardless of subscriber count.
    pub fn stop_tracking(&self) {
        if let Some(task) = self.inner.task.lock().take() {
            task.abort();
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.inner.task.lock().is_some()
    }

    fn ensure_running(&self) {
        let mut task = self.inner.task.lock();
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        *task = Some(tokio::spawn(async move {
            loop {
                if inner.subscribers.lock().is_empty() {
                    break;
                }
                let last = inner.last_state.lock().clone();
                match (inner.provider)(last.clone()).await {
                    Ok(state) => {
                        let events = inner.tracker.lock().process(&state, last.as_ref());
                        *inner.last_state.lock() = Some(state);
                        if !events.is_empty() {
                            debug!(
                                target: "tapo::poll",
                                count = events.len(),
                                "delivering poll events"
                            );
                        }
                        // Delivery happens under the subscriber lock so an
                        // unsubscribe cannot race a callback in flight.
                        let subscribers = inner.subscribers.lock();
                        for event in &events {
                            for (_, subscriber) in subscribers.iter() {
                                subscriber(event);
                            }
                        }
                    }
                    Err(err) => {
                        warn!(target: "tapo::poll", error = %err, "poll fetch failed");
                    }
                }
                tokio::time::sleep(inner.interval).await;
            }
        }));
    }
}

/// Events produced by the child-association tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubDeviceEvent {
    DeviceAdded(String),
    DeviceRemoved(String),
}

/// Diffs consecutive child-id sets.
#[derive(Debug, Default)]
pub struct HubConnectedDeviceTracker;

impl StateTracker<HashSet<String>, HubDeviceEvent> for HubConnectedDeviceTracker {
    fn process(
        &mut self,
        new_state: &HashSet<String>,
        last_state: Option<&HashSet<String>>,
    ) -> Vec<HubDeviceEvent> {
        let empty = HashSet::new();
        let last = last_state.unwrap_or(&empty);
        let mut events: Vec<HubDeviceEvent> = new_state
            .difference(last)
            .cloned()
            .map(HubDeviceEvent::DeviceAdded)
            .collect();
        events.extend(
            last.difference(new_state)
                .cloned()
                .map(HubDeviceEvent::DeviceRemoved),
        );
        events
    }
}

/// Emits fresh trigger-log entries oldest-first, collapsing rapid duplicates.
///
/// The wire reports logs newest-first; entries already seen in the previous
/// page are skipped, and a repeat of the just-emitted event id inside the
/// debounce window is dropped.
pub struct EventLogsStateTracker {
    debounce: Duration,
    last_emitted: Option<(u64, u64)>,
}

impl EventLogsStateTracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            last_emitted: None,
        }
    }
}

impl<E> StateTracker<TriggerLogResponse<E>, E> for EventLogsStateTracker
where
    E: SensorEvent + Clone + Send,
{
    fn process(
        &mut self,
        new_state: &TriggerLogResponse<E>,
        last_state: Option<&TriggerLogResponse<E>>,
    ) -> Vec<E> {
        let known: HashSet<(u64, u64)> = last_state
            .map(|state| {
                state
                    .logs
                    .iter()
                    .map(|e| (e.event_id(), e.timestamp_millis()))
                    .collect()
            })
            .unwrap_or_default();

        let debounce_millis = self.debounce.as_millis() as u64;
        let mut emitted = Vec::new();
        for event in new_state.logs.iter().rev() {
            let stamp = (event.event_id(), event.timestamp_millis());
            if known.contains(&stamp) {
                continue;
            }
            if let Some((last_id, last_ts)) = self.last_emitted {
                let elapsed = event.timestamp_millis().saturating_sub(last_ts);
                if last_id == event.event_id() && elapsed <= debounce_millis {
                    continue;
                }
            }
            self.last_emitted = Some(stamp);
            emitted.push(event.clone());
        }
        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::child::{S200BEvent, S200BEventKind};
    use std::sync::atomic::AtomicUsize;

    fn click(id: u64, timestamp_millis: u64) -> S200BEvent {
        S200BEvent {
            id,
            timestamp_millis,
            kind: S200BEventKind::SingleClick,
        }
    }

    fn page(logs: Vec<S200BEvent>) -> TriggerLogResponse<S200BEvent> {
        TriggerLogResponse {
            start_id: logs.iter().map(|l| l.id).max().unwrap_or(0),
            sum: logs.len() as u64,
            logs,
        }
    }

    #[test]
    fn association_tracker_diffs_sets() {
        let mut tracker = HubConnectedDeviceTracker;
        let first: HashSet<String> = ["a".to_string(), "b".to_string()].into();
        let events = tracker.process(&first, None);
        assert_eq!(events.len(), 2);
        assert!(events.contains(&HubDeviceEvent::DeviceAdded("a".into())));

        let second: HashSet<String> = ["b".to_string(), "c".to_string()].into();
        let mut events = tracker.process(&second, Some(&first));
        events.sort_by_key(|e| format!("{e:?}"));
        assert_eq!(
            events,
            vec![
                HubDeviceEvent::DeviceAdded("c".into()),
                HubDeviceEvent::DeviceRemoved("a".into()),
            ]
        );
    }

    #[test]
    fn debounce_collapses_adjacent_duplicates() {
        let mut tracker = EventLogsStateTracker::new(Duration::from_millis(700));
        // Wire order is newest-first; in time order this is A, A, B, A, C
        // inside one debounce window.
        let state = page(vec![
            click(3, 400), // C
            click(1, 300), // A again
            click(2, 200), // B
            click(1, 100), // A duplicate
            click(1, 50),  // A
        ]);
        let emitted = tracker.process(&state, None);
        let ids: Vec<u64> = emitted.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 1, 3]);
    }

    #[test]
    fn duplicates_outside_the_window_are_kept() {
        let mut tracker = EventLogsStateTracker::new(Duration::from_millis(700));
        let state = page(vec![click(1, 1000), click(1, 100)]);
        let emitted = tracker.process(&state, None);
        assert_eq!(emitted.len(), 2);
    }

    #[test]
    fn events_seen_in_previous_page_are_skipped() {
        let mut tracker = EventLogsStateTracker::new(Duration::from_millis(700));
        let first = page(vec![click(2, 2000), click(1, 1000)]);
        assert_eq!(tracker.process(&first, None).len(), 2);
        let second = page(vec![click(3, 9000), click(2, 2000), click(1, 1000)]);
        let emitted = tracker.process(&second, Some(&first));
        assert_eq!(emitted.len(), 1);
        assert_eq!(emitted[0].id, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn tracker_stops_fetching_without_subscribers() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let provider_fetches = Arc::clone(&fetches);
        let provider: StateProvider<HashSet<String>> = Arc::new(move |_| {
            let fetches = Arc::clone(&provider_fetches);
            Box::pin(async move {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(HashSet::from(["dev".to_string()]))
            })
        });
        let tracker = PollTracker::new(
            provider,
            HubConnectedDeviceTracker,
            Duration::from_millis(100),
        );

        let seen = Arc::new(AtomicUsize::new(0));
        let callback_seen = Arc::clone(&seen);
        let subscription = tracker.subscribe(move |_event| {
            callback_seen.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(seen.load(Ordering::SeqCst) >= 1);
        assert!(tracker.is_tracking());

        subscription.unsubscribe();
        assert!(!tracker.is_tracking());
        let fetches_at_unsubscribe = fetches.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fetches.load(Ordering::SeqCst), fetches_at_unsubscribe);
    }

    #[tokio::test(start_paused = true)]
    async fn late_subscriber_receives_next_tick() {
        let provider: StateProvider<HashSet<String>> = Arc::new(move |last: Option<HashSet<String>>| {
            Box::pin(async move {
                let mut next = last.unwrap_or_default();
                next.insert(format!("dev-{}", next.len()));
                Ok(next)
            })
        });
        let tracker = PollTracker::new(
            provider,
            HubConnectedDeviceTracker,
            Duration::from_millis(100),
        );

        let first = tracker.subscribe(|_event| {});
        tokio::time::sleep(Duration::from_millis(350)).await;

        let late_seen = Arc::new(AtomicUsize::new(0));
        let late_counter = Arc::clone(&late_seen);
        let late = tracker.subscribe(move |_event| {
            late_counter.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(late_seen.load(Ordering::SeqCst) >= 1);

        late.unsubscribe();
        first.unsubscribe();
    }
}
