//! Scheduled callbacks for the session controller.
//!
//! Every timer the controller starts is tracked in [`TimerSlots`], one slot per
//! [`TimerKind`]. Installing a timer into an occupied slot cancels the previous
//! one, so a session can never own two heartbeats or two pending reconnects.

use crate::detection::controller::{Event, EventSink};
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Heartbeat,
    Sampling,
    Reconnect,
}

/// Delivered back to the controller when a timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    pub session: u64,
    pub kind: TimerKind,
}

pub trait TimerHandle: Send {
    fn cancel(&mut self);
}

pub trait Scheduler: Send {
    /// Fire `tick` once after `delay`
    fn once(&self, delay: Duration, tick: TimerTick) -> Box<dyn TimerHandle>;

    /// Fire `tick` every `period`, first after one full period
    fn every(&self, period: Duration, tick: TimerTick) -> Box<dyn TimerHandle>;
}

#[derive(Default)]
pub struct TimerSlots {
    heartbeat: Option<Box<dyn TimerHandle>>,
    sampling: Option<Box<dyn TimerHandle>>,
    reconnect: Option<Box<dyn TimerHandle>>,
}

impl TimerSlots {
    fn slot(&mut self, kind: TimerKind) -> &mut Option<Box<dyn TimerHandle>> {
        match kind {
            TimerKind::Heartbeat => &mut self.heartbeat,
            TimerKind::Sampling => &mut self.sampling,
            TimerKind::Reconnect => &mut self.reconnect,
        }
    }

    pub fn install(&mut self, kind: TimerKind, handle: Box<dyn TimerHandle>) {
        if let Some(mut previous) = self.slot(kind).replace(handle) {
            previous.cancel();
        }
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(mut handle) = self.slot(kind).take() {
            handle.cancel();
        }
    }

    /// Forget a one-shot timer that has already fired
    pub fn release(&mut self, kind: TimerKind) {
        self.slot(kind).take();
    }

    pub fn cancel_all(&mut self) {
        self.cancel(TimerKind::Heartbeat);
        self.cancel(TimerKind::Sampling);
        self.cancel(TimerKind::Reconnect);
    }

    pub fn is_active(&self, kind: TimerKind) -> bool {
        match kind {
            TimerKind::Heartbeat => self.heartbeat.is_some(),
            TimerKind::Sampling => self.sampling.is_some(),
            TimerKind::Reconnect => self.reconnect.is_some(),
        }
    }

    pub fn active_count(&self) -> usize {
        [&self.heartbeat, &self.sampling, &self.reconnect]
            .iter()
            .filter(|slot| slot.is_some())
            .count()
    }
}

/// Timers backed by tokio tasks that post [`Event::Timer`] into the controller's queue
pub struct TokioScheduler {
    sink: EventSink,
}

impl TokioScheduler {
    pub fn new(sink: EventSink) -> Self {
        Self { sink }
    }
}

struct TaskTimer(AbortHandle);

impl TimerHandle for TaskTimer {
    fn cancel(&mut self) {
        self.0.abort();
    }
}

impl Drop for TaskTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Scheduler for TokioScheduler {
    fn once(&self, delay: Duration, tick: TimerTick) -> Box<dyn TimerHandle> {
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = sink.send(Event::Timer(tick));
        });
        Box::new(TaskTimer(task.abort_handle()))
    }

    fn every(&self, period: Duration, tick: TimerTick) -> Box<dyn TimerHandle> {
        let sink = self.sink.clone();
        let task = tokio::spawn(async move {
            let mut interval = time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if sink.send(Event::Timer(tick)).is_err() {
                    break;
                }
            }
        });
        Box::new(TaskTimer(task.abort_handle()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    struct CountingHandle(Arc<AtomicUsize>);

    impl TimerHandle for CountingHandle {
        fn cancel(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tick(kind: TimerKind) -> TimerTick {
        TimerTick { session: 1, kind }
    }

    #[test]
    fn installing_replaces_and_cancels_previous() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let mut slots = TimerSlots::default();

        slots.install(TimerKind::Reconnect, Box::new(CountingHandle(cancelled.clone())));
        slots.install(TimerKind::Reconnect, Box::new(CountingHandle(cancelled.clone())));

        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
        assert_eq!(slots.active_count(), 1);
    }

    #[test]
    fn cancel_all_empties_every_slot() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let mut slots = TimerSlots::default();
        slots.install(TimerKind::Heartbeat, Box::new(CountingHandle(cancelled.clone())));
        slots.install(TimerKind::Sampling, Box::new(CountingHandle(cancelled.clone())));
        slots.install(TimerKind::Reconnect, Box::new(CountingHandle(cancelled.clone())));
        assert_eq!(slots.active_count(), 3);

        slots.cancel_all();
        assert_eq!(slots.active_count(), 0);
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);

        // Idempotent
        slots.cancel_all();
        assert_eq!(cancelled.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn release_does_not_cancel() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let mut slots = TimerSlots::default();
        slots.install(TimerKind::Reconnect, Box::new(CountingHandle(cancelled.clone())));
        slots.release(TimerKind::Reconnect);
        assert!(!slots.is_active(TimerKind::Reconnect));
        assert_eq!(cancelled.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn once_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx);
        let _handle = scheduler.once(Duration::from_millis(3000), tick(TimerKind::Reconnect));

        time::sleep(Duration::from_millis(2999)).await;
        assert!(rx.try_recv().is_err());

        time::sleep(Duration::from_millis(2)).await;
        assert!(matches!(
            rx.try_recv(),
            Ok(Event::Timer(TimerTick {
                kind: TimerKind::Reconnect,
                ..
            }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(tx);
        let mut handle = scheduler.every(Duration::from_millis(200), tick(TimerKind::Sampling));

        time::sleep(Duration::from_millis(450)).await;
        let mut fired = 0;
        while rx.try_recv().is_ok() {
            fired += 1;
        }
        assert_eq!(fired, 2);

        handle.cancel();
        time::sleep(Duration::from_millis(1000)).await;
        assert!(rx.try_recv().is_err());
    }
}
