//! Protocol timers and the transmit-done rendezvous.
//!
//! Timers hold only deadlines. They live inside the protocol state, so arming
//! and stopping them is serialized with every other state change, and the
//! timer thread turns an expired deadline into a [`TimerKind`] event that is
//! handled under the same lock. Waiting for link completion happens on the
//! transmit worker instead, see [`Event`].

use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

/// The three single-shot protocol timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// N_Bs: peer must answer a First Frame or a completed block with Flow Control
    TxWaitForFlowControl,
    /// STmin: time to send the next Consecutive Frame
    TxNextConsecutive,
    /// N_Cr: peer must send the next Consecutive Frame
    RxWaitForNextConsecutive,
}

impl TimerKind {
    const ALL: [TimerKind; 3] = [
        TimerKind::TxWaitForFlowControl,
        TimerKind::TxNextConsecutive,
        TimerKind::RxWaitForNextConsecutive,
    ];

    fn index(self) -> usize {
        match self {
            TimerKind::TxWaitForFlowControl => 0,
            TimerKind::TxNextConsecutive => 1,
            TimerKind::RxWaitForNextConsecutive => 2,
        }
    }
}

#[derive(Debug, Default)]
pub struct Timers {
    deadlines: [Option<Instant>; 3],
}

impl Timers {
    /// (Re)starts a timer. A running timer is restarted from now.
    pub fn start(&mut self, kind: TimerKind, after: Duration) {
        self.deadlines[kind.index()] = Some(Instant::now() + after);
    }

    pub fn stop(&mut self, kind: TimerKind) {
        self.deadlines[kind.index()] = None;
    }

    pub fn stop_all(&mut self) {
        self.deadlines = [None; 3];
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.index()].is_some()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Stops and returns the timer that expired first, if any expired by `now`
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerKind> {
        let kind = TimerKind::ALL
            .into_iter()
            .filter(|k| matches!(self.deadlines[k.index()], Some(d) if d <= now))
            .min_by_key(|k| self.deadlines[k.index()])?;
        self.stop(kind);
        Some(kind)
    }
}

/// Link transmit-completion signal.
///
/// Holds at most one pending completion. [`Event::wait_for`] consumes it, so
/// every Consecutive Frame needs a fresh completion of the frame before it.
#[derive(Debug)]
pub struct Event {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Default for Event {
    fn default() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }
}

impl Event {
    pub fn set(&self) {
        // already set when full
        let _ = self.tx.try_send(());
    }

    pub fn reset(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    pub fn is_set(&self) -> bool {
        !self.rx.is_empty()
    }

    /// Waits until the event is set and consumes it. Returns `false` on
    /// timeout.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }

    /// Receiving end, for waiting on the event inside `select!`
    pub fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_timers_expire_in_deadline_order() {
        let mut timers = Timers::default();
        timers.start(TimerKind::RxWaitForNextConsecutive, Duration::from_millis(5));
        timers.start(TimerKind::TxNextConsecutive, Duration::from_millis(0));
        assert!(timers.is_running(TimerKind::TxNextConsecutive));

        let later = Instant::now() + Duration::from_millis(10);
        assert_eq!(timers.take_expired(later), Some(TimerKind::TxNextConsecutive));
        assert_eq!(
            timers.take_expired(later),
            Some(TimerKind::RxWaitForNextConsecutive)
        );
        assert_eq!(timers.take_expired(later), None);
        assert!(timers.next_deadline().is_none());
    }

    #[test]
    fn test_timers_stop_and_restart() {
        let mut timers = Timers::default();
        timers.start(TimerKind::TxWaitForFlowControl, Duration::from_millis(1));
        timers.stop(TimerKind::TxWaitForFlowControl);
        assert_eq!(
            timers.take_expired(Instant::now() + Duration::from_secs(1)),
            None
        );

        timers.start(TimerKind::TxWaitForFlowControl, Duration::from_secs(60));
        assert_eq!(timers.take_expired(Instant::now()), None);
        timers.stop_all();
        assert!(!timers.is_running(TimerKind::TxWaitForFlowControl));
    }

    #[test]
    fn test_event_wait_times_out() {
        let ev = Event::default();
        assert!(!ev.wait_for(Duration::from_millis(10)));
        ev.set();
        ev.set();
        assert!(ev.is_set());
        assert!(ev.wait_for(Duration::from_millis(10)));
        // consumed, a second set while set did not queue another one
        assert!(!ev.is_set());
        assert!(!ev.wait_for(Duration::from_millis(10)));

        ev.set();
        ev.reset();
        assert!(!ev.is_set());
    }

    #[test]
    fn test_event_wakes_waiter() {
        let ev = Arc::new(Event::default());
        let setter = ev.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            setter.set();
        });
        assert!(ev.wait_for(Duration::from_secs(5)));
        handle.join().unwrap();
    }
}
