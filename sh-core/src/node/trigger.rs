//! Wake-up signal for trigger-driven nodes
//!
//! Producers call [`Trigger::signal`] after publishing a sample. The flag
//! is latched so a signal sent while the consumer is busy draining is not
//! lost; several signals collapse into one wake-up since one drain empties
//! the ring anyway.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct TriggerState {
    pending: bool,
    stopped: bool,
}

#[derive(Debug, Default)]
pub struct Trigger {
    state: Mutex<TriggerState>,
    cond: Condvar,
}

impl Trigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut state = self.state.lock();
        state.pending = true;
        self.cond.notify_one();
    }

    /// Block until signalled; `false` once stopped
    pub fn wait(&self) -> bool {
        let mut state = self.state.lock();
        while !state.pending && !state.stopped {
            self.cond.wait(&mut state);
        }
        if state.stopped {
            return false;
        }
        state.pending = false;
        true
    }

    pub fn stop(&self) {
        let mut state = self.state.lock();
        state.stopped = true;
        self.cond.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let trigger = Trigger::new();
        trigger.signal();
        assert!(trigger.wait());
    }

    #[test]
    fn test_signals_coalesce() {
        let trigger = Trigger::new();
        trigger.signal();
        trigger.signal();
        assert!(trigger.wait());
        trigger.stop();
        assert!(!trigger.wait());
    }

    #[test]
    fn test_stop_wakes_waiter() {
        let trigger = Arc::new(Trigger::new());
        let waiter = {
            let trigger = Arc::clone(&trigger);
            thread::spawn(move || trigger.wait())
        };
        trigger.stop();
        assert!(!waiter.join().unwrap());
        assert!(trigger.is_stopped());
    }
}
