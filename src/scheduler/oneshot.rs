//! Single-use promise/ticket pair for handing a job result back to its
//! submitter.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

enum State<T> {
    Pending,
    Ready(T),
    /// The promise was dropped without fulfilling.
    Closed,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

/// The producing half; fulfilled exactly once.
pub struct Promise<T> {
    shared: Option<Arc<Shared<T>>>,
}

/// The consuming half; `wait` blocks until the promise resolves.
pub struct Ticket<T> {
    shared: Arc<Shared<T>>,
}

pub fn channel<T>() -> (Promise<T>, Ticket<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Some(Arc::clone(&shared)),
        },
        Ticket { shared },
    )
}

impl<T> Promise<T> {
    pub fn set(mut self, value: T) {
        if let Some(shared) = self.shared.take() {
            {
                let mut state = shared.state.lock();
                *state = State::Ready(value);
            }
            shared.ready.notify_all();
        }
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            {
                let mut state = shared.state.lock();
                if matches!(*state, State::Pending) {
                    *state = State::Closed;
                }
            }
            shared.ready.notify_all();
        }
    }
}

impl<T> Ticket<T> {
    /// Block until the value arrives. Returns `None` if the promise was
    /// dropped unfulfilled.
    pub fn wait(self) -> Option<T> {
        let mut state = self.shared.state.lock();
        loop {
            match std::mem::replace(&mut *state, State::Pending) {
                State::Ready(value) => return Some(value),
                State::Closed => return None,
                State::Pending => self.shared.ready.wait(&mut state),
            }
        }
    }

    /// Take the value if it is already available. A drained ticket is
    /// closed, so a later `wait` reports the value gone instead of
    /// blocking for a second resolution that can never come.
    pub fn try_take(&self) -> Option<T> {
        let mut state = self.shared.state.lock();
        match std::mem::replace(&mut *state, State::Closed) {
            State::Ready(value) => Some(value),
            State::Closed => None,
            State::Pending => {
                *state = State::Pending;
                None
            }
        }
    }
}
