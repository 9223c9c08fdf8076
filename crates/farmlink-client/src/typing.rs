//! Sender-side typing debouncer.
//!
//! `true` goes out once on the first keystroke after idle. Every keystroke
//! restarts the idle timer; when it lapses, or the input is cleared, blurred
//! or sent, `false` goes out once.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Receives each typing transition.
pub type TypingSink = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct DebounceState {
    active: bool,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

pub struct TypingDebouncer {
    window: Duration,
    sink: TypingSink,
    state: Arc<Mutex<DebounceState>>,
}

impl TypingDebouncer {
    pub fn new(window: Duration, sink: TypingSink) -> Self {
        Self {
            window,
            sink,
            state: Arc::new(Mutex::new(DebounceState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DebounceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed the current input value.
    pub fn input_changed(&self, text: &str) {
        if text.trim().is_empty() {
            self.stop();
        } else {
            self.keystroke();
        }
    }

    pub fn keystroke(&self) {
        let started = {
            let mut state = self.lock();
            let started = !state.active;
            state.active = true;
            state.generation += 1;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }

            let generation = state.generation;
            let shared = self.state.clone();
            let sink = self.sink.clone();
            let window = self.window;
            state.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(window).await;
                let lapsed = {
                    let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
                    let lapsed = state.active && state.generation == generation;
                    if lapsed {
                        state.active = false;
                        state.timer = None;
                    }
                    lapsed
                };
                if lapsed {
                    sink(false);
                }
            }));
            started
        };

        if started {
            (self.sink)(true);
        }
    }

    /// End the current burst now. Returns whether `false` was sent.
    pub fn stop(&self) -> bool {
        let was_active = {
            let mut state = self.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::replace(&mut state.active, false)
        };
        if was_active {
            (self.sink)(false);
        }
        was_active
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        if let Some(timer) = self.lock().timer.take() {
            timer.abort();
        }
    }
}
