//! Cancel-and-reschedule coalescing.
//!
//! A [`Debouncer`] is one coalescing point.  Every `schedule` call cancels the
//! pending action (if any) and arms a new timer `window` from now; only the
//! action of the last call in a burst ever runs.
//!
//! ```text
//!   Idle ──schedule──▶ Pending(deadline) ──deadline──▶ Committing ──done──▶ Idle
//!                        │      ▲
//!                        └──────┘ schedule: abort timer, push deadline out
//! ```
//!
//! Once an action starts committing it is no longer cancellable; commits of
//! one debouncer are serialised, so they land in settle order.

use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Pending { deadline: Instant },
    Committing,
}

struct Slot {
    generation: u64,
    timer: Option<AbortHandle>,
    committing: bool,
}

#[derive(Clone)]
pub struct Debouncer {
    name: &'static str,
    window: Duration,
    slot: Arc<StdMutex<Slot>>,
    commit: Arc<Mutex<()>>,
    state: Arc<watch::Sender<DebounceState>>,
}

impl Debouncer {
    pub fn new(name: &'static str, window: Duration) -> Self {
        let (state, _) = watch::channel(DebounceState::Idle);
        Self {
            name,
            window,
            slot: Arc::new(StdMutex::new(Slot {
                generation: 0,
                timer: None,
                committing: false,
            })),
            commit: Arc::new(Mutex::new(())),
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> DebounceState {
        *self.state.borrow()
    }

    /// Arms (or re-arms) the timer; `action` runs once the window passes
    /// without another call.
    pub fn schedule<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut slot = lock(&self.slot);
        if let Some(timer) = slot.timer.take() {
            timer.abort();
            debug!("debounce[{}]: pending action superseded", self.name);
        }
        slot.generation += 1;
        let generation = slot.generation;
        let deadline = Instant::now() + self.window;
        self.state.send_replace(DebounceState::Pending { deadline });

        let name = self.name;
        let slot_ref = Arc::clone(&self.slot);
        let commit = Arc::clone(&self.commit);
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _serial = commit.lock().await;
            {
                let mut slot = lock(&slot_ref);
                if slot.generation != generation {
                    return;
                }
                slot.timer = None;
                slot.committing = true;
                state.send_replace(DebounceState::Committing);
            }
            debug!("debounce[{}]: committing", name);
            action.await;

            let mut slot = lock(&slot_ref);
            slot.committing = false;
            if slot.timer.is_none() {
                state.send_replace(DebounceState::Idle);
            }
        });
        slot.timer = Some(task.abort_handle());
    }

    /// Drops the pending action, if any.  Returns whether one was pending.
    /// An action that already started committing is not affected.
    pub fn cancel(&self) -> bool {
        let mut slot = lock(&self.slot);
        let Some(timer) = slot.timer.take() else {
            return false;
        };
        timer.abort();
        slot.generation += 1;
        self.state.send_replace(if slot.committing {
            DebounceState::Committing
        } else {
            DebounceState::Idle
        });
        true
    }

    /// Cancels the pending action and runs `action` in its place right away,
    /// serialised with any commit in flight.  Does nothing (and returns
    /// false) when no action was pending.
    pub async fn fire_now<F>(&self, action: F) -> bool
    where
        F: Future<Output = ()>,
    {
        if !self.cancel() {
            return false;
        }
        let _serial = self.commit.lock().await;
        action.await;
        true
    }

    /// Resolves once nothing is pending or committing.
    pub async fn settled(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == DebounceState::Idle).await;
    }
}
