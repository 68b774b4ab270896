//! Control-panel core for the normaliser: persisted settings, debounced EQ
//! synchronisation, presets, the processor bridge and the meter poller.

pub mod bridge;
pub mod debounce;
pub mod meter;
pub mod panel;
pub mod presets;
pub mod store;
pub mod sync;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod transport;

pub use bridge::{BridgeError, LivenessFlag, MessagingBridge, ProcessorTransport};
pub use panel::ControlPanel;
pub use store::Tiers;
pub use sync::EqSynchronizer;

/// Locks a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
