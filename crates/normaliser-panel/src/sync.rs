//! EQ State Synchronizer.
//!
//! Owns the in-memory [`GainCurve`] and is the only writer of `eqBands` in
//! either tier.  An edit settles after the local window; the settled curve is
//! then
//!
//! 1. pushed to the processor (spawned, never awaited by the writes),
//! 2. scheduled for the cross-device tier behind its own, longer window,
//! 3. written to the local tier.
//!
//! Every write is the full curve.

use std::sync::{Arc, Mutex as StdMutex};

use normaliser_proto::config::TimingConfig;
use normaliser_proto::state::keys;
use normaliser_proto::GainCurve;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::bridge::MessagingBridge;
use crate::debounce::Debouncer;
use crate::lock;
use crate::store::Tiers;

#[derive(Clone)]
pub struct EqSynchronizer {
    curve: Arc<StdMutex<GainCurve>>,
    tiers: Tiers,
    bridge: MessagingBridge,
    local: Debouncer,
    sync: Debouncer,
    /// Serialises `setEq` pushes so they reach the processor in settle order.
    push_lock: Arc<Mutex<()>>,
    pushes_in_flight: Arc<watch::Sender<usize>>,
}

impl EqSynchronizer {
    pub fn new(initial: GainCurve, tiers: Tiers, bridge: MessagingBridge, timing: &TimingConfig) -> Self {
        let (pushes_in_flight, _) = watch::channel(0);
        Self {
            curve: Arc::new(StdMutex::new(initial)),
            tiers,
            bridge,
            local: Debouncer::new("local", timing.local_debounce()),
            sync: Debouncer::new("sync", timing.sync_debounce()),
            push_lock: Arc::new(Mutex::new(())),
            pushes_in_flight: Arc::new(pushes_in_flight),
        }
    }

    pub fn current(&self) -> GainCurve {
        lock(&self.curve).clone()
    }

    pub fn band_count(&self) -> usize {
        lock(&self.curve).len()
    }

    /// Replaces the whole curve and (re)starts the local window.
    pub fn update(&self, curve: GainCurve) {
        *lock(&self.curve) = curve.clone();
        let this = self.clone();
        self.local.schedule(async move { this.commit_local(curve).await });
    }

    /// Merges one band edit into the current curve.  An out-of-range index
    /// leaves the curve as it is but still counts as an edit.
    pub fn set_band(&self, index: usize, gain: i32) -> GainCurve {
        let curve = self.current().with_band(index, gain);
        self.update(curve.clone());
        curve
    }

    /// Performs any pending write right away.  No write from a cancelled
    /// window happens afterwards.
    pub async fn flush(&self) {
        let curve = self.current();
        if self.local.fire_now(self.commit_local(curve.clone())).await {
            debug!("sync: flushed local window");
        }
        self.local.settled().await;

        if self.sync.fire_now(self.commit_sync(curve)).await {
            debug!("sync: flushed sync window");
        }
        self.settled().await;
    }

    /// Resolves once both windows are idle and no push is in flight.
    pub async fn settled(&self) {
        self.local.settled().await;
        self.sync.settled().await;
        let mut rx = self.pushes_in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    async fn commit_local(&self, curve: GainCurve) {
        self.push(curve.clone());

        let this = self.clone();
        let synced = curve.clone();
        self.sync.schedule(async move { this.commit_sync(synced).await });

        if let Err(e) = self.tiers.local.write(keys::EQ_BANDS, &curve).await {
            debug!("sync: local eqBands write failed: {}", e);
        }
    }

    async fn commit_sync(&self, curve: GainCurve) {
        if let Err(e) = self.tiers.sync.write(keys::EQ_BANDS, &curve).await {
            debug!("sync: cross-device eqBands write failed: {}", e);
        }
    }

    fn push(&self, curve: GainCurve) {
        self.pushes_in_flight.send_modify(|n| *n += 1);
        let bridge = self.bridge.clone();
        let push_lock = Arc::clone(&self.push_lock);
        let in_flight = Arc::clone(&self.pushes_in_flight);
        tokio::spawn(async move {
            {
                let _serial = push_lock.lock().await;
                if let Err(e) = bridge.set_eq(curve).await {
                    debug!("sync: setEq not delivered: {}", e);
                }
            }
            in_flight.send_modify(|n| *n -= 1);
        });
    }
}
