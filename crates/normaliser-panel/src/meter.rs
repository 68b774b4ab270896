//! Adaptive meter poller.
//!
//! One cycle = one `getMeter` round trip followed by a delay picked from the
//! refresh mode *at that moment*.  The next request is never issued before
//! the previous one resolved (reply, failure or timeout), so a slow
//! processor slows the meter down instead of queueing requests.

use std::time::Duration;

use normaliser_proto::config::TimingConfig;
use normaliser_proto::protocol::MeterReading;
use normaliser_proto::RefreshMode;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::bridge::MessagingBridge;

/// Lowest level the meter shows; anything quieter reads as empty.
pub const METER_FLOOR_DB: f32 = -60.0;

/// Maps a peak level to the filled fraction of the meter bar:
/// `clamp(1 + db/60, 0, 1)`.
pub fn display_fraction(peak_db: f32) -> f32 {
    if peak_db.is_nan() {
        return 0.0;
    }
    (1.0 - peak_db / METER_FLOOR_DB).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeterDisplay {
    pub peak_db: f32,
    pub fraction: f32,
    pub gain_reduction_db: Option<f32>,
    pub active: bool,
}

impl MeterDisplay {
    /// `None` when the reading carries no numeric peak.
    pub fn from_reading(reading: &MeterReading) -> Option<Self> {
        let peak_db = reading.peak_db?;
        Some(Self {
            peak_db,
            fraction: display_fraction(peak_db),
            gain_reduction_db: reading.gr_db,
            active: reading.active,
        })
    }

    pub fn percent(&self) -> u8 {
        (self.fraction * 100.0).round() as u8
    }

    pub fn label(&self) -> String {
        format!("Peak: {:.2} dB", self.peak_db)
    }
}

/// Delay between cycles for each refresh mode.
#[derive(Debug, Clone, Copy)]
pub struct MeterCadence {
    pub fast: Duration,
    pub eco: Duration,
}

impl Default for MeterCadence {
    fn default() -> Self {
        Self {
            fast: RefreshMode::Fast.meter_delay(),
            eco: RefreshMode::Eco.meter_delay(),
        }
    }
}

impl From<&TimingConfig> for MeterCadence {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            fast: timing.meter_delay(RefreshMode::Fast),
            eco: timing.meter_delay(RefreshMode::Eco),
        }
    }
}

impl MeterCadence {
    pub fn delay(&self, mode: RefreshMode) -> Duration {
        match mode {
            RefreshMode::Fast => self.fast,
            RefreshMode::Eco => self.eco,
        }
    }
}

pub struct MeterPoller {
    display: watch::Receiver<Option<MeterDisplay>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MeterPoller {
    /// Starts polling right away.  `mode` is re-read before every delay.
    pub fn spawn(
        bridge: MessagingBridge,
        mode: watch::Receiver<RefreshMode>,
        cadence: MeterCadence,
    ) -> Self {
        let (display_tx, display) = watch::channel(None);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(bridge, mode, cadence, display_tx, cancel.clone()));
        Self {
            display,
            cancel,
            task,
        }
    }

    /// Latest display value, `None` until the first numeric sample.
    pub fn display(&self) -> Option<MeterDisplay> {
        self.display.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<MeterDisplay>> {
        self.display.clone()
    }

    /// Cancels the loop at its next suspension point and waits for it to
    /// exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!("meter: poller task ended abnormally: {}", e);
        }
    }
}

async fn poll_loop(
    bridge: MessagingBridge,
    mode: watch::Receiver<RefreshMode>,
    cadence: MeterCadence,
    display: watch::Sender<Option<MeterDisplay>>,
    cancel: CancellationToken,
) {
    debug!("meter: poller started");
    loop {
        let reading = tokio::select! {
            _ = cancel.cancelled() => break,
            reading = bridge.meter() => reading,
        };
        match reading {
            Ok(reading) => match MeterDisplay::from_reading(&reading) {
                Some(value) => {
                    trace!("meter: {}", value.label());
                    display.send_replace(Some(value));
                }
                None => trace!("meter: reading without peak, ignored"),
            },
            Err(e) => trace!("meter: cycle failed: {}", e),
        }

        let delay = cadence.delay(*mode.borrow());
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    debug!("meter: poller stopped");
}
