//! The single channel between the panel and the audio processor.
//!
//! Every exchange goes through [`MessagingBridge::send`], which resolves the
//! currently active target, bounds the round trip with a timeout and folds
//! the outcome into the process-wide [`LivenessFlag`]:
//!
//! - any failure (no target, transport error, timeout) → degraded
//! - any reply at all → live
//!
//! The flag is levelled: repeating the same outcome changes nothing.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use normaliser_proto::protocol::{MeterReading, ProcessorReply, ProcessorRequest, ProtocolError};
use normaliser_proto::{AllowList, GainCurve};
use tokio::sync::watch;
use tracing::{debug, info};

/// Identifies one processor instance (for the socket transport, its
/// address).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no processor attached to {0}")]
    NotAttached(TargetId),
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed")]
    Closed,
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// How requests physically reach a processor.
#[async_trait]
pub trait ProcessorTransport: Send + Sync {
    /// The processor attached to the currently active view, or `None` when
    /// nothing is addressable right now.
    async fn active_target(&self) -> Option<TargetId>;

    async fn request(
        &self,
        target: &TargetId,
        request: &ProcessorRequest,
    ) -> Result<ProcessorReply, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("processor unreachable: {0}")]
    Unreachable(String),
    #[error("processor did not answer within {0:?}")]
    Timeout(Duration),
    #[error("unexpected reply to {request}: {reply:?}")]
    UnexpectedReply {
        request: &'static str,
        reply: ProcessorReply,
    },
}

// ── liveness ──────────────────────────────────────────────────────────────────

/// "Processor unreachable" indicator behind the enable-audio hint.
#[derive(Clone)]
pub struct LivenessFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for LivenessFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessFlag {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn is_degraded(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn mark_degraded(&self) {
        if self.set(true) {
            info!("processor link degraded");
        }
    }

    pub fn mark_live(&self) {
        if self.set(false) {
            info!("processor link live");
        }
    }

    /// Watch for transitions (the view shows/hides its hint from this).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    fn set(&self, degraded: bool) -> bool {
        self.tx.send_if_modified(|current| {
            if *current == degraded {
                false
            } else {
                *current = degraded;
                true
            }
        })
    }
}

// ── bridge ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MessagingBridge {
    transport: Arc<dyn ProcessorTransport>,
    liveness: LivenessFlag,
    timeout: Duration,
}

impl MessagingBridge {
    pub fn new(transport: Arc<dyn ProcessorTransport>, timeout: Duration) -> Self {
        Self {
            transport,
            liveness: LivenessFlag::new(),
            timeout,
        }
    }

    pub fn liveness(&self) -> &LivenessFlag {
        &self.liveness
    }

    pub async fn send(&self, request: ProcessorRequest) -> Result<ProcessorReply, BridgeError> {
        let kind = request.kind();
        let exchange = async {
            let target = self
                .transport
                .active_target()
                .await
                .ok_or_else(|| BridgeError::Unreachable("no active target".into()))?;
            self.transport
                .request(&target, &request)
                .await
                .map_err(|e| BridgeError::Unreachable(e.to_string()))
        };

        let result = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(BridgeError::Timeout(self.timeout)),
        };

        match &result {
            Ok(_) => self.liveness.mark_live(),
            Err(e) => {
                debug!("bridge: {} failed: {}", kind, e);
                self.liveness.mark_degraded();
            }
        }
        result
    }

    async fn send_expecting_ack(&self, request: ProcessorRequest) -> Result<bool, BridgeError> {
        let kind = request.kind();
        match self.send(request).await? {
            ProcessorReply::Ack { ok } => Ok(ok),
            reply => Err(BridgeError::UnexpectedReply {
                request: kind,
                reply,
            }),
        }
    }

    pub async fn set_gain(&self, value: f32) -> Result<bool, BridgeError> {
        self.send_expecting_ack(ProcessorRequest::SetGain { value })
            .await
    }

    pub async fn set_eq(&self, bands: GainCurve) -> Result<bool, BridgeError> {
        self.send_expecting_ack(ProcessorRequest::SetEq { bands })
            .await
    }

    pub async fn set_enabled(&self, value: bool) -> Result<bool, BridgeError> {
        self.send_expecting_ack(ProcessorRequest::SetEnabled { value })
            .await
    }

    pub async fn set_apply_all(&self, value: bool) -> Result<bool, BridgeError> {
        self.send_expecting_ack(ProcessorRequest::SetApplyAll { value })
            .await
    }

    pub async fn update_allowlist(&self, allowlist: AllowList) -> Result<bool, BridgeError> {
        self.send_expecting_ack(ProcessorRequest::UpdateAllowlist { allowlist })
            .await
    }

    pub async fn resume_audio(&self) -> Result<bool, BridgeError> {
        self.send_expecting_ack(ProcessorRequest::ResumeCtx).await
    }

    pub async fn meter(&self) -> Result<MeterReading, BridgeError> {
        match self.send(ProcessorRequest::GetMeter).await? {
            ProcessorReply::Meter(reading) => Ok(reading),
            reply => Err(BridgeError::UnexpectedReply {
                request: "getMeter",
                reply,
            }),
        }
    }

    pub async fn spectrum(&self) -> Result<Vec<f32>, BridgeError> {
        match self.send(ProcessorRequest::GetSpectrum).await? {
            ProcessorReply::Spectrum { bands } => Ok(bands),
            reply => Err(BridgeError::UnexpectedReply {
                request: "getSpectrum",
                reply,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProcessor, Response};

    fn bridge(fake: &Arc<FakeProcessor>) -> MessagingBridge {
        MessagingBridge::new(fake.clone(), Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_sets_degraded_and_success_clears() {
        let fake = Arc::new(FakeProcessor::detached());
        let bridge = bridge(&fake);
        assert!(!bridge.liveness().is_degraded());

        let err = bridge.set_gain(2.0).await.unwrap_err();
        assert!(matches!(err, BridgeError::Unreachable(_)));
        assert!(bridge.liveness().is_degraded());

        // Repeated failures leave it set.
        let _ = bridge.set_enabled(true).await;
        let _ = bridge.meter().await;
        assert!(bridge.liveness().is_degraded());

        fake.attach();
        assert!(bridge.set_gain(2.0).await.unwrap());
        assert!(!bridge.liveness().is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_transitions_are_levelled() {
        let fake = Arc::new(FakeProcessor::detached());
        let bridge = bridge(&fake);
        let mut rx = bridge.liveness().subscribe();

        let _ = bridge.set_gain(1.0).await;
        let _ = bridge.set_gain(1.0).await;
        assert!(rx.has_changed().unwrap());
        assert!(*rx.borrow_and_update());

        let _ = bridge.set_gain(1.0).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_processor_times_out() {
        let fake = Arc::new(FakeProcessor::attached());
        fake.respond_with(Response::Hang);
        let bridge = bridge(&fake);

        let start = tokio::time::Instant::now();
        let err = bridge.meter().await.unwrap_err();
        assert!(matches!(err, BridgeError::Timeout(d) if d == Duration::from_secs(1)));
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        assert!(bridge.liveness().is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_shape_mismatch_still_counts_as_live() {
        let fake = Arc::new(FakeProcessor::attached());
        fake.respond_with(Response::Reply(ProcessorReply::ack(true)));
        let bridge = bridge(&fake);
        bridge.liveness().mark_degraded();

        let err = bridge.spectrum().await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::UnexpectedReply {
                request: "getSpectrum",
                ..
            }
        ));
        assert!(!bridge.liveness().is_degraded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_requests_reach_processor_verbatim() {
        let fake = Arc::new(FakeProcessor::attached());
        let bridge = bridge(&fake);
        let allow: AllowList = ["radio.example"].into_iter().collect();

        bridge.update_allowlist(allow.clone()).await.unwrap();
        bridge.resume_audio().await.unwrap();

        assert_eq!(
            fake.requests(),
            vec![
                ProcessorRequest::UpdateAllowlist { allowlist: allow },
                ProcessorRequest::ResumeCtx
            ]
        );
    }
}
