//! In-process processor double, for exercising the panel without a live
//! audio processor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use normaliser_proto::protocol::{MeterReading, ProcessorReply, ProcessorRequest};
use tokio::time::Instant;

use crate::bridge::{ProcessorTransport, TargetId, TransportError};
use crate::lock;

/// How the fake answers.
#[derive(Debug, Clone)]
pub enum Response {
    /// Ack set-requests, report `peak_db` for meter requests.
    Normal,
    /// Answer every request with this reply.
    Reply(ProcessorReply),
    /// Never answer.
    Hang,
    /// Fail at the transport level.
    Fail,
}

pub struct FakeProcessor {
    attached: AtomicBool,
    response: Mutex<Response>,
    peak_db: Mutex<Option<f32>>,
    latency: Mutex<Duration>,
    log: Mutex<Vec<(Instant, ProcessorRequest)>>,
}

impl FakeProcessor {
    pub fn attached() -> Self {
        Self {
            attached: AtomicBool::new(true),
            response: Mutex::new(Response::Normal),
            peak_db: Mutex::new(Some(-20.0)),
            latency: Mutex::new(Duration::ZERO),
            log: Mutex::new(Vec::new()),
        }
    }

    /// A view with no processor behind it (audio never started).
    pub fn detached() -> Self {
        let fake = Self::attached();
        fake.detach();
        fake
    }

    pub fn attach(&self) {
        self.attached.store(true, Ordering::SeqCst);
    }

    pub fn detach(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub fn respond_with(&self, response: Response) {
        *lock(&self.response) = response;
    }

    pub fn set_peak_db(&self, peak_db: Option<f32>) {
        *lock(&self.peak_db) = peak_db;
    }

    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn requests(&self) -> Vec<ProcessorRequest> {
        lock(&self.log).iter().map(|(_, r)| r.clone()).collect()
    }

    /// Received requests of one kind (`"setEq"`, `"getMeter"`, ...) with
    /// the time each arrived.
    pub fn requests_of(&self, kind: &str) -> Vec<(Instant, ProcessorRequest)> {
        lock(&self.log)
            .iter()
            .filter(|(_, r)| r.kind() == kind)
            .cloned()
            .collect()
    }

    fn answer(&self, request: &ProcessorRequest) -> Option<Result<ProcessorReply, TransportError>> {
        match lock(&self.response).clone() {
            Response::Hang => None,
            Response::Fail => Some(Err(TransportError::Closed)),
            Response::Reply(reply) => Some(Ok(reply)),
            Response::Normal => Some(Ok(match request {
                ProcessorRequest::GetMeter => ProcessorReply::Meter(MeterReading {
                    peak_db: *lock(&self.peak_db),
                    gr_db: None,
                    active: true,
                }),
                ProcessorRequest::GetSpectrum => ProcessorReply::Spectrum { bands: Vec::new() },
                _ => ProcessorReply::ack(true),
            })),
        }
    }
}

#[async_trait]
impl ProcessorTransport for FakeProcessor {
    async fn active_target(&self) -> Option<TargetId> {
        self.attached
            .load(Ordering::SeqCst)
            .then(|| TargetId("fake".into()))
    }

    async fn request(
        &self,
        target: &TargetId,
        request: &ProcessorRequest,
    ) -> Result<ProcessorReply, TransportError> {
        if !self.attached.load(Ordering::SeqCst) {
            return Err(TransportError::NotAttached(target.clone()));
        }
        lock(&self.log).push((Instant::now(), request.clone()));

        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match self.answer(request) {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }
}
