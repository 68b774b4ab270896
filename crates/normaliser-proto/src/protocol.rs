use serde::{Deserialize, Serialize};

use crate::curve::GainCurve;
use crate::state::AllowList;

/// Frames larger than this are treated as corrupt.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Requests sent from the panel to the audio processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProcessorRequest {
    SetGain { value: f32 },
    SetEq { bands: GainCurve },
    SetEnabled { value: bool },
    SetApplyAll { value: bool },
    UpdateAllowlist { allowlist: AllowList },
    /// Resume (or create) the processor's audio context after a user gesture.
    ResumeCtx,
    GetMeter,
    GetSpectrum,
}

impl ProcessorRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessorRequest::SetGain { .. } => "setGain",
            ProcessorRequest::SetEq { .. } => "setEq",
            ProcessorRequest::SetEnabled { .. } => "setEnabled",
            ProcessorRequest::SetApplyAll { .. } => "setApplyAll",
            ProcessorRequest::UpdateAllowlist { .. } => "updateAllowlist",
            ProcessorRequest::ResumeCtx => "resumeCtx",
            ProcessorRequest::GetMeter => "getMeter",
            ProcessorRequest::GetSpectrum => "getSpectrum",
        }
    }
}

/// Live level sample.  `peak_db` is relative dBFS; the processor may omit
/// it (or send a non-number) when it has nothing to report yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterReading {
    #[serde(default, deserialize_with = "lenient_f32")]
    pub peak_db: Option<f32>,
    #[serde(default, deserialize_with = "lenient_f32", skip_serializing_if = "Option::is_none")]
    pub gr_db: Option<f32>,
    #[serde(default)]
    pub active: bool,
}

/// Responses from the processor.  The shape identifies the variant, so the
/// enum is untagged.  `Meter` has no required fields and must stay last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProcessorReply {
    Ack { ok: bool },
    Spectrum { bands: Vec<f32> },
    Meter(MeterReading),
}

impl ProcessorReply {
    pub fn ack(ok: bool) -> Self {
        ProcessorReply::Ack { ok }
    }
}

// `peakDb` arrives from a dynamically typed peer; anything that is not a
// finite number reads as "no sample".
fn lenient_f32<'de, D>(deserializer: D) -> Result<Option<f32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value
        .as_f64()
        .filter(|v| v.is_finite())
        .map(|v| v as f32))
}

/// Wire envelope: every frame carries the request id it belongs to so the
/// reader can route responses to the caller waiting on them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Frame {
    Request {
        request_id: u64,
        request: ProcessorRequest,
    },
    Reply {
        request_id: u64,
        reply: ProcessorReply,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds the frame size limit")]
    Oversized(usize),
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

impl Frame {
    pub fn request_id(&self) -> u64 {
        match self {
            Frame::Request { request_id, .. } | Frame::Reply { request_id, .. } => *request_id,
        }
    }

    /// 4-byte big-endian length header followed by the JSON body.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let json = serde_json::to_vec(self)?;
        if json.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::Oversized(json.len()));
        }
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Decodes one frame from the front of `data`.  `Ok(None)` means more
    /// bytes are needed; on success returns the frame and bytes consumed.
    pub fn decode(data: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::Oversized(len));
        }
        if data.len() < 4 + len {
            return Ok(None);
        }
        let frame: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok(Some((frame, 4 + len)))
    }
}
