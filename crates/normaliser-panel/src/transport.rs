/// TCP transport to the audio processor, with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   SocketTransport::active_target()  (connects lazily)
///         │
///         ├── writer_task   ← receives PendingRequest via mpsc, writes frames
///         └── reader_task   ← decodes length-prefixed frames
///                                └── Frame::Reply { request_id } → matched oneshot::Sender
/// ```
///
/// When the connection drops, every pending request fails and the next
/// `active_target()` call tries to reconnect.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use normaliser_proto::protocol::{Frame, ProcessorReply, ProcessorRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{ProcessorTransport, TargetId, TransportError};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<ProcessorReply, TransportError>>>>>;

struct PendingRequest {
    request_id: u64,
    payload: Vec<u8>,
    reply: oneshot::Sender<Result<ProcessorReply, TransportError>>,
}

#[derive(Clone)]
struct Connection {
    tx: mpsc::Sender<PendingRequest>,
    closed: CancellationToken,
}

impl Connection {
    fn is_open(&self) -> bool {
        !self.closed.is_cancelled() && !self.tx.is_closed()
    }
}

pub struct SocketTransport {
    address: String,
    next_request_id: AtomicU64,
    connection: Mutex<Option<Connection>>,
}

impl SocketTransport {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            next_request_id: AtomicU64::new(1),
            connection: Mutex::new(None),
        }
    }

    async fn open_connection(&self) -> Option<Connection> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            if conn.is_open() {
                return Some(conn.clone());
            }
            debug!("processor: connection to {} lost", self.address);
            *guard = None;
        }

        match TcpStream::connect(&self.address).await {
            Ok(stream) => {
                info!("processor: connected to {}", self.address);
                let conn = start_io_tasks(stream);
                *guard = Some(conn.clone());
                Some(conn)
            }
            Err(e) => {
                debug!("processor: connect to {} failed: {}", self.address, e);
                None
            }
        }
    }
}

#[async_trait]
impl ProcessorTransport for SocketTransport {
    async fn active_target(&self) -> Option<TargetId> {
        self.open_connection()
            .await
            .map(|_| TargetId(self.address.clone()))
    }

    async fn request(
        &self,
        target: &TargetId,
        request: &ProcessorRequest,
    ) -> Result<ProcessorReply, TransportError> {
        let conn = {
            let guard = self.connection.lock().await;
            guard.as_ref().filter(|c| c.is_open()).cloned()
        }
        .ok_or_else(|| TransportError::NotAttached(target.clone()))?;

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let payload = Frame::Request {
            request_id,
            request: request.clone(),
        }
        .encode()?;

        let (reply_tx, reply_rx) = oneshot::channel();
        conn.tx
            .send(PendingRequest {
                request_id,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;

        reply_rx.await.map_err(|_| TransportError::Closed)?
    }
}

fn start_io_tasks(stream: TcpStream) -> Connection {
    let (read_half, write_half) = stream.into_split();

    // request_id → reply channel.  Writer inserts, reader resolves.
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (tx, rx) = mpsc::channel::<PendingRequest>(64);
    let closed = CancellationToken::new();

    tokio::spawn(writer_task(write_half, rx, pending.clone(), closed.clone()));
    tokio::spawn(reader_task(read_half, pending, closed.clone()));

    Connection { tx, closed }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(mut reader: R, pending: PendingMap, closed: CancellationToken)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut tmp = [0u8; 4096];
    let mut read_buf: Vec<u8> = Vec::new();

    let reason = 'read: loop {
        let n = tokio::select! {
            _ = closed.cancelled() => break 'read "writer stopped".to_string(),
            result = reader.read(&mut tmp) => match result {
                Ok(0) => break 'read "connection closed".to_string(),
                Ok(n) => n,
                Err(e) => break 'read format!("read error: {}", e),
            },
        };
        read_buf.extend_from_slice(&tmp[..n]);

        loop {
            match Frame::decode(&read_buf) {
                Ok(None) => break,
                Ok(Some((frame, consumed))) => {
                    read_buf.drain(..consumed);
                    match frame {
                        Frame::Reply { request_id, reply } => {
                            let mut map = pending.lock().await;
                            match map.remove(&request_id) {
                                Some(tx) => {
                                    let _ = tx.send(Ok(reply));
                                }
                                None => debug!("processor reader: reply for unknown req={}", request_id),
                            }
                        }
                        Frame::Request { request_id, .. } => {
                            debug!("processor reader: ignoring request frame req={}", request_id);
                        }
                    }
                }
                Err(e) => break 'read format!("undecodable frame: {}", e),
            }
        }
    };

    warn!("processor reader: {}", reason);
    closed.cancel();
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(TransportError::Closed));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<PendingRequest>,
    pending: PendingMap,
    closed: CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    loop {
        let req = tokio::select! {
            _ = closed.cancelled() => break,
            req = rx.recv() => match req {
                Some(req) => req,
                None => break,
            },
        };

        // Register reply channel before writing so the reader can match it
        pending.lock().await.insert(req.request_id, req.reply);
        if let Err(e) = writer.write_all(&req.payload).await {
            warn!("processor writer: write error: {}", e);
            if let Some(tx) = pending.lock().await.remove(&req.request_id) {
                let _ = tx.send(Err(TransportError::Io(e)));
            }
            break;
        }
    }
    closed.cancel();
    debug!("processor writer: task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use normaliser_proto::protocol::MeterReading;
    use tokio::net::TcpListener;

    /// Minimal processor: answers each request frame, `getMeter` with a
    /// fixed level and everything else with an ack.
    async fn serve_one(listener: TcpListener) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        let mut tmp = [0u8; 1024];
        loop {
            let n = stream.read(&mut tmp).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&tmp[..n]);
            while let Some((frame, used)) = Frame::decode(&buf).unwrap() {
                buf.drain(..used);
                let Frame::Request { request_id, request } = frame else {
                    continue;
                };
                let reply = match request {
                    ProcessorRequest::GetMeter => ProcessorReply::Meter(MeterReading {
                        peak_db: Some(-6.0),
                        gr_db: None,
                        active: true,
                    }),
                    _ => ProcessorReply::ack(true),
                };
                let out = Frame::Reply { request_id, reply }.encode().unwrap();
                stream.write_all(&out).await.unwrap();
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(serve_one(listener));

        let transport = SocketTransport::new(addr.clone());
        let target = transport.active_target().await.unwrap();
        assert_eq!(target, TargetId(addr));

        let reply = transport
            .request(&target, &ProcessorRequest::SetEnabled { value: true })
            .await
            .unwrap();
        assert_eq!(reply, ProcessorReply::ack(true));

        let reply = transport
            .request(&target, &ProcessorRequest::GetMeter)
            .await
            .unwrap();
        assert!(matches!(
            reply,
            ProcessorReply::Meter(MeterReading { peak_db: Some(p), .. }) if p == -6.0
        ));
    }

    #[tokio::test]
    async fn test_no_listener_means_no_target() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = SocketTransport::new(addr);
        assert_eq!(transport.active_target().await, None);
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_processor_goes_away() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept, read a little, then hang up without answering.
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut tmp = [0u8; 64];
            let _ = stream.read(&mut tmp).await;
        });

        let transport = SocketTransport::new(addr);
        let target = transport.active_target().await.unwrap();
        let err = transport
            .request(&target, &ProcessorRequest::ResumeCtx)
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
