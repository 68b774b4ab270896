//! A TCP processor stand-in speaking the real framing.

use std::sync::{Arc, Mutex};

use normaliser_proto::protocol::{Frame, MeterReading, ProcessorReply, ProcessorRequest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Clone, Default)]
pub struct Received(Arc<Mutex<Vec<ProcessorRequest>>>);

impl Received {
    pub fn all(&self) -> Vec<ProcessorRequest> {
        self.0.lock().unwrap().clone()
    }

    pub fn of(&self, kind: &str) -> Vec<ProcessorRequest> {
        self.all().into_iter().filter(|r| r.kind() == kind).collect()
    }
}

/// Binds an ephemeral port and serves every connection.  Returns the
/// address and the log of received requests.
pub async fn spawn_processor(peak_db: f32) -> (String, Received) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let received = Received::default();
    let log = received.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve(stream, peak_db, log.clone()));
        }
    });
    (addr, received)
}

async fn serve(mut stream: TcpStream, peak_db: f32, log: Received) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&tmp[..n]);
        while let Ok(Some((frame, used))) = Frame::decode(&buf) {
            buf.drain(..used);
            let Frame::Request { request_id, request } = frame else {
                continue;
            };
            log.0.lock().unwrap().push(request.clone());
            let reply = match request {
                ProcessorRequest::GetMeter => ProcessorReply::Meter(MeterReading {
                    peak_db: Some(peak_db),
                    gr_db: Some(0.0),
                    active: true,
                }),
                ProcessorRequest::GetSpectrum => ProcessorReply::Spectrum { bands: vec![0.0; 10] },
                _ => ProcessorReply::ack(true),
            };
            let out = Frame::Reply { request_id, reply }.encode().unwrap();
            if stream.write_all(&out).await.is_err() {
                return;
            }
        }
    }
}

/// An address with nothing listening on it.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}
