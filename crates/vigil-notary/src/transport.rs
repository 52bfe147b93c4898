//! Session framing and the TCP servers.
//!
//! Frames are a u32 little-endian length followed by a bincode payload,
//! with a hard size cap. The notary session runs over tokio; the
//! coordinator's replica links use blocking sockets because they are
//! driven from the synchronous commit path.
//!
//! Internal service failures never produce a response frame: the session
//! just ends, and the client's retry is safe because commits are
//! idempotent.

use crate::messages::{CommitResponse, RequestEnvelope};
use crate::service::NotaryService;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use vigil_merkle::SecureHash;
use vigil_uniqueness::{ClusterReplica, Replica, ReplicaReply};

pub const MAX_FRAME_BYTES: u32 = 4 * 1024 * 1024;

const REPLICA_CALL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(u32),

    #[error("codec error: {0}")]
    Codec(String),
}

pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), TransportError>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = bincode::serialize(message).map_err(|e| TransportError::Codec(e.to_string()))?;
    if payload.len() as u32 > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(payload.len() as u32));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, TransportError>
where
    R: tokio::io::AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut length_bytes = [0u8; 4];
    reader.read_exact(&mut length_bytes).await?;
    let length = u32::from_le_bytes(length_bytes);
    if length > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(length));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    bincode::deserialize(&payload).map_err(|e| TransportError::Codec(e.to_string()))
}

fn write_frame_sync<W: Write, T: Serialize>(
    writer: &mut W,
    message: &T,
) -> Result<(), TransportError> {
    let payload = bincode::serialize(message).map_err(|e| TransportError::Codec(e.to_string()))?;
    if payload.len() as u32 > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(payload.len() as u32));
    }
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

fn read_frame_sync<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, TransportError> {
    let mut length_bytes = [0u8; 4];
    reader.read_exact(&mut length_bytes)?;
    let length = u32::from_le_bytes(length_bytes);
    if length > MAX_FRAME_BYTES {
        return Err(TransportError::FrameTooLarge(length));
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload)?;
    bincode::deserialize(&payload).map_err(|e| TransportError::Codec(e.to_string()))
}

/// One blocking request/response exchange.
fn call_sync<Req: Serialize, Resp: DeserializeOwned>(
    addr: &str,
    request: &Req,
) -> Result<Resp, TransportError> {
    let mut stream = std::net::TcpStream::connect(addr)?;
    stream.set_read_timeout(Some(REPLICA_CALL_TIMEOUT))?;
    stream.set_write_timeout(Some(REPLICA_CALL_TIMEOUT))?;
    write_frame_sync(&mut stream, request)?;
    read_frame_sync(&mut stream)
}

/// Serves the notary request/response session.
pub struct NotaryServer {
    service: Arc<NotaryService>,
}

impl NotaryServer {
    pub fn new(service: Arc<NotaryService>) -> Self {
        NotaryServer { service }
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        tracing::info!(addr = %listener.local_addr()?, identity = %self.service.identity(), "notary listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            tracing::debug!(%peer, "session opened");
            let service = Arc::clone(&self.service);
            tokio::spawn(async move {
                if let Err(e) = handle_session(service, stream).await {
                    tracing::debug!(%peer, error = %e, "session ended");
                }
            });
        }
    }
}

async fn handle_session(
    service: Arc<NotaryService>,
    mut stream: TcpStream,
) -> Result<(), TransportError> {
    loop {
        let envelope: RequestEnvelope = read_frame(&mut stream).await?;
        let worker = Arc::clone(&service);
        let outcome = tokio::task::spawn_blocking(move || worker.process(&envelope))
            .await
            .map_err(|e| TransportError::Codec(e.to_string()))?;
        match outcome {
            Ok(response) => write_frame(&mut stream, &response).await?,
            Err(error) => {
                // internal failure: log and end the session without a frame
                tracing::error!(%error, "request failed internally");
                return Ok(());
            }
        }
    }
}

/// Client side of the notary session.
pub struct NotaryClient {
    addr: String,
}

impl NotaryClient {
    pub fn new(addr: impl Into<String>) -> Self {
        NotaryClient { addr: addr.into() }
    }

    pub async fn request(
        &self,
        envelope: &RequestEnvelope,
    ) -> Result<CommitResponse, TransportError> {
        let mut stream = TcpStream::connect(&self.addr).await?;
        write_frame(&mut stream, envelope).await?;
        read_frame(&mut stream).await
    }
}

/// Replica-link wire protocol: the ordering vote and the delivery of agreed
/// command bytes.
#[derive(Debug, Serialize, Deserialize)]
pub enum ReplicaRequest {
    Vote { seq: u64, digest: SecureHash },
    Deliver { seq: u64, command: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum ReplicaResponse {
    Vote(SecureHash),
    Reply(ReplicaReply),
    /// Delivery for a sequence number this replica never voted on, or with
    /// bytes that do not hash to the voted digest.
    Unknown,
}

/// Serves one replica to its coordinator.
pub struct ReplicaServer {
    replica: Arc<Replica>,
    accepted: Arc<std::sync::Mutex<std::collections::HashMap<u64, SecureHash>>>,
}

impl ReplicaServer {
    pub fn new(replica: Arc<Replica>) -> Self {
        ReplicaServer {
            replica,
            accepted: Arc::new(std::sync::Mutex::new(std::collections::HashMap::new())),
        }
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), TransportError> {
        tracing::info!(addr = %listener.local_addr()?, index = self.replica.index(), "replica listening");
        loop {
            let (stream, peer) = listener.accept().await?;
            let replica = Arc::clone(&self.replica);
            let accepted = Arc::clone(&self.accepted);
            tokio::spawn(async move {
                if let Err(e) = handle_replica_session(replica, accepted, stream).await {
                    tracing::debug!(%peer, error = %e, "replica session ended");
                }
            });
        }
    }
}

async fn handle_replica_session(
    replica: Arc<Replica>,
    accepted: Arc<std::sync::Mutex<std::collections::HashMap<u64, SecureHash>>>,
    mut stream: TcpStream,
) -> Result<(), TransportError> {
    loop {
        let request: ReplicaRequest = read_frame(&mut stream).await?;
        let response = match request {
            ReplicaRequest::Vote { seq, digest } => {
                accepted.lock().expect("accepted lock").insert(seq, digest);
                ReplicaResponse::Vote(digest)
            }
            ReplicaRequest::Deliver { seq, command } => {
                let voted = accepted.lock().expect("accepted lock").get(&seq).copied();
                match voted {
                    Some(digest) if digest == SecureHash::hash(&command) => {
                        let worker = Arc::clone(&replica);
                        let reply =
                            tokio::task::spawn_blocking(move || worker.process(&command))
                                .await
                                .map_err(|e| TransportError::Codec(e.to_string()))?;
                        ReplicaResponse::Reply(reply)
                    }
                    _ => {
                        tracing::warn!(seq, "delivery without a matching vote");
                        ReplicaResponse::Unknown
                    }
                }
            }
        };
        write_frame(&mut stream, &response).await?;
    }
}

/// A remote cluster member reached over its configured address. Transport
/// failures surface as `None`, which the coordinator treats the same as a
/// faulty replica.
pub struct RemoteReplica {
    index: u32,
    addr: String,
}

impl RemoteReplica {
    pub fn new(index: u32, addr: impl Into<String>) -> Self {
        RemoteReplica {
            index,
            addr: addr.into(),
        }
    }
}

impl ClusterReplica for RemoteReplica {
    fn index(&self) -> u32 {
        self.index
    }

    fn vote(&self, seq: u64, digest: SecureHash) -> Option<SecureHash> {
        match call_sync::<_, ReplicaResponse>(&self.addr, &ReplicaRequest::Vote { seq, digest }) {
            Ok(ReplicaResponse::Vote(voted)) => Some(voted),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(replica = self.index, addr = %self.addr, error = %e, "vote failed");
                None
            }
        }
    }

    fn deliver(&self, seq: u64, command_bytes: &[u8]) -> Option<ReplicaReply> {
        let request = ReplicaRequest::Deliver {
            seq,
            command: command_bytes.to_vec(),
        };
        match call_sync::<_, ReplicaResponse>(&self.addr, &request) {
            Ok(ReplicaResponse::Reply(reply)) => Some(reply),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(replica = self.index, addr = %self.addr, error = %e, "deliver failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let (mut a, mut b) = tokio::io::duplex(1024);
        write_frame(&mut a, &"hello".to_string()).await.unwrap();
        let back: String = read_frame(&mut b).await.unwrap();
        assert_eq!(back, "hello");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let mut header = (MAX_FRAME_BYTES + 1).to_le_bytes().to_vec();
        header.extend_from_slice(&[0u8; 16]);
        tokio::spawn(async move {
            let _ = a.write_all(&header).await;
        });
        let result: Result<String, _> = read_frame(&mut b).await;
        assert!(matches!(result, Err(TransportError::FrameTooLarge(_))));
    }
}
