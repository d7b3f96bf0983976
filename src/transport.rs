//! Connection-per-message transport over TCP.
//!
//! Every outbound message opens a fresh connection, writes one JSON object,
//! half-closes the write side, and optionally waits for a single JSON
//! response before the connection is dropped. There is no length prefix:
//! the receiver frames on the sender's EOF.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{MeshError, MeshResult};
use crate::message::{self, DecodeError, Message};

/// 2 s connect/read timeout, per §4.2.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Send `msg` to `host:port` and return, swallowing connect failures and
/// timeouts after logging them. Used for one-way sends (alerts, REQUEST,
/// REPLY, RELEASE) where the protocols tolerate lost sends to unreachable
/// peers by treating silence as abstention.
pub async fn send_one_way(host: &str, port: u16, msg: &Message, connect_timeout: Duration) {
    if let Err(err) = send_and_maybe_read(host, port, msg, connect_timeout, false).await {
        tracing::warn!(
            addr = %format!("{host}:{port}"),
            kind = msg.kind_str(),
            error = %err,
            "one-way send failed, treating as abstention"
        );
    }
}

/// Send `msg` to `host:port` and wait for a single response, used by the 2PC
/// coordinator's PREPARE/COMMIT/ABORT sends where a missing response is
/// meaningful (an implicit no-vote or a lost ack).
pub async fn send_and_read(
    host: &str,
    port: u16,
    msg: &Message,
    connect_timeout: Duration,
) -> MeshResult<Message> {
    match send_and_maybe_read(host, port, msg, connect_timeout, true).await? {
        Some(reply) => Ok(reply),
        None => unreachable!("send_and_maybe_read(.., true) always returns Some on success"),
    }
}

async fn send_and_maybe_read(
    host: &str,
    port: u16,
    msg: &Message,
    connect_timeout: Duration,
    expect_response: bool,
) -> MeshResult<Option<Message>> {
    let addr = format!("{host}:{port}");
    let mut stream = match timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(MeshError::Connect { addr, source }),
        Err(_) => return Err(MeshError::ConnectTimeout { addr }),
    };

    let payload = serde_json::to_vec(msg).expect("Message serialization is infallible");
    stream
        .write_all(&payload)
        .await
        .map_err(|source| MeshError::Io { addr: addr.clone(), source })?;
    stream
        .shutdown()
        .await
        .map_err(|source| MeshError::Io { addr: addr.clone(), source })?;

    if !expect_response {
        return Ok(None);
    }

    let mut buf = Vec::new();
    match timeout(connect_timeout, stream.read_to_end(&mut buf)).await {
        Ok(Ok(_)) => {}
        Ok(Err(source)) => return Err(MeshError::Io { addr, source }),
        Err(_) => return Err(MeshError::ReadTimeout { addr }),
    }

    let reply = message::decode(&buf).map_err(|err| match err {
        DecodeError::Malformed(source) => MeshError::Malformed { addr: addr.clone(), source },
        DecodeError::UnknownKind { kind, sender_port, sender_region, ts } => {
            MeshError::UnknownKind { addr: addr.clone(), kind, sender_port, sender_region, ts }
        }
    })?;
    Ok(Some(reply))
}

/// Read exactly one framed message off an accepted inbound connection.
pub async fn read_one(stream: &mut TcpStream, peer: SocketAddr) -> MeshResult<Message> {
    let addr = peer.to_string();
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|source| MeshError::Io { addr: addr.clone(), source })?;
    message::decode(&buf).map_err(|err| match err {
        DecodeError::Malformed(source) => MeshError::Malformed { addr, source },
        DecodeError::UnknownKind { kind, sender_port, sender_region, ts } => {
            MeshError::UnknownKind { addr, kind, sender_port, sender_region, ts }
        }
    })
}

/// Write a single response and half-close, mirroring the shape of an
/// outbound send.
pub async fn write_one(stream: &mut TcpStream, peer: SocketAddr, msg: &Message) -> MeshResult<()> {
    let addr = peer.to_string();
    let payload = serde_json::to_vec(msg).expect("Message serialization is infallible");
    stream
        .write_all(&payload)
        .await
        .map_err(|source| MeshError::Io { addr: addr.clone(), source })?;
    stream
        .shutdown()
        .await
        .map_err(|source| MeshError::Io { addr, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn round_trips_request_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, peer) = listener.accept().await.unwrap();
            let msg = read_one(&mut stream, peer).await.unwrap();
            assert_eq!(msg.kind_str(), "REQUEST");
            let reply = Message::Reply {
                sender_port: 9,
                sender_region: "CHICAGO".into(),
                ts: 1,
            };
            write_one(&mut stream, peer, &reply).await.unwrap();
        });

        let request = Message::Request {
            sender_port: 1,
            sender_region: "NEW YORK".into(),
            ts: 1,
        };
        let reply = send_and_read(&addr.ip().to_string(), addr.port(), &request, DEFAULT_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(reply.kind_str(), "REPLY");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn one_way_send_to_dead_port_is_swallowed() {
        // Nothing listens on 127.0.0.1:1; connect should fail fast and not panic.
        let msg = Message::Release {
            sender_port: 1,
            sender_region: "CHICAGO".into(),
            ts: 1,
        };
        send_one_way("127.0.0.1", 1, &msg, Duration::from_millis(200)).await;
    }
}
