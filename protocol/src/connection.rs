//! Buffered packet transport over an async byte stream.
//!
//! [`Connection`] accumulates incoming bytes in a persistent buffer and only
//! consumes them once a complete header and payload have arrived. Dropping an
//! in-flight `recv` future (for example from a `select!` arm that lost the
//! race against an asynchronous notification) therefore never loses data: the
//! next call resumes where the interrupted one left off. This replaces the
//! classic retry-on-EINTR read loop.

use std::io;
use std::sync::LazyLock;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{HEADER_SIZE, Packet};

/// Monotonic epoch for packet timestamps.
static EPOCH: LazyLock<Instant> = LazyLock::new(Instant::now);

/// The receiving end of a MazeWar connection.
pub struct Connection<R> {
    reader: R,
    buffer: BytesMut,
}

impl<R: AsyncRead + Unpin> Connection<R> {
    pub fn new(reader: R) -> Self {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(4096),
        }
    }

    /// Receives the next packet and its payload.
    ///
    /// Returns `Ok(None)` when the peer closed the stream on a packet
    /// boundary. End-of-stream in the middle of a packet is an error.
    /// This method is cancellation safe.
    pub async fn recv(&mut self) -> io::Result<Option<(Packet, Option<Bytes>)>> {
        loop {
            if let Some(frame) = self.try_parse() {
                return Ok(Some(frame));
            }

            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "peer closed mid-packet",
                    ))
                };
            }
        }
    }

    /// Takes one complete packet off the front of the buffer, if present.
    fn try_parse(&mut self) -> Option<(Packet, Option<Bytes>)> {
        if self.buffer.len() < HEADER_SIZE {
            return None;
        }
        let pkt = Packet::decode(&self.buffer[..HEADER_SIZE]);
        let total = HEADER_SIZE + pkt.size as usize;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return None;
        }
        self.buffer.advance(HEADER_SIZE);
        let payload = if pkt.size > 0 {
            Some(self.buffer.split_to(pkt.size as usize).freeze())
        } else {
            None
        };
        Some((pkt, payload))
    }
}

/// The sending end of a MazeWar connection.
pub struct PacketWriter<W> {
    writer: W,
    scratch: BytesMut,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(writer: W) -> Self {
        PacketWriter {
            writer,
            scratch: BytesMut::with_capacity(HEADER_SIZE),
        }
    }

    /// Stamps the header with the monotonic clock and writes it, followed by
    /// `pkt.size` payload bytes. Short writes are completed before returning.
    pub async fn send(&mut self, pkt: &Packet, payload: Option<&[u8]>) -> io::Result<()> {
        let mut pkt = *pkt;
        let elapsed = EPOCH.elapsed();
        pkt.timestamp_sec = elapsed.as_secs() as u32;
        pkt.timestamp_nsec = elapsed.subsec_nanos();

        self.scratch.clear();
        pkt.encode(&mut self.scratch);
        self.writer.write_all(&self.scratch).await?;

        if pkt.size > 0 {
            if let Some(data) = payload {
                debug_assert_eq!(data.len(), pkt.size as usize);
                self.writer.write_all(data).await?;
            }
        }
        self.writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CHAT_PKT, FIRE_PKT, LOGIN_PKT};

    #[tokio::test]
    async fn send_and_recv_with_payload() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = PacketWriter::new(client);
        let mut conn = Connection::new(server);

        let pkt = Packet {
            kind: LOGIN_PKT,
            param1: b'A' as i8,
            size: 5,
            ..Default::default()
        };
        writer.send(&pkt, Some(b"alice")).await.unwrap();

        let (got, payload) = conn.recv().await.unwrap().unwrap();
        assert_eq!(got.kind, LOGIN_PKT);
        assert_eq!(got.param1, b'A' as i8);
        assert_eq!(got.size, 5);
        assert_eq!(payload.as_deref(), Some(&b"alice"[..]));
    }

    #[tokio::test]
    async fn recv_reassembles_split_packets() {
        let (mut client, server) = tokio::io::duplex(1024);
        let mut conn = Connection::new(server);

        let pkt = Packet {
            kind: CHAT_PKT,
            size: 4,
            ..Default::default()
        };
        let mut wire = BytesMut::new();
        pkt.encode(&mut wire);
        wire.extend_from_slice(b"ping");

        // Dribble the bytes out one at a time.
        let handle = tokio::spawn(async move {
            for b in wire.freeze() {
                client.write_all(&[b]).await.unwrap();
                client.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            client
        });

        let (got, payload) = conn.recv().await.unwrap().unwrap();
        assert_eq!(got.kind, CHAT_PKT);
        assert_eq!(payload.as_deref(), Some(&b"ping"[..]));
        drop(handle.await.unwrap());
    }

    #[tokio::test]
    async fn recv_returns_none_on_clean_eof() {
        let (client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(server);
        drop(client);
        assert!(conn.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recv_errors_on_truncated_packet() {
        let (mut client, server) = tokio::io::duplex(64);
        let mut conn = Connection::new(server);

        let mut wire = BytesMut::new();
        Packet::new(FIRE_PKT).encode(&mut wire);
        client.write_all(&wire[..7]).await.unwrap();
        drop(client);

        assert!(conn.recv().await.is_err());
    }

    #[tokio::test]
    async fn back_to_back_packets_parse_individually() {
        let (client, server) = tokio::io::duplex(1024);
        let mut writer = PacketWriter::new(client);
        let mut conn = Connection::new(server);

        writer.send(&Packet::new(FIRE_PKT), None).await.unwrap();
        writer.send(&Packet::new(CHAT_PKT), None).await.unwrap();

        let (first, _) = conn.recv().await.unwrap().unwrap();
        let (second, _) = conn.recv().await.unwrap().unwrap();
        assert_eq!(first.kind, FIRE_PKT);
        assert_eq!(second.kind, CHAT_PKT);
    }
}
