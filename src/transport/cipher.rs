//! # Transport Encryption Seam
//!
//! Game transports switch to a stream cipher (AES/CFB8 for vanilla peers)
//! partway through login, underneath the framing layer. The cipher itself is
//! out of scope here; [`StreamTransform`] is the seam it plugs into.
//!
//! [`CipherStream`] wraps any transport and applies one transform to every
//! byte read and another to every byte written. It is installed before the
//! transport reaches [`Connection::spawn`](crate::transport::connection::Connection::spawn),
//! typically via [`PacketReader::into_inner`](crate::transport::stream::PacketReader::into_inner)
//! once the login exchange has finished.
//!
//! Transforms are stateful and byte-ordered, so encrypted bytes the
//! transport did not accept yet are kept and written before anything new.

use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// In-place, length-preserving byte transform
pub trait StreamTransform: Send {
    fn apply(&mut self, data: &mut [u8]);
}

impl<F> StreamTransform for F
where
    F: FnMut(&mut [u8]) + Send,
{
    fn apply(&mut self, data: &mut [u8]) {
        self(data)
    }
}

/// Transport wrapper applying `E` on write and `D` on read
pub struct CipherStream<S, E, D> {
    inner: S,
    encrypt: E,
    decrypt: D,
    pending: BytesMut,
}

impl<S, E, D> CipherStream<S, E, D> {
    pub fn new(inner: S, encrypt: E, decrypt: D) -> Self {
        Self {
            inner,
            encrypt,
            decrypt,
            pending: BytesMut::new(),
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    /// Encrypted bytes accepted but not yet written to the transport
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

impl<S, E, D> CipherStream<S, E, D>
where
    S: AsyncWrite + Unpin,
{
    fn poll_write_pending(&mut self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        while !self.pending.is_empty() {
            let n = ready!(Pin::new(&mut self.inner).poll_write(cx, &self.pending))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.pending.advance(n);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S, E, D> AsyncRead for CipherStream<S, E, D>
where
    S: AsyncRead + Unpin,
    E: Unpin,
    D: StreamTransform + Unpin,
{
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        this.decrypt.apply(&mut buf.filled_mut()[before..]);
        Poll::Ready(Ok(()))
    }
}

impl<S, E, D> AsyncWrite for CipherStream<S, E, D>
where
    S: AsyncWrite + Unpin,
    E: StreamTransform + Unpin,
    D: Unpin,
{
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(this.poll_write_pending(cx))?;
        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let start = this.pending.len();
        this.pending.extend_from_slice(data);
        this.encrypt.apply(&mut this.pending[start..]);

        // Push what the transport takes now; the rest goes out on the next call.
        if let Poll::Ready(Err(e)) = this.poll_write_pending(cx) {
            return Poll::Ready(Err(e));
        }
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_pending(cx))?;
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        ready!(this.poll_write_pending(cx))?;
        Pin::new(&mut this.inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{CompressionStage, CompressionThreshold};
    use crate::core::packet::OutgoingPacket;
    use crate::transport::stream::{PacketReader, PacketSender};
    use crate::utils::buffer_pool::BufferPool;
    use tokio::io::AsyncReadExt;

    /// Stateful XOR keystream standing in for a real stream cipher
    struct RollingXor(u8);

    impl StreamTransform for RollingXor {
        fn apply(&mut self, data: &mut [u8]) {
            for byte in data {
                *byte ^= self.0;
                self.0 = self.0.wrapping_mul(31).wrapping_add(7);
            }
        }
    }

    fn stage(pool: &BufferPool) -> CompressionStage {
        CompressionStage::new(CompressionThreshold::new(16), pool.clone())
    }

    #[tokio::test]
    async fn test_packets_survive_encryption() {
        let pool = BufferPool::new(2);
        let (a, b) = tokio::io::duplex(256);
        let client = CipherStream::new(a, RollingXor(0x5A), RollingXor(0x11));
        let server = CipherStream::new(b, RollingXor(0x11), RollingXor(0x5A));

        let mut sender = PacketSender::new(client, stage(&pool));
        let mut reader = PacketReader::new(server, stage(&pool));

        for id in 0..20 {
            let payload = vec![id as u8; (id as usize) * 13];
            sender.send_packet(&OutgoingPacket::new(id, payload.clone())).await.unwrap();
            sender.flush().await.unwrap();

            let packet = reader.read_next_packet().await.unwrap();
            assert_eq!(packet.id(), id);
            assert_eq!(packet.payload(), payload.as_slice());
        }
    }

    #[tokio::test]
    async fn test_wire_bytes_are_transformed() {
        let (a, mut b) = tokio::io::duplex(64);
        let mut client = CipherStream::new(a, |data: &mut [u8]| data.iter_mut().for_each(|x| *x = !*x), RollingXor(0));

        tokio::io::AsyncWriteExt::write_all(&mut client, &[0x00, 0x0F]).await.unwrap();
        tokio::io::AsyncWriteExt::flush(&mut client).await.unwrap();

        let mut wire = [0u8; 2];
        b.read_exact(&mut wire).await.unwrap();
        assert_eq!(wire, [0xFF, 0xF0]);
        assert_eq!(client.pending(), 0);
    }

    #[tokio::test]
    async fn test_transport_holds_only_ciphertext() {
        let pool = BufferPool::new(0);
        let cipher = CipherStream::new(Vec::new(), RollingXor(0x33), RollingXor(0));
        let mut sender = PacketSender::new(cipher, stage(&pool));
        sender.send_packet(&OutgoingPacket::new(0x01, b"plain".to_vec())).await.unwrap();
        sender.flush().await.unwrap();

        let cipher = sender.into_inner();
        let wire = cipher.get_ref();
        assert_eq!(wire.len(), 8);
        assert_ne!(&wire[3..], b"plain");

        let mut plain = wire.clone();
        RollingXor(0x33).apply(&mut plain);
        assert_eq!(plain, [0x07, 0x00, 0x01, b'p', b'l', b'a', b'i', b'n']);
    }
}
