//! Full-duplex framed transport over a single [`TcpStream`].
//!
//! The reader half runs as its own task and forwards decoded frames into a
//! channel with exactly one consumer — the in-process analogue of the
//! lock-free MPSC queue described by the wire spec. The writer half is
//! driven by a second channel so callers never block directly on socket
//! I/O, and frames from concurrent senders are never interleaved because
//! a single task owns the socket's write half.

use tokio::io::{self, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frame::{read_frame, write_frame, RawFrame};

/// Consumes frames from the socket. `recv` yields `None` once the peer
/// disconnects or a read error occurs; the reader task exits either way.
pub struct FrameReader {
    rx: mpsc::Receiver<RawFrame>,
    task: JoinHandle<()>,
}

impl FrameReader {
    fn spawn(mut read_half: OwnedReadHalf, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(Some(frame)) => {
                        if tx.send(frame).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        log::debug!("transport: peer closed the connection");
                        break;
                    }
                    Err(e) => {
                        log::warn!("transport: read error, disconnecting: {e}");
                        break;
                    }
                }
            }
        });
        Self { rx, task }
    }

    pub async fn recv(&mut self) -> Option<RawFrame> {
        self.rx.recv().await
    }

    /// Number of frames buffered but not yet consumed — surfaced through
    /// metrics rather than logged on every poll.
    pub fn queue_depth(&self) -> usize {
        self.rx.len()
    }

    pub async fn shutdown(self) {
        drop(self.rx);
        let _ = self.task.await;
    }
}

/// Serialises writes to the socket from a bounded channel of pending frames.
#[derive(Clone)]
pub struct FrameWriter {
    tx: mpsc::Sender<(u8, Vec<u8>)>,
}

impl FrameWriter {
    fn spawn(mut write_half: OwnedWriteHalf, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(u8, Vec<u8>)>(capacity);
        let task = tokio::spawn(async move {
            while let Some((kind, payload)) = rx.recv().await {
                if let Err(e) = write_frame(&mut write_half, kind, &payload).await {
                    log::warn!("transport: write error, disconnecting: {e}");
                    break;
                }
            }
            let _ = write_half.shutdown().await;
        });
        (Self { tx }, task)
    }

    pub async fn send(&self, kind: u8, payload: Vec<u8>) -> Result<(), TransportClosed> {
        self.tx.send((kind, payload)).await.map_err(|_| TransportClosed)
    }
}

#[derive(Debug)]
pub struct TransportClosed;

impl std::fmt::Display for TransportClosed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transport writer task has shut down")
    }
}

impl std::error::Error for TransportClosed {}

/// Default bound on both the read-queue and the write-queue. The read side
/// may be widened by the owner if operational monitoring shows it filling;
/// per the spec this is an acceptable place to apply back-pressure because
/// the peer will in turn block on its own write.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

pub fn split(stream: TcpStream) -> (FrameReader, FrameWriter, JoinHandle<()>) {
    stream.set_nodelay(true).ok();
    let (read_half, write_half) = stream.into_split();
    let reader = FrameReader::spawn(read_half, DEFAULT_QUEUE_CAPACITY);
    let (writer, writer_task) = FrameWriter::spawn(write_half, DEFAULT_QUEUE_CAPACITY);
    (reader, writer, writer_task)
}

pub async fn connect(addr: impl tokio::net::ToSocketAddrs) -> io::Result<(FrameReader, FrameWriter, JoinHandle<()>)> {
    let stream = TcpStream::connect(addr).await?;
    Ok(split(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn frames_sent_on_one_end_arrive_in_order_on_the_other() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_task = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (mut reader, _writer, _wt) = split(stream);
            let mut frames = Vec::new();
            while let Some(frame) = reader.recv().await {
                frames.push(frame);
                if frames.len() == 3 {
                    break;
                }
            }
            frames
        });

        let (_reader, writer, _wt) = connect(addr).await.unwrap();
        writer.send(1, b"one".to_vec()).await.unwrap();
        writer.send(2, b"two".to_vec()).await.unwrap();
        writer.send(3, b"three".to_vec()).await.unwrap();

        let frames = server_task.await.unwrap();
        assert_eq!(frames[0], RawFrame { kind: 1, payload: b"one".to_vec() });
        assert_eq!(frames[1], RawFrame { kind: 2, payload: b"two".to_vec() });
        assert_eq!(frames[2], RawFrame { kind: 3, payload: b"three".to_vec() });
    }

    #[tokio::test]
    async fn reader_recv_returns_none_after_peer_disconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client_task = tokio::spawn(async move {
            let stream = TcpStream::connect(addr).await.unwrap();
            drop(stream);
        });

        let (stream, _) = listener.accept().await.unwrap();
        let (mut reader, _writer, _wt) = split(stream);
        client_task.await.unwrap();
        assert!(reader.recv().await.is_none());
    }
}
