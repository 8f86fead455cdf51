//! Copy transports
//!
//! Ordered, reliable delivery of copy frames. `ChannelTransport` connects two
//! stores in one process; `StreamTransport` frames over any byte stream.

use std::io::{Read, Write};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, Sender};

use crate::error::{Result, StoreError};

use super::codec::{read_frame, write_frame};
use super::CopyFrame;

/// Ordered frame delivery between a copy sender and receiver
pub trait CopyTransport {
    fn send(&mut self, frame: &CopyFrame) -> Result<()>;

    /// Next frame, or `None` once the peer has finished sending
    fn receive(&mut self) -> Result<Option<CopyFrame>>;
}

/// In-process transport over crossbeam channels, carrying encoded frames
pub struct ChannelTransport {
    sender: Option<Sender<Bytes>>,
    receiver: Receiver<Bytes>,
}

impl ChannelTransport {
    /// Two connected endpoints with unbounded buffering
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = channel::unbounded();
        let (b_tx, b_rx) = channel::unbounded();
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    /// Two connected endpoints holding at most `capacity` frames in flight
    pub fn bounded_pair(capacity: usize) -> (Self, Self) {
        let (a_tx, a_rx) = channel::bounded(capacity);
        let (b_tx, b_rx) = channel::bounded(capacity);
        (Self::new(a_tx, b_rx), Self::new(b_tx, a_rx))
    }

    fn new(sender: Sender<Bytes>, receiver: Receiver<Bytes>) -> Self {
        Self {
            sender: Some(sender),
            receiver,
        }
    }

    /// Stop sending; the peer's `receive` returns `None` once drained
    pub fn close(&mut self) {
        self.sender = None;
    }
}

impl CopyTransport for ChannelTransport {
    fn send(&mut self, frame: &CopyFrame) -> Result<()> {
        let sender = self.sender.as_ref().ok_or(StoreError::Closed)?;
        sender
            .send(frame.encode()?)
            .map_err(|_| StoreError::Copy("copy peer disconnected".into()))
    }

    fn receive(&mut self) -> Result<Option<CopyFrame>> {
        match self.receiver.recv() {
            Ok(bytes) => CopyFrame::decode(&bytes).map(Some),
            Err(_) => Ok(None),
        }
    }
}

/// Transport over a blocking byte stream (e.g. a `TcpStream`)
pub struct StreamTransport<S> {
    stream: S,
}

impl<S: Read + Write> StreamTransport<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> CopyTransport for StreamTransport<S> {
    fn send(&mut self, frame: &CopyFrame) -> Result<()> {
        write_frame(&mut self.stream, frame)
    }

    fn receive(&mut self) -> Result<Option<CopyFrame>> {
        read_frame(&mut self.stream)
    }
}
