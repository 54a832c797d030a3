use std::collections::VecDeque;

use thiserror::Error;

use crate::protocol::ethernet::MAX_FRAME_LEN;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum TransportError {
    #[error("link is down")]
    LinkDown,
    #[error("frame of {len} bytes exceeds the device limit")]
    FrameTooLarge { len: usize },
    #[error("device error: {0}")]
    Device(String),
}

/// The network interface chip as seen by the stack.
pub trait RawTransport {
    fn frame_available(&mut self) -> bool;
    /// Reports whether the receive ring overflowed since the last call and clears
    /// the condition.
    fn overflow_occurred(&mut self) -> bool;
    /// Copies the next frame into `buf` and returns its length, truncated to
    /// `buf.len()`.
    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize>;
    fn transmit_frame(&mut self, frame: &[u8]) -> Result<(), TransportError>;
    fn link_is_up(&self) -> bool;
}

/// In-memory loopback for tests and host tooling.
#[derive(Debug)]
pub struct MemoryTransport {
    pub rx: VecDeque<Vec<u8>>,
    pub tx: VecDeque<Vec<u8>>,
    pub link_up: bool,
    pub overflow: bool,
}

impl MemoryTransport {
    #[must_use]
    pub fn new() -> Self {
        MemoryTransport {
            rx: VecDeque::new(),
            tx: VecDeque::new(),
            link_up: true,
            overflow: false,
        }
    }

    pub fn inject(&mut self, frame: Vec<u8>) {
        self.rx.push_back(frame);
    }

    pub fn take_sent(&mut self) -> Option<Vec<u8>> {
        self.tx.pop_front()
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl RawTransport for MemoryTransport {
    fn frame_available(&mut self) -> bool {
        !self.rx.is_empty()
    }

    fn overflow_occurred(&mut self) -> bool {
        std::mem::take(&mut self.overflow)
    }

    fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.rx.pop_front()?;
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Some(len)
    }

    fn transmit_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.link_up {
            return Err(TransportError::LinkDown);
        }
        if frame.len() > MAX_FRAME_LEN {
            return Err(TransportError::FrameTooLarge { len: frame.len() });
        }
        self.tx.push_back(frame.to_vec());
        Ok(())
    }

    fn link_is_up(&self) -> bool {
        self.link_up
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback() {
        let mut t = MemoryTransport::new();
        assert!(!t.frame_available());
        t.inject(vec![1, 2, 3, 4]);
        assert!(t.frame_available());
        let mut buf = [0u8; 2];
        assert_eq!(t.receive_frame(&mut buf), Some(2));
        assert_eq!(buf, [1, 2]);
        assert_eq!(t.receive_frame(&mut buf), None);

        t.transmit_frame(&[9; 60]).unwrap();
        assert_eq!(t.take_sent().map(|f| f.len()), Some(60));
    }

    #[test]
    fn overflow_clears() {
        let mut t = MemoryTransport::new();
        t.overflow = true;
        assert!(t.overflow_occurred());
        assert!(!t.overflow_occurred());
    }

    #[test]
    fn link_down() {
        let mut t = MemoryTransport::new();
        t.link_up = false;
        assert_eq!(t.transmit_frame(&[0; 60]), Err(TransportError::LinkDown));
        t.link_up = true;
        assert_eq!(
            t.transmit_frame(&vec![0; MAX_FRAME_LEN + 1]),
            Err(TransportError::FrameTooLarge {
                len: MAX_FRAME_LEN + 1
            })
        );
    }
}
