use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use crate::error::{Error, Result};
use crate::frame::Frame;

/// Bounded hand-over of detected frames from the decoding/inference side to
/// the tracking side of one stream.
pub fn frame_channel(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::sync_channel(capacity.max(1));

    (FrameSender { tx }, FrameReceiver { rx })
}

#[derive(Clone)]
pub struct FrameSender {
    tx: SyncSender<Frame>,
}

impl FrameSender {
    /// Blocks while the queue is full.
    pub fn send(&self, frame: Frame) -> Result<()> {
        let index = frame.index;

        self.tx.send(frame).map_err(|_| Error::StreamClosed(index))
    }

    /// Hands the frame back when the queue is full, so the producer can
    /// decide to drop or retry it.
    pub fn try_send(&self, frame: Frame) -> Result<Option<Frame>> {
        match self.tx.try_send(frame) {
            Ok(()) => Ok(None),
            Err(TrySendError::Full(frame)) => Ok(Some(frame)),
            Err(TrySendError::Disconnected(frame)) => Err(Error::StreamClosed(frame.index)),
        }
    }
}

pub struct FrameReceiver {
    rx: Receiver<Frame>,
}

impl Iterator for FrameReceiver {
    type Item = Frame;

    /// Yields frames in the order they were sent until every sender is dropped.
    fn next(&mut self) -> Option<Frame> {
        self.rx.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_queue_hands_frame_back() {
        let (tx, mut rx) = frame_channel(1);

        assert!(tx.try_send(Frame::new(0, 0.0, vec![])).unwrap().is_none());
        let back = tx.try_send(Frame::new(1, 0.0, vec![])).unwrap();
        assert_eq!(back.map(|f| f.index), Some(1));

        assert_eq!(rx.next().map(|f| f.index), Some(0));
    }

    #[test]
    fn preserves_order_and_ends_with_sender() {
        let (tx, rx) = frame_channel(2);

        let producer = std::thread::spawn(move || {
            for i in 0..20 {
                tx.send(Frame::new(i, i as f32 / 30.0, vec![])).unwrap();
            }
        });

        let indices: Vec<u64> = rx.map(|f| f.index).collect();
        producer.join().unwrap();

        assert_eq!(indices, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn send_to_closed_stream_fails() {
        let (tx, rx) = frame_channel(1);
        drop(rx);

        assert!(matches!(
            tx.send(Frame::new(5, 0.0, vec![])),
            Err(Error::StreamClosed(5))
        ));
    }
}
