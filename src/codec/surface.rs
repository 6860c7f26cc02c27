use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::error::{PipelineError, Result};
use crate::pipeline::types::Sample;

/// Zero-copy destination shared by a decoder (producer) and an encoder
/// (consumer).
///
/// Frames rendered by the decoder travel over a bounded channel and are picked
/// up by the encoder without the orchestrator ever inspecting the payload. A
/// producer blocks while the channel is full and is woken with an error once
/// the surface is closed.
#[derive(Debug, Clone)]
pub struct Surface {
    tx: mpsc::Sender<Sample>,
    rx: Arc<Mutex<mpsc::Receiver<Sample>>>,
    flags: Arc<SurfaceFlags>,
}

#[derive(Debug, Default)]
struct SurfaceFlags {
    end_of_stream: AtomicBool,
    closed: AtomicBool,
}

/// Result of polling a surface for the next frame
#[derive(Debug)]
pub enum SurfaceFrame {
    Frame(Sample),
    /// The producer side ended and every frame was consumed
    EndOfStream,
    /// Nothing arrived within the timeout
    Empty,
    Closed,
}

const TAKE_POLL_SLICE: Duration = Duration::from_millis(5);

impl Surface {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel::<Sample>(capacity.max(1));
        Surface {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            flags: Arc::new(SurfaceFlags::default()),
        }
    }

    /// Present a frame, blocking while the consumer catches up
    pub fn render(&self, frame: Sample) -> Result<()> {
        if self.flags.closed.load(Ordering::Acquire) {
            return Err(PipelineError::InvalidState("surface closed".into()));
        }
        if self.flags.end_of_stream.load(Ordering::Acquire) {
            return Err(PipelineError::InvalidState(
                "frame rendered after end of stream".into(),
            ));
        }
        self.tx
            .blocking_send(frame)
            .map_err(|_| PipelineError::InvalidState("surface closed".into()))
    }

    /// Mark that no more frames will be rendered; never blocks
    pub fn end_of_stream(&self) -> Result<()> {
        self.flags.end_of_stream.store(true, Ordering::Release);
        Ok(())
    }

    /// Refuse further frames and wake a producer waiting for room
    pub fn close(&self) {
        self.flags.closed.store(true, Ordering::Release);
        if let Ok(mut rx) = self.rx.lock() {
            rx.close();
        }
    }

    /// Take the next frame, waiting at most `timeout`
    pub fn take(&self, timeout: Duration) -> Result<SurfaceFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            // read before polling so frames rendered ahead of the mark drain first
            let ended = self.flags.end_of_stream.load(Ordering::Acquire);
            let polled = self
                .rx
                .lock()
                .map_err(|_| PipelineError::InvalidState("surface lock poisoned".into()))?
                .try_recv();
            match polled {
                Ok(frame) => return Ok(SurfaceFrame::Frame(frame)),
                Err(TryRecvError::Disconnected) => return Ok(SurfaceFrame::Closed),
                Err(TryRecvError::Empty) if ended => return Ok(SurfaceFrame::EndOfStream),
                Err(TryRecvError::Empty) => {}
            }
            if self.flags.closed.load(Ordering::Acquire) {
                return Ok(SurfaceFrame::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(SurfaceFrame::Empty);
            }
            std::thread::sleep(TAKE_POLL_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::Timestamp;
    use bytes::Bytes;

    fn frame(pts: i64) -> Sample {
        Sample::new(Bytes::from_static(b"abcd"), Timestamp::from_micros(pts))
    }

    fn take_pts(surface: &Surface) -> i64 {
        match surface.take(Duration::from_millis(50)).unwrap() {
            SurfaceFrame::Frame(f) => f.pts.micros,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_fifo_then_end_of_stream() {
        let surface = Surface::new(4);
        surface.render(frame(1)).unwrap();
        surface.render(frame(2)).unwrap();
        surface.end_of_stream().unwrap();

        assert_eq!(take_pts(&surface), 1);
        assert_eq!(take_pts(&surface), 2);
        assert!(matches!(
            surface.take(Duration::from_millis(1)).unwrap(),
            SurfaceFrame::EndOfStream
        ));
        assert!(surface.render(frame(3)).is_err());
    }

    #[test]
    fn test_empty_take_times_out() {
        let surface = Surface::new(1);
        assert!(matches!(
            surface.take(Duration::from_millis(2)).unwrap(),
            SurfaceFrame::Empty
        ));
    }

    #[test]
    fn test_blocked_render_wakes_on_consume() {
        let surface = Surface::new(1);
        surface.render(frame(1)).unwrap();

        let producer = surface.clone();
        let handle = std::thread::spawn(move || producer.render(frame(2)));

        std::thread::sleep(Duration::from_millis(20));
        assert!(!handle.is_finished());
        assert_eq!(take_pts(&surface), 1);
        handle.join().unwrap().unwrap();
        assert_eq!(take_pts(&surface), 2);
    }

    #[test]
    fn test_close_unblocks_producer() {
        let surface = Surface::new(1);
        surface.render(frame(1)).unwrap();

        let producer = surface.clone();
        let handle = std::thread::spawn(move || producer.render(frame(2)));
        std::thread::sleep(Duration::from_millis(10));
        surface.close();

        assert!(handle.join().unwrap().is_err());
        assert!(surface.render(frame(3)).is_err());
    }
}
