//! Encoder input surface
//!
//! The encoder owns the receiving end; the capture binder draws frames into
//! the sending end from its own producer thread.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender, TrySendError, bounded};

use crate::{CaptureError, CaptureResult, CapturedFrame};

/// Item travelling through the surface queue
#[derive(Debug)]
pub enum SurfaceEvent {
    Frame(CapturedFrame),
    /// No frame submitted after this marker belongs to the recording
    EndOfStream,
    /// The capture source went away mid-recording
    SourceLost(String),
}

#[derive(Debug)]
struct SurfaceCounters {
    delivered: AtomicU64,
    dropped: AtomicU64,
    origin: Instant,
    /// Nanoseconds after `origin` of the newest frame offered, plus one; zero when none
    last_offered: AtomicU64,
}

impl SurfaceCounters {
    fn new() -> Self {
        Self {
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            origin: Instant::now(),
            last_offered: AtomicU64::new(0),
        }
    }

    fn record_offered(&self, at: Instant) {
        let nanos = at.saturating_duration_since(self.origin).as_nanos() as u64;
        self.last_offered.fetch_max(nanos.saturating_add(1), Ordering::Relaxed);
    }

    fn last_offered(&self) -> Option<Instant> {
        match self.last_offered.load(Ordering::Relaxed) {
            0 => None,
            offset => Some(self.origin + Duration::from_nanos(offset - 1)),
        }
    }
}

/// Drawing target handed to the capture binder
#[derive(Debug, Clone)]
pub struct InputSurface {
    tx: Sender<SurfaceEvent>,
    width: u32,
    height: u32,
    counters: Arc<SurfaceCounters>,
}

/// Consuming end of an [`InputSurface`], owned by the encoder worker
#[derive(Debug)]
pub struct SurfaceReceiver {
    rx: Receiver<SurfaceEvent>,
    counters: Arc<SurfaceCounters>,
}

impl InputSurface {
    /// Create a surface with room for `depth` queued frames
    pub fn new(width: u32, height: u32, depth: usize) -> (InputSurface, SurfaceReceiver) {
        let (tx, rx) = bounded(depth.max(1));
        let counters = Arc::new(SurfaceCounters::new());

        (
            InputSurface {
                tx,
                width,
                height,
                counters: counters.clone(),
            },
            SurfaceReceiver { rx, counters },
        )
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Queue a frame without blocking the producer.
    ///
    /// Returns `Ok(false)` when the encoder is behind and the frame was dropped.
    pub fn submit(&self, frame: CapturedFrame) -> CaptureResult<bool> {
        if frame.width != self.width || frame.height != self.height {
            return Err(CaptureError::SizeMismatch {
                frame_width: frame.width,
                frame_height: frame.height,
                width: self.width,
                height: self.height,
            });
        }

        self.counters.record_offered(frame.timestamp);
        match self.tx.try_send(SurfaceEvent::Frame(frame)) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(CaptureError::SurfaceClosed),
        }
    }

    /// Queue the end-of-stream marker behind every frame already submitted
    pub fn signal_end_of_stream(&self, timeout: Duration) -> CaptureResult<()> {
        match self.tx.send_timeout(SurfaceEvent::EndOfStream, timeout) {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(CaptureError::Timeout("surface drain")),
            Err(SendTimeoutError::Disconnected(_)) => Err(CaptureError::SurfaceClosed),
        }
    }

    /// Tell the encoder the source is gone; frames already queued stay ahead of it
    pub fn report_source_lost(&self, reason: impl Into<String>, timeout: Duration) -> CaptureResult<()> {
        match self
            .tx
            .send_timeout(SurfaceEvent::SourceLost(reason.into()), timeout)
        {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(CaptureError::Timeout("surface drain")),
            Err(SendTimeoutError::Disconnected(_)) => Err(CaptureError::SurfaceClosed),
        }
    }

    /// Frames accepted into the queue so far
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }

    /// Frames dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }
}

impl SurfaceReceiver {
    /// Wait up to `timeout` for the next event; `Ok(None)` on timeout
    pub fn recv_timeout(&self, timeout: Duration) -> CaptureResult<Option<SurfaceEvent>> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::SurfaceClosed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.counters.dropped.load(Ordering::Relaxed)
    }

    /// Capture time of the newest frame offered to the surface, kept or dropped
    pub fn last_offered(&self) -> Option<Instant> {
        self.counters.last_offered()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Instant;

    use crate::PixelFormat;

    fn frame(width: u32, height: u32, sequence: u64) -> CapturedFrame {
        CapturedFrame {
            data: Bytes::from(vec![0u8; (width * height * 4) as usize]),
            width,
            height,
            stride: width * 4,
            format: PixelFormat::Bgra8,
            timestamp: Instant::now(),
            sequence,
        }
    }

    #[test]
    fn test_submit_drops_when_full() {
        let (surface, receiver) = InputSurface::new(2, 2, 1);

        assert!(surface.submit(frame(2, 2, 0)).unwrap());
        assert!(!surface.submit(frame(2, 2, 1)).unwrap());
        assert_eq!(surface.delivered(), 1);
        assert_eq!(receiver.dropped(), 1);
    }

    #[test]
    fn test_last_offered_tracks_dropped_frames() {
        let (surface, receiver) = InputSurface::new(2, 2, 1);
        assert!(receiver.last_offered().is_none());

        let kept = frame(2, 2, 0);
        let mut late = frame(2, 2, 1);
        late.timestamp = kept.timestamp + Duration::from_millis(40);
        surface.submit(kept).unwrap();
        assert!(!surface.submit(late.clone()).unwrap());

        let last = receiver.last_offered().unwrap();
        let error = if last > late.timestamp {
            last - late.timestamp
        } else {
            late.timestamp - last
        };
        assert!(error < Duration::from_micros(1));
    }

    #[test]
    fn test_end_of_stream_follows_frames() {
        let (surface, receiver) = InputSurface::new(2, 2, 4);
        surface.submit(frame(2, 2, 0)).unwrap();
        surface.submit(frame(2, 2, 1)).unwrap();
        surface
            .signal_end_of_stream(Duration::from_millis(100))
            .unwrap();

        let timeout = Duration::from_millis(100);
        assert!(matches!(
            receiver.recv_timeout(timeout).unwrap(),
            Some(SurfaceEvent::Frame(f)) if f.sequence == 0
        ));
        assert!(matches!(
            receiver.recv_timeout(timeout).unwrap(),
            Some(SurfaceEvent::Frame(f)) if f.sequence == 1
        ));
        assert!(matches!(
            receiver.recv_timeout(timeout).unwrap(),
            Some(SurfaceEvent::EndOfStream)
        ));
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let (surface, _receiver) = InputSurface::new(4, 4, 2);
        assert!(matches!(
            surface.submit(frame(2, 2, 0)),
            Err(CaptureError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_submit_after_receiver_dropped() {
        let (surface, receiver) = InputSurface::new(2, 2, 2);
        drop(receiver);
        assert!(matches!(
            surface.submit(frame(2, 2, 0)),
            Err(CaptureError::SurfaceClosed)
        ));
    }
}
