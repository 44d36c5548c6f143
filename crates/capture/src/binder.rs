//! Virtual display binder
//!
//! Mirrors a [`ScreenSource`] into an encoder [`InputSurface`] from a
//! dedicated producer thread. The state machine only starts and stops that
//! flow as a unit; it never sees individual frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, bounded};
use recorder_shared::{AuthorizationToken, GrantId};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    BindRequest, CaptureError, CaptureResult, CaptureStats, CaptureSurfaceBinder, InputSurface,
    ScreenSource, TestPatternSource,
};

/// Creates the screen source for a new binding
pub type SourceFactory =
    Arc<dyn Fn(&BindRequest) -> CaptureResult<Box<dyn ScreenSource>> + Send + Sync>;

/// Consecutive source failures after which the mirror gives up
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 30;

/// How long the producer waits to report a lost source to the encoder
const SOURCE_LOST_REPORT_TIMEOUT: Duration = Duration::from_secs(1);

struct Producer {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<CaptureStats>,
}

/// An owned capture-surface binding
pub struct SurfaceHandle {
    id: Uuid,
    grant_id: GrantId,
    request: BindRequest,
    producer: Option<Producer>,
    last_stats: CaptureStats,
    bound: bool,
}

impl SurfaceHandle {
    /// A bound handle with no producer attached
    pub fn new(grant_id: GrantId, request: BindRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            grant_id,
            request,
            producer: None,
            last_stats: CaptureStats::default(),
            bound: true,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Grant redeemed to create this binding
    pub fn grant_id(&self) -> GrantId {
        self.grant_id
    }

    pub fn request(&self) -> &BindRequest {
        &self.request
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    /// Whether frames are still being delivered
    pub fn is_delivering(&self) -> bool {
        self.producer
            .as_ref()
            .is_some_and(|producer| !producer.thread.is_finished())
    }

    fn attach(&mut self, producer: Producer) {
        self.producer = Some(producer);
    }

    /// Stop and join the producer thread. Idempotent.
    pub fn stop_delivery(&mut self) -> CaptureStats {
        if let Some(producer) = self.producer.take() {
            producer.stop.store(true, Ordering::SeqCst);
            match producer.thread.join() {
                Ok(stats) => self.last_stats = stats,
                Err(_) => error!("Virtual display producer panicked: surface={}", self.id),
            }
        }
        self.last_stats.clone()
    }

    /// Stop delivery and drop the binding. Returns `true` only on the first call.
    pub fn release(&mut self) -> bool {
        self.stop_delivery();
        std::mem::replace(&mut self.bound, false)
    }
}

impl Drop for SurfaceHandle {
    fn drop(&mut self) {
        if self.bound {
            warn!("Surface {} dropped while bound, releasing", self.id);
            self.release();
        }
    }
}

impl std::fmt::Debug for SurfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceHandle")
            .field("id", &self.id)
            .field("request", &self.request)
            .field("bound", &self.bound)
            .field("delivering", &self.is_delivering())
            .finish()
    }
}

/// Binder that mirrors a screen source at the requested refresh rate
pub struct VirtualDisplayBinder {
    sources: SourceFactory,
    startup_timeout: Duration,
}

impl VirtualDisplayBinder {
    pub fn new(sources: SourceFactory, startup_timeout: Duration) -> Self {
        Self {
            sources,
            startup_timeout,
        }
    }

    /// Binder backed by the synthetic test pattern
    pub fn with_test_pattern(startup_timeout: Duration) -> Self {
        Self::new(
            Arc::new(|_request: &BindRequest| {
                Ok(Box::new(TestPatternSource::new()) as Box<dyn ScreenSource>)
            }),
            startup_timeout,
        )
    }
}

impl CaptureSurfaceBinder for VirtualDisplayBinder {
    fn bind(
        &self,
        token: AuthorizationToken,
        surface: InputSurface,
        request: BindRequest,
    ) -> CaptureResult<SurfaceHandle> {
        let grant_id = token.grant_id();

        if token.is_expired() {
            return Err(CaptureError::GrantExpired);
        }
        if request.width == 0 || request.height == 0 || request.refresh_hint_hz == 0 {
            return Err(CaptureError::InvalidSize {
                width: request.width,
                height: request.height,
            });
        }
        if surface.width() != request.width || surface.height() != request.height {
            return Err(CaptureError::SizeMismatch {
                frame_width: request.width,
                frame_height: request.height,
                width: surface.width(),
                height: surface.height(),
            });
        }

        // The grant is single-use from here on
        drop(token);

        info!(
            "Binding virtual display: {}x{} @ {} Hz, {} dpi, grant={}",
            request.width, request.height, request.refresh_hint_hz, request.density_dpi, grant_id
        );

        let mut handle = SurfaceHandle::new(grant_id, request);
        let stop = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = bounded::<CaptureResult<()>>(1);

        let sources = self.sources.clone();
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("virtual-display".to_string())
            .spawn(move || {
                let source = match sources(&request) {
                    Ok(source) => {
                        let _ = ready_tx.send(Ok(()));
                        source
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return CaptureStats::default();
                    }
                };
                mirror_loop(source, surface, request, thread_stop)
            })
            .map_err(|e| CaptureError::InitFailed(e.to_string()))?;

        match ready_rx.recv_timeout(self.startup_timeout) {
            Ok(Ok(())) => {
                handle.attach(Producer { stop, thread });
                Ok(handle)
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                handle.release();
                Err(e)
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                // The thread notices the flag once the source finally comes up
                stop.store(true, Ordering::SeqCst);
                handle.release();
                Err(CaptureError::Timeout("capture source"))
            }
        }
    }

    fn halt(&self, handle: &mut SurfaceHandle) -> CaptureStats {
        let stats = handle.stop_delivery();
        debug!(
            "Frame delivery halted: surface={}, captured={}, dropped={}",
            handle.id(),
            stats.frames_captured,
            stats.frames_dropped
        );
        stats
    }

    fn unbind(&self, handle: &mut SurfaceHandle) {
        if handle.release() {
            info!("Virtual display released: surface={}", handle.id());
        }
    }
}

fn mirror_loop(
    mut source: Box<dyn ScreenSource>,
    surface: InputSurface,
    request: BindRequest,
    stop: Arc<AtomicBool>,
) -> CaptureStats {
    info!("Mirroring {} into input surface", source.name());

    let frame_duration = Duration::from_secs_f64(1.0 / request.refresh_hint_hz as f64);
    let started = Instant::now();
    let mut stats = CaptureStats::default();
    let mut consecutive_errors = 0u32;

    while !stop.load(Ordering::SeqCst) {
        let loop_start = Instant::now();

        match source.next_frame(request.width, request.height) {
            Ok(frame) => {
                consecutive_errors = 0;
                match surface.submit(frame) {
                    Ok(true) => stats.frames_captured += 1,
                    Ok(false) => stats.frames_dropped += 1,
                    Err(CaptureError::SurfaceClosed) => {
                        debug!("Input surface closed, stopping mirror");
                        break;
                    }
                    Err(e) => {
                        warn!("Frame rejected by input surface: {}", e);
                        stats.source_errors += 1;
                    }
                }
            }
            Err(e) => {
                stats.source_errors += 1;
                consecutive_errors += 1;
                warn!("Capture error: {}", e);

                if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                    error!("Capture source {} lost: {}", source.name(), e);
                    if let Err(report_err) =
                        surface.report_source_lost(e.to_string(), SOURCE_LOST_REPORT_TIMEOUT)
                    {
                        warn!("Failed to report lost source: {}", report_err);
                    }
                    break;
                }
            }
        }

        // Rate limiting
        let elapsed = loop_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    let secs = started.elapsed().as_secs_f64();
    if secs > 0.0 {
        stats.current_fps = stats.frames_captured as f64 / secs;
    }

    info!(
        "Mirror stopped: captured={}, dropped={}, errors={}",
        stats.frames_captured, stats.frames_dropped, stats.source_errors
    );

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CapturedFrame, SurfaceEvent};

    struct FailingSource;

    impl ScreenSource for FailingSource {
        fn name(&self) -> &str {
            "failing"
        }

        fn next_frame(&mut self, _width: u32, _height: u32) -> CaptureResult<CapturedFrame> {
            Err(CaptureError::CaptureFailed("display revoked".into()))
        }
    }

    fn token() -> AuthorizationToken {
        AuthorizationToken::issue(Vec::new(), Duration::from_secs(60))
    }

    #[test]
    fn test_bind_delivers_frames_until_halted() {
        let binder = VirtualDisplayBinder::with_test_pattern(Duration::from_secs(1));
        let (surface, receiver) = InputSurface::new(16, 16, 64);

        let mut handle = binder
            .bind(token(), surface, BindRequest::new(16, 16, 120))
            .unwrap();
        assert!(handle.is_bound());

        let first = receiver.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(first, Some(SurfaceEvent::Frame(_))));

        let stats = binder.halt(&mut handle);
        assert!(stats.frames_captured >= 1);
        assert!(!handle.is_delivering());
        assert!(handle.is_bound());

        binder.unbind(&mut handle);
        assert!(!handle.is_bound());
    }

    #[test]
    fn test_unbind_is_idempotent() {
        let binder = VirtualDisplayBinder::with_test_pattern(Duration::from_secs(1));
        let (surface, _receiver) = InputSurface::new(8, 8, 4);
        let mut handle = binder
            .bind(token(), surface, BindRequest::new(8, 8, 30))
            .unwrap();

        binder.unbind(&mut handle);
        binder.unbind(&mut handle);
        assert!(!handle.release());
    }

    #[test]
    fn test_expired_grant_rejected() {
        let binder = VirtualDisplayBinder::with_test_pattern(Duration::from_secs(1));
        let (surface, _receiver) = InputSurface::new(8, 8, 4);
        let expired = AuthorizationToken::issue(Vec::new(), Duration::ZERO);

        let result = binder.bind(expired, surface, BindRequest::new(8, 8, 30));
        assert!(matches!(result, Err(CaptureError::GrantExpired)));
    }

    #[test]
    fn test_source_factory_failure() {
        let binder = VirtualDisplayBinder::new(
            Arc::new(|_: &BindRequest| Err(CaptureError::NotAvailable)),
            Duration::from_secs(1),
        );
        let (surface, _receiver) = InputSurface::new(8, 8, 4);

        let result = binder.bind(token(), surface, BindRequest::new(8, 8, 30));
        assert!(matches!(result, Err(CaptureError::NotAvailable)));
    }

    #[test]
    fn test_source_startup_timeout() {
        let binder = VirtualDisplayBinder::new(
            Arc::new(|_: &BindRequest| {
                thread::sleep(Duration::from_millis(300));
                Ok(Box::new(TestPatternSource::new()) as Box<dyn ScreenSource>)
            }),
            Duration::from_millis(20),
        );
        let (surface, _receiver) = InputSurface::new(8, 8, 4);

        let result = binder.bind(token(), surface, BindRequest::new(8, 8, 30));
        assert!(matches!(result, Err(CaptureError::Timeout(_))));
    }

    #[test]
    fn test_lost_source_reported_to_encoder() {
        let binder = VirtualDisplayBinder::new(
            Arc::new(|_: &BindRequest| Ok(Box::new(FailingSource) as Box<dyn ScreenSource>)),
            Duration::from_secs(1),
        );
        let (surface, receiver) = InputSurface::new(8, 8, 4);
        let mut handle = binder
            .bind(token(), surface, BindRequest::new(8, 8, 1000))
            .unwrap();

        let event = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, Some(SurfaceEvent::SourceLost(_))));

        let stats = binder.halt(&mut handle);
        assert_eq!(stats.source_errors, MAX_CONSECUTIVE_SOURCE_ERRORS as u64);
        binder.unbind(&mut handle);
    }
}
