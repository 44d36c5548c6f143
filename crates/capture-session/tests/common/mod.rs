//! Instrumented collaborators for driving the session controller

#![allow(dead_code)]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::{Duration, Instant};

use capture::{
    BindRequest, CaptureError, CaptureResult, CaptureStats, CaptureSurfaceBinder, InputSurface,
    SurfaceHandle, SurfaceReceiver,
};
use capture_session::{
    Backends, KeepAlive, SessionConfig, SessionController, SessionError, SessionResult,
};
use encoder::{
    EncoderError, EncoderFactory, EncoderPipeline, EncoderResult, FaultCallback, FinalizeReport,
};
use media_store::{FileSystemStore, OutputSink, SinkError, SinkHandle, SinkResult};
use parking_lot::Mutex;
use recorder_shared::{
    AuthorizationToken, CaptureParameters, FrameRate, SessionState, WritableStream,
};

/// Setup phase a test can make fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    SinkOpen,
    EncoderConfigure,
    SurfaceBind,
    EncoderStart,
    Announce,
}

/// Shared record of every call the mocks receive
#[derive(Default)]
pub struct CallLog {
    log: Mutex<Vec<&'static str>>,
    fail: Mutex<Option<Phase>>,
    fail_finalize: AtomicBool,
    fault_callback: Mutex<Option<FaultCallback>>,
    surfaces_bound: AtomicI64,
    encoders_live: AtomicI64,
    announcements: AtomicI64,
    started: Mutex<Option<Instant>>,
}

impl CallLog {
    pub fn record(&self, call: &'static str) {
        self.log.lock().push(call);
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.log.lock().clone()
    }

    pub fn clear(&self) {
        self.log.lock().clear();
    }

    pub fn fail_at(&self, phase: Phase) {
        *self.fail.lock() = Some(phase);
    }

    pub fn fail_finalize(&self) {
        self.fail_finalize.store(true, Ordering::SeqCst);
    }

    fn should_fail(&self, phase: Phase) -> bool {
        *self.fail.lock() == Some(phase)
    }

    /// Simulate the encoder reporting a failure from its worker thread
    pub fn inject_fault(&self, fault: encoder::PipelineFault) {
        let callback = self.fault_callback.lock().clone();
        if let Some(callback) = callback {
            callback(fault);
        }
    }

    pub fn surfaces_bound(&self) -> i64 {
        self.surfaces_bound.load(Ordering::SeqCst)
    }

    pub fn encoders_live(&self) -> i64 {
        self.encoders_live.load(Ordering::SeqCst)
    }

    pub fn announcements(&self) -> i64 {
        self.announcements.load(Ordering::SeqCst)
    }

    pub fn assert_no_leaks(&self) {
        assert_eq!(self.surfaces_bound(), 0, "capture surface leaked");
        assert_eq!(self.encoders_live(), 0, "encoder leaked");
        assert_eq!(self.announcements(), 0, "keep-alive left announced");
    }
}

pub struct MockSink {
    log: Arc<CallLog>,
    store: FileSystemStore,
}

impl OutputSink for MockSink {
    fn open(&self, suggested_name: &str, mime_type: &str) -> SinkResult<(SinkHandle, PathBuf)> {
        self.log.record("sink.open");
        if self.log.should_fail(Phase::SinkOpen) {
            return Err(SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "media location read-only",
            )));
        }
        self.store.open(suggested_name, mime_type)
    }

    fn writable_stream(&self, handle: &SinkHandle) -> SinkResult<Box<dyn WritableStream>> {
        self.store.writable_stream(handle)
    }

    fn close(&self, handle: &mut SinkHandle) -> SinkResult<u64> {
        self.log.record("sink.close");
        self.store.close(handle)
    }

    fn close_truncated(&self, handle: &mut SinkHandle) -> SinkResult<u64> {
        self.log.record("sink.close_truncated");
        self.store.close_truncated(handle)
    }

    fn discard(&self, handle: &mut SinkHandle) -> SinkResult<()> {
        self.log.record("sink.discard");
        self.store.discard(handle)
    }
}

pub struct MockBinder {
    log: Arc<CallLog>,
    surfaces: Mutex<Vec<InputSurface>>,
}

impl CaptureSurfaceBinder for MockBinder {
    fn bind(
        &self,
        token: AuthorizationToken,
        surface: InputSurface,
        request: BindRequest,
    ) -> CaptureResult<SurfaceHandle> {
        self.log.record("binder.bind");
        if self.log.should_fail(Phase::SurfaceBind) {
            return Err(CaptureError::NotAvailable);
        }
        let previous = self.log.surfaces_bound.fetch_add(1, Ordering::SeqCst);
        assert_eq!(previous, 0, "capture surface bound twice");
        self.surfaces.lock().push(surface);
        Ok(SurfaceHandle::new(token.grant_id(), request))
    }

    fn halt(&self, _handle: &mut SurfaceHandle) -> CaptureStats {
        self.log.record("binder.halt");
        CaptureStats::default()
    }

    fn unbind(&self, handle: &mut SurfaceHandle) {
        if handle.release() {
            self.log.record("binder.unbind");
            self.log.surfaces_bound.fetch_sub(1, Ordering::SeqCst);
            self.surfaces.lock().clear();
        }
    }
}

pub struct MockEncoder {
    log: Arc<CallLog>,
    receiver: Option<SurfaceReceiver>,
    frame_rate: u32,
    live: bool,
    released: bool,
}

impl EncoderPipeline for MockEncoder {
    fn configure(&mut self, params: &CaptureParameters) -> EncoderResult<InputSurface> {
        self.log.record("encoder.configure");
        self.log.encoders_live.fetch_add(1, Ordering::SeqCst);
        self.live = true;
        if self.log.should_fail(Phase::EncoderConfigure) {
            return Err(EncoderError::UnsupportedResolution {
                width: params.width,
                height: params.height,
            });
        }
        self.frame_rate = params.frame_rate.as_u32();
        let (surface, receiver) = InputSurface::new(params.width, params.height, 4);
        self.receiver = Some(receiver);
        Ok(surface)
    }

    fn start(
        &mut self,
        mut output: Box<dyn WritableStream>,
        on_fault: FaultCallback,
    ) -> EncoderResult<()> {
        self.log.record("encoder.start");
        if self.log.should_fail(Phase::EncoderStart) {
            return Err(EncoderError::Mux("no space for header".into()));
        }
        output
            .write_all(b"\0\0\0\x18ftypisom")
            .and_then(|_| output.flush())
            .map_err(|e| EncoderError::Mux(e.to_string()))?;
        *self.log.fault_callback.lock() = Some(on_fault);
        *self.log.started.lock() = Some(Instant::now());
        Ok(())
    }

    fn finalize_and_flush(&mut self) -> EncoderResult<FinalizeReport> {
        self.log.record("encoder.finalize");
        if self.log.fail_finalize.load(Ordering::SeqCst) {
            return Err(EncoderError::FinalizeFailed("moov write failed".into()));
        }
        let duration = self
            .log
            .started
            .lock()
            .map(|started| started.elapsed())
            .unwrap_or_default();
        let frames = (duration.as_secs_f64() * self.frame_rate as f64) as u64;
        Ok(FinalizeReport {
            frames_encoded: frames,
            keyframes: 1,
            duration,
            ..FinalizeReport::default()
        })
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.log.record("encoder.release");
        self.receiver = None;
        *self.log.fault_callback.lock() = None;
        if self.live {
            self.log.encoders_live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

pub struct MockEncoders {
    log: Arc<CallLog>,
}

impl EncoderFactory for MockEncoders {
    fn create(&self) -> Box<dyn EncoderPipeline> {
        Box::new(MockEncoder {
            log: self.log.clone(),
            receiver: None,
            frame_rate: 30,
            live: false,
            released: false,
        })
    }
}

pub struct MockKeepAlive {
    log: Arc<CallLog>,
}

impl KeepAlive for MockKeepAlive {
    fn announce(&self, _description: &str) -> SessionResult<()> {
        self.log.record("keepalive.announce");
        if self.log.should_fail(Phase::Announce) {
            return Err(SessionError::KeepAlive("notification channel missing".into()));
        }
        self.log.announcements.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn retract(&self) {
        self.log.record("keepalive.retract");
        self.log.announcements.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub log: Arc<CallLog>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(CallLog::default());
        let backends = Backends {
            sink: Arc::new(MockSink {
                log: log.clone(),
                store: FileSystemStore::new(dir.path()),
            }),
            binder: Arc::new(MockBinder {
                log: log.clone(),
                surfaces: Mutex::new(Vec::new()),
            }),
            encoders: Arc::new(MockEncoders {
                log: log.clone(),
            }),
            keep_alive: Arc::new(MockKeepAlive {
                log: log.clone(),
            }),
        };
        let controller = SessionController::new(backends, SessionConfig::default());
        Self {
            controller,
            log,
            dir,
        }
    }

    /// Files currently in the output directory
    pub fn artifacts(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(self.dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        files.sort();
        files
    }

    pub fn wait_for_state(&self, state: SessionState, timeout: Duration) -> bool {
        self.wait_for(timeout, || self.controller.query_state() == state)
    }

    pub fn wait_for(&self, timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if done() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        done()
    }
}

pub fn token() -> AuthorizationToken {
    AuthorizationToken::issue(b"grant".to_vec(), Duration::from_secs(60))
}

pub fn params() -> CaptureParameters {
    CaptureParameters::new(FrameRate::Fps30, 4_000_000, 720, 1280).unwrap()
}
