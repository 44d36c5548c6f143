//! Session state machine
//!
//! `Idle → Starting → Capturing → Stopping → Idle`, with any state able to
//! fall through `Failed → Idle`. Control operations are serialized by one
//! lock; `query_state` reads an atomic and never waits on it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Instant;

use capture::{BindRequest, CaptureSurfaceBinder, VirtualDisplayBinder};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, unbounded};
use encoder::{
    EncoderFactory, FaultCallback, FinalizeReport, Mp4PipelineFactory, PipelineFault,
    PipelineSettings,
};
use media_store::{OutputSink, SinkError, timestamped_name, truncated_path};
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use recorder_shared::{
    AuthorizationOutcome, AuthorizationToken, CaptureParameters, GrantId, OutputIntegrity,
    ProtocolError, RecordingSummary, SessionId, SessionState, SessionStatus,
};
use tracing::{debug, error, info, warn};

use crate::{
    CaptureSession, EventCallback, KeepAlive, SessionConfig, SessionError, SessionEvent,
    SessionResult,
};

/// Collaborators the controller drives
#[derive(Clone)]
pub struct Backends {
    pub sink: Arc<dyn OutputSink>,
    pub binder: Arc<dyn CaptureSurfaceBinder>,
    pub encoders: Arc<dyn EncoderFactory>,
    pub keep_alive: Arc<dyn KeepAlive>,
}

impl Backends {
    /// Software stack: test-pattern virtual display and OpenH264 + MP4 pipeline
    pub fn software(
        sink: Arc<dyn OutputSink>,
        keep_alive: Arc<dyn KeepAlive>,
        config: &SessionConfig,
    ) -> Self {
        let settings = PipelineSettings {
            setup_timeout: config.phase_timeout,
            finalize_timeout: config.finalize_timeout,
            ..PipelineSettings::default()
        };
        Self {
            sink,
            binder: Arc::new(VirtualDisplayBinder::with_test_pattern(config.phase_timeout)),
            encoders: Arc::new(Mp4PipelineFactory::new(settings)),
            keep_alive,
        }
    }
}

/// Result of a stop request
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Nothing was capturing; carries the state observed
    NotCapturing(SessionState),
    Finished(RecordingSummary),
}

struct Inner {
    backends: Backends,
    config: SessionConfig,
    state: AtomicU8,
    control: Mutex<Option<CaptureSession>>,
    /// Redeemed grants and when they expire
    consumed_grants: Mutex<HashMap<GrantId, DateTime<Utc>>>,
    status: RwLock<SessionStatus>,
    last_recording: RwLock<Option<RecordingSummary>>,
    listeners: RwLock<Vec<EventCallback>>,
    /// Events raised under `control`, delivered once it is released
    pending_events: Mutex<VecDeque<SessionEvent>>,
    delivering: ReentrantMutex<()>,
    faults: Sender<(SessionId, PipelineFault)>,
}

/// Owns at most one capture session at a time.
///
/// Cloning yields another handle to the same controller.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(backends: Backends, config: SessionConfig) -> Self {
        let (faults, fault_rx) = unbounded();
        let inner = Arc::new(Inner {
            backends,
            config,
            state: AtomicU8::new(SessionState::Idle.as_u8()),
            control: Mutex::new(None),
            consumed_grants: Mutex::new(HashMap::new()),
            status: RwLock::new(SessionStatus::idle()),
            last_recording: RwLock::new(None),
            listeners: RwLock::new(Vec::new()),
            pending_events: Mutex::new(VecDeque::new()),
            delivering: ReentrantMutex::new(()),
            faults,
        });

        spawn_fault_watcher(Arc::downgrade(&inner), fault_rx);

        Self { inner }
    }

    /// Current state; never blocks
    pub fn query_state(&self) -> SessionState {
        self.inner.state()
    }

    /// Snapshot of the live session, or idle
    pub fn status(&self) -> SessionStatus {
        self.inner.status.read().clone()
    }

    /// Summary of the most recently finished recording
    pub fn last_recording(&self) -> Option<RecordingSummary> {
        self.inner.last_recording.read().clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Register a callback for state changes and finished recordings.
    ///
    /// Callbacks run after the control lock is released, so they may call
    /// back into the controller.
    pub fn on_event(&self, callback: EventCallback) {
        self.inner.listeners.write().push(callback);
    }

    /// Start from the broker's answer to an authorization request.
    ///
    /// A missing or denied outcome is rejected before anything is acquired.
    pub fn start_from_outcome(
        &self,
        outcome: Option<AuthorizationOutcome>,
    ) -> SessionResult<SessionId> {
        match outcome {
            None => Err(SessionError::InvalidParameters(ProtocolError::MissingField(
                "authorization",
            ))),
            Some(AuthorizationOutcome::Denied { reason }) => {
                info!("Capture authorization denied: {}", reason);
                Err(SessionError::AuthorizationDenied(reason))
            }
            Some(AuthorizationOutcome::Granted { token, params }) => self.start(token, params),
        }
    }

    /// Consume `token` and bring up a capture session with `params`
    pub fn start(
        &self,
        token: AuthorizationToken,
        params: CaptureParameters,
    ) -> SessionResult<SessionId> {
        let result = self.start_locked(token, params);
        self.inner.deliver_events();
        result
    }

    fn start_locked(
        &self,
        token: AuthorizationToken,
        params: CaptureParameters,
    ) -> SessionResult<SessionId> {
        let inner = &self.inner;
        let mut slot = inner.control.lock();

        let current = inner.state();
        if current != SessionState::Idle {
            warn!("Start rejected: session already {}", current);
            return Err(SessionError::AlreadyActive(current));
        }
        if let Some(stale) = slot.take() {
            error!("Idle controller still held session {}, reclaiming", stale.id());
            inner.rollback(stale);
        }

        params.validate()?;

        let grant_id = inner.redeem(&token)?;

        let mut session = CaptureSession::new(grant_id, params);
        let session_id = session.id();
        inner.transition(SessionState::Starting);
        *inner.status.write() = session.status(SessionState::Starting);

        info!(
            "Starting capture session {}: {}x{} @ {} fps, {} bps",
            session_id,
            params.width,
            params.height,
            params.frame_rate.as_u32(),
            params.bitrate
        );

        let setup_started = Instant::now();
        match inner.acquire(&mut session, token) {
            Ok(()) => {
                session.capture_started = Some(Instant::now());
                *inner.status.write() = session.status(SessionState::Capturing);
                *slot = Some(session);
                inner.transition(SessionState::Capturing);
                info!(
                    "Capture session {} running after {:?}",
                    session_id,
                    setup_started.elapsed()
                );
                Ok(session_id)
            }
            Err(e) => {
                error!("Capture session {} failed to start: {}", session_id, e);
                inner.transition(SessionState::Failed);
                inner.rollback(session);
                *inner.status.write() = SessionStatus::idle();
                inner.transition(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Finalize and tear down the running session.
    ///
    /// Outside `Capturing` this touches nothing and reports the state observed.
    pub fn stop(&self) -> StopOutcome {
        let outcome = self.stop_locked();
        self.inner.deliver_events();
        outcome
    }

    fn stop_locked(&self) -> StopOutcome {
        let inner = &self.inner;
        let mut slot = inner.control.lock();

        let current = inner.state();
        if current != SessionState::Capturing {
            debug!("Stop ignored in state {}", current);
            return StopOutcome::NotCapturing(current);
        }
        let Some(session) = slot.take() else {
            error!("Capturing without a session, resetting to idle");
            inner.transition(SessionState::Idle);
            return StopOutcome::NotCapturing(current);
        };

        inner.transition(SessionState::Stopping);
        StopOutcome::Finished(inner.teardown(session, None))
    }

    /// Termination-handler entry point: waits for any in-flight transition,
    /// then stops a running session.
    pub fn shutdown(&self) -> Option<RecordingSummary> {
        info!("Session controller shutting down");
        match self.stop() {
            StopOutcome::Finished(summary) => Some(summary),
            StopOutcome::NotCapturing(_) => None,
        }
    }
}

impl Inner {
    fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Mark the grant used; expired entries are dropped as new ones arrive
    fn redeem(&self, token: &AuthorizationToken) -> SessionResult<GrantId> {
        let grant_id = token.grant_id();
        let now = Utc::now();
        let mut consumed = self.consumed_grants.lock();
        if consumed.contains_key(&grant_id) {
            warn!("Start rejected: grant {} already used", grant_id);
            return Err(SessionError::AuthorizationReused(grant_id));
        }
        if token.is_expired_at(now) {
            warn!("Start rejected: grant {} expired", grant_id);
            return Err(SessionError::AuthorizationExpired(grant_id));
        }
        // A copy of a pruned grant is still refused as expired
        consumed.retain(|_, expires_at| *expires_at > now);
        consumed.insert(grant_id, token.expires_at());
        Ok(grant_id)
    }

    fn transition(&self, to: SessionState) {
        let from = SessionState::from_u8(self.state.swap(to.as_u8(), Ordering::SeqCst));
        if from == to {
            return;
        }
        debug!("Session state: {} -> {}", from, to);
        self.status.write().state = to;
        self.emit(&SessionEvent::StateChanged { from, to });
    }

    fn emit(&self, event: &SessionEvent) {
        self.pending_events.lock().push_back(event.clone());
    }

    /// Hand queued events to listeners in order. Must not be called with
    /// `control` held.
    fn deliver_events(&self) {
        let _delivering = self.delivering.lock();
        loop {
            let Some(event) = self.pending_events.lock().pop_front() else {
                break;
            };
            let listeners = self.listeners.read().clone();
            for listener in listeners {
                listener(&event);
            }
        }
    }

    /// Setup phases in order; every acquired handle is parked on `session`
    /// so a failure at any step can be rolled back.
    fn acquire(&self, session: &mut CaptureSession, token: AuthorizationToken) -> SessionResult<()> {
        let params = session.params;

        // 1. Output sink
        let name = timestamped_name(&self.config.name_prefix);
        let (sink, location) = self
            .backends
            .sink
            .open(&name, &self.config.mime_type)
            .map_err(SessionError::SinkOpen)?;
        session.sink = Some(sink);
        session.output_location = Some(location);
        *self.status.write() = session.status(SessionState::Starting);

        // 2. Encoder, parked before configure so a partial configure is still released
        let encoder = session.encoder.insert(self.backends.encoders.create());
        let surface = encoder
            .configure(&params)
            .map_err(SessionError::encoder_config)?;

        // 3. Capture surface; the binder consumes the grant
        let request = BindRequest {
            density_dpi: self.config.density_dpi,
            ..BindRequest::new(params.width, params.height, params.frame_rate.as_u32())
        };
        let grant_id = session.grant_id;
        let handle = self
            .backends
            .binder
            .bind(token, surface, request)
            .map_err(|e| SessionError::surface_bind(e, grant_id))?;
        session.surface = Some(handle);

        // 4. Encoder output into the sink
        let sink = session
            .sink
            .as_ref()
            .ok_or(SessionError::SinkOpen(SinkError::AlreadyClosed))?;
        let stream = self
            .backends
            .sink
            .writable_stream(sink)
            .map_err(SessionError::SinkOpen)?;
        let faults = self.faults.clone();
        let session_id = session.id;
        let on_fault: FaultCallback = Arc::new(move |fault| {
            let _ = faults.send((session_id, fault));
        });
        if let Some(encoder) = session.encoder.as_mut() {
            encoder
                .start(stream, on_fault)
                .map_err(SessionError::encoder_start)?;
        }

        // Disclosure must be visible before Capturing
        self.backends.keep_alive.announce(&session.description())?;
        session.announced = true;

        Ok(())
    }

    /// Release whatever a failed start acquired, newest first
    fn rollback(&self, mut session: CaptureSession) {
        debug!("Rolling back session {}", session.id);

        if std::mem::take(&mut session.announced) {
            self.backends.keep_alive.retract();
        }
        if let Some(mut surface) = session.surface.take() {
            self.backends.binder.halt(&mut surface);
            self.backends.binder.unbind(&mut surface);
        }
        if let Some(mut encoder) = session.encoder.take() {
            encoder.release();
        }
        if let Some(mut sink) = session.sink.take() {
            if let Err(e) = self.backends.sink.discard(&mut sink) {
                warn!("Failed to discard partial output: {}", e);
            }
        }
    }

    /// Stop delivery, finalize, release the binding, the encoder and the
    /// sink, retract the announcement, then return to `Idle`.
    fn teardown(&self, mut session: CaptureSession, fault: Option<PipelineFault>) -> RecordingSummary {
        let session_id = session.id;
        info!("Tearing down capture session {}", session_id);

        let capture_stats = session
            .surface
            .as_mut()
            .map(|surface| self.backends.binder.halt(surface))
            .unwrap_or_default();

        let finalize = match session.encoder.as_mut() {
            Some(encoder) => encoder
                .finalize_and_flush()
                .map_err(|e| SessionError::Finalize(e.to_string())),
            None => Err(SessionError::Finalize("encoder missing".to_string())),
        };

        if let Some(mut surface) = session.surface.take() {
            self.backends.binder.unbind(&mut surface);
        }
        if let Some(mut encoder) = session.encoder.take() {
            encoder.release();
        }

        let mut integrity = OutputIntegrity::Finalized;
        let report = match finalize {
            Ok(report) => {
                let reported = report.fault.clone().or(fault);
                if let Some(reported) = reported {
                    integrity = OutputIntegrity::PossiblyTruncated {
                        reason: SessionError::MidCaptureFailure(reported.to_string()).to_string(),
                    };
                }
                report
            }
            Err(e) => {
                error!("Finalize failed for session {}: {}", session_id, e);
                let reason = match &fault {
                    Some(fault) => format!("{}; {}", SessionError::MidCaptureFailure(fault.to_string()), e),
                    None => e.to_string(),
                };
                integrity = OutputIntegrity::PossiblyTruncated { reason };
                FinalizeReport {
                    frames_dropped: capture_stats.frames_dropped,
                    duration: session
                        .capture_started
                        .map(|started| started.elapsed())
                        .unwrap_or_default(),
                    ..FinalizeReport::default()
                }
            }
        };

        // Only a cleanly finalized container gets the playable name
        let mut bytes_written = 0;
        let mut location = session.output_location.clone().unwrap_or_default();
        if let Some(mut sink) = session.sink.take() {
            let closed = if integrity.is_finalized() {
                self.backends.sink.close(&mut sink)
            } else {
                self.backends.sink.close_truncated(&mut sink)
            };
            match closed {
                Ok(bytes) => {
                    bytes_written = bytes;
                    if !integrity.is_finalized() {
                        location = truncated_path(sink.location());
                    }
                }
                Err(e) => {
                    error!("Failed to close output for session {}: {}", session_id, e);
                    if integrity.is_finalized() {
                        integrity = OutputIntegrity::PossiblyTruncated {
                            reason: SessionError::Finalize(e.to_string()).to_string(),
                        };
                    }
                }
            }
        }

        if std::mem::take(&mut session.announced) {
            self.backends.keep_alive.retract();
        }

        let summary = RecordingSummary {
            session_id,
            location,
            params: session.params,
            started_at: session.started_at,
            finished_at: Utc::now(),
            duration_ms: report.duration.as_millis() as u64,
            frames_encoded: report.frames_encoded,
            frames_dropped: report.frames_dropped.max(capture_stats.frames_dropped),
            bytes_written,
            integrity,
        };

        match &summary.integrity {
            OutputIntegrity::Finalized => info!(
                "Recording saved: {} ({} frames, {} ms, {} bytes)",
                summary.location.display(),
                summary.frames_encoded,
                summary.duration_ms,
                summary.bytes_written
            ),
            OutputIntegrity::PossiblyTruncated { reason } => warn!(
                "Recording possibly truncated: {} ({})",
                summary.location.display(),
                reason
            ),
        }

        *self.last_recording.write() = Some(summary.clone());
        *self.status.write() = SessionStatus::idle();
        self.transition(SessionState::Idle);
        self.emit(&SessionEvent::RecordingFinished(summary.clone()));

        summary
    }

    /// Best-effort finalize after a mid-capture failure
    fn abort_capture(&self, session_id: SessionId, fault: PipelineFault) {
        self.abort_capture_locked(session_id, fault);
        self.deliver_events();
    }

    fn abort_capture_locked(&self, session_id: SessionId, fault: PipelineFault) {
        let mut slot = self.control.lock();

        let matches = slot.as_ref().is_some_and(|session| session.id == session_id);
        if !matches || self.state() != SessionState::Capturing {
            debug!("Fault for inactive session {} ignored: {}", session_id, fault);
            return;
        }
        let Some(session) = slot.take() else {
            return;
        };

        error!("Capture session {} failed: {}", session_id, fault);
        self.transition(SessionState::Failed);
        self.teardown(session, Some(fault));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.control.get_mut().take() {
            warn!("Session controller dropped with live session {}", session.id);
            if self.state() == SessionState::Capturing {
                self.transition(SessionState::Stopping);
                self.teardown(session, None);
            } else {
                self.rollback(session);
            }
        }
        self.deliver_events();
    }
}

fn spawn_fault_watcher(inner: Weak<Inner>, faults: Receiver<(SessionId, PipelineFault)>) {
    let spawned = thread::Builder::new()
        .name("session-faults".to_string())
        .spawn(move || {
            while let Ok((session_id, fault)) = faults.recv() {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                inner.abort_capture(session_id, fault);
            }
            debug!("Fault watcher exiting");
        });

    if let Err(e) = spawned {
        error!("Failed to spawn fault watcher: {}", e);
    }
}
