//! H.264 + MP4 encode pipeline
//!
//! A dedicated worker thread owns the encoder and the muxer. It drains the
//! input surface in order, so once the end-of-stream marker is seen every
//! frame submitted before the flush request is in the container.

use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use capture::{CapturedFrame, InputSurface, SurfaceEvent, SurfaceReceiver};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use muxide::api::{MuxerBuilder, VideoCodec};
use parking_lot::Mutex;
use recorder_shared::{CaptureParameters, WritableStream};
use tracing::{debug, error, info, warn};

use crate::{
    EncoderConfig, EncoderError, EncoderFactory, EncoderPipeline, EncoderResult,
    FaultCallback, FinalizeReport, PipelineFault, SoftwareH264Encoder, VideoEncoder,
};

/// Poll interval for abort checks while the worker waits
const WORKER_POLL: Duration = Duration::from_millis(50);

/// Pipeline timing and buffering
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Frames the input surface buffers before dropping
    pub queue_depth: usize,
    /// Bound on encoder initialization and muxer start
    pub setup_timeout: Duration,
    /// Bound on draining the queue and writing the container index
    pub finalize_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            queue_depth: 8,
            setup_timeout: Duration::from_secs(5),
            finalize_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Unconfigured,
    Configured,
    Running,
    Finalized,
    Released,
}

impl PipelineState {
    fn name(self) -> &'static str {
        match self {
            PipelineState::Unconfigured => "unconfigured",
            PipelineState::Configured => "configured",
            PipelineState::Running => "running",
            PipelineState::Finalized => "finalized",
            PipelineState::Released => "released",
        }
    }
}

struct StartCommand {
    output: Box<dyn WritableStream>,
    on_fault: FaultCallback,
    ack: Sender<EncoderResult<()>>,
}

/// Software H.264 encoder muxed into an MP4 container
pub struct Mp4Pipeline {
    settings: PipelineSettings,
    state: PipelineState,
    surface: Option<InputSurface>,
    commands: Option<Sender<StartCommand>>,
    done: Option<Receiver<EncoderResult<FinalizeReport>>>,
    abort: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Mp4Pipeline {
    pub fn new(settings: PipelineSettings) -> Self {
        Self {
            settings,
            state: PipelineState::Unconfigured,
            surface: None,
            commands: None,
            done: None,
            abort: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    fn expect_state(&self, expected: PipelineState) -> EncoderResult<()> {
        if self.state != expected {
            return Err(EncoderError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            });
        }
        Ok(())
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Encode worker panicked");
            }
        }
    }
}

impl EncoderPipeline for Mp4Pipeline {
    fn configure(&mut self, params: &CaptureParameters) -> EncoderResult<InputSurface> {
        self.expect_state(PipelineState::Unconfigured)?;
        params
            .validate()
            .map_err(|e| EncoderError::InvalidConfig(e.to_string()))?;

        let config = EncoderConfig::from(params);
        let (surface, receiver) =
            InputSurface::new(config.width, config.height, self.settings.queue_depth);
        let (ready_tx, ready_rx) = bounded::<EncoderResult<()>>(1);
        let (command_tx, command_rx) = bounded::<StartCommand>(1);
        let (done_tx, done_rx) = bounded::<EncoderResult<FinalizeReport>>(1);

        let worker = EncodeWorker {
            config,
            receiver,
            abort: self.abort.clone(),
        };
        let handle = thread::Builder::new()
            .name("encode-worker".to_string())
            .spawn(move || {
                let result = worker.run(ready_tx, command_rx);
                let _ = done_tx.send(result);
            })
            .map_err(|e| EncoderError::InitFailed(e.to_string()))?;
        self.worker = Some(handle);

        match ready_rx.recv_timeout(self.settings.setup_timeout) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.release();
                return Err(e);
            }
            Err(_) => {
                self.abort.store(true, Ordering::SeqCst);
                self.worker = None;
                self.release();
                return Err(EncoderError::Timeout("encoder initialization"));
            }
        }

        self.commands = Some(command_tx);
        self.done = Some(done_rx);
        self.surface = Some(surface.clone());
        self.state = PipelineState::Configured;
        Ok(surface)
    }

    fn start(
        &mut self,
        output: Box<dyn WritableStream>,
        on_fault: FaultCallback,
    ) -> EncoderResult<()> {
        self.expect_state(PipelineState::Configured)?;

        let commands = self.commands.take().ok_or(EncoderError::NotInitialized)?;
        let (ack_tx, ack_rx) = bounded(1);
        commands
            .send(StartCommand {
                output,
                on_fault,
                ack: ack_tx,
            })
            .map_err(|_| EncoderError::Internal("encode worker exited".to_string()))?;

        match ack_rx.recv_timeout(self.settings.setup_timeout) {
            Ok(Ok(())) => {
                self.state = PipelineState::Running;
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(RecvTimeoutError::Timeout) => Err(EncoderError::Timeout("muxer start")),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EncoderError::Internal("encode worker exited".to_string()))
            }
        }
    }

    fn finalize_and_flush(&mut self) -> EncoderResult<FinalizeReport> {
        self.expect_state(PipelineState::Running)?;
        self.state = PipelineState::Finalized;

        let deadline = Instant::now() + self.settings.finalize_timeout;

        if let Some(surface) = self.surface.take() {
            // A worker that already stopped on a fault has left its result in `done`
            if let Err(e) = surface.signal_end_of_stream(self.settings.finalize_timeout) {
                debug!("End-of-stream not queued: {}", e);
            }
        }

        let done = self.done.take().ok_or(EncoderError::NotInitialized)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        match done.recv_timeout(remaining) {
            Ok(result) => {
                self.join_worker();
                result
            }
            Err(RecvTimeoutError::Timeout) => {
                // Leave the worker detached; abort makes it exit without writing more
                self.abort.store(true, Ordering::SeqCst);
                self.worker = None;
                Err(EncoderError::Timeout("container finalize"))
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.join_worker();
                Err(EncoderError::FinalizeFailed(
                    "encode worker exited without a result".to_string(),
                ))
            }
        }
    }

    fn release(&mut self) {
        if self.state == PipelineState::Released {
            return;
        }

        self.abort.store(true, Ordering::SeqCst);
        self.commands = None;
        self.surface = None;
        self.done = None;
        self.join_worker();

        debug!("Encoder pipeline released (was {})", self.state.name());
        self.state = PipelineState::Released;
    }
}

impl Drop for Mp4Pipeline {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates [`Mp4Pipeline`]s with shared settings
#[derive(Debug, Clone, Default)]
pub struct Mp4PipelineFactory {
    settings: PipelineSettings,
}

impl Mp4PipelineFactory {
    pub fn new(settings: PipelineSettings) -> Self {
        Self { settings }
    }
}

impl EncoderFactory for Mp4PipelineFactory {
    fn create(&self) -> Box<dyn EncoderPipeline> {
        Box::new(Mp4Pipeline::new(self.settings.clone()))
    }
}

/// The muxer's handle on the sink stream.
///
/// Every clone refuses I/O once the pipeline is aborted, so a worker left
/// behind by a finalize timeout cannot touch the artifact after teardown.
#[derive(Clone)]
struct ContainerOutput {
    stream: Arc<Mutex<Box<dyn WritableStream>>>,
    abort: Arc<AtomicBool>,
}

impl ContainerOutput {
    fn new(stream: Box<dyn WritableStream>, abort: Arc<AtomicBool>) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
            abort,
        }
    }

    fn ensure_live(&self) -> io::Result<()> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(io::Error::other("encode pipeline aborted"));
        }
        Ok(())
    }
}

impl Write for ContainerOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_live()?;
        self.stream.lock().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ensure_live()?;
        self.stream.lock().flush()
    }
}

impl Seek for ContainerOutput {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.ensure_live()?;
        self.stream.lock().seek(pos)
    }
}

struct EncodeWorker {
    config: EncoderConfig,
    receiver: SurfaceReceiver,
    abort: Arc<AtomicBool>,
}

/// Running totals while muxing
struct MuxProgress {
    first_timestamp: Option<Instant>,
    last_pts: Option<f64>,
    frames: u64,
    keyframes: u64,
    /// Newest frame written, re-encoded to close the recording if later frames were dropped
    held: Option<CapturedFrame>,
}

impl MuxProgress {
    /// Presentation time of `frame` in seconds, strictly increasing
    fn pts_for(&mut self, frame: &CapturedFrame, min_step: f64) -> f64 {
        let first = *self.first_timestamp.get_or_insert(frame.timestamp);
        let mut pts = frame.timestamp.saturating_duration_since(first).as_secs_f64();
        if let Some(last) = self.last_pts {
            if pts <= last {
                pts = last + min_step;
            }
        }
        self.last_pts = Some(pts);
        pts
    }
}

impl EncodeWorker {
    fn run(
        self,
        ready: Sender<EncoderResult<()>>,
        commands: Receiver<StartCommand>,
    ) -> EncoderResult<FinalizeReport> {
        let mut encoder = SoftwareH264Encoder::new();
        if let Err(e) = encoder.init(self.config.clone()) {
            let message = e.to_string();
            let _ = ready.send(Err(e));
            return Err(EncoderError::InitFailed(message));
        }
        let _ = ready.send(Ok(()));

        let command = loop {
            if self.abort.load(Ordering::SeqCst) {
                return Err(EncoderError::Aborted);
            }
            match commands.recv_timeout(WORKER_POLL) {
                Ok(command) => break command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(EncoderError::Aborted),
            }
        };

        let StartCommand {
            output,
            on_fault,
            ack,
        } = command;

        let mut output = ContainerOutput::new(output, self.abort.clone());
        let built = MuxerBuilder::new(output.clone())
            .video(
                VideoCodec::H264,
                self.config.width,
                self.config.height,
                self.config.fps as f64,
            )
            .build();
        let mut muxer = match built {
            Ok(muxer) => {
                let _ = ack.send(Ok(()));
                muxer
            }
            Err(e) => {
                let message = e.to_string();
                let _ = ack.send(Err(EncoderError::Mux(message.clone())));
                return Err(EncoderError::Mux(message));
            }
        };

        info!(
            "Encode worker running: {}x{} @ {} fps",
            self.config.width, self.config.height, self.config.fps
        );

        // Frames mirrored while the session was still being set up are not part of it
        let recording_from = Instant::now();
        let frame_interval = 1.0 / self.config.fps as f64;
        let mut progress = MuxProgress {
            first_timestamp: None,
            last_pts: None,
            frames: 0,
            keyframes: 0,
            held: None,
        };
        let mut skipped = 0u64;
        let mut fault = None;

        loop {
            if self.abort.load(Ordering::SeqCst) {
                warn!("Encode worker aborted before end of stream");
                return Err(EncoderError::Aborted);
            }

            let event = match self.receiver.recv_timeout(WORKER_POLL) {
                Ok(Some(event)) => event,
                Ok(None) => continue,
                Err(_) => break,
            };

            match event {
                SurfaceEvent::Frame(frame) => {
                    if frame.timestamp < recording_from {
                        skipped += 1;
                        continue;
                    }
                    let encoded = match encoder.encode(&frame) {
                        Ok(Some(encoded)) => encoded,
                        Ok(None) => {
                            debug!("Encoder returned empty bitstream for frame {}", frame.sequence);
                            continue;
                        }
                        Err(e) => {
                            fault = Some(PipelineFault::Encoder(e.to_string()));
                            break;
                        }
                    };

                    // Wait for the first keyframe before writing anything
                    if progress.frames == 0 && !encoded.keyframe {
                        encoder.request_keyframe();
                        continue;
                    }

                    let pts = progress.pts_for(&frame, frame_interval / 2.0);
                    if let Err(e) = muxer.write_video(pts, &encoded.data, encoded.keyframe) {
                        fault = Some(PipelineFault::Muxer(e.to_string()));
                        break;
                    }
                    progress.frames += 1;
                    if encoded.keyframe {
                        progress.keyframes += 1;
                    }
                    progress.held = Some(frame);
                }
                SurfaceEvent::EndOfStream => {
                    // Frames dropped at the tail would cut the recording short; hold
                    // the last written image until the newest capture time instead
                    let tail = match (progress.held.take(), self.receiver.last_offered()) {
                        (Some(held), Some(last_offered))
                            if last_offered.saturating_duration_since(held.timestamp).as_secs_f64()
                                > frame_interval / 2.0 =>
                        {
                            Some(CapturedFrame {
                                timestamp: last_offered,
                                ..held
                            })
                        }
                        _ => None,
                    };
                    if let Some(tail) = tail {
                        match encoder.encode(&tail) {
                            Ok(Some(encoded)) => {
                                let pts = progress.pts_for(&tail, frame_interval / 2.0);
                                match muxer.write_video(pts, &encoded.data, encoded.keyframe) {
                                    Ok(_) => {
                                        progress.frames += 1;
                                        debug!("Held last frame until {:.3}s", pts);
                                    }
                                    Err(e) => warn!("Failed to write held frame: {}", e),
                                }
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Failed to encode held frame: {}", e),
                        }
                    }
                    debug!(
                        "End of stream after {} frames ({} from before start skipped)",
                        progress.frames, skipped
                    );
                    break;
                }
                SurfaceEvent::SourceLost(reason) => {
                    fault = Some(PipelineFault::SourceLost(reason));
                    break;
                }
            }
        }

        if let Some(fault) = &fault {
            error!("Encode pipeline failed mid-capture: {}", fault);
            on_fault(fault.clone());
        }

        muxer
            .finish_with_stats()
            .map_err(|e| EncoderError::FinalizeFailed(e.to_string()))?;
        // The container index is only durable once the sink's buffer reaches the file
        output
            .flush()
            .map_err(|e| EncoderError::FinalizeFailed(format!("flushing container: {}", e)))?;

        let duration = progress
            .last_pts
            .map_or(Duration::ZERO, |last| Duration::from_secs_f64(last + frame_interval));

        info!(
            "Container finalized: frames={}, keyframes={}, duration={:.3}s",
            progress.frames,
            progress.keyframes,
            duration.as_secs_f64()
        );

        Ok(FinalizeReport {
            frames_encoded: progress.frames,
            frames_dropped: self.receiver.dropped(),
            keyframes: progress.keyframes,
            duration,
            fault,
        })
    }
}
