//! Live gating pipeline: an acquisition thread feeding a drop-oldest buffer
//! and an inference thread that runs localisation, stability and compliance
//! on every frame it receives.
//!
//! On the frame that confirms the gate the inference thread releases the
//! frame source. Acquisition then sees `Released` and exits, and inference
//! exits once the buffer runs dry.

use rollcall_core::{
    BoundingBox, ComplianceClassifier, GateSignals, StabilityConfig, StabilityDetector, StatusChannel,
    SubjectLocator, Transition,
};
use rollcall_hw::{CameraError, FrameBuffer, SourceHandle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const GRAB_BACKOFF_MIN: Duration = Duration::from_millis(10);
const GRAB_BACKOFF_MAX: Duration = Duration::from_millis(320);
const JOIN_POLL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    pub buffer_capacity: usize,
    pub pop_timeout: Duration,
    pub stability: StabilityConfig,
    pub required_hits: u32,
    /// Localisation runs on the first frame and every N frames after.
    pub locate_every: u32,
    /// How long shutdown waits for each worker before detaching it.
    pub join_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            buffer_capacity: 2,
            pop_timeout: Duration::from_millis(250),
            stability: StabilityConfig::default(),
            required_hits: rollcall_core::gate::DEFAULT_REQUIRED_HITS,
            locate_every: 12,
            join_timeout: Duration::from_secs(3),
        }
    }
}

pub struct Pipeline {
    status: StatusChannel,
    source: Arc<SourceHandle>,
    buffer: Arc<FrameBuffer>,
    stop: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
    join_timeout: Duration,
}

impl Pipeline {
    /// Spawn both workers. The pipeline owns the only gate; status readers
    /// get it through [`Pipeline::status`].
    pub fn start(
        source: Arc<SourceHandle>,
        locator: Box<dyn SubjectLocator>,
        classifier: Box<dyn ComplianceClassifier>,
        settings: PipelineSettings,
    ) -> std::io::Result<Self> {
        let status = StatusChannel::new(settings.required_hits);
        let buffer = Arc::new(FrameBuffer::new(settings.buffer_capacity));
        let stop = Arc::new(AtomicBool::new(false));

        let acquisition = {
            let source = Arc::clone(&source);
            let buffer = Arc::clone(&buffer);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("rollcall-acquire".into())
                .spawn(move || acquire(&source, &buffer, &stop))?
        };

        let inference = {
            let worker = InferenceWorker {
                source: Arc::clone(&source),
                buffer: Arc::clone(&buffer),
                stop: Arc::clone(&stop),
                status: status.clone(),
                locator,
                classifier,
                stability: StabilityDetector::new(settings.stability),
                pop_timeout: settings.pop_timeout,
                locate_every: settings.locate_every.max(1),
            };
            std::thread::Builder::new()
                .name("rollcall-infer".into())
                .spawn(move || worker.run())
        };
        let inference = match inference {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                let _ = acquisition.join();
                return Err(e);
            }
        };

        tracing::info!(
            capacity = buffer.capacity(),
            required_hits = settings.required_hits,
            "pipeline started"
        );
        Ok(Self {
            status,
            source,
            buffer,
            stop,
            workers: vec![acquisition, inference],
            join_timeout: settings.join_timeout,
        })
    }

    pub fn status(&self) -> StatusChannel {
        self.status.clone()
    }

    pub fn source(&self) -> &Arc<SourceHandle> {
        &self.source
    }

    /// Frames evicted unseen because inference fell behind.
    pub fn dropped_frames(&self) -> u64 {
        self.buffer.dropped()
    }

    /// Release the source if the gate never did, then stop both workers.
    ///
    /// A worker still stuck in a device call after `join_timeout` is
    /// detached; the source handle finishes the release when that call
    /// returns.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if self.source.release() {
            tracing::info!(dropped = self.buffer.dropped(), "pipeline stopped before confirmation");
        }
        let deadline = Instant::now() + self.join_timeout;
        for worker in self.workers.drain(..) {
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(JOIN_POLL);
            }
            if !worker.is_finished() {
                let name = worker.thread().name().unwrap_or("unnamed").to_string();
                tracing::warn!(worker = %name, "pipeline worker did not stop in time; detaching");
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("pipeline worker panicked");
            }
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_and_join();
        }
    }
}

fn acquire(source: &SourceHandle, buffer: &FrameBuffer, stop: &AtomicBool) {
    let mut backoff = GRAB_BACKOFF_MIN;
    while !stop.load(Ordering::SeqCst) {
        match source.grab() {
            Ok(frame) => {
                backoff = GRAB_BACKOFF_MIN;
                if buffer.push(frame).is_some() {
                    tracing::trace!("inference behind; oldest frame dropped");
                }
            }
            Err(CameraError::Released) => break,
            Err(e) => {
                tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "frame grab failed");
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(GRAB_BACKOFF_MAX);
            }
        }
    }
    tracing::debug!("acquisition worker exiting");
}

struct InferenceWorker {
    source: Arc<SourceHandle>,
    buffer: Arc<FrameBuffer>,
    stop: Arc<AtomicBool>,
    status: StatusChannel,
    locator: Box<dyn SubjectLocator>,
    classifier: Box<dyn ComplianceClassifier>,
    stability: StabilityDetector,
    pop_timeout: Duration,
    locate_every: u32,
}

impl InferenceWorker {
    fn run(mut self) {
        let mut processed: u64 = 0;
        let mut subject: Option<BoundingBox> = None;

        while !self.stop.load(Ordering::SeqCst) {
            let Some(frame) = self.buffer.pop(self.pop_timeout) else {
                if self.source.is_released() {
                    break;
                }
                continue;
            };

            if subject.is_none() || processed % u64::from(self.locate_every) == 0 {
                match self.locator.locate(&frame) {
                    Ok(Some(found)) => subject = Some(found),
                    // Keep the last known box.
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, "subject localisation failed"),
                }
            }
            processed += 1;

            let stable = self.stability.observe(&frame, subject.as_ref());
            let compliance = self.classifier.classify(&frame, subject.as_ref());
            let signals = GateSignals {
                compliance_a: compliance.compliance_a,
                compliance_b: compliance.compliance_b,
                stable,
            };

            if self.status.observe(signals) == Transition::Confirmed {
                tracing::info!(frames = processed, "gate confirmed; handing off camera");
                self.source.release();
            }
        }
        tracing::debug!(frames = processed, "inference worker exiting");
    }
}
