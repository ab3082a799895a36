//! Frame source seam and the one-way release handle.
//!
//! The acquisition worker grabs through a [`SourceHandle`]; the gate (or the
//! shutdown path) releases it. Release happens at most once per handle and
//! can never be undone.

use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
    #[error("frame source released")]
    Released,
}

/// Something that produces frames on demand.
pub trait FrameSource: Send {
    /// Grab the next frame. May block for roughly one frame interval.
    fn grab(&mut self) -> Result<Frame, CameraError>;

    /// Give the device back to the system. Called at most once, by
    /// [`SourceHandle::release`].
    fn release(&mut self) -> Result<(), CameraError> {
        Ok(())
    }
}

/// Shared owner of a [`FrameSource`] with an idempotent, permanent release.
///
/// The slot lock is only held to move the source in or out. A grab runs with
/// the source checked out, so [`SourceHandle::release`] never waits on a
/// device that has stopped delivering frames.
pub struct SourceHandle {
    slot: Mutex<Option<Box<dyn FrameSource>>>,
    released: AtomicBool,
}

impl SourceHandle {
    pub fn new(source: impl FrameSource + 'static) -> Self {
        Self {
            slot: Mutex::new(Some(Box::new(source))),
            released: AtomicBool::new(false),
        }
    }

    /// Grab a frame, or [`CameraError::Released`] once the source is gone.
    ///
    /// If the handle is released while this grab is in flight, the frame is
    /// discarded and this call gives the device back.
    pub fn grab(&self) -> Result<Frame, CameraError> {
        let mut source = {
            let mut slot = self.lock_slot();
            if self.is_released() {
                return Err(CameraError::Released);
            }
            slot.take().ok_or(CameraError::DeviceBusy)?
        };

        let result = source.grab();

        let mut slot = self.lock_slot();
        if self.is_released() {
            drop(slot);
            release_source(source.as_mut());
            return Err(CameraError::Released);
        }
        *slot = Some(source);
        result
    }

    /// Release the source. Returns `true` only for the call that actually
    /// performed the release; every later call is a no-op.
    ///
    /// A device-level failure is logged and the handle still counts as
    /// released: the source is dropped either way. When a grab is in flight
    /// the grabbing thread finishes the release as soon as it returns.
    pub fn release(&self) -> bool {
        // Set before taking the lock so a grab returning in between sees it.
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        let taken = self.lock_slot().take();
        match taken {
            Some(mut source) => release_source(source.as_mut()),
            None => tracing::debug!("frame source release deferred to in-flight grab"),
        }
        true
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn lock_slot(&self) -> MutexGuard<'_, Option<Box<dyn FrameSource>>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn release_source(source: &mut dyn FrameSource) {
    match source.release() {
        Ok(()) => tracing::info!("frame source released"),
        Err(e) => tracing::warn!(error = %e, "frame source release failed; handle dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    struct CountingSource {
        releases: Arc<AtomicUsize>,
        fail_release: bool,
    }

    impl FrameSource for CountingSource {
        fn grab(&mut self) -> Result<Frame, CameraError> {
            Ok(Frame::gray(vec![0; 4], 2, 2).unwrap())
        }

        fn release(&mut self) -> Result<(), CameraError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                Err(CameraError::DeviceBusy)
            } else {
                Ok(())
            }
        }
    }

    fn handle(fail_release: bool) -> (SourceHandle, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        let source = CountingSource {
            releases: Arc::clone(&releases),
            fail_release,
        };
        (SourceHandle::new(source), releases)
    }

    #[test]
    fn test_release_is_idempotent() {
        let (handle, releases) = handle(false);
        assert!(handle.grab().is_ok());
        assert!(handle.release());
        assert!(!handle.release());
        assert!(!handle.release());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(handle.is_released());
    }

    #[test]
    fn test_grab_after_release_fails() {
        let (handle, _) = handle(false);
        handle.release();
        assert!(matches!(handle.grab(), Err(CameraError::Released)));
    }

    #[test]
    fn test_failed_release_still_counts() {
        let (handle, releases) = handle(true);
        assert!(handle.release());
        assert!(!handle.release());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(matches!(handle.grab(), Err(CameraError::Released)));
    }

    #[test]
    fn test_concurrent_release_happens_once() {
        let (handle, releases) = handle(false);
        let handle = Arc::new(handle);
        let winners: usize = (0..8)
            .map(|_| {
                let h = Arc::clone(&handle);
                std::thread::spawn(move || h.release())
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|t| t.join().unwrap() as usize)
            .sum();
        assert_eq!(winners, 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    struct StalledSource {
        stall: Duration,
        releases: Arc<AtomicUsize>,
    }

    impl FrameSource for StalledSource {
        fn grab(&mut self) -> Result<Frame, CameraError> {
            std::thread::sleep(self.stall);
            Ok(Frame::gray(vec![0; 4], 2, 2).unwrap())
        }

        fn release(&mut self) -> Result<(), CameraError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_release_does_not_wait_for_stalled_grab() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(SourceHandle::new(StalledSource {
            stall: Duration::from_millis(600),
            releases: Arc::clone(&releases),
        }));

        let grabber = {
            let h = Arc::clone(&handle);
            std::thread::spawn(move || h.grab())
        };
        std::thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        assert!(handle.release());
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(handle.is_released());
        // The device is still checked out by the grabbing thread.
        assert_eq!(releases.load(Ordering::SeqCst), 0);

        assert!(matches!(grabber.join().unwrap(), Err(CameraError::Released)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        assert!(!handle.release());
        assert!(matches!(handle.grab(), Err(CameraError::Released)));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_grab_reports_busy() {
        let releases = Arc::new(AtomicUsize::new(0));
        let handle = Arc::new(SourceHandle::new(StalledSource {
            stall: Duration::from_millis(200),
            releases: Arc::clone(&releases),
        }));
        let grabber = {
            let h = Arc::clone(&handle);
            std::thread::spawn(move || h.grab())
        };
        std::thread::sleep(Duration::from_millis(50));

        assert!(matches!(handle.grab(), Err(CameraError::DeviceBusy)));
        assert!(grabber.join().unwrap().is_ok());
        assert!(handle.release());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
