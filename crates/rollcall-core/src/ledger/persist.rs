//! Whole-file atomic replacement.

use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread;
use std::time::Duration;

/// Attempts per format before a write is reported as failed.
pub(crate) const WRITE_ATTEMPTS: u32 = 3;

const BACKOFF_BASE: Duration = Duration::from_millis(10);

/// Write `path` through a temp file in the same directory: the content is
/// flushed and fsynced, then renamed over the target. Readers see either the
/// old file or the new one. If `fill` fails or panics, the temp file is
/// removed when it drops and the target is untouched.
pub(crate) fn write_atomic<F>(path: &Path, fill: F) -> io::Result<()>
where
    F: FnOnce(&mut dyn Write) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut temp = tempfile::Builder::new()
        .prefix(".rollcall-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut out = BufWriter::new(temp.as_file_mut());
        fill(&mut out)?;
        out.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    #[cfg(unix)]
    {
        // Make the rename itself durable; best effort.
        if let Ok(d) = std::fs::File::open(dir) {
            let _ = d.sync_all();
        }
    }
    Ok(())
}

/// Errors that retrying cannot fix.
pub(crate) fn is_permanent(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::InvalidData | io::ErrorKind::InvalidInput | io::ErrorKind::Unsupported
    )
}

/// [`write_atomic`] with bounded exponential backoff on transient errors.
pub(crate) fn write_atomic_retrying<F>(path: &Path, mut fill: F) -> io::Result<()>
where
    F: FnMut(&mut dyn Write) -> io::Result<()>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match write_atomic(path, &mut fill) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < WRITE_ATTEMPTS && !is_permanent(&e) => {
                let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::debug!(path = %path.display(), attempt, error = %e, "write failed, retrying");
                thread::sleep(delay);
            }
            Err(e) => return Err(e),
        }
    }
}
