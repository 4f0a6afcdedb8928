//! The rotating log writer (spec §4.B): append-only, size-bounded
//! rotation, unique rotated-file naming, shared-read compatibility with
//! the tailer.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use crate::platform::{EventSeverity, EventSink};

struct WriterState {
    file: File,
    size: u64,
}

/// Appends lines to a target file, rotating it before a write would push
/// it past `rotation_size_bytes`. One instance per configured stream per
/// host process; internally serialized so concurrent callers never
/// interleave partial lines.
pub struct RotatingWriter {
    path: PathBuf,
    rotation_size_bytes: u64,
    state: Mutex<Option<WriterState>>,
}

impl RotatingWriter {
    /// Builds a writer for `path`. The file is opened lazily on first
    /// write so construction never fails merely because the parent
    /// directory does not exist yet.
    pub fn new(path: impl Into<PathBuf>, rotation_size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            rotation_size_bytes,
            state: Mutex::new(None),
        }
    }

    /// Appends one line (a trailing `\n` is added if missing), rotating
    /// first if needed. I/O errors are reported to `sink` and swallowed —
    /// per spec §4.B, writer failures never terminate the host.
    pub fn write_line(&self, line: &str, sink: &dyn EventSink) {
        if let Err(err) = self.try_write_line(line) {
            warn!(path = %self.path.display(), error = %err, "log write failed");
            sink.report(
                EventSeverity::Warning,
                None,
                &format!("log write to {} failed: {err}", self.path.display()),
            );
        }
    }

    fn try_write_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if guard.is_none() {
            *guard = Some(self.open_fresh()?);
        }

        let bytes_to_write = line.len() as u64 + 1;
        let should_rotate = self.rotation_size_bytes > 0
            && guard
                .as_ref()
                .map(|s| s.size + bytes_to_write >= self.rotation_size_bytes)
                .unwrap_or(false);

        if should_rotate {
            drop(guard.take());
            self.rotate()?;
            *guard = Some(self.open_fresh()?);
        }

        let state = guard.as_mut().expect("state populated above");
        state.file.write_all(line.as_bytes())?;
        if !line.ends_with('\n') {
            state.file.write_all(b"\n")?;
        }
        state.file.flush()?;
        state.size += bytes_to_write;
        Ok(())
    }

    fn open_fresh(&self) -> std::io::Result<WriterState> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = open_shared_read_append(&self.path)?;
        let size = file.metadata()?.len();
        Ok(WriterState { file, size })
    }

    fn rotate(&self) -> std::io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let rotated = self.next_rotated_name()?;
        std::fs::rename(&self.path, &rotated)?;
        Ok(())
    }

    /// Builds the rotated file name: `<stem>.<utc-ms>.<ext>`, with a
    /// `(n)` suffix on collision (spec §4.B, §6; Open Question resolved
    /// timestamp-first then `(n)`).
    fn next_rotated_name(&self) -> std::io::Result<PathBuf> {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();

        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|s| s.to_string_lossy().to_string());
        let parent = self.path.parent().unwrap_or_else(|| Path::new(""));

        let base_name = |suffix: Option<u32>| -> PathBuf {
            let mut name = format!("{stem}.{millis}");
            if let Some(n) = suffix {
                name.push_str(&format!("({n})"));
            }
            if let Some(ext) = &ext {
                name.push('.');
                name.push_str(ext);
            }
            parent.join(name)
        };

        let mut candidate = base_name(None);
        let mut n = 1u32;
        while candidate.exists() {
            candidate = base_name(Some(n));
            n += 1;
        }
        Ok(candidate)
    }

    /// Flushes and closes the underlying file handle, per shutdown (spec
    /// §4.F.5). Safe to call even if the writer was never opened.
    pub fn flush_and_close(&self) {
        let mut guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(mut state) = guard.take() {
            let _ = state.file.flush();
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(unix)]
fn open_shared_read_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(windows)]
fn open_shared_read_append(path: &Path) -> std::io::Result<File> {
    use std::os::windows::fs::OpenOptionsExt;
    const FILE_SHARE_READ: u32 = 0x0000_0001;
    OpenOptions::new()
        .create(true)
        .append(true)
        .share_mode(FILE_SHARE_READ)
        .open(path)
}

#[cfg(not(any(unix, windows)))]
fn open_shared_read_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}
