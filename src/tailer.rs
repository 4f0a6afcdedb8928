//! Log tailer (spec §4.H): a read-only helper used by the manager-side
//! GUI (out of scope here) to load log history and follow rotations.
//! Grounded in the teacher's `TailMode::Follow`/`OneShot` batch-and-sleep
//! abstraction, reimplemented as a native backwards-scan + forward-poll
//! loop instead of shelling out to `tail`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::time::SystemTime;

use crate::constants::{TAIL_MAX_BATCH, TAIL_MISSING_RETRY_INTERVAL, TAIL_POLL_INTERVAL, TAIL_SCAN_CHUNK_BYTES};
use crate::host::ShutdownToken;

/// A line recovered from history, with a synthetic descending timestamp
/// (spec §4.H: "assigned a synthetic timestamp descending by 1 tick from
/// the file's last-write time").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryLine {
    pub text: String,
    pub synthetic_timestamp_ticks: i64,
}

/// Cursor state returned by `load_history` and consumed by `tail`.
#[derive(Debug, Clone, Copy)]
pub struct TailCursor {
    pub offset: u64,
    pub creation_time: SystemTime,
}

/// Scans backwards from end-of-file in `TAIL_SCAN_CHUNK_BYTES` buffers,
/// counting newlines, until at least `max_lines` have been found or the
/// start of the file is reached. Returns the most recent lines in
/// forward order plus a cursor positioned at end-of-file.
pub fn load_history(path: &Path, max_lines: usize) -> std::io::Result<(Vec<HistoryLine>, TailCursor)> {
    let mut file = File::open(path)?;
    let metadata = file.metadata()?;
    let file_len = metadata.len();
    let creation_time = metadata
        .created()
        .or_else(|_| metadata.modified())
        .unwrap_or(SystemTime::now());
    let last_write = metadata.modified().unwrap_or(SystemTime::now());

    if max_lines == 0 || file_len == 0 {
        return Ok((
            Vec::new(),
            TailCursor {
                offset: file_len,
                creation_time,
            },
        ));
    }

    let mut newline_count = 0usize;
    let mut scan_start = file_len;
    let mut buffer = vec![0u8; TAIL_SCAN_CHUNK_BYTES];

    while scan_start > 0 && newline_count <= max_lines {
        let chunk_len = TAIL_SCAN_CHUNK_BYTES.min(scan_start as usize);
        scan_start -= chunk_len as u64;
        file.seek(SeekFrom::Start(scan_start))?;
        let slice = &mut buffer[..chunk_len];
        file.read_exact(slice)?;
        newline_count += slice.iter().filter(|&&b| b == b'\n').count();
    }

    file.seek(SeekFrom::Start(scan_start))?;
    let mut suffix = Vec::with_capacity((file_len - scan_start) as usize);
    file.read_to_end(&mut suffix)?;

    let text = String::from_utf8_lossy(&suffix);
    let mut lines: Vec<&str> = text.split('\n').filter(|l| !l.is_empty()).collect();
    if lines.len() > max_lines {
        let drop_count = lines.len() - max_lines;
        lines.drain(0..drop_count);
    }

    let base_ticks = system_time_to_ticks(last_write);
    let total = lines.len() as i64;
    let history = lines
        .into_iter()
        .enumerate()
        .map(|(i, line)| HistoryLine {
            text: line.to_string(),
            synthetic_timestamp_ticks: base_ticks - (total - 1 - i as i64),
        })
        .collect();

    Ok((
        history,
        TailCursor {
            offset: file_len,
            creation_time,
        },
    ))
}

fn system_time_to_ticks(time: SystemTime) -> i64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Follows `path` from `cursor`, invoking `on_batch` with up to
/// `TAIL_MAX_BATCH` newline-terminated lines at a time. Detects rotation
/// or truncation by comparing creation time and length, resetting to
/// offset 0 when either indicates the file was replaced. Runs until
/// `cancel` fires.
pub fn tail(
    path: &Path,
    mut cursor: TailCursor,
    cancel: &ShutdownToken,
    mut on_batch: impl FnMut(&[String]),
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let file = match File::open(path) {
            Ok(f) => f,
            Err(_) => {
                if cancel.wait(TAIL_MISSING_RETRY_INTERVAL) {
                    return;
                }
                continue;
            }
        };

        let metadata = match file.metadata() {
            Ok(m) => m,
            Err(_) => {
                if cancel.wait(TAIL_MISSING_RETRY_INTERVAL) {
                    return;
                }
                continue;
            }
        };

        let current_creation = metadata
            .created()
            .or_else(|_| metadata.modified())
            .unwrap_or(SystemTime::now());
        let length = metadata.len();

        if current_creation != cursor.creation_time || length < cursor.offset {
            cursor.offset = 0;
            cursor.creation_time = current_creation;
        }

        if length > cursor.offset {
            if let Some(new_offset) = read_new_lines(&file, cursor.offset, &mut on_batch) {
                cursor.offset = new_offset;
            }
        }

        if cancel.wait(TAIL_POLL_INTERVAL) {
            return;
        }
    }
}

fn read_new_lines(file: &File, offset: u64, on_batch: &mut impl FnMut(&[String])) -> Option<u64> {
    let mut file = file.try_clone().ok()?;
    file.seek(SeekFrom::Start(offset)).ok()?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf).ok()?;

    let text = String::from_utf8_lossy(&buf);
    let mut consumed = 0usize;
    let mut batch = Vec::with_capacity(TAIL_MAX_BATCH);

    for line in text.split_inclusive('\n') {
        if !line.ends_with('\n') {
            // Incomplete trailing line: stop before it so we never
            // deliver a partial line, matching the ordering guarantee
            // in spec §5.
            break;
        }
        consumed += line.len();
        batch.push(line.trim_end_matches(['\r', '\n']).to_string());
        if batch.len() >= TAIL_MAX_BATCH {
            on_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        on_batch(&batch);
    }

    Some(offset + consumed as u64)
}
