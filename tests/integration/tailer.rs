use std::fs::{File, OpenOptions};
use std::io::Write;
use std::time::Duration;

use servy::host::ShutdownToken;
use servy::tailer::{load_history, tail, TailCursor};

#[test]
fn load_history_scans_backwards_across_multiple_chunk_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.log");
    {
        let mut file = File::create(&path).unwrap();
        // Each line is short, so thousands of lines cross several
        // TAIL_SCAN_CHUNK_BYTES-sized backward scans.
        for i in 0..5000 {
            writeln!(file, "entry-{i:05}").unwrap();
        }
    }

    let (lines, cursor) = load_history(&path, 50).unwrap();
    assert_eq!(lines.len(), 50);
    assert_eq!(lines.last().unwrap().text, "entry-04999");
    assert_eq!(lines.first().unwrap().text, "entry-04950");
    assert_eq!(cursor.offset, std::fs::metadata(&path).unwrap().len());

    // Synthetic timestamps must be strictly increasing so a consumer can
    // sort history and live-tailed lines into one sequence.
    for window in lines.windows(2) {
        assert!(window[0].synthetic_timestamp_ticks <= window[1].synthetic_timestamp_ticks);
    }
}

#[test]
fn tail_picks_up_lines_written_after_the_cursor_was_taken() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.log");
    std::fs::write(&path, "").unwrap();

    let (_history, cursor) = load_history(&path, 10).unwrap();
    let cancel = ShutdownToken::new();
    let collected = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let collected_clone = collected.clone();
    let cancel_clone = cancel.clone();
    let path_clone = path.clone();

    let handle = std::thread::spawn(move || {
        tail(&path_clone, cursor, &cancel_clone, |batch| {
            collected_clone.lock().unwrap().extend_from_slice(batch);
        });
    });

    let mut writer = OpenOptions::new().append(true).open(&path).unwrap();
    for i in 0..5 {
        writeln!(writer, "live-{i}").unwrap();
        writer.flush().unwrap();
        std::thread::sleep(Duration::from_millis(40));
    }

    std::thread::sleep(Duration::from_millis(300));
    cancel.cancel();
    handle.join().unwrap();

    let lines = collected.lock().unwrap();
    assert_eq!(*lines, vec!["live-0", "live-1", "live-2", "live-3", "live-4"]);
}

#[test]
fn tail_never_delivers_a_partial_trailing_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.log");
    std::fs::write(&path, "complete\n").unwrap();

    let cursor = TailCursor {
        offset: 0,
        creation_time: std::fs::metadata(&path).unwrap().created().unwrap(),
    };

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    write!(file, "no-newline-yet").unwrap();
    file.flush().unwrap();

    let cancel = ShutdownToken::new();
    let collected = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
    let collected_clone = collected.clone();
    let cancel_clone = cancel.clone();
    let path_clone = path.clone();

    let handle = std::thread::spawn(move || {
        tail(&path_clone, cursor, &cancel_clone, |batch| {
            collected_clone.lock().unwrap().extend_from_slice(batch);
        });
    });

    std::thread::sleep(Duration::from_millis(300));
    cancel.cancel();
    handle.join().unwrap();

    let lines = collected.lock().unwrap();
    assert_eq!(*lines, vec!["complete".to_string()]);
}
