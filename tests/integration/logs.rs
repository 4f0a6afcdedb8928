use std::time::Duration;

use servy::host::ShutdownToken;
use servy::logs::RotatingWriter;
use servy::platform::fake::FakeEventSink;
use servy::tailer::{load_history, tail};

#[test]
fn tailer_reads_back_everything_the_writer_appended() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service.log");
    let writer = RotatingWriter::new(&path, 0);
    let sink = FakeEventSink::default();

    for i in 0..20 {
        writer.write_line(&format!("line-{i}"), &sink);
    }
    writer.flush_and_close();

    let (history, _cursor) = load_history(&path, 5).unwrap();
    let texts: Vec<_> = history.iter().map(|l| l.text.as_str()).collect();
    assert_eq!(texts, vec!["line-15", "line-16", "line-17", "line-18", "line-19"]);
}

#[test]
fn tail_follows_lines_appended_after_rotation_threshold_crossed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service.log");
    let writer = RotatingWriter::new(&path, 256);
    let sink = FakeEventSink::default();

    for i in 0..5 {
        writer.write_line(&format!("seed-{i}"), &sink);
    }
    writer.flush_and_close();

    let (_history, cursor) = load_history(&path, 100).unwrap();
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

    for i in 0..30 {
        writer.write_line(&format!("after-{i}"), &sink);
        std::thread::sleep(Duration::from_millis(5));
    }
    writer.flush_and_close();

    std::thread::sleep(Duration::from_millis(400));
    cancel.cancel();
    handle.join().unwrap();

    let lines = collected.lock().unwrap();
    assert!(lines.iter().any(|l| l == "after-0"));
    assert!(lines.iter().any(|l| l == "after-29"));
}
