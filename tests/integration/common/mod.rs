#![allow(dead_code)]

use std::env;
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use servy::crypto::{KeyStorage, SecureDataEngine};
use servy::platform::fake::FakeEventSink;
use servy::platform::SecretStore;

/// Serializes tests that mutate `SERVY_TEST_HOME`, mirroring the teacher's
/// `HomeEnvGuard` pattern but scoped to servy's single env override.
fn env_lock() -> MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}

pub struct TestHomeGuard {
    previous: Option<String>,
    _lock: MutexGuard<'static, ()>,
}

impl TestHomeGuard {
    pub fn set(home: &Path) -> Self {
        let lock = env_lock();
        let previous = env::var("SERVY_TEST_HOME").ok();
        env::set_var("SERVY_TEST_HOME", home);
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for TestHomeGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => env::set_var("SERVY_TEST_HOME", value),
            None => env::remove_var("SERVY_TEST_HOME"),
        }
    }
}

pub fn wait_for_lines(path: &Path, expected: usize) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(content) = fs::read_to_string(path) {
            let lines: Vec<_> = content.lines().map(|l| l.to_string()).collect();
            if lines.len() >= expected {
                return lines;
            }
        }
        if Instant::now() >= deadline {
            panic!("timed out waiting for {expected} lines in {path:?}");
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(50));
    }
    panic!("timed out waiting for {path:?} to exist");
}

/// An in-memory `KeyStorage` for tests that need a `SecureDataEngine`
/// without touching the filesystem's sealed key files.
pub struct MemKeyStorage {
    location: String,
    data: Mutex<Option<Vec<u8>>>,
}

impl MemKeyStorage {
    pub fn new(location: &str) -> Self {
        Self {
            location: location.to_string(),
            data: Mutex::new(None),
        }
    }
}

impl KeyStorage for MemKeyStorage {
    fn location(&self) -> String {
        self.location.clone()
    }
    fn read_sealed(&self) -> std::io::Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap().clone())
    }
    fn write_sealed(&mut self, sealed: &[u8]) -> std::io::Result<()> {
        *self.data.lock().unwrap() = Some(sealed.to_vec());
        Ok(())
    }
}

pub struct PassthroughSecrets;

impl SecretStore for PassthroughSecrets {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, servy::error::PlatformError> {
        Ok(plaintext.to_vec())
    }
    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, servy::error::PlatformError> {
        Ok(sealed.to_vec())
    }
}

/// Builds a `SecureDataEngine` over in-memory key storage, for tests that
/// need a working store/manager stack without real sealed key files.
pub fn test_engine() -> SecureDataEngine {
    let mut master = MemKeyStorage::new("master");
    let mut legacy = MemKeyStorage::new("legacy");
    SecureDataEngine::open(
        &PassthroughSecrets,
        &mut master,
        &mut legacy,
        Box::new(FakeEventSink::default()),
    )
    .unwrap()
}
