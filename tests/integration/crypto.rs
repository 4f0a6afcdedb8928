mod common;

use servy::crypto::SecureDataEngine;
use servy::error::CryptoError;
use servy::platform::fake::FakeEventSink;

use common::{test_engine, MemKeyStorage, PassthroughSecrets};

#[test]
fn open_generates_and_seals_key_material_on_first_use() {
    let mut master = MemKeyStorage::new("master");
    let mut legacy = MemKeyStorage::new("legacy");
    assert!(master.read_sealed().unwrap().is_none());

    let engine = SecureDataEngine::open(
        &PassthroughSecrets,
        &mut master,
        &mut legacy,
        Box::new(FakeEventSink::default()),
    )
    .unwrap();

    assert!(master.read_sealed().unwrap().is_some());
    assert!(legacy.read_sealed().unwrap().is_some());

    let ciphertext = engine.encrypt("reopen-me").unwrap();
    assert_eq!(engine.decrypt(&ciphertext), "reopen-me");
}

#[test]
fn reopening_with_same_storage_reuses_existing_key_material() {
    let mut master = MemKeyStorage::new("master");
    let mut legacy = MemKeyStorage::new("legacy");

    let first = SecureDataEngine::open(
        &PassthroughSecrets,
        &mut master,
        &mut legacy,
        Box::new(FakeEventSink::default()),
    )
    .unwrap();
    let ciphertext = first.encrypt("carried-over").unwrap();

    let second = SecureDataEngine::open(
        &PassthroughSecrets,
        &mut master,
        &mut legacy,
        Box::new(FakeEventSink::default()),
    )
    .unwrap();

    assert_eq!(second.decrypt(&ciphertext), "carried-over");
}

#[test]
fn identical_storage_locations_rejected_even_across_process_restarts() {
    let mut a = MemKeyStorage::new("/var/servy/key");
    let mut b = MemKeyStorage::new("/var/servy/key");
    let result = SecureDataEngine::open(
        &PassthroughSecrets,
        &mut a,
        &mut b,
        Box::new(FakeEventSink::default()),
    );
    assert!(matches!(result, Err(CryptoError::IdenticalKeyPaths)));
}

#[test]
fn full_round_trip_through_shared_test_engine_helper() {
    let engine = test_engine();
    let secret = "correct horse battery staple";
    let ciphertext = engine.encrypt(secret).unwrap();
    assert!(ciphertext.starts_with("SERVY_ENC:v2:"));
    assert_eq!(engine.decrypt(&ciphertext), secret);
}
