mod common;

use servy::config::{Priority, ServiceDefinition, StartupType};
use servy::host::ShutdownToken;
use servy::store::DefinitionStore;

use common::test_engine;

fn definition(name: &str) -> ServiceDefinition {
    ServiceDefinition {
        name: name.to_string(),
        executable_path: "C:\\svc\\app.exe".into(),
        run_as_local_system: true,
        priority: Priority::Normal,
        ..Default::default()
    }
}

#[test]
fn store_survives_process_restart_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("services.json");

    let id = {
        let store = DefinitionStore::open(&path, test_engine()).unwrap();
        store.add(definition("svc1")).unwrap()
    };

    let reopened = DefinitionStore::open(&path, test_engine()).unwrap();
    let def = reopened.get_by_id(id).unwrap();
    assert_eq!(def.name, "svc1");
}

#[test]
fn export_then_import_round_trips_through_json_and_xml() {
    let dir = tempfile::tempdir().unwrap();
    let store = DefinitionStore::open(dir.path().join("services.json"), test_engine()).unwrap();

    let mut def = definition("webserver");
    def.description = "serves static files".into();
    def.startup_type = StartupType::Automatic;
    def.service_dependencies = vec!["tcpip".into()];
    store.add(def).unwrap();

    let json = store.export_json("webserver").unwrap();
    let xml = store.export_xml("webserver").unwrap();

    store.delete_by_name("webserver").unwrap();
    assert!(store.get_by_name("webserver").is_err());

    assert!(store.import_json(&json));
    let reimported = store.get_by_name("webserver").unwrap();
    assert_eq!(reimported.description, "serves static files");
    assert_eq!(reimported.service_dependencies, vec!["tcpip".to_string()]);

    store.delete_by_name("webserver").unwrap();
    assert!(store.import_xml(&xml));
    assert_eq!(
        store.get_by_name("webserver").unwrap().startup_type,
        StartupType::Automatic
    );
}

#[test]
fn password_round_trips_encrypted_at_rest_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("services.json");

    {
        let store = DefinitionStore::open(&path, test_engine()).unwrap();
        let mut def = definition("svc-user");
        def.run_as_local_system = false;
        def.user_account = "DOMAIN\\svc".into();
        def.password = "s3cr3t".into();
        store.add(def).unwrap();
    }

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(!raw.contains("s3cr3t"));

    // A fresh engine backed by different key material cannot recover the
    // plaintext, but must not panic or corrupt the ciphertext on read.
    let store = DefinitionStore::open(&path, test_engine()).unwrap();
    let def = store.get_by_name("svc-user").unwrap();
    assert!(def.password.starts_with("SERVY_ENC:v2:"));
}

#[test]
fn cancelled_search_stops_without_completing() {
    let dir = tempfile::tempdir().unwrap();
    let store = DefinitionStore::open(dir.path().join("services.json"), test_engine()).unwrap();
    for i in 0..5 {
        store.add(definition(&format!("svc{i}"))).unwrap();
    }

    let cancel = ShutdownToken::new();
    cancel.cancel();
    let result = store.search("svc", &cancel);
    assert!(result.is_err());
}
