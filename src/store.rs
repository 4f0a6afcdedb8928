//! Service configuration store (spec §4.D): a keyed table of
//! `ServiceDefinition` persisted as a single JSON document, with
//! XML/JSON export/import and substring search.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::config::ServiceDefinition;
use crate::constants::{ENC_PREFIX_BARE, ENC_PREFIX_V1, ENC_PREFIX_V2};
use crate::crypto::SecureDataEngine;
use crate::error::StoreError;
use crate::host::ShutdownToken;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    next_id: i64,
    definitions: HashMap<i64, ServiceDefinition>,
}

/// `true` if `value` already carries one of the `SERVY_ENC:` prefixes
/// [`crate::crypto::SecureDataEngine::decrypt`] recognizes.
fn is_already_encrypted(value: &str) -> bool {
    value.starts_with(ENC_PREFIX_V2) || value.starts_with(ENC_PREFIX_V1) || value.starts_with(ENC_PREFIX_BARE)
}

/// Persists `ServiceDefinition` records at `path` as a single JSON
/// document. `password` is encrypted at the persistence boundary only
/// (§4.C); in-memory snapshots returned by `get_by_name`/`search`/etc.
/// always carry the ciphertext the same way the file does — callers
/// that need the plaintext go through [`DefinitionStore::decrypt_password`].
pub struct DefinitionStore {
    path: PathBuf,
    crypto: SecureDataEngine,
    document: RwLock<StoreDocument>,
}

impl DefinitionStore {
    /// Opens (or creates) the store at `path`.
    pub fn open(path: impl Into<PathBuf>, crypto: SecureDataEngine) -> Result<Self, StoreError> {
        let path = path.into();
        let document = if path.exists() {
            let text = std::fs::read_to_string(&path)?;
            serde_json::from_str(&text)?
        } else {
            StoreDocument::default()
        };

        Ok(Self {
            path,
            crypto,
            document: RwLock::new(document),
        })
    }

    fn persist(&self, document: &StoreDocument) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(document)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    fn find_by_name_locked(document: &StoreDocument, name: &str) -> Option<i64> {
        document
            .definitions
            .iter()
            .find(|(_, def)| def.name.eq_ignore_ascii_case(name))
            .map(|(id, _)| *id)
    }

    /// Inserts `def`, assigning it an id. Fails `AlreadyExists` on a
    /// case-insensitive name collision.
    pub fn add(&self, mut def: ServiceDefinition) -> Result<i64, StoreError> {
        def.validate().map_err(StoreError::Invalid)?;

        let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
        if Self::find_by_name_locked(&document, &def.name).is_some() {
            return Err(StoreError::AlreadyExists { name: def.name });
        }

        document.next_id += 1;
        let id = document.next_id;
        def.id = id;
        def.password = self.encrypt_password(&def.password)?;
        document.definitions.insert(id, def);
        self.persist(&document)?;
        Ok(id)
    }

    /// Encrypts `password` for storage, unless it already carries a
    /// recognized `SERVY_ENC:` prefix — e.g. a value round-tripped through
    /// `export_json`/`export_xml` and handed back to `import_*`/`upsert_by_name`
    /// unchanged. Re-encrypting an already-encrypted value would wrap it a
    /// second time and break the export-then-import round trip.
    fn encrypt_password(&self, password: &str) -> Result<String, StoreError> {
        if password.is_empty() || is_already_encrypted(password) {
            return Ok(password.to_string());
        }
        self.crypto
            .encrypt(password)
            .map_err(|e| StoreError::Invalid(format!("failed to encrypt password: {e}")))
    }

    /// Updates an existing definition by id. No-op if the id is absent.
    pub fn update(&self, mut def: ServiceDefinition) -> Result<(), StoreError> {
        def.validate().map_err(StoreError::Invalid)?;

        let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
        if !document.definitions.contains_key(&def.id) {
            return Ok(());
        }

        if let Some(existing_id) = Self::find_by_name_locked(&document, &def.name) {
            if existing_id != def.id {
                return Err(StoreError::AlreadyExists { name: def.name });
            }
        }

        def.password = self.encrypt_password(&def.password)?;
        document.definitions.insert(def.id, def);
        self.persist(&document)?;
        Ok(())
    }

    /// Inserts if no definition named `def.name` exists, else updates it
    /// in place, preserving its id.
    pub fn upsert_by_name(&self, mut def: ServiceDefinition) -> Result<i64, StoreError> {
        def.validate().map_err(StoreError::Invalid)?;

        let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
        match Self::find_by_name_locked(&document, &def.name) {
            Some(existing_id) => {
                def.id = existing_id;
                def.password = self.encrypt_password(&def.password)?;
                document.definitions.insert(existing_id, def);
                self.persist(&document)?;
                Ok(existing_id)
            }
            None => {
                document.next_id += 1;
                let id = document.next_id;
                def.id = id;
                def.password = self.encrypt_password(&def.password)?;
                document.definitions.insert(id, def);
                self.persist(&document)?;
                Ok(id)
            }
        }
    }

    /// Deletes by id.
    pub fn delete_by_id(&self, id: i64) -> Result<(), StoreError> {
        let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
        document
            .definitions
            .remove(&id)
            .ok_or_else(|| StoreError::NotFound { key: id.to_string() })?;
        self.persist(&document)
    }

    /// Deletes by name (case-insensitive).
    pub fn delete_by_name(&self, name: &str) -> Result<(), StoreError> {
        let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
        let id = Self::find_by_name_locked(&document, name)
            .ok_or_else(|| StoreError::NotFound { key: name.to_string() })?;
        document.definitions.remove(&id);
        self.persist(&document)
    }

    pub fn get_by_id(&self, id: i64) -> Result<ServiceDefinition, StoreError> {
        let document = self.document.read().unwrap_or_else(|e| e.into_inner());
        document
            .definitions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { key: id.to_string() })
    }

    pub fn get_by_name(&self, name: &str) -> Result<ServiceDefinition, StoreError> {
        let document = self.document.read().unwrap_or_else(|e| e.into_inner());
        let id = Self::find_by_name_locked(&document, name)
            .ok_or_else(|| StoreError::NotFound { key: name.to_string() })?;
        Ok(document.definitions[&id].clone())
    }

    /// Lists every definition, ordered by name.
    pub fn list_all(&self) -> Vec<ServiceDefinition> {
        let document = self.document.read().unwrap_or_else(|e| e.into_inner());
        let mut defs: Vec<_> = document.definitions.values().cloned().collect();
        defs.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        defs
    }

    /// Case-insensitive substring search over name and description,
    /// ordered by name. Observes `cancel` between rows, per spec §4.D.
    pub fn search(&self, substring: &str, cancel: &ShutdownToken) -> Result<Vec<ServiceDefinition>, StoreError> {
        let needle = substring.to_ascii_lowercase();
        let document = self.document.read().unwrap_or_else(|e| e.into_inner());
        let mut matches = Vec::new();
        for def in document.definitions.values() {
            if cancel.is_cancelled() {
                return Err(StoreError::Cancelled);
            }
            if def.name.to_ascii_lowercase().contains(&needle)
                || def.description.to_ascii_lowercase().contains(&needle)
            {
                matches.push(def.clone());
            }
        }
        matches.sort_by(|a, b| a.name.to_ascii_lowercase().cmp(&b.name.to_ascii_lowercase()));
        Ok(matches)
    }

    /// Decrypts the given definition's password for transient,
    /// in-memory use (e.g. the façade handing credentials to
    /// `CredentialValidator` or to the SCM registration).
    pub fn decrypt_password(&self, def: &ServiceDefinition) -> String {
        if def.password.is_empty() {
            return String::new();
        }
        self.crypto.decrypt(&def.password)
    }

    /// Exports a single definition as pretty-printed JSON.
    pub fn export_json(&self, name: &str) -> Result<String, StoreError> {
        let def = self.get_by_name(name)?;
        serde_json::to_string_pretty(&def).map_err(StoreError::from)
    }

    /// Exports a single definition as XML, root element `ServiceDefinition`.
    pub fn export_xml(&self, name: &str) -> Result<String, StoreError> {
        let def = self.get_by_name(name)?;
        quick_xml::se::to_string(&def).map_err(|e| StoreError::Xml(e.to_string()))
    }

    /// Parses `text` as JSON, validates its shape, then upserts by name.
    /// Never raises: a parse or validation failure returns `Ok(false)`.
    pub fn import_json(&self, text: &str) -> bool {
        match serde_json::from_str::<ServiceDefinition>(text) {
            Ok(def) if def.validate().is_ok() => self.upsert_by_name(def).is_ok(),
            _ => false,
        }
    }

    /// Parses `text` as XML, validates its shape, then upserts by name.
    /// Never raises.
    pub fn import_xml(&self, text: &str) -> bool {
        match quick_xml::de::from_str::<ServiceDefinition>(text) {
            Ok(def) if def.validate().is_ok() => self.upsert_by_name(def).is_ok(),
            _ => false,
        }
    }

    /// Updates the best-effort `last_known_status`/`last_error`
    /// annotation columns after a façade SCM round-trip. Never a source
    /// of truth (§4.E's ordering rule keeps the SCM authoritative).
    pub fn record_observed_status(&self, name: &str, status: &str, error: Option<&str>) {
        let mut document = self.document.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = Self::find_by_name_locked(&document, name) {
            if let Some(def) = document.definitions.get_mut(&id) {
                def.last_known_status = status.to_string();
                def.last_error = error.unwrap_or_default().to_string();
            }
        }
        let _ = self.persist(&document);
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::fake::FakeEventSink;

    fn engine() -> SecureDataEngine {
        use crate::crypto::KeyStorage;
        use crate::platform::SecretStore;
        use std::sync::Mutex;

        struct MemStorage {
            location: String,
            data: Mutex<Option<Vec<u8>>>,
        }
        impl KeyStorage for MemStorage {
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
        struct PassthroughSecrets;
        impl SecretStore for PassthroughSecrets {
            fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, crate::error::PlatformError> {
                Ok(plaintext.to_vec())
            }
            fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, crate::error::PlatformError> {
                Ok(sealed.to_vec())
            }
        }

        let mut master = MemStorage {
            location: "master".into(),
            data: Mutex::new(None),
        };
        let mut legacy = MemStorage {
            location: "legacy".into(),
            data: Mutex::new(None),
        };
        SecureDataEngine::open(&PassthroughSecrets, &mut master, &mut legacy, Box::new(FakeEventSink::default()))
            .unwrap()
    }

    fn def(name: &str) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            executable_path: "C:\\svc\\app.exe".into(),
            run_as_local_system: true,
            ..Default::default()
        }
    }

    #[test]
    fn add_assigns_id_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        let id = store.add(def("svc1")).unwrap();
        assert!(id > 0);
        assert_eq!(store.get_by_id(id).unwrap().name, "svc1");
    }

    #[test]
    fn add_rejects_case_insensitive_name_collision() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        store.add(def("svc1")).unwrap();
        let result = store.add(def("SVC1"));
        assert!(matches!(result, Err(StoreError::AlreadyExists { .. })));
    }

    #[test]
    fn upsert_by_name_inserts_then_updates() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        let id = store.upsert_by_name(def("svc1")).unwrap();
        let mut updated = def("svc1");
        updated.description = "updated".into();
        let id2 = store.upsert_by_name(updated).unwrap();
        assert_eq!(id, id2);
        assert_eq!(store.get_by_id(id).unwrap().description, "updated");
    }

    #[test]
    fn password_is_encrypted_at_rest() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        let mut with_password = def("svc1");
        with_password.run_as_local_system = false;
        with_password.user_account = "DOMAIN\\svc".into();
        with_password.password = "hunter2".into();
        let id = store.add(with_password).unwrap();

        let persisted_text = std::fs::read_to_string(dir.path().join("services.json")).unwrap();
        assert!(!persisted_text.contains("hunter2"));

        let reread = store.get_by_id(id).unwrap();
        assert_ne!(reread.password, "hunter2");
        assert_eq!(store.decrypt_password(&reread), "hunter2");
    }

    #[test]
    fn search_matches_name_and_description_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        store.add(def("WebServer")).unwrap();
        let mut other = def("Other");
        other.description = "runs a WEB proxy".into();
        store.add(other).unwrap();

        let cancel = ShutdownToken::new();
        let results = store.search("web", &cancel).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].name, "Other");
        assert_eq!(results[1].name, "WebServer");
    }

    #[test]
    fn json_round_trip_fills_defaults_for_absent_fields() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        let id = store.add(def("svc1")).unwrap();
        let exported = store.export_json("svc1").unwrap();
        assert!(store.import_json(&exported));
        assert_eq!(store.get_by_id(id).unwrap().name, "svc1");
    }

    #[test]
    fn export_then_import_round_trip_preserves_password() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        let mut with_password = def("svc1");
        with_password.run_as_local_system = false;
        with_password.user_account = "DOMAIN\\svc".into();
        with_password.password = "hunter2".into();
        store.add(with_password).unwrap();

        let exported = store.export_json("svc1").unwrap();
        assert!(store.import_json(&exported));

        let reread = store.get_by_name("svc1").unwrap();
        assert_eq!(store.decrypt_password(&reread), "hunter2");
    }

    #[test]
    fn import_xml_preserves_already_encrypted_password() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        let mut with_password = def("svc1");
        with_password.run_as_local_system = false;
        with_password.user_account = "DOMAIN\\svc".into();
        with_password.password = "hunter2".into();
        store.add(with_password).unwrap();

        let exported = store.export_xml("svc1").unwrap();
        assert!(store.import_xml(&exported));

        let reread = store.get_by_name("svc1").unwrap();
        assert_eq!(store.decrypt_password(&reread), "hunter2");
    }

    #[test]
    fn import_json_never_raises_on_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        assert!(!store.import_json("not json"));
        assert!(!store.import_xml("<not-xml"));
    }

    #[test]
    fn delete_by_name_removes_definition() {
        let dir = tempfile::tempdir().unwrap();
        let store = DefinitionStore::open(dir.path().join("services.json"), engine()).unwrap();
        store.add(def("svc1")).unwrap();
        store.delete_by_name("svc1").unwrap();
        assert!(store.get_by_name("svc1").is_err());
    }
}
