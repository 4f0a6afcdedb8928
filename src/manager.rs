//! Service manager façade (spec §4.E): install/uninstall/start/stop/
//! restart/status/get_startup_type, built on the platform adapter and
//! the configuration store.

use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use crate::cli::encode_start_options;
use crate::config::{ServiceDefinition, StartupType};
use crate::error::ManagerError;
use crate::host::{ShutdownToken, StartOptions};
use crate::platform::{
    CredentialValidator, RecoveryPolicy, ServiceAccount, ServiceControl, ServiceRegistration,
    ServiceStatusKind, StartupTypeKind,
};
use crate::store::DefinitionStore;

const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(30);

fn to_platform_startup_type(startup_type: StartupType) -> StartupTypeKind {
    match startup_type {
        StartupType::Automatic => StartupTypeKind::Automatic,
        StartupType::Manual => StartupTypeKind::Manual,
        StartupType::Disabled => StartupTypeKind::Disabled,
    }
}

fn to_recovery_policy(def: &ServiceDefinition) -> RecoveryPolicy {
    if !def.enable_health_monitoring {
        return RecoveryPolicy::None;
    }
    match def.recovery_action {
        crate::config::RecoveryAction::None => RecoveryPolicy::None,
        crate::config::RecoveryAction::RestartProcess => RecoveryPolicy::RestartProcess,
        crate::config::RecoveryAction::RestartService => RecoveryPolicy::RestartService,
        crate::config::RecoveryAction::RestartComputer => RecoveryPolicy::RestartComputer,
    }
}

/// The façade: capability-injected per spec §9, so it can be exercised
/// against the Windows platform adapter in production and against
/// [`crate::platform::fake`] in tests.
pub struct ServiceManager {
    control: Box<dyn ServiceControl>,
    store: DefinitionStore,
    credentials: Box<dyn CredentialValidator>,
    host_executable_path: String,
}

impl ServiceManager {
    pub fn new(
        control: Box<dyn ServiceControl>,
        store: DefinitionStore,
        credentials: Box<dyn CredentialValidator>,
        host_executable_path: impl Into<String>,
    ) -> Self {
        Self {
            control,
            store,
            credentials,
            host_executable_path: host_executable_path.into(),
        }
    }

    fn build_registration(&self, def: &ServiceDefinition) -> ServiceRegistration {
        let options = StartOptions::from_definition(def);
        let args = encode_start_options(&options);
        ServiceRegistration {
            name: def.name.clone(),
            display_name: def.name.clone(),
            description: def.description.clone(),
            image_path: format!("\"{}\" {}", self.host_executable_path, args),
            startup_type: to_platform_startup_type(def.startup_type),
            dependencies: def.service_dependencies.clone(),
            account: if def.run_as_local_system {
                ServiceAccount::LocalSystem
            } else {
                ServiceAccount::User {
                    name: def.user_account.clone(),
                    password: self.store.decrypt_password(def),
                }
            },
        }
    }

    /// Validates `def`, expands environment references, verifies the
    /// executable exists, verifies credentials if non-system, registers
    /// with the SCM, then persists to the store. All-or-nothing: any
    /// failure after SCM registration rolls it back.
    pub fn install(&self, mut def: ServiceDefinition) -> Result<i64, ManagerError> {
        def.validate().map_err(ManagerError::Invalid)?;

        let expanded_exe = crate::env_list::expand(
            &def.executable_path,
            &std::env::vars().collect(),
        );
        if !Path::new(&expanded_exe).exists() {
            return Err(ManagerError::Invalid(format!(
                "executable_path '{expanded_exe}' does not exist"
            )));
        }
        def.executable_path = expanded_exe;

        if !def.run_as_local_system {
            let password = if def.password.is_empty() {
                String::new()
            } else {
                self.store.decrypt_password(&def)
            };
            self.credentials
                .validate(&def.user_account, &password)
                .map_err(|e| ManagerError::CredentialInvalid(e.to_string()))?;
        }

        let registration = self.build_registration(&def);
        self.control.create(&registration)?;

        if let Err(err) = self
            .control
            .set_recovery_policy(&def.name, to_recovery_policy(&def))
            .and_then(|_| {
                self.control
                    .set_dependencies(&def.name, &def.service_dependencies)
            })
        {
            let _ = self.control.delete(&def.name);
            return Err(ManagerError::Platform(err));
        }

        match self.store.add(def) {
            Ok(id) => Ok(id),
            Err(err) => {
                let _ = self.control.delete(&registration.name);
                Err(ManagerError::Store(err))
            }
        }
    }

    /// Stops the service if running (bounded wait), then deletes from
    /// SCM and store.
    pub fn uninstall(&self, name: &str, cancel: &ShutdownToken) -> Result<(), ManagerError> {
        if let Ok(status) = self.control.query_status(name) {
            if status == ServiceStatusKind::Running {
                self.control.stop(name)?;
                self.control.wait_for_status(
                    name,
                    ServiceStatusKind::Stopped,
                    DEFAULT_PHASE_TIMEOUT,
                    cancel,
                )?;
            }
        }

        self.control.delete(name)?;

        match self.store.get_by_name(name) {
            Ok(def) => self.store.delete_by_id(def.id).map_err(ManagerError::from),
            Err(_) => Ok(()),
        }
    }

    pub fn start(&self, name: &str) -> Result<(), ManagerError> {
        let def = self.store.get_by_name(name)?;
        if def.startup_type == StartupType::Disabled {
            return Err(ManagerError::Disabled {
                name: name.to_string(),
            });
        }

        for dependency in &def.service_dependencies {
            if self.control.get_startup_type(dependency)? == StartupTypeKind::Disabled {
                return Err(ManagerError::Invalid(format!(
                    "dependency '{dependency}' is disabled"
                )));
            }
        }

        self.control.start(name).map_err(ManagerError::from)
    }

    pub fn stop(&self, name: &str) -> Result<(), ManagerError> {
        self.control.stop(name).map_err(ManagerError::from)
    }

    /// stop-wait-start with a per-phase timeout.
    pub fn restart(&self, name: &str, cancel: &ShutdownToken) -> Result<(), ManagerError> {
        self.control.stop(name)?;
        self.control
            .wait_for_status(name, ServiceStatusKind::Stopped, DEFAULT_PHASE_TIMEOUT, cancel)?;
        self.start(name)?;
        self.control
            .wait_for_status(name, ServiceStatusKind::Running, DEFAULT_PHASE_TIMEOUT, cancel)
            .map_err(ManagerError::from)
    }

    pub fn status(&self, name: &str) -> Result<ServiceStatusKind, ManagerError> {
        let status = self.control.query_status(name)?;
        self.store
            .record_observed_status(name, &format!("{status:?}"), None);
        Ok(status)
    }

    pub fn get_startup_type(&self, name: &str) -> Result<StartupTypeKind, ManagerError> {
        self.control.get_startup_type(name).map_err(ManagerError::from)
    }

    pub fn store(&self) -> &DefinitionStore {
        &self.store
    }

    /// Records an observed failure against the store's best-effort
    /// annotation column, called by callers that surface an error up
    /// through this façade so later `status` reads can show it.
    pub fn record_failure(&self, name: &str, message: &str) {
        error!(service = name, message, "service manager operation failed");
        self.store.record_observed_status(name, "Unknown", Some(message));
        info!(service = name, "failure recorded in store annotation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{KeyStorage, SecureDataEngine};
    use crate::platform::fake::{FakeCredentialValidator, FakeEventSink, FakeServiceControl};
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

    fn make_manager(dir: &std::path::Path) -> ServiceManager {
        let mut master = MemStorage {
            location: "master".into(),
            data: Mutex::new(None),
        };
        let mut legacy = MemStorage {
            location: "legacy".into(),
            data: Mutex::new(None),
        };
        let crypto = SecureDataEngine::open(
            &PassthroughSecrets,
            &mut master,
            &mut legacy,
            Box::new(FakeEventSink::default()),
        )
        .unwrap();
        let store = DefinitionStore::open(dir.join("services.json"), crypto).unwrap();
        ServiceManager::new(
            Box::new(FakeServiceControl::default()),
            store,
            Box::new(FakeCredentialValidator::default()),
            "C:\\servy\\servy-host.exe".to_string(),
        )
    }

    fn def(name: &str, exe: &Path) -> ServiceDefinition {
        ServiceDefinition {
            name: name.to_string(),
            executable_path: exe.display().to_string(),
            run_as_local_system: true,
            ..Default::default()
        }
    }

    #[test]
    fn install_requires_existing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let manager = make_manager(dir.path());
        let missing = dir.path().join("does-not-exist.exe");
        let result = manager.install(def("svc1", &missing));
        assert!(result.is_err());
    }

    #[test]
    fn install_registers_scm_then_persists_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("app.exe");
        std::fs::write(&exe, b"").unwrap();
        let manager = make_manager(dir.path());

        let id = manager.install(def("svc1", &exe)).unwrap();
        assert!(id > 0);
        assert!(manager.store().get_by_name("svc1").is_ok());
        assert_eq!(
            manager.control.query_status("svc1").unwrap(),
            ServiceStatusKind::Stopped
        );
    }

    #[test]
    fn disabled_service_refuses_start() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("app.exe");
        std::fs::write(&exe, b"").unwrap();
        let manager = make_manager(dir.path());

        let mut definition = def("svc1", &exe);
        definition.startup_type = StartupType::Disabled;
        manager.install(definition).unwrap();

        let result = manager.start("svc1");
        assert!(matches!(result, Err(ManagerError::Disabled { .. })));
    }

    #[test]
    fn start_refuses_when_a_dependency_is_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("app.exe");
        std::fs::write(&exe, b"").unwrap();
        let manager = make_manager(dir.path());

        let mut dependency = def("dep1", &exe);
        dependency.startup_type = StartupType::Disabled;
        manager.install(dependency).unwrap();

        let mut dependent = def("svc1", &exe);
        dependent.service_dependencies = vec!["dep1".to_string()];
        manager.install(dependent).unwrap();

        let result = manager.start("svc1");
        assert!(matches!(result, Err(ManagerError::Invalid(_))));
    }

    #[test]
    fn uninstall_removes_from_scm_and_store() {
        let dir = tempfile::tempdir().unwrap();
        let exe = dir.path().join("app.exe");
        std::fs::write(&exe, b"").unwrap();
        let manager = make_manager(dir.path());
        manager.install(def("svc1", &exe)).unwrap();

        let cancel = ShutdownToken::new();
        manager.uninstall("svc1", &cancel).unwrap();
        assert!(manager.store().get_by_name("svc1").is_err());
        assert!(manager.control.query_status("svc1").is_err());
    }
}
