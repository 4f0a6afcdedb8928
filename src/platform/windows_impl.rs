//! Windows implementations of the platform adapter traits (spec §4.A).
//! Built on `windows-service` for the SCM façade, raw `windows` Win32
//! bindings for job objects/console signals/DPAPI/event log, and
//! `winreg` for the credential-validation helper registry reads.

#![cfg(windows)]

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::Path;
use std::time::{Duration, Instant};

use windows::core::PCWSTR;
use windows::Win32::Foundation::{CloseHandle, SetHandleInformation, HANDLE, HANDLE_FLAGS, HANDLE_FLAG_INHERIT};
use windows::Win32::Security::Authentication::Identity::{
    LogonUserW, LOGON32_LOGON_SERVICE, LOGON32_PROVIDER_DEFAULT,
};
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTOAPI_BLOB, CRYPTPROTECT_LOCAL_MACHINE,
};
use windows::Win32::System::Console::{
    GenerateConsoleCtrlEvent, GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
};
use windows::Win32::System::EventLog::{
    DeregisterEventSource, RegisterEventSourceW, ReportEventW, EVENTLOG_ERROR_TYPE,
    EVENTLOG_INFORMATION_TYPE, EVENTLOG_WARNING_TYPE,
};
use windows::Win32::System::JobObjects::{
    AssignProcessToJobObject, CreateJobObjectW, SetInformationJobObject,
    JobObjectExtendedLimitInformation, JOBOBJECT_EXTENDED_LIMIT_INFORMATION,
    JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE,
};
use windows::Win32::System::Pipes::CreatePipe;
use windows::Win32::System::Shutdown::{
    InitiateSystemShutdownExW, SHTDN_REASON_FLAG_PLANNED, SHTDN_REASON_MAJOR_APPLICATION,
    SHTDN_REASON_MINOR_ENVIRONMENT,
};
use windows::Win32::System::Threading::{
    CreateProcessW, GetCurrentProcess, GetExitCodeProcess, TerminateProcess, WaitForSingleObject,
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, CREATE_NO_WINDOW,
    CREATE_UNICODE_ENVIRONMENT, HIGH_PRIORITY_CLASS, IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS,
    PROCESS_INFORMATION, REALTIME_PRIORITY_CLASS, STARTUPINFOW,
};
use windows::Win32::Security::{
    AdjustTokenPrivileges, LookupPrivilegeValueW, OpenProcessToken, LUID_AND_ATTRIBUTES,
    SECURITY_ATTRIBUTES, SE_PRIVILEGE_ENABLED, TOKEN_ADJUST_PRIVILEGES, TOKEN_PRIVILEGES,
    TOKEN_QUERY,
};

use windows_service::service::{
    ServiceAccess, ServiceAction, ServiceActionType, ServiceDependency, ServiceErrorControl,
    ServiceFailureActions, ServiceFailureResetPeriod, ServiceInfo, ServiceStartType,
    ServiceState, ServiceType,
};
use windows_service::service_manager::{ServiceManager, ServiceManagerAccess};

use crate::config::Priority;
use crate::constants::EVENT_SOURCE_NAME;
use crate::error::{ErrorKind, PlatformError};

use super::{
    ChildHandle, CredentialValidator, EventSeverity, EventSink, JobHandle, ProcessSpawner,
    RebootRequester, RecoveryPolicy, RestarterLauncher, SecretStore, ServiceAccount,
    ServiceControl, ServiceRegistration, ServiceStatusKind, StartupTypeKind, StdioRedirection,
};

fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

use std::os::windows::ffi::OsStrExt;

fn map_windows_error(context: &str, err: windows::core::Error) -> PlatformError {
    let kind = match err.code().0 as u32 {
        0x8007_0002 | 0x8007_0003 => ErrorKind::NotFound, // ERROR_FILE_NOT_FOUND / PATH_NOT_FOUND
        0x8007_0005 => ErrorKind::AccessDenied,           // ERROR_ACCESS_DENIED
        0x8007_00B7 => ErrorKind::AlreadyExists,          // ERROR_ALREADY_EXISTS
        0x8007_05B4 => ErrorKind::Timeout,                // ERROR_TIMEOUT
        _ => ErrorKind::OsFailure,
    };
    PlatformError::new(kind, format!("{context}: {err}"))
}

/// Windows SCM implementation of [`ServiceControl`], built on
/// `windows-service`.
pub struct WindowsServiceControl;

impl WindowsServiceControl {
    fn manager(access: ServiceManagerAccess) -> Result<ServiceManager, PlatformError> {
        ServiceManager::local_computer(None::<&str>, access).map_err(|e| {
            PlatformError::new(
                ErrorKind::OsFailure,
                format!("opening service control manager: {e}"),
            )
        })
    }
}

impl ServiceControl for WindowsServiceControl {
    fn create(&self, registration: &ServiceRegistration) -> Result<(), PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CREATE_SERVICE)?;

        let start_type = match registration.startup_type {
            StartupTypeKind::Automatic => ServiceStartType::AutoStart,
            StartupTypeKind::Manual => ServiceStartType::OnDemand,
            StartupTypeKind::Disabled => ServiceStartType::Disabled,
        };

        let (account_name, account_password) = match &registration.account {
            ServiceAccount::LocalSystem => (None, None),
            ServiceAccount::User { name, password } => {
                (Some(name.clone().into()), Some(password.clone().into()))
            }
        };

        let info = ServiceInfo {
            name: registration.name.clone().into(),
            display_name: registration.display_name.clone().into(),
            service_type: ServiceType::OWN_PROCESS,
            start_type,
            error_control: ServiceErrorControl::Normal,
            executable_path: registration.image_path.clone().into(),
            launch_arguments: Vec::new(),
            dependencies: registration
                .dependencies
                .iter()
                .map(|d| ServiceDependency::Service(d.clone().into()))
                .collect(),
            account_name,
            account_password,
        };

        let service = manager
            .create_service(&info, ServiceAccess::CHANGE_CONFIG)
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("create_service failed: {e}")))?;

        service
            .set_description(registration.description.clone())
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("set_description failed: {e}")))?;

        Ok(())
    }

    fn update(&self, registration: &ServiceRegistration) -> Result<(), PlatformError> {
        // windows-service's `Service::change_config` covers the mutable
        // subset we need (display name, start type, executable path);
        // dependencies and account are re-applied through the same call.
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(&registration.name, ServiceAccess::CHANGE_CONFIG)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;

        let start_type = match registration.startup_type {
            StartupTypeKind::Automatic => ServiceStartType::AutoStart,
            StartupTypeKind::Manual => ServiceStartType::OnDemand,
            StartupTypeKind::Disabled => ServiceStartType::Disabled,
        };

        service
            .change_config(&ServiceInfo {
                name: registration.name.clone().into(),
                display_name: registration.display_name.clone().into(),
                service_type: ServiceType::OWN_PROCESS,
                start_type,
                error_control: ServiceErrorControl::Normal,
                executable_path: registration.image_path.clone().into(),
                launch_arguments: Vec::new(),
                dependencies: registration
                    .dependencies
                    .iter()
                    .map(|d| ServiceDependency::Service(d.clone().into()))
                    .collect(),
                account_name: None,
                account_password: None,
            })
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("change_config failed: {e}")))
    }

    fn delete(&self, name: &str) -> Result<(), PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::DELETE)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;
        service
            .delete()
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("delete failed: {e}")))
    }

    fn set_recovery_policy(&self, name: &str, policy: RecoveryPolicy) -> Result<(), PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::START | ServiceAccess::CHANGE_CONFIG)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;

        let action = match policy {
            RecoveryPolicy::None => return Ok(()),
            RecoveryPolicy::RestartProcess | RecoveryPolicy::RestartService => {
                ServiceAction {
                    action_type: ServiceActionType::Restart,
                    delay: Duration::from_secs(1),
                }
            }
            RecoveryPolicy::RestartComputer => ServiceAction {
                action_type: ServiceActionType::Reboot,
                delay: Duration::from_secs(1),
            },
        };

        service
            .update_failure_actions(ServiceFailureActions {
                reset_period: ServiceFailureResetPeriod::After(Duration::from_secs(86400)),
                reboot_msg: None,
                command: None,
                actions: Some(vec![action]),
            })
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("update_failure_actions failed: {e}")))
    }

    fn set_dependencies(&self, name: &str, dependencies: &[String]) -> Result<(), PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::CHANGE_CONFIG)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;
        let deps: Vec<ServiceDependency> = dependencies
            .iter()
            .map(|d| ServiceDependency::Service(d.clone().into()))
            .collect();
        service
            .set_dependencies(&deps)
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("set_dependencies failed: {e}")))
    }

    fn query_status(&self, name: &str) -> Result<ServiceStatusKind, PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::QUERY_STATUS)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;
        let status = service
            .query_status()
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("query_status failed: {e}")))?;

        Ok(match status.current_state {
            ServiceState::Stopped => ServiceStatusKind::Stopped,
            ServiceState::StartPending => ServiceStatusKind::StartPending,
            ServiceState::StopPending => ServiceStatusKind::StopPending,
            ServiceState::Running => ServiceStatusKind::Running,
            ServiceState::ContinuePending => ServiceStatusKind::ContinuePending,
            ServiceState::PausePending => ServiceStatusKind::PausePending,
            ServiceState::Paused => ServiceStatusKind::Paused,
        })
    }

    fn start(&self, name: &str) -> Result<(), PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::START)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;
        service
            .start::<&str>(&[])
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("start failed: {e}")))
    }

    fn stop(&self, name: &str) -> Result<(), PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::STOP)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;
        service
            .stop()
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("stop failed: {e}")))?;
        Ok(())
    }

    fn get_startup_type(&self, name: &str) -> Result<StartupTypeKind, PlatformError> {
        let manager = Self::manager(ServiceManagerAccess::CONNECT)?;
        let service = manager
            .open_service(name, ServiceAccess::QUERY_CONFIG)
            .map_err(|e| PlatformError::new(ErrorKind::NotFound, format!("open_service failed: {e}")))?;
        let config = service
            .query_config()
            .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("query_config failed: {e}")))?;
        Ok(match config.start_type {
            ServiceStartType::AutoStart => StartupTypeKind::Automatic,
            ServiceStartType::OnDemand => StartupTypeKind::Manual,
            ServiceStartType::Disabled => StartupTypeKind::Disabled,
            _ => StartupTypeKind::Manual,
        })
    }

    fn wait_for_status(
        &self,
        name: &str,
        target: ServiceStatusKind,
        timeout: Duration,
        cancel: &crate::host::ShutdownToken,
    ) -> Result<(), PlatformError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.query_status(name)? == target {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(PlatformError::new(ErrorKind::Timeout, "wait_for_status timed out"));
            }
            if cancel.wait(Duration::from_millis(250)) {
                return Err(PlatformError::new(ErrorKind::Cancelled, "wait_for_status cancelled"));
            }
        }
    }
}

/// A RAII job object handle; closing it (including on `Drop`) terminates
/// any surviving member processes via
/// `JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE`.
pub struct WindowsJobHandle {
    handle: HANDLE,
}

unsafe impl Send for WindowsJobHandle {}
unsafe impl Sync for WindowsJobHandle {}

impl JobHandle for WindowsJobHandle {
    fn close(&self) -> Result<(), PlatformError> {
        unsafe {
            CloseHandle(self.handle)
                .map_err(|e| map_windows_error("closing job object", e))
        }
    }
}

impl Drop for WindowsJobHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// A handle to a spawned child process.
pub struct WindowsChildHandle {
    process: HANDLE,
    pid: u32,
    has_console: bool,
    stdout_read: Option<HANDLE>,
    stderr_read: Option<HANDLE>,
}

unsafe impl Send for WindowsChildHandle {}

impl ChildHandle for WindowsChildHandle {
    fn try_exit_code(&mut self) -> Result<Option<i32>, PlatformError> {
        let mut code: u32 = 0;
        unsafe {
            GetExitCodeProcess(self.process, &mut code)
                .map_err(|e| map_windows_error("GetExitCodeProcess", e))?;
        }
        const STILL_ACTIVE: u32 = 259;
        if code == STILL_ACTIVE {
            Ok(None)
        } else {
            Ok(Some(code as i32))
        }
    }

    fn wait_timeout(&mut self, timeout: Duration) -> Result<Option<i32>, PlatformError> {
        let millis = timeout.as_millis().min(u128::from(u32::MAX)) as u32;
        let result = unsafe { WaitForSingleObject(self.process, millis) };
        if result.0 == 0 {
            self.try_exit_code()
        } else {
            Ok(None)
        }
    }

    fn request_graceful_stop(&mut self) -> Result<(), PlatformError> {
        if self.has_console {
            unsafe {
                GenerateConsoleCtrlEvent(0 /* CTRL_C_EVENT */, self.pid)
                    .map_err(|e| map_windows_error("GenerateConsoleCtrlEvent", e))?;
            }
            Ok(())
        } else {
            self.kill()
        }
    }

    fn kill(&mut self) -> Result<(), PlatformError> {
        unsafe {
            TerminateProcess(self.process, 1)
                .map_err(|e| map_windows_error("TerminateProcess", e))
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn take_stdout(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        self.stdout_read.take().map(handle_to_reader)
    }

    fn take_stderr(&mut self) -> Option<Box<dyn std::io::Read + Send>> {
        self.stderr_read.take().map(handle_to_reader)
    }
}

impl Drop for WindowsChildHandle {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.process);
            if let Some(handle) = self.stdout_read.take() {
                let _ = CloseHandle(handle);
            }
            if let Some(handle) = self.stderr_read.take() {
                let _ = CloseHandle(handle);
            }
        }
    }
}

/// Wraps a pipe read-end handle as an owned `Read` stream. The returned
/// `File` takes ownership of the handle and closes it on drop, so callers
/// must not also `CloseHandle` it afterward.
fn handle_to_reader(handle: HANDLE) -> Box<dyn std::io::Read + Send> {
    use std::os::windows::io::{FromRawHandle, RawHandle};
    let file = unsafe { std::fs::File::from_raw_handle(handle.0 as RawHandle) };
    Box::new(file)
}

/// Process supervision via job objects + `CreateProcessW`.
pub struct WindowsProcessSpawner;

impl ProcessSpawner for WindowsProcessSpawner {
    fn create_job(&self) -> Result<Box<dyn JobHandle>, PlatformError> {
        let handle = unsafe { CreateJobObjectW(None, None) }
            .map_err(|e| map_windows_error("CreateJobObjectW", e))?;

        let mut info = JOBOBJECT_EXTENDED_LIMIT_INFORMATION::default();
        info.BasicLimitInformation.LimitFlags = JOB_OBJECT_LIMIT_KILL_ON_JOB_CLOSE;

        unsafe {
            SetInformationJobObject(
                handle,
                JobObjectExtendedLimitInformation,
                &info as *const _ as *const _,
                std::mem::size_of_val(&info) as u32,
            )
            .map_err(|e| map_windows_error("SetInformationJobObject", e))?;
        }

        Ok(Box::new(WindowsJobHandle { handle }))
    }

    fn spawn_in_job(
        &self,
        job: &dyn JobHandle,
        executable_path: &Path,
        arguments: &str,
        working_directory: &Path,
        environment: &HashMap<String, String>,
        priority: Priority,
        stdio: StdioRedirection,
    ) -> Result<Box<dyn ChildHandle>, PlatformError> {
        let job = job
            .as_any_job_handle()
            .ok_or_else(|| PlatformError::new(ErrorKind::OsFailure, "not a Windows job handle"))?;

        let mut command_line = wide(&format!(
            "\"{}\" {}",
            executable_path.display(),
            arguments
        ));
        let cwd = wide(&working_directory.display().to_string());
        let env_block = build_environment_block(environment);

        let priority_flags = match priority {
            Priority::Idle => IDLE_PRIORITY_CLASS,
            Priority::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
            Priority::Normal => NORMAL_PRIORITY_CLASS,
            Priority::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
            Priority::High => HIGH_PRIORITY_CLASS,
            Priority::RealTime => REALTIME_PRIORITY_CLASS,
        };

        let stdout_pipe = stdio
            .stdout_path
            .is_some()
            .then(create_stdio_pipe)
            .transpose()?;
        let stderr_pipe = stdio
            .stderr_path
            .is_some()
            .then(create_stdio_pipe)
            .transpose()?;

        let mut startup_info = STARTUPINFOW::default();
        startup_info.cb = std::mem::size_of::<STARTUPINFOW>() as u32;
        let mut inherit_handles = false;
        if stdout_pipe.is_some() || stderr_pipe.is_some() {
            inherit_handles = true;
            startup_info.dwFlags |= windows::Win32::System::Threading::STARTF_USESTDHANDLES;
            startup_info.hStdInput =
                unsafe { GetStdHandle(STD_INPUT_HANDLE) }.unwrap_or_default();
            startup_info.hStdOutput = match &stdout_pipe {
                Some((_, write)) => *write,
                None => unsafe { GetStdHandle(STD_OUTPUT_HANDLE) }.unwrap_or_default(),
            };
            startup_info.hStdError = match &stderr_pipe {
                Some((_, write)) => *write,
                None => unsafe { GetStdHandle(STD_ERROR_HANDLE) }.unwrap_or_default(),
            };
        }
        let mut process_information = PROCESS_INFORMATION::default();

        let create_result = unsafe {
            CreateProcessW(
                PCWSTR::null(),
                windows::core::PWSTR(command_line.as_mut_ptr()),
                None,
                None,
                inherit_handles,
                priority_flags | CREATE_NO_WINDOW | CREATE_UNICODE_ENVIRONMENT,
                Some(env_block.as_ptr() as *const _),
                PCWSTR(cwd.as_ptr()),
                &startup_info,
                &mut process_information,
            )
            .map_err(|e| map_windows_error("CreateProcessW", e))
        };

        // The parent's copy of each pipe write-end must close regardless of
        // whether CreateProcessW succeeded, or a failed spawn leaks handles
        // and a successful one leaves the read-end waiting on EOF forever.
        if let Some((_, write)) = stdout_pipe {
            unsafe { let _ = CloseHandle(write); }
        }
        if let Some((_, write)) = stderr_pipe {
            unsafe { let _ = CloseHandle(write); }
        }
        create_result?;

        unsafe {
            AssignProcessToJobObject(job, process_information.hProcess)
                .map_err(|e| map_windows_error("AssignProcessToJobObject", e))?;
        }

        Ok(Box::new(WindowsChildHandle {
            process: process_information.hProcess,
            pid: process_information.dwProcessId,
            has_console: false,
            stdout_read: pipe_read_handle(stdout_pipe),
            stderr_read: pipe_read_handle(stderr_pipe),
        }))
    }
}

fn pipe_read_handle(pipe: Option<(HANDLE, HANDLE)>) -> Option<HANDLE> {
    pipe.map(|(read, _)| read)
}

/// Creates an anonymous pipe whose write-end is inheritable (for the
/// child's stdout/stderr handle) and whose read-end is not, so the parent
/// keeps exclusive ownership of the half it reads from.
fn create_stdio_pipe() -> Result<(HANDLE, HANDLE), PlatformError> {
    let mut read_handle = HANDLE::default();
    let mut write_handle = HANDLE::default();
    let security_attributes = SECURITY_ATTRIBUTES {
        nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
        lpSecurityDescriptor: std::ptr::null_mut(),
        bInheritHandle: true.into(),
    };
    unsafe {
        CreatePipe(&mut read_handle, &mut write_handle, Some(&security_attributes), 0)
            .map_err(|e| map_windows_error("CreatePipe", e))?;
        SetHandleInformation(read_handle, HANDLE_FLAG_INHERIT.0, HANDLE_FLAGS(0))
            .map_err(|e| map_windows_error("SetHandleInformation", e))?;
    }
    Ok((read_handle, write_handle))
}

fn build_environment_block(environment: &HashMap<String, String>) -> Vec<u16> {
    let mut keys: Vec<&String> = environment.keys().collect();
    keys.sort();
    let mut block = Vec::new();
    for key in keys {
        let value = &environment[key];
        block.extend(wide(&format!("{key}={value}")));
    }
    block.push(0);
    block
}

/// Extension used internally to downcast a `dyn JobHandle` back to its
/// concrete Windows handle for `AssignProcessToJobObject`.
trait AsAnyJobHandle {
    fn as_any_job_handle(&self) -> Option<HANDLE>;
}

impl AsAnyJobHandle for dyn JobHandle {
    fn as_any_job_handle(&self) -> Option<HANDLE> {
        // SAFETY: the only `JobHandle` implementation on Windows builds
        // is `WindowsJobHandle`; this module never receives the fake.
        let ptr = self as *const dyn JobHandle as *const WindowsJobHandle;
        Some(unsafe { (*ptr).handle })
    }
}

/// `LogonUserW`-based credential validation.
pub struct WindowsCredentialValidator;

impl CredentialValidator for WindowsCredentialValidator {
    fn validate(&self, user: &str, password: &str) -> Result<(), PlatformError> {
        let user_wide = wide(user);
        let password_wide = wide(password);
        let mut token = HANDLE::default();
        unsafe {
            LogonUserW(
                PCWSTR(user_wide.as_ptr()),
                PCWSTR::null(),
                PCWSTR(password_wide.as_ptr()),
                LOGON32_LOGON_SERVICE,
                LOGON32_PROVIDER_DEFAULT,
                &mut token,
            )
            .map_err(|e| {
                PlatformError::new(
                    ErrorKind::CredentialInvalid,
                    format!("LogonUserW failed: {e}"),
                )
            })?;
            let _ = CloseHandle(token);
        }
        Ok(())
    }
}

/// DPAPI-based secret store, bound to the local machine.
pub struct WindowsSecretStore;

impl SecretStore for WindowsSecretStore {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, PlatformError> {
        let mut input = CRYPTOAPI_BLOB {
            cbData: plaintext.len() as u32,
            pbData: plaintext.as_ptr() as *mut u8,
        };
        let mut output = CRYPTOAPI_BLOB::default();
        unsafe {
            CryptProtectData(
                &mut input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_LOCAL_MACHINE,
                &mut output,
            )
            .map_err(|e| PlatformError::new(ErrorKind::CryptoFailure, format!("CryptProtectData failed: {e}")))?;
        }
        let sealed =
            unsafe { std::slice::from_raw_parts(output.pbData, output.cbData as usize) }.to_vec();
        Ok(sealed)
    }

    fn unseal(&self, sealed: &[u8]) -> Result<Vec<u8>, PlatformError> {
        let mut input = CRYPTOAPI_BLOB {
            cbData: sealed.len() as u32,
            pbData: sealed.as_ptr() as *mut u8,
        };
        let mut output = CRYPTOAPI_BLOB::default();
        unsafe {
            CryptUnprotectData(
                &mut input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_LOCAL_MACHINE,
                &mut output,
            )
            .map_err(|e| PlatformError::new(ErrorKind::CryptoFailure, format!("CryptUnprotectData failed: {e}")))?;
        }
        let unsealed =
            unsafe { std::slice::from_raw_parts(output.pbData, output.cbData as usize) }.to_vec();
        Ok(unsealed)
    }
}

/// Windows Event Log sink, registering the source under
/// `HKLM\SYSTEM\CurrentControlSet\Services\EventLog\Application\Servy`
/// on first use via `winreg` if the key is absent.
pub struct WindowsEventSink {
    handle: HANDLE,
}

unsafe impl Send for WindowsEventSink {}
unsafe impl Sync for WindowsEventSink {}

impl WindowsEventSink {
    pub fn register() -> Result<Self, PlatformError> {
        ensure_event_source_registered()?;
        let name = wide(EVENT_SOURCE_NAME);
        let handle = unsafe { RegisterEventSourceW(PCWSTR::null(), PCWSTR(name.as_ptr())) }
            .map_err(|e| map_windows_error("RegisterEventSourceW", e))?;
        Ok(Self { handle })
    }
}

impl Drop for WindowsEventSink {
    fn drop(&mut self) {
        unsafe {
            let _ = DeregisterEventSource(self.handle);
        }
    }
}

impl EventSink for WindowsEventSink {
    fn report(&self, severity: EventSeverity, service_name: Option<&str>, message: &str) {
        let formatted = match service_name {
            Some(name) => format!("[{name}] {message}"),
            None => message.to_string(),
        };
        let event_type = match severity {
            EventSeverity::Info => EVENTLOG_INFORMATION_TYPE,
            EventSeverity::Warning => EVENTLOG_WARNING_TYPE,
            EventSeverity::Error => EVENTLOG_ERROR_TYPE,
        };
        let wide_message = wide(&formatted);
        let strings = [PCWSTR(wide_message.as_ptr())];
        unsafe {
            let _ = ReportEventW(
                self.handle,
                event_type,
                0,
                0,
                None,
                0,
                Some(&strings),
                None,
            );
        }
    }
}

fn ensure_event_source_registered() -> Result<(), PlatformError> {
    use winreg::enums::*;
    use winreg::RegKey;

    let hklm = RegKey::predef(HKEY_LOCAL_MACHINE);
    let path = format!(
        "SYSTEM\\CurrentControlSet\\Services\\EventLog\\Application\\{EVENT_SOURCE_NAME}"
    );

    if hklm.open_subkey(&path).is_ok() {
        return Ok(());
    }

    let (key, _) = hklm
        .create_subkey(&path)
        .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("registering event source failed: {e}")))?;
    key.set_value("TypesSupported", &0x7u32)
        .map_err(|e| PlatformError::new(ErrorKind::OsFailure, format!("registering event source failed: {e}")))?;
    Ok(())
}

/// Launches `servy-restarter.exe` from alongside the running host
/// executable, detached, and does not wait for it — the helper must
/// outlive this process (spec §4.F.4: "launch ... and exit").
pub struct WindowsRestarterLauncher;

impl RestarterLauncher for WindowsRestarterLauncher {
    fn launch(&self, service_name: &str) -> Result<(), PlatformError> {
        let current = std::env::current_exe().map_err(|e| {
            PlatformError::new(
                ErrorKind::OsFailure,
                format!("resolving current executable path failed: {e}"),
            )
        })?;
        let restarter_path = current
            .parent()
            .map(|dir| dir.join("servy-restarter.exe"))
            .ok_or_else(|| {
                PlatformError::new(
                    ErrorKind::OsFailure,
                    "could not resolve restarter executable directory",
                )
            })?;

        std::process::Command::new(&restarter_path)
            .arg(service_name)
            .spawn()
            .map(|_child| ())
            .map_err(|e| {
                PlatformError::new(
                    ErrorKind::OsFailure,
                    format!("spawning {} failed: {e}", restarter_path.display()),
                )
            })
    }
}

/// Requests an immediate OS reboot via `InitiateSystemShutdownExW`, first
/// enabling `SeShutdownPrivilege` on the current process token (required
/// even for a local shutdown request).
pub struct WindowsRebootRequester;

impl RebootRequester for WindowsRebootRequester {
    fn request_reboot(&self) -> Result<(), PlatformError> {
        enable_shutdown_privilege()?;
        unsafe {
            InitiateSystemShutdownExW(
                PCWSTR::null(),
                PCWSTR::null(),
                0,
                false,
                true,
                SHTDN_REASON_MAJOR_APPLICATION
                    | SHTDN_REASON_MINOR_ENVIRONMENT
                    | SHTDN_REASON_FLAG_PLANNED,
            )
            .map_err(|e| map_windows_error("InitiateSystemShutdownExW", e))
        }
    }
}

fn enable_shutdown_privilege() -> Result<(), PlatformError> {
    unsafe {
        let mut token = HANDLE::default();
        OpenProcessToken(
            GetCurrentProcess(),
            TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY,
            &mut token,
        )
        .map_err(|e| map_windows_error("OpenProcessToken", e))?;

        let privilege_name = wide("SeShutdownPrivilege");
        let mut luid = Default::default();
        let lookup_result = LookupPrivilegeValueW(PCWSTR::null(), PCWSTR(privilege_name.as_ptr()), &mut luid);
        if let Err(e) = lookup_result {
            let _ = CloseHandle(token);
            return Err(map_windows_error("LookupPrivilegeValueW", e));
        }

        let privileges = TOKEN_PRIVILEGES {
            PrivilegeCount: 1,
            Privileges: [LUID_AND_ATTRIBUTES {
                Luid: luid,
                Attributes: SE_PRIVILEGE_ENABLED,
            }],
        };

        let adjust_result = AdjustTokenPrivileges(token, false, Some(&privileges), 0, None, None);
        let _ = CloseHandle(token);
        adjust_result.map_err(|e| map_windows_error("AdjustTokenPrivileges", e))
    }
}
