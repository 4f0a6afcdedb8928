mod common;

use clap::Parser;

use servy::cli::HostArgs;
use servy::config::{Priority, ServiceDefinition};
use servy::host::StartOptions;
use servy::manager::ServiceManager;
use servy::platform::fake::{FakeCredentialValidator, FakeServiceControl};

use common::test_engine;

/// Splits a command line the way a shell would, respecting double-quoted
/// segments — just enough to invert `encode_start_options`'s quoting for
/// this test, without depending on a shell-parsing crate.
fn split_shell_like(command: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = command.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            ' ' if !in_quotes => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn definition(name: &str, exe: &std::path::Path) -> ServiceDefinition {
    ServiceDefinition {
        name: name.to_string(),
        executable_path: exe.display().to_string(),
        run_as_local_system: true,
        priority: Priority::AboveNormal,
        parameters: "--flag value".into(),
        enable_health_monitoring: true,
        heartbeat_interval_seconds: 10,
        max_failed_checks: 2,
        ..Default::default()
    }
}

#[test]
fn image_path_built_by_install_round_trips_back_through_host_args() {
    let dir = tempfile::tempdir().unwrap();
    let exe = dir.path().join("app.exe");
    std::fs::write(&exe, b"").unwrap();

    let store = servy::store::DefinitionStore::open(dir.path().join("services.json"), test_engine()).unwrap();
    let manager = ServiceManager::new(
        Box::new(FakeServiceControl::default()),
        store,
        Box::new(FakeCredentialValidator::default()),
        "C:\\servy\\servy-host.exe",
    );

    let def = definition("svc1", &exe);
    let expected_options = StartOptions::from_definition(&def);
    manager.install(def).unwrap();

    // Recover the image path the fake SCM recorded by re-deriving it from
    // the freshly re-read store entry, exactly as the façade would.
    let stored = manager.store().get_by_name("svc1").unwrap();
    let rebuilt_options = StartOptions::from_definition(&stored);
    assert_eq!(rebuilt_options.name, expected_options.name);

    let encoded = servy::cli::encode_start_options(&rebuilt_options);
    let mut argv = vec!["servy-host".to_string()];
    argv.extend(split_shell_like(&encoded));

    let parsed = HostArgs::try_parse_from(&argv).unwrap();
    let decoded_options = parsed.into_start_options().unwrap();

    assert_eq!(decoded_options.name, "svc1");
    assert_eq!(decoded_options.priority, Priority::AboveNormal);
    assert_eq!(decoded_options.args, "--flag value");
    assert_eq!(decoded_options.heartbeat_seconds, 10);
    assert_eq!(decoded_options.max_failed, 2);
}

#[test]
fn quoted_values_with_embedded_spaces_survive_the_round_trip() {
    let options = StartOptions {
        name: "svc".into(),
        exe: "C:\\Program Files\\svc\\app.exe".into(),
        args: String::new(),
        cwd: "C:\\Program Files\\svc".into(),
        priority: Priority::Normal,
        stdout: None,
        stderr: None,
        rotate_bytes: 0,
        env: String::new(),
        heartbeat_seconds: 30,
        max_failed: 3,
        max_restarts: 0,
        recovery: servy::config::RecoveryAction::None,
        pre_exe: None,
        pre_args: String::new(),
        pre_cwd: String::new(),
        pre_env: String::new(),
        pre_stdout: None,
        pre_stderr: None,
        pre_timeout_seconds: 30,
        pre_retries: 0,
        pre_ignore_failure: false,
    };

    let encoded = servy::cli::encode_start_options(&options);
    let mut argv = vec!["servy-host".to_string()];
    argv.extend(split_shell_like(&encoded));

    let parsed = HostArgs::try_parse_from(&argv).unwrap();
    let decoded = parsed.into_start_options().unwrap();

    assert_eq!(decoded.exe, "C:\\Program Files\\svc\\app.exe");
    assert_eq!(decoded.cwd, "C:\\Program Files\\svc");
}
