mod common;

use std::path::Path;

use appforge::{
    deploy,
    errors::{DeployError, PreflightError},
    host::{FakeHost, Host, HostContext, Timeouts},
    ledger::{ResourceKind, ResourceLog},
    lifecycle::UnitState,
    model::{CodeName, Credentials, Runtime, Secret},
    provision::Provisioner,
    teardown,
};
use common::demo_config;

fn quick() -> Timeouts {
    Timeouts {
        verify_attempts: 3,
        ..Timeouts::default()
    }
}

fn assert_nothing_left(host: &FakeHost) {
    let state = host.state();
    assert!(state.users.is_empty(), "users left: {:?}", state.users);
    assert!(!host.exists(Path::new("/var/www/demoapp")));
    assert!(!host.exists(Path::new("/var/log/demoapp")));
    assert!(host.file("/etc/systemd/system/demoapp.service").is_none());
    assert!(host.file("/etc/nginx/sites-available/demoapp").is_none());
    assert!(state.symlinks.is_empty());
    assert!(state.enabled_units.is_empty());
    assert!(state.active_units.is_empty());
    assert!(!state.listening.contains(&8080));
}

#[test]
fn node_install_reaches_verified_for_both_units() {
    let host = FakeHost::new();
    let config = demo_config(Runtime::Node);
    let mut log = ResourceLog::in_memory();

    let report = deploy::install(HostContext::new(&host, quick()), &config, &mut log)
        .expect("install succeeds");

    assert_eq!(report.service, UnitState::Verified);
    assert_eq!(report.site, UnitState::Verified);
    let kinds: Vec<_> = report.resources.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            ResourceKind::UserCreated,
            ResourceKind::DirectoryCreated,
            ResourceKind::RepositoryCloned,
            ResourceKind::DependenciesInstalled,
            ResourceKind::LogDirectoryCreated,
            ResourceKind::UnitFileWritten,
            ResourceKind::UnitEnabled,
            ResourceKind::UnitStarted,
            ResourceKind::SiteWritten,
            ResourceKind::SiteEnabled,
            ResourceKind::ProxyReloaded,
        ]
    );

    let unit = host
        .file("/etc/systemd/system/demoapp.service")
        .expect("unit written");
    assert!(unit.contains("Nice=0\n"));
    assert!(unit.contains("CPUQuota=50%\n"));
    assert!(unit.contains("MemoryMax=1G\n"));
    assert!(unit.contains("HOST=127.0.0.1 PORT=8080"));

    let state = host.state();
    assert!(state.listening.contains(&8080));
    assert_eq!(state.proxy_reloads, 1);
    assert_eq!(
        state.owners.get(Path::new("/var/www/demoapp")).map(String::as_str),
        Some("demoapp")
    );
    assert_eq!(
        state.symlinks.get(Path::new("/etc/nginx/sites-enabled/demoapp")),
        Some(&Path::new("/etc/nginx/sites-available/demoapp").to_path_buf())
    );
}

#[test]
fn nginx_is_tested_before_every_reload_and_never_restarted() {
    let host = FakeHost::new();
    let config = demo_config(Runtime::Node);

    deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect("install succeeds");

    let commands = host.commands();
    let reload = commands
        .iter()
        .position(|c| c == "systemctl reload nginx")
        .expect("nginx reloaded");
    assert_eq!(commands[reload - 1], "nginx -t");
    assert!(commands.iter().all(|c| !c.contains("restart nginx")));
}

#[test]
fn fastapi_install_uses_a_virtualenv_and_stamps_the_checkout() {
    let host = FakeHost::new();
    let config = demo_config(Runtime::Fastapi);

    let report = deploy::install(
        HostContext::new(&host, quick()),
        &config,
        &mut ResourceLog::in_memory(),
    )
    .expect("install succeeds");

    assert_eq!(report.service, UnitState::Verified);
    let commands = host.commands();
    assert!(commands
        .iter()
        .any(|c| c == "[demoapp] python3 -m venv /var/www/demoapp/venv (env: HOME)"));
    assert!(commands.iter().any(|c| c.contains("pip install --no-input -r requirements.txt")));
    assert!(commands
        .iter()
        .any(|c| c.contains("uvicorn[standard] uvloop httptools")));
    let marker = host
        .file("/var/www/demoapp/app/.appforge.json")
        .expect("version marker");
    assert!(marker.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn occupied_port_aborts_before_any_resource_exists() {
    let host = FakeHost::new().with_listening(8080);
    let config = demo_config(Runtime::Node);
    let mut log = ResourceLog::in_memory();

    let failure = deploy::install(HostContext::new(&host, quick()), &config, &mut log)
        .expect_err("port is taken");

    assert!(matches!(
        failure.error,
        DeployError::Preflight(PreflightError::PortInUse(8080))
    ));
    assert!(failure.teardown.is_none());
    assert!(log.is_empty());
    assert!(host.commands().is_empty());
    assert!(host.state().users.is_empty());
}

#[test]
fn failed_unit_write_rolls_back_checkout_and_user() {
    let host = FakeHost::new().fail_writes_under("/etc/systemd/system");
    let config = demo_config(Runtime::Node);
    let mut log = ResourceLog::in_memory();

    let failure = deploy::install(HostContext::new(&host, quick()), &config, &mut log)
        .expect_err("disk is full");

    match &failure.error {
        DeployError::Lifecycle { reached, source, .. } => {
            assert_eq!(*reached, UnitState::Absent);
            assert!(matches!(**source, DeployError::Io { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    let report = failure.teardown.expect("teardown ran");
    assert!(report.is_clean(), "warnings: {:?}", report.warnings);
    assert!(log.is_empty());
    assert_nothing_left(&host);
    assert!(host.commands().iter().any(|c| c == "userdel demoapp"));
}

#[test]
fn uninstall_of_a_full_install_leaves_nothing() {
    let host = FakeHost::new();
    let config = demo_config(Runtime::Node);
    deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect("install succeeds");
    let journal = tempfile::tempdir().expect("tempdir");

    let report = teardown::uninstall(
        &host,
        &config.code_name,
        &journal.path().join("demoapp.journal.json"),
    )
    .expect("uninstall");

    assert!(report.is_clean(), "warnings: {:?}", report.warnings);
    assert_nothing_left(&host);
    let commands = host.commands();
    let stop = commands
        .iter()
        .position(|c| c == "systemctl stop demoapp.service")
        .expect("stopped");
    let userdel = commands
        .iter()
        .position(|c| c == "userdel demoapp")
        .expect("user removed");
    assert!(stop < userdel);
}

#[test]
fn teardown_after_install_restores_the_host() {
    let host = FakeHost::new();
    let config = demo_config(Runtime::Node);
    let mut log = ResourceLog::in_memory();
    deploy::install(HostContext::new(&host, quick()), &config, &mut log).expect("install succeeds");

    let report = teardown::teardown(&host, &mut log);

    assert_eq!(report.undone.len(), 11);
    assert_eq!(report.undone[0].kind, ResourceKind::ProxyReloaded);
    assert_eq!(report.undone[10].kind, ResourceKind::UserCreated);
    assert!(report.is_clean());
    assert_nothing_left(&host);
}

#[test]
fn existing_user_with_matching_home_is_reused_without_entries() {
    let host = FakeHost::new().with_user("demoapp", "/var/www/demoapp");
    let config = demo_config(Runtime::Node);
    let provisioner = Provisioner::new(HostContext::new(&host, quick()), &config);
    let mut log = ResourceLog::in_memory();

    provisioner.create_app_user(&mut log).expect("first call");
    provisioner.create_app_user(&mut log).expect("second call");

    assert!(log.is_empty());
    assert!(host.commands().iter().all(|c| !c.starts_with("useradd")));
}

#[test]
fn existing_user_with_foreign_home_is_a_conflict() {
    let host = FakeHost::new().with_user("demoapp", "/home/demoapp");
    let config = demo_config(Runtime::Node);
    let provisioner = Provisioner::new(HostContext::new(&host, quick()), &config);

    let err = provisioner
        .create_app_user(&mut ResourceLog::in_memory())
        .expect_err("home differs");

    assert!(matches!(err, DeployError::UserExistsConflict { ref user, .. } if user == "demoapp"));
}

#[test]
fn clone_failure_removes_the_user_again() {
    let host = FakeHost::new().fail_command("clone https://");
    let config = demo_config(Runtime::Node);

    let failure = deploy::install(
        HostContext::new(&host, quick()),
        &config,
        &mut ResourceLog::in_memory(),
    )
    .expect_err("clone fails");

    assert!(matches!(failure.error, DeployError::Clone { status: 1, .. }));
    assert_nothing_left(&host);
}

#[test]
fn private_repository_token_never_appears_in_commands() {
    let host = FakeHost::new();
    let mut config = demo_config(Runtime::Node);
    config.credentials = Some(Credentials {
        username: "octo".into(),
        token: Secret::new("ghp_do_not_print"),
    });

    deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect("install succeeds");

    let commands = host.commands();
    assert!(commands.iter().all(|c| !c.contains("ghp_do_not_print")));
    let clone = commands
        .iter()
        .find(|c| c.contains(" clone "))
        .expect("clone ran");
    assert!(clone.contains("APPFORGE_GIT_TOKEN"));
    assert!(clone.contains("https://github.com/acme/demoapp.git"));
}

#[test]
fn remaining_vulnerabilities_escalate_to_forced_fix() {
    let host = FakeHost::new().with_audit_vulnerabilities(3);
    let config = demo_config(Runtime::Node);

    deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect("install succeeds");

    assert!(host
        .commands()
        .iter()
        .any(|c| c.contains("npm audit fix --force")));
    assert_eq!(host.state().audit_vulnerabilities, 0);
}

#[test]
fn clean_audit_does_not_force() {
    let host = FakeHost::new();
    let config = demo_config(Runtime::Node);

    deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect("install succeeds");

    assert!(host.commands().iter().all(|c| !c.contains("--force")));
}

#[test]
fn missing_manifest_initialises_one() {
    let host = FakeHost::new().with_repository_files(&["index.js"]);
    let config = demo_config(Runtime::Node);

    deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect("install succeeds");

    assert!(host.commands().iter().any(|c| c.contains("npm init -y")));
}

#[test]
fn failed_start_stops_the_unit_and_tears_down() {
    let host = FakeHost::new().fail_command("systemctl start");
    let config = demo_config(Runtime::Node);

    let failure = deploy::install(HostContext::new(&host, quick()), &config, &mut ResourceLog::in_memory())
        .expect_err("start fails");

    match failure.error {
        DeployError::Lifecycle { reached, .. } => assert_eq!(reached, UnitState::Enabled),
        other => panic!("unexpected error: {other}"),
    }
    assert!(host
        .commands()
        .iter()
        .any(|c| c == "systemctl stop demoapp.service"));
    assert!(host.file("/etc/systemd/system/demoapp.service").is_none());
    assert!(host.state().users.is_empty());
}

#[test]
fn interrupt_between_steps_tears_down_what_exists() {
    // preflight runs nine commands, then useradd and git clone
    let host = FakeHost::new().interrupt_after(11);
    let config = demo_config(Runtime::Node);

    let failure = deploy::install(
        HostContext::new(&host, quick()),
        &config,
        &mut ResourceLog::in_memory(),
    )
    .expect_err("interrupted");

    assert!(matches!(failure.error, DeployError::Interrupted));
    let report = failure.teardown.expect("teardown ran");
    let kinds: Vec<_> = report.undone.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [
            ResourceKind::RepositoryCloned,
            ResourceKind::DirectoryCreated,
            ResourceKind::UserCreated
        ]
    );
    assert_nothing_left(&host);
}

#[test]
fn journal_is_drained_by_teardown_and_removed_on_success() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = dir.path().join("demoapp.journal.json");
    let config = demo_config(Runtime::Node);

    let failing = FakeHost::new().fail_writes_under("/etc/nginx");
    let mut log = ResourceLog::with_journal(&journal);
    deploy::install(HostContext::new(&failing, quick()), &config, &mut log)
        .expect_err("site write fails");
    assert!(!journal.exists());

    let healthy = FakeHost::new();
    let mut log = ResourceLog::with_journal(&journal);
    deploy::install(HostContext::new(&healthy, quick()), &config, &mut log)
        .expect("install succeeds");
    assert!(!journal.exists());
    assert_eq!(log.len(), 11);
}

#[test]
fn rollback_replays_a_crashed_run_from_its_journal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let journal = dir.path().join("demoapp.journal.json");
    let host = FakeHost::new()
        .with_user("demoapp", "/var/www/demoapp")
        .with_file("/var/www/demoapp/app/package.json", "{}");
    {
        let mut log = ResourceLog::with_journal(&journal);
        log.record(ResourceKind::UserCreated, "demoapp").unwrap();
        log.record(ResourceKind::DirectoryCreated, "/var/www/demoapp").unwrap();
        log.record(ResourceKind::RepositoryCloned, "/var/www/demoapp/app").unwrap();
    }
    assert!(journal.exists());

    let report = teardown::rollback(&host, &journal).expect("rollback");

    assert_eq!(report.undone.len(), 3);
    assert!(report.is_clean());
    assert!(!journal.exists());
    assert_nothing_left(&host);
}

#[test]
fn uninstall_of_unknown_application_changes_nothing() {
    let host = FakeHost::new();
    let dir = tempfile::tempdir().expect("tempdir");
    let code = CodeName::try_from("ghost").unwrap();

    let err = teardown::uninstall(&host, &code, &dir.path().join("ghost.journal.json"))
        .expect_err("nothing to remove");

    assert!(matches!(err, DeployError::UnknownApplication(_)));
    assert!(host.commands().is_empty());
}
