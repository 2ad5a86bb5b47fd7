mod common;

use assert_cmd::Command;
use predicates::prelude::*;

fn appforge(config_home: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("appforge").expect("binary builds");
    cmd.env("XDG_CONFIG_HOME", config_home)
        .env_remove("APPFORGE_GIT_USERNAME")
        .env_remove("APPFORGE_GIT_TOKEN");
    cmd
}

#[test]
fn render_prints_unit_and_site() {
    let dir = tempfile::tempdir().expect("tempdir");
    let answers = dir.path().join("answers.json");
    std::fs::write(&answers, common::demo_answers("node")).expect("write answers");

    appforge(dir.path())
        .args(["render", "--answers"])
        .arg(&answers)
        .assert()
        .success()
        .stdout(predicate::str::contains("# /etc/systemd/system/demoapp.service"))
        .stdout(predicate::str::contains("CPUQuota=50%"))
        .stdout(predicate::str::contains("# /etc/nginx/sites-available/demoapp"))
        .stdout(predicate::str::contains("proxy_pass http://127.0.0.1:8080;"));
}

#[test]
fn render_rejects_privileged_port() {
    let dir = tempfile::tempdir().expect("tempdir");
    let answers = dir.path().join("answers.json");
    let raw = common::demo_answers("fastapi").replace("8080", "80");
    std::fs::write(&answers, raw).expect("write answers");

    appforge(dir.path())
        .args(["render", "--answers"])
        .arg(&answers)
        .assert()
        .failure()
        .stderr(predicate::str::contains("port must be between 1024 and 65535"));
}

#[test]
fn render_reports_missing_answers_file() {
    let dir = tempfile::tempdir().expect("tempdir");

    appforge(dir.path())
        .args(["render", "--answers"])
        .arg(dir.path().join("missing.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to read answers file"));
}

#[test]
fn help_lists_every_command() {
    let dir = tempfile::tempdir().expect("tempdir");

    appforge(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("install")
                .and(predicate::str::contains("uninstall"))
                .and(predicate::str::contains("rollback"))
                .and(predicate::str::contains("render"))
                .and(predicate::str::contains("status")),
        );
}

#[test]
fn invalid_mode_is_rejected_by_the_parser() {
    let dir = tempfile::tempdir().expect("tempdir");

    appforge(dir.path())
        .args(["install", "--mode", "turbo"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("turbo"));
}
