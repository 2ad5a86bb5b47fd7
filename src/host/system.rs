//! [`Host`] implementation backed by the local machine.

use std::{
    collections::BTreeSet,
    fs,
    io::Read,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use nix::unistd::{fchownat, FchownatFlags, User};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

use super::{CommandOutput, Host, Invocation};
use crate::{
    errors::{DeployError, Result},
    interrupt, util,
};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const SOCKET_TABLES: [&str; 2] = ["/proc/net/tcp", "/proc/net/tcp6"];

pub struct SystemHost {
    default_timeout: Duration,
}

impl SystemHost {
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }

    fn build_command(invocation: &Invocation) -> Command {
        let mut cmd = match &invocation.run_as {
            Some(user) => {
                let mut cmd = Command::new("runuser");
                cmd.args(["-u", user.as_str(), "--", invocation.program.as_str()]);
                cmd
            }
            None => Command::new(&invocation.program),
        };
        cmd.args(&invocation.args);
        for (key, value) in &invocation.env {
            cmd.env(key, value.expose());
        }
        if let Some(dir) = &invocation.cwd {
            cmd.current_dir(dir);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn reap(child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();
    }
}

fn drain<R: Read + Send + 'static>(source: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = String::new();
        if let Some(mut reader) = source {
            let _ = reader.read_to_string(&mut buf);
        }
        buf
    })
}

impl Host for SystemHost {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        let command = invocation.to_string();
        let timeout = invocation.timeout.unwrap_or(self.default_timeout);
        debug!(%command, "running");

        let mut child = Self::build_command(invocation)
            .spawn()
            .map_err(|source| DeployError::CommandIo {
                command: command.clone(),
                source,
            })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {}
                Err(source) => {
                    Self::reap(&mut child);
                    return Err(DeployError::CommandIo { command, source });
                }
            }
            if interrupt::requested() {
                warn!(%command, "interrupted, killing command");
                Self::reap(&mut child);
                return Err(DeployError::Interrupted);
            }
            if Instant::now() >= deadline {
                warn!(%command, timeout_secs = timeout.as_secs(), "command timed out");
                Self::reap(&mut child);
                return Err(DeployError::ExternalCommandTimeout { command, timeout });
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = CommandOutput {
            status: status.code().unwrap_or(-1),
            stdout: stdout.join().unwrap_or_default(),
            stderr: stderr.join().unwrap_or_default(),
        };
        trace!(%command, status = output.status, stdout = %output.stdout, stderr = %output.stderr, "finished");
        Ok(output)
    }

    fn user_home(&self, name: &str) -> Result<Option<PathBuf>> {
        User::from_name(name)
            .map(|user| user.map(|u| u.dir))
            .map_err(|errno| DeployError::io("/etc/passwd", errno.into()))
    }

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        util::ensure_dir(path).map_err(|err| DeployError::io(path, err))
    }

    fn write_file(&self, path: &Path, contents: &str, mode: u32) -> Result<()> {
        util::atomic_write_with_mode(path, contents.as_bytes(), mode)
            .map_err(|err| DeployError::io(path, err))
    }

    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        util::remove_file_if_present(link)
            .and_then(|()| util::symlink(target, link))
            .map_err(|err| DeployError::io(link, err))
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        util::remove_file_if_present(path).map_err(|err| DeployError::io(path, err))
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        util::remove_dir_if_present(path).map_err(|err| DeployError::io(path, err))
    }

    fn chown_recursive(&self, path: &Path, user: &str) -> Result<()> {
        let account = User::from_name(user)
            .map_err(|errno| DeployError::io("/etc/passwd", errno.into()))?
            .ok_or_else(|| {
                DeployError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, format!("no user `{user}`")),
                )
            })?;
        for entry in WalkDir::new(path).follow_links(false) {
            let entry = entry.map_err(|err| DeployError::io(path, err.into()))?;
            // lchown semantics: never follow a link out of the tree
            fchownat(
                None,
                entry.path(),
                Some(account.uid),
                Some(account.gid),
                FchownatFlags::NoFollowSymlink,
            )
            .map_err(|errno| DeployError::io(entry.path(), errno.into()))?;
        }
        Ok(())
    }

    fn listening_ports(&self) -> Result<BTreeSet<u16>> {
        let mut ports = BTreeSet::new();
        for table in SOCKET_TABLES {
            match fs::read_to_string(table) {
                Ok(raw) => ports.extend(parse_listening_ports(&raw)),
                // tcp6 is absent when IPv6 is disabled
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(DeployError::io(table, err)),
            }
        }
        Ok(ports)
    }

    fn interrupted(&self) -> bool {
        interrupt::requested()
    }

    fn acknowledge_interrupt(&self) {
        interrupt::acknowledge();
    }

    fn pause(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Extracts the local ports of LISTEN sockets from a `/proc/net/tcp{,6}`
/// table.
pub fn parse_listening_ports(table: &str) -> BTreeSet<u16> {
    const LISTEN: &str = "0A";

    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let local = fields.nth(1)?;
            let state = fields.nth(1)?;
            if state != LISTEN {
                return None;
            }
            let (_, port_hex) = local.rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 21001 1 0000000000000000 100 0 0 10 0
   1: 00000000:0050 00000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 21002 1 0000000000000000 100 0 0 10 0
   2: 0100007F:C350 0100007F:1F90 01 00000000:00000000 00:00000000 00000000  1000        0 21003 1 0000000000000000 20 4 30 10 -1
";

    const TCP6_TABLE: &str = "\
  sl  local_address                         remote_address                        st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000000000000000000000000000:0BB8 00000000000000000000000000000000:0000 0A 00000000:00000000 00:00000000 00000000     0        0 31001 1 0000000000000000 100 0 0 10 0
";

    #[test]
    fn only_listen_state_sockets_are_reported() {
        let ports = parse_listening_ports(TCP_TABLE);
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![80, 8080]);
    }

    #[test]
    fn ipv6_tables_parse_the_same_way() {
        let ports = parse_listening_ports(TCP6_TABLE);
        assert!(ports.contains(&3000));
    }

    #[test]
    fn non_zero_exit_is_reported_as_status() {
        let host = SystemHost::new(Duration::from_secs(5));
        let output = host
            .run(&Invocation::new("sh").args(["-c", "echo oops >&2; exit 42"]))
            .expect("command runs");
        assert_eq!(output.status, 42);
        assert_eq!(output.stderr.trim(), "oops");

        let err = host
            .run_checked(&Invocation::new("sh").args(["-c", "exit 3"]))
            .expect_err("non-zero exit");
        assert!(matches!(err, DeployError::ExternalCommand { status: 3, .. }));
    }

    #[test]
    fn slow_commands_hit_the_timeout() {
        let host = SystemHost::new(Duration::from_secs(5));
        let err = host
            .run(&Invocation::new("sleep").arg("5").timeout(Duration::from_millis(200)))
            .expect_err("timeout");
        assert!(matches!(err, DeployError::ExternalCommandTimeout { .. }));
    }

    #[test]
    fn missing_programs_are_io_errors() {
        let host = SystemHost::new(Duration::from_secs(5));
        let err = host
            .run(&Invocation::new("appforge-definitely-not-a-program"))
            .expect_err("spawn failure");
        assert!(matches!(err, DeployError::CommandIo { .. }));
    }

    #[test]
    fn written_files_carry_the_requested_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let host = SystemHost::new(Duration::from_secs(5));
        let target = dir.path().join("demoapp.service");

        host.write_file(&target, "[Unit]\n", 0o640).expect("write");

        let mode = fs::metadata(&target).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_leaves_nothing_behind() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = SystemHost::new(Duration::from_secs(5));
        let target = dir.path().join("missing").join("demoapp.service");

        let err = host.write_file(&target, "[Unit]\n", 0o644).expect_err("no parent");

        assert!(matches!(err, DeployError::Io { .. }));
        assert!(!host.exists(&target));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn environment_and_cwd_reach_the_child() {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = SystemHost::new(Duration::from_secs(5));
        let output = host
            .run_checked(
                &Invocation::new("sh")
                    .args(["-c", "printf '%s %s' \"$GREETING\" \"$(pwd)\""])
                    .env("GREETING", "hello")
                    .cwd(dir.path()),
            )
            .expect("command runs");
        let canonical = fs::canonicalize(dir.path()).unwrap();
        assert_eq!(output.stdout, format!("hello {}", canonical.display()));
    }
}
