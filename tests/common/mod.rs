#![allow(dead_code)]

use assert_cmd::prelude::*;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::TempDir;

pub const TIMEOUT: Duration = Duration::from_secs(15);

/// `(state, ppid)` from `/proc/<pid>/stat`
fn stat(pid: u32) -> Option<(char, u32)> {
    let content = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
    // comm may contain spaces, the fields after the last ')' do not
    let rest = &content[content.rfind(')')? + 1..];
    let mut fields = rest.split_whitespace();
    let state = fields.next()?.chars().next()?;
    let ppid = fields.next()?.parse().ok()?;
    Some((state, ppid))
}

/// Running process, zombies count as dead
pub fn alive(pid: u32) -> bool {
    matches!(stat(pid), Some((state, _)) if state != 'Z' && state != 'X')
}

pub fn children_of(pid: u32) -> Vec<u32> {
    let mut children = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return children;
    };
    for entry in entries.flatten() {
        let Some(candidate) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        if let Some((state, ppid)) = stat(candidate) {
            if ppid == pid && state != 'Z' && state != 'X' {
                children.push(candidate);
            }
        }
    }
    children.sort_unstable();
    children
}

/// Live processes with `arg` among their command-line arguments, wherever
/// they sit in the process tree
pub fn processes_with_arg(arg: &str) -> Vec<u32> {
    let mut found = Vec::new();
    let Ok(entries) = fs::read_dir("/proc") else {
        return found;
    };
    for entry in entries.flatten() {
        let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<u32>().ok()) else {
            continue;
        };
        let Ok(cmdline) = fs::read(format!("/proc/{}/cmdline", pid)) else {
            continue;
        };
        if cmdline.split(|b| *b == 0).any(|a| a == arg.as_bytes()) && alive(pid) {
            found.push(pid);
        }
    }
    found.sort_unstable();
    found
}

pub fn descendants_of(pid: u32) -> Vec<u32> {
    let mut found = Vec::new();
    let mut frontier = vec![pid];
    while let Some(next) = frontier.pop() {
        for child in children_of(next) {
            found.push(child);
            frontier.push(child);
        }
    }
    found
}

pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    condition()
}

pub fn send(pid: u32, sig: Signal) {
    let _ = kill(Pid::from_raw(pid as i32), sig);
}

/// The single parent of `master` together with its workers, once there are
/// exactly `workers` of them
pub fn generation(master: u32, workers: usize) -> Option<(u32, Vec<u32>)> {
    let parents = children_of(master);
    if parents.len() != 1 {
        return None;
    }
    let parent = parents[0];
    let fleet = children_of(parent);
    (fleet.len() == workers).then_some((parent, fleet))
}

pub fn wait_for_generation(master: u32, workers: usize) -> (u32, Vec<u32>) {
    let mut found = None;
    let ready = wait_until(TIMEOUT, || {
        found = generation(master, workers);
        found.is_some()
    });
    assert!(ready, "master {} never reached {} workers", master, workers);
    found.expect("generation present")
}

pub fn wait_for_exit(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        if Instant::now() >= deadline {
            return None;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
}

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("temp dir"),
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write_config(&self, body: &str) -> PathBuf {
        let path = self.path("forkwarden.toml");
        fs::write(&path, body).expect("write config");
        path
    }

    pub fn command(&self, config: &Path) -> Command {
        let mut cmd = Command::cargo_bin("forkwarden").expect("binary built");
        cmd.arg("-c").arg(config).arg("--log-level").arg("info");
        cmd.current_dir(self.dir.path());
        cmd.env_remove("RUST_LOG");
        cmd.env_remove("FORKWARDEN_ENV");
        cmd
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path(name)).unwrap_or_default()
    }
}

/// A foreground master whose output goes to `master.out`
///
/// Dropping it kills whatever is left of the tree.
pub struct Foreground {
    pub child: Child,
}

impl Foreground {
    pub fn spawn(workspace: &Workspace, config: &Path, extra: &[&str]) -> Self {
        let out = fs::File::create(workspace.path("master.out")).expect("create output");
        let err = out.try_clone().expect("clone output");
        let child = workspace
            .command(config)
            .args(extra)
            .arg("run")
            .stdin(Stdio::null())
            .stdout(out)
            .stderr(err)
            .spawn()
            .expect("spawn master");
        Self { child }
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }
}

impl Drop for Foreground {
    fn drop(&mut self) {
        for pid in descendants_of(self.pid()) {
            send(pid, Signal::SIGKILL);
        }
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
