use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{self, ForkResult, Pid};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Outcome of [`fork_process`], seen from each side of the fork
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forked {
    /// Running inside the new process
    Child,
    /// Running in the spawner; carries the new process id
    Parent(u32),
}

/// Signals that drive the supervision loops
const ADMIN_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM];

fn admin_signals() -> SigSet {
    let mut set = SigSet::empty();
    for sig in ADMIN_SIGNALS {
        set.add(sig);
    }
    set
}

/// Fork the current process
///
/// The administrative signals are blocked across the fork. The spawner gets
/// its previous mask back straight away. The child starts with them still
/// blocked and must call [`unblock_admin_signals`] once its own dispositions
/// are in place, so a signal sent in between stays pending instead of
/// reaching the handler inherited from the spawner.
pub fn fork_process() -> nix::Result<Forked> {
    let mut previous = SigSet::empty();
    signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&admin_signals()), Some(&mut previous))?;

    // SAFETY: no level of the supervisor spawns threads, so the child starts
    // with the only thread of its parent and no lock can be held elsewhere.
    let forked = unsafe { unistd::fork() };
    match forked {
        Ok(ForkResult::Child) => Ok(Forked::Child),
        Ok(ForkResult::Parent { child }) => {
            signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&previous), None)?;
            Ok(Forked::Parent(child.as_raw() as u32))
        }
        Err(errno) => {
            signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&previous), None)?;
            Err(errno)
        }
    }
}

/// Let pending administrative signals through
///
/// No-op when nothing is blocked, as in a master that never forked itself.
pub fn unblock_admin_signals() -> nix::Result<()> {
    signal::sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&admin_signals()), None)
}

pub fn current_pid() -> u32 {
    std::process::id()
}

/// Convert a pid to the nix type, refusing values `kill(2)` would read as a
/// process group or broadcast
fn target(pid: u32) -> Option<Pid> {
    if pid == 0 || pid > i32::MAX as u32 {
        return None;
    }
    Some(Pid::from_raw(pid as i32))
}

/// Check if process is alive
///
/// Signal 0 probes the process table without delivering anything. The probe
/// neither reaps nor waits, and a zombie still counts as alive.
pub fn process_alive(pid: u32) -> bool {
    let Some(pid) = target(pid) else {
        return false;
    };
    match signal::kill(pid, None) {
        Ok(()) => true,
        Err(errno) => errno == Errno::EPERM, // EPERM means process exists but no permission
    }
}

/// Deliver `sig` to `pid`
pub fn send_signal(pid: u32, sig: Signal) -> nix::Result<()> {
    let target = target(pid).ok_or(Errno::ESRCH)?;
    signal::kill(target, sig)
}

/// Ask a process to terminate, best-effort
///
/// Returns false when the signal could not be delivered, typically because
/// the process is already gone.
pub fn terminate_process(pid: u32) -> bool {
    match send_signal(pid, Signal::SIGTERM) {
        Ok(()) => true,
        Err(errno) => {
            debug!("pid={} SIGTERM not delivered: {}", pid, errno);
            false
        }
    }
}

/// Sleep for `duration` unless a signal arrives first
///
/// Returns true when the sleep was cut short. `nanosleep` is never restarted
/// after a handler runs.
pub fn sleep_interruptible(duration: Duration) -> bool {
    let request = libc::timespec {
        tv_sec: duration.as_secs() as _,
        tv_nsec: duration.subsec_nanos() as _,
    };
    let mut remaining = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: both pointers reference live stack values for the whole call.
    let rc = unsafe { libc::nanosleep(&request, &mut remaining) };
    rc != 0
}

/// Let the kernel collect exited children
///
/// `SIGCHLD` is ignored with `SA_NOCLDWAIT`, so dead children never linger as
/// zombies and the liveness probe sees them disappear. Any blocking wait on
/// children fails with `ECHILD` while this is in effect.
pub fn detach_children() -> nix::Result<()> {
    let action = SigAction::new(SigHandler::SigIgn, SaFlags::SA_NOCLDWAIT, SigSet::empty());
    // SAFETY: installs a kernel disposition, no Rust handler is involved.
    unsafe { signal::sigaction(Signal::SIGCHLD, &action) }?;
    Ok(())
}

/// Start a new session so the process outlives its controlling terminal
pub fn new_session() -> nix::Result<()> {
    unistd::setsid().map(|_| ())
}

/// Open `path` for appending, creating it and its parent directory
pub fn open_log(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Point stdin at the null device and stdout/stderr at `log`
pub fn redirect_stdio(log: &File) -> io::Result<()> {
    let null = OpenOptions::new().read(true).open("/dev/null")?;
    dup_onto(null.as_raw_fd(), libc::STDIN_FILENO)?;
    dup_onto(log.as_raw_fd(), libc::STDOUT_FILENO)?;
    dup_onto(log.as_raw_fd(), libc::STDERR_FILENO)?;
    Ok(())
}

fn dup_onto(fd: libc::c_int, target: libc::c_int) -> io::Result<()> {
    // SAFETY: both descriptors are valid for the duration of the call; dup2
    // closes `target` atomically before reusing it.
    if unsafe { libc::dup2(fd, target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
