//! The libc boundary: process-group signals and terminal foreground handover.
//!
//! Every call here takes plain integers or stack-local signal sets; nothing
//! else in the crate is allowed `unsafe`.
#![allow(unsafe_code)]

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Term,
    Kill,
    Cont,
}

#[cfg(unix)]
mod imp {
    use std::io;

    use tracing::{debug, warn};

    use super::Signal;

    fn signo(signal: Signal) -> libc::c_int {
        match signal {
            Signal::Term => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Cont => libc::SIGCONT,
        }
    }

    fn to_pid(pid: u32) -> io::Result<libc::pid_t> {
        libc::pid_t::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))
    }

    fn check(rc: libc::c_int) -> io::Result<()> {
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Signal every process in group `pgid`.
    pub fn kill_group(pgid: u32, signal: Signal) -> io::Result<()> {
        let pgid = to_pid(pgid)?;
        // SAFETY: killpg(2) only reads its integer arguments.
        check(unsafe { libc::killpg(pgid, signo(signal)) })
    }

    /// Signal a single process.
    pub fn kill_pid(pid: u32, signal: Signal) -> io::Result<()> {
        let pid = to_pid(pid)?;
        // SAFETY: kill(2) only reads its integer arguments.
        check(unsafe { libc::kill(pid, signo(signal)) })
    }

    /// Restores the previous foreground process group of the terminal on drop.
    #[derive(Debug)]
    pub struct Foreground {
        previous: libc::pid_t,
    }

    impl Drop for Foreground {
        fn drop(&mut self) {
            if let Err(err) = set_foreground(self.previous) {
                warn!(err = %err, "could not take the terminal back");
            }
        }
    }

    /// Make `pgid` the foreground group of the terminal on stdin.
    ///
    /// Returns `None` (and changes nothing) unless stdin is a terminal whose
    /// foreground group is ours. The group is sent SIGCONT afterwards in case
    /// it touched the terminal before the handover and was stopped.
    pub fn hand_terminal_to(pgid: u32) -> Option<Foreground> {
        let target = to_pid(pgid).ok()?;
        // SAFETY: isatty, tcgetpgrp and getpgrp take integers and touch no memory.
        let previous = unsafe {
            if libc::isatty(libc::STDIN_FILENO) != 1 {
                return None;
            }
            let ours = libc::getpgrp();
            if libc::tcgetpgrp(libc::STDIN_FILENO) != ours {
                return None;
            }
            ours
        };
        if let Err(err) = set_foreground(target) {
            debug!(err = %err, "terminal handover failed");
            return None;
        }
        if let Err(err) = kill_group(pgid, Signal::Cont) {
            debug!(err = %err, "SIGCONT after handover failed");
        }
        Some(Foreground { previous })
    }

    /// tcsetpgrp with SIGTTOU blocked on this thread, so a background caller
    /// is not stopped while reclaiming the terminal.
    fn set_foreground(pgid: libc::pid_t) -> io::Result<()> {
        // SAFETY: both signal sets live on this stack frame and are
        // initialised by sigemptyset before any other use.
        unsafe {
            let mut block: libc::sigset_t = std::mem::zeroed();
            let mut saved: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut block);
            libc::sigaddset(&mut block, libc::SIGTTOU);
            libc::pthread_sigmask(libc::SIG_BLOCK, &block, &mut saved);
            let result = check(libc::tcsetpgrp(libc::STDIN_FILENO, pgid));
            libc::pthread_sigmask(libc::SIG_SETMASK, &saved, std::ptr::null_mut());
            result
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use std::io;

    use super::Signal;

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "process groups need unix")
    }

    pub fn kill_group(_pgid: u32, _signal: Signal) -> io::Result<()> {
        Err(unsupported())
    }

    pub fn kill_pid(_pid: u32, _signal: Signal) -> io::Result<()> {
        Err(unsupported())
    }

    #[derive(Debug)]
    pub struct Foreground;

    pub fn hand_terminal_to(_pgid: u32) -> Option<Foreground> {
        None
    }
}

pub use imp::{hand_terminal_to, kill_group, kill_pid};

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;

    #[test]
    fn group_kill_reaches_isolated_child() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        crate::io::process::isolate_process_group(&mut cmd);
        let mut child = cmd.spawn().expect("spawn");
        kill_group(child.id(), Signal::Kill).expect("killpg");
        let status = child.wait().expect("wait");
        assert!(!status.success());
    }

    #[test]
    fn missing_group_is_an_error() {
        let mut child = Command::new("true").spawn().expect("spawn");
        child.wait().expect("wait");
        // `true` ran in our group, so no group carries its pid.
        assert!(kill_group(child.id(), Signal::Term).is_err());
    }
}
