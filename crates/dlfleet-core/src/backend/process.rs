//! Suspend, resume and terminate a child process without platform branches at
//! the call site. Unix uses SIGSTOP/SIGCONT/SIGKILL; Windows uses the ntdll
//! process suspend API and `TerminateProcess`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub trait ProcessController: Send + Sync {
    fn suspend(&self) -> io::Result<()>;
    fn resume(&self) -> io::Result<()>;
    fn terminate(&self) -> io::Result<()>;
}

/// Controller for an OS child process identified by pid.
///
/// `exited` is set by whoever reaps the child; once set, every operation is a
/// no-op so a recycled pid is never signalled.
pub struct ChildProcess {
    pid: u32,
    exited: Arc<AtomicBool>,
}

impl ChildProcess {
    pub fn new(pid: u32, exited: Arc<AtomicBool>) -> Self {
        Self { pid, exited }
    }

    fn live(&self) -> bool {
        self.pid != 0 && !self.exited.load(Ordering::Acquire)
    }
}

impl ProcessController for ChildProcess {
    fn suspend(&self) -> io::Result<()> {
        if !self.live() {
            return Ok(());
        }
        imp::suspend(self.pid)
    }

    fn resume(&self) -> io::Result<()> {
        if !self.live() {
            return Ok(());
        }
        imp::resume(self.pid)
    }

    fn terminate(&self) -> io::Result<()> {
        if !self.live() {
            return Ok(());
        }
        imp::terminate(self.pid)
    }
}

#[cfg(unix)]
mod imp {
    use std::io;

    fn signal(pid: u32, sig: libc::c_int) -> io::Result<()> {
        let r = unsafe { libc::kill(pid as libc::pid_t, sig) };
        if r == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        // Already gone.
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        Err(err)
    }

    pub(super) fn suspend(pid: u32) -> io::Result<()> {
        signal(pid, libc::SIGSTOP)
    }

    pub(super) fn resume(pid: u32) -> io::Result<()> {
        signal(pid, libc::SIGCONT)
    }

    pub(super) fn terminate(pid: u32) -> io::Result<()> {
        // A stopped process still dies on SIGKILL; SIGCONT is not needed first.
        signal(pid, libc::SIGKILL)
    }
}

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::io;

    type Handle = *mut c_void;

    const PROCESS_TERMINATE: u32 = 0x0001;
    const PROCESS_SUSPEND_RESUME: u32 = 0x0800;

    #[link(name = "kernel32")]
    extern "system" {
        fn OpenProcess(access: u32, inherit: i32, pid: u32) -> Handle;
        fn CloseHandle(handle: Handle) -> i32;
        fn TerminateProcess(handle: Handle, exit_code: u32) -> i32;
    }

    #[link(name = "ntdll")]
    extern "system" {
        fn NtSuspendProcess(handle: Handle) -> i32;
        fn NtResumeProcess(handle: Handle) -> i32;
    }

    fn with_process(
        pid: u32,
        access: u32,
        f: impl FnOnce(Handle) -> io::Result<()>,
    ) -> io::Result<()> {
        let handle = unsafe { OpenProcess(access, 0, pid) };
        if handle.is_null() {
            return Err(io::Error::last_os_error());
        }
        let result = f(handle);
        unsafe { CloseHandle(handle) };
        result
    }

    fn nt_status(status: i32) -> io::Result<()> {
        if status >= 0 {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::Other, format!("NTSTATUS {:#x}", status)))
        }
    }

    pub(super) fn suspend(pid: u32) -> io::Result<()> {
        with_process(pid, PROCESS_SUSPEND_RESUME, |h| {
            nt_status(unsafe { NtSuspendProcess(h) })
        })
    }

    pub(super) fn resume(pid: u32) -> io::Result<()> {
        with_process(pid, PROCESS_SUSPEND_RESUME, |h| {
            nt_status(unsafe { NtResumeProcess(h) })
        })
    }

    pub(super) fn terminate(pid: u32) -> io::Result<()> {
        with_process(pid, PROCESS_TERMINATE, |h| {
            if unsafe { TerminateProcess(h, 1) } == 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(())
            }
        })
    }
}

#[cfg(not(any(unix, windows)))]
mod imp {
    use std::io;

    fn unsupported() -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "process control not supported on this platform",
        ))
    }

    pub(super) fn suspend(_pid: u32) -> io::Result<()> {
        unsupported()
    }

    pub(super) fn resume(_pid: u32) -> io::Result<()> {
        unsupported()
    }

    pub(super) fn terminate(_pid: u32) -> io::Result<()> {
        unsupported()
    }
}
