use core::time::Duration;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tracing::debug;

use crate::error::Result;

/// CPU time and peak memory of a terminated process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user: Duration,
    pub system: Duration,
    /// Peak resident set size in bytes.
    pub max_rss: u64,
}

/// A process that can be started, stopped and then asked what it consumed.
///
/// Platforms without per-child accounting report zeroed usage rather than
/// failing.
pub trait ProcessHandle {
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or does not come up.
    fn start(&mut self) -> Result<()>;

    /// Terminate the process and collect its resource usage.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be killed or reaped.
    fn stop(&mut self) -> Result<()>;

    /// Usage of the last stopped process. Zeroed before the first `stop`.
    fn resource_usage(&self) -> ResourceUsage;
}

/// A subprocess whose resource usage is collected when it is reaped.
#[derive(Debug)]
pub struct Server {
    program: PathBuf,
    args: Vec<OsString>,
    child: Option<Child>,
    usage: ResourceUsage,
}

impl Server {
    pub fn new(program: &Path) -> Self {
        Self {
            program: program.to_path_buf(),
            args: Vec::new(),
            child: None,
            usage: ResourceUsage::default(),
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn id(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Reap the process if it already exited on its own.
    ///
    /// Returns `true` when the process is no longer running, in which case
    /// its usage has been collected and [`ProcessHandle::stop`] is a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error from polling the process.
    pub fn try_wait(&mut self) -> Result<bool> {
        let Some(child) = self.child.as_mut() else {
            return Ok(true);
        };
        match reap(child, false)? {
            Some(usage) => {
                debug!(program = %self.program.display(), "process exited");
                self.usage = usage;
                self.child = None;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl ProcessHandle for Server {
    fn start(&mut self) -> Result<()> {
        debug!(program = %self.program.display(), args = ?self.args, "starting process");
        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        self.usage = ResourceUsage::default();
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        debug!(pid = child.id(), "stopping process");
        child.kill()?;
        if let Some(usage) = reap(&mut child, true)? {
            self.usage = usage;
        }
        Ok(())
    }

    fn resource_usage(&self) -> ResourceUsage {
        self.usage
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Wait for `child` and return its usage, or `None` if `block` is false and
/// it is still running.
#[cfg(unix)]
fn reap(child: &mut Child, block: bool) -> Result<Option<ResourceUsage>> {
    use core::mem::MaybeUninit;

    let pid = libc::pid_t::try_from(child.id()).map_err(std::io::Error::other)?;
    let flags = if block { 0 } else { libc::WNOHANG };
    let mut status = 0;
    let mut rusage = MaybeUninit::<libc::rusage>::zeroed();

    let ret = loop {
        let ret = unsafe { libc::wait4(pid, &raw mut status, flags, rusage.as_mut_ptr()) };
        if ret == -1 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        break ret;
    };

    if ret == -1 {
        return Err(std::io::Error::last_os_error().into());
    }
    if ret == 0 {
        return Ok(None);
    }

    let rusage = unsafe { rusage.assume_init() };
    Ok(Some(ResourceUsage {
        user: timeval(rusage.ru_utime),
        system: timeval(rusage.ru_stime),
        max_rss: max_rss_bytes(rusage.ru_maxrss),
    }))
}

#[cfg(unix)]
fn timeval(tv: libc::timeval) -> Duration {
    let secs = u64::try_from(tv.tv_sec).unwrap_or_default();
    let micros = u64::try_from(tv.tv_usec).unwrap_or_default();
    Duration::from_secs(secs) + Duration::from_micros(micros)
}

/// `ru_maxrss` is reported in bytes on macOS and in kilobytes elsewhere.
#[cfg(unix)]
fn max_rss_bytes(max_rss: libc::c_long) -> u64 {
    let value = u64::try_from(max_rss).unwrap_or_default();
    if cfg!(target_os = "macos") {
        value
    } else {
        value * 1024
    }
}

#[cfg(not(unix))]
fn reap(child: &mut Child, block: bool) -> Result<Option<ResourceUsage>> {
    let exited = if block {
        child.wait().map(Some)?
    } else {
        child.try_wait()?
    };
    Ok(exited.map(|_| ResourceUsage::default()))
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn stop_collects_usage() -> anyhow::Result<()> {
        let mut server = Server::new(Path::new("sleep")).arg("30");
        server.start()?;
        assert!(server.id().is_some());
        assert!(!server.try_wait()?);

        let started = Instant::now();
        server.stop()?;
        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(server.id().is_none());

        #[cfg(target_os = "linux")]
        assert!(server.resource_usage().max_rss > 0);
        Ok(())
    }

    #[test]
    fn exited_process_is_reaped_once() -> anyhow::Result<()> {
        let mut server = Server::new(Path::new("sh")).arg("-c").arg("exit 0");
        server.start()?;

        let deadline = Instant::now() + Duration::from_secs(10);
        while !server.try_wait()? {
            assert!(Instant::now() < deadline, "process did not exit");
            std::thread::sleep(Duration::from_millis(10));
        }

        // Already reaped; stopping must not try to kill a stale pid.
        server.stop()?;
        Ok(())
    }

    #[test]
    fn stop_without_start() -> anyhow::Result<()> {
        let mut server = Server::new(Path::new("true"));
        server.stop()?;
        assert_eq!(server.resource_usage(), ResourceUsage::default());
        Ok(())
    }

    #[test]
    fn missing_program() {
        let mut server = Server::new(Path::new("/nonexistent/regression-server"));
        assert!(server.start().is_err());
    }

    #[test]
    fn max_rss_units() {
        if cfg!(target_os = "macos") {
            assert_eq!(max_rss_bytes(2048), 2048);
        } else {
            assert_eq!(max_rss_bytes(2048), 2048 * 1024);
        }
        assert_eq!(max_rss_bytes(-1), 0);
    }
}
