use core::net::SocketAddr;
use core::time::Duration;
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::time::Instant;

use regression_core::{ProcessHandle, ResourceUsage, Server};
use tempfile::TempDir;
use tracing::debug;

pub const HOST: &str = "127.0.0.1";
/// MySQL protocol port gitbase listens on by default.
pub const PORT: u16 = 3306;
pub const USER: &str = "root";

const STARTUP_TIMEOUT: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A gitbase server serving a fixture directory.
///
/// Each start gets a fresh index directory that is removed on stop.
/// Starting blocks until the server accepts connections.
pub struct GitbaseServer {
    binary: PathBuf,
    repos: PathBuf,
    port: u16,
    server: Option<Server>,
    index: Option<TempDir>,
    usage: ResourceUsage,
}

impl GitbaseServer {
    pub fn new(binary: &Path, repos: &Path) -> Self {
        Self {
            binary: binary.to_path_buf(),
            repos: repos.to_path_buf(),
            port: PORT,
            server: None,
            index: None,
            usage: ResourceUsage::default(),
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// MySQL connection URL of a server listening on `port`.
    pub fn url(port: u16) -> String {
        format!("mysql://{USER}@{HOST}:{port}/")
    }

    pub fn index_dir(&self) -> Option<&Path> {
        self.index.as_ref().map(TempDir::path)
    }

    fn wait_ready(server: &mut Server, port: u16) -> regression_core::Result<()> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        loop {
            if server.try_wait()? {
                return Err(std::io::Error::other("gitbase exited before accepting connections").into());
            }
            if TcpStream::connect_timeout(&addr, POLL_INTERVAL).is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("gitbase did not listen on {addr} within {STARTUP_TIMEOUT:?}"),
                )
                .into());
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

impl ProcessHandle for GitbaseServer {
    fn start(&mut self) -> regression_core::Result<()> {
        let index = tempfile::Builder::new().prefix("gitbase-index-").tempdir()?;
        let mut server = Server::new(&self.binary)
            .arg("server")
            .arg("-g")
            .arg(&self.repos)
            .arg("--index")
            .arg(index.path())
            .arg("--port")
            .arg(self.port.to_string());
        server.start()?;
        self.index = Some(index);

        if let Err(e) = Self::wait_ready(&mut server, self.port) {
            let _ = server.stop();
            self.index = None;
            return Err(e);
        }
        debug!(url = %Self::url(self.port), "gitbase ready");
        self.server = Some(server);
        Ok(())
    }

    fn stop(&mut self) -> regression_core::Result<()> {
        let stopped = match self.server.take() {
            Some(mut server) => {
                let result = server.stop();
                self.usage = server.resource_usage();
                result
            }
            None => Ok(()),
        };
        release(stopped, self.index.take())
    }

    fn resource_usage(&self) -> ResourceUsage {
        self.usage
    }
}

/// Remove the index directory whatever the outcome of stopping. A stop
/// error takes priority over a removal error.
fn release(
    stopped: regression_core::Result<()>,
    index: Option<TempDir>,
) -> regression_core::Result<()> {
    let removed = index.map_or(Ok(()), TempDir::close);
    stopped?;
    removed?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_cleans_index() {
        let mut server = GitbaseServer::new(Path::new("/nonexistent/gitbase"), Path::new("repos"));
        assert!(server.start().is_err());
        assert!(server.index_dir().is_none());
    }

    #[test]
    fn early_exit_is_reported() -> anyhow::Result<()> {
        // `false` ignores its arguments and exits without listening.
        let mut server = GitbaseServer::new(Path::new("false"), Path::new("repos"));
        if TcpStream::connect((HOST, PORT)).is_ok() {
            // Something else owns the port; readiness would be misdetected.
            return Ok(());
        }
        let err = server.start();
        assert!(err.is_err());
        assert!(server.index_dir().is_none());
        server.stop()?;
        Ok(())
    }

    #[test]
    fn stop_without_start() -> anyhow::Result<()> {
        let mut server = GitbaseServer::new(Path::new("gitbase"), Path::new("repos"));
        server.stop()?;
        assert_eq!(server.resource_usage(), ResourceUsage::default());
        Ok(())
    }

    #[test]
    fn url_format() {
        assert_eq!(GitbaseServer::url(PORT), "mysql://root@127.0.0.1:3306/");
    }

    /// Write an executable script that ignores its arguments and sleeps.
    fn sleeper(dir: &Path) -> anyhow::Result<PathBuf> {
        use std::os::unix::fs::PermissionsExt as _;

        let path = dir.join("gitbase");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n")?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    #[test]
    fn index_lives_from_start_to_stop() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let binary = sleeper(tmp.path())?;
        // The listener stands in for gitbase's SQL port.
        let listener = std::net::TcpListener::bind((HOST, 0))?;
        let port = listener.local_addr()?.port();

        let mut server = GitbaseServer::new(&binary, tmp.path()).with_port(port);
        server.start()?;
        let index = server
            .index_dir()
            .map(Path::to_path_buf)
            .ok_or_else(|| anyhow::anyhow!("started server has no index directory"))?;
        assert!(index.is_dir());

        server.stop()?;
        assert!(server.index_dir().is_none());
        assert!(!index.exists());
        #[cfg(target_os = "linux")]
        assert!(server.resource_usage().max_rss > 0);
        Ok(())
    }

    #[test]
    fn stop_error_wins_and_index_is_removed() -> anyhow::Result<()> {
        let index = tempfile::tempdir()?;
        let path = index.path().to_path_buf();

        let stopped = Err(std::io::Error::other("kill failed").into());
        let Err(err) = release(stopped, Some(index)) else {
            panic!("expected the stop error");
        };
        assert_eq!(err.to_string(), "kill failed");
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn removal_error_surfaces_after_clean_stop() -> anyhow::Result<()> {
        let index = tempfile::tempdir()?;
        std::fs::remove_dir(index.path())?;
        assert!(release(Ok(()), Some(index)).is_err());
        assert!(release(Ok(()), None).is_ok());
        Ok(())
    }
}
