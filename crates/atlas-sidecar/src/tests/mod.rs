mod config;
mod health;
mod status;

#[cfg(unix)]
pub(crate) use harness::{
    EARLY_EXIT_SERVER, FLAKY_SERVER, READY_SERVER, SILENT_SERVER, STUBBORN_SERVER,
    launch_harness, sibling_supervisor, wait_until,
};

#[cfg(unix)]
mod harness {
    use std::path::Path;
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use crate::{BuildMode, ServerPaths, ServerSupervisor, SupervisorConfig};

    /// Fake backend that prints the readiness banner and idles until
    /// terminated. SIGTERM kills the exec'd sleep, so graceful
    /// shutdown completes promptly.
    pub(crate) const READY_SERVER: &str =
        "echo \"INFO:     Application startup complete\"\nexec sleep 30";

    /// Fake backend that dies before ever announcing readiness.
    pub(crate) const EARLY_EXIT_SERVER: &str = "echo \"boom\" >&2\nexit 1";

    /// Fake backend that idles without ever announcing readiness.
    pub(crate) const SILENT_SERVER: &str = "exec sleep 30";

    /// Fake backend that becomes ready, then crashes shortly after.
    pub(crate) const FLAKY_SERVER: &str =
        "echo \"INFO:     Application startup complete\"\nsleep 0.3\nexit 1";

    /// Fake backend that ignores SIGTERM entirely.
    pub(crate) const STUBBORN_SERVER: &str =
        "trap '' TERM\necho \"INFO:     Application startup complete\"\nwhile true; do sleep 1; done";

    /// A supervisor wired to a scripted fake backend in a temp dir.
    pub(crate) struct TestServer {
        pub supervisor: ServerSupervisor,
        pub dir: TempDir,
    }

    /// Install a fake packaged backend under `<resources>/bin` where
    /// the resolver expects it.
    fn install_fake_server(resource_dir: &Path, body: &str) {
        use std::os::unix::fs::PermissionsExt;

        let bin_dir = resource_dir.join("bin");
        std::fs::create_dir_all(&bin_dir).unwrap();
        let path = bin_dir.join("atlas-server");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }

    pub(crate) fn launch_harness(
        script_body: &str,
        tweak: impl FnOnce(&mut SupervisorConfig),
    ) -> TestServer {
        let dir = TempDir::new().unwrap();
        install_fake_server(dir.path(), script_body);

        let paths = ServerPaths {
            service_dir: dir.path().join("backend"),
            resource_dir: dir.path().to_path_buf(),
            data_dir: dir.path().join("data"),
        };

        let mut config = SupervisorConfig::default();
        config.resilience.startup_timeout_secs = 5;
        config.resilience.initial_backoff_ms = 100;
        tweak(&mut config);

        TestServer {
            supervisor: ServerSupervisor::new(paths, BuildMode::Packaged, config),
            dir,
        }
    }

    /// Build a second supervisor over the same directories as an
    /// existing harness, for single-instance tests.
    pub(crate) fn sibling_supervisor(harness: &TestServer) -> ServerSupervisor {
        let paths = ServerPaths {
            service_dir: harness.dir.path().join("backend"),
            resource_dir: harness.dir.path().to_path_buf(),
            data_dir: harness.dir.path().join("data"),
        };
        ServerSupervisor::new(paths, BuildMode::Packaged, SupervisorConfig::default())
    }

    pub(crate) async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}
