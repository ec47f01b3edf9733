//! Executable resolution for the backend process.
//!
//! Decides which concrete artifact to launch for the current build
//! mode: a packaged native binary, a virtual-environment interpreter,
//! or the system interpreter.

use crate::server::{ServerError, ServerPaths, ServerResult};

use std::panic::Location;
use std::path::{Path, PathBuf};

use error_location::ErrorLocation;
use tracing::info;

const SERVER_BINARY: &str = "atlas-server";
const PYTHON_MODULE: &str = "atlas_server";

#[cfg(unix)]
const VENV_INTERPRETERS: &[&str] = &[".venv/bin/python", "venv/bin/python"];
#[cfg(windows)]
const VENV_INTERPRETERS: &[&str] = &[".venv\\Scripts\\python.exe", "venv\\Scripts\\python.exe"];

#[cfg(unix)]
const SYSTEM_INTERPRETER: &str = "python3";
#[cfg(windows)]
const SYSTEM_INTERPRETER: &str = "python";

/// Build mode the application was started in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    /// Installed build; only the bundled binary is acceptable
    Packaged,
    /// Development checkout; binary, venv, and system fallbacks apply
    Development,
}

/// A fully resolved launch: what to run, how, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchPlan {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
}

pub struct ExecutableResolver;

impl ExecutableResolver {
    /// Resolve the backend executable for the given build mode.
    ///
    /// Search order, first match wins:
    /// 1. Packaged mode: the bundled binary under `<resources>/bin`,
    ///    whose absence is fatal
    /// 2. Development mode: a locally built binary under
    ///    `<service>/dist`, for testing packaged artifacts uninstalled
    /// 3. A virtual-environment interpreter under the service directory
    /// 4. The system interpreter
    pub fn resolve(mode: BuildMode, paths: &ServerPaths) -> ServerResult<LaunchPlan> {
        match mode {
            BuildMode::Packaged => Self::resolve_packaged(paths),
            BuildMode::Development => Self::resolve_development(paths),
        }
    }

    fn resolve_packaged(paths: &ServerPaths) -> ServerResult<LaunchPlan> {
        let bin_dir = paths.resource_dir.join("bin");
        let binary = bin_dir.join(Self::binary_name());

        if !binary.exists() {
            // A missing bundled binary is a packaging failure; listing
            // what actually shipped distinguishes it from a path bug.
            return Err(ServerError::BinaryNotFound {
                path: binary,
                listing: Self::list_dir(&bin_dir),
                location: ErrorLocation::from(Location::caller()),
            });
        }

        info!("Using atlas-server (packaged): {}", binary.display());
        Ok(LaunchPlan {
            cwd: bin_dir,
            program: binary,
            args: Vec::new(),
        })
    }

    fn resolve_development(paths: &ServerPaths) -> ServerResult<LaunchPlan> {
        // A dist build next to the sources wins, so packaged artifacts
        // can be exercised without a full install.
        let dist_dir = paths.service_dir.join("dist");
        let dist_binary = dist_dir.join(Self::binary_name());
        if dist_binary.exists() {
            info!("Using atlas-server (dist): {}", dist_binary.display());
            return Ok(LaunchPlan {
                cwd: dist_dir,
                program: dist_binary,
                args: Vec::new(),
            });
        }

        for rel in VENV_INTERPRETERS {
            let interpreter = paths.service_dir.join(rel);
            if interpreter.exists() {
                info!("Using atlas-server (venv): {}", interpreter.display());
                return Ok(Self::interpreter_plan(interpreter, paths));
            }
        }

        info!("Using atlas-server (system interpreter: {SYSTEM_INTERPRETER})");
        Ok(Self::interpreter_plan(SYSTEM_INTERPRETER.into(), paths))
    }

    fn interpreter_plan(interpreter: PathBuf, paths: &ServerPaths) -> LaunchPlan {
        LaunchPlan {
            program: interpreter,
            args: vec!["-m".into(), PYTHON_MODULE.into()],
            cwd: paths.service_dir.clone(),
        }
    }

    fn binary_name() -> String {
        format!("{SERVER_BINARY}{}", std::env::consts::EXE_SUFFIX)
    }

    fn list_dir(dir: &Path) -> String {
        match std::fs::read_dir(dir) {
            Ok(entries) => {
                let mut names: Vec<String> = entries
                    .flatten()
                    .map(|e| e.file_name().to_string_lossy().into_owned())
                    .collect();
                names.sort();
                if names.is_empty() {
                    "<empty directory>".into()
                } else {
                    names.join(", ")
                }
            }
            Err(_) => "<missing directory>".into(),
        }
    }
}
