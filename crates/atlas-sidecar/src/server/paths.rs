use std::path::PathBuf;

/// Filesystem roots the supervisor works against.
///
/// All three are provided by the composition root; the supervisor
/// never guesses installation layout on its own.
#[derive(Debug, Clone)]
pub struct ServerPaths {
    /// Backend source checkout (interpreter mode) and home of `dist/`
    pub service_dir: PathBuf,
    /// Installed resources root holding the packaged `bin/` directory
    pub resource_dir: PathBuf,
    /// Writable application data directory; created on demand
    pub data_dir: PathBuf,
}
