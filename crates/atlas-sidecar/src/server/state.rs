/// Current state of the supervised backend process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerState {
    /// Backend is not running
    Stopped,
    /// Backend is starting up
    Starting,
    /// Backend is running and serving on the given port
    Running { port: u16 },
    /// Backend is restarting after a crash or failed health check
    Restarting { attempt: u32 },
    /// Backend is shutting down gracefully
    ShuttingDown,
    /// Restart budget consumed; only an explicit restart resumes recovery
    Exhausted { restarts: u32 },
    /// Startup failed and was reported to the caller
    Failed { error: String },
}
