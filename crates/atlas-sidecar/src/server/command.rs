/// Events from a generation's monitor task to the recovery handler.
///
/// We use a channel because the monitor runs in a separate task
/// and must hand off before its own timer is torn down; the
/// recovery handler owns the restart decision.
#[derive(Debug)]
pub enum ServerCommand {
    /// A health probe came back unhealthy
    Unhealthy { reason: String },
    /// The process exited while it was supposed to be serving
    Crashed { code: Option<i32> },
}
