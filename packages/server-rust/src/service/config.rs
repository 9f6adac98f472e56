use std::time::Duration;

/// Runtime settings for the dispatcher.
///
/// Controls the deadline applied to calls that do not carry their own.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Deadline used by `Dispatcher::dispatch_default` and `Dispatcher::call`.
    pub default_deadline: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_deadline: Duration::from_secs(30),
        }
    }
}
