use std::fmt;

/// Wi-Fi association state as reported by the station collaborator.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    /// Association has finished, one way or the other.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Connected | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// Diagnostic counters of the runtime loop.
///
/// Nothing reads these to take decisions; they end up in log lines only.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RuntimeCounters {
    pub consecutive_errors: u32,
    pub frames_rendered: u64,
    pub fetch_failures: u64,
    pub render_failures: u64,
}

impl RuntimeCounters {
    pub fn record_frame(&mut self) {
        self.frames_rendered += 1;
        self.consecutive_errors = 0;
    }

    pub fn record_fetch_failure(&mut self) {
        self.fetch_failures += 1;
        self.consecutive_errors += 1;
    }

    pub fn record_render_failure(&mut self) {
        self.render_failures += 1;
        self.consecutive_errors += 1;
    }
}
