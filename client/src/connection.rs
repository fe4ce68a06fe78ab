/// Connection lifecycle of one room session.
///
/// `Disconnected -> Connecting -> Connected -> Reconnecting -> Connected | Disconnected`.
/// `Disconnected` reached from any other state is terminal for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// `failures` counts consecutive failed handshakes since the last synced connection.
    Reconnecting { failures: u32 },
}

/// Coarse status shown to the UI layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityStatus {
    Connected,
    Reconnecting,
    Disconnected,
}

impl ConnectivityStatus {
    pub fn controls_enabled(self) -> bool {
        !matches!(self, ConnectivityStatus::Disconnected)
    }
}

/// What the session loop should do after a failed handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter { attempt: u32 },
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: ConnectionState,
    budget: u32,
    failures: u32,
}

impl Lifecycle {
    pub fn new(budget: u32) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            budget,
            failures: 0,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn status(&self) -> ConnectivityStatus {
        match self.state {
            ConnectionState::Connected => ConnectivityStatus::Connected,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. } => {
                ConnectivityStatus::Reconnecting
            }
            ConnectionState::Disconnected => ConnectivityStatus::Disconnected,
        }
    }

    /// Mount with a room id. Also used by the manual reconnect affordance.
    pub fn mount(&mut self) {
        if self.state == ConnectionState::Disconnected {
            self.state = ConnectionState::Connecting;
            self.failures = 0;
        }
    }

    /// The socket is open. Failures are only forgiven once the room snapshot
    /// arrives, see [`transport_dropped`](Self::transport_dropped).
    pub fn handshake_succeeded(&mut self) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Reconnecting { .. }
        ) {
            self.state = ConnectionState::Connected;
        }
    }

    /// A connect attempt failed, or the connection was lost before the room
    /// snapshot arrived. Counts against the retry budget.
    pub fn handshake_failed(&mut self) -> RetryDecision {
        if self.state == ConnectionState::Disconnected {
            return RetryDecision::GiveUp;
        }
        self.failures += 1;
        let failures = self.failures;
        if failures >= self.budget {
            self.state = ConnectionState::Disconnected;
            RetryDecision::GiveUp
        } else {
            self.state = ConnectionState::Reconnecting { failures };
            RetryDecision::RetryAfter { attempt: failures }
        }
    }

    /// Drop of a connection that had resynced. Resets the retry budget.
    pub fn transport_dropped(&mut self) {
        if self.state == ConnectionState::Connected {
            self.failures = 0;
            self.state = ConnectionState::Reconnecting { failures: 0 };
        }
    }

    pub fn leave(&mut self) {
        self.state = ConnectionState::Disconnected;
    }
}
