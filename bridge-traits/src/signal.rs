//! Host Environment Signals
//!
//! Observers outside the request call chain (a router, a window manager, a
//! CLI supervisor) need to learn about forced logouts without subscribing to
//! the core's event bus. The host provides an [`EnvironmentChannel`] and the
//! core dispatches [`HostSignal`]s on it.

use serde::{Deserialize, Serialize};

/// Global signals broadcast to the hosting environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostSignal {
    /// The backend rejected the current credentials; the session is gone.
    Unauthorized,
    /// Credentials were cleared locally.
    LoggedOut,
}

impl HostSignal {
    /// Event name used when the signal is forwarded to host event systems
    pub fn name(&self) -> &'static str {
        match self {
            HostSignal::Unauthorized => "auth:unauthorized",
            HostSignal::LoggedOut => "auth:logout",
        }
    }
}

/// Host-wide notification channel
///
/// `dispatch` is fire-and-forget and must not block. Having nobody listening
/// is not an error.
pub trait EnvironmentChannel: Send + Sync {
    fn dispatch(&self, signal: HostSignal);
}

/// Channel that discards every signal, for hosts with no global observers
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEnvironmentChannel;

impl EnvironmentChannel for NoopEnvironmentChannel {
    fn dispatch(&self, _signal: HostSignal) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        assert_eq!(HostSignal::Unauthorized.name(), "auth:unauthorized");
        assert_eq!(HostSignal::LoggedOut.name(), "auth:logout");
    }

    #[test]
    fn test_signal_serialization() {
        let json = serde_json::to_string(&HostSignal::LoggedOut).unwrap();
        assert_eq!(json, "\"logged-out\"");
    }
}
