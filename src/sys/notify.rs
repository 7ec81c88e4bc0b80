use crate::backend::SupervisorNotifier;
use crate::error::{BestEffort, DaemonError};
use std::io;

/// systemd `sd_notify(3)` channel.
///
/// Without `NOTIFY_SOCKET` nobody is listening and every call fails, which
/// is how the lifecycle controller learns it isn't supervised.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemdNotifier;

impl SystemdNotifier {
    fn connected() -> Result<(), DaemonError> {
        if std::env::var_os("NOTIFY_SOCKET").is_none() {
            return Err(DaemonError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "NOTIFY_SOCKET is not set",
            )));
        }
        Ok(())
    }
}

#[cfg(target_os = "linux")]
impl SupervisorNotifier for SystemdNotifier {
    fn notify(&self, status: &str) -> BestEffort {
        use sd_notify::NotifyState;
        Self::connected()
            .and_then(|_| sd_notify::notify(false, &[NotifyState::Status(status)]).map_err(DaemonError::from))
            .into()
    }

    fn ready(&self) -> BestEffort {
        use sd_notify::NotifyState;
        Self::connected()
            .and_then(|_| sd_notify::notify(false, &[NotifyState::Ready]).map_err(DaemonError::from))
            .into()
    }
}

#[cfg(not(target_os = "linux"))]
impl SupervisorNotifier for SystemdNotifier {
    fn notify(&self, _status: &str) -> BestEffort {
        Self::connected().into()
    }

    fn ready(&self) -> BestEffort {
        Self::connected().into()
    }
}
