//! Listening sockets inherited from the service manager.
//!
//! The manager passes `n` descriptors starting at [`LISTEN_FDS_START`] and
//! describes them with `LISTEN_PID` and `LISTEN_FDS`. Every descriptor must be
//! a listening stream socket; anything else aborts startup.

use crate::error::{Error, Result};
use crate::reactor::socket::{set_cloexec, validate_listener};

use std::env;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::process;
use tracing::debug;

/// First inherited descriptor (`SD_LISTEN_FDS_START`).
pub const LISTEN_FDS_START: RawFd = 3;

const LISTEN_PID: &str = "LISTEN_PID";
const LISTEN_FDS: &str = "LISTEN_FDS";
const LISTEN_FDNAMES: &str = "LISTEN_FDNAMES";

/// A validated, non-empty set of listening sockets.
#[derive(Debug)]
pub struct ListenFds {
    fds: Vec<OwnedFd>,
}

impl ListenFds {
    /// Takes ownership of the descriptors passed through socket activation.
    ///
    /// With `unset_environment`, the activation variables are removed so that
    /// child processes do not inherit them.
    pub fn from_env(unset_environment: bool) -> Result<Self> {
        let listen_pid = read_var(LISTEN_PID)?;
        let listen_fds = read_var(LISTEN_FDS)?;

        if unset_environment {
            // SAFETY: called during startup, before any other thread exists.
            unsafe {
                env::remove_var(LISTEN_PID);
                env::remove_var(LISTEN_FDS);
                env::remove_var(LISTEN_FDNAMES);
            }
        }

        let count = listen_fds_count(listen_pid.as_deref(), listen_fds.as_deref(), process::id())?;
        if count == 0 {
            return Err(Error::NoDescriptors);
        }

        debug!(count, "inherited descriptors");

        // Validate the whole range before owning any of it.
        let range = LISTEN_FDS_START..LISTEN_FDS_START + count as RawFd;
        for fd in range.clone() {
            set_cloexec(fd).map_err(|err| Error::InvalidDescriptor {
                fd,
                reason: err.to_string(),
            })?;
            validate_listener(fd)?;
        }

        // SAFETY: every descriptor in the range was validated above and is
        // owned exclusively by this set from here on.
        let fds = range
            .map(|fd| unsafe { OwnedFd::from_raw_fd(fd) })
            .collect();

        Ok(Self { fds })
    }

    /// Validates descriptors obtained by other means.
    pub fn from_fds(fds: Vec<OwnedFd>) -> Result<Self> {
        if fds.is_empty() {
            return Err(Error::NoDescriptors);
        }

        for fd in &fds {
            validate_listener(fd.as_raw_fd())?;
        }

        Ok(Self { fds })
    }

    pub fn len(&self) -> usize {
        self.fds.len()
    }

    /// Always `false`: an empty set is rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty()
    }

    pub fn raw_fds(&self) -> Vec<RawFd> {
        self.fds.iter().map(AsRawFd::as_raw_fd).collect()
    }
}

impl IntoIterator for ListenFds {
    type Item = OwnedFd;
    type IntoIter = std::vec::IntoIter<OwnedFd>;

    fn into_iter(self) -> Self::IntoIter {
        self.fds.into_iter()
    }
}

fn read_var(name: &str) -> Result<Option<String>> {
    match env::var(name) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(Error::Acquisition {
            reason: format!("{name} is not valid unicode"),
        }),
    }
}

/// Number of descriptors addressed to process `pid`.
///
/// Missing variables, or a `LISTEN_PID` naming another process, mean none.
pub(crate) fn listen_fds_count(
    listen_pid: Option<&str>,
    listen_fds: Option<&str>,
    pid: u32,
) -> Result<usize> {
    let Some(listen_pid) = listen_pid else {
        return Ok(0);
    };

    let target: u32 = listen_pid.trim().parse().map_err(|_| Error::Acquisition {
        reason: format!("invalid {LISTEN_PID} value {listen_pid:?}"),
    })?;

    if target != pid {
        return Ok(0);
    }

    let Some(listen_fds) = listen_fds else {
        return Ok(0);
    };

    let count: usize = listen_fds.trim().parse().map_err(|_| Error::Acquisition {
        reason: format!("invalid {LISTEN_FDS} value {listen_fds:?}"),
    })?;

    if count > (RawFd::MAX - LISTEN_FDS_START) as usize {
        return Err(Error::Acquisition {
            reason: format!("{LISTEN_FDS} value {count} is out of range"),
        });
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_for_this_process() {
        let count = listen_fds_count(Some("42"), Some("2"), 42).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn missing_variables_mean_no_descriptors() {
        assert_eq!(listen_fds_count(None, Some("2"), 42).unwrap(), 0);
        assert_eq!(listen_fds_count(Some("42"), None, 42).unwrap(), 0);
    }

    #[test]
    fn descriptors_for_another_process_are_ignored() {
        assert_eq!(listen_fds_count(Some("41"), Some("2"), 42).unwrap(), 0);
    }

    #[test]
    fn garbage_is_an_acquisition_error() {
        assert!(matches!(
            listen_fds_count(Some("pid"), Some("2"), 42),
            Err(Error::Acquisition { .. })
        ));
        assert!(matches!(
            listen_fds_count(Some("42"), Some("-1"), 42),
            Err(Error::Acquisition { .. })
        ));
        assert!(matches!(
            listen_fds_count(Some("42"), Some("99999999999"), 42),
            Err(Error::Acquisition { .. })
        ));
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(matches!(
            ListenFds::from_fds(Vec::new()),
            Err(Error::NoDescriptors)
        ));
    }
}
