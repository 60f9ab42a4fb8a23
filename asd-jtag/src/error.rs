use std::{error::Error, fmt::Display, io};

use crate::tap::TapState;

/// Errors reported by a transport backend.
#[derive(Debug)]
pub enum TransportError {
    /// Device open, ioctl or socket failure
    Io(io::Error),
    /// The backend has no way to perform the requested primitive
    Unsupported(&'static str),
    /// The remote controller answered with a non-zero completion code
    Rejected { completion_code: u8 },
    MalformedResponse(String),
}

impl From<io::Error> for TransportError {
    fn from(value: io::Error) -> Self {
        TransportError::Io(value)
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(error) => write!(f, "{}", error),
            TransportError::Unsupported(what) => write!(f, "Transport does not support {}", what),
            TransportError::Rejected { completion_code } => {
                write!(
                    f,
                    "Remote controller rejected request with completion code 0x{:02x}",
                    completion_code
                )
            }
            TransportError::MalformedResponse(reason) => {
                write!(f, "Malformed response: {}", reason)
            }
        }
    }
}

impl Error for TransportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TransportError::Io(error) => Some(error),
            _ => None,
        }
    }
}

/// Errors returned by [`Handler`](crate::Handler) operations.
#[derive(Debug)]
pub enum JtagError {
    /// Rejected before any hardware I/O took place
    InvalidParameter(String),
    /// A shift was requested while the active chain is not in Shift-IR or Shift-DR
    NotInShiftState(TapState),
    /// The handler was never initialized, or initialization failed
    NotInitialized,
    Transport(TransportError),
    /// A previous transport failure left the TAP in an unknown state.
    /// Only `deinitialize` followed by `initialize` recovers from this.
    Desynchronized,
}

impl JtagError {
    pub(crate) fn invalid(message: impl Into<String>) -> JtagError {
        JtagError::InvalidParameter(message.into())
    }
}

impl From<TransportError> for JtagError {
    fn from(value: TransportError) -> Self {
        JtagError::Transport(value)
    }
}

impl From<io::Error> for JtagError {
    fn from(value: io::Error) -> Self {
        JtagError::Transport(TransportError::Io(value))
    }
}

impl Display for JtagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JtagError::InvalidParameter(reason) => write!(f, "Invalid parameter: {}", reason),
            JtagError::NotInShiftState(state) => {
                write!(f, "Shift requested while TAP is in {:?}", state)
            }
            JtagError::NotInitialized => write!(f, "JTAG handler is not initialized"),
            JtagError::Transport(error) => write!(f, "Transport failure: {}", error),
            JtagError::Desynchronized => write!(
                f,
                "TAP state is no longer known, the handler must be re-initialized"
            ),
        }
    }
}

impl Error for JtagError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            JtagError::Transport(error) => Some(error),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, JtagError>;

#[test]
fn transport_error_message_carries_completion_code() {
    let err = JtagError::from(TransportError::Rejected {
        completion_code: 0xc1,
    });
    assert_eq!(
        err.to_string(),
        "Transport failure: Remote controller rejected request with completion code 0xc1"
    );
}
