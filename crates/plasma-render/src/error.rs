// SPDX-License-Identifier: CEPL-1.0
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Signed status code reported at every device boundary.
/// Negative values are failures, zero and above are success.
#[repr(i16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultCode {
    Success = 0,
    Failure = -1,
    NotSupported = -2,
    OutOfMemory = -3,
    InvalidArgument = -4,
    InitializationFailed = -5,
    NotFound = -6,
    AccessDenied = -7,
    Timeout = -8,
    ExtendedError = -9,
}

impl ResultCode {
    pub fn raw(self) -> i16 {
        self as i16
    }

    pub fn is_success(self) -> bool {
        self.raw() >= 0
    }

    pub fn is_failure(self) -> bool {
        self.raw() < 0
    }

    pub fn describe(self) -> &'static str {
        match self {
            ResultCode::Success => "success",
            ResultCode::Failure => "generic failure",
            ResultCode::NotSupported => "not supported",
            ResultCode::OutOfMemory => "out of memory",
            ResultCode::InvalidArgument => "invalid argument",
            ResultCode::InitializationFailed => "initialization failed",
            ResultCode::NotFound => "not found",
            ResultCode::AccessDenied => "access denied",
            ResultCode::Timeout => "timed out",
            ResultCode::ExtendedError => "extended error",
        }
    }

    /// Collapses a boundary result into its status code.
    pub fn of<T>(result: &Result<T, RenderError>) -> ResultCode {
        match result {
            Ok(_) => ResultCode::Success,
            Err(e) => e.code(),
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.describe(), self.raw())
    }
}

impl TryFrom<i16> for ResultCode {
    type Error = i16;

    fn try_from(raw: i16) -> Result<Self, Self::Error> {
        Ok(match raw {
            0 => ResultCode::Success,
            -1 => ResultCode::Failure,
            -2 => ResultCode::NotSupported,
            -3 => ResultCode::OutOfMemory,
            -4 => ResultCode::InvalidArgument,
            -5 => ResultCode::InitializationFailed,
            -6 => ResultCode::NotFound,
            -7 => ResultCode::AccessDenied,
            -8 => ResultCode::Timeout,
            -9 => ResultCode::ExtendedError,
            other => return Err(other),
        })
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("operation failed: {0}")]
    Failure(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("out of memory during {0}")]
    OutOfMemory(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("initialization failed: {0}")]
    InitializationFailed(String),

    #[error("file not found: {}", path.display())]
    NotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("access denied: {}", path.display())]
    AccessDenied {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("timed out waiting on {0}")]
    Timeout(&'static str),

    /// The presentation chain no longer matches its surface and must be rebuilt.
    #[error("presentation chain is out of date")]
    ChainOutOfDate,

    #[error("{call} failed: {detail}")]
    Backend { call: &'static str, detail: String },
}

impl RenderError {
    pub fn code(&self) -> ResultCode {
        match self {
            RenderError::Failure(_) | RenderError::Backend { .. } => ResultCode::Failure,
            RenderError::NotSupported(_) => ResultCode::NotSupported,
            RenderError::OutOfMemory(_) => ResultCode::OutOfMemory,
            RenderError::InvalidArgument(_) => ResultCode::InvalidArgument,
            RenderError::InitializationFailed(_) => ResultCode::InitializationFailed,
            RenderError::NotFound { .. } => ResultCode::NotFound,
            RenderError::AccessDenied { .. } => ResultCode::AccessDenied,
            RenderError::Timeout(_) => ResultCode::Timeout,
            RenderError::ChainOutOfDate => ResultCode::ExtendedError,
        }
    }

    /// True when the caller may simply try the next frame.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, RenderError::ChainOutOfDate | RenderError::Timeout(_))
    }

    /// Maps a filesystem error on `path` onto the matching variant.
    pub fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        match source.kind() {
            io::ErrorKind::NotFound => RenderError::NotFound { path, source },
            io::ErrorKind::PermissionDenied => RenderError::AccessDenied { path, source },
            _ => RenderError::Failure(format!("{}: {source}", path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_their_wire_values() {
        assert_eq!(ResultCode::Success.raw(), 0);
        assert_eq!(ResultCode::InitializationFailed.raw(), -5);
        assert_eq!(ResultCode::ExtendedError.raw(), -9);
        for raw in -9..=0 {
            let code = ResultCode::try_from(raw).unwrap();
            assert_eq!(code.raw(), raw);
            assert_eq!(code.is_failure(), raw < 0);
        }
        assert_eq!(ResultCode::try_from(-10), Err(-10));
        assert_eq!(ResultCode::try_from(3), Err(3));
    }

    #[test]
    fn errors_map_to_codes() {
        assert_eq!(
            RenderError::NotSupported("no adapter".into()).code(),
            ResultCode::NotSupported
        );
        assert_eq!(RenderError::Timeout("fence").code(), ResultCode::Timeout);
        assert_eq!(RenderError::ChainOutOfDate.code(), ResultCode::ExtendedError);
        assert_eq!(
            RenderError::Backend {
                call: "vkQueueSubmit",
                detail: "ERROR_DEVICE_LOST".into()
            }
            .code(),
            ResultCode::Failure
        );
        assert_eq!(ResultCode::of::<()>(&Ok(())), ResultCode::Success);
    }

    #[test]
    fn io_errors_split_by_kind() {
        let missing = RenderError::from_io(
            "shaders/vert.spv",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(missing.code(), ResultCode::NotFound);
        assert!(missing.to_string().contains("shaders/vert.spv"));

        let denied = RenderError::from_io(
            "shaders/frag.spv",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(denied.code(), ResultCode::AccessDenied);
    }

    #[test]
    fn only_stale_chain_and_timeouts_are_recoverable() {
        assert!(RenderError::ChainOutOfDate.is_recoverable());
        assert!(RenderError::Timeout("acquire").is_recoverable());
        assert!(!RenderError::Failure("x".into()).is_recoverable());
    }
}
