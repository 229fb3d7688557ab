use std::error::Error as StdError;
use std::io;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    /// Any failure that cannot be confidently attributed to any other error
    /// category in this enum.
    ///
    /// In particular this means that use of Internal is never a guarantee
    /// the error is not, for example due to a user error - merely that it
    /// cannot be confidently determined by the code.
    Internal,

    /// The caller provided invalid input or performed an action that is
    /// unsupported or impossible to complete.
    User,
}

/// Fine-grained condition flags for consumers that want to branch on error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Sector size is not a nonzero multiple of the cipher block size, or
    /// an offset falls outside the addressable range.
    Validation,
    /// `create` was asked to make a file that is already there.
    AlreadyExists,
    /// The file does not exist, or the requested sector lies (partly)
    /// beyond the physically stored data.
    NotFound,
    /// Authentication failed due to an incorrect passphrase, tampering,
    /// corruption, or reading a sector that was never written or was wiped.
    AuthenticationFailed,
    /// Argument has the wrong shape, e.g. sector data of the wrong length.
    InvalidArgument,
    /// The handle is closed, or a cursor operation ran before any seek.
    InvalidState,
    /// Low-level scrypt key derivation failed.
    KeyDerivation,
    /// Input data ended before the expected component could be read.
    TruncatedInput,
    /// Passphrase could not be obtained from the configured reader.
    PassphraseUnavailable,
    /// Interaction with the filesystem, stdin/stdout, or other I/O failed.
    Io,
}

#[derive(Debug, Error)]
#[error("{msg}")]
pub struct EncFileError {
    /// Broad error category, always provided.
    pub category: ErrorCategory,
    /// Optional specific condition tag for consumers that need to
    /// branch their behavior. Any code consuming errors MUST handle
    /// the absence of a defined kind.
    pub kind: Option<ErrorKind>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    msg: String,
    transferred: usize,
}

impl EncFileError {
    /// Creates a new error with a required category and display message.
    pub fn new(category: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: None,
            source: None,
            msg: msg.into(),
            transferred: 0,
        }
    }

    /// Creates a new error that also tags the failure with a kind.
    pub fn with_kind(category: ErrorCategory, kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: None,
            msg: msg.into(),
            transferred: 0,
        }
    }

    /// Creates a new error that carries both a kind tag and the originating source error.
    pub fn with_kind_and_source(
        category: ErrorCategory,
        kind: ErrorKind,
        msg: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self {
            category,
            kind: Some(kind),
            source: Some(Box::new(source)),
            msg: msg.into(),
            transferred: 0,
        }
    }

    /// Wraps an I/O failure of the underlying storage.
    pub fn io(msg: impl Into<String>, err: io::Error) -> Self {
        Self::with_kind_and_source(ErrorCategory::Internal, ErrorKind::Io, msg, err)
    }

    /// Shorthand for an authentication failure.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::with_kind(ErrorCategory::User, ErrorKind::AuthenticationFailed, msg)
    }

    /// Shorthand for an operation on a closed handle.
    pub fn closed() -> Self {
        Self::with_kind(
            ErrorCategory::User,
            ErrorKind::InvalidState,
            "encrypted file handle is closed",
        )
    }

    /// The user-facing message carried by the error.
    pub fn message(&self) -> &str {
        &self.msg
    }

    /// Returns the preserved source error if present.
    pub fn source_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    /// True if the error is tagged with `kind`.
    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == Some(kind)
    }

    /// Bytes moved by a multi-sector transfer before it failed.
    pub fn transferred(&self) -> usize {
        self.transferred
    }

    /// Records how many bytes a partial transfer moved before this error.
    pub fn with_transferred(mut self, transferred: usize) -> Self {
        self.transferred = transferred;
        self
    }

    /// Wraps the current error with a higher-level message while preserving the original as source.
    pub fn with_context(self, msg: impl Into<String>) -> Self {
        let category = self.category;
        let kind = self.kind;
        let transferred = self.transferred;
        Self {
            category,
            kind,
            source: Some(Box::new(self)),
            msg: msg.into(),
            transferred,
        }
    }
}

impl From<EncFileError> for io::Error {
    fn from(err: EncFileError) -> Self {
        let kind = match err.kind {
            Some(ErrorKind::NotFound) => io::ErrorKind::NotFound,
            Some(ErrorKind::AlreadyExists) => io::ErrorKind::AlreadyExists,
            Some(ErrorKind::AuthenticationFailed) | Some(ErrorKind::TruncatedInput) => {
                io::ErrorKind::InvalidData
            }
            Some(ErrorKind::Validation) | Some(ErrorKind::InvalidArgument) => {
                io::ErrorKind::InvalidInput
            }
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, EncFileError>;
