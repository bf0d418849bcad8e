//! Status codes returned by the controller operations.

use std::fmt;

use thiserror::Error;

use crate::clone::CloneError;
use crate::container::ContainerError;
use crate::credentials::CredentialError;
use crate::lock::OperationInProgress;
use crate::params::ParameterError;
use crate::secret_store::SecretStoreError;

/// Class of a controller failure.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Code {
    /// Malformed or contradictory request.
    InvalidArgument,
    /// The same operation is already in flight.
    Aborted,
    /// The addressed volume does not exist.
    NotFound,
    /// The requested capacity exceeds the supported maximum.
    OutOfRange,
    /// A remote call or credential step failed.
    Internal,
    /// The operation is not offered by this controller.
    Unimplemented,
}

impl Code {
    /// Wire spelling of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Aborted => "Aborted",
            Self::NotFound => "NotFound",
            Self::OutOfRange => "OutOfRange",
            Self::Internal => "Internal",
            Self::Unimplemented => "Unimplemented",
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every controller operation.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{code}: {message}")]
pub struct ControllerError {
    /// Failure class.
    pub code: Code,
    /// Human-readable description naming the resources involved.
    pub message: String,
}

impl ControllerError {
    /// Builds an error with an explicit code.
    #[must_use]
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Builds an [`Code::InvalidArgument`] error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }

    /// Builds a [`Code::NotFound`] error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(Code::NotFound, message)
    }

    /// Builds an [`Code::Internal`] error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    /// Builds an [`Code::Unimplemented`] error for `operation`.
    #[must_use]
    pub fn unimplemented(operation: &str) -> Self {
        Self::new(
            Code::Unimplemented,
            format!("{operation} is not yet implemented"),
        )
    }
}

impl From<ParameterError> for ControllerError {
    fn from(err: ParameterError) -> Self {
        Self::invalid_argument(err.to_string())
    }
}

impl From<OperationInProgress> for ControllerError {
    fn from(err: OperationInProgress) -> Self {
        Self::new(Code::Aborted, err.to_string())
    }
}

impl From<ContainerError> for ControllerError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::EmptyName => Self::invalid_argument(err.to_string()),
            ContainerError::Remote { .. } => Self::internal(err.to_string()),
        }
    }
}

impl From<CredentialError> for ControllerError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::MissingAccountName | CredentialError::MissingAccountKey => {
                Self::invalid_argument(err.to_string())
            }
            CredentialError::KeyLookup { .. }
            | CredentialError::InvalidKey { .. }
            | CredentialError::ExpiryOutOfRange
            | CredentialError::Format(_) => Self::internal(err.to_string()),
        }
    }
}

impl From<CloneError> for ControllerError {
    fn from(err: CloneError) -> Self {
        Self::internal(err.to_string())
    }
}

impl From<SecretStoreError> for ControllerError {
    fn from(err: SecretStoreError) -> Self {
        Self::internal(format!("failed to store storage account key: {err}"))
    }
}
