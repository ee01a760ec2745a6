//! Error types for the service locator.
//!
//! # Rust Learning Note
//!
//! A lookup that finds nothing is **not** an error here. It is modelled as
//! `Option<CapabilityHandle>` and only escalated into `Error::NotFound` by the
//! `*_or_throw` family. Everything in this enum is a real failure.
//!
//! ```rust
//! use svcmgr_common::{Error, Result};
//!
//! fn resolve(name: &str) -> Result<u32> {
//!     Err(Error::not_found(name))
//! }
//!
//! fn caller() -> Result<()> {
//!     // `?` propagates the error to our caller
//!     let _handle = resolve("storage.default")?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Result type alias for svcmgr operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for svcmgr operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No service is published under this name.
    #[error("No service published for: {name}")]
    NotFound {
        name: String,
    },

    /// The authority could not be reached, rejected the call, or the target
    /// object is gone.
    #[error("Transport failure: {message}")]
    Transport {
        message: String,
    },

    /// A wait was requested for a name no manifest entry declares.
    #[error("Service is not declared in the manifest: {name}")]
    DeclarationMismatch {
        name: String,
    },

    /// Service name failed validation.
    #[error("Invalid service name '{name}': {reason}")]
    InvalidName {
        name: String,
        reason: String,
    },

    /// A stub received a code none of its operations answers to.
    #[error("Unknown transaction code {code} for {descriptor}")]
    UnknownTransaction {
        descriptor: String,
        code: u32,
    },

    /// The interface token in a request did not match the stub descriptor.
    #[error("Descriptor mismatch: expected {expected}, got {actual}")]
    DescriptorMismatch {
        expected: String,
        actual: String,
    },

    /// The service cache was already populated when a bulk seed was attempted.
    #[error("Service cache may only be initialized once (holds {entries} entries)")]
    CacheAlreadyInitialized {
        entries: usize,
    },

    /// A bounded wait ran out of time.
    #[error("Timed out after {millis} ms waiting for service: {name}")]
    Timeout {
        name: String,
        millis: u64,
    },

    /// A wait was cancelled by its caller.
    #[error("Wait cancelled for service: {name}")]
    Cancelled {
        name: String,
    },

    /// Generic error with context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a NotFound error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Creates a Transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a DeclarationMismatch error.
    pub fn declaration_mismatch(name: impl Into<String>) -> Self {
        Self::DeclarationMismatch { name: name.into() }
    }

    /// Creates an InvalidName error.
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_transaction(descriptor: impl Into<String>, code: u32) -> Self {
        Self::UnknownTransaction {
            descriptor: descriptor.into(),
            code,
        }
    }

    pub fn descriptor_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::DescriptorMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Returns true if this error came from the transport layer.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::Transport { .. } => true,
            Error::WithContext { source, .. } => source.is_transport(),
            _ => false,
        }
    }

    /// Adds context to an error.
    ///
    /// # Example
    /// ```
    /// use svcmgr_common::{Error, Result};
    ///
    /// fn inner() -> Result<()> {
    ///     Err(Error::transport("connection reset"))
    /// }
    ///
    /// fn outer() -> Result<()> {
    ///     inner().map_err(|e| e.context("Failed to publish storage.default"))
    /// }
    ///
    /// assert!(outer().unwrap_err().is_transport());
    /// ```
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

// Convenience methods for Result types
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}
