//! Error types for kmod operations.
//!
//! Every negative status returned by libkmod is converted at the call site
//! into a [`KmodError`] carrying the positive errno and its rendered message,
//! plus the module or query involved where there is one.

use core::ffi::{c_char, c_int};
use std::ffi::CStr;

use thiserror::Error;

/// Errors returned by [`Context`](crate::Context) and [`Module`](crate::Module) operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KmodError {
    /// libkmod could not be loaded or is missing a required symbol
    #[error("libkmod unavailable: {0}")]
    LibraryUnavailable(String),

    /// The native session could not be created
    #[error("unable to create the kmod context")]
    Init,

    /// Module indexes or modprobe configuration could not be loaded
    #[error("unable to load kmod resources: {reason}")]
    ResourceLoad {
        /// Positive errno reported by libkmod
        errno: i32,
        /// Rendered errno message
        reason: String,
    },

    /// Enumeration of loaded modules or alias lookup failed
    #[error("failed to query {query}: {reason}")]
    Query {
        /// What was being queried (`loaded modules` or `alias <name>`)
        query: String,
        /// Positive errno reported by libkmod
        errno: i32,
        /// Rendered errno message
        reason: String,
    },

    /// Exact-name resolution failed
    #[error("could not get module {name}: {reason}")]
    NotFound {
        /// Requested module name
        name: String,
        /// Positive errno reported by libkmod
        errno: i32,
        /// Rendered errno message
        reason: String,
    },

    /// Inserting a module (or one of its dependencies) failed
    #[error("could not insert module {module}: {reason}")]
    Insert {
        /// Module that failed to insert
        module: String,
        /// Positive errno reported by libkmod
        errno: i32,
        /// Rendered errno message
        reason: String,
    },

    /// Removing a module failed
    #[error("could not remove module {module}: {reason}")]
    Remove {
        /// Module that failed to be removed
        module: String,
        /// Positive errno reported by libkmod
        errno: i32,
        /// Rendered errno message
        reason: String,
    },

    /// Module metadata could not be read
    #[error("could not read info of module {module}: {reason}")]
    Info {
        /// Module whose metadata was requested
        module: String,
        /// Positive errno reported by libkmod
        errno: i32,
        /// Rendered errno message
        reason: String,
    },

    /// The owning context has already been released
    #[error("kmod context already released")]
    Released,

    /// A name or path contains an interior NUL byte
    #[error("invalid name {0:?}: contains a NUL byte")]
    InvalidName(String),
}

impl KmodError {
    /// Errno carried by this error, if it came from libkmod
    pub fn errno(&self) -> Option<i32> {
        match self {
            KmodError::ResourceLoad { errno, .. }
            | KmodError::Query { errno, .. }
            | KmodError::NotFound { errno, .. }
            | KmodError::Insert { errno, .. }
            | KmodError::Remove { errno, .. }
            | KmodError::Info { errno, .. } => Some(*errno),
            KmodError::LibraryUnavailable(_)
            | KmodError::Init
            | KmodError::Released
            | KmodError::InvalidName(_) => None,
        }
    }

    pub(crate) fn resource_load(status: c_int) -> Self {
        let errno = errno_from_status(status);
        KmodError::ResourceLoad {
            errno,
            reason: strerror(errno),
        }
    }

    pub(crate) fn query(query: impl Into<String>, status: c_int) -> Self {
        let errno = errno_from_status(status);
        KmodError::Query {
            query: query.into(),
            errno,
            reason: strerror(errno),
        }
    }

    pub(crate) fn not_found(name: impl Into<String>, status: c_int) -> Self {
        let errno = errno_from_status(status);
        KmodError::NotFound {
            name: name.into(),
            errno,
            reason: strerror(errno),
        }
    }

    pub(crate) fn insert(module: impl Into<String>, status: c_int) -> Self {
        let errno = errno_from_status(status);
        KmodError::Insert {
            module: module.into(),
            errno,
            reason: strerror(errno),
        }
    }

    pub(crate) fn remove(module: impl Into<String>, status: c_int) -> Self {
        let errno = errno_from_status(status);
        KmodError::Remove {
            module: module.into(),
            errno,
            reason: strerror(errno),
        }
    }

    pub(crate) fn info(module: impl Into<String>, status: c_int) -> Self {
        let errno = errno_from_status(status);
        KmodError::Info {
            module: module.into(),
            errno,
            reason: strerror(errno),
        }
    }
}

/// libkmod reports failures as negated errno values
fn errno_from_status(status: c_int) -> i32 {
    status.saturating_abs()
}

/// Render an errno value as the C library's message for it.
///
/// ```
/// assert_eq!(kmod::error::strerror(2), "No such file or directory");
/// ```
pub fn strerror(errno: i32) -> String {
    let mut buf = [0 as c_char; 256];
    // SAFETY: buf is a writable buffer of the advertised length; strerror_r always
    // NUL-terminates within it on success.
    let rc = unsafe { libc::strerror_r(errno, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return format!("Unknown error {}", errno);
    }
    // SAFETY: on success buf holds a NUL-terminated message.
    unsafe { CStr::from_ptr(buf.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

// ============================================================================
// Tests
// ============================================================================
