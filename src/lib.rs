//! # kmod-rs
//!
//! **Safe Linux Kernel Module Management over libkmod**
//!
//! A Rust library for listing, inspecting, inserting and removing kernel
//! modules through libkmod, the library behind `modprobe`, `modinfo`,
//! `lsmod` and `rmmod`.
//!
//! ## Features
//!
//! | Feature | Description |
//! |---------|-------------|
//! | **List** | Enumerate loaded modules (`/proc/modules`) |
//! | **Lookup** | Resolve aliases (`modules.alias`, `modprobe.d`) to modules |
//! | **Insert** | Probe a module with its dependencies, like `modprobe` |
//! | **Remove** | Unload a module, like `rmmod` |
//! | **Info** | Read `modinfo` metadata |
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         kmod-rs                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  Context::new()                                             │
//! │         │                                                   │
//! │         ▼                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐      │
//! │  │   Context   │───►│    List     │───►│   Module    │      │
//! │  │ (kmod_ctx)  │    │  adapter    │    │(kmod_module)│      │
//! │  └──────┬──────┘    └─────────────┘    └──────┬──────┘      │
//! │         │                                     │             │
//! │         └──────────────────┬──────────────────┘             │
//! │                            ▼                                │
//! │                    ┌─────────────┐                          │
//! │                    │   libkmod   │                          │
//! │                    │  (dlopen)   │                          │
//! │                    └─────────────┘                          │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kmod::prelude::*;
//!
//! let ctx = Context::new()?;
//!
//! // List all loaded modules
//! for module in ctx.list()? {
//!     println!("{} {}", module.name(), module.size());
//! }
//!
//! // Inspect a specific module
//! let pcspkr = ctx.module_from_name("pcspkr")?;
//! let info = pcspkr.info()?;
//! println!("License: {:?}", info.license());
//!
//! // Insert a module and its dependencies, then remove it
//! ctx.insert("rtl2832")?;
//! ctx.remove("rtl2832")?;
//! ```
//!
//! ## Requirements
//!
//! - Linux with `libkmod.so.2` installed (loaded at runtime)
//! - Root privileges (CAP_SYS_MODULE) for insert and remove
//!
//! ## Resource Discipline
//!
//! Every native handle (session, module, list) is owned by a Rust value and
//! released exactly once in its `Drop`. [`Context::release`] releases the
//! session early; modules obtained before that stay safe to drop.

pub mod config;
pub mod context;
pub mod error;
#[cfg(test)]
mod fake;
mod ffi;
pub mod flags;
mod list;
pub mod module;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{ContextConfig, ContextConfigBuilder};
    pub use crate::context::Context;
    pub use crate::error::KmodError;
    pub use crate::flags::{ProbeFlags, RemoveFlags};
    pub use crate::module::{Module, ModuleInfo, ModuleState};
}

pub use prelude::*;

// ============================================================================
// Common Types
// ============================================================================

/// Result type for kmod operations
pub type Result<T> = core::result::Result<T, KmodError>;

// ============================================================================
// Constants
// ============================================================================

/// Root of the per-release module directories
pub const DEFAULT_MODULE_ROOT: &str = "/lib/modules";

/// modprobe configuration directories libkmod reads by default, in priority order
pub const DEFAULT_CONFIG_PATHS: [&str; 4] = [
    "/etc/modprobe.d",
    "/run/modprobe.d",
    "/usr/local/lib/modprobe.d",
    "/lib/modprobe.d",
];

/// Shared object names tried, in order, when loading libkmod
pub const LIBKMOD_SONAMES: [&str; 2] = ["libkmod.so.2", "libkmod.so"];

// ============================================================================
// Tests
// ============================================================================
