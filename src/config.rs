//! Context Configuration
//!
//! Selects the module directory and the modprobe configuration paths handed
//! to `kmod_new(3)`. Leaving a field unset keeps libkmod's default.
//!
//! | Field | Default |
//! |-------|---------|
//! | `module_dir` | `/lib/modules/$(uname -r)` |
//! | `config_paths` | `/etc/modprobe.d`, `/run/modprobe.d`, `/usr/local/lib/modprobe.d`, `/lib/modprobe.d` |

use core::ffi::c_char;
use core::ptr;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::KmodError;

// ============================================================================
// Configuration
// ============================================================================

/// Module directory and modprobe configuration used by a [`Context`](crate::Context)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextConfig {
    /// Directory holding `modules.dep` and friends (`None` = running kernel's)
    pub module_dir: Option<PathBuf>,
    /// Configuration files or directories, in priority order.
    ///
    /// `None` uses libkmod's defaults; `Some(vec![])` disables configuration.
    pub config_paths: Option<Vec<PathBuf>>,
}

impl ContextConfig {
    /// Create a new configuration builder
    pub fn builder() -> ContextConfigBuilder {
        ContextConfigBuilder::new()
    }

    /// Convert to the NUL-terminated strings `kmod_new` expects
    pub(crate) fn to_native(&self) -> Result<NativeConfig, KmodError> {
        let module_dir = self.module_dir.as_deref().map(path_to_cstring).transpose()?;
        let config_paths = self
            .config_paths
            .as_ref()
            .map(|paths| {
                paths
                    .iter()
                    .map(|p| path_to_cstring(p))
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;

        Ok(NativeConfig {
            module_dir,
            config_paths,
        })
    }
}

/// Builder for ContextConfig
#[derive(Debug, Clone)]
pub struct ContextConfigBuilder {
    config: ContextConfig,
}

impl ContextConfigBuilder {
    /// Create a new builder with libkmod defaults
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    /// Set the module directory (e.g. `/lib/modules/6.1.0-13-amd64`)
    pub fn module_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.module_dir = Some(path.into());
        self
    }

    /// Use the module directory of a specific kernel release
    pub fn kernel_release(mut self, release: &str) -> Self {
        self.config.module_dir = Some(Path::new(crate::DEFAULT_MODULE_ROOT).join(release));
        self
    }

    /// Append a configuration file or directory
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config
            .config_paths
            .get_or_insert_with(Vec::new)
            .push(path.into());
        self
    }

    /// Ignore every modprobe configuration file
    pub fn no_config(mut self) -> Self {
        self.config.config_paths = Some(Vec::new());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ContextConfig {
        self.config
    }
}

impl Default for ContextConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Native Form
// ============================================================================

/// Owned C strings backing the `kmod_new` arguments
pub(crate) struct NativeConfig {
    module_dir: Option<CString>,
    config_paths: Option<Vec<CString>>,
}

impl NativeConfig {
    /// `dirname` argument (NULL = default)
    pub(crate) fn module_dir_ptr(&self) -> *const c_char {
        self.module_dir.as_ref().map_or(ptr::null(), |dir| dir.as_ptr())
    }

    /// NULL-terminated `config_paths` array, `None` = default.
    ///
    /// The pointers borrow from `self` and must not outlive it.
    pub(crate) fn config_path_ptrs(&self) -> Option<Vec<*const c_char>> {
        self.config_paths.as_ref().map(|paths| {
            paths
                .iter()
                .map(|p| p.as_ptr())
                .chain(core::iter::once(ptr::null()))
                .collect()
        })
    }
}

fn path_to_cstring(path: &Path) -> Result<CString, KmodError> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| KmodError::InvalidName(path.to_string_lossy().into_owned()))
}
