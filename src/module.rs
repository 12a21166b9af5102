//! Kernel Module Handles
//!
//! A [`Module`] owns one native reference to a `struct kmod_module`. The
//! reference is taken when the handle is produced (list traversal, name
//! resolution, [`Clone`]) and dropped exactly once in [`Drop`].
//!
//! ## Accessors
//!
//! | Method | Native call | Failure |
//! |--------|-------------|---------|
//! | `name()` | `kmod_module_get_name` | empty string |
//! | `size()` | `kmod_module_get_size` | `0` |
//! | `info()` | `kmod_module_get_info` | [`KmodError::Info`] |
//! | `path()` | `kmod_module_get_path` | `None` |
//! | `refcount()` | `kmod_module_get_refcnt` | `None` |
//! | `state()` | `kmod_module_get_initstate` | `None` |
//! | `holders()` / `dependencies()` | list getters | empty `Vec` |

use core::fmt;
use std::path::PathBuf;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use crate::context::Session;
use crate::error::KmodError;
use crate::ffi::{self, initstate, KmodLib, RawModule};
use crate::list::{InfoList, ModuleList};

// ============================================================================
// Module State
// ============================================================================

/// Kernel-side state of a module, from `/sys/module/<name>/initstate`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Compiled into the kernel image
    Builtin,
    /// Loaded and initialized
    Live,
    /// Init function still running
    Coming,
    /// Being unloaded
    Going,
}

impl ModuleState {
    fn from_native(state: i32) -> Option<Self> {
        match state {
            initstate::BUILTIN => Some(ModuleState::Builtin),
            initstate::LIVE => Some(ModuleState::Live),
            initstate::COMING => Some(ModuleState::Coming),
            initstate::GOING => Some(ModuleState::Going),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleState::Builtin => write!(f, "builtin"),
            ModuleState::Live => write!(f, "live"),
            ModuleState::Coming => write!(f, "coming"),
            ModuleState::Going => write!(f, "going"),
        }
    }
}

// ============================================================================
// Module Info
// ============================================================================

/// Module metadata (`modinfo`) as key/value pairs in native order.
///
/// Keys may repeat: a module usually carries many `alias` entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInfo {
    entries: Vec<(String, String)>,
}

impl ModuleInfo {
    /// First value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value recorded for `key`, in order
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn author(&self) -> Option<&str> {
        self.get("author")
    }

    pub fn description(&self) -> Option<&str> {
        self.get("description")
    }

    pub fn license(&self) -> Option<&str> {
        self.get("license")
    }

    /// Names listed in the comma-separated `depends` field
    pub fn depends(&self) -> Vec<&str> {
        self.get("depends")
            .map(|deps| deps.split(',').filter(|d| !d.is_empty()).collect())
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for ModuleInfo {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for ModuleInfo {
    type Item = (String, String);
    type IntoIter = std::vec::IntoIter<(String, String)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

// ============================================================================
// Module
// ============================================================================

/// Handle to a kernel module known to libkmod.
///
/// Handles are obtained from a [`Context`](crate::Context). They stay memory
/// safe after the context is released, but [`Module::info`] then fails with
/// [`KmodError::Released`].
pub struct Module {
    raw: NonNull<RawModule>,
    session: Rc<Session>,
}

impl Module {
    /// Wrap a native module reference.
    ///
    /// # Safety
    ///
    /// `raw` must be a module reference the caller owns; it is released when
    /// the returned handle drops.
    pub(crate) unsafe fn from_raw(session: Rc<Session>, raw: NonNull<RawModule>) -> Self {
        Self { raw, session }
    }

    #[inline]
    fn lib(&self) -> &'static KmodLib {
        self.session.lib
    }

    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut RawModule {
        self.raw.as_ptr()
    }

    /// Module name as known to libkmod
    pub fn name(&self) -> String {
        // SAFETY: self.raw is a live reference owned by this handle.
        unsafe { ffi::owned_string((self.lib().kmod_module_get_name)(self.as_ptr())) }
            .unwrap_or_default()
    }

    /// Resident size in bytes (0 when not loaded or unreadable)
    pub fn size(&self) -> u64 {
        // SAFETY: self.raw is a live reference owned by this handle.
        let size = unsafe { (self.lib().kmod_module_get_size)(self.as_ptr()) };
        u64::try_from(size).unwrap_or(0)
    }

    /// Path of the module object file, if it is in the module index
    pub fn path(&self) -> Option<PathBuf> {
        // SAFETY: self.raw is a live reference owned by this handle.
        unsafe { ffi::owned_string((self.lib().kmod_module_get_path)(self.as_ptr())) }
            .map(PathBuf::from)
    }

    /// Kernel use count, `None` when the module is not loaded
    pub fn refcount(&self) -> Option<u32> {
        // SAFETY: self.raw is a live reference owned by this handle.
        let refcnt = unsafe { (self.lib().kmod_module_get_refcnt)(self.as_ptr()) };
        u32::try_from(refcnt).ok()
    }

    /// Kernel-side state, `None` when the module is neither loaded nor builtin
    pub fn state(&self) -> Option<ModuleState> {
        // SAFETY: self.raw is a live reference owned by this handle.
        let state = unsafe { (self.lib().kmod_module_get_initstate)(self.as_ptr()) };
        ModuleState::from_native(state)
    }

    /// Loaded modules that depend on this one
    pub fn holders(&self) -> Vec<Module> {
        // SAFETY: self.raw is live; the returned list is owned by the guard.
        let list = unsafe {
            ModuleList::from_raw(self.lib(), (self.lib().kmod_module_get_holders)(self.as_ptr()))
        };
        list.into_modules(&self.session)
    }

    /// Modules this one depends on, per the module index
    pub fn dependencies(&self) -> Vec<Module> {
        // SAFETY: self.raw is live; the returned list is owned by the guard.
        let list = unsafe {
            ModuleList::from_raw(
                self.lib(),
                (self.lib().kmod_module_get_dependencies)(self.as_ptr()),
            )
        };
        list.into_modules(&self.session)
    }

    /// Read the module's metadata (author, description, license, aliases...).
    ///
    /// A module without metadata yields an empty [`ModuleInfo`].
    pub fn info(&self) -> crate::Result<ModuleInfo> {
        self.session.ensure_live()?;

        let mut head = ptr::null_mut();
        // SAFETY: self.raw is live and head is a valid out-pointer.
        let status = unsafe { (self.lib().kmod_module_get_info)(self.as_ptr(), &mut head) };
        // SAFETY: on any status libkmod either leaves head NULL or hands us the list.
        let list = unsafe { InfoList::from_raw(self.lib(), head) };

        if status < 0 {
            return Err(KmodError::info(self.name(), status));
        }

        Ok(list.into_info())
    }
}

impl Clone for Module {
    fn clone(&self) -> Self {
        // SAFETY: self.raw is live; kmod_module_ref returns the same pointer with one more
        // reference, owned by the new handle.
        unsafe {
            (self.lib().kmod_module_ref)(self.as_ptr());
        }
        Self {
            raw: self.raw,
            session: Rc::clone(&self.session),
        }
    }
}

impl Drop for Module {
    fn drop(&mut self) {
        // SAFETY: this handle owns exactly one reference, released only here.
        unsafe {
            (self.lib().kmod_module_unref)(self.as_ptr());
        }
    }
}

/// Two handles are equal when they reference the same native module
impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Module {}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name())
            .field("size", &self.size())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
