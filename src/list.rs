//! Native List Adapter
//!
//! libkmod returns results as singly-linked `struct kmod_list` chains. The
//! guards here own such a chain, walk it in native order, and free the
//! scaffolding exactly once when dropped, whether traversal finished or not.
//!
//! ```text
//! head ──► entry ──► entry ──► NULL        kmod_list_next(head, entry)
//!            │         │
//!            ▼         ▼
//!         module    module                 kmod_module_get_module (takes a ref)
//! ```

use std::ptr::NonNull;
use std::rc::Rc;

use crate::context::Session;
use crate::ffi::{self, KmodLib, RawList};
use crate::module::{Module, ModuleInfo};

// ============================================================================
// Traversal
// ============================================================================

/// Iterator over the entries of a native list
struct Entries {
    lib: &'static KmodLib,
    head: *const RawList,
    next: *const RawList,
}

impl Entries {
    fn new(lib: &'static KmodLib, head: *const RawList) -> Self {
        Self {
            lib,
            head,
            next: head,
        }
    }
}

impl Iterator for Entries {
    type Item = *const RawList;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next.is_null() {
            return None;
        }
        let current = self.next;
        // SAFETY: head and current belong to a live list owned by the enclosing guard.
        self.next = unsafe { (self.lib.kmod_list_next)(self.head, current) };
        Some(current)
    }
}

// ============================================================================
// Module List
// ============================================================================

/// Owned list of module entries, released with `kmod_module_unref_list`
pub(crate) struct ModuleList {
    lib: &'static KmodLib,
    head: *mut RawList,
}

impl ModuleList {
    /// Take ownership of a native module list.
    ///
    /// # Safety
    ///
    /// `head` must be null or a module list produced by libkmod that nothing
    /// else will free.
    pub(crate) unsafe fn from_raw(lib: &'static KmodLib, head: *mut RawList) -> Self {
        Self { lib, head }
    }

    /// Acquire a reference to every module in native order, then free the list.
    pub(crate) fn into_modules(self, session: &Rc<Session>) -> Vec<Module> {
        Entries::new(self.lib, self.head)
            .filter_map(|entry| {
                // SAFETY: entry is a node of the list owned by self.
                let raw = unsafe { (self.lib.kmod_module_get_module)(entry) };
                // SAFETY: kmod_module_get_module returned a new reference that the Module
                // now owns.
                NonNull::new(raw).map(|raw| unsafe { Module::from_raw(Rc::clone(session), raw) })
            })
            .collect()
    }
}

impl Drop for ModuleList {
    fn drop(&mut self) {
        if !self.head.is_null() {
            // SAFETY: head is owned by this guard and freed only here; module references
            // taken during traversal are independent of the list.
            unsafe {
                (self.lib.kmod_module_unref_list)(self.head);
            }
        }
    }
}

// ============================================================================
// Info List
// ============================================================================

/// Owned key/value list from `kmod_module_get_info`, released with
/// `kmod_module_info_free_list`
pub(crate) struct InfoList {
    lib: &'static KmodLib,
    head: *mut RawList,
}

impl InfoList {
    /// Take ownership of a native info list.
    ///
    /// # Safety
    ///
    /// `head` must be null or an info list produced by libkmod that nothing
    /// else will free.
    pub(crate) unsafe fn from_raw(lib: &'static KmodLib, head: *mut RawList) -> Self {
        Self { lib, head }
    }

    /// Copy every key/value pair out in native order, then free the list
    pub(crate) fn into_info(self) -> ModuleInfo {
        Entries::new(self.lib, self.head)
            .filter_map(|entry| {
                // SAFETY: entry is a node of the list owned by self; the returned strings live
                // as long as the list and are copied immediately.
                let key = unsafe { ffi::owned_string((self.lib.kmod_module_info_get_key)(entry)) }?;
                let value =
                    unsafe { ffi::owned_string((self.lib.kmod_module_info_get_value)(entry)) };
                Some((key, value.unwrap_or_default()))
            })
            .collect()
    }
}

impl Drop for InfoList {
    fn drop(&mut self) {
        if !self.head.is_null() {
            // SAFETY: head is owned by this guard and freed only here.
            unsafe {
                (self.lib.kmod_module_info_free_list)(self.head);
            }
        }
    }
}
