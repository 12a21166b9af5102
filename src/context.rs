//! kmod Context and Module Operations
//!
//! [`Context`] owns one libkmod session (`struct kmod_ctx`) and exposes the
//! module verbs on top of it.
//!
//! ## Lifecycle
//!
//! ```text
//! Context::new() ──► list() / lookup() / module_from_name()
//!   (kmod_new +          insert() / remove()
//!    load_resources)           │
//!                              ▼
//!                  release()  or  Drop   (unload_resources + unref, once)
//! ```
//!
//! ## Batch Semantics
//!
//! [`Context::insert`] and [`Context::remove`] resolve a name through alias
//! lookup and then act on every matching module in order. They stop at the
//! first failure and do **not** roll back modules already inserted or removed
//! by the same call. Re-[`list`](Context::list) when the exact end state
//! matters.
//!
//! ## Threads
//!
//! libkmod sessions are not reentrant. `Context` and [`Module`] are neither
//! `Send` nor `Sync`, so a context and its handles stay on the thread that
//! created them.

use std::cell::Cell;
use std::ffi::CString;
use std::ptr::{self, NonNull};
use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::{ContextConfig, NativeConfig};
use crate::error::KmodError;
use crate::ffi::{self, KmodLib, RawCtx};
use crate::flags::{ProbeFlags, RemoveFlags};
use crate::list::ModuleList;
use crate::module::Module;

// ============================================================================
// Session
// ============================================================================

/// Native session shared between a context and the modules it produced.
///
/// The pointer is nulled on release so later operations fail cleanly.
pub(crate) struct Session {
    pub(crate) lib: &'static KmodLib,
    ctx: Cell<*mut RawCtx>,
}

impl Session {
    /// Live session pointer, or `Released`
    pub(crate) fn ensure_live(&self) -> crate::Result<*mut RawCtx> {
        let ctx = self.ctx.get();
        if ctx.is_null() {
            Err(KmodError::Released)
        } else {
            Ok(ctx)
        }
    }

    fn is_released(&self) -> bool {
        self.ctx.get().is_null()
    }

    /// Unload resources and drop the session reference; no-op once released
    fn release(&self) {
        let ctx = self.ctx.replace(ptr::null_mut());
        if ctx.is_null() {
            return;
        }
        // SAFETY: ctx was produced by kmod_new and this is the only place that gives up
        // the context's reference. Modules hold their own native references to ctx.
        unsafe {
            (self.lib.kmod_unload_resources)(ctx);
            (self.lib.kmod_unref)(ctx);
        }
        debug!("kmod context released");
    }
}

// ============================================================================
// Context
// ============================================================================

/// libkmod session with loaded module indexes and modprobe configuration
pub struct Context {
    session: Rc<Session>,
    config: ContextConfig,
}

impl Context {
    /// Create a context for the running kernel with default configuration.
    ///
    /// Searches `/lib/modules/$(uname -r)` and reads `/etc/modprobe.d`,
    /// `/run/modprobe.d`, `/usr/local/lib/modprobe.d` and `/lib/modprobe.d`.
    pub fn new() -> crate::Result<Self> {
        Self::with_config(ContextConfig::default())
    }

    /// Create a context with an explicit module directory and config paths
    pub fn with_config(config: ContextConfig) -> crate::Result<Self> {
        let native = config.to_native()?;
        Self::open(ffi::libkmod()?, config, native)
    }

    /// Create and load a session through the given symbol table
    pub(crate) fn open(
        lib: &'static KmodLib,
        config: ContextConfig,
        native: NativeConfig,
    ) -> crate::Result<Self> {
        let config_ptrs = native.config_path_ptrs();
        // SAFETY: both arguments are NULL or NUL-terminated strings (and a NULL-terminated
        // array) borrowed from native/config_ptrs, which outlive the call. kmod_new copies
        // what it keeps.
        let ctx = unsafe {
            (lib.kmod_new)(
                native.module_dir_ptr(),
                config_ptrs.as_ref().map_or(ptr::null(), |p| p.as_ptr()),
            )
        };
        if ctx.is_null() {
            return Err(KmodError::Init);
        }

        // From here on Drop releases the session on every exit path.
        let context = Self {
            session: Rc::new(Session {
                lib,
                ctx: Cell::new(ctx),
            }),
            config,
        };

        // SAFETY: ctx is a live session.
        let status = unsafe { (lib.kmod_load_resources)(ctx) };
        if status < 0 {
            return Err(KmodError::resource_load(status));
        }

        debug!(
            module_dir = ?context.config.module_dir,
            config_paths = ?context.config.config_paths,
            "kmod context created"
        );
        Ok(context)
    }

    /// Configuration this context was created with
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Unload resources and release the native session.
    ///
    /// Idempotent: later calls do nothing. Every other operation fails with
    /// [`KmodError::Released`] afterwards. Also runs on drop.
    pub fn release(&mut self) {
        self.session.release();
    }

    /// True once [`release`](Self::release) has run
    pub fn is_released(&self) -> bool {
        self.session.is_released()
    }

    #[inline]
    fn lib(&self) -> &'static KmodLib {
        self.session.lib
    }

    /// All currently loaded modules, in `/proc/modules` order
    pub fn list(&self) -> crate::Result<Vec<Module>> {
        let ctx = self.session.ensure_live()?;

        let mut head = ptr::null_mut();
        // SAFETY: ctx is live and head is a valid out-pointer.
        let status = unsafe { (self.lib().kmod_module_new_from_loaded)(ctx, &mut head) };
        // SAFETY: whatever libkmod left in head is ours to free.
        let list = unsafe { ModuleList::from_raw(self.lib(), head) };
        if status < 0 {
            return Err(KmodError::query("loaded modules", status));
        }

        let modules = list.into_modules(&self.session);
        trace!(count = modules.len(), "listed loaded modules");
        Ok(modules)
    }

    /// Modules matching `alias_name` after alias expansion.
    ///
    /// No match is not an error: the result is simply empty.
    pub fn lookup(&self, alias_name: &str) -> crate::Result<Vec<Module>> {
        let ctx = self.session.ensure_live()?;
        let alias = c_name(alias_name)?;

        let mut head = ptr::null_mut();
        // SAFETY: ctx is live, alias is NUL-terminated and head is a valid out-pointer.
        let status =
            unsafe { (self.lib().kmod_module_new_from_lookup)(ctx, alias.as_ptr(), &mut head) };
        // SAFETY: whatever libkmod left in head is ours to free.
        let list = unsafe { ModuleList::from_raw(self.lib(), head) };
        if status < 0 {
            return Err(KmodError::query(format!("alias {}", alias_name), status));
        }

        let modules = list.into_modules(&self.session);
        trace!(alias = alias_name, count = modules.len(), "alias lookup");
        Ok(modules)
    }

    /// Resolve exactly one module by name, without alias expansion.
    ///
    /// Fails with [`KmodError::NotFound`] unless the module is loaded,
    /// builtin, or present in the module index.
    pub fn module_from_name(&self, name: &str) -> crate::Result<Module> {
        let ctx = self.session.ensure_live()?;
        let c_module = c_name(name)?;

        let mut raw = ptr::null_mut();
        // SAFETY: ctx is live, c_module is NUL-terminated and raw is a valid out-pointer.
        let status =
            unsafe { (self.lib().kmod_module_new_from_name)(ctx, c_module.as_ptr(), &mut raw) };
        if status < 0 {
            return Err(KmodError::not_found(name, status));
        }
        let raw = NonNull::new(raw).ok_or_else(|| KmodError::not_found(name, -libc::ENOENT))?;
        // SAFETY: kmod_module_new_from_name handed us a new reference.
        let module = unsafe { Module::from_raw(Rc::clone(&self.session), raw) };

        // libkmod creates a handle for any name; only keep ones backed by something real
        if module.state().is_none() && module.path().is_none() {
            return Err(KmodError::not_found(name, -libc::ENOENT));
        }

        Ok(module)
    }

    /// Insert `name` and its dependencies, like `modprobe name`.
    ///
    /// Every module the name resolves to is probed in order. The call stops
    /// at the first failure; modules inserted before it stay loaded.
    pub fn insert(&self, name: &str) -> crate::Result<()> {
        self.insert_with(name, ProbeFlags::NONE)
    }

    /// [`insert`](Self::insert) with explicit probe flags
    pub fn insert_with(&self, name: &str, flags: ProbeFlags) -> crate::Result<()> {
        let modules = self.lookup(name)?;
        if modules.is_empty() {
            return Err(KmodError::insert(name, -libc::ENODEV));
        }

        for module in &modules {
            debug!(module = %module.name(), flags = flags.bits(), "inserting module");
            // SAFETY: module holds a live reference; no options string, install callback,
            // callback data or print callback are passed.
            let status = unsafe {
                (self.lib().kmod_module_probe_insert_module)(
                    module.as_ptr(),
                    flags.bits(),
                    ptr::null(),
                    None,
                    ptr::null(),
                    None,
                )
            };
            if status < 0 {
                return Err(KmodError::insert(module.name(), status));
            }
            if status > 0 && flags.applies_blacklist() {
                debug!(module = %module.name(), status, "insert skipped by blacklist");
            }
        }

        Ok(())
    }

    /// Remove every module `name` resolves to, like `modprobe -r name`
    /// without dependency removal.
    ///
    /// Stops at the first failure; modules removed before it stay removed.
    /// Removing a module that is not loaded is an error.
    pub fn remove(&self, name: &str) -> crate::Result<()> {
        self.remove_with(name, RemoveFlags::NONE)
    }

    /// [`remove`](Self::remove) with explicit remove flags
    pub fn remove_with(&self, name: &str, flags: RemoveFlags) -> crate::Result<()> {
        let modules = self.lookup(name)?;
        if modules.is_empty() {
            return Err(KmodError::remove(name, -libc::ENODEV));
        }

        for module in &modules {
            debug!(module = %module.name(), flags = flags.bits(), "removing module");
            // SAFETY: module holds a live reference.
            let status =
                unsafe { (self.lib().kmod_module_remove_module)(module.as_ptr(), flags.bits()) };
            if status < 0 {
                return Err(KmodError::remove(module.name(), status));
            }
        }

        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.release();
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.config)
            .field("released", &self.is_released())
            .finish()
    }
}

fn c_name(name: &str) -> crate::Result<CString> {
    CString::new(name).map_err(|_| KmodError::InvalidName(name.to_string()))
}

// ============================================================================
// Tests
// ============================================================================
