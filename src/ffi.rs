//! Native libkmod Surface
//!
//! libkmod is resolved at runtime with `dlopen(3)` instead of being linked at
//! build time. The crate therefore builds on hosts without the libkmod
//! development package, and a missing library surfaces as
//! [`KmodError::LibraryUnavailable`] from [`Context::new`](crate::Context::new)
//! rather than as a link failure.
//!
//! ## Symbols
//!
//! | Group | Functions |
//! |-------|-----------|
//! | Session | `kmod_new`, `kmod_unref`, `kmod_load_resources`, `kmod_unload_resources` |
//! | Resolution | `kmod_module_new_from_loaded`, `kmod_module_new_from_lookup`, `kmod_module_new_from_name` |
//! | Mutation | `kmod_module_probe_insert_module`, `kmod_module_remove_module` |
//! | Introspection | `kmod_module_get_{name,path,size,refcnt,initstate,holders,dependencies,info}` |
//! | Lists | `kmod_list_next`, `kmod_module_get_module`, `kmod_module_unref_list`, `kmod_module_info_*` |
//!
//! The library handle is never closed: resolved function pointers stay valid
//! for the lifetime of the process.

use core::ffi::{c_char, c_int, c_long, c_uint, c_void};
use core::marker::{PhantomData, PhantomPinned};
use std::ffi::{CStr, CString};
use std::sync::OnceLock;

use crate::error::KmodError;

// ============================================================================
// Opaque Native Types
// ============================================================================

/// `struct kmod_ctx`
#[repr(C)]
pub(crate) struct RawCtx {
    _opaque: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// `struct kmod_module`
#[repr(C)]
pub(crate) struct RawModule {
    _opaque: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// `struct kmod_list`
#[repr(C)]
pub(crate) struct RawList {
    _opaque: [u8; 0],
    _marker: PhantomData<(*mut u8, PhantomPinned)>,
}

/// `enum kmod_module_initstate`
pub(crate) mod initstate {
    use core::ffi::c_int;
    pub const BUILTIN: c_int = 0;
    pub const LIVE: c_int = 1;
    pub const COMING: c_int = 2;
    pub const GOING: c_int = 3;
}

/// `run_install` callback of `kmod_module_probe_insert_module`
pub(crate) type RunInstallFn =
    Option<unsafe extern "C" fn(*mut RawModule, *const c_char, *mut c_void) -> c_int>;

/// `print_action` callback of `kmod_module_probe_insert_module`
pub(crate) type PrintActionFn = Option<unsafe extern "C" fn(*mut RawModule, bool, *const c_char)>;

// ============================================================================
// Symbol Table
// ============================================================================

/// Function pointers resolved from the loaded libkmod shared object.
///
/// Every field mirrors the prototype of the libkmod export of the same name.
pub(crate) struct KmodLib {
    pub kmod_new: unsafe extern "C" fn(*const c_char, *const *const c_char) -> *mut RawCtx,
    pub kmod_unref: unsafe extern "C" fn(*mut RawCtx) -> *mut RawCtx,
    pub kmod_load_resources: unsafe extern "C" fn(*mut RawCtx) -> c_int,
    pub kmod_unload_resources: unsafe extern "C" fn(*mut RawCtx),

    pub kmod_module_new_from_loaded:
        unsafe extern "C" fn(*const RawCtx, *mut *mut RawList) -> c_int,
    pub kmod_module_new_from_lookup:
        unsafe extern "C" fn(*mut RawCtx, *const c_char, *mut *mut RawList) -> c_int,
    pub kmod_module_new_from_name:
        unsafe extern "C" fn(*mut RawCtx, *const c_char, *mut *mut RawModule) -> c_int,

    pub kmod_module_ref: unsafe extern "C" fn(*mut RawModule) -> *mut RawModule,
    pub kmod_module_unref: unsafe extern "C" fn(*mut RawModule) -> *mut RawModule,
    pub kmod_module_unref_list: unsafe extern "C" fn(*mut RawList) -> c_int,
    pub kmod_module_get_module: unsafe extern "C" fn(*const RawList) -> *mut RawModule,
    pub kmod_list_next: unsafe extern "C" fn(*const RawList, *const RawList) -> *mut RawList,

    pub kmod_module_probe_insert_module: unsafe extern "C" fn(
        *mut RawModule,
        c_uint,
        *const c_char,
        RunInstallFn,
        *const c_void,
        PrintActionFn,
    ) -> c_int,
    pub kmod_module_remove_module: unsafe extern "C" fn(*mut RawModule, c_uint) -> c_int,

    pub kmod_module_get_name: unsafe extern "C" fn(*const RawModule) -> *const c_char,
    pub kmod_module_get_path: unsafe extern "C" fn(*const RawModule) -> *const c_char,
    pub kmod_module_get_size: unsafe extern "C" fn(*const RawModule) -> c_long,
    pub kmod_module_get_refcnt: unsafe extern "C" fn(*const RawModule) -> c_int,
    pub kmod_module_get_initstate: unsafe extern "C" fn(*const RawModule) -> c_int,
    pub kmod_module_get_holders: unsafe extern "C" fn(*const RawModule) -> *mut RawList,
    pub kmod_module_get_dependencies: unsafe extern "C" fn(*const RawModule) -> *mut RawList,

    pub kmod_module_get_info: unsafe extern "C" fn(*const RawModule, *mut *mut RawList) -> c_int,
    pub kmod_module_info_get_key: unsafe extern "C" fn(*const RawList) -> *const c_char,
    pub kmod_module_info_get_value: unsafe extern "C" fn(*const RawList) -> *const c_char,
    pub kmod_module_info_free_list: unsafe extern "C" fn(*mut RawList),
}

/// Resolve each named export into the matching `KmodLib` field, returning
/// early from the enclosing function when a symbol is missing.
macro_rules! resolve_symbols {
    ($handle:expr, { $($name:ident),+ $(,)? }) => {
        KmodLib {
            $(
                $name: {
                    let symbol = concat!(stringify!($name), "\0");
                    // SAFETY: handle is a live dlopen handle and symbol is a NUL-terminated
                    // literal.
                    let ptr = unsafe { libc::dlsym($handle, symbol.as_ptr().cast()) };
                    if ptr.is_null() {
                        return Err(format!("missing symbol {}", stringify!($name)));
                    }
                    // SAFETY: ptr is the libkmod export of the same name and the field type
                    // mirrors its prototype in libkmod.h; fn pointers and data pointers share
                    // size and representation on every platform libkmod supports.
                    unsafe { core::mem::transmute::<*mut c_void, _>(ptr) }
                },
            )+
        }
    };
}

impl KmodLib {
    /// Open the first loadable libkmod soname and resolve the symbol table
    fn open() -> Result<Self, String> {
        let handle = crate::LIBKMOD_SONAMES
            .iter()
            .find_map(|soname| {
                let soname = CString::new(*soname).ok()?;
                // SAFETY: soname is a valid NUL-terminated string for the duration of the call.
                let handle =
                    unsafe { libc::dlopen(soname.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
                (!handle.is_null()).then_some(handle)
            })
            .ok_or_else(dlerror_message)?;

        Ok(resolve_symbols!(handle, {
            kmod_new,
            kmod_unref,
            kmod_load_resources,
            kmod_unload_resources,
            kmod_module_new_from_loaded,
            kmod_module_new_from_lookup,
            kmod_module_new_from_name,
            kmod_module_ref,
            kmod_module_unref,
            kmod_module_unref_list,
            kmod_module_get_module,
            kmod_list_next,
            kmod_module_probe_insert_module,
            kmod_module_remove_module,
            kmod_module_get_name,
            kmod_module_get_path,
            kmod_module_get_size,
            kmod_module_get_refcnt,
            kmod_module_get_initstate,
            kmod_module_get_holders,
            kmod_module_get_dependencies,
            kmod_module_get_info,
            kmod_module_info_get_key,
            kmod_module_info_get_value,
            kmod_module_info_free_list,
        }))
    }
}

static LIBKMOD: OnceLock<Result<KmodLib, String>> = OnceLock::new();

/// Process-wide libkmod symbol table, loaded on first use
pub(crate) fn libkmod() -> Result<&'static KmodLib, KmodError> {
    LIBKMOD
        .get_or_init(KmodLib::open)
        .as_ref()
        .map_err(|msg| KmodError::LibraryUnavailable(msg.clone()))
}

fn dlerror_message() -> String {
    // SAFETY: dlerror returns NULL or a thread-local NUL-terminated message that stays valid
    // until the next dl* call on this thread; it is copied out immediately.
    let msg = unsafe { libc::dlerror() };
    if msg.is_null() {
        format!("none of {} could be loaded", crate::LIBKMOD_SONAMES.join(", "))
    } else {
        // SAFETY: msg is non-null and NUL-terminated (see above).
        unsafe { CStr::from_ptr(msg) }.to_string_lossy().into_owned()
    }
}

/// Copy a borrowed native string into an owned `String`.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that stays valid for
/// the duration of the call.
pub(crate) unsafe fn owned_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
    }
}
