//! In-process libkmod Stand-in
//!
//! A [`KmodLib`] table whose entries are plain `extern "C"` functions over a
//! thread-local module registry. Unit tests drive `Context` and `Module`
//! through it and then inspect the counters to check reference and list
//! bookkeeping without touching the host's module indexes.
//!
//! | Counter | Moves on |
//! |---------|----------|
//! | `refs()` | +1 per list entry, `get_module`, `new_from_name`, `ref`; -1 per `unref` and per entry of a freed list |
//! | `live_nodes()` | list nodes allocated and not yet freed |
//! | `list_frees()` / `info_frees()` | `kmod_module_unref_list` / `kmod_module_info_free_list` |
//! | `unloads()` / `ctx_unrefs()` | `kmod_unload_resources` / `kmod_unref` |
//! | `inserted()` / `removed()` | names passed to the probe and remove calls, in order |
//!
//! Each test runs on its own thread, so every test sees a fresh registry.

use core::ffi::{c_char, c_int, c_long, c_uint, c_void};
use core::marker::PhantomData;
use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::ptr::{self, NonNull};

use crate::config::ContextConfig;
use crate::context::Context;
use crate::ffi::{initstate, KmodLib, PrintActionFn, RawCtx, RawList, RawModule, RunInstallFn};

// ============================================================================
// Registry
// ============================================================================

struct FakeModule {
    name: CString,
    path: Option<CString>,
    size: c_long,
    initstate: c_int,
    info: Vec<(CString, CString)>,
    info_status: c_int,
    insert_status: c_int,
    remove_status: c_int,
}

impl FakeModule {
    fn new(name: &str) -> Self {
        Self {
            name: cstring(name),
            path: None,
            size: 0,
            initstate: -libc::ENOENT,
            info: Vec::new(),
            info_status: 0,
            insert_status: 0,
            remove_status: 0,
        }
    }
}

/// One `kmod_list` node: a module entry or an info key/value pair
struct Node {
    module: *mut FakeModule,
    key: *const c_char,
    value: *const c_char,
    next: *mut Node,
}

#[derive(Default)]
struct FakeState {
    // boxed so module addresses survive registry growth
    modules: Vec<Box<FakeModule>>,
    aliases: Vec<(String, Vec<String>)>,
    load_status: c_int,
    config_paths: Option<usize>,
    refs: i64,
    live_nodes: i64,
    list_frees: usize,
    info_frees: usize,
    unloads: usize,
    ctx_unrefs: usize,
    inserted: Vec<String>,
    removed: Vec<String>,
}

impl FakeState {
    fn find(&self, name: &str) -> Option<*mut FakeModule> {
        self.modules
            .iter()
            .find(|m| m.name.as_bytes() == name.as_bytes())
            .map(|m| &**m as *const FakeModule as *mut FakeModule)
    }

    fn find_mut(&mut self, name: &str) -> &mut FakeModule {
        if let Some(pos) = self
            .modules
            .iter()
            .position(|m| m.name.as_bytes() == name.as_bytes())
        {
            &mut self.modules[pos]
        } else {
            self.modules.push(Box::new(FakeModule::new(name)));
            let last = self.modules.len() - 1;
            &mut self.modules[last]
        }
    }

    /// Chain module entries; the list holds its own reference to each
    fn module_list(&mut self, modules: &[*mut FakeModule]) -> *mut RawList {
        let mut head: *mut Node = ptr::null_mut();
        for &module in modules.iter().rev() {
            head = Box::into_raw(Box::new(Node {
                module,
                key: ptr::null(),
                value: ptr::null(),
                next: head,
            }));
            self.live_nodes += 1;
            self.refs += 1;
        }
        head.cast()
    }

    fn info_list(&mut self, module: &FakeModule) -> *mut RawList {
        let mut head: *mut Node = ptr::null_mut();
        for (key, value) in module.info.iter().rev() {
            head = Box::into_raw(Box::new(Node {
                module: ptr::null_mut(),
                key: key.as_ptr(),
                value: value.as_ptr(),
                next: head,
            }));
            self.live_nodes += 1;
        }
        head.cast()
    }

    /// Free every node from `head`, returning how many module entries it held
    fn free_nodes(&mut self, head: *mut RawList) -> i64 {
        let mut entries = 0;
        let mut node = head.cast::<Node>();
        while !node.is_null() {
            // SAFETY: every node was produced by Box::into_raw above and is freed once.
            let owned = unsafe { Box::from_raw(node) };
            if !owned.module.is_null() {
                entries += 1;
            }
            self.live_nodes -= 1;
            node = owned.next;
        }
        entries
    }
}

thread_local! {
    static STATE: RefCell<FakeState> = RefCell::new(FakeState::default());
}

fn with_state<R>(f: impl FnOnce(&mut FakeState) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

fn cstring(s: &str) -> CString {
    CString::new(s).unwrap_or_default()
}

/// # Safety
///
/// `raw` must be a module pointer handed out by this fake.
unsafe fn module<'a>(raw: *const RawModule) -> &'a FakeModule {
    &*raw.cast::<FakeModule>()
}

// ============================================================================
// Native Stubs
// ============================================================================

unsafe extern "C" fn kmod_new(_dir: *const c_char, paths: *const *const c_char) -> *mut RawCtx {
    let count = (!paths.is_null()).then(|| {
        let mut n = 0;
        while !(*paths.add(n)).is_null() {
            n += 1;
        }
        n
    });
    with_state(|s| s.config_paths = count);
    NonNull::<RawCtx>::dangling().as_ptr()
}

unsafe extern "C" fn kmod_unref(_ctx: *mut RawCtx) -> *mut RawCtx {
    with_state(|s| s.ctx_unrefs += 1);
    ptr::null_mut()
}

unsafe extern "C" fn kmod_load_resources(_ctx: *mut RawCtx) -> c_int {
    with_state(|s| s.load_status)
}

unsafe extern "C" fn kmod_unload_resources(_ctx: *mut RawCtx) {
    with_state(|s| s.unloads += 1);
}

unsafe extern "C" fn new_from_loaded(_ctx: *const RawCtx, out: *mut *mut RawList) -> c_int {
    with_state(|s| {
        let loaded: Vec<_> = s
            .modules
            .iter()
            .filter(|m| m.initstate >= 0)
            .map(|m| &**m as *const FakeModule as *mut FakeModule)
            .collect();
        *out = s.module_list(&loaded);
    });
    0
}

unsafe extern "C" fn new_from_lookup(
    _ctx: *mut RawCtx,
    alias: *const c_char,
    out: *mut *mut RawList,
) -> c_int {
    let alias = CStr::from_ptr(alias).to_string_lossy().into_owned();
    with_state(|s| {
        let names = match s.aliases.iter().find(|(a, _)| *a == alias) {
            Some((_, names)) => names.clone(),
            None => vec![alias],
        };
        let matches: Vec<_> = names
            .iter()
            .filter_map(|name| s.find(name))
            .filter(|&m| module(m as *const RawModule).path.is_some())
            .collect();
        *out = s.module_list(&matches);
    });
    0
}

unsafe extern "C" fn new_from_name(
    _ctx: *mut RawCtx,
    name: *const c_char,
    out: *mut *mut RawModule,
) -> c_int {
    let name = CStr::from_ptr(name).to_string_lossy().into_owned();
    with_state(|s| {
        let module: *mut FakeModule = s.find_mut(&name);
        s.refs += 1;
        *out = module.cast();
    });
    0
}

unsafe extern "C" fn module_ref(raw: *mut RawModule) -> *mut RawModule {
    with_state(|s| s.refs += 1);
    raw
}

unsafe extern "C" fn module_unref(_raw: *mut RawModule) -> *mut RawModule {
    with_state(|s| s.refs -= 1);
    ptr::null_mut()
}

unsafe extern "C" fn unref_list(head: *mut RawList) -> c_int {
    with_state(|s| {
        let entries = s.free_nodes(head);
        s.refs -= entries;
        s.list_frees += 1;
    });
    0
}

unsafe extern "C" fn get_module(entry: *const RawList) -> *mut RawModule {
    with_state(|s| s.refs += 1);
    (*entry.cast::<Node>()).module.cast()
}

unsafe extern "C" fn list_next(_head: *const RawList, curr: *const RawList) -> *mut RawList {
    (*curr.cast::<Node>()).next.cast()
}

unsafe extern "C" fn probe_insert(
    raw: *mut RawModule,
    _flags: c_uint,
    _options: *const c_char,
    _run_install: RunInstallFn,
    _data: *const c_void,
    _print_action: PrintActionFn,
) -> c_int {
    let module = module(raw);
    let name = module.name.to_string_lossy().into_owned();
    with_state(|s| s.inserted.push(name));
    module.insert_status
}

unsafe extern "C" fn remove_module(raw: *mut RawModule, _flags: c_uint) -> c_int {
    let module = module(raw);
    let name = module.name.to_string_lossy().into_owned();
    with_state(|s| s.removed.push(name));
    module.remove_status
}

unsafe extern "C" fn get_name(raw: *const RawModule) -> *const c_char {
    module(raw).name.as_ptr()
}

unsafe extern "C" fn get_path(raw: *const RawModule) -> *const c_char {
    module(raw).path.as_ref().map_or(ptr::null(), |p| p.as_ptr())
}

unsafe extern "C" fn get_size(raw: *const RawModule) -> c_long {
    module(raw).size
}

unsafe extern "C" fn get_refcnt(raw: *const RawModule) -> c_int {
    let module = module(raw);
    if module.initstate >= 0 {
        0
    } else {
        -libc::ENOENT
    }
}

unsafe extern "C" fn get_initstate(raw: *const RawModule) -> c_int {
    module(raw).initstate
}

unsafe extern "C" fn get_no_list(_raw: *const RawModule) -> *mut RawList {
    ptr::null_mut()
}

/// Hands back the configured entries even when failing, like a partial read
unsafe extern "C" fn get_info(raw: *const RawModule, out: *mut *mut RawList) -> c_int {
    let module = module(raw);
    with_state(|s| *out = s.info_list(module));
    module.info_status
}

unsafe extern "C" fn info_get_key(entry: *const RawList) -> *const c_char {
    (*entry.cast::<Node>()).key
}

unsafe extern "C" fn info_get_value(entry: *const RawList) -> *const c_char {
    (*entry.cast::<Node>()).value
}

unsafe extern "C" fn info_free_list(head: *mut RawList) {
    with_state(|s| {
        s.free_nodes(head);
        s.info_frees += 1;
    });
}

static FAKE_LIB: KmodLib = KmodLib {
    kmod_new,
    kmod_unref,
    kmod_load_resources,
    kmod_unload_resources,
    kmod_module_new_from_loaded: new_from_loaded,
    kmod_module_new_from_lookup: new_from_lookup,
    kmod_module_new_from_name: new_from_name,
    kmod_module_ref: module_ref,
    kmod_module_unref: module_unref,
    kmod_module_unref_list: unref_list,
    kmod_module_get_module: get_module,
    kmod_list_next: list_next,
    kmod_module_probe_insert_module: probe_insert,
    kmod_module_remove_module: remove_module,
    kmod_module_get_name: get_name,
    kmod_module_get_path: get_path,
    kmod_module_get_size: get_size,
    kmod_module_get_refcnt: get_refcnt,
    kmod_module_get_initstate: get_initstate,
    kmod_module_get_holders: get_no_list,
    kmod_module_get_dependencies: get_no_list,
    kmod_module_get_info: get_info,
    kmod_module_info_get_key: info_get_key,
    kmod_module_info_get_value: info_get_value,
    kmod_module_info_free_list: info_free_list,
};

// ============================================================================
// Test Handle
// ============================================================================

/// Configures the fake registry and reads back its counters
pub(crate) struct FakeKmod {
    _not_send: PhantomData<*const ()>,
}

impl FakeKmod {
    /// Start from an empty registry
    pub(crate) fn new() -> Self {
        with_state(|s| *s = FakeState::default());
        Self {
            _not_send: PhantomData,
        }
    }

    /// Open a context backed by this fake
    pub(crate) fn context(&self) -> crate::Result<Context> {
        self.context_with(ContextConfig::default())
    }

    pub(crate) fn context_with(&self, config: ContextConfig) -> crate::Result<Context> {
        let native = config.to_native()?;
        Context::open(&FAKE_LIB, config, native)
    }

    /// Register a live module with an index path
    pub(crate) fn loaded(&self, name: &str, size: c_long) -> &Self {
        with_state(|s| {
            let module = s.find_mut(name);
            module.initstate = initstate::LIVE;
            module.size = size;
            module.path = Some(cstring(&format!("/lib/modules/fake/{name}.ko")));
        });
        self
    }

    /// Register a module present in the index but not loaded
    pub(crate) fn indexed(&self, name: &str) -> &Self {
        with_state(|s| {
            let module = s.find_mut(name);
            module.path = Some(cstring(&format!("/lib/modules/fake/{name}.ko")));
        });
        self
    }

    /// Make `alias` resolve to `names`, in order
    pub(crate) fn alias(&self, alias: &str, names: &[&str]) -> &Self {
        with_state(|s| {
            s.aliases
                .push((alias.to_string(), names.iter().map(|n| n.to_string()).collect()))
        });
        self
    }

    pub(crate) fn info(&self, name: &str, entries: &[(&str, &str)]) -> &Self {
        with_state(|s| {
            s.find_mut(name).info = entries.iter().map(|(k, v)| (cstring(k), cstring(v))).collect()
        });
        self
    }

    pub(crate) fn fail_info(&self, name: &str, status: c_int) -> &Self {
        with_state(|s| s.find_mut(name).info_status = status);
        self
    }

    pub(crate) fn fail_insert(&self, name: &str, status: c_int) -> &Self {
        with_state(|s| s.find_mut(name).insert_status = status);
        self
    }

    pub(crate) fn fail_remove(&self, name: &str, status: c_int) -> &Self {
        with_state(|s| s.find_mut(name).remove_status = status);
        self
    }

    pub(crate) fn fail_load_resources(&self, status: c_int) -> &Self {
        with_state(|s| s.load_status = status);
        self
    }

    pub(crate) fn refs(&self) -> i64 {
        with_state(|s| s.refs)
    }

    pub(crate) fn live_nodes(&self) -> i64 {
        with_state(|s| s.live_nodes)
    }

    pub(crate) fn list_frees(&self) -> usize {
        with_state(|s| s.list_frees)
    }

    pub(crate) fn info_frees(&self) -> usize {
        with_state(|s| s.info_frees)
    }

    pub(crate) fn unloads(&self) -> usize {
        with_state(|s| s.unloads)
    }

    pub(crate) fn ctx_unrefs(&self) -> usize {
        with_state(|s| s.ctx_unrefs)
    }

    /// Number of config paths `kmod_new` received, `None` for the default
    pub(crate) fn config_paths(&self) -> Option<usize> {
        with_state(|s| s.config_paths)
    }

    pub(crate) fn inserted(&self) -> Vec<String> {
        with_state(|s| s.inserted.clone())
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        with_state(|s| s.removed.clone())
    }
}
