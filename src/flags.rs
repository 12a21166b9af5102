//! Insert and Remove Flags
//!
//! Bit sets passed through to `kmod_module_probe_insert_module` and
//! `kmod_module_remove_module`.
//!
//! ## Probe Flags
//!
//! | Flag | libkmod | Effect |
//! |------|---------|--------|
//! | `FORCE_VERMAGIC` | `KMOD_PROBE_FORCE_VERMAGIC` | Ignore version magic |
//! | `FORCE_MODVERSION` | `KMOD_PROBE_FORCE_MODVERSION` | Ignore symbol versions |
//! | `IGNORE_COMMAND` | `KMOD_PROBE_IGNORE_COMMAND` | Skip `install` commands from config |
//! | `IGNORE_LOADED` | `KMOD_PROBE_IGNORE_LOADED` | Re-probe already loaded modules |
//! | `DRY_RUN` | `KMOD_PROBE_DRY_RUN` | Resolve without inserting |
//! | `FAIL_ON_LOADED` | `KMOD_PROBE_FAIL_ON_LOADED` | Fail with `EEXIST` when loaded |
//! | `APPLY_BLACKLIST*` | `KMOD_PROBE_APPLY_BLACKLIST*` | Honour `blacklist` config |

use core::ffi::c_uint;
use core::ops::BitOr;

// ============================================================================
// Probe Flags
// ============================================================================

/// Flags for [`Context::insert_with`](crate::Context::insert_with)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProbeFlags(c_uint);

impl ProbeFlags {
    /// No flags: plain modprobe behaviour
    pub const NONE: Self = Self(0);
    pub const FORCE_VERMAGIC: Self = Self(0x00001);
    pub const FORCE_MODVERSION: Self = Self(0x00002);
    pub const IGNORE_COMMAND: Self = Self(0x00004);
    pub const IGNORE_LOADED: Self = Self(0x00008);
    pub const DRY_RUN: Self = Self(0x00010);
    pub const FAIL_ON_LOADED: Self = Self(0x00020);

    /// Refuse any blacklisted module, including dependencies
    pub const APPLY_BLACKLIST_ALL: Self = Self(0x10000);
    /// Refuse a blacklisted module given directly
    pub const APPLY_BLACKLIST: Self = Self(0x20000);
    /// Refuse a blacklisted module only when reached through an alias
    pub const APPLY_BLACKLIST_ALIAS_ONLY: Self = Self(0x40000);

    #[inline]
    pub const fn bits(&self) -> c_uint {
        self.0
    }

    #[inline]
    pub const fn from_bits(bits: c_uint) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// True when one of the blacklist flags is set.
    ///
    /// With these flags libkmod may short-circuit with a positive status
    /// instead of inserting anything.
    #[inline]
    pub const fn applies_blacklist(&self) -> bool {
        self.0
            & (Self::APPLY_BLACKLIST_ALL.0
                | Self::APPLY_BLACKLIST.0
                | Self::APPLY_BLACKLIST_ALIAS_ONLY.0)
            != 0
    }
}

impl BitOr for ProbeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

// ============================================================================
// Remove Flags
// ============================================================================

/// Flags for [`Context::remove_with`](crate::Context::remove_with)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemoveFlags(c_uint);

impl RemoveFlags {
    /// No flags
    pub const NONE: Self = Self(0);

    // libkmod reuses open(2) flag values for these
    /// Remove even if the module is in use (`KMOD_REMOVE_FORCE`)
    pub const FORCE: Self = Self(libc::O_TRUNC as c_uint);
    /// Do not wait for the use count to drop (`KMOD_REMOVE_NOWAIT`)
    pub const NOWAIT: Self = Self(libc::O_NONBLOCK as c_uint);

    #[inline]
    pub const fn bits(&self) -> c_uint {
        self.0
    }

    #[inline]
    pub const fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl BitOr for RemoveFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}
