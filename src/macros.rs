//! # Internal Macros
//!
//! This module provides internal macros for reducing boilerplate in ShaleDB.
//!
//! ## zerocopy_accessors!
//!
//! Generates getter and setter methods for zerocopy struct fields stored as
//! little-endian `U32` wrappers. Page addresses are the only fixed-width
//! fields the anchor structs carry, so that is the only field kind the
//! macro knows about.
//!
//! ### Usage
//!
//! ```ignore
//! use zerocopy::little_endian::U32;
//!
//! #[repr(C)]
//! struct Header {
//!     current_root: U32,
//!     prev_root: U32,
//! }
//!
//! impl Header {
//!     zerocopy_accessors! {
//!         current_root: u32,
//!         prev_root: u32,
//!     }
//! }
//!
//! // Generates:
//! // pub fn current_root(&self) -> u32 { self.current_root.get() }
//! // pub fn set_current_root(&mut self, val: u32) { ... }
//! ```
//!
//! ## bug! / ensure_bug!
//!
//! Internal invariant checks. A failed invariant returns `DbError::Bug` to
//! the caller instead of panicking; a `Bug` error reaching a caller means the
//! engine itself is broken, not the caller's input.

/// Generates getter and setter methods for zerocopy little-endian address
/// fields.
#[macro_export]
macro_rules! zerocopy_accessors {
    (@impl $field:ident, u32) => {
        ::paste::paste! {
            #[inline]
            pub fn $field(&self) -> u32 {
                self.$field.get()
            }

            #[inline]
            pub fn [<set_ $field>](&mut self, val: u32) {
                self.$field = ::zerocopy::little_endian::U32::new(val);
            }
        }
    };
    ($($field:ident : $ty:tt),* $(,)?) => {
        $(
            $crate::zerocopy_accessors!(@impl $field, $ty);
        )*
    };
}

/// Returns `DbError::Bug` with a formatted message.
#[macro_export]
macro_rules! bug {
    ($($arg:tt)*) => {
        return Err($crate::error::DbError::Bug(format!($($arg)*)))
    };
}

/// Checks an internal invariant, returning `DbError::Bug` when it fails.
#[macro_export]
macro_rules! ensure_bug {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::bug!($($arg)*);
        }
    };
}

/// Returns `DbError::Corrupted` with a formatted message.
#[macro_export]
macro_rules! corrupted {
    ($($arg:tt)*) => {
        return Err($crate::error::DbError::Corrupted(format!($($arg)*)))
    };
}

/// Checks an on-disk format expectation, returning `DbError::Corrupted`
/// when it fails.
#[macro_export]
macro_rules! ensure_format {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            $crate::corrupted!($($arg)*);
        }
    };
}
