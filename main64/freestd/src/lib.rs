//! Freestanding runtime support library.
//!
//! Provides the pieces a hosted C++ toolchain would otherwise supply and
//! that a freestanding kernel cannot link against: an ordered red-black-tree
//! map/set engine, the Itanium-ABI exception runtime and personality
//! routine, an RTTI/`dynamic_cast` engine, and a printf-family formatted
//! conversion engine.
//!
//! Built `#![cfg_attr(not(test), no_std)]` so the same source compiles into
//! a freestanding kernel binary and is also exercised by ordinary
//! host-native `#[test]`s (`cargo test -p freestd`) with the full standard
//! library backing the test harness.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cxxabi;
pub mod error;
pub mod fmt;
pub mod rbtree;
pub mod rtti;

pub use error::AllocError;
pub use rbtree::map::{Multimap, Multiset, OrderedMap, OrderedSet};
