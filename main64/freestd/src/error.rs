//! Crate-wide allocation-failure error kind.
//!
//! Every fallible allocation path in this crate (the red-black-tree arena,
//! the exception runtime's `alloc_exception`) surfaces failure through this
//! type rather than a boolean sentinel, so call sites compose with `?` and
//! `map_err` like any other Rust `Result`-returning API.

/// Allocation failed. Distinguishes "the allocator is out of memory" from
/// "even the fixed fallback buffer was too small for this request", since
/// the two call for different recovery (retry elsewhere vs. give up).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocError {
    /// The global allocator returned null.
    HeapExhausted,
    /// The request does not fit in the bounded fallback buffer used when
    /// the heap is exhausted.
    FallbackBufferTooSmall,
}
