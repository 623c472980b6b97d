//! `dynamic_cast`/RTTI engine: single, multiple, and virtual (including
//! diamond) inheritance, `catch` type matching, and the `__dynamic_cast`
//! entry point a compiler emits a call to at every `dynamic_cast`
//! expression.
//!
//! Represented as a tagged sum type (`TypeInfo`) rather than the original
//! `__class_type_info`/`__si_class_type_info`/`__vmi_class_type_info`
//! inheritance hierarchy: one `match` replaces a virtual dispatch chain,
//! and every type description is `'static` data the RTTI generator (not
//! part of this crate) would emit per class.
//!
//! Virtual base offsets are, in the real ABI, stored per-complete-object
//! in the vtable and can differ between two objects of the same static
//! type. This engine does not model per-object vtables at all (see
//! [`VTablePrefix`] for the one place it assumes a vtable-like prefix
//! exists); instead a path that crosses any virtual base is resolved by
//! type identity alone, so two distinct paths reaching the same virtual
//! base collapse into one unambiguous result rather than being compared
//! by offset. This is the redesign the personality/dyncast doc notes
//! reference: the original GCC `search_above`/`vmi_class_type_info`
//! bookkeeping that sorted out true-vs-repeated diamond bases by exact
//! sub-object offset is replaced by this simpler, identity-based rule.

use alloc::vec::Vec;

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct AccessPath: u8 {
        const PUBLIC = 0b0001;
        const VIRTUAL = 0b0010;
    }
}

bitflags! {
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct PointerFlags: u8 {
        const CONST = 0b0001;
        const VOLATILE = 0b0010;
        const RESTRICT = 0b0100;
        const INCOMPLETE = 0b1000;
        /// Set on a `PointerToMember` whose pointee is a member function
        /// rather than member data; the two never convert to each other.
        const MEMBER_FUNCTION = 0b1_0000;
    }
}

/// `TypeInfo::Fundamental` name used for `decltype(nullptr)`. A thrown
/// `nullptr_t` matches any pointer or pointer-to-member catch clause.
const NULLPTR_T: &str = "std::nullptr_t";

/// `TypeInfo::Fundamental` name used for `void`. `void*` catches any
/// object pointer.
const VOID: &str = "void";

/// One base class: the base's own `TypeInfo`, its offset in bytes from
/// the start of the derived class's layout, and whether that base is
/// reached publicly and/or virtually.
#[derive(Clone, Copy)]
pub struct BaseInfo {
    pub type_info: *const TypeInfo,
    pub offset: isize,
    pub flags: AccessPath,
}

// SAFETY: `TypeInfo` graphs are built once as `'static` data and never
// mutated; sharing the raw pointers across threads is sound.
unsafe impl Send for BaseInfo {}
unsafe impl Sync for BaseInfo {}

/// Mirrors `__class_type_info` / `__si_class_type_info` /
/// `__vmi_class_type_info` / `__pointer_type_info` /
/// `__pointer_to_member_type_info` as one enum.
pub enum TypeInfo {
    /// A built-in, non-class type (`int`, `float`, ...). Never has bases.
    Fundamental { name: &'static str },
    /// A class with no base classes.
    ClassNoBases { name: &'static str },
    /// Exactly one public, non-virtual base — the common case, laid out
    /// at offset 0 (`__si_class_type_info`'s implicit assumption).
    SingleBase { name: &'static str, base: *const TypeInfo },
    /// Multiple and/or virtual bases.
    MultiBase { name: &'static str, bases: &'static [BaseInfo] },
    Pointer {
        name: &'static str,
        pointee: *const TypeInfo,
        flags: PointerFlags,
    },
    PointerToMember {
        name: &'static str,
        pointee: *const TypeInfo,
        context: *const TypeInfo,
        flags: PointerFlags,
    },
}

impl TypeInfo {
    pub fn name(&self) -> &'static str {
        match self {
            TypeInfo::Fundamental { name }
            | TypeInfo::ClassNoBases { name }
            | TypeInfo::SingleBase { name, .. }
            | TypeInfo::MultiBase { name, .. }
            | TypeInfo::Pointer { name, .. }
            | TypeInfo::PointerToMember { name, .. } => name,
        }
    }
}

/// `TypeInfo` instances are compared by address first (the common case:
/// every type has exactly one static descriptor) and fall back to name
/// equality, matching the real ABI's documented "compare by address,
/// fall back to string comparison across DSO boundaries" rule.
pub fn is_same(a: *const TypeInfo, b: *const TypeInfo) -> bool {
    if a == b {
        return true;
    }
    if a.is_null() || b.is_null() {
        return false;
    }
    // SAFETY: non-null `TypeInfo` pointers always point at `'static`
    // descriptors produced by the RTTI generator.
    unsafe { (*a).name() == (*b).name() }
}

enum UpcastResult {
    NotFound,
    Unique(isize, AccessPath),
    Ambiguous,
}

/// Depth-first search of every inheritance path from `current` to
/// `target`, accumulating `(offset, path, via_virtual)` for each one
/// found.
fn search_paths(
    current: *const TypeInfo,
    offset: isize,
    is_public: bool,
    via_virtual: bool,
    target: *const TypeInfo,
    out: &mut Vec<(isize, AccessPath, bool)>,
) {
    if is_same(current, target) {
        let mut path = AccessPath::empty();
        if is_public {
            path |= AccessPath::PUBLIC;
        }
        if via_virtual {
            path |= AccessPath::VIRTUAL;
        }
        out.push((offset, path, via_virtual));
        return;
    }

    // SAFETY: `current` is a live `'static` descriptor (invariant of this
    // module: every `TypeInfo` pointer reachable from a `BaseInfo` or a
    // caller-supplied root points at one).
    match unsafe { &*current } {
        TypeInfo::Fundamental { .. }
        | TypeInfo::ClassNoBases { .. }
        | TypeInfo::Pointer { .. }
        | TypeInfo::PointerToMember { .. } => {}
        TypeInfo::SingleBase { base, .. } => {
            search_paths(*base, offset, is_public, via_virtual, target, out);
        }
        TypeInfo::MultiBase { bases, .. } => {
            for b in bases.iter() {
                let base_public = is_public && b.flags.contains(AccessPath::PUBLIC);
                let base_virtual = via_virtual || b.flags.contains(AccessPath::VIRTUAL);
                search_paths(b.type_info, offset + b.offset, base_public, base_virtual, target, out);
            }
        }
    }
}

fn find_base(from: *const TypeInfo, to: *const TypeInfo) -> UpcastResult {
    let mut found = Vec::new();
    search_paths(from, 0, true, false, to, &mut found);

    if found.is_empty() {
        return UpcastResult::NotFound;
    }

    let all_virtual = found.iter().all(|(_, _, v)| *v);
    if all_virtual {
        let combined = found.iter().fold(AccessPath::empty(), |acc, (_, p, _)| acc | *p);
        return UpcastResult::Unique(found[0].0, combined);
    }

    let first_offset = found[0].0;
    if found.iter().all(|(o, _, _)| *o == first_offset) {
        let combined = found.iter().fold(AccessPath::empty(), |acc, (_, p, _)| acc | *p);
        UpcastResult::Unique(first_offset, combined)
    } else {
        UpcastResult::Ambiguous
    }
}

fn is_fundamental_named(t: *const TypeInfo, name: &str) -> bool {
    if t.is_null() {
        return false;
    }
    // SAFETY: non-null `TypeInfo` pointers always point at `'static` descriptors.
    matches!(unsafe { &*t }, TypeInfo::Fundamental { name: n } if *n == name)
}

/// Pointer/pointer-to-member catch matching, recursing through nested
/// pointer levels. `outer_const` is true when every pointer layer
/// enclosing the one currently being compared is already const-qualified;
/// per the standard qualification-conversion rule, a pointee may only
/// lose a cv-qualifier the thrown type carries when that condition holds
/// (adding a qualifier is always allowed).
fn pointer_can_catch(
    catch_pointee: *const TypeInfo,
    catch_flags: PointerFlags,
    thrown_type: *const TypeInfo,
    outer_const: bool,
) -> bool {
    if is_fundamental_named(thrown_type, NULLPTR_T) {
        return true;
    }

    let TypeInfo::Pointer { pointee: thrown_pointee, flags: thrown_flags, .. } = (
        // SAFETY: non-null `TypeInfo` pointers always point at `'static` descriptors.
        unsafe { &*thrown_type }
    ) else {
        return false;
    };

    let loses_const = !catch_flags.contains(PointerFlags::CONST) && thrown_flags.contains(PointerFlags::CONST);
    if loses_const && !outer_const {
        return false;
    }

    if is_fundamental_named(catch_pointee, VOID) {
        return true;
    }

    if is_same(catch_pointee, *thrown_pointee) {
        return true;
    }

    // SAFETY: non-null `TypeInfo` pointers always point at `'static` descriptors.
    if let TypeInfo::Pointer { pointee: catch_inner, flags: catch_inner_flags, .. } =
        unsafe { &*catch_pointee }
    {
        return pointer_can_catch(
            *catch_inner,
            *catch_inner_flags,
            *thrown_pointee,
            outer_const && catch_flags.contains(PointerFlags::CONST),
        );
    }

    matches!(
        find_base(*thrown_pointee, catch_pointee),
        UpcastResult::Unique(_, path) if path.contains(AccessPath::PUBLIC)
    )
}

/// Is `from` reachable from `to` (or identical to it) via at least one
/// unambiguous, fully public path? This is exactly the rule a `catch`
/// clause uses to decide whether it matches a thrown exception's dynamic
/// type: `catch (Base &)` catches a thrown `Derived` if `Derived` derives
/// publicly and unambiguously from `Base`. Also handles the pointer,
/// `void*`, pointer-to-member, and cv-qualification rules a real
/// personality routine applies when the catch clause names a pointer or
/// pointer-to-member type instead of a plain class.
pub fn can_catch(catch_type: *const TypeInfo, thrown_type: *const TypeInfo) -> bool {
    if is_same(catch_type, thrown_type) {
        return true;
    }

    // SAFETY: non-null `TypeInfo` pointers always point at `'static` descriptors.
    match unsafe { &*catch_type } {
        TypeInfo::Pointer { pointee, flags, .. } => {
            return pointer_can_catch(*pointee, *flags, thrown_type, true);
        }
        TypeInfo::PointerToMember { pointee, context, flags, .. } => {
            if is_fundamental_named(thrown_type, NULLPTR_T) {
                return true;
            }
            // SAFETY: non-null `TypeInfo` pointers always point at `'static` descriptors.
            let TypeInfo::PointerToMember {
                pointee: thrown_pointee,
                context: thrown_context,
                flags: thrown_flags,
                ..
            } = (unsafe { &*thrown_type })
            else {
                return false;
            };
            // A pointer-to-member-function never converts to/from a
            // pointer-to-member-data, regardless of context or pointee.
            if flags.contains(PointerFlags::MEMBER_FUNCTION)
                != thrown_flags.contains(PointerFlags::MEMBER_FUNCTION)
            {
                return false;
            }
            is_same(*context, *thrown_context) && pointer_can_catch(*pointee, *flags, *thrown_pointee, true)
        }
        _ => matches!(
            find_base(thrown_type, catch_type),
            UpcastResult::Unique(_, path) if path.contains(AccessPath::PUBLIC)
        ),
    }
}

/// The general `dynamic_cast<Target *>(ptr)` algorithm: `static_ptr` is
/// the pointer being cast, with static type `static_type`; the complete
/// object it points into has dynamic type `dynamic_type` and starts at
/// `object_ptr`. Returns the adjusted pointer on success, null on
/// failure (ambiguous or not related).
pub fn do_dyncast(
    dynamic_type: *const TypeInfo,
    object_ptr: *const u8,
    static_type: *const TypeInfo,
    static_ptr: *const u8,
    target_type: *const TypeInfo,
) -> *const u8 {
    if is_same(target_type, static_type) {
        return static_ptr;
    }

    // Upcast: target is an accessible base of the static type.
    if let UpcastResult::Unique(offset, path) = find_base(static_type, target_type) {
        if path.contains(AccessPath::PUBLIC) {
            return static_ptr.wrapping_offset(offset);
        }
    }

    let static_in_dynamic = find_base(dynamic_type, static_type);
    let UpcastResult::Unique(static_offset, _) = static_in_dynamic else {
        return core::ptr::null();
    };
    let _ = object_ptr;
    let recovered_object_ptr = static_ptr.wrapping_offset(-static_offset);

    if is_same(target_type, dynamic_type) {
        return recovered_object_ptr;
    }

    // Cross-cast: target is some other accessible base of the same
    // complete object.
    if let UpcastResult::Unique(target_offset, target_path) = find_base(dynamic_type, target_type) {
        if target_path.contains(AccessPath::PUBLIC) {
            return recovered_object_ptr.wrapping_offset(target_offset);
        }
    }

    core::ptr::null()
}

/// The first two vtable slots preceding every polymorphic object's
/// vptr-pointed function table, per the Itanium ABI: the offset from
/// this sub-object to the top of the complete object, and that object's
/// `TypeInfo`. `__dynamic_cast` uses this to recover the dynamic type
/// and complete-object pointer from a bare `static_ptr`.
#[repr(C)]
pub struct VTablePrefix {
    pub offset_to_top: isize,
    pub type_info: *const TypeInfo,
}

/// `__dynamic_cast(src_ptr, src_type, dst_type, src2dst)`. `src2dst` is
/// an optimisation hint the reference ABI uses to shortcut known
/// single-inheritance relationships; this implementation ignores it and
/// always runs the full search, which is correct (if slower in the cases
/// the hint exists to speed up).
///
/// # Safety
/// `src_ptr` must point at a polymorphic object whose first field is a
/// vtable pointer, and that vtable must be preceded by a [`VTablePrefix`]
/// at `vptr[-1]` laid out as this ABI convention requires.
#[no_mangle]
pub unsafe extern "C" fn __dynamic_cast(
    src_ptr: *const u8,
    src_type: *const TypeInfo,
    dst_type: *const TypeInfo,
    _src2dst: isize,
) -> *const u8 {
    let vptr = *(src_ptr as *const *const VTablePrefix);
    if vptr.is_null() {
        return core::ptr::null();
    }
    let prefix = &*vptr.offset(-1);
    let object_ptr = src_ptr.wrapping_offset(prefix.offset_to_top);
    do_dyncast(prefix.type_info, object_ptr, src_type, src_ptr, dst_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Diamond: Derived -> {Left, Right} -> Base (virtual), plus an
    // unrelated type to exercise the negative case. Left/Right must use
    // `MultiBase` (not `SingleBase`) so the virtual-base edge to `Base`
    // can be recorded: `SingleBase` has no flags field and always means
    // public, non-virtual, single inheritance.
    static BASE: TypeInfo = TypeInfo::ClassNoBases { name: "Base" };
    static LEFT_BASES: [BaseInfo; 1] = [BaseInfo {
        type_info: &BASE,
        offset: 0,
        flags: AccessPath::PUBLIC.union(AccessPath::VIRTUAL),
    }];
    static LEFT: TypeInfo = TypeInfo::MultiBase { name: "Left", bases: &LEFT_BASES };
    static RIGHT_BASES: [BaseInfo; 1] = [BaseInfo {
        type_info: &BASE,
        offset: 0,
        flags: AccessPath::PUBLIC.union(AccessPath::VIRTUAL),
    }];
    static RIGHT: TypeInfo = TypeInfo::MultiBase { name: "Right", bases: &RIGHT_BASES };
    static DERIVED_BASES: [BaseInfo; 2] = [
        BaseInfo {
            type_info: &LEFT,
            offset: 0,
            flags: AccessPath::PUBLIC,
        },
        BaseInfo {
            type_info: &RIGHT,
            offset: 8,
            flags: AccessPath::PUBLIC,
        },
    ];
    static DERIVED: TypeInfo = TypeInfo::MultiBase {
        name: "Derived",
        bases: &DERIVED_BASES,
    };
    static UNRELATED: TypeInfo = TypeInfo::ClassNoBases { name: "Unrelated" };

    #[test]
    fn diamond_upcast_to_shared_base_is_unambiguous() {
        let derived_ptr = 0x1000 as *const u8;
        let result = do_dyncast(&DERIVED, derived_ptr, &DERIVED, derived_ptr, &BASE);
        assert!(!result.is_null());
    }

    #[test]
    fn cross_cast_between_siblings_succeeds() {
        let derived_ptr = 0x1000 as *const u8;
        let left_ptr = derived_ptr; // offset 0
        let result = do_dyncast(&DERIVED, derived_ptr, &LEFT, left_ptr, &RIGHT);
        assert_eq!(result, derived_ptr.wrapping_offset(8));
    }

    #[test]
    fn cast_to_unrelated_type_fails() {
        let derived_ptr = 0x1000 as *const u8;
        let result = do_dyncast(&DERIVED, derived_ptr, &DERIVED, derived_ptr, &UNRELATED);
        assert!(result.is_null());
    }

    #[test]
    fn can_catch_matches_public_base() {
        assert!(can_catch(&BASE, &LEFT));
        assert!(can_catch(&LEFT, &LEFT));
        assert!(!can_catch(&LEFT, &RIGHT));
        assert!(!can_catch(&UNRELATED, &DERIVED));
    }

    static VOID_TYPE: TypeInfo = TypeInfo::Fundamental { name: "void" };
    static NULLPTR: TypeInfo = TypeInfo::Fundamental { name: "std::nullptr_t" };

    static VOID_PTR: TypeInfo = TypeInfo::Pointer {
        name: "void*",
        pointee: &VOID_TYPE,
        flags: PointerFlags::empty(),
    };
    static LEFT_PTR: TypeInfo = TypeInfo::Pointer {
        name: "Left*",
        pointee: &LEFT,
        flags: PointerFlags::empty(),
    };
    static BASE_PTR: TypeInfo = TypeInfo::Pointer {
        name: "Base*",
        pointee: &BASE,
        flags: PointerFlags::empty(),
    };
    static CONST_BASE_PTR: TypeInfo = TypeInfo::Pointer {
        name: "const Base*",
        pointee: &BASE,
        flags: PointerFlags::CONST,
    };
    static UNRELATED_PTR: TypeInfo = TypeInfo::Pointer {
        name: "Unrelated*",
        pointee: &UNRELATED,
        flags: PointerFlags::empty(),
    };

    #[test]
    fn void_pointer_catches_any_object_pointer() {
        assert!(can_catch(&VOID_PTR, &LEFT_PTR));
        assert!(can_catch(&VOID_PTR, &UNRELATED_PTR));
    }

    #[test]
    fn pointer_catch_upcasts_pointee_through_public_base() {
        assert!(can_catch(&BASE_PTR, &LEFT_PTR));
        assert!(!can_catch(&BASE_PTR, &UNRELATED_PTR));
    }

    #[test]
    fn pointer_catch_may_add_const_but_not_drop_it() {
        assert!(can_catch(&CONST_BASE_PTR, &BASE_PTR));
        assert!(!can_catch(&BASE_PTR, &CONST_BASE_PTR));
    }

    #[test]
    fn nullptr_matches_any_pointer_catch_clause() {
        assert!(can_catch(&BASE_PTR, &NULLPTR));
        assert!(can_catch(&VOID_PTR, &NULLPTR));
    }

    static DATA_MEMBER_PTR: TypeInfo = TypeInfo::PointerToMember {
        name: "int Base::*",
        pointee: &BASE,
        context: &BASE,
        flags: PointerFlags::empty(),
    };
    static FUNCTION_MEMBER_PTR: TypeInfo = TypeInfo::PointerToMember {
        name: "void (Base::*)()",
        pointee: &BASE,
        context: &BASE,
        flags: PointerFlags::MEMBER_FUNCTION,
    };

    #[test]
    fn member_function_pointer_does_not_catch_member_data_pointer() {
        assert!(!can_catch(&FUNCTION_MEMBER_PTR, &DATA_MEMBER_PTR));
        assert!(can_catch(&DATA_MEMBER_PTR, &DATA_MEMBER_PTR));
    }

    #[test]
    fn nullptr_matches_any_pointer_to_member_catch_clause() {
        assert!(can_catch(&DATA_MEMBER_PTR, &NULLPTR));
        assert!(can_catch(&FUNCTION_MEMBER_PTR, &NULLPTR));
    }
}
