//! LEB128 decoding, LSDA parsing, and the `__gxx_personality_v0` search
//! and install phases.
//!
//! Grounded in `original_source/stdlib/cpp/cxxabi.cpp` (`__gxx_personality_v0`
//! and its call-site/action table walk) for the search/install logic; the
//! encoding constants and two-phase (search, then install) protocol follow
//! the Itanium C++ ABI exception handling specification the original cites
//! in its comments.

use crate::rtti::{can_catch, TypeInfo};

use super::unwind::{UnwindContext, UnwindReasonCode};

/// Read a single unsigned LEB128 value starting at `data[*pos]`, advancing
/// `*pos` past it.
pub fn read_uleb128(data: &[u8], pos: &mut usize) -> u64 {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = data[*pos];
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    result
}

/// Read a single signed LEB128 value, sign-extending the final group.
pub fn read_sleb128(data: &[u8], pos: &mut usize) -> i64 {
    let mut result: i64 = 0;
    let mut shift = 0u32;
    let mut byte;
    loop {
        byte = data[*pos];
        *pos += 1;
        result |= ((byte & 0x7f) as i64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if shift < 64 && (byte & 0x40) != 0 {
        result |= -1i64 << shift;
    }
    result
}

/// One entry of the LSDA call-site table: `[start, start+len)` of the
/// protected region (offsets from the function's landing-pad base),
/// the landing pad's offset (0 means "no landing pad in this region"),
/// and the 1-based index into the action table (0 means "cleanup only,
/// no type checks").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallSiteRecord {
    pub region_start: u64,
    pub region_len: u64,
    pub landing_pad: u64,
    pub action_index: u64,
}

/// A parsed Language-Specific Data Area: the call-site table plus the
/// raw action-table and type-table bytes needed to resolve a match.
pub struct Lsda<'a> {
    pub landing_pad_base: u64,
    pub call_sites: alloc::vec::Vec<CallSiteRecord>,
    pub action_table: &'a [u8],
    pub type_table: &'a [u8],
    /// Stride of one type-table entry; this implementation only supports
    /// the common 4-byte (`DW_EH_PE_sdata4`-relative) encoding used by
    /// every target this repository builds for.
    pub type_table_entry_size: usize,
}

/// Parses the call-site table out of a raw LSDA byte region. `data` must
/// start at the LSDA header (the `@LPStart` byte) as the unwinder hands
/// it to the personality routine via `get_lsda`.
pub fn parse_lsda(data: &[u8]) -> Lsda<'_> {
    let mut pos = 0usize;

    let lpstart_encoding = data[pos];
    pos += 1;
    let landing_pad_base = if lpstart_encoding == 0xff {
        0
    } else {
        read_uleb128(data, &mut pos)
    };

    let ttype_encoding = data[pos];
    pos += 1;
    let ttype_offset = if ttype_encoding == 0xff {
        0
    } else {
        read_uleb128(data, &mut pos)
    };
    // @TType base: the types table sits `ttype_offset` bytes past the byte
    // immediately following the ULEB128 that encodes it, not at `pos` itself.
    let type_table_base = pos + ttype_offset as usize;

    let call_site_encoding = data[pos];
    pos += 1;
    debug_assert!(
        call_site_encoding != 0xff,
        "omitted call-site table encoding is not supported"
    );

    let call_site_table_len = read_uleb128(data, &mut pos) as usize;
    let call_site_table_start = pos;
    let call_site_table_end = call_site_table_start + call_site_table_len;

    let mut call_sites = alloc::vec::Vec::new();
    while pos < call_site_table_end {
        let region_start = read_uleb128(data, &mut pos);
        let region_len = read_uleb128(data, &mut pos);
        let landing_pad = read_uleb128(data, &mut pos);
        let action_index = read_uleb128(data, &mut pos);
        call_sites.push(CallSiteRecord {
            region_start,
            region_len,
            landing_pad,
            action_index,
        });
    }

    let action_table = &data[call_site_table_end..];
    let type_table = &data[..type_table_base];

    Lsda {
        landing_pad_base,
        call_sites,
        action_table,
        type_table,
        type_table_entry_size: 4,
    }
}

impl<'a> Lsda<'a> {
    /// Finds the call-site record whose region contains `ip_offset`
    /// (the faulting instruction's offset from `landing_pad_base`).
    pub fn find_call_site(&self, ip_offset: u64) -> Option<CallSiteRecord> {
        self.call_sites
            .iter()
            .copied()
            .find(|cs| ip_offset >= cs.region_start && ip_offset < cs.region_start + cs.region_len)
    }

    /// Resolves the 1-based type-table index `ttype_index` (as stored,
    /// signed, in an action record) to the pointed-to `TypeInfo`.
    /// `ttype_index == 0` is the catch-all (`catch (...)`) sentinel and
    /// has no `TypeInfo` to return.
    pub fn type_info_at(&self, ttype_index: i64) -> Option<*const TypeInfo> {
        if ttype_index <= 0 {
            return None;
        }
        let stride = self.type_table_entry_size;
        let end = self.type_table.len();
        let offset = end.checked_sub(ttype_index as usize * stride)?;
        let bytes = self.type_table.get(offset..offset + 4)?;
        let rel = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Some(rel as usize as *const TypeInfo)
    }
}

/// The result of resolving one call site's action chain against a
/// thrown exception's runtime type.
pub enum ActionResolution {
    /// No landing pad in this region at all: keep unwinding.
    NoLandingPad,
    /// A landing pad exists purely for cleanup (destructors), no type
    /// check applies.
    CleanupOnly { landing_pad: u64 },
    /// A landing pad exists and a specific `catch` clause (or a
    /// catch-all) matches; `switch_value` is the 1-based index of the
    /// matched action, to be loaded into the landing pad's selector
    /// register.
    Handler { landing_pad: u64, switch_value: i64 },
}

/// Walks one call site's action chain, matching the thrown type (via
/// [`crate::rtti::can_catch`]) against each listed catch type in order.
pub fn resolve_action(lsda: &Lsda, call_site: CallSiteRecord, thrown_type: *const TypeInfo) -> ActionResolution {
    if call_site.landing_pad == 0 {
        return ActionResolution::NoLandingPad;
    }
    if call_site.action_index == 0 {
        return ActionResolution::CleanupOnly {
            landing_pad: call_site.landing_pad,
        };
    }

    let mut action_pos = call_site.action_index as usize - 1;
    loop {
        let mut cursor = action_pos;
        let ttype_index = read_sleb128(lsda.action_table, &mut cursor);
        let next_rel = read_sleb128(lsda.action_table, &mut cursor);

        let matched = if ttype_index == 0 {
            true // catch (...)
        } else if let Some(catch_type) = lsda.type_info_at(ttype_index) {
            can_catch(catch_type, thrown_type)
        } else {
            false
        };

        if matched {
            return ActionResolution::Handler {
                landing_pad: call_site.landing_pad,
                switch_value: ttype_index,
            };
        }

        if next_rel == 0 {
            return ActionResolution::CleanupOnly {
                landing_pad: call_site.landing_pad,
            };
        }
        action_pos = (cursor as i64 + next_rel - 1) as usize;
    }
}

/// `__gxx_personality_v0`'s two phases, expressed as a pure function over
/// an already-parsed LSDA and already-computed `ip_offset`, so it can be
/// unit tested without a real unwind context. The real `extern "C"`
/// personality routine (in [`super::abi`]) is the thin layer that
/// extracts `ip_offset`/`lsda` from the `UnwindContext` the assembly
/// unwinder passes in.
pub fn personality(
    lsda: &Lsda,
    ip_offset: u64,
    thrown_type: *const TypeInfo,
    is_search_phase: bool,
    ctx: &mut UnwindContext,
) -> UnwindReasonCode {
    let Some(call_site) = lsda.find_call_site(ip_offset) else {
        return UnwindReasonCode::ContinueUnwind;
    };

    match resolve_action(lsda, call_site, thrown_type) {
        ActionResolution::NoLandingPad => UnwindReasonCode::ContinueUnwind,
        ActionResolution::CleanupOnly { landing_pad } => {
            if is_search_phase {
                UnwindReasonCode::ContinueUnwind
            } else {
                ctx.call_site = lsda.landing_pad_base as usize + landing_pad as usize;
                ctx.gr_data[1] = 0;
                UnwindReasonCode::InstallContext
            }
        }
        ActionResolution::Handler { landing_pad, switch_value } => {
            if is_search_phase {
                UnwindReasonCode::HandlerFound
            } else {
                ctx.call_site = lsda.landing_pad_base as usize + landing_pad as usize;
                ctx.gr_data[1] = switch_value as usize;
                UnwindReasonCode::InstallContext
            }
        }
    }
}
