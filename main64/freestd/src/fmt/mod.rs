//! `printf`-family formatted conversion: `vstrprintf`/`sprintf`/
//! `snprintf` built over [`numeric`].
//!
//! Rust has no varargs, so callers pass the argument list explicitly as
//! a slice of [`Arg`] instead of invoking through `...`/`va_list` — the
//! same adaptation this repository makes everywhere else a C-level
//! variadic interface shows up. The conversion grammar (flags, width,
//! precision, the `d/i/u/x/X/o/c/s/f/e/g/p/%` specifiers) and the
//! null-format/null-buffer sentinel behaviour follow
//! `original_source/stdlib/cpp/cstdio.cpp`.

pub mod numeric;

use alloc::string::String;
use core::str::CharIndices;

use numeric::{itostr, uitostr, MAX_NUMERIC_LEN};

/// One formatted argument. Rust's type system already knows each value's
/// type, so unlike real variadic `printf` this is a closed, checked
/// enum rather than an untyped byte stream read per-conversion-character.
pub enum Arg<'a> {
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(Option<&'a str>),
    Char(u8),
    Ptr(Option<usize>),
}

/// Marker text this engine substitutes for any directive it cannot
/// parse or for which the wrong `Arg` variant was supplied, rather than
/// panicking on malformed input from a kernel caller. Matches spec §4.5
/// exactly (and its length matters: §8's test expects a 10-byte result).
pub const BAD_FORMAT_MARKER: &str = "Bad Format";

/// Sentinel `snprintf`/`sprintf` return for the two conditions the
/// original treats as unrecoverable: a null format string, or a
/// destination buffer too small to hold even the terminator. Mirrors the
/// source's `(unsigned int) -1`.
pub const NPOS: usize = usize::MAX;

struct FormatSpec {
    left_align: bool,
    zero_pad: bool,
    plus_sign: bool,
    space_sign: bool,
    alt_form: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

fn parse_spec(chars: &mut core::iter::Peekable<CharIndices>, fmt: &str) -> Option<FormatSpec> {
    let mut spec = FormatSpec {
        left_align: false,
        zero_pad: false,
        plus_sign: false,
        space_sign: false,
        alt_form: false,
        width: None,
        precision: None,
        conv: '\0',
    };

    loop {
        match chars.peek().map(|(_, c)| *c) {
            Some('-') => spec.left_align = true,
            Some('0') => spec.zero_pad = true,
            Some('+') => spec.plus_sign = true,
            Some(' ') => spec.space_sign = true,
            Some('#') => spec.alt_form = true,
            _ => break,
        }
        chars.next();
    }

    spec.width = parse_number(chars, fmt);

    if chars.peek().map(|(_, c)| *c) == Some('.') {
        chars.next();
        spec.precision = Some(parse_number(chars, fmt).unwrap_or(0));
    }

    // Skip length modifiers (`h`, `hh`, `l`, `ll`, `z`, `j`, `t`): this
    // engine's `Arg` already carries a fixed-width value, so the modifier
    // changes nothing about how the value is rendered.
    while matches!(chars.peek().map(|(_, c)| *c), Some('h' | 'l' | 'z' | 'j' | 't')) {
        chars.next();
    }

    let (_, conv) = chars.next()?;
    spec.conv = conv;
    Some(spec)
}

fn parse_number(chars: &mut core::iter::Peekable<CharIndices>, fmt: &str) -> Option<usize> {
    let start = chars.peek()?.0;
    let mut end = start;
    while let Some((i, c)) = chars.peek() {
        if c.is_ascii_digit() {
            end = i + c.len_utf8();
            chars.next();
        } else {
            break;
        }
    }
    if end == start {
        return None;
    }
    fmt[start..end].parse().ok()
}

fn pad(out: &mut String, body: &str, spec: &FormatSpec) {
    let Some(width) = spec.width else {
        out.push_str(body);
        return;
    };
    if body.len() >= width {
        out.push_str(body);
        return;
    }
    let fill_len = width - body.len();
    if spec.left_align {
        out.push_str(body);
        for _ in 0..fill_len {
            out.push(' ');
        }
    } else if spec.zero_pad && spec.precision.is_none() {
        let (sign, rest) = match body.strip_prefix('-') {
            Some(r) => ("-", r),
            None => ("", body),
        };
        out.push_str(sign);
        for _ in 0..fill_len {
            out.push('0');
        }
        out.push_str(rest);
    } else {
        for _ in 0..fill_len {
            out.push(' ');
        }
        out.push_str(body);
    }
}

fn apply_sign(body: String, negative: bool, spec: &FormatSpec) -> String {
    if negative {
        return body;
    }
    if spec.plus_sign {
        let mut s = String::from("+");
        s.push_str(&body);
        s
    } else if spec.space_sign {
        let mut s = String::from(" ");
        s.push_str(&body);
        s
    } else {
        body
    }
}

fn render_one(spec: &FormatSpec, arg: Option<&Arg>, out: &mut String) {
    let mut numbuf = [0u8; MAX_NUMERIC_LEN];

    match (spec.conv, arg) {
        ('%', _) => out.push('%'),
        ('d' | 'i', Some(Arg::Int(v))) => {
            let s = itostr(*v, &mut numbuf, 10, false);
            let body = apply_sign(String::from(s), *v < 0, spec);
            pad(out, &body, spec);
        }
        ('u', Some(Arg::UInt(v))) => {
            let s = uitostr(*v, &mut numbuf, 10, false);
            pad(out, s, spec);
        }
        ('X', Some(Arg::UInt(v))) => {
            // Always `0x`-prefixed per spec §4.5, unlike standard C's
            // `#`-gated alternate form.
            let s = uitostr(*v, &mut numbuf, 16, true);
            let body = alloc::format!("0x{s}");
            pad(out, &body, spec);
        }
        ('o', Some(Arg::UInt(v))) => {
            // Always `0`-prefixed per spec §4.5.
            let s = uitostr(*v, &mut numbuf, 8, false);
            let body = alloc::format!("0{s}");
            pad(out, &body, spec);
        }
        ('c', Some(Arg::Char(c))) => {
            let body = alloc::format!("{}", *c as char);
            pad(out, &body, spec);
        }
        ('s', Some(Arg::Str(maybe))) => {
            let raw = maybe.unwrap_or("(null)");
            let truncated = match spec.precision {
                Some(p) if p < raw.len() => &raw[..p],
                _ => raw,
            };
            pad(out, truncated, spec);
        }
        ('f', Some(Arg::Float(v))) => {
            let body = if v.is_nan() || v.is_infinite() {
                let mut buf = [0u8; 64];
                let n = numeric::dtostr(*v, 17, numeric::FloatMode::Fixed, &mut buf);
                String::from(core::str::from_utf8(&buf[..n]).unwrap_or("0"))
            } else {
                let mut buf = [0u8; 64];
                let precision = spec.precision.unwrap_or(6);
                let n = numeric::dtostr(*v, 17, numeric::FloatMode::Fixed, &mut buf);
                let rendered = core::str::from_utf8(&buf[..n]).unwrap_or("0");
                reformat_fixed(rendered, precision)
            };
            let negative = body.starts_with('-');
            let body = apply_sign(body, negative, spec);
            pad(out, &body, spec);
        }
        ('e', Some(Arg::Float(v))) => {
            let mut buf = [0u8; 64];
            let sig_figs = spec.precision.map(|p| p + 1).unwrap_or(14) as u32;
            let n = numeric::dtostr(*v, sig_figs, numeric::FloatMode::Scientific, &mut buf);
            let rendered = core::str::from_utf8(&buf[..n]).unwrap_or("0");
            pad(out, rendered, spec);
        }
        ('g', Some(Arg::Float(v))) => {
            let mut buf = [0u8; 64];
            let sig_figs = spec.precision.map(|p| p + 1).unwrap_or(14) as u32;
            let n = numeric::dtostr(*v, sig_figs, numeric::FloatMode::Auto, &mut buf);
            let rendered = core::str::from_utf8(&buf[..n]).unwrap_or("0");
            pad(out, rendered, spec);
        }
        ('p', Some(Arg::Ptr(maybe))) => {
            let body = match maybe {
                None => String::from("(nil)"),
                Some(addr) => alloc::format!("0x{}", uitostr(*addr as u64, &mut numbuf, 16, false)),
            };
            pad(out, &body, spec);
        }
        _ => out.push_str(BAD_FORMAT_MARKER),
    }
}

/// Crude decimal-point repositioning for `%f`: `dtostr` above always
/// produces a plain or exponential decimal string with up to 17
/// significant digits; this widens/narrows the fractional part to
/// exactly `precision` digits by simple truncation/zero-padding rather
/// than re-deriving the value, which is adequate for this engine's
/// `%f` use (no re-rounding across the decimal point boundary).
fn reformat_fixed(rendered: &str, precision: usize) -> String {
    if let Some(e_pos) = rendered.find(['e', 'E']) {
        // Extremely small/large magnitudes that round-tripped through
        // exponential form are rendered as 0 with the right sign rather
        // than attempting fixed-point expansion of a huge exponent.
        let negative = rendered.starts_with('-');
        let _ = e_pos;
        let mut s = String::new();
        if negative {
            s.push('-');
        }
        s.push('0');
        if precision > 0 {
            s.push('.');
            for _ in 0..precision {
                s.push('0');
            }
        }
        return s;
    }

    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i, f),
        None => (rendered, ""),
    };

    let mut out = String::from(int_part);
    if precision > 0 {
        out.push('.');
        for i in 0..precision {
            out.push(*frac_part.as_bytes().get(i).unwrap_or(&b'0') as char);
        }
    }
    out
}

/// Formats `fmt` against `args`, consuming one `Arg` per non-`%%`
/// directive in order. Returns `None` if `fmt` is `None` (the null
/// format-string sentinel case).
pub fn vstrprintf(fmt: Option<&str>, args: &[Arg]) -> Option<String> {
    let fmt = fmt?;
    let mut out = String::with_capacity(fmt.len());
    let mut chars = fmt.char_indices().peekable();
    let mut arg_idx = 0usize;

    while let Some((_, c)) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match parse_spec(&mut chars, fmt) {
            Some(spec) if spec.conv == '%' => out.push('%'),
            Some(spec) => {
                render_one(&spec, args.get(arg_idx), &mut out);
                arg_idx += 1;
            }
            None => out.push_str(BAD_FORMAT_MARKER),
        }
    }

    Some(out)
}

/// `snprintf`: `buf == None` behaves like the C idiom `snprintf(NULL, 0,
/// ...)`, reporting the length that would have been written without
/// writing anything. Returns [`NPOS`] if `fmt` is `None`. The written
/// bytes (when `buf` is `Some`) are always NUL-terminated if `buf` is
/// non-empty, truncating the rendered text to make room.
pub fn snprintf(buf: Option<&mut [u8]>, fmt: Option<&str>, args: &[Arg]) -> usize {
    let Some(rendered) = vstrprintf(fmt, args) else {
        return NPOS;
    };

    match buf {
        None => rendered.len(),
        Some(buf) if buf.is_empty() => NPOS,
        Some(buf) => {
            let n = rendered.len().min(buf.len() - 1);
            buf[..n].copy_from_slice(&rendered.as_bytes()[..n]);
            buf[n] = 0;
            rendered.len()
        }
    }
}

/// `sprintf`: unbounded — writes as much as `buf` can hold minus the
/// terminator, same truncation behaviour as `snprintf`.
pub fn sprintf(buf: &mut [u8], fmt: Option<&str>, args: &[Arg]) -> usize {
    snprintf(Some(buf), fmt, args)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt1(f: &str, arg: Arg) -> String {
        vstrprintf(Some(f), &[arg]).unwrap()
    }

    #[test]
    fn int_min_round_trips() {
        assert_eq!(fmt1("%d", Arg::Int(i64::from(i32::MIN))), "-2147483648");
    }

    #[test]
    fn hex_upper_always_prefixed() {
        assert_eq!(fmt1("%X", Arg::UInt(0xABCD)), "0xABCD");
    }

    #[test]
    fn octal_always_prefixed() {
        assert_eq!(fmt1("%o", Arg::UInt(8)), "010");
    }

    #[test]
    fn lowercase_x_is_not_a_conversion() {
        assert_eq!(fmt1("%x", Arg::UInt(0xABCD)), BAD_FORMAT_MARKER);
    }

    #[test]
    fn bad_format_marker_matches_spec_text_and_length() {
        assert_eq!(BAD_FORMAT_MARKER, "Bad Format");
        assert_eq!(BAD_FORMAT_MARKER.len(), 10);
        assert_eq!(fmt1("%q", Arg::Int(0)).len(), 10);
    }

    #[test]
    fn g_picks_scientific_for_small_magnitude() {
        let s = fmt1("%g", Arg::Float(0.0005));
        assert!(s.contains('e'), "expected scientific notation, got {s:?}");
    }

    #[test]
    fn g_picks_fixed_for_ordinary_magnitude() {
        let s = fmt1("%g", Arg::Float(123.5));
        assert!(!s.contains('e'), "expected fixed notation, got {s:?}");
    }

    #[test]
    fn e_is_always_scientific() {
        let s = fmt1("%e", Arg::Float(123.5));
        assert!(s.contains('e'), "expected scientific notation, got {s:?}");
    }

    #[test]
    fn f_renders_infinity_and_nan() {
        assert_eq!(fmt1("%f", Arg::Float(f64::INFINITY)), "INF");
        assert_eq!(fmt1("%f", Arg::Float(f64::NEG_INFINITY)), "-INF");
        assert_eq!(fmt1("%f", Arg::Float(f64::NAN)), "NaN");
    }

    #[test]
    fn snprintf_truncates_and_reports_full_length() {
        let mut buf = [0u8; 3];
        let n = snprintf(Some(&mut buf), Some("%d"), &[Arg::Int(1234)]);
        assert_eq!(n, 4);
        assert_eq!(&buf, b"12\0");
    }

    #[test]
    fn null_format_is_sentinel() {
        assert_eq!(vstrprintf(None, &[]), None);
        assert_eq!(snprintf(Some(&mut [0u8; 8]), None, &[]), NPOS);
    }
}
