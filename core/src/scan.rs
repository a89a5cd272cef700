//! Best-effort JSON field scanner
//!
//! This is not a JSON parser. Every lookup works the same way:
//!
//! 1. find the first textual occurrence of the quoted key (`"key"`)
//! 2. skip whitespace and require a `:`
//! 3. skip whitespace and scan one typed value
//!
//! Only the first occurrence of the quoted key is considered. If that
//! occurrence is not followed by `:` (for example because the key name
//! appears as a string value earlier in the text) the lookup fails rather
//! than searching further. The scanner knows nothing about nesting, so two
//! objects sharing a key name resolve to whichever comes first. Cloud
//! messages have fixed, known shapes, which makes this acceptable.

use core::fmt::Write as _;

use heapless::String;

/// Capacity of an extracted request id
pub const REQUEST_ID_CAPACITY: usize = 64;

/// Opaque request id echoed back in replies
pub type RequestId = String<REQUEST_ID_CAPACITY>;

/// Byte offset just past the first `"key"` in `text`
fn quoted_key_end(text: &str, key: &str) -> Option<usize> {
    let step = key.chars().next()?.len_utf8();
    let bytes = text.as_bytes();
    let mut from = 0;
    while let Some(pos) = text[from..].find(key) {
        let start = from + pos;
        let end = start + key.len();
        if start > 0 && bytes[start - 1] == b'"' && bytes.get(end) == Some(&b'"') {
            return Some(end + 1);
        }
        from = start + step;
    }
    None
}

/// Text following `"key"` and its `:`, with leading whitespace removed
pub fn find_value<'t>(text: &'t str, key: &str) -> Option<&'t str> {
    let after_key = &text[quoted_key_end(text, key)?..];
    let rest = after_key.trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

/// Parse a leading decimal integer with an optional `-`
///
/// Stops at the first non-digit; rejects a value with no digits and one
/// that does not fit `i32`.
fn parse_int(value: &str) -> Option<i32> {
    let (negative, digits) = match value.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, value),
    };
    let len = digits.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }
    let mut n: i32 = 0;
    for b in digits[..len].bytes() {
        let digit = i32::from(b - b'0');
        n = n.checked_mul(10)?;
        n = if negative {
            n.checked_sub(digit)?
        } else {
            n.checked_add(digit)?
        };
    }
    Some(n)
}

pub fn find_int(text: &str, key: &str) -> Option<i32> {
    parse_int(find_value(text, key)?)
}

/// Raw string value up to the next unescaped quote
///
/// Escape sequences are left as-is in the returned slice.
pub fn find_str<'t>(text: &'t str, key: &str) -> Option<&'t str> {
    let body = find_value(text, key)?.strip_prefix('"')?;
    let mut escaped = false;
    for (i, b) in body.bytes().enumerate() {
        match b {
            _ if escaped => escaped = false,
            b'\\' => escaped = true,
            b'"' => return Some(&body[..i]),
            _ => {}
        }
    }
    None
}

/// The request `"id"`, as a string or, failing that, an integer
///
/// An empty or oversized id counts as missing.
pub fn find_id(text: &str) -> Option<RequestId> {
    let mut id = RequestId::new();
    match find_str(text, "id") {
        Some("") => return None,
        Some(s) => id.push_str(s).ok()?,
        None => write!(id, "{}", find_int(text, "id")?).ok()?,
    }
    Some(id)
}

/// Inner text of an array value, between `[` and the first `]`
pub fn find_array<'t>(text: &'t str, key: &str) -> Option<&'t str> {
    let body = find_value(text, key)?.strip_prefix('[')?;
    let end = body.find(']')?;
    Some(&body[..end])
}

/// Whether `"name"` appears anywhere in `array`
pub fn array_contains(array: &str, name: &str) -> bool {
    quoted_key_end(array, name).is_some()
}

/// Integer at `key.value`, as in `{"crop_stage":{"value":3}}`
pub fn find_nested_int(text: &str, key: &str) -> Option<i32> {
    let object = find_value(text, key)?.strip_prefix('{')?;
    let end = object.find('}').unwrap_or(object.len());
    find_int(&object[..end], "value")
}

/// Whether the text is a JSON document with its quotes backslash-escaped
///
/// The modem reports payloads verbatim, so a payload that was itself sent
/// as an escaped string arrives as `{\"id\":\"7\"}`.
pub fn looks_escaped(text: &str) -> bool {
    match text.find('"') {
        Some(i) => i > 0 && text.as_bytes()[i - 1] == b'\\',
        None => false,
    }
}

/// Undo `\"`, `\\` and `\/` escapes; other sequences are kept verbatim
///
/// `None` if the result does not fit `N` bytes.
pub fn unescape<const N: usize>(text: &str) -> Option<String<N>> {
    let mut out = String::new();
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        let c = if c == '\\' {
            match chars.next() {
                Some(next @ ('"' | '\\' | '/')) => next,
                Some(other) => {
                    out.push('\\').ok()?;
                    other
                }
                None => '\\',
            }
        } else {
            c
        };
        out.push(c).ok()?;
    }
    Some(out)
}
