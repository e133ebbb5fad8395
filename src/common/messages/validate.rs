//! Structural bencode check run before any field is interpreted.

const MAX_DEPTH: usize = 32;

/// Returns `true` if `bytes` hold exactly one well-formed bencoded value.
///
/// Rejects trailing bytes, truncated strings, malformed integers, non-string
/// dictionary keys and nesting deeper than 32 levels.
pub fn validate(bytes: &[u8]) -> bool {
    let mut pos = 0;

    scan_value(bytes, &mut pos, 0) && pos == bytes.len()
}

fn scan_value(data: &[u8], pos: &mut usize, depth: usize) -> bool {
    if depth > MAX_DEPTH {
        return false;
    }

    match data.get(*pos) {
        Some(b'i') => scan_integer(data, pos),
        Some(b'l') => {
            *pos += 1;
            while let Some(&c) = data.get(*pos) {
                if c == b'e' {
                    *pos += 1;
                    return true;
                }
                if !scan_value(data, pos, depth + 1) {
                    return false;
                }
            }
            false
        }
        Some(b'd') => {
            *pos += 1;
            while let Some(&c) = data.get(*pos) {
                if c == b'e' {
                    *pos += 1;
                    return true;
                }
                if !c.is_ascii_digit() || !scan_string(data, pos) {
                    return false;
                }
                if !scan_value(data, pos, depth + 1) {
                    return false;
                }
            }
            false
        }
        Some(c) if c.is_ascii_digit() => scan_string(data, pos),
        _ => false,
    }
}

fn scan_integer(data: &[u8], pos: &mut usize) -> bool {
    *pos += 1;

    let start = *pos;
    if data.get(*pos) == Some(&b'-') {
        *pos += 1;
    }

    let digits = *pos;
    while data.get(*pos).map_or(false, u8::is_ascii_digit) {
        *pos += 1;
    }

    let digits = &data[digits..*pos];
    if digits.is_empty() || digits.len() > 19 {
        return false;
    }
    // No leading zeros, and no negative zero.
    if digits[0] == b'0' && (digits.len() > 1 || data[start] == b'-') {
        return false;
    }

    if data.get(*pos) != Some(&b'e') {
        return false;
    }
    *pos += 1;

    true
}

fn scan_string(data: &[u8], pos: &mut usize) -> bool {
    let start = *pos;
    while data.get(*pos).map_or(false, u8::is_ascii_digit) {
        *pos += 1;
    }

    let digits = &data[start..*pos];
    if digits.is_empty() || digits.len() > 5 || (digits[0] == b'0' && digits.len() > 1) {
        return false;
    }

    if data.get(*pos) != Some(&b':') {
        return false;
    }
    *pos += 1;

    let len = digits
        .iter()
        .fold(0_usize, |acc, d| acc * 10 + (d - b'0') as usize);

    match pos.checked_add(len) {
        Some(end) if end <= data.len() => {
            *pos = end;
            true
        }
        _ => false,
    }
}
