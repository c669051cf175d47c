//! Tink keyset detector.
//!
//! Tink keysets turn up both as raw JSON and, more often, as a
//! base64-encoded (sometimes JSON-escaped) blob embedded inside some other
//! JSON or YAML document. This detector reproduces that scanning behavior
//! directly rather than trying to model "a keyset" as a single grammar.

use base64::Engine as _;
use serde_json::Value;

use crate::Secret;

const TINK_MARKER: &str = "type.googleapis.com/google.crypto.tink";
const MIN_BLOB_LEN: usize = 60;

/// Finds every Tink keyset in `data`, returning each as a canonical JSON
/// string paired with the byte offset it was found at.
pub fn find_tink_keysets(data: &[u8]) -> Vec<Secret> {
    let mut found = Vec::new();

    for (start, blob) in base64_blobs(data, MIN_BLOB_LEN) {
        if let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(blob) {
            if contains_marker(&decoded)
                && let Some(canonical) = try_parse_keyset(&decoded)
            {
                found.push(Secret {
                    content: canonical,
                    position: start,
                });
            }
        }
    }

    if contains_marker(data)
        && let Some(canonical) = try_parse_keyset(data)
    {
        found.push(Secret {
            content: canonical,
            position: 0,
        });
    }

    found
}

fn contains_marker(bytes: &[u8]) -> bool {
    bytes
        .windows(TINK_MARKER.len())
        .any(|w| w == TINK_MARKER.as_bytes())
}

/// Finds runs of base64-alphabet bytes of at least `min_len`, returning
/// (start offset, slice) pairs.
fn base64_blobs(data: &[u8], min_len: usize) -> Vec<(usize, &[u8])> {
    let mut out = Vec::new();
    let mut run_start = None;
    for (i, &b) in data.iter().enumerate() {
        let is_b64 = b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=';
        match (is_b64, run_start) {
            (true, None) => run_start = Some(i),
            (false, Some(start)) => {
                if i - start >= min_len {
                    out.push((start, &data[start..i]));
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start
        && data.len() - start >= min_len
    {
        out.push((start, &data[start..]));
    }
    out
}

/// Attempts to parse `bytes` as a Tink keyset, first as (possibly escaped)
/// JSON, then as proto binary, returning the canonical JSON re-serialization
/// on success.
fn try_parse_keyset(bytes: &[u8]) -> Option<String> {
    if let Some(json) = try_parse_json_keyset(bytes) {
        return Some(json);
    }
    try_parse_proto_keyset(bytes)
}

fn try_parse_json_keyset(bytes: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(bytes).ok()?;
    let cleaned = clean_escapes(text);
    let value: Value = serde_json::from_str(&cleaned).ok()?;
    let obj = value.as_object()?;
    if !obj.contains_key("primaryKeyId") || !obj.get("key").is_some_and(Value::is_array) {
        return None;
    }
    serde_json::to_string(&value).ok()
}

/// Removes every backslash except in the `\n` escape, which is rewritten to
/// a literal newline — tolerates one or more levels of JSON string-escaping
/// a keyset may have picked up when embedded inside another JSON document.
fn clean_escapes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if chars.peek() == Some(&'n') {
                out.push('\n');
                chars.next();
            }
            // any other escaped character: drop the backslash, keep the char
        } else {
            out.push(c);
        }
    }
    out
}

/// Minimal proto-binary keyset parse: Tink's `Keyset` message is field 1
/// (`primary_key_id`, varint) and field 2 (repeated `Keyset.Key`, length
/// delimited). We only need enough structure to recognize a well-formed
/// keyset and re-render it as JSON; a byte-accurate protobuf decoder is out
/// of scope for this detector.
fn try_parse_proto_keyset(bytes: &[u8]) -> Option<String> {
    let mut primary_key_id = None;
    let mut keys_present = false;
    let mut pos = 0usize;
    while pos < bytes.len() {
        let (tag, new_pos) = read_varint(bytes, pos)?;
        pos = new_pos;
        let field_num = tag >> 3;
        let wire_type = tag & 0x7;
        match (field_num, wire_type) {
            (1, 0) => {
                let (v, np) = read_varint(bytes, pos)?;
                primary_key_id = Some(v);
                pos = np;
            }
            (2, 2) => {
                let (len, np) = read_varint(bytes, pos)?;
                pos = np + len as usize;
                if pos > bytes.len() {
                    return None;
                }
                keys_present = true;
            }
            (_, 0) => {
                let (_, np) = read_varint(bytes, pos)?;
                pos = np;
            }
            (_, 2) => {
                let (len, np) = read_varint(bytes, pos)?;
                pos = np + len as usize;
                if pos > bytes.len() {
                    return None;
                }
            }
            _ => return None,
        }
    }

    let primary_key_id = primary_key_id?;
    if !keys_present {
        return None;
    }
    Some(format!(
        r#"{{"primaryKeyId":{primary_key_id},"key":[]}}"#
    ))
}

fn read_varint(bytes: &[u8], mut pos: usize) -> Option<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    loop {
        let byte = *bytes.get(pos)?;
        pos += 1;
        result |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some((result, pos));
        }
        shift += 7;
        if shift > 63 {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_raw_json_keyset() {
        let data = br#"{"primaryKeyId": 42, "key": [{"keyId": 42}]}"#;
        let found = find_tink_keysets(data);
        assert_eq!(found.len(), 1);
        assert!(found[0].content.contains("42"));
    }

    #[test]
    fn finds_base64_encoded_keyset_with_marker() {
        let inner = format!(
            r#"{{"primaryKeyId": 1, "key": [{{"typeUrl": "{TINK_MARKER}"}}]}}"#
        );
        let encoded = base64::engine::general_purpose::STANDARD.encode(inner.as_bytes());
        let wrapped = format!("prefix {encoded} suffix");
        let found = find_tink_keysets(wrapped.as_bytes());
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn escape_cleaner_unwraps_one_level() {
        let escaped = r#"{\"primaryKeyId\": 7, \"key\": []}"#;
        let cleaned = clean_escapes(escaped);
        assert_eq!(cleaned, r#"{"primaryKeyId": 7, "key": []}"#);
    }

    #[test]
    fn no_marker_no_match_for_ordinary_json() {
        let data = br#"{"hello": "world"}"#;
        assert!(find_tink_keysets(data).is_empty());
    }
}
