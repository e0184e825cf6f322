//! Reversible protection of colons that are not field separators.
//!
//! The grammar treats every bare `:` as `field:value`. URLs, `localhost:PORT`,
//! escaped colons and escaped backslashes are rewritten into placeholder text
//! before lexing and restored on every literal the parser hands out.

use std::sync::OnceLock;

use regex::Regex;

const BACKSLASH_PLACEHOLDER: &str = "HDX_BACKSLASH_LITERAL";
const COLON_PLACEHOLDER: &str = "HDX_COLON";

fn localhost_port() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"localhost:(\d{1,5})").expect("static regex"))
}

fn localhost_placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"localhost_COLON_(\d{1,5})").expect("static regex"))
}

/// Rewrites special sequences so the lexer sees them as plain term text.
///
/// Only the first URL scheme and the first `localhost:PORT` are protected,
/// every escaped backslash and escaped colon is.
pub fn encode_special_tokens(query: &str) -> String {
    let encoded = query
        .replace(r"\\", BACKSLASH_PLACEHOLDER)
        .replacen("http://", "http_COLON_//", 1)
        .replacen("https://", "https_COLON_//", 1);
    localhost_port()
        .replacen(&encoded, 1, "localhost_COLON_$1")
        .replace(r"\:", COLON_PLACEHOLDER)
}

/// Inverse of [`encode_special_tokens`], applied to individual literals.
/// Escaped quotes are unescaped as well.
pub fn decode_special_tokens(literal: &str) -> String {
    let decoded = literal
        .replace("\\\"", "\"")
        .replace(BACKSLASH_PLACEHOLDER, "\\")
        .replacen("http_COLON_//", "http://", 1)
        .replacen("https_COLON_//", "https://", 1);
    localhost_placeholder()
        .replacen(&decoded, 1, "localhost:$1")
        .replace(COLON_PLACEHOLDER, ":")
}

/// Maps a byte offset in encoded text to the same position in the raw query.
/// Offsets on token boundaries never fall inside a placeholder.
pub fn raw_offset(encoded: &str, offset: usize) -> usize {
    let prefix = encoded.get(..offset).unwrap_or(encoded);
    prefix
        .replace(BACKSLASH_PLACEHOLDER, r"\\")
        .replace("http_COLON_//", "http://")
        .replace("https_COLON_//", "https://")
        .replace("localhost_COLON_", "localhost:")
        .replace(COLON_PLACEHOLDER, r"\:")
        .len()
}
