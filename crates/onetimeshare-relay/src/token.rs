//! Secret tokens

use rand::RngCore;

/// Random bytes per token (128 bits)
pub const TOKEN_BYTES: usize = 16;

/// Generate a fresh unguessable token: 128 random bits as lowercase hex.
pub fn generate() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Short prefix of a token that is safe to put in logs.
pub fn redact(token: &str) -> &str {
    match token.char_indices().nth(8) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

/// Cheap shape check before a token reaches the store.
///
/// Accepts anything a key can safely hold: printable ASCII without whitespace
/// or the key separator, so both hex tokens and legacy UUID tokens pass.
pub fn is_well_formed(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= 128
        && token
            .bytes()
            .all(|b| b.is_ascii_graphic() && b != b':')
}
