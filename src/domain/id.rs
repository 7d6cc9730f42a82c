//! ID generation for sessions, records, and identities

use rand::Rng;

const SUFFIX_LEN: usize = 6;
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generate an id of the form `<prefix><millis>_<suffix>`
///
/// The millisecond timestamp keeps ids monotonic within a process; the random
/// suffix disambiguates ids minted in the same millisecond.
pub fn new_prefixed_id(prefix: &str) -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect();
    format!("{prefix}{millis}_{suffix}")
}
