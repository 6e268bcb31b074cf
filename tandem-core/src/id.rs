//! Sortable string identifiers.
//!
//! Ids are `"{unix_millis}-{base36}"` so that lexicographic order within a
//! millisecond bucket follows creation order closely enough for log
//! correlation. The random suffix is derived from UUID v4 bits.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Encode the low bits of `value` as a fixed-width base36 string.
fn base36(mut value: u128, width: usize) -> String {
    let mut out = vec![b'0'; width];
    for slot in out.iter_mut().rev() {
        *slot = BASE36[(value % 36) as usize];
        value /= 36;
    }
    String::from_utf8(out).expect("base36 alphabet is ascii")
}

/// A monotonically sortable unique id: `"{unix_millis}-{9-char-base36}"`.
pub fn sortable_id() -> String {
    format!("{}-{}", unix_millis(), base36(Uuid::new_v4().as_u128(), 9))
}
