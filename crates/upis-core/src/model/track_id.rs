//! Time-ordered track identifiers.

/// 2019-01-01T00:00:00Z in milliseconds since the Unix epoch.
pub const ERA_START_MS: i64 = 1_546_300_800_000;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Mint a track identifier that sorts with creation time.
///
/// Base-36 of `(now_ms - ERA_START_MS) * 24`. Two calls within the same
/// millisecond collide, so uniqueness stays the caller's problem.
pub fn time_ordered_id(now_ms: i64) -> String {
    let mut value = (now_ms.saturating_sub(ERA_START_MS).max(0) as u64).saturating_mul(24);

    if value == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::with_capacity(13);
    while value > 0 {
        digits.push(ALPHABET[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();

    String::from_utf8_lossy(&digits).into_owned()
}
