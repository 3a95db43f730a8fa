//! Server-side scripts for multi-key presence updates.
//!
//! Both scripts take the inner set (`presence:{channel}:{key}`) as KEYS[1]
//! and the outer set (`presence:{channel}`) as KEYS[2], so the membership
//! test and the set mutation cannot interleave with another writer.

use redis::Script;

/// ARGV: connection id, ttl seconds, presence key.
/// Returns 1 when the inner set went empty → non-empty (a join).
const PRESENCE_ADD: &str = r"
local was_empty = redis.call('SCARD', KEYS[1]) == 0
redis.call('SADD', KEYS[1], ARGV[1])
redis.call('EXPIRE', KEYS[1], ARGV[2])
if was_empty then
  redis.call('SADD', KEYS[2], ARGV[3])
end
redis.call('EXPIRE', KEYS[2], ARGV[2])
if was_empty then
  return 1
end
return 0
";

/// ARGV: connection id, presence key.
/// Returns 1 when the inner set went non-empty → empty (a leave).
const PRESENCE_REMOVE: &str = r"
redis.call('SREM', KEYS[1], ARGV[1])
if redis.call('SCARD', KEYS[1]) == 0 then
  redis.call('DEL', KEYS[1])
  redis.call('SREM', KEYS[2], ARGV[2])
  return 1
end
return 0
";

pub fn presence_add() -> Script {
    Script::new(PRESENCE_ADD)
}

pub fn presence_remove() -> Script {
    Script::new(PRESENCE_REMOVE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripts_touch_both_keys() {
        // The two-key shape is the atomicity contract; keep it explicit.
        assert!(PRESENCE_ADD.contains("KEYS[1]"));
        assert!(PRESENCE_ADD.contains("KEYS[2]"));
        assert!(PRESENCE_REMOVE.contains("KEYS[1]"));
        assert!(PRESENCE_REMOVE.contains("KEYS[2]"));
        let _ = presence_add();
        let _ = presence_remove();
    }
}
