//! The Redis key layout. Bit-exact where cluster compatibility matters:
//! other processes of the same deployment read these keys directly.

pub fn session(id: &str) -> String {
    format!("session:{id}")
}

/// Outer presence set: the distinct presence keys live on a channel.
pub fn presence_channel(channel: &str) -> String {
    format!("presence:{channel}")
}

/// Inner presence set: the connection ids currently holding one key.
pub fn presence_member(channel: &str, presence_key: &str) -> String {
    format!("presence:{channel}:{presence_key}")
}

pub fn rate_window(prefix: &str, identifier: &str, window: u64) -> String {
    format!("{prefix}:{identifier}:{window}")
}

pub fn oauth_client(id: &str) -> String {
    format!("oauth:client:{id}")
}

pub fn oauth_code(code: &str) -> String {
    format!("oauth:code:{code}")
}

pub fn oauth_token(token: &str) -> String {
    format!("oauth:token:{token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_stable() {
        assert_eq!(session("abc"), "session:abc");
        assert_eq!(presence_channel("room:1"), "presence:room:1");
        assert_eq!(presence_member("room:1", "u9"), "presence:room:1:u9");
        assert_eq!(rate_window("rate", "ip:1.2.3.4", 27), "rate:ip:1.2.3.4:27");
        assert_eq!(oauth_code("xyz"), "oauth:code:xyz");
    }
}
