//! 资源 key 命名空间
//!
//! key 格式为 `{namespace}:{id}`，同一个 key 在进程内最多对应一个底层订阅。

const NS_NOTIFICATIONS: &str = "notifications";
const NS_PAIR: &str = "pair";
const NS_NUDGES: &str = "nudges";

fn resource_key(namespace: &str, id: &str) -> String {
    format!("{namespace}:{id}")
}

/// 用户的通知列表
pub fn notifications_key(uid: &str) -> String {
    resource_key(NS_NOTIFICATIONS, uid)
}

/// 用户当前的配对关系
pub fn pair_key(uid: &str) -> String {
    resource_key(NS_PAIR, uid)
}

/// 某个配对关系下的 nudge 日志
pub fn nudges_key(pair_id: &str) -> String {
    resource_key(NS_NUDGES, pair_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(notifications_key("alice"), "notifications:alice");
        assert_eq!(pair_key("alice"), "pair:alice");
        assert_ne!(nudges_key("x"), notifications_key("x"));
    }
}
