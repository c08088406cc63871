//! 权限集合模块
//!
//! 将"可编辑/可见用户名列表"的字符串匹配抽象为类型化的权限集合：
//! 用户名集合 + 通配符哨兵。问卷、题目、问卷上下文均携带
//! `editable_to` / `visible_to` 两个权限集合，数据库中以 JSON 数组存储。

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// 通配符哨兵：表示对所有用户开放
pub const WILDCARD: &str = "*";

/// 权限集合
///
/// 序列化为 JSON 字符串数组，与数据库权限列保持一致。
/// 使用 `BTreeSet` 保证序列化输出稳定。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    users: BTreeSet<String>,
}

impl PermissionSet {
    /// 空集合（不对任何用户开放）
    pub fn new() -> Self {
        Self::default()
    }

    /// 通配符集合（对所有用户开放）
    pub fn wildcard() -> Self {
        let mut set = Self::default();
        set.users.insert(WILDCARD.to_string());
        set
    }

    /// 从用户名列表构建
    pub fn from_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
        }
    }

    /// 授权指定用户
    pub fn grant(&mut self, user: impl Into<String>) {
        self.users.insert(user.into());
    }

    /// 撤销指定用户（通配符需显式撤销）
    pub fn revoke(&mut self, user: &str) {
        self.users.remove(user);
    }

    /// 判断用户是否在权限集合内（通配符放行所有用户）
    pub fn can(&self, user: &str) -> bool {
        self.users.contains(WILDCARD) || self.users.contains(user)
    }

    /// 是否为空集合
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// 集合内用户数量（通配符计为一个条目）
    pub fn len(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_set_denies_everyone() {
        let set = PermissionSet::new();
        assert!(!set.can("alice"));
        assert!(set.is_empty());
    }

    #[test]
    fn test_wildcard_admits_any_user() {
        let set = PermissionSet::wildcard();
        assert!(set.can("alice"));
        assert!(set.can("bob"));
    }

    #[test]
    fn test_named_user_only() {
        let set = PermissionSet::from_users(["alice"]);
        assert!(set.can("alice"));
        assert!(!set.can("bob"));
    }

    #[test]
    fn test_grant_and_revoke() {
        let mut set = PermissionSet::new();
        set.grant("alice");
        assert!(set.can("alice"));
        set.revoke("alice");
        assert!(!set.can("alice"));
    }

    #[test]
    fn test_json_round_trip() {
        let set = PermissionSet::from_users(["alice", "*"]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, r#"["*","alice"]"#);
        let back: PermissionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(set, back);
    }
}
