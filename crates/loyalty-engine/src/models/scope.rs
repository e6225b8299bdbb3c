//! 适用范围
//!
//! 规则、活动、权益、兑换商品都可以限定适用的物业、等级或房型。
//! 存储层历史约定"空列表表示不限"，在加载时一次性转换为 `Scope::All`，
//! 内存中不再出现空集合的歧义。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// 适用范围：全部，或仅限给定集合
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "type", content = "values")]
pub enum Scope<T: Ord> {
    #[default]
    All,
    Only(BTreeSet<T>),
}

impl<T: Ord> Scope<T> {
    /// 从存储层列表构建，空列表视为不限
    pub fn from_list(values: impl IntoIterator<Item = T>) -> Self {
        let set: BTreeSet<T> = values.into_iter().collect();
        if set.is_empty() {
            Self::All
        } else {
            Self::Only(set)
        }
    }

    /// 仅限给定值
    pub fn only(values: impl IntoIterator<Item = T>) -> Self {
        Self::Only(values.into_iter().collect())
    }

    /// 是否覆盖给定值
    pub fn contains(&self, value: &T) -> bool {
        match self {
            Self::All => true,
            Self::Only(set) => set.contains(value),
        }
    }

    /// 是否覆盖一个可能缺失的值
    ///
    /// 受限范围遇到缺失值时视为不匹配
    pub fn admits(&self, value: Option<&T>) -> bool {
        match (self, value) {
            (Self::All, _) => true,
            (Self::Only(set), Some(v)) => set.contains(v),
            (Self::Only(_), None) => false,
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::All)
    }

    /// 转回存储层列表（不限 = 空列表）
    pub fn to_list(&self) -> Vec<T>
    where
        T: Clone,
    {
        match self {
            Self::All => Vec::new(),
            Self::Only(set) => set.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list_is_unrestricted() {
        let scope: Scope<i64> = Scope::from_list(Vec::new());
        assert!(scope.is_unrestricted());
        assert!(scope.contains(&42));
        assert!(scope.admits(None));
    }

    #[test]
    fn test_restricted_scope() {
        let scope = Scope::from_list(vec![1_i64, 2]);
        assert!(scope.contains(&1));
        assert!(!scope.contains(&3));
        assert!(!scope.admits(None));
        assert_eq!(scope.to_list(), vec![1, 2]);
    }

    #[test]
    fn test_scope_serde_shape() {
        let scope = Scope::only(vec![7_i64]);
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json, serde_json::json!({"type": "ONLY", "values": [7]}));
        let all: Scope<i64> = serde_json::from_value(serde_json::json!({"type": "ALL"})).unwrap();
        assert!(all.is_unrestricted());
    }
}
