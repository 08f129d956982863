//! 条件匹配器
//!
//! 对条件树做短路求值。简单条件的各字段之间是隐式 AND；
//! 比较操作符集合内的各操作符也必须全部通过。
//! 字段缺失不抛错：等值、序比较和 in 视为不成立，neq/nin 视为成立，
//! 文本操作符仅作用于字符串值、对其余类型（含缺失）直接跳过。

use crate::models::{
    ComparisonSet, Condition, EvaluationContext, FieldPredicate, LogicalCondition, SimpleCondition,
};
use serde_json::Value;
use std::cmp::Ordering;

/// 条件匹配器
pub struct ConditionMatcher;

impl ConditionMatcher {
    /// 判断条件是否在给定上下文中成立
    pub fn matches(condition: &Condition, context: &EvaluationContext) -> bool {
        match condition {
            Condition::Logical(logical) => Self::match_logical(logical, context),
            Condition::Simple(fields) => Self::match_simple(fields, context),
        }
    }

    fn match_logical(logical: &LogicalCondition, context: &EvaluationContext) -> bool {
        if let Some(children) = &logical.and {
            // 空列表恒为真
            return children.iter().all(|c| Self::matches(c, context));
        }

        if let Some(children) = &logical.or {
            // 空列表恒为假
            return children.iter().any(|c| Self::matches(c, context));
        }

        if let Some(inner) = &logical.not {
            return !Self::matches(inner, context);
        }

        // 没有任何算子时退化为空的简单条件
        true
    }

    fn match_simple(fields: &SimpleCondition, context: &EvaluationContext) -> bool {
        fields.iter().all(|(field_path, predicate)| {
            let value = context.get_field(field_path);
            match predicate {
                FieldPredicate::Ops(ops) => Self::match_comparison(value, ops),
                FieldPredicate::Literal(expected) => Self::match_literal(value, expected),
            }
        })
    }

    /// 字面量精确匹配；字段缺失时不成立
    fn match_literal(value: Option<&Value>, expected: &Value) -> bool {
        match value {
            Some(v) => Self::value_eq(v, expected),
            None => false,
        }
    }

    /// 值相等比较
    ///
    /// 数值统一转为浮点数比较，避免整数和浮点数比较失败（如 100 == 100.0）；
    /// 其他类型结构化比较。
    fn value_eq(a: &Value, b: &Value) -> bool {
        if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
            return (x - y).abs() < f64::EPSILON;
        }
        a == b
    }

    fn match_comparison(value: Option<&Value>, ops: &ComparisonSet) -> bool {
        if let Some(expected) = &ops.gt {
            if !Self::compare_ordered(value, expected, |o| o == Ordering::Greater) {
                return false;
            }
        }
        if let Some(expected) = &ops.gte {
            if !Self::compare_ordered(value, expected, |o| o != Ordering::Less) {
                return false;
            }
        }
        if let Some(expected) = &ops.lt {
            if !Self::compare_ordered(value, expected, |o| o == Ordering::Less) {
                return false;
            }
        }
        if let Some(expected) = &ops.lte {
            if !Self::compare_ordered(value, expected, |o| o != Ordering::Greater) {
                return false;
            }
        }

        if let Some(expected) = &ops.eq {
            match value {
                Some(v) if Self::value_eq(v, expected) => {}
                _ => return false,
            }
        }
        if let Some(expected) = &ops.neq {
            // 缺失值与任何字面量都不相等，neq 视为通过
            if let Some(v) = value {
                if Self::value_eq(v, expected) {
                    return false;
                }
            }
        }

        if let Some(list) = &ops.r#in {
            match value {
                Some(v) if list.iter().any(|item| Self::value_eq(v, item)) => {}
                _ => return false,
            }
        }
        if let Some(list) = &ops.nin {
            if let Some(v) = value {
                if list.iter().any(|item| Self::value_eq(v, item)) {
                    return false;
                }
            }
        }

        // 文本操作符仅在值为字符串时生效，其余情况跳过
        if let Some(s) = value.and_then(Value::as_str) {
            if let Some(sub) = &ops.contains {
                if !s.contains(sub.as_str()) {
                    return false;
                }
            }
            if let Some(prefix) = &ops.starts_with {
                if !s.starts_with(prefix.as_str()) {
                    return false;
                }
            }
            if let Some(suffix) = &ops.ends_with {
                if !s.ends_with(suffix.as_str()) {
                    return false;
                }
            }
        }

        true
    }

    /// 序比较：两侧都是数值按数值比，都是字符串按字典序比，其余不成立
    fn compare_ordered(
        value: Option<&Value>,
        expected: &Value,
        accept: impl Fn(Ordering) -> bool,
    ) -> bool {
        let Some(value) = value else { return false };

        let ordering = match (value.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => match (value.as_str(), expected.as_str()) {
                (Some(a), Some(b)) => Some(a.cmp(b)),
                _ => None,
            },
        };

        ordering.map(&accept).unwrap_or(false)
    }
}
