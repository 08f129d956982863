//! 限额检查器
//!
//! 按声明顺序逐条检查规则附带的限额，遇到第一条超限即返回
//! （先超先报，不做聚合）。每条限额先由 tracking key 在上下文的
//! windows 映射中查找窗口快照；无快照时回退到实时用量计数器。
//! 已过期的快照按未超限处理——窗口的滚动与回收归调用方负责，
//! 引擎不重算也不改写任何窗口。

use crate::models::{EvaluationContext, Limit, WindowKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

/// 限额检查结果
///
/// `exceeded` 为真时其余字段描述命中的限额；为假时全部为空。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitCheckResult {
    pub exceeded: bool,
    pub limit: Option<Limit>,
    pub current: Option<f64>,
    pub max: Option<f64>,
    pub window: Option<WindowKind>,
}

impl LimitCheckResult {
    fn not_exceeded() -> Self {
        Self::default()
    }

    fn exceeded_by(limit: &Limit, current: f64, max: f64) -> Self {
        Self {
            exceeded: true,
            limit: Some(limit.clone()),
            current: Some(current),
            max: Some(max),
            window: Some(limit.window),
        }
    }
}

/// 限额检查器
pub struct LimitChecker;

impl LimitChecker {
    /// 检查限额列表，返回第一条超限的限额；列表为空时未超限
    pub fn check(
        limits: &[Limit],
        context: &EvaluationContext,
        now: DateTime<Utc>,
    ) -> LimitCheckResult {
        for limit in limits {
            let result = Self::check_one(limit, context, now);
            if result.exceeded {
                return result;
            }
        }
        LimitCheckResult::not_exceeded()
    }

    fn check_one(limit: &Limit, context: &EvaluationContext, now: DateTime<Utc>) -> LimitCheckResult {
        let key = Self::tracking_key(limit, context);

        let Some(window) = context.window(&key) else {
            // 无窗口快照：用实时计数器对照限额上限
            let current = context.usage().counter(limit.limit_type);
            if current >= limit.max {
                debug!(
                    tracking_key = %key,
                    current,
                    max = limit.max,
                    "用量计数器超限"
                );
                return LimitCheckResult::exceeded_by(limit, current, limit.max);
            }
            return LimitCheckResult::not_exceeded();
        };

        // 重置时间已到的窗口视为过期，按未超限处理
        if window.resets_at <= now {
            debug!(tracking_key = %key, resets_at = %window.resets_at, "窗口已过期，跳过限额");
            return LimitCheckResult::not_exceeded();
        }

        if window.current >= window.limit {
            debug!(
                tracking_key = %key,
                current = window.current,
                limit = window.limit,
                "窗口快照超限"
            );
            return LimitCheckResult::exceeded_by(limit, window.current, window.limit);
        }

        LimitCheckResult::not_exceeded()
    }

    /// 派生 tracking key：`{type}_{window}_{per}`，
    /// 追加 tracking_key 路径的解析值；无则追加 per 路径的解析值；都无时仅基础键
    pub fn tracking_key(limit: &Limit, context: &EvaluationContext) -> String {
        let base = format!("{}_{}_{}", limit.limit_type, limit.window, limit.per);

        if let Some(path) = &limit.tracking_key {
            if let Some(value) = context.get_field(path) {
                return format!("{}_{}", base, Self::key_fragment(value));
            }
        }

        if let Some(value) = context.get_field(&limit.per) {
            return format!("{}_{}", base, Self::key_fragment(value));
        }

        base
    }

    fn key_fragment(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
