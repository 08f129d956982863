//! 规则解析器
//!
//! 评估的编排层：按优先级降序排列规则（同优先级保持入参顺序），
//! 取第一条条件成立的规则，检查其限额，并合成最终决策。
//! 整个过程是两个输入的纯函数，唯一的外部输入是窗口过期判断
//! 所用的时钟，可通过 [`RuleResolver::evaluate_at`] 注入固定时刻。

use crate::limiter::{LimitCheckResult, LimitChecker};
use crate::matcher::ConditionMatcher;
use crate::models::{
    ActionKind, EvaluationContext, EvaluationResult, Limit, LimitDetails, OnLimitExceeded,
    OverrideAction, Rule, WindowKind,
};
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use tracing::debug;

/// 规则解析器
///
/// 无内部状态，可在多线程间并发调用。
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleResolver;

impl RuleResolver {
    pub fn new() -> Self {
        Self
    }

    /// 评估规则集，窗口过期判断使用当前时钟
    pub fn evaluate(&self, rules: &[Rule], context: &EvaluationContext) -> EvaluationResult {
        self.evaluate_at(rules, context, Utc::now())
    }

    /// 评估规则集，使用注入的评估时刻（可复现）
    pub fn evaluate_at(
        &self,
        rules: &[Rule],
        context: &EvaluationContext,
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        // 稳定排序：优先级降序，同优先级保持原始顺序
        let mut order: Vec<usize> = (0..rules.len()).collect();
        order.sort_by_key(|&i| Reverse(rules[i].priority));

        for index in order {
            let rule = &rules[index];
            if !ConditionMatcher::matches(&rule.condition, context) {
                continue;
            }

            debug!(
                rule_id = rule.id.as_deref().unwrap_or("<anonymous>"),
                priority = rule.priority,
                "规则命中"
            );

            let limits: &[Limit] = rule.then.limits.as_deref().unwrap_or(&[]);
            let limit_result = LimitChecker::check(limits, context, now);

            if limit_result.exceeded {
                if let Some(on_exceeded) = &rule.then.on_limit_exceeded {
                    return Self::compose_override(rule, &limit_result, on_exceeded);
                }
            }

            return Self::compose_matched(rule, &limit_result);
        }

        // 无规则命中：默认放行
        EvaluationResult::no_match()
    }

    /// 常规合成：未超限时用规则声明的动作（缺省 allow），
    /// 超限且无覆盖策略时强制 block
    fn compose_matched(rule: &Rule, limit_result: &LimitCheckResult) -> EvaluationResult {
        let action = if limit_result.exceeded {
            ActionKind::Block
        } else {
            rule.then.action.unwrap_or_default()
        };

        EvaluationResult {
            matched: true,
            rule_id: rule.id.clone(),
            action,
            model: rule.then.model.clone(),
            model_params: rule.then.model_params.clone(),
            limit_exceeded: limit_result.exceeded,
            limit_details: Self::limit_details(limit_result),
            priority: Some(rule.priority),
            custom_fields: rule.then.custom_fields.clone(),
            ..EvaluationResult::no_match()
        }
    }

    /// 覆盖合成：downgrade 对调用方表现为 allow（放行但替换模型），
    /// 覆盖里的 error_code/error_message/http_status 原样透传
    fn compose_override(
        rule: &Rule,
        limit_result: &LimitCheckResult,
        on_exceeded: &OnLimitExceeded,
    ) -> EvaluationResult {
        let action = match on_exceeded.action {
            OverrideAction::Downgrade => ActionKind::Allow,
            OverrideAction::Block => ActionKind::Block,
            OverrideAction::Warn => ActionKind::Warn,
            OverrideAction::Queue => ActionKind::Queue,
        };

        let model = match (on_exceeded.action, &on_exceeded.downgrade_to) {
            (OverrideAction::Downgrade, Some(target)) => Some(target.clone()),
            _ => rule.then.model.clone(),
        };

        debug!(
            rule_id = rule.id.as_deref().unwrap_or("<anonymous>"),
            override_action = ?on_exceeded.action,
            "限额超出，应用覆盖策略"
        );

        EvaluationResult {
            matched: true,
            rule_id: rule.id.clone(),
            action,
            model,
            limit_exceeded: true,
            limit_details: Self::limit_details(limit_result),
            error_code: on_exceeded.error_code.clone(),
            error_message: on_exceeded.error_message.clone(),
            http_status: on_exceeded.http_status,
            priority: Some(rule.priority),
            ..EvaluationResult::no_match()
        }
    }

    fn limit_details(result: &LimitCheckResult) -> Option<LimitDetails> {
        if !result.exceeded {
            return None;
        }
        result.limit.as_ref().map(|limit| LimitDetails {
            limit_type: limit.limit_type,
            current: result.current.unwrap_or(0.0),
            limit: result.max.unwrap_or(0.0),
            window: result.window.unwrap_or(WindowKind::Total),
        })
    }
}
