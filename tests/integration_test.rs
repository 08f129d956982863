//! 策略引擎集成测试
//!
//! 覆盖完整的规则集编译、条件匹配、限额检查与决策合成工作流。

use chrono::{DateTime, Duration, Utc};
use policy_engine::{
    ActionKind, EvaluationContext, EvaluationResult, LimitType, Rule, RuleCompiler, RuleResolver,
    WindowKind,
};
use serde_json::json;

fn parse_rules(value: serde_json::Value) -> Vec<Rule> {
    serde_json::from_value(value).unwrap()
}

/// 固定的评估时刻，保证测试可复现
fn fixed_now() -> DateTime<Utc> {
    "2025-07-01T12:00:00Z".parse().unwrap()
}

fn evaluate(rules: &[Rule], context: &EvaluationContext) -> EvaluationResult {
    RuleResolver::new().evaluate_at(rules, context, fixed_now())
}

// ==================== 按层级路由 ====================

#[test]
fn test_routes_by_tier() {
    let rules = parse_rules(json!([
        { "if": { "tier": "free" }, "then": { "model": "gpt-3.5-turbo", "action": "allow" }, "priority": 1 },
        { "if": { "tier": "pro" }, "then": { "model": "gpt-4", "action": "allow" }, "priority": 1 }
    ]));

    let free_context = EvaluationContext::new(json!({
        "tier": "free",
        "usage": { "requests": 0, "tokens": 0, "cost": 0, "concurrent": 0 },
        "windows": {}
    }));
    let pro_context = EvaluationContext::new(json!({
        "tier": "pro",
        "usage": { "requests": 0, "tokens": 0, "cost": 0, "concurrent": 0 },
        "windows": {}
    }));

    let free_result = evaluate(&rules, &free_context);
    assert!(free_result.matched);
    assert_eq!(free_result.model.as_deref(), Some("gpt-3.5-turbo"));
    assert_eq!(free_result.action, ActionKind::Allow);

    let pro_result = evaluate(&rules, &pro_context);
    assert!(pro_result.matched);
    assert_eq!(pro_result.model.as_deref(), Some("gpt-4"));
    assert_eq!(pro_result.action, ActionKind::Allow);
}

// ==================== 限额触发 ====================

#[test]
fn test_blocks_when_over_limit() {
    let rules = parse_rules(json!([
        {
            "if": { "tier": "free" },
            "then": {
                "model": "gpt-3.5-turbo",
                "action": "allow",
                "limits": [
                    { "type": "requests", "max": 100, "window": "hour", "per": "user" }
                ]
            },
            "priority": 0
        }
    ]));

    let context = EvaluationContext::new(json!({
        "tier": "free",
        "user": "user123",
        "usage": { "requests": 150, "tokens": 0, "cost": 0, "concurrent": 0 },
        "windows": {}
    }));

    let result = evaluate(&rules, &context);
    assert!(result.matched);
    assert_eq!(result.action, ActionKind::Block);
    assert!(result.limit_exceeded);

    let details = result.limit_details.unwrap();
    assert_eq!(details.limit_type, LimitType::Requests);
    assert_eq!(details.current, 150.0);
    assert_eq!(details.limit, 100.0);
}

#[test]
fn test_downgrades_model_when_tokens_exceeded() {
    let rules = parse_rules(json!([
        {
            "if": { "tier": "pro" },
            "then": {
                "model": "gpt-4",
                "action": "allow",
                "limits": [
                    { "type": "tokens", "max": 50000, "window": "day", "per": "user" }
                ],
                "on_limit_exceeded": {
                    "action": "downgrade",
                    "downgrade_to": "gpt-3.5-turbo"
                }
            },
            "priority": 0
        }
    ]));

    let context = EvaluationContext::new(json!({
        "tier": "pro",
        "user": "user456",
        "usage": { "requests": 0, "tokens": 60000, "cost": 0, "concurrent": 0 },
        "windows": {}
    }));

    let result = evaluate(&rules, &context);
    assert!(result.matched);
    assert_eq!(result.action, ActionKind::Allow);
    assert_eq!(result.model.as_deref(), Some("gpt-3.5-turbo"));
    assert!(result.limit_exceeded);
}

// ==================== tracking key 分组 ====================

#[test]
fn test_custom_grouping_with_tracking_key() {
    let rules = parse_rules(json!([
        {
            "if": { "feature": { "in": ["chat", "completion"] } },
            "then": {
                "model": "gpt-3.5-turbo",
                "action": "allow",
                "limits": [
                    {
                        "type": "cost",
                        "max": 10,
                        "window": "month",
                        "per": "project",
                        "tracking_key": "project_id"
                    }
                ]
            },
            "priority": 0
        }
    ]));

    let mut context = EvaluationContext::new(json!({
        "feature": "chat",
        "project_id": "proj_123",
        "usage": { "requests": 0, "tokens": 0, "cost": 5, "concurrent": 0 },
        "windows": {
            "cost_month_project_proj_123": {
                "current": 8,
                "limit": 10,
                "resets_at": "2025-08-01T00:00:00Z"
            }
        }
    }));

    let result = evaluate(&rules, &context);
    assert!(result.matched);
    assert_eq!(result.action, ActionKind::Allow);
    assert!(!result.limit_exceeded);

    // 同一窗口冲到上限后改为 block
    context.set_field("windows.cost_month_project_proj_123.current", json!(11));
    let exceeded = evaluate(&rules, &context);
    assert!(exceeded.matched);
    assert_eq!(exceeded.action, ActionKind::Block);
    assert!(exceeded.limit_exceeded);
}

// ==================== 优先级解析 ====================

#[test]
fn test_resolves_multiple_matches_by_priority() {
    let rules = parse_rules(json!([
        { "id": "rule1", "if": { "tier": "pro" },
          "then": { "model": "gpt-3.5-turbo", "action": "allow" }, "priority": 1 },
        { "id": "rule2", "if": { "tier": "pro", "feature": "advanced" },
          "then": { "model": "gpt-4", "action": "allow" }, "priority": 10 },
        { "id": "rule3", "if": { "tier": "pro" },
          "then": { "model": "claude-2", "action": "allow" }, "priority": 5 }
    ]));

    let context = EvaluationContext::new(json!({
        "tier": "pro",
        "feature": "advanced",
        "usage": { "requests": 0, "tokens": 0, "cost": 0, "concurrent": 0 },
        "windows": {}
    }));

    let result = evaluate(&rules, &context);
    assert!(result.matched);
    assert_eq!(result.rule_id.as_deref(), Some("rule2"));
    assert_eq!(result.model.as_deref(), Some("gpt-4"));
    assert_eq!(result.priority, Some(10));
}

// ==================== 逻辑组合 ====================

#[test]
fn test_complex_logical_conditions() {
    let rules = parse_rules(json!([
        {
            "if": {
                "and": [
                    { "tier": "enterprise" },
                    { "or": [ { "usage.cost": { "lt": 100 } }, { "admin": true } ] }
                ]
            },
            "then": { "model": "gpt-4-32k", "action": "allow" },
            "priority": 0
        }
    ]));

    let under_budget = EvaluationContext::new(json!({
        "tier": "enterprise", "admin": false,
        "usage": { "requests": 0, "tokens": 0, "cost": 50, "concurrent": 0 },
        "windows": {}
    }));
    let admin = EvaluationContext::new(json!({
        "tier": "enterprise", "admin": true,
        "usage": { "requests": 0, "tokens": 0, "cost": 150, "concurrent": 0 },
        "windows": {}
    }));
    let neither = EvaluationContext::new(json!({
        "tier": "enterprise", "admin": false,
        "usage": { "requests": 0, "tokens": 0, "cost": 150, "concurrent": 0 },
        "windows": {}
    }));

    assert!(evaluate(&rules, &under_budget).matched);
    assert!(evaluate(&rules, &admin).matched);
    assert!(!evaluate(&rules, &neither).matched);
}

// ==================== 窗口过期 ====================

#[test]
fn test_window_expiry() {
    let rules = parse_rules(json!([
        {
            "if": { "tier": "free" },
            "then": {
                "model": "gpt-3.5-turbo",
                "action": "allow",
                "limits": [
                    { "type": "requests", "max": 10, "window": "hour", "per": "user" }
                ]
            },
            "priority": 0
        }
    ]));

    let past = (fixed_now() - Duration::hours(1)).to_rfc3339();
    let future = (fixed_now() + Duration::hours(1)).to_rfc3339();

    let expired_context = EvaluationContext::new(json!({
        "tier": "free",
        "user": "user789",
        "usage": { "requests": 5, "tokens": 0, "cost": 0, "concurrent": 0 },
        "windows": {
            "requests_hour_user_user789": {
                "current": 15, "limit": 10, "resets_at": past
            }
        }
    }));
    let active_context = EvaluationContext::new(json!({
        "tier": "free",
        "user": "user789",
        "usage": { "requests": 5, "tokens": 0, "cost": 0, "concurrent": 0 },
        "windows": {
            "requests_hour_user_user789": {
                "current": 15, "limit": 10, "resets_at": future
            }
        }
    }));

    // 过期窗口即使 current > limit 也按未超限处理
    let expired_result = evaluate(&rules, &expired_context);
    assert!(expired_result.matched);
    assert_eq!(expired_result.action, ActionKind::Allow);
    assert!(!expired_result.limit_exceeded);

    // 有效窗口严格按快照自身的 current/limit 判定，无视实时计数器
    let active_result = evaluate(&rules, &active_context);
    assert!(active_result.matched);
    assert_eq!(active_result.action, ActionKind::Block);
    assert!(active_result.limit_exceeded);
}

// ==================== 无命中与确定性 ====================

#[test]
fn test_no_match_defaults_to_allow() {
    let rules = parse_rules(json!([
        { "if": { "tier": "enterprise" }, "then": { "action": "block" } }
    ]));
    let context = EvaluationContext::new(json!({ "tier": "free", "usage": {}, "windows": {} }));

    let result = evaluate(&rules, &context);
    assert!(!result.matched);
    assert_eq!(result.action, ActionKind::Allow);

    let empty = evaluate(&[], &context);
    assert!(!empty.matched);
    assert_eq!(empty.action, ActionKind::Allow);
}

#[test]
fn test_evaluation_is_deterministic() {
    let rules = parse_rules(json!([
        { "id": "a", "if": { "tier": "pro" },
          "then": {
              "model": "gpt-4",
              "limits": [ { "type": "requests", "max": 100, "window": "hour", "per": "user" } ]
          },
          "priority": 3 },
        { "id": "b", "if": { "usage.cost": { "gte": 1 } }, "then": { "action": "warn" }, "priority": 7 }
    ]));
    let context = EvaluationContext::new(json!({
        "tier": "pro",
        "user": "u1",
        "usage": { "requests": 42, "cost": 1.5 },
        "windows": {
            "requests_hour_user_u1": {
                "current": 99, "limit": 100, "resets_at": "2025-07-01T13:00:00Z"
            }
        }
    }));

    let first = evaluate(&rules, &context);
    let second = evaluate(&rules, &context);
    assert_eq!(first, second);
}

// ==================== 编译 → 评估工作流 ====================

#[test]
fn test_compile_then_evaluate_workflow() {
    // 1. 编译规则集（结构校验 + 字段预提取）
    let mut compiler = RuleCompiler::new();
    let compiled = compiler
        .compile_from_json(
            r#"
            {
                "version": "1.0",
                "rules": [
                    {
                        "id": "enterprise-route",
                        "priority": 20,
                        "if": { "tier": "enterprise" },
                        "then": { "model": "gpt-4-32k" }
                    },
                    {
                        "id": "default-route",
                        "if": { "tier": { "in": ["free", "pro"] } },
                        "then": {
                            "model": "gpt-3.5-turbo",
                            "limits": [
                                { "type": "requests", "max": 100, "window": "hour", "per": "user.id" }
                            ],
                            "on_limit_exceeded": {
                                "action": "block",
                                "error_code": "RATE_LIMITED",
                                "http_status": 429
                            }
                        }
                    }
                ]
            }
            "#,
        )
        .unwrap();

    assert!(compiled.required_fields.contains("tier"));
    assert!(compiled.required_fields.contains("user.id"));

    // 2. 评估
    let resolver = RuleResolver::new();
    let context = EvaluationContext::new(json!({
        "tier": "pro",
        "user": { "id": "u-9" },
        "usage": { "requests": 101 },
        "windows": {}
    }));

    let result = resolver.evaluate_at(compiled.rules(), &context, fixed_now());
    assert!(result.matched);
    assert_eq!(result.rule_id.as_deref(), Some("default-route"));
    assert_eq!(result.action, ActionKind::Block);
    assert_eq!(result.error_code.as_deref(), Some("RATE_LIMITED"));
    assert_eq!(result.http_status, Some(429));
    assert_eq!(
        result.limit_details.as_ref().map(|d| d.window),
        Some(WindowKind::Hour)
    );
}

// ==================== 结果序列化 ====================

#[test]
fn test_result_serializes_to_wire_format() {
    let rules = parse_rules(json!([
        { "id": "r1", "if": { "tier": "free" },
          "then": {
              "limits": [ { "type": "requests", "max": 100, "window": "hour", "per": "user" } ]
          } }
    ]));
    let context = EvaluationContext::new(json!({
        "tier": "free", "user": "u", "usage": { "requests": 150 }
    }));

    let result = evaluate(&rules, &context);
    let value = serde_json::to_value(&result).unwrap();

    assert_eq!(value["matched"], json!(true));
    assert_eq!(value["action"], json!("block"));
    assert_eq!(value["limit_exceeded"], json!(true));
    assert_eq!(value["limit_details"]["type"], json!("requests"));
    assert_eq!(value["limit_details"]["current"], json!(150.0));
    assert_eq!(value["limit_details"]["limit"], json!(100.0));
    assert_eq!(value["limit_details"]["window"], json!("hour"));
    // 未设置的可选字段不出现在输出中
    assert!(value.get("model").is_none());
    assert!(value.get("error_code").is_none());
}
