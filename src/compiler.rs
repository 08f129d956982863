//! 规则集编译器
//!
//! 在规则集交给解析器之前做结构校验，并预提取规则集引用的全部
//! 上下文字段路径（供调用方按需组装上下文）。核心评估路径本身
//! 不做任何校验，假定输入已经过这里。

use crate::error::{PolicyError, Result};
use crate::models::{Action, Condition, NotificationKind, Rule, RulesConfig};
use std::collections::HashSet;

/// 编译后的规则集
#[derive(Debug, Clone)]
pub struct CompiledRuleSet {
    /// 原始规则集
    pub config: RulesConfig,
    /// 规则集中引用的所有字段路径（条件字段 + 限额分组键）
    pub required_fields: HashSet<String>,
    /// 编译版本号（用于缓存失效）
    pub compile_version: u64,
}

impl CompiledRuleSet {
    pub fn rules(&self) -> &[Rule] {
        &self.config.rules
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }
}

/// 规则集编译器
pub struct RuleCompiler {
    compile_version: u64,
}

impl RuleCompiler {
    pub fn new() -> Self {
        Self { compile_version: 0 }
    }

    /// 从 JSON 字符串编译规则集
    pub fn compile_from_json(&mut self, json: &str) -> Result<CompiledRuleSet> {
        let config: RulesConfig = serde_json::from_str(json)?;
        self.compile(config)
    }

    /// 编译规则集
    pub fn compile(&mut self, config: RulesConfig) -> Result<CompiledRuleSet> {
        self.validate_config(&config)?;

        let mut required_fields = HashSet::new();
        for rule in &config.rules {
            Self::collect_condition_fields(&rule.condition, &mut required_fields);
            if let Some(limits) = &rule.then.limits {
                for limit in limits {
                    required_fields.insert(limit.per.clone());
                    if let Some(key) = &limit.tracking_key {
                        required_fields.insert(key.clone());
                    }
                }
            }
        }

        self.compile_version += 1;

        Ok(CompiledRuleSet {
            config,
            required_fields,
            compile_version: self.compile_version,
        })
    }

    fn validate_config(&self, config: &RulesConfig) -> Result<()> {
        for (i, rule) in config.rules.iter().enumerate() {
            let label = rule
                .id
                .clone()
                .unwrap_or_else(|| format!("rules[{}]", i));
            self.validate_action(&rule.then, &label)?;
        }
        Ok(())
    }

    fn validate_action(&self, action: &Action, label: &str) -> Result<()> {
        if let Some(limits) = &action.limits {
            for limit in limits {
                if limit.max <= 0.0 {
                    return Err(PolicyError::InvalidLimit {
                        rule: label.to_string(),
                        reason: format!("max 必须为正数，当前为 {}", limit.max),
                    });
                }
                if limit.per.is_empty() {
                    return Err(PolicyError::InvalidLimit {
                        rule: label.to_string(),
                        reason: "per 字段路径不能为空".to_string(),
                    });
                }
            }
        }

        if let Some(on_exceeded) = &action.on_limit_exceeded {
            if let Some(status) = on_exceeded.http_status {
                if !(100..=599).contains(&status) {
                    return Err(PolicyError::InvalidHttpStatus {
                        rule: label.to_string(),
                        status,
                    });
                }
            }

            if let Some(seconds) = on_exceeded.delay_seconds {
                if seconds <= 0.0 {
                    return Err(PolicyError::ParseError(format!(
                        "规则 {} 的 delay_seconds 必须为正数",
                        label
                    )));
                }
            }
            if let Some(seconds) = on_exceeded.retry_after_seconds {
                if seconds <= 0.0 {
                    return Err(PolicyError::ParseError(format!(
                        "规则 {} 的 retry_after_seconds 必须为正数",
                        label
                    )));
                }
            }

            if let Some(notifications) = &on_exceeded.notify {
                for notification in notifications {
                    match notification.kind {
                        NotificationKind::Webhook if notification.url.is_none() => {
                            return Err(PolicyError::InvalidNotification {
                                rule: label.to_string(),
                                reason: "webhook 通知缺少 url".to_string(),
                            });
                        }
                        NotificationKind::Email if notification.email.is_none() => {
                            return Err(PolicyError::InvalidNotification {
                                rule: label.to_string(),
                                reason: "email 通知缺少 email".to_string(),
                            });
                        }
                        _ => {}
                    }
                }
            }
        }

        Ok(())
    }

    /// 递归收集条件树引用的字段路径
    fn collect_condition_fields(condition: &Condition, fields: &mut HashSet<String>) {
        match condition {
            Condition::Simple(map) => {
                for field_path in map.keys() {
                    fields.insert(field_path.clone());
                }
            }
            Condition::Logical(logical) => {
                if let Some(children) = &logical.and {
                    for child in children {
                        Self::collect_condition_fields(child, fields);
                    }
                }
                if let Some(children) = &logical.or {
                    for child in children {
                        Self::collect_condition_fields(child, fields);
                    }
                }
                if let Some(inner) = &logical.not {
                    Self::collect_condition_fields(inner, fields);
                }
            }
        }
    }
}

impl Default for RuleCompiler {
    fn default() -> Self {
        Self::new()
    }
}
