//! 策略引擎领域模型
//!
//! 与源数据格式（JSON 规则文档）一一对应的 serde 类型，
//! 以及供评估器使用的上下文与结果结构。

use crate::path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// 限额类型，对应 usage 中的四个计数器
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitType {
    Requests,
    Tokens,
    Cost,
    Concurrent,
}

impl fmt::Display for LimitType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Requests => "requests",
            Self::Tokens => "tokens",
            Self::Cost => "cost",
            Self::Concurrent => "concurrent",
        };
        write!(f, "{}", s)
    }
}

/// 限额统计窗口
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowKind {
    Minute,
    Hour,
    Day,
    Month,
    Year,
    Total,
}

impl fmt::Display for WindowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::Year => "year",
            Self::Total => "total",
        };
        write!(f, "{}", s)
    }
}

/// 决策动作
///
/// `queue` 仅作为标签返回给调用方，引擎本身不实现任何排队行为。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    #[default]
    Allow,
    Block,
    Warn,
    Queue,
}

/// 限额超出时的覆盖动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideAction {
    Block,
    Downgrade,
    Warn,
    Queue,
}

/// 比较操作符集合
///
/// 同一集合中出现的所有操作符都必须通过（合取语义）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComparisonSet {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lte: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub neq: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r#in: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nin: Option<Vec<Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(rename = "startsWith", default, skip_serializing_if = "Option::is_none")]
    pub starts_with: Option<String>,
    #[serde(rename = "endsWith", default, skip_serializing_if = "Option::is_none")]
    pub ends_with: Option<String>,
}

/// 可识别为比较操作符集合的键名
const COMPARISON_KEYS: &[&str] = &[
    "gt",
    "gte",
    "lt",
    "lte",
    "eq",
    "neq",
    "in",
    "nin",
    "contains",
    "startsWith",
    "endsWith",
];

/// 简单条件中单个字段的谓词：操作符集合或精确匹配的字面量
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldPredicate {
    Ops(ComparisonSet),
    Literal(Value),
}

impl<'de> Deserialize<'de> for FieldPredicate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // 至少包含一个已知操作符键的对象按操作符集合解析，
        // 其余任何值（包括空对象）都是字面量
        let value = Value::deserialize(deserializer)?;
        if let Value::Object(map) = &value {
            if map.keys().any(|k| COMPARISON_KEYS.contains(&k.as_str())) {
                let ops = serde_json::from_value(value).map_err(serde::de::Error::custom)?;
                return Ok(FieldPredicate::Ops(ops));
            }
        }
        Ok(FieldPredicate::Literal(value))
    }
}

/// 简单条件：字段路径 → 谓词，所有条目同时成立才匹配
pub type SimpleCondition = BTreeMap<String, FieldPredicate>;

/// 逻辑条件节点，按 and → or → not 的次序取第一个出现的算子
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogicalCondition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<Condition>>,
}

/// 条件树（简单条件或 and/or/not 逻辑组合）
///
/// 逻辑节点只允许 and/or/not 三个键；混入其他键的对象
/// （如 `{"and": [...], "tier": "x"}`）整体按简单条件解析，
/// 其中 "and" 被当作字段路径、通常永不命中。
/// 这类畸形文档应由上游校验拒绝，引擎假定输入结构合法。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Logical(LogicalCondition),
    Simple(SimpleCondition),
}

impl Condition {
    pub fn and(children: Vec<Condition>) -> Self {
        Self::Logical(LogicalCondition {
            and: Some(children),
            or: None,
            not: None,
        })
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Self::Logical(LogicalCondition {
            and: None,
            or: Some(children),
            not: None,
        })
    }

    pub fn not(inner: Condition) -> Self {
        Self::Logical(LogicalCondition {
            and: None,
            or: None,
            not: Some(Box::new(inner)),
        })
    }

    /// 单字段字面量相等条件
    pub fn field(path: impl Into<String>, expected: impl Into<Value>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(path.into(), FieldPredicate::Literal(expected.into()));
        Self::Simple(fields)
    }

    /// 单字段比较条件
    pub fn field_ops(path: impl Into<String>, ops: ComparisonSet) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(path.into(), FieldPredicate::Ops(ops));
        Self::Simple(fields)
    }
}

/// 用量限额
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    #[serde(rename = "type")]
    pub limit_type: LimitType,
    pub max: f64,
    pub window: WindowKind,
    /// 分组依据的上下文字段路径
    pub per: String,
    /// 覆盖分组键的上下文字段路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_key: Option<String>,
}

/// 通知渠道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Webhook,
    Email,
    Slack,
}

/// 通知描述符，对引擎不透明，由外部分发器消费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
}

/// 限额超出时的覆盖策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnLimitExceeded {
    pub action: OverrideAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub downgrade_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<Vec<Notification>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// 规则命中后的动作定义（规则的 then 部分）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_params: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    /// 预留字段，评估逻辑不读取
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority_modifier: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<Vec<Limit>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_limit_exceeded: Option<OnLimitExceeded>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
}

/// 规则定义：条件命中即执行对应动作，优先级大者先评估
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(rename = "if")]
    pub condition: Condition,
    pub then: Action,
}

impl Rule {
    pub fn new(condition: Condition, then: Action) -> Self {
        Self {
            id: None,
            description: None,
            priority: 0,
            condition,
            then,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

/// 规则集文档
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default = "default_version")]
    pub version: String,
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// 当前用量计数器，缺省全为 0
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub requests: f64,
    #[serde(default)]
    pub tokens: f64,
    #[serde(default)]
    pub cost: f64,
    #[serde(default)]
    pub concurrent: f64,
}

impl Usage {
    /// 按限额类型取对应计数器
    pub fn counter(&self, limit_type: LimitType) -> f64 {
        match limit_type {
            LimitType::Requests => self.requests,
            LimitType::Tokens => self.tokens,
            LimitType::Cost => self.cost,
            LimitType::Concurrent => self.concurrent,
        }
    }
}

/// 外部维护的限额窗口快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowData {
    pub current: f64,
    pub limit: f64,
    pub resets_at: DateTime<Utc>,
}

/// 评估上下文 - 提供给策略引擎的数据
///
/// 任意嵌套结构，外加两个约定字段：`usage`（当前计数器）和
/// `windows`（tracking key → 窗口快照）。引擎对上下文只读。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvaluationContext {
    data: Value,
}

impl EvaluationContext {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// 从 JSON 字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let data: Value = serde_json::from_str(json)?;
        Ok(Self { data })
    }

    /// 获取字段值（支持点号分隔的路径，如 "user.tier" 或 "usage.cost"）
    pub fn get_field(&self, field_path: &str) -> Option<&Value> {
        path::get_path(&self.data, field_path)
    }

    /// 写入字段值，路径不存在时自动创建中间对象。
    /// 供上下文组装方使用，核心决策路径不调用。
    pub fn set_field(&mut self, field_path: &str, value: Value) {
        path::set_path(&mut self.data, field_path, value);
    }

    /// 解析 usage 段，缺失或不完整时按 0 计
    pub fn usage(&self) -> Usage {
        self.get_field("usage")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    /// 按 tracking key 查找窗口快照
    pub fn window(&self, key: &str) -> Option<WindowData> {
        self.get_field("windows")
            .and_then(|windows| windows.get(key))
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// 获取底层数据
    pub fn data(&self) -> &Value {
        &self.data
    }
}

/// 超限诊断信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitDetails {
    #[serde(rename = "type")]
    pub limit_type: LimitType,
    pub current: f64,
    pub limit: f64,
    pub window: WindowKind,
}

/// 评估结果：引擎的唯一输出，由 (rules, context) 完全决定
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub matched: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub action: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_params: Option<Map<String, Value>>,
    #[serde(default)]
    pub limit_exceeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_details: Option<LimitDetails>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<Map<String, Value>>,
}

impl EvaluationResult {
    /// 无规则命中时的默认结果：放行
    pub fn no_match() -> Self {
        Self::default()
    }
}
