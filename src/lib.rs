//! 声明式策略决策引擎
//!
//! 给定带优先级的规则集和一次请求的运行时上下文（请求属性、
//! 用量计数、限额窗口快照），产出唯一决策：动作
//! （allow/block/warn/queue）、可选的目标模型及参数，以及限额
//! 超出时的诊断信息。支持：
//! - JSON 规则定义、解析与结构校验
//! - 布尔条件树（字段比较 + and/or/not）的短路求值
//! - 基于窗口快照或实时计数器的限额检查
//! - 优先级排序、首条命中与限额覆盖合成
//!
//! 评估是两个输入的纯函数，引擎自身无任何状态，
//! 可在多线程间无协调地并发调用。

pub mod compiler;
pub mod error;
pub mod limiter;
pub mod matcher;
pub mod models;
pub mod path;
pub mod resolver;

pub use compiler::{CompiledRuleSet, RuleCompiler};
pub use error::{PolicyError, Result};
pub use limiter::{LimitCheckResult, LimitChecker};
pub use matcher::ConditionMatcher;
pub use models::{
    Action, ActionKind, ComparisonSet, Condition, EvaluationContext, EvaluationResult,
    FieldPredicate, Limit, LimitDetails, LimitType, LogicalCondition, Notification,
    NotificationKind, OnLimitExceeded, OverrideAction, Rule, RulesConfig, SimpleCondition, Usage,
    WindowData, WindowKind,
};
pub use resolver::RuleResolver;
