//! 策略引擎错误类型
//!
//! 只有规则集编译（解析 + 校验）会产生错误；
//! 评估本身对合法输入是全函数，不抛错。

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("规则集解析失败: {0}")]
    ParseError(String),

    #[error("规则 {rule} 的限额配置无效: {reason}")]
    InvalidLimit { rule: String, reason: String },

    #[error("规则 {rule} 的 http_status 超出范围 [100, 599]: {status}")]
    InvalidHttpStatus { rule: String, status: u16 },

    #[error("规则 {rule} 的通知配置无效: {reason}")]
    InvalidNotification { rule: String, reason: String },

    #[error("JSON 序列化错误: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PolicyError>;
