//! 题库存储错误类型定义
//!
//! 本模块定义题库存储层的错误类型和结果类型别名。

use std::fmt;

/// 题库存储操作结果类型别名
pub type BankResult<T> = Result<T, BankError>;

/// 题库存储错误类型
#[derive(Debug)]
pub enum BankError {
    /// 数据库错误
    Database(String),

    /// 资源未找到
    NotFound { resource_type: String, id: String },

    /// 资源已存在
    AlreadyExists { resource_type: String, id: String },

    /// 无效参数
    InvalidArgument { param: String, reason: String },

    /// 序列化/反序列化错误
    Serialization(String),

    /// 连接池错误
    Pool(String),

    /// IO 错误（目录/文件操作）
    Io(String),

    /// 内部错误（不变量被破坏，应视为程序缺陷）
    Internal(String),
}

impl fmt::Display for BankError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankError::Database(msg) => write!(f, "Database error: {}", msg),
            BankError::NotFound { resource_type, id } => {
                write!(f, "{} not found: {}", resource_type, id)
            }
            BankError::AlreadyExists { resource_type, id } => {
                write!(f, "{} already exists: {}", resource_type, id)
            }
            BankError::InvalidArgument { param, reason } => {
                write!(f, "Invalid argument '{}': {}", param, reason)
            }
            BankError::Serialization(msg) => write!(f, "Serialization error: {}", msg),
            BankError::Pool(msg) => write!(f, "Pool error: {}", msg),
            BankError::Io(msg) => write!(f, "IO error: {}", msg),
            BankError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for BankError {}

// 从标准错误类型转换
impl From<std::io::Error> for BankError {
    fn from(err: std::io::Error) -> Self {
        BankError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BankError {
    fn from(err: serde_json::Error) -> Self {
        BankError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for BankError {
    fn from(err: rusqlite::Error) -> Self {
        BankError::Database(err.to_string())
    }
}

impl From<r2d2::Error> for BankError {
    fn from(err: r2d2::Error) -> Self {
        BankError::Pool(err.to_string())
    }
}

impl From<BankError> for String {
    fn from(err: BankError) -> Self {
        err.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BankError::NotFound {
            resource_type: "Survey".to_string(),
            id: "svy_abc123".to_string(),
        };
        assert_eq!(err.to_string(), "Survey not found: svy_abc123");

        let err = BankError::InvalidArgument {
            param: "name".to_string(),
            reason: "cannot be empty".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid argument 'name': cannot be empty");
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: BankError = parse_err.into();
        assert!(matches!(err, BankError::Serialization(_)));
    }
}
