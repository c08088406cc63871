//! 应用层共享类型
//!
//! 定义服务层对外暴露的错误类型：类型化的错误分类 + 简短原因 +
//! 可选的结构化详情（JSON），便于课程作者定位数据问题。

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bank::error::BankError;

/// 应用错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppErrorType {
    Validation,
    Database,
    NotFound,
    /// 配置性错误：作者可以直接修复（如缺少题库问卷）
    Configuration,
    Permission,
    /// 选题失败：候选题目不足
    Selection,
    /// 内部缺陷：不变量被破坏，应当大声失败
    Internal,
    Unknown,
}

/// 应用错误
///
/// `message` 为简短的用户可见原因；`details` 为结构化诊断
/// （如选题缺口明细与过程日志）。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppError {
    pub error_type: AppErrorType,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AppError {
    pub fn new(error_type: AppErrorType, message: impl Into<String>) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        error_type: AppErrorType,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error_type,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Validation, message)
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Database, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::NotFound, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Configuration, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Permission, message)
    }

    pub fn selection(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Selection, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(AppErrorType::Internal, message)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.error_type, self.message)
    }
}

impl std::error::Error for AppError {}

// 存储层错误按分类映射到应用错误
impl From<BankError> for AppError {
    fn from(err: BankError) -> Self {
        match err {
            BankError::NotFound { .. } => AppError::not_found(err.to_string()),
            BankError::AlreadyExists { .. } | BankError::InvalidArgument { .. } => {
                AppError::validation(err.to_string())
            }
            BankError::Internal(_) => AppError::internal(err.to_string()),
            _ => AppError::database(err.to_string()),
        }
    }
}
