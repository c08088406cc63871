//! Concept Bank - 基于题库的概念知识评估问卷引擎
//!
//! 给定问卷上下文中的题库问卷与「概念 -> 选题参数」映射，生成满足
//! 每个概念数量/属性要求的单页评估问卷；并提供题目/问卷/上下文的
//! 关系型持久化层。
//!
//! ## 模块结构
//! - `bank`: SQLite 持久化层（题目、问卷、上下文、GIFT key 关联）
//! - `concept_selection`: 概念选题算法（纯内存，无共享状态）
//! - `concept_survey_service`: 业务服务层（取池、选题、持久化、清理）
//! - `permissions`: 权限集合（用户名集合 + 通配符）
//! - `models`: 应用错误类型
//! - `config` / `logging`: 配置加载与日志初始化

pub mod bank;
pub mod concept_selection;
pub mod concept_survey_service;
pub mod config;
pub mod logging;
pub mod models;
pub mod permissions;

pub use bank::{BankDatabase, BankError, BankResult};
pub use concept_selection::{
    build_generated_survey, select_concept_questions, ConceptShortfall, SelectedQuestion,
    SelectionError,
};
pub use concept_survey_service::ConceptSurveyService;
pub use config::Settings;
pub use models::{AppError, AppErrorType};
pub use permissions::PermissionSet;
