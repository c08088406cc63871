//! 题库存储模块
//!
//! 本模块实现问卷/题库的关系型持久化层：题目、问卷（页面/元素级联）、
//! 问卷上下文与 GIFT key 关联。
//!
//! ## 模块结构
//! ```text
//! bank/
//! ├── mod.rs        - 模块注册和 re-export
//! ├── types.rs      - 核心类型定义与 GIFT key 常量
//! ├── error.rs      - 错误类型
//! ├── database.rs   - BankDatabase 连接池管理
//! └── repos/        - 各表 CRUD
//! ```

pub mod database;
pub mod error;
pub mod repos;
pub mod types;

pub use database::{BankDatabase, BankPool, BankPooledConnection, CURRENT_SCHEMA_VERSION};
pub use error::{BankError, BankResult};
pub use repos::{QuestionRepo, SurveyContextRepo, SurveyRepo};
pub use types::{
    generated_gift_key, is_generated_gift_key, ConceptParameters, CreateContextParams,
    CreateQuestionParams, CreateSurveyParams, GeneratedSurvey, NewSurveyElement, NewSurveyPage,
    Question, QuestionTypeParameter, Survey, SurveyContext, SurveyContextSurvey, SurveyElement,
    SurveyPage, SurveySummary, SurveyType, UpdateQuestionParams, UpdateSurveyParams,
    GENERATED_GIFT_KEY_PREFIX, GENERATED_SURVEY_NAME, QUESTION_BANK_GIFT_KEY,
};
