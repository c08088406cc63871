//! 概念评估问卷服务
//!
//! 提供概念评估问卷的业务逻辑层，整合概念选题算法和题库存储。
//!
//! ## 核心功能
//! - `validate_concepts_survey`: 预检题库能否满足全部概念要求（不生成）
//! - `get_concepts_survey`: 生成瞬态概念评估问卷（不落库）
//! - `persist_concepts_survey`: 生成并持久化问卷与 GIFT key 关联
//! - `delete_generated_surveys`: 清理上下文中此前生成的问卷
//!
//! 每次调用彼此独立：去重集合与随机化均为调用内局部状态，服务可被
//! 多个请求线程并发调用。

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::bank::database::BankDatabase;
use crate::bank::repos::{SurveyContextRepo, SurveyRepo};
use crate::bank::types::{
    generated_gift_key, is_generated_gift_key, ConceptParameters, GeneratedSurvey, Question,
    SurveyContext,
};
use crate::concept_selection::{
    build_generated_survey, select_concept_questions, SelectionError,
};
use crate::models::AppError;

/// 概念评估问卷服务
pub struct ConceptSurveyService {
    /// 题库数据库引用
    db: Arc<BankDatabase>,
}

impl ConceptSurveyService {
    /// 创建服务实例
    pub fn new(db: Arc<BankDatabase>) -> Self {
        Self { db }
    }

    // ========================================================================
    // 核心业务方法
    // ========================================================================

    /// 预检：仅校验题库能否满足全部概念的数量/属性要求
    ///
    /// 执行与生成完全相同的过滤/计数逻辑，但不做随机化，也不构建问卷。
    /// 成功时静默返回；对相同输入重复调用结果一致，且不修改任何数据。
    pub fn validate_concepts_survey(
        &self,
        context_id: &str,
        concepts: &BTreeMap<String, ConceptParameters>,
    ) -> Result<(), AppError> {
        let pool = self.fetch_question_pool(context_id, concepts)?;
        select_concept_questions(&pool, concepts, true)
            .map(|_| ())
            .map_err(Self::selection_error)
    }

    /// 生成瞬态概念评估问卷（不落库）
    pub fn get_concepts_survey(
        &self,
        context_id: &str,
        concepts: &BTreeMap<String, ConceptParameters>,
    ) -> Result<GeneratedSurvey, AppError> {
        let pool = self.fetch_question_pool(context_id, concepts)?;
        let selected =
            select_concept_questions(&pool, concepts, false).map_err(Self::selection_error)?;
        let generated = build_generated_survey(selected);

        info!(
            "[ConceptSurveyService] Generated concept survey: context={}, questions={}",
            context_id,
            generated.survey.question_count()
        );
        Ok(generated)
    }

    /// 生成并持久化概念评估问卷
    ///
    /// 问卷行与 `(context_id, gift_key)` 关联在同一事务内写入；
    /// gift key 按固定前缀 + 新问卷 id 派生，并在写入前校验其符合
    /// 生成 key 模式 —— 不符合说明存在程序缺陷，直接大声失败。
    pub fn persist_concepts_survey(
        &self,
        context_id: &str,
        concepts: &BTreeMap<String, ConceptParameters>,
        user: &str,
    ) -> Result<GeneratedSurvey, AppError> {
        let context = self.require_context(context_id)?;
        if !context.editable_to.can(user) {
            return Err(AppError::permission(format!(
                "User '{}' is not allowed to edit survey context '{}'",
                user, context.name
            )));
        }

        let generated = self.get_concepts_survey(context_id, concepts)?;

        let gift_key = generated_gift_key(&generated.survey.id);
        if !is_generated_gift_key(&gift_key) {
            error!(
                "[ConceptSurveyService] Derived gift key does not match the generated key \
                 pattern: '{}'",
                gift_key
            );
            return Err(AppError::internal(format!(
                "Derived gift key does not match the generated key pattern: '{}'",
                gift_key
            )));
        }

        let conn = self.db.get_conn().map_err(AppError::from)?;
        let tx = conn.unchecked_transaction().map_err(|e| {
            AppError::database(format!("Failed to begin transaction: {}", e))
        })?;
        SurveyRepo::insert_survey_rows(&tx, &generated.survey).map_err(AppError::from)?;
        SurveyContextRepo::set_context_survey_with_conn(
            &tx,
            context_id,
            &gift_key,
            &generated.survey.id,
        )
        .map_err(AppError::from)?;
        tx.commit()
            .map_err(|e| AppError::database(format!("Failed to commit transaction: {}", e)))?;

        info!(
            "[ConceptSurveyService] Persisted generated survey: context={}, survey={}, key='{}'",
            context_id, generated.survey.id, gift_key
        );
        Ok(generated)
    }

    /// 清理上下文中由算法生成的问卷，返回删除数量
    pub fn delete_generated_surveys(
        &self,
        context_id: &str,
        user: &str,
    ) -> Result<u32, AppError> {
        let context = self.require_context(context_id)?;
        if !context.editable_to.can(user) {
            return Err(AppError::permission(format!(
                "User '{}' is not allowed to edit survey context '{}'",
                user, context.name
            )));
        }

        let deleted = SurveyContextRepo::delete_generated_surveys(&self.db, context_id)?;
        Ok(deleted)
    }

    // ========================================================================
    // 内部辅助
    // ========================================================================

    /// 获取上下文的题库候选池
    ///
    /// 上下文没有题库问卷时返回配置性错误：作者必须先编写题库。
    fn fetch_question_pool(
        &self,
        context_id: &str,
        concepts: &BTreeMap<String, ConceptParameters>,
    ) -> Result<Vec<Question>, AppError> {
        if concepts.is_empty() {
            return Err(AppError::validation(
                "At least one concept must be requested",
            ));
        }

        let bank = SurveyContextRepo::get_question_bank_survey(&self.db, context_id)?;
        let Some(bank) = bank else {
            warn!(
                "[ConceptSurveyService] No question bank survey for context: {}",
                context_id
            );
            return Err(AppError::configuration(format!(
                "No question bank is configured for survey context '{}'. Author a question \
                 bank survey before requesting a concept assessment.",
                context_id
            )));
        };

        let pool: Vec<Question> = bank.question_elements().cloned().collect();
        debug!(
            "[ConceptSurveyService] Question bank pool loaded: context={}, pool_size={}",
            context_id,
            pool.len()
        );
        Ok(pool)
    }

    fn require_context(&self, context_id: &str) -> Result<SurveyContext, AppError> {
        SurveyContextRepo::get_context(&self.db, context_id)?.ok_or_else(|| {
            AppError::not_found(format!("Survey context not found: {}", context_id))
        })
    }

    /// 选题失败映射为应用错误：简短原因 + 结构化缺口 + 过程诊断
    fn selection_error(err: SelectionError) -> AppError {
        let shortfall = err.shortfall().clone();
        let details = json!({
            "shortfall": shortfall,
            "diagnostic": err.details(),
        });
        AppError::with_details(crate::models::AppErrorType::Selection, err.reason(), details)
    }
}
