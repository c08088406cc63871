//! 问卷上下文表 CRUD 操作
//!
//! 上下文通过 `(context_id, gift_key)` 关联问卷。题库问卷使用保留
//! key 关联；生成问卷使用「固定前缀 + 问卷 id」的派生 key 关联。
//!
//! ## 核心方法
//! - `create_context` / `get_context` / `list_contexts` / `delete_context`
//! - `set_context_survey`: 写入 key 关联（同 key 替换）
//! - `get_context_survey`: 按精确 key 查关联（参数化查询，key 可含特殊字符）
//! - `get_question_bank_survey`: 获取上下文的题库问卷
//! - `delete_generated_surveys`: 清理上下文中由算法生成的问卷

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bank::database::BankDatabase;
use crate::bank::error::{BankError, BankResult};
use crate::bank::repos::survey_repo::SurveyRepo;
use crate::bank::types::{
    is_generated_gift_key, CreateContextParams, Survey, SurveyContext, SurveyContextSurvey,
    GENERATED_SURVEY_NAME, QUESTION_BANK_GIFT_KEY,
};

/// Log row-parse errors instead of silently discarding them.
fn log_and_skip_err<T>(result: Result<T, rusqlite::Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[Bank::ContextRepo] Row parse error (skipped): {}", e);
            None
        }
    }
}

/// 问卷上下文表 Repo
pub struct SurveyContextRepo;

impl SurveyContextRepo {
    // ========================================================================
    // 上下文 CRUD
    // ========================================================================

    /// 创建问卷上下文
    pub fn create_context(
        db: &BankDatabase,
        params: CreateContextParams,
    ) -> BankResult<SurveyContext> {
        let conn = db.get_conn()?;
        Self::create_context_with_conn(&conn, params)
    }

    /// 创建问卷上下文（使用现有连接）
    pub fn create_context_with_conn(
        conn: &Connection,
        params: CreateContextParams,
    ) -> BankResult<SurveyContext> {
        if params.name.trim().is_empty() {
            return Err(BankError::InvalidArgument {
                param: "name".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let now = chrono::Utc::now().to_rfc3339();
        let context = SurveyContext {
            id: Uuid::new_v4().to_string(),
            name: params.name,
            editable_to: params.editable_to,
            visible_to: params.visible_to,
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            r#"
            INSERT INTO survey_contexts (id, name, editable_to, visible_to, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                context.id,
                context.name,
                serde_json::to_string(&context.editable_to)?,
                serde_json::to_string(&context.visible_to)?,
                context.created_at,
                context.updated_at,
            ],
        )?;

        debug!("[Bank::ContextRepo] Created survey context: {}", context.id);
        Ok(context)
    }

    /// 根据 ID 获取问卷上下文
    pub fn get_context(db: &BankDatabase, context_id: &str) -> BankResult<Option<SurveyContext>> {
        let conn = db.get_conn()?;
        Self::get_context_with_conn(&conn, context_id)
    }

    /// 根据 ID 获取问卷上下文（使用现有连接）
    pub fn get_context_with_conn(
        conn: &Connection,
        context_id: &str,
    ) -> BankResult<Option<SurveyContext>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, editable_to, visible_to, created_at, updated_at
            FROM survey_contexts
            WHERE id = ?1
            "#,
        )?;
        let context = stmt
            .query_row(params![context_id], Self::row_to_context)
            .optional()?;
        Ok(context)
    }

    /// 列出问卷上下文（分页）
    pub fn list_contexts(
        db: &BankDatabase,
        limit: u32,
        offset: u32,
    ) -> BankResult<Vec<SurveyContext>> {
        let conn = db.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, editable_to, visible_to, created_at, updated_at
            FROM survey_contexts
            ORDER BY updated_at DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt.query_map(params![limit, offset], Self::row_to_context)?;
        Ok(rows.filter_map(log_and_skip_err).collect())
    }

    /// 删除问卷上下文（先删关联，再删上下文行；关联的问卷不删除）
    pub fn delete_context(db: &BankDatabase, context_id: &str) -> BankResult<()> {
        let conn = db.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM survey_context_surveys WHERE context_id = ?1",
            params![context_id],
        )?;
        let deleted = tx.execute(
            "DELETE FROM survey_contexts WHERE id = ?1",
            params![context_id],
        )?;
        if deleted == 0 {
            return Err(BankError::NotFound {
                resource_type: "SurveyContext".to_string(),
                id: context_id.to_string(),
            });
        }
        tx.commit()?;
        info!("[Bank::ContextRepo] Deleted survey context: {}", context_id);
        Ok(())
    }

    // ========================================================================
    // GIFT key 关联
    // ========================================================================

    /// 写入 `(context_id, gift_key) -> survey_id` 关联（同 key 替换）
    pub fn set_context_survey(
        db: &BankDatabase,
        context_id: &str,
        gift_key: &str,
        survey_id: &str,
    ) -> BankResult<SurveyContextSurvey> {
        let conn = db.get_conn()?;
        Self::set_context_survey_with_conn(&conn, context_id, gift_key, survey_id)
    }

    /// 写入关联（使用现有连接）
    pub fn set_context_survey_with_conn(
        conn: &Connection,
        context_id: &str,
        gift_key: &str,
        survey_id: &str,
    ) -> BankResult<SurveyContextSurvey> {
        if gift_key.trim().is_empty() {
            return Err(BankError::InvalidArgument {
                param: "gift_key".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let context_exists: bool = conn
            .query_row(
                "SELECT 1 FROM survey_contexts WHERE id = ?1",
                params![context_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !context_exists {
            return Err(BankError::NotFound {
                resource_type: "SurveyContext".to_string(),
                id: context_id.to_string(),
            });
        }

        let survey_exists: bool = conn
            .query_row(
                "SELECT 1 FROM surveys WHERE id = ?1",
                params![survey_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !survey_exists {
            return Err(BankError::NotFound {
                resource_type: "Survey".to_string(),
                id: survey_id.to_string(),
            });
        }

        conn.execute(
            r#"
            INSERT OR REPLACE INTO survey_context_surveys (context_id, gift_key, survey_id)
            VALUES (?1, ?2, ?3)
            "#,
            params![context_id, gift_key, survey_id],
        )?;

        debug!(
            "[Bank::ContextRepo] Set context survey: context={}, key='{}', survey={}",
            context_id, gift_key, survey_id
        );
        Ok(SurveyContextSurvey {
            context_id: context_id.to_string(),
            gift_key: gift_key.to_string(),
            survey_id: survey_id.to_string(),
        })
    }

    /// 按精确 key 查关联
    ///
    /// key 可能包含会破坏拼接查询的特殊字符，必须参数化查询。
    pub fn get_context_survey(
        db: &BankDatabase,
        context_id: &str,
        gift_key: &str,
    ) -> BankResult<Option<SurveyContextSurvey>> {
        let conn = db.get_conn()?;
        Self::get_context_survey_with_conn(&conn, context_id, gift_key)
    }

    /// 按精确 key 查关联（使用现有连接）
    pub fn get_context_survey_with_conn(
        conn: &Connection,
        context_id: &str,
        gift_key: &str,
    ) -> BankResult<Option<SurveyContextSurvey>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT context_id, gift_key, survey_id
            FROM survey_context_surveys
            WHERE context_id = ?1 AND gift_key = ?2
            "#,
        )?;
        let association = stmt
            .query_row(params![context_id, gift_key], |row| {
                Ok(SurveyContextSurvey {
                    context_id: row.get(0)?,
                    gift_key: row.get(1)?,
                    survey_id: row.get(2)?,
                })
            })
            .optional()?;
        Ok(association)
    }

    /// 列出上下文的全部关联
    pub fn list_context_surveys(
        db: &BankDatabase,
        context_id: &str,
    ) -> BankResult<Vec<SurveyContextSurvey>> {
        let conn = db.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT context_id, gift_key, survey_id
            FROM survey_context_surveys
            WHERE context_id = ?1
            ORDER BY gift_key
            "#,
        )?;
        let rows = stmt.query_map(params![context_id], |row| {
            Ok(SurveyContextSurvey {
                context_id: row.get(0)?,
                gift_key: row.get(1)?,
                survey_id: row.get(2)?,
            })
        })?;
        Ok(rows.filter_map(log_and_skip_err).collect())
    }

    /// 移除一条关联（问卷本身不删除）
    pub fn remove_context_survey(
        db: &BankDatabase,
        context_id: &str,
        gift_key: &str,
    ) -> BankResult<()> {
        let conn = db.get_conn()?;
        let deleted = conn.execute(
            "DELETE FROM survey_context_surveys WHERE context_id = ?1 AND gift_key = ?2",
            params![context_id, gift_key],
        )?;
        if deleted == 0 {
            return Err(BankError::NotFound {
                resource_type: "SurveyContextSurvey".to_string(),
                id: format!("{}/{}", context_id, gift_key),
            });
        }
        Ok(())
    }

    /// 按 key 获取上下文中的问卷（完整加载）
    pub fn get_survey_by_context_key(
        db: &BankDatabase,
        context_id: &str,
        gift_key: &str,
    ) -> BankResult<Option<Survey>> {
        let conn = db.get_conn()?;
        let Some(association) =
            Self::get_context_survey_with_conn(&conn, context_id, gift_key)?
        else {
            return Ok(None);
        };
        SurveyRepo::get_survey_with_conn(&conn, &association.survey_id)
    }

    /// 获取上下文的题库问卷（保留 key）
    pub fn get_question_bank_survey(
        db: &BankDatabase,
        context_id: &str,
    ) -> BankResult<Option<Survey>> {
        Self::get_survey_by_context_key(db, context_id, QUESTION_BANK_GIFT_KEY)
    }

    // ========================================================================
    // 生成问卷清理
    // ========================================================================

    /// 清理上下文中由算法生成的问卷，返回删除数量
    ///
    /// 三层过滤，宁可漏删不可误删：
    /// 1. 问卷名等于生成问卷的保留名称；
    /// 2. 问卷至少有一条上下文关联（生成问卷必然有）；
    /// 3. 该问卷在所有上下文中的每条关联 key 都符合生成 key 模式。
    pub fn delete_generated_surveys(db: &BankDatabase, context_id: &str) -> BankResult<u32> {
        let conn = db.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let mut stmt = tx.prepare(
            r#"
            SELECT DISTINCT s.id
            FROM surveys s
            JOIN survey_context_surveys scs ON scs.survey_id = s.id
            WHERE scs.context_id = ?1 AND s.name = ?2
            "#,
        )?;
        let candidate_ids: Vec<String> = stmt
            .query_map(params![context_id, GENERATED_SURVEY_NAME], |row| {
                row.get(0)
            })?
            .filter_map(log_and_skip_err)
            .collect();
        drop(stmt);

        let mut deleted = 0u32;
        for survey_id in candidate_ids {
            let mut key_stmt = tx.prepare(
                "SELECT gift_key FROM survey_context_surveys WHERE survey_id = ?1",
            )?;
            let keys: Vec<String> = key_stmt
                .query_map(params![survey_id], |row| row.get(0))?
                .filter_map(log_and_skip_err)
                .collect();
            drop(key_stmt);

            if keys.is_empty() || !keys.iter().all(|key| is_generated_gift_key(key)) {
                warn!(
                    "[Bank::ContextRepo] Survey {} carries the generated survey name but at \
                     least one association key does not match the generated key pattern, \
                     leaving it in place",
                    survey_id
                );
                continue;
            }

            SurveyRepo::delete_survey_rows(&tx, &survey_id)?;
            deleted += 1;
        }

        tx.commit()?;
        info!(
            "[Bank::ContextRepo] Deleted {} generated survey(s) from context {}",
            deleted, context_id
        );
        Ok(deleted)
    }

    // ========================================================================
    // 行映射
    // ========================================================================

    fn row_to_context(row: &Row) -> rusqlite::Result<SurveyContext> {
        let editable_json: String = row.get(2)?;
        let visible_json: String = row.get(3)?;
        Ok(SurveyContext {
            id: row.get(0)?,
            name: row.get(1)?,
            editable_to: serde_json::from_str(&editable_json).unwrap_or_default(),
            visible_to: serde_json::from_str(&visible_json).unwrap_or_default(),
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}
