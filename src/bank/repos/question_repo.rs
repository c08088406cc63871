//! 题目表 CRUD 操作
//!
//! 题目实体管理。`concepts` / `properties` / 权限集合以 JSON 文本列存储。
//!
//! ## 核心方法
//! - `list_questions`: 列出题目（分页+搜索）
//! - `get_question`: 获取单题详情
//! - `create_question`: 创建题目
//! - `update_question`: 更新题目
//! - `delete_question`: 删除题目（被问卷引用时拒绝）

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::bank::database::BankDatabase;
use crate::bank::error::{BankError, BankResult};
use crate::bank::types::{CreateQuestionParams, Question, UpdateQuestionParams};

/// Log row-parse errors instead of silently discarding them.
fn log_and_skip_err<T>(result: Result<T, rusqlite::Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[Bank::QuestionRepo] Row parse error (skipped): {}", e);
            None
        }
    }
}

/// 题目表 Repo
pub struct QuestionRepo;

impl QuestionRepo {
    // ========================================================================
    // 查询
    // ========================================================================

    /// 列出题目（分页+搜索）
    pub fn list_questions(
        db: &BankDatabase,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> BankResult<Vec<Question>> {
        let conn = db.get_conn()?;
        Self::list_questions_with_conn(&conn, search, limit, offset)
    }

    /// 列出题目（使用现有连接）
    pub fn list_questions_with_conn(
        conn: &Connection,
        search: Option<&str>,
        limit: u32,
        offset: u32,
    ) -> BankResult<Vec<Question>> {
        let mut sql = String::from(
            r#"
            SELECT id, text, concepts, highest_possible_score, properties,
                   editable_to, visible_to, created_at, updated_at
            FROM questions
            WHERE 1 = 1
            "#,
        );

        let mut params_vec: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        let mut param_idx = 1;

        // 搜索过滤（在题干中搜索）
        if let Some(q) = search {
            sql.push_str(&format!(" AND text LIKE ?{}", param_idx));
            params_vec.push(Box::new(format!("%{}%", q)));
            param_idx += 1;
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            param_idx,
            param_idx + 1
        ));
        params_vec.push(Box::new(limit));
        params_vec.push(Box::new(offset));

        let mut stmt = conn.prepare(&sql)?;
        let params_refs: Vec<&dyn rusqlite::ToSql> =
            params_vec.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(params_refs.as_slice(), Self::row_to_question)?;

        let questions: Vec<Question> = rows.filter_map(log_and_skip_err).collect();
        debug!("[Bank::QuestionRepo] Listed {} questions", questions.len());
        Ok(questions)
    }

    /// 根据 ID 获取题目
    pub fn get_question(db: &BankDatabase, question_id: &str) -> BankResult<Option<Question>> {
        let conn = db.get_conn()?;
        Self::get_question_with_conn(&conn, question_id)
    }

    /// 根据 ID 获取题目（使用现有连接）
    pub fn get_question_with_conn(
        conn: &Connection,
        question_id: &str,
    ) -> BankResult<Option<Question>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, text, concepts, highest_possible_score, properties,
                   editable_to, visible_to, created_at, updated_at
            FROM questions
            WHERE id = ?1
            "#,
        )?;

        let question = stmt
            .query_row(params![question_id], Self::row_to_question)
            .optional()?;

        Ok(question)
    }

    // ========================================================================
    // 创建
    // ========================================================================

    /// 创建题目
    pub fn create_question(
        db: &BankDatabase,
        params: CreateQuestionParams,
    ) -> BankResult<Question> {
        let conn = db.get_conn()?;
        Self::create_question_with_conn(&conn, params)
    }

    /// 创建题目（使用现有连接）
    pub fn create_question_with_conn(
        conn: &Connection,
        params: CreateQuestionParams,
    ) -> BankResult<Question> {
        if params.text.trim().is_empty() {
            return Err(BankError::InvalidArgument {
                param: "text".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }
        if params.highest_possible_score < 0.0 {
            return Err(BankError::InvalidArgument {
                param: "highest_possible_score".to_string(),
                reason: "cannot be negative".to_string(),
            });
        }

        let now = chrono::Utc::now().to_rfc3339();
        let question = Question {
            id: Uuid::new_v4().to_string(),
            text: params.text,
            concepts: params.concepts,
            highest_possible_score: params.highest_possible_score,
            properties: params.properties,
            editable_to: params.editable_to,
            visible_to: params.visible_to,
            created_at: now.clone(),
            updated_at: now,
        };

        conn.execute(
            r#"
            INSERT INTO questions (id, text, concepts, highest_possible_score, properties,
                                   editable_to, visible_to, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                question.id,
                question.text,
                serde_json::to_string(&question.concepts)?,
                question.highest_possible_score,
                serde_json::to_string(&question.properties)?,
                serde_json::to_string(&question.editable_to)?,
                serde_json::to_string(&question.visible_to)?,
                question.created_at,
                question.updated_at,
            ],
        )?;

        debug!("[Bank::QuestionRepo] Created question: {}", question.id);
        Ok(question)
    }

    // ========================================================================
    // 更新
    // ========================================================================

    /// 更新题目（仅更新 Some 字段）
    pub fn update_question(
        db: &BankDatabase,
        question_id: &str,
        params: UpdateQuestionParams,
    ) -> BankResult<Question> {
        let conn = db.get_conn()?;
        Self::update_question_with_conn(&conn, question_id, params)
    }

    /// 更新题目（使用现有连接）
    pub fn update_question_with_conn(
        conn: &Connection,
        question_id: &str,
        params: UpdateQuestionParams,
    ) -> BankResult<Question> {
        let mut question = Self::get_question_with_conn(conn, question_id)?.ok_or_else(|| {
            BankError::NotFound {
                resource_type: "Question".to_string(),
                id: question_id.to_string(),
            }
        })?;

        if let Some(text) = params.text {
            question.text = text;
        }
        if let Some(concepts) = params.concepts {
            question.concepts = concepts;
        }
        if let Some(score) = params.highest_possible_score {
            question.highest_possible_score = score;
        }
        if let Some(properties) = params.properties {
            question.properties = properties;
        }
        if let Some(editable_to) = params.editable_to {
            question.editable_to = editable_to;
        }
        if let Some(visible_to) = params.visible_to {
            question.visible_to = visible_to;
        }
        question.updated_at = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            UPDATE questions
            SET text = ?2, concepts = ?3, highest_possible_score = ?4, properties = ?5,
                editable_to = ?6, visible_to = ?7, updated_at = ?8
            WHERE id = ?1
            "#,
            params![
                question.id,
                question.text,
                serde_json::to_string(&question.concepts)?,
                question.highest_possible_score,
                serde_json::to_string(&question.properties)?,
                serde_json::to_string(&question.editable_to)?,
                serde_json::to_string(&question.visible_to)?,
                question.updated_at,
            ],
        )?;

        debug!("[Bank::QuestionRepo] Updated question: {}", question.id);
        Ok(question)
    }

    // ========================================================================
    // 删除
    // ========================================================================

    /// 删除题目
    ///
    /// 题目被任何问卷元素引用时拒绝删除，调用方需先移除引用。
    pub fn delete_question(db: &BankDatabase, question_id: &str) -> BankResult<()> {
        let conn = db.get_conn()?;
        Self::delete_question_with_conn(&conn, question_id)
    }

    /// 删除题目（使用现有连接）
    pub fn delete_question_with_conn(conn: &Connection, question_id: &str) -> BankResult<()> {
        let reference_count: u32 = conn.query_row(
            "SELECT COUNT(*) FROM survey_elements WHERE question_id = ?1",
            params![question_id],
            |row| row.get(0),
        )?;
        if reference_count > 0 {
            return Err(BankError::InvalidArgument {
                param: "question_id".to_string(),
                reason: format!(
                    "question is referenced by {} survey element(s)",
                    reference_count
                ),
            });
        }

        let deleted = conn.execute("DELETE FROM questions WHERE id = ?1", params![question_id])?;
        if deleted == 0 {
            return Err(BankError::NotFound {
                resource_type: "Question".to_string(),
                id: question_id.to_string(),
            });
        }

        debug!("[Bank::QuestionRepo] Deleted question: {}", question_id);
        Ok(())
    }

    // ========================================================================
    // 行映射
    // ========================================================================

    fn row_to_question(row: &Row) -> rusqlite::Result<Question> {
        let concepts_json: String = row.get(2)?;
        let properties_json: String = row.get(4)?;
        let editable_json: String = row.get(5)?;
        let visible_json: String = row.get(6)?;

        Ok(Question {
            id: row.get(0)?,
            text: row.get(1)?,
            concepts: serde_json::from_str(&concepts_json).unwrap_or_default(),
            highest_possible_score: row.get(3)?,
            properties: serde_json::from_str(&properties_json).unwrap_or_default(),
            editable_to: serde_json::from_str(&editable_json).unwrap_or_default(),
            visible_to: serde_json::from_str(&visible_json).unwrap_or_default(),
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}
