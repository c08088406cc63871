//! 问卷表 CRUD 操作
//!
//! 问卷为「问卷行 + 页面行 + 元素行」的级联结构，所有级联写操作在单个
//! 事务内完成（显式 commit，出错时随 Drop 自动回滚）。
//!
//! ## 核心方法
//! - `create_survey`: 创建问卷（页面/元素级联）
//! - `insert_survey`: 写入已构建好的问卷（生成问卷持久化用）
//! - `get_survey`: 获取问卷（内联完整题目）
//! - `list_surveys`: 列出问卷摘要
//! - `update_survey`: 更新问卷元数据
//! - `delete_survey`: 删除问卷（元素 -> 页面 -> 问卷）
//! - `copy_survey_to_context`: 复制问卷到另一个上下文（行复制级联）

use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bank::database::BankDatabase;
use crate::bank::error::{BankError, BankResult};
use crate::bank::repos::question_repo::QuestionRepo;
use crate::bank::types::{
    CreateSurveyParams, NewSurveyElement, Survey, SurveyElement, SurveyPage, SurveySummary,
    SurveyType, UpdateSurveyParams,
};

/// Log row-parse errors instead of silently discarding them.
fn log_and_skip_err<T>(result: Result<T, rusqlite::Error>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("[Bank::SurveyRepo] Row parse error (skipped): {}", e);
            None
        }
    }
}

/// 问卷表 Repo
pub struct SurveyRepo;

impl SurveyRepo {
    // ========================================================================
    // 创建
    // ========================================================================

    /// 创建问卷（页面/元素级联，单事务）
    ///
    /// 元素引用的题目必须已存在，否则整个创建回滚。
    pub fn create_survey(db: &BankDatabase, params: CreateSurveyParams) -> BankResult<Survey> {
        if params.name.trim().is_empty() {
            return Err(BankError::InvalidArgument {
                param: "name".to_string(),
                reason: "cannot be empty".to_string(),
            });
        }

        let conn = db.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        // 构建内存结构，同时校验题目引用
        let now = chrono::Utc::now().to_rfc3339();
        let mut pages = Vec::with_capacity(params.pages.len());
        for new_page in params.pages {
            let mut elements = Vec::with_capacity(new_page.elements.len());
            for new_element in new_page.elements {
                match new_element {
                    NewSurveyElement::QuestionRef { question_id } => {
                        let question = QuestionRepo::get_question_with_conn(&tx, &question_id)?
                            .ok_or_else(|| BankError::NotFound {
                                resource_type: "Question".to_string(),
                                id: question_id.clone(),
                            })?;
                        elements.push(SurveyElement::Question(question));
                    }
                    NewSurveyElement::Text { text } => {
                        elements.push(SurveyElement::Text {
                            id: Uuid::new_v4().to_string(),
                            text,
                        });
                    }
                }
            }
            pages.push(SurveyPage {
                id: Uuid::new_v4().to_string(),
                name: new_page.name,
                elements,
            });
        }

        let survey = Survey {
            id: Uuid::new_v4().to_string(),
            name: params.name,
            survey_type: params.survey_type,
            unpresentable: params.unpresentable,
            editable_to: params.editable_to,
            visible_to: params.visible_to,
            pages,
            created_at: now.clone(),
            updated_at: now,
        };

        Self::insert_survey_rows(&tx, &survey)?;
        tx.commit()?;

        info!(
            "[Bank::SurveyRepo] Created survey: id={}, pages={}, questions={}",
            survey.id,
            survey.pages.len(),
            survey.question_count()
        );
        Ok(survey)
    }

    /// 写入一个已构建好的问卷（id/页面/元素均已就位）
    ///
    /// 用于持久化生成问卷。引用的题目必须已存在于题目表。
    pub fn insert_survey(db: &BankDatabase, survey: &Survey) -> BankResult<()> {
        let conn = db.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        Self::insert_survey_rows(&tx, survey)?;
        tx.commit()?;
        info!("[Bank::SurveyRepo] Inserted survey: id={}", survey.id);
        Ok(())
    }

    /// 写入问卷的所有行（问卷 -> 页面 -> 元素），不负责事务边界
    pub fn insert_survey_rows(conn: &Connection, survey: &Survey) -> BankResult<()> {
        conn.execute(
            r#"
            INSERT INTO surveys (id, name, survey_type, unpresentable,
                                 editable_to, visible_to, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                survey.id,
                survey.name,
                survey.survey_type.as_str(),
                survey.unpresentable,
                serde_json::to_string(&survey.editable_to)?,
                serde_json::to_string(&survey.visible_to)?,
                survey.created_at,
                survey.updated_at,
            ],
        )?;

        for (page_index, page) in survey.pages.iter().enumerate() {
            conn.execute(
                "INSERT INTO survey_pages (id, survey_id, name, page_index) VALUES (?1, ?2, ?3, ?4)",
                params![page.id, survey.id, page.name, page_index as i64],
            )?;

            for (element_index, element) in page.elements.iter().enumerate() {
                match element {
                    SurveyElement::Question(question) => {
                        conn.execute(
                            r#"
                            INSERT INTO survey_elements
                                (id, page_id, element_index, element_type, question_id, text_content)
                            VALUES (?1, ?2, ?3, 'question', ?4, NULL)
                            "#,
                            params![
                                Uuid::new_v4().to_string(),
                                page.id,
                                element_index as i64,
                                question.id,
                            ],
                        )?;
                    }
                    SurveyElement::Text { id, text } => {
                        conn.execute(
                            r#"
                            INSERT INTO survey_elements
                                (id, page_id, element_index, element_type, question_id, text_content)
                            VALUES (?1, ?2, ?3, 'text', NULL, ?4)
                            "#,
                            params![id, page.id, element_index as i64, text],
                        )?;
                    }
                }
            }
        }

        Ok(())
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 根据 ID 获取问卷（页面/元素按序加载，题目内联）
    pub fn get_survey(db: &BankDatabase, survey_id: &str) -> BankResult<Option<Survey>> {
        let conn = db.get_conn()?;
        Self::get_survey_with_conn(&conn, survey_id)
    }

    /// 根据 ID 获取问卷（使用现有连接）
    pub fn get_survey_with_conn(
        conn: &Connection,
        survey_id: &str,
    ) -> BankResult<Option<Survey>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, survey_type, unpresentable,
                   editable_to, visible_to, created_at, updated_at
            FROM surveys
            WHERE id = ?1
            "#,
        )?;

        let header = stmt
            .query_row(params![survey_id], Self::row_to_survey_header)
            .optional()?;
        let Some(mut survey) = header else {
            return Ok(None);
        };

        let mut page_stmt = conn.prepare(
            "SELECT id, name FROM survey_pages WHERE survey_id = ?1 ORDER BY page_index",
        )?;
        let page_rows: Vec<(String, String)> = page_stmt
            .query_map(params![survey_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(log_and_skip_err)
            .collect();

        for (page_id, page_name) in page_rows {
            let elements = Self::load_page_elements(conn, &page_id)?;
            survey.pages.push(SurveyPage {
                id: page_id,
                name: page_name,
                elements,
            });
        }

        Ok(Some(survey))
    }

    /// 加载页面元素（题目元素内联完整题目）
    fn load_page_elements(conn: &Connection, page_id: &str) -> BankResult<Vec<SurveyElement>> {
        let mut stmt = conn.prepare(
            r#"
            SELECT id, element_type, question_id, text_content
            FROM survey_elements
            WHERE page_id = ?1
            ORDER BY element_index
            "#,
        )?;
        let rows: Vec<(String, String, Option<String>, Option<String>)> = stmt
            .query_map(params![page_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?
            .filter_map(log_and_skip_err)
            .collect();

        let mut elements = Vec::with_capacity(rows.len());
        for (element_id, element_type, question_id, text_content) in rows {
            match element_type.as_str() {
                "question" => {
                    let Some(question_id) = question_id else {
                        warn!(
                            "[Bank::SurveyRepo] Question element without question_id (skipped): {}",
                            element_id
                        );
                        continue;
                    };
                    match QuestionRepo::get_question_with_conn(conn, &question_id)? {
                        Some(question) => elements.push(SurveyElement::Question(question)),
                        None => {
                            warn!(
                                "[Bank::SurveyRepo] Dangling question reference (skipped): element={}, question={}",
                                element_id, question_id
                            );
                        }
                    }
                }
                "text" => {
                    elements.push(SurveyElement::Text {
                        id: element_id,
                        text: text_content.unwrap_or_default(),
                    });
                }
                other => {
                    warn!(
                        "[Bank::SurveyRepo] Unknown element type '{}' (skipped): {}",
                        other, element_id
                    );
                }
            }
        }
        Ok(elements)
    }

    /// 列出问卷摘要（分页）
    pub fn list_surveys(
        db: &BankDatabase,
        limit: u32,
        offset: u32,
    ) -> BankResult<Vec<SurveySummary>> {
        let conn = db.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, name, survey_type, unpresentable, created_at, updated_at
            FROM surveys
            ORDER BY updated_at DESC
            LIMIT ?1 OFFSET ?2
            "#,
        )?;
        let rows = stmt.query_map(params![limit, offset], |row| {
            let survey_type: String = row.get(2)?;
            Ok(SurveySummary {
                id: row.get(0)?,
                name: row.get(1)?,
                survey_type: SurveyType::from_str(&survey_type),
                unpresentable: row.get(3)?,
                created_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(log_and_skip_err).collect())
    }

    // ========================================================================
    // 更新
    // ========================================================================

    /// 更新问卷元数据（页面结构不可变更）
    pub fn update_survey(
        db: &BankDatabase,
        survey_id: &str,
        params: UpdateSurveyParams,
    ) -> BankResult<Survey> {
        let conn = db.get_conn()?;
        let mut survey =
            Self::get_survey_with_conn(&conn, survey_id)?.ok_or_else(|| BankError::NotFound {
                resource_type: "Survey".to_string(),
                id: survey_id.to_string(),
            })?;

        if let Some(name) = params.name {
            survey.name = name;
        }
        if let Some(unpresentable) = params.unpresentable {
            survey.unpresentable = unpresentable;
        }
        if let Some(editable_to) = params.editable_to {
            survey.editable_to = editable_to;
        }
        if let Some(visible_to) = params.visible_to {
            survey.visible_to = visible_to;
        }
        survey.updated_at = chrono::Utc::now().to_rfc3339();

        conn.execute(
            r#"
            UPDATE surveys
            SET name = ?2, unpresentable = ?3, editable_to = ?4, visible_to = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
            params![
                survey.id,
                survey.name,
                survey.unpresentable,
                serde_json::to_string(&survey.editable_to)?,
                serde_json::to_string(&survey.visible_to)?,
                survey.updated_at,
            ],
        )?;

        debug!("[Bank::SurveyRepo] Updated survey: {}", survey.id);
        Ok(survey)
    }

    // ========================================================================
    // 删除
    // ========================================================================

    /// 删除问卷（单事务级联：关联 -> 元素 -> 页面 -> 问卷）
    pub fn delete_survey(db: &BankDatabase, survey_id: &str) -> BankResult<()> {
        let conn = db.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        Self::delete_survey_rows(&tx, survey_id)?;
        tx.commit()?;
        info!("[Bank::SurveyRepo] Deleted survey: {}", survey_id);
        Ok(())
    }

    /// 删除问卷的所有行，不负责事务边界
    ///
    /// 删除顺序与插入约束相反：先上下文关联，再元素、页面，最后问卷行。
    pub fn delete_survey_rows(conn: &Connection, survey_id: &str) -> BankResult<()> {
        conn.execute(
            "DELETE FROM survey_context_surveys WHERE survey_id = ?1",
            params![survey_id],
        )?;
        conn.execute(
            r#"
            DELETE FROM survey_elements
            WHERE page_id IN (SELECT id FROM survey_pages WHERE survey_id = ?1)
            "#,
            params![survey_id],
        )?;
        conn.execute(
            "DELETE FROM survey_pages WHERE survey_id = ?1",
            params![survey_id],
        )?;
        let deleted = conn.execute("DELETE FROM surveys WHERE id = ?1", params![survey_id])?;
        if deleted == 0 {
            return Err(BankError::NotFound {
                resource_type: "Survey".to_string(),
                id: survey_id.to_string(),
            });
        }
        Ok(())
    }

    // ========================================================================
    // 复制
    // ========================================================================

    /// 复制问卷到另一个上下文（行复制级联）
    ///
    /// 问卷/页面/文本元素获得全新 id；题目按引用共享，不复制题目行。
    /// 目标上下文中同 key 的既有关联会被替换。
    pub fn copy_survey_to_context(
        db: &BankDatabase,
        survey_id: &str,
        target_context_id: &str,
        gift_key: &str,
    ) -> BankResult<Survey> {
        let conn = db.get_conn()?;
        let source =
            Self::get_survey_with_conn(&conn, survey_id)?.ok_or_else(|| BankError::NotFound {
                resource_type: "Survey".to_string(),
                id: survey_id.to_string(),
            })?;

        let context_exists: bool = conn
            .query_row(
                "SELECT 1 FROM survey_contexts WHERE id = ?1",
                params![target_context_id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);
        if !context_exists {
            return Err(BankError::NotFound {
                resource_type: "SurveyContext".to_string(),
                id: target_context_id.to_string(),
            });
        }

        let now = chrono::Utc::now().to_rfc3339();
        let copy = Survey {
            id: Uuid::new_v4().to_string(),
            name: source.name.clone(),
            survey_type: source.survey_type,
            unpresentable: source.unpresentable,
            editable_to: source.editable_to.clone(),
            visible_to: source.visible_to.clone(),
            pages: source
                .pages
                .iter()
                .map(|page| SurveyPage {
                    id: Uuid::new_v4().to_string(),
                    name: page.name.clone(),
                    elements: page
                        .elements
                        .iter()
                        .map(|element| match element {
                            SurveyElement::Question(q) => SurveyElement::Question(q.clone()),
                            SurveyElement::Text { text, .. } => SurveyElement::Text {
                                id: Uuid::new_v4().to_string(),
                                text: text.clone(),
                            },
                        })
                        .collect(),
                })
                .collect(),
            created_at: now.clone(),
            updated_at: now,
        };

        let tx = conn.unchecked_transaction()?;
        Self::insert_survey_rows(&tx, &copy)?;
        tx.execute(
            r#"
            INSERT OR REPLACE INTO survey_context_surveys (context_id, gift_key, survey_id)
            VALUES (?1, ?2, ?3)
            "#,
            params![target_context_id, gift_key, copy.id],
        )?;
        tx.commit()?;

        info!(
            "[Bank::SurveyRepo] Copied survey {} -> {} into context {} under key '{}'",
            survey_id, copy.id, target_context_id, gift_key
        );
        Ok(copy)
    }

    // ========================================================================
    // 行映射
    // ========================================================================

    fn row_to_survey_header(row: &Row) -> rusqlite::Result<Survey> {
        let survey_type: String = row.get(2)?;
        let editable_json: String = row.get(4)?;
        let visible_json: String = row.get(5)?;
        Ok(Survey {
            id: row.get(0)?,
            name: row.get(1)?,
            survey_type: SurveyType::from_str(&survey_type),
            unpresentable: row.get(3)?,
            editable_to: serde_json::from_str(&editable_json).unwrap_or_default(),
            visible_to: serde_json::from_str(&visible_json).unwrap_or_default(),
            pages: Vec::new(),
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}
