//! 概念选题算法模块
//!
//! 给定题库候选池和「概念名 -> 选题参数」映射，产出一组去重、随机化的
//! 题目集合，满足每个概念的数量/属性要求；无法满足时给出指明具体
//! 概念/属性组合缺口的结构化错误。
//!
//! ## 算法要点
//! - 候选池整体只洗牌一次；校验模式（validate_only）跳过一切随机化
//! - 题目按 id 有序集合去重：为某概念选中的题目不会再被其他概念复用
//! - 题目资格：关联该概念（大小写不敏感）、不携带请求集合之外的概念
//!   （可能考察未教授的知识）、最高可得分为正（否则无正确答案）
//! - 概念内候选按「preferred 在前、avoid 在后」稳定排序，偏好优先于回避
//! - 属性匹配只接受精确值：同一属性携带逗号分隔多值的题目不会被选中，
//!   该情形单独计数用于错误提示
//! - 最终列表再洗牌一次，避免题目顺序暴露概念分组

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::bank::types::{
    ConceptParameters, GeneratedSurvey, Question, Survey, SurveyElement, SurveyPage, SurveyType,
    GENERATED_SURVEY_NAME,
};
use crate::permissions::PermissionSet;

// ============================================================================
// 数据类型定义
// ============================================================================

/// 被选中的题目及其归属概念
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedQuestion {
    pub question: Question,
    /// 为哪个概念选中了该题
    pub concept: String,
}

/// 单个概念/属性组合的缺口明细
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptShortfall {
    pub concept: String,
    pub property_key: String,
    pub property_value: String,
    pub requested: u32,
    pub found: u32,
    /// 是否有候选题因同一属性携带多值而被排除
    pub multi_value_excluded: bool,
}

/// 选题失败
#[derive(Debug, Clone, Error)]
pub enum SelectionError {
    /// 题库中满足条件的题目数量不足
    #[error("{reason}")]
    InsufficientQuestions {
        /// 面向作者的简短原因
        reason: String,
        /// 结构化缺口明细
        shortfall: ConceptShortfall,
        /// 选题过程累积的诊断日志
        details: String,
    },
}

impl SelectionError {
    /// 简短原因
    pub fn reason(&self) -> &str {
        match self {
            SelectionError::InsufficientQuestions { reason, .. } => reason,
        }
    }

    /// 诊断日志
    pub fn details(&self) -> &str {
        match self {
            SelectionError::InsufficientQuestions { details, .. } => details,
        }
    }

    /// 缺口明细
    pub fn shortfall(&self) -> &ConceptShortfall {
        match self {
            SelectionError::InsufficientQuestions { shortfall, .. } => shortfall,
        }
    }
}

// ============================================================================
// 选题算法
// ============================================================================

/// 概念选题
///
/// # Arguments
/// * `pool` - 题库候选池（只读）
/// * `concepts` - 概念名 -> 选题参数（按 map 迭代顺序处理，概念名匹配
///   大小写不敏感）
/// * `validate_only` - 仅校验可行性：执行同样的过滤/计数逻辑，但跳过
///   洗牌与优先级排序
///
/// # Returns
/// * 选中的题目列表（validate_only 时仅用于计数，顺序无意义）
pub fn select_concept_questions(
    pool: &[Question],
    concepts: &BTreeMap<String, ConceptParameters>,
    validate_only: bool,
) -> Result<Vec<SelectedQuestion>, SelectionError> {
    // 请求的概念全集（小写），用于排除携带额外概念的题目
    let requested_concepts: HashSet<String> =
        concepts.keys().map(|name| name.to_lowercase()).collect();

    // 按题目 id 有序的去重集合
    let mut selected: BTreeMap<String, SelectedQuestion> = BTreeMap::new();
    let mut details = String::new();

    // 候选列表整体只洗牌一次
    let mut candidates: Vec<&Question> = pool.iter().collect();
    if !validate_only {
        candidates.shuffle(&mut rand::thread_rng());
    }

    for (concept, params) in concepts {
        let concept_lower = concept.to_lowercase();

        // 本概念的合格候选
        let mut concept_candidates: Vec<&Question> = candidates
            .iter()
            .copied()
            .filter(|q| !selected.contains_key(&q.id))
            .filter(|q| q.concepts.iter().any(|c| c.to_lowercase() == concept_lower))
            .filter(|q| {
                q.concepts
                    .iter()
                    .all(|c| requested_concepts.contains(&c.to_lowercase()))
            })
            .filter(|q| q.highest_possible_score > 0.0)
            .collect();

        details.push_str(&format!(
            "concept '{}': {} qualifying candidate(s) in the question bank\n",
            concept,
            concept_candidates.len()
        ));

        // preferred 在前、avoid 在后；偏好优先于回避；稳定排序保留洗牌顺序
        if !validate_only {
            let preferred: HashSet<&str> = params
                .preferred_questions
                .iter()
                .map(String::as_str)
                .collect();
            let avoided: HashSet<&str> =
                params.avoid_questions.iter().map(String::as_str).collect();

            concept_candidates.sort_by(|a, b| {
                let a_preferred = preferred.contains(a.id.as_str());
                let b_preferred = preferred.contains(b.id.as_str());
                if a_preferred != b_preferred {
                    return if a_preferred {
                        Ordering::Less
                    } else {
                        Ordering::Greater
                    };
                }
                let a_avoided = avoided.contains(a.id.as_str());
                let b_avoided = avoided.contains(b.id.as_str());
                if a_avoided != b_avoided {
                    return if a_avoided {
                        Ordering::Greater
                    } else {
                        Ordering::Less
                    };
                }
                Ordering::Equal
            });
        }

        for param in &params.question_params {
            let mut found = 0u32;
            let mut multi_value_excluded = false;

            concept_candidates.retain(|q| {
                if found >= param.count {
                    return true;
                }
                match q.properties.get(&param.property_key) {
                    Some(value) if value == &param.property_value => {
                        selected.insert(
                            q.id.clone(),
                            SelectedQuestion {
                                question: (*q).clone(),
                                concept: concept.clone(),
                            },
                        );
                        found += 1;
                        false
                    }
                    Some(value)
                        if value
                            .split(',')
                            .map(str::trim)
                            .any(|part| part == param.property_value) =>
                    {
                        // 多值属性只在精确匹配失败后单独计数，不参与选题
                        multi_value_excluded = true;
                        true
                    }
                    _ => true,
                }
            });

            details.push_str(&format!(
                "concept '{}': matched {}/{} for property '{}' = '{}'{}\n",
                concept,
                found,
                param.count,
                param.property_key,
                param.property_value,
                if multi_value_excluded {
                    " (some candidates hold multiple values for that property)"
                } else {
                    ""
                }
            ));

            if found < param.count {
                let mut reason = format!(
                    "Not enough questions for concept '{}': requested {} question(s) with \
                     property '{}' = '{}', found {}.",
                    concept, param.count, param.property_key, param.property_value, found
                );
                if multi_value_excluded {
                    reason.push_str(
                        " Some candidate questions were excluded because they hold multiple \
                         values for that property.",
                    );
                }
                return Err(SelectionError::InsufficientQuestions {
                    reason,
                    shortfall: ConceptShortfall {
                        concept: concept.clone(),
                        property_key: param.property_key.clone(),
                        property_value: param.property_value.clone(),
                        requested: param.count,
                        found,
                        multi_value_excluded,
                    },
                    details,
                });
            }
        }
    }

    let mut result: Vec<SelectedQuestion> = selected.into_values().collect();
    // 最终顺序不得暴露概念分组
    if !validate_only {
        result.shuffle(&mut rand::thread_rng());
    }

    debug!(
        "[ConceptSelection] Selected {} question(s) across {} concept(s)",
        result.len(),
        concepts.len()
    );
    Ok(result)
}

/// 将选题结果包装为单页生成问卷
pub fn build_generated_survey(selected: Vec<SelectedQuestion>) -> GeneratedSurvey {
    let now = chrono::Utc::now().to_rfc3339();
    let concept_by_question = selected
        .iter()
        .map(|s| (s.question.id.clone(), s.concept.clone()))
        .collect();

    let page = SurveyPage {
        id: Uuid::new_v4().to_string(),
        name: "Knowledge Assessment".to_string(),
        elements: selected
            .into_iter()
            .map(|s| SurveyElement::Question(s.question))
            .collect(),
    };

    let survey = Survey {
        id: Uuid::new_v4().to_string(),
        name: GENERATED_SURVEY_NAME.to_string(),
        survey_type: SurveyType::QuestionBankAssessment,
        unpresentable: true,
        editable_to: PermissionSet::new(),
        visible_to: PermissionSet::new(),
        pages: vec![page],
        created_at: now.clone(),
        updated_at: now,
    };

    GeneratedSurvey {
        survey,
        concept_by_question,
    }
}

// ============================================================================
// 单元测试
// ============================================================================
