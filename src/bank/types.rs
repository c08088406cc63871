//! 题库核心类型定义
//!
//! 本模块定义问卷/题库相关的核心数据结构。
//!
//! ## 核心概念
//! - `Question`: 概念标签题目，携带属性包与最高可得分
//! - `Survey` / `SurveyPage` / `SurveyElement`: 有序页面/元素结构
//! - `SurveyContext`: 问卷上下文，通过 GIFT key 关联问卷
//! - `ConceptParameters`: 单个概念的选题参数（数量/属性/偏好）
//! - `GeneratedSurvey`: 概念评估选题算法生成的单页问卷

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

use crate::permissions::PermissionSet;

// ============================================================================
// GIFT key 常量
// ============================================================================

/// 问卷上下文中题库问卷的保留 GIFT key
pub const QUESTION_BANK_GIFT_KEY: &str = "Knowledge Assessment Question Bank";

/// 生成问卷的保留名称（清理逻辑依赖该名称做第一层过滤）
pub const GENERATED_SURVEY_NAME: &str = "Knowledge Assessment Generated Survey";

/// 生成问卷 GIFT key 的固定前缀，后接新问卷 id
pub const GENERATED_GIFT_KEY_PREFIX: &str = "Knowledge Assessment Generated Survey : ";

/// 生成问卷 GIFT key 的完整模式（前缀 + uuid v4）
pub const GENERATED_GIFT_KEY_PATTERN: &str =
    r"^Knowledge Assessment Generated Survey : [0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$";

static GENERATED_GIFT_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(GENERATED_GIFT_KEY_PATTERN).unwrap());

/// 判断一个 GIFT key 是否符合生成问卷的 key 模式
pub fn is_generated_gift_key(key: &str) -> bool {
    GENERATED_GIFT_KEY_RE.is_match(key)
}

/// 按固定前缀 + 问卷 id 派生生成问卷的 GIFT key
pub fn generated_gift_key(survey_id: &str) -> String {
    format!("{}{}", GENERATED_GIFT_KEY_PREFIX, survey_id)
}

// ============================================================================
// 问卷类型
// ============================================================================

/// 问卷类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SurveyType {
    /// 作者手工编写的问卷（含题库问卷）
    #[default]
    Authored,
    /// 概念评估算法生成的问卷
    QuestionBankAssessment,
}

impl SurveyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyType::Authored => "authored",
            SurveyType::QuestionBankAssessment => "question_bank_assessment",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "question_bank_assessment" => SurveyType::QuestionBankAssessment,
            _ => SurveyType::Authored,
        }
    }
}

// ============================================================================
// 题目
// ============================================================================

/// 概念标签题目
///
/// `concepts` 为题目关联的概念名列表（匹配时大小写不敏感）；
/// `properties` 为任意属性包（如 difficulty），选题时按精确值过滤；
/// `highest_possible_score` 必须为正数题目才可被选中（否则无正确答案，
/// 无法度量知识掌握程度）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub text: String,
    pub concepts: Vec<String>,
    pub highest_possible_score: f64,
    pub properties: HashMap<String, String>,
    pub editable_to: PermissionSet,
    pub visible_to: PermissionSet,
    pub created_at: String,
    pub updated_at: String,
}

/// 创建题目参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateQuestionParams {
    pub text: String,
    pub concepts: Vec<String>,
    pub highest_possible_score: f64,
    #[serde(default)]
    pub properties: HashMap<String, String>,
    #[serde(default)]
    pub editable_to: PermissionSet,
    #[serde(default)]
    pub visible_to: PermissionSet,
}

/// 更新题目参数（仅更新 Some 字段）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateQuestionParams {
    pub text: Option<String>,
    pub concepts: Option<Vec<String>>,
    pub highest_possible_score: Option<f64>,
    pub properties: Option<HashMap<String, String>>,
    pub editable_to: Option<PermissionSet>,
    pub visible_to: Option<PermissionSet>,
}

// ============================================================================
// 问卷结构
// ============================================================================

/// 问卷元素：题目引用或说明文本
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "element_type", rename_all = "snake_case")]
pub enum SurveyElement {
    /// 题目元素（加载时内联完整题目）
    Question(Question),
    /// 说明文本元素
    Text { id: String, text: String },
}

impl SurveyElement {
    /// 题目元素返回内联题目，其他元素返回 None
    pub fn as_question(&self) -> Option<&Question> {
        match self {
            SurveyElement::Question(q) => Some(q),
            _ => None,
        }
    }
}

/// 问卷页面：有序元素列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyPage {
    pub id: String,
    pub name: String,
    pub elements: Vec<SurveyElement>,
}

/// 问卷：有序页面列表 + 元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub id: String,
    pub name: String,
    pub survey_type: SurveyType,
    /// 生成问卷不可在编辑器中展示/再编辑
    pub unpresentable: bool,
    pub editable_to: PermissionSet,
    pub visible_to: PermissionSet,
    pub pages: Vec<SurveyPage>,
    pub created_at: String,
    pub updated_at: String,
}

impl Survey {
    /// 遍历问卷中的所有题目元素
    pub fn question_elements(&self) -> impl Iterator<Item = &Question> {
        self.pages
            .iter()
            .flat_map(|page| page.elements.iter())
            .filter_map(|element| element.as_question())
    }

    /// 问卷中题目元素的数量
    pub fn question_count(&self) -> usize {
        self.question_elements().count()
    }
}

/// 问卷列表摘要（列表查询不加载页面结构）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveySummary {
    pub id: String,
    pub name: String,
    pub survey_type: SurveyType,
    pub unpresentable: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// 创建问卷时的新元素描述
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "element_type", rename_all = "snake_case")]
pub enum NewSurveyElement {
    /// 引用已有题目
    QuestionRef { question_id: String },
    /// 说明文本
    Text { text: String },
}

/// 创建问卷时的新页面描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSurveyPage {
    pub name: String,
    pub elements: Vec<NewSurveyElement>,
}

/// 创建问卷参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSurveyParams {
    pub name: String,
    #[serde(default)]
    pub survey_type: SurveyType,
    #[serde(default)]
    pub unpresentable: bool,
    #[serde(default)]
    pub editable_to: PermissionSet,
    #[serde(default)]
    pub visible_to: PermissionSet,
    pub pages: Vec<NewSurveyPage>,
}

/// 更新问卷元数据参数（仅更新 Some 字段，页面结构不可变更）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSurveyParams {
    pub name: Option<String>,
    pub unpresentable: Option<bool>,
    pub editable_to: Option<PermissionSet>,
    pub visible_to: Option<PermissionSet>,
}

// ============================================================================
// 问卷上下文
// ============================================================================

/// 问卷上下文
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyContext {
    pub id: String,
    pub name: String,
    pub editable_to: PermissionSet,
    pub visible_to: PermissionSet,
    pub created_at: String,
    pub updated_at: String,
}

/// 创建问卷上下文参数
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateContextParams {
    pub name: String,
    #[serde(default)]
    pub editable_to: PermissionSet,
    #[serde(default)]
    pub visible_to: PermissionSet,
}

/// 问卷上下文内的问卷关联：`(context_id, gift_key) -> survey_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurveyContextSurvey {
    pub context_id: String,
    pub gift_key: String,
    pub survey_id: String,
}

// ============================================================================
// 概念选题参数与生成结果
// ============================================================================

/// 单条选题参数：属性键、要求的属性值、要求的数量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionTypeParameter {
    pub property_key: String,
    pub property_value: String,
    pub count: u32,
}

/// 单个概念的选题参数
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptParameters {
    /// 选题参数列表，按列表顺序依次满足
    pub question_params: Vec<QuestionTypeParameter>,
    /// 优先选择的题目 id 列表
    #[serde(default)]
    pub preferred_questions: Vec<String>,
    /// 尽量避免的题目 id 列表
    #[serde(default)]
    pub avoid_questions: Vec<String>,
}

/// 概念评估选题算法生成的单页问卷
///
/// 除非调用方选择持久化，否则为瞬态值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedSurvey {
    pub survey: Survey,
    /// 题目 id -> 为其选中该题的概念名
    pub concept_by_question: HashMap<String, String>,
}
