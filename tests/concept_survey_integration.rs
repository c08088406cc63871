//! 概念评估问卷集成测试
//!
//! 在临时目录数据库上覆盖端到端流程：
//! 1. 题库/上下文种子数据 -> 生成/预检/持久化/清理
//! 2. 题目与问卷的 CRUD 往返
//! 3. 权限检查与事务级联

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use concept_bank::bank::repos::{QuestionRepo, SurveyContextRepo, SurveyRepo};
use concept_bank::bank::types::{
    is_generated_gift_key, ConceptParameters, CreateContextParams, CreateQuestionParams,
    CreateSurveyParams, NewSurveyElement, NewSurveyPage, Question, QuestionTypeParameter,
    SurveyContext, SurveyElement, UpdateQuestionParams, UpdateSurveyParams,
    GENERATED_SURVEY_NAME, QUESTION_BANK_GIFT_KEY,
};
use concept_bank::bank::BankDatabase;
use concept_bank::concept_survey_service::ConceptSurveyService;
use concept_bank::config::Settings;
use concept_bank::models::AppErrorType;
use concept_bank::permissions::PermissionSet;

// ============================================================================
// 测试辅助
// ============================================================================

fn setup_db() -> (TempDir, Arc<BankDatabase>) {
    concept_bank::logging::try_init();
    let tmp = TempDir::new().unwrap();
    let settings = Settings {
        data_dir: PathBuf::from(tmp.path()),
        ..Settings::default()
    };
    let db = BankDatabase::from_settings(&settings).unwrap();
    (tmp, Arc::new(db))
}

fn seed_question(
    db: &BankDatabase,
    concepts: &[&str],
    score: f64,
    difficulty: &str,
) -> Question {
    QuestionRepo::create_question(
        db,
        CreateQuestionParams {
            text: format!("Question about {}", concepts.join(", ")),
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
            highest_possible_score: score,
            properties: HashMap::from([("difficulty".to_string(), difficulty.to_string())]),
            editable_to: PermissionSet::wildcard(),
            visible_to: PermissionSet::wildcard(),
        },
    )
    .unwrap()
}

/// 建一个上下文 + 题库问卷：每个概念 easy 三题、hard 一题，另有一题零分
fn seed_context_with_bank(db: &BankDatabase, editable_to: PermissionSet) -> SurveyContext {
    let context = SurveyContextRepo::create_context(
        db,
        CreateContextParams {
            name: "Math Course".to_string(),
            editable_to,
            visible_to: PermissionSet::wildcard(),
        },
    )
    .unwrap();

    let mut elements = Vec::new();
    for concept in ["addition", "subtraction"] {
        for _ in 0..3 {
            let q = seed_question(db, &[concept], 1.0, "easy");
            elements.push(NewSurveyElement::QuestionRef { question_id: q.id });
        }
        let q = seed_question(db, &[concept], 1.0, "hard");
        elements.push(NewSurveyElement::QuestionRef { question_id: q.id });
    }
    // 零分题：永远不可被选中
    let unscored = seed_question(db, &["addition"], 0.0, "easy");
    elements.push(NewSurveyElement::QuestionRef {
        question_id: unscored.id,
    });

    let bank = SurveyRepo::create_survey(
        db,
        CreateSurveyParams {
            name: "Math Course - Knowledge Assessment Question Bank".to_string(),
            survey_type: Default::default(),
            unpresentable: false,
            editable_to: PermissionSet::wildcard(),
            visible_to: PermissionSet::wildcard(),
            pages: vec![NewSurveyPage {
                name: "Bank".to_string(),
                elements,
            }],
        },
    )
    .unwrap();

    SurveyContextRepo::set_context_survey(db, &context.id, QUESTION_BANK_GIFT_KEY, &bank.id)
        .unwrap();
    context
}

fn concepts_request(easy: u32, hard: u32) -> BTreeMap<String, ConceptParameters> {
    let mut concepts = BTreeMap::new();
    for concept in ["addition", "subtraction"] {
        let mut question_params = vec![QuestionTypeParameter {
            property_key: "difficulty".to_string(),
            property_value: "easy".to_string(),
            count: easy,
        }];
        if hard > 0 {
            question_params.push(QuestionTypeParameter {
                property_key: "difficulty".to_string(),
                property_value: "hard".to_string(),
                count: hard,
            });
        }
        concepts.insert(
            concept.to_string(),
            ConceptParameters {
                question_params,
                ..Default::default()
            },
        );
    }
    concepts
}

// ============================================================================
// 生成 / 预检 / 持久化
// ============================================================================

#[test]
fn test_generate_concepts_survey_end_to_end() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let service = ConceptSurveyService::new(db.clone());

    let generated = service
        .get_concepts_survey(&context.id, &concepts_request(2, 1))
        .unwrap();

    // 两个概念各 2 easy + 1 hard
    assert_eq!(generated.survey.question_count(), 6);
    assert_eq!(generated.survey.pages.len(), 1);
    assert!(generated.survey.unpresentable);
    assert_eq!(generated.survey.name, GENERATED_SURVEY_NAME);

    // 题目 id 无重复，且每题都有概念归属
    let ids: HashSet<String> = generated
        .survey
        .question_elements()
        .map(|q| q.id.clone())
        .collect();
    assert_eq!(ids.len(), 6);
    for id in &ids {
        assert!(generated.concept_by_question.contains_key(id));
    }

    // 零分题绝不会被选中
    for q in generated.survey.question_elements() {
        assert!(q.highest_possible_score > 0.0);
    }
}

#[test]
fn test_missing_question_bank_is_a_configuration_error() {
    let (_tmp, db) = setup_db();
    let context = SurveyContextRepo::create_context(
        &db,
        CreateContextParams {
            name: "Empty Course".to_string(),
            editable_to: PermissionSet::wildcard(),
            visible_to: PermissionSet::wildcard(),
        },
    )
    .unwrap();
    let service = ConceptSurveyService::new(db.clone());

    let err = service
        .get_concepts_survey(&context.id, &concepts_request(1, 0))
        .unwrap_err();
    assert_eq!(err.error_type, AppErrorType::Configuration);
    assert!(err.message.contains("No question bank"));
}

#[test]
fn test_validate_succeeds_silently_and_is_idempotent() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let service = ConceptSurveyService::new(db.clone());

    service
        .validate_concepts_survey(&context.id, &concepts_request(3, 1))
        .unwrap();
    service
        .validate_concepts_survey(&context.id, &concepts_request(3, 1))
        .unwrap();

    // 预检不落库：上下文里仍只有题库一条关联
    let associations = SurveyContextRepo::list_context_surveys(&db, &context.id).unwrap();
    assert_eq!(associations.len(), 1);
    assert_eq!(associations[0].gift_key, QUESTION_BANK_GIFT_KEY);
}

#[test]
fn test_validate_reports_shortfall_with_diagnostic() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let service = ConceptSurveyService::new(db.clone());

    // 每个概念只有 3 道 easy 计分题，请求 4 道必然不足
    let err = service
        .validate_concepts_survey(&context.id, &concepts_request(4, 0))
        .unwrap_err();
    assert_eq!(err.error_type, AppErrorType::Selection);
    assert!(err.message.contains("requested 4"));
    assert!(err.message.contains("found 3"));

    let details = err.details.expect("selection errors carry details");
    assert_eq!(details["shortfall"]["requested"], 4);
    assert_eq!(details["shortfall"]["found"], 3);
}

#[test]
fn test_persist_generated_survey_writes_pattern_conforming_key() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let service = ConceptSurveyService::new(db.clone());

    let generated = service
        .persist_concepts_survey(&context.id, &concepts_request(1, 1), "alice")
        .unwrap();

    let associations = SurveyContextRepo::list_context_surveys(&db, &context.id).unwrap();
    let generated_assoc = associations
        .iter()
        .find(|a| a.survey_id == generated.survey.id)
        .expect("generated survey must be associated to the context");
    assert!(is_generated_gift_key(&generated_assoc.gift_key));

    // 通过 key 能完整取回持久化的问卷
    let reloaded = SurveyContextRepo::get_survey_by_context_key(
        &db,
        &context.id,
        &generated_assoc.gift_key,
    )
    .unwrap()
    .expect("persisted survey must load back");
    assert_eq!(reloaded.question_count(), 4);
    assert!(reloaded.unpresentable);
}

#[test]
fn test_persist_requires_edit_permission() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::from_users(["alice"]));
    let service = ConceptSurveyService::new(db.clone());

    let err = service
        .persist_concepts_survey(&context.id, &concepts_request(1, 0), "bob")
        .unwrap_err();
    assert_eq!(err.error_type, AppErrorType::Permission);

    // 拒绝后没有留下任何生成问卷的关联
    let associations = SurveyContextRepo::list_context_surveys(&db, &context.id).unwrap();
    assert_eq!(associations.len(), 1);

    // 被授权的用户正常持久化
    service
        .persist_concepts_survey(&context.id, &concepts_request(1, 0), "alice")
        .unwrap();
}

#[test]
fn test_delete_generated_surveys_leaves_authored_surveys() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let service = ConceptSurveyService::new(db.clone());

    let first = service
        .persist_concepts_survey(&context.id, &concepts_request(1, 0), "alice")
        .unwrap();
    let second = service
        .persist_concepts_survey(&context.id, &concepts_request(2, 0), "alice")
        .unwrap();

    let deleted = service.delete_generated_surveys(&context.id, "alice").unwrap();
    assert_eq!(deleted, 2);

    // 生成问卷已删除，题库问卷保持原样
    assert!(SurveyRepo::get_survey(&db, &first.survey.id).unwrap().is_none());
    assert!(SurveyRepo::get_survey(&db, &second.survey.id)
        .unwrap()
        .is_none());
    let bank = SurveyContextRepo::get_question_bank_survey(&db, &context.id)
        .unwrap()
        .expect("question bank must survive the cleanup");
    assert!(bank.question_count() > 0);
}

// ============================================================================
// CRUD 往返
// ============================================================================

#[test]
fn test_survey_crud_round_trip() {
    let (_tmp, db) = setup_db();
    let q1 = seed_question(&db, &["addition"], 1.0, "easy");
    let q2 = seed_question(&db, &["addition"], 2.0, "hard");

    let created = SurveyRepo::create_survey(
        &db,
        CreateSurveyParams {
            name: "Authored Survey".to_string(),
            survey_type: Default::default(),
            unpresentable: false,
            editable_to: PermissionSet::from_users(["alice"]),
            visible_to: PermissionSet::wildcard(),
            pages: vec![
                NewSurveyPage {
                    name: "Page 1".to_string(),
                    elements: vec![
                        NewSurveyElement::Text {
                            text: "Answer carefully".to_string(),
                        },
                        NewSurveyElement::QuestionRef {
                            question_id: q1.id.clone(),
                        },
                    ],
                },
                NewSurveyPage {
                    name: "Page 2".to_string(),
                    elements: vec![NewSurveyElement::QuestionRef {
                        question_id: q2.id.clone(),
                    }],
                },
            ],
        },
    )
    .unwrap();

    let reloaded = SurveyRepo::get_survey(&db, &created.id).unwrap().unwrap();
    assert_eq!(reloaded, created);
    assert_eq!(reloaded.pages[0].elements.len(), 2);
    assert!(matches!(
        reloaded.pages[0].elements[0],
        SurveyElement::Text { .. }
    ));
    assert_eq!(
        reloaded.pages[1].elements[0].as_question().unwrap().id,
        q2.id
    );

    let updated = SurveyRepo::update_survey(
        &db,
        &created.id,
        UpdateSurveyParams {
            name: Some("Renamed Survey".to_string()),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(updated.name, "Renamed Survey");

    let summaries = SurveyRepo::list_surveys(&db, 10, 0).unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].name, "Renamed Survey");

    SurveyRepo::delete_survey(&db, &created.id).unwrap();
    assert!(SurveyRepo::get_survey(&db, &created.id).unwrap().is_none());
    // 被引用的题目随删除解除引用，现在可以删除
    QuestionRepo::delete_question(&db, &q1.id).unwrap();
}

#[test]
fn test_question_crud_round_trip() {
    let (_tmp, db) = setup_db();
    let created = seed_question(&db, &["addition"], 1.0, "easy");

    let fetched = QuestionRepo::get_question(&db, &created.id).unwrap().unwrap();
    assert_eq!(fetched, created);

    let updated = QuestionRepo::update_question(
        &db,
        &created.id,
        UpdateQuestionParams {
            text: Some("Updated text".to_string()),
            highest_possible_score: Some(3.0),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(updated.text, "Updated text");
    assert_eq!(updated.highest_possible_score, 3.0);
    assert_eq!(updated.concepts, created.concepts);

    let listed = QuestionRepo::list_questions(&db, Some("Updated"), 10, 0).unwrap();
    assert_eq!(listed.len(), 1);

    QuestionRepo::delete_question(&db, &created.id).unwrap();
    assert!(QuestionRepo::get_question(&db, &created.id)
        .unwrap()
        .is_none());
}

#[test]
fn test_referenced_question_cannot_be_deleted() {
    let (_tmp, db) = setup_db();
    let q = seed_question(&db, &["addition"], 1.0, "easy");
    SurveyRepo::create_survey(
        &db,
        CreateSurveyParams {
            name: "Holds a reference".to_string(),
            survey_type: Default::default(),
            unpresentable: false,
            editable_to: PermissionSet::wildcard(),
            visible_to: PermissionSet::wildcard(),
            pages: vec![NewSurveyPage {
                name: "P".to_string(),
                elements: vec![NewSurveyElement::QuestionRef {
                    question_id: q.id.clone(),
                }],
            }],
        },
    )
    .unwrap();

    let err = QuestionRepo::delete_question(&db, &q.id).unwrap_err();
    assert!(err.to_string().contains("referenced"));
}

#[test]
fn test_failed_survey_create_leaves_no_orphans() {
    let (_tmp, db) = setup_db();
    let result = SurveyRepo::create_survey(
        &db,
        CreateSurveyParams {
            name: "Broken".to_string(),
            survey_type: Default::default(),
            unpresentable: false,
            editable_to: PermissionSet::wildcard(),
            visible_to: PermissionSet::wildcard(),
            pages: vec![NewSurveyPage {
                name: "P".to_string(),
                elements: vec![NewSurveyElement::QuestionRef {
                    question_id: "no-such-question".to_string(),
                }],
            }],
        },
    );
    assert!(result.is_err());
    assert!(SurveyRepo::list_surveys(&db, 10, 0).unwrap().is_empty());
}

#[test]
fn test_copy_survey_to_context_produces_fresh_ids() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let other = SurveyContextRepo::create_context(
        &db,
        CreateContextParams {
            name: "Other Course".to_string(),
            editable_to: PermissionSet::wildcard(),
            visible_to: PermissionSet::wildcard(),
        },
    )
    .unwrap();

    let bank = SurveyContextRepo::get_question_bank_survey(&db, &context.id)
        .unwrap()
        .unwrap();
    let copy =
        SurveyRepo::copy_survey_to_context(&db, &bank.id, &other.id, QUESTION_BANK_GIFT_KEY)
            .unwrap();

    assert_ne!(copy.id, bank.id);
    assert_eq!(copy.question_count(), bank.question_count());

    // 题目按引用共享，不复制题目行
    let bank_ids: HashSet<String> = bank.question_elements().map(|q| q.id.clone()).collect();
    let copy_ids: HashSet<String> = copy.question_elements().map(|q| q.id.clone()).collect();
    assert_eq!(bank_ids, copy_ids);

    let loaded = SurveyContextRepo::get_question_bank_survey(&db, &other.id)
        .unwrap()
        .unwrap();
    assert_eq!(loaded.id, copy.id);
}

#[test]
fn test_context_lifecycle_and_association_removal() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());

    let contexts = SurveyContextRepo::list_contexts(&db, 10, 0).unwrap();
    assert_eq!(contexts.len(), 1);
    assert_eq!(contexts[0].id, context.id);

    // 解除题库关联：问卷本身保留
    let bank = SurveyContextRepo::get_question_bank_survey(&db, &context.id)
        .unwrap()
        .unwrap();
    SurveyContextRepo::remove_context_survey(&db, &context.id, QUESTION_BANK_GIFT_KEY).unwrap();
    assert!(SurveyContextRepo::get_question_bank_survey(&db, &context.id)
        .unwrap()
        .is_none());
    assert!(SurveyRepo::get_survey(&db, &bank.id).unwrap().is_some());

    // 删除上下文：问卷仍保留
    SurveyContextRepo::delete_context(&db, &context.id).unwrap();
    assert!(SurveyContextRepo::get_context(&db, &context.id)
        .unwrap()
        .is_none());
    assert!(SurveyRepo::get_survey(&db, &bank.id).unwrap().is_some());
}

#[test]
fn test_context_survey_lookup_handles_special_characters_in_key() {
    let (_tmp, db) = setup_db();
    let context = seed_context_with_bank(&db, PermissionSet::wildcard());
    let bank = SurveyContextRepo::get_question_bank_survey(&db, &context.id)
        .unwrap()
        .unwrap();

    let weird_key = r#"key with "quotes" and 'apostrophes' -- ;"#;
    SurveyContextRepo::set_context_survey(&db, &context.id, weird_key, &bank.id).unwrap();

    let association = SurveyContextRepo::get_context_survey(&db, &context.id, weird_key)
        .unwrap()
        .expect("exact-key lookup must survive special characters");
    assert_eq!(association.survey_id, bank.id);
}
