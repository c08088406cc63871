//! 概念选题性能基准测试

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::{BTreeMap, HashMap};

use concept_bank::bank::types::{ConceptParameters, Question, QuestionTypeParameter};
use concept_bank::concept_selection::select_concept_questions;
use concept_bank::permissions::PermissionSet;

/// 构造合成题库：`concept_count` 个概念，每个概念 `per_concept` 题，
/// easy/hard 各半
fn synthetic_pool(concept_count: usize, per_concept: usize) -> Vec<Question> {
    let mut pool = Vec::with_capacity(concept_count * per_concept);
    for c in 0..concept_count {
        for i in 0..per_concept {
            let difficulty = if i % 2 == 0 { "easy" } else { "hard" };
            pool.push(Question {
                id: format!("q-{}-{}", c, i),
                text: format!("Question {} for concept {}", i, c),
                concepts: vec![format!("concept-{}", c)],
                highest_possible_score: 1.0,
                properties: HashMap::from([(
                    "difficulty".to_string(),
                    difficulty.to_string(),
                )]),
                editable_to: PermissionSet::wildcard(),
                visible_to: PermissionSet::wildcard(),
                created_at: "2026-01-01T00:00:00+00:00".to_string(),
                updated_at: "2026-01-01T00:00:00+00:00".to_string(),
            });
        }
    }
    pool
}

fn request(concept_count: usize, easy: u32, hard: u32) -> BTreeMap<String, ConceptParameters> {
    (0..concept_count)
        .map(|c| {
            (
                format!("concept-{}", c),
                ConceptParameters {
                    question_params: vec![
                        QuestionTypeParameter {
                            property_key: "difficulty".to_string(),
                            property_value: "easy".to_string(),
                            count: easy,
                        },
                        QuestionTypeParameter {
                            property_key: "difficulty".to_string(),
                            property_value: "hard".to_string(),
                            count: hard,
                        },
                    ],
                    ..Default::default()
                },
            )
        })
        .collect()
}

fn benchmark_selection(c: &mut Criterion) {
    let pool = synthetic_pool(5, 100);
    let concepts = request(5, 5, 5);

    c.bench_function("select_500_pool_5_concepts", |b| {
        b.iter(|| {
            let selected =
                select_concept_questions(black_box(&pool), black_box(&concepts), false).unwrap();
            black_box(selected);
        })
    });

    c.bench_function("validate_500_pool_5_concepts", |b| {
        b.iter(|| {
            let selected =
                select_concept_questions(black_box(&pool), black_box(&concepts), true).unwrap();
            black_box(selected);
        })
    });
}

fn benchmark_large_pool(c: &mut Criterion) {
    let pool = synthetic_pool(20, 200);
    let concepts = request(20, 10, 10);

    c.bench_function("select_4000_pool_20_concepts", |b| {
        b.iter(|| {
            let selected =
                select_concept_questions(black_box(&pool), black_box(&concepts), false).unwrap();
            black_box(selected);
        })
    });
}

criterion_group!(benches, benchmark_selection, benchmark_large_pool);
criterion_main!(benches);
