use std::collections::BTreeMap;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use questgen_core::difficulty::create_difficulty_plan;
use questgen_core::examples::generate_example_sequence;
use questgen_core::gaps::{detect_section_gaps, GapReport};
use questgen_core::model::{
    DifficultyStrategy, GenerationStrategy, SectionBlueprint, SubSkillTarget, WorkedExample,
};
use questgen_core::plan::build_plan;

fn bench_difficulty(c: &mut Criterion) {
    let mut group = c.benchmark_group("difficulty_plan");
    let balanced = DifficultyStrategy::default();
    let weighted = DifficultyStrategy::Weighted {
        weights: BTreeMap::from([(1, 0.2), (2, 0.5), (3, 0.3)]),
    };

    group.bench_function("balanced/40", |b| {
        b.iter(|| create_difficulty_plan(black_box(40), &balanced))
    });
    group.bench_function("balanced/1000", |b| {
        b.iter(|| create_difficulty_plan(black_box(1000), &balanced))
    });
    group.bench_function("weighted/1000", |b| {
        b.iter(|| create_difficulty_plan(black_box(1000), &weighted))
    });
    group.finish();
}

fn bench_examples(c: &mut Criterion) {
    let mut group = c.benchmark_group("example_sequence");
    group.bench_function("5x8", |b| {
        b.iter(|| generate_example_sequence(black_box(5), black_box(8)))
    });
    group.bench_function("12x500", |b| {
        b.iter(|| generate_example_sequence(black_box(12), black_box(500)))
    });
    group.finish();
}

fn bench_plan(c: &mut Criterion) {
    let example = WorkedExample {
        question_text: "Q".into(),
        answer_options: vec!["A) a".into(), "B) b".into(), "C) c".into(), "D) d".into()],
        correct_answer: "A".into(),
        explanation: "E".into(),
        difficulty: None,
    };
    let names: Vec<String> = (0..10).map(|i| format!("Skill {i}")).collect();
    let blueprint = SectionBlueprint {
        test_type: "Bench".into(),
        section: "Section".into(),
        modes: vec!["practice_1".into(), "practice_2".into(), "diagnostic".into()],
        difficulty: DifficultyStrategy::default(),
        answer_options: 4,
        strategy: GenerationStrategy::Balanced {
            sub_skills: names
                .iter()
                .map(|name| SubSkillTarget {
                    name: name.clone(),
                    count: 30,
                })
                .collect(),
        },
        examples: names
            .iter()
            .map(|name| (name.clone(), vec![example.clone(); 5]))
            .collect(),
    };
    let gaps = GapReport {
        test_type: blueprint.test_type.clone(),
        section: blueprint.section.clone(),
        cells: detect_section_gaps(&blueprint, &Default::default()).unwrap(),
    };

    c.bench_function("build_plan/900", |b| {
        b.iter(|| build_plan(black_box(&blueprint), black_box(&gaps)))
    });
}

criterion_group!(benches, bench_difficulty, bench_examples, bench_plan);
criterion_main!(benches);
