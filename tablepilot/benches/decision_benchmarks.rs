use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use tablepilot::{
    RoundStateMachine, RuleSet, Team,
    pattern::{decide, decide_recent},
    round::{MachineConfig, Sample},
};

/// Rule set with `n` rules where only the last one matches `P P P`
fn rules_with_late_match(n: usize) -> RuleSet {
    let mut text: Vec<String> = (0..n.saturating_sub(1))
        .map(|i| if i % 2 == 0 { "BBB-P" } else { "BPB-B" }.to_string())
        .collect();
    text.push("PPP-B".to_string());
    text.join(";").parse().unwrap()
}

fn bench_parse_rules(c: &mut Criterion) {
    let text = "BBP-P;BPB-B;PPB-B;PBP-P;BBB-P;PPP-B;BPP-P;PBB-B";

    c.bench_function("parse_8_rules", |b| {
        b.iter(|| black_box(text).parse::<RuleSet>().unwrap());
    });
}

fn bench_decide(c: &mut Criterion) {
    let mut group = c.benchmark_group("decide_first_match");
    let recent = [Team::Blue, Team::Blue, Team::Blue];

    for n in [1, 8, 64] {
        let rules = rules_with_late_match(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &rules, |b, rules| {
            b.iter(|| decide(black_box(&recent), rules));
        });
    }

    group.finish();
}

fn bench_decide_recent(c: &mut Criterion) {
    let rules = rules_with_late_match(8);
    let history: Vec<Team> = (0..50)
        .map(|i| if i % 3 == 0 { Team::Red } else { Team::Blue })
        .chain([Team::Blue, Team::Blue, Team::Blue])
        .collect();

    c.bench_function("decide_recent_50_history", |b| {
        b.iter(|| decide_recent(black_box(&history).iter().copied(), &rules));
    });
}

/// One full round of countdown samples through the state machine
fn bench_observe_round(c: &mut Criterion) {
    let rules: RuleSet = "BBP-P".parse().unwrap();

    c.bench_function("observe_round_samples", |b| {
        b.iter(|| {
            let mut machine = RoundStateMachine::new(1, MachineConfig::default(), rules.clone());
            machine.activate().unwrap();
            let mut red = 0;
            for _ in 0..4 {
                for timer in [25, 20, 15, 10, 7, 5, 2, 0] {
                    let _ = machine.observe(Sample::new(timer, 0, red));
                }
                red += 1;
            }
            machine.next_round_number()
        });
    });
}

criterion_group!(
    benches,
    bench_parse_rules,
    bench_decide,
    bench_decide_recent,
    bench_observe_round
);
criterion_main!(benches);
