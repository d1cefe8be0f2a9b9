use attnscope_core::config::{AttnConfig, RankingConfig};
use attnscope_core::dual::AttentionSource;
use attnscope_core::events::parse_tokens;
use attnscope_core::normalize::scale_row;
use attnscope_core::ranker::rank;
use attnscope_core::tensor::{Head, Layer};
use attnscope_core::timeline::EventStreamMapper;
use criterion::{Criterion, black_box, criterion_group, criterion_main};

fn synthetic_layer(heads: usize, len: usize) -> Layer {
    Layer {
        heads: (0..heads)
            .map(|h| Head {
                rows: (0..len)
                    .map(|t| {
                        let raw: Vec<f32> = (0..len)
                            .map(|s| {
                                if s <= t {
                                    ((s * 31 + t * 17 + h * 7) % 101) as f32
                                } else {
                                    0.0
                                }
                            })
                            .collect();
                        scale_row(&raw)
                    })
                    .collect(),
            })
            .collect(),
    }
}

fn bench_normalizer(c: &mut Criterion) {
    let row: Vec<f32> = (0..1024).map(|i| ((i * 37) % 113) as f32 / 7.0).collect();
    c.bench_function("scale_row_1024", |b| b.iter(|| scale_row(black_box(&row))));

    let constant = vec![0.25f32; 1024];
    c.bench_function("scale_row_constant", |b| {
        b.iter(|| scale_row(black_box(&constant)))
    });
}

fn bench_ranker(c: &mut Criterion) {
    let layer = synthetic_layer(8, 512);
    let enabled = vec![true; 8];

    let cutoff = RankingConfig::default();
    c.bench_function("rank_cutoff_8x512", |b| {
        b.iter(|| {
            rank(
                AttentionSource::Primary,
                black_box(&layer),
                black_box(400),
                &enabled,
                &cutoff,
                |_| true,
            )
        })
    });

    let top = RankingConfig {
        top_only: true,
        ..RankingConfig::default()
    };
    c.bench_function("rank_top_8x512", |b| {
        b.iter(|| {
            rank(
                AttentionSource::Primary,
                black_box(&layer),
                black_box(400),
                &enabled,
                &top,
                |s| s % 3 != 0,
            )
        })
    });
}

fn bench_event_mapper(c: &mut Criterion) {
    let tokens: Vec<String> = (0..2000)
        .map(|i| match i % 4 {
            0 => format!("NOTE_ON_{}", 40 + (i / 4) % 40),
            1 => format!("TIME_SHIFT_{}", 1 + i % 50),
            2 => format!("NOTE_OFF_{}", 40 + (i / 4) % 40),
            _ => format!("VELOCITY_{}", 1 + i % 32),
        })
        .collect();
    let config = AttnConfig::default();

    c.bench_function("parse_tokens_2000", |b| {
        b.iter(|| parse_tokens(black_box(&tokens), config.performance.lead_in_steps))
    });

    let (events, _) = parse_tokens(&tokens, config.performance.lead_in_steps).unwrap();
    c.bench_function("event_mapper_build_2000", |b| {
        b.iter(|| EventStreamMapper::from_layout(black_box(&events), &config.layout))
    });
}

criterion_group!(benches, bench_normalizer, bench_ranker, bench_event_mapper);
criterion_main!(benches);
