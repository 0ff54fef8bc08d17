use catalog_crawler::ledger::CrawlLedger;
use catalog_crawler::model::{EntityId, SeedFields};
use catalog_crawler::normalize::normalize_measurement;
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize_measurement");

    for raw in ["0.7 m (2′04″)", "1,234.5", "6,9 kg", "—", "12"] {
        group.bench_with_input(BenchmarkId::from_parameter(raw), raw, |b, raw| {
            b.iter(|| black_box(normalize_measurement(black_box(raw))));
        });
    }

    group.finish();
}

// Registration throughput, half of the ids repeated
fn bench_register_if_new(c: &mut Criterion) {
    let mut group = c.benchmark_group("register_if_new");

    for count in [1_000u32, 10_000] {
        group.bench_with_input(BenchmarkId::new("sequential", count), &count, |b, &count| {
            b.iter(|| {
                let ledger = CrawlLedger::new();
                for n in 0..count {
                    black_box(ledger.register_if_new(EntityId(n % (count / 2)), SeedFields::default()));
                }
                ledger
            });
        });

        group.bench_with_input(BenchmarkId::new("four_threads", count), &count, |b, &count| {
            b.iter(|| {
                let ledger = Arc::new(CrawlLedger::new());
                std::thread::scope(|scope| {
                    for _ in 0..4 {
                        let ledger = Arc::clone(&ledger);
                        scope.spawn(move || {
                            for n in 0..count {
                                black_box(ledger.register_if_new(EntityId(n), SeedFields::default()));
                            }
                        });
                    }
                });
                ledger
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_register_if_new);
criterion_main!(benches);
