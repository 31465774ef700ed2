use criterion::{black_box, criterion_group, criterion_main, Criterion};
use settings_core::crypto::Envelope;
use settings_core::merge::merge;
use settings_core::sources::env::parse_dotenv_bytes;
use settings_core::{FlatMap, KeyPathMerger};

fn dotenv_fixture(keys: usize) -> String {
    (0..keys)
        .map(|i| format!("SECTION_{}__KEY_{}=value-{}\n", i % 8, i, i))
        .collect()
}

fn envelope_benchmark(c: &mut Criterion) {
    let plaintext = dotenv_fixture(50);
    let sealed = Envelope::seal(plaintext.as_bytes(), b"bench-passphrase")
        .unwrap()
        .to_bytes();

    let mut group = c.benchmark_group("envelope");
    // Argon2id dominates both directions
    group.sample_size(10);

    group.bench_function("seal", |b| {
        b.iter(|| Envelope::seal(black_box(plaintext.as_bytes()), b"bench-passphrase").unwrap())
    });

    group.bench_function("open", |b| {
        b.iter(|| {
            Envelope::from_bytes(black_box(&sealed))
                .unwrap()
                .open(b"bench-passphrase")
                .unwrap()
        })
    });

    group.finish();
}

fn parse_benchmark(c: &mut Criterion) {
    let content = dotenv_fixture(500);
    c.bench_function("env::parse_dotenv_bytes (500 keys)", |b| {
        b.iter(|| parse_dotenv_bytes("bench", black_box(content.as_bytes())).unwrap())
    });
}

fn merge_benchmark(c: &mut Criterion) {
    let merger = KeyPathMerger::default();
    let layers: Vec<FlatMap> = (0..5)
        .map(|layer| {
            (0..200)
                .map(|i| (format!("SECTION_{}__KEY_{}", i % 8, i), format!("layer-{}", layer)))
                .collect()
        })
        .collect();

    c.bench_function("merge::expand (200 keys)", |b| {
        b.iter(|| merger.expand(black_box(&layers[0])).unwrap())
    });

    c.bench_function("merge::fold (5 layers x 200 keys)", |b| {
        b.iter(|| {
            layers
                .iter()
                .map(|flat| merger.expand(flat).unwrap())
                .fold(Default::default(), merge)
        })
    });
}

criterion_group!(benches, envelope_benchmark, parse_benchmark, merge_benchmark);
criterion_main!(benches);
