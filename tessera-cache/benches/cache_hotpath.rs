use criterion::{criterion_group, criterion_main, Criterion};
use serde_json::json;
use std::hint::black_box;
use std::sync::Arc;
use tessera_cache::{CacheBackend, CacheKey, CacheLayer, InMemoryBackend};

fn bench_memory_backend(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("build runtime");
    let backend = InMemoryBackend::new(1_000).expect("capacity");
    runtime.block_on(async {
        for i in 0..1_000 {
            backend
                .set(&format!("user:{i}"), json!({ "id": i }), None)
                .await
                .expect("seed");
        }
    });

    c.bench_function("memory/get_hit", |b| {
        b.iter(|| {
            let value = runtime.block_on(backend.get(black_box("user:500")));
            black_box(value.expect("get"));
        });
    });

    c.bench_function("memory/set_evict", |b| {
        let mut i = 1_000u64;
        b.iter(|| {
            i += 1;
            let key = format!("user:{i}");
            let stored = runtime.block_on(backend.set(&key, json!(i), None));
            black_box(stored.expect("set"));
        });
    });
}

fn bench_layer(c: &mut Criterion) {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("build runtime");
    let layer = CacheLayer::with_defaults(Arc::new(InMemoryBackend::new(1_000).expect("capacity")));

    c.bench_function("layer/get_or_set_hit", |b| {
        b.iter(|| {
            let out: Result<u64, ()> =
                runtime.block_on(layer.get_or_set("report:daily", None, || async { Ok(42) }));
            black_box(out.expect("value"));
        });
    });

    c.bench_function("key/derive_with_kwargs", |b| {
        b.iter(|| {
            let key = CacheKey::named("feed")
                .arg(black_box(7))
                .kwarg("limit", 20)
                .kwarg("order", "desc")
                .build();
            black_box(key);
        });
    });
}

criterion_group!(benches, bench_memory_backend, bench_layer);
criterion_main!(benches);
