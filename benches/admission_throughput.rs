//! Admission throughput benchmarks.
//!
//! Measures the resolve/release hot path against an available version,
//! alone and with other models present in the registry.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use gg_serving::models::{
    DesiredVersions, EngineError, InstanceId, ModelEngine, ModelRegistry, NativeHandle, VersionConfig,
    VersionRequest,
};
use gg_serving::sequence::SequenceReaper;

struct NoopHandle;

impl NativeHandle for NoopHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct NoopEngine;

#[async_trait]
impl ModelEngine for NoopEngine {
    async fn create_handle(
        &self,
        _instance: InstanceId,
        _config: &VersionConfig,
    ) -> Result<Box<dyn NativeHandle>, EngineError> {
        Ok(Box::new(NoopHandle))
    }

    async fn destroy_handle(&self, _instance: InstanceId, _handle: Box<dyn NativeHandle>) {}
}

fn loaded_registry(rt: &tokio::runtime::Runtime, models: usize) -> Arc<ModelRegistry> {
    let registry = Arc::new(ModelRegistry::new(
        Arc::new(NoopEngine),
        Arc::new(SequenceReaper::new()),
        500,
    ));
    rt.block_on(async {
        for m in 0..models {
            let desired: DesiredVersions = (1..=3)
                .map(|v| (v, VersionConfig::new(format!("/bench/{}/{}", m, v))))
                .collect();
            registry.reload(&format!("model-{}", m), &desired).await;
        }
    });
    registry
}

fn bench_resolve_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("resolve_release");
    group.throughput(Throughput::Elements(1));

    for models in [1usize, 64] {
        let registry = loaded_registry(&rt, models);
        group.bench_function(BenchmarkId::new("default_version", models), |b| {
            b.to_async(&rt).iter(|| async {
                let guard = registry
                    .resolve(black_box("model-0"), VersionRequest::Default, Duration::from_secs(1))
                    .await
                    .unwrap();
                black_box(guard.version());
            })
        });
        group.bench_function(BenchmarkId::new("specific_version", models), |b| {
            b.to_async(&rt).iter(|| async {
                let guard = registry
                    .resolve(black_box("model-0"), VersionRequest::Specific(2), Duration::from_secs(1))
                    .await
                    .unwrap();
                black_box(guard.version());
            })
        });
    }

    group.finish();
}

fn bench_concurrent_admissions(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let registry = loaded_registry(&rt, 1);
    let mut group = c.benchmark_group("concurrent_admissions");

    for tasks in [8usize, 64] {
        group.throughput(Throughput::Elements(tasks as u64));
        group.bench_function(BenchmarkId::new("tasks", tasks), |b| {
            b.to_async(&rt).iter(|| {
                let registry = registry.clone();
                async move {
                    let handles: Vec<_> = (0..tasks)
                        .map(|_| {
                            let registry = registry.clone();
                            tokio::spawn(async move {
                                let guard = registry
                                    .resolve("model-0", VersionRequest::Default, Duration::from_secs(1))
                                    .await
                                    .unwrap();
                                black_box(guard.version())
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap();
                    }
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_resolve_release, bench_concurrent_admissions);
criterion_main!(benches);
