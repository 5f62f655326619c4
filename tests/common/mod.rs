//! Shared fixtures: a fake native engine with injectable delay and failure.
#![allow(dead_code)]

use std::any::Any;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use gg_serving::models::{
    DesiredVersions, EngineError, InstanceId, ModelEngine, ModelRegistry, NativeHandle, VersionConfig,
};
use gg_serving::sequence::SequenceReaper;

/// Parameter key: milliseconds `create_handle` sleeps before returning.
pub const DELAY_MS: &str = "fake.delay_ms";
/// Parameter key: when present, `create_handle` fails after the delay.
pub const FAIL: &str = "fake.fail";

pub struct FakeHandle {
    pub instance: InstanceId,
}

impl NativeHandle for FakeHandle {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn footprint_bytes(&self) -> usize {
        1024
    }
}

/// Engine that tracks which handles are alive and panics on a double destroy.
#[derive(Default)]
pub struct FakeEngine {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    live: Mutex<HashSet<InstanceId>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::SeqCst)
    }

    pub fn is_live(&self, instance: InstanceId) -> bool {
        self.live.lock().contains(&instance)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

#[async_trait]
impl ModelEngine for FakeEngine {
    async fn create_handle(
        &self,
        instance: InstanceId,
        config: &VersionConfig,
    ) -> Result<Box<dyn NativeHandle>, EngineError> {
        let delay = config
            .parameters
            .get(DELAY_MS)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if config.parameters.contains_key(FAIL) {
            return Err(EngineError::Backend("injected failure".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        self.live.lock().insert(instance);
        Ok(Box::new(FakeHandle { instance }))
    }

    async fn destroy_handle(&self, instance: InstanceId, handle: Box<dyn NativeHandle>) {
        let fake = handle
            .as_any()
            .downcast_ref::<FakeHandle>()
            .expect("handle from another engine");
        assert_eq!(fake.instance, instance, "handle destroyed under the wrong instance");
        assert!(self.live.lock().remove(&instance), "handle destroyed twice");
        self.destroyed.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn config(tag: &str) -> VersionConfig {
    VersionConfig::new(format!("/fake/{}", tag)).with_fingerprint(tag)
}

pub fn slow(tag: &str, delay: Duration) -> VersionConfig {
    config(tag).with_parameter(DELAY_MS, delay.as_millis().to_string())
}

pub fn failing(tag: &str) -> VersionConfig {
    config(tag).with_parameter(FAIL, "1")
}

pub fn desired(versions: &[(u64, VersionConfig)]) -> DesiredVersions {
    versions.iter().cloned().collect()
}

pub fn registry(engine: &Arc<FakeEngine>) -> Arc<ModelRegistry> {
    registry_with_limit(engine, 500)
}

pub fn registry_with_limit(engine: &Arc<FakeEngine>, max_sequences: usize) -> Arc<ModelRegistry> {
    let engine: Arc<dyn ModelEngine> = engine.clone();
    Arc::new(ModelRegistry::new(engine, Arc::new(SequenceReaper::new()), max_sequences))
}

/// Poll `check` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
