//! End-to-end behavior of the composed runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;
use tessera_cache::CacheKey;
use tessera_core::{HealthStatus, IndexError};
use tessera_query::{
    IndexExecutor, IndexRecommendation, QueryDescriptor, QueryParams, QueryRuntime,
};
use tessera_test_utils::fixtures::{failing_layer, small_config};

/// Records every statement it is asked to run; fails for listed tables.
#[derive(Default)]
struct ScriptedExecutor {
    fail_tables: Vec<String>,
    statements: Mutex<Vec<String>>,
}

#[async_trait]
impl IndexExecutor for ScriptedExecutor {
    async fn create_index(&self, rec: &IndexRecommendation) -> Result<(), IndexError> {
        self.statements
            .lock()
            .expect("statements lock")
            .push(rec.create_statement());
        if self.fail_tables.contains(&rec.table) {
            return Err(IndexError::CreationFailed {
                index_name: rec.index_name(),
                reason: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn test_runtime_feeds_advisor_and_applies() {
    let runtime = QueryRuntime::from_config(&small_config()).expect("runtime");
    let by_email = QueryDescriptor::new("SELECT * FROM users WHERE email = $1")
        .accessing("users", ["email"]);
    let by_status = QueryDescriptor::new("SELECT * FROM orders WHERE status = $1")
        .accessing("orders", ["status"]);

    for i in 0..6 {
        let params: QueryParams = [("email".to_string(), json!(format!("u{i}@x.io")))].into();
        let _: Result<Vec<u32>, ()> = runtime
            .execute(&by_email, &params, || async { Ok(vec![1]) })
            .await;
        let _: Result<Vec<u32>, ()> = runtime
            .execute(&by_status, &params, || async { Ok(vec![]) })
            .await;
    }

    let recs = runtime.advisor().recommendations();
    assert_eq!(recs.len(), 2);

    let executor = ScriptedExecutor {
        fail_tables: vec!["orders".to_string()],
        ..Default::default()
    };
    let report = runtime.advisor().apply_recommendations(&recs, &executor).await;
    assert_eq!(report.created, vec!["idx_users_email"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(executor.statements.lock().expect("lock").len(), 2);
}

#[tokio::test]
async fn test_runtime_survives_failing_cache() {
    let (layer, backend) = failing_layer();
    let layer = Arc::new(layer);
    let runtime =
        QueryRuntime::with_cache_layer(&small_config(), layer.clone()).expect("runtime");

    let key = CacheKey::named("dashboard").arg("daily").build();
    let calls = AtomicUsize::new(0);
    for _ in 0..2 {
        let value: Result<u64, ()> = runtime
            .cache()
            .cached_call(&key, None, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(99)
            })
            .await;
        assert_eq!(value, Ok(99));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(backend.calls() >= 4);

    let report = runtime.report().await;
    assert_eq!(report.health.status, HealthStatus::Degraded);
    assert!(report.backend.is_none());
    assert!(report.cache.errors >= 4);
}

#[tokio::test]
async fn test_cached_call_matches_uncached_result() {
    let runtime = QueryRuntime::from_config(&small_config()).expect("runtime");
    let key = CacheKey::named("profile").arg(7).kwarg("fields", json!(["name"])).build();

    let uncached: Result<String, ()> = async { Ok("ada".to_string()) }.await;
    let first: Result<String, ()> = runtime
        .cache()
        .cached_call(&key, None, || async { Ok("ada".to_string()) })
        .await;
    let second: Result<String, ()> = runtime
        .cache()
        .cached_call(&key, None, || async { Ok("changed".to_string()) })
        .await;

    assert_eq!(first, uncached);
    assert_eq!(second, uncached);
}
