//! End-to-end behaviour of the standard (non-sync) path.
//!
//! Each test declares directives on `AccountService::find(id)`, runs calls
//! through the engine, and inspects both the returned value and the store.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};

use nebula_cache::{
    AnnotationSource, Cache, CacheDefaults, CacheEngine, CacheError, CacheKey, CacheManager,
    Collaborators, Directive, FnExpressionEngine, InMemoryCacheConfig, InMemoryCacheManager,
    Invocation, InvocationError, KeyGenerator, LoadError, LoggingErrorHandler, MethodId, StoreError,
    TypeName, ValueLoader,
};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
#[error("account backend unavailable")]
struct BackendDown;

fn find() -> MethodId {
    MethodId::new("AccountService", "find").with_parameters(["id"])
}

fn service() -> TypeName {
    TypeName::new("AccountService")
}

fn key(id: i64) -> CacheKey {
    CacheKey::Value(json!(id))
}

fn expressions() -> FnExpressionEngine {
    FnExpressionEngine::new()
        .with("#id", |s| Ok(s.variable("id")?.unwrap_or_default()))
        .with("#id > 0", |s| {
            let id = s.variable("id")?.and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(json!(id > 0))
        })
        .with("#result == null", |s| {
            Ok(json!(s.result()?.is_none_or(Value::is_null)))
        })
        .with("#result != null", |s| {
            Ok(json!(s.result()?.is_some_and(|r| !r.is_null())))
        })
        .with("null", |_| Ok(Value::Null))
}

struct Fixture {
    engine: CacheEngine,
    manager: Arc<InMemoryCacheManager>,
    calls: Arc<AtomicUsize>,
}

impl Fixture {
    fn new(directives: Vec<Directive>) -> Self {
        let source = AnnotationSource::new();
        for directive in directives {
            source.annotate_method(&find(), directive);
        }
        Self::with_source(source, Collaborators::new())
    }

    fn with_source(source: AnnotationSource, collaborators: Collaborators) -> Self {
        let manager =
            Arc::new(InMemoryCacheManager::dynamic(InMemoryCacheConfig::default()).unwrap());
        let engine = CacheEngine::builder(Arc::new(source))
            .expression_engine(Arc::new(expressions()))
            .cache_manager(manager.clone())
            .collaborators(collaborators)
            .build();
        Self {
            engine,
            manager,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn cache(&self, name: &str) -> Arc<dyn Cache> {
        self.manager.cache(name).unwrap()
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Call `find(id)`, computing `result`.
    async fn call(&self, id: i64, result: Value) -> Result<Value, CacheError> {
        let calls = Arc::clone(&self.calls);
        self.engine
            .execute(Invocation::new(find(), service(), vec![json!(id)]), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, InvocationError>(result)
            })
            .await
    }

    async fn account(&self, id: i64) -> Value {
        self.call(id, json!(format!("A{id}"))).await.unwrap()
    }
}

fn cacheable() -> Directive {
    Directive::cacheable(["accounts"]).key("#id").build().unwrap()
}

// ---------------------------------------------------------------------------
// Cacheable
// ---------------------------------------------------------------------------

#[tokio::test]
async fn accounts_scenario() {
    let fx = Fixture::new(vec![
        Directive::cacheable(["accounts"])
            .key("#id")
            .condition("#id > 0")
            .build()
            .unwrap(),
    ]);

    assert_eq!(fx.account(5).await, json!("A5"));
    assert_eq!(fx.calls(), 1);
    assert_eq!(fx.cache("accounts").get(&key(5)).await.unwrap(), Some(json!("A5")));

    assert_eq!(fx.account(5).await, json!("A5"));
    assert_eq!(fx.calls(), 1);

    fx.account(-1).await;
    fx.account(-1).await;
    assert_eq!(fx.calls(), 3);
    assert_eq!(fx.cache("accounts").get(&key(-1)).await.unwrap(), None);
}

#[rstest]
#[case::positive(7, 1)]
#[case::negative(-7, 2)]
#[tokio::test]
async fn condition_decides_caching(#[case] id: i64, #[case] expected_calls: usize) {
    let fx = Fixture::new(vec![
        Directive::cacheable(["accounts"])
            .key("#id")
            .condition("#id > 0")
            .build()
            .unwrap(),
    ]);
    fx.account(id).await;
    fx.account(id).await;
    assert_eq!(fx.calls(), expected_calls);
}

#[tokio::test]
async fn lookup_probes_caches_in_order() {
    let fx = Fixture::new(vec![
        Directive::cacheable(["primary", "secondary"])
            .key("#id")
            .build()
            .unwrap(),
    ]);
    fx.cache("secondary").put(&key(1), json!("from-secondary")).await.unwrap();

    assert_eq!(fx.account(1).await, json!("from-secondary"));
    assert_eq!(fx.calls(), 0);
}

#[tokio::test]
async fn miss_populates_every_cache_of_the_directive() {
    let fx = Fixture::new(vec![
        Directive::cacheable(["primary", "secondary"])
            .key("#id")
            .build()
            .unwrap(),
    ]);
    fx.account(2).await;
    assert_eq!(fx.cache("primary").get(&key(2)).await.unwrap(), Some(json!("A2")));
    assert_eq!(fx.cache("secondary").get(&key(2)).await.unwrap(), Some(json!("A2")));
}

#[tokio::test]
async fn cached_null_is_a_hit() {
    let fx = Fixture::new(vec![cacheable()]);
    assert_eq!(fx.call(3, Value::Null).await.unwrap(), Value::Null);
    assert_eq!(fx.call(3, json!("ignored")).await.unwrap(), Value::Null);
    assert_eq!(fx.calls(), 1);
}

#[tokio::test]
async fn cacheable_unless_skips_the_store() {
    let fx = Fixture::new(vec![
        Directive::cacheable(["accounts"])
            .key("#id")
            .unless("#result == null")
            .build()
            .unwrap(),
    ]);
    assert_eq!(fx.call(4, Value::Null).await.unwrap(), Value::Null);
    assert_eq!(fx.cache("accounts").get(&key(4)).await.unwrap(), None);
    fx.call(4, Value::Null).await.unwrap();
    assert_eq!(fx.calls(), 2);
}

#[tokio::test]
async fn default_key_generator_uses_arguments() {
    let fx = Fixture::new(vec![Directive::cacheable(["accounts"]).build().unwrap()]);
    fx.account(9).await;
    assert_eq!(fx.cache("accounts").get(&key(9)).await.unwrap(), Some(json!("A9")));
}

#[tokio::test]
async fn variadic_tail_is_flattened_into_the_key() {
    let method = MethodId::new("AccountService", "batch")
        .with_parameters(["first", "rest"])
        .variadic();
    let source = AnnotationSource::new();
    source.annotate_method(&method, Directive::cacheable(["batches"]).build().unwrap());
    let fx = Fixture::with_source(source, Collaborators::new());

    let args = vec![json!(1), json!([2, 3])];
    fx.engine
        .execute(Invocation::new(method, service(), args), || async {
            Ok::<_, InvocationError>(json!("batch"))
        })
        .await
        .unwrap();

    let flattened = CacheKey::Composite(vec![json!(1), json!(2), json!(3)]);
    assert_eq!(fx.cache("batches").get(&flattened).await.unwrap(), Some(json!("batch")));
}

#[tokio::test]
async fn null_key_is_an_authoring_error() {
    let fx = Fixture::new(vec![Directive::cacheable(["accounts"]).key("null").build().unwrap()]);
    let err = fx.call(1, json!("A1")).await.unwrap_err();
    assert!(matches!(err, CacheError::NullKey { .. }));
    assert_eq!(fx.calls(), 0);
}

#[tokio::test]
async fn unknown_expression_is_reported() {
    let fx = Fixture::new(vec![Directive::cacheable(["accounts"]).key("#missing").build().unwrap()]);
    let err = fx.call(1, json!("A1")).await.unwrap_err();
    assert!(matches!(err, CacheError::Expression { ref expression, .. } if expression == "#missing"));
}

// ---------------------------------------------------------------------------
// CachePut
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cache_put_always_invokes_and_overwrites() {
    let fx = Fixture::new(vec![Directive::cache_put(["accounts"]).key("#id").build().unwrap()]);
    fx.cache("accounts").put(&key(5), json!("stale")).await.unwrap();

    assert_eq!(fx.account(5).await, json!("A5"));
    assert_eq!(fx.account(5).await, json!("A5"));
    assert_eq!(fx.calls(), 2);
    assert_eq!(fx.cache("accounts").get(&key(5)).await.unwrap(), Some(json!("A5")));
}

#[tokio::test]
async fn cache_put_unless_suppresses_store_but_returns_result() {
    let fx = Fixture::new(vec![
        Directive::cache_put(["accounts"])
            .key("#id")
            .unless("#result == null")
            .build()
            .unwrap(),
    ]);
    fx.cache("accounts").put(&key(5), json!("kept")).await.unwrap();

    assert_eq!(fx.call(5, Value::Null).await.unwrap(), Value::Null);
    assert_eq!(fx.calls(), 1);
    assert_eq!(fx.cache("accounts").get(&key(5)).await.unwrap(), Some(json!("kept")));
}

#[tokio::test]
async fn result_dependent_put_forces_invocation_on_hit() {
    let fx = Fixture::new(vec![
        cacheable(),
        Directive::cache_put(["audit"])
            .key("#id")
            .condition("#result != null")
            .build()
            .unwrap(),
    ]);
    fx.cache("accounts").put(&key(6), json!("cached")).await.unwrap();

    assert_eq!(fx.account(6).await, json!("A6"));
    assert_eq!(fx.calls(), 1);
    assert_eq!(fx.cache("audit").get(&key(6)).await.unwrap(), Some(json!("A6")));
}

#[tokio::test]
async fn put_that_cannot_apply_keeps_the_hit() {
    let fx = Fixture::new(vec![
        cacheable(),
        Directive::cache_put(["audit"])
            .key("#id")
            .condition("#id > 0")
            .build()
            .unwrap(),
    ]);
    fx.cache("accounts").put(&key(-2), json!("cached")).await.unwrap();

    assert_eq!(fx.account(-2).await, json!("cached"));
    assert_eq!(fx.calls(), 0);
    assert_eq!(fx.cache("audit").get(&key(-2)).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// CacheEvict
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_eviction_removes_entry_after_invocation() {
    let fx = Fixture::new(vec![Directive::cache_evict(["accounts"]).key("#id").build().unwrap()]);
    let accounts = fx.cache("accounts");
    accounts.put(&key(1), json!("A1")).await.unwrap();
    accounts.put(&key(2), json!("A2")).await.unwrap();

    fx.account(1).await;
    assert_eq!(accounts.get(&key(1)).await.unwrap(), None);
    assert_eq!(accounts.get(&key(2)).await.unwrap(), Some(json!("A2")));
}

#[tokio::test]
async fn early_eviction_happens_before_a_failing_computation() {
    let fx = Fixture::new(vec![
        Directive::cache_evict(["accounts"])
            .key("#id")
            .before_invocation(true)
            .build()
            .unwrap(),
    ]);
    let accounts = fx.cache("accounts");
    accounts.put(&key(1), json!("A1")).await.unwrap();

    let observed = Arc::new(parking_lot::Mutex::new(None));
    let seen = Arc::clone(&observed);
    let cache = Arc::clone(&accounts);
    let err = fx
        .engine
        .execute(Invocation::new(find(), service(), vec![json!(1)]), move || async move {
            let found = cache.get(&key(1)).await.unwrap();
            *seen.lock() = Some(found);
            Err::<Value, _>(BackendDown)
        })
        .await
        .unwrap_err();

    assert!(err.is_invocation());
    assert_eq!(*observed.lock(), Some(None));
    assert_eq!(accounts.get(&key(1)).await.unwrap(), None);
}

#[tokio::test]
async fn late_eviction_skipped_when_computation_fails() {
    let fx = Fixture::new(vec![Directive::cache_evict(["accounts"]).key("#id").build().unwrap()]);
    let accounts = fx.cache("accounts");
    accounts.put(&key(1), json!("A1")).await.unwrap();

    let err = fx
        .engine
        .execute(Invocation::new(find(), service(), vec![json!(1)]), || async {
            Err::<Value, _>(BackendDown)
        })
        .await
        .unwrap_err();

    assert!(err.as_invocation().and_then(|e| e.downcast_ref::<BackendDown>()).is_some());
    assert_eq!(accounts.get(&key(1)).await.unwrap(), Some(json!("A1")));
}

#[tokio::test]
async fn computation_error_reaches_the_caller_unchanged() {
    let fx = Fixture::new(vec![cacheable()]);
    let thrown = InvocationError::new(BackendDown);
    let raised = thrown.clone();

    let err = fx
        .engine
        .execute(Invocation::new(find(), service(), vec![json!(7)]), move || async move {
            Err::<Value, _>(raised)
        })
        .await
        .unwrap_err();

    let failure = err.as_invocation().unwrap();
    assert!(failure.ptr_eq(&thrown));
    assert!(failure.downcast_ref::<BackendDown>().is_some());
    assert_eq!(fx.cache("accounts").get(&key(7)).await.unwrap(), None);
}

#[rstest]
#[case::before(true)]
#[case::after(false)]
#[tokio::test]
async fn all_entries_clears_the_cache(#[case] before: bool) {
    let fx = Fixture::new(vec![
        Directive::cache_evict(["accounts"])
            .all_entries(true)
            .before_invocation(before)
            .build()
            .unwrap(),
    ]);
    let accounts = fx.cache("accounts");
    accounts.put(&key(1), json!("A1")).await.unwrap();
    accounts.put(&key(2), json!("A2")).await.unwrap();

    fx.account(3).await;
    assert_eq!(accounts.get(&key(1)).await.unwrap(), None);
    assert_eq!(accounts.get(&key(2)).await.unwrap(), None);
}

#[tokio::test]
async fn eviction_condition_sees_the_result() {
    let fx = Fixture::new(vec![
        Directive::cache_evict(["accounts"])
            .key("#id")
            .condition("#result == null")
            .build()
            .unwrap(),
    ]);
    let accounts = fx.cache("accounts");
    accounts.put(&key(1), json!("A1")).await.unwrap();

    fx.account(1).await;
    assert_eq!(accounts.get(&key(1)).await.unwrap(), Some(json!("A1")));

    fx.call(1, Value::Null).await.unwrap();
    assert_eq!(accounts.get(&key(1)).await.unwrap(), None);
}

// ---------------------------------------------------------------------------
// Collaborators and defaults
// ---------------------------------------------------------------------------

/// Keys everything by method name.
#[derive(Debug)]
struct MethodNameKey;

impl KeyGenerator for MethodNameKey {
    fn generate(&self, _target: &Value, method: &MethodId, _args: &[Value]) -> CacheKey {
        CacheKey::Value(json!(method.name()))
    }
}

#[tokio::test]
async fn named_key_generator_is_used() {
    let source = AnnotationSource::new();
    source.annotate_method(
        &find(),
        Directive::cacheable(["accounts"]).key_generator("by-method").build().unwrap(),
    );
    let collaborators = Collaborators::new().with_key_generator("by-method", Arc::new(MethodNameKey));
    let fx = Fixture::with_source(source, collaborators);

    fx.account(1).await;
    assert_eq!(fx.account(2).await, json!("A1"));
    assert_eq!(
        fx.cache("accounts").get(&CacheKey::Value(json!("find"))).await.unwrap(),
        Some(json!("A1"))
    );
}

#[tokio::test]
async fn unknown_named_collaborator_fails_the_call() {
    let fx = Fixture::new(vec![
        Directive::cacheable(["accounts"]).cache_resolver("nowhere").build().unwrap(),
    ]);
    let err = fx.call(1, json!("A1")).await.unwrap_err();
    assert!(matches!(err, CacheError::Configuration { .. }));
    assert_eq!(fx.calls(), 0);
}

#[tokio::test]
async fn type_defaults_supply_cache_names() {
    let source = AnnotationSource::new();
    source.set_defaults(&service(), CacheDefaults::new().with_cache_names(["shared"]));
    source.annotate_method(&find(), Directive::cacheable(Vec::<&str>::new()).key("#id").build().unwrap());
    let fx = Fixture::with_source(source, Collaborators::new());

    fx.account(1).await;
    assert_eq!(fx.cache("shared").get(&key(1)).await.unwrap(), Some(json!("A1")));
}

#[tokio::test]
async fn type_level_directive_applies_to_methods() {
    let source = AnnotationSource::new();
    source.annotate_type(&service(), cacheable());
    let fx = Fixture::with_source(source, Collaborators::new());

    fx.account(8).await;
    fx.account(8).await;
    assert_eq!(fx.calls(), 1);
}

// ---------------------------------------------------------------------------
// Provider failures
// ---------------------------------------------------------------------------

/// A store whose every operation fails.
#[derive(Debug)]
struct OfflineCache;

#[async_trait]
impl Cache for OfflineCache {
    fn name(&self) -> &str {
        "offline"
    }

    async fn get(&self, _key: &CacheKey) -> Result<Option<Value>, StoreError> {
        Err(StoreError::new("offline", "get", "connection refused"))
    }

    async fn put(&self, _key: &CacheKey, _value: Value) -> Result<(), StoreError> {
        Err(StoreError::new("offline", "put", "connection refused"))
    }

    async fn evict(&self, _key: &CacheKey) -> Result<(), StoreError> {
        Err(StoreError::new("offline", "evict", "connection refused"))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        Err(StoreError::new("offline", "clear", "connection refused"))
    }

    async fn get_or_load(&self, _key: &CacheKey, _loader: ValueLoader<'_>) -> Result<Value, LoadError> {
        Err(StoreError::new("offline", "get", "connection refused").into())
    }
}

#[derive(Debug)]
struct OfflineManager;

impl CacheManager for OfflineManager {
    fn cache(&self, _name: &str) -> Option<Arc<dyn Cache>> {
        Some(Arc::new(OfflineCache))
    }

    fn cache_names(&self) -> Vec<String> {
        vec!["offline".to_owned()]
    }
}

fn offline_engine(swallow: bool) -> CacheEngine {
    let source = AnnotationSource::new();
    source.annotate_method(&find(), cacheable());
    source.annotate_method(
        &find(),
        Directive::cache_evict(["accounts"]).key("#id").build().unwrap(),
    );
    let builder = CacheEngine::builder(Arc::new(source))
        .expression_engine(Arc::new(expressions()))
        .cache_manager(Arc::new(OfflineManager));
    if swallow {
        builder.error_handler(Arc::new(LoggingErrorHandler)).build()
    } else {
        builder.build()
    }
}

#[tokio::test]
async fn swallowed_provider_failures_degrade_to_pass_through() {
    let engine = offline_engine(true);
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let calls = Arc::clone(&calls);
        let value = engine
            .execute(Invocation::new(find(), service(), vec![json!(1)]), move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, InvocationError>(json!("A1"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!("A1"));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn provider_failures_propagate_by_default() {
    let engine = offline_engine(false);
    let err = engine
        .execute(Invocation::new(find(), service(), vec![json!(1)]), || async {
            Ok::<_, InvocationError>(json!("A1"))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::Store(ref e) if e.operation == "get"));
}
