//! End-to-end dispatch tests: built-in operations, custom reducers,
//! JSON-decoded actions and deferred reductions.

use pathstate::{Action, Op, Reduction, Store, StoreConfig, StoreError, Value};
use serde_json::json;
use std::time::Duration;

async fn store_with(initial: serde_json::Value) -> Store {
    let store = Store::new(StoreConfig::default());
    store.set_initial_state(initial).await.unwrap();
    store
}

// ============================================================================
// Built-in operations
// ============================================================================

#[tokio::test]
async fn test_form_editing_flow() {
    let store = store_with(json!({"person": {"name": "", "colors": []}})).await;

    store.dispatch_set("person.name", "Ann").unwrap();
    store.dispatch_push("person.colors", ["red", "green", "blue"]).unwrap();
    store
        .dispatch_filter("person.colors", |c| c.as_str() != Some("green"))
        .unwrap();
    store
        .dispatch_map("person.colors", |c| {
            Value::from(c.as_str().unwrap_or_default().to_uppercase())
        })
        .unwrap();
    store
        .dispatch_transform("person.visits", |v| {
            Value::from(v.and_then(Value::as_i64).unwrap_or(0) + 1)
        })
        .unwrap();

    assert_eq!(
        store.get_state().unwrap(),
        json!({"person": {"name": "Ann", "colors": ["RED", "BLUE"], "visits": 1}})
    );
}

#[tokio::test]
async fn test_push_requires_existing_array() {
    let store = store_with(json!({"list": null})).await;

    let err = store.dispatch_push("list", [1]).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { found: "null", .. }));
    let err = store.dispatch_push("absent", [1]).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { found: "undefined", .. }));
    assert!(err.to_string().contains("absent"));
}

#[tokio::test]
async fn test_filter_requires_existing_array() {
    let store = store_with(json!({"title": "todo"})).await;
    let before = store.get_state().unwrap();

    let err = store.dispatch_filter("title", |_| true).unwrap_err();
    assert!(matches!(
        err,
        StoreError::TypeMismatch { expected: "array", found: "string", .. }
    ));
    let err = store.dispatch_filter("absent", |_| true).unwrap_err();
    assert!(matches!(err, StoreError::TypeMismatch { found: "undefined", .. }));

    assert!(Value::ptr_eq(&store.get_state().unwrap(), &before));
    assert_eq!(store.history().len(), 1);
}

#[tokio::test]
async fn test_delete_missing_still_publishes() {
    let store = store_with(json!({"a": 1})).await;
    store.dispatch_delete("b.c").unwrap();

    let history = store.history();
    assert_eq!(history.last().unwrap().label, "@@delete b.c");
    assert_eq!(store.get_state().unwrap(), json!({"a": 1}));
}

#[tokio::test]
async fn test_history_is_bounded() {
    let store = Store::new(StoreConfig::default().with_history_limit(3));
    store.set_initial_state(json!({})).await.unwrap();
    for n in 0..10 {
        store.dispatch_set("n", n).unwrap();
    }

    let history = store.history();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].snapshot["n"], 9);

    store.clear_history();
    assert!(store.history().is_empty());
}

// ============================================================================
// Custom reducers
// ============================================================================

#[tokio::test]
async fn test_custom_reducer_with_suffix() {
    let store = store_with(json!({"count": 0})).await;
    store
        .add_reducer("increment", |state: &Value, payload: &Value| {
            let by = payload.as_i64().unwrap_or(1);
            let count = state["count"].as_i64().unwrap_or(0);
            Ok(Reduction::ready(json!({"count": count + by})))
        })
        .unwrap();

    store.dispatch(Action::custom("increment", json!(2))).unwrap();
    store.dispatch(Action::custom("increment from button", json!(3))).unwrap();

    assert_eq!(store.get_state().unwrap()["count"], 5);
    assert_eq!(store.history().last().unwrap().label, "increment from button");
}

#[tokio::test]
async fn test_reducer_error_refuses_write() {
    let store = store_with(json!({"count": 0})).await;
    store
        .add_reducer("fail", |_: &Value, _: &Value| {
            Err(StoreError::invalid_payload("fail", "always fails"))
        })
        .unwrap();

    let err = store.dispatch(Action::custom("fail", json!(null))).unwrap_err();
    assert!(matches!(err, StoreError::InvalidPayload { .. }));
    assert_eq!(store.history().len(), 1);
}

#[tokio::test]
async fn test_builtin_kinds_cannot_be_overridden() {
    let store = store_with(json!({})).await;
    let err = store
        .add_reducer("@@set", |s: &Value, _: &Value| Ok(Reduction::ready(s.clone())))
        .unwrap_err();
    assert!(matches!(err, StoreError::ReservedKind { .. }));
}

#[tokio::test]
async fn test_remove_reducer() {
    let store = store_with(json!({})).await;
    store
        .add_reducer("reset", |_: &Value, _: &Value| Ok(Reduction::ready(json!({}))))
        .unwrap();
    assert!(store.registered_kinds().contains(&"reset".to_string()));

    assert!(store.remove_reducer("reset"));
    let err = store.dispatch(Action::custom("reset", json!(null))).unwrap_err();
    assert!(matches!(err, StoreError::UnknownOperation { .. }));
}

// ============================================================================
// JSON-decoded built-ins
// ============================================================================

#[tokio::test]
async fn test_serialized_builtin_actions_replay() {
    let store = store_with(json!({"person": {"colors": []}})).await;

    let actions = [
        ("@@set person.name", json!({"path": "person.name", "value": "Ann"})),
        ("@@push person.colors", json!({"path": "person.colors", "value": ["red", "blue"]})),
        ("@@delete person.name", json!("person.name")),
    ];
    for (kind, payload) in actions {
        store.dispatch(Action::custom(kind, payload)).unwrap();
    }

    assert_eq!(
        store.get_state().unwrap(),
        json!({"person": {"colors": ["red", "blue"]}})
    );
}

#[tokio::test]
async fn test_function_builtins_cannot_be_decoded() {
    let store = store_with(json!({"list": [1]})).await;
    let err = store
        .dispatch(Action::custom("@@filter list", json!({"path": "list"})))
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidPayload { .. }));
}

#[tokio::test]
async fn test_init_action_replaces_root() {
    let store = store_with(json!({"old": true})).await;
    store.dispatch(Op::init(json!({"new": true}))).unwrap();
    assert_eq!(store.get_state().unwrap(), json!({"new": true}));
}

// ============================================================================
// Deferred reductions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_deferred_reducer_publishes_later() {
    let store = store_with(json!({"user": null})).await;
    store
        .add_reducer("load_user", |state: &Value, _: &Value| {
            let state = state.clone();
            Ok(Reduction::deferred(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                pathstate::apply_op(&state, &Op::set("user", json!({"name": "Ann"})))
            }))
        })
        .unwrap();

    store.dispatch(Action::custom("load_user", json!(null))).unwrap();
    assert!(store.get_state().unwrap()["user"].is_null());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(store.get_state().unwrap()["user"]["name"], "Ann");
    assert_eq!(store.history().last().unwrap().label, "@@async");
}

#[tokio::test(start_paused = true)]
async fn test_failed_deferred_reducer_keeps_state() {
    let store = store_with(json!({"n": 1})).await;
    store
        .dispatch_async(async { Err::<Value, _>(StoreError::invalid_payload("load", "offline")) })
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.get_state().unwrap(), json!({"n": 1}));
    assert_eq!(store.history().len(), 1);
}

#[tokio::test]
async fn test_dispatch_async_resolves() {
    let store = store_with(json!({"n": 1})).await;
    let (tx, rx) = tokio::sync::oneshot::channel::<Value>();
    store
        .dispatch_async(async move {
            rx.await
                .map_err(|e| StoreError::invalid_payload("@@async", e.to_string()))
        })
        .unwrap();

    tx.send(Value::from(json!({"n": 2}))).unwrap();
    for _ in 0..100 {
        if store.get_state().unwrap()["n"] == 2 {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert_eq!(store.get_state().unwrap()["n"], 2);
}

#[test]
fn test_deferred_without_runtime_is_an_error() {
    let store = Store::default();
    futures::executor::block_on(store.set_initial_state(json!({}))).unwrap();
    store
        .add_reducer("later", |s: &Value, _: &Value| {
            let s = s.clone();
            Ok(Reduction::deferred(async move { Ok::<Value, StoreError>(s) }))
        })
        .unwrap();

    let err = store.dispatch(Action::custom("later", json!(null))).unwrap_err();
    assert!(matches!(err, StoreError::NoAsyncRuntime));
}
