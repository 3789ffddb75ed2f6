//! Integration tests for the preview mode.
//!
//! Preview plans without mutating anything: resources are classified,
//! references resolved, and the resulting change ledger must be
//! deterministic for identical inputs.

mod common;

use common::{chain_live, chain_spec, new_log, prior_state, request, resource, FakeRuntime,
    RecordingStorage};
use intentrun::ledger::{CREATE_STEPS, UNCHANGED_STEPS};
use intentrun::{bus, Action, Error, Operation, Spec};
use serde_json::json;
use std::sync::Arc;

fn preview_op(runtime: FakeRuntime, storage: RecordingStorage) -> Operation {
    Operation::new(Arc::new(runtime), Arc::new(storage)).with_parallelism(1)
}

#[tokio::test]
async fn test_create_plan_resolves_references() {
    let log = new_log();
    let op = preview_op(FakeRuntime::new(log.clone()), RecordingStorage::new(log.clone()));

    let order = op.preview(request(chain_spec())).await.unwrap();

    assert_eq!(order.step_keys(), ["jack", "pony", "eric"]);
    assert_eq!(order.values(&[CREATE_STEPS]).len(), 3);

    let eric = order.get("eric").unwrap();
    assert_eq!(eric.action, Action::Create);
    assert!(eric.old.is_none());
    assert_eq!(eric.new.as_ref().unwrap().attributes, json!({"a": "c"}));

    // Creates skip read-through classification entirely.
    assert!(common::log_entries(&log).is_empty());
}

#[tokio::test]
async fn test_identical_inputs_yield_identical_ledgers() {
    let mut ledgers = Vec::new();
    for _ in 0..2 {
        let log = new_log();
        let storage = RecordingStorage::new(log.clone());
        storage.seed(&prior_state(vec![chain_live()[0].clone()], 3)).await;
        let op = preview_op(
            FakeRuntime::new(log.clone()).with_live(&chain_live()[..1]),
            storage,
        );
        ledgers.push(op.preview(request(chain_spec())).await.unwrap());
    }

    assert_eq!(ledgers[0].step_keys(), ledgers[1].step_keys());
    assert_eq!(ledgers[0].diffs(), ledgers[1].diffs());
}

#[tokio::test]
async fn test_unchanged_plan_when_prior_matches() {
    let log = new_log();
    let storage = RecordingStorage::new(log.clone());
    storage.seed(&prior_state(chain_live(), 3)).await;
    let op = preview_op(FakeRuntime::new(log.clone()).with_live(&chain_live()), storage);

    let order = op.preview(request(chain_spec())).await.unwrap();

    assert!(order.all_unchanged());
    assert_eq!(order.values(&[UNCHANGED_STEPS]).len(), 3);
    assert!(order.diffs().contains("Diff: <EMPTY>"));
}

#[tokio::test]
async fn test_missing_reference_path_fails_with_exact_message() {
    let spec = Spec::new(vec![
        resource("jack", json!({"a": {"b": "c"}}), &[]),
        resource("pony", json!({"c": "d"}), &["jack"]),
        resource("eric", json!({"a": "$kusion_path:jack.notExist"}), &["pony"]),
    ]);

    let log = new_log();
    let (sender, mut events) = bus::bounded(8);
    let mut req = request(spec);
    req.events = Some(sender);
    let op = preview_op(FakeRuntime::new(log.clone()), RecordingStorage::new(log.clone()));

    let err = op.preview(req).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "illegal manifest: can't find specified value in resource:jack by ref:jack.notExist"
    );

    // Preview never speaks on the progress bus.
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_dependency_cycle_is_rejected_before_any_runtime_contact() {
    let spec = Spec::new(vec![
        resource("a", json!({}), &["b"]),
        resource("b", json!({}), &["a"]),
    ]);
    let log = new_log();
    let op = preview_op(FakeRuntime::new(log.clone()), RecordingStorage::new(log.clone()));

    let err = op.preview(request(spec)).await.unwrap_err();
    assert!(matches!(err, Error::IllegalManifest(_)));
    assert!(err.to_string().contains("cycle detected"));
    assert!(common::log_entries(&log).is_empty());
}

#[tokio::test]
async fn test_ignore_fields_suppress_update() {
    let prior = vec![resource("jack", json!({"a": 1, "generation": 1}), &[])];
    let spec = Spec::new(vec![resource(
        "jack",
        json!({"a": 1, "generation": 7}),
        &[],
    )]);

    let log = new_log();
    let storage = RecordingStorage::new(log.clone());
    storage.seed(&prior_state(prior.clone(), 1)).await;
    let op = preview_op(FakeRuntime::new(log.clone()).with_live(&prior), storage);

    let mut req = request(spec.clone());
    req.ignore_fields = vec!["generation".to_string()];
    let order = op.preview(req).await.unwrap();
    assert_eq!(order.get("jack").unwrap().action, Action::Unchanged);

    // Without the mask the same plan is an update.
    let log2 = new_log();
    let storage2 = RecordingStorage::new(log2.clone());
    storage2.seed(&prior_state(prior.clone(), 1)).await;
    let op2 = preview_op(FakeRuntime::new(log2).with_live(&prior), storage2);
    let order = op2.preview(request(spec)).await.unwrap();
    assert_eq!(order.get("jack").unwrap().action, Action::Update);
}

#[tokio::test]
async fn test_stale_prior_entry_reclassifies_to_create() {
    // Prior snapshot knows jack but the runtime lost it.
    let prior = vec![resource("jack", json!({"a": 1}), &[])];
    let spec = Spec::new(vec![resource("jack", json!({"a": 1}), &[])]);

    let log = new_log();
    let storage = RecordingStorage::new(log.clone());
    storage.seed(&prior_state(prior, 1)).await;
    let op = preview_op(FakeRuntime::new(log.clone()), storage);

    let order = op.preview(request(spec)).await.unwrap();
    assert_eq!(order.get("jack").unwrap().action, Action::Create);
    assert_eq!(common::log_entries(&log), vec!["read:jack".to_string()]);
}

#[tokio::test]
async fn test_read_failure_fails_the_node() {
    let prior = vec![resource("jack", json!({"a": 1}), &[])];
    let spec = Spec::new(vec![resource("jack", json!({"a": 2}), &[])]);

    let log = new_log();
    let storage = RecordingStorage::new(log.clone());
    storage.seed(&prior_state(prior.clone(), 1)).await;
    let op = preview_op(
        FakeRuntime::new(log.clone()).with_live(&prior).failing_read("jack"),
        storage,
    );

    let err = op.preview(request(spec)).await.unwrap_err();
    assert!(matches!(err, Error::Runtime { ref resource, .. } if resource == "jack"));
}

#[tokio::test]
async fn test_delete_steps_render_prior_attributes() {
    let prior = vec![resource("orphan", json!({"size": 2}), &[])];
    let log = new_log();
    let storage = RecordingStorage::new(log.clone());
    storage.seed(&prior_state(prior.clone(), 1)).await;
    let op = preview_op(FakeRuntime::new(log.clone()).with_live(&prior), storage);

    let order = op.preview(request(Spec::new(vec![]))).await.unwrap();
    let step = order.get("orphan").unwrap();
    assert_eq!(step.action, Action::Delete);
    assert!(step.new.is_none());
    assert!(step.diff().contains("- size: 2"));
}
