//! Whole-workflow scenarios run through a `WorkflowApplication`.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use serverflow_core::event::EventConsumer;
use serverflow_core::workflow::{TaskErrorKind, UnconfiguredCallHandler};

use common::{application, definition, CountingConsumer, ScriptedCalls};

// ---------------------------------------------------------------------------
// Sequencing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn sequential_sets_thread_their_outputs() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: threading }
do:
  - name: setX
    set: { x: 1 }
  - name: setY
    set: { y: "${ x + 1 }" }
"#,
    );

    let output = app.run(&def, json!({})).await.unwrap();
    assert_eq!(output, json!({ "x": 1, "y": 2 }));
}

#[tokio::test]
async fn switch_routes_with_goto() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: routing }
do:
  - name: route
    switch:
      - name: big
        when: "${ total > 100 }"
        then: review
      - name: fallback
        then: ship
  - name: review
    set: { reviewed: true }
  - name: ship
    set: { shipped: true }
"#,
    );

    let big = app.run(&def, json!({ "total": 150 })).await.unwrap();
    assert_eq!(big, json!({ "total": 150, "reviewed": true, "shipped": true }));

    let small = app.run(&def, json!({ "total": 10 })).await.unwrap();
    assert_eq!(small, json!({ "total": 10, "shipped": true }));
}

#[tokio::test]
async fn for_loop_stops_when_while_fails() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: summing }
do:
  - name: sum
    for:
      for: { each: n, in: "${ numbers }" }
      while: "${ total < 5 }"
      do:
        - name: add
          set: { total: "${ total + n }" }
"#,
    );

    let output = app
        .run(&def, json!({ "numbers": [1, 2, 3, 4], "total": 0 }))
        .await
        .unwrap();
    assert_eq!(output["total"], 6);
}

#[tokio::test]
async fn export_makes_values_visible_to_later_tasks() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: exporting }
do:
  - name: login
    set: { token: abc }
    export:
      as: { token: "${ token }" }
  - name: reset
    input: { from: {} }
    set: { seen: "${ context.token }" }
"#,
    );

    let output = app.run(&def, json!({})).await.unwrap();
    assert_eq!(output, json!({ "seen": "abc" }));
}

#[tokio::test]
async fn workflow_output_filter_shapes_the_result() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: shaped }
input: { from: "${ order }" }
output: { as: { id: "${ id }", state: "${ state }" } }
do:
  - name: accept
    set: { state: accepted }
"#,
    );

    let output = app
        .run(&def, json!({ "order": { "id": "o-1", "lines": [] } }))
        .await
        .unwrap();
    assert_eq!(output, json!({ "id": "o-1", "state": "accepted" }));
}

// ---------------------------------------------------------------------------
// Fork
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fork_collects_branch_outputs_in_order() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: fanout }
do:
  - name: split
    fork:
      branches:
        - name: slow
          wait: { milliseconds: 20 }
          output: { as: { branch: slow } }
        - name: fast
          set: { branch: fast }
"#,
    );

    let output = app.run(&def, json!({})).await.unwrap();
    assert_eq!(output, json!([{ "branch": "slow" }, { "branch": "fast" }]));
}

#[tokio::test(start_paused = true)]
async fn competing_fork_takes_the_first_branch_and_drops_the_rest() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: race }
do:
  - name: race
    fork:
      compete: true
      branches:
        - name: approval
          listen:
            to:
              one: { with: { type: order.approved } }
        - name: deadline
          wait: { seconds: 30 }
          output: { as: { expired: true } }
"#,
    );

    let output = app.run(&def, json!({})).await.unwrap();
    assert_eq!(output, json!({ "expired": true }));
    events.drained().await;
    assert_eq!(events.unregistered(), events.subscribed());
}

// ---------------------------------------------------------------------------
// Listen
// ---------------------------------------------------------------------------

const ALL_OF_A_AND_B: &str = r#"
document: { name: correlate }
do:
  - name: both
    listen:
      to:
        all:
          - with: { type: a }
          - with: { type: b }
"#;

#[tokio::test]
async fn all_collects_every_filter_in_arrival_order() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let instance = app.start(&definition(ALL_OF_A_AND_B), json!({})).unwrap();

    events.wait_for_registrations(2).await;
    assert_eq!(events.publish_data("b", json!({ "id": "b" })), 1);
    assert_eq!(events.publish_data("a", json!({ "id": "a" })), 1);

    let output = instance.output().await.unwrap();
    assert_eq!(output, json!([{ "id": "b" }, { "id": "a" }]));
    assert_eq!(events.subscribed(), 2);
    assert_eq!(events.unregistered(), 2);
    assert_eq!(events.active_registrations(), 0);
}

#[tokio::test]
async fn any_resolves_on_first_arrival_and_unregisters_all() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: first-wins }
do:
  - name: either
    listen:
      to:
        any:
          - with: { type: a }
          - with: { type: b }
          - with: { type: c }
"#,
    );
    let instance = app.start(&def, json!({})).unwrap();

    events.wait_for_registrations(3).await;
    events.publish_data("c", json!({ "id": "c" }));

    assert_eq!(instance.output().await.unwrap(), json!([{ "id": "c" }]));
    assert_eq!(events.unregistered(), 3);
    assert_eq!(events.active_registrations(), 0);
}

#[tokio::test]
async fn emit_reaches_a_listen_in_another_instance() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let waiter = definition(
        r#"
document: { name: waiter }
do:
  - name: shipped
    listen:
      to:
        one:
          with:
            type: order.shipped
            data: { orderId: o-7 }
"#,
    );
    let shipper = definition(
        r#"
document: { name: shipper }
do:
  - name: announce
    emit:
      event:
        type: order.shipped
        data: { orderId: "${ id }", carrier: "${ carrier }" }
"#,
    );

    let waiting = app.start(&waiter, json!({})).unwrap();
    events.wait_for_registrations(1).await;

    // An event for another order is filtered out by the data subset.
    app.run(&shipper, json!({ "id": "o-1", "carrier": "post" }))
        .await
        .unwrap();
    app.run(&shipper, json!({ "id": "o-7", "carrier": "rail" }))
        .await
        .unwrap();

    let output = waiting.output().await.unwrap();
    assert_eq!(output, json!([{ "orderId": "o-7", "carrier": "rail" }]));
}

#[tokio::test]
async fn cancelling_a_listen_releases_its_registrations() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let instance = app.start(&definition(ALL_OF_A_AND_B), json!({})).unwrap();

    events.wait_for_registrations(2).await;
    events.publish_data("a", json!({ "id": "a" }));
    assert!(app.cancel(instance.id()));

    let err = instance.output().await.unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(events.active_registrations(), 0);
    assert_eq!(events.unregistered(), 2);
}

// ---------------------------------------------------------------------------
// Try / retry
// ---------------------------------------------------------------------------

const RETRIED_FETCH: &str = r#"
document: { name: fetch-pet }
do:
  - name: guarded
    try:
      do:
        - name: fetch
          call: { endpoint: "http://pets.local/pets/1" }
      catch:
        errors:
          with: { type: communication, status: 503 }
        retry:
          max_attempts: 3
          delay: { milliseconds: 100 }
          backoff: constant
"#;

#[tokio::test(start_paused = true)]
async fn retried_call_recovers_after_two_failures() {
    let events = CountingConsumer::new();
    let calls = ScriptedCalls::new(vec![Err(503), Err(503), Ok(json!({ "name": "X" }))]);
    let app = application(&events, calls.clone());

    let instance = app.start(&definition(RETRIED_FETCH), json!({})).unwrap();
    let context = Arc::clone(instance.context());
    let output = instance.output().await.unwrap();

    assert_eq!(output, json!({ "name": "X" }));
    assert_eq!(calls.calls(), 3);
    assert_eq!(context.record_at("/do/0/guarded").unwrap().attempt, 3);
    assert!(calls
        .requests()
        .iter()
        .all(|request| request.method == "get" && request.endpoint == "http://pets.local/pets/1"));
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_fails_the_instance() {
    let events = CountingConsumer::new();
    let calls = ScriptedCalls::new(vec![Err(503), Err(503), Ok(json!({}))]);
    let app = application(&events, calls.clone());
    let def = definition(&RETRIED_FETCH.replace("max_attempts: 3", "max_attempts: 2"));

    let err = app.start(&def, json!({})).unwrap().output().await.unwrap_err();
    assert_eq!(calls.calls(), 2);
    assert!(matches!(err.kind, TaskErrorKind::RetryExhausted { attempts: 2, .. }));
    assert_eq!(err.position, "/do/0/guarded");
}

#[tokio::test(start_paused = true)]
async fn unmatched_error_is_not_retried() {
    let events = CountingConsumer::new();
    let calls = ScriptedCalls::new(vec![Err(404)]);
    let app = application(&events, calls.clone());

    let instance = app.start(&definition(RETRIED_FETCH), json!({})).unwrap();
    let context = Arc::clone(instance.context());
    let err = instance.output().await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.position, "/do/0/guarded/try/0/fetch");
    assert_eq!(calls.calls(), 1);
    assert_eq!(context.record_at("/do/0/guarded").unwrap().attempt, 1);
}

// ---------------------------------------------------------------------------
// Raise and timeouts
// ---------------------------------------------------------------------------

#[tokio::test]
async fn raise_fails_the_instance_with_its_classification() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: strict }
do:
  - name: check
    if: "${ quantity < 1 }"
    raise:
      error: { type: validation, detail: quantity must be positive }
  - name: accept
    set: { accepted: true }
"#,
    );

    let ok = app.run(&def, json!({ "quantity": 2 })).await.unwrap();
    assert_eq!(ok["accepted"], true);

    let err = app
        .start(&def, json!({ "quantity": 0 }))
        .unwrap()
        .output()
        .await
        .unwrap_err();
    assert_eq!(err.type_name(), "validation");
    assert_eq!(err.position, "/do/0/check");
    assert_eq!(err.to_document()["detail"], "quantity must be positive");
}

#[tokio::test(start_paused = true)]
async fn task_timeout_fails_the_task() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: impatient }
do:
  - name: slow
    wait: { seconds: 10 }
    timeout: { milliseconds: 100 }
"#,
    );

    let err = app.start(&def, json!({})).unwrap().output().await.unwrap_err();
    assert!(matches!(err.kind, TaskErrorKind::Timeout(d) if d == Duration::from_millis(100)));
    assert_eq!(err.position, "/do/0/slow");
}

#[tokio::test(start_paused = true)]
async fn workflow_timeout_stops_a_parked_listen() {
    let events = CountingConsumer::new();
    let app = application(&events, Arc::new(UnconfiguredCallHandler));
    let def = definition(
        r#"
document: { name: bounded }
timeout: { seconds: 1 }
do:
  - name: never
    listen:
      to:
        one: { with: { type: never.sent } }
"#,
    );

    let err = app.start(&def, json!({})).unwrap().output().await.unwrap_err();
    assert_eq!(err.type_name(), "timeout");
    assert_eq!(err.position, "/");
    assert_eq!(events.active_registrations(), 0);
}
