//! Topic routing: fan-out, perf policies and failure isolation.

use conductor_runtime::{
    Conductor, EventRouter, HandlerError, HandlerMap, PublishOutcome, TopicsManifest,
};
use conductor_types::{Beat, Movement, PerfPolicy, Route, Sequence, TopicDef, TopicsCatalog};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Conductor with sequences `a` (plugin A) and `b` (plugin B). Each records
/// the payload it was played with.
struct Harness {
    conductor: Conductor,
    plays: Arc<Mutex<Vec<(String, Value)>>>,
}

fn harness() -> Harness {
    let conductor = Conductor::default();
    let plays = Arc::new(Mutex::new(Vec::new()));

    for (plugin, sequence) in [("A", "a"), ("B", "b")] {
        let sink = Arc::clone(&plays);
        let name = sequence.to_string();
        let handlers = HandlerMap::new().with_fn("record", move |input, _| {
            let mut data = input.data().clone();
            data.remove("correlationId");
            sink.lock().push((name.clone(), Value::Object(data)));
            Ok(None)
        });
        let seq = Sequence::new(sequence, "")
            .with_movement(Movement::new("m").with_beat(Beat::pure(1, "record", "record")));
        conductor.mount(seq, &handlers, plugin).unwrap();
    }

    Harness { conductor, plays }
}

fn router_with(conductor: &Conductor, topic: &str, perf: Option<PerfPolicy>) -> EventRouter {
    let mut def = TopicDef::new(vec![Route::new("A", "a"), Route::new("B", "b")]);
    def.perf = perf;
    let catalog = TopicsCatalog::default().with_topic(topic, def);
    EventRouter::for_conductor(TopicsManifest::build(&[catalog], &[]), conductor)
}

fn plays_of(h: &Harness, sequence: &str) -> Vec<Value> {
    h.plays
        .lock()
        .iter()
        .filter(|(name, _)| name == sequence)
        .map(|(_, payload)| payload.clone())
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_topic_triggers_zero_plays() {
    let h = harness();
    let router = EventRouter::for_conductor(TopicsManifest::default(), &h.conductor);

    let outcome = router.publish("unknown.topic", json!({}), &h.conductor).await;
    assert!(matches!(outcome, PublishOutcome::UnknownTopic));
    assert_eq!(outcome.plays(), 0);
    assert!(h.plays.lock().is_empty());
    assert_eq!(h.conductor.telemetry().snapshot().plays_started, 0);
}

#[tokio::test]
async fn publish_fans_out_to_every_route() {
    let h = harness();
    let router = router_with(&h.conductor, "canvas.component.created", None);

    let outcome = router
        .publish("canvas.component.created", json!({"id": "c1"}), &h.conductor)
        .await;

    match outcome {
        PublishOutcome::Dispatched(outcomes) => {
            assert_eq!(outcomes.len(), 2);
            assert!(outcomes.iter().all(|o| o.is_ok()));
            assert_eq!(outcomes[0].route, Route::new("A", "a"));
            assert_eq!(outcomes[1].route, Route::new("B", "b"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(plays_of(&h, "a"), vec![json!({"id": "c1"})]);
    assert_eq!(plays_of(&h, "b"), vec![json!({"id": "c1"})]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_within_window_plays_each_route_once() {
    let h = harness();
    let router = router_with(&h.conductor, "library.drop", Some(PerfPolicy::dedupe(500)));

    let first = router.publish("library.drop", json!({"id": "x"}), &h.conductor).await;
    tokio::time::advance(Duration::from_millis(100)).await;
    let second = router.publish("library.drop", json!({"id": "x"}), &h.conductor).await;

    assert_eq!(first.plays(), 2);
    assert!(matches!(second, PublishOutcome::Deduplicated));
    assert_eq!(plays_of(&h, "a").len(), 1);
    assert_eq!(plays_of(&h, "b").len(), 1);

    // A different payload is not a duplicate.
    router.publish("library.drop", json!({"id": "y"}), &h.conductor).await;
    assert_eq!(plays_of(&h, "a").len(), 2);

    // Past the window the original payload dispatches again.
    tokio::time::advance(Duration::from_millis(500)).await;
    let third = router.publish("library.drop", json!({"id": "x"}), &h.conductor).await;
    assert!(third.is_dispatched());
    assert_eq!(plays_of(&h, "a").len(), 3);
}

#[tokio::test(start_paused = true)]
async fn throttle_drops_publishes_inside_interval() {
    let h = harness();
    let router = router_with(&h.conductor, "canvas.drag.move", Some(PerfPolicy::throttle(16)));

    for x in 0..5 {
        router.publish("canvas.drag.move", json!({"x": x}), &h.conductor).await;
        tokio::time::advance(Duration::from_millis(5)).await;
    }
    // t = 0, 5, 10, 15 fall in the first interval; t = 20 opens the next.
    assert_eq!(plays_of(&h, "a"), vec![json!({"x": 0}), json!({"x": 4})]);
    assert_eq!(h.conductor.telemetry().snapshot().publishes_suppressed, 3);
}

#[tokio::test(start_paused = true)]
async fn debounce_dispatches_only_the_last_of_a_burst() {
    let h = harness();
    let router = router_with(&h.conductor, "control.panel.resize", Some(PerfPolicy::debounce(50)));

    for w in [100, 120, 140] {
        let outcome = router
            .publish("control.panel.resize", json!({"width": w}), &h.conductor)
            .await;
        assert!(matches!(outcome, PublishOutcome::Debounced));
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.plays.lock().is_empty());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(plays_of(&h, "a"), vec![json!({"width": 140})]);
    assert_eq!(plays_of(&h, "b"), vec![json!({"width": 140})]);
}

#[tokio::test(start_paused = true)]
async fn debounce_wins_over_throttle() {
    let h = harness();
    let policy = PerfPolicy {
        throttle_ms: Some(1),
        debounce_ms: Some(30),
        dedupe_window_ms: None,
    };
    let router = router_with(&h.conductor, "t", Some(policy));

    router.publish("t", json!({"n": 1}), &h.conductor).await;
    router.publish("t", json!({"n": 2}), &h.conductor).await;
    tokio::time::sleep(Duration::from_millis(60)).await;

    assert_eq!(plays_of(&h, "a"), vec![json!({"n": 2})]);
}

#[tokio::test]
async fn failing_route_does_not_block_the_others() {
    let h = harness();
    let handlers = HandlerMap::new().with_fn("explode", |_, _| Err(HandlerError::failed("boom")));
    let broken = Sequence::new("broken", "")
        .with_movement(Movement::new("m").with_beat(Beat::pure(1, "explode", "explode")));
    h.conductor.mount(broken, &handlers, "C").unwrap();

    let catalog = TopicsCatalog::default().with_topic(
        "t",
        TopicDef::new(vec![
            Route::new("A", "a"),
            Route::new("C", "broken"),
            Route::new("X", "not-mounted"),
            Route::new("B", "b"),
        ]),
    );
    let router = EventRouter::for_conductor(TopicsManifest::build(&[catalog], &[]), &h.conductor);

    let outcome = router.publish("t", json!({"k": 1}), &h.conductor).await;
    let PublishOutcome::Dispatched(outcomes) = outcome else {
        panic!("expected dispatch");
    };

    let ok: Vec<bool> = outcomes.iter().map(|o| o.is_ok()).collect();
    assert_eq!(ok, vec![true, false, false, true]);
    assert!(outcomes[2].result.as_ref().unwrap_err().is_sequence_not_found());
    assert_eq!(plays_of(&h, "a").len(), 1);
    assert_eq!(plays_of(&h, "b").len(), 1);
}

#[tokio::test]
async fn routed_topic_reaches_unrouted_trigger_subscriptions() {
    let h = harness();
    let triggered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&triggered);
    let handlers = HandlerMap::new().with_fn("count", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    });
    let listener = Sequence::new("listener", "")
        .with_movement(Movement::new("m").with_beat(Beat::pure(1, "count", "count")))
        .with_trigger("canvas.component.created");
    h.conductor.mount(listener, &handlers, "L").unwrap();

    let router = router_with(&h.conductor, "canvas.component.created", None);
    router
        .publish("canvas.component.created", json!({"id": "c2"}), &h.conductor)
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(triggered.load(Ordering::SeqCst), 1);
    assert_eq!(plays_of(&h, "a").len(), 1);
}

#[tokio::test]
async fn routed_sequence_triggered_by_same_topic_plays_once_per_route() {
    let conductor = Conductor::default();
    let plays = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&plays);
    let handlers = HandlerMap::new().with_fn("count", move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(None)
    });
    let sequence = Sequence::new("s", "")
        .with_movement(Movement::new("m").with_beat(Beat::pure(1, "count", "count")))
        .with_trigger("t");
    conductor.mount(sequence, &handlers, "P").unwrap();
    assert_eq!(conductor.bus().subscriber_count("t"), 1);

    let catalog = TopicsCatalog::default().with_topic(
        "t",
        TopicDef::new(vec![Route::new("P", "s")]).with_perf(PerfPolicy::dedupe(60_000)),
    );
    let router = EventRouter::for_conductor(TopicsManifest::build(&[catalog], &[]), &conductor);

    let first = router.publish("t", json!({"id": "c1"}), &conductor).await;
    let second = router.publish("t", json!({"id": "c1"}), &conductor).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(first.plays(), 1);
    assert!(matches!(second, PublishOutcome::Deduplicated));
    assert_eq!(plays.load(Ordering::SeqCst), 1);

    // A plain bus publish still reaches the trigger.
    conductor.bus().publish("t", &json!({"id": "c2"}));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(plays.load(Ordering::SeqCst), 2);
}
