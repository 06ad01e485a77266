//! Concurrency and error combinators: retry counts, bounded parallel map,
//! race, deadlines, settle and guard.

use effgraph::interp::EffectHandler;
use effgraph::prelude::*;
use effgraph::{EvalConfig, Fault, Outcome};
use futures::future::LocalBoxFuture;
use proptest::prelude::*;
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Handler that sleeps for the payload's `ms`, logs start and end, and
/// answers with the payload's `value`, else its `id`. Payloads with
/// `fail: true` raise `JOB_FAILED` instead.
#[derive(Default)]
struct Timed {
    log: Rc<RefCell<Vec<String>>>,
}

impl Timed {
    fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }
}

impl EffectHandler for Timed {
    fn handle(&self, tag: &str, payload: Value) -> LocalBoxFuture<'static, Outcome> {
        let log = self.log.clone();
        let tag = tag.to_string();
        Box::pin(async move {
            let id = payload.get("id").cloned().unwrap_or_default();
            let label = id.as_str().unwrap_or_default().to_string();
            let ms = payload.get("ms").and_then(Value::as_f64).unwrap_or(0.0) as u64;
            log.borrow_mut().push(format!("start {tag} {label}"));
            tokio::time::sleep(Duration::from_millis(ms)).await;
            log.borrow_mut().push(format!("end {tag} {label}"));
            if payload.get("fail") == Some(&Value::Bool(true)) {
                return Err(Fault::raise("JOB_FAILED", label));
            }
            Ok(payload.get("value").cloned().unwrap_or(id))
        })
    }
}

fn job(id: &str, ms: u64) -> serde_json::Value {
    json!({"id": id, "ms": ms})
}

fn starts(log: &[String], entry: &str) -> usize {
    log.iter().filter(|e| *e == entry).count()
}

fn run_with(program: &Program, handler: Rc<dyn EffectHandler>, config: EvalConfig) -> Outcome {
    PluginSet::standard()
        .unwrap()
        .interpreter()
        .unwrap()
        .with_handler(handler)
        .with_config(config)
        .run(program, Value::Null)
}

fn build(f: impl for<'b> FnOnce(&'b Builder) -> Expr<'b>) -> Program {
    PluginSet::standard().unwrap().build(Schema::Any, f).unwrap()
}

#[test]
fn retry_succeeds_on_the_kth_attempt() {
    let program = build(|b| b.retry(b.perform("flaky/call", ()), 5, 0));
    let mock = Rc::new(
        MockHandler::new()
            .fail("flaky/call", "E1")
            .fail("flaky/call", "E2")
            .respond("flaky/call", 7),
    );
    assert_eq!(
        run_with(&program, mock.clone(), EvalConfig::default()),
        Ok(Value::Number(7.0))
    );
    assert_eq!(mock.count("flaky/call"), 3);
}

#[test]
fn retry_exhaustion_raises_the_last_failure() {
    let program = build(|b| b.retry(b.perform("flaky/call", ()), 2, 0));
    let mock = Rc::new(
        MockHandler::new()
            .fail("flaky/call", "E1")
            .fail("flaky/call", "E2")
            .respond("flaky/call", 7),
    );
    assert_eq!(
        run_with(&program, mock.clone(), EvalConfig::default()),
        Err(Fault::Raised(Value::from("E2")))
    );
    assert_eq!(mock.count("flaky/call"), 2);
}

#[test]
fn retry_waits_between_attempts_but_not_after_the_last() {
    let program = build(|b| b.retry(b.perform("flaky/call", ()), 3, 100));
    let mock = Rc::new(MockHandler::new().fail("flaky/call", "DOWN"));
    let started = Instant::now();
    let out = run_with(&program, mock.clone(), EvalConfig::default());
    let elapsed = started.elapsed();
    assert_eq!(out, Err(Fault::Raised(Value::from("DOWN"))));
    assert_eq!(mock.count("flaky/call"), 3);
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");
}

#[test]
fn retry_reevaluates_guards_with_fresh_effects() {
    let program = build(|b| {
        let ready = b.guard(b.eq(b.perform("job/status", ()), "ready"), "NOT_READY");
        b.retry(b.do_([ready, b.lift("done")]), 3, 0)
    });
    let mock = Rc::new(
        MockHandler::new()
            .respond("job/status", "busy")
            .respond("job/status", "busy")
            .respond("job/status", "ready"),
    );
    assert_eq!(
        run_with(&program, mock.clone(), EvalConfig::default()),
        Ok(Value::from("done"))
    );
    assert_eq!(mock.count("job/status"), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn par_map_keeps_order_and_batches(
        delays in prop::collection::vec(0u64..4, 0..10),
        limit in 1usize..4,
    ) {
        let items: Vec<serde_json::Value> = delays
            .iter()
            .enumerate()
            .map(|(i, ms)| job(&format!("j{i}"), *ms))
            .collect();
        let program = build(|b| {
            b.par_map(Value::from(json!(items)), limit, |item| b.perform("work", item))
        });
        let timed = Rc::new(Timed::default());
        let out = run_with(&program, timed.clone(), EvalConfig::default()).unwrap();

        let expected: Vec<Value> =
            (0..delays.len()).map(|i| Value::from(format!("j{i}"))).collect();
        prop_assert_eq!(out, Value::List(expected));

        let log = timed.log();
        for i in 0..delays.len() {
            let starts = log.iter().filter(|e| **e == format!("start work j{i}")).count();
            prop_assert_eq!(starts, 1);
        }
        let position = |entry: String| log.iter().position(|e| *e == entry).unwrap();
        for i in 0..delays.len() {
            for j in 0..delays.len() {
                if j / limit > i / limit {
                    let (end, start) = (format!("end work j{i}"), format!("start work j{j}"));
                    prop_assert!(position(end) < position(start));
                }
            }
        }
    }
}

#[test]
fn par_map_failure_stops_later_batches() {
    let items = json!([
        job("a", 5),
        {"id": "b", "ms": 1, "fail": true},
        job("c", 0),
        job("d", 0),
    ]);
    let program = build(|b| b.par_map(Value::from(items), 2, |item| b.perform("work", item)));
    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());

    let err = out.unwrap_err();
    assert_eq!(err.raised().and_then(Value::match_key), Some("JOB_FAILED"));
    let log = timed.log();
    assert_eq!(starts(&log, "end work a"), 1);
    assert!(log.iter().all(|e| !e.ends_with(" c") && !e.ends_with(" d")), "{log:?}");
}

#[test]
fn concurrent_readers_join_one_running_visit() {
    let program = build(|b| {
        let rate = b.perform("quote", json!({"id": "rate", "ms": 30, "value": 10}));
        b.par([rate.add(1), rate.add(2)])
    });
    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());
    assert_eq!(out, Ok(Value::from(json!([11, 12]))));
    assert_eq!(starts(&timed.log(), "start quote rate"), 1);
}

#[test]
fn par_map_elements_share_outer_lookups() {
    let program = build(|b| {
        let rate = b.perform("quote", json!({"id": "rate", "ms": 30, "value": 10}));
        b.par_map([1, 2, 3, 4], 4, |item| item.mul(rate))
    });
    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());
    assert_eq!(out, Ok(Value::from(json!([10, 20, 30, 40]))));
    assert_eq!(starts(&timed.log(), "start quote rate"), 1);
}

#[test]
fn race_settles_with_the_first_branch() {
    let program = build(|b| {
        b.race([
            b.perform("work", job("slow", 100)),
            b.perform("work", job("quick", 5)),
        ])
    });
    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());
    assert_eq!(out, Ok(Value::from("quick")));
    assert!(!timed.log().contains(&"end work slow".to_string()));
}

#[test]
fn empty_race_raises() {
    let program = build(|b| b.race(Vec::<i32>::new()));
    let out = run_with(&program, Rc::new(Timed::default()), EvalConfig::default());
    let err = out.unwrap_err();
    assert_eq!(err.raised().and_then(Value::match_key), Some("EMPTY_RACE"));
}

#[test]
fn deadline_prefers_a_fast_primary_and_never_starts_the_fallback() {
    let program = build(|b| {
        b.timeout(
            b.perform("work", job("primary", 0)),
            200,
            b.perform("work", job("fallback", 0)),
        )
    });
    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());
    assert_eq!(out, Ok(Value::from("primary")));
    assert!(timed.log().iter().all(|e| !e.contains("fallback")));
}

#[test]
fn deadline_falls_back_and_ignores_the_slow_primary() {
    let program = build(|b| {
        b.timeout(
            b.perform("work", job("primary", 150)),
            10,
            b.perform("work", job("fallback", 0)),
        )
    });

    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());
    assert_eq!(out, Ok(Value::from("fallback")));
    assert!(timed.log().contains(&"start work primary".to_string()));
    assert!(!timed.log().contains(&"end work primary".to_string()));

    let drained = Rc::new(Timed::default());
    let config = EvalConfig {
        drain_detached: true,
        ..EvalConfig::default()
    };
    let out = run_with(&program, drained.clone(), config);
    assert_eq!(out, Ok(Value::from("fallback")));
    assert_eq!(drained.log().last().map(String::as_str), Some("end work primary"));
}

#[test]
fn abandoned_branches_are_released_with_the_evaluation() {
    let program = build(|b| b.timeout(b.perform("work", job("primary", 200)), 5, 0));
    let timed = Rc::new(Timed::default());
    let out = run_with(&program, timed.clone(), EvalConfig::default());
    assert_eq!(out, Ok(Value::Number(0.0)));
    assert_eq!(Rc::strong_count(&timed), 1);
}

#[test]
fn settle_and_par_compose() {
    let program = build(|b| {
        b.settle([
            b.par([b.perform("work", job("a", 2)), b.perform("work", job("b", 1))]),
            b.fail(b.record([("code", "NOPE".into())])),
        ])
    });
    let out = run_with(&program, Rc::new(Timed::default()), EvalConfig::default()).unwrap();
    assert_eq!(
        out,
        Value::from(json!({"fulfilled": [["a", "b"]], "rejected": [{"code": "NOPE"}]}))
    );
}

#[test]
fn fatal_errors_escape_every_recovery_combinator() {
    let program = build(|b| {
        let unhandled = b.perform("nobody/listens", ());
        b.attempt(b.try_(b.retry(unhandled, 3, 0)).on_any(|_| 0).end())
    });
    let out = run_with(&program, Rc::new(MockHandler::new()), EvalConfig::default());
    assert!(matches!(out, Err(Fault::Fatal(_))));
}
