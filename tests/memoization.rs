//! Cache and taint behaviour observed through effect call counts and
//! memo statistics.

use effgraph::interp::{Cx, Fragment, Visit};
use effgraph::prelude::*;
use effgraph::{EvalConfig, Fault, Plugin};
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

fn interpreter(plugins: &PluginSet, mock: &Rc<MockHandler>) -> Interpreter {
    plugins.interpreter().unwrap().with_handler(mock.clone())
}

#[test]
fn diamond_dependency_is_evaluated_once() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins
        .build(Schema::Any, |b| {
            let shared = b.perform("db/get", "k");
            let left = shared.add(1);
            let right = shared.add(2);
            left.add(right)
        })
        .unwrap();
    let mock = Rc::new(MockHandler::new().respond("db/get", 10));
    let report = interpreter(&plugins, &mock).evaluate(&program, Value::Null);
    assert_eq!(report.outcome, Ok(Value::Number(23.0)));
    assert_eq!(mock.count("db/get"), 1);
    assert!(report.stats.hits >= 1);
}

#[test]
fn disabling_the_cache_revisits_shared_nodes() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins
        .build(Schema::Any, |b| {
            let shared = b.perform("db/get", "k");
            shared.add(shared)
        })
        .unwrap();
    let mock = Rc::new(MockHandler::new().respond("db/get", 4));
    let config = EvalConfig {
        cache: false,
        ..EvalConfig::default()
    };
    let out = interpreter(&plugins, &mock)
        .with_config(config)
        .run(&program, Value::Null);
    assert_eq!(out, Ok(Value::Number(8.0)));
    assert_eq!(mock.count("db/get"), 2);
}

#[test]
fn loop_variables_taint_dependents_but_not_siblings() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins
        .build(Schema::Any, |b| {
            let outside = b.perform("config/get", "rate");
            let seen = b.let_(Value::List(vec![]));
            b.each([1, 2, 3], |item| {
                let scaled = b.perform("price/get", item).mul(outside);
                seen.push(scaled)
            });
            seen.get()
        })
        .unwrap();
    let mock = Rc::new(
        MockHandler::new()
            .respond("config/get", 10)
            .respond("price/get", 1),
    );
    let report = interpreter(&plugins, &mock).evaluate(&program, Value::Null);
    assert_eq!(report.outcome, Ok(Value::from(json!([10, 10, 10]))));
    assert_eq!(mock.count("config/get"), 1);
    assert_eq!(mock.count("price/get"), 3);
    let payloads: Vec<Value> = mock
        .calls()
        .into_iter()
        .filter(|(tag, _)| tag == "price/get")
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(payloads, vec![Value::from(1), Value::from(2), Value::from(3)]);
    assert!(report.stats.tainted >= 3);
}

#[test]
fn separate_evaluations_share_nothing() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins
        .build(Schema::Any, |b| b.perform("db/get", "k"))
        .unwrap();
    let mock = Rc::new(MockHandler::new().respond("db/get", 1));
    let interp = interpreter(&plugins, &mock);
    interp.run(&program, Value::Null).unwrap();
    interp.run(&program, Value::Null).unwrap();
    assert_eq!(mock.count("db/get"), 2);
}

/// Fragment that fails every visit and counts how often it was asked.
struct Exploding(Rc<Cell<usize>>);

impl Fragment for Exploding {
    fn name(&self) -> &str {
        "boom"
    }

    fn kinds(&self) -> &[&'static str] {
        &["boom/now"]
    }

    fn visit(&self, _node: Rc<effgraph::graph::Node>, _cx: Cx) -> Visit {
        self.0.set(self.0.get() + 1);
        Visit::Ready(Err(Fault::raise("BOOM", "exploded")))
    }
}

#[test]
fn failures_are_cached_and_replayed() {
    let visits = Rc::new(Cell::new(0));
    let boom = Plugin::new("boom", &["boom/now"], Rc::new(Exploding(visits.clone())));
    let plugins = PluginSet::standard().unwrap().with(boom).unwrap();
    let program = plugins
        .build(Schema::Any, |b| {
            let boom = b.node("boom/now", []);
            b.settle([boom, boom.add(1), b.lift(5)])
        })
        .unwrap();
    let out = plugins.interpreter().unwrap().run(&program, Value::Null).unwrap();
    assert_eq!(visits.get(), 1);
    let rejected = out.get("rejected").and_then(Value::as_list).unwrap();
    assert_eq!(rejected.len(), 2);
    assert_eq!(rejected[0], rejected[1]);
    assert_eq!(out.get("fulfilled"), Some(&Value::from(json!([5]))));
}
