//! End-to-end programs: build against the standard plugins, evaluate, check
//! the value.

use effgraph::error::{BuildError, EvalError, Fault};
use effgraph::graph::{Field, Node};
use effgraph::interp::{Cx, Fragment, LegacyFragment, StepEffect, Visit};
use effgraph::prelude::*;
use effgraph::{Outcome, Plugin};
use serde_json::json;
use std::rc::Rc;

fn eval(program: &Program, plugins: &PluginSet, input: serde_json::Value) -> Outcome {
    plugins.interpreter().unwrap().run(program, Value::from(input))
}

#[test]
fn arithmetic_over_a_schema_typed_input() {
    let plugins = PluginSet::standard().unwrap();
    let schema = Schema::record([("x", Schema::Number)]);
    let program = plugins
        .build(schema, |b| {
            let x = b.input().get("x");
            let square = x.mul(x);
            square
                .div(x)
                .add(square.rem(10))
                .mul(10)
                .div(7)
                .floor()
        })
        .unwrap();
    assert_eq!(eval(&program, &plugins, json!({"x": 7})), Ok(Value::Number(22.0)));
}

#[test]
fn conditional_accumulation_in_a_loop() {
    let plugins = PluginSet::standard().unwrap();
    let schema = Schema::record([
        ("items", Schema::list(Schema::Number)),
        ("threshold", Schema::Number),
    ]);
    let program = plugins
        .build(schema, |b| {
            let input = b.input();
            let threshold = input.get("threshold");
            let total = b.let_(22);
            b.each(input.get("items"), |item| {
                b.cond(item.gt(threshold))
                    .then(total.set(total.get().add(item)))
                    .otherwise(())
            });
            total.get()
        })
        .unwrap();
    let out = eval(&program, &plugins, json!({"items": [2, 4, 6, 8], "threshold": 3}));
    assert_eq!(out, Ok(Value::Number(40.0)));
}

#[test]
fn nested_equality_dispatches_on_boolean_results() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins
        .build(Schema::Any, |b| b.eq(b.eq(1, 2), b.eq(3, 4)))
        .unwrap();
    assert_eq!(eval(&program, &plugins, json!(null)), Ok(Value::Bool(true)));
    assert!(program.node(program.result).is_some_and(|n| n.kind == "boolean/eq"));
}

#[test]
fn unliftable_and_unreachable_programs_are_rejected() {
    let err = effgraph::build(Schema::Any, |b| b.lift(f64::NAN)).unwrap_err();
    assert!(matches!(err, BuildError::UnliftableValue { .. }));

    let err = effgraph::build(Schema::Any, |b| {
        b.perform("audit/log", "forgotten");
        b.lift(1)
    })
    .unwrap_err();
    match err {
        BuildError::UnreachableNodes { kinds } => assert_eq!(kinds, vec!["effect/perform"]),
        other => panic!("unexpected {other:?}"),
    }

    let fixed = effgraph::build(Schema::Any, |b| {
        let log = b.perform("audit/log", "kept");
        b.do_([log, b.lift(1)])
    });
    assert!(fixed.is_ok());
}

#[test]
fn omitted_plugin_is_a_fatal_unknown_kind() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins.build(Schema::Any, |b| b.lift(2).add(3)).unwrap();
    let core_only = Interpreter::new(vec![
        plugins.get("core").and_then(|p| p.fragment.clone()).unwrap(),
    ])
    .unwrap();
    match core_only.run(&program, Value::Null) {
        Err(Fault::Fatal(EvalError::UnknownNodeKind { kind })) => assert_eq!(kind, "num/add"),
        other => panic!("unexpected {other:?}"),
    }
}

struct Doubler;

impl LegacyFragment for Doubler {
    fn name(&self) -> &str {
        "doubler"
    }

    fn call(&self, node: &Node, _cx: &Cx) -> Outcome {
        let n = node.data("n")?.as_f64().unwrap_or_default();
        Ok(Value::Number(n * 2.0))
    }
}

struct Bridge;

impl Fragment for Bridge {
    fn name(&self) -> &str {
        "legacy"
    }

    fn kinds(&self) -> &[&'static str] {
        &["legacy/double"]
    }

    fn visit(&self, node: Rc<Node>, cx: Cx) -> Visit {
        Visit::Suspend(cx.step(StepEffect::LegacyCall {
            fragment: Rc::new(Doubler),
            node: node.id,
        }))
    }
}

#[test]
fn legacy_evaluators_compose_through_the_driver() {
    let legacy = Plugin::new("legacy", &["legacy/double"], Rc::new(Bridge));
    let plugins = PluginSet::standard().unwrap().with(legacy).unwrap();
    let program = plugins
        .build(Schema::Any, |b| {
            let doubled = b.node("legacy/double", [("n", Field::Data(Value::from(21)))]);
            doubled.add(0)
        })
        .unwrap();
    assert_eq!(eval(&program, &plugins, json!(null)), Ok(Value::Number(42.0)));
}
