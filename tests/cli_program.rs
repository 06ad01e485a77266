//! Serialized programs and configuration files, as the CLI consumes them.

use effgraph::prelude::*;
use effgraph::{EvalConfig, EvalError, Fault};
use proptest::prelude::*;
use serde_json::json;
use tempfile::TempDir;

fn factorial(b: &Builder) -> Expr<'_> {
    let n = b.input().get("n");
    b.rec(n, |this, n| {
        b.cond(n.lte(1))
            .then(1)
            .otherwise(n.mul(this.call(n.sub(1))))
    })
}

fn schema() -> Schema {
    Schema::record([("n", Schema::Number)])
}

#[test]
fn programs_survive_a_trip_through_disk() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins.build(schema(), factorial).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("factorial.json");
    std::fs::write(&path, program.to_json().unwrap()).unwrap();
    let loaded = Program::from_json(&std::fs::read_to_string(&path).unwrap()).unwrap();

    assert_eq!(loaded, program);
    assert_eq!(loaded.plugins, plugins.names());
    let out = plugins
        .interpreter()
        .unwrap()
        .run(&loaded, Value::from(json!({"n": 6})));
    assert_eq!(out, Ok(Value::Number(720.0)));
}

#[test]
fn config_file_bounds_recursion_depth() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("eval.json");
    std::fs::write(&path, r#"{"max_recursion_depth": 40}"#).unwrap();
    let config = EvalConfig::load(&path).unwrap();
    assert!(config.cache);

    let plugins = PluginSet::standard().unwrap();
    let program = plugins.build(schema(), factorial).unwrap();
    let interp = plugins.interpreter().unwrap().with_config(config);
    assert_eq!(
        interp.run(&program, Value::from(json!({"n": 2}))),
        Ok(Value::Number(2.0))
    );
    assert_eq!(
        interp.run(&program, Value::from(json!({"n": 50}))),
        Err(Fault::Fatal(EvalError::RecursionLimit { limit: 40 }))
    );
}

fn triangle(b: &Builder) -> Expr<'_> {
    let n = b.input().get("n");
    b.rec(n, |this, n| {
        b.cond(n.lte(0))
            .then(0)
            .otherwise(n.add(this.call(n.sub(1))))
    })
}

#[test]
fn deep_recursion_reaches_the_default_depth_bound() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins.build(schema(), triangle).unwrap();
    let interp = plugins.interpreter().unwrap();
    assert_eq!(interp.config().max_recursion_depth, 10_000);
    assert_eq!(
        interp.run(&program, Value::from(json!({"n": 1000}))),
        Ok(Value::Number(500_500.0))
    );
    assert_eq!(
        interp.run(&program, Value::from(json!({"n": 20_000}))),
        Err(Fault::Fatal(EvalError::RecursionLimit { limit: 10_000 }))
    );
}

#[test]
fn malformed_files_are_reported() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(EvalConfig::load(&path).is_err());
    assert!(Program::from_json("[]").is_err());
}

#[test]
fn evaluation_report_counts_visits() {
    let plugins = PluginSet::standard().unwrap();
    let program = plugins.build(schema(), factorial).unwrap();
    let report = plugins
        .interpreter()
        .unwrap()
        .evaluate(&program, Value::from(json!({"n": 3})));
    assert_eq!(report.outcome, Ok(Value::Number(6.0)));
    assert!(report.stats.visits > 0);
}

proptest! {
    #[test]
    fn hash_depends_on_structure_not_on_build_instance(a in -1000i64..1000, b in -1000i64..1000) {
        let plugins = PluginSet::standard().unwrap();
        let build = |x: i64, y: i64| {
            plugins
                .build(Schema::Any, |bld| bld.lift(x).add(y).mul(2))
                .unwrap()
                .hash
        };
        prop_assert_eq!(build(a, b), build(a, b));
        if a != b {
            prop_assert_ne!(build(a, b), build(b, a));
        }
    }
}
