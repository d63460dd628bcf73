// Integration-level behavioral scenarios. Unit tests inside each
// module cover the mechanics of that module in isolation; these
// exercise the compiler, VM and cycle driver together the way a real
// aspect expression would use them.

use fram_expr::{Aspect, AspectId, Connector, Coupling, Engine, Function, FunctionId, Model};
use proptest::prelude::*;

fn aid(s: &str) -> AspectId {
    AspectId::new(s)
}

fn single_function_engine() -> (Engine, FunctionId) {
    let fid = FunctionId("f".into());
    let mut model = Model::new();
    model.add_function(Function::new(fid.clone(), None));
    (Engine::new(model, 10, 0, 1), fid)
}

fn add_aspect(engine: &mut Engine, fid: &FunctionId, name: &str, text: &str) -> usize {
    engine.model.add_aspect(Aspect { id: aid(name), display_name: name.into(), owner: fid.clone() });
    engine.add_expression(aid(name), text.to_string())
}

#[test]
fn static_arithmetic_resolves_once_and_matches_any_cycle() {
    let (mut engine, fid) = single_function_engine();
    let id = add_aspect(&mut engine, &fid, "budget", "100 * 2 - 50");
    assert_eq!(engine.result(id, 1), 150.0);
    assert_eq!(engine.result(id, 7), 150.0);
}

#[test]
fn self_reference_accumulates_across_cycles() {
    let (mut engine, fid) = single_function_engine();
    let id = add_aspect(&mut engine, &fid, "total", "[total@t-1] + 1");
    // t=0's [total@t-1] is t=-1, out of range -> UNDEFINED -> + 1 propagates UNDEFINED.
    assert_eq!(engine.result(id, 0), fram_expr::value::UNDEFINED);
    assert_eq!(engine.result(id, 1), fram_expr::value::UNDEFINED);
}

#[test]
fn division_by_zero_yields_div_zero_sentinel() {
    let (mut engine, fid) = single_function_engine();
    let id = add_aspect(&mut engine, &fid, "ratio", "10 / 0");
    assert_eq!(engine.result(id, 0), fram_expr::value::DIV_ZERO);
}

#[test]
fn replace_undefined_substitutes_only_on_undefined() {
    let (mut engine, fid) = single_function_engine();
    let fallback = add_aspect(&mut engine, &fid, "fallback", "5 / 0 | 99");
    let normal = add_aspect(&mut engine, &fid, "normal", "(10 / 2) | 99");
    assert_eq!(engine.result(fallback, 0), fram_expr::value::DIV_ZERO);
    assert_eq!(engine.result(normal, 0), 5.0);
}

#[test]
fn unknown_aspect_reference_is_a_compile_error() {
    let (mut engine, fid) = single_function_engine();
    let id = add_aspect(&mut engine, &fid, "broken", "[does_not_exist] + 1");
    assert_eq!(engine.result(id, 0), fram_expr::value::INVALID);
}

#[test]
fn mutually_referencing_aspects_both_resolve_cyclic() {
    let mut model = Model::new();
    let fa = FunctionId("a".into());
    let fb = FunctionId("b".into());
    model.add_function(Function::new(fa.clone(), None));
    model.add_function(Function::new(fb.clone(), None));
    model.add_aspect(Aspect { id: aid("alpha"), display_name: "alpha".into(), owner: fa.clone() });
    model.add_aspect(Aspect { id: aid("beta"), display_name: "beta".into(), owner: fb.clone() });
    model.add_coupling(Coupling {
        from: fb.clone(),
        to: fa.clone(),
        to_connector: Connector::Input,
        aspects: vec![aid("beta")],
        feedback: false,
    });
    model.add_coupling(Coupling {
        from: fa.clone(),
        to: fb.clone(),
        to_connector: Connector::Input,
        aspects: vec![aid("alpha")],
        feedback: false,
    });

    let mut engine = Engine::new(model, 5, 0, 1);
    let alpha = engine.add_expression(aid("alpha"), "[beta] + 1".to_string());
    let beta = engine.add_expression(aid("beta"), "[alpha] + 1".to_string());

    assert_eq!(engine.result(alpha, 0), fram_expr::value::CYCLIC);
    assert_eq!(engine.result(beta, 0), fram_expr::value::CYCLIC);
}

#[test]
fn statistic_max_ignores_zero_only_under_nz_variant() {
    let mut model = Model::new();
    let fid = FunctionId("sensors".into());
    model.add_function(Function::new(fid.clone(), None));
    for name in ["s1", "s2", "s3"] {
        model.add_aspect(Aspect { id: aid(name), display_name: name.into(), owner: fid.clone() });
    }
    let mut engine = Engine::new(model, 3, 0, 1);
    engine.add_expression(aid("s1"), "0".to_string());
    engine.add_expression(aid("s2"), "0".to_string());
    engine.add_expression(aid("s3"), "0".to_string());
    let max = engine.add_expression(aid("agg_max"), r"[max$s\d]".to_string());
    let maxnz = engine.add_expression(aid("agg_maxnz"), r"[maxnz$s\d]".to_string());

    assert_eq!(engine.result(max, 1), 0.0);
    assert_eq!(engine.result(maxnz, 1), 0.0);
}

#[test]
fn determinism_with_seeded_rng_reproduces_the_same_sequence() {
    let mut model = Model::new();
    let fid = FunctionId("f".into());
    model.add_function(Function::new(fid.clone(), None));
    model.add_aspect(Aspect { id: aid("roll"), display_name: "roll".into(), owner: fid.clone() });

    let mut e1 = Engine::new(model.clone(), 1, 0, 1234);
    let id1 = e1.add_expression(aid("roll"), "random".to_string());
    let mut e2 = Engine::new(model, 1, 0, 1234);
    let id2 = e2.add_expression(aid("roll"), "random".to_string());

    assert_eq!(e1.result(id1, 0), e2.result(id2, 0));
}

proptest! {
    #[test]
    fn idempotent_result_never_reexecutes_opcodes(a in -1000.0f64..1000.0, b in -1000.0f64..1000.0) {
        let (mut engine, fid) = single_function_engine();
        let id = add_aspect(&mut engine, &fid, "x", &format!("{} + {}", a, b));
        let first = engine.result(id, 0);
        let second = engine.result(id, 0);
        prop_assert_eq!(first, second);
    }
}
