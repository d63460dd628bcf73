// Smoke-test CLI: builds a tiny two-function model, runs it for a few
// cycles, and prints each aspect's value per cycle. Not a full model
// editor front-end -- just enough to exercise the engine end to end
// without a test harness.

use fram_expr::{Aspect, AspectId, Connector, Coupling, Engine, Function, FunctionId, Model};

fn aid(s: &str) -> AspectId {
    AspectId::new(s)
}

fn main() {
    env_logger::init();

    let mut model = Model::new();
    model.add_function(Function::new(FunctionId("supply".into()), None));
    model.add_function(Function::new(FunctionId("assemble".into()), None));

    model.add_aspect(Aspect {
        id: aid("parts_rate"),
        display_name: "parts_rate".into(),
        owner: FunctionId("supply".into()),
    });
    model.add_aspect(Aspect {
        id: aid("units_built"),
        display_name: "units_built".into(),
        owner: FunctionId("assemble".into()),
    });

    model.add_coupling(Coupling {
        from: FunctionId("supply".into()),
        to: FunctionId("assemble".into()),
        to_connector: Connector::Input,
        aspects: vec![aid("parts_rate")],
        feedback: false,
    });

    let mut engine = Engine::new(model, 5, 0, 1);
    engine.add_expression(aid("parts_rate"), "10".to_string());
    let units = engine.add_expression(aid("units_built"), "[parts_rate] / 2".to_string());

    let mut driver = fram_expr::Driver::new(&mut engine);
    driver.run();

    for t in 1..=5 {
        log::info!("t={} units_built={}", t, fram_expr::value::format_value(engine.result(units, t)));
    }
}
