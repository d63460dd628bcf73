// The opcode dispatch loop: a flat `match` over the opcode enum, an
// operand stack, and a `pc` that most arms increment implicitly and
// jump arms set explicitly. The stack lives as a local rather than a
// field on `Expression`, since a single expression's evaluation is one
// self-contained run that never pauses and resumes -- there is
// nothing to gain from persisting it.
//
// Most opcodes work over a plain scalar, but `CONCAT` (`;`) and the
// reducing operators -- `MIN`, `MAX`, the random distributions --
// consume an ordered tuple of arbitrary length instead. A stack slot
// is therefore either a single number or a tuple of them (`Slot`
// below), never a bare `f64`; every opcode besides those reducers
// treats a tuple operand as unreachable in a well-compiled stream and
// falls back to its last element rather than panicking.
//
// This function takes `&Engine` rather than `&mut Engine` by design:
// all of the cross-expression state it touches (other expressions'
// memoized vectors, the clock, the RNG) lives behind `RefCell`s on
// `Engine`, which is what lets a `PUSH_VAR` opcode recurse into
// `engine.result()` for a different expression while this expression's
// own borrow has already been dropped (see `engine::Engine::compute`).

use crate::engine::Engine;
use crate::expr::MAX_STACK;
use crate::opcode::{Anchor, BinMath, Compare, Offset, Opcode, RandomOp, StatOp, UnMath, VarRef};
use crate::value::{self, clamp_normal};

#[derive(Clone, Debug)]
enum Slot {
    Num(f64),
    Tuple(Vec<f64>),
}

pub fn run(engine: &Engine, owner: crate::opcode::ExprId, t: i64, code: &[Opcode]) -> f64 {
    let mut stack: Vec<Slot> = Vec::new();
    let mut pc = 0usize;
    let mut executed = 0u64;

    while pc < code.len() {
        executed += 1;
        match &code[pc] {
            Opcode::PushNumber(n) => push(&mut stack, *n),
            Opcode::PushVar(r) => {
                let v = eval_var_ref(engine, owner, t, r);
                push(&mut stack, v);
            }
            Opcode::PushStatistic { op, nz, sources, o1, o2 } => {
                let v = eval_statistic(engine, owner, t, *op, *nz, sources, *o1, *o2);
                push(&mut stack, v);
            }
            Opcode::PushTimeStep => push(&mut stack, t as f64),
            Opcode::PushClockTime => push(&mut stack, engine.clock_seconds()),
            Opcode::PushContextualNumber => {
                push(&mut stack, engine.tail_number(owner).unwrap_or(value::UNDEFINED))
            }
            Opcode::PushUnit(u) => push(&mut stack, u.seconds()),
            Opcode::PushTrue => push(&mut stack, 1.0),
            Opcode::PushFalse => push(&mut stack, 0.0),
            Opcode::PushPi => push(&mut stack, std::f64::consts::PI),
            Opcode::PushInfinity => push(&mut stack, value::PLUS_INFINITY),

            Opcode::Bin(op) => {
                let (a, b) = pop2(&mut stack);
                push(&mut stack, eval_bin(*op, a, b));
            }
            Opcode::Un(op) => {
                let a = pop1(&mut stack);
                push(&mut stack, eval_un(*op, a));
            }
            Opcode::Log => {
                let (x, y) = pop2(&mut stack);
                let v = if let Some(g) = guard(&[x, y]) {
                    g
                } else if x <= 0.0 || x == 1.0 || y <= 0.0 {
                    value::BAD_CALC
                } else {
                    clamp_normal(y.ln() / x.ln())
                };
                push(&mut stack, v);
            }

            Opcode::And => {
                let (a, b) = pop2(&mut stack);
                let v = guard(&[a, b]).unwrap_or_else(|| bool_to_f64(value::truthy(a) && value::truthy(b)));
                push(&mut stack, v);
            }
            Opcode::Or => {
                let (a, b) = pop2(&mut stack);
                let v = guard(&[a, b]).unwrap_or_else(|| bool_to_f64(value::truthy(a) || value::truthy(b)));
                push(&mut stack, v);
            }
            Opcode::Not => {
                let a = pop1(&mut stack);
                let v = guard(&[a]).unwrap_or_else(|| bool_to_f64(!value::truthy(a)));
                push(&mut stack, v);
            }
            Opcode::Cmp(op) => {
                let (a, b) = pop2(&mut stack);
                let v = guard(&[a, b]).unwrap_or_else(|| bool_to_f64(eval_cmp(*op, a, b)));
                push(&mut stack, v);
            }

            Opcode::JumpIfFalse(target) => {
                let cond = peek_as_num(&stack);
                if value::truthy(cond) && !value::is_sentinel(cond) {
                    stack.pop();
                } else {
                    pc = *target;
                    continue;
                }
            }
            Opcode::Jump(target) => {
                pc = *target;
                continue;
            }
            Opcode::PopFalse => {
                stack.pop();
            }
            Opcode::IfThen | Opcode::IfElse => {
                log::error!("unreachable ternary placeholder opcode reached in compiled stream");
                push(&mut stack, value::UNKNOWN_ERROR);
            }

            Opcode::Concat => {
                let b = pop_list(&mut stack);
                let mut a = pop_list(&mut stack);
                a.extend(b);
                push_tuple(&mut stack, a);
            }
            Opcode::Min => {
                let list = pop_list(&mut stack);
                let v = guard(&list).unwrap_or_else(|| list.iter().cloned().fold(f64::INFINITY, f64::min));
                push(&mut stack, v);
            }
            Opcode::Max => {
                let list = pop_list(&mut stack);
                let v = guard(&list).unwrap_or_else(|| list.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
                push(&mut stack, v);
            }

            Opcode::Random(op) => {
                let v = eval_random(engine, &mut stack, *op);
                push(&mut stack, v);
            }

            Opcode::ReplaceUndefined => {
                let (x, replacement) = pop2(&mut stack);
                let v = if x == value::UNDEFINED || x == value::ARRAY_INDEX { replacement } else { x };
                push(&mut stack, v);
            }

            Opcode::Wait => {
                let dt = pop1(&mut stack);
                let v = if value::is_sentinel(dt) { dt } else { engine.wait(dt) };
                push(&mut stack, v);
            }
            Opcode::WaitUntil => {
                let target = pop1(&mut stack);
                let v = if value::is_sentinel(target) { target } else { engine.wait_until(target) };
                push(&mut stack, v);
            }
        }
        pc += 1;
    }

    engine.record_opcodes(owner, executed);

    match stack.pop() {
        Some(Slot::Num(v)) => v,
        Some(Slot::Tuple(v)) => v.last().copied().unwrap_or(value::UNKNOWN_ERROR),
        None => value::UNKNOWN_ERROR,
    }
}

fn pop_num(stack: &mut Vec<Slot>) -> f64 {
    match stack.pop() {
        Some(Slot::Num(v)) => v,
        Some(Slot::Tuple(v)) => v.last().copied().unwrap_or(value::UNKNOWN_ERROR),
        None => value::UNKNOWN_ERROR,
    }
}

fn pop1(stack: &mut Vec<Slot>) -> f64 {
    pop_num(stack)
}

fn pop2(stack: &mut Vec<Slot>) -> (f64, f64) {
    let b = pop_num(stack);
    let a = pop_num(stack);
    (a, b)
}

/// Pop one operand as the list of scalars a reducer consumes: a plain
/// number is its own one-element list, a tuple is itself.
fn pop_list(stack: &mut Vec<Slot>) -> Vec<f64> {
    match stack.pop() {
        Some(Slot::Num(v)) => vec![v],
        Some(Slot::Tuple(v)) => v,
        None => vec![value::UNKNOWN_ERROR],
    }
}

fn peek_as_num(stack: &[Slot]) -> f64 {
    match stack.last() {
        Some(Slot::Num(v)) => *v,
        Some(Slot::Tuple(v)) => v.last().copied().unwrap_or(value::UNKNOWN_ERROR),
        None => value::UNKNOWN_ERROR,
    }
}

fn push(stack: &mut Vec<Slot>, v: f64) {
    if stack.len() >= MAX_STACK {
        stack.push(Slot::Num(value::OVERFLOW));
    } else {
        stack.push(Slot::Num(v));
    }
}

fn push_tuple(stack: &mut Vec<Slot>, v: Vec<f64>) {
    if stack.len() >= MAX_STACK {
        stack.push(Slot::Num(value::OVERFLOW));
    } else {
        stack.push(Slot::Tuple(v));
    }
}

fn bool_to_f64(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Propagate the severest error, then `UNDEFINED`, then any other
/// exception sentinel, found among `operands`. Returns `None` when all
/// operands are ordinary numbers, meaning the caller should compute
/// its normal result.
fn guard(operands: &[f64]) -> Option<f64> {
    if let Some(e) = value::severest_of(operands.iter().copied()) {
        return Some(e);
    }
    if operands.iter().any(|v| *v == value::UNDEFINED) {
        return Some(value::UNDEFINED);
    }
    if operands.iter().any(|v| value::is_exception(*v)) {
        return Some(value::UNKNOWN_ERROR);
    }
    None
}

fn eval_bin(op: BinMath, a: f64, b: f64) -> f64 {
    if let Some(g) = guard(&[a, b]) {
        return g;
    }
    match op {
        BinMath::Add => clamp_normal(a + b),
        BinMath::Sub => clamp_normal(a - b),
        BinMath::Mul => clamp_normal(a * b),
        BinMath::Div => {
            if b.abs() <= value::DIVIDE_EPSILON {
                value::DIV_ZERO
            } else {
                clamp_normal(a / b)
            }
        }
        BinMath::Mod => {
            if b.abs() <= value::DIVIDE_EPSILON {
                value::DIV_ZERO
            } else {
                clamp_normal(a % b)
            }
        }
        BinMath::Power => {
            let r = a.powf(b);
            if r.is_nan() {
                value::BAD_CALC
            } else {
                clamp_normal(r)
            }
        }
    }
}

fn eval_un(op: UnMath, a: f64) -> f64 {
    if let Some(g) = guard(&[a]) {
        return g;
    }
    match op {
        UnMath::Sqrt => {
            if a < 0.0 {
                value::BAD_CALC
            } else {
                clamp_normal(a.sqrt())
            }
        }
        UnMath::Ln => {
            if a <= 0.0 {
                value::BAD_CALC
            } else {
                clamp_normal(a.ln())
            }
        }
        UnMath::Exp => clamp_normal(a.exp()),
        UnMath::Sin => clamp_normal(a.sin()),
        UnMath::Cos => clamp_normal(a.cos()),
        UnMath::Atan => clamp_normal(a.atan()),
        UnMath::Round => clamp_normal(a.round()),
        UnMath::Int => clamp_normal(a.trunc()),
        UnMath::Fract => clamp_normal(a.fract()),
        UnMath::Abs => clamp_normal(a.abs()),
        UnMath::Negate => clamp_normal(-a),
    }
}

fn eval_cmp(op: Compare, a: f64, b: f64) -> bool {
    match op {
        Compare::Eq => a == b,
        Compare::Ne => a != b,
        Compare::Lt => a < b,
        Compare::Gt => a > b,
        Compare::Le => a <= b,
        Compare::Ge => a >= b,
    }
}

fn resolve_offset(t: i64, o: Offset, tail: Option<f64>) -> Option<f64> {
    match o.anchor {
        Anchor::Absolute => Some(o.value),
        Anchor::CurrentCycle => Some(t as f64 + o.value),
        Anchor::TailNumber => tail.map(|tn| tn + o.value),
    }
}

fn eval_var_ref(engine: &Engine, owner: crate::opcode::ExprId, t: i64, r: &VarRef) -> f64 {
    let tail = engine.tail_number(owner);
    let t1 = resolve_offset(t, r.o1, tail);
    let t2 = match r.o2 {
        Some(o2) => resolve_offset(t, o2, tail),
        None => t1,
    };
    let (a, b) = match (t1, t2) {
        (Some(a), Some(b)) => (a, b),
        _ => return value::UNDEFINED,
    };
    let mid = ((a + b) / 2.0).floor() as i64;
    let resolved = if r.is_self { mid } else { mid.max(0).min(engine.var_ref_max_cycle()) };
    if resolved < 0 {
        value::UNDEFINED
    } else {
        engine.result(r.target, resolved)
    }
}

fn eval_statistic(
    engine: &Engine,
    owner: crate::opcode::ExprId,
    t: i64,
    op: StatOp,
    nz: bool,
    sources: &[crate::opcode::ExprId],
    o1: Offset,
    o2: Option<Offset>,
) -> f64 {
    if sources.is_empty() {
        return 0.0;
    }
    let tail = engine.tail_number(owner);
    let t1 = resolve_offset(t, o1, tail);
    let t2 = match o2 {
        Some(o) => resolve_offset(t, o, tail),
        None => t1,
    };
    let (a, b) = match (t1, t2) {
        (Some(a), Some(b)) => (a, b),
        _ => return value::UNDEFINED,
    };
    let lo = a.min(b).floor().max(0.0) as i64;
    let hi = (a.max(b).floor() as i64).min(engine.statistic_max_cycle());
    if hi < lo {
        return value::UNDEFINED;
    }

    let mut raw = Vec::new();
    for &src in sources {
        for c in lo..=hi {
            let v = engine.result(src, c);
            if v == value::PLUS_INFINITY || v == value::MINUS_INFINITY {
                continue;
            }
            raw.push(v);
        }
    }
    if raw.is_empty() {
        return value::UNDEFINED;
    }
    if let Some(e) = value::severest_of(raw.iter().copied()) {
        return e;
    }
    let settled: Vec<f64> = raw.into_iter().filter(|v| !value::is_exception(*v)).collect();
    if settled.is_empty() {
        return value::UNDEFINED;
    }
    let values: Vec<f64> = if nz {
        settled.into_iter().filter(|v| *v != 0.0).collect()
    } else {
        settled
    };

    match op {
        StatOp::N => values.len() as f64,
        StatOp::Sum => values.iter().sum(),
        StatOp::Mean => {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        }
        StatOp::Max => {
            if values.is_empty() {
                0.0
            } else {
                values.iter().cloned().fold(f64::MIN, f64::max)
            }
        }
        StatOp::Min => {
            if values.is_empty() {
                0.0
            } else {
                values.iter().cloned().fold(f64::MAX, f64::min)
            }
        }
        StatOp::Var | StatOp::Sd => {
            if values.len() < 2 {
                0.0
            } else {
                let mean = values.iter().sum::<f64>() / values.len() as f64;
                let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
                if op == StatOp::Sd {
                    var.sqrt()
                } else {
                    var
                }
            }
        }
    }
}

/// Every distribution below pops its own operand tuple (built by `;`
/// or a bare scalar for the single-parameter forms) and validates its
/// arity before touching the parameters, since a reducer sees only
/// however many values actually reached it at runtime. Bare `random`
/// is the one exception: it takes nothing off the stack at all.
fn eval_random(engine: &Engine, stack: &mut Vec<Slot>, op: RandomOp) -> f64 {
    match op {
        RandomOp::Uniform => clamp_normal(engine.uniform01()),
        RandomOp::Exponential => {
            let list = pop_list(stack);
            if list.len() != 1 {
                return value::PARAMS;
            }
            let rate = list[0];
            if let Some(g) = guard(&list) {
                g
            } else if rate <= 0.0 {
                value::PARAMS
            } else {
                clamp_normal(-(1.0 / rate) * (1.0 - engine.uniform01()).ln())
            }
        }
        RandomOp::Weibull => {
            let list = pop_list(stack);
            if list.len() != 2 {
                return value::PARAMS;
            }
            let (shape, scale) = (list[0], list[1]);
            if let Some(g) = guard(&list) {
                g
            } else if shape <= 0.0 || scale <= 0.0 {
                value::PARAMS
            } else {
                clamp_normal(scale * (-(1.0 - engine.uniform01()).ln()).powf(1.0 / shape))
            }
        }
        RandomOp::Triangular => {
            let list = pop_list(stack);
            if list.len() < 2 || list.len() > 3 {
                return value::PARAMS;
            }
            if let Some(g) = guard(&list) {
                return g;
            }
            let min = list[0];
            let max = list[1];
            let mode = if list.len() == 3 { list[2] } else { (min + max) / 2.0 };
            if !(min <= mode && mode <= max) {
                value::PARAMS
            } else {
                let u = engine.uniform01();
                let fc = (mode - min) / (max - min);
                let v = if u < fc {
                    min + (u * (max - min) * (mode - min)).sqrt()
                } else {
                    max - ((1.0 - u) * (max - min) * (max - mode)).sqrt()
                };
                clamp_normal(v)
            }
        }
        RandomOp::Normal => {
            let list = pop_list(stack);
            if list.len() != 2 {
                return value::PARAMS;
            }
            let (mean, sd) = (list[0], list[1]);
            if let Some(g) = guard(&list) {
                g
            } else if sd < 0.0 {
                value::PARAMS
            } else {
                clamp_normal(mean + sd * normal_inverse_cdf(engine.uniform01()))
            }
        }
        RandomOp::Binomial => {
            let list = pop_list(stack);
            if list.len() != 2 {
                return value::PARAMS;
            }
            let (n, p) = (list[0], list[1]);
            if let Some(g) = guard(&list) {
                g
            } else if n < 0.0 || p < 0.0 || p > 1.0 {
                value::PARAMS
            } else {
                clamp_normal(sample_binomial(engine, n.round() as u64, p) as f64)
            }
        }
        RandomOp::Poisson => {
            let list = pop_list(stack);
            if list.len() != 1 {
                return value::PARAMS;
            }
            let lambda = list[0];
            if let Some(g) = guard(&list) {
                g
            } else if lambda < 0.0 {
                value::PARAMS
            } else {
                clamp_normal(sample_poisson(engine, lambda) as f64)
            }
        }
    }
}

/// Beasley-Springer-Moro rational approximation of the standard normal
/// inverse CDF, used to turn a uniform draw into a normal one without
/// pulling in a distributions crate.
fn normal_inverse_cdf(u: f64) -> f64 {
    const A: [f64; 4] = [2.50662823884, -18.61500062529, 41.39119773534, -25.44106049637];
    const B: [f64; 4] = [-8.47351093090, 23.08336743743, -21.06224101826, 3.13082909833];
    const C: [f64; 9] = [
        0.3374754822726147,
        0.9761690190917186,
        0.1607979714918209,
        0.0276438810333863,
        0.0038405729373609,
        0.0003951896511919,
        0.0000321767881768,
        0.0000002888167364,
        0.0000003960315187,
    ];
    let y = u - 0.5;
    if y.abs() < 0.42 {
        let r = y * y;
        y * (((A[3] * r + A[2]) * r + A[1]) * r + A[0]) / ((((B[3] * r + B[2]) * r + B[1]) * r + B[0]) * r + 1.0)
    } else {
        let r0 = if y > 0.0 { 1.0 - u } else { u };
        let r = (-r0.ln()).ln();
        let mut x = C[0];
        let mut t = 1.0;
        for c in &C[1..] {
            t *= r;
            x += c * t;
        }
        if y < 0.0 {
            -x
        } else {
            x
        }
    }
}

/// Knuth's direct-multiplication method for small/moderate rates,
/// falling back to Atkinson's PA rejection algorithm above
/// `lambda = 30` where Knuth's method underflows too often to be
/// efficient.
fn sample_poisson(engine: &Engine, lambda: f64) -> u64 {
    if lambda == 0.0 {
        return 0;
    }
    if lambda < 30.0 {
        let limit = (-lambda).exp();
        let mut k = 0u64;
        let mut p = 1.0;
        loop {
            k += 1;
            p *= engine.uniform01();
            if p <= limit {
                break;
            }
        }
        k - 1
    } else {
        sample_poisson_atkinson(engine, lambda)
    }
}

fn sample_poisson_atkinson(engine: &Engine, lambda: f64) -> u64 {
    let c = 0.767 - 3.36 / lambda;
    let beta = std::f64::consts::PI / (3.0 * lambda).sqrt();
    let alpha = beta * lambda;
    let k = c.ln() - lambda - beta.ln();
    loop {
        let u = engine.uniform01();
        let x = (alpha - ((1.0 - u) / u).ln()) / beta;
        if x <= -0.5 {
            continue;
        }
        let n = (x + 0.5).floor();
        let v = engine.uniform01();
        let y = alpha - beta * x;
        let lhs = y + v.ln() - 2.0 * (1.0 + y.exp()).ln();
        let rhs = k + n * lambda.ln() - ln_factorial(n as u64);
        if lhs <= rhs {
            return n.max(0.0) as u64;
        }
    }
}

fn ln_factorial(n: u64) -> f64 {
    (1..=n).map(|k| (k as f64).ln()).sum()
}

/// Cumulative log-space recurrence over P(X=k): avoids the underflow
/// that computing `q.powf(n)` directly would hit for large `n`.
fn sample_binomial(engine: &Engine, n: u64, p: f64) -> u64 {
    if n == 0 || p <= 0.0 {
        return 0;
    }
    if p >= 1.0 {
        return n;
    }
    let q = 1.0 - p;
    let u = engine.uniform01();
    let mut ln_pk = (n as f64) * q.ln();
    let mut cum = ln_pk.exp();
    let mut k = 0u64;
    while u > cum && k < n {
        ln_pk += ((n - k) as f64 / (k as f64 + 1.0)).ln() + (p / q).ln();
        cum += ln_pk.exp();
        k += 1;
    }
    k
}
