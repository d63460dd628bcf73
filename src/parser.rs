// Expression compiler: tokenize, then a precedence-climbing recursive
// descent over the token stream that emits opcodes directly as it
// goes -- no intermediate AST. Precedence climbing is the standard
// generalization of shunting-yard to a recursive-descent shape; both
// produce the operand-stack-ready postfix order directly.
//
// `;` (tuple concatenation) sits outside and looser than every other
// operator, including the ternary -- it is not a row in the usual
// binding-power ladder but a separate wrapper one level above
// `parse_ternary`, entered from the three places a self-contained
// tuple can start: the whole expression, a parenthesized group, and a
// reducer's argument. Only the first two of those reject a tuple left
// dangling with nothing to consume it; a reducer is precisely the
// thing that consumes one.

use crate::engine::Engine;
use crate::error::CompileError;
use crate::lexer::{self, Tok};
use crate::model::{AspectId, Connector};
use crate::opcode::{Anchor, BinMath, Compare, ExprId, Offset, Opcode, RandomOp, StatOp, TimeUnit, UnMath, VarRef};
use crate::value;
use regex::Regex;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Debug)]
pub struct Compiled {
    pub code: Vec<Opcode>,
    pub is_static: bool,
}

pub fn compile(engine: &Engine, owner: &AspectId, self_id: ExprId, text: &str) -> Result<Compiled, CompileError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(Compiled { code: vec![Opcode::PushNumber(0.0)], is_static: true });
    }

    let toks = lexer::tokenize(trimmed)?;
    let aspect = engine
        .aspect(owner)
        .ok_or_else(|| CompileError::UnknownAspect(owner.0.clone()))?;

    let connector = engine.model.functions.get(&aspect.owner).and_then(|f| {
        f.incoming_expressions
            .iter()
            .find(|(_, aspects)| aspects.iter().any(|a| a == owner))
            .map(|(c, _)| *c)
    });
    if connector == Some(Connector::Output) {
        return Err(CompileError::OutputMustBeAspectRef);
    }
    let scope = engine.model.visible_scope(&aspect.owner, connector);

    let mut p = Parser { toks, pos: 0, engine, owner, self_id, scope, code: Vec::new() };
    p.parse_self_contained_expr()?;
    if p.pos != p.toks.len() {
        return Err(CompileError::UnexpectedToken(format!("{:?}", p.toks[p.pos])));
    }
    if p.code.is_empty() {
        return Err(CompileError::EmptyResult);
    }

    let is_static = !p.code.iter().any(is_dynamic_forcing);
    Ok(Compiled { code: p.code, is_static })
}

/// An expression is dynamic (per-cycle, not memoized to a single
/// slot) iff it contains any opcode whose value can differ between
/// cycles. This is a conservative, non-recursive fold: it does not
/// chase into referenced expressions to see whether *they* are
/// static, since that would need a fixpoint computation over a graph
/// that can be cyclic. Treating every variable/statistic reference as
/// dynamic is always safe -- it costs a few unnecessary memoization
/// slots, never an incorrect result.
fn is_dynamic_forcing(op: &Opcode) -> bool {
    matches!(
        op,
        Opcode::PushVar(_)
            | Opcode::PushStatistic { .. }
            | Opcode::PushTimeStep
            | Opcode::PushClockTime
            | Opcode::Random(_)
            | Opcode::Wait
            | Opcode::WaitUntil
    )
}

enum BinOpKind {
    Or,
    And,
    Cmp(Compare),
    ReplaceUndefined,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,
}

fn bin_info(t: &Tok) -> Option<(u8, bool, BinOpKind)> {
    match t {
        Tok::Ident(s) if s == "or" => Some((1, false, BinOpKind::Or)),
        Tok::Ident(s) if s == "and" => Some((2, false, BinOpKind::And)),
        Tok::Eq => Some((3, false, BinOpKind::Cmp(Compare::Eq))),
        Tok::Ne => Some((3, false, BinOpKind::Cmp(Compare::Ne))),
        Tok::Lt => Some((3, false, BinOpKind::Cmp(Compare::Lt))),
        Tok::Gt => Some((3, false, BinOpKind::Cmp(Compare::Gt))),
        Tok::Le => Some((3, false, BinOpKind::Cmp(Compare::Le))),
        Tok::Ge => Some((3, false, BinOpKind::Cmp(Compare::Ge))),
        Tok::Pipe => Some((4, false, BinOpKind::ReplaceUndefined)),
        Tok::Plus => Some((5, false, BinOpKind::Add)),
        Tok::Minus => Some((5, false, BinOpKind::Sub)),
        Tok::Star => Some((6, false, BinOpKind::Mul)),
        Tok::Slash => Some((6, false, BinOpKind::Div)),
        Tok::Percent => Some((6, false, BinOpKind::Mod)),
        Tok::Caret => Some((7, true, BinOpKind::Power)),
        _ => None,
    }
}

fn stat_info(name: &str) -> Option<(StatOp, bool)> {
    let (base, nz) = match name.strip_suffix("nz") {
        Some(stripped) => (stripped, true),
        None => (name, false),
    };
    let op = match base {
        "max" => StatOp::Max,
        "mean" => StatOp::Mean,
        "min" => StatOp::Min,
        "n" => StatOp::N,
        "sd" => StatOp::Sd,
        "sum" => StatOp::Sum,
        "var" => StatOp::Var,
        _ => return None,
    };
    Some((op, nz))
}

/// Reducing operators bind as priority-9 prefix operators over a
/// (possibly `;`-built) tuple, not as ordinary comma-arg calls --
/// `min(a;b;c)` and bare `min x` are both valid, the parenthesized
/// form just additionally allows `;`-joining several operands.
fn reducer_opcode(name: &str) -> Option<Opcode> {
    match name {
        "min" => Some(Opcode::Min),
        "max" => Some(Opcode::Max),
        "exponential" => Some(Opcode::Random(RandomOp::Exponential)),
        "weibull" => Some(Opcode::Random(RandomOp::Weibull)),
        "triangular" => Some(Opcode::Random(RandomOp::Triangular)),
        "normal" => Some(Opcode::Random(RandomOp::Normal)),
        "binomial" => Some(Opcode::Random(RandomOp::Binomial)),
        "poisson" => Some(Opcode::Random(RandomOp::Poisson)),
        _ => None,
    }
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    engine: &'a Engine,
    owner: &'a AspectId,
    self_id: ExprId,
    scope: HashSet<AspectId>,
    code: Vec<Opcode>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn advance(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, want: Tok) -> Result<(), CompileError> {
        match self.advance() {
            Some(t) if t == want => Ok(()),
            Some(t) => Err(CompileError::UnexpectedToken(format!("{:?}", t))),
            None => Err(CompileError::UnexpectedEnd),
        }
    }

    fn emit(&mut self, op: Opcode) -> usize {
        self.code.push(op);
        self.code.len() - 1
    }

    /// A tuple built by `;` only makes sense where something is there
    /// to consume it -- the reducer it feeds. Anywhere else it is
    /// built and left with nothing to reduce it, which is always a
    /// mistake in the source text. Called only at the two places a
    /// `;`-chain is a genuine self-contained expression: the top level
    /// and a parenthesized group.
    fn parse_self_contained_expr(&mut self) -> Result<(), CompileError> {
        self.parse_concat()?;
        if matches!(self.code.last(), Some(Opcode::Concat)) {
            return Err(CompileError::InvalidParameterList);
        }
        Ok(())
    }

    /// `;`, the loosest operator there is -- looser even than the
    /// ternary, so it wraps `parse_ternary` rather than taking a row
    /// in `bin_info`'s ladder.
    fn parse_concat(&mut self) -> Result<(), CompileError> {
        self.parse_ternary()?;
        while let Some(Tok::Semi) = self.peek() {
            self.advance();
            self.parse_ternary()?;
            self.emit(Opcode::Concat);
        }
        Ok(())
    }

    /// Ternary `cond ? then : else`, right-assoc. `JUMP_IF_FALSE` pops
    /// the condition only on the truthy fall-through path; the false
    /// path leaves it on the stack for `POP_FALSE` to discard, which is
    /// why the placeholder target is patched to point straight at that
    /// `POP_FALSE`.
    fn parse_ternary(&mut self) -> Result<(), CompileError> {
        self.parse_expr(1)?;
        if let Some(Tok::Question) = self.peek() {
            self.advance();
            let jf = self.emit(Opcode::JumpIfFalse(0));
            self.parse_ternary()?;
            let jmp = self.emit(Opcode::Jump(0));
            let else_start = self.code.len();
            self.code[jf] = Opcode::JumpIfFalse(else_start);
            self.emit(Opcode::PopFalse);
            self.expect(Tok::Colon)?;
            self.parse_ternary()?;
            let end = self.code.len();
            self.code[jmp] = Opcode::Jump(end);
        }
        Ok(())
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<(), CompileError> {
        self.parse_unary()?;
        loop {
            let info = self.peek().and_then(bin_info);
            let (bp, right_assoc, kind) = match info {
                Some(x) => x,
                None => break,
            };
            if bp < min_bp {
                break;
            }
            self.advance();
            let next_min = if right_assoc { bp } else { bp + 1 };
            self.parse_expr(next_min)?;
            self.emit_bin(kind);
        }
        Ok(())
    }

    fn emit_bin(&mut self, kind: BinOpKind) {
        let op = match kind {
            BinOpKind::Or => Opcode::Or,
            BinOpKind::And => Opcode::And,
            BinOpKind::Cmp(c) => Opcode::Cmp(c),
            BinOpKind::ReplaceUndefined => Opcode::ReplaceUndefined,
            BinOpKind::Add => Opcode::Bin(BinMath::Add),
            BinOpKind::Sub => Opcode::Bin(BinMath::Sub),
            BinOpKind::Mul => Opcode::Bin(BinMath::Mul),
            BinOpKind::Div => Opcode::Bin(BinMath::Div),
            BinOpKind::Mod => Opcode::Bin(BinMath::Mod),
            BinOpKind::Power => Opcode::Bin(BinMath::Power),
        };
        self.emit(op);
    }

    /// Prefix operators. A leading `-`/`not`/reducer name here is
    /// unambiguously monadic: it can only appear where a primary is
    /// expected, so no separate disambiguation pass against binary `-`
    /// is needed.
    fn parse_unary(&mut self) -> Result<(), CompileError> {
        match self.peek() {
            Some(Tok::Minus) => {
                self.advance();
                self.parse_unary()?;
                self.emit(Opcode::Un(UnMath::Negate));
                Ok(())
            }
            Some(Tok::Plus) => {
                self.advance();
                self.parse_unary()
            }
            Some(Tok::Ident(s)) if s == "not" => {
                self.advance();
                self.parse_unary()?;
                self.emit(Opcode::Not);
                Ok(())
            }
            Some(Tok::Ident(s)) if reducer_opcode(s).is_some() => {
                let name = s.clone();
                self.advance();
                self.parse_reducer(&name)
            }
            _ => self.parse_primary(),
        }
    }

    /// A reducer's operand is either a parenthesized, possibly
    /// `;`-joined tuple, or -- in the bare monadic form -- a single
    /// unary-level operand.
    fn parse_reducer(&mut self, name: &str) -> Result<(), CompileError> {
        if let Some(Tok::LParen) = self.peek() {
            self.advance();
            self.parse_concat()?;
            self.expect(Tok::RParen)?;
        } else {
            self.parse_unary()?;
        }
        self.emit(reducer_opcode(name).expect("caller already confirmed this is a reducer name"));
        Ok(())
    }

    fn parse_primary(&mut self) -> Result<(), CompileError> {
        match self.advance() {
            Some(Tok::Number(n)) => {
                self.emit(Opcode::PushNumber(value::clamp_normal(n)));
                Ok(())
            }
            Some(Tok::LParen) => {
                self.parse_self_contained_expr()?;
                self.expect(Tok::RParen)
            }
            Some(Tok::BracketBody(body)) => self.parse_bracket_body(&body),
            Some(Tok::Hash) => {
                self.emit(Opcode::PushContextualNumber);
                Ok(())
            }
            Some(Tok::Ident(name)) => self.parse_ident(name),
            Some(t) => Err(CompileError::UnexpectedToken(format!("{:?}", t))),
            None => Err(CompileError::UnexpectedEnd),
        }
    }

    fn parse_ident(&mut self, name: String) -> Result<(), CompileError> {
        if let Some(Tok::LParen) = self.peek() {
            return self.parse_call(&name);
        }
        match name.as_str() {
            "true" => {
                self.emit(Opcode::PushTrue);
            }
            "false" => {
                self.emit(Opcode::PushFalse);
            }
            "pi" => {
                self.emit(Opcode::PushPi);
            }
            "infinity" | "inf" => {
                self.emit(Opcode::PushInfinity);
            }
            "t" => {
                self.emit(Opcode::PushTimeStep);
            }
            "clock" | "now" => {
                self.emit(Opcode::PushClockTime);
            }
            "random" => {
                self.emit(Opcode::Random(RandomOp::Uniform));
            }
            "yr" => {
                self.emit(Opcode::PushUnit(TimeUnit::Year));
            }
            "wk" => {
                self.emit(Opcode::PushUnit(TimeUnit::Week));
            }
            "d" => {
                self.emit(Opcode::PushUnit(TimeUnit::Day));
            }
            "h" => {
                self.emit(Opcode::PushUnit(TimeUnit::Hour));
            }
            "m" => {
                self.emit(Opcode::PushUnit(TimeUnit::Minute));
            }
            "s" => {
                self.emit(Opcode::PushUnit(TimeUnit::Second));
            }
            other => return Err(CompileError::UnknownSymbol(other.to_string())),
        }
        Ok(())
    }

    fn parse_call(&mut self, name: &str) -> Result<(), CompileError> {
        self.expect(Tok::LParen)?;
        let arity = match name {
            "sqrt" | "ln" | "exp" | "sin" | "cos" | "atan" | "round" | "int" | "fract" | "abs" | "wait"
            | "wait_until" => 1,
            "log" => 2,
            _ => return Err(CompileError::UnknownSymbol(name.to_string())),
        };
        self.parse_args(arity)?;
        self.expect(Tok::RParen)?;
        let op = match name {
            "sqrt" => Opcode::Un(UnMath::Sqrt),
            "ln" => Opcode::Un(UnMath::Ln),
            "exp" => Opcode::Un(UnMath::Exp),
            "sin" => Opcode::Un(UnMath::Sin),
            "cos" => Opcode::Un(UnMath::Cos),
            "atan" => Opcode::Un(UnMath::Atan),
            "round" => Opcode::Un(UnMath::Round),
            "int" => Opcode::Un(UnMath::Int),
            "fract" => Opcode::Un(UnMath::Fract),
            "abs" => Opcode::Un(UnMath::Abs),
            "wait" => Opcode::Wait,
            "wait_until" => Opcode::WaitUntil,
            "log" => Opcode::Log,
            _ => unreachable!(),
        };
        self.emit(op);
        Ok(())
    }

    fn parse_args(&mut self, n: usize) -> Result<(), CompileError> {
        for k in 0..n {
            self.parse_ternary()?;
            if k + 1 < n {
                self.expect(Tok::Comma)?;
            }
        }
        Ok(())
    }

    /// Split a captured `[...]` body into its statistic or var-ref
    /// shape and emit the matching opcode. A statistic form always has
    /// a literal `$`; everything after it is `pattern(@offsets)`, with
    /// the offset tail found by the *last* `@` in that remainder since
    /// the pattern itself is assumed never to contain one. A plain
    /// var-ref splits the same way directly on the body.
    fn parse_bracket_body(&mut self, body: &str) -> Result<(), CompileError> {
        if let Some(dollar) = body.find('$') {
            let stat_name = &body[..dollar];
            let rest = &body[dollar + 1..];
            let (pattern, offset_str) = match rest.rfind('@') {
                Some(at) => (&rest[..at], Some(&rest[at + 1..])),
                None => (rest, None),
            };
            self.emit_statistic(stat_name, pattern, offset_str)
        } else {
            let (name, offset_str) = match body.rfind('@') {
                Some(at) => (&body[..at], Some(&body[at + 1..])),
                None => (body, None),
            };
            self.emit_var_ref(name, offset_str)
        }
    }

    fn emit_statistic(&mut self, stat_name: &str, pattern: &str, offset_str: Option<&str>) -> Result<(), CompileError> {
        let (op, nz) = stat_info(stat_name).ok_or_else(|| CompileError::UnknownSymbol(stat_name.to_string()))?;
        let re = Regex::new(pattern).map_err(|_| CompileError::InvalidParameterList)?;

        let mut sources = Vec::new();
        for aid in &self.scope {
            if let Some(aspect) = self.engine.aspect(aid) {
                if re.is_match(&aspect.display_name) {
                    if let Some(id) = self.engine.expr_id_of(aid) {
                        sources.push(id);
                    }
                }
            }
        }
        sources.sort_unstable();

        let (o1, o2) = match offset_str {
            Some(s) => parse_offset_clause(s)?,
            None => (Offset { anchor: Anchor::CurrentCycle, value: 0.0 }, None),
        };

        self.emit(Opcode::PushStatistic { op, nz, sources: Rc::new(sources), o1, o2 });
        Ok(())
    }

    fn emit_var_ref(&mut self, name: &str, offset_str: Option<&str>) -> Result<(), CompileError> {
        let (o1, o2) = match offset_str {
            Some(s) => parse_offset_clause(s)?,
            None => (Offset { anchor: Anchor::CurrentCycle, value: 0.0 }, None),
        };

        let aid = AspectId::new(name);
        let is_self = aid == *self.owner;
        let target = if is_self {
            self.self_id
        } else {
            let resolved = self
                .engine
                .model
                .resolve(&self.scope, name, self.owner)
                .ok_or_else(|| CompileError::UnknownAspect(name.to_string()))?;
            self.engine
                .expr_id_of(&resolved.id)
                .ok_or_else(|| CompileError::UnknownAspect(name.to_string()))?
        };

        if is_self {
            self.check_self_reference(&o1)?;
            if let Some(o2r) = &o2 {
                self.check_self_reference(o2r)?;
            }
        }

        self.emit(Opcode::PushVar(Rc::new(VarRef { target, is_self, o1, o2 })));
        Ok(())
    }

    fn check_self_reference(&self, o: &Offset) -> Result<(), CompileError> {
        if o.anchor == Anchor::CurrentCycle && o.value < 0.0 {
            Ok(())
        } else {
            Err(CompileError::ForwardSelfReference)
        }
    }
}

/// Split an offset tail on its optional `:`, parsing each side as one
/// anchored offset.
fn parse_offset_clause(s: &str) -> Result<(Offset, Option<Offset>), CompileError> {
    match s.find(':') {
        Some(colon) => {
            let o1 = parse_one_offset_str(&s[..colon])?;
            let o2 = parse_one_offset_str(&s[colon + 1..])?;
            Ok((o1, Some(o2)))
        }
        None => Ok((parse_one_offset_str(s)?, None)),
    }
}

/// Parse one `(t|#)?[+-]?number` offset from raw text: a leading `t`
/// anchors to the caller's current cycle, a leading `#` anchors to the
/// owning aspect's trailing tail number, and no prefix is an absolute
/// cycle. `f64::from_str` already accepts the sign, so the remainder
/// is handed to it whole.
fn parse_one_offset_str(s: &str) -> Result<Offset, CompileError> {
    let s = s.trim();
    let (anchor, rest) = if let Some(rest) = s.strip_prefix('t') {
        (Anchor::CurrentCycle, rest)
    } else if let Some(rest) = s.strip_prefix('#') {
        (Anchor::TailNumber, rest)
    } else {
        (Anchor::Absolute, s)
    };
    let rest = rest.trim();
    let value = if rest.is_empty() {
        0.0
    } else {
        rest.parse::<f64>().map_err(|_| CompileError::InvalidNumber)?
    };
    Ok(Offset { anchor, value })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{normalize_id, Aspect, Function, FunctionId};
    use crate::scope::Model;

    fn aid(s: &str) -> AspectId {
        AspectId(normalize_id(s))
    }

    fn engine_with(text: &str) -> (Engine, ExprId) {
        let mut model = Model::new();
        model.add_function(Function::new(FunctionId("f".into()), None));
        model.add_aspect(Aspect { id: aid("x"), display_name: "x".into(), owner: FunctionId("f".into()) });
        let mut engine = Engine::new(model, 10, 0, 7);
        let id = engine.add_expression(aid("x"), text.to_string());
        (engine, id)
    }

    #[test]
    fn compiles_plain_arithmetic_as_static() {
        let (engine, id) = engine_with("2 + 3 * 4");
        let c = compile(&engine, &aid("x"), id, "2 + 3 * 4").unwrap();
        assert!(c.is_static);
        assert_eq!(engine.result(id, 0), 14.0);
    }

    #[test]
    fn rejects_non_past_self_reference() {
        let (engine, id) = engine_with("[x]");
        let err = compile(&engine, &aid("x"), id, "[x]").unwrap_err();
        assert_eq!(err, CompileError::ForwardSelfReference);
    }

    #[test]
    fn ternary_selects_branch() {
        let (engine, id) = engine_with("1 ? 10 : 20");
        let _ = compile(&engine, &aid("x"), id, "1 ? 10 : 20").unwrap();
        assert_eq!(engine.result(id, 0), 10.0);
    }

    #[test]
    fn min_reduces_over_a_semicolon_tuple() {
        let (engine, id) = engine_with("min(5;2;9)");
        let _ = compile(&engine, &aid("x"), id, "min(5;2;9)").unwrap();
        assert_eq!(engine.result(id, 0), 2.0);
    }

    #[test]
    fn bare_reducer_takes_a_single_operand() {
        let (engine, id) = engine_with("max 7");
        let _ = compile(&engine, &aid("x"), id, "max 7").unwrap();
        assert_eq!(engine.result(id, 0), 7.0);
    }

    #[test]
    fn dangling_concat_is_rejected() {
        let (engine, id) = engine_with("1;2");
        let err = compile(&engine, &aid("x"), id, "1;2").unwrap_err();
        assert_eq!(err, CompileError::InvalidParameterList);
    }

    #[test]
    fn triangular_defaults_its_mode_to_the_midpoint() {
        let (engine, id) = engine_with("triangular(0;10)");
        let _ = compile(&engine, &aid("x"), id, "triangular(0;10)").unwrap();
        let v = engine.result(id, 0);
        assert!((0.0..=10.0).contains(&v));
    }
}
