// The opcode set: roughly fifty stack-machine instructions, a single
// `Opcode` enum carrying its own operands so illegal combinations
// (e.g. a jump target that isn't a valid address) are simply not
// representable. `vm.rs` dispatches this enum through one big match.

use crate::model::AspectId;
use std::rc::Rc;

/// Index into the engine's expression table. A `PUSH_VAR`/
/// `PUSH_STATISTIC` that targets the expression's own slot is a
/// self-reference; the VM distinguishes that case by comparing
/// against the currently-executing expression's id rather than by a
/// separate tag, since the id is already carried here.
pub type ExprId = usize;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Anchor {
    /// No anchor: the offset is an absolute cycle number.
    Absolute,
    /// `t`: offset is relative to the caller's current cycle.
    CurrentCycle,
    /// `#`: offset is relative to the owning aspect's trailing
    /// numeric suffix (`UNDEFINED` if the owner's name has none).
    TailNumber,
}

/// One resolved endpoint of a `@off1(:off2)` pair.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Offset {
    pub anchor: Anchor,
    pub value: f64,
}

impl Offset {
    pub const fn absolute(value: f64) -> Offset {
        Offset { anchor: Anchor::Absolute, value }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatOp {
    Max,
    Mean,
    Min,
    N,
    Sd,
    Sum,
    Var,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimeUnit {
    Year,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl TimeUnit {
    /// Value of the unit expressed in seconds, the engine's base
    /// unit for simulated clock time.
    pub fn seconds(self) -> f64 {
        match self {
            TimeUnit::Year => 365.25 * 24.0 * 3600.0,
            TimeUnit::Week => 7.0 * 24.0 * 3600.0,
            TimeUnit::Day => 24.0 * 3600.0,
            TimeUnit::Hour => 3600.0,
            TimeUnit::Minute => 60.0,
            TimeUnit::Second => 1.0,
        }
    }
}

/// A variable reference resolved against a source expression; shared
/// between `PUSH_VAR` and the per-source list of `PUSH_STATISTIC` so
/// both opcodes describe "which expression, which offsets" the same
/// way.
#[derive(Clone, Debug, PartialEq)]
pub struct VarRef {
    pub target: ExprId,
    pub is_self: bool,
    pub o1: Offset,
    pub o2: Option<Offset>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinMath {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnMath {
    Sqrt,
    Ln,
    Exp,
    Sin,
    Cos,
    Atan,
    Round,
    Int,
    Fract,
    Abs,
    Negate,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Compare {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RandomOp {
    Uniform,
    Exponential,
    Weibull,
    Triangular,
    Normal,
    Binomial,
    Poisson,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Opcode {
    // --- stack manipulation ---
    PushNumber(f64),
    PushVar(Rc<VarRef>),
    /// operator, ignore-zero flag, the pre-resolved source list, and
    /// the same offset pair a `PUSH_VAR` would carry (clamped
    /// differently -- see `vm::eval_statistic`).
    PushStatistic {
        op: StatOp,
        nz: bool,
        sources: Rc<Vec<ExprId>>,
        o1: Offset,
        o2: Option<Offset>,
    },
    PushTimeStep,
    PushClockTime,
    /// The contextual `#` tail-number of the owning aspect's name
    /// used as a bare value (as opposed to as an offset anchor).
    PushContextualNumber,
    PushUnit(TimeUnit),
    PushTrue,
    PushFalse,
    PushPi,
    PushInfinity,

    // --- arithmetic / math ---
    Bin(BinMath),
    Un(UnMath),
    Log, // X log Y = ln(Y) / ln(X), consumes base then operand

    // --- logic / comparison ---
    And,
    Or,
    Not,
    Cmp(Compare),

    // --- control flow ---
    JumpIfFalse(usize),
    Jump(usize),
    PopFalse,
    /// Emitted as placeholders during ternary compilation bookkeeping
    /// in some expression-compiler designs; never reached at runtime
    /// in this engine (ternaries lower straight to
    /// Jump/JumpIfFalse/PopFalse), kept so a foreign opcode stream
    /// that still contains them fails loudly instead of silently.
    IfThen,
    IfElse,

    // --- aggregation ---
    Concat,
    Min,
    Max,

    // --- randomness (forces the owning expression dynamic) ---
    Random(RandomOp),

    // --- undefined propagation ---
    ReplaceUndefined,

    // --- clock control ---
    Wait,
    WaitUntil,
}

/// A fully-resolved reference used only at compile time, before it is
/// lowered into the `Rc<VarRef>` an opcode carries. Kept separate so
/// the parser can talk about "the aspect named X" without the VM ever
/// seeing a name.
#[derive(Clone, Debug)]
pub struct ResolvedAspect {
    pub id: AspectId,
    pub expr: ExprId,
}
