// Error taxonomy, split into two kinds: compile-time failures are
// real `Result::Err`s (the expression never executes), while runtime
// numeric/structural failures are in-band `f64` sentinels from
// `value.rs` and never appear here.
//
// A flat `thiserror`-derived enum with one `#[error("...")]` message
// per variant, carrying just enough payload to reconstruct a useful
// diagnostic.

use thiserror::Error;

/// Failures raised while compiling expression text into an opcode
/// stream.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("Invalid number")]
    InvalidNumber,

    #[error("Missing ')'")]
    MissingParen,

    #[error("Unmatched ')'")]
    UnmatchedParen,

    #[error("Unmatched '['")]
    UnmatchedBracket,

    #[error("Unknown aspect \"{0}\"")]
    UnknownAspect(String),

    #[error("Outputs must be specified as [aspect name]")]
    OutputMustBeAspectRef,

    #[error("Invalid parameter list")]
    InvalidParameterList,

    #[error("Expression can reference only previous values of itself")]
    ForwardSelfReference,

    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Empty operand stack at end of expression")]
    EmptyResult,

    #[error("Operand stack has {0} values left at end of expression, expected 1")]
    LeftoverOperands(usize),

    #[error("Unknown identifier or function: {0}")]
    UnknownSymbol(String),

    #[error("Wrong number of arguments for {0}")]
    Arity(String),
}

/// Host-language exceptions for conditions that are impossible by
/// construction (VM stack-shape anomalies) or invariant violations
/// (`result(t)` queried past the end of a dynamic vector that was
/// never sized for `t`). These are not supposed to occur; the type
/// exists so embedders get a typed value instead of a bare `panic!`
/// if they ever do.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineFault {
    #[error("operand stack overflow (limit {limit})")]
    StackOverflow { limit: usize },

    #[error("operand stack underflow")]
    StackUnderflow,

    #[error("jump target {0} out of range")]
    BadJumpTarget(usize),

    #[error("program counter ran off the end of the opcode stream")]
    RanOffEnd,

    #[error("result(t={t}) queried past vector length {len} for a non-static expression")]
    ResultOutOfBounds { t: i64, len: usize },
}
