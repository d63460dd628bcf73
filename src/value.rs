// Value domain: the numeric universe an aspect's expression computes
// over. A plain f64 carries every outcome a FRAM expression can
// produce -- a normal measurement, one of the two saturating
// infinities, a handful of "exception" sentinels describing the state
// of a not-yet-settled cell, and an ordered family of "error"
// sentinels that double as severity ranks.
//
// Keeping the whole domain inside f64 (rather than an enum wrapping
// f64) is deliberate: it is what lets a sentinel flow through ADD,
// MUL, comparisons, and so on without every opcode needing a special
// case for "oh, this operand is actually a tag, not a number".

pub const PLUS_INFINITY: f64 = 1e25;
pub const MINUS_INFINITY: f64 = -1e25;

// "Exception" sentinels: states of a cell, not numeric errors.
pub const EXCEPTION: f64 = 1e36;
pub const UNDEFINED: f64 = 1e37;
pub const NOT_COMPUTED: f64 = 1e38;
pub const COMPUTING: f64 = 1e39;

// "Error" sentinels, strictly increasing severity as they go more
// negative. Reducing over a set of these with `f64::min` yields the
// severest member, which is the whole point of the ordering.
pub const ERROR: f64 = -1e40;
pub const CYCLIC: f64 = -1e41;
pub const DIV_ZERO: f64 = -1e42;
pub const BAD_CALC: f64 = -1e43;
pub const ARRAY_INDEX: f64 = -1e44;
pub const BAD_REF: f64 = -1e45;
pub const UNDERFLOW: f64 = -1e46;
pub const OVERFLOW: f64 = -1e47;
pub const INVALID: f64 = -1e48;
pub const PARAMS: f64 = -1e49;
pub const UNKNOWN_ERROR: f64 = -1e50;

// Division/modulo guard: anything this close to zero is treated as
// exactly zero for the purpose of catching DIV_ZERO.
pub const DIVIDE_EPSILON: f64 = 1e-10;

// Below this magnitude a "zero" result is displayed as +0/-0 instead
// of a value that looks deceptively precise.
pub const ON_OFF_THRESHOLD: f64 = 1e-9;

const ERROR_SENTINELS: [f64; 10] = [
    ERROR, CYCLIC, DIV_ZERO, BAD_CALC, ARRAY_INDEX, BAD_REF, UNDERFLOW, OVERFLOW, INVALID, PARAMS,
];

/// Classification of a value for display and control-flow purposes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Class {
    Normal,
    PlusInfinity,
    MinusInfinity,
    Exception(Exception),
    Error(ErrorKind),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Exception {
    Undefined,
    NotComputed,
    Computing,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorKind {
    Error,
    Cyclic,
    DivZero,
    BadCalc,
    ArrayIndex,
    BadRef,
    Underflow,
    Overflow,
    Invalid,
    Params,
    UnknownError,
}

impl ErrorKind {
    pub fn sentinel(self) -> f64 {
        match self {
            ErrorKind::Error => ERROR,
            ErrorKind::Cyclic => CYCLIC,
            ErrorKind::DivZero => DIV_ZERO,
            ErrorKind::BadCalc => BAD_CALC,
            ErrorKind::ArrayIndex => ARRAY_INDEX,
            ErrorKind::BadRef => BAD_REF,
            ErrorKind::Underflow => UNDERFLOW,
            ErrorKind::Overflow => OVERFLOW,
            ErrorKind::Invalid => INVALID,
            ErrorKind::Params => PARAMS,
            ErrorKind::UnknownError => UNKNOWN_ERROR,
        }
    }
}

/// Classify a raw f64 into the value domain's regions. Every sentinel
/// this engine ever produces is one of the exact constants above --
/// arithmetic on errors always resolves to the severest *operand*,
/// never a blend -- so exact equality is sufficient and avoids
/// accidentally swallowing ordinary large-magnitude results into an
/// error band.
pub fn classify(x: f64) -> Class {
    if x == PLUS_INFINITY {
        Class::PlusInfinity
    } else if x == MINUS_INFINITY {
        Class::MinusInfinity
    } else if x == UNDEFINED {
        Class::Exception(Exception::Undefined)
    } else if x == NOT_COMPUTED {
        Class::Exception(Exception::NotComputed)
    } else if x == COMPUTING {
        Class::Exception(Exception::Computing)
    } else if x == ERROR {
        Class::Error(ErrorKind::Error)
    } else if x == CYCLIC {
        Class::Error(ErrorKind::Cyclic)
    } else if x == DIV_ZERO {
        Class::Error(ErrorKind::DivZero)
    } else if x == BAD_CALC {
        Class::Error(ErrorKind::BadCalc)
    } else if x == ARRAY_INDEX {
        Class::Error(ErrorKind::ArrayIndex)
    } else if x == BAD_REF {
        Class::Error(ErrorKind::BadRef)
    } else if x == UNDERFLOW {
        Class::Error(ErrorKind::Underflow)
    } else if x == OVERFLOW {
        Class::Error(ErrorKind::Overflow)
    } else if x == INVALID {
        Class::Error(ErrorKind::Invalid)
    } else if x == PARAMS {
        Class::Error(ErrorKind::Params)
    } else if x == UNKNOWN_ERROR {
        Class::Error(ErrorKind::UnknownError)
    } else {
        Class::Normal
    }
}

pub fn is_error(x: f64) -> bool {
    matches!(classify(x), Class::Error(_))
}

pub fn is_exception(x: f64) -> bool {
    matches!(classify(x), Class::Exception(_))
}

pub fn is_undefined(x: f64) -> bool {
    x == UNDEFINED
}

/// True for any sentinel at all (error or exception), i.e. not a plain
/// measurement and not one of the two infinities.
pub fn is_sentinel(x: f64) -> bool {
    is_error(x) || is_exception(x)
}

/// A value is "truthy" in conditional contexts when it is non-zero.
/// Sentinels are never zero, so they are truthy by construction --
/// the caller (JUMP_IF_FALSE) special-cases them to keep them on the
/// stack regardless of this.
pub fn truthy(x: f64) -> bool {
    x != 0.0
}

/// Reduce a pair of operands to the severest error present: any
/// arithmetic with an error operand yields the severest of its
/// operands.
pub fn severest(a: f64, b: f64) -> f64 {
    match (is_error(a), is_error(b)) {
        (true, true) => a.min(b),
        (true, false) => a,
        (false, true) => b,
        (false, false) => a,
    }
}

/// Reduce an arbitrary slice of candidate errors to the severest.
pub fn severest_of<I: IntoIterator<Item = f64>>(values: I) -> Option<f64> {
    values.into_iter().filter(|v| is_error(*v)).reduce(f64::min)
}

/// Clamp a normal value into the representable (-PLUS_INFINITY,
/// PLUS_INFINITY) band used by literals and arithmetic results,
/// without disturbing sentinels (which live well outside that band
/// and so pass through clamp unchanged).
pub fn clamp_normal(x: f64) -> f64 {
    if is_sentinel(x) {
        x
    } else if x >= PLUS_INFINITY {
        PLUS_INFINITY
    } else if x <= MINUS_INFINITY {
        MINUS_INFINITY
    } else {
        x
    }
}

/// Human-readable short mnemonic for a sentinel, as shown on the
/// status line / on-diagram per the external interface contract.
/// Returns `None` for ordinary values, which the caller formats with
/// its own numeric formatting rules.
pub fn display_token(x: f64) -> Option<&'static str> {
    match classify(x) {
        Class::Normal => None,
        Class::PlusInfinity => Some("\u{221e}"),
        Class::MinusInfinity => Some("-\u{221e}"),
        Class::Exception(Exception::Undefined) => Some("??"),
        Class::Exception(Exception::NotComputed) => Some("#N/A"),
        Class::Exception(Exception::Computing) => Some("#BUSY!"),
        Class::Error(ErrorKind::Error) => Some("#ERR!"),
        Class::Error(ErrorKind::Cyclic) => Some("#CYCLIC!"),
        Class::Error(ErrorKind::DivZero) => Some("#DIV/0!"),
        Class::Error(ErrorKind::BadCalc) => Some("#NUM!"),
        Class::Error(ErrorKind::ArrayIndex) => Some("#INDEX!"),
        Class::Error(ErrorKind::BadRef) => Some("#REF?"),
        Class::Error(ErrorKind::Underflow) => Some("#UNDERFLOW!"),
        Class::Error(ErrorKind::Overflow) => Some("#OVERFLOW!"),
        Class::Error(ErrorKind::Invalid) => Some("#INVALID!"),
        Class::Error(ErrorKind::Params) => Some("#PARAMS!"),
        Class::Error(ErrorKind::UnknownError) => Some("#UNKNOWN!"),
    }
}

/// Render a value the way the UI status line would: sentinel
/// mnemonics for the special regions, otherwise a plain decimal with
/// near-zero results folded into a signed "+0"/"-0".
pub fn format_value(x: f64) -> String {
    if let Some(token) = display_token(x) {
        return token.to_string();
    }
    if x.abs() < ON_OFF_THRESHOLD {
        return if x.is_sign_negative() {
            "-0".to_string()
        } else {
            "+0".to_string()
        };
    }
    format!("{}", x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_is_monotonic() {
        let ranks = [
            ERROR,
            CYCLIC,
            DIV_ZERO,
            BAD_CALC,
            ARRAY_INDEX,
            BAD_REF,
            UNDERFLOW,
            OVERFLOW,
            INVALID,
            PARAMS,
            UNKNOWN_ERROR,
        ];
        for w in ranks.windows(2) {
            assert!(w[1] < w[0], "{:?} should be severer than {:?}", w[1], w[0]);
        }
    }

    #[test]
    fn classify_round_trips_every_sentinel() {
        for &e in ERROR_SENTINELS.iter() {
            assert!(is_error(e), "{} should classify as an error", e);
        }
        assert!(is_exception(UNDEFINED));
        assert!(is_exception(NOT_COMPUTED));
        assert!(is_exception(COMPUTING));
        assert!(!is_error(0.0));
        assert!(!is_exception(0.0));
    }

    #[test]
    fn severest_picks_lowest_numeric_value() {
        assert_eq!(severest(DIV_ZERO, CYCLIC), DIV_ZERO);
        assert_eq!(severest(CYCLIC, DIV_ZERO), DIV_ZERO);
        assert_eq!(severest(1.0, DIV_ZERO), DIV_ZERO);
        assert_eq!(severest(1.0, 2.0), 1.0);
    }

    #[test]
    fn near_zero_formats_signed() {
        assert_eq!(format_value(0.0), "+0");
        assert_eq!(format_value(-0.0), "-0");
        assert_eq!(format_value(DIV_ZERO), "#DIV/0!");
    }
}
