// Tokenizer for aspect expression text. Deliberately simple and
// allocation-light: a single forward pass over the source producing a
// flat token vector the parser then walks with a cursor, no
// intermediate AST.
//
// One production needs raw (non-tokenized) text instead of the usual
// symbol-by-symbol scan: the body of a `[...]` reference. It may hold
// a plain name (which can contain spaces and apostrophes before
// `model::normalize_id` folds them), a `stat$pattern` statistic form,
// an `@offset` tail, or any combination -- and a pattern can itself
// contain a literal `[...]` (a regex character class), so the scanner
// tracks bracket depth rather than stopping at the first `]`. The
// whole body is captured as one token and handed to the parser to
// split apart, since it already knows the grammar of what goes inside.

use crate::error::CompileError;

#[derive(Clone, Debug, PartialEq)]
pub enum Tok {
    Number(f64),
    Ident(String),
    BracketBody(String),
    LParen,
    RParen,
    Comma,
    Colon,
    Semi,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Pipe,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    Hash,
}

pub fn tokenize(text: &str) -> Result<Vec<Tok>, CompileError> {
    let chars: Vec<char> = text.chars().collect();
    let mut i = 0usize;
    let mut out = Vec::new();

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        match c {
            '(' => {
                out.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                out.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                i += 1;
                let start = i;
                let mut depth = 1i32;
                while i < chars.len() && depth > 0 {
                    match chars[i] {
                        '[' => depth += 1,
                        ']' => depth -= 1,
                        _ => {}
                    }
                    if depth == 0 {
                        break;
                    }
                    i += 1;
                }
                if depth != 0 {
                    return Err(CompileError::UnmatchedBracket);
                }
                let body: String = chars[start..i].iter().collect();
                out.push(Tok::BracketBody(body));
                i += 1; // consume the matching ']'
            }
            ',' => {
                out.push(Tok::Comma);
                i += 1;
            }
            ':' => {
                out.push(Tok::Colon);
                i += 1;
            }
            ';' => {
                out.push(Tok::Semi);
                i += 1;
            }
            '?' => {
                out.push(Tok::Question);
                i += 1;
            }
            '+' => {
                out.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                out.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                out.push(Tok::Star);
                i += 1;
            }
            '/' => {
                out.push(Tok::Slash);
                i += 1;
            }
            '%' => {
                out.push(Tok::Percent);
                i += 1;
            }
            '^' => {
                out.push(Tok::Caret);
                i += 1;
            }
            '|' => {
                out.push(Tok::Pipe);
                i += 1;
            }
            '#' => {
                out.push(Tok::Hash);
                i += 1;
            }
            '=' => {
                out.push(Tok::Eq);
                i += 1;
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Tok::Ne);
                    i += 2;
                } else {
                    return Err(CompileError::UnexpectedToken("!".to_string()));
                }
            }
            '<' => match chars.get(i + 1) {
                Some('=') => {
                    out.push(Tok::Le);
                    i += 2;
                }
                Some('>') => {
                    out.push(Tok::Ne);
                    i += 2;
                }
                _ => {
                    out.push(Tok::Lt);
                    i += 1;
                }
            },
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    out.push(Tok::Ge);
                    i += 2;
                } else {
                    out.push(Tok::Gt);
                    i += 1;
                }
            }
            c if c.is_ascii_digit() || c == '.' => {
                let start = i;
                let mut seen_dot = c == '.';
                i += 1;
                while i < chars.len() {
                    let d = chars[i];
                    if d.is_ascii_digit() {
                        i += 1;
                    } else if d == '.' && !seen_dot {
                        seen_dot = true;
                        i += 1;
                    } else {
                        break;
                    }
                }
                if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        while j < chars.len() && chars[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let n: f64 = text.parse().map_err(|_| CompileError::InvalidNumber)?;
                out.push(Tok::Number(n));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect::<String>().to_lowercase();
                out.push(Tok::Ident(word));
            }
            other => return Err(CompileError::UnexpectedToken(other.to_string())),
        }
    }
    Ok(out)
}
