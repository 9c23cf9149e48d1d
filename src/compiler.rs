//! Turns equation text into an [`Equation`] that can be evaluated at any
//! `(t, y)`.
//!
//! Compilation runs in three passes:
//!
//! 1. `^` is rewritten to the canonical power token `**`.
//! 2. Every identifier in the text is checked against
//!    [`ALLOWED_NAMES`](crate::syntax::ALLOWED_NAMES), before any parsing, so
//!    a disallowed name is reported as such however the rest of the text is
//!    shaped.
//! 3. The text is parsed with the pest grammar and lowered to an [`Expr`].

use std::fmt;

use pest::iterators::Pair;
use pest::Parser;
use thiserror::Error;

use crate::syntax::{BinaryOperator, Builtin, Expr, Variable, ALLOWED_NAMES};
use crate::{EquationParser, Rule};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
  #[error("Syntax error: {message}")]
  Syntax { message: String },
  #[error("Unknown symbol: {name} (allowed names are t, y, sin, cos, exp, log)")]
  UnknownSymbol { name: String },
}

impl ParseError {
  fn syntax(message: impl Into<String>) -> Self {
    ParseError::Syntax {
      message: message.into(),
    }
  }
}

/// Raised when evaluating an equation produces a value that is not a finite
/// number, e.g. `log(0)` or `1 / 0`.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} is undefined at t = {t}, y = {y}")]
pub struct EvalError {
  pub operation: String,
  pub t: f64,
  pub y: f64,
}

/// A compiled right-hand side `f(t, y)` together with the text it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
  source: String,
  expr: Expr,
}

impl Equation {
  pub fn source(&self) -> &str {
    &self.source
  }

  pub fn expr(&self) -> &Expr {
    &self.expr
  }

  /// Evaluates `f(t, y)`.
  ///
  /// Every intermediate result must be finite; the first one that is not is
  /// reported as an [`EvalError`] naming the offending operation.
  pub fn eval(&self, t: f64, y: f64) -> Result<f64, EvalError> {
    evaluate(&self.expr, t, y)
  }
}

impl fmt::Display for Equation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.source)
  }
}

/// Compiles equation text into an [`Equation`].
pub fn compile(text: &str) -> Result<Equation, ParseError> {
  let normalized = normalize_power(text);
  check_identifiers(&normalized)?;

  let mut pairs = EquationParser::parse(Rule::Equation, &normalized)
    .map_err(|e| ParseError::syntax(e.to_string()))?;
  let equation = pairs
    .next()
    .ok_or_else(|| ParseError::syntax("empty equation"))?;
  let sum = equation
    .into_inner()
    .find(|p| p.as_rule() == Rule::Sum)
    .ok_or_else(|| ParseError::syntax("empty equation"))?;

  Ok(Equation {
    source: text.to_string(),
    expr: lower_sum(sum)?,
  })
}

/// Rewrites `^` to `**`. All other characters pass through untouched.
pub fn normalize_power(text: &str) -> String {
  text.replace('^', "**")
}

/// Rejects any identifier that is not in the whitelist.
///
/// Numeric literals are skipped as a whole (including an exponent such as
/// `1e-3`), so the `e` of a literal is never mistaken for a name.
fn check_identifiers(text: &str) -> Result<(), ParseError> {
  let bytes = text.as_bytes();
  let mut i = 0;
  while i < bytes.len() {
    let c = bytes[i];
    if c.is_ascii_digit()
      || (c == b'.' && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    {
      i = skip_number(bytes, i);
    } else if c.is_ascii_alphabetic() || c == b'_' {
      let start = i;
      while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
      {
        i += 1;
      }
      let name = &text[start..i];
      if !ALLOWED_NAMES.contains(&name) {
        return Err(ParseError::UnknownSymbol {
          name: name.to_string(),
        });
      }
    } else if !c.is_ascii() {
      // A non-ASCII letter could only be a name the grammar cannot resolve.
      let ch = text[i..].chars().next().unwrap_or('\u{fffd}');
      if ch.is_alphabetic() {
        let start = i;
        let end = text[start..]
          .char_indices()
          .find(|(_, ch)| !(ch.is_alphanumeric() || *ch == '_'))
          .map(|(offset, _)| start + offset)
          .unwrap_or(text.len());
        return Err(ParseError::UnknownSymbol {
          name: text[start..end].to_string(),
        });
      }
      i += ch.len_utf8();
    } else {
      i += 1;
    }
  }
  Ok(())
}

/// Returns the index just past the numeric literal starting at `start`.
fn skip_number(bytes: &[u8], start: usize) -> usize {
  let mut i = start;
  while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
    i += 1;
  }
  if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
    let mut j = i + 1;
    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
      j += 1;
    }
    if j < bytes.len() && bytes[j].is_ascii_digit() {
      while j < bytes.len() && bytes[j].is_ascii_digit() {
        j += 1;
      }
      return j;
    }
  }
  i
}

// ─── Lowering ──────────────────────────────────────────────────────────

fn lower_sum(pair: Pair<Rule>) -> Result<Expr, ParseError> {
  let mut inner = pair.into_inner();
  let first = inner
    .next()
    .ok_or_else(|| ParseError::syntax("missing operand"))?;
  let mut acc = lower_product(first)?;
  while let Some(op) = inner.next() {
    let rhs = inner
      .next()
      .ok_or_else(|| ParseError::syntax("dangling operator"))?;
    let op = match op.as_str() {
      "+" => BinaryOperator::Plus,
      _ => BinaryOperator::Minus,
    };
    acc = Expr::binary(op, acc, lower_product(rhs)?);
  }
  Ok(acc)
}

fn lower_product(pair: Pair<Rule>) -> Result<Expr, ParseError> {
  let mut inner = pair.into_inner();
  let first = inner
    .next()
    .ok_or_else(|| ParseError::syntax("missing operand"))?;
  let mut acc = lower_unary(first)?;
  while let Some(op) = inner.next() {
    let rhs = inner
      .next()
      .ok_or_else(|| ParseError::syntax("dangling operator"))?;
    let op = match op.as_str() {
      "/" => BinaryOperator::Divide,
      _ => BinaryOperator::Times,
    };
    acc = Expr::binary(op, acc, lower_unary(rhs)?);
  }
  Ok(acc)
}

fn lower_unary(pair: Pair<Rule>) -> Result<Expr, ParseError> {
  let mut negations = 0usize;
  let mut operand = None;
  for p in pair.into_inner() {
    match p.as_rule() {
      Rule::Sign => {
        if p.as_str() == "-" {
          negations += 1;
        }
      }
      Rule::Power => operand = Some(lower_power(p)?),
      _ => return Err(unexpected(&p)),
    }
  }
  let mut expr = operand.ok_or_else(|| ParseError::syntax("missing operand"))?;
  for _ in 0..negations {
    expr = Expr::negate(expr);
  }
  Ok(expr)
}

fn lower_power(pair: Pair<Rule>) -> Result<Expr, ParseError> {
  let mut inner = pair.into_inner();
  let base = inner
    .next()
    .ok_or_else(|| ParseError::syntax("missing operand"))?;
  let base = lower_atom(base)?;
  match inner.next() {
    Some(exponent) => Ok(Expr::binary(
      BinaryOperator::Power,
      base,
      lower_unary(exponent)?,
    )),
    None => Ok(base),
  }
}

fn lower_atom(pair: Pair<Rule>) -> Result<Expr, ParseError> {
  match pair.as_rule() {
    Rule::Number => {
      let text = pair.as_str();
      let value: f64 = text
        .parse()
        .map_err(|_| ParseError::syntax(format!("invalid number: {text}")))?;
      if !value.is_finite() {
        return Err(ParseError::syntax(format!("number out of range: {text}")));
      }
      Ok(Expr::Number(value))
    }
    Rule::Identifier => {
      let name = pair.as_str();
      if let Some(var) = Variable::from_name(name) {
        Ok(Expr::Variable(var))
      } else if Builtin::from_name(name).is_some() {
        Err(ParseError::syntax(format!(
          "function {name} must be called with an argument, e.g. {name}(t)"
        )))
      } else {
        Err(ParseError::UnknownSymbol {
          name: name.to_string(),
        })
      }
    }
    Rule::Call => {
      let mut inner = pair.into_inner();
      let name = inner
        .next()
        .ok_or_else(|| ParseError::syntax("missing function name"))?
        .as_str();
      let arg = inner
        .next()
        .ok_or_else(|| ParseError::syntax("missing function argument"))?;
      match Builtin::from_name(name) {
        Some(func) => Ok(Expr::call(func, lower_sum(arg)?)),
        None if Variable::from_name(name).is_some() => Err(ParseError::syntax(
          format!("{name} is a variable and cannot be called"),
        )),
        None => Err(ParseError::UnknownSymbol {
          name: name.to_string(),
        }),
      }
    }
    Rule::Sum => lower_sum(pair),
    _ => Err(unexpected(&pair)),
  }
}

fn unexpected(pair: &Pair<Rule>) -> ParseError {
  ParseError::syntax(format!(
    "unexpected {:?} at '{}'",
    pair.as_rule(),
    pair.as_str()
  ))
}

// ─── Evaluation ────────────────────────────────────────────────────────

fn evaluate(expr: &Expr, t: f64, y: f64) -> Result<f64, EvalError> {
  let fail = |operation: String| EvalError { operation, t, y };
  match expr {
    Expr::Number(n) => Ok(*n),
    Expr::Variable(Variable::T) => Ok(t),
    Expr::Variable(Variable::Y) => Ok(y),
    Expr::UnaryOp { operand, .. } => Ok(-evaluate(operand, t, y)?),
    Expr::BinaryOp { op, left, right } => {
      let l = evaluate(left, t, y)?;
      let r = evaluate(right, t, y)?;
      let value = op.apply(l, r);
      if value.is_finite() {
        Ok(value)
      } else {
        Err(fail(format!("{l} {} {r}", op.symbol())))
      }
    }
    Expr::FunctionCall { func, arg } => {
      let x = evaluate(arg, t, y)?;
      let value = func.apply(x);
      if value.is_finite() {
        Ok(value)
      } else {
        Err(fail(format!("{}({x})", func.name())))
      }
    }
  }
}
