use std::fmt;

/// Every name an equation may mention. Nothing outside this list is ever
/// resolved.
pub const ALLOWED_NAMES: [&str; 6] = ["t", "y", "sin", "cos", "exp", "log"];

/// The two free variables of `y' = f(t, y)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Variable {
  T,
  Y,
}

impl Variable {
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "t" => Some(Self::T),
      "y" => Some(Self::Y),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::T => "t",
      Self::Y => "y",
    }
  }
}

/// Unary functions an equation may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
  Sin,
  Cos,
  Exp,
  /// Natural logarithm.
  Log,
}

impl Builtin {
  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "sin" => Some(Self::Sin),
      "cos" => Some(Self::Cos),
      "exp" => Some(Self::Exp),
      "log" => Some(Self::Log),
      _ => None,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Self::Sin => "sin",
      Self::Cos => "cos",
      Self::Exp => "exp",
      Self::Log => "log",
    }
  }

  pub fn apply(self, x: f64) -> f64 {
    match self {
      Self::Sin => x.sin(),
      Self::Cos => x.cos(),
      Self::Exp => x.exp(),
      Self::Log => x.ln(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
  Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
  Plus,
  Minus,
  Times,
  Divide,
  Power,
}

impl BinaryOperator {
  pub fn symbol(self) -> &'static str {
    match self {
      Self::Plus => "+",
      Self::Minus => "-",
      Self::Times => "*",
      Self::Divide => "/",
      Self::Power => "**",
    }
  }

  pub fn apply(self, l: f64, r: f64) -> f64 {
    match self {
      Self::Plus => l + r,
      Self::Minus => l - r,
      Self::Times => l * r,
      Self::Divide => l / r,
      Self::Power => l.powf(r),
    }
  }
}

/// Abstract syntax tree of a right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
  Number(f64),
  Variable(Variable),
  UnaryOp {
    op: UnaryOperator,
    operand: Box<Expr>,
  },
  BinaryOp {
    op: BinaryOperator,
    left: Box<Expr>,
    right: Box<Expr>,
  },
  FunctionCall {
    func: Builtin,
    arg: Box<Expr>,
  },
}

impl Expr {
  pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Self {
    Expr::BinaryOp {
      op,
      left: Box::new(left),
      right: Box::new(right),
    }
  }

  pub fn negate(operand: Expr) -> Self {
    Expr::UnaryOp {
      op: UnaryOperator::Minus,
      operand: Box::new(operand),
    }
  }

  pub fn call(func: Builtin, arg: Expr) -> Self {
    Expr::FunctionCall {
      func,
      arg: Box::new(arg),
    }
  }
}

/// Fully parenthesized canonical form, e.g. `((t ** 2) + 1)`.
impl fmt::Display for Expr {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Expr::Number(n) => write!(f, "{n}"),
      Expr::Variable(v) => f.write_str(v.name()),
      Expr::UnaryOp {
        op: UnaryOperator::Minus,
        operand,
      } => write!(f, "-{operand}"),
      Expr::BinaryOp { op, left, right } => {
        write!(f, "({left} {} {right})", op.symbol())
      }
      Expr::FunctionCall { func, arg } => write!(f, "{}({arg})", func.name()),
    }
  }
}
