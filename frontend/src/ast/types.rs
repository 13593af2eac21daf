use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Semantic type of a symbol or a resolved expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Type {
  /// Not yet resolved. Never valid once a node reaches code generation.
  None,
  Integer,
  Real,
  Double,
  Complex,
  Logical,
  /// Variable-length character string.
  Character,
  /// Character string with a declared width.
  FixedCharacter(u32),
  Array(Box<Type>),
  Label,
  Procedure,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot combine {left} and {right}")]
pub struct TypeMismatch {
  pub left: Type,
  pub right: Type,
}

impl Type {
  pub fn array_of(element: Type) -> Type {
    Type::Array(Box::new(element))
  }

  pub fn is_resolved(&self) -> bool {
    match self {
      Type::None => false,
      Type::Array(element) => element.is_resolved(),
      _ => true,
    }
  }

  pub fn is_arithmetic(&self) -> bool {
    self.arithmetic_rank().is_some()
  }

  pub fn is_character(&self) -> bool {
    matches!(self, Type::Character | Type::FixedCharacter(_))
  }

  pub fn is_logical(&self) -> bool {
    matches!(self, Type::Logical)
  }

  pub fn is_array(&self) -> bool {
    matches!(self, Type::Array(_))
  }

  /// Element type of an array, or the type itself for scalars.
  pub fn element(&self) -> &Type {
    match self {
      Type::Array(element) => element,
      other => other,
    }
  }

  // integer < real < double < complex
  fn arithmetic_rank(&self) -> Option<u8> {
    match self {
      Type::Integer => Some(0),
      Type::Real => Some(1),
      Type::Double => Some(2),
      Type::Complex => Some(3),
      _ => None,
    }
  }

  fn character_width(&self) -> u32 {
    match self {
      Type::FixedCharacter(width) => *width,
      _ => 0,
    }
  }

  /// Whether a value of `self` can be converted to `to` by the generator.
  pub fn converts_to(&self, to: &Type) -> bool {
    if self == to {
      return true;
    }
    (self.is_arithmetic() && to.is_arithmetic()) || (self.is_character() && to.is_character())
  }
}

/// Result type of an arithmetic or character binary operator.
pub fn promote(left: &Type, right: &Type) -> Result<Type, TypeMismatch> {
  if let (Some(l), Some(r)) = (left.arithmetic_rank(), right.arithmetic_rank()) {
    return Ok(if l >= r { left.clone() } else { right.clone() });
  }
  if left.is_character() && right.is_character() {
    return match (left, right) {
      (Type::Character, Type::Character) => Ok(Type::Character),
      _ => Ok(Type::FixedCharacter(
        left.character_width().max(right.character_width()),
      )),
    };
  }
  Err(TypeMismatch {
    left: left.clone(),
    right: right.clone(),
  })
}

/// Result type of a logical binary operator.
pub fn promote_logical(left: &Type, right: &Type) -> Result<Type, TypeMismatch> {
  if left.is_logical() && right.is_logical() {
    Ok(Type::Logical)
  } else {
    Err(TypeMismatch {
      left: left.clone(),
      right: right.clone(),
    })
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Type::None => write!(f, "none"),
      Type::Integer => write!(f, "integer"),
      Type::Real => write!(f, "real"),
      Type::Double => write!(f, "double"),
      Type::Complex => write!(f, "complex"),
      Type::Logical => write!(f, "logical"),
      Type::Character => write!(f, "character"),
      Type::FixedCharacter(width) => write!(f, "character*{}", width),
      Type::Array(element) => write!(f, "{}[]", element),
      Type::Label => write!(f, "label"),
      Type::Procedure => write!(f, "procedure"),
    }
  }
}

impl FromStr for Type {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    if let Some(element) = s.strip_suffix("[]") {
      return Ok(Type::array_of(element.parse()?));
    }
    if let Some(width) = s.strip_prefix("character*") {
      return width
        .parse()
        .map(Type::FixedCharacter)
        .map_err(|_| format!("invalid character width in `{}`", s));
    }
    match s {
      "none" => Ok(Type::None),
      "integer" => Ok(Type::Integer),
      "real" => Ok(Type::Real),
      "double" => Ok(Type::Double),
      "complex" => Ok(Type::Complex),
      "logical" => Ok(Type::Logical),
      "character" => Ok(Type::Character),
      "label" => Ok(Type::Label),
      "procedure" => Ok(Type::Procedure),
      _ => Err(format!("unknown type `{}`", s)),
    }
  }
}

/// Compile-time constant value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Constant {
  Integer(i64),
  Real(f32),
  Double(f64),
  Complex(f64, f64),
  Logical(bool),
  Character(String),
}

impl Constant {
  pub fn natural_type(&self) -> Type {
    match self {
      Constant::Integer(_) => Type::Integer,
      Constant::Real(_) => Type::Real,
      Constant::Double(_) => Type::Double,
      Constant::Complex(_, _) => Type::Complex,
      Constant::Logical(_) => Type::Logical,
      Constant::Character(_) => Type::Character,
    }
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Constant::Integer(n) => Some(*n),
      _ => None,
    }
  }

  pub fn as_logical(&self) -> Option<bool> {
    match self {
      Constant::Logical(b) => Some(*b),
      _ => None,
    }
  }

  fn as_f64(&self) -> Option<f64> {
    match self {
      Constant::Integer(n) => Some(*n as f64),
      Constant::Real(x) => Some(*x as f64),
      Constant::Double(x) => Some(*x),
      Constant::Complex(re, _) => Some(*re),
      _ => None,
    }
  }

  /// Folds a conversion of this constant to `to`. `None` when the
  /// conversion is not defined.
  pub fn convert(&self, to: &Type) -> Option<Constant> {
    match (self, to) {
      (Constant::Integer(n), Type::Integer) => Some(Constant::Integer(*n)),
      (c, Type::Integer) => c.as_f64().map(|x| Constant::Integer(x.trunc() as i64)),
      (c, Type::Real) => c.as_f64().map(|x| Constant::Real(x as f32)),
      (c, Type::Double) => c.as_f64().map(Constant::Double),
      (Constant::Complex(re, im), Type::Complex) => Some(Constant::Complex(*re, *im)),
      (c, Type::Complex) => c.as_f64().map(|x| Constant::Complex(x, 0.0)),
      (Constant::Logical(b), Type::Logical) => Some(Constant::Logical(*b)),
      (Constant::Character(s), Type::Character) => Some(Constant::Character(s.clone())),
      (Constant::Character(s), Type::FixedCharacter(width)) => {
        Some(Constant::Character(fit_width(s, *width)))
      }
      _ => None,
    }
  }
}

/// Pads with blanks or truncates `s` to exactly `width` characters.
pub fn fit_width(s: &str, width: u32) -> String {
  let width = width as usize;
  let mut out: String = s.chars().take(width).collect();
  let len = out.chars().count();
  out.extend(std::iter::repeat(' ').take(width - len));
  out
}

impl fmt::Display for Constant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Constant::Integer(n) => write!(f, "{}", n),
      Constant::Real(x) => write!(f, "{:?}", x),
      Constant::Double(x) => write!(f, "{:?}", x),
      Constant::Complex(re, im) => write!(f, "({:?},{:?})", re, im),
      Constant::Logical(b) => write!(f, "{}", b),
      Constant::Character(s) => write!(f, "\"{}\"", escape(s)),
    }
  }
}

fn escape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  for c in s.chars() {
    match c {
      '"' => out.push_str("\\\""),
      '\\' => out.push_str("\\\\"),
      '\n' => out.push_str("\\n"),
      '\t' => out.push_str("\\t"),
      c => out.push(c),
    }
  }
  out
}

pub fn unescape(s: &str) -> String {
  let mut out = String::with_capacity(s.len());
  let mut chars = s.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('n') => out.push('\n'),
      Some('t') => out.push('\t'),
      Some(other) => out.push(other),
      None => out.push('\\'),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn arithmetic() -> Vec<Type> {
    vec![Type::Integer, Type::Real, Type::Double, Type::Complex]
  }

  #[test]
  fn promotion_is_commutative_and_idempotent() {
    for a in arithmetic() {
      assert_eq!(promote(&a, &a), Ok(a.clone()));
      for b in arithmetic() {
        assert_eq!(promote(&a, &b), promote(&b, &a));
      }
    }
  }

  #[test]
  fn promotion_follows_lattice() {
    assert_eq!(promote(&Type::Integer, &Type::Real), Ok(Type::Real));
    assert_eq!(promote(&Type::Double, &Type::Real), Ok(Type::Double));
    assert_eq!(promote(&Type::Integer, &Type::Complex), Ok(Type::Complex));
  }

  #[test]
  fn character_promotion() {
    assert_eq!(
      promote(&Type::Character, &Type::Character),
      Ok(Type::Character)
    );
    assert_eq!(
      promote(&Type::Character, &Type::FixedCharacter(4)),
      Ok(Type::FixedCharacter(4))
    );
    assert_eq!(
      promote(&Type::FixedCharacter(8), &Type::FixedCharacter(3)),
      promote(&Type::FixedCharacter(3), &Type::FixedCharacter(8))
    );
  }

  #[test]
  fn mismatches_are_reported() {
    assert!(promote(&Type::Integer, &Type::Logical).is_err());
    assert!(promote(&Type::Character, &Type::Real).is_err());
    assert!(promote_logical(&Type::Logical, &Type::Integer).is_err());
    assert_eq!(
      promote_logical(&Type::Logical, &Type::Logical),
      Ok(Type::Logical)
    );
  }

  #[test]
  fn type_spelling_round_trips() {
    let types = vec![
      Type::None,
      Type::Integer,
      Type::Complex,
      Type::FixedCharacter(12),
      Type::array_of(Type::Double),
      Type::array_of(Type::FixedCharacter(2)),
      Type::Procedure,
    ];
    for ty in types {
      assert_eq!(ty.to_string().parse::<Type>(), Ok(ty));
    }
  }

  #[test]
  fn constant_conversion_folds() {
    assert_eq!(
      Constant::Real(2.75).convert(&Type::Integer),
      Some(Constant::Integer(2))
    );
    assert_eq!(
      Constant::Integer(3).convert(&Type::Complex),
      Some(Constant::Complex(3.0, 0.0))
    );
    assert_eq!(
      Constant::Character("abcdef".into()).convert(&Type::FixedCharacter(3)),
      Some(Constant::Character("abc".into()))
    );
    assert_eq!(
      Constant::Character("ab".into()).convert(&Type::FixedCharacter(4)),
      Some(Constant::Character("ab  ".into()))
    );
    assert_eq!(Constant::Logical(true).convert(&Type::Integer), None);
  }

  #[test]
  fn escapes_round_trip() {
    let s = "say \"hi\"\\\n";
    assert_eq!(unescape(&escape(s)), s);
  }
}
