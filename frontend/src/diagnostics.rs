use crate::ast::{Location, TypeMismatch};
use thiserror::Error;

/// User-facing semantic errors. These are accumulated; none of them stops
/// code generation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SemanticError {
  #[error("{loc}: type mismatch: {mismatch}")]
  TypeMismatch { loc: Location, mismatch: TypeMismatch },
  #[error("{loc}: undefined reference to `{name}`")]
  UndefinedReference { loc: Location, name: String },
  #[error("{loc}: `{name}` expects {expected} argument(s), {found} supplied")]
  ArityMismatch {
    loc: Location,
    name: String,
    expected: usize,
    found: usize,
  },
  /// The tree breaks the construction contract a front end must honour.
  #[error("{loc}: malformed tree: {message}")]
  Contract { loc: Location, message: String },
}

impl SemanticError {
  pub fn location(&self) -> Location {
    match self {
      SemanticError::TypeMismatch { loc, .. }
      | SemanticError::UndefinedReference { loc, .. }
      | SemanticError::ArityMismatch { loc, .. }
      | SemanticError::Contract { loc, .. } => *loc,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Diagnostics {
  errors: Vec<SemanticError>,
}

impl Diagnostics {
  pub fn new() -> Self {
    Diagnostics::default()
  }

  pub fn report(&mut self, error: SemanticError) {
    log::debug!("diagnostic: {}", error);
    self.errors.push(error);
  }

  pub fn is_empty(&self) -> bool {
    self.errors.is_empty()
  }

  pub fn len(&self) -> usize {
    self.errors.len()
  }

  pub fn iter(&self) -> impl Iterator<Item = &SemanticError> {
    self.errors.iter()
  }

  pub fn into_vec(self) -> Vec<SemanticError> {
    self.errors
  }
}

impl Extend<SemanticError> for Diagnostics {
  fn extend<I: IntoIterator<Item = SemanticError>>(&mut self, iter: I) {
    for error in iter {
      self.report(error);
    }
  }
}
