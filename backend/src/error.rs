use crate::emitter::{Label, TempHandle};
use frontend::ast::{Location, SymbolId, Type};
use thiserror::Error;

/// Breaches of the generator's own invariants or of the tree contract.
/// Any of these aborts the compilation unit.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
  #[error("temporary {0} released twice")]
  DoubleRelease(TempHandle),
  #[error("temporary {0} was never acquired")]
  UnknownTemporary(TempHandle),
  #[error("label {0} marked twice")]
  LabelMarkedTwice(Label),
  #[error("label {0} is still unmarked when `{1}` closes")]
  UnmarkedLabel(Label, String),
  #[error("label {0} does not belong to the current procedure")]
  UnknownLabel(Label),
  #[error("no procedure is open")]
  NoProcedure,
  #[error("procedure `{0}` opened while another one is open")]
  NestedProcedure(String),
  #[error("sub-range requested on non-character symbol `{0}`")]
  SubstringOnNonCharacter(String),
  #[error("array addressing requested on non-array symbol `{0}`")]
  NotAnArray(String),
  #[error("`{name}` has {expected} dimension(s) but {found} index(es) were supplied")]
  IndexCount {
    name: String,
    expected: usize,
    found: usize,
  },
  #[error("procedure state {from} cannot advance to {to}")]
  StateOutOfOrder { from: String, to: String },
  #[error("`{0}` used outside of a loop")]
  OutsideLoop(&'static str),
  #[error("expression reached the generator with unresolved type {0}")]
  UnresolvedType(Type),
  #[error("symbol id {0} is not in the symbol table")]
  UnknownSymbol(SymbolId),
  #[error("`{0}` cannot be assigned to")]
  NotAssignable(String),
  #[error("`{0}` cannot be used as a value")]
  NotAValue(String),
  #[error("`{0}` is not callable")]
  NotCallable(String),
  #[error("array `{0}` needs a size known at this point")]
  UnknownArraySize(String),
  #[error("variable argument list outside of a call")]
  StrayVarArgs,
}

/// A contract violation with the best-known source position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}:{}: {}", .file, .loc.line, .violation)]
pub struct GenError {
  pub violation: ContractViolation,
  pub file: String,
  pub loc: Location,
}
