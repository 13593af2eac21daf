//! The abstract stack machine the code generator drives.
//!
//! Operands live on an evaluation stack. Unless stated otherwise an
//! operation pops its inputs in push order and pushes at most one result.

pub mod listing;
pub mod machine;
pub mod temps;
pub mod vm;

use crate::error::ContractViolation;
use frontend::ast::{Constant, Type};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Label(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct LocalId(pub u32);

/// Scratch slot handed out by the temporary pool. `id` is unique for the
/// lifetime of the procedure; `slot` is reused once released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TempHandle {
  pub id: u32,
  pub slot: u32,
}

/// Addressable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Place {
  Local(LocalId),
  Param(u16),
  Static(String),
  Temp(TempHandle),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Condition {
  /// Pops a logical.
  True,
  False,
  /// Pop two operands of the given type and compare them.
  Equal,
  NotEqual,
  Less,
  LessOrEqual,
  Greater,
  GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Relation {
  Equal,
  NotEqual,
  Less,
  LessOrEqual,
  Greater,
  GreaterOrEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArithOp {
  Add,
  Sub,
  Mul,
  /// Truncating for integers.
  Div,
  Rem,
  Neg,
  And,
  Or,
  Xor,
  Not,
}

impl ArithOp {
  pub fn is_unary(self) -> bool {
    matches!(self, ArithOp::Neg | ArithOp::Not)
  }
}

impl Relation {
  pub fn holds(self, ordering: std::cmp::Ordering) -> bool {
    use std::cmp::Ordering::*;
    match self {
      Relation::Equal => ordering == Equal,
      Relation::NotEqual => ordering != Equal,
      Relation::Less => ordering == Less,
      Relation::LessOrEqual => ordering != Greater,
      Relation::Greater => ordering == Greater,
      Relation::GreaterOrEqual => ordering != Less,
    }
  }
}

impl Condition {
  /// The relation a comparing condition tests, `None` for the logical ones.
  pub fn relation(self) -> Option<Relation> {
    match self {
      Condition::True | Condition::False => None,
      Condition::Equal => Some(Relation::Equal),
      Condition::NotEqual => Some(Relation::NotEqual),
      Condition::Less => Some(Relation::Less),
      Condition::LessOrEqual => Some(Relation::LessOrEqual),
      Condition::Greater => Some(Relation::Greater),
      Condition::GreaterOrEqual => Some(Relation::GreaterOrEqual),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Signature {
  pub name: String,
  pub params: Vec<Type>,
  /// `Type::None` for procedures without a result.
  pub result: Type,
  /// Where execution of the image starts.
  pub entry: bool,
}

pub trait Emitter {
  fn begin_procedure(&mut self, signature: Signature) -> Result<(), ContractViolation>;
  /// Fails when a label created in the procedure was never marked.
  fn end_procedure(&mut self) -> Result<(), ContractViolation>;

  fn declare_local(&mut self, name: &str, ty: &Type) -> LocalId;
  /// Program-wide storage. `size` is the element count of a static array.
  fn declare_static(&mut self, name: &str, ty: &Type, size: Option<usize>);

  fn create_label(&mut self) -> Label;
  fn mark_label(&mut self, label: Label) -> Result<(), ContractViolation>;
  fn branch(&mut self, label: Label);
  fn branch_if(&mut self, condition: Condition, ty: &Type, label: Label);
  /// Pops an integer `k` and jumps to `labels[k]`; falls through when `k`
  /// is out of range.
  fn dispatch_table(&mut self, labels: &[Label]);

  fn load_constant(&mut self, value: &Constant);
  fn load(&mut self, place: &Place);
  fn store(&mut self, place: &Place);
  fn load_address(&mut self, place: &Place);
  /// `[ref] -> [value]`
  fn load_indirect(&mut self, ty: &Type);
  /// `[ref, value] -> []`
  fn store_indirect(&mut self, ty: &Type);

  fn arith(&mut self, op: ArithOp, ty: &Type);
  /// Pushes a logical.
  fn compare(&mut self, relation: Relation, ty: &Type);
  /// Blank-padded character comparison; pushes -1, 0 or 1.
  fn compare3(&mut self);
  fn convert(&mut self, from: &Type, to: &Type);

  /// Pops `dims` extents and pushes a new zero-filled array.
  fn create_array(&mut self, element: &Type, dims: usize);
  /// `[array, index] -> [value]`
  fn load_element(&mut self, element: &Type);
  /// `[array, index, value] -> []`
  fn store_element(&mut self, element: &Type);
  /// `[array, index] -> [ref]`
  fn element_address(&mut self, element: &Type);
  fn create_object(&mut self, ty: &Type, args: &[Type]);

  fn load_procedure(&mut self, name: &str);
  fn call(&mut self, name: &str, args: &[Type], result: &Type);
  /// `[procedure, args...] -> [result?]`
  fn call_indirect(&mut self, args: &[Type], result: &Type);
  fn duplicate(&mut self);
  fn pop(&mut self);
  /// Pops the result first when the procedure has one.
  fn ret(&mut self);

  /// Failures inside the region transfer control to `handler`, with the
  /// failure message pushed.
  fn begin_protected(&mut self, handler: Label);
  fn end_protected(&mut self);
  fn begin_handler(&mut self, handler: Label) -> Result<(), ContractViolation>;

  fn acquire_temporary(&mut self, ty: &Type) -> TempHandle;
  fn release_temporary(&mut self, handle: TempHandle) -> Result<(), ContractViolation>;
  /// Pool balance: temporaries acquired and not yet released.
  fn outstanding_temporaries(&self) -> usize;
  /// Temporaries still live in the open procedure, oldest first.
  fn live_temporaries(&self) -> Vec<(TempHandle, Type)>;
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "L{}", self.0)
  }
}

impl fmt::Display for TempHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "t{}#{}", self.slot, self.id)
  }
}

impl fmt::Display for Place {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Place::Local(id) => write!(f, "local {}", id.0),
      Place::Param(index) => write!(f, "param {}", index),
      Place::Static(name) => write!(f, "static {}", name),
      Place::Temp(handle) => write!(f, "temp {}", handle.slot),
    }
  }
}
