use super::{Constant, Expr, Type};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl fmt::Display for SymbolId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolClass {
  Variable,
  Array,
  Function,
  Subroutine,
  Label,
  CommonBlock,
  /// Named constant declared by the source (Fortran `PARAMETER`).
  Parameter,
  /// Compile-time constant introduced by a front end.
  Constant,
  /// Statement function, expanded inline at every call.
  Inline,
  Intrinsic,
  External,
}

impl SymbolClass {
  pub fn is_procedure(self) -> bool {
    matches!(
      self,
      SymbolClass::Function | SymbolClass::Subroutine | SymbolClass::Intrinsic | SymbolClass::External
    )
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
  Local,
  Global,
  Parameter,
  Constant,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Modifiers {
  pub is_static: bool,
  pub by_ref: bool,
  pub referenced: bool,
  pub defined: bool,
}

/// Storage location index handed out by the code generator when it binds a
/// non-constant array bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef(pub u32);

#[derive(Debug, Clone)]
pub struct Dimension {
  pub lower: Expr,
  /// `None` for an assumed-size (`*`) last dimension.
  pub upper: Option<Expr>,
  lower_slot: Cell<Option<SlotRef>>,
  extent_slot: Cell<Option<SlotRef>>,
}

impl Dimension {
  pub fn new(lower: Expr, upper: Option<Expr>) -> Self {
    Dimension {
      lower,
      upper,
      lower_slot: Cell::new(None),
      extent_slot: Cell::new(None),
    }
  }

  pub fn constant(lower: i64, upper: i64) -> Self {
    Dimension::new(Expr::integer(lower), Some(Expr::integer(upper)))
  }

  /// `DIMENSION A(N)` style: lower bound 1.
  pub fn upto(upper: Expr) -> Self {
    Dimension::new(Expr::integer(1), Some(upper))
  }

  pub fn assumed_size(lower: i64) -> Self {
    Dimension::new(Expr::integer(lower), None)
  }

  pub fn constant_lower(&self) -> Option<i64> {
    self.lower.value.as_ref().and_then(Constant::as_integer)
  }

  pub fn constant_upper(&self) -> Option<i64> {
    self
      .upper
      .as_ref()
      .and_then(|upper| upper.value.as_ref())
      .and_then(Constant::as_integer)
  }

  /// `upper - lower + 1` when both bounds are constant and the extent
  /// fits an integer.
  pub fn constant_extent(&self) -> Option<i64> {
    let (lower, upper) = (self.constant_lower()?, self.constant_upper()?);
    let extent = upper.checked_sub(lower)?.checked_add(1)?;
    Some(extent.max(0))
  }

  pub fn lower_slot(&self) -> Option<SlotRef> {
    self.lower_slot.get()
  }

  pub fn extent_slot(&self) -> Option<SlotRef> {
    self.extent_slot.get()
  }

  pub fn bind_lower(&self, slot: SlotRef) {
    self.lower_slot.set(Some(slot));
  }

  pub fn bind_extent(&self, slot: SlotRef) {
    self.extent_slot.set(Some(slot));
  }

  /// Forgets the run-time bindings made while generating a procedure.
  pub fn unbind(&self) {
    self.lower_slot.set(None);
    self.extent_slot.set(None);
  }
}

impl PartialEq for Dimension {
  fn eq(&self, other: &Self) -> bool {
    self.lower == other.lower && self.upper == other.upper
  }
}

/// Where the value of a symbol lives. Derived from class, scope and
/// modifiers; the generator never picks addressing on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
  Constant,
  Local,
  Parameter(u16),
  Static,
  Procedure,
  Label,
  Inline,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
  pub name: String,
  /// Element type for arrays.
  pub ty: Type,
  pub class: SymbolClass,
  pub scope: ScopeKind,
  pub modifiers: Modifiers,
  pub dims: Vec<Dimension>,
  pub params: Option<Vec<SymbolId>>,
  pub value: Option<Constant>,
  pub common: Option<SymbolId>,
  /// Members of a common block, in declaration order.
  pub members: Vec<SymbolId>,
  /// Body of a statement function.
  pub body: Option<Expr>,
  /// Position of a dummy argument in its procedure's parameter list.
  pub param_index: Option<u16>,
  pub alternate_return: bool,
}

impl Symbol {
  pub fn new(name: &str, ty: Type, class: SymbolClass, scope: ScopeKind) -> Self {
    Symbol {
      name: name.to_string(),
      ty,
      class,
      scope,
      modifiers: Modifiers::default(),
      dims: Vec::new(),
      params: None,
      value: None,
      common: None,
      members: Vec::new(),
      body: None,
      param_index: None,
      alternate_return: false,
    }
  }

  pub fn variable(name: &str, ty: Type) -> Self {
    Symbol::new(name, ty, SymbolClass::Variable, ScopeKind::Local)
  }

  pub fn array(name: &str, ty: Type, dims: Vec<Dimension>) -> Self {
    let mut symbol = Symbol::new(name, ty, SymbolClass::Array, ScopeKind::Local);
    symbol.dims = dims;
    symbol
  }

  pub fn label(name: &str) -> Self {
    let mut symbol = Symbol::new(name, Type::Label, SymbolClass::Label, ScopeKind::Local);
    symbol.modifiers.defined = true;
    symbol
  }

  pub fn named_constant(name: &str, value: Constant) -> Self {
    let mut symbol = Symbol::new(
      name,
      value.natural_type(),
      SymbolClass::Parameter,
      ScopeKind::Constant,
    );
    symbol.value = Some(value);
    symbol
  }

  pub fn procedure(name: &str, ty: Type, class: SymbolClass, params: Vec<SymbolId>) -> Self {
    let mut symbol = Symbol::new(name, ty, class, ScopeKind::Global);
    symbol.params = Some(params);
    symbol.modifiers.defined = true;
    symbol
  }

  /// Turns this symbol into the dummy argument at `index`.
  pub fn as_parameter(mut self, index: u16, by_ref: bool) -> Self {
    self.scope = ScopeKind::Parameter;
    self.param_index = Some(index);
    self.modifiers.by_ref = by_ref;
    self
  }

  pub fn as_static(mut self) -> Self {
    self.modifiers.is_static = true;
    self
  }

  pub fn as_global(mut self) -> Self {
    self.scope = ScopeKind::Global;
    self
  }

  pub fn is_array(&self) -> bool {
    self.class == SymbolClass::Array || !self.dims.is_empty()
  }

  pub fn is_by_ref(&self) -> bool {
    self.modifiers.by_ref
  }

  /// Type of the value named by a bare reference to this symbol.
  pub fn value_type(&self) -> Type {
    if self.is_array() {
      Type::array_of(self.ty.clone())
    } else {
      self.ty.clone()
    }
  }

  /// Total element count when every dimension is constant.
  pub fn constant_size(&self) -> Option<i64> {
    self
      .dims
      .iter()
      .map(Dimension::constant_extent)
      .try_fold(1i64, |acc, extent| acc.checked_mul(extent?))
  }

  pub fn storage(&self) -> Storage {
    match self.class {
      SymbolClass::Parameter | SymbolClass::Constant => return Storage::Constant,
      SymbolClass::Label => return Storage::Label,
      SymbolClass::Inline => return Storage::Inline,
      SymbolClass::CommonBlock => return Storage::Static,
      _ => {}
    }
    if self.scope == ScopeKind::Constant && self.value.is_some() {
      return Storage::Constant;
    }
    if self.scope == ScopeKind::Parameter {
      return Storage::Parameter(self.param_index.unwrap_or(0));
    }
    if self.class.is_procedure() {
      return Storage::Procedure;
    }
    if self.modifiers.is_static || self.scope == ScopeKind::Global || self.common.is_some() {
      return Storage::Static;
    }
    Storage::Local
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolArena {
  symbols: Vec<Symbol>,
}

impl SymbolArena {
  pub fn new() -> Self {
    SymbolArena::default()
  }

  pub fn add(&mut self, symbol: Symbol) -> SymbolId {
    let id = SymbolId(self.symbols.len() as u32);
    self.symbols.push(symbol);
    id
  }

  pub fn get(&self, id: SymbolId) -> Option<&Symbol> {
    self.symbols.get(id.index())
  }

  pub fn get_mut(&mut self, id: SymbolId) -> Option<&mut Symbol> {
    self.symbols.get_mut(id.index())
  }

  pub fn contains(&self, id: SymbolId) -> bool {
    id.index() < self.symbols.len()
  }

  pub fn len(&self) -> usize {
    self.symbols.len()
  }

  pub fn is_empty(&self) -> bool {
    self.symbols.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = (SymbolId, &Symbol)> {
    self
      .symbols
      .iter()
      .enumerate()
      .map(|(i, symbol)| (SymbolId(i as u32), symbol))
  }
}

impl Index<SymbolId> for SymbolArena {
  type Output = Symbol;

  fn index(&self, id: SymbolId) -> &Symbol {
    &self.symbols[id.index()]
  }
}

/// Name table for one scope level.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
  names: BTreeMap<String, SymbolId>,
}

impl Scope {
  pub fn new() -> Self {
    Scope::default()
  }

  pub fn insert(&mut self, name: &str, id: SymbolId) -> Option<SymbolId> {
    self.names.insert(name.to_string(), id)
  }

  pub fn get(&self, name: &str) -> Option<SymbolId> {
    self.names.get(name).copied()
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, SymbolId)> {
    self.names.iter().map(|(name, id)| (name.as_str(), *id))
  }

  pub fn ids(&self) -> impl Iterator<Item = SymbolId> + '_ {
    self.names.values().copied()
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

/// Statement-function scope, then the procedure's locals, then globals.
pub struct ScopeChain<'a> {
  pub statement_functions: Option<&'a Scope>,
  pub local: Option<&'a Scope>,
  pub global: &'a Scope,
}

impl<'a> ScopeChain<'a> {
  pub fn global(global: &'a Scope) -> Self {
    ScopeChain {
      statement_functions: None,
      local: None,
      global,
    }
  }

  pub fn lookup(&self, name: &str) -> Option<SymbolId> {
    self
      .statement_functions
      .and_then(|scope| scope.get(name))
      .or_else(|| self.local.and_then(|scope| scope.get(name)))
      .or_else(|| self.global.get(name))
  }
}

impl fmt::Display for SymbolClass {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      SymbolClass::Variable => "variable",
      SymbolClass::Array => "array",
      SymbolClass::Function => "function",
      SymbolClass::Subroutine => "subroutine",
      SymbolClass::Label => "label",
      SymbolClass::CommonBlock => "common",
      SymbolClass::Parameter => "parameter",
      SymbolClass::Constant => "constant",
      SymbolClass::Inline => "inline",
      SymbolClass::Intrinsic => "intrinsic",
      SymbolClass::External => "external",
    };
    write!(f, "{}", name)
  }
}

impl FromStr for SymbolClass {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "variable" => Ok(SymbolClass::Variable),
      "array" => Ok(SymbolClass::Array),
      "function" => Ok(SymbolClass::Function),
      "subroutine" => Ok(SymbolClass::Subroutine),
      "label" => Ok(SymbolClass::Label),
      "common" => Ok(SymbolClass::CommonBlock),
      "parameter" => Ok(SymbolClass::Parameter),
      "constant" => Ok(SymbolClass::Constant),
      "inline" => Ok(SymbolClass::Inline),
      "intrinsic" => Ok(SymbolClass::Intrinsic),
      "external" => Ok(SymbolClass::External),
      _ => Err(format!("unknown symbol class `{}`", s)),
    }
  }
}

impl fmt::Display for ScopeKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ScopeKind::Local => "local",
      ScopeKind::Global => "global",
      ScopeKind::Parameter => "parameter",
      ScopeKind::Constant => "constant",
    };
    write!(f, "{}", name)
  }
}

impl FromStr for ScopeKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "local" => Ok(ScopeKind::Local),
      "global" => Ok(ScopeKind::Global),
      "parameter" => Ok(ScopeKind::Parameter),
      "constant" => Ok(ScopeKind::Constant),
      _ => Err(format!("unknown scope `{}`", s)),
    }
  }
}
