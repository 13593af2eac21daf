pub mod checker;
pub mod dump;
pub mod reader;
pub mod symbols;
pub mod types;

pub use symbols::*;
pub use types::*;

use std::fmt;

pub trait Visitor {
  type Program;
  type Procedure;
  type Block;
  type Statement;
  type Expression;

  fn visit_program(&mut self, program: &Program) -> Self::Program;
  fn visit_procedure(&mut self, procedure: &Procedure) -> Self::Procedure;
  fn visit_block(&mut self, block: &Block) -> Self::Block;
  fn visit_statement(&mut self, statement: &Stmt) -> Self::Statement;
  fn visit_expression(&mut self, expression: &Expr) -> Self::Expression;
}

pub trait Accept {
  fn accept<V: Visitor>(&self, visitor: &mut V) -> <V as Visitor>::Program;
}

impl Accept for Program {
  fn accept<V: Visitor>(&self, visitor: &mut V) -> <V as Visitor>::Program {
    visitor.visit_program(self)
  }
}

/// Source position of a statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Location {
  pub line: u32,
}

impl Location {
  pub fn line(line: u32) -> Self {
    Location { line }
  }
}

impl fmt::Display for Location {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "line {}", self.line)
  }
}

/// Any node of the tree, for consumers that walk nodes generically.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
  Expr(Expr),
  Stmt(Stmt),
  Block(Block),
  Procedure(Procedure),
  /// Unordered bag of sibling nodes.
  Collection(Vec<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
  pub name: String,
  /// Source file the front end read, used in error locations.
  pub source: String,
  pub symbols: SymbolArena,
  pub globals: Scope,
  pub procedures: Vec<Procedure>,
}

impl Program {
  pub fn new(name: &str, source: &str) -> Self {
    Program {
      name: name.to_string(),
      source: source.to_string(),
      symbols: SymbolArena::new(),
      globals: Scope::new(),
      procedures: Vec::new(),
    }
  }

  pub fn scope_chain<'a>(&'a self, procedure: &'a Procedure) -> ScopeChain<'a> {
    ScopeChain {
      statement_functions: Some(&procedure.statement_functions),
      local: Some(&procedure.locals),
      global: &self.globals,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcedureKind {
  Program,
  Subroutine,
  Function,
}

impl fmt::Display for ProcedureKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ProcedureKind::Program => write!(f, "program"),
      ProcedureKind::Subroutine => write!(f, "subroutine"),
      ProcedureKind::Function => write!(f, "function"),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Procedure {
  pub symbol: SymbolId,
  pub kind: ProcedureKind,
  pub params: Vec<SymbolId>,
  pub locals: Scope,
  pub statement_functions: Scope,
  pub body: Block,
  /// DATA-style initial stores, emitted before the body.
  pub initializers: Vec<Initializer>,
  /// Wrap the body in a protected region with a default handler.
  pub traps_errors: bool,
}

impl Procedure {
  pub fn new(symbol: SymbolId, kind: ProcedureKind) -> Self {
    Procedure {
      symbol,
      kind,
      params: Vec::new(),
      locals: Scope::new(),
      statement_functions: Scope::new(),
      body: Block::default(),
      initializers: Vec::new(),
      traps_errors: false,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Initializer {
  pub target: Expr,
  pub value: Expr,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
  pub stmts: Vec<Stmt>,
}

impl FromIterator<Stmt> for Block {
  fn from_iter<I: IntoIterator<Item = Stmt>>(iter: I) -> Self {
    Block {
      stmts: iter.into_iter().collect(),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
  pub kind: StmtKind,
  pub loc: Location,
}

impl Stmt {
  pub fn new(kind: StmtKind, line: u32) -> Self {
    Stmt {
      kind,
      loc: Location::line(line),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
  /// Pairs are evaluated and stored left to right.
  Assign(Vec<Assignment>),
  If(Conditional),
  Switch(Switch),
  Loop(Loop),
  Goto(Goto),
  Return(Option<Expr>),
  Io(IoStatement),
  Call(Call),
  /// Definition site of a statement label.
  Label(SymbolId),
  Exit,
  Cycle,
  Block(Block),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
  pub target: Expr,
  pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conditional {
  pub arms: Vec<GuardedBlock>,
  pub otherwise: Option<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GuardedBlock {
  pub guard: Expr,
  pub body: Block,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Switch {
  pub subject: Expr,
  pub cases: Vec<SwitchCase>,
  pub default: Option<SymbolId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
  pub value: Expr,
  pub target: SymbolId,
}

/// Counter, bounds and optional step shared by counted loops and implied
/// iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopControl {
  pub var: SymbolId,
  pub start: Expr,
  pub end: Expr,
  pub step: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Loop {
  For { control: LoopControl, body: Block },
  While { guard: Expr, body: Block },
  /// Body first; repeats while the guard holds.
  Repeat { body: Block, guard: Expr },
  /// Iterates until an exit or goto leaves it.
  Endless { body: Block },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Goto {
  Direct(SymbolId),
  Computed {
    selector: Expr,
    labels: Vec<SymbolId>,
    one_based: bool,
  },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
  Read,
  Write,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IoStatement {
  pub direction: IoDirection,
  pub unit: Option<Expr>,
  pub format: Option<Expr>,
  pub items: Vec<IoItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IoItem {
  Value(Expr),
  Implied {
    control: LoopControl,
    items: Vec<IoItem>,
  },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
  pub kind: ExprKind,
  pub ty: Type,
  /// Present iff the expression is a compile-time constant.
  pub value: Option<Constant>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
  Number,
  String,
  Ident(IdentRef),
  Unary(UnaryOp, Box<Expr>),
  Binary(BinaryOp, Box<Expr>, Box<Expr>),
  Call(Call),
  /// Extra arguments of a variadic intrinsic or runtime call.
  VarArgs(Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentRef {
  pub symbol: SymbolId,
  pub indices: Vec<Expr>,
  pub substring: Option<Substring>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Substring {
  pub start: Option<Box<Expr>>,
  pub end: Option<Box<Expr>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
  /// Procedure defined in the same program.
  Internal,
  External,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
  pub symbol: SymbolId,
  pub kind: CallKind,
  pub args: Vec<Expr>,
  /// Caller labels selected by an alternate return, in order.
  pub alternate_returns: Vec<SymbolId>,
}

impl Call {
  /// Number of arguments `callee` must receive, when its interface is known.
  /// An external procedure declared without formals accepts any list.
  pub fn expected_arity(&self, callee: &Symbol) -> Option<usize> {
    match (self.kind, &callee.params) {
      (CallKind::Internal, Some(params)) => Some(params.len()),
      (CallKind::External, Some(params)) if !params.is_empty() => Some(params.len()),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Plus,
  Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Pow,
  Concat,
  Equal,
  NotEqual,
  LessThan,
  LessOrEqual,
  GreaterThan,
  GreaterOrEqual,
  And,
  Or,
  Xor,
  Eqv,
  Neqv,
  AndThen,
  OrThen,
}

impl BinaryOp {
  pub fn is_relational(self) -> bool {
    matches!(
      self,
      BinaryOp::Equal
        | BinaryOp::NotEqual
        | BinaryOp::LessThan
        | BinaryOp::LessOrEqual
        | BinaryOp::GreaterThan
        | BinaryOp::GreaterOrEqual
    )
  }

  pub fn is_logical(self) -> bool {
    matches!(
      self,
      BinaryOp::And
        | BinaryOp::Or
        | BinaryOp::Xor
        | BinaryOp::Eqv
        | BinaryOp::Neqv
        | BinaryOp::AndThen
        | BinaryOp::OrThen
    )
  }

  pub fn name(self) -> &'static str {
    match self {
      BinaryOp::Add => "add",
      BinaryOp::Sub => "sub",
      BinaryOp::Mul => "mul",
      BinaryOp::Div => "div",
      BinaryOp::Pow => "pow",
      BinaryOp::Concat => "concat",
      BinaryOp::Equal => "eq",
      BinaryOp::NotEqual => "ne",
      BinaryOp::LessThan => "lt",
      BinaryOp::LessOrEqual => "le",
      BinaryOp::GreaterThan => "gt",
      BinaryOp::GreaterOrEqual => "ge",
      BinaryOp::And => "and",
      BinaryOp::Or => "or",
      BinaryOp::Xor => "xor",
      BinaryOp::Eqv => "eqv",
      BinaryOp::Neqv => "neqv",
      BinaryOp::AndThen => "and-then",
      BinaryOp::OrThen => "or-then",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    const ALL: [BinaryOp; 19] = [
      BinaryOp::Add,
      BinaryOp::Sub,
      BinaryOp::Mul,
      BinaryOp::Div,
      BinaryOp::Pow,
      BinaryOp::Concat,
      BinaryOp::Equal,
      BinaryOp::NotEqual,
      BinaryOp::LessThan,
      BinaryOp::LessOrEqual,
      BinaryOp::GreaterThan,
      BinaryOp::GreaterOrEqual,
      BinaryOp::And,
      BinaryOp::Or,
      BinaryOp::Xor,
      BinaryOp::Eqv,
      BinaryOp::Neqv,
      BinaryOp::AndThen,
      BinaryOp::OrThen,
    ];
    ALL.into_iter().find(|op| op.name() == name)
  }
}

impl UnaryOp {
  pub fn name(self) -> &'static str {
    match self {
      UnaryOp::Neg => "neg",
      UnaryOp::Plus => "plus",
      UnaryOp::Not => "not",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    match name {
      "neg" => Some(UnaryOp::Neg),
      "plus" => Some(UnaryOp::Plus),
      "not" => Some(UnaryOp::Not),
      _ => None,
    }
  }
}

impl Expr {
  pub fn new(kind: ExprKind, ty: Type) -> Self {
    Expr {
      kind,
      ty,
      value: None,
    }
  }

  pub fn constant(value: Constant) -> Self {
    let (kind, ty) = match &value {
      Constant::Character(s) => (ExprKind::String, Type::FixedCharacter(s.chars().count() as u32)),
      other => (ExprKind::Number, other.natural_type()),
    };
    Expr {
      kind,
      ty,
      value: Some(value),
    }
  }

  pub fn integer(n: i64) -> Self {
    Expr::constant(Constant::Integer(n))
  }

  pub fn real(x: f32) -> Self {
    Expr::constant(Constant::Real(x))
  }

  pub fn double(x: f64) -> Self {
    Expr::constant(Constant::Double(x))
  }

  pub fn logical(b: bool) -> Self {
    Expr::constant(Constant::Logical(b))
  }

  pub fn string(s: &str) -> Self {
    Expr::constant(Constant::Character(s.to_string()))
  }

  pub fn ident(symbol: SymbolId, ty: Type) -> Self {
    Expr::new(
      ExprKind::Ident(IdentRef {
        symbol,
        indices: Vec::new(),
        substring: None,
      }),
      ty,
    )
  }

  pub fn indexed(symbol: SymbolId, ty: Type, indices: Vec<Expr>) -> Self {
    Expr::new(
      ExprKind::Ident(IdentRef {
        symbol,
        indices,
        substring: None,
      }),
      ty,
    )
  }

  pub fn substring(symbol: SymbolId, start: Option<Expr>, end: Option<Expr>) -> Self {
    Expr::new(
      ExprKind::Ident(IdentRef {
        symbol,
        indices: Vec::new(),
        substring: Some(Substring {
          start: start.map(Box::new),
          end: end.map(Box::new),
        }),
      }),
      Type::Character,
    )
  }

  pub fn unary(op: UnaryOp, operand: Expr, ty: Type) -> Self {
    Expr::new(ExprKind::Unary(op, Box::new(operand)), ty)
  }

  pub fn binary(op: BinaryOp, left: Expr, right: Expr, ty: Type) -> Self {
    Expr::new(ExprKind::Binary(op, Box::new(left), Box::new(right)), ty)
  }

  pub fn call(symbol: SymbolId, kind: CallKind, args: Vec<Expr>, ty: Type) -> Self {
    Expr::new(
      ExprKind::Call(Call {
        symbol,
        kind,
        args,
        alternate_returns: Vec::new(),
      }),
      ty,
    )
  }

  pub fn is_constant(&self) -> bool {
    self.value.is_some()
  }

  pub fn as_ident(&self) -> Option<&IdentRef> {
    match &self.kind {
      ExprKind::Ident(ident) => Some(ident),
      _ => None,
    }
  }
}
