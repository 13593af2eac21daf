//! Tree builders shared by the generator tests.

use super::{generate_code, GenOptions, Generation};
use crate::emitter::machine::{Image, Machine};
use crate::emitter::vm::Vm;
use crate::error::GenError;
use frontend::ast::{
  Assignment, Block, Call, CallKind, Expr, Goto, IoDirection, IoItem, IoStatement, Loop,
  LoopControl, Procedure, ProcedureKind, Program, Scope, Stmt, StmtKind, Symbol, SymbolClass,
  SymbolId, Type,
};

pub struct Builder {
  pub program: Program,
  locals: Vec<SymbolId>,
}

impl Builder {
  pub fn new() -> Self {
    Builder {
      program: Program::new("TEST", "test.f"),
      locals: Vec::new(),
    }
  }

  /// Adds a symbol that belongs to no procedure's local scope.
  pub fn add(&mut self, symbol: Symbol) -> SymbolId {
    self.program.symbols.add(symbol)
  }

  /// Adds a local of the next procedure defined.
  pub fn local(&mut self, symbol: Symbol) -> SymbolId {
    let id = self.add(symbol);
    self.locals.push(id);
    id
  }

  pub fn int_var(&mut self, name: &str) -> SymbolId {
    self.local(Symbol::variable(name, Type::Integer))
  }

  pub fn label(&mut self, name: &str) -> SymbolId {
    self.add(Symbol::label(name))
  }

  fn declare(&mut self, name: &str, ty: Type, class: SymbolClass, params: Vec<SymbolId>) -> SymbolId {
    let id = self.add(Symbol::procedure(name, ty, class, params));
    self.program.globals.insert(name, id);
    id
  }

  pub fn subroutine(&mut self, name: &str, params: Vec<SymbolId>) -> SymbolId {
    self.declare(name, Type::None, SymbolClass::Subroutine, params)
  }

  pub fn function(&mut self, name: &str, ty: Type, params: Vec<SymbolId>) -> SymbolId {
    self.declare(name, ty, SymbolClass::Function, params)
  }

  /// Gives a declared procedure its body and the locals added so far.
  pub fn define(&mut self, id: SymbolId, body: Vec<Stmt>) {
    let symbol = &self.program.symbols[id];
    let kind = match symbol.class {
      SymbolClass::Function => ProcedureKind::Function,
      _ => ProcedureKind::Subroutine,
    };
    let mut procedure = Procedure::new(id, kind);
    procedure.params = symbol.params.clone().unwrap_or_default();
    procedure.locals = self.take_locals();
    procedure.body = Block::from_iter(body);
    self.program.procedures.push(procedure);
  }

  /// The main program, holding the locals added so far.
  pub fn main(&mut self, body: Vec<Stmt>) {
    let id = self.declare("MAIN", Type::None, SymbolClass::Subroutine, Vec::new());
    let mut procedure = Procedure::new(id, ProcedureKind::Program);
    procedure.locals = self.take_locals();
    procedure.body = Block::from_iter(body);
    self.program.procedures.push(procedure);
  }

  fn take_locals(&mut self) -> Scope {
    let mut scope = Scope::new();
    for id in std::mem::take(&mut self.locals) {
      scope.insert(&self.program.symbols[id].name, id);
    }
    scope
  }
}

pub fn int(symbol: SymbolId) -> Expr {
  Expr::ident(symbol, Type::Integer)
}

/// A whole integer array.
pub fn array_arg(symbol: SymbolId) -> Expr {
  Expr::ident(symbol, Type::array_of(Type::Integer))
}

pub fn assign(symbol: SymbolId, value: Expr, line: u32) -> Stmt {
  let target = Expr::ident(symbol, value.ty.clone());
  assign_to(target, value, line)
}

pub fn assign_to(target: Expr, value: Expr, line: u32) -> Stmt {
  Stmt::new(StmtKind::Assign(vec![Assignment { target, value }]), line)
}

pub fn write(items: Vec<Expr>, line: u32) -> Stmt {
  Stmt::new(
    StmtKind::Io(IoStatement {
      direction: IoDirection::Write,
      unit: Some(Expr::integer(6)),
      format: None,
      items: items.into_iter().map(IoItem::Value).collect(),
    }),
    line,
  )
}

pub fn do_loop(control: LoopControl, body: Vec<Stmt>, line: u32) -> Stmt {
  Stmt::new(
    StmtKind::Loop(Loop::For {
      control,
      body: Block::from_iter(body),
    }),
    line,
  )
}

pub fn call(symbol: SymbolId, args: Vec<Expr>, line: u32) -> Stmt {
  Stmt::new(
    StmtKind::Call(Call {
      symbol,
      kind: CallKind::Internal,
      args,
      alternate_returns: Vec::new(),
    }),
    line,
  )
}

pub fn goto(target: SymbolId, line: u32) -> Stmt {
  Stmt::new(StmtKind::Goto(Goto::Direct(target)), line)
}

pub fn label(id: SymbolId, line: u32) -> Stmt {
  Stmt::new(StmtKind::Label(id), line)
}

pub fn compile(program: &Program) -> (Image, Generation) {
  let mut machine = Machine::new();
  let generation = generate_code(program, &mut machine, &GenOptions::default()).unwrap();
  (machine.into_image(), generation)
}

pub fn compile_err(program: &Program) -> GenError {
  let mut machine = Machine::new();
  let error = generate_code(program, &mut machine, &GenOptions::default()).unwrap_err();
  machine.discard_open();
  error
}

/// Compiles and runs `program`, returning the output records.
pub fn run(program: &Program) -> Vec<String> {
  let (image, _) = compile(program);
  let mut vm = Vm::new(&image);
  vm.run().unwrap();
  vm.output
}
