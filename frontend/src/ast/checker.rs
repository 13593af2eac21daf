use super::*;
use crate::diagnostics::{Diagnostics, SemanticError};

/// Verifies that a tree honours the contract the code generator relies on:
/// every symbol id resolves, every value-producing node has a resolved type,
/// arrays have dimensions and jump targets are defined labels.
pub struct Checker<'p> {
  program: &'p Program,
  diagnostics: Diagnostics,
  loc: Location,
}

impl<'p> Checker<'p> {
  pub fn check_program(program: &'p Program) -> Vec<SemanticError> {
    let mut checker = Checker::new(program);
    checker.visit_program(program);
    checker.diagnostics.into_vec()
  }

  pub fn new(program: &'p Program) -> Self {
    Checker {
      program,
      diagnostics: Diagnostics::new(),
      loc: Location::default(),
    }
  }

  fn contract(&mut self, message: String) {
    self.diagnostics.report(SemanticError::Contract {
      loc: self.loc,
      message,
    });
  }

  fn symbol(&mut self, id: SymbolId) -> Option<&'p Symbol> {
    let program = self.program;
    let symbol = program.symbols.get(id);
    if symbol.is_none() {
      self.contract(format!("symbol id {} is out of range", id));
    }
    symbol
  }

  fn label(&mut self, id: SymbolId) {
    let Some(symbol) = self.symbol(id) else {
      return;
    };
    if symbol.class != SymbolClass::Label {
      self.contract(format!("`{}` is not a label", symbol.name));
    } else if !symbol.modifiers.defined {
      self.diagnostics.report(SemanticError::UndefinedReference {
        loc: self.loc,
        name: symbol.name.clone(),
      });
    }
  }

  fn control(&mut self, control: &LoopControl) {
    self.symbol(control.var);
    self.visit_expression(&control.start);
    self.visit_expression(&control.end);
    if let Some(step) = &control.step {
      self.visit_expression(step);
    }
  }

  fn io_item(&mut self, item: &IoItem) {
    match item {
      IoItem::Value(expr) => self.visit_expression(expr),
      IoItem::Implied { control, items } => {
        self.control(control);
        for item in items {
          self.io_item(item);
        }
      }
    }
  }

  fn call(&mut self, call: &Call) {
    for arg in &call.args {
      self.visit_expression(arg);
    }
    for label in &call.alternate_returns {
      self.label(*label);
    }
    let Some(callee) = self.symbol(call.symbol) else {
      return;
    };
    if !callee.class.is_procedure() && callee.class != SymbolClass::Inline {
      self.contract(format!("`{}` is not callable", callee.name));
      return;
    }
    if let Some(expected) = call.expected_arity(callee) {
      if expected != call.args.len() {
        self.diagnostics.report(SemanticError::ArityMismatch {
          loc: self.loc,
          name: callee.name.clone(),
          expected,
          found: call.args.len(),
        });
      }
    }
  }

  fn operands(&mut self, op: BinaryOp, left: &Expr, right: &Expr) {
    let result = if op.is_logical() {
      promote_logical(&left.ty, &right.ty)
    } else if op == BinaryOp::Concat {
      match (left.ty.is_character(), right.ty.is_character()) {
        (true, true) => Ok(Type::Character),
        _ => Err(TypeMismatch {
          left: left.ty.clone(),
          right: right.ty.clone(),
        }),
      }
    } else if op.is_relational() && left.ty.is_logical() && right.ty.is_logical() {
      Ok(Type::Logical)
    } else {
      promote(&left.ty, &right.ty)
    };
    if let Err(mismatch) = result {
      self.diagnostics.report(SemanticError::TypeMismatch {
        loc: self.loc,
        mismatch,
      });
    }
  }
}

impl<'p> Visitor for Checker<'p> {
  type Program = ();
  type Procedure = ();
  type Block = ();
  type Statement = ();
  type Expression = ();

  fn visit_program(&mut self, program: &Program) {
    for (_, symbol) in program.symbols.iter() {
      if symbol.class == SymbolClass::Array && symbol.dims.is_empty() {
        self.contract(format!("array `{}` has no dimensions", symbol.name));
      }
      for member in &symbol.members {
        self.symbol(*member);
      }
    }
    for procedure in &program.procedures {
      self.visit_procedure(procedure);
    }
  }

  fn visit_procedure(&mut self, procedure: &Procedure) {
    self.loc = Location::default();
    if let Some(symbol) = self.symbol(procedure.symbol) {
      log::trace!("checking {} `{}`", procedure.kind, symbol.name);
    }
    for param in &procedure.params {
      self.symbol(*param);
    }
    for id in procedure.locals.ids().chain(procedure.statement_functions.ids()) {
      self.symbol(id);
    }
    for init in &procedure.initializers {
      self.visit_expression(&init.target);
      self.visit_expression(&init.value);
    }
    self.visit_block(&procedure.body);
  }

  fn visit_block(&mut self, block: &Block) {
    for stmt in &block.stmts {
      self.visit_statement(stmt);
    }
  }

  fn visit_statement(&mut self, statement: &Stmt) {
    self.loc = statement.loc;
    match &statement.kind {
      StmtKind::Assign(pairs) => {
        for pair in pairs {
          self.visit_expression(&pair.target);
          self.visit_expression(&pair.value);
          if !pair.value.ty.converts_to(&pair.target.ty) {
            self.diagnostics.report(SemanticError::TypeMismatch {
              loc: self.loc,
              mismatch: TypeMismatch {
                left: pair.target.ty.clone(),
                right: pair.value.ty.clone(),
              },
            });
          }
        }
      }
      StmtKind::If(conditional) => {
        for arm in &conditional.arms {
          self.visit_expression(&arm.guard);
          self.visit_block(&arm.body);
        }
        if let Some(otherwise) = &conditional.otherwise {
          self.visit_block(otherwise);
        }
      }
      StmtKind::Switch(switch) => {
        self.visit_expression(&switch.subject);
        for case in &switch.cases {
          self.visit_expression(&case.value);
          self.label(case.target);
        }
        if let Some(default) = switch.default {
          self.label(default);
        }
      }
      StmtKind::Loop(Loop::For { control, body }) => {
        self.control(control);
        self.visit_block(body);
      }
      StmtKind::Loop(Loop::While { guard, body }) | StmtKind::Loop(Loop::Repeat { body, guard }) => {
        self.visit_expression(guard);
        self.visit_block(body);
      }
      StmtKind::Loop(Loop::Endless { body }) | StmtKind::Block(body) => self.visit_block(body),
      StmtKind::Goto(Goto::Direct(label)) | StmtKind::Label(label) => self.label(*label),
      StmtKind::Goto(Goto::Computed {
        selector, labels, ..
      }) => {
        self.visit_expression(selector);
        for label in labels {
          self.label(*label);
        }
      }
      StmtKind::Return(value) => {
        if let Some(value) = value {
          self.visit_expression(value);
        }
      }
      StmtKind::Io(io) => {
        for expr in io.unit.iter().chain(io.format.iter()) {
          self.visit_expression(expr);
        }
        for item in &io.items {
          self.io_item(item);
        }
      }
      StmtKind::Call(call) => self.call(call),
      StmtKind::Exit | StmtKind::Cycle => {}
    }
  }

  fn visit_expression(&mut self, expression: &Expr) {
    let needs_type = !matches!(expression.kind, ExprKind::VarArgs(_) | ExprKind::Call(_));
    if needs_type && !expression.ty.is_resolved() {
      self.contract("expression has no resolved type".to_string());
    }
    match &expression.kind {
      ExprKind::Number | ExprKind::String => {
        if expression.value.is_none() {
          self.contract("literal without a value".to_string());
        }
      }
      ExprKind::Ident(ident) => {
        if let Some(symbol) = self.symbol(ident.symbol) {
          if !ident.indices.is_empty() && ident.indices.len() != symbol.dims.len() {
            self.contract(format!(
              "`{}` has {} dimension(s) but is indexed with {}",
              symbol.name,
              symbol.dims.len(),
              ident.indices.len()
            ));
          }
        }
        for index in &ident.indices {
          self.visit_expression(index);
        }
        if let Some(substring) = &ident.substring {
          for bound in substring.start.iter().chain(substring.end.iter()) {
            self.visit_expression(bound);
          }
        }
      }
      ExprKind::Unary(_, operand) => self.visit_expression(operand),
      ExprKind::Binary(op, left, right) => {
        self.visit_expression(left);
        self.visit_expression(right);
        self.operands(*op, left, right);
      }
      ExprKind::Call(call) => self.call(call),
      ExprKind::VarArgs(args) => {
        for arg in args {
          self.visit_expression(arg);
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn program_with(body: Vec<Stmt>, symbols: Vec<Symbol>) -> Program {
    let mut program = Program::new("T", "t.f");
    let main = program
      .symbols
      .add(Symbol::procedure("T", Type::None, SymbolClass::Subroutine, vec![]));
    for symbol in symbols {
      program.symbols.add(symbol);
    }
    let mut procedure = Procedure::new(main, ProcedureKind::Program);
    procedure.body = body.into_iter().collect();
    program.procedures.push(procedure);
    program
  }

  #[test]
  fn well_formed_program_passes() {
    let program = program_with(
      vec![Stmt::new(
        StmtKind::Assign(vec![Assignment {
          target: Expr::ident(SymbolId(1), Type::Real),
          value: Expr::integer(3),
        }]),
        1,
      )],
      vec![Symbol::variable("X", Type::Real)],
    );
    assert_eq!(Checker::check_program(&program), vec![]);
  }

  #[test]
  fn undefined_label_is_reported() {
    let mut label = Symbol::label("99");
    label.modifiers.defined = false;
    let program = program_with(
      vec![Stmt::new(StmtKind::Goto(Goto::Direct(SymbolId(1))), 7)],
      vec![label],
    );
    assert_eq!(
      Checker::check_program(&program),
      vec![SemanticError::UndefinedReference {
        loc: Location::line(7),
        name: "99".to_string(),
      }]
    );
  }

  #[test]
  fn contract_breaches_are_reported() {
    let program = program_with(
      vec![Stmt::new(
        StmtKind::Assign(vec![Assignment {
          target: Expr::ident(SymbolId(42), Type::Integer),
          value: Expr::new(ExprKind::Number, Type::None),
        }]),
        2,
      )],
      vec![Symbol::new("A", Type::Real, SymbolClass::Array, ScopeKind::Local)],
    );
    let errors = Checker::check_program(&program);
    assert_eq!(errors.len(), 5);
    assert!(errors
      .iter()
      .all(|e| matches!(e, SemanticError::Contract { .. } | SemanticError::TypeMismatch { .. })));
  }

  #[test]
  fn operand_mismatch_is_reported() {
    let program = program_with(
      vec![Stmt::new(
        StmtKind::Return(Some(Expr::binary(
          BinaryOp::Add,
          Expr::integer(1),
          Expr::logical(true),
          Type::Integer,
        ))),
        3,
      )],
      vec![],
    );
    assert_eq!(
      Checker::check_program(&program),
      vec![SemanticError::TypeMismatch {
        loc: Location::line(3),
        mismatch: TypeMismatch {
          left: Type::Integer,
          right: Type::Logical,
        },
      }]
    );
  }
}
