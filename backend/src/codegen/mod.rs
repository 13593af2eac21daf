//! Lowers a checked [`Program`] onto an [`Emitter`].
//!
//! The generator walks the tree with the frontend's `Visitor`. Statements
//! leave the evaluation stack as they found it; expressions push exactly one
//! value and report the type they pushed. User errors are collected in
//! [`Diagnostics`]; contract violations abort the unit.

mod arrays;
mod calls;
mod control;
mod expr;
mod io;
#[cfg(test)]
mod testing;

use crate::emitter::{Emitter, Label, LocalId, Place, Signature, TempHandle};
use crate::error::{ContractViolation, GenError};
use frontend::ast::{
  Accept, Block, Expr, Location, Procedure, ProcedureKind, Program, Stmt, StmtKind, Storage,
  Symbol, SymbolClass, SymbolId, Type, Visitor,
};
use frontend::diagnostics::{Diagnostics, SemanticError};
use std::collections::HashMap;
use std::fmt;

type GenResult<T> = Result<T, ContractViolation>;

#[derive(Debug, Clone, Default)]
pub struct GenOptions {
  /// Wrap every procedure body in a protected region, not only the ones
  /// flagged by the front end.
  pub trap_all: bool,
  /// Record the location of every statement the generator visits.
  pub trace: bool,
}

#[derive(Debug, Default)]
pub struct Generation {
  pub diagnostics: Diagnostics,
  pub trace: Vec<Location>,
}

/// Per-procedure progress. Each step may only advance to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProcState {
  Entry,
  LocalsEmitted,
  InitializersEmitted,
  BodyEmitted,
  ReturnMarked,
  Closed,
}

impl ProcState {
  fn next(self) -> Option<ProcState> {
    match self {
      ProcState::Entry => Some(ProcState::LocalsEmitted),
      ProcState::LocalsEmitted => Some(ProcState::InitializersEmitted),
      ProcState::InitializersEmitted => Some(ProcState::BodyEmitted),
      ProcState::BodyEmitted => Some(ProcState::ReturnMarked),
      ProcState::ReturnMarked => Some(ProcState::Closed),
      ProcState::Closed => None,
    }
  }

  pub fn advance(&mut self, to: ProcState) -> Result<(), ContractViolation> {
    if self.next() != Some(to) {
      return Err(ContractViolation::StateOutOfOrder {
        from: self.to_string(),
        to: to.to_string(),
      });
    }
    *self = to;
    Ok(())
  }
}

impl fmt::Display for ProcState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ProcState::Entry => "entry",
      ProcState::LocalsEmitted => "locals-emitted",
      ProcState::InitializersEmitted => "initializers-emitted",
      ProcState::BodyEmitted => "body-emitted",
      ProcState::ReturnMarked => "return-marked",
      ProcState::Closed => "closed",
    };
    write!(f, "{}", name)
  }
}

#[derive(Debug, Clone)]
enum Context {
  Loop { exit: Label, next: Label },
  Protected,
  /// Statement-function dummies bound to evaluated arguments.
  Inline { bindings: Vec<(SymbolId, TempHandle)> },
}

#[derive(Debug)]
struct ProcFrame {
  symbol: SymbolId,
  kind: ProcedureKind,
  state: ProcState,
  return_label: Label,
  result: Option<(LocalId, Type)>,
  locals: HashMap<SymbolId, LocalId>,
  labels: HashMap<SymbolId, Label>,
  bound_dims: Vec<SymbolId>,
}

pub struct CodeGenerator<'a, E: Emitter> {
  program: &'a Program,
  emitter: &'a mut E,
  options: &'a GenOptions,
  diagnostics: Diagnostics,
  contexts: Vec<Context>,
  frame: Option<ProcFrame>,
  loc: Location,
  trace: Vec<Location>,
}

/// Generates every procedure of `program`. On a contract violation the
/// emitter may hold a partial procedure, which the caller must discard.
pub fn generate_code<E: Emitter>(
  program: &Program,
  emitter: &mut E,
  options: &GenOptions,
) -> Result<Generation, GenError> {
  let mut generator = CodeGenerator::new(program, emitter, options);
  match program.accept(&mut generator) {
    Ok(()) => Ok(generator.finish()),
    Err(violation) => Err(GenError {
      violation,
      file: program.source.clone(),
      loc: generator.loc,
    }),
  }
}

impl<'a, E: Emitter> CodeGenerator<'a, E> {
  pub fn new(program: &'a Program, emitter: &'a mut E, options: &'a GenOptions) -> Self {
    CodeGenerator {
      program,
      emitter,
      options,
      diagnostics: Diagnostics::new(),
      contexts: Vec::new(),
      frame: None,
      loc: Location::default(),
      trace: Vec::new(),
    }
  }

  pub fn finish(self) -> Generation {
    Generation {
      diagnostics: self.diagnostics,
      trace: self.trace,
    }
  }

  fn symbol(&self, id: SymbolId) -> GenResult<&'a Symbol> {
    self
      .program
      .symbols
      .get(id)
      .ok_or(ContractViolation::UnknownSymbol(id))
  }

  fn frame(&mut self) -> GenResult<&mut ProcFrame> {
    self.frame.as_mut().ok_or(ContractViolation::NoProcedure)
  }

  fn report(&mut self, error: SemanticError) {
    self.diagnostics.report(error);
  }

  fn advance(&mut self, to: ProcState) -> GenResult<()> {
    let frame = self.frame()?;
    frame.state.advance(to)?;
    log::debug!("procedure {} is {}", frame.symbol, to);
    Ok(())
  }

  fn with_context<T>(
    &mut self,
    context: Context,
    f: impl FnOnce(&mut Self) -> GenResult<T>,
  ) -> GenResult<T> {
    self.contexts.push(context);
    let result = f(self);
    self.contexts.pop();
    result
  }

  fn innermost_loop(&self) -> Option<(Label, Label)> {
    self.contexts.iter().rev().find_map(|context| match context {
      Context::Loop { exit, next } => Some((*exit, *next)),
      _ => None,
    })
  }

  fn protected_depth(&self) -> usize {
    self
      .contexts
      .iter()
      .filter(|context| matches!(context, Context::Protected))
      .count()
  }

  fn bound_temp(&self, id: SymbolId) -> Option<TempHandle> {
    self.contexts.iter().rev().find_map(|context| match context {
      Context::Inline { bindings } => bindings
        .iter()
        .find(|(symbol, _)| *symbol == id)
        .map(|(_, handle)| *handle),
      _ => None,
    })
  }

  fn acquire(&mut self, ty: &Type) -> GenResult<TempHandle> {
    self.frame()?;
    Ok(self.emitter.acquire_temporary(ty))
  }

  fn release(&mut self, handle: TempHandle) -> GenResult<()> {
    self.emitter.release_temporary(handle)
  }

  fn label_for(&mut self, id: SymbolId) -> GenResult<Label> {
    if let Some(label) = self.frame()?.labels.get(&id) {
      return Ok(*label);
    }
    let label = self.emitter.create_label();
    self.frame()?.labels.insert(id, label);
    Ok(label)
  }

  /// Slot of a local scalar or array handle, declared on first use.
  fn local_slot(&mut self, id: SymbolId) -> GenResult<LocalId> {
    if let Some(local) = self.frame()?.locals.get(&id) {
      return Ok(*local);
    }
    let symbol = self.symbol(id)?;
    let local = self.emitter.declare_local(&symbol.name, &symbol.value_type());
    self.frame()?.locals.insert(id, local);
    Ok(local)
  }

  fn static_name(&self, id: SymbolId, symbol: &Symbol) -> GenResult<String> {
    if let Some(block) = symbol.common {
      let block = self.symbol(block)?;
      return Ok(match block.members.iter().position(|member| *member == id) {
        Some(position) => format!("{}.{}", block.name, position),
        None => format!("{}.{}", block.name, symbol.name),
      });
    }
    if symbol.scope == frontend::ast::ScopeKind::Global {
      return Ok(symbol.name.clone());
    }
    Ok(format!("{}.{}", symbol.name, id))
  }

  /// The function-result slot when `id` names the function being generated.
  fn result_slot(&self, id: SymbolId) -> Option<LocalId> {
    let frame = self.frame.as_ref()?;
    match (&frame.result, frame.kind) {
      (Some((local, _)), ProcedureKind::Function) if frame.symbol == id => Some(*local),
      _ => None,
    }
  }

  /// Storage for a scalar, or for the handle of an array.
  fn place_of(&mut self, id: SymbolId) -> GenResult<Place> {
    if let Some(handle) = self.bound_temp(id) {
      return Ok(Place::Temp(handle));
    }
    if let Some(local) = self.result_slot(id) {
      return Ok(Place::Local(local));
    }
    let symbol = self.symbol(id)?;
    match symbol.storage() {
      Storage::Local => Ok(Place::Local(self.local_slot(id)?)),
      Storage::Parameter(index) => Ok(Place::Param(index)),
      Storage::Static => Ok(Place::Static(self.static_name(id, symbol)?)),
      Storage::Constant | Storage::Label | Storage::Inline | Storage::Procedure => {
        Err(ContractViolation::NotAValue(symbol.name.clone()))
      }
    }
  }

  fn declare_statics(&mut self) -> GenResult<()> {
    let program = self.program;
    for (id, symbol) in program.symbols.iter() {
      if symbol.storage() != Storage::Static || symbol.class == SymbolClass::CommonBlock {
        continue;
      }
      let size = if symbol.is_array() {
        let size = symbol
          .constant_size()
          .ok_or_else(|| ContractViolation::UnknownArraySize(symbol.name.clone()))?;
        Some(size.max(0) as usize)
      } else {
        None
      };
      let name = self.static_name(id, symbol)?;
      self.emitter.declare_static(&name, &symbol.value_type(), size);
    }
    Ok(())
  }

  fn signature(&self, procedure: &Procedure, symbol: &Symbol) -> GenResult<Signature> {
    let mut params = Vec::with_capacity(procedure.params.len());
    for id in &procedure.params {
      params.push(calls::formal_type(self.symbol(*id)?));
    }
    Ok(Signature {
      name: symbol.name.clone(),
      params,
      result: calls::result_type(symbol),
      entry: procedure.kind == ProcedureKind::Program,
    })
  }

  /// Begins `procedure` on the emitter and emits everything up to its body.
  fn open_procedure(&mut self, procedure: &Procedure) -> GenResult<()> {
    let symbol = self.symbol(procedure.symbol)?;
    let signature = self.signature(procedure, symbol)?;
    let result = signature.result.clone();
    self.emitter.begin_procedure(signature)?;

    let return_label = self.emitter.create_label();
    let result = match result {
      Type::None => None,
      ty => Some((self.emitter.declare_local(&symbol.name, &ty), ty)),
    };
    self.frame = Some(ProcFrame {
      symbol: procedure.symbol,
      kind: procedure.kind,
      state: ProcState::Entry,
      return_label,
      result,
      locals: HashMap::new(),
      labels: HashMap::new(),
      bound_dims: Vec::new(),
    });
    self.emit_prologue(procedure)
  }

  fn emit_prologue(&mut self, procedure: &Procedure) -> GenResult<()> {
    if let Some((local, Type::Integer)) = self.frame()?.result.clone() {
      if procedure.kind == ProcedureKind::Subroutine {
        // Alternate-return selector: 0 falls through at the call site.
        self
          .emitter
          .load_constant(&frontend::ast::Constant::Integer(0));
        self.emitter.store(&Place::Local(local));
      }
    }

    let mut arrays = Vec::new();
    for id in procedure.locals.ids() {
      let symbol = self.symbol(id)?;
      if symbol.storage() != Storage::Local || id == procedure.symbol {
        continue;
      }
      self.local_slot(id)?;
      if symbol.is_array() {
        arrays.push(id);
      }
    }
    for id in procedure.params.iter().copied().chain(arrays.iter().copied()) {
      if self.symbol(id)?.is_array() {
        self.bind_dimensions(id)?;
      }
    }
    for id in arrays {
      self.create_local_array(id)?;
    }
    self.advance(ProcState::LocalsEmitted)?;

    for initializer in &procedure.initializers {
      self.gen_assignment(&initializer.target, &initializer.value)?;
    }
    self.advance(ProcState::InitializersEmitted)
  }

  fn emit_epilogue(&mut self) -> GenResult<()> {
    let return_label = self.frame()?.return_label;
    self.emitter.mark_label(return_label)?;
    self.advance(ProcState::ReturnMarked)?;
    if let Some((local, _)) = self.frame()?.result.clone() {
      self.emitter.load(&Place::Local(local));
    }
    self.emitter.ret();

    self.release_leaked_temporaries()?;
    let bound = std::mem::take(&mut self.frame()?.bound_dims);
    for id in bound {
      for dim in &self.symbol(id)?.dims {
        dim.unbind();
      }
    }
    self.emitter.end_procedure()?;
    self.advance(ProcState::Closed)
  }

  /// Pool balance check: frees what the procedure failed to release and
  /// returns how many there were.
  fn release_leaked_temporaries(&mut self) -> GenResult<usize> {
    if self.emitter.outstanding_temporaries() == 0 {
      return Ok(0);
    }
    let leaked = self.emitter.live_temporaries();
    for (handle, ty) in &leaked {
      log::warn!("temporary {} ({}) still live at procedure close", handle, ty);
      self.emitter.release_temporary(*handle)?;
    }
    Ok(leaked.len())
  }

  /// Name of the first undefined label or procedure the statement refers
  /// to outside of its nested blocks.
  fn undefined_reference(&self, stmt: &Stmt) -> GenResult<Option<String>> {
    let mut labels = Vec::new();
    let mut exprs: Vec<&Expr> = Vec::new();
    match &stmt.kind {
      StmtKind::Assign(pairs) => {
        for pair in pairs {
          exprs.push(&pair.target);
          exprs.push(&pair.value);
        }
      }
      StmtKind::If(conditional) => exprs.extend(conditional.arms.iter().map(|arm| &arm.guard)),
      StmtKind::Switch(switch) => {
        exprs.push(&switch.subject);
        for case in &switch.cases {
          exprs.push(&case.value);
          labels.push(case.target);
        }
        labels.extend(switch.default);
      }
      StmtKind::Loop(frontend::ast::Loop::For { control, .. }) => {
        exprs.extend([&control.start, &control.end]);
        exprs.extend(control.step.as_ref());
      }
      StmtKind::Loop(frontend::ast::Loop::While { guard, .. })
      | StmtKind::Loop(frontend::ast::Loop::Repeat { guard, .. }) => exprs.push(guard),
      StmtKind::Loop(frontend::ast::Loop::Endless { .. }) => {}
      StmtKind::Goto(frontend::ast::Goto::Direct(label)) => labels.push(*label),
      StmtKind::Goto(frontend::ast::Goto::Computed {
        selector, labels: targets, ..
      }) => {
        exprs.push(selector);
        labels.extend(targets);
      }
      StmtKind::Return(value) => exprs.extend(value.as_ref()),
      StmtKind::Io(statement) => {
        exprs.extend(statement.unit.as_ref());
        exprs.extend(statement.format.as_ref());
        io::collect_item_exprs(&statement.items, &mut exprs);
      }
      StmtKind::Call(call) => {
        labels.extend(&call.alternate_returns);
        if let Some(name) = self.undefined_callee(call)? {
          return Ok(Some(name));
        }
        exprs.extend(&call.args);
      }
      StmtKind::Label(_) | StmtKind::Exit | StmtKind::Cycle | StmtKind::Block(_) => {}
    }
    for id in labels {
      let symbol = self.symbol(id)?;
      if !symbol.modifiers.defined {
        return Ok(Some(symbol.name.clone()));
      }
    }
    for expr in exprs {
      if let Some(name) = self.undefined_in_expr(expr)? {
        return Ok(Some(name));
      }
    }
    Ok(None)
  }

  fn undefined_callee(&self, call: &frontend::ast::Call) -> GenResult<Option<String>> {
    let symbol = self.symbol(call.symbol)?;
    let defined = match symbol.class {
      SymbolClass::Inline => symbol.body.is_some(),
      _ => symbol.modifiers.defined,
    };
    if call.kind == frontend::ast::CallKind::Internal && !defined {
      return Ok(Some(symbol.name.clone()));
    }
    Ok(None)
  }

  fn undefined_in_expr(&self, expr: &Expr) -> GenResult<Option<String>> {
    use frontend::ast::ExprKind;
    match &expr.kind {
      ExprKind::Number | ExprKind::String => Ok(None),
      ExprKind::Ident(ident) => {
        for index in &ident.indices {
          if let Some(name) = self.undefined_in_expr(index)? {
            return Ok(Some(name));
          }
        }
        Ok(None)
      }
      ExprKind::Unary(_, operand) => self.undefined_in_expr(operand),
      ExprKind::Binary(_, left, right) => match self.undefined_in_expr(left)? {
        Some(name) => Ok(Some(name)),
        None => self.undefined_in_expr(right),
      },
      ExprKind::Call(call) => {
        if let Some(name) = self.undefined_callee(call)? {
          return Ok(Some(name));
        }
        for arg in &call.args {
          if let Some(name) = self.undefined_in_expr(arg)? {
            return Ok(Some(name));
          }
        }
        Ok(None)
      }
      ExprKind::VarArgs(items) => {
        for item in items {
          if let Some(name) = self.undefined_in_expr(item)? {
            return Ok(Some(name));
          }
        }
        Ok(None)
      }
    }
  }
}

impl<'a, E: Emitter> Visitor for CodeGenerator<'a, E> {
  type Program = GenResult<()>;
  type Procedure = GenResult<()>;
  type Block = GenResult<()>;
  type Statement = GenResult<()>;
  /// The type of the value left on the stack.
  type Expression = GenResult<Type>;

  fn visit_program(&mut self, program: &Program) -> GenResult<()> {
    log::debug!(
      "generating `{}`: {} procedure(s)",
      program.name,
      program.procedures.len()
    );
    self.declare_statics()?;
    for procedure in &program.procedures {
      self.visit_procedure(procedure)?;
    }
    Ok(())
  }

  fn visit_procedure(&mut self, procedure: &Procedure) -> GenResult<()> {
    self.open_procedure(procedure)?;

    if procedure.traps_errors || self.options.trap_all {
      let handler = self.emitter.create_label();
      self.emitter.begin_protected(handler);
      self.with_context(Context::Protected, |g| g.visit_block(&procedure.body))?;
      self.emitter.end_protected();
      let return_label = self.frame()?.return_label;
      self.emitter.branch(return_label);
      self.emitter.begin_handler(handler)?;
      self.emitter.call("__report_error", &[Type::Character], &Type::None);
    } else {
      self.visit_block(&procedure.body)?;
    }
    self.advance(ProcState::BodyEmitted)?;

    self.emit_epilogue()?;
    self.frame = None;
    Ok(())
  }

  fn visit_block(&mut self, block: &Block) -> GenResult<()> {
    for stmt in &block.stmts {
      self.visit_statement(stmt)?;
    }
    Ok(())
  }

  fn visit_statement(&mut self, stmt: &Stmt) -> GenResult<()> {
    self.loc = stmt.loc;
    if self.options.trace {
      self.trace.push(stmt.loc);
    }
    log::trace!("{}: {:?}", stmt.loc, std::mem::discriminant(&stmt.kind));

    if let Some(name) = self.undefined_reference(stmt)? {
      self.report(SemanticError::UndefinedReference { loc: stmt.loc, name });
      return Ok(());
    }

    match &stmt.kind {
      StmtKind::Assign(pairs) => {
        for pair in pairs {
          self.gen_assignment(&pair.target, &pair.value)?;
        }
        Ok(())
      }
      StmtKind::If(conditional) => self.gen_conditional(conditional),
      StmtKind::Switch(switch) => self.gen_switch(switch),
      StmtKind::Loop(looping) => self.gen_loop(looping),
      StmtKind::Goto(goto) => self.gen_goto(goto),
      StmtKind::Return(value) => self.gen_return(value.as_ref()),
      StmtKind::Io(statement) => self.gen_io(statement),
      StmtKind::Call(call) => self.gen_call_statement(call),
      StmtKind::Label(id) => {
        let label = self.label_for(*id)?;
        self.emitter.mark_label(label)
      }
      StmtKind::Exit => {
        let (exit, _) = self
          .innermost_loop()
          .ok_or(ContractViolation::OutsideLoop("exit"))?;
        self.emitter.branch(exit);
        Ok(())
      }
      StmtKind::Cycle => {
        let (_, next) = self
          .innermost_loop()
          .ok_or(ContractViolation::OutsideLoop("cycle"))?;
        self.emitter.branch(next);
        Ok(())
      }
      StmtKind::Block(block) => self.visit_block(block),
    }
  }

  fn visit_expression(&mut self, expr: &Expr) -> GenResult<Type> {
    self.gen_value(expr)
  }
}

#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;
  use crate::emitter::machine::{Instruction, Machine};
  use frontend::ast::{Conditional, Constant, GuardedBlock, StmtKind};
  use pretty_assertions::assert_eq;

  #[test]
  fn procedure_states_advance_in_order() {
    let mut state = ProcState::Entry;
    state.advance(ProcState::LocalsEmitted).unwrap();
    assert_eq!(
      state.advance(ProcState::BodyEmitted),
      Err(ContractViolation::StateOutOfOrder {
        from: "locals-emitted".to_string(),
        to: "body-emitted".to_string(),
      })
    );
    for next in [
      ProcState::InitializersEmitted,
      ProcState::BodyEmitted,
      ProcState::ReturnMarked,
      ProcState::Closed,
    ] {
      state.advance(next).unwrap();
    }
    assert!(state.advance(ProcState::Entry).is_err());
  }

  #[test]
  fn leaked_temporaries_are_released_at_close() {
    let mut b = Builder::new();
    b.main(vec![]);
    let options = GenOptions::default();
    let mut machine = Machine::new();
    let mut generator = CodeGenerator::new(&b.program, &mut machine, &options);
    generator.open_procedure(&b.program.procedures[0]).unwrap();
    let kept = generator.acquire(&Type::Integer).unwrap();
    let returned = generator.acquire(&Type::Real).unwrap();
    generator.release(returned).unwrap();
    assert_eq!(generator.emitter.outstanding_temporaries(), 1);
    assert_eq!(generator.emitter.live_temporaries(), vec![(kept, Type::Integer)]);

    assert_eq!(generator.release_leaked_temporaries(), Ok(1));
    assert_eq!(generator.emitter.outstanding_temporaries(), 0);
    assert_eq!(
      generator.release(kept),
      Err(ContractViolation::DoubleRelease(kept))
    );
    generator.advance(ProcState::BodyEmitted).unwrap();
    generator.emit_epilogue().unwrap();
    assert_eq!(machine.image().procedures.len(), 1);
  }

  #[test]
  fn conditional_skips_false_guards_and_stops_at_true_ones() {
    let mut b = Builder::new();
    let x = b.int_var("X");
    let arm = |guard: bool, value: i64, line: u32| GuardedBlock {
      guard: Expr::logical(guard),
      body: Block::from_iter([assign(x, Expr::integer(value), line)]),
    };
    let conditional = Stmt::new(
      StmtKind::If(Conditional {
        arms: vec![arm(false, 1, 10), arm(true, 2, 20), arm(true, 3, 30)],
        otherwise: Some(Block::from_iter([assign(x, Expr::integer(4), 40)])),
      }),
      1,
    );
    b.main(vec![conditional]);

    let options = GenOptions {
      trace: true,
      ..GenOptions::default()
    };
    let mut machine = Machine::new();
    let generation = generate_code(&b.program, &mut machine, &options).unwrap();
    assert_eq!(
      generation.trace,
      vec![Location::line(1), Location::line(20)]
    );

    let image = machine.into_image();
    let main = image.entry().unwrap();
    let body: Vec<&Instruction> = main
      .code
      .iter()
      .filter(|instruction| !matches!(instruction, Instruction::Return))
      .collect();
    assert_eq!(
      body,
      vec![
        &Instruction::Const(Constant::Integer(2)),
        &Instruction::Store(Place::Local(LocalId(0))),
        // shared exit, then the return label
        &Instruction::Label(Label(1)),
        &Instruction::Label(Label(0)),
      ]
    );
  }

  #[test]
  fn undefined_labels_are_reported_and_skipped() {
    let mut b = Builder::new();
    let mut missing = frontend::ast::Symbol::label("99");
    missing.modifiers.defined = false;
    let missing = b.add(missing);
    b.main(vec![Stmt::new(
      StmtKind::Goto(frontend::ast::Goto::Direct(missing)),
      7,
    )]);
    let (_, generation) = compile(&b.program);
    assert_eq!(
      generation.diagnostics.into_vec(),
      vec![SemanticError::UndefinedReference {
        loc: Location::line(7),
        name: "99".to_string(),
      }]
    );
  }

  #[test]
  fn exit_outside_a_loop_aborts_with_location() {
    let mut b = Builder::new();
    b.main(vec![Stmt::new(StmtKind::Exit, 12)]);
    let mut machine = Machine::new();
    let error = generate_code(&b.program, &mut machine, &GenOptions::default()).unwrap_err();
    assert_eq!(error.violation, ContractViolation::OutsideLoop("exit"));
    assert_eq!(error.loc, Location::line(12));
    assert_eq!(error.to_string(), "test.f:12: `exit` used outside of a loop");
    machine.discard_open();
  }

  #[test]
  fn trapping_procedures_report_failures_and_still_return() {
    let mut b = Builder::new();
    let x = b.int_var("X");
    b.main(vec![
      assign(
        x,
        Expr::binary(
          frontend::ast::BinaryOp::Div,
          Expr::integer(1),
          Expr::ident(x, Type::Integer),
          Type::Integer,
        ),
        1,
      ),
      write(vec![Expr::string("unreached")], 2),
    ]);
    let options = GenOptions {
      trap_all: true,
      ..GenOptions::default()
    };
    let mut machine = Machine::new();
    generate_code(&b.program, &mut machine, &options).unwrap();
    let image = machine.into_image();
    let mut vm = crate::emitter::vm::Vm::new(&image);
    vm.run().unwrap();
    assert!(vm.output.is_empty());
    assert_eq!(vm.errors, vec!["division by zero".to_string()]);
  }
}
