use super::{CodeGenerator, Context, GenResult};
use crate::emitter::{ArithOp, Condition, Emitter, Place, TempHandle};
use crate::error::ContractViolation;
use frontend::ast::{
  Conditional, Constant, Expr, Goto, Loop, LoopControl, Switch, Type, Visitor,
};

/// Iterations of a counted loop with constant bounds:
/// `max(0, (end - start + step) / step)`, truncated. A zero step never
/// iterates. `None` when the count cannot be folded.
pub(super) fn trip_count(start: &Constant, end: &Constant, step: &Constant, ty: &Type) -> Option<i64> {
  if *ty == Type::Integer {
    let start = start.convert(ty)?.as_integer()?;
    let end = end.convert(ty)?.as_integer()?;
    let step = step.convert(ty)?.as_integer()?;
    if step == 0 {
      log::warn!("counted loop with a zero step never runs");
      return Some(0);
    }
    let (start, end, step) = (i128::from(start), i128::from(end), i128::from(step));
    // Counts past the integer range are left to the run-time computation.
    return i64::try_from(((end - start + step) / step).max(0)).ok();
  }
  let double = |c: &Constant| match c.convert(&Type::Double)? {
    Constant::Double(x) => Some(x),
    _ => None,
  };
  let (start, end, step) = (double(start)?, double(end)?, double(step)?);
  if step == 0.0 {
    log::warn!("counted loop with a zero step never runs");
    return Some(0);
  }
  Some((((end - start + step) / step).trunc() as i64).max(0))
}

/// A loop bound: folded, or evaluated once into a temporary.
enum Bound {
  Fixed(Constant),
  Held(TempHandle),
}

impl<'a, E: Emitter> CodeGenerator<'a, E> {
  pub(super) fn gen_conditional(&mut self, conditional: &Conditional) -> GenResult<()> {
    let exit = self.emitter.create_label();
    let mut settled = false;
    for arm in &conditional.arms {
      match arm.guard.value.as_ref().and_then(Constant::as_logical) {
        Some(false) => continue,
        Some(true) => {
          self.visit_block(&arm.body)?;
          settled = true;
          break;
        }
        None => {
          let next = self.emitter.create_label();
          self.gen_expr(&arm.guard, &Type::Logical)?;
          self.emitter.branch_if(Condition::False, &Type::Logical, next);
          self.visit_block(&arm.body)?;
          self.emitter.branch(exit);
          self.emitter.mark_label(next)?;
        }
      }
    }
    if !settled {
      if let Some(otherwise) = &conditional.otherwise {
        self.visit_block(otherwise)?;
      }
    }
    self.emitter.mark_label(exit)
  }

  /// Multi-way branch on a subject evaluated once.
  pub(super) fn gen_switch(&mut self, switch: &Switch) -> GenResult<()> {
    let ty = self.gen_value(&switch.subject)?;
    let subject = self.acquire(&ty)?;
    self.emitter.store(&Place::Temp(subject));
    for case in &switch.cases {
      let target = self.label_for(case.target)?;
      self.emitter.load(&Place::Temp(subject));
      self.gen_expr(&case.value, &ty)?;
      if ty.is_character() {
        self.emitter.compare3();
        self.emitter.load_constant(&Constant::Integer(0));
        self.emitter.branch_if(Condition::Equal, &Type::Integer, target);
      } else {
        self.emitter.branch_if(Condition::Equal, &ty, target);
      }
    }
    self.release(subject)?;
    if let Some(default) = switch.default {
      let target = self.label_for(default)?;
      self.emitter.branch(target);
    }
    Ok(())
  }

  pub(super) fn gen_loop(&mut self, looping: &Loop) -> GenResult<()> {
    match looping {
      Loop::For { control, body } => {
        self.gen_counted_loop(control, &mut |g| g.visit_block(body))
      }
      Loop::While { guard, body } => {
        let always = guard.value.as_ref().and_then(Constant::as_logical);
        if always == Some(false) {
          return Ok(());
        }
        let top = self.emitter.create_label();
        let exit = self.emitter.create_label();
        self.emitter.mark_label(top)?;
        if always.is_none() {
          self.gen_expr(guard, &Type::Logical)?;
          self.emitter.branch_if(Condition::False, &Type::Logical, exit);
        }
        self.with_context(Context::Loop { exit, next: top }, |g| g.visit_block(body))?;
        self.emitter.branch(top);
        self.emitter.mark_label(exit)
      }
      Loop::Repeat { body, guard } => {
        let top = self.emitter.create_label();
        let next = self.emitter.create_label();
        let exit = self.emitter.create_label();
        self.emitter.mark_label(top)?;
        self.with_context(Context::Loop { exit, next }, |g| g.visit_block(body))?;
        self.emitter.mark_label(next)?;
        match guard.value.as_ref().and_then(Constant::as_logical) {
          Some(true) => self.emitter.branch(top),
          Some(false) => {}
          None => {
            self.gen_expr(guard, &Type::Logical)?;
            self.emitter.branch_if(Condition::True, &Type::Logical, top);
          }
        }
        self.emitter.mark_label(exit)
      }
      Loop::Endless { body } => {
        let top = self.emitter.create_label();
        let exit = self.emitter.create_label();
        self.emitter.mark_label(top)?;
        self.with_context(Context::Loop { exit, next: top }, |g| g.visit_block(body))?;
        self.emitter.branch(top);
        self.emitter.mark_label(exit)
      }
    }
  }

  fn hold_bound(&mut self, expr: &Expr, ty: &Type) -> GenResult<Bound> {
    if let Some(value) = expr.value.as_ref().and_then(|value| value.convert(ty)) {
      return Ok(Bound::Fixed(value));
    }
    self.gen_expr(expr, ty)?;
    let temp = self.acquire(ty)?;
    self.emitter.store(&Place::Temp(temp));
    Ok(Bound::Held(temp))
  }

  fn push_bound(&mut self, bound: &Bound) {
    match bound {
      Bound::Fixed(value) => self.emitter.load_constant(value),
      Bound::Held(temp) => self.emitter.load(&Place::Temp(*temp)),
    }
  }

  /// Counted iteration shared by DO loops and implied I/O lists. The
  /// bounds are evaluated once; the trip count is fixed before the first
  /// iteration and the variable keeps its last incremented value.
  pub(super) fn gen_counted_loop(
    &mut self,
    control: &LoopControl,
    body: &mut dyn FnMut(&mut Self) -> GenResult<()>,
  ) -> GenResult<()> {
    let ty = self.symbol(control.var)?.ty.clone();
    if !ty.is_arithmetic() {
      return Err(ContractViolation::UnresolvedType(ty));
    }
    let one = Expr::integer(1);
    let step = control.step.as_ref().unwrap_or(&one);

    let start = self.hold_bound(&control.start, &ty)?;
    let end = self.hold_bound(&control.end, &ty)?;
    let step = self.hold_bound(step, &ty)?;
    let folded = match (&start, &end, &step) {
      (Bound::Fixed(s), Bound::Fixed(e), Bound::Fixed(st)) => trip_count(s, e, st, &ty),
      _ => None,
    };

    self.store_scalar(control.var, &mut |g| {
      g.push_bound(&start);
      Ok(())
    })?;

    if folded != Some(0) {
      let count = self.acquire(&Type::Integer)?;
      match folded {
        Some(n) => self.emitter.load_constant(&Constant::Integer(n)),
        None => {
          self.push_bound(&end);
          self.push_bound(&start);
          self.emitter.arith(ArithOp::Sub, &ty);
          self.push_bound(&step);
          self.emitter.arith(ArithOp::Add, &ty);
          self.push_bound(&step);
          self.emitter.arith(ArithOp::Div, &ty);
          self.coerce(&ty, &Type::Integer);
        }
      }
      self.emitter.store(&Place::Temp(count));

      let top = self.emitter.create_label();
      let next = self.emitter.create_label();
      let exit = self.emitter.create_label();
      if folded.is_none() {
        self.emitter.load(&Place::Temp(count));
        self.emitter.load_constant(&Constant::Integer(0));
        self.emitter.branch_if(Condition::LessOrEqual, &Type::Integer, exit);
      }
      self.emitter.mark_label(top)?;
      self.with_context(Context::Loop { exit, next }, |g| body(g))?;
      self.emitter.mark_label(next)?;

      let var = control.var;
      self.store_scalar(var, &mut |g| {
        g.load_scalar(var)?;
        g.push_bound(&step);
        g.emitter.arith(ArithOp::Add, &ty);
        Ok(())
      })?;
      self.emitter.load(&Place::Temp(count));
      self.emitter.load_constant(&Constant::Integer(1));
      self.emitter.arith(ArithOp::Sub, &Type::Integer);
      self.emitter.duplicate();
      self.emitter.store(&Place::Temp(count));
      self.emitter.load_constant(&Constant::Integer(0));
      self.emitter.branch_if(Condition::Greater, &Type::Integer, top);
      self.emitter.mark_label(exit)?;
      self.release(count)?;
    }

    for bound in [start, end, step] {
      if let Bound::Held(temp) = bound {
        self.release(temp)?;
      }
    }
    Ok(())
  }

  pub(super) fn gen_goto(&mut self, goto: &Goto) -> GenResult<()> {
    match goto {
      Goto::Direct(target) => {
        let label = self.label_for(*target)?;
        self.emitter.branch(label);
      }
      Goto::Computed {
        selector,
        labels,
        one_based,
      } => {
        let mut targets = Vec::with_capacity(labels.len());
        for id in labels {
          targets.push(self.label_for(*id)?);
        }
        self.gen_expr(selector, &Type::Integer)?;
        if *one_based {
          self.emitter.load_constant(&Constant::Integer(1));
          self.emitter.arith(ArithOp::Sub, &Type::Integer);
        }
        // Out-of-range selectors fall through.
        self.emitter.dispatch_table(&targets);
      }
    }
    Ok(())
  }

  /// Stores the value, if any, then leaves every open protected region on
  /// the way to the shared return label.
  pub(super) fn gen_return(&mut self, value: Option<&Expr>) -> GenResult<()> {
    if let Some(value) = value {
      match self.frame()?.result.clone() {
        Some((local, ty)) => {
          self.gen_expr(value, &ty)?;
          self.emitter.store(&Place::Local(local));
        }
        None => {
          let id = self.frame()?.symbol;
          return Err(ContractViolation::NotAssignable(self.symbol(id)?.name.clone()));
        }
      }
    }
    for _ in 0..self.protected_depth() {
      self.emitter.end_protected();
    }
    let label = self.frame()?.return_label;
    self.emitter.branch(label);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::*;
  use super::trip_count;
  use frontend::ast::{
    BinaryOp, Constant, Expr, Goto, Loop, LoopControl, Stmt, StmtKind, Switch, SwitchCase,
    Symbol, Type,
  };
  use pretty_assertions::assert_eq;

  fn add(left: Expr, right: Expr) -> Expr {
    Expr::binary(BinaryOp::Add, left, right, Type::Integer)
  }

  fn counted(var: frontend::ast::SymbolId, start: Expr, end: Expr, step: Option<Expr>) -> LoopControl {
    LoopControl {
      var,
      start,
      end,
      step,
    }
  }

  #[test]
  fn trip_counts_truncate_and_never_go_negative() {
    let int = |n| Constant::Integer(n);
    assert_eq!(trip_count(&int(1), &int(10), &int(1), &Type::Integer), Some(10));
    assert_eq!(trip_count(&int(10), &int(1), &int(1), &Type::Integer), Some(0));
    assert_eq!(trip_count(&int(1), &int(10), &int(4), &Type::Integer), Some(3));
    assert_eq!(trip_count(&int(10), &int(1), &int(-3), &Type::Integer), Some(4));
    assert_eq!(trip_count(&int(1), &int(5), &int(0), &Type::Integer), Some(0));
    assert_eq!(
      trip_count(
        &Constant::Real(1.0),
        &Constant::Real(2.0),
        &Constant::Real(0.5),
        &Type::Real
      ),
      Some(3)
    );
  }

  #[test]
  fn trip_counts_near_the_integer_limits_do_not_overflow() {
    let int = |n| Constant::Integer(n);
    assert_eq!(
      trip_count(&int(i64::MIN), &int(i64::MAX), &int(i64::MAX), &Type::Integer),
      Some(3)
    );
    assert_eq!(trip_count(&int(i64::MAX - 1), &int(i64::MAX), &int(1), &Type::Integer), Some(2));
    assert_eq!(trip_count(&int(i64::MAX), &int(i64::MIN), &int(1), &Type::Integer), Some(0));
    assert_eq!(trip_count(&int(-2), &int(i64::MAX), &int(1), &Type::Integer), None);
  }

  #[test]
  fn unfoldable_constant_counts_are_computed_at_run_time() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    b.main(vec![do_loop(
      counted(i, Expr::integer(-2), Expr::integer(i64::MAX), None),
      vec![Stmt::new(StmtKind::Exit, 2)],
      1,
    )]);
    let (image, generation) = compile(&b.program);
    assert!(generation.diagnostics.is_empty());
    let main = image.entry().unwrap();
    assert!(main.code.iter().any(|instruction| matches!(
      instruction,
      crate::emitter::machine::Instruction::Arith(crate::emitter::ArithOp::Div, Type::Integer)
    )));
  }

  #[test]
  fn counted_loops_leave_the_variable_past_the_end() {
    let mut b = Builder::new();
    let s = b.int_var("S");
    let i = b.int_var("I");
    let n = b.int_var("N");
    let k = b.int_var("K");
    let c = b.int_var("C");
    b.main(vec![
      assign(s, Expr::integer(0), 1),
      do_loop(
        counted(i, Expr::integer(1), Expr::integer(10), None),
        vec![assign(s, add(int(s), int(i)), 3)],
        2,
      ),
      write(vec![int(s), int(i)], 4),
      do_loop(
        counted(i, Expr::integer(10), Expr::integer(1), None),
        vec![assign(s, Expr::integer(0), 6)],
        5,
      ),
      write(vec![int(s), int(i)], 7),
      assign(n, Expr::integer(7), 8),
      assign(c, Expr::integer(0), 9),
      do_loop(
        counted(k, Expr::integer(1), int(n), Some(Expr::integer(3))),
        vec![
          assign(c, add(int(c), Expr::integer(1)), 11),
          // changing the bound inside the body does not change the count
          assign(n, Expr::integer(100), 12),
        ],
        10,
      ),
      write(vec![int(c), int(k)], 13),
    ]);
    assert_eq!(run(&b.program), vec!["55 11", "55 10", "3 10"]);
  }

  #[test]
  fn computed_goto_is_one_based_and_falls_through_out_of_range() {
    let mut b = Builder::new();
    let sel = b.int_var("SEL");
    let l10 = b.label("10");
    let l20 = b.label("20");
    let l30 = b.label("30");
    let body = vec![
      Stmt::new(
        StmtKind::Goto(Goto::Computed {
          selector: int(sel),
          labels: vec![l10, l20, l30],
          one_based: true,
        }),
        2,
      ),
      write(vec![Expr::string("none")], 3),
      Stmt::new(StmtKind::Cycle, 3),
      label(l10, 4),
      write(vec![Expr::string("one")], 4),
      Stmt::new(StmtKind::Cycle, 4),
      label(l20, 5),
      write(vec![Expr::string("two")], 5),
      Stmt::new(StmtKind::Cycle, 5),
      label(l30, 6),
      write(vec![Expr::string("three")], 6),
    ];
    b.main(vec![do_loop(
      counted(sel, Expr::integer(1), Expr::integer(4), None),
      body,
      1,
    )]);
    assert_eq!(run(&b.program), vec!["one", "two", "three", "none"]);
  }

  #[test]
  fn while_and_repeat_loops_honour_exit() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    let j = b.int_var("J");
    let at_least = |var, n| {
      Expr::binary(
        BinaryOp::GreaterOrEqual,
        int(var),
        Expr::integer(n),
        Type::Logical,
      )
    };
    let exit_when = Stmt::new(
      StmtKind::If(frontend::ast::Conditional {
        arms: vec![frontend::ast::GuardedBlock {
          guard: at_least(i, 3),
          body: frontend::ast::Block::from_iter([Stmt::new(StmtKind::Exit, 4)]),
        }],
        otherwise: None,
      }),
      4,
    );
    b.main(vec![
      assign(i, Expr::integer(0), 1),
      Stmt::new(
        StmtKind::Loop(Loop::While {
          guard: Expr::logical(true),
          body: frontend::ast::Block::from_iter([assign(i, add(int(i), Expr::integer(1)), 3), exit_when]),
        }),
        2,
      ),
      assign(j, Expr::integer(0), 5),
      Stmt::new(
        StmtKind::Loop(Loop::Repeat {
          body: frontend::ast::Block::from_iter([assign(j, add(int(j), Expr::integer(2)), 7)]),
          guard: Expr::binary(BinaryOp::LessThan, int(j), Expr::integer(5), Type::Logical),
        }),
        6,
      ),
      Stmt::new(
        StmtKind::Loop(Loop::While {
          guard: Expr::logical(false),
          body: frontend::ast::Block::from_iter([assign(j, Expr::integer(-1), 9)]),
        }),
        8,
      ),
      write(vec![int(i), int(j)], 10),
    ]);
    assert_eq!(run(&b.program), vec!["3 6"]);
  }

  #[test]
  fn switches_compare_characters_blank_padded() {
    let mut b = Builder::new();
    let word = b.local(Symbol::variable("W", Type::FixedCharacter(4)));
    let hit = b.label("10");
    let miss = b.label("20");
    let done = b.label("30");
    b.main(vec![
      assign(word, Expr::string("AB"), 1),
      Stmt::new(
        StmtKind::Switch(Switch {
          subject: Expr::ident(word, Type::FixedCharacter(4)),
          cases: vec![
            SwitchCase {
              value: Expr::string("XY"),
              target: miss,
            },
            SwitchCase {
              value: Expr::string("AB"),
              target: hit,
            },
          ],
          default: Some(miss),
        }),
        2,
      ),
      label(hit, 3),
      write(vec![Expr::string("hit")], 3),
      goto(done, 3),
      label(miss, 4),
      write(vec![Expr::string("miss")], 4),
      label(done, 5),
    ]);
    assert_eq!(run(&b.program), vec!["hit"]);
  }

  #[test]
  fn returns_inside_protected_bodies_leave_the_region() {
    let mut b = Builder::new();
    let x = b.int_var("X");
    b.main(vec![
      assign(x, Expr::integer(1), 1),
      Stmt::new(StmtKind::Return(None), 2),
      write(vec![Expr::string("unreached")], 3),
    ]);
    b.program.procedures[0].traps_errors = true;
    let (image, _) = compile(&b.program);
    let main = image.entry().unwrap();
    let unprotects = main
      .code
      .iter()
      .filter(|instruction| matches!(instruction, crate::emitter::machine::Instruction::Unprotect))
      .count();
    // one for the RETURN, one closing the region
    assert_eq!(unprotects, 2);
    assert!(run(&b.program).is_empty());
  }
}
