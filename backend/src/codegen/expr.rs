use super::{CodeGenerator, GenResult};
use crate::emitter::{ArithOp, Condition, Emitter, Place, Relation};
use crate::error::ContractViolation;
use frontend::ast::{
  promote, promote_logical, BinaryOp, Constant, Expr, ExprKind, IdentRef, Storage, Substring,
  SymbolId, Type, TypeMismatch, UnaryOp,
};
use frontend::diagnostics::SemanticError;

/// Pushes the value a store writes, already in the target's type.
pub(super) type ValueFn<'f, G> = dyn FnMut(&mut G) -> GenResult<()> + 'f;

fn relation(op: BinaryOp) -> Option<Relation> {
  match op {
    BinaryOp::Equal => Some(Relation::Equal),
    BinaryOp::NotEqual => Some(Relation::NotEqual),
    BinaryOp::LessThan => Some(Relation::Less),
    BinaryOp::LessOrEqual => Some(Relation::LessOrEqual),
    BinaryOp::GreaterThan => Some(Relation::Greater),
    BinaryOp::GreaterOrEqual => Some(Relation::GreaterOrEqual),
    _ => None,
  }
}

impl<'a, E: Emitter> CodeGenerator<'a, E> {
  /// Pushes `expr` in its own type and returns that type.
  pub(super) fn gen_value(&mut self, expr: &Expr) -> GenResult<Type> {
    if !expr.ty.is_resolved() {
      return Err(ContractViolation::UnresolvedType(expr.ty.clone()));
    }
    if let Some(value) = &expr.value {
      let folded = value.convert(&expr.ty).unwrap_or_else(|| value.clone());
      self.emitter.load_constant(&folded);
      return Ok(expr.ty.clone());
    }
    match &expr.kind {
      ExprKind::Number | ExprKind::String => {
        Err(ContractViolation::NotAValue("literal without a value".to_string()))
      }
      ExprKind::Ident(ident) => self.load_ident(ident),
      ExprKind::Unary(op, operand) => self.gen_unary(*op, operand, &expr.ty),
      ExprKind::Binary(op, left, right) => self.gen_binary(*op, left, right, &expr.ty),
      ExprKind::Call(call) => match self.gen_call(call, &expr.ty)? {
        Type::None => Err(ContractViolation::NotAValue(self.symbol(call.symbol)?.name.clone())),
        ty => Ok(ty),
      },
      ExprKind::VarArgs(_) => Err(ContractViolation::StrayVarArgs),
    }
  }

  /// Pushes `expr` converted to `want`.
  pub(super) fn gen_expr(&mut self, expr: &Expr, want: &Type) -> GenResult<()> {
    if !expr.ty.is_resolved() {
      return Err(ContractViolation::UnresolvedType(expr.ty.clone()));
    }
    if let Some(folded) = expr.value.as_ref().and_then(|value| value.convert(want)) {
      self.emitter.load_constant(&folded);
      return Ok(());
    }
    let actual = self.gen_value(expr)?;
    self.coerce(&actual, want);
    Ok(())
  }

  pub(super) fn coerce(&mut self, from: &Type, to: &Type) {
    let any_string = *to == Type::Character && from.is_character();
    if from != to && to.is_resolved() && !any_string {
      self.emitter.convert(from, to);
    }
  }

  fn mismatch(&mut self, left: &Type, right: &Type) {
    let loc = self.loc;
    self.report(SemanticError::TypeMismatch {
      loc,
      mismatch: TypeMismatch {
        left: left.clone(),
        right: right.clone(),
      },
    });
  }

  /// Promoted operand type, or `fallback` after reporting a mismatch.
  fn operand_type(&mut self, left: &Expr, right: &Expr, fallback: &Type) -> Type {
    let promoted = if left.ty.is_logical() || right.ty.is_logical() {
      promote_logical(&left.ty, &right.ty)
    } else {
      promote(&left.ty, &right.ty)
    };
    match promoted {
      Ok(ty) => ty,
      Err(mismatch) => {
        self.mismatch(&mismatch.left, &mismatch.right);
        fallback.clone()
      }
    }
  }

  fn gen_unary(&mut self, op: UnaryOp, operand: &Expr, ty: &Type) -> GenResult<Type> {
    match op {
      UnaryOp::Plus => self.gen_value(operand),
      UnaryOp::Neg => {
        let ty = if ty.is_arithmetic() { ty } else { &operand.ty };
        self.gen_expr(operand, ty)?;
        self.emitter.arith(ArithOp::Neg, ty);
        Ok(ty.clone())
      }
      UnaryOp::Not => {
        self.gen_expr(operand, &Type::Logical)?;
        self.emitter.arith(ArithOp::Not, &Type::Logical);
        Ok(Type::Logical)
      }
    }
  }

  fn gen_binary(&mut self, op: BinaryOp, left: &Expr, right: &Expr, ty: &Type) -> GenResult<Type> {
    if let Some(relation) = relation(op) {
      return self.gen_relational(relation, left, right);
    }
    match op {
      BinaryOp::AndThen | BinaryOp::OrThen => {
        let end = self.emitter.create_label();
        self.gen_expr(left, &Type::Logical)?;
        self.emitter.duplicate();
        let decided = if op == BinaryOp::AndThen {
          Condition::False
        } else {
          Condition::True
        };
        self.emitter.branch_if(decided, &Type::Logical, end);
        self.emitter.pop();
        self.gen_expr(right, &Type::Logical)?;
        self.emitter.mark_label(end)?;
        Ok(Type::Logical)
      }
      BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Eqv | BinaryOp::Neqv => {
        if let Err(mismatch) = promote_logical(&left.ty, &right.ty) {
          self.mismatch(&mismatch.left, &mismatch.right);
        }
        self.gen_expr(left, &Type::Logical)?;
        self.gen_expr(right, &Type::Logical)?;
        let arith = match op {
          BinaryOp::And => ArithOp::And,
          BinaryOp::Or => ArithOp::Or,
          _ => ArithOp::Xor,
        };
        self.emitter.arith(arith, &Type::Logical);
        if op == BinaryOp::Eqv {
          self.emitter.arith(ArithOp::Not, &Type::Logical);
        }
        Ok(Type::Logical)
      }
      BinaryOp::Concat => {
        if !left.ty.is_character() || !right.ty.is_character() {
          self.mismatch(&left.ty, &right.ty);
        }
        self.gen_expr(left, &Type::Character)?;
        self.gen_expr(right, &Type::Character)?;
        self.emitter.call(
          "__concat",
          &[Type::Character, Type::Character],
          &Type::Character,
        );
        Ok(Type::Character)
      }
      BinaryOp::Pow => {
        let base = if ty.is_arithmetic() {
          ty.clone()
        } else {
          self.operand_type(left, right, &Type::Integer)
        };
        let exponent = if right.ty == Type::Integer {
          Type::Integer
        } else {
          base.clone()
        };
        self.gen_expr(left, &base)?;
        self.gen_expr(right, &exponent)?;
        self.emitter.call("__pow", &[base.clone(), exponent], &base);
        Ok(base)
      }
      _ => {
        let fallback = if ty.is_arithmetic() { ty } else { &left.ty };
        let operands = self.operand_type(left, right, fallback);
        self.gen_expr(left, &operands)?;
        self.gen_expr(right, &operands)?;
        let arith = match op {
          BinaryOp::Add => ArithOp::Add,
          BinaryOp::Sub => ArithOp::Sub,
          BinaryOp::Mul => ArithOp::Mul,
          _ => ArithOp::Div,
        };
        self.emitter.arith(arith, &operands);
        Ok(operands)
      }
    }
  }

  fn gen_relational(&mut self, relation: Relation, left: &Expr, right: &Expr) -> GenResult<Type> {
    let operands = self.operand_type(left, right, &left.ty);
    if operands.is_character() {
      self.gen_expr(left, &Type::Character)?;
      self.gen_expr(right, &Type::Character)?;
      self.emitter.compare3();
      self.emitter.load_constant(&Constant::Integer(0));
      self.emitter.compare(relation, &Type::Integer);
    } else {
      self.gen_expr(left, &operands)?;
      self.gen_expr(right, &operands)?;
      self.emitter.compare(relation, &operands);
    }
    Ok(Type::Logical)
  }

  fn load_ident(&mut self, ident: &IdentRef) -> GenResult<Type> {
    match &ident.substring {
      Some(substring) => self.load_substring(ident, substring),
      None => self.load_ident_value(ident.symbol, &ident.indices),
    }
  }

  /// Value of a scalar, array element, named constant or procedure.
  fn load_ident_value(&mut self, id: SymbolId, indices: &[Expr]) -> GenResult<Type> {
    let symbol = self.symbol(id)?;
    if !indices.is_empty() {
      self.push_element(id, indices)?;
      self.emitter.load_element(&symbol.ty);
      return Ok(symbol.ty.clone());
    }
    if self.bound_temp(id).is_none() && self.result_slot(id).is_none() {
      match symbol.storage() {
        Storage::Constant => {
          let value = symbol
            .value
            .as_ref()
            .ok_or_else(|| ContractViolation::NotAValue(symbol.name.clone()))?;
          let folded = value.convert(&symbol.ty).unwrap_or_else(|| value.clone());
          self.emitter.load_constant(&folded);
          return Ok(symbol.ty.clone());
        }
        Storage::Procedure => {
          self.emitter.load_procedure(&symbol.name);
          return Ok(Type::Procedure);
        }
        _ => {}
      }
    }
    self.load_scalar(id)
  }

  /// Loads a variable or an array handle from its storage.
  pub(super) fn load_scalar(&mut self, id: SymbolId) -> GenResult<Type> {
    let symbol = self.symbol(id)?;
    let place = self.place_of(id)?;
    let ty = symbol.value_type();
    self.emitter.load(&place);
    if matches!(place, Place::Param(_)) && symbol.is_by_ref() && !symbol.is_array() {
      self.emitter.load_indirect(&ty);
    }
    Ok(ty)
  }

  fn check_character(&self, id: SymbolId) -> GenResult<()> {
    let symbol = self.symbol(id)?;
    if !symbol.ty.is_character() {
      return Err(ContractViolation::SubstringOnNonCharacter(
        symbol.name.clone(),
      ));
    }
    Ok(())
  }

  /// Pushes the 1-based bounds of a sub-range; a missing end is the length.
  fn push_substring_bounds(
    &mut self,
    id: SymbolId,
    indices: &[Expr],
    substring: &Substring,
  ) -> GenResult<()> {
    match &substring.start {
      Some(start) => self.gen_expr(start, &Type::Integer)?,
      None => self.emitter.load_constant(&Constant::Integer(1)),
    }
    match &substring.end {
      Some(end) => self.gen_expr(end, &Type::Integer),
      None => {
        self.load_ident_value(id, indices)?;
        self
          .emitter
          .call("LEN", &[Type::Character], &Type::Integer);
        Ok(())
      }
    }
  }

  fn load_substring(&mut self, ident: &IdentRef, substring: &Substring) -> GenResult<Type> {
    self.check_character(ident.symbol)?;
    self.load_ident_value(ident.symbol, &ident.indices)?;
    self.push_substring_bounds(ident.symbol, &ident.indices, substring)?;
    self.emitter.call(
      "__substr",
      &[Type::Character, Type::Integer, Type::Integer],
      &Type::Character,
    );
    Ok(Type::Character)
  }

  pub(super) fn gen_assignment(&mut self, target: &Expr, value: &Expr) -> GenResult<()> {
    let target_ty = self.target_type(target)?;
    if value.ty.is_resolved() && !value.ty.converts_to(&target_ty) {
      self.mismatch(&target_ty, &value.ty);
    }
    self.gen_store(target, &target_ty, &mut |g| g.gen_expr(value, &target_ty))
  }

  /// Type a store into `target` expects.
  pub(super) fn target_type(&self, target: &Expr) -> GenResult<Type> {
    let ident = target
      .as_ident()
      .ok_or_else(|| ContractViolation::NotAssignable(format!("{:?}", target.kind)))?;
    if ident.substring.is_some() {
      return Ok(Type::Character);
    }
    Ok(self.symbol(ident.symbol)?.ty.clone())
  }

  /// Stores the value pushed by `value` into `target`.
  pub(super) fn gen_store(
    &mut self,
    target: &Expr,
    ty: &Type,
    value: &mut ValueFn<'_, Self>,
  ) -> GenResult<()> {
    let ident = target
      .as_ident()
      .ok_or_else(|| ContractViolation::NotAssignable(format!("{:?}", target.kind)))?;
    if let Some(substring) = &ident.substring {
      self.check_character(ident.symbol)?;
      self.gen_address_of(ident.symbol, &ident.indices)?;
      self.push_substring_bounds(ident.symbol, &ident.indices, substring)?;
      value(self)?;
      self.emitter.call(
        "__set_substr",
        &[Type::Character, Type::Integer, Type::Integer, Type::Character],
        &Type::None,
      );
      return Ok(());
    }
    if !ident.indices.is_empty() {
      self.push_element(ident.symbol, &ident.indices)?;
      value(self)?;
      self.emitter.store_element(ty);
      return Ok(());
    }
    self.store_scalar(ident.symbol, value)
  }

  pub(super) fn store_scalar(&mut self, id: SymbolId, value: &mut ValueFn<'_, Self>) -> GenResult<()> {
    let symbol = self.symbol(id)?;
    let bound = self.bound_temp(id).is_some();
    if symbol.is_array() && !bound {
      return Err(ContractViolation::NotAssignable(symbol.name.clone()));
    }
    let place = match self.place_of(id) {
      Err(ContractViolation::NotAValue(name)) => return Err(ContractViolation::NotAssignable(name)),
      other => other?,
    };
    if matches!(place, Place::Param(_)) && symbol.is_by_ref() {
      self.emitter.load(&place);
      value(self)?;
      self.emitter.store_indirect(&symbol.ty);
    } else {
      value(self)?;
      self.emitter.store(&place);
    }
    Ok(())
  }

  /// Whether `expr` names storage whose address can be passed.
  pub(super) fn is_addressable(&self, expr: &Expr) -> GenResult<bool> {
    let Some(ident) = expr.as_ident() else {
      return Ok(false);
    };
    if expr.value.is_some() || ident.substring.is_some() {
      return Ok(false);
    }
    if self.bound_temp(ident.symbol).is_some() || self.result_slot(ident.symbol).is_some() {
      return Ok(true);
    }
    let symbol = self.symbol(ident.symbol)?;
    if !ident.indices.is_empty() {
      return Ok(symbol.is_array());
    }
    Ok(
      matches!(
        symbol.storage(),
        Storage::Local | Storage::Static | Storage::Parameter(_)
      ) && !symbol.is_array()
        && symbol.ty != Type::Procedure,
    )
  }

  /// Pushes a reference to a scalar or to one array element.
  pub(super) fn gen_address_of(&mut self, id: SymbolId, indices: &[Expr]) -> GenResult<()> {
    let symbol = self.symbol(id)?;
    if !indices.is_empty() {
      self.push_element(id, indices)?;
      self.emitter.element_address(&symbol.ty);
      return Ok(());
    }
    let place = match self.place_of(id) {
      Err(ContractViolation::NotAValue(name)) => return Err(ContractViolation::NotAssignable(name)),
      other => other?,
    };
    if matches!(place, Place::Param(_)) && symbol.is_by_ref() {
      self.emitter.load(&place);
    } else {
      self.emitter.load_address(&place);
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::*;
  use frontend::ast::{BinaryOp, Expr, Symbol, Type, UnaryOp};
  use pretty_assertions::assert_eq;

  #[test]
  fn arithmetic_promotes_and_converts() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    let x = b.local(Symbol::variable("X", Type::Real));
    b.main(vec![
      assign(i, Expr::integer(7), 1),
      // X = I / 2 * 1.5 keeps integer division for I / 2
      assign(
        x,
        Expr::binary(
          BinaryOp::Mul,
          Expr::binary(BinaryOp::Div, int(i), Expr::integer(2), Type::Integer),
          Expr::real(1.5),
          Type::Real,
        ),
        2,
      ),
      write(vec![Expr::ident(x, Type::Real), Expr::unary(UnaryOp::Neg, int(i), Type::Integer)], 3),
    ]);
    assert_eq!(run(&b.program), vec!["4.5 -7"]);
  }

  #[test]
  fn short_circuit_skips_the_right_operand() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    let guard = |op: BinaryOp| {
      // I /= 0 and-then 10 / I > 1
      Expr::binary(
        op,
        Expr::binary(BinaryOp::NotEqual, int(i), Expr::integer(0), Type::Logical),
        Expr::binary(
          BinaryOp::GreaterThan,
          Expr::binary(BinaryOp::Div, Expr::integer(10), int(i), Type::Integer),
          Expr::integer(1),
          Type::Logical,
        ),
        Type::Logical,
      )
    };
    b.main(vec![write(
      vec![
        guard(BinaryOp::AndThen),
        Expr::binary(
          BinaryOp::OrThen,
          Expr::logical(true),
          guard(BinaryOp::And),
          Type::Logical,
        ),
      ],
      1,
    )]);
    assert_eq!(run(&b.program), vec!["F T"]);
  }

  #[test]
  fn character_comparison_pads_with_blanks() {
    let mut b = Builder::new();
    let s = b.local(Symbol::variable("S", Type::FixedCharacter(5)));
    b.main(vec![
      assign(s, Expr::string("AB"), 1),
      write(
        vec![
          Expr::binary(
            BinaryOp::Equal,
            Expr::ident(s, Type::FixedCharacter(5)),
            Expr::string("AB"),
            Type::Logical,
          ),
          Expr::binary(
            BinaryOp::LessThan,
            Expr::ident(s, Type::FixedCharacter(5)),
            Expr::string("AC"),
            Type::Logical,
          ),
        ],
        2,
      ),
    ]);
    assert_eq!(run(&b.program), vec!["T T"]);
  }

  #[test]
  fn substrings_read_and_write_through_the_runtime() {
    let mut b = Builder::new();
    let s = b.local(Symbol::variable("S", Type::FixedCharacter(6)));
    b.main(vec![
      assign(s, Expr::string("ABCDEF"), 1),
      assign_to(
        Expr::substring(s, Some(Expr::integer(2)), Some(Expr::integer(3))),
        Expr::string("xyz"),
        2,
      ),
      write(
        vec![
          Expr::ident(s, Type::FixedCharacter(6)),
          Expr::substring(s, Some(Expr::integer(5)), None),
          Expr::binary(
            BinaryOp::Concat,
            Expr::substring(s, None, Some(Expr::integer(1))),
            Expr::string("!"),
            Type::Character,
          ),
        ],
        3,
      ),
    ]);
    assert_eq!(run(&b.program), vec!["AxyDEF EF A!"]);
  }

  #[test]
  fn substring_of_a_number_is_a_contract_violation() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    let mut bad = Expr::substring(i, None, None);
    bad.ty = Type::Character;
    b.main(vec![write(vec![bad], 4)]);
    let error = compile_err(&b.program);
    assert_eq!(
      error.violation,
      crate::error::ContractViolation::SubstringOnNonCharacter("I".to_string())
    );
    assert_eq!(error.loc.line, 4);
  }

  #[test]
  fn operand_mismatches_are_reported_and_generation_continues() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    b.main(vec![
      assign(
        i,
        Expr::binary(BinaryOp::Add, int(i), Expr::logical(true), Type::Integer),
        5,
      ),
      assign(i, Expr::integer(3), 6),
    ]);
    let (_, generation) = compile(&b.program);
    let errors = generation.diagnostics.into_vec();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].location().line, 5);
  }
}
