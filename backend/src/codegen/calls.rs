use super::{CodeGenerator, Context, GenResult};
use crate::emitter::{ArithOp, Emitter, Place, TempHandle};
use crate::error::ContractViolation;
use frontend::ast::{
  Call, CallKind, Constant, Expr, ExprKind, IdentRef, Storage, Symbol, SymbolClass, Type,
};
use frontend::diagnostics::SemanticError;

/// Work left for after the call instruction.
enum Pending {
  Release(TempHandle),
  /// A partial-array argument to copy back into its source.
  CopyBack {
    element: Type,
    source: Place,
    offset: TempHandle,
    count: TempHandle,
    copy: TempHandle,
  },
}

/// Type a formal parameter receives.
pub(super) fn formal_type(symbol: &Symbol) -> Type {
  if symbol.class.is_procedure() || symbol.ty == Type::Procedure {
    Type::Procedure
  } else {
    symbol.value_type()
  }
}

/// Type a procedure returns, `Type::None` for subroutines.
pub(super) fn result_type(symbol: &Symbol) -> Type {
  match symbol.class {
    SymbolClass::Function => symbol.ty.clone(),
    SymbolClass::Subroutine if symbol.alternate_return => Type::Integer,
    SymbolClass::Subroutine => Type::None,
    _ if symbol.ty.is_resolved() && symbol.ty != Type::Procedure => symbol.ty.clone(),
    _ => Type::None,
  }
}

fn flatten(args: &[Expr]) -> Vec<&Expr> {
  let mut flat = Vec::with_capacity(args.len());
  for arg in args {
    match &arg.kind {
      ExprKind::VarArgs(items) => flat.extend(flatten(items)),
      _ => flat.push(arg),
    }
  }
  flat
}

impl<'a, E: Emitter> CodeGenerator<'a, E> {
  /// Emits a call and returns the type of the value it leaves on the stack.
  /// `ty` is the type the call expression was resolved to, if any.
  pub(super) fn gen_call(&mut self, call: &Call, ty: &Type) -> GenResult<Type> {
    let callee = self.symbol(call.symbol)?;
    let args = flatten(&call.args);
    match (callee.class, callee.storage()) {
      (_, Storage::Parameter(index)) => {
        self.emitter.load(&Place::Param(index));
        let mut pending = Vec::new();
        let mut types = Vec::with_capacity(args.len());
        for arg in &args {
          types.push(self.pass_argument(arg, None, &mut pending)?);
        }
        let result = if ty.is_resolved() && *ty != Type::Procedure {
          ty.clone()
        } else {
          result_type(callee)
        };
        self.release_arguments(&mut pending)?;
        self.emitter.call_indirect(&types, &result);
        self.finish_arguments(pending)?;
        Ok(result)
      }
      (SymbolClass::Inline, _) => self.expand_inline(call, callee, &args),
      (SymbolClass::Intrinsic, _) => {
        let result = if ty.is_resolved() {
          ty.clone()
        } else {
          callee.ty.clone()
        };
        let mut types = Vec::with_capacity(args.len());
        for arg in &args {
          types.push(self.gen_value(arg)?);
        }
        if callee.name.eq_ignore_ascii_case("CMPLX") {
          self.emitter.create_object(&Type::Complex, &types);
          return Ok(Type::Complex);
        }
        self.emitter.call(&callee.name, &types, &result);
        Ok(result)
      }
      (class, _) if class.is_procedure() => self.call_direct(call, callee, &args),
      _ => Err(ContractViolation::NotCallable(callee.name.clone())),
    }
  }

  fn call_direct(&mut self, call: &Call, callee: &'a Symbol, args: &[&Expr]) -> GenResult<Type> {
    let formals = match &callee.params {
      Some(ids) => Some(
        ids
          .iter()
          .map(|id| self.symbol(*id))
          .collect::<GenResult<Vec<_>>>()?,
      ),
      None => None,
    };
    if let Some(expected) = call.expected_arity(callee) {
      if expected != args.len() {
        let loc = self.loc;
        self.report(SemanticError::ArityMismatch {
          loc,
          name: callee.name.clone(),
          expected,
          found: args.len(),
        });
      }
    }

    let mut pending = Vec::new();
    let mut types = Vec::with_capacity(args.len());
    for (position, arg) in args.iter().enumerate() {
      let formal = formals
        .as_ref()
        .and_then(|formals| formals.get(position).copied());
      types.push(self.pass_argument(arg, formal, &mut pending)?);
    }
    let result = result_type(callee);
    self.release_arguments(&mut pending)?;
    self.emitter.call(&callee.name, &types, &result);
    self.finish_arguments(pending)?;
    Ok(result)
  }

  /// Pushes one argument and returns the type passed.
  fn pass_argument(
    &mut self,
    arg: &Expr,
    formal: Option<&Symbol>,
    pending: &mut Vec<Pending>,
  ) -> GenResult<Type> {
    if let Some(ident) = arg.as_ident() {
      let symbol = self.symbol(ident.symbol)?;
      let plain = ident.indices.is_empty()
        && ident.substring.is_none()
        && self.bound_temp(ident.symbol).is_none()
        && self.result_slot(ident.symbol).is_none();
      if plain && (symbol.class.is_procedure() || symbol.ty == Type::Procedure) {
        match symbol.storage() {
          Storage::Parameter(index) => self.emitter.load(&Place::Param(index)),
          _ => self.emitter.load_procedure(&symbol.name),
        }
        return Ok(Type::Procedure);
      }
      if plain && symbol.is_array() {
        self.load_array_handle(ident.symbol)?;
        return Ok(symbol.value_type());
      }
      if let Some(formal) = formal.filter(|formal| formal.is_array()) {
        if symbol.is_array() && !ident.indices.is_empty() {
          return self.pass_partial_array(ident, symbol, formal, pending);
        }
      }
    }

    let by_ref = formal.map_or(true, Symbol::is_by_ref);
    let ty = formal.map_or_else(|| arg.ty.clone(), |formal| formal.ty.clone());
    if !by_ref {
      self.gen_expr(arg, &ty)?;
      return Ok(ty);
    }
    if self.is_addressable(arg)? {
      if let Some(ident) = arg.as_ident() {
        self.gen_address_of(ident.symbol, &ident.indices)?;
        return Ok(arg.ty.clone());
      }
    }
    self.gen_expr(arg, &ty)?;
    let temp = self.acquire(&ty)?;
    self.emitter.store(&Place::Temp(temp));
    self.emitter.load_address(&Place::Temp(temp));
    pending.push(Pending::Release(temp));
    Ok(ty)
  }

  /// Copies the slice starting at an indexed element into a fresh array of
  /// the formal's size and passes that array.
  fn pass_partial_array(
    &mut self,
    ident: &IdentRef,
    source: &Symbol,
    formal: &Symbol,
    pending: &mut Vec<Pending>,
  ) -> GenResult<Type> {
    let element = source.ty.clone();
    let offset = self.acquire(&Type::Integer)?;
    self.element_offset(ident.symbol, &ident.indices)?;
    self.emitter.store(&Place::Temp(offset));

    let count = self.acquire(&Type::Integer)?;
    match formal.constant_size() {
      Some(size) => self.emitter.load_constant(&Constant::Integer(size)),
      None => {
        self.push_array_size(source)?;
        self.emitter.load(&Place::Temp(offset));
        self.emitter.arith(ArithOp::Sub, &Type::Integer);
      }
    }
    self.emitter.store(&Place::Temp(count));

    let copy = self.acquire(&Type::array_of(element.clone()))?;
    self.emitter.load(&Place::Temp(count));
    self.emitter.create_array(&element, 1);
    self.emitter.store(&Place::Temp(copy));

    let source_place = self.place_of(ident.symbol)?;
    self.copy_elements(
      &element,
      &Place::Temp(count),
      (&Place::Temp(copy), None),
      (&source_place, Some(&Place::Temp(offset))),
    )?;
    self.emitter.load(&Place::Temp(copy));
    pending.push(Pending::CopyBack {
      element: element.clone(),
      source: source_place,
      offset,
      count,
      copy,
    });
    Ok(Type::array_of(element))
  }

  /// Scalar temporaries are free as soon as the argument list is complete.
  fn release_arguments(&mut self, pending: &mut Vec<Pending>) -> GenResult<()> {
    let mut kept = Vec::new();
    for item in pending.drain(..) {
      match item {
        Pending::Release(temp) => self.release(temp)?,
        copy_back => kept.push(copy_back),
      }
    }
    *pending = kept;
    Ok(())
  }

  fn finish_arguments(&mut self, pending: Vec<Pending>) -> GenResult<()> {
    for item in pending {
      match item {
        Pending::Release(temp) => self.release(temp)?,
        Pending::CopyBack {
          element,
          source,
          offset,
          count,
          copy,
        } => {
          self.copy_elements(
            &element,
            &Place::Temp(count),
            (&source, Some(&Place::Temp(offset))),
            (&Place::Temp(copy), None),
          )?;
          self.release(copy)?;
          self.release(count)?;
          self.release(offset)?;
        }
      }
    }
    Ok(())
  }

  /// Statement functions: arguments go to temporaries bound to the dummies,
  /// then the body is generated in place.
  fn expand_inline(&mut self, call: &Call, callee: &'a Symbol, args: &[&Expr]) -> GenResult<Type> {
    let body = callee
      .body
      .as_ref()
      .ok_or_else(|| ContractViolation::NotCallable(callee.name.clone()))?;
    let dummies = callee.params.as_deref().unwrap_or_default();
    if dummies.len() != args.len() && call.kind == CallKind::Internal {
      let loc = self.loc;
      self.report(SemanticError::ArityMismatch {
        loc,
        name: callee.name.clone(),
        expected: dummies.len(),
        found: args.len(),
      });
    }

    let mut bindings = Vec::with_capacity(dummies.len());
    for (dummy, arg) in dummies.iter().zip(args) {
      let ty = self.symbol(*dummy)?.ty.clone();
      self.gen_expr(arg, &ty)?;
      let temp = self.acquire(&ty)?;
      self.emitter.store(&Place::Temp(temp));
      bindings.push((*dummy, temp));
    }
    let temps: Vec<TempHandle> = bindings.iter().map(|(_, temp)| *temp).collect();
    let result = self.with_context(Context::Inline { bindings }, |g| {
      g.gen_expr(body, &callee.ty)
    });
    for temp in temps {
      self.release(temp)?;
    }
    result.map(|()| callee.ty.clone())
  }

  /// A call statement; with alternate returns the selector picks a label,
  /// 0 falls through.
  pub(super) fn gen_call_statement(&mut self, call: &Call) -> GenResult<()> {
    let result = self.gen_call(call, &Type::None)?;
    if call.alternate_returns.is_empty() {
      if result != Type::None {
        self.emitter.pop();
      }
      return Ok(());
    }
    if result == Type::None {
      return Err(ContractViolation::NotAValue(
        self.symbol(call.symbol)?.name.clone(),
      ));
    }
    self.coerce(&result, &Type::Integer);
    let mut labels = Vec::with_capacity(call.alternate_returns.len());
    for id in &call.alternate_returns {
      labels.push(self.label_for(*id)?);
    }
    self.emitter.load_constant(&Constant::Integer(1));
    self.emitter.arith(ArithOp::Sub, &Type::Integer);
    self.emitter.dispatch_table(&labels);
    Ok(())
  }
}
