//! Array storage and element addressing.
//!
//! Elements are stored column-major. The flat offset is built by Horner's
//! rule from the last index down:
//! `offset = (i_n - l_n)`, then `offset = offset * e_k + (i_k - l_k)` for
//! `k = n-1 .. 1`. The extent of the last dimension is never needed, which
//! is what allows assumed-size (`*`) last dimensions.

use super::{CodeGenerator, GenResult};
use crate::emitter::{ArithOp, Condition, Emitter, LocalId, Place};
use crate::error::ContractViolation;
use frontend::ast::{Constant, Dimension, Expr, SlotRef, Symbol, SymbolId, Type};

impl<'a, E: Emitter> CodeGenerator<'a, E> {
  /// `[] -> [array, offset]`
  pub(super) fn push_element(&mut self, id: SymbolId, indices: &[Expr]) -> GenResult<()> {
    self.check_indices(id, indices)?;
    self.load_array_handle(id)?;
    self.emit_offset(self.symbol(id)?, indices)
  }

  /// Pushes only the flat offset of an element.
  pub(super) fn element_offset(&mut self, id: SymbolId, indices: &[Expr]) -> GenResult<()> {
    self.check_indices(id, indices)?;
    self.emit_offset(self.symbol(id)?, indices)
  }

  fn check_indices(&self, id: SymbolId, indices: &[Expr]) -> GenResult<()> {
    let symbol = self.symbol(id)?;
    if !symbol.is_array() {
      return Err(ContractViolation::NotAnArray(symbol.name.clone()));
    }
    if indices.is_empty() || indices.len() != symbol.dims.len() {
      return Err(ContractViolation::IndexCount {
        name: symbol.name.clone(),
        expected: symbol.dims.len(),
        found: indices.len(),
      });
    }
    Ok(())
  }

  pub(super) fn load_array_handle(&mut self, id: SymbolId) -> GenResult<()> {
    let place = self.place_of(id)?;
    self.emitter.load(&place);
    Ok(())
  }

  fn emit_offset(&mut self, symbol: &Symbol, indices: &[Expr]) -> GenResult<()> {
    let last = indices.len() - 1;
    self.emit_index_term(&symbol.dims[last], &indices[last])?;
    for k in (0..last).rev() {
      self.load_extent(symbol, k)?;
      self.emitter.arith(ArithOp::Mul, &Type::Integer);
      self.emit_index_term(&symbol.dims[k], &indices[k])?;
      self.emitter.arith(ArithOp::Add, &Type::Integer);
    }
    Ok(())
  }

  /// `index - lower`, folded when both are constant.
  fn emit_index_term(&mut self, dim: &Dimension, index: &Expr) -> GenResult<()> {
    let constant_index = index
      .value
      .as_ref()
      .and_then(|value| value.convert(&Type::Integer))
      .and_then(|value| value.as_integer());
    let folded = constant_index
      .zip(dim.constant_lower())
      .and_then(|(i, lower)| i.checked_sub(lower));
    if let Some(term) = folded {
      self.emitter.load_constant(&Constant::Integer(term));
      return Ok(());
    }
    match dim.constant_lower() {
      Some(0) => self.gen_expr(index, &Type::Integer)?,
      Some(lower) => {
        self.gen_expr(index, &Type::Integer)?;
        self.emitter.load_constant(&Constant::Integer(lower));
        self.emitter.arith(ArithOp::Sub, &Type::Integer);
      }
      None => {
        self.gen_expr(index, &Type::Integer)?;
        self.load_lower(dim)?;
        self.emitter.arith(ArithOp::Sub, &Type::Integer);
      }
    }
    Ok(())
  }

  fn load_lower(&mut self, dim: &Dimension) -> GenResult<()> {
    if let Some(lower) = dim.constant_lower() {
      self.emitter.load_constant(&Constant::Integer(lower));
    } else if let Some(SlotRef(slot)) = dim.lower_slot() {
      self.emitter.load(&Place::Local(LocalId(slot)));
    } else {
      self.gen_expr(&dim.lower, &Type::Integer)?;
    }
    Ok(())
  }

  fn load_extent(&mut self, symbol: &Symbol, k: usize) -> GenResult<()> {
    let dim = &symbol.dims[k];
    if let Some(extent) = dim.constant_extent() {
      self.emitter.load_constant(&Constant::Integer(extent));
    } else if let Some(SlotRef(slot)) = dim.extent_slot() {
      self.emitter.load(&Place::Local(LocalId(slot)));
    } else {
      let upper = dim
        .upper
        .as_ref()
        .ok_or_else(|| ContractViolation::UnknownArraySize(symbol.name.clone()))?;
      self.gen_expr(upper, &Type::Integer)?;
      self.load_lower(dim)?;
      self.emitter.arith(ArithOp::Sub, &Type::Integer);
      self.emitter.load_constant(&Constant::Integer(1));
      self.emitter.arith(ArithOp::Add, &Type::Integer);
    }
    Ok(())
  }

  /// Evaluates non-constant bounds once, on procedure entry, and binds the
  /// dimension cells to the locals holding them.
  pub(super) fn bind_dimensions(&mut self, id: SymbolId) -> GenResult<()> {
    let symbol = self.symbol(id)?;
    let mut bound = false;
    for (k, dim) in symbol.dims.iter().enumerate() {
      if dim.constant_lower().is_none() && dim.lower_slot().is_none() {
        self.gen_expr(&dim.lower, &Type::Integer)?;
        let local = self
          .emitter
          .declare_local(&format!("{}.lower{}", symbol.name, k + 1), &Type::Integer);
        self.emitter.store(&Place::Local(local));
        dim.bind_lower(SlotRef(local.0));
        bound = true;
      }
      if dim.constant_extent().is_none() && dim.extent_slot().is_none() && dim.upper.is_some() {
        self.load_extent(symbol, k)?;
        let local = self
          .emitter
          .declare_local(&format!("{}.extent{}", symbol.name, k + 1), &Type::Integer);
        self.emitter.store(&Place::Local(local));
        dim.bind_extent(SlotRef(local.0));
        bound = true;
      }
    }
    if bound {
      self.frame()?.bound_dims.push(id);
    }
    Ok(())
  }

  pub(super) fn create_local_array(&mut self, id: SymbolId) -> GenResult<()> {
    let symbol = self.symbol(id)?;
    for k in 0..symbol.dims.len() {
      self.load_extent(symbol, k)?;
    }
    self.emitter.create_array(&symbol.ty, symbol.dims.len());
    let local = self.local_slot(id)?;
    self.emitter.store(&Place::Local(local));
    Ok(())
  }

  /// Pushes the element count of an array.
  pub(super) fn push_array_size(&mut self, symbol: &Symbol) -> GenResult<()> {
    if let Some(size) = symbol.constant_size() {
      self.emitter.load_constant(&Constant::Integer(size));
      return Ok(());
    }
    for k in 0..symbol.dims.len() {
      self.load_extent(symbol, k)?;
      if k > 0 {
        self.emitter.arith(ArithOp::Mul, &Type::Integer);
      }
    }
    Ok(())
  }

  /// Runs `body` with a zero-based counter for every value below `count`.
  pub(super) fn for_each_index(
    &mut self,
    count: &Place,
    body: &mut dyn FnMut(&mut Self, &Place) -> GenResult<()>,
  ) -> GenResult<()> {
    let counter = self.acquire(&Type::Integer)?;
    let counter = Place::Temp(counter);
    let top = self.emitter.create_label();
    let done = self.emitter.create_label();
    self.emitter.load_constant(&Constant::Integer(0));
    self.emitter.store(&counter);
    self.emitter.mark_label(top)?;
    self.emitter.load(&counter);
    self.emitter.load(count);
    self
      .emitter
      .branch_if(Condition::GreaterOrEqual, &Type::Integer, done);
    body(self, &counter)?;
    self.emitter.load(&counter);
    self.emitter.load_constant(&Constant::Integer(1));
    self.emitter.arith(ArithOp::Add, &Type::Integer);
    self.emitter.store(&counter);
    self.emitter.branch(top);
    self.emitter.mark_label(done)?;
    if let Place::Temp(handle) = counter {
      self.release(handle)?;
    }
    Ok(())
  }

  /// `to[to_offset + k] = from[from_offset + k]` for `k` below `count`.
  pub(super) fn copy_elements(
    &mut self,
    element: &Type,
    count: &Place,
    to: (&Place, Option<&Place>),
    from: (&Place, Option<&Place>),
  ) -> GenResult<()> {
    self.for_each_index(count, &mut |g, k| {
      g.emitter.load(to.0);
      g.push_shifted(k, to.1);
      g.emitter.load(from.0);
      g.push_shifted(k, from.1);
      g.emitter.load_element(element);
      g.emitter.store_element(element);
      Ok(())
    })
  }

  fn push_shifted(&mut self, index: &Place, offset: Option<&Place>) {
    self.emitter.load(index);
    if let Some(offset) = offset {
      self.emitter.load(offset);
      self.emitter.arith(ArithOp::Add, &Type::Integer);
    }
  }
}
