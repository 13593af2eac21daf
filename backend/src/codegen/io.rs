use super::{CodeGenerator, GenResult};
use crate::emitter::{Emitter, Place};
use crate::error::ContractViolation;
use frontend::ast::{Expr, IoDirection, IoItem, IoStatement, Type};

/// Every expression of an item list, implied-loop bounds included.
pub(super) fn collect_item_exprs<'e>(items: &'e [IoItem], out: &mut Vec<&'e Expr>) {
  for item in items {
    match item {
      IoItem::Value(expr) => out.push(expr),
      IoItem::Implied { control, items } => {
        out.push(&control.start);
        out.push(&control.end);
        out.extend(control.step.as_ref());
        collect_item_exprs(items, out);
      }
    }
  }
}

/// Suffix of the runtime routine transferring one value of `ty`.
fn runtime_name(ty: &Type) -> Option<&'static str> {
  Some(match ty {
    Type::Integer => "integer",
    Type::Real => "real",
    Type::Double => "double",
    Type::Complex => "complex",
    Type::Logical => "logical",
    Type::Character | Type::FixedCharacter(_) => "character",
    _ => return None,
  })
}

impl<'a, E: Emitter> CodeGenerator<'a, E> {
  /// `begin`, one runtime call per item, `end`.
  pub(super) fn gen_io(&mut self, statement: &IoStatement) -> GenResult<()> {
    let mut begin = Vec::new();
    if let Some(unit) = &statement.unit {
      begin.push(self.gen_value(unit)?);
    }
    if let Some(format) = &statement.format {
      begin.push(self.gen_value(format)?);
    }
    let name = match statement.direction {
      IoDirection::Write => "__begin_write",
      IoDirection::Read => "__begin_read",
    };
    self.emitter.call(name, &begin, &Type::None);
    self.gen_items(statement.direction, &statement.items)?;
    self.emitter.call("__end_io", &[], &Type::None);
    Ok(())
  }

  fn gen_items(&mut self, direction: IoDirection, items: &[IoItem]) -> GenResult<()> {
    for item in items {
      match item {
        IoItem::Value(expr) => match direction {
          IoDirection::Write => self.write_item(expr)?,
          IoDirection::Read => self.read_item(expr)?,
        },
        IoItem::Implied { control, items } => {
          self.gen_counted_loop(control, &mut |g| g.gen_items(direction, items))?
        }
      }
    }
    Ok(())
  }

  fn whole_array(&self, expr: &Expr) -> GenResult<bool> {
    match expr.as_ident() {
      Some(ident) if ident.indices.is_empty() && ident.substring.is_none() => {
        Ok(self.bound_temp(ident.symbol).is_none() && self.symbol(ident.symbol)?.is_array())
      }
      _ => Ok(false),
    }
  }

  fn write_item(&mut self, expr: &Expr) -> GenResult<()> {
    if self.whole_array(expr)? {
      let ty = self.gen_value(expr)?;
      self.emitter.call("__write_array", &[ty], &Type::None);
      return Ok(());
    }
    let ty = self.gen_value(expr)?;
    let suffix = runtime_name(&ty).ok_or_else(|| ContractViolation::UnresolvedType(ty.clone()))?;
    self
      .emitter
      .call(&format!("__write_{}", suffix), &[ty], &Type::None);
    Ok(())
  }

  fn read_item(&mut self, target: &Expr) -> GenResult<()> {
    if self.whole_array(target)? {
      let ident = target
        .as_ident()
        .ok_or_else(|| ContractViolation::NotAssignable(format!("{:?}", target.kind)))?;
      let symbol = self.symbol(ident.symbol)?;
      let element = symbol.ty.clone();
      let suffix = runtime_name(&element)
        .ok_or_else(|| ContractViolation::UnresolvedType(element.clone()))?;
      let routine = format!("__read_{}", suffix);

      let count = self.acquire(&Type::Integer)?;
      self.push_array_size(symbol)?;
      self.emitter.store(&Place::Temp(count));
      let array = self.place_of(ident.symbol)?;
      self.for_each_index(&Place::Temp(count), &mut |g, k| {
        g.emitter.load(&array);
        g.emitter.load(k);
        g.emitter.call(&routine, &[], &element);
        g.emitter.store_element(&element);
        Ok(())
      })?;
      return self.release(count);
    }

    let ty = self.target_type(target)?;
    let suffix = runtime_name(&ty).ok_or_else(|| ContractViolation::UnresolvedType(ty.clone()))?;
    let routine = format!("__read_{}", suffix);
    self.gen_store(target, &ty, &mut |g| {
      g.emitter.call(&routine, &[], &ty);
      Ok(())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::super::testing::*;
  use crate::emitter::vm::Vm;
  use frontend::ast::{
    BinaryOp, Dimension, Expr, IoDirection, IoItem, IoStatement, LoopControl, Stmt, StmtKind,
    Symbol, Type,
  };
  use pretty_assertions::assert_eq;

  fn read(items: Vec<IoItem>, line: u32) -> Stmt {
    Stmt::new(
      StmtKind::Io(IoStatement {
        direction: IoDirection::Read,
        unit: Some(Expr::integer(5)),
        format: None,
        items,
      }),
      line,
    )
  }

  #[test]
  fn implied_loops_write_one_record() {
    let mut b = Builder::new();
    let i = b.int_var("I");
    let squares = Stmt::new(
      StmtKind::Io(IoStatement {
        direction: IoDirection::Write,
        unit: Some(Expr::integer(6)),
        format: None,
        items: vec![
          IoItem::Value(Expr::string("squares:")),
          IoItem::Implied {
            control: LoopControl {
              var: i,
              start: Expr::integer(1),
              end: Expr::integer(4),
              step: None,
            },
            items: vec![IoItem::Value(Expr::binary(
              BinaryOp::Mul,
              int(i),
              int(i),
              Type::Integer,
            ))],
          },
        ],
      }),
      1,
    );
    b.main(vec![squares]);
    assert_eq!(run(&b.program), vec!["squares: 1 4 9 16"]);
  }

  #[test]
  fn reads_convert_tokens_to_the_target_type() {
    let mut b = Builder::new();
    let n = b.int_var("N");
    let x = b.local(Symbol::variable("X", Type::Real));
    let v = b.local(Symbol::array("V", Type::Integer, vec![Dimension::constant(1, 3)]));
    b.main(vec![
      read(
        vec![
          IoItem::Value(int(n)),
          IoItem::Value(Expr::ident(x, Type::Real)),
          IoItem::Value(array_arg(v)),
        ],
        1,
      ),
      write(vec![int(n), Expr::ident(x, Type::Real), array_arg(v)], 2),
    ]);
    let (image, _) = compile(&b.program);
    let mut vm = Vm::new(&image).with_input(["7 2.5".to_string(), "1, 2, 3".to_string()]);
    vm.run().unwrap();
    assert_eq!(vm.output, vec!["7 2.5 1 2 3"]);
  }

  #[test]
  fn running_out_of_input_traps() {
    let mut b = Builder::new();
    let n = b.int_var("N");
    b.main(vec![read(vec![IoItem::Value(int(n))], 1)]);
    let (image, _) = compile(&b.program);
    let mut vm = Vm::new(&image);
    assert!(vm.run().is_err());
  }
}
