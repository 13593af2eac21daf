use super::machine::{Image, Instruction, ProcedureImage};
use super::{ArithOp, Condition, Relation};
use frontend::ast::Type;

pub fn generate_listing(image: &Image) -> String {
  let mut listing = String::new();

  for field in &image.statics {
    match field.size {
      Some(size) => listing.push_str(&format!(".static {} : {} [{}]\n", field.name, field.ty, size)),
      None => listing.push_str(&format!(".static {} : {}\n", field.name, field.ty)),
    }
  }

  for procedure in &image.procedures {
    listing.push_str(&procedure_listing(procedure));
  }
  listing
}

fn procedure_listing(procedure: &ProcedureImage) -> String {
  let signature = &procedure.signature;
  let mut listing = String::new();
  let params: Vec<String> = signature.params.iter().map(Type::to_string).collect();
  listing.push_str(&format!(
    "\n.{} {}({})",
    if signature.entry { "program" } else { "procedure" },
    signature.name,
    params.join(", ")
  ));
  if signature.result != Type::None {
    listing.push_str(&format!(" -> {}", signature.result));
  }
  listing.push('\n');
  for (index, (name, ty)) in procedure.locals.iter().enumerate() {
    listing.push_str(&format!("  .local {} {} : {}\n", index, name, ty));
  }
  if procedure.temps > 0 {
    listing.push_str(&format!("  .temps {}\n", procedure.temps));
  }

  for instruction in &procedure.code {
    match instruction {
      Instruction::Label(label) => listing.push_str(&format!("{}:\n", label)),
      other => listing.push_str(&format!("  {}\n", instruction_text(other))),
    }
  }
  listing.push_str(".end\n");
  listing
}

fn types_text(types: &[Type]) -> String {
  let names: Vec<String> = types.iter().map(Type::to_string).collect();
  names.join(", ")
}

fn instruction_text(instruction: &Instruction) -> String {
  match instruction {
    Instruction::Label(label) => format!("{}:", label),
    Instruction::Branch(label) => format!("br {}", label),
    Instruction::BranchIf(condition, ty, label) => match condition {
      Condition::True => format!("brtrue {}", label),
      Condition::False => format!("brfalse {}", label),
      other => format!("br{}.{} {}", condition_suffix(*other), ty, label),
    },
    Instruction::Dispatch(labels) => {
      let names: Vec<String> = labels.iter().map(|label| label.to_string()).collect();
      format!("switch ({})", names.join(", "))
    }
    Instruction::Const(value) => format!("ldc.{} {}", value.natural_type(), value),
    Instruction::Load(place) => format!("ld {}", place),
    Instruction::Store(place) => format!("st {}", place),
    Instruction::Address(place) => format!("lda {}", place),
    Instruction::LoadIndirect(ty) => format!("ldind.{}", ty),
    Instruction::StoreIndirect(ty) => format!("stind.{}", ty),
    Instruction::Arith(op, ty) => format!("{}.{}", arith_name(*op), ty),
    Instruction::Compare(relation, ty) => format!("c{}.{}", relation_suffix(*relation), ty),
    Instruction::Compare3 => "cmp3".to_string(),
    Instruction::Convert(from, to) => format!("conv {} -> {}", from, to),
    Instruction::NewArray(element, dims) => format!("newarr.{} {}", element, dims),
    Instruction::LoadElement(element) => format!("ldelem.{}", element),
    Instruction::StoreElement(element) => format!("stelem.{}", element),
    Instruction::ElementAddress(element) => format!("ldelema.{}", element),
    Instruction::NewObject(ty, args) => format!("newobj {}({})", ty, types_text(args)),
    Instruction::LoadProcedure(name) => format!("ldproc {}", name),
    Instruction::Call(name, args, result) => {
      format!("call {}({}) -> {}", name, types_text(args), result)
    }
    Instruction::CallIndirect(args, result) => {
      format!("calli ({}) -> {}", types_text(args), result)
    }
    Instruction::Dup => "dup".to_string(),
    Instruction::Pop => "pop".to_string(),
    Instruction::Return => "ret".to_string(),
    Instruction::Protect(handler) => format!("try {}", handler),
    Instruction::Unprotect => "endtry".to_string(),
    Instruction::Handler(handler) => format!("catch {}", handler),
  }
}

fn arith_name(op: ArithOp) -> &'static str {
  match op {
    ArithOp::Add => "add",
    ArithOp::Sub => "sub",
    ArithOp::Mul => "mul",
    ArithOp::Div => "div",
    ArithOp::Rem => "rem",
    ArithOp::Neg => "neg",
    ArithOp::And => "and",
    ArithOp::Or => "or",
    ArithOp::Xor => "xor",
    ArithOp::Not => "not",
  }
}

fn relation_suffix(relation: Relation) -> &'static str {
  match relation {
    Relation::Equal => "eq",
    Relation::NotEqual => "ne",
    Relation::Less => "lt",
    Relation::LessOrEqual => "le",
    Relation::Greater => "gt",
    Relation::GreaterOrEqual => "ge",
  }
}

fn condition_suffix(condition: Condition) -> &'static str {
  condition.relation().map_or("", relation_suffix)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emitter::machine::Machine;
  use crate::emitter::{Emitter, Place, Signature};
  use frontend::ast::Constant;
  use pretty_assertions::assert_eq;

  #[test]
  fn listing_shows_statics_locals_and_code() {
    let mut machine = Machine::new();
    machine.declare_static("BLK.0", &Type::Integer, None);
    machine
      .begin_procedure(Signature {
        name: "MAIN".to_string(),
        params: vec![],
        result: Type::None,
        entry: true,
      })
      .unwrap();
    let i = machine.declare_local("I", &Type::Integer);
    let done = machine.create_label();
    machine.load_constant(&Constant::Integer(3));
    machine.store(&Place::Local(i));
    machine.load(&Place::Local(i));
    machine.load_constant(&Constant::Integer(0));
    machine.branch_if(Condition::LessOrEqual, &Type::Integer, done);
    machine.mark_label(done).unwrap();
    machine.ret();
    machine.end_procedure().unwrap();

    assert_eq!(
      generate_listing(machine.image()),
      ".static BLK.0 : integer\n\
       \n.program MAIN()\n\
       \x20 .local 0 I : integer\n\
       \x20 ldc.integer 3\n\
       \x20 st local 0\n\
       \x20 ld local 0\n\
       \x20 ldc.integer 0\n\
       \x20 brle.integer L0\n\
       L0:\n\
       \x20 ret\n\
       .end\n"
    );
  }
}
