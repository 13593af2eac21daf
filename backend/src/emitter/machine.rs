use super::temps::TempPool;
use super::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Instruction {
  /// Position of a marked label.
  Label(Label),
  Branch(Label),
  BranchIf(Condition, Type, Label),
  Dispatch(Vec<Label>),
  Const(Constant),
  Load(Place),
  Store(Place),
  Address(Place),
  LoadIndirect(Type),
  StoreIndirect(Type),
  Arith(ArithOp, Type),
  Compare(Relation, Type),
  Compare3,
  Convert(Type, Type),
  NewArray(Type, usize),
  LoadElement(Type),
  StoreElement(Type),
  ElementAddress(Type),
  NewObject(Type, Vec<Type>),
  LoadProcedure(String),
  Call(String, Vec<Type>, Type),
  CallIndirect(Vec<Type>, Type),
  Dup,
  Pop,
  Return,
  Protect(Label),
  Unprotect,
  Handler(Label),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaticField {
  pub name: String,
  pub ty: Type,
  pub size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcedureImage {
  pub signature: Signature,
  pub locals: Vec<(String, Type)>,
  pub temps: u32,
  /// Instruction index of every label, indexed by label number.
  pub labels: Vec<usize>,
  pub code: Vec<Instruction>,
}

/// A finished program.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Image {
  pub statics: Vec<StaticField>,
  pub procedures: Vec<ProcedureImage>,
}

impl Image {
  pub fn procedure(&self, name: &str) -> Option<&ProcedureImage> {
    self
      .procedures
      .iter()
      .find(|procedure| procedure.signature.name == name)
  }

  pub fn entry(&self) -> Option<&ProcedureImage> {
    self
      .procedures
      .iter()
      .find(|procedure| procedure.signature.entry)
  }
}

#[derive(Debug)]
struct OpenProcedure {
  signature: Signature,
  locals: Vec<(String, Type)>,
  labels: Vec<Option<usize>>,
  code: Vec<Instruction>,
  temps: TempPool,
}

/// Records everything the generator emits into an [`Image`].
#[derive(Debug, Default)]
pub struct Machine {
  image: Image,
  open: Option<OpenProcedure>,
}

impl Machine {
  pub fn new() -> Self {
    Machine::default()
  }

  pub fn image(&self) -> &Image {
    &self.image
  }

  pub fn into_image(self) -> Image {
    self.image
  }

  /// Drops a procedure left open by a failed generation.
  pub fn discard_open(&mut self) {
    if let Some(open) = self.open.take() {
      log::debug!("discarding partial procedure `{}`", open.signature.name);
    }
  }

  fn push(&mut self, instruction: Instruction) {
    match &mut self.open {
      Some(open) => {
        log::trace!("{}: {:?}", open.signature.name, instruction);
        open.code.push(instruction);
      }
      None => log::error!("instruction {:?} emitted outside of a procedure", instruction),
    }
  }

  fn open(&mut self) -> Result<&mut OpenProcedure, ContractViolation> {
    self.open.as_mut().ok_or(ContractViolation::NoProcedure)
  }
}

impl Emitter for Machine {
  fn begin_procedure(&mut self, signature: Signature) -> Result<(), ContractViolation> {
    if self.open.is_some() {
      return Err(ContractViolation::NestedProcedure(signature.name));
    }
    log::debug!("begin procedure `{}`", signature.name);
    self.open = Some(OpenProcedure {
      signature,
      locals: Vec::new(),
      labels: Vec::new(),
      code: Vec::new(),
      temps: TempPool::new(),
    });
    Ok(())
  }

  fn end_procedure(&mut self) -> Result<(), ContractViolation> {
    let open = self.open.take().ok_or(ContractViolation::NoProcedure)?;
    let mut labels = Vec::with_capacity(open.labels.len());
    for (index, position) in open.labels.iter().enumerate() {
      match position {
        Some(position) => labels.push(*position),
        None => {
          return Err(ContractViolation::UnmarkedLabel(
            Label(index as u32),
            open.signature.name,
          ))
        }
      }
    }
    log::debug!(
      "end procedure `{}`: {} instructions, {} temporaries",
      open.signature.name,
      open.code.len(),
      open.temps.high_water()
    );
    self.image.procedures.push(ProcedureImage {
      signature: open.signature,
      locals: open.locals,
      temps: open.temps.high_water(),
      labels,
      code: open.code,
    });
    Ok(())
  }

  fn declare_local(&mut self, name: &str, ty: &Type) -> LocalId {
    match &mut self.open {
      Some(open) => {
        open.locals.push((name.to_string(), ty.clone()));
        LocalId(open.locals.len() as u32 - 1)
      }
      None => {
        log::error!("local `{}` declared outside of a procedure", name);
        LocalId(0)
      }
    }
  }

  fn declare_static(&mut self, name: &str, ty: &Type, size: Option<usize>) {
    if self.image.statics.iter().any(|field| field.name == name) {
      return;
    }
    self.image.statics.push(StaticField {
      name: name.to_string(),
      ty: ty.clone(),
      size,
    });
  }

  fn create_label(&mut self) -> Label {
    match &mut self.open {
      Some(open) => {
        open.labels.push(None);
        Label(open.labels.len() as u32 - 1)
      }
      None => Label(0),
    }
  }

  fn mark_label(&mut self, label: Label) -> Result<(), ContractViolation> {
    let open = self.open()?;
    let position = open.code.len();
    match open.labels.get_mut(label.0 as usize) {
      None => Err(ContractViolation::UnknownLabel(label)),
      Some(Some(_)) => Err(ContractViolation::LabelMarkedTwice(label)),
      Some(slot) => {
        *slot = Some(position);
        open.code.push(Instruction::Label(label));
        Ok(())
      }
    }
  }

  fn branch(&mut self, label: Label) {
    self.push(Instruction::Branch(label));
  }

  fn branch_if(&mut self, condition: Condition, ty: &Type, label: Label) {
    self.push(Instruction::BranchIf(condition, ty.clone(), label));
  }

  fn dispatch_table(&mut self, labels: &[Label]) {
    self.push(Instruction::Dispatch(labels.to_vec()));
  }

  fn load_constant(&mut self, value: &Constant) {
    self.push(Instruction::Const(value.clone()));
  }

  fn load(&mut self, place: &Place) {
    self.push(Instruction::Load(place.clone()));
  }

  fn store(&mut self, place: &Place) {
    self.push(Instruction::Store(place.clone()));
  }

  fn load_address(&mut self, place: &Place) {
    self.push(Instruction::Address(place.clone()));
  }

  fn load_indirect(&mut self, ty: &Type) {
    self.push(Instruction::LoadIndirect(ty.clone()));
  }

  fn store_indirect(&mut self, ty: &Type) {
    self.push(Instruction::StoreIndirect(ty.clone()));
  }

  fn arith(&mut self, op: ArithOp, ty: &Type) {
    self.push(Instruction::Arith(op, ty.clone()));
  }

  fn compare(&mut self, relation: Relation, ty: &Type) {
    self.push(Instruction::Compare(relation, ty.clone()));
  }

  fn compare3(&mut self) {
    self.push(Instruction::Compare3);
  }

  fn convert(&mut self, from: &Type, to: &Type) {
    self.push(Instruction::Convert(from.clone(), to.clone()));
  }

  fn create_array(&mut self, element: &Type, dims: usize) {
    self.push(Instruction::NewArray(element.clone(), dims));
  }

  fn load_element(&mut self, element: &Type) {
    self.push(Instruction::LoadElement(element.clone()));
  }

  fn store_element(&mut self, element: &Type) {
    self.push(Instruction::StoreElement(element.clone()));
  }

  fn element_address(&mut self, element: &Type) {
    self.push(Instruction::ElementAddress(element.clone()));
  }

  fn create_object(&mut self, ty: &Type, args: &[Type]) {
    self.push(Instruction::NewObject(ty.clone(), args.to_vec()));
  }

  fn load_procedure(&mut self, name: &str) {
    self.push(Instruction::LoadProcedure(name.to_string()));
  }

  fn call(&mut self, name: &str, args: &[Type], result: &Type) {
    self.push(Instruction::Call(name.to_string(), args.to_vec(), result.clone()));
  }

  fn call_indirect(&mut self, args: &[Type], result: &Type) {
    self.push(Instruction::CallIndirect(args.to_vec(), result.clone()));
  }

  fn duplicate(&mut self) {
    self.push(Instruction::Dup);
  }

  fn pop(&mut self) {
    self.push(Instruction::Pop);
  }

  fn ret(&mut self) {
    self.push(Instruction::Return);
  }

  fn begin_protected(&mut self, handler: Label) {
    self.push(Instruction::Protect(handler));
  }

  fn end_protected(&mut self) {
    self.push(Instruction::Unprotect);
  }

  fn begin_handler(&mut self, handler: Label) -> Result<(), ContractViolation> {
    self.mark_label(handler)?;
    self.push(Instruction::Handler(handler));
    Ok(())
  }

  fn acquire_temporary(&mut self, ty: &Type) -> TempHandle {
    match &mut self.open {
      Some(open) => open.temps.acquire(ty),
      None => TempHandle { id: 0, slot: 0 },
    }
  }

  fn release_temporary(&mut self, handle: TempHandle) -> Result<(), ContractViolation> {
    self.open()?.temps.release(handle)
  }

  fn outstanding_temporaries(&self) -> usize {
    self
      .open
      .as_ref()
      .map_or(0, |open| open.temps.outstanding())
  }

  fn live_temporaries(&self) -> Vec<(TempHandle, Type)> {
    self
      .open
      .as_ref()
      .map_or_else(Vec::new, |open| open.temps.leaked())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  fn signature(name: &str) -> Signature {
    Signature {
      name: name.to_string(),
      params: vec![],
      result: Type::None,
      entry: true,
    }
  }

  #[test]
  fn labels_resolve_to_positions() {
    let mut machine = Machine::new();
    machine.begin_procedure(signature("MAIN")).unwrap();
    let top = machine.create_label();
    machine.load_constant(&Constant::Integer(1));
    machine.pop();
    machine.mark_label(top).unwrap();
    machine.ret();
    machine.end_procedure().unwrap();
    let image = machine.into_image();
    let main = image.entry().unwrap();
    assert_eq!(main.labels, vec![2]);
    assert_eq!(main.code[2], Instruction::Label(top));
  }

  #[test]
  fn label_discipline_is_enforced() {
    let mut machine = Machine::new();
    machine.begin_procedure(signature("P")).unwrap();
    let a = machine.create_label();
    let b = machine.create_label();
    machine.mark_label(a).unwrap();
    assert_eq!(machine.mark_label(a), Err(ContractViolation::LabelMarkedTwice(a)));
    assert_eq!(
      machine.mark_label(Label(7)),
      Err(ContractViolation::UnknownLabel(Label(7)))
    );
    machine.branch(b);
    assert_eq!(
      machine.end_procedure(),
      Err(ContractViolation::UnmarkedLabel(b, "P".to_string()))
    );
  }

  #[test]
  fn procedures_do_not_nest() {
    let mut machine = Machine::new();
    machine.begin_procedure(signature("A")).unwrap();
    assert_eq!(
      machine.begin_procedure(signature("B")),
      Err(ContractViolation::NestedProcedure("B".to_string()))
    );
    machine.discard_open();
    assert_eq!(machine.end_procedure(), Err(ContractViolation::NoProcedure));
  }

  #[test]
  fn temporaries_are_tracked_per_procedure() {
    let mut machine = Machine::new();
    machine.begin_procedure(signature("P")).unwrap();
    let t = machine.acquire_temporary(&Type::Integer);
    assert_eq!(machine.outstanding_temporaries(), 1);
    assert_eq!(machine.live_temporaries(), vec![(t, Type::Integer)]);
    machine.release_temporary(t).unwrap();
    assert!(machine.live_temporaries().is_empty());
    assert_eq!(
      machine.release_temporary(t),
      Err(ContractViolation::DoubleRelease(t))
    );
    machine.end_procedure().unwrap();
    assert_eq!(machine.image().procedures[0].temps, 1);
  }
}
