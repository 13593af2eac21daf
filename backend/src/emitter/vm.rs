//! Executes an [`Image`] with a small built-in runtime (list-directed I/O,
//! string helpers and common intrinsics).

use super::machine::{Image, Instruction, ProcedureImage};
use super::{ArithOp, Condition, Label, Place, Relation};
use frontend::ast::{fit_width, Type};
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Unset,
  Int(i64),
  Real(f32),
  Double(f64),
  Complex(f64, f64),
  Bool(bool),
  Str(String),
  Ref(Ref),
  Array(usize),
  Proc(String),
}

/// Target of a reference value.
#[derive(Debug, Clone, PartialEq)]
pub enum Ref {
  Local { frame: usize, index: usize },
  Param { frame: usize, index: usize },
  Temp { frame: usize, slot: usize },
  Static(String),
  Element { array: usize, index: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Trap {
  #[error("division by zero")]
  DivisionByZero,
  #[error("index {index} is out of bounds for an array of {len} element(s)")]
  OutOfBounds { index: i64, len: usize },
  #[error("no procedure named `{0}`")]
  UnknownProcedure(String),
  #[error("evaluation stack underflow")]
  StackUnderflow,
  #[error("type error: {0}")]
  TypeError(String),
  #[error("the image has no entry procedure")]
  NoEntry,
  #[error("input exhausted")]
  InputExhausted,
  #[error("cannot read `{0}` as {1}")]
  BadInput(String, Type),
  #[error("step limit of {0} exceeded")]
  StepLimit(u64),
  #[error("jump to label {0} outside of its procedure")]
  BadLabel(Label),
}

type Result<T> = std::result::Result<T, Trap>;

/// One element read or written, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElementAccess {
  pub array: usize,
  pub index: usize,
  pub write: bool,
}

#[derive(Debug)]
struct Frame {
  procedure: usize,
  pc: usize,
  base: usize,
  params: Vec<Value>,
  locals: Vec<Value>,
  temps: Vec<Value>,
}

#[derive(Debug)]
struct Handler {
  frame: usize,
  label: Label,
  stack: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
  Read,
  Write,
}

pub struct Vm<'i> {
  image: &'i Image,
  statics: HashMap<String, Value>,
  arrays: Vec<Vec<Value>>,
  frames: Vec<Frame>,
  stack: Vec<Value>,
  handlers: Vec<Handler>,
  direction: Direction,
  record: Vec<String>,
  input: VecDeque<String>,
  tokens: VecDeque<String>,
  steps: u64,
  step_limit: u64,
  /// One line per completed WRITE.
  pub output: Vec<String>,
  /// Failures reported by protected-region handlers.
  pub errors: Vec<String>,
  pub accesses: Vec<ElementAccess>,
}

enum Step {
  Continue,
  Finished(Option<Value>),
}

impl Value {
  pub fn default_for(ty: &Type) -> Value {
    match ty {
      Type::Integer => Value::Int(0),
      Type::Real => Value::Real(0.0),
      Type::Double => Value::Double(0.0),
      Type::Complex => Value::Complex(0.0, 0.0),
      Type::Logical => Value::Bool(false),
      Type::Character => Value::Str(String::new()),
      Type::FixedCharacter(width) => Value::Str(fit_width("", *width)),
      _ => Value::Unset,
    }
  }

  fn as_int(&self) -> Result<i64> {
    match self {
      Value::Int(n) => Ok(*n),
      Value::Real(x) => Ok(*x as i64),
      Value::Double(x) => Ok(*x as i64),
      other => Err(Trap::TypeError(format!("expected an integer, found {:?}", other))),
    }
  }

  fn as_f64(&self) -> Result<f64> {
    match self {
      Value::Int(n) => Ok(*n as f64),
      Value::Real(x) => Ok(*x as f64),
      Value::Double(x) => Ok(*x),
      Value::Complex(re, _) => Ok(*re),
      other => Err(Trap::TypeError(format!("expected a number, found {:?}", other))),
    }
  }

  fn as_complex(&self) -> Result<(f64, f64)> {
    match self {
      Value::Complex(re, im) => Ok((*re, *im)),
      other => other.as_f64().map(|re| (re, 0.0)),
    }
  }

  fn as_bool(&self) -> Result<bool> {
    match self {
      Value::Bool(b) => Ok(*b),
      other => Err(Trap::TypeError(format!("expected a logical, found {:?}", other))),
    }
  }

  fn as_str(&self) -> Result<&str> {
    match self {
      Value::Str(s) => Ok(s),
      other => Err(Trap::TypeError(format!("expected a string, found {:?}", other))),
    }
  }

  fn display(&self) -> String {
    match self {
      Value::Int(n) => n.to_string(),
      Value::Real(x) => x.to_string(),
      Value::Double(x) => x.to_string(),
      Value::Complex(re, im) => format!("({},{})", re, im),
      Value::Bool(b) => if *b { "T" } else { "F" }.to_string(),
      Value::Str(s) => s.clone(),
      other => format!("{:?}", other),
    }
  }
}

/// Fortran comparison: the shorter operand is padded with blanks.
fn compare_padded(a: &str, b: &str) -> Ordering {
  let width = a.chars().count().max(b.chars().count()) as u32;
  fit_width(a, width).cmp(&fit_width(b, width))
}

fn convert_value(value: Value, to: &Type) -> Result<Value> {
  Ok(match (to, value) {
    (Type::Integer, Value::Complex(re, _)) => Value::Int(re as i64),
    (Type::Integer, v) => Value::Int(v.as_int()?),
    (Type::Real, v) => Value::Real(v.as_f64()? as f32),
    (Type::Double, v) => Value::Double(v.as_f64()?),
    (Type::Complex, v) => {
      let (re, im) = v.as_complex()?;
      Value::Complex(re, im)
    }
    (Type::FixedCharacter(width), Value::Str(s)) => Value::Str(fit_width(&s, *width)),
    (_, v) => v,
  })
}

fn compare_values(relation: Relation, ty: &Type, a: &Value, b: &Value) -> Result<bool> {
  let ordering = match ty {
    Type::Integer => a.as_int()?.cmp(&b.as_int()?),
    Type::Real | Type::Double => match a.as_f64()?.partial_cmp(&b.as_f64()?) {
      Some(ordering) => ordering,
      None => return Ok(relation == Relation::NotEqual),
    },
    Type::Complex => {
      let equal = a.as_complex()? == b.as_complex()?;
      return match relation {
        Relation::Equal => Ok(equal),
        Relation::NotEqual => Ok(!equal),
        _ => Err(Trap::TypeError("complex values are unordered".to_string())),
      };
    }
    Type::Logical => a.as_bool()?.cmp(&b.as_bool()?),
    Type::Character | Type::FixedCharacter(_) => compare_padded(a.as_str()?, b.as_str()?),
    other => return Err(Trap::TypeError(format!("cannot compare {}", other))),
  };
  Ok(relation.holds(ordering))
}

fn arith_values(op: ArithOp, ty: &Type, a: Value, b: Option<Value>) -> Result<Value> {
  let operand = |b: &Option<Value>| -> Result<Value> { b.clone().ok_or(Trap::StackUnderflow) };
  match ty {
    Type::Integer => {
      let x = a.as_int()?;
      if op == ArithOp::Neg {
        return Ok(Value::Int(x.wrapping_neg()));
      }
      if op == ArithOp::Not {
        return Ok(Value::Int(!x));
      }
      let y = operand(&b)?.as_int()?;
      Ok(Value::Int(match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Div | ArithOp::Rem if y == 0 => return Err(Trap::DivisionByZero),
        ArithOp::Div => x.wrapping_div(y),
        ArithOp::Rem => x.wrapping_rem(y),
        ArithOp::And => x & y,
        ArithOp::Or => x | y,
        ArithOp::Xor => x ^ y,
        ArithOp::Neg | ArithOp::Not => unreachable!("unary operators handled above"),
      }))
    }
    Type::Real | Type::Double => {
      let x = a.as_f64()?;
      let result = match op {
        ArithOp::Neg => -x,
        _ => {
          let y = operand(&b)?.as_f64()?;
          match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            ArithOp::Div => x / y,
            ArithOp::Rem => x % y,
            other => return Err(Trap::TypeError(format!("{:?} on {}", other, ty))),
          }
        }
      };
      Ok(if *ty == Type::Real {
        Value::Real(result as f32)
      } else {
        Value::Double(result)
      })
    }
    Type::Complex => {
      let (a, b0) = a.as_complex()?;
      if op == ArithOp::Neg {
        return Ok(Value::Complex(-a, -b0));
      }
      let (c, d) = operand(&b)?.as_complex()?;
      let (re, im) = match op {
        ArithOp::Add => (a + c, b0 + d),
        ArithOp::Sub => (a - c, b0 - d),
        ArithOp::Mul => (a * c - b0 * d, a * d + b0 * c),
        ArithOp::Div => {
          let denominator = c * c + d * d;
          (
            (a * c + b0 * d) / denominator,
            (b0 * c - a * d) / denominator,
          )
        }
        other => return Err(Trap::TypeError(format!("{:?} on complex", other))),
      };
      Ok(Value::Complex(re, im))
    }
    Type::Logical => {
      let x = a.as_bool()?;
      if op == ArithOp::Not {
        return Ok(Value::Bool(!x));
      }
      let y = operand(&b)?.as_bool()?;
      match op {
        ArithOp::And => Ok(Value::Bool(x && y)),
        ArithOp::Or => Ok(Value::Bool(x || y)),
        ArithOp::Xor => Ok(Value::Bool(x != y)),
        other => Err(Trap::TypeError(format!("{:?} on logical", other))),
      }
    }
    other => Err(Trap::TypeError(format!("arithmetic on {}", other))),
  }
}

impl<'i> Vm<'i> {
  pub fn new(image: &'i Image) -> Self {
    let mut vm = Vm {
      image,
      statics: HashMap::new(),
      arrays: Vec::new(),
      frames: Vec::new(),
      stack: Vec::new(),
      handlers: Vec::new(),
      direction: Direction::Write,
      record: Vec::new(),
      input: VecDeque::new(),
      tokens: VecDeque::new(),
      steps: 0,
      step_limit: 10_000_000,
      output: Vec::new(),
      errors: Vec::new(),
      accesses: Vec::new(),
    };
    for field in &image.statics {
      let value = match field.size {
        Some(size) => vm.new_array(field.ty.element(), size),
        None => Value::default_for(&field.ty),
      };
      vm.statics.insert(field.name.clone(), value);
    }
    vm
  }

  /// Lines consumed by READ statements.
  pub fn with_input<I: IntoIterator<Item = String>>(mut self, lines: I) -> Self {
    self.input.extend(lines);
    self
  }

  pub fn with_step_limit(mut self, limit: u64) -> Self {
    self.step_limit = limit;
    self
  }

  pub fn array(&self, id: usize) -> Option<&[Value]> {
    self.arrays.get(id).map(Vec::as_slice)
  }

  pub fn static_value(&self, name: &str) -> Option<&Value> {
    self.statics.get(name)
  }

  /// Runs the entry procedure to completion.
  pub fn run(&mut self) -> Result<()> {
    let entry = self.image.entry().ok_or(Trap::NoEntry)?;
    let name = entry.signature.name.clone();
    self.invoke(&name, Vec::new()).map(|_| ())
  }

  /// Calls a procedure of the image with already-evaluated arguments.
  pub fn invoke(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>> {
    let depth = self.frames.len();
    self.enter(name, args)?;
    loop {
      match self.step(depth) {
        Ok(Step::Continue) => {}
        Ok(Step::Finished(value)) => return Ok(value),
        Err(trap) => self.unwind(trap, depth)?,
      }
    }
  }

  fn new_array(&mut self, element: &Type, size: usize) -> Value {
    self.arrays.push(vec![Value::default_for(element); size]);
    Value::Array(self.arrays.len() - 1)
  }

  fn procedure_index(&self, name: &str) -> Option<usize> {
    self
      .image
      .procedures
      .iter()
      .position(|procedure| procedure.signature.name == name)
  }

  fn enter(&mut self, name: &str, params: Vec<Value>) -> Result<()> {
    let index = self
      .procedure_index(name)
      .ok_or_else(|| Trap::UnknownProcedure(name.to_string()))?;
    let procedure: &ProcedureImage = &self.image.procedures[index];
    self.frames.push(Frame {
      procedure: index,
      pc: 0,
      base: self.stack.len(),
      params,
      locals: procedure
        .locals
        .iter()
        .map(|(_, ty)| Value::default_for(ty))
        .collect(),
      temps: vec![Value::Unset; procedure.temps as usize],
    });
    Ok(())
  }

  fn unwind(&mut self, trap: Trap, depth: usize) -> Result<()> {
    let handler = match self.handlers.last() {
      Some(handler) if handler.frame >= depth => self.handlers.pop(),
      _ => None,
    };
    let Some(handler) = handler else {
      self.frames.truncate(depth);
      return Err(trap);
    };
    log::debug!("trap `{}` caught by handler {}", trap, handler.label);
    self.frames.truncate(handler.frame + 1);
    self.stack.truncate(handler.stack);
    self.stack.push(Value::Str(trap.to_string()));
    self.jump(handler.label)
  }

  fn pop(&mut self) -> Result<Value> {
    self.stack.pop().ok_or(Trap::StackUnderflow)
  }

  fn pop_n(&mut self, n: usize) -> Result<Vec<Value>> {
    if self.stack.len() < n {
      return Err(Trap::StackUnderflow);
    }
    Ok(self.stack.split_off(self.stack.len() - n))
  }

  fn frame(&mut self) -> Result<&mut Frame> {
    self.frames.last_mut().ok_or(Trap::StackUnderflow)
  }

  fn jump(&mut self, label: Label) -> Result<()> {
    let image = self.image;
    let frame = self.frame()?;
    let position = image.procedures[frame.procedure]
      .labels
      .get(label.0 as usize)
      .copied()
      .ok_or(Trap::BadLabel(label))?;
    frame.pc = position;
    Ok(())
  }

  fn reference(&self, place: &Place) -> Result<Ref> {
    let frame = self.frames.len().checked_sub(1).ok_or(Trap::StackUnderflow)?;
    Ok(match place {
      Place::Local(id) => Ref::Local {
        frame,
        index: id.0 as usize,
      },
      Place::Param(index) => Ref::Param {
        frame,
        index: *index as usize,
      },
      Place::Temp(handle) => Ref::Temp {
        frame,
        slot: handle.slot as usize,
      },
      Place::Static(name) => Ref::Static(name.clone()),
    })
  }

  fn cell(&mut self, target: &Ref, write: bool) -> Result<&mut Value> {
    let missing = || Trap::TypeError(format!("dangling reference {:?}", target));
    match target {
      Ref::Local { frame, index } => self
        .frames
        .get_mut(*frame)
        .and_then(|f| f.locals.get_mut(*index))
        .ok_or_else(missing),
      Ref::Param { frame, index } => self
        .frames
        .get_mut(*frame)
        .and_then(|f| f.params.get_mut(*index))
        .ok_or_else(missing),
      Ref::Temp { frame, slot } => self
        .frames
        .get_mut(*frame)
        .and_then(|f| f.temps.get_mut(*slot))
        .ok_or_else(missing),
      Ref::Static(name) => self.statics.get_mut(name).ok_or_else(missing),
      Ref::Element { array, index } => {
        self.accesses.push(ElementAccess {
          array: *array,
          index: *index,
          write,
        });
        let elements = self.arrays.get_mut(*array).ok_or_else(missing)?;
        let len = elements.len();
        elements.get_mut(*index).ok_or(Trap::OutOfBounds {
          index: *index as i64,
          len,
        })
      }
    }
  }

  fn read(&mut self, target: &Ref) -> Result<Value> {
    self.cell(target, false).map(|value| value.clone())
  }

  fn write(&mut self, target: &Ref, value: Value) -> Result<()> {
    *self.cell(target, true)? = value;
    Ok(())
  }

  fn element_ref(&mut self) -> Result<Ref> {
    let index = self.pop()?.as_int()?;
    let array = match self.pop()? {
      Value::Array(id) => id,
      other => return Err(Trap::TypeError(format!("expected an array, found {:?}", other))),
    };
    let len = self.arrays.get(array).map_or(0, Vec::len);
    if index < 0 || index as usize >= len {
      return Err(Trap::OutOfBounds { index, len });
    }
    Ok(Ref::Element {
      array,
      index: index as usize,
    })
  }

  fn step(&mut self, depth: usize) -> Result<Step> {
    self.steps += 1;
    if self.steps > self.step_limit {
      return Err(Trap::StepLimit(self.step_limit));
    }
    let image = self.image;
    let frame = self.frame()?;
    let code = &image.procedures[frame.procedure].code;
    let Some(instruction) = code.get(frame.pc) else {
      return self.leave(depth);
    };
    frame.pc += 1;

    match instruction {
      Instruction::Label(_) | Instruction::Handler(_) => {}
      Instruction::Branch(label) => self.jump(*label)?,
      Instruction::BranchIf(condition, ty, label) => {
        let taken = match condition.relation() {
          None => {
            let value = self.pop()?.as_bool()?;
            value == (*condition == Condition::True)
          }
          Some(relation) => {
            let b = self.pop()?;
            let a = self.pop()?;
            compare_values(relation, ty, &a, &b)?
          }
        };
        if taken {
          self.jump(*label)?;
        }
      }
      Instruction::Dispatch(labels) => {
        let selector = self.pop()?.as_int()?;
        if selector >= 0 && (selector as usize) < labels.len() {
          self.jump(labels[selector as usize])?;
        }
      }
      Instruction::Const(constant) => {
        let value = match constant {
          frontend::ast::Constant::Integer(n) => Value::Int(*n),
          frontend::ast::Constant::Real(x) => Value::Real(*x),
          frontend::ast::Constant::Double(x) => Value::Double(*x),
          frontend::ast::Constant::Complex(re, im) => Value::Complex(*re, *im),
          frontend::ast::Constant::Logical(b) => Value::Bool(*b),
          frontend::ast::Constant::Character(s) => Value::Str(s.clone()),
        };
        self.stack.push(value);
      }
      Instruction::Load(place) => {
        let target = self.reference(place)?;
        let value = self.read(&target)?;
        self.stack.push(value);
      }
      Instruction::Store(place) => {
        let target = self.reference(place)?;
        let value = self.pop()?;
        self.write(&target, value)?;
      }
      Instruction::Address(place) => {
        let target = self.reference(place)?;
        self.stack.push(Value::Ref(target));
      }
      Instruction::LoadIndirect(_) => match self.pop()? {
        Value::Ref(target) => {
          let value = self.read(&target)?;
          self.stack.push(value);
        }
        other => return Err(Trap::TypeError(format!("expected a reference, found {:?}", other))),
      },
      Instruction::StoreIndirect(ty) => {
        let value = convert_value(self.pop()?, ty)?;
        match self.pop()? {
          Value::Ref(target) => self.write(&target, value)?,
          other => return Err(Trap::TypeError(format!("expected a reference, found {:?}", other))),
        }
      }
      Instruction::Arith(op, ty) => {
        let result = if op.is_unary() {
          let a = self.pop()?;
          arith_values(*op, ty, a, None)?
        } else {
          let b = self.pop()?;
          let a = self.pop()?;
          arith_values(*op, ty, a, Some(b))?
        };
        self.stack.push(result);
      }
      Instruction::Compare(relation, ty) => {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = compare_values(*relation, ty, &a, &b)?;
        self.stack.push(Value::Bool(result));
      }
      Instruction::Compare3 => {
        let b = self.pop()?;
        let a = self.pop()?;
        let ordering = compare_padded(a.as_str()?, b.as_str()?);
        self.stack.push(Value::Int(ordering as i64));
      }
      Instruction::Convert(_, to) => {
        let value = self.pop()?;
        self.stack.push(convert_value(value, to)?);
      }
      Instruction::NewArray(element, dims) => {
        let extents = self.pop_n(*dims)?;
        let mut size = 1usize;
        for extent in extents {
          size *= extent.as_int()?.max(0) as usize;
        }
        let array = self.new_array(element, size);
        self.stack.push(array);
      }
      Instruction::LoadElement(_) => {
        let target = self.element_ref()?;
        let value = self.read(&target)?;
        self.stack.push(value);
      }
      Instruction::StoreElement(element) => {
        let value = convert_value(self.pop()?, element)?;
        let target = self.element_ref()?;
        self.write(&target, value)?;
      }
      Instruction::ElementAddress(_) => {
        let target = self.element_ref()?;
        self.stack.push(Value::Ref(target));
      }
      Instruction::NewObject(ty, args) => {
        let args = self.pop_n(args.len())?;
        let value = match (ty, args.as_slice()) {
          (Type::Complex, [re]) => Value::Complex(re.as_f64()?, 0.0),
          (Type::Complex, [re, im]) => Value::Complex(re.as_f64()?, im.as_f64()?),
          _ => return Err(Trap::TypeError(format!("cannot construct {}", ty))),
        };
        self.stack.push(value);
      }
      Instruction::LoadProcedure(name) => self.stack.push(Value::Proc(name.clone())),
      Instruction::Call(name, args, result) => {
        let args = self.pop_n(args.len())?;
        self.call(name, args, result)?;
      }
      Instruction::CallIndirect(args, result) => {
        let args = self.pop_n(args.len())?;
        match self.pop()? {
          Value::Proc(name) => self.call(&name, args, result)?,
          other => return Err(Trap::TypeError(format!("expected a procedure, found {:?}", other))),
        }
      }
      Instruction::Dup => {
        let value = self.stack.last().cloned().ok_or(Trap::StackUnderflow)?;
        self.stack.push(value);
      }
      Instruction::Pop => {
        self.pop()?;
      }
      Instruction::Return => return self.leave(depth),
      Instruction::Protect(label) => {
        let frame = self.frames.len() - 1;
        self.handlers.push(Handler {
          frame,
          label: *label,
          stack: self.stack.len(),
        });
      }
      Instruction::Unprotect => {
        self.handlers.pop();
      }
    }
    Ok(Step::Continue)
  }

  fn leave(&mut self, depth: usize) -> Result<Step> {
    let image = self.image;
    let frame = self.frames.pop().ok_or(Trap::StackUnderflow)?;
    let has_result = image.procedures[frame.procedure].signature.result != Type::None;
    let value = if has_result { Some(self.pop()?) } else { None };
    self.stack.truncate(frame.base);
    let live = self.frames.len();
    self.handlers.retain(|handler| handler.frame < live);
    if live == depth {
      return Ok(Step::Finished(value));
    }
    if let Some(value) = value {
      self.stack.push(value);
    }
    Ok(Step::Continue)
  }

  fn call(&mut self, name: &str, args: Vec<Value>, result: &Type) -> Result<()> {
    if self.procedure_index(name).is_some() {
      return self.enter(name, args);
    }
    let value = self.builtin(name, args, result)?;
    if *result != Type::None {
      self.stack.push(convert_value(value, result)?);
    }
    Ok(())
  }

  fn next_token(&mut self) -> Result<String> {
    loop {
      if let Some(token) = self.tokens.pop_front() {
        return Ok(token);
      }
      let line = self.input.pop_front().ok_or(Trap::InputExhausted)?;
      self.tokens = line
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .map(str::to_string)
        .collect();
    }
  }

  fn read_item(&mut self, ty: &Type) -> Result<Value> {
    let token = self.next_token()?;
    let bad = || Trap::BadInput(token.clone(), ty.clone());
    Ok(match ty {
      Type::Integer => Value::Int(token.parse().map_err(|_| bad())?),
      Type::Real => Value::Real(token.parse().map_err(|_| bad())?),
      Type::Double => Value::Double(token.replace(['d', 'D'], "e").parse().map_err(|_| bad())?),
      Type::Logical => match token.trim_matches('.').to_ascii_uppercase().chars().next() {
        Some('T') => Value::Bool(true),
        Some('F') => Value::Bool(false),
        _ => return Err(bad()),
      },
      Type::Character | Type::FixedCharacter(_) => {
        convert_value(Value::Str(token.trim_matches('\'').to_string()), ty)?
      }
      _ => return Err(bad()),
    })
  }

  fn builtin(&mut self, name: &str, args: Vec<Value>, result: &Type) -> Result<Value> {
    let arg = |i: usize| -> Result<&Value> { args.get(i).ok_or(Trap::StackUnderflow) };
    let value = match name {
      "__begin_write" => {
        self.direction = Direction::Write;
        self.record.clear();
        Value::Unset
      }
      "__begin_read" => {
        self.direction = Direction::Read;
        self.tokens.clear();
        Value::Unset
      }
      "__end_io" => {
        if self.direction == Direction::Write {
          self.output.push(self.record.join(" "));
          self.record.clear();
        }
        Value::Unset
      }
      "__write_array" => {
        let items: Vec<String> = match arg(0)? {
          Value::Array(id) => self
            .arrays
            .get(*id)
            .map(|elements| elements.iter().map(Value::display).collect())
            .unwrap_or_default(),
          other => vec![other.display()],
        };
        self.record.extend(items);
        Value::Unset
      }
      _ if name.starts_with("__write_") => {
        self.record.push(arg(0)?.display());
        Value::Unset
      }
      _ if name.starts_with("__read_") => self.read_item(result)?,
      "__report_error" => {
        let message = arg(0)?.display();
        log::warn!("run-time failure: {}", message);
        self.errors.push(message);
        Value::Unset
      }
      "__concat" => Value::Str(format!("{}{}", arg(0)?.as_str()?, arg(1)?.as_str()?)),
      "__substr" => {
        let s: Vec<char> = arg(0)?.as_str()?.chars().collect();
        let (from, to) = substring_range(arg(1)?.as_int()?, arg(2)?.as_int()?, s.len());
        Value::Str(s[from..to].iter().collect())
      }
      "__set_substr" => {
        let target = match arg(0)? {
          Value::Ref(target) => target.clone(),
          other => return Err(Trap::TypeError(format!("expected a reference, found {:?}", other))),
        };
        let mut s: Vec<char> = self.read(&target)?.as_str()?.chars().collect();
        let (from, to) = substring_range(arg(1)?.as_int()?, arg(2)?.as_int()?, s.len());
        let replacement = fit_width(arg(3)?.as_str()?, (to - from) as u32);
        s.splice(from..to, replacement.chars());
        self.write(&target, Value::Str(s.into_iter().collect()))?;
        Value::Unset
      }
      "__pow" => power(arg(0)?, arg(1)?, result)?,
      _ => intrinsic(&name.to_ascii_uppercase(), &args)
        .ok_or_else(|| Trap::UnknownProcedure(name.to_string()))??,
    };
    Ok(value)
  }
}

/// Clamps a 1-based inclusive substring range to zero-based bounds.
fn substring_range(from: i64, to: i64, len: usize) -> (usize, usize) {
  let start = (from.max(1) as usize - 1).min(len);
  let end = (to.max(0) as usize).min(len).max(start);
  (start, end)
}

fn power(base: &Value, exponent: &Value, result: &Type) -> Result<Value> {
  match (result, exponent) {
    (Type::Integer, _) => {
      let (b, e) = (base.as_int()?, exponent.as_int()?);
      Ok(Value::Int(match e {
        e if e >= 0 => b.wrapping_pow(e.min(u32::MAX as i64) as u32),
        _ if b == 0 => return Err(Trap::DivisionByZero),
        _ if b == 1 => 1,
        _ if b == -1 => if e % 2 == 0 { 1 } else { -1 },
        _ => 0,
      }))
    }
    (Type::Complex, _) => {
      let (re, im) = base.as_complex()?;
      let (er, ei) = exponent.as_complex()?;
      if re == 0.0 && im == 0.0 {
        return Ok(Value::Complex(0.0, 0.0));
      }
      let (r, theta) = ((re * re + im * im).sqrt(), im.atan2(re));
      let ln_r = r.ln();
      let magnitude = (er * ln_r - ei * theta).exp();
      let angle = ei * ln_r + er * theta;
      Ok(Value::Complex(magnitude * angle.cos(), magnitude * angle.sin()))
    }
    (_, Value::Int(e)) => convert_value(Value::Double(base.as_f64()?.powi(*e as i32)), result),
    _ => convert_value(Value::Double(base.as_f64()?.powf(exponent.as_f64()?)), result),
  }
}

/// Intrinsics known to the runtime; `None` when `name` is not one.
fn intrinsic(name: &str, args: &[Value]) -> Option<Result<Value>> {
  let number = |i: usize| -> Result<f64> { args.get(i).ok_or(Trap::StackUnderflow)?.as_f64() };
  let integer = |i: usize| -> Result<i64> { args.get(i).ok_or(Trap::StackUnderflow)?.as_int() };
  let float = |f: fn(f64) -> f64| -> Result<Value> { Ok(Value::Double(f(number(0)?))) };
  let is_int = matches!(args.first(), Some(Value::Int(_)));
  Some(match name {
    "ABS" | "IABS" | "DABS" | "CABS" => match args.first() {
      Some(Value::Int(n)) => Ok(Value::Int(n.wrapping_abs())),
      Some(Value::Complex(re, im)) => Ok(Value::Double(re.hypot(*im))),
      _ => float(f64::abs),
    },
    "MOD" | "AMOD" | "DMOD" if is_int => match integer(1) {
      Ok(0) => Err(Trap::DivisionByZero),
      Ok(d) => integer(0).map(|n| Value::Int(n.wrapping_rem(d))),
      Err(e) => Err(e),
    },
    "MOD" | "AMOD" | "DMOD" => number(0).and_then(|n| Ok(Value::Double(n % number(1)?))),
    "SQRT" | "DSQRT" => float(f64::sqrt),
    "SIN" | "DSIN" => float(f64::sin),
    "COS" | "DCOS" => float(f64::cos),
    "TAN" | "DTAN" => float(f64::tan),
    "ATAN" | "DATAN" => float(f64::atan),
    "EXP" | "DEXP" => float(f64::exp),
    "LOG" | "ALOG" | "DLOG" => float(f64::ln),
    "LOG10" | "ALOG10" => float(f64::log10),
    "MAX" | "MAX0" | "AMAX1" | "DMAX1" | "MIN" | "MIN0" | "AMIN1" | "DMIN1" => {
      let want_max = name.contains("MAX");
      if is_int {
        let values: Result<Vec<i64>> = args.iter().map(Value::as_int).collect();
        values.and_then(|values| {
          let pick = if want_max { values.iter().max() } else { values.iter().min() };
          pick.copied().map(Value::Int).ok_or(Trap::StackUnderflow)
        })
      } else {
        let values: Result<Vec<f64>> = args.iter().map(Value::as_f64).collect();
        values.and_then(|values| {
          values
            .into_iter()
            .reduce(|a, b| if (a > b) == want_max { a } else { b })
            .map(Value::Double)
            .ok_or(Trap::StackUnderflow)
        })
      }
    }
    "INT" | "IFIX" | "IDINT" => number(0).map(|x| Value::Int(x.trunc() as i64)),
    "NINT" | "IDNINT" => number(0).map(|x| Value::Int(x.round() as i64)),
    "REAL" | "FLOAT" | "SNGL" | "DBLE" => number(0).map(Value::Double),
    "SIGN" | "ISIGN" | "DSIGN" if is_int => integer(0).and_then(|a| {
      let b = integer(1)?;
      Ok(Value::Int(if b >= 0 { a.abs() } else { -a.abs() }))
    }),
    "SIGN" | "ISIGN" | "DSIGN" => number(0).and_then(|a| Ok(Value::Double(a.abs().copysign(number(1)?)))),
    "LEN" => match args.first() {
      Some(Value::Str(s)) => Ok(Value::Int(s.chars().count() as i64)),
      _ => Err(Trap::TypeError("LEN needs a character argument".to_string())),
    },
    "ICHAR" => match args.first() {
      Some(Value::Str(s)) => Ok(Value::Int(s.chars().next().map_or(0, |c| c as i64))),
      _ => Err(Trap::TypeError("ICHAR needs a character argument".to_string())),
    },
    "CHAR" => integer(0).map(|n| {
      Value::Str(
        u32::try_from(n)
          .ok()
          .and_then(char::from_u32)
          .map(String::from)
          .unwrap_or_default(),
      )
    }),
    "AIMAG" => match args.first() {
      Some(Value::Complex(_, im)) => Ok(Value::Double(*im)),
      _ => Err(Trap::TypeError("AIMAG needs a complex argument".to_string())),
    },
    "CONJG" => match args.first() {
      Some(Value::Complex(re, im)) => Ok(Value::Complex(*re, -*im)),
      _ => Err(Trap::TypeError("CONJG needs a complex argument".to_string())),
    },
    _ => return None,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::emitter::machine::Machine;
  use crate::emitter::{Emitter, Signature};
  use frontend::ast::Constant;
  use pretty_assertions::assert_eq;

  fn open(machine: &mut Machine, name: &str, result: Type, entry: bool) {
    machine
      .begin_procedure(Signature {
        name: name.to_string(),
        params: vec![],
        result,
        entry,
      })
      .unwrap();
  }

  #[test]
  fn arithmetic_and_output() {
    let mut machine = Machine::new();
    open(&mut machine, "MAIN", Type::None, true);
    machine.call("__begin_write", &[], &Type::None);
    machine.load_constant(&Constant::Integer(7));
    machine.load_constant(&Constant::Integer(2));
    machine.arith(ArithOp::Div, &Type::Integer);
    machine.call("__write_integer", &[Type::Integer], &Type::None);
    machine.load_constant(&Constant::Character("ab".into()));
    machine.load_constant(&Constant::Character("ab  ".into()));
    machine.compare3();
    machine.call("__write_integer", &[Type::Integer], &Type::None);
    machine.call("__end_io", &[], &Type::None);
    machine.ret();
    machine.end_procedure().unwrap();

    let image = machine.into_image();
    let mut vm = Vm::new(&image);
    vm.run().unwrap();
    assert_eq!(vm.output, vec!["3 0".to_string()]);
  }

  #[test]
  fn dispatch_falls_through_out_of_range() {
    let mut machine = Machine::new();
    open(&mut machine, "PICK", Type::Integer, false);
    let labels = [machine.create_label(), machine.create_label()];
    machine.load_constant(&Constant::Integer(5));
    machine.dispatch_table(&labels);
    machine.load_constant(&Constant::Integer(-1));
    machine.ret();
    for (n, label) in labels.iter().enumerate() {
      machine.mark_label(*label).unwrap();
      machine.load_constant(&Constant::Integer(n as i64));
      machine.ret();
    }
    machine.end_procedure().unwrap();

    let image = machine.into_image();
    let mut vm = Vm::new(&image);
    assert_eq!(vm.invoke("PICK", vec![]), Ok(Some(Value::Int(-1))));
  }

  #[test]
  fn protected_region_catches_traps() {
    let mut machine = Machine::new();
    open(&mut machine, "MAIN", Type::None, true);
    let handler = machine.create_label();
    let done = machine.create_label();
    machine.begin_protected(handler);
    machine.load_constant(&Constant::Integer(1));
    machine.load_constant(&Constant::Integer(0));
    machine.arith(ArithOp::Div, &Type::Integer);
    machine.pop();
    machine.end_protected();
    machine.branch(done);
    machine.begin_handler(handler).unwrap();
    machine.call("__report_error", &[Type::Character], &Type::None);
    machine.mark_label(done).unwrap();
    machine.ret();
    machine.end_procedure().unwrap();

    let image = machine.into_image();
    let mut vm = Vm::new(&image);
    vm.run().unwrap();
    assert_eq!(vm.errors, vec!["division by zero".to_string()]);
  }

  #[test]
  fn substrings_are_clamped() {
    assert_eq!(substring_range(2, 3, 5), (1, 3));
    assert_eq!(substring_range(4, 2, 5), (3, 3));
    assert_eq!(substring_range(0, 9, 5), (0, 5));
  }
}
