//! Rebuilds tree nodes from their dumped form.

use super::dump::{AttrValue, Tree};
use super::*;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
  #[error("syntax error: {0}")]
  Syntax(String),
  #[error("expected {expected}, found `{found}`")]
  UnexpectedKind { expected: String, found: String },
  #[error("`{kind}` is missing attribute `{key}`")]
  MissingAttr { kind: String, key: String },
  #[error("`{kind}` has an invalid `{key}` attribute")]
  InvalidAttr { kind: String, key: String },
  #[error("`{kind}` is missing `{child}`")]
  MissingChild { kind: String, child: String },
  #[error("`{kind}` carries a constant that does not fit its type")]
  InvalidConstant { kind: String },
  #[error("symbol ids must be dense; expected {expected}, found {found}")]
  SymbolOrder { expected: u32, found: u32 },
}

type Result<T> = std::result::Result<T, ReadError>;

fn unexpected(expected: &str, tree: &Tree) -> ReadError {
  ReadError::UnexpectedKind {
    expected: expected.to_string(),
    found: tree.kind.clone(),
  }
}

fn expect_kind(tree: &Tree, kind: &str) -> Result<()> {
  if tree.kind == kind {
    Ok(())
  } else {
    Err(unexpected(&format!("`{}`", kind), tree))
  }
}

fn missing_attr(tree: &Tree, key: &str) -> ReadError {
  ReadError::MissingAttr {
    kind: tree.kind.clone(),
    key: key.to_string(),
  }
}

fn invalid_attr(tree: &Tree, key: &str) -> ReadError {
  ReadError::InvalidAttr {
    kind: tree.kind.clone(),
    key: key.to_string(),
  }
}

fn int_attr(tree: &Tree, key: &str) -> Result<Option<i64>> {
  match tree.attr(key) {
    None => Ok(None),
    Some(AttrValue::Int(n)) => Ok(Some(*n)),
    Some(_) => Err(invalid_attr(tree, key)),
  }
}

fn required_int(tree: &Tree, key: &str) -> Result<i64> {
  int_attr(tree, key)?.ok_or_else(|| missing_attr(tree, key))
}

fn word_attr<'t>(tree: &'t Tree, key: &str) -> Result<&'t str> {
  match tree.attr(key) {
    None => Err(missing_attr(tree, key)),
    Some(AttrValue::Word(w)) => Ok(w),
    Some(_) => Err(invalid_attr(tree, key)),
  }
}

fn str_attr<'t>(tree: &'t Tree, key: &str) -> Result<&'t str> {
  match tree.attr(key) {
    None => Err(missing_attr(tree, key)),
    Some(AttrValue::Str(s)) => Ok(s),
    Some(_) => Err(invalid_attr(tree, key)),
  }
}

/// Boolean attribute; absent means `false`.
fn flag(tree: &Tree, key: &str) -> Result<bool> {
  match tree.attr(key) {
    None => Ok(false),
    Some(AttrValue::Word(w)) if w == "true" => Ok(true),
    Some(AttrValue::Word(w)) if w == "false" => Ok(false),
    Some(_) => Err(invalid_attr(tree, key)),
  }
}

fn to_id(tree: &Tree, key: &str, n: i64) -> Result<SymbolId> {
  u32::try_from(n)
    .map(SymbolId)
    .map_err(|_| invalid_attr(tree, key))
}

fn symbol_attr(tree: &Tree, key: &str) -> Result<SymbolId> {
  let n = required_int(tree, key)?;
  to_id(tree, key, n)
}

fn optional_symbol(tree: &Tree, key: &str) -> Result<Option<SymbolId>> {
  match int_attr(tree, key)? {
    Some(n) => to_id(tree, key, n).map(Some),
    None => Ok(None),
  }
}

fn child<'t>(tree: &'t Tree, kind: &str) -> Result<&'t Tree> {
  tree.find(kind).ok_or_else(|| ReadError::MissingChild {
    kind: tree.kind.clone(),
    child: kind.to_string(),
  })
}

/// The single expression wrapped by nodes such as `(lower e)`.
fn wrapped(tree: &Tree) -> Result<Expr> {
  match tree.children.first() {
    Some(inner) => read_expr(inner),
    None => Err(ReadError::MissingChild {
      kind: tree.kind.clone(),
      child: "expression".to_string(),
    }),
  }
}

fn optional_wrapped(tree: &Tree, kind: &str) -> Result<Option<Expr>> {
  tree.find(kind).map(wrapped).transpose()
}

fn refs(tree: &Tree) -> Result<Vec<SymbolId>> {
  tree
    .children
    .iter()
    .map(|r| {
      expect_kind(r, "ref")?;
      symbol_attr(r, "sym")
    })
    .collect()
}

fn scope(tree: &Tree) -> Result<Scope> {
  let mut scope = Scope::new();
  for bind in &tree.children {
    expect_kind(bind, "bind")?;
    scope.insert(str_attr(bind, "name")?, symbol_attr(bind, "sym")?);
  }
  Ok(scope)
}

fn value(tree: &Tree, ty: &Type) -> Result<Option<Constant>> {
  let Some(literal) = &tree.value else {
    return Ok(None);
  };
  let value_type = match tree.attr("vtype") {
    Some(AttrValue::Word(w)) => w.parse().map_err(|_| invalid_attr(tree, "vtype"))?,
    Some(_) => return Err(invalid_attr(tree, "vtype")),
    None => ty.clone(),
  };
  literal
    .to_constant(&value_type)
    .map(Some)
    .ok_or_else(|| ReadError::InvalidConstant {
      kind: tree.kind.clone(),
    })
}

pub fn read_program(tree: &Tree) -> Result<Program> {
  expect_kind(tree, "program")?;
  let mut program = Program::new(str_attr(tree, "name")?, str_attr(tree, "source")?);
  for (expected, symbol_tree) in child(tree, "symbols")?.children.iter().enumerate() {
    let expected = expected as u32;
    let found = symbol_attr(symbol_tree, "id")?.0;
    if found != expected {
      return Err(ReadError::SymbolOrder { expected, found });
    }
    program.symbols.add(read_symbol(symbol_tree)?);
  }
  program.globals = scope(child(tree, "globals")?)?;
  for procedure in tree.children.iter().filter(|c| c.kind == "procedure") {
    program.procedures.push(read_procedure(procedure)?);
  }
  Ok(program)
}

pub fn read_symbol(tree: &Tree) -> Result<Symbol> {
  expect_kind(tree, "symbol")?;
  let ty = tree.ty.clone().unwrap_or(Type::None);
  let class = word_attr(tree, "class")?
    .parse()
    .map_err(|_| invalid_attr(tree, "class"))?;
  let scope_kind = word_attr(tree, "scope")?
    .parse()
    .map_err(|_| invalid_attr(tree, "scope"))?;
  let mut symbol = Symbol::new(str_attr(tree, "name")?, ty, class, scope_kind);
  symbol.value = value(tree, &symbol.ty)?;
  symbol.modifiers = Modifiers {
    is_static: flag(tree, "static")?,
    by_ref: flag(tree, "byref")?,
    referenced: flag(tree, "referenced")?,
    defined: flag(tree, "defined")?,
  };
  symbol.alternate_return = flag(tree, "altreturn")?;
  symbol.common = optional_symbol(tree, "common")?;
  symbol.param_index = match int_attr(tree, "param")? {
    Some(n) => Some(u16::try_from(n).map_err(|_| invalid_attr(tree, "param"))?),
    None => None,
  };
  if let Some(dims) = tree.find("dims") {
    for dim in &dims.children {
      expect_kind(dim, "dim")?;
      symbol.dims.push(Dimension::new(
        wrapped(child(dim, "lower")?)?,
        optional_wrapped(dim, "upper")?,
      ));
    }
  }
  symbol.params = tree.find("params").map(refs).transpose()?;
  if let Some(members) = tree.find("members") {
    symbol.members = refs(members)?;
  }
  symbol.body = optional_wrapped(tree, "body")?;
  Ok(symbol)
}

pub fn read_procedure(tree: &Tree) -> Result<Procedure> {
  expect_kind(tree, "procedure")?;
  let kind = match word_attr(tree, "kind")? {
    "program" => ProcedureKind::Program,
    "subroutine" => ProcedureKind::Subroutine,
    "function" => ProcedureKind::Function,
    _ => return Err(invalid_attr(tree, "kind")),
  };
  let mut procedure = Procedure::new(symbol_attr(tree, "sym")?, kind);
  procedure.traps_errors = flag(tree, "traps")?;
  if let Some(params) = tree.find("params") {
    procedure.params = refs(params)?;
  }
  if let Some(locals) = tree.find("locals") {
    procedure.locals = scope(locals)?;
  }
  if let Some(functions) = tree.find("statement-functions") {
    procedure.statement_functions = scope(functions)?;
  }
  if let Some(initializers) = tree.find("initializers") {
    for data in &initializers.children {
      expect_kind(data, "data")?;
      match data.children.as_slice() {
        [target, value] => procedure.initializers.push(Initializer {
          target: read_expr(target)?,
          value: read_expr(value)?,
        }),
        _ => return Err(unexpected("target and value", data)),
      }
    }
  }
  procedure.body = read_block(child(tree, "block")?)?;
  Ok(procedure)
}

pub fn read_block(tree: &Tree) -> Result<Block> {
  expect_kind(tree, "block")?;
  tree.children.iter().map(read_stmt).collect()
}

fn read_control(tree: &Tree) -> Result<LoopControl> {
  expect_kind(tree, "control")?;
  Ok(LoopControl {
    var: symbol_attr(tree, "var")?,
    start: wrapped(child(tree, "start")?)?,
    end: wrapped(child(tree, "end")?)?,
    step: optional_wrapped(tree, "step")?,
  })
}

fn read_io_item(tree: &Tree) -> Result<IoItem> {
  if tree.kind != "implied" {
    return read_expr(tree).map(IoItem::Value);
  }
  Ok(IoItem::Implied {
    control: read_control(child(tree, "control")?)?,
    items: child(tree, "items")?
      .children
      .iter()
      .map(read_io_item)
      .collect::<Result<_>>()?,
  })
}

fn read_call(tree: &Tree) -> Result<Call> {
  expect_kind(tree, "call")?;
  let kind = match word_attr(tree, "kind")? {
    "internal" => CallKind::Internal,
    "external" => CallKind::External,
    _ => return Err(invalid_attr(tree, "kind")),
  };
  Ok(Call {
    symbol: symbol_attr(tree, "sym")?,
    kind,
    args: child(tree, "args")?
      .children
      .iter()
      .map(read_expr)
      .collect::<Result<_>>()?,
    alternate_returns: match tree.find("alternates") {
      Some(alternates) => refs(alternates)?,
      None => Vec::new(),
    },
  })
}

fn line(tree: &Tree) -> Result<u32> {
  let n = required_int(tree, "line")?;
  u32::try_from(n).map_err(|_| invalid_attr(tree, "line"))
}

fn pair<'t>(tree: &'t Tree) -> Result<(&'t Tree, &'t Tree)> {
  match tree.children.as_slice() {
    [first, second] => Ok((first, second)),
    _ => Err(unexpected("exactly two children", tree)),
  }
}

pub fn read_stmt(tree: &Tree) -> Result<Stmt> {
  let kind = match tree.kind.as_str() {
    "assign" => StmtKind::Assign(
      tree
        .children
        .iter()
        .map(|p| -> Result<Assignment> {
          expect_kind(p, "pair")?;
          let (target, value) = pair(p)?;
          Ok(Assignment {
            target: read_expr(target)?,
            value: read_expr(value)?,
          })
        })
        .collect::<Result<_>>()?,
    ),
    "if" => {
      let mut conditional = Conditional {
        arms: Vec::new(),
        otherwise: None,
      };
      for branch in &tree.children {
        match branch.kind.as_str() {
          "arm" => {
            let (guard, body) = pair(branch)?;
            conditional.arms.push(GuardedBlock {
              guard: read_expr(guard)?,
              body: read_block(body)?,
            });
          }
          "else" => conditional.otherwise = Some(read_block(child(branch, "block")?)?),
          _ => return Err(unexpected("`arm` or `else`", branch)),
        }
      }
      StmtKind::If(conditional)
    }
    "switch" => {
      let (subject, cases) = tree
        .children
        .split_first()
        .ok_or_else(|| unexpected("switch subject", tree))?;
      StmtKind::Switch(Switch {
        subject: read_expr(subject)?,
        cases: cases
          .iter()
          .map(|case| -> Result<SwitchCase> {
            expect_kind(case, "case")?;
            Ok(SwitchCase {
              value: wrapped(case)?,
              target: symbol_attr(case, "sym")?,
            })
          })
          .collect::<Result<_>>()?,
        default: optional_symbol(tree, "default")?,
      })
    }
    "for" => StmtKind::Loop(Loop::For {
      control: read_control(child(tree, "control")?)?,
      body: read_block(child(tree, "block")?)?,
    }),
    "while" => {
      let (guard, body) = pair(tree)?;
      StmtKind::Loop(Loop::While {
        guard: read_expr(guard)?,
        body: read_block(body)?,
      })
    }
    "repeat" => {
      let (body, guard) = pair(tree)?;
      StmtKind::Loop(Loop::Repeat {
        body: read_block(body)?,
        guard: read_expr(guard)?,
      })
    }
    "loop" => StmtKind::Loop(Loop::Endless {
      body: read_block(child(tree, "block")?)?,
    }),
    "goto" => StmtKind::Goto(Goto::Direct(symbol_attr(tree, "sym")?)),
    "computed-goto" => {
      let (selector, labels) = pair(tree)?;
      expect_kind(labels, "labels")?;
      StmtKind::Goto(Goto::Computed {
        selector: read_expr(selector)?,
        labels: refs(labels)?,
        one_based: flag(tree, "onebased")?,
      })
    }
    "return" => StmtKind::Return(tree.children.first().map(read_expr).transpose()?),
    "io" => {
      let direction = match word_attr(tree, "dir")? {
        "read" => IoDirection::Read,
        "write" => IoDirection::Write,
        _ => return Err(invalid_attr(tree, "dir")),
      };
      StmtKind::Io(IoStatement {
        direction,
        unit: optional_wrapped(tree, "unit")?,
        format: optional_wrapped(tree, "format")?,
        items: child(tree, "items")?
          .children
          .iter()
          .map(read_io_item)
          .collect::<Result<_>>()?,
      })
    }
    "call-statement" => StmtKind::Call(read_call(child(tree, "call")?)?),
    "label" => StmtKind::Label(symbol_attr(tree, "sym")?),
    "exit" => StmtKind::Exit,
    "cycle" => StmtKind::Cycle,
    "nested" => StmtKind::Block(read_block(child(tree, "block")?)?),
    _ => return Err(unexpected("a statement", tree)),
  };
  Ok(Stmt::new(kind, line(tree)?))
}

pub fn read_expr(tree: &Tree) -> Result<Expr> {
  let ty = tree.ty.clone().unwrap_or(Type::None);
  let kind = match tree.kind.as_str() {
    "number" => ExprKind::Number,
    "string" => ExprKind::String,
    "ident" => {
      let indices = match tree.find("indices") {
        Some(indices) => indices
          .children
          .iter()
          .map(read_expr)
          .collect::<Result<_>>()?,
        None => Vec::new(),
      };
      let substring = match tree.find("substring") {
        Some(sub) => Some(Substring {
          start: optional_wrapped(sub, "from")?.map(Box::new),
          end: optional_wrapped(sub, "to")?.map(Box::new),
        }),
        None => None,
      };
      ExprKind::Ident(IdentRef {
        symbol: symbol_attr(tree, "sym")?,
        indices,
        substring,
      })
    }
    "unary" => {
      let op = UnaryOp::from_name(word_attr(tree, "op")?).ok_or_else(|| invalid_attr(tree, "op"))?;
      ExprKind::Unary(op, Box::new(wrapped(tree)?))
    }
    "binary" => {
      let op = BinaryOp::from_name(word_attr(tree, "op")?).ok_or_else(|| invalid_attr(tree, "op"))?;
      let (left, right) = pair(tree)?;
      ExprKind::Binary(op, Box::new(read_expr(left)?), Box::new(read_expr(right)?))
    }
    "call" => ExprKind::Call(read_call(tree)?),
    "varargs" => ExprKind::VarArgs(tree.children.iter().map(read_expr).collect::<Result<_>>()?),
    _ => return Err(unexpected("an expression", tree)),
  };
  let value = value(tree, &ty)?;
  Ok(Expr { kind, ty, value })
}

/// Reads any single node: a collection, block, procedure, statement or
/// expression.
pub fn read_node(tree: &Tree) -> Result<Node> {
  match tree.kind.as_str() {
    "collection" => tree
      .children
      .iter()
      .map(read_node)
      .collect::<Result<_>>()
      .map(Node::Collection),
    "block" => read_block(tree).map(Node::Block),
    "procedure" => read_procedure(tree).map(Node::Procedure),
    _ if tree.attr("line").is_some() => read_stmt(tree).map(Node::Stmt),
    _ => read_expr(tree).map(Node::Expr),
  }
}
