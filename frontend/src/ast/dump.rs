//! Structured diagnostic form of the tree.
//!
//! Every node becomes a [`Tree`]: a kind, an optional type annotation, an
//! optional constant, `key=value` attributes and child trees. The text form is
//! an S-expression that `crate::parse_dump` reads back.

use super::*;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
  pub kind: String,
  pub ty: Option<Type>,
  pub value: Option<Literal>,
  pub attrs: Vec<(String, AttrValue)>,
  pub children: Vec<Tree>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue {
  Word(String),
  Int(i64),
  Str(String),
}

/// Constant as written in the dump. Reals keep their spelling so that the
/// reader can parse them at the precision of the annotated type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
  Int(i64),
  Real(String),
  Str(String),
  Word(String),
  Complex(String, String),
}

impl Literal {
  pub fn from_constant(value: &Constant) -> Self {
    match value {
      Constant::Integer(n) => Literal::Int(*n),
      Constant::Real(x) => Literal::Real(format!("{:?}", x)),
      Constant::Double(x) => Literal::Real(format!("{:?}", x)),
      Constant::Complex(re, im) => Literal::Complex(format!("{:?}", re), format!("{:?}", im)),
      Constant::Logical(b) => Literal::Word(b.to_string()),
      Constant::Character(s) => Literal::Str(s.clone()),
    }
  }

  /// Interprets the literal as a constant of type `ty`.
  pub fn to_constant(&self, ty: &Type) -> Option<Constant> {
    match (ty, self) {
      (Type::Integer, Literal::Int(n)) => Some(Constant::Integer(*n)),
      (Type::Real, Literal::Real(s) | Literal::Word(s)) => s.parse().ok().map(Constant::Real),
      (Type::Real, Literal::Int(n)) => Some(Constant::Real(*n as f32)),
      (Type::Double, Literal::Real(s) | Literal::Word(s)) => s.parse().ok().map(Constant::Double),
      (Type::Double, Literal::Int(n)) => Some(Constant::Double(*n as f64)),
      (Type::Complex, Literal::Complex(re, im)) => {
        Some(Constant::Complex(re.parse().ok()?, im.parse().ok()?))
      }
      (Type::Logical, Literal::Word(w)) => match w.as_str() {
        "true" => Some(Constant::Logical(true)),
        "false" => Some(Constant::Logical(false)),
        _ => None,
      },
      (Type::Character | Type::FixedCharacter(_), Literal::Str(s)) => {
        Some(Constant::Character(s.clone()))
      }
      _ => None,
    }
  }
}

impl Tree {
  pub fn new(kind: &str) -> Self {
    Tree {
      kind: kind.to_string(),
      ty: None,
      value: None,
      attrs: Vec::new(),
      children: Vec::new(),
    }
  }

  pub fn typed(mut self, ty: &Type) -> Self {
    self.ty = Some(ty.clone());
    self
  }

  pub fn valued(mut self, value: Option<&Constant>) -> Self {
    self.value = value.map(Literal::from_constant);
    self
  }

  pub fn word(mut self, key: &str, value: impl ToString) -> Self {
    self
      .attrs
      .push((key.to_string(), AttrValue::Word(value.to_string())));
    self
  }

  pub fn int(mut self, key: &str, value: i64) -> Self {
    self.attrs.push((key.to_string(), AttrValue::Int(value)));
    self
  }

  pub fn text(mut self, key: &str, value: &str) -> Self {
    self
      .attrs
      .push((key.to_string(), AttrValue::Str(value.to_string())));
    self
  }

  pub fn flag(self, key: &str, value: bool) -> Self {
    self.word(key, value)
  }

  pub fn sym(self, id: SymbolId) -> Self {
    self.int("sym", id.0 as i64)
  }

  pub fn line(self, loc: Location) -> Self {
    self.int("line", loc.line as i64)
  }

  pub fn child(mut self, child: Tree) -> Self {
    self.children.push(child);
    self
  }

  pub fn children(mut self, children: impl IntoIterator<Item = Tree>) -> Self {
    self.children.extend(children);
    self
  }

  pub fn attr(&self, key: &str) -> Option<&AttrValue> {
    self
      .attrs
      .iter()
      .find(|(k, _)| k == key)
      .map(|(_, value)| value)
  }

  /// First child of the given kind.
  pub fn find(&self, kind: &str) -> Option<&Tree> {
    self.children.iter().find(|child| child.kind == kind)
  }

  fn write_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    write!(f, "({}", self.kind)?;
    if let Some(ty) = &self.ty {
      write!(f, " :{}", ty)?;
    }
    if let Some(value) = &self.value {
      write!(f, " ={}", value)?;
    }
    for (key, value) in &self.attrs {
      write!(f, " {}={}", key, value)?;
    }
    for child in &self.children {
      writeln!(f)?;
      write!(f, "{:width$}", "", width = (depth + 1) * 2)?;
      child.write_indented(f, depth + 1)?;
    }
    write!(f, ")")
  }
}

impl fmt::Display for Tree {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    self.write_indented(f, 0)
  }
}

impl fmt::Display for AttrValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      AttrValue::Word(w) => write!(f, "{}", w),
      AttrValue::Int(n) => write!(f, "{}", n),
      AttrValue::Str(s) => write!(f, "{}", Constant::Character(s.clone())),
    }
  }
}

impl fmt::Display for Literal {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Literal::Int(n) => write!(f, "{}", n),
      Literal::Real(s) | Literal::Word(s) => write!(f, "{}", s),
      Literal::Str(s) => write!(f, "{}", Constant::Character(s.clone())),
      Literal::Complex(re, im) => write!(f, "({},{})", re, im),
    }
  }
}

/// Builds the [`Tree`] of every node it visits.
pub struct Dumper;

impl Dumper {
  fn refs(kind: &str, ids: &[SymbolId]) -> Tree {
    Tree::new(kind).children(ids.iter().map(|id| Tree::new("ref").sym(*id)))
  }

  fn scope(kind: &str, scope: &Scope) -> Tree {
    Tree::new(kind).children(
      scope
        .iter()
        .map(|(name, id)| Tree::new("bind").text("name", name).sym(id)),
    )
  }

  fn symbol(&mut self, id: SymbolId, symbol: &Symbol) -> Tree {
    let mut tree = Tree::new("symbol")
      .typed(&symbol.ty)
      .valued(symbol.value.as_ref())
      .int("id", id.0 as i64)
      .text("name", &symbol.name)
      .word("class", symbol.class)
      .word("scope", symbol.scope)
      .flag("static", symbol.modifiers.is_static)
      .flag("byref", symbol.modifiers.by_ref)
      .flag("referenced", symbol.modifiers.referenced)
      .flag("defined", symbol.modifiers.defined)
      .flag("altreturn", symbol.alternate_return);
    if let Some(common) = symbol.common {
      tree = tree.int("common", common.0 as i64);
    }
    if let Some(index) = symbol.param_index {
      tree = tree.int("param", index as i64);
    }
    if !symbol.dims.is_empty() {
      let dims = symbol.dims.iter().map(|dim| {
        let mut dim_tree = Tree::new("dim").child(Tree::new("lower").child(self.visit_expression(&dim.lower)));
        if let Some(upper) = &dim.upper {
          dim_tree = dim_tree.child(Tree::new("upper").child(self.visit_expression(upper)));
        }
        dim_tree
      });
      tree = tree.child(Tree::new("dims").children(dims.collect::<Vec<_>>()));
    }
    if let Some(params) = &symbol.params {
      tree = tree.child(Self::refs("params", params));
    }
    if !symbol.members.is_empty() {
      tree = tree.child(Self::refs("members", &symbol.members));
    }
    if let Some(body) = &symbol.body {
      tree = tree.child(Tree::new("body").child(self.visit_expression(body)));
    }
    tree
  }

  fn control(&mut self, control: &LoopControl) -> Tree {
    let mut tree = Tree::new("control")
      .int("var", control.var.0 as i64)
      .child(Tree::new("start").child(self.visit_expression(&control.start)))
      .child(Tree::new("end").child(self.visit_expression(&control.end)));
    if let Some(step) = &control.step {
      tree = tree.child(Tree::new("step").child(self.visit_expression(step)));
    }
    tree
  }

  fn io_item(&mut self, item: &IoItem) -> Tree {
    match item {
      IoItem::Value(expr) => self.visit_expression(expr),
      IoItem::Implied { control, items } => {
        let items: Vec<Tree> = items.iter().map(|item| self.io_item(item)).collect();
        Tree::new("implied")
          .child(self.control(control))
          .child(Tree::new("items").children(items))
      }
    }
  }

  fn call(&mut self, call: &Call, ty: &Type, value: Option<&Constant>) -> Tree {
    let args: Vec<Tree> = call.args.iter().map(|arg| self.visit_expression(arg)).collect();
    let kind = match call.kind {
      CallKind::Internal => "internal",
      CallKind::External => "external",
    };
    let mut tree = Tree::new("call")
      .typed(ty)
      .valued(value)
      .sym(call.symbol)
      .word("kind", kind)
      .child(Tree::new("args").children(args));
    if !call.alternate_returns.is_empty() {
      tree = tree.child(Self::refs("alternates", &call.alternate_returns));
    }
    tree
  }

  pub fn node(&mut self, node: &Node) -> Tree {
    match node {
      Node::Expr(expr) => self.visit_expression(expr),
      Node::Stmt(stmt) => self.visit_statement(stmt),
      Node::Block(block) => self.visit_block(block),
      Node::Procedure(procedure) => self.visit_procedure(procedure),
      Node::Collection(nodes) => {
        let children: Vec<Tree> = nodes.iter().map(|node| self.node(node)).collect();
        Tree::new("collection").children(children)
      }
    }
  }
}

impl Visitor for Dumper {
  type Program = Tree;
  type Procedure = Tree;
  type Block = Tree;
  type Statement = Tree;
  type Expression = Tree;

  fn visit_program(&mut self, program: &Program) -> Self::Program {
    let symbols: Vec<Tree> = program
      .symbols
      .iter()
      .map(|(id, symbol)| self.symbol(id, symbol))
      .collect();
    let procedures: Vec<Tree> = program
      .procedures
      .iter()
      .map(|procedure| self.visit_procedure(procedure))
      .collect();
    Tree::new("program")
      .text("name", &program.name)
      .text("source", &program.source)
      .child(Tree::new("symbols").children(symbols))
      .child(Self::scope("globals", &program.globals))
      .children(procedures)
  }

  fn visit_procedure(&mut self, procedure: &Procedure) -> Self::Procedure {
    let initializers: Vec<Tree> = procedure
      .initializers
      .iter()
      .map(|init| {
        Tree::new("data")
          .child(self.visit_expression(&init.target))
          .child(self.visit_expression(&init.value))
      })
      .collect();
    Tree::new("procedure")
      .sym(procedure.symbol)
      .word("kind", procedure.kind)
      .flag("traps", procedure.traps_errors)
      .child(Self::refs("params", &procedure.params))
      .child(Self::scope("locals", &procedure.locals))
      .child(Self::scope("statement-functions", &procedure.statement_functions))
      .child(Tree::new("initializers").children(initializers))
      .child(self.visit_block(&procedure.body))
  }

  fn visit_block(&mut self, block: &Block) -> Self::Block {
    let stmts: Vec<Tree> = block
      .stmts
      .iter()
      .map(|stmt| self.visit_statement(stmt))
      .collect();
    Tree::new("block").children(stmts)
  }

  fn visit_statement(&mut self, statement: &Stmt) -> Self::Statement {
    let loc = statement.loc;
    match &statement.kind {
      StmtKind::Assign(pairs) => {
        let pairs: Vec<Tree> = pairs
          .iter()
          .map(|pair| {
            Tree::new("pair")
              .child(self.visit_expression(&pair.target))
              .child(self.visit_expression(&pair.value))
          })
          .collect();
        Tree::new("assign").line(loc).children(pairs)
      }
      StmtKind::If(conditional) => {
        let mut tree = Tree::new("if").line(loc);
        for arm in &conditional.arms {
          let arm_tree = Tree::new("arm")
            .child(self.visit_expression(&arm.guard))
            .child(self.visit_block(&arm.body));
          tree = tree.child(arm_tree);
        }
        if let Some(otherwise) = &conditional.otherwise {
          tree = tree.child(Tree::new("else").child(self.visit_block(otherwise)));
        }
        tree
      }
      StmtKind::Switch(switch) => {
        let mut tree = Tree::new("switch").line(loc);
        if let Some(default) = switch.default {
          tree = tree.int("default", default.0 as i64);
        }
        tree = tree.child(self.visit_expression(&switch.subject));
        for case in &switch.cases {
          let case_tree = Tree::new("case")
            .sym(case.target)
            .child(self.visit_expression(&case.value));
          tree = tree.child(case_tree);
        }
        tree
      }
      StmtKind::Loop(Loop::For { control, body }) => Tree::new("for")
        .line(loc)
        .child(self.control(control))
        .child(self.visit_block(body)),
      StmtKind::Loop(Loop::While { guard, body }) => Tree::new("while")
        .line(loc)
        .child(self.visit_expression(guard))
        .child(self.visit_block(body)),
      StmtKind::Loop(Loop::Repeat { body, guard }) => Tree::new("repeat")
        .line(loc)
        .child(self.visit_block(body))
        .child(self.visit_expression(guard)),
      StmtKind::Loop(Loop::Endless { body }) => {
        Tree::new("loop").line(loc).child(self.visit_block(body))
      }
      StmtKind::Goto(Goto::Direct(label)) => Tree::new("goto").line(loc).sym(*label),
      StmtKind::Goto(Goto::Computed {
        selector,
        labels,
        one_based,
      }) => Tree::new("computed-goto")
        .line(loc)
        .flag("onebased", *one_based)
        .child(self.visit_expression(selector))
        .child(Self::refs("labels", labels)),
      StmtKind::Return(value) => {
        let tree = Tree::new("return").line(loc);
        match value {
          Some(value) => tree.child(self.visit_expression(value)),
          None => tree,
        }
      }
      StmtKind::Io(io) => {
        let direction = match io.direction {
          IoDirection::Read => "read",
          IoDirection::Write => "write",
        };
        let mut tree = Tree::new("io").line(loc).word("dir", direction);
        if let Some(unit) = &io.unit {
          tree = tree.child(Tree::new("unit").child(self.visit_expression(unit)));
        }
        if let Some(format) = &io.format {
          tree = tree.child(Tree::new("format").child(self.visit_expression(format)));
        }
        let items: Vec<Tree> = io.items.iter().map(|item| self.io_item(item)).collect();
        tree.child(Tree::new("items").children(items))
      }
      StmtKind::Call(call) => Tree::new("call-statement")
        .line(loc)
        .child(self.call(call, &Type::None, None)),
      StmtKind::Label(label) => Tree::new("label").line(loc).sym(*label),
      StmtKind::Exit => Tree::new("exit").line(loc),
      StmtKind::Cycle => Tree::new("cycle").line(loc),
      StmtKind::Block(block) => Tree::new("nested").line(loc).child(self.visit_block(block)),
    }
  }

  fn visit_expression(&mut self, expression: &Expr) -> Self::Expression {
    let ty = &expression.ty;
    let value = expression.value.as_ref();
    let tree = match &expression.kind {
      ExprKind::Number => Tree::new("number").typed(ty).valued(value),
      ExprKind::String => Tree::new("string").typed(ty).valued(value),
      ExprKind::Ident(ident) => {
        let mut tree = Tree::new("ident").typed(ty).valued(value).sym(ident.symbol);
        if !ident.indices.is_empty() {
          let indices: Vec<Tree> = ident
            .indices
            .iter()
            .map(|index| self.visit_expression(index))
            .collect();
          tree = tree.child(Tree::new("indices").children(indices));
        }
        if let Some(substring) = &ident.substring {
          let mut sub = Tree::new("substring");
          if let Some(start) = &substring.start {
            sub = sub.child(Tree::new("from").child(self.visit_expression(start)));
          }
          if let Some(end) = &substring.end {
            sub = sub.child(Tree::new("to").child(self.visit_expression(end)));
          }
          tree = tree.child(sub);
        }
        tree
      }
      ExprKind::Unary(op, operand) => Tree::new("unary")
        .typed(ty)
        .valued(value)
        .word("op", op.name())
        .child(self.visit_expression(operand)),
      ExprKind::Binary(op, left, right) => Tree::new("binary")
        .typed(ty)
        .valued(value)
        .word("op", op.name())
        .child(self.visit_expression(left))
        .child(self.visit_expression(right)),
      ExprKind::Call(call) => self.call(call, ty, value),
      ExprKind::VarArgs(args) => {
        let args: Vec<Tree> = args.iter().map(|arg| self.visit_expression(arg)).collect();
        Tree::new("varargs").typed(ty).valued(value).children(args)
      }
    };
    match value {
      // Keep the constant's own type when the node type differs from it.
      Some(constant) if !constant_matches(constant, ty) => {
        tree.word("vtype", constant.natural_type())
      }
      _ => tree,
    }
  }
}

fn constant_matches(constant: &Constant, ty: &Type) -> bool {
  let natural = constant.natural_type();
  natural == *ty || (natural.is_character() && ty.is_character())
}

impl Node {
  pub fn dump(&self) -> Tree {
    Dumper.node(self)
  }
}

impl Program {
  pub fn dump(&self) -> Tree {
    self.accept(&mut Dumper)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn expression_dump_shape() {
    let sum = Expr::binary(BinaryOp::Add, Expr::integer(1), Expr::real(2.5), Type::Real);
    let tree = Node::Expr(sum).dump();
    assert_eq!(
      tree.to_string(),
      "(binary :real op=add\n  (number :integer =1)\n  (number :real =2.5))"
    );
  }

  #[test]
  fn statement_dump_carries_line() {
    let stmt = Stmt::new(StmtKind::Goto(Goto::Direct(SymbolId(3))), 12);
    assert_eq!(Node::Stmt(stmt).dump().to_string(), "(goto line=12 sym=3)");
  }

  #[test]
  fn literals_read_back_at_annotated_precision() {
    let lit = Literal::from_constant(&Constant::Real(0.1));
    assert_eq!(lit.to_constant(&Type::Real), Some(Constant::Real(0.1)));
    let lit = Literal::from_constant(&Constant::Complex(1.5, -2.0));
    assert_eq!(
      lit.to_constant(&Type::Complex),
      Some(Constant::Complex(1.5, -2.0))
    );
    assert_eq!(Literal::Word("maybe".into()).to_constant(&Type::Logical), None);
  }
}
