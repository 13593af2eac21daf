use lalrpop_util::lalrpop_mod;
pub mod ast;
pub mod diagnostics;
lalrpop_mod!(pub dump);

use ast::dump::Tree;
use ast::reader::{read_node, read_program, ReadError};
use ast::{Node, Program};

/// Parses the text form of a dumped tree.
pub fn parse_dump(input: &str) -> Result<Tree, ReadError> {
  dump::TreeParser::new()
    .parse(input)
    .map_err(|e| ReadError::Syntax(e.to_string()))
}

/// Reads a whole program back from its dump.
pub fn load_program(input: &str) -> Result<Program, ReadError> {
  let tree = parse_dump(input)?;
  log::debug!("read `{}` tree with {} children", tree.kind, tree.children.len());
  read_program(&tree)
}

pub fn load_node(input: &str) -> Result<Node, ReadError> {
  read_node(&parse_dump(input)?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use ast::*;
  use pretty_assertions::assert_eq;

  fn sample() -> Program {
    let mut program = Program::new("SAMPLE", "sample.f");
    let s = &mut program.symbols;
    let main = s.add(Symbol::procedure("MAIN", Type::None, SymbolClass::Subroutine, vec![]));
    let i = s.add(Symbol::variable("I", Type::Integer));
    let a = s.add(Symbol::array(
      "A",
      Type::Real,
      vec![Dimension::constant(1, 10), Dimension::upto(Expr::ident(i, Type::Integer))],
    ));
    let d = s.add(Symbol::variable("D", Type::Double).as_static());
    let z = s.add(Symbol::named_constant("Z", Constant::Complex(1.5, -0.25)));
    let flag = s.add(Symbol::variable("L", Type::Logical));
    let text = s.add(Symbol::variable("S", Type::FixedCharacter(5)));
    let l10 = s.add(Symbol::label("10"));
    let l20 = s.add(Symbol::label("20"));
    let x = s.add(Symbol::variable("X", Type::Real).as_parameter(0, true));
    let f = s.add(Symbol::procedure("F", Type::Real, SymbolClass::Function, vec![x]));
    let block = s.add(Symbol::new("BLK", Type::None, SymbolClass::CommonBlock, ScopeKind::Global));
    let mut member = Symbol::variable("C", Type::Integer);
    member.common = Some(block);
    let c = s.add(member);
    s.get_mut(block).unwrap().members = vec![c];
    let y = s.add(Symbol::variable("Y", Type::Real).as_parameter(0, false));
    let mut inline = Symbol::new("G", Type::Real, SymbolClass::Inline, ScopeKind::Local);
    inline.params = Some(vec![y]);
    inline.body = Some(Expr::binary(
      BinaryOp::Mul,
      Expr::ident(y, Type::Real),
      Expr::real(0.1),
      Type::Real,
    ));
    let g = s.add(inline);
    let sub = s.add(Symbol::procedure("SUB", Type::None, SymbolClass::External, vec![]));

    program.globals.insert("MAIN", main);
    program.globals.insert("F", f);
    program.globals.insert("SUB", sub);

    let mut body = Vec::new();
    body.push(Stmt::new(
      StmtKind::Assign(vec![
        Assignment {
          target: Expr::ident(i, Type::Integer),
          value: Expr::integer(-3),
        },
        Assignment {
          target: Expr::ident(text, Type::FixedCharacter(5)),
          value: Expr::string("say \"hi\""),
        },
        Assignment {
          target: Expr::ident(d, Type::Double),
          value: Expr::double(1e-7),
        },
      ]),
      1,
    ));
    let mut folded = Expr::ident(z, Type::Complex);
    folded.value = Some(Constant::Complex(1.5, -0.25));
    let mut widened = Expr::integer(2);
    widened.ty = Type::Real;
    body.push(Stmt::new(
      StmtKind::If(Conditional {
        arms: vec![GuardedBlock {
          guard: Expr::binary(
            BinaryOp::AndThen,
            Expr::ident(flag, Type::Logical),
            Expr::logical(true),
            Type::Logical,
          ),
          body: [Stmt::new(StmtKind::Exit, 3)].into_iter().collect(),
        }],
        otherwise: Some(
          [Stmt::new(
            StmtKind::Return(Some(Expr::binary(BinaryOp::Add, folded, widened, Type::Complex))),
            4,
          )]
          .into_iter()
          .collect(),
        ),
      }),
      2,
    ));
    body.push(Stmt::new(
      StmtKind::Switch(Switch {
        subject: Expr::ident(i, Type::Integer),
        cases: vec![SwitchCase {
          value: Expr::integer(1),
          target: l10,
        }],
        default: Some(l20),
      }),
      5,
    ));
    let element = Expr::indexed(a, Type::Real, vec![Expr::integer(1), Expr::ident(i, Type::Integer)]);
    body.push(Stmt::new(
      StmtKind::Loop(Loop::For {
        control: LoopControl {
          var: i,
          start: Expr::integer(1),
          end: Expr::integer(10),
          step: Some(Expr::integer(2)),
        },
        body: [Stmt::new(StmtKind::Cycle, 7)].into_iter().collect(),
      }),
      6,
    ));
    body.push(Stmt::new(
      StmtKind::Loop(Loop::While {
        guard: Expr::unary(UnaryOp::Not, Expr::ident(flag, Type::Logical), Type::Logical),
        body: Block::default(),
      }),
      8,
    ));
    body.push(Stmt::new(
      StmtKind::Loop(Loop::Repeat {
        body: [Stmt::new(StmtKind::Goto(Goto::Direct(l10)), 10)].into_iter().collect(),
        guard: Expr::logical(false),
      }),
      9,
    ));
    body.push(Stmt::new(
      StmtKind::Loop(Loop::Endless {
        body: [Stmt::new(StmtKind::Exit, 12)].into_iter().collect(),
      }),
      11,
    ));
    body.push(Stmt::new(StmtKind::Label(l10), 13));
    body.push(Stmt::new(
      StmtKind::Goto(Goto::Computed {
        selector: Expr::ident(i, Type::Integer),
        labels: vec![l10, l20],
        one_based: true,
      }),
      14,
    ));
    body.push(Stmt::new(
      StmtKind::Io(IoStatement {
        direction: IoDirection::Write,
        unit: Some(Expr::integer(6)),
        format: None,
        items: vec![
          IoItem::Value(Expr::substring(text, Some(Expr::integer(2)), None)),
          IoItem::Implied {
            control: LoopControl {
              var: i,
              start: Expr::integer(1),
              end: Expr::integer(3),
              step: None,
            },
            items: vec![IoItem::Value(element.clone())],
          },
        ],
      }),
      15,
    ));
    body.push(Stmt::new(
      StmtKind::Call(Call {
        symbol: sub,
        kind: CallKind::External,
        args: vec![Expr::new(
          ExprKind::VarArgs(vec![Expr::call(g, CallKind::Internal, vec![element], Type::Real)]),
          Type::None,
        )],
        alternate_returns: vec![l20],
      }),
      16,
    ));
    body.push(Stmt::new(StmtKind::Label(l20), 17));
    body.push(Stmt::new(StmtKind::Block(Block::default()), 18));

    let mut procedure = Procedure::new(main, ProcedureKind::Program);
    procedure.locals.insert("I", i);
    procedure.locals.insert("A", a);
    procedure.statement_functions.insert("G", g);
    procedure.initializers.push(Initializer {
      target: Expr::ident(d, Type::Double),
      value: Expr::double(2.0),
    });
    procedure.traps_errors = true;
    procedure.body = body.into_iter().collect();
    program.procedures.push(procedure);

    let mut function = Procedure::new(f, ProcedureKind::Function);
    function.params = vec![x];
    function.body = [Stmt::new(StmtKind::Return(Some(Expr::ident(x, Type::Real))), 21)]
      .into_iter()
      .collect();
    program.procedures.push(function);
    program
  }

  #[test]
  fn program_dump_round_trips() {
    let program = sample();
    let text = program.dump().to_string();
    let back = load_program(&text).unwrap();
    assert_eq!(back.dump(), program.dump());
    assert_eq!(back, program);
  }

  #[test]
  fn node_dump_round_trips() {
    let node = Node::Collection(vec![
      Node::Expr(Expr::binary(
        BinaryOp::Concat,
        Expr::string("ab"),
        Expr::string("c"),
        Type::FixedCharacter(3),
      )),
      Node::Stmt(Stmt::new(StmtKind::Cycle, 4)),
      Node::Block([Stmt::new(StmtKind::Exit, 5)].into_iter().collect()),
    ]);
    let back = load_node(&node.dump().to_string()).unwrap();
    assert_eq!(back, node);
  }

  #[test]
  fn malformed_dumps_are_rejected() {
    assert!(matches!(parse_dump("(program"), Err(ReadError::Syntax(_))));
    assert!(matches!(
      load_program("(block)"),
      Err(ReadError::UnexpectedKind { .. })
    ));
    assert!(matches!(
      load_node("(number :logical =maybe)"),
      Err(ReadError::InvalidConstant { .. })
    ));
  }
}
