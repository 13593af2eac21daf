use anyhow::{bail, Context, Result};
use backend::emitter::machine::{Image, Machine};
use backend::emitter::vm::Vm;
use backend::{generate_code, GenOptions};
use frontend::ast::checker::Checker;
use frontend::diagnostics::SemanticError;
use std::fs;
use std::path::Path;

/// Result of compiling one dump file.
#[derive(Debug)]
pub struct Compiled {
  pub image: Image,
  /// Semantic errors found while generating; the image is still complete.
  pub diagnostics: Vec<SemanticError>,
}

/// A dumped tree that honours the construction contract.
pub struct Checked {
  pub program: frontend::ast::Program,
  /// User-facing errors found by the checker. The generator reports the
  /// same problems again, so these only matter when nothing is generated.
  pub findings: Vec<SemanticError>,
}

/// Reads and checks a dumped tree. Contract breaches are fatal here since
/// the generator assumes a well-formed tree; every other error is returned
/// alongside the program.
pub fn load_checked(path: &Path) -> Result<Checked> {
  let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
  let program =
    frontend::load_program(&text).with_context(|| format!("loading {}", path.display()))?;
  let (breaches, findings): (Vec<_>, Vec<_>) = Checker::check_program(&program)
    .into_iter()
    .partition(|problem| matches!(problem, SemanticError::Contract { .. }));
  if !breaches.is_empty() {
    let report: Vec<String> = breaches.iter().map(ToString::to_string).collect();
    bail!("{}: malformed tree\n{}", path.display(), report.join("\n"));
  }
  Ok(Checked { program, findings })
}

pub fn compile_file(path: &Path, options: &GenOptions) -> Result<Compiled> {
  let Checked { program, findings } = load_checked(path)?;
  log::debug!("{}: checker found {} error(s)", path.display(), findings.len());
  let mut machine = Machine::new();
  match generate_code(&program, &mut machine, options) {
    Ok(generation) => {
      log::info!(
        "{}: {} procedure(s), {} diagnostic(s)",
        path.display(),
        machine.image().procedures.len(),
        generation.diagnostics.len()
      );
      Ok(Compiled {
        image: machine.into_image(),
        diagnostics: generation.diagnostics.into_vec(),
      })
    }
    Err(error) => {
      machine.discard_open();
      Err(error.into())
    }
  }
}

/// Executes an image on the reference machine. Returns the output records
/// and the run-time failures caught by protected regions.
pub fn run_image(image: &Image, input: Vec<String>) -> Result<(Vec<String>, Vec<String>)> {
  let mut vm = Vm::new(image).with_input(input);
  vm.run().context("run-time failure")?;
  Ok((vm.output, vm.errors))
}

#[cfg(test)]
mod tests {
  use super::*;
  use frontend::ast::*;
  use pretty_assertions::assert_eq;
  use std::path::PathBuf;
  use tempfile::{tempdir, TempDir};

  /// `PROGRAM P: DO I = 1, N: S = S + I: WRITE S`
  fn sum_program(n: i64) -> Program {
    let mut program = Program::new("P", "sum.f");
    let main = program
      .symbols
      .add(Symbol::procedure("P", Type::None, SymbolClass::Subroutine, vec![]));
    program.globals.insert("P", main);
    let i = program.symbols.add(Symbol::variable("I", Type::Integer));
    let s = program.symbols.add(Symbol::variable("S", Type::Integer));
    let mut procedure = Procedure::new(main, ProcedureKind::Program);
    procedure.locals.insert("I", i);
    procedure.locals.insert("S", s);
    procedure.body = Block::from_iter([
      Stmt::new(
        StmtKind::Loop(Loop::For {
          control: LoopControl {
            var: i,
            start: Expr::integer(1),
            end: Expr::integer(n),
            step: None,
          },
          body: Block::from_iter([Stmt::new(
            StmtKind::Assign(vec![Assignment {
              target: Expr::ident(s, Type::Integer),
              value: Expr::binary(
                BinaryOp::Add,
                Expr::ident(s, Type::Integer),
                Expr::ident(i, Type::Integer),
                Type::Integer,
              ),
            }]),
            2,
          )]),
        }),
        1,
      ),
      Stmt::new(
        StmtKind::Io(IoStatement {
          direction: IoDirection::Write,
          unit: None,
          format: None,
          items: vec![IoItem::Value(Expr::ident(s, Type::Integer))],
        }),
        3,
      ),
    ]);
    program.procedures.push(procedure);
    program
  }

  fn write_dump(program: &Program) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("program.dump");
    fs::write(&path, program.dump().to_string()).unwrap();
    (dir, path)
  }

  #[test]
  fn dumps_compile_and_run() {
    let (_dir, path) = write_dump(&sum_program(10));
    let compiled = compile_file(&path, &GenOptions::default()).unwrap();
    assert!(compiled.diagnostics.is_empty());
    assert_eq!(compiled.image.procedures.len(), 1);
    let (output, errors) = run_image(&compiled.image, vec![]).unwrap();
    assert_eq!(output, vec!["55"]);
    assert!(errors.is_empty());
  }

  #[test]
  fn malformed_trees_are_rejected_before_generation() {
    let mut program = sum_program(3);
    program.procedures[0].locals.insert("GHOST", SymbolId(99));
    let (_dir, path) = write_dump(&program);
    let error = compile_file(&path, &GenOptions::default()).unwrap_err();
    assert!(error.to_string().contains("malformed tree"));
  }

  #[test]
  fn semantic_errors_still_produce_an_image() {
    let mut program = sum_program(3);
    let v = program
      .symbols
      .add(Symbol::variable("V", Type::Integer).as_parameter(0, false));
    let s = program
      .symbols
      .add(Symbol::procedure("S", Type::None, SymbolClass::Subroutine, vec![v]));
    program.globals.insert("S", s);
    let mut sub = Procedure::new(s, ProcedureKind::Subroutine);
    sub.params = vec![v];
    program.procedures.push(sub);
    program.procedures[0].body.stmts.push(Stmt::new(
      StmtKind::Call(Call {
        symbol: s,
        kind: CallKind::Internal,
        args: vec![Expr::integer(1), Expr::integer(2)],
        alternate_returns: Vec::new(),
      }),
      4,
    ));
    let (_dir, path) = write_dump(&program);

    let checked = load_checked(&path).unwrap();
    assert_eq!(checked.findings.len(), 1);

    let compiled = compile_file(&path, &GenOptions::default()).unwrap();
    assert_eq!(
      compiled.diagnostics,
      vec![SemanticError::ArityMismatch {
        loc: Location::line(4),
        name: "S".to_string(),
        expected: 1,
        found: 2,
      }]
    );
    assert_eq!(compiled.image.procedures.len(), 2);
    let (output, _) = run_image(&compiled.image, vec![]).unwrap();
    assert_eq!(output, vec!["6"]);
  }

  #[test]
  fn missing_files_name_the_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.dump");
    let error = compile_file(&path, &GenOptions::default()).unwrap_err();
    assert!(error.to_string().contains("absent.dump"));
  }
}
