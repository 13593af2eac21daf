use anyhow::{Context, Result};
use backend::emitter::listing::generate_listing;
use backend::GenOptions;
use clap::Parser;
use driver::{compile_file, load_checked, run_image};
use std::path::PathBuf;

/// Compiles a dumped Fortran-family tree for the reference stack machine.
#[derive(Parser, Debug)]
#[clap(name = "driver", version)]
struct Opt {
  /// Dump file to compile
  input: PathBuf,

  /// Print the text listing of the generated image
  #[clap(long)]
  listing: bool,

  /// Print the generated image as JSON
  #[clap(long)]
  json: bool,

  /// Execute the image on the reference machine
  #[clap(long)]
  run: bool,

  /// Wrap every procedure body in a protected region
  #[clap(long = "trap-all")]
  trap_all: bool,

  /// A line of input for READ statements; may be repeated
  #[clap(long = "input", value_name = "LINE")]
  input_lines: Vec<String>,

  /// Only check the tree, without generating code
  #[clap(long = "check-only")]
  check_only: bool,
}

fn main() -> Result<()> {
  env_logger::Builder::from_default_env().init();
  let opt = Opt::parse();
  log::debug!("{:?}", opt);

  if opt.check_only {
    let checked = load_checked(&opt.input)?;
    for finding in &checked.findings {
      eprintln!("{}: {}", opt.input.display(), finding);
    }
    if !checked.findings.is_empty() {
      std::process::exit(1);
    }
    println!("{}: ok", opt.input.display());
    return Ok(());
  }

  let options = GenOptions {
    trap_all: opt.trap_all,
    trace: false,
  };
  let compiled = compile_file(&opt.input, &options)?;
  for diagnostic in &compiled.diagnostics {
    eprintln!("{}: {}", opt.input.display(), diagnostic);
  }

  if opt.listing {
    print!("{}", generate_listing(&compiled.image));
  }
  if opt.json {
    let json =
      serde_json::to_string_pretty(&compiled.image).context("serializing the image")?;
    println!("{}", json);
  }
  if opt.run {
    let (output, errors) = run_image(&compiled.image, opt.input_lines)?;
    for record in output {
      println!("{}", record);
    }
    for error in errors {
      eprintln!("run-time error: {}", error);
    }
  }

  if !compiled.diagnostics.is_empty() {
    std::process::exit(1);
  }
  Ok(())
}
