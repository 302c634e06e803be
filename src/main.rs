use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::info;

#[derive(Parser, Debug)]
#[command(name = "rchicc", about = "Compile a small C subset to x86-64 assembly")]
struct Cli {
  /// Source file to compile.
  input: PathBuf,
  /// Write assembly here instead of stdout.
  #[arg(short, long, value_name = "FILE")]
  output: Option<PathBuf>,
}

fn main() {
  env_logger::init();
  let cli = Cli::parse();

  let source = match fs::read_to_string(&cli.input) {
    Ok(source) => source,
    Err(err) => {
      eprintln!("error: cannot read {}: {err}", cli.input.display());
      process::exit(1);
    }
  };
  info!("compiling {}", cli.input.display());

  let asm = match rchicc::generate_assembly(&source) {
    Ok(asm) => asm,
    Err(err) => {
      eprintln!("{err}");
      process::exit(1);
    }
  };

  match &cli.output {
    Some(path) => {
      if let Err(err) = fs::write(path, asm) {
        eprintln!("error: cannot write {}: {err}", path.display());
        process::exit(1);
      }
    }
    None => print!("{asm}"),
  }
}
