mod repl;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use toi::{Error, FsModuleLoader, Toi};

#[derive(Parser)]
#[command(author, version, about = "The toi interpreter", long_about = None)]
struct Cli {
  /// Script to run; starts the REPL when omitted.
  script: Option<PathBuf>,

  /// Print the compiled bytecode instead of running.
  #[arg(long)]
  dump: bool,
}

fn main() -> ExitCode {
  let args = Cli::parse();
  match args.script {
    Some(script) => run_file(&script, args.dump),
    None => match repl::run() {
      Ok(()) => ExitCode::SUCCESS,
      Err(error) => {
        eprintln!("{error}");
        ExitCode::FAILURE
      }
    },
  }
}

fn run_file(script: &std::path::Path, dump: bool) -> ExitCode {
  let source = match std::fs::read_to_string(script) {
    Ok(source) => source,
    Err(error) => {
      eprintln!("could not read {}: {error}", script.display());
      return ExitCode::from(74);
    }
  };

  let root = script.parent().unwrap_or(std::path::Path::new("."));
  let toi = Toi::builder()
    .with_module_loader(FsModuleLoader::new(root))
    .with_builtins()
    .build();

  if dump {
    return match toi.disassemble(&source) {
      Ok(listing) => {
        println!("{listing}");
        ExitCode::SUCCESS
      }
      Err(diagnostics) => {
        repl::report_diagnostics(&diagnostics);
        ExitCode::from(65)
      }
    };
  }

  match toi.run_script(&source, &script.to_string_lossy()) {
    Ok(_) => ExitCode::SUCCESS,
    Err(Error::Compile(diagnostics)) => {
      repl::report_diagnostics(&diagnostics);
      ExitCode::from(65)
    }
    Err(Error::Runtime(error)) => {
      eprintln!("{error}");
      ExitCode::from(70)
    }
  }
}
