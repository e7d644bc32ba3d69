use std::{env, fs, path::Path, process::{Command, ExitCode}, time::Instant};

use pyrinas::{compile, FsModuleResolver};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let Some(input_path) = args.get(1) else {
        eprintln!("usage: pyrinas <input> [-o <output>] [--cc <compiler>]");
        return ExitCode::FAILURE;
    };

    let output_path = match output_path_for(&args, input_path) {
        Ok(path) => path,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let source = match fs::read_to_string(input_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error reading {input_path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let base_dir = Path::new(input_path).parent().unwrap_or_else(|| Path::new("."));
    let mut resolver = FsModuleResolver::new(base_dir);

    let start = Instant::now();
    let output = match compile(&source, input_path, &mut resolver) {
        Ok(output) => output,
        Err(err) => {
            let elapsed = start.elapsed();
            eprintln!("error after {elapsed:?}: {err}");
            return ExitCode::FAILURE;
        }
    };
    let elapsed = start.elapsed();

    if let Err(err) = fs::write(&output_path, &output.c_source) {
        eprintln!("error writing {output_path}: {err}");
        return ExitCode::FAILURE;
    }

    if !output.link_libs.is_empty() {
        eprintln!("link against: {}", output.link_libs.join(", "));
    }
    eprintln!("compiled in {elapsed:?}, wrote {output_path}");

    if let Some(cc) = cc_compiler(&args) {
        return run_downstream_compiler(&cc, &output_path, &output.link_libs);
    }
    ExitCode::SUCCESS
}

fn cc_compiler(args: &[String]) -> Option<String> {
    let index = args.iter().position(|a| a == "--cc")?;
    args.get(index + 1).cloned()
}

/// Convenience wrapper around a downstream C compiler; not invoked or
/// validated by the core crate's own tests.
fn run_downstream_compiler(cc: &str, c_path: &str, link_libs: &[String]) -> ExitCode {
    let binary_path = Path::new(c_path).with_extension("");
    let mut command = Command::new(cc);
    command.arg(c_path).arg("-o").arg(&binary_path);
    for lib in link_libs {
        command.arg(format!("-l{lib}"));
    }

    match command.status() {
        Ok(status) if status.success() => {
            eprintln!("built {}", binary_path.display());
            ExitCode::SUCCESS
        }
        Ok(status) => {
            eprintln!("{cc} exited with {status}");
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("failed to run {cc}: {err}");
            ExitCode::FAILURE
        }
    }
}

fn output_path_for(args: &[String], input_path: &str) -> Result<String, String> {
    if let Some(index) = args.iter().position(|a| a == "-o") {
        return args.get(index + 1).cloned().ok_or_else(|| "-o requires a path argument".to_owned());
    }
    let stem = Path::new(input_path).file_stem().and_then(|s| s.to_str()).unwrap_or("out");
    Ok(format!("{stem}.c"))
}
