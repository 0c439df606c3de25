//! `chir-dis`: deserialize a CHIR container and dump it as readable
//! text.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::process;

use chime_chir::deserialize::Deserializer;
use chime_chir::printer;
use chime_chir::CHIR_READABLE_FILE_EXTENSION;
use chime_errors::ice;

const EXIT_CODE_SUCCESS: i32 = 0;
const EXIT_CODE_ERROR: i32 = 1;

const USAGE: &str = "A tool used to deserialize and dump CHIR.

Overview: chir-dis xxx.chir -> xxx.chirtxt

Usage:
  chir-dis [option] file

Options:
  -v                      print compiler version information.
  -h                      print this help.";

struct ActionInfo {
    print_help: bool,
    print_version: bool,
    input_file_path: Option<String>,
}

fn parse_args(args: &[String]) -> Result<ActionInfo, ()> {
    let mut info = ActionInfo {
        print_help: false,
        print_version: false,
        input_file_path: None,
    };
    if args.is_empty() {
        eprintln!("expected one serialization file of CHIR.");
        println!("{}", USAGE);
        return Err(());
    }
    let mut multi_input = false;
    for arg in args {
        match arg.as_str() {
            "-h" => info.print_help = true,
            "-v" => info.print_version = true,
            other if other.starts_with('-') => {
                let name = other.split('=').next().unwrap_or(other);
                eprintln!("invalid option: '{}'", name);
                println!("{}", USAGE);
                return Err(());
            }
            other => {
                if info.input_file_path.is_some() {
                    multi_input = true;
                } else {
                    info.input_file_path = Some(other.to_string());
                }
            }
        }
    }
    if info.print_help {
        return Ok(info);
    }
    if multi_input {
        eprintln!("Only one file can be entered at a time");
        println!("{}", USAGE);
        return Err(());
    }
    Ok(info)
}

fn current_dir_writable() -> bool {
    let probe = Path::new(".").join(".chir-dis-probe");
    match fs::File::create(&probe) {
        Ok(_) => {
            let _ = fs::remove_file(&probe);
            true
        }
        Err(_) => false,
    }
}

fn disassemble(path: &str) -> bool {
    if !current_dir_writable() {
        eprintln!("can't access current directory to write .chirtxt due to no permission");
        return false;
    }
    let input = Path::new(path);
    let package = match Deserializer::from_file(input) {
        Ok(package) => package,
        Err(err) => {
            eprintln!("cannot deserialize {}: {}", path, err);
            return false;
        }
    };
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("out");
    let output_path = format!("{}.{}", stem, CHIR_READABLE_FILE_EXTENSION);
    let mut out = match fs::File::create(&output_path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("cannot create {}: {}", output_path, err);
            return false;
        }
    };
    let written = printer::print_serialize_info(&package, &mut out)
        .and_then(|_| printer::print_package(&package, &mut out))
        .and_then(|_| out.flush());
    match written {
        Ok(()) => true,
        Err(err) => {
            // an I/O failure mid-dump is an internal error: banner,
            // cleanup, exit code 2
            ice::internal_error(&format!("failed writing {}: {}", output_path, err));
            false
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let info = match parse_args(&args) {
        Ok(info) => info,
        Err(()) => process::exit(EXIT_CODE_ERROR),
    };
    if info.print_help {
        println!("{}", USAGE);
        process::exit(EXIT_CODE_SUCCESS);
    }
    if info.print_version {
        println!("chime compiler {}", env!("CARGO_PKG_VERSION"));
        process::exit(EXIT_CODE_SUCCESS);
    }
    let input = match info.input_file_path {
        Some(input) => input,
        None => {
            println!("{}", USAGE);
            process::exit(EXIT_CODE_ERROR);
        }
    };
    if !disassemble(&input) {
        process::exit(EXIT_CODE_ERROR);
    }
}
