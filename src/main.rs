// Ren, a runtime for a homoiconic dynamic language.

// SPDX-FileCopyrightText: © 2024 Matthew Rothlisberger
// SPDX-License-Identifier: AGPL-3.0-only

// Ren is licensed under the terms of the GNU Affero General Public
// License version 3. See the top-level LICENSES directory for the
// license text.

// Find full copyright information in the top-level COPYRIGHT file.

// <>

// src/main.rs

// Command line runner: a file, a code string, or the REPL.

// <>

use ren::ren::{Interp, InterpConfig};

use std::env;
use std::io;
use std::process::ExitCode;

const USAGE: &str = "usage: ren [-v|-vv] [--no-gc] [--ballast N] [<file> | -e <code>]";

enum Source {
    File(String),
    Code(String),
    Repl,
}

struct Options {
    level: log::LevelFilter,
    config: InterpConfig,
    source: Source,
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    let mut opts = Options {
        level: log::LevelFilter::Warn,
        config: InterpConfig::default(),
        source: Source::Repl,
    };

    let mut args = args.iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-v" => opts.level = log::LevelFilter::Debug,
            "-vv" => opts.level = log::LevelFilter::Trace,
            "--no-gc" => opts.config.gc_disabled = true,
            "--ballast" => {
                let n = args.next().ok_or("--ballast needs a number")?;
                opts.config.ballast = n.parse().map_err(|_| format!("bad ballast: {}", n))?;
            }
            "-e" => {
                let code = args.next().ok_or("-e needs code")?;
                opts.source = Source::Code(code.clone());
            }
            s if s.starts_with('-') => return Err(format!("unknown option {}", s)),
            path => opts.source = Source::File(path.to_string()),
        }
    }
    Ok(opts)
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{}\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    if let Err(e) = simple_logger::SimpleLogger::new().with_level(opts.level).init() {
        eprintln!("logger failed to start: {}", e);
    }

    let mut interp = Interp::new(opts.config);
    let result = match opts.source {
        Source::File(path) => interp.run_file(&path),
        Source::Code(code) => interp.do_string(&code),
        Source::Repl => {
            interp.repl(io::stdin());
            return ExitCode::SUCCESS;
        }
    };

    match result {
        Ok(Some(v)) if !v.void_p() => {
            println!("{}", interp.mold(&v));
            ExitCode::SUCCESS
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("** {}", e);
            ExitCode::FAILURE
        }
    }
}
