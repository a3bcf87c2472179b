use freqsev::store::inspect::inspect;
use glob::glob;
use std::{env, path::PathBuf, process::exit};

fn main() {
    // Expect one glob pattern, e.g. "data/parquet/*.parquet".
    let args: Vec<String> = env::args().collect();
    if args.len() != 2 {
        eprintln!("Usage: {} <PARQUET_GLOB>", args[0]);
        exit(1);
    }

    let paths: Vec<PathBuf> = match glob(&args[1]) {
        Ok(entries) => entries.filter_map(Result::ok).collect(),
        Err(e) => {
            eprintln!("Error: bad pattern {}: {}", args[1], e);
            exit(1);
        }
    };
    if paths.is_empty() {
        eprintln!("No files match {}", args[1]);
        exit(1);
    }

    let mut failures = 0;
    for path in &paths {
        match inspect(path) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("Error: {}: {:#}", path.display(), e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        exit(1);
    }
}
