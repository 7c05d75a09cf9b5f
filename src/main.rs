use std::io::{stdin, stdout};
use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use sql_clone::pager::PagerError;
use sql_clone::repl;
use sql_clone::{Table, TableError};

fn main() -> ExitCode {
    // stdout belongs to the REPL, so diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let filename = match std::env::args().nth(1) {
        Some(filename) => filename,
        None => {
            println!("Must supply a database filename.");
            return ExitCode::FAILURE;
        }
    };

    let table = match Table::open(&filename) {
        Ok(table) => table,
        Err(TableError::Pager(PagerError::File(e))) => {
            error!(error = %e, filename = %filename, "could not open database file");
            println!("Unable to open file");
            return ExitCode::FAILURE;
        }
        Err(e) => {
            println!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = repl::run(table, stdin().lock(), &mut stdout().lock());
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("{}", e);
            ExitCode::FAILURE
        }
    }
}
