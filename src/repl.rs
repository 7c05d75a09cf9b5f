use std::io::{BufRead, Write};

use thiserror::Error;
use tracing::{debug, error};

use crate::table::{Table, TableError};
use crate::virtual_machine::{
    prepare_statement, Statement, StatementError, VMErr, VMResult, VirtualMachine,
};

pub const PROMPT: &str = "db > ";

pub enum MetaCommand {
    Exit,
    BTree,
    Constants,
    Unsupported,
}

enum ReplAction<'a> {
    Meta { command: MetaCommand, original_input: &'a str },
    Statement { original_input: &'a str },
}

#[derive(Debug, Error)]
pub enum ReplErr {
    #[error("I/O error: {0}")]
    IOErr(#[from] std::io::Error),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Reads commands from `input` until `.exit` or end of input, writing every
/// prompt and result to `output`. The table is flushed and closed on the
/// way out.
pub fn run<R, W>(mut table: Table, mut input: R, output: &mut W) -> Result<(), ReplErr>
where
    R: BufRead,
    W: Write,
{
    let mut input_buffer = Vec::new();

    loop {
        input_buffer.clear();
        output.write_all(PROMPT.as_bytes())?;
        output.flush()?;

        if input.read_until(b'\n', &mut input_buffer)? == 0 {
            debug!("end of input");
            break;
        }
        // Lines are bytes. Anything that is not UTF-8 can still be echoed
        // back in an error, but never stored as a row.
        let is_utf8 = std::str::from_utf8(&input_buffer).is_ok();
        let text = String::from_utf8_lossy(&input_buffer);
        let line = text
            .strip_suffix('\n')
            .map(|line| line.strip_suffix('\r').unwrap_or(line))
            .unwrap_or(&*text);

        match ReplAction::from(line) {
            ReplAction::Meta {
                command,
                original_input,
            } => match command {
                MetaCommand::Exit => break,
                MetaCommand::BTree => {
                    let tree = table.print_tree()?;
                    write!(output, "Tree:\n{}", tree)?;
                }
                MetaCommand::Constants => {
                    write!(output, "Constants:\n{}", Table::constants())?;
                }
                MetaCommand::Unsupported => {
                    writeln!(output, "Unrecognized command '{}'", original_input)?;
                }
            },
            ReplAction::Statement { original_input } => {
                let statement = match prepare_statement(original_input) {
                    Ok(Statement::Insert { .. }) if !is_utf8 => {
                        writeln!(output, "{}", StatementError::Sql)?;
                        continue;
                    }
                    Ok(statement) => statement,
                    Err(e) => {
                        writeln!(output, "{}", e)?;
                        continue;
                    }
                };

                let mut vm = VirtualMachine { table: &mut table };
                match vm.execute_statement(statement) {
                    Ok(VMResult::Rows(rows)) => {
                        for row in rows {
                            writeln!(output, "{}", row)?;
                        }
                        writeln!(output, "Executed.")?;
                    }
                    Ok(VMResult::Success) => writeln!(output, "Executed.")?,
                    Err(VMErr::Table(e @ TableError::Pager(_))) => {
                        error!(error = %e, "storage failure, ending session");
                        if let Err(close_err) = table.close() {
                            error!(error = %close_err, "failed to flush pages after storage failure");
                        }
                        return Err(e.into());
                    }
                    Err(e) => writeln!(output, "{}", e)?,
                }
            }
        }
    }

    output.flush()?;
    table.close()?;
    Ok(())
}

impl<'a> From<&'a str> for ReplAction<'a> {
    fn from(s: &'a str) -> Self {
        if s.starts_with('.') {
            ReplAction::Meta {
                command: s.into(),
                original_input: s,
            }
        } else {
            ReplAction::Statement { original_input: s }
        }
    }
}

impl From<&str> for MetaCommand {
    fn from(s: &str) -> Self {
        match s {
            ".exit" => MetaCommand::Exit,
            ".btree" => MetaCommand::BTree,
            ".constants" => MetaCommand::Constants,
            _ => MetaCommand::Unsupported,
        }
    }
}
