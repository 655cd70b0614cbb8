//! Script parsing
//!
//! One operation per line, `transactionId:COMMAND:variable`. Blank lines and
//! lines starting with `#` are ignored. Lines with an unrecognized command
//! are dropped.

use crate::error::{Error, Result};
use crate::transaction::{Command, Operation, TransactionId};
use std::path::Path;
use tracing::{debug, warn};

/// Parses one script line. `line_no` is 1-based and only used for errors.
pub fn parse_line(line: &str, line_no: usize) -> Result<Option<Operation>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let mut fields = line.splitn(3, ':');
    let (Some(txn), Some(cmd), Some(var)) = (fields.next(), fields.next(), fields.next()) else {
        return Err(parse_error(line_no, format!("expected id:COMMAND:variable, got '{}'", line)));
    };

    let transaction = txn
        .trim()
        .parse::<i64>()
        .map(TransactionId)
        .map_err(|_| parse_error(line_no, format!("invalid transaction id '{}'", txn.trim())))?;

    let variable = var.trim();
    if variable.is_empty() || variable.contains(char::is_whitespace) {
        return Err(parse_error(line_no, format!("invalid variable name '{}'", variable)));
    }

    match cmd.trim().parse::<Command>() {
        Ok(command) => Ok(Some(Operation::new(transaction, command, variable))),
        Err(Error::UnknownCommand(cmd)) => {
            warn!(line = line_no, command = %cmd, "dropping line with unknown command");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

pub fn parse_script(text: &str) -> Result<Vec<Operation>> {
    let mut operations = Vec::new();
    for (i, line) in text.lines().enumerate() {
        if let Some(op) = parse_line(line, i + 1)? {
            operations.push(op);
        }
    }
    debug!(operations = operations.len(), "parsed script");
    Ok(operations)
}

pub fn load_script(path: impl AsRef<Path>) -> Result<Vec<Operation>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    parse_script(&text)
}

fn parse_error(line: usize, message: String) -> Error {
    Error::ParseError { line, message }
}
