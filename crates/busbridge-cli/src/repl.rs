//! Operator console.
//!
//! `exit` (or Ctrl-C at the prompt) stops the bridge; any other line is
//! logged and ignored.  End of input only closes the console: a bridge
//! started with stdin on `/dev/null` keeps running until Ctrl-C.

use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing::{info, warn};

/// What the console wants after one read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleAction {
    Continue,
    /// The operator asked to stop the bridge.
    Exit,
    /// No more input; the bridge keeps running.
    Closed,
}

/// Interpret one console line.
pub fn interpret(line: &str) -> ConsoleAction {
    let line = line.trim();
    if line == "exit" {
        return ConsoleAction::Exit;
    }
    if !line.is_empty() {
        info!(input = %line, "console input ignored");
    }
    ConsoleAction::Continue
}

/// Interpret the result of one `readline`.
pub fn on_read(read: Result<String, ReadlineError>) -> ConsoleAction {
    match read {
        Ok(line) => interpret(&line),
        Err(ReadlineError::Interrupted) => ConsoleAction::Exit,
        Err(ReadlineError::Eof) => ConsoleAction::Closed,
        Err(e) => {
            warn!(error = %e, "console read failed");
            ConsoleAction::Closed
        }
    }
}

/// Read lines until the operator asks to stop or input ends.  Blocks the
/// calling thread; returns [`ConsoleAction::Exit`] or [`ConsoleAction::Closed`].
pub fn run() -> ConsoleAction {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            warn!(error = %e, "console unavailable");
            return ConsoleAction::Closed;
        }
    };

    loop {
        let read = editor.readline(&format!("{} ", "busbridge>".bold().cyan()));
        match on_read(read) {
            ConsoleAction::Continue => {}
            ConsoleAction::Exit => {
                println!("{}", "Stopping bridge.".green());
                return ConsoleAction::Exit;
            }
            ConsoleAction::Closed => return ConsoleAction::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_stops() {
        assert_eq!(interpret("exit"), ConsoleAction::Exit);
        assert_eq!(interpret("  exit\n"), ConsoleAction::Exit);
    }

    #[test]
    fn other_lines_continue() {
        assert_eq!(interpret("status"), ConsoleAction::Continue);
        assert_eq!(interpret(""), ConsoleAction::Continue);
        assert_eq!(interpret("EXIT"), ConsoleAction::Continue);
        assert_eq!(interpret("exit now"), ConsoleAction::Continue);
    }

    #[test]
    fn end_of_input_closes_without_stopping() {
        assert_eq!(on_read(Err(ReadlineError::Eof)), ConsoleAction::Closed);
    }

    #[test]
    fn interrupt_at_prompt_stops() {
        assert_eq!(on_read(Err(ReadlineError::Interrupted)), ConsoleAction::Exit);
        assert_eq!(on_read(Ok("exit".to_string())), ConsoleAction::Exit);
        assert_eq!(on_read(Ok("hello".to_string())), ConsoleAction::Continue);
    }
}
