//! Interactive yes/no confirmation for destructive operations.
//!
//! The answer parser is a pure function and the read loop takes any
//! `BufRead`, so tests can script a conversation without a terminal.

use std::io::{self, BufRead, Write};
use std::str::FromStr;

use thiserror::Error;

/// Errors raised by the confirmation gate.
#[derive(Error, Debug)]
pub enum PromptError {
    #[error("invalid confirmation default '{0}': expected 'yes', 'no' or 'ask'")]
    InvalidDefault(String),

    #[error("could not read an answer: {0}")]
    Io(#[from] io::Error),
}

/// Result type for prompt operations.
pub type Result<T> = std::result::Result<T, PromptError>;

/// What an empty answer at the prompt means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerDefault {
    /// Empty input counts as yes.
    Yes,
    /// Empty input counts as no.
    No,
    /// An explicit answer is required.
    Ask,
}

impl AnswerDefault {
    /// Prompt suffix indicating the default to the operator.
    fn hint(self) -> &'static str {
        match self {
            AnswerDefault::Yes => " [Y/n] ",
            AnswerDefault::No => " [y/N] ",
            AnswerDefault::Ask => " [y/n] ",
        }
    }
}

impl FromStr for AnswerDefault {
    type Err = PromptError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "yes" | "y" => Ok(AnswerDefault::Yes),
            "no" | "n" => Ok(AnswerDefault::No),
            "ask" => Ok(AnswerDefault::Ask),
            other => Err(PromptError::InvalidDefault(other.to_string())),
        }
    }
}

/// Interpret one line of operator input.
///
/// Returns `Some(answer)` for a decisive input and `None` when the
/// caller should re-prompt. Matching is case-insensitive; empty input
/// resolves to the default unless an explicit answer is required.
pub fn parse_answer(input: &str, default: AnswerDefault) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "" => match default {
            AnswerDefault::Yes => Some(true),
            AnswerDefault::No => Some(false),
            AnswerDefault::Ask => None,
        },
        "y" | "ye" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Ask a yes/no question, looping until the operator gives a decisive
/// answer.
///
/// The loop terminates only on valid input; end-of-input on `reader` is
/// an error rather than a spin.
pub fn confirm_from<R: BufRead, W: Write>(
    question: &str,
    default: AnswerDefault,
    mut reader: R,
    mut writer: W,
) -> Result<bool> {
    loop {
        write!(writer, "{}{}", question, default.hint())?;
        writer.flush()?;

        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Err(PromptError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no answer given",
            )));
        }

        match parse_answer(&line, default) {
            Some(answer) => return Ok(answer),
            None => {
                writeln!(writer, "Please respond with 'yes' or 'no' (or 'y' or 'n').")?;
            }
        }
    }
}

/// Ask a yes/no question on the interactive console.
pub fn confirm(question: &str, default: AnswerDefault) -> Result<bool> {
    let stdin = io::stdin();
    let answer = confirm_from(question, default, stdin.lock(), io::stdout())?;
    Ok(answer)
}
