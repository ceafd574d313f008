//! Operator console: line commands read from stdin on a helper thread.

use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorCommand {
    /// `r`
    StartRegistration,
    /// `c`
    Cancel,
    /// `q`
    Quit,
    /// Any other line, trimmed; a label while a batch awaits one.
    Text(String),
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "r" | "R" => OperatorCommand::StartRegistration,
            "c" | "C" => OperatorCommand::Cancel,
            "q" | "Q" => OperatorCommand::Quit,
            other => OperatorCommand::Text(other.to_string()),
        }
    }
}

/// Forward stdin lines as commands until EOF or the receiver goes away.
///
/// The thread is detached in practice: a blocking read on stdin cannot be
/// interrupted, so the process exits without joining it.
pub fn spawn_stdin_reader(tx: Sender<OperatorCommand>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("operator".to_string())
        .spawn(move || forward_lines(io::stdin().lock(), &tx))
}

fn forward_lines<R: BufRead>(input: R, tx: &Sender<OperatorCommand>) {
    for line in input.lines() {
        let Ok(line) = line else { break };
        if tx.send(OperatorCommand::parse(&line)).is_err() {
            break;
        }
    }
    debug!("operator input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_parse() {
        assert_eq!(OperatorCommand::parse("r\n"), OperatorCommand::StartRegistration);
        assert_eq!(OperatorCommand::parse(" q "), OperatorCommand::Quit);
        assert_eq!(OperatorCommand::parse("C"), OperatorCommand::Cancel);
        assert_eq!(
            OperatorCommand::parse("  alice "),
            OperatorCommand::Text("alice".to_string())
        );
        assert_eq!(OperatorCommand::parse(""), OperatorCommand::Text(String::new()));
    }

    #[test]
    fn test_forward_lines() {
        let (tx, rx) = unbounded();
        forward_lines("r\nbob\n\nq\n".as_bytes(), &tx);
        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                OperatorCommand::StartRegistration,
                OperatorCommand::Text("bob".to_string()),
                OperatorCommand::Text(String::new()),
                OperatorCommand::Quit,
            ]
        );
    }
}
