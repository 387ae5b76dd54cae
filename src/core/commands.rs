// src/core/commands.rs

//! Classifies request lines into server directives or pass-through SCPI commands.

/// What a non-empty request line asks the bridge to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// `STATUS`: report bridge and instrument state.
    ServerStatus,
    /// `QUIT` or `EXIT`: acknowledge and close the session.
    ServerQuit,
    /// Anything else, forwarded verbatim to the instrument.
    Passthrough(String),
}

impl CommandKind {
    /// Classifies an already-trimmed, non-empty line. Directive matching is
    /// case-insensitive and exact; no SCPI grammar is checked.
    pub fn classify(line: &str) -> Self {
        if line.eq_ignore_ascii_case("STATUS") {
            CommandKind::ServerStatus
        } else if line.eq_ignore_ascii_case("QUIT") || line.eq_ignore_ascii_case("EXIT") {
            CommandKind::ServerQuit
        } else {
            CommandKind::Passthrough(line.to_string())
        }
    }

    /// Trims `raw` and classifies it. Returns `None` for empty or
    /// whitespace-only input, which must produce no response at all.
    pub fn parse(raw: &str) -> Option<Self> {
        let line = raw.trim();
        if line.is_empty() {
            None
        } else {
            Some(Self::classify(line))
        }
    }
}
