//! Append-only transaction log.
//!
//! One UTF-8 record per line, whitespace-separated tokens.  A token that is
//! empty or contains whitespace, a single quote, or a backslash is written
//! single-quoted, with `\'` and `\\` escapes inside the quotes; the reader
//! accepts quoted and unquoted tokens uniformly.  The grammar is
//! append-only: replay tolerates blank lines and trailing whitespace, and a
//! line that does not parse is logged and skipped, never aborting startup.

use crate::controller::Controller;
use chat_protocol::{Time, Uuid};
use std::borrow::Cow;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One journal line.  Every durable mutation maps to exactly one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    AddUser { id: Uuid, name: String, time: Time },
    AddConversation { id: Uuid, owner: Uuid, title: String, time: Time },
    AddMessage { id: Uuid, author: Uuid, conversation: Uuid, content: String, time: Time },
    AddInterestUser { user: Uuid, followed: Uuid },
    RemoveInterestUser { user: Uuid, followed: Uuid },
    AddInterestConversation { user: Uuid, conversation: Uuid },
    RemoveInterestConversation { user: Uuid, conversation: Uuid },
    AddConvoCreator { conversation: Uuid, user: Uuid },
    RemoveConvoCreator { conversation: Uuid, user: Uuid },
    AddConvoOwner { conversation: Uuid, user: Uuid },
    RemoveConvoOwner { conversation: Uuid, user: Uuid },
    AddConvoMember { conversation: Uuid, user: Uuid },
    RemoveConvoMember { conversation: Uuid, user: Uuid },
    RemoveConvoToggle { conversation: Uuid, user: Uuid },
}

/// Error parsing a single journal line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unterminated quoted token")]
    UnterminatedQuote,
    #[error("invalid escape '\\{0}'")]
    BadEscape(char),
    #[error("quoted token not followed by whitespace")]
    DanglingQuote,
    #[error("unknown record kind {0:?}")]
    UnknownKind(String),
    #[error("wrong field count for {0}")]
    Arity(&'static str),
    #[error("invalid uuid field {0:?}")]
    BadUuid(String),
    #[error("invalid time field {0:?}")]
    BadTime(String),
}

impl Record {
    /// Parse one line.  `Ok(None)` for a blank line.
    pub fn parse(line: &str) -> Result<Option<Record>, RecordError> {
        let tokens = tokenize(line)?;
        let Some((kind, fields)) = tokens.split_first() else {
            return Ok(None);
        };

        let uuid = |s: &str| s.parse::<Uuid>().map_err(|_| RecordError::BadUuid(s.to_owned()));
        let time = |s: &str| {
            s.parse::<i64>()
                .map(Time)
                .map_err(|_| RecordError::BadTime(s.to_owned()))
        };

        let record = match kind.as_str() {
            "ADD-USER" => match fields {
                [id, name, ms] => Record::AddUser {
                    id: uuid(id)?,
                    name: name.clone(),
                    time: time(ms)?,
                },
                _ => return Err(RecordError::Arity("ADD-USER")),
            },
            "ADD-CONVERSATION" => match fields {
                [id, owner, title, ms] => Record::AddConversation {
                    id: uuid(id)?,
                    owner: uuid(owner)?,
                    title: title.clone(),
                    time: time(ms)?,
                },
                _ => return Err(RecordError::Arity("ADD-CONVERSATION")),
            },
            "ADD-MESSAGE" => match fields {
                [id, author, conversation, content, ms] => Record::AddMessage {
                    id: uuid(id)?,
                    author: uuid(author)?,
                    conversation: uuid(conversation)?,
                    content: content.clone(),
                    time: time(ms)?,
                },
                _ => return Err(RecordError::Arity("ADD-MESSAGE")),
            },
            "ADD-INTEREST-USER" => pair(fields, "ADD-INTEREST-USER", |user, followed| {
                Record::AddInterestUser { user, followed }
            })?,
            "REMOVE-INTEREST-USER" => pair(fields, "REMOVE-INTEREST-USER", |user, followed| {
                Record::RemoveInterestUser { user, followed }
            })?,
            "ADD-INTEREST-CONVERSATION" => {
                pair(fields, "ADD-INTEREST-CONVERSATION", |user, conversation| {
                    Record::AddInterestConversation { user, conversation }
                })?
            }
            "REMOVE-INTEREST-CONVERSATION" => {
                pair(fields, "REMOVE-INTEREST-CONVERSATION", |user, conversation| {
                    Record::RemoveInterestConversation { user, conversation }
                })?
            }
            "ADD-CONVO-CREATOR" => pair(fields, "ADD-CONVO-CREATOR", |conversation, user| {
                Record::AddConvoCreator { conversation, user }
            })?,
            "REMOVE-CONVO-CREATOR" => pair(fields, "REMOVE-CONVO-CREATOR", |conversation, user| {
                Record::RemoveConvoCreator { conversation, user }
            })?,
            "ADD-CONVO-OWNER" => pair(fields, "ADD-CONVO-OWNER", |conversation, user| {
                Record::AddConvoOwner { conversation, user }
            })?,
            "REMOVE-CONVO-OWNER" => pair(fields, "REMOVE-CONVO-OWNER", |conversation, user| {
                Record::RemoveConvoOwner { conversation, user }
            })?,
            "ADD-CONVO-MEMBER" => pair(fields, "ADD-CONVO-MEMBER", |conversation, user| {
                Record::AddConvoMember { conversation, user }
            })?,
            "REMOVE-CONVO-MEMBER" => pair(fields, "REMOVE-CONVO-MEMBER", |conversation, user| {
                Record::RemoveConvoMember { conversation, user }
            })?,
            "REMOVE-CONVO-TOGGLE" => pair(fields, "REMOVE-CONVO-TOGGLE", |conversation, user| {
                Record::RemoveConvoToggle { conversation, user }
            })?,
            other => return Err(RecordError::UnknownKind(other.to_owned())),
        };
        Ok(Some(record))
    }
}

fn pair(
    fields: &[String],
    kind: &'static str,
    build: impl FnOnce(Uuid, Uuid) -> Record,
) -> Result<Record, RecordError> {
    match fields {
        [a, b] => {
            let a = a.parse::<Uuid>().map_err(|_| RecordError::BadUuid(a.clone()))?;
            let b = b.parse::<Uuid>().map_err(|_| RecordError::BadUuid(b.clone()))?;
            Ok(build(a, b))
        }
        _ => Err(RecordError::Arity(kind)),
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Record::AddUser { id, name, time } => {
                write!(f, "ADD-USER {} {} {}", id, quote(name), time)
            }
            Record::AddConversation { id, owner, title, time } => {
                write!(f, "ADD-CONVERSATION {} {} {} {}", id, owner, quote(title), time)
            }
            Record::AddMessage { id, author, conversation, content, time } => write!(
                f,
                "ADD-MESSAGE {} {} {} {} {}",
                id,
                author,
                conversation,
                quote(content),
                time
            ),
            Record::AddInterestUser { user, followed } => {
                write!(f, "ADD-INTEREST-USER {} {}", user, followed)
            }
            Record::RemoveInterestUser { user, followed } => {
                write!(f, "REMOVE-INTEREST-USER {} {}", user, followed)
            }
            Record::AddInterestConversation { user, conversation } => {
                write!(f, "ADD-INTEREST-CONVERSATION {} {}", user, conversation)
            }
            Record::RemoveInterestConversation { user, conversation } => {
                write!(f, "REMOVE-INTEREST-CONVERSATION {} {}", user, conversation)
            }
            Record::AddConvoCreator { conversation, user } => {
                write!(f, "ADD-CONVO-CREATOR {} {}", conversation, user)
            }
            Record::RemoveConvoCreator { conversation, user } => {
                write!(f, "REMOVE-CONVO-CREATOR {} {}", conversation, user)
            }
            Record::AddConvoOwner { conversation, user } => {
                write!(f, "ADD-CONVO-OWNER {} {}", conversation, user)
            }
            Record::RemoveConvoOwner { conversation, user } => {
                write!(f, "REMOVE-CONVO-OWNER {} {}", conversation, user)
            }
            Record::AddConvoMember { conversation, user } => {
                write!(f, "ADD-CONVO-MEMBER {} {}", conversation, user)
            }
            Record::RemoveConvoMember { conversation, user } => {
                write!(f, "REMOVE-CONVO-MEMBER {} {}", conversation, user)
            }
            Record::RemoveConvoToggle { conversation, user } => {
                write!(f, "REMOVE-CONVO-TOGGLE {} {}", conversation, user)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Split a line into tokens: whitespace-separated, single quotes delimiting
/// tokens that may contain whitespace, backslash escapes inside quotes.
pub fn tokenize(line: &str) -> Result<Vec<String>, RecordError> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '\'' {
            chars.next();
            let mut token = String::new();
            loop {
                match chars.next() {
                    None => return Err(RecordError::UnterminatedQuote),
                    Some('\'') => break,
                    Some('\\') => match chars.next() {
                        Some(escaped @ ('\'' | '\\')) => token.push(escaped),
                        Some(other) => return Err(RecordError::BadEscape(other)),
                        None => return Err(RecordError::UnterminatedQuote),
                    },
                    Some(other) => token.push(other),
                }
            }
            if chars.peek().is_some_and(|next| !next.is_whitespace()) {
                return Err(RecordError::DanglingQuote);
            }
            tokens.push(token);
        } else {
            let mut token = String::new();
            while let Some(&next) = chars.peek() {
                if next.is_whitespace() {
                    break;
                }
                token.push(next);
                chars.next();
            }
            tokens.push(token);
        }
    }
    Ok(tokens)
}

/// Quote a token for the writer when the reader could not split it back out
/// verbatim.
fn quote(token: &str) -> Cow<'_, str> {
    let needs_quoting = token.is_empty()
        || token
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if !needs_quoting {
        return Cow::Borrowed(token);
    }
    let mut quoted = String::with_capacity(token.len() + 2);
    quoted.push('\'');
    for c in token.chars() {
        if c == '\'' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('\'');
    Cow::Owned(quoted)
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Appends records to the transaction log, one flushed line per mutation.
#[derive(Debug)]
pub struct JournalWriter {
    file: File,
}

impl JournalWriter {
    /// Open (or create) the log at the given path in append mode.
    pub fn open(path: &Path) -> io::Result<JournalWriter> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JournalWriter { file })
    }

    /// Append one record.  The line reaches the operating system before this
    /// returns; a failure here means the model has diverged from durable
    /// state and is fatal to the server.
    pub fn append(&mut self, record: &Record) -> io::Result<()> {
        let mut line = record.to_string();
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.file.flush()
    }
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Counters reported after a replay pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: u64,
    pub skipped: u64,
}

/// Replay a log into the controller's replay entrypoints.
///
/// Lines that do not parse, duplicate ids, and references to unknown
/// entities are logged and skipped; replay never aborts the server.
pub fn replay<R: BufRead>(reader: R, controller: &mut Controller) -> io::Result<ReplayStats> {
    let mut stats = ReplayStats::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        match Record::parse(&line) {
            Ok(None) => {}
            Ok(Some(record)) => match controller.replay(record) {
                Ok(()) => stats.applied += 1,
                Err(error) => {
                    warn!(line = index + 1, %error, "skipping journal record");
                    stats.skipped += 1;
                }
            },
            Err(error) => {
                warn!(line = index + 1, %error, "skipping malformed journal line");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

/// Replay the log file at `path` if it exists.
pub fn replay_file(path: &Path, controller: &mut Controller) -> io::Result<ReplayStats> {
    if !path.exists() {
        info!(path = %path.display(), "no transaction log yet, starting empty");
        return Ok(ReplayStats::default());
    }
    let file = File::open(path)?;
    replay(BufReader::new(file), controller)
}
