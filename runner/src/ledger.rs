
use std::{
    fmt::{self, Display, Write},
    path::{self, Path, PathBuf},
};
use thiserror::Error;
use tracing::warn;

/// number of free text lines in front of the first work item
pub const HEADER_LINES: usize = 2;
/// sentinel tokens closing a ledger, everything after them is ignored
pub const TERMINATOR: [&str; 2] = ["THE", "END"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Malformed ledger line {line}: '{content}'")]
    Malformed { line: usize, content: String },
    #[error("Unknown status code '{code}' on ledger line {line}")]
    UnknownStatus { line: usize, code: String },
    #[error("Path {0:?} can't be stored in a ledger (whitespace or non UTF-8)")]
    UnrepresentablePath(PathBuf),
}

/// Progress of a single work item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Status {
    Pending = -1,
    InProgress = 0,
    Complete = 1,
}

impl Status {
    fn code(self) -> i8 {
        self as i8
    }

    fn from_code(code: &str) -> Option<Self> {
        match code {
            "-1" => Some(Self::Pending),
            "0" => Some(Self::InProgress),
            "1" => Some(Self::Complete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub path: PathBuf,
    pub status: Status,
}

impl WorkItem {
    /// create a pending item, rejecting paths the line format can't carry
    pub fn pending(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();

        match path.to_str() {
            Some(text) if !text.is_empty() && !text.contains(char::is_whitespace) => Ok(Self {
                path,
                status: Status::Pending,
            }),
            _ => Err(LedgerError::UnrepresentablePath(path)),
        }
    }

    /// check if `path` refers to this item, either verbatim or in its absolute form
    pub fn matches(&self, path: &Path) -> bool {
        self.path == path
            || path::absolute(&self.path)
                .map(|absolute| absolute == path)
                .unwrap_or(false)
    }
}

/// Counts of items per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Summary {
    pub pending: usize,
    pub in_progress: usize,
    pub complete: usize,
}

impl Summary {
    pub fn total(&self) -> usize {
        self.pending + self.in_progress + self.complete
    }
}

impl Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Number of Simulations completed: {}", self.complete)?;
        writeln!(f, "Number of Simulations in progress: {}", self.in_progress)?;
        write!(f, "Number of Simulations remaining: {}", self.pending)
    }
}

/// In-memory form of a checkpoint file
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ledger {
    /// free text lines, kept verbatim
    pub header: Vec<String>,
    pub items: Vec<WorkItem>,
    /// whether the terminator line was present
    pub terminated: bool,
}

impl Ledger {
    /// build a fresh ledger with every item pending
    pub fn new<I, P>(source: &Path, paths: I) -> Result<Self, LedgerError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let items = paths
            .into_iter()
            .map(WorkItem::pending)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            header: Self::standard_header(source, items.len()),
            items,
            terminated: true,
        })
    }

    /// A bad line is an error, unless it is the last line of an unterminated ledger. That line
    /// was cut short by a crash mid-write and is dropped, the reconciler appends its item again.
    pub fn decode(text: &str) -> Result<Self, LedgerError> {
        let mut ledger = Self::default();
        let mut cut_short = None;

        for (index, line) in text.lines().enumerate() {
            if index < HEADER_LINES {
                ledger.header.push(line.to_owned());
                continue;
            }

            let tokens = line.split_whitespace().collect::<Vec<_>>();
            if tokens.is_empty() {
                continue;
            }

            // a bad line followed by anything else is corruption, not truncation
            if let Some(error) = cut_short.take() {
                return Err(error);
            }

            match tokens.as_slice() {
                [first, second, ..] if [*first, *second] == TERMINATOR => {
                    ledger.terminated = true;
                    break;
                }
                [path, code] => match Status::from_code(code) {
                    Some(status) => ledger.items.push(WorkItem {
                        path: PathBuf::from(path),
                        status,
                    }),
                    None => {
                        cut_short = Some(LedgerError::UnknownStatus {
                            line: index + 1,
                            code: code.to_string(),
                        })
                    }
                },
                _ => {
                    cut_short = Some(LedgerError::Malformed {
                        line: index + 1,
                        content: line.to_owned(),
                    })
                }
            }
        }

        if let Some(error) = cut_short {
            warn!("Dropping the last line of an unterminated checkpoint file: {error}");
        }

        Ok(ledger)
    }

    /// the standard header, written by `new` and restored for ledgers cut short inside it
    pub fn standard_header(source: &Path, total: usize) -> Vec<String> {
        vec![
            format!("Vspace File: {}", source.display()),
            format!("Total Number of Simulations: {total}"),
        ]
    }

    pub fn encode(&self) -> String {
        let mut text = String::new();

        // writing into a String can't fail
        for line in self.header.iter() {
            let _ = writeln!(text, "{line}");
        }
        for item in self.items.iter() {
            let _ = writeln!(text, "{} {}", item.path.display(), item.status.code());
        }
        if self.terminated {
            let _ = writeln!(text, "{} {}", TERMINATOR[0], TERMINATOR[1]);
        }

        text
    }

    /// first item in ledger order that is still pending
    pub fn first_pending_mut(&mut self) -> Option<&mut WorkItem> {
        self.items
            .iter_mut()
            .find(|item| item.status == Status::Pending)
    }

    pub fn find_mut(&mut self, path: &Path) -> Option<&mut WorkItem> {
        self.items.iter_mut().find(|item| item.matches(path))
    }

    /// a ledger without items is never considered complete
    pub fn is_complete(&self) -> bool {
        !self.items.is_empty()
            && self
                .items
                .iter()
                .all(|item| item.status == Status::Complete)
    }

    pub fn summary(&self) -> Summary {
        self.items
            .iter()
            .fold(Summary::default(), |mut summary, item| {
                match item.status {
                    Status::Pending => summary.pending += 1,
                    Status::InProgress => summary.in_progress += 1,
                    Status::Complete => summary.complete += 1,
                }

                summary
            })
    }
}
