use super::{Archive, ArchiveError};
use crate::{executors::SimulatorHelp, ingest::ArchiveEntry};
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, info, trace};

/// Archive in a single SQLite file
///
/// Every store opens its own connection, so worker processes only share the file. Callers
/// serialize stores through the ledger lock, the busy timeout only covers readers outside
/// of a run.
#[derive(Debug, Clone)]
pub struct SqliteArchive {
    path: PathBuf,
}

impl SqliteArchive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open(&self) -> Result<Connection, ArchiveError> {
        let connection = Connection::open(&self.path)?;
        connection.busy_timeout(Duration::from_secs(30))?;

        for (counter, table) in SQL_SCHEMA.iter().enumerate() {
            if let Err(error) = connection.execute(table, []) {
                error!(error = ?error, table = table, "Failed to apply SQL schema ({}/{SQL_SCHEMA_NUMBER}): {error}", counter + 1);

                return Err(ArchiveError::SQLite(error));
            }
        }

        trace!(path = ?self.path, "Opened archive");

        Ok(connection)
    }

    /// keys of all archived simulations
    pub fn keys(&self) -> Result<Vec<String>, ArchiveError> {
        let connection = self.open()?;
        let keys = connection
            .prepare_cached("select key from simulations order by key")?
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(keys)
    }

    /// stored file content of an archived simulation
    pub fn file(&self, key: &str, name: &str) -> Result<Option<Vec<u8>>, ArchiveError> {
        let connection = self.open()?;
        let content = connection
            .prepare_cached("select content from files where key = ? and name = ?")?
            .query_row(params![key, name], |row| row.get(0))
            .optional()?;

        Ok(content)
    }

    pub fn help(&self) -> Result<Option<String>, ArchiveError> {
        let connection = self.open()?;
        let help = connection
            .prepare_cached("select value from metadata where name = 'help'")?
            .query_row([], |row| row.get(0))
            .optional()?;

        Ok(help)
    }
}

impl Archive for SqliteArchive {
    fn store(&self, entry: &ArchiveEntry, help: &SimulatorHelp) -> Result<bool, ArchiveError> {
        let mut connection = self.open()?;
        let tx = connection.transaction()?;

        tx.execute(
            "insert or ignore into metadata (name, value) values ('help', ?)",
            params![help.text],
        )?;

        let inserted = tx.execute(
            "insert or ignore into simulations (key, path) values (?, ?)",
            params![entry.key, entry.path.to_string_lossy().into_owned()],
        )?;

        if inserted == 0 {
            debug!(key = %entry.key, "Simulation is already archived, skipping");
            tx.commit()?;

            return Ok(false);
        }

        for (name, content) in entry.files.iter() {
            tx.prepare_cached("insert or replace into files (key, name, content) values (?, ?, ?)")?
                .execute(params![entry.key, name, content])?;
        }
        tx.commit()?;

        info!(key = %entry.key, files = entry.files.len(), "Archived simulation");

        Ok(true)
    }
}

pub const SQL_SCHEMA: [&str; 3] = [
    "create table if not exists metadata (
    name text primary key,
    value text not null
);",
    "create table if not exists simulations (
    key text primary key,
    path text not null
);",
    "create table if not exists files (
    key text not null references simulations (key),
    name text not null,
    content blob not null,
    primary key (key, name)
);",
];
pub const SQL_SCHEMA_NUMBER: usize = SQL_SCHEMA.len();
