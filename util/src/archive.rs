//! Struct archiving functionality
//!
//! Modules archive one record per cycle into CSV files inside the session's archive directory.
//! To add archiving functionality to a struct implement the `Archived` trait.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External imports
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal imports
use crate::session::Session;

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// An object used to write CSV archive files.
pub struct Archiver {
    path: PathBuf,
    writer: Writer<File>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Errors which can occur while archiving.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Cannot create the archive file {0:?}: {1}")]
    CannotCreate(PathBuf, std::io::Error),

    #[error("Cannot write a record to {0:?}: {1}")]
    CannotWrite(PathBuf, csv::Error),

    #[error("Cannot flush the archive file {0:?}: {1}")]
    CannotFlush(PathBuf, std::io::Error),
}

// ---------------------------------------------------------------------------
// TRAITS
// ---------------------------------------------------------------------------

/// A trait which enables a struct to be archived as a csv.
///
/// The struct shall own an `Archiver` for each file it writes, set up in its `init` or `new`
/// function.
pub trait Archived {
    /// Write the archives for this struct
    fn write(&mut self) -> Result<(), ArchiveError>;
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl Archiver {
    /// Create a new archiver from a particular path relative to the session's archive root.
    ///
    /// Any existing file at the path is truncated. The header row is written with the first
    /// record.
    pub fn from_path<P: AsRef<Path>>(session: &Session, path: P) -> Result<Self, ArchiveError> {
        let path = session.arch_root.join(path);

        let file = File::create(&path).map_err(|e| ArchiveError::CannotCreate(path.clone(), e))?;

        let writer = WriterBuilder::new().has_headers(true).from_writer(file);

        Ok(Self { path, writer })
    }

    /// Path to the archive file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialise a record into the archive.
    ///
    /// The record must be flat, nested structures cannot be written as CSV columns.
    pub fn serialise<T: Serialize>(&mut self, record: T) -> Result<(), ArchiveError> {
        self.writer
            .serialize(record)
            .map_err(|e| ArchiveError::CannotWrite(self.path.clone(), e))?;

        self.writer
            .flush()
            .map_err(|e| ArchiveError::CannotFlush(self.path.clone(), e))
    }
}
