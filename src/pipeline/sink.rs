//! Document sinks for association output.

use std::{
    collections::HashMap,
    io::Write,
    path::{Path, PathBuf},
};

use indexmap::IndexMap;
use serde_json::{json, Value};

use crate::common::io::{open_append_maybe_gz, open_write_maybe_gz, MaybeGzWriter};

/// Errors when writing documents.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("index {0} does not exist")]
    NoSuchIndex(String),
    #[error("sink is already finalized")]
    Finalized,
    #[error("could not serialize document {id}: {source}")]
    Serialize {
        id: String,
        source: serde_json::Error,
    },
    #[error("could not write index {index}: {message}")]
    Io { index: String, message: String },
    #[error("document {0} was rejected")]
    Rejected(String),
}

/// Whether existing indices are replaced or extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkMode {
    #[default]
    Recreate,
    Append,
}

/// Destination of documents, written in bulk.
pub trait Sink: Send {
    /// Queue a document for writing.
    ///
    /// With `create_index` unset, writing to a missing index is an error.
    fn put(
        &mut self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
        create_index: bool,
    ) -> Result<(), Error>;

    /// Write all queued documents.
    fn flush(&mut self) -> Result<(), Error>;

    /// Flush and release all resources; no more documents are accepted.
    fn finalize(&mut self) -> Result<(), Error>;
}

/// Sink writing one `<index>.jsonl` file per index.
pub struct JsonlSink {
    dir: PathBuf,
    mode: SinkMode,
    pending: IndexMap<String, Vec<String>>,
    writers: HashMap<String, MaybeGzWriter>,
    finalized: bool,
}

impl JsonlSink {
    pub fn new<P: AsRef<Path>>(dir: P, mode: SinkMode) -> Result<Self, anyhow::Error> {
        std::fs::create_dir_all(dir.as_ref()).map_err(|e| {
            anyhow::anyhow!("could not create output directory {:?}: {}", dir.as_ref(), e)
        })?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            mode,
            pending: IndexMap::new(),
            writers: HashMap::new(),
            finalized: false,
        })
    }

    /// Path of the file holding `index`.
    pub fn index_path(&self, index: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", index))
    }

    fn index_exists(&self, index: &str) -> bool {
        self.writers.contains_key(index)
            || self.pending.contains_key(index)
            || self.index_path(index).exists()
    }

    fn writer(&mut self, index: &str) -> Result<&mut MaybeGzWriter, Error> {
        if !self.writers.contains_key(index) {
            let path = self.index_path(index);
            let writer = match self.mode {
                SinkMode::Recreate => {
                    tracing::debug!("recreating index {} at {:?}", index, &path);
                    open_write_maybe_gz(&path)
                }
                SinkMode::Append => open_append_maybe_gz(&path),
            }
            .map_err(|e| Error::Io {
                index: index.to_string(),
                message: e.to_string(),
            })?;
            self.writers.insert(index.to_string(), writer);
        }
        self.writers
            .get_mut(index)
            .ok_or_else(|| Error::NoSuchIndex(index.to_string()))
    }

    /// Write `lines` to `index`, on error returning the lines not yet written.
    fn write_lines(&mut self, index: &str, lines: Vec<String>) -> Result<(), (Error, Vec<String>)> {
        let io_err = |e: std::io::Error| Error::Io {
            index: index.to_string(),
            message: e.to_string(),
        };
        let writer = match self.writer(index) {
            Ok(writer) => writer,
            Err(e) => return Err((e, lines)),
        };
        for (i, line) in lines.iter().enumerate() {
            if let Err(e) = writeln!(writer, "{}", line) {
                return Err((io_err(e), lines[i..].to_vec()));
            }
        }
        writer.flush().map_err(|e| (io_err(e), Vec::new()))
    }
}

impl Sink for JsonlSink {
    fn put(
        &mut self,
        index: &str,
        doc_type: &str,
        id: &str,
        body: &Value,
        create_index: bool,
    ) -> Result<(), Error> {
        if self.finalized {
            return Err(Error::Finalized);
        }
        if !create_index && !self.index_exists(index) {
            return Err(Error::NoSuchIndex(index.to_string()));
        }
        let line = serde_json::to_string(&json!({"_id": id, "_type": doc_type, "_source": body}))
            .map_err(|source| Error::Serialize {
                id: id.to_string(),
                source,
            })?;
        self.pending.entry(index.to_string()).or_default().push(line);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        let mut pending = std::mem::take(&mut self.pending).into_iter();
        while let Some((index, lines)) = pending.next() {
            if let Err((e, unwritten)) = self.write_lines(&index, lines) {
                // Keep what was not written for a later flush.
                if !unwritten.is_empty() {
                    self.pending.insert(index, unwritten);
                }
                self.pending.extend(pending);
                return Err(e);
            }
        }
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), Error> {
        if self.finalized {
            return Ok(());
        }
        self.flush()?;
        for (index, writer) in self.writers.drain() {
            writer.finish().map_err(|e| Error::Io {
                index,
                message: e.to_string(),
            })?;
        }
        self.finalized = true;
        Ok(())
    }
}

/// Sink keeping documents in memory, later writes of an id replace earlier ones.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MemorySink {
    pub docs: IndexMap<(String, String), Value>,
    pending: Vec<(String, String, Value)>,
    /// Documents with these ids are rejected on flush.
    pub reject_ids: std::collections::HashSet<String>,
    pub flushes: usize,
    pub finalized: bool,
}

#[cfg(test)]
impl Sink for MemorySink {
    fn put(
        &mut self,
        index: &str,
        _doc_type: &str,
        id: &str,
        body: &Value,
        create_index: bool,
    ) -> Result<(), Error> {
        if self.finalized {
            return Err(Error::Finalized);
        }
        let exists = self.docs.keys().any(|(i, _)| i == index)
            || self.pending.iter().any(|(i, _, _)| i == index);
        if !create_index && !exists {
            return Err(Error::NoSuchIndex(index.to_string()));
        }
        self.pending
            .push((index.to_string(), id.to_string(), body.clone()));
        Ok(())
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.flushes += 1;
        let mut rejected = None;
        for (index, id, body) in std::mem::take(&mut self.pending) {
            if self.reject_ids.contains(&id) {
                rejected = Some(id);
                continue;
            }
            self.docs.insert((index, id), body);
        }
        match rejected {
            Some(id) => Err(Error::Rejected(id)),
            None => Ok(()),
        }
    }

    fn finalize(&mut self) -> Result<(), Error> {
        self.flush()?;
        self.finalized = true;
        Ok(())
    }
}
