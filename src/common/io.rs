//! Common, IO-related code.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Write},
    path::Path,
};

use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

fn is_gz<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz"))
}

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead + Send>, anyhow::Error>
where
    P: AsRef<Path>,
{
    let file = File::open(path.as_ref())
        .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path.as_ref(), e))?;
    if is_gz(&path) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let decoder = MultiGzDecoder::new(BufReader::new(file));
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Writer to a plain or gzip-compressed file.
pub enum MaybeGzWriter {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl Write for MaybeGzWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            MaybeGzWriter::Plain(writer) => writer.write(buf),
            MaybeGzWriter::Gz(writer) => writer.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            MaybeGzWriter::Plain(writer) => writer.flush(),
            MaybeGzWriter::Gz(writer) => writer.flush(),
        }
    }
}

impl MaybeGzWriter {
    /// Write the gzip trailer, if any, and flush.
    ///
    /// Dropping the writer does the same but swallows errors.
    pub fn finish(self) -> std::io::Result<()> {
        match self {
            MaybeGzWriter::Plain(mut writer) => writer.flush(),
            MaybeGzWriter::Gz(writer) => {
                let mut inner = writer.finish()?;
                inner.flush()
            }
        }
    }
}

/// Transparently open a file with gzip encoder, truncating it.
pub fn open_write_maybe_gz<P>(path: P) -> Result<MaybeGzWriter, anyhow::Error>
where
    P: AsRef<Path>,
{
    open_maybe_gz(path, false)
}

/// Transparently open a file with gzip encoder, appending to it.
///
/// Appending to a gzip file adds a new gzip member, which [`open_read_maybe_gz`] reads
/// transparently.
pub fn open_append_maybe_gz<P>(path: P) -> Result<MaybeGzWriter, anyhow::Error>
where
    P: AsRef<Path>,
{
    open_maybe_gz(path, true)
}

fn open_maybe_gz<P>(path: P, append: bool) -> Result<MaybeGzWriter, anyhow::Error>
where
    P: AsRef<Path>,
{
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path.as_ref())
        .map_err(|e| anyhow::anyhow!("could not open {:?} for writing: {}", path.as_ref(), e))?;
    if is_gz(&path) {
        tracing::trace!("Opening {:?} as gzip for writing", path.as_ref());
        Ok(MaybeGzWriter::Gz(GzEncoder::new(
            BufWriter::new(file),
            Compression::default(),
        )))
    } else {
        tracing::trace!("Opening {:?} as plain text for writing", path.as_ref());
        Ok(MaybeGzWriter::Plain(BufWriter::new(file)))
    }
}
