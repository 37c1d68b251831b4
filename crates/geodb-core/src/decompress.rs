use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::UpdateError;

const BUFFER_SIZE: usize = 64 * 1024;

/// Encoding of the downloaded artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    None,
}

impl Compression {
    #[must_use]
    pub fn decompressor(self) -> Arc<dyn Decompressor> {
        match self {
            Self::Gzip => Arc::new(GzipDecompressor),
            Self::None => Arc::new(Passthrough),
        }
    }
}

/// Streaming transform from a staged artifact into its expanded form.
///
/// Implementations do blocking file I/O and are driven from the blocking
/// pool by [`expand_async`].
pub trait Decompressor: Send + Sync {
    /// Expand `src` into `dest`, truncating `dest` first. Returns the number
    /// of bytes written once `dest` is flushed and synced.
    ///
    /// # Errors
    /// `SourceUnreadable` when `src` cannot be opened or read,
    /// `DestUnwritable` when `dest` cannot be created, written or flushed, and
    /// `CorruptStream` when the transform rejects the input.
    fn expand(&self, src: &Path, dest: &Path) -> Result<u64, UpdateError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GzipDecompressor;

impl Decompressor for GzipDecompressor {
    fn expand(&self, src: &Path, dest: &Path) -> Result<u64, UpdateError> {
        let source = File::open(src).map_err(|error| UpdateError::source_unreadable(src, error))?;
        let mut writer = create_dest(dest)?;
        let mut decoder = MultiGzDecoder::new(TrackedReader::new(source));

        let written = match pump(&mut decoder, &mut writer) {
            Ok(written) => written,
            Err(PumpError::Read(error)) if decoder.get_ref().failed => {
                return Err(UpdateError::source_unreadable(src, error));
            }
            Err(PumpError::Read(error)) => return Err(UpdateError::corrupt_stream(src, error)),
            Err(PumpError::Write(error)) => return Err(UpdateError::dest_unwritable(dest, error)),
        };

        finish(writer, dest)?;
        debug!(
            "Expanded {} into {} ({written} bytes)",
            src.display(),
            dest.display()
        );
        Ok(written)
    }
}

/// Copies the artifact unchanged, for sources that publish it uncompressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Decompressor for Passthrough {
    fn expand(&self, src: &Path, dest: &Path) -> Result<u64, UpdateError> {
        let mut source =
            File::open(src).map_err(|error| UpdateError::source_unreadable(src, error))?;
        let mut writer = create_dest(dest)?;

        let written = pump(&mut source, &mut writer).map_err(|error| match error {
            PumpError::Read(error) => UpdateError::source_unreadable(src, error),
            PumpError::Write(error) => UpdateError::dest_unwritable(dest, error),
        })?;

        finish(writer, dest)?;
        Ok(written)
    }
}

pub(crate) async fn expand_async(
    decompressor: Arc<dyn Decompressor>,
    src: &Path,
    dest: &Path,
) -> Result<u64, UpdateError> {
    let (owned_src, owned_dest) = (src.to_path_buf(), dest.to_path_buf());
    tokio::task::spawn_blocking(move || decompressor.expand(&owned_src, &owned_dest))
        .await
        .map_err(|error| UpdateError::dest_unwritable(dest, std::io::Error::other(error)))?
}

enum PumpError {
    Read(std::io::Error),
    Write(std::io::Error),
}

fn pump<R: Read>(reader: &mut R, writer: &mut BufWriter<File>) -> Result<u64, PumpError> {
    let mut buffer = vec![0_u8; BUFFER_SIZE];
    let mut written: u64 = 0;

    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(error) if error.kind() == ErrorKind::Interrupted => continue,
            Err(error) => return Err(PumpError::Read(error)),
        };
        writer
            .write_all(&buffer[..read])
            .map_err(PumpError::Write)?;
        written += read as u64;
    }

    Ok(written)
}

fn create_dest(dest: &Path) -> Result<BufWriter<File>, UpdateError> {
    File::create(dest)
        .map(|file| BufWriter::with_capacity(BUFFER_SIZE, file))
        .map_err(|error| UpdateError::dest_unwritable(dest, error))
}

// Data must be on disk before the caller hashes or renames the file.
fn finish(writer: BufWriter<File>, dest: &Path) -> Result<(), UpdateError> {
    let file = writer
        .into_inner()
        .map_err(|error| UpdateError::dest_unwritable(dest, error.into_error()))?;
    file.sync_all()
        .map_err(|error| UpdateError::dest_unwritable(dest, error))
}

/// Remembers whether the underlying file failed, so decoder errors can be
/// told apart from read errors.
struct TrackedReader<R> {
    inner: R,
    failed: bool,
}

impl<R> TrackedReader<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            failed: false,
        }
    }
}

impl<R: Read> Read for TrackedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf).inspect_err(|error| {
            if error.kind() != ErrorKind::Interrupted {
                self.failed = true;
            }
        })
    }
}
