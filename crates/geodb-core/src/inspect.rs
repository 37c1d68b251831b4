use std::io::Read;
use std::path::Path;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::digest::Output;
use sha2::{Digest, Sha256};

use crate::error::UpdateError;

/// Content hash shared by the published version token and the local check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    /// Length of a hex-encoded token produced by this algorithm.
    #[must_use]
    pub fn token_len(self) -> usize {
        match self {
            Self::Md5 => <Md5 as Digest>::output_size() * 2,
            Self::Sha256 => <Sha256 as Digest>::output_size() * 2,
        }
    }

    /// Hash the full contents of `path` as lowercase hex.
    ///
    /// # Errors
    /// Returns `Unreadable` if the file cannot be opened or read.
    pub fn hash_file(self, path: &Path) -> Result<String, UpdateError> {
        match self {
            Self::Md5 => Ok(format!("{:x}", digest_file::<Md5>(path)?)),
            Self::Sha256 => Ok(format!("{:x}", digest_file::<Sha256>(path)?)),
        }
    }

    /// Run [`Self::hash_file`] on the blocking pool.
    pub(crate) async fn hash_file_async(self, path: &Path) -> Result<String, UpdateError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || self.hash_file(&owned))
            .await
            .map_err(|error| UpdateError::unreadable(path, std::io::Error::other(error)))?
    }
}

fn digest_file<D: Digest>(path: &Path) -> Result<Output<D>, UpdateError> {
    let mut file =
        std::fs::File::open(path).map_err(|error| UpdateError::unreadable(path, error))?;
    let mut hasher = D::new();
    let mut buffer = [0_u8; 8192];

    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|error| UpdateError::unreadable(path, error))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(hasher.finalize())
}
