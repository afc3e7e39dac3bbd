use std::fs;
use std::io::Read;
use std::path::Path;

use log::debug;
use sha2::{Digest, Sha256};

use crate::error::UpdateError;

const READ_BUF: usize = 8192;

/// Digest family implied by the length of an advertised checksum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn detect(expected: &str) -> Option<Self> {
        let hex = expected.trim();
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        match hex.len() {
            32 => Some(ChecksumAlgorithm::Md5),
            64 => Some(ChecksumAlgorithm::Sha256),
            _ => None,
        }
    }
}

/// Hash `path` and compare it case-insensitively against `expected`.
///
/// A checksum of unrecognised shape never matches.
pub fn verify_checksum(path: &Path, expected: &str) -> Result<(), UpdateError> {
    let expected = expected.trim().to_ascii_lowercase();
    let Some(algorithm) = ChecksumAlgorithm::detect(&expected) else {
        return Err(UpdateError::ChecksumMismatch {
            expected,
            actual: "unsupported checksum format".into(),
        });
    };
    let actual = file_digest(path, algorithm)?;
    debug!("verify: {:?} of {} is {actual}", algorithm, path.display());
    if actual != expected {
        return Err(UpdateError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

/// Lowercase hex digest of the file at `path`.
pub fn file_digest(path: &Path, algorithm: ChecksumAlgorithm) -> Result<String, UpdateError> {
    let mut file = fs::File::open(path)
        .map_err(|e| UpdateError::DownloadIo(format!("checksum open error: {e}")))?;
    let mut buf = [0u8; READ_BUF];
    let mut sha = Sha256::new();
    let mut md5 = md5::Context::new();
    loop {
        let read = file
            .read(&mut buf)
            .map_err(|e| UpdateError::DownloadIo(format!("checksum read error: {e}")))?;
        if read == 0 {
            break;
        }
        match algorithm {
            ChecksumAlgorithm::Sha256 => sha.update(&buf[..read]),
            ChecksumAlgorithm::Md5 => md5.consume(&buf[..read]),
        }
    }
    Ok(match algorithm {
        ChecksumAlgorithm::Sha256 => format!("{:x}", sha.finalize()),
        ChecksumAlgorithm::Md5 => format!("{:x}", md5.compute()),
    })
}
