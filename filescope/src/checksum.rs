//! File checksums for preservation records.

use std::fmt::{self, Write as _};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha512};

use crate::report::Scrape;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl ChecksumAlgorithm {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(format!("Unsupported checksum algorithm '{s}'")),
        }
    }
}

fn digest_file<D: Digest>(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buffer = [0_u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    let digest = hasher.finalize();
    Ok(digest
        .iter()
        .fold(String::with_capacity(digest.len() * 2), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        }))
}

impl Scrape {
    /// Lowercase hex digest of the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or read.
    pub fn checksum(path: &Path, algorithm: ChecksumAlgorithm) -> io::Result<String> {
        match algorithm {
            ChecksumAlgorithm::Sha256 => digest_file::<Sha256>(path),
            ChecksumAlgorithm::Sha512 => digest_file::<Sha512>(path),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_known_digests() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        fs::write(&path, "abc").unwrap();
        assert_eq!(
            Scrape::checksum(&path, ChecksumAlgorithm::Sha256).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let sha512 = Scrape::checksum(&path, ChecksumAlgorithm::Sha512).unwrap();
        assert_eq!(sha512.len(), 128);
        assert!(sha512.starts_with("ddaf35a193617aba"));
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("SHA-256".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha256));
        assert_eq!("sha512".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha512));
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(Scrape::checksum(Path::new("/nonexistent/x"), ChecksumAlgorithm::Sha256).is_err());
    }
}
