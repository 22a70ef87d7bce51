//! Plain-text sidecar describing a finished table.
//!
//! Written next to the final data file as `<final>.config`, one KEY=VALUE
//! per line. Lookup reads it back to rediscover the bucket geometry, so a
//! missing or malformed sidecar is fatal there. Unknown keys are ignored
//! for forward compatibility.

use std::fs;
use std::path::{Path, PathBuf};

use clap::ValueEnum;

use crate::error::VaultError;
use crate::generate::Approach;
use crate::geometry::Geometry;

/// Geometry as persisted beside the final file.
///
/// `bucket_size` is the record count of a final-file bucket, i.e. the
/// per-round capacity times the round count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sidecar {
    pub approach: Approach,
    pub k: u32,
    pub num_buckets: u64,
    pub bucket_size: u64,
    pub prefix_size: usize,
    pub nonce_size: usize,
}

impl Sidecar {
    pub fn for_table(geo: &Geometry, approach: Approach) -> Self {
        Sidecar {
            approach,
            k: geo.k,
            num_buckets: geo.num_buckets,
            bucket_size: geo.bucket_capacity * geo.rounds,
            prefix_size: geo.prefix_size,
            nonce_size: geo.nonce_size,
        }
    }

    /// Bytes of one final-file bucket.
    pub fn bucket_bytes(&self) -> u64 {
        self.bucket_size * self.nonce_size as u64
    }

    /// Total bytes the final file must have.
    pub fn file_bytes(&self) -> u64 {
        self.num_buckets * self.bucket_bytes()
    }

    pub fn write(&self, path: &Path) -> Result<(), VaultError> {
        let text = format!(
            "APPROACH={}\nK={}\nNUM_BUCKETS={}\nBUCKET_SIZE={}\nPREFIX_SIZE={}\nNONCE_SIZE={}\n",
            self.approach.as_str(),
            self.k,
            self.num_buckets,
            self.bucket_size,
            self.prefix_size,
            self.nonce_size,
        );
        fs::write(path, text)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, VaultError> {
        let text = fs::read_to_string(path)
            .map_err(|e| VaultError::Sidecar(format!("{}: {e}", path.display())))?;

        let mut approach = None;
        let mut k = None;
        let mut num_buckets = None;
        let mut bucket_size = None;
        let mut prefix_size = None;
        let mut nonce_size = None;

        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(VaultError::Sidecar(format!(
                    "{}: malformed line {line:?}",
                    path.display()
                )));
            };
            match key {
                "APPROACH" => {
                    approach = Some(Approach::from_str(value, true).map_err(|_| {
                        VaultError::Sidecar(format!("{}: unknown approach {value:?}", path.display()))
                    })?);
                }
                "K" => k = Some(parse(path, key, value)? as u32),
                "NUM_BUCKETS" => num_buckets = Some(parse(path, key, value)?),
                "BUCKET_SIZE" => bucket_size = Some(parse(path, key, value)?),
                "PREFIX_SIZE" => prefix_size = Some(parse(path, key, value)? as usize),
                "NONCE_SIZE" => nonce_size = Some(parse(path, key, value)? as usize),
                _ => {}
            }
        }

        let missing = |field: &str| {
            VaultError::Sidecar(format!("{}: missing {field}", path.display()))
        };
        Ok(Sidecar {
            approach: approach.ok_or_else(|| missing("APPROACH"))?,
            k: k.ok_or_else(|| missing("K"))?,
            num_buckets: num_buckets.ok_or_else(|| missing("NUM_BUCKETS"))?,
            bucket_size: bucket_size.ok_or_else(|| missing("BUCKET_SIZE"))?,
            prefix_size: prefix_size.ok_or_else(|| missing("PREFIX_SIZE"))?,
            nonce_size: nonce_size.ok_or_else(|| missing("NONCE_SIZE"))?,
        })
    }
}

fn parse(path: &Path, key: &str, value: &str) -> Result<u64, VaultError> {
    value.trim().parse().map_err(|_| {
        VaultError::Sidecar(format!("{}: bad {key} value {value:?}", path.display()))
    })
}

/// `<final>.config`, appended to the full file name.
pub fn sidecar_path(final_path: &Path) -> PathBuf {
    let mut name = final_path.as_os_str().to_os_string();
    name.push(".config");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Sidecar {
        Sidecar {
            approach: Approach::Task,
            k: 26,
            num_buckets: 1 << 24,
            bucket_size: 40,
            prefix_size: 3,
            nonce_size: 5,
        }
    }

    #[test]
    fn roundtrip_preserves_geometry() {
        let dir = tempfile::tempdir().unwrap();
        let path = sidecar_path(&dir.path().join("vault.dat"));
        assert!(path.to_string_lossy().ends_with("vault.dat.config"));

        sample().write(&path).unwrap();
        assert_eq!(Sidecar::read(&path).unwrap(), sample());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.dat.config");
        sample().write(&path).unwrap();

        let mut text = fs::read_to_string(&path).unwrap();
        text.push_str("SHINY_NEW_KEY=whatever\n");
        fs::write(&path, text).unwrap();
        assert_eq!(Sidecar::read(&path).unwrap(), sample());
    }

    #[test]
    fn missing_field_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vault.dat.config");
        fs::write(&path, "K=26\nNUM_BUCKETS=16\n").unwrap();
        assert!(matches!(
            Sidecar::read(&path),
            Err(VaultError::Sidecar(_))
        ));
    }

    #[test]
    fn absent_file_is_fatal() {
        assert!(matches!(
            Sidecar::read(Path::new("/nonexistent/vault.config")),
            Err(VaultError::Sidecar(_))
        ));
    }

    #[test]
    fn derived_sizes_match_final_layout() {
        let geo = Geometry {
            k: 11,
            num_buckets: 256,
            bucket_capacity: 2,
            rounds: 4,
            prefix_size: 1,
            nonce_size: 8,
        };
        let sc = Sidecar::for_table(&geo, Approach::For);
        assert_eq!(sc.bucket_size, 8);
        assert_eq!(sc.bucket_bytes(), geo.final_bucket_bytes());
        assert_eq!(sc.file_bytes(), geo.file_bytes());
    }
}
