//! On-disk reverse index: given a hash and a type name, lists the content
//! hashes of objects of that type that declared a reference to it at write
//! time. Used both for `reverseLookup` itself and, as a special case, to
//! let the Access Engine find every `AccessGrant` targeting a given hash
//! without scanning the whole store.

use chum_types::{Error, Hash, Result};
use std::path::{Path, PathBuf};
use tokio::fs;

pub struct ReverseIndex {
    dir: PathBuf,
}

impl ReverseIndex {
    pub fn new(base_dir: &Path) -> Self {
        ReverseIndex {
            dir: base_dir.join("reverse"),
        }
    }

    pub async fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        Ok(())
    }

    fn bucket_path(&self, referenced: Hash, type_name: &str) -> PathBuf {
        self.dir.join(format!("{}__{}.json", referenced.to_hex(), type_name))
    }

    /// Registers that `referencing` (an object of `type_name`) references
    /// `referenced`. Idempotent: adding the same pair twice is a no-op.
    pub async fn add(&self, referenced: Hash, type_name: &str, referencing: Hash) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.bucket_path(referenced, type_name);
        let mut entries = read_bucket(&path).await?;
        if !entries.contains(&referencing) {
            entries.push(referencing);
            let bytes = serde_json::to_vec(&entries)?;
            fs::write(&path, bytes).await?;
        }
        Ok(())
    }

    pub async fn lookup(&self, referenced: Hash, type_name: &str) -> Result<Vec<Hash>> {
        read_bucket(&self.bucket_path(referenced, type_name)).await
    }
}

async fn read_bucket(path: &Path) -> Result<Vec<Hash>> {
    match fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::Io(e)),
    }
}
