use std::io::Read;
use std::path::Path;

use sha1::{Digest, Sha1};

use crate::InventoryError;

/// Computes SHA-1 of `data` and returns the lowercase hex digest.
pub fn sha1_bytes(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Computes SHA-1 of an entire file and returns the lowercase hex digest
/// (40 chars). Always reads the whole file; there is no incremental mode.
pub fn sha1_file(path: &Path) -> Result<String, InventoryError> {
    if !path.is_file() {
        return Err(InventoryError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha1::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
