//! Unreachable-index files.
//!
//! ```text
//! offset 0   "UNREACHS"            8-byte ASCII magic
//! offset 8   u64 (native endian)   first unreachable index
//! offset 16  u64                   second unreachable index
//! ...                              ascending, no count, ends at EOF
//! ```

use crate::bitfield::BitField;
use crate::error::Result;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

/// File magic.
pub const UNREACHABLE_MAGIC: &[u8; 8] = b"UNREACHS";

/// Write every unset index in `[0, max]` to `path`. Returns the number written.
///
/// A negative `max` (nothing computed yet) writes just the magic.
pub fn write_unreachable<P: AsRef<Path>>(bits: &BitField, max: i64, path: P) -> Result<u64> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    out.write_all(UNREACHABLE_MAGIC)?;

    let mut written = 0u64;
    if max >= 0 {
        for i in bits.unset_indices(0, max as u64) {
            out.write_all(&i.to_ne_bytes())?;
            written += 1;
        }
    }
    out.flush()?;

    info!(path = %path.display(), count = written, "unreachable indices written");
    Ok(written)
}

/// Read an unreachable-index file back.
///
/// Fails with `InvalidData` on a wrong magic or a truncated trailing record.
pub fn read_unreachable<P: AsRef<Path>>(path: P) -> Result<Vec<u64>> {
    let mut input = BufReader::new(File::open(path)?);

    let mut magic = [0u8; 8];
    input.read_exact(&mut magic).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => io::Error::new(io::ErrorKind::InvalidData, "missing UNREACHS header"),
        _ => e,
    })?;
    if &magic != UNREACHABLE_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "bad magic, expected UNREACHS").into());
    }

    let mut rest = Vec::new();
    input.read_to_end(&mut rest)?;
    let records = rest.chunks_exact(8);
    if !records.remainder().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("trailing partial record of {} bytes", records.remainder().len()),
        )
        .into());
    }
    Ok(records
        .map(|r| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(r);
            u64::from_ne_bytes(bytes)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tempfile::tempdir;

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unreachable.bin");

        let mut bits = BitField::try_new(256).unwrap();
        for i in (1..256).filter(|i| i % 5 != 0) {
            bits.set(i);
        }

        let n = write_unreachable(&bits, 199, &path).unwrap();
        let back = read_unreachable(&path).unwrap();
        let expected: Vec<u64> = (0..200).filter(|i| i % 5 == 0).collect();
        assert_eq!(n, expected.len() as u64);
        assert_eq!(back, expected);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), 8 + 8 * n);
    }

    #[test]
    fn test_nothing_computed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let bits = BitField::try_new(64).unwrap();
        assert_eq!(write_unreachable(&bits, -1, &path).unwrap(), 0);
        assert!(read_unreachable(&path).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_bad_files() {
        let dir = tempdir().unwrap();

        let bad_magic = dir.path().join("bad_magic.bin");
        std::fs::write(&bad_magic, b"NOTMAGIC").unwrap();
        assert_eq!(read_unreachable(&bad_magic).unwrap_err().kind(), ErrorKind::Io);

        let partial = dir.path().join("partial.bin");
        let mut data = UNREACHABLE_MAGIC.to_vec();
        data.extend_from_slice(&7u64.to_ne_bytes());
        data.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&partial, data).unwrap();
        assert_eq!(read_unreachable(&partial).unwrap_err().kind(), ErrorKind::Io);
    }

    #[test]
    fn test_unwritable_destination() {
        let bits = BitField::try_new(64).unwrap();
        let err = write_unreachable(&bits, 10, "/nonexistent-dir/out.bin").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
