//! Sanity checks for reused media.

use crate::error::MediaError;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const QCOW2_MAGIC: [u8; 4] = [b'Q', b'F', b'I', 0xfb];
const BOOT_SIGNATURE_OFFSET: usize = 510;
/// BS_FilSysType in the FAT32 extended boot record.
const FAT32_TYPE_OFFSET: usize = 82;
const FAT32_TYPE: &[u8; 8] = b"FAT32   ";

pub fn validate_growable_disk(path: &Path) -> Result<(), MediaError> {
    let header = read_prefix(path, QCOW2_MAGIC.len())?;
    if header != QCOW2_MAGIC {
        return Err(MediaError::InvalidMedia(format!(
            "{} is not a qcow2 image",
            path.display()
        )));
    }
    Ok(())
}

pub fn validate_flat_image(path: &Path, expected_bytes: u64) -> Result<(), MediaError> {
    let size = std::fs::metadata(path)?.len();
    if size != expected_bytes {
        return Err(MediaError::InvalidMedia(format!(
            "{} is {} bytes, expected {}",
            path.display(),
            size,
            expected_bytes
        )));
    }

    let sector = read_prefix(path, 512)?;
    let signature = BOOT_SIGNATURE_OFFSET..BOOT_SIGNATURE_OFFSET + 2;
    if sector.len() < 512 || sector[signature] != [0x55, 0xAA] {
        return Err(MediaError::InvalidMedia(format!(
            "{} has no boot sector signature",
            path.display()
        )));
    }
    if &sector[FAT32_TYPE_OFFSET..FAT32_TYPE_OFFSET + FAT32_TYPE.len()] != FAT32_TYPE {
        return Err(MediaError::InvalidMedia(format!(
            "{} does not hold a FAT32 filesystem",
            path.display()
        )));
    }
    Ok(())
}

fn read_prefix(path: &Path, len: usize) -> Result<Vec<u8>, MediaError> {
    let mut buf = Vec::with_capacity(len);
    File::open(path)?.take(len as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn fat32_image(path: &Path, size: u64) {
        let mut sector = vec![0u8; 512];
        sector[FAT32_TYPE_OFFSET..FAT32_TYPE_OFFSET + 8].copy_from_slice(FAT32_TYPE);
        sector[510] = 0x55;
        sector[511] = 0xAA;
        fs::write(path, &sector).unwrap();
        File::options().write(true).open(path).unwrap().set_len(size).unwrap();
    }

    #[test]
    fn test_qcow2_magic() {
        let temp = TempDir::new().unwrap();
        let good = temp.path().join("disk.qcow2");
        let bad = temp.path().join("bad.qcow2");
        fs::write(&good, [b'Q', b'F', b'I', 0xfb, 0, 0, 0, 3]).unwrap();
        fs::write(&bad, b"not an image").unwrap();

        assert!(validate_growable_disk(&good).is_ok());
        assert!(matches!(validate_growable_disk(&bad), Err(MediaError::InvalidMedia(_))));
    }

    #[test]
    fn test_flat_image_checks() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("boot.img");
        fat32_image(&image, 4096);
        assert!(validate_flat_image(&image, 4096).is_ok());

        let err = validate_flat_image(&image, 8192).unwrap_err();
        assert!(err.to_string().contains("expected 8192"));

        let blank = temp.path().join("blank.img");
        fs::write(&blank, vec![0u8; 4096]).unwrap();
        assert!(validate_flat_image(&blank, 4096).is_err());
    }

    #[test]
    fn test_truncated_flat_image() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("boot.img");
        fs::write(&image, [0u8; 16]).unwrap();
        assert!(validate_flat_image(&image, 16).is_err());
    }
}
