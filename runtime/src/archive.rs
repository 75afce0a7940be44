//! Tar archive member lookup.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Component, Path};

/// Largest member `read_member` loads into memory. Only JSON documents
/// (manifests, configs) are read this way.
pub(crate) const MAX_MEMBER_SIZE: u64 = 64 * 1024 * 1024;

/// Read a member of a tar stream by its archive-relative path.
///
/// Returns `Ok(None)` when the archive is readable but has no such member;
/// every other failure is an `Err`, including a member whose header claims
/// more than `MAX_MEMBER_SIZE` bytes.
pub(crate) fn read_member<R: Read>(reader: R, member: &str) -> io::Result<Option<Vec<u8>>> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !is_member(&entry.path()?, member) {
            continue;
        }
        if entry.size() > MAX_MEMBER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} declares {} bytes, limit is {}",
                    member,
                    entry.size(),
                    MAX_MEMBER_SIZE
                ),
            ));
        }
        // the header size is untrusted, let the reader grow the buffer
        let mut contents = Vec::new();
        (&mut entry).take(MAX_MEMBER_SIZE).read_to_end(&mut contents)?;
        if contents.len() as u64 != entry.size() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} is truncated", member),
            ));
        }
        return Ok(Some(contents));
    }
    Ok(None)
}

/// Whether a tar stream holds `member`, judged from headers alone.
pub(crate) fn has_member<R: Read>(reader: R, member: &str) -> io::Result<bool> {
    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        if is_member(&entry?.path()?, member) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Rewind `reader` and check for `member`.
pub(crate) fn has_member_from_start<R: Read + Seek>(reader: &mut R, member: &str) -> io::Result<bool> {
    reader.seek(SeekFrom::Start(0))?;
    has_member(reader, member)
}

/// Rewind `reader` and look up `member`.
pub(crate) fn read_member_from_start<R: Read + Seek>(
    reader: &mut R,
    member: &str,
) -> io::Result<Option<Vec<u8>>> {
    reader.seek(SeekFrom::Start(0))?;
    read_member(reader, member)
}

/// Entry paths may carry a leading `./`.
fn is_member(path: &Path, member: &str) -> bool {
    let mut wanted = member.trim_start_matches("./").split('/');
    for component in path.components() {
        match component {
            Component::CurDir => continue,
            Component::Normal(name) => match wanted.next() {
                Some(expected) if name == expected => {}
                _ => return false,
            },
            _ => return false,
        }
    }
    wanted.next().is_none()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Cursor;

    /// Build an in-memory tar holding `(path, contents)` entries.
    pub(crate) fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, contents) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *contents).unwrap();
        }
        builder.into_inner().unwrap()
    }

    #[test]
    fn test_finds_top_level_member() {
        let tar = build_tar(&[("layer/layer.tar", b"x"), ("manifest.json", b"[]")]);
        let found = read_member(Cursor::new(tar), "manifest.json").unwrap();
        assert_eq!(found.as_deref(), Some(&b"[]"[..]));
    }

    #[test]
    fn test_dot_slash_prefix() {
        let tar = build_tar(&[("./oci-layout", b"{}")]);
        assert!(read_member(Cursor::new(tar), "oci-layout").unwrap().is_some());
    }

    #[test]
    fn test_nested_member_is_not_top_level() {
        let tar = build_tar(&[("nested/manifest.json", b"[]")]);
        assert!(read_member(Cursor::new(tar), "manifest.json").unwrap().is_none());
    }

    #[test]
    fn test_nested_member_by_path() {
        let tar = build_tar(&[("blobs/sha256/abc", b"cfg")]);
        let found = read_member(Cursor::new(tar), "blobs/sha256/abc").unwrap();
        assert_eq!(found.as_deref(), Some(&b"cfg"[..]));
    }

    #[test]
    fn test_rewinds_between_lookups() {
        let tar = build_tar(&[("manifest.json", b"[]"), ("oci-layout", b"{}")]);
        let mut cursor = Cursor::new(tar);
        assert!(read_member_from_start(&mut cursor, "oci-layout").unwrap().is_some());
        assert!(read_member_from_start(&mut cursor, "manifest.json").unwrap().is_some());
    }

    /// A tar whose `path` header claims `declared` bytes but carries `body`.
    pub(crate) fn lying_tar(path: &str, declared: u64, body: &[u8]) -> Vec<u8> {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(declared);
        header.set_mode(0o644);
        header.set_cksum();
        let mut tar = header.as_bytes().to_vec();
        tar.extend_from_slice(body);
        tar.resize(tar.len() + 512 - body.len() % 512, 0);
        tar.extend_from_slice(&[0u8; 1024]);
        tar
    }

    #[test]
    fn test_has_member_reads_headers_only() {
        let tar = lying_tar("manifest.json", 1 << 46, b"[]");
        assert!(has_member(Cursor::new(tar.clone()), "manifest.json").unwrap());

        let mut cursor = Cursor::new(tar);
        cursor.set_position(100);
        assert!(has_member_from_start(&mut cursor, "manifest.json").unwrap());
    }

    #[test]
    fn test_oversized_member_is_an_error() {
        let tar = lying_tar("manifest.json", 1 << 46, b"[]");
        let err = read_member(Cursor::new(tar), "manifest.json").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn test_truncated_member_is_an_error() {
        let mut tar = lying_tar("manifest.json", 4096, b"[]");
        tar.truncate(512 + 2);
        assert!(read_member(Cursor::new(tar), "manifest.json").is_err());
    }

    #[test]
    fn test_corrupt_archive_is_an_error() {
        let garbage = vec![0x41u8; 1024];
        assert!(read_member(Cursor::new(garbage), "manifest.json").is_err());
    }
}
