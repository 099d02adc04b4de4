//! Mount table parsing.
//!
//! Reads the `/proc/self/mounts` format: `source target fstype options dump pass`,
//! with whitespace and backslashes in paths encoded as 3-digit octal escapes.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStringExt;
use std::path::{Path, PathBuf};

/// Mount table of the current mount namespace.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub source: String,
    pub target: PathBuf,
    pub fstype: String,
}

/// Parse mount table contents. Malformed lines are skipped.
pub fn parse(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next()?;
            Some(MountEntry {
                source: source.to_string(),
                target: PathBuf::from(unescape(target)),
                fstype: fstype.to_string(),
            })
        })
        .collect()
}

/// Find the entry mounted at `path`. The last one wins, since later mounts
/// hide earlier ones on the same target.
pub fn find<'a>(entries: &'a [MountEntry], path: &Path) -> Option<&'a MountEntry> {
    entries.iter().rev().find(|entry| entry.target == path)
}

/// Look up `path` in the live mount table. An unreadable table counts as
/// "not mounted".
pub fn lookup(path: &Path) -> Option<MountEntry> {
    let contents = fs::read_to_string(PROC_MOUNTS).ok()?;
    let entries = parse(&contents);
    find(&entries, &canonical_target(path)).cloned()
}

/// The table lists resolved paths, so `..` and symlinks in an existing
/// `path` are resolved first. A missing path is returned unchanged.
fn canonical_target(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

fn unescape(field: &str) -> OsString {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && is_octal_escape(&bytes[i + 1..i + 4]) {
            let value = bytes[i + 1..i + 4]
                .iter()
                .fold(0u16, |acc, digit| acc * 8 + u16::from(digit - b'0'));
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    OsString::from_vec(out)
}

fn is_octal_escape(digits: &[u8]) -> bool {
    digits.len() == 3 && digits.iter().all(|d| (b'0'..=b'7').contains(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
proc /proc proc rw,nosuid,nodev,noexec,relatime 0 0
hugetlbfs /dev/hugepages hugetlbfs rw,relatime,pagesize=2M 0 0
nodev /mnt/huge hugetlbfs rw,relatime,pagesize=2M 0 0
/dev/sdb1 /media/usb\\040stick vfat rw 0 0
";

    #[test]
    fn test_parse_entries() {
        let entries = parse(SAMPLE);
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[3].source, "nodev");
        assert_eq!(entries[3].target, PathBuf::from("/mnt/huge"));
        assert_eq!(entries[3].fstype, "hugetlbfs");
    }

    #[test]
    fn test_octal_escapes_decoded() {
        let entries = parse(SAMPLE);
        assert_eq!(entries[4].target, PathBuf::from("/media/usb stick"));
    }

    #[test]
    fn test_find_ignores_trailing_slash() {
        let entries = parse(SAMPLE);
        let entry = find(&entries, Path::new("/mnt/huge/")).unwrap();
        assert_eq!(entry.fstype, "hugetlbfs");
        assert!(find(&entries, Path::new("/mnt")).is_none());
        assert!(find(&entries, Path::new("/mnt/huge/sub")).is_none());
    }

    #[test]
    fn test_find_prefers_latest_mount() {
        let entries = parse("tmpfs /mnt/huge tmpfs rw 0 0\nnodev /mnt/huge hugetlbfs rw 0 0\n");
        assert_eq!(find(&entries, Path::new("/mnt/huge")).unwrap().fstype, "hugetlbfs");
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let entries = parse("garbage\n\nnodev /mnt/huge hugetlbfs rw 0 0\n");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_backslash_without_escape_kept() {
        assert_eq!(unescape("/a\\b"), OsString::from("/a\\b"));
        assert_eq!(unescape("/a\\134b"), OsString::from("/a\\b"));
    }

    #[test]
    fn test_out_of_range_escape_kept_literally() {
        assert_eq!(unescape("/a\\777"), OsString::from("/a\\777"));
        assert_eq!(unescape("/a\\377"), OsString::from_vec(vec![b'/', b'a', 0xff]));
    }

    #[test]
    fn test_canonical_target_resolves_dot_dot() {
        let dir = tempfile::tempdir().unwrap();
        let huge = dir.path().join("huge");
        fs::create_dir(&huge).unwrap();

        let indirect = dir.path().join("huge").join("..").join("huge");
        assert_eq!(canonical_target(&indirect), fs::canonicalize(&huge).unwrap());

        let missing = Path::new("/nonexistent/../mnt/huge");
        assert_eq!(canonical_target(missing), missing);
    }

    #[test]
    fn test_lookup_matches_non_normalized_path() {
        let entry = lookup(Path::new("/proc/sys/..")).unwrap();
        assert_eq!(entry.target, PathBuf::from("/proc"));
        assert_eq!(entry.fstype, "proc");
    }
}
