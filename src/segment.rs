// Segment naming and listing for the RAM ring buffer.
// Grounded on `examples/original_source/pruletynvr/nvr.py`'s `sorted_segments`
// and the filename glob `buffer_*_*.ts` (spec.md §3).

use std::path::{Path, PathBuf};

/// One transport-stream file in a recorder's RAM directory.
///
/// Ordering is by filename, which is chronological since the segmenter emits
/// `strftime`-templated names.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Segment {
    pub path: PathBuf,
}

impl Segment {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }
}

/// Returns true if `name` matches `buffer_YYYYMMDD_HHMMSS.ts`.
fn is_segment_name(name: &str) -> bool {
    let Some(rest) = name.strip_prefix("buffer_") else {
        return false;
    };
    let Some(rest) = rest.strip_suffix(".ts") else {
        return false;
    };
    let Some((date, time)) = rest.split_once('_') else {
        return false;
    };
    date.len() == 8
        && time.len() == 6
        && date.bytes().all(|b| b.is_ascii_digit())
        && time.bytes().all(|b| b.is_ascii_digit())
}

/// Lists the segments currently present in `dir`, sorted chronologically.
/// A missing directory is treated as empty rather than an error: the
/// segmenter may not have created it yet.
pub fn list_sorted(dir: &Path) -> std::io::Result<Vec<Segment>> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if is_segment_name(name) {
            segments.push(Segment { path: entry.path() });
        }
    }
    segments.sort();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_segment_names() {
        assert!(is_segment_name("buffer_20260801_120000.ts"));
        assert!(!is_segment_name("buffer_20260801.ts"));
        assert!(!is_segment_name("buffer_20260801_120000.mp4"));
        assert!(!is_segment_name("other_20260801_120000.ts"));
    }

    #[test]
    fn list_sorted_orders_chronologically_and_ignores_others() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "buffer_20260801_120010.ts",
            "buffer_20260801_120000.ts",
            "buffer_20260801_120005.ts",
            "stray.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let segments = list_sorted(dir.path()).unwrap();
        let names: Vec<_> = segments.iter().map(Segment::file_name).collect();
        assert_eq!(
            names,
            [
                "buffer_20260801_120000.ts",
                "buffer_20260801_120005.ts",
                "buffer_20260801_120010.ts",
            ]
        );
    }

    #[test]
    fn list_sorted_on_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(list_sorted(&missing).unwrap().is_empty());
    }
}
