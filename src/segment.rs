//! Ordered discovery of the segment files of one recording

use log::debug;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// One input container holding a contiguous slice of the recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub path: PathBuf,
    /// Numeric token parsed from the file name, 0 when absent
    pub sequence_index: u64,
}

impl Segment {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let sequence_index = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(sequence_token)
            .unwrap_or(0);
        Self {
            path,
            sequence_index,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Value of the first run of decimal digits in `name`.
///
/// A name without digits, or with a run too long for a `u64`, gets 0 and
/// sorts with the unnumbered files ahead of every numbered segment.
pub fn sequence_token(name: &str) -> u64 {
    let digits: String = name
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().unwrap_or(0)
}

/// Sort segments numerically by their sequence token.
///
/// The sort is stable and ties fall back to the file name, so the result does
/// not depend on directory iteration order.
pub fn order_segments(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by(|a, b| {
        a.sequence_index
            .cmp(&b.sequence_index)
            .then_with(|| a.path.file_name().cmp(&b.path.file_name()))
    });
    segments
}

/// List the regular files of `directory` as ordered segments.
///
/// `extensions` filters by (case-insensitive) file extension; an empty slice
/// accepts every file. An empty result is a valid answer, not an error.
pub fn list_segments(directory: &Path, extensions: &[String]) -> Result<Vec<Segment>> {
    let mut segments = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if !extensions.is_empty() && !has_extension(&path, extensions) {
            debug!("Skipping {} (extension filter)", path.display());
            continue;
        }
        segments.push(Segment::new(path));
    }
    Ok(order_segments(segments))
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(segments: &[Segment]) -> Vec<String> {
        segments.iter().map(Segment::file_name).collect()
    }

    #[test]
    fn test_sequence_token() {
        assert_eq!(sequence_token("10.seg"), 10);
        assert_eq!(sequence_token("rec_007_part3.ts"), 7);
        assert_eq!(sequence_token("intro.ts"), 0);
        assert_eq!(sequence_token("99999999999999999999999.ts"), 0);
    }

    #[test]
    fn test_overflowing_token_sorts_first() {
        let ordered = order_segments(vec![
            Segment::new(PathBuf::from("2.ts")),
            Segment::new(PathBuf::from("99999999999999999999999.ts")),
            Segment::new(PathBuf::from("1.ts")),
        ]);
        assert_eq!(names(&ordered), ["99999999999999999999999.ts", "1.ts", "2.ts"]);
    }

    #[test]
    fn test_numeric_not_lexicographic_order() {
        let ordered = order_segments(vec![
            Segment::new("2.seg"),
            Segment::new("10.seg"),
            Segment::new("1.seg"),
        ]);
        assert_eq!(names(&ordered), vec!["1.seg", "2.seg", "10.seg"]);
    }

    #[test]
    fn test_list_segments_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["part10.wav", "part2.wav", "cover.wav", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("5")).unwrap();

        let all = list_segments(dir.path(), &[]).unwrap();
        assert_eq!(names(&all), vec!["cover.wav", "notes.txt", "part2.wav", "part10.wav"]);

        let wav = list_segments(dir.path(), &[".WAV".to_string()]).unwrap();
        assert_eq!(names(&wav), vec!["cover.wav", "part2.wav", "part10.wav"]);
    }

    #[test]
    fn test_empty_directory_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_segments(dir.path(), &[]).unwrap().is_empty());
    }
}
