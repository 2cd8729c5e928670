//! Normalized, slash-separated relative path.
//!
//! A `Path` is an ordered sequence of non-empty name segments. The root is
//! the empty sequence. Paths are always relative to the engine's remote
//! root and to the local cache root -- there is no notion of an absolute
//! path anywhere in this crate.

use std::fmt;
use std::path::PathBuf;

/// A normalized relative path: a sequence of non-empty segments, none of
/// which is `.` or `..`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Vec<String>,
}

impl Path {
    /// The root path (empty segment sequence).
    pub fn root() -> Self {
        Path { segments: Vec::new() }
    }

    /// Parses a path from a string, trimming leading separators and
    /// splitting on `/`. Empty segments (from doubled slashes) and the
    /// `.`/`..` segments are dropped rather than rejected outright, since
    /// callers here are either trusted (CLI args) or already-decoded href
    /// fragments that should never legitimately contain them.
    pub fn parse(s: &str) -> Self {
        let trimmed = s.trim_start_matches('/');
        let segments = trimmed
            .split('/')
            .filter(|s| !s.is_empty() && *s != "." && *s != "..")
            .map(|s| s.to_string())
            .collect();
        Path { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns a new path with `segment` appended.
    pub fn join(&self, segment: &str) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.to_string());
        Path { segments }
    }

    /// The last segment, i.e. the name a user would see in a listing. The
    /// root has no name.
    pub fn name(&self) -> Option<&str> {
        self.segments.last().map(|s| s.as_str())
    }

    /// The parent path. The parent of the root is the root.
    pub fn parent(&self) -> Self {
        if self.segments.is_empty() {
            return Path::root();
        }
        Path { segments: self.segments[..self.segments.len() - 1].to_vec() }
    }

    /// Renders the path as an OS-native relative `PathBuf`, suitable for
    /// joining onto the local cache root.
    pub fn to_path_buf(&self) -> PathBuf {
        let mut p = PathBuf::new();
        for seg in &self.segments {
            p.push(seg);
        }
        p
    }

    /// Renders the path as a `/`-joined string suitable for appending to
    /// the remote root URL.
    pub fn to_url_suffix(&self) -> String {
        self.segments.join("/")
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join("/"))
    }
}
