//! The source manager owns every source buffer used within a single
//! compilation, mapping `(file, line, column)` positions to byte offsets
//! and back. Buffers are immutable after registration; re-registering the
//! same canonical path replaces the slot wholesale.

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, HashMap};
use std::hash::{Hash, Hasher};

use log::debug;

use chime_pos::Position;

use crate::token::Token;

/// A single registered source buffer.
pub struct Source {
    pub file_id: u32,
    pub path: String,
    pub buffer: String,
    pub file_hash: u64,
    pub package_name: Option<String>,
    /// Byte offsets of line starts; entry 0 is always 0.
    line_starts: Vec<usize>,
    /// Comment tokens keyed by the byte offset they start at.
    pub offset_comments: BTreeMap<usize, Token>,
}

/// Length of the line terminator starting at `bytes[i]`, or 0.
/// Understands `\n`, `\r` and `\r\n`.
fn line_terminator_len(bytes: &[u8], i: usize) -> usize {
    match bytes.get(i) {
        Some(b'\n') => 1,
        Some(b'\r') => {
            if bytes.get(i + 1) == Some(&b'\n') {
                2
            } else {
                1
            }
        }
        _ => 0,
    }
}

impl Source {
    fn new(
        file_id: u32,
        path: String,
        buffer: String,
        file_hash: u64,
        package_name: Option<String>,
    ) -> Source {
        let mut line_starts = vec![0];
        let bytes = buffer.as_bytes();
        let mut i = 0;
        while i < bytes.len() {
            let term = line_terminator_len(bytes, i);
            if term > 0 {
                i += term;
                line_starts.push(i);
            } else {
                i += 1;
            }
        }
        Source {
            file_id,
            path,
            buffer,
            file_hash,
            package_name,
            line_starts,
            offset_comments: BTreeMap::new(),
        }
    }

    /// Map a position to a byte offset, clamping out-of-range positions to
    /// the buffer bounds.
    pub fn pos_to_offset(&self, pos: Position) -> usize {
        if pos.line as usize > self.line_starts.len() {
            return self.buffer.len();
        }
        if pos.line < 1 || pos.column < 1 {
            return 0;
        }
        let line_start = self.line_starts[pos.line as usize - 1];
        let bytes = self.buffer.as_bytes();
        let mut column_offset = 0;
        let wanted = pos.column as usize - 1;
        while line_terminator_len(bytes, line_start + column_offset) == 0
            && column_offset < wanted
            && line_start + column_offset < bytes.len()
        {
            column_offset += 1;
        }
        if column_offset < wanted && line_start + column_offset < bytes.len() {
            // there's a line terminator before `pos.column`
            column_offset += line_terminator_len(bytes, line_start + column_offset);
        }
        (line_start + column_offset).min(self.buffer.len())
    }

    /// Inverse of `pos_to_offset` for in-buffer offsets.
    pub fn offset_to_pos(&self, offset: usize) -> Position {
        let offset = offset.min(self.buffer.len());
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        Position {
            file_id: self.file_id,
            line: line_index as u32 + 1,
            column: (offset - self.line_starts[line_index]) as u32 + 1,
        }
    }

    /// The length of the line holding `pos`, in bytes, without terminator.
    pub fn line_len(&self, line: u32) -> usize {
        if line < 1 || line as usize > self.line_starts.len() {
            return 0;
        }
        let start = self.line_starts[line as usize - 1];
        let bytes = self.buffer.as_bytes();
        let mut i = start;
        while i < bytes.len() && line_terminator_len(bytes, i) == 0 {
            i += 1;
        }
        i - start
    }

    pub fn line_text(&self, line: u32) -> Option<&str> {
        if line < 1 || line as usize > self.line_starts.len() {
            return None;
        }
        let start = self.line_starts[line as usize - 1];
        Some(&self.buffer[start..start + self.line_len(line)])
    }

    pub fn count_lines(&self) -> usize {
        self.line_starts.len()
    }
}

fn hash_path(path: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    path.hash(&mut hasher);
    hasher.finish()
}

/// Lexically canonicalise a path: fold separators, drop `.` segments,
/// resolve `..` where possible. Registration must not require the file to
/// exist (in-memory buffers use pseudo paths).
pub fn normalize_path(path: &str) -> String {
    let mut out: Vec<&str> = vec![];
    let absolute = path.starts_with('/');
    for segment in path.split(|c| c == '/' || c == '\\') {
        match segment {
            "" | "." => {}
            ".." => {
                if out.last().map_or(true, |s| *s == "..") {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other),
        }
    }
    let joined = out.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// The registry of all sources of one compilation unit. File id 0 is
/// reserved and holds an empty synthesized buffer.
pub struct SourceManager {
    sources: Vec<Source>,
    path_to_file_id: HashMap<String, u32>,
}

impl Default for SourceManager {
    fn default() -> SourceManager {
        SourceManager::new()
    }
}

impl SourceManager {
    pub fn new() -> SourceManager {
        SourceManager {
            sources: vec![Source::new(0, String::new(), String::new(), 0, None)],
            path_to_file_id: HashMap::new(),
        }
    }

    /// Register a buffer under a path; a path seen before reuses its slot
    /// (replacing the buffer), so file ids stay stable across reparses.
    pub fn add_source(
        &mut self,
        path: &str,
        buffer: String,
        package_name: Option<String>,
    ) -> u32 {
        let normalized = normalize_path(path);
        let file_hash = hash_path(&normalized);
        if let Some(&file_id) = self.path_to_file_id.get(&normalized) {
            debug!("re-registering {} as file {}", normalized, file_id);
            self.sources[file_id as usize] =
                Source::new(file_id, normalized, buffer, file_hash, package_name);
            return file_id;
        }
        let file_id = self.sources.len() as u32;
        self.sources
            .push(Source::new(file_id, normalized.clone(), buffer, file_hash, package_name));
        self.path_to_file_id.insert(normalized, file_id);
        file_id
    }

    /// Like `add_source`, but concatenates onto an existing slot's buffer.
    pub fn append_source(&mut self, path: &str, buffer: &str) -> u32 {
        let normalized = normalize_path(path);
        if let Some(&file_id) = self.path_to_file_id.get(&normalized) {
            let old = &self.sources[file_id as usize];
            let new_buffer = format!("{}{}", old.buffer, buffer);
            let package_name = old.package_name.clone();
            self.sources[file_id as usize] = Source::new(
                file_id,
                normalized.clone(),
                new_buffer,
                hash_path(&normalized),
                package_name,
            );
            file_id
        } else {
            self.add_source(path, buffer.to_string(), None)
        }
    }

    pub fn source(&self, file_id: u32) -> Option<&Source> {
        self.sources.get(file_id as usize)
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn pos_to_offset(&self, pos: Position) -> usize {
        match self.source(pos.file_id) {
            Some(source) => source.pos_to_offset(pos),
            None => 0,
        }
    }

    /// The text between two positions; `fallback` substitutes for an empty
    /// buffer (imported generic bodies re-parsed from cache).
    pub fn content_between(
        &self,
        begin: Position,
        end: Position,
        fallback: Option<&str>,
    ) -> String {
        if begin.file_id == 0 || end < begin {
            return String::new();
        }
        let source = match self.source(begin.file_id) {
            Some(s) => s,
            None => return String::new(),
        };
        if source.buffer.is_empty() {
            if let Some(text) = fallback {
                let shadow = Source::new(
                    source.file_id,
                    source.path.clone(),
                    text.to_string(),
                    source.file_hash,
                    None,
                );
                let lo = shadow.pos_to_offset(begin);
                let hi = shadow.pos_to_offset(end);
                return shadow.buffer[lo..hi].to_string();
            }
            return String::new();
        }
        let lo = source.pos_to_offset(begin);
        let hi = source.pos_to_offset(end);
        source.buffer[lo..hi].to_string()
    }

    /// Column count of the line holding `pos`.
    pub fn line_end(&self, pos: Position) -> usize {
        match self.source(pos.file_id) {
            Some(source) => source.line_len(pos.line),
            None => 0,
        }
    }

    /// Store per-file comment tokens for later position queries.
    pub fn attach_comments(&mut self, comments: &HashMap<u32, Vec<Token>>) {
        for (&file_id, tokens) in comments {
            let source = &mut self.sources[file_id as usize];
            for token in tokens {
                let offset = source.pos_to_offset(token.begin);
                source.offset_comments.insert(offset, token.clone());
            }
        }
    }

    /// Whether the path behind a file id still exists on disk. Buffers
    /// registered from memory (no real path, macro expansion buffers with
    /// a source extension) always count as existing.
    pub fn is_source_file_exist(&self, file_id: u32) -> bool {
        if let Some(source) = self.source(file_id) {
            if !source.path.is_empty() && !source.path.ends_with(".cm") {
                return std::path::Path::new(&source.path).exists();
            }
        }
        true
    }
}

impl chime_errors::SourceMapper for SourceManager {
    fn file_path(&self, file_id: u32) -> Option<String> {
        self.source(file_id).map(|s| s.path.clone())
    }

    fn line_text(&self, file_id: u32, line: u32) -> Option<String> {
        self.source(file_id)
            .and_then(|s| s.line_text(line))
            .map(|t| t.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_source_reuses_slot() {
        let mut sm = SourceManager::new();
        let a = sm.add_source("pkg/a.cm", "let x = 1\n".to_string(), None);
        let b = sm.add_source("pkg/b.cm", "let y = 2\n".to_string(), None);
        assert_ne!(a, b);
        assert_ne!(a, 0);

        let a2 = sm.add_source("pkg/./a.cm", "let z = 3\n".to_string(), None);
        assert_eq!(a, a2);
        assert_eq!(sm.source(a).unwrap().buffer, "let z = 3\n");
    }

    #[test]
    fn test_pos_offset_round_trip() {
        let mut sm = SourceManager::new();
        let id = sm.add_source("f.cm", "ab\r\ncd\ne".to_string(), None);
        let source = sm.source(id).unwrap();
        for offset in 0..=source.buffer.len() {
            // offsets inside a \r\n pair are not line-start aligned and are
            // clamped forward, skip the second byte
            if offset == 3 {
                continue;
            }
            let pos = source.offset_to_pos(offset);
            assert_eq!(source.pos_to_offset(pos), offset, "offset {}", offset);
        }
    }

    #[test]
    fn test_pos_to_offset_bounds() {
        let mut sm = SourceManager::new();
        let id = sm.add_source("f.cm", "ab\ncd\n".to_string(), None);
        let source = sm.source(id).unwrap();
        assert_eq!(source.pos_to_offset(Position::new(id, 0, 0)), 0);
        assert_eq!(
            source.pos_to_offset(Position::new(id, u32::MAX, u32::MAX)),
            source.buffer.len()
        );
        // a column past the line end clamps to just past the terminator
        assert_eq!(source.pos_to_offset(Position::new(id, 1, 9)), 3);
    }

    #[test]
    fn test_content_between() {
        let mut sm = SourceManager::new();
        let id = sm.add_source("f.cm", "let x = 1\nlet y = 2\n".to_string(), None);
        let text = sm.content_between(
            Position::new(id, 1, 5),
            Position::new(id, 1, 6),
            None,
        );
        assert_eq!(text, "x");
        assert_eq!(sm.line_end(Position::new(id, 2, 1)), 9);
    }

    #[test]
    fn test_append_source() {
        let mut sm = SourceManager::new();
        let id = sm.add_source("f.cm", "let x = 1\n".to_string(), None);
        let id2 = sm.append_source("f.cm", "let y = 2\n");
        assert_eq!(id, id2);
        assert_eq!(sm.source(id).unwrap().count_lines(), 3);
    }
}
