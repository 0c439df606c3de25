//! Source positions and related helper functions.
//!
//! Positions are `(file, line, column)` triples rather than flat byte
//! offsets; the source manager owns the line tables that map between the
//! two representations.

#![deny(warnings)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod width;

pub use crate::width::{display_width, display_width_bytes, wide_char_width};

/// File id `0` is reserved for positions synthesized by the compiler
/// (desugared nodes, generated box classes and so on).
pub const SYNTHESIZED_FILE_ID: u32 = 0;

/// A point in a source buffer. Lines and columns are 1-based; the zero
/// position marks a node without source.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub file_id: u32,
    pub line: u32,
    pub column: u32,
}

pub const ZERO_POSITION: Position = Position {
    file_id: 0,
    line: 0,
    column: 0,
};

impl Position {
    pub fn new(file_id: u32, line: u32, column: u32) -> Position {
        Position {
            file_id,
            line,
            column,
        }
    }

    /// True for positions created without any source backing.
    pub fn is_zero(&self) -> bool {
        *self == ZERO_POSITION
    }

    pub fn is_synthesized(&self) -> bool {
        self.file_id == SYNTHESIZED_FILE_ID
    }

    /// Returns `self` if it is not the zero position, and `other` otherwise.
    pub fn substitute_zero(self, other: Position) -> Position {
        if self.is_zero() {
            other
        } else {
            self
        }
    }

    /// The position `n` columns to the right, on the same line.
    pub fn shift(self, n: u32) -> Position {
        Position {
            column: self.column + n,
            ..self
        }
    }
}

/// Ordering is lexicographic on `(file_id, line, column)`.
impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Position) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Position) -> Ordering {
        (self.file_id, self.line, self.column).cmp(&(other.file_id, other.line, other.column))
    }
}

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file_id, self.line, self.column)
    }
}

/// A half-open region of source: `begin` is included, `end` is not.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Range {
    pub begin: Position,
    pub end: Position,
}

pub const ZERO_RANGE: Range = Range {
    begin: ZERO_POSITION,
    end: ZERO_POSITION,
};

impl Range {
    pub fn new(begin: Position, end: Position) -> Range {
        Range { begin, end }
    }

    /// A range covering `n` columns starting at `begin`.
    pub fn with_width(begin: Position, n: u32) -> Range {
        Range {
            begin,
            end: begin.shift(n),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.begin.is_zero() && self.end.is_zero()
    }

    pub fn contains(&self, other: Range) -> bool {
        self.begin <= other.begin && other.end <= self.end
    }

    pub fn contains_pos(&self, pos: Position) -> bool {
        self.begin <= pos && pos < self.end
    }

    pub fn to(self, end: Range) -> Range {
        Range {
            begin: self.begin,
            end: end.end,
        }
    }
}

impl fmt::Debug for Range {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}..{:?}", self.begin, self.end)
    }
}

/// A collection of ranges attached to one diagnostic. Ranges have two
/// orthogonal attributes:
///
/// - they can be *primary ranges*: the locus of the error, rendered
///   with `^^^`;
/// - they can have a *label*, written next to the mark in the snippet.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiRange {
    primary_ranges: Vec<Range>,
    range_labels: Vec<(Range, String)>,
}

#[derive(Clone, Debug)]
pub struct RangeLabel {
    pub range: Range,
    pub is_primary: bool,
    pub label: Option<String>,
}

impl MultiRange {
    pub fn from_range(primary: Range) -> MultiRange {
        MultiRange {
            primary_ranges: vec![primary],
            range_labels: vec![],
        }
    }

    pub fn from_ranges(vec: Vec<Range>) -> MultiRange {
        MultiRange {
            primary_ranges: vec,
            range_labels: vec![],
        }
    }

    pub fn push_range_label(&mut self, range: Range, label: String) {
        self.range_labels.push((range, label));
    }

    /// Selects the first primary range (if any).
    pub fn primary_range(&self) -> Option<Range> {
        self.primary_ranges.first().cloned()
    }

    pub fn primary_ranges(&self) -> &[Range] {
        &self.primary_ranges
    }

    /// Returns the labels to highlight. Every primary range gets an entry:
    /// either its explicit labels (marked primary) or a `RangeLabel` with an
    /// empty label.
    pub fn range_labels(&self) -> Vec<RangeLabel> {
        let is_primary = |range| self.primary_ranges.contains(&range);
        let mut labels = vec![];

        for &(range, ref label) in &self.range_labels {
            labels.push(RangeLabel {
                range,
                is_primary: is_primary(range),
                label: Some(label.clone()),
            });
        }

        for &range in &self.primary_ranges {
            if !labels.iter().any(|rl| rl.range == range) {
                labels.push(RangeLabel {
                    range,
                    is_primary: true,
                    label: None,
                });
            }
        }

        labels
    }
}

impl From<Range> for MultiRange {
    fn from(range: Range) -> MultiRange {
        MultiRange::from_range(range)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_order() {
        let a = Position::new(1, 2, 3);
        let b = Position::new(1, 2, 4);
        let c = Position::new(1, 3, 1);
        let d = Position::new(2, 1, 1);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert_eq!(a.cmp(&a), Ordering::Equal);
    }

    #[test]
    fn test_range_contains() {
        let r = Range::new(Position::new(1, 1, 1), Position::new(1, 4, 1));
        assert!(r.contains_pos(Position::new(1, 2, 7)));
        assert!(!r.contains_pos(Position::new(1, 4, 1)));
        assert!(r.contains(Range::new(Position::new(1, 2, 1), Position::new(1, 3, 1))));
    }

    #[test]
    fn test_zero_substitution() {
        let real = Position::new(3, 1, 1);
        assert_eq!(ZERO_POSITION.substitute_zero(real), real);
        assert_eq!(real.substitute_zero(ZERO_POSITION), real);
    }

    #[test]
    fn test_multi_range_labels() {
        let r1 = Range::with_width(Position::new(1, 1, 1), 3);
        let r2 = Range::with_width(Position::new(1, 2, 1), 3);
        let mut mr = MultiRange::from_range(r1);
        mr.push_range_label(r2, "declared here".to_string());

        let labels = mr.range_labels();
        assert_eq!(labels.len(), 2);
        assert!(labels.iter().any(|l| l.range == r1 && l.is_primary));
        assert!(labels
            .iter()
            .any(|l| l.range == r2 && !l.is_primary && l.label.is_some()));
    }
}
