//! Attachment of comments to AST nodes.
//!
//! A comment group is a contiguous run of comments separated by at most a
//! blank-line boundary. The basic principle is to associate the nearest
//! outermost node:
//!
//! 1. A group beginning on the line a node ends on (or followed by two or
//!    more blank lines before the next node) is that node's trailing
//!    comment, where the node is the outermost one satisfying the rule.
//! 2. Otherwise the group sits inside its innermost enclosing node: the
//!    first top-level node after it takes it as leading; failing that the
//!    last top-level node before it takes it as trailing; failing both it
//!    is an inner comment of the enclosing node.
//! 3. Comments on a macro invocation are propagated to the expanded
//!    declaration once the expansion succeeds.

use std::collections::HashMap;

use chime_pos::{Position, Range};

use crate::ast::*;
use crate::token::{Token, TokenKind};
use crate::walk::{NodeMut, VisitAction, Walker};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Slot {
    Leading,
    Trailing,
    Inner,
}

/// Attach comment tokens to the nodes of a freshly parsed file.
pub fn attach_comments(file: &mut File, comments: &[Token]) {
    if comments.is_empty() {
        return;
    }
    let groups = group_comments(comments);
    let nodes = collect_nodes(file);

    let mut assignments: HashMap<NodeId, Vec<(Slot, CommentGroup)>> = HashMap::new();
    let mut file_inner: Vec<CommentGroup> = vec![];

    for group in groups {
        match place_group(&group, &nodes) {
            Some((node_id, slot)) => {
                assignments.entry(node_id).or_default().push((slot, group));
            }
            None => file_inner.push(group),
        }
    }

    apply_assignments(file, &mut assignments);
    file.base.comments.inner.extend(file_inner);
}

/// Rule 3: move the comments of a macro invocation node onto the
/// declaration the expansion produced.
pub fn propagate_invocation_comments(decl: &mut Decl) {
    if let DeclKind::MacroExpand(invocation) = &mut decl.kind {
        if let Some(expanded) = &mut invocation.decl {
            let comments = std::mem::take(&mut decl.base.comments);
            expanded.base.comments.leading.extend(comments.leading);
            expanded.base.comments.trailing.extend(comments.trailing);
            expanded.base.comments.inner.extend(comments.inner);
        }
    }
}

fn comment_kind(token: &Token) -> CommentKind {
    if token.value.starts_with("/*") {
        CommentKind::Block
    } else {
        CommentKind::Line
    }
}

fn group_comments(comments: &[Token]) -> Vec<CommentGroup> {
    let mut groups: Vec<CommentGroup> = vec![];
    for token in comments {
        debug_assert!(token.kind == TokenKind::Comment);
        let comment = Comment {
            kind: comment_kind(token),
            text: token.value.clone(),
            range: token.range(),
        };
        match groups.last_mut() {
            Some(group)
                if group
                    .comments
                    .last()
                    .map_or(false, |prev| {
                        prev.range.end.file_id == comment.range.begin.file_id
                            && comment.range.begin.line <= prev.range.end.line + 1
                    }) =>
            {
                group.comments.push(comment);
            }
            _ => groups.push(CommentGroup {
                comments: vec![comment],
            }),
        }
    }
    groups
}

#[derive(Clone, Copy)]
struct NodeEntry {
    id: NodeId,
    begin: Position,
    end: Position,
}

/// Collect attachment candidates, ignoring files, annotations and
/// modifiers, sorted by begin ascending with larger ranges first.
fn collect_nodes(file: &mut File) -> Vec<NodeEntry> {
    let mut nodes = vec![];
    {
        let mut walker = Walker::with_pre(|node| {
            match &node {
                NodeMut::Annotation(_) | NodeMut::Modifier(_) => {
                    return VisitAction::SkipChildren;
                }
                NodeMut::File(_) | NodeMut::Package(_) => return VisitAction::WalkChildren,
                _ => {}
            }
            let base = node.base();
            if !base.begin.is_zero() {
                nodes.push(NodeEntry {
                    id: base.id,
                    begin: base.begin,
                    end: base.end,
                });
            }
            VisitAction::WalkChildren
        });
        walker.walk_file(file);
    }
    nodes.sort_by(|a, b| {
        a.begin
            .cmp(&b.begin)
            .then_with(|| b.end.cmp(&a.end))
    });
    nodes
}

fn place_group(group: &CommentGroup, nodes: &[NodeEntry]) -> Option<(NodeId, Slot)> {
    let g_begin = group.begin();
    let g_end = group.end();

    // Rule 1: a node ending on the line the group begins on; pick the
    // outermost (largest) one.
    let mut rule1: Option<NodeEntry> = None;
    for node in nodes {
        if node.end <= g_begin && node.end.line == g_begin.line {
            let replace = match rule1 {
                Some(found) => {
                    node.begin < found.begin || (node.begin == found.begin && node.end > found.end)
                }
                None => true,
            };
            if replace {
                rule1 = Some(*node);
            }
        }
    }
    if let Some(found) = rule1 {
        return Some((found.id, Slot::Trailing));
    }

    // Rule 1, second form: two or more blank lines before the next node.
    let next_after = nodes
        .iter()
        .filter(|n| n.begin >= g_end)
        .min_by_key(|n| n.begin);
    let prev_before = nodes
        .iter()
        .filter(|n| n.end <= g_begin)
        .max_by_key(|n| n.end);
    if let (Some(prev), Some(next)) = (prev_before, next_after) {
        if next.begin.line >= g_end.line + 3 {
            let outermost = outermost_at_end(nodes, prev.end);
            return Some((outermost.id, Slot::Trailing));
        }
    }

    // Rule 2: the innermost node enclosing the group.
    let enclosing = nodes
        .iter()
        .filter(|n| {
            Range::new(n.begin, n.end).contains_pos(g_begin)
                || (n.begin <= g_begin && g_end <= n.end)
        })
        .min_by_key(|n| (n.end, std::cmp::Reverse(n.begin)));

    let (children_of, inner_target): (Option<Range>, Option<NodeId>) = match enclosing {
        Some(parent) => (
            Some(Range::new(parent.begin, parent.end)),
            Some(parent.id),
        ),
        None => (None, None),
    };

    // top-level nodes inside the scope: maximal nodes not contained in a
    // sibling
    let in_scope: Vec<&NodeEntry> = nodes
        .iter()
        .filter(|n| match children_of {
            Some(parent) => {
                parent.contains(Range::new(n.begin, n.end))
                    && !(n.begin == parent.begin && n.end == parent.end)
            }
            None => true,
        })
        .collect();
    let top_level: Vec<&NodeEntry> = in_scope
        .iter()
        .filter(|n| {
            !in_scope.iter().any(|outer| {
                (outer.begin, outer.end) != (n.begin, n.end)
                    && outer.begin <= n.begin
                    && n.end <= outer.end
            })
        })
        .cloned()
        .collect();

    if let Some(next) = top_level
        .iter()
        .filter(|n| n.begin >= g_end)
        .min_by_key(|n| n.begin)
    {
        return Some((next.id, Slot::Leading));
    }
    if let Some(prev) = top_level
        .iter()
        .filter(|n| n.end <= g_begin)
        .max_by_key(|n| n.end)
    {
        return Some((prev.id, Slot::Trailing));
    }
    inner_target.map(|id| (id, Slot::Inner))
}

fn outermost_at_end(nodes: &[NodeEntry], end: Position) -> NodeEntry {
    let mut best: Option<NodeEntry> = None;
    for node in nodes {
        if node.end == end {
            let replace = match best {
                Some(found) => node.begin < found.begin,
                None => true,
            };
            if replace {
                best = Some(*node);
            }
        }
    }
    best.unwrap()
}

fn apply_assignments(
    file: &mut File,
    assignments: &mut HashMap<NodeId, Vec<(Slot, CommentGroup)>>,
) {
    if assignments.is_empty() {
        return;
    }
    let mut walker = Walker::with_pre(|mut node| {
        let base = node.base_mut();
        if let Some(entries) = assignments.remove(&base.id) {
            for (slot, group) in entries {
                match slot {
                    Slot::Leading => base.comments.leading.push(group),
                    Slot::Trailing => base.comments.trailing.push(group),
                    Slot::Inner => base.comments.inner.push(group),
                }
            }
        }
        VisitAction::WalkChildren
    });
    walker.walk_file(file);
}
