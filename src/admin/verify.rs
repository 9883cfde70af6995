use std::cmp::Ordering;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::admin::options::AdminOpenOptions;
use crate::admin::util::open_history;
use crate::admin::{AdminError, Result};
use crate::node::{ChildRef, Node};
use crate::tree::{HistoryTree, TreeHeader};
use crate::types::SeqNum;

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Header, file length and root node only.
    Fast,
    /// Every node block, every parent/child link and every interval.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Informational message about the verification process.
    Info,
    /// Non-critical issue that may indicate a problem.
    Warning,
    /// Critical issue indicating data corruption or integrity failure.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

impl VerifyFinding {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: VerifySeverity::Error,
            message: message.into(),
        }
    }
}

/// Statistics collected during the verification process.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Node count recorded in the header.
    pub node_count: u64,
    /// Node blocks decoded successfully.
    pub nodes_checked: u64,
    /// Leaf nodes among them.
    pub leaves: u64,
    /// Branch nodes among them.
    pub branches: u64,
    /// Intervals held by the decoded nodes.
    pub intervals: u64,
    /// Nodes not reachable from the root.
    pub unreachable_nodes: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification passed without finding any issues.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the nodes examined.
    pub counts: VerifyCounts,
}

/// Verifies the integrity of a closed history file.
///
/// - `VerifyLevel::Fast`: header, file length and root node
/// - `VerifyLevel::Full`: additionally decodes every node and checks that
///   the parent/child links form a single tree whose ranges nest, and that
///   every interval lies inside its node and in node order
///
/// A file that cannot be opened as a history tree at all is reported as a
/// failed verification rather than an error.
///
/// # Errors
///
/// Returns an error if the file does not exist or an I/O operation fails.
pub fn verify(
    path: impl AsRef<Path>,
    opts: &AdminOpenOptions,
    level: VerifyLevel,
) -> Result<VerifyReport> {
    let path = path.as_ref();
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();

    let tree = match open_history(path, opts) {
        Ok(tree) => tree,
        Err(AdminError::Core(err)) if err.requires_rebuild() => {
            push_error(&mut findings, format!("cannot open history file: {err}"));
            return Ok(VerifyReport {
                level,
                success: false,
                findings,
                counts,
            });
        }
        Err(err) => return Err(err),
    };
    let header = tree.header();
    counts.node_count = u64::from(header.node_count);

    let on_disk = fs::metadata(path)?.len();
    if on_disk < tree.file_size() {
        push_error(
            &mut findings,
            format!(
                "file holds {on_disk} bytes but {} nodes need {}",
                header.node_count,
                tree.file_size()
            ),
        );
    }
    check_root(&tree, &header, &mut findings);

    if matches!(level, VerifyLevel::Full) {
        let nodes = collect_nodes(&tree, &header, &mut findings, &mut counts);
        walk_links(&nodes, header.root_seq, &mut findings, &mut counts);
    }

    debug!(
        path = %path.display(),
        findings = findings.len(),
        nodes_checked = counts.nodes_checked,
        "admin.verify"
    );
    Ok(VerifyReport {
        level,
        success: findings.is_empty(),
        findings,
        counts,
    })
}

fn check_root(tree: &HistoryTree, header: &TreeHeader, findings: &mut Vec<VerifyFinding>) {
    let root = match tree.read_node(header.root_seq) {
        Ok(root) => root,
        Err(err) => {
            push_error(findings, format!("root node {} unreadable: {err}", header.root_seq));
            return;
        }
    };
    if !root.parent().is_none() {
        push_error(
            findings,
            format!("root node {} has parent {}", root.seq(), root.parent()),
        );
    }
    if root.end() != header.tree_end {
        push_error(
            findings,
            format!(
                "root ends at {} but the tree ends at {}",
                root.end(),
                header.tree_end
            ),
        );
    }
    if usize::from(root.level()) + 1 != header.depth as usize {
        push_error(
            findings,
            format!("root level {} disagrees with depth {}", root.level(), header.depth),
        );
    }
}

fn collect_nodes(
    tree: &HistoryTree,
    header: &TreeHeader,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Vec<Option<Arc<Node>>> {
    let mut nodes = Vec::with_capacity(header.node_count as usize);
    for raw in 0..header.node_count {
        match tree.read_node(SeqNum(raw)) {
            Ok(node) => {
                counts.nodes_checked += 1;
                if node.is_leaf() {
                    counts.leaves += 1;
                } else {
                    counts.branches += 1;
                }
                counts.intervals += node.intervals().len() as u64;
                check_intervals(&node, findings);
                nodes.push(Some(node));
            }
            Err(err) => {
                push_error(findings, format!("node {raw} unreadable: {err}"));
                nodes.push(None);
            }
        }
    }
    nodes
}

fn check_intervals(node: &Node, findings: &mut Vec<VerifyFinding>) {
    if !node.is_closed() {
        push_error(findings, format!("node {} was never closed", node.seq()));
    }
    for interval in node.intervals() {
        if interval.start() < node.start() || interval.end() > node.end() {
            push_error(
                findings,
                format!(
                    "node {} [{}, {}] holds interval {} outside its range",
                    node.seq(),
                    node.start(),
                    node.end(),
                    interval
                ),
            );
        }
    }
    let unordered = node
        .intervals()
        .windows(2)
        .any(|pair| pair[0].node_order(&pair[1]) == Ordering::Greater);
    if unordered {
        push_error(findings, format!("node {} intervals out of order", node.seq()));
    }
}

fn walk_links(
    nodes: &[Option<Arc<Node>>],
    root: SeqNum,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) {
    if root.0 as usize >= nodes.len() {
        push_error(findings, format!("root {root} is outside the file"));
        return;
    }
    let mut visited = vec![false; nodes.len()];
    let mut stack = vec![root];
    while let Some(seq) = stack.pop() {
        let idx = seq.0 as usize;
        if visited[idx] {
            push_error(findings, format!("node {seq} is linked more than once"));
            continue;
        }
        visited[idx] = true;
        let Some(node) = &nodes[idx] else {
            continue;
        };
        let mut previous_start = node.start();
        for child_ref in node.children() {
            if child_ref.seq.0 as usize >= nodes.len() {
                push_error(
                    findings,
                    format!("node {} links missing child {}", node.seq(), child_ref.seq),
                );
                continue;
            }
            if child_ref.start < previous_start {
                push_error(
                    findings,
                    format!("children of node {} are not in time order", node.seq()),
                );
            }
            previous_start = child_ref.start;
            if let Some(child) = &nodes[child_ref.seq.0 as usize] {
                check_child(node, child_ref, child, findings);
            }
            stack.push(child_ref.seq);
        }
        if findings.len() >= MAX_FINDINGS {
            break;
        }
    }

    let unreachable: Vec<usize> = visited
        .iter()
        .enumerate()
        .filter_map(|(idx, seen)| (!seen).then_some(idx))
        .collect();
    counts.unreachable_nodes = unreachable.len() as u64;
    for idx in unreachable {
        push_error(findings, format!("node {idx} is not reachable from the root"));
    }
}

fn check_child(parent: &Node, child_ref: &ChildRef, child: &Node, findings: &mut Vec<VerifyFinding>) {
    if child.parent() != parent.seq() {
        push_error(
            findings,
            format!(
                "node {} lists child {} whose parent is {}",
                parent.seq(),
                child.seq(),
                child.parent()
            ),
        );
    }
    if child.start() != child_ref.start || child.end() != child_ref.end {
        push_error(
            findings,
            format!(
                "node {} records child {} as [{}, {}] but it spans [{}, {}]",
                parent.seq(),
                child.seq(),
                child_ref.start,
                child_ref.end,
                child.start(),
                child.end()
            ),
        );
    }
    if child.level() + 1 != parent.level() {
        push_error(
            findings,
            format!(
                "child {} at level {} under node {} at level {}",
                child.seq(),
                child.level(),
                parent.seq(),
                parent.level()
            ),
        );
    }
    if child_ref.start < parent.start() || child_ref.end > parent.end() {
        push_error(
            findings,
            format!(
                "child {} escapes the range of node {}",
                child.seq(),
                parent.seq()
            ),
        );
    }
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding::error(message.into()));
    }
}
