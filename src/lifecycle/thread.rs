//! Reply-tree assembly.
//!
//! A conversation is loaded with a single ordered query and linked into a
//! forest in memory. Construction and teardown both use explicit stacks, so
//! arbitrarily deep reply chains never grow the native call stack.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use crate::common::{ConversationScope, MessageId};
use crate::error::Result;
use crate::storage::Message;

/// A message with its replies, oldest reply first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThreadNode {
    pub message: Message,
    pub replies: Vec<ThreadNode>,
}

impl ThreadNode {
    fn leaf(message: Message) -> Self {
        Self {
            message,
            replies: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        let mut count = 0;
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.replies.iter());
        }
        count
    }

    /// Longest root-to-leaf path, counting nodes.
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 1)];
        while let Some((node, depth)) = stack.pop() {
            deepest = deepest.max(depth);
            stack.extend(node.replies.iter().map(|reply| (reply, depth + 1)));
        }
        deepest
    }
}

impl Drop for ThreadNode {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.replies);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.replies);
        }
    }
}

/// Load `scope` in one batch and assemble its forest.
pub fn fetch_thread(conn: &Connection, scope: &ConversationScope) -> Result<Vec<ThreadNode>> {
    let batch = Message::find_in_scope(conn, scope)?;
    log::debug!("Assembling thread {scope} from {} messages", batch.len());
    Ok(assemble_thread(batch))
}

enum Visit {
    Enter(usize),
    Exit(usize),
}

/// Link a flat batch of messages into reply trees.
///
/// Roots are messages without a parent or whose parent is not in the batch.
/// Siblings and roots are ordered by `created_at`; messages with equal
/// timestamps keep their batch order.
pub fn assemble_thread(mut batch: Vec<Message>) -> Vec<ThreadNode> {
    batch.sort_by_key(|message| message.created_at);

    let index: HashMap<&MessageId, usize> = batch
        .iter()
        .enumerate()
        .map(|(i, message)| (&message.id, i))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); batch.len()];
    let mut roots = Vec::new();
    for (i, message) in batch.iter().enumerate() {
        match message.parent.as_ref().and_then(|parent| index.get(parent)) {
            Some(&parent) if parent != i => children[parent].push(i),
            _ => roots.push(i),
        }
    }
    drop(index);

    let mut slots: Vec<Option<Message>> = batch.into_iter().map(Some).collect();
    let mut built: Vec<Option<ThreadNode>> = Vec::with_capacity(slots.len());
    built.resize_with(slots.len(), || None);
    let mut visited = vec![false; slots.len()];
    let mut forest = Vec::with_capacity(roots.len());

    // Nodes on a parent cycle are unreachable from any root; they are
    // appended as extra roots in batch order rather than dropped.
    let unreached_roots: Vec<usize> = {
        let mut reachable = vec![false; slots.len()];
        let mut stack = roots.clone();
        while let Some(i) = stack.pop() {
            if !reachable[i] {
                reachable[i] = true;
                stack.extend(children[i].iter().copied());
            }
        }
        (0..slots.len()).filter(|&i| !reachable[i]).collect()
    };

    for root in roots.into_iter().chain(unreached_roots) {
        if visited[root] {
            continue;
        }
        let mut stack = vec![Visit::Enter(root)];
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(i) => {
                    if visited[i] {
                        continue;
                    }
                    visited[i] = true;
                    stack.push(Visit::Exit(i));
                    for &child in children[i].iter().rev() {
                        if !visited[child] {
                            stack.push(Visit::Enter(child));
                        }
                    }
                }
                Visit::Exit(i) => {
                    let Some(message) = slots[i].take() else {
                        continue;
                    };
                    let mut node = ThreadNode::leaf(message);
                    node.replies = children[i]
                        .iter()
                        .filter_map(|&child| built[child].take())
                        .collect();
                    built[i] = Some(node);
                }
            }
        }
        if let Some(tree) = built[root].take() {
            forest.push(tree);
        }
    }

    forest
}
