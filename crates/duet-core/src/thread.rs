//! Thread reconstruction.
//!
//! Ancestors are walked parent-by-parent from the viewed post and returned
//! oldest first. Descendants are flattened depth-first with each reply
//! tagged by its nesting depth below the root.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::{Post, ThreadItem};

/// Hard cap on parent-chain hops when computing reply depth.
pub const MAX_THREAD_HOPS: u32 = 32;

/// Hard cap on the number of ancestors collected for one post.
pub const MAX_ANCESTORS: usize = 64;

/// One step of an ancestor walk.
#[derive(Debug, Clone)]
pub enum AncestorNode<P> {
    Post(P),
    /// The network withheld this node.
    Blocked,
    /// The node was deleted or is missing from the context.
    NotFound,
}

/// Collect ancestors from a chain that runs from the immediate parent toward
/// the root.
///
/// The walk stops at the first blocked or missing node; everything gathered
/// up to that point is still returned. The result is oldest first with the
/// immediate parent last.
pub fn collect_ancestors<P>(chain: impl IntoIterator<Item = AncestorNode<P>>) -> Vec<P> {
    let mut ancestors = Vec::new();
    for node in chain.into_iter().take(MAX_ANCESTORS) {
        match node {
            AncestorNode::Post(post) => ancestors.push(post),
            AncestorNode::Blocked | AncestorNode::NotFound => break,
        }
    }
    ancestors.reverse();
    ancestors
}

/// Follow parent ids through a lookup, yielding nodes child to root.
///
/// `lookup` returns the node for an id plus that node's own parent id. An id
/// the lookup cannot resolve yields [`AncestorNode::NotFound`] and ends the
/// chain, as does revisiting an id.
pub fn parent_chain<P, F>(
    first_parent: Option<String>,
    mut lookup: F,
) -> impl Iterator<Item = AncestorNode<P>>
where
    F: FnMut(&str) -> Option<(P, Option<String>)>,
{
    let mut next = first_parent;
    let mut seen = HashSet::new();
    std::iter::from_fn(move || {
        let id = next.take()?;
        if !seen.insert(id.clone()) {
            return None;
        }
        match lookup(&id) {
            Some((post, parent)) => {
                next = parent;
                Some(AncestorNode::Post(post))
            }
            None => Some(AncestorNode::NotFound),
        }
    })
}

/// A reply with its native parent reference.
#[derive(Debug, Clone)]
pub struct ReplyNode {
    pub native_id: String,
    pub parent_native_id: Option<String>,
    pub post: Post,
}

/// Flatten replies below `root_native_id` into depth-tagged thread items.
///
/// Siblings are ordered by creation time ascending and each subtree follows
/// its parent. Replies whose parent is unknown attach directly below the
/// root. Replies caught in a parent cycle are unreachable and dropped.
pub fn flatten_replies(root_native_id: &str, replies: Vec<ReplyNode>) -> Vec<ThreadItem> {
    let mut nodes: HashMap<String, ReplyNode> = HashMap::with_capacity(replies.len());
    let mut order: Vec<String> = Vec::with_capacity(replies.len());
    for reply in replies {
        if reply.native_id == root_native_id || nodes.contains_key(&reply.native_id) {
            continue;
        }
        order.push(reply.native_id.clone());
        nodes.insert(reply.native_id.clone(), reply);
    }

    let mut children: HashMap<Option<&str>, Vec<&str>> = HashMap::new();
    for id in &order {
        children
            .entry(effective_parent(&nodes, root_native_id, id))
            .or_default()
            .push(id.as_str());
    }
    for siblings in children.values_mut() {
        siblings.sort_by(|a, b| {
            let (pa, pb) = (&nodes[*a].post, &nodes[*b].post);
            pa.created_at.cmp(&pb.created_at).then_with(|| a.cmp(b))
        });
    }

    let mut items = Vec::with_capacity(order.len());
    let mut visited: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = children
        .get(&None)
        .map(|roots| roots.iter().rev().copied().collect())
        .unwrap_or_default();

    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        let node = &nodes[id];
        items.push(ThreadItem {
            id: node.post.id.clone(),
            post: node.post.clone(),
            depth: depth_of(&nodes, root_native_id, id),
        });
        if let Some(kids) = children.get(&Some(id)) {
            stack.extend(kids.iter().rev().copied());
        }
    }

    if items.len() != order.len() {
        debug!(
            dropped = order.len() - items.len(),
            "dropped unreachable replies"
        );
    }
    items
}

/// A known reply's parent, or `None` when the reply hangs off the root.
fn effective_parent<'a>(
    nodes: &'a HashMap<String, ReplyNode>,
    root_native_id: &str,
    id: &str,
) -> Option<&'a str> {
    nodes
        .get(id)
        .and_then(|n| n.parent_native_id.as_deref())
        .filter(|p| *p != root_native_id && nodes.contains_key(*p))
}

/// Count parent hops back to the root, capped at [`MAX_THREAD_HOPS`].
fn depth_of(nodes: &HashMap<String, ReplyNode>, root_native_id: &str, id: &str) -> u32 {
    let mut hops = 1u32;
    let mut current = id;
    while let Some(parent) = effective_parent(nodes, root_native_id, current) {
        if hops >= MAX_THREAD_HOPS {
            break;
        }
        hops += 1;
        current = parent;
    }
    hops
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::post;
    use chrono::{Duration, TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn node(id: &str, parent: Option<&str>, minute: i64) -> ReplyNode {
        let mut p = post(&format!("mastodon:{id}"));
        p.native_id = id.to_string();
        p.created_at =
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute);
        ReplyNode {
            native_id: id.to_string(),
            parent_native_id: parent.map(str::to_string),
            post: p,
        }
    }

    fn shape(items: &[ThreadItem]) -> Vec<(String, u32)> {
        items
            .iter()
            .map(|i| (i.post.native_id.clone(), i.depth))
            .collect()
    }

    #[test]
    fn test_depth_tagging() {
        let replies = vec![
            node("c3", Some("r"), 3),
            node("c2", Some("c1"), 2),
            node("c1", Some("r"), 1),
        ];
        let items = flatten_replies("r", replies);
        assert_eq!(
            shape(&items),
            vec![
                ("c1".to_string(), 1),
                ("c2".to_string(), 2),
                ("c3".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_siblings_sorted_by_time() {
        let replies = vec![
            node("late", Some("r"), 9),
            node("early", Some("r"), 1),
            node("mid-child", Some("early"), 5),
        ];
        let items = flatten_replies("r", replies);
        assert_eq!(
            shape(&items),
            vec![
                ("early".to_string(), 1),
                ("mid-child".to_string(), 2),
                ("late".to_string(), 1),
            ]
        );
    }

    #[test]
    fn test_cycle_is_dropped_and_terminates() {
        let replies = vec![
            node("ok", Some("r"), 1),
            node("a", Some("b"), 2),
            node("b", Some("a"), 3),
        ];
        let items = flatten_replies("r", replies);
        assert_eq!(shape(&items), vec![("ok".to_string(), 1)]);
    }

    #[test]
    fn test_unknown_parent_attaches_to_root() {
        let replies = vec![node("x", Some("deleted"), 1), node("y", Some("x"), 2)];
        let items = flatten_replies("r", replies);
        assert_eq!(
            shape(&items),
            vec![("x".to_string(), 1), ("y".to_string(), 2)]
        );
    }

    #[test]
    fn test_deep_chain_depth_is_capped() {
        let mut replies = vec![node("n0", Some("r"), 0)];
        for i in 1..40 {
            replies.push(node(&format!("n{i}"), Some(&format!("n{}", i - 1)), i));
        }
        let items = flatten_replies("r", replies);
        assert_eq!(items.len(), 40);
        assert_eq!(items[0].depth, 1);
        assert_eq!(items[39].depth, MAX_THREAD_HOPS);
    }

    #[test]
    fn test_duplicates_and_root_skipped() {
        let replies = vec![node("r", None, 0), node("a", Some("r"), 1), node("a", Some("r"), 2)];
        let items = flatten_replies("r", replies);
        assert_eq!(shape(&items), vec![("a".to_string(), 1)]);
    }

    #[test]
    fn test_collect_ancestors_orders_oldest_first() {
        // Walk from the viewed post: B, A, root.
        let chain = vec![
            AncestorNode::Post("B"),
            AncestorNode::Post("A"),
            AncestorNode::Post("root"),
        ];
        assert_eq!(collect_ancestors(chain), vec!["root", "A", "B"]);
    }

    #[test]
    fn test_collect_ancestors_stops_at_blocked() {
        let chain = vec![
            AncestorNode::Post("B"),
            AncestorNode::Blocked,
            AncestorNode::Post("root"),
        ];
        assert_eq!(collect_ancestors(chain), vec!["B"]);
    }

    #[test]
    fn test_parent_chain_lookup() {
        let parents: HashMap<&str, Option<&str>> =
            HashMap::from([("B", Some("A")), ("A", Some("root")), ("root", None)]);
        let chain = parent_chain(Some("B".to_string()), |id| {
            parents
                .get(id)
                .map(|p| (id.to_string(), p.map(str::to_string)))
        });
        assert_eq!(collect_ancestors(chain), vec!["root", "A", "B"]);
    }

    #[test]
    fn test_parent_chain_missing_node_yields_partial() {
        let parents: HashMap<&str, Option<&str>> = HashMap::from([("B", Some("gone"))]);
        let chain = parent_chain(Some("B".to_string()), |id| {
            parents
                .get(id)
                .map(|p| (id.to_string(), p.map(str::to_string)))
        });
        assert_eq!(collect_ancestors(chain), vec!["B".to_string()]);
    }

    #[test]
    fn test_parent_chain_cycle_terminates() {
        let parents: HashMap<&str, Option<&str>> =
            HashMap::from([("A", Some("B")), ("B", Some("A"))]);
        let chain = parent_chain(Some("A".to_string()), |id| {
            parents
                .get(id)
                .map(|p| (id.to_string(), p.map(str::to_string)))
        });
        assert_eq!(collect_ancestors(chain), vec!["B".to_string(), "A".to_string()]);
    }
}
