use crate::types::RuleNotFound;
use std::{
    collections::{HashMap, HashSet},
    sync::RwLock,
};
use tracing::trace;

/// Stable handle to a subscription rule.
///
/// Handles survive trie reorganization: splitting a node on wildcard insert
/// and merging one back on removal rewrite the rule's owner in place, so a
/// handle taken at subscribe time still removes the right rule later.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RuleId(u64);

/// Resolves published channel names to subscriber identities.
///
/// Internally a prefix trie. A pattern with a trailing wildcard is split at
/// the first `*`: the literal prefix becomes (or finds) a child node and the
/// wildcard tail (`*` or `**`) is stored there. Literal patterns are stored
/// whole at the node where insertion stops, which keeps lookup cost
/// proportional to the number of wildcard prefixes rather than path
/// segments.
///
/// Shared across tasks behind a single reader-writer lock: resolution takes
/// the read side, mutation the write side.
pub(crate) struct ChannelRouter {
    trie: RwLock<Trie>,
}

type NodeId = usize;

#[derive(Debug, Default)]
struct Node {
    parent: Option<NodeId>,
    /// Literal string consumed when descending into this node. Empty at the
    /// root.
    prefix: String,
    /// Children keyed by the prefix consumed to enter them. Siblings may
    /// have overlapping prefixes; resolution tries each in turn.
    children: HashMap<String, NodeId>,
    /// Node-local pattern remainders (`literal`, `*`, or `**`) to the rules
    /// stored under them.
    rules: HashMap<String, HashSet<RuleId>>,
}

#[derive(Debug)]
struct Record {
    owner: NodeId,
    /// The node-local remainder this rule is keyed under.
    path: String,
    client: String,
}

#[derive(Debug)]
struct Trie {
    /// Node arena. Slot 0 is the root; freed slots are recycled through
    /// `free`.
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    records: HashMap<RuleId, Record>,
    next_rule: u64,
}

impl ChannelRouter {
    pub(crate) fn new() -> Self {
        Self {
            trie: RwLock::new(Trie {
                nodes: vec![Node::default()],
                free: Vec::new(),
                records: HashMap::new(),
                next_rule: 0,
            }),
        }
    }

    /// Insert a rule binding `pattern` to `client`, returning its handle.
    ///
    /// Idempotent: re-adding an existing `(pattern, client)` pair returns
    /// the handle already resident.
    pub(crate) fn add(&self, pattern: &str, client: &str) -> RuleId {
        let mut trie = self.trie.write().expect("router lock poisoned");
        let rule = trie.add_at(0, pattern, client);
        trace!(%pattern, %client, ?rule, "rule added");
        rule
    }

    /// Collect the distinct subscriber identities matching `path`.
    pub(crate) fn resolve(&self, path: &str) -> Vec<String> {
        let trie = self.trie.read().expect("router lock poisoned");
        let mut out = HashSet::new();
        trie.resolve_at(0, path, &mut out);
        out.into_iter().collect()
    }

    /// Remove the rule behind `rule`, merging its node back into the parent
    /// when the last wildcard leaves a childless node.
    pub(crate) fn remove(&self, rule: RuleId) -> Result<(), RuleNotFound> {
        let mut trie = self.trie.write().expect("router lock poisoned");
        trie.remove(rule)
    }
}

impl std::fmt::Debug for ChannelRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRouter").finish_non_exhaustive()
    }
}

impl Trie {
    fn add_at(&mut self, node: NodeId, path: &str, client: &str) -> RuleId {
        if let Some(pos) = path.find('*') {
            if pos > 0 {
                // wildcard rule: split into (prefix, wild tail) and recurse
                let (prefix, tail) = path.split_at(pos);
                let child = match self.nodes[node].children.get(prefix) {
                    Some(&child) => child,
                    None => self.split(node, prefix),
                };
                return self.add_at(child, tail, client);
            }
        }

        // simple rule, stored at this node unless an equal rule is already
        // resident here or was migrated into a descendant by a split
        if let Some(existing) = self.find_resident(node, path, client) {
            return existing;
        }

        let rule = RuleId(self.next_rule);
        self.next_rule += 1;
        self.records.insert(
            rule,
            Record {
                owner: node,
                path: path.to_owned(),
                client: client.to_owned(),
            },
        );
        self.nodes[node]
            .rules
            .entry(path.to_owned())
            .or_default()
            .insert(rule);
        rule
    }

    /// Locate a rule for `(path, client)` at `node` or in any descendant a
    /// split may have migrated it into, following the same prefix descent
    /// the migration took.
    fn find_resident(&self, node: NodeId, path: &str, client: &str) -> Option<RuleId> {
        if let Some(set) = self.nodes[node].rules.get(path) {
            if let Some(existing) = set
                .iter()
                .find(|rule| self.records[*rule].client == client)
            {
                return Some(*existing);
            }
        }
        for (prefix, &child) in &self.nodes[node].children {
            if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                if let Some(found) = self.find_resident(child, rest, client) {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Create a child of `node` for `prefix`, migrating the literal rules
    /// whose keys begin with `prefix` into it (keys stripped, records
    /// rewritten in place).
    fn split(&mut self, node: NodeId, prefix: &str) -> NodeId {
        let child = self.alloc(Node {
            parent: Some(node),
            prefix: prefix.to_owned(),
            ..Node::default()
        });
        self.nodes[node].children.insert(prefix.to_owned(), child);

        let candidates: Vec<String> = self.nodes[node]
            .rules
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        for key in candidates {
            let set = self.nodes[node].rules.remove(&key).unwrap_or_default();
            let stripped = key[prefix.len()..].to_owned();
            for rule in &set {
                let record = self.records.get_mut(rule).expect("record for live rule");
                record.owner = child;
                record.path = stripped.clone();
            }
            self.nodes[child]
                .rules
                .entry(stripped)
                .or_default()
                .extend(set);
        }
        child
    }

    fn remove(&mut self, rule: RuleId) -> Result<(), RuleNotFound> {
        let record = self.records.remove(&rule).ok_or(RuleNotFound)?;
        let node = record.owner;

        if let Some(set) = self.nodes[node].rules.get_mut(&record.path) {
            set.remove(&rule);
            if set.is_empty() {
                self.nodes[node].rules.remove(&record.path);
            }
        }

        // a childless node whose last wildcard is gone folds back into its
        // parent, literal rules re-keyed under the joined prefix
        let mergeable = record.path.starts_with('*')
            && self.nodes[node].children.is_empty()
            && !self.nodes[node].rules.keys().any(|key| key.starts_with('*'));
        if mergeable {
            if let Some(parent) = self.nodes[node].parent {
                let prefix = std::mem::take(&mut self.nodes[node].prefix);
                let rules = std::mem::take(&mut self.nodes[node].rules);
                for (key, set) in rules {
                    let joined = format!("{prefix}{key}");
                    for rule in &set {
                        let record = self.records.get_mut(rule).expect("record for live rule");
                        record.owner = parent;
                        record.path = joined.clone();
                    }
                    self.nodes[parent]
                        .rules
                        .entry(joined)
                        .or_default()
                        .extend(set);
                }
                self.nodes[parent].children.remove(&prefix);
                self.release(node);
                trace!(%prefix, "trie node merged into parent");
            }
        }
        Ok(())
    }

    fn resolve_at(&self, node: NodeId, path: &str, out: &mut HashSet<String>) -> bool {
        let n = &self.nodes[node];
        let mut matched = false;

        if let Some(set) = n.rules.get(path) {
            self.collect(set, out);
            matched = true;
        }
        if !path.contains('/') {
            if let Some(set) = n.rules.get("*") {
                self.collect(set, out);
                matched = true;
            }
        }
        if let Some(set) = n.rules.get("**") {
            self.collect(set, out);
            matched = true;
        }

        if !matched {
            for (prefix, &child) in &n.children {
                if let Some(rest) = path.strip_prefix(prefix.as_str()) {
                    if self.resolve_at(child, rest, out) {
                        matched = true;
                        break;
                    }
                }
            }
        }
        matched
    }

    fn collect(&self, set: &HashSet<RuleId>, out: &mut HashSet<String>) {
        for rule in set {
            out.insert(self.records[rule].client.clone());
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = node;
                id
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, node: NodeId) {
        self.nodes[node] = Node::default();
        self.free.push(node);
    }
}
