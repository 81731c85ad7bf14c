//! Mailbox hierarchy types.
//!
//! A [`MailboxTree`] is a point-in-time snapshot of an account's mailbox
//! hierarchy. Nodes live in an arena owned by the tree; children are stored
//! top-down and parent links are kept in a separate lookup table filled in a
//! single finalization pass once every node exists.

use serde::ser::{SerializeSeq, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

/// Hierarchy separator assumed when the server does not report one.
pub const DEFAULT_DELIMITER: &str = "/";

/// Nested mailbox structure as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeMailbox {
    /// Local name segment.
    pub name: String,
    /// Hierarchy separator, if the server reported one.
    pub delimiter: Option<String>,
    /// Server-reported attributes (e.g. `\Noselect`, `\HasChildren`).
    pub attributes: Vec<String>,
    /// Child mailboxes in server order.
    pub children: Vec<NativeMailbox>,
}

impl NativeMailbox {
    /// Creates a leaf mailbox with the given name and delimiter.
    pub fn new(name: impl Into<String>, delimiter: Option<&str>) -> Self {
        Self {
            name: name.into(),
            delimiter: delimiter.map(str::to_string),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Adds attributes.
    pub fn with_attributes<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attributes.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// Adds a child mailbox.
    pub fn with_child(mut self, child: NativeMailbox) -> Self {
        self.children.push(child);
        self
    }
}

/// Index of a node inside its [`MailboxTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MailboxId(usize);

#[derive(Debug, Clone)]
struct MailboxData {
    name: String,
    delimiter: String,
    flags: Vec<String>,
    children: Vec<MailboxId>,
}

/// Snapshot of a mailbox hierarchy.
///
/// Never refreshed; re-fetch after creating, renaming, or deleting mailboxes.
#[derive(Debug, Clone, Default)]
pub struct MailboxTree {
    nodes: Vec<MailboxData>,
    parents: Vec<Option<MailboxId>>,
    roots: Vec<MailboxId>,
}

impl MailboxTree {
    /// Builds a tree from the backend's nested structure.
    ///
    /// Backend order is preserved at every level.
    pub fn from_native(native: &[NativeMailbox]) -> Self {
        let mut tree = Self::default();
        let roots = native.iter().map(|mailbox| tree.insert(mailbox)).collect();
        tree.roots = roots;
        tree.link_parents();
        tree
    }

    fn insert(&mut self, native: &NativeMailbox) -> MailboxId {
        let children = native
            .children
            .iter()
            .map(|child| self.insert(child))
            .collect();

        let id = MailboxId(self.nodes.len());
        self.nodes.push(MailboxData {
            name: native.name.clone(),
            delimiter: native
                .delimiter
                .clone()
                .unwrap_or_else(|| DEFAULT_DELIMITER.to_string()),
            flags: native.attributes.clone(),
            children,
        });
        id
    }

    fn link_parents(&mut self) {
        let mut parents = vec![None; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            for child in &node.children {
                parents[child.0] = Some(MailboxId(index));
            }
        }
        self.parents = parents;
    }

    /// Returns the number of mailboxes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if the account has no mailboxes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the top-level mailboxes in backend order.
    pub fn roots(&self) -> impl Iterator<Item = MailboxNode<'_>> + '_ {
        self.roots.iter().map(move |id| self.node(*id))
    }

    /// Returns a view of the node with the given id.
    ///
    /// Accessing a view built from another tree's id panics.
    pub fn node(&self, id: MailboxId) -> MailboxNode<'_> {
        MailboxNode { tree: self, id }
    }

    /// Iterates every node depth-first, parents before children.
    pub fn iter(&self) -> impl Iterator<Item = MailboxNode<'_>> + '_ {
        let mut stack: Vec<MailboxId> = self.roots.iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let id = stack.pop()?;
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
            Some(self.node(id))
        })
    }

    /// Finds the mailbox whose full name equals `full_name`.
    ///
    /// Searches depth-first and only descends into nodes whose full name is a
    /// prefix of the target.
    pub fn find(&self, full_name: &str) -> Option<MailboxNode<'_>> {
        self.roots.iter().find_map(|id| self.find_from(*id, full_name))
    }

    fn find_from(&self, id: MailboxId, target: &str) -> Option<MailboxNode<'_>> {
        let node = self.node(id);
        let full_name = node.full_name();
        if full_name == target {
            return Some(node);
        }
        if !target.starts_with(&full_name) {
            return None;
        }
        self.nodes[id.0]
            .children
            .iter()
            .find_map(|child| self.find_from(*child, target))
    }

    /// Consumes the tree, keeping a handle to the node at `id`.
    pub fn into_mailbox(self, id: MailboxId) -> OwnedMailbox {
        OwnedMailbox { tree: self, id }
    }
}

impl Serialize for MailboxTree {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(self.roots.len()))?;
        for root in self.roots() {
            seq.serialize_element(&root)?;
        }
        seq.end()
    }
}

/// Borrowed view of one mailbox in a [`MailboxTree`].
#[derive(Clone, Copy)]
pub struct MailboxNode<'a> {
    tree: &'a MailboxTree,
    id: MailboxId,
}

impl<'a> MailboxNode<'a> {
    fn data(&self) -> &'a MailboxData {
        &self.tree.nodes[self.id.0]
    }

    /// Returns this node's id within its tree.
    pub fn id(&self) -> MailboxId {
        self.id
    }

    /// Local name segment.
    pub fn name(&self) -> &'a str {
        &self.data().name
    }

    /// Hierarchy separator.
    pub fn delimiter(&self) -> &'a str {
        &self.data().delimiter
    }

    /// Server-reported attributes.
    pub fn flags(&self) -> &'a [String] {
        &self.data().flags
    }

    /// Parent mailbox, or `None` at the root.
    pub fn parent(&self) -> Option<MailboxNode<'a>> {
        self.tree.parents[self.id.0].map(|id| self.tree.node(id))
    }

    /// Child mailboxes in backend order.
    pub fn children(&self) -> impl Iterator<Item = MailboxNode<'a>> + 'a {
        let tree = self.tree;
        self.data().children.iter().map(move |id| tree.node(*id))
    }

    /// Full hierarchical path: the parent's full name, this node's delimiter,
    /// then this node's name.
    pub fn full_name(&self) -> String {
        match self.parent() {
            Some(parent) => format!("{}{}{}", parent.full_name(), self.delimiter(), self.name()),
            None => self.name().to_string(),
        }
    }
}

impl std::fmt::Debug for MailboxNode<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxNode")
            .field("full_name", &self.full_name())
            .field("flags", &self.flags())
            .finish()
    }
}

impl Serialize for MailboxNode<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let children: Vec<MailboxNode<'_>> = self.children().collect();
        let mut state = serializer.serialize_struct("Mailbox", 4)?;
        state.serialize_field("name", self.name())?;
        state.serialize_field("flags", self.flags())?;
        state.serialize_field("delimiter", self.delimiter())?;
        state.serialize_field("children", &children)?;
        state.end()
    }
}

/// A single mailbox that keeps its tree alive, so path resolution still works.
#[derive(Debug, Clone)]
pub struct OwnedMailbox {
    tree: MailboxTree,
    id: MailboxId,
}

impl OwnedMailbox {
    /// Borrowed view of the mailbox.
    pub fn node(&self) -> MailboxNode<'_> {
        self.tree.node(self.id)
    }

    /// Full hierarchical path of the mailbox.
    pub fn full_name(&self) -> String {
        self.node().full_name()
    }
}

impl Serialize for OwnedMailbox {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.node().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<NativeMailbox> {
        vec![
            NativeMailbox::new("INBOX", Some("/"))
                .with_attributes(["\\HasChildren"])
                .with_child(NativeMailbox::new("Work", Some("/")).with_child(
                    NativeMailbox::new("Reports", Some("/")).with_attributes(["\\HasNoChildren"]),
                ))
                .with_child(NativeMailbox::new("Personal", Some("/"))),
            NativeMailbox::new("Sent", Some("/")).with_attributes(["\\Sent"]),
            NativeMailbox::new("Archive", None),
        ]
    }

    #[test]
    fn full_names_follow_parents() {
        let tree = MailboxTree::from_native(&sample());
        let names: Vec<String> = tree.iter().map(|node| node.full_name()).collect();
        assert_eq!(
            names,
            vec![
                "INBOX",
                "INBOX/Work",
                "INBOX/Work/Reports",
                "INBOX/Personal",
                "Sent",
                "Archive",
            ]
        );
    }

    #[test]
    fn every_node_has_consistent_parent() {
        let tree = MailboxTree::from_native(&sample());
        for node in tree.iter() {
            match node.parent() {
                Some(parent) => {
                    assert_eq!(
                        node.full_name(),
                        format!("{}{}{}", parent.full_name(), node.delimiter(), node.name())
                    );
                    assert!(parent.children().any(|child| child.id() == node.id()));
                }
                None => {
                    assert_eq!(node.full_name(), node.name());
                    assert!(tree.roots().any(|root| root.id() == node.id()));
                }
            }
        }
    }

    #[test]
    fn missing_delimiter_defaults_to_slash() {
        let tree = MailboxTree::from_native(&sample());
        let archive = tree.find("Archive").unwrap();
        assert_eq!(archive.delimiter(), "/");
    }

    #[test]
    fn custom_delimiter_is_used_in_full_name() {
        let native = vec![NativeMailbox::new("INBOX", Some("."))
            .with_child(NativeMailbox::new("Lists", Some(".")))];
        let tree = MailboxTree::from_native(&native);
        assert!(tree.find("INBOX.Lists").is_some());
        assert!(tree.find("INBOX/Lists").is_none());
    }

    #[test]
    fn find_exact_match_only() {
        let tree = MailboxTree::from_native(&sample());
        assert_eq!(tree.find("INBOX/Work/Reports").unwrap().name(), "Reports");
        assert!(tree.find("INBOX/Wor").is_none());
        assert!(tree.find("INBOX/Work/Reports/Q1").is_none());
        assert!(tree.find("Nope").is_none());
    }

    #[test]
    fn find_does_not_confuse_shared_prefixes() {
        let native = vec![
            NativeMailbox::new("foo", Some("/"))
                .with_child(NativeMailbox::new("bar", Some("/"))),
            NativeMailbox::new("food", Some("/"))
                .with_child(NativeMailbox::new("bar", Some("/"))),
        ];
        let tree = MailboxTree::from_native(&native);
        let node = tree.find("food/bar").unwrap();
        assert_eq!(node.parent().unwrap().name(), "food");
    }

    #[test]
    fn find_is_exhaustive_over_tree() {
        let tree = MailboxTree::from_native(&sample());
        for node in tree.iter() {
            let found = tree.find(&node.full_name()).unwrap();
            assert_eq!(found.id(), node.id());
        }
    }

    #[test]
    fn preserves_backend_order() {
        let native = vec![
            NativeMailbox::new("Zeta", Some("/")),
            NativeMailbox::new("Alpha", Some("/")),
        ];
        let tree = MailboxTree::from_native(&native);
        let names: Vec<&str> = tree.roots().map(|node| node.name()).collect();
        assert_eq!(names, vec!["Zeta", "Alpha"]);
    }

    #[test]
    fn serializes_projection_shape() {
        let native = vec![NativeMailbox::new("INBOX", Some("/"))
            .with_attributes(["\\HasChildren"])
            .with_child(NativeMailbox::new("Work", Some("/")))];
        let tree = MailboxTree::from_native(&native);

        let json = serde_json::to_value(&tree).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{
                "name": "INBOX",
                "flags": ["\\HasChildren"],
                "delimiter": "/",
                "children": [{
                    "name": "Work",
                    "flags": [],
                    "delimiter": "/",
                    "children": []
                }]
            }])
        );
    }

    #[test]
    fn owned_mailbox_keeps_full_name() {
        let tree = MailboxTree::from_native(&sample());
        let id = tree.find("INBOX/Work").unwrap().id();
        let owned = tree.into_mailbox(id);
        assert_eq!(owned.full_name(), "INBOX/Work");
        assert_eq!(owned.node().children().count(), 1);
    }

    #[test]
    fn empty_tree() {
        let tree = MailboxTree::from_native(&[]);
        assert!(tree.is_empty());
        assert!(tree.find("INBOX").is_none());
        assert_eq!(serde_json::to_string(&tree).unwrap(), "[]");
    }
}
