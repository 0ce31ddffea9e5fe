//! Arena model of the document's edit history.
//!
//! Every issued [`StateId`] is recorded with its parent, its sentence and a
//! liveness bit. Nothing is ever removed from the arena, so ids are never
//! reissued; cancelling only clears liveness for a whole subtree.

mod render;

pub use render::render_tree;

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;

use crate::protocol::StateId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("document has no root yet")]
    NotInitialized,

    #[error("state {0} is not live")]
    NotLive(StateId),

    #[error("the root state cannot be cancelled")]
    CannotCancelRoot,

    #[error("state {0} was already issued")]
    Reused(StateId),

    #[error("edit point and parent are mutually exclusive")]
    Ambiguous,
}

#[derive(Debug, Clone)]
struct Node {
    parent: Option<StateId>,
    text: String,
    live: bool,
}

/// Tree of states rooted at the state established by `Init`.
#[derive(Debug, Clone, Default)]
pub struct DocumentTree {
    nodes: BTreeMap<StateId, Node>,
    root: Option<StateId>,
    tip: Option<StateId>,
    next: u64,
}

impl DocumentTree {
    pub fn new() -> Self {
        Self {
            next: 1,
            ..Default::default()
        }
    }

    /// Issue a fresh root. Any previous document is discarded.
    pub fn init(&mut self) -> StateId {
        let id = self.issue();
        self.reset(id);
        id
    }

    /// Adopt `id`, issued elsewhere, as the new root.
    pub fn reset(&mut self, id: StateId) {
        for node in self.nodes.values_mut() {
            node.live = false;
        }
        self.bump(id);
        self.nodes.insert(
            id,
            Node {
                parent: None,
                text: String::new(),
                live: true,
            },
        );
        self.root = Some(id);
        self.tip = Some(id);
    }

    /// Append a sentence and return its new state.
    ///
    /// With `edit_at`, that state and every state issued after it are
    /// discarded first, other branches included, and the sentence takes its
    /// place under the same parent.
    pub fn add(
        &mut self,
        edit_at: Option<StateId>,
        parent: Option<StateId>,
        text: &str,
    ) -> Result<StateId, DocumentError> {
        let parent = self.resolve_parent(edit_at, parent)?;
        if let Some(edit_at) = edit_at {
            self.truncate(edit_at);
        }
        let id = self.issue();
        self.attach(id, parent, text);
        Ok(id)
    }

    /// Record a state issued elsewhere as a child of `parent` (or the tip).
    pub fn insert(
        &mut self,
        id: StateId,
        edit_at: Option<StateId>,
        parent: Option<StateId>,
        text: &str,
    ) -> Result<(), DocumentError> {
        if self.nodes.contains_key(&id) {
            return Err(DocumentError::Reused(id));
        }
        let parent = self.resolve_parent(edit_at, parent)?;
        if let Some(edit_at) = edit_at {
            self.truncate(edit_at);
        }
        self.bump(id);
        self.attach(id, parent, text);
        Ok(())
    }

    /// Remove `id` and its descendants. Returns the resulting tip.
    pub fn cancel(&mut self, id: StateId) -> Result<StateId, DocumentError> {
        self.ensure_live(id)?;
        if Some(id) == self.root {
            return Err(DocumentError::CannotCancelRoot);
        }
        let removed = self.subtree(id);
        for sid in &removed {
            if let Some(node) = self.nodes.get_mut(sid) {
                node.live = false;
            }
        }
        let tip = self.tip.ok_or(DocumentError::NotInitialized)?;
        if removed.contains(&tip) {
            self.tip = self.parent_of(id);
        }
        self.tip.ok_or(DocumentError::NotInitialized)
    }

    /// Roll back after a failure: `bad` and its descendants are removed and
    /// `good` becomes the tip.
    pub fn rollback(&mut self, good: StateId, bad: StateId) -> Result<(), DocumentError> {
        self.ensure_live(good)?;
        if self.is_live(bad) && Some(bad) != self.root {
            self.cancel(bad)?;
        }
        self.tip = Some(good);
        Ok(())
    }

    /// States from the root down to `id`, inclusive.
    pub fn path(&self, id: StateId) -> Result<Vec<StateId>, DocumentError> {
        self.ensure_live(id)?;
        let mut path = vec![id];
        let mut cursor = id;
        while let Some(parent) = self.parent_of(cursor) {
            path.push(parent);
            cursor = parent;
        }
        path.reverse();
        Ok(path)
    }

    pub fn root(&self) -> Option<StateId> {
        self.root
    }

    pub fn tip(&self) -> Option<StateId> {
        self.tip
    }

    pub fn is_live(&self, id: StateId) -> bool {
        self.nodes.get(&id).is_some_and(|n| n.live)
    }

    /// Whether `id` was ever issued, live or not.
    pub fn was_issued(&self, id: StateId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn parent_of(&self, id: StateId) -> Option<StateId> {
        self.nodes.get(&id).and_then(|n| n.parent)
    }

    pub fn text_of(&self, id: StateId) -> Option<&str> {
        self.nodes.get(&id).map(|n| n.text.as_str())
    }

    /// Live states in creation order.
    pub fn live_ids(&self) -> Vec<StateId> {
        self.nodes
            .iter()
            .filter(|(_, n)| n.live)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Live children of `id` in creation order.
    pub fn children(&self, id: StateId) -> Vec<StateId> {
        self.nodes
            .range(id..)
            .filter(|(_, n)| n.live && n.parent == Some(id))
            .map(|(sid, _)| *sid)
            .collect()
    }

    pub fn render(&self) -> String {
        render_tree(self)
    }

    fn resolve_parent(
        &self,
        edit_at: Option<StateId>,
        parent: Option<StateId>,
    ) -> Result<StateId, DocumentError> {
        let parent = match (edit_at, parent) {
            (Some(_), Some(_)) => return Err(DocumentError::Ambiguous),
            (Some(edit_at), None) => {
                self.ensure_live(edit_at)?;
                self.parent_of(edit_at)
                    .ok_or(DocumentError::CannotCancelRoot)?
            }
            (None, Some(parent)) => parent,
            (None, None) => self.tip.ok_or(DocumentError::NotInitialized)?,
        };
        self.ensure_live(parent)?;
        Ok(parent)
    }

    fn attach(&mut self, id: StateId, parent: StateId, text: &str) {
        self.nodes.insert(
            id,
            Node {
                parent: Some(parent),
                text: text.to_string(),
                live: true,
            },
        );
        self.tip = Some(id);
    }

    /// Drop `from` and every later state from the live set.
    fn truncate(&mut self, from: StateId) {
        for node in self.nodes.range_mut(from..).map(|(_, node)| node) {
            node.live = false;
        }
        self.tip = self.parent_of(from);
    }

    fn ensure_live(&self, id: StateId) -> Result<(), DocumentError> {
        if self.root.is_none() {
            return Err(DocumentError::NotInitialized);
        }
        if self.is_live(id) {
            Ok(())
        } else {
            Err(DocumentError::NotLive(id))
        }
    }

    /// Live descendants of `id`, including `id`. Children always have larger
    /// ids than their parents, so one ordered pass suffices.
    fn subtree(&self, id: StateId) -> BTreeSet<StateId> {
        let mut members = BTreeSet::from([id]);
        for (sid, node) in self.nodes.range(id..).skip(1) {
            if node.live && node.parent.is_some_and(|p| members.contains(&p)) {
                members.insert(*sid);
            }
        }
        members
    }

    fn issue(&mut self) -> StateId {
        let id = StateId(self.next.max(1));
        self.next = id.0.saturating_add(1);
        id
    }

    fn bump(&mut self, id: StateId) {
        self.next = self.next.max(id.0.saturating_add(1));
    }
}
