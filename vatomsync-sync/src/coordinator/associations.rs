//! Parent/child links between cached objects.
//!
//! Objects may name a parent by id (a vAtom inside a folder, say). Links are
//! only resolvable once the parent is present, so a full sync rebuilds the
//! index after its last page and push events patch it incrementally.

use std::collections::{BTreeSet, HashMap, HashSet};
use vatomsync_types::DataObject;

/// Parent id meaning "top level".
pub const ROOT_PARENT: &str = ".";

#[derive(Debug, Default, Clone)]
pub struct AssociationIndex {
    parent_of: HashMap<String, String>,
    children: HashMap<String, BTreeSet<String>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the index with the links found in `objects`.
    ///
    /// Objects without a parent field are left out. Returns `(linked,
    /// unresolved)`: links whose parent is the root or a present object, and
    /// links whose parent is missing.
    pub fn rebuild(&mut self, objects: &[DataObject], parent_field: &str) -> (usize, usize) {
        self.parent_of.clear();
        self.children.clear();
        for object in objects {
            if let Some(parent) = object.get_str(parent_field) {
                self.link(&object.id, parent);
            }
        }
        let present: HashSet<&str> = objects.iter().map(|o| o.id.as_str()).collect();
        let unresolved = self
            .parent_of
            .values()
            .filter(|parent| !Self::resolves(parent, &present))
            .count();
        (self.parent_of.len() - unresolved, unresolved)
    }

    fn resolves(parent: &str, present: &HashSet<&str>) -> bool {
        parent == ROOT_PARENT || present.contains(parent)
    }

    /// Records that `child` now lives under `parent`.
    pub fn link(&mut self, child: &str, parent: &str) {
        if let Some(previous) = self.parent_of.insert(child.to_string(), parent.to_string()) {
            self.detach(child, &previous);
        }
        self.children
            .entry(parent.to_string())
            .or_default()
            .insert(child.to_string());
    }

    /// Drops every link to or from `id`. Its children keep pointing at it and
    /// become unresolved.
    pub fn forget(&mut self, id: &str) {
        if let Some(parent) = self.parent_of.remove(id) {
            self.detach(id, &parent);
        }
    }

    fn detach(&mut self, child: &str, parent: &str) {
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.remove(child);
            if siblings.is_empty() {
                self.children.remove(parent);
            }
        }
    }

    pub fn parent_of(&self, id: &str) -> Option<&str> {
        self.parent_of.get(id).map(String::as_str)
    }

    /// Ids of the direct children of `parent`, sorted.
    pub fn children_of(&self, parent: &str) -> Vec<String> {
        self.children
            .get(parent)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Children whose parent is neither the root nor one of `objects`.
    pub fn unresolved(&self, objects: &[DataObject]) -> Vec<String> {
        let present: HashSet<&str> = objects.iter().map(|o| o.id.as_str()).collect();
        let mut ids: Vec<String> = self
            .parent_of
            .iter()
            .filter(|(_, parent)| !Self::resolves(parent, &present))
            .map(|(child, _)| child.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.parent_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parent_of.is_empty()
    }
}
