//! Department tree resolution.
//!
//! The whole department table is loaded once per request and indexed both
//! ways (id -> row, parent -> children), so subtree and ancestor lookups are
//! plain in-memory walks. Every walk keeps a visited set: a corrupt table with
//! a parent cycle terminates instead of looping.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::department::{Department, SERVICE_CATEGORY};

pub const NAME_SEPARATOR: &str = " » ";

#[derive(Debug, Default)]
pub struct DepartmentTree {
    nodes: HashMap<i32, Department>,
    children: HashMap<i32, Vec<i32>>,
}

impl DepartmentTree {
    pub fn new(departments: Vec<Department>) -> Self {
        let mut children: HashMap<i32, Vec<i32>> = HashMap::new();
        for dept in &departments {
            if let Some(parent_id) = dept.parent_id {
                children.entry(parent_id).or_default().push(dept.id);
            }
        }
        for ids in children.values_mut() {
            ids.sort_unstable();
        }

        let nodes = departments.into_iter().map(|d| (d.id, d)).collect();
        DepartmentTree { nodes, children }
    }

    pub fn get(&self, id: i32) -> Option<&Department> {
        self.nodes.get(&id)
    }

    pub fn contains(&self, id: i32) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn has_children(&self, id: i32) -> bool {
        self.children.get(&id).map_or(false, |ids| !ids.is_empty())
    }

    /// `dept_id` plus every department below it. An unknown id resolves to
    /// itself alone.
    pub fn descendant_ids(&self, dept_id: i32) -> BTreeSet<i32> {
        let mut found = BTreeSet::new();
        let mut stack = vec![dept_id];

        while let Some(id) = stack.pop() {
            if !found.insert(id) {
                continue;
            }
            if let Some(kids) = self.children.get(&id) {
                stack.extend(kids.iter().copied());
            }
        }
        found
    }

    /// Walks parent pointers to the top of the tree. Unknown ids are returned
    /// unchanged; a dangling parent pointer stops at the last existing node.
    pub fn root_ancestor(&self, dept_id: i32) -> i32 {
        let mut seen = HashSet::new();
        let mut current = match self.nodes.get(&dept_id) {
            Some(dept) => dept,
            None => return dept_id,
        };

        while let Some(parent_id) = current.parent_id {
            if !seen.insert(current.id) {
                break;
            }
            match self.nodes.get(&parent_id) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current.id
    }

    /// First department at or above `dept_id` whose category marks it as a
    /// service.
    pub fn root_service(&self, dept_id: i32) -> Option<&Department> {
        self.ancestors(dept_id)
            .into_iter()
            .find(|dept| dept.category == SERVICE_CATEGORY)
    }

    /// `dept_id` followed by its parent, grandparent and so on.
    pub fn ancestors(&self, dept_id: i32) -> Vec<&Department> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(dept_id);

        while let Some(id) = next {
            if !seen.insert(id) {
                break;
            }
            match self.nodes.get(&id) {
                Some(dept) => {
                    chain.push(dept);
                    next = dept.parent_id;
                }
                None => break,
            }
        }
        chain
    }

    /// Ancestor names from the top down, e.g. `Operations » Transport Service`.
    pub fn full_name(&self, dept_id: i32) -> Option<String> {
        let chain = self.ancestors(dept_id);
        if chain.is_empty() {
            return None;
        }
        let names: Vec<&str> = chain.iter().rev().map(|d| d.name.as_str()).collect();
        Some(names.join(NAME_SEPARATOR))
    }

    /// True when re-parenting `dept_id` under `new_parent` would make the
    /// department its own ancestor.
    pub fn would_create_cycle(&self, dept_id: i32, new_parent: Option<i32>) -> bool {
        match new_parent {
            Some(parent_id) => self.descendant_ids(dept_id).contains(&parent_id),
            None => false,
        }
    }

    pub fn departments(&self) -> impl Iterator<Item = &Department> {
        self.nodes.values()
    }
}
