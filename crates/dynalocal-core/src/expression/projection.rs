//! Projection of document paths out of an item.
//!
//! Selected paths are merged into a tree first, so `a.b, a.c` yields one `a`
//! map holding both keys and `l[3], l[1]` yields a two-element list in index
//! order. Paths that do not exist in the item are skipped.

use std::collections::{BTreeMap, HashMap};

use dynalocal_model::{AttributeValue, Item};

use super::ast::{AttributePath, PathSegment};

/// Selection tree built from the projected paths.
#[derive(Debug)]
enum Node {
    /// Created but nothing selected yet.
    Empty,
    /// The whole value is selected.
    Leaf,
    /// Selected keys of a map.
    Map(BTreeMap<String, Node>),
    /// Selected indexes of a list.
    List(BTreeMap<usize, Node>),
}

impl Node {
    /// Merge one resolved path into the tree. A path below an already
    /// selected leaf, or one mixing keys and indexes at the same level, is
    /// ignored; analysis rejects both.
    fn insert(&mut self, segments: &[PathSegment<'_>]) {
        let Some((first, rest)) = segments.split_first() else {
            *self = Self::Leaf;
            return;
        };
        if matches!(self, Self::Empty) {
            *self = match first {
                PathSegment::Key(_) => Self::Map(BTreeMap::new()),
                PathSegment::Index(_) => Self::List(BTreeMap::new()),
            };
        }
        match (self, first) {
            (Self::Map(children), PathSegment::Key(key)) => children
                .entry((*key).to_owned())
                .or_insert(Self::Empty)
                .insert(rest),
            (Self::List(children), PathSegment::Index(idx)) => {
                children.entry(*idx).or_insert(Self::Empty).insert(rest);
            }
            _ => {}
        }
    }

    /// Copy the selected parts of `value`. Returns `None` when nothing
    /// selected exists.
    fn materialize(&self, value: &AttributeValue) -> Option<AttributeValue> {
        match (self, value) {
            (Self::Leaf, _) => Some(value.clone()),
            (Self::Map(children), AttributeValue::M(map)) => {
                let selected: HashMap<String, AttributeValue> = children
                    .iter()
                    .filter_map(|(key, child)| {
                        let value = map.get(key)?;
                        child.materialize(value).map(|v| (key.clone(), v))
                    })
                    .collect();
                (!selected.is_empty()).then_some(AttributeValue::M(selected))
            }
            (Self::List(children), AttributeValue::L(list)) => {
                let selected: Vec<AttributeValue> = children
                    .iter()
                    .filter_map(|(idx, child)| child.materialize(list.get(*idx)?))
                    .collect();
                (!selected.is_empty()).then_some(AttributeValue::L(selected))
            }
            _ => None,
        }
    }
}

/// Project `paths` out of `item`.
///
/// `#alias` elements are substituted through `names`; a path whose alias is
/// undefined is skipped.
#[must_use]
#[allow(clippy::implicit_hasher)]
pub fn project(paths: &[AttributePath], item: &Item, names: &HashMap<String, String>) -> Item {
    let mut roots: BTreeMap<String, Node> = BTreeMap::new();
    for path in paths {
        let Some(segments) = path.resolve(names) else {
            continue;
        };
        let Some((PathSegment::Key(name), rest)) = segments.split_first() else {
            continue;
        };
        roots
            .entry((*name).to_owned())
            .or_insert(Node::Empty)
            .insert(rest);
    }

    roots
        .iter()
        .filter_map(|(name, node)| {
            let value = item.get(name)?;
            node.materialize(value).map(|v| (name.clone(), v))
        })
        .collect()
}
