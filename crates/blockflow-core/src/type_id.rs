//! TypeId and IdentityRegistry for tag-based nominal typing.
//!
//! Every data type flowing through a block graph is identified by an opaque
//! [`TypeId`]. The [`IdentityRegistry`] binds each id to exactly one
//! human-readable tag and resolves tag collisions by merging ids. The registry
//! only owns the two maps; rewriting references held by ports is done by
//! [`FlowGraph::bind`](crate::graph::FlowGraph::bind), which acts on the
//! [`BindOutcome`] returned here.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::naming::{next_free, sanitize_caption};

/// Opaque, totally ordered identifier of a data type.
///
/// [`TypeId::NONE`] is the sentinel for untyped or disconnected ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeId(pub i32);

impl TypeId {
    /// Sentinel for "no type". Always bound to [`NONE_TAG`].
    pub const NONE: TypeId = TypeId(-1);

    /// Returns `true` for the sentinel.
    pub fn is_none(self) -> bool {
        self == TypeId::NONE
    }
}

/// Tag bound to [`TypeId::NONE`].
pub const NONE_TAG: &str = "data_none";

/// Prefix of tags generated by [`IdentityRegistry::create_uid`].
const AUTO_TAG_PREFIX: &str = "data";

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// What [`IdentityRegistry::bind`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindOutcome {
    /// The sentinel id or tag was involved; nothing changed.
    Ignored,
    /// The id was unbound and is now bound to `tag`.
    Created { tag: String },
    /// The id kept its identity and moved from `old` to `new`.
    Renamed { old: String, new: String },
    /// The tag already resolved to this id.
    Unchanged,
    /// Two ids collided on one tag; `removed` no longer exists and every
    /// reference to it must be rewritten to `kept`.
    Merged { kept: TypeId, removed: TypeId },
}

impl BindOutcome {
    /// Returns `true` when display names derived from tags may be stale.
    pub fn changes_display(&self) -> bool {
        matches!(self, BindOutcome::Renamed { .. } | BindOutcome::Merged { .. })
    }
}

/// Bidirectional TypeId <-> tag registry owned by one graph.
///
/// Both maps always contain the sentinel pair `(NONE, "data_none")` and are
/// otherwise exact inverses of each other.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    uid_to_tag: BTreeMap<TypeId, String>,
    tag_to_uid: BTreeMap<String, TypeId>,
    /// source hash -> (id recorded in the artifact -> live id)
    load_cache: HashMap<String, HashMap<i64, TypeId>>,
}

impl IdentityRegistry {
    /// Creates a registry holding only the sentinel pair.
    pub fn new() -> Self {
        let mut uid_to_tag = BTreeMap::new();
        uid_to_tag.insert(TypeId::NONE, NONE_TAG.to_string());
        let mut tag_to_uid = BTreeMap::new();
        tag_to_uid.insert(NONE_TAG.to_string(), TypeId::NONE);

        IdentityRegistry {
            uid_to_tag,
            tag_to_uid,
            load_cache: HashMap::new(),
        }
    }

    /// Allocates the next unused id and binds it to an auto-generated tag.
    pub fn create_uid(&mut self) -> TypeId {
        let id = self.next_uid();
        let tag = self.unique_tag(&format!("{}_{}", AUTO_TAG_PREFIX, id.0));
        self.insert(id, tag);
        id
    }

    /// Allocates the next unused id and binds it to `tag`, disambiguated with
    /// `_2`, `_3`, … when the tag is already taken.
    ///
    /// The tag is sanitized first; a tag that sanitizes to nothing falls back
    /// to the auto-generated one.
    pub fn create_uid_with_tag(&mut self, tag: &str) -> TypeId {
        let clean = sanitize_caption(tag);
        if clean.is_empty() {
            return self.create_uid();
        }
        let id = self.next_uid();
        let tag = self.unique_tag(&clean);
        self.insert(id, tag);
        id
    }

    /// Returns the tag bound to `id`, or [`NONE_TAG`] when unbound.
    pub fn tag(&self, id: TypeId) -> &str {
        self.uid_to_tag
            .get(&id)
            .map(String::as_str)
            .unwrap_or(NONE_TAG)
    }

    /// Returns the id bound to `tag`, or [`TypeId::NONE`] when unbound.
    pub fn uid(&self, tag: &str) -> TypeId {
        self.tag_to_uid.get(tag).copied().unwrap_or(TypeId::NONE)
    }

    /// Returns `true` if `id` is bound (the sentinel always is).
    pub fn contains(&self, id: TypeId) -> bool {
        self.uid_to_tag.contains_key(&id)
    }

    /// Number of bound ids, excluding the sentinel.
    pub fn len(&self) -> usize {
        self.uid_to_tag.len() - 1
    }

    /// Returns `true` when only the sentinel is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates over every `(id, tag)` pair except the sentinel, ordered by id.
    pub fn entries(&self) -> impl Iterator<Item = (TypeId, &str)> {
        self.uid_to_tag
            .iter()
            .filter(|(id, _)| !id.is_none())
            .map(|(id, tag)| (*id, tag.as_str()))
    }

    /// Binds `tag` to `id`, renaming or merging as needed.
    ///
    /// This only updates the registry. A [`BindOutcome::Merged`] result means
    /// references to the removed id still exist in the caller's graph; use
    /// [`FlowGraph::bind`](crate::graph::FlowGraph::bind) to rewrite them.
    pub fn bind(&mut self, id: TypeId, tag: &str) -> BindOutcome {
        let tag = sanitize_caption(tag);
        if id.is_none() || tag == NONE_TAG || tag.is_empty() {
            return BindOutcome::Ignored;
        }

        let Some(current) = self.uid_to_tag.get(&id).cloned() else {
            // Fresh binding. A taken tag is disambiguated so the maps stay
            // inverse to each other.
            let tag = self.unique_tag(&tag);
            self.insert(id, tag.clone());
            tracing::debug!(%id, %tag, "bound fresh type id");
            return BindOutcome::Created { tag };
        };

        match self.tag_to_uid.get(&tag).copied() {
            None => {
                self.tag_to_uid.remove(&current);
                self.insert(id, tag.clone());
                tracing::debug!(%id, old = %current, new = %tag, "renamed type tag");
                BindOutcome::Renamed {
                    old: current,
                    new: tag,
                }
            }
            Some(owner) if owner == id => BindOutcome::Unchanged,
            Some(other) => {
                let kept = id.min(other);
                let removed = id.max(other);
                if let Some(removed_tag) = self.uid_to_tag.remove(&removed) {
                    self.tag_to_uid.remove(&removed_tag);
                }
                // Re-key the cache so later artifact loads resolve to the
                // surviving id.
                for mapping in self.load_cache.values_mut() {
                    for live in mapping.values_mut() {
                        if *live == removed {
                            *live = kept;
                        }
                    }
                }
                tracing::debug!(%kept, %removed, %tag, "merged type ids");
                BindOutcome::Merged { kept, removed }
            }
        }
    }

    /// Maps an id recorded inside a serialized function artifact to a live id.
    ///
    /// The first encounter of `(source_hash, original_id)` allocates a fresh id;
    /// every later encounter returns the same one. Artifacts without a hash
    /// map to [`TypeId::NONE`].
    pub fn get_or_create_uid_on_load(&mut self, source_hash: &str, original_id: i64) -> TypeId {
        if source_hash.is_empty() {
            return TypeId::NONE;
        }
        if let Some(id) = self
            .load_cache
            .get(source_hash)
            .and_then(|mapping| mapping.get(&original_id))
        {
            return *id;
        }
        let id = self.create_uid();
        self.load_cache
            .entry(source_hash.to_string())
            .or_default()
            .insert(original_id, id);
        id
    }

    /// Joins the tags of `ids` with `", "`, for diagnostics.
    pub fn describe(&self, ids: &[TypeId]) -> String {
        ids.iter()
            .map(|id| self.tag(*id))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Checks that both maps are inverses of each other and that the
    /// sentinel pair is present.
    pub fn is_consistent(&self) -> bool {
        self.uid_to_tag.len() == self.tag_to_uid.len()
            && self.uid_to_tag.get(&TypeId::NONE).map(String::as_str) == Some(NONE_TAG)
            && self
                .uid_to_tag
                .iter()
                .all(|(id, tag)| self.tag_to_uid.get(tag) == Some(id))
    }

    fn next_uid(&self) -> TypeId {
        self.uid_to_tag
            .keys()
            .next_back()
            .map(|last| TypeId(last.0 + 1))
            .unwrap_or(TypeId(0))
    }

    fn unique_tag(&self, base: &str) -> String {
        next_free(base, |candidate| self.tag_to_uid.contains_key(candidate))
    }

    fn insert(&mut self, id: TypeId, tag: String) {
        self.tag_to_uid.insert(tag.clone(), id);
        self.uid_to_tag.insert(id, tag);
    }
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
