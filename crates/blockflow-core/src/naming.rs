//! Caption sanitizing and the per-graph uniqueness index.
//!
//! Block captions and output-port captions double as identifiers in the
//! generated pipeline, so each must be unique within one graph. The
//! [`UniquenessIndex`] tracks which block (or which output port) owns each
//! caption and hands out `_2`, `_3`, … suffixed alternatives on collision.
//! It is updated incrementally by [`FlowGraph`](crate::graph::FlowGraph) and is
//! never rebuilt wholesale during editing.

use std::collections::HashMap;

use indexmap::IndexMap;

use crate::id::{BlockId, PortRef};

/// Strips every character outside `[A-Za-z0-9._-]`.
pub fn sanitize_caption(caption: &str) -> String {
    caption
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Returns `base` if it is free, otherwise the first free `base_N` for
/// `N = 2, 3, …`.
pub fn next_free(base: &str, is_taken: impl Fn(&str) -> bool) -> String {
    if !is_taken(base) {
        return base.to_string();
    }
    let mut counter = 2u32;
    loop {
        let candidate = format!("{}_{}", base, counter);
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

/// Caption ownership for one graph.
///
/// Both halves are injective: a caption has at most one owner and an owner
/// has at most one caption.
#[derive(Debug, Clone, Default)]
pub struct UniquenessIndex {
    block_owners: IndexMap<String, BlockId>,
    block_captions: HashMap<BlockId, String>,
    port_owners: IndexMap<String, PortRef>,
    port_captions: HashMap<PortRef, String>,
}

impl UniquenessIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `proposed` as the caption of `block`, returning the caption
    /// actually granted.
    pub fn claim_block_caption(&mut self, block: BlockId, proposed: &str) -> String {
        if self.block_owners.get(proposed) == Some(&block) {
            return proposed.to_string();
        }
        if let Some(old) = self.block_captions.remove(&block) {
            self.block_owners.shift_remove(&old);
        }
        let granted = next_free(proposed, |candidate| {
            self.block_owners
                .get(candidate)
                .is_some_and(|owner| *owner != block)
        });
        self.block_owners.insert(granted.clone(), block);
        self.block_captions.insert(block, granted.clone());
        granted
    }

    /// Registers `proposed` as the caption of the output port `port`,
    /// returning the caption actually granted.
    pub fn claim_port_caption(&mut self, port: PortRef, proposed: &str) -> String {
        if self.port_owners.get(proposed) == Some(&port) {
            return proposed.to_string();
        }
        if let Some(old) = self.port_captions.remove(&port) {
            self.port_owners.shift_remove(&old);
        }
        let granted = next_free(proposed, |candidate| {
            self.port_owners
                .get(candidate)
                .is_some_and(|owner| *owner != port)
        });
        self.port_owners.insert(granted.clone(), port);
        self.port_captions.insert(port, granted.clone());
        granted
    }

    /// Forgets the caption of output port `port` without shifting others.
    pub fn release_port(&mut self, port: PortRef) {
        if let Some(caption) = self.port_captions.remove(&port) {
            self.port_owners.shift_remove(&caption);
        }
    }

    /// Forgets output port `index` of `block` and shifts the block's later
    /// port entries down by one.
    pub fn remove_output(&mut self, block: BlockId, index: usize) {
        let removed = PortRef::new(block, index);
        if let Some(caption) = self.port_captions.remove(&removed) {
            self.port_owners.shift_remove(&caption);
        }

        let mut shifted: Vec<(PortRef, String)> = self
            .port_captions
            .iter()
            .filter(|(port, _)| port.block == block && port.index > index)
            .map(|(port, caption)| (*port, caption.clone()))
            .collect();
        shifted.sort_by_key(|(port, _)| port.index);

        for (port, caption) in shifted {
            self.port_captions.remove(&port);
            let moved = PortRef::new(block, port.index - 1);
            if let Some(owner) = self.port_owners.get_mut(&caption) {
                *owner = moved;
            }
            self.port_captions.insert(moved, caption);
        }
    }

    /// Forgets every caption owned by `block` or one of its ports.
    pub fn release_block(&mut self, block: BlockId) {
        if let Some(caption) = self.block_captions.remove(&block) {
            self.block_owners.shift_remove(&caption);
        }
        self.port_owners.retain(|_, owner| owner.block != block);
        self.port_captions.retain(|port, _| port.block != block);
    }

    /// Looks up the block owning `caption`.
    pub fn block_by_caption(&self, caption: &str) -> Option<BlockId> {
        self.block_owners.get(caption).copied()
    }

    /// Looks up the output port owning `caption`.
    pub fn port_by_caption(&self, caption: &str) -> Option<PortRef> {
        self.port_owners.get(caption).copied()
    }

    /// Caption currently registered for `block`.
    pub fn block_caption(&self, block: BlockId) -> Option<&str> {
        self.block_captions.get(&block).map(String::as_str)
    }

    /// Caption currently registered for output port `port`.
    pub fn port_caption(&self, port: PortRef) -> Option<&str> {
        self.port_captions.get(&port).map(String::as_str)
    }

    /// Checks that both halves of each map agree.
    pub fn is_consistent(&self) -> bool {
        self.block_owners.len() == self.block_captions.len()
            && self.port_owners.len() == self.port_captions.len()
            && self
                .block_owners
                .iter()
                .all(|(caption, block)| self.block_captions.get(block) == Some(caption))
            && self
                .port_owners
                .iter()
                .all(|(caption, port)| self.port_captions.get(port) == Some(caption))
    }
}
