//! Octree color histogram.
//!
//! Each level of the tree splits the RGB cube on one bit plane, starting at
//! bit 7. Leaves sit at bit 2, so colors differing only in their three low
//! bits share a leaf. Reduction collapses the least populated subtrees first,
//! finest level first, which keeps frequent colors accurate.
//!
//! Nodes live in an arena and refer to their children by index.

use std::collections::BTreeSet;

use rgb::RGB8;

const ROOT_MASK: u8 = 0x80;
/// Nodes at this level are leaves.
const LEAF_MASK: u8 = 0x04;
/// The exact color set is dropped once it would grow past this.
const EXACT_SET_LIMIT: usize = 256;

type NodeId = u32;

#[derive(Debug, Clone)]
struct Node {
    /// Bit tested to pick a child; for leaves, the level they stand for.
    mask: u8,
    pixel_count: u64,
    r_sum: u64,
    g_sum: u64,
    b_sum: u64,
    /// `None` for leaves.
    children: Option<[Option<NodeId>; 8]>,
}

impl Node {
    fn new(mask: u8) -> Self {
        Self {
            mask,
            pixel_count: 0,
            r_sum: 0,
            g_sum: 0,
            b_sum: 0,
            children: if mask == LEAF_MASK { None } else { Some([None; 8]) },
        }
    }

    fn average(&self) -> RGB8 {
        let n = self.pixel_count.max(1) as f64;
        RGB8 {
            r: (self.r_sum as f64 / n).round() as u8,
            g: (self.g_sum as f64 / n).round() as u8,
            b: (self.b_sum as f64 / n).round() as u8,
        }
    }
}

/// Accumulates opaque pixels and reduces them to a bounded set of colors.
#[derive(Debug, Clone)]
pub struct ColorTree {
    nodes: Vec<Node>,
    leaf_count: usize,
    exact: Option<BTreeSet<u32>>,
    darkest: Option<(u32, RGB8)>,
}

impl Default for ColorTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ColorTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::new(ROOT_MASK)],
            leaf_count: 0,
            exact: Some(BTreeSet::new()),
            darkest: None,
        }
    }

    /// Number of pixels added so far.
    pub fn pixel_count(&self) -> u64 {
        self.nodes[0].pixel_count
    }

    /// Number of leaves in the tree. Each covers an 8x8x8 block of colors.
    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// Add one opaque pixel.
    pub fn put_pixel(&mut self, color: RGB8) {
        let mut id = 0usize;
        loop {
            let node = &mut self.nodes[id];
            node.pixel_count += 1;
            node.r_sum += color.r as u64;
            node.g_sum += color.g as u64;
            node.b_sum += color.b as u64;

            let mask = node.mask;
            let Some(children) = node.children.as_ref() else {
                break;
            };
            let slot = child_slot(color, mask);
            let existing = children[slot];
            id = match existing {
                Some(child) => child as usize,
                None => {
                    let child = self.push_node(Node::new(mask >> 1));
                    if let Some(children) = self.nodes[id].children.as_mut() {
                        children[slot] = Some(child);
                    }
                    child as usize
                }
            };
        }

        if let Some(exact) = self.exact.as_mut() {
            exact.insert(pack(color));
            if exact.len() > EXACT_SET_LIMIT {
                self.exact = None;
            }
        }

        let luma = luma(color);
        match self.darkest {
            Some((dark_luma, _)) if dark_luma <= luma => {}
            _ => self.darkest = Some((luma, color)),
        }
    }

    /// Reduce to at most `max_colors` colors, sorted ascending by `0xRRGGBB`.
    ///
    /// Returns the observed colors unchanged when there are few enough of
    /// them. Otherwise the darkest observed color is kept verbatim and the
    /// remaining slots are filled from the tree. Empty when no pixel was added.
    pub fn reduce_colors(mut self, max_colors: usize) -> Vec<RGB8> {
        if self.pixel_count() == 0 || max_colors == 0 {
            return Vec::new();
        }

        if let Some(exact) = self.exact.as_ref() {
            if exact.len() <= max_colors {
                tracing::trace!(colors = exact.len(), "histogram fits without reduction");
                return exact.iter().map(|&k| unpack(k)).collect();
            }
        }

        let tree_budget = max_colors - 1;
        let mut keys: Vec<u32> = Vec::with_capacity(max_colors);
        if tree_budget > 0 {
            let leaves_before = self.leaf_count;
            self.reduce_leaves(tree_budget);
            tracing::debug!(
                leaves_before,
                leaves_after = self.leaf_count,
                max_colors,
                "reduced color histogram"
            );
            let mut leaves = Vec::with_capacity(self.leaf_count);
            self.collect_leaves(0, &mut leaves);
            keys.extend(
                leaves
                    .into_iter()
                    .take(tree_budget)
                    .map(|id| pack(self.nodes[id as usize].average())),
            );
        }
        if let Some((_, darkest)) = self.darkest {
            keys.push(pack(darkest));
        }

        keys.sort_unstable();
        keys.dedup();
        keys.into_iter().map(unpack).collect()
    }

    fn push_node(&mut self, node: Node) -> NodeId {
        if node.children.is_none() {
            self.leaf_count += 1;
        }
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeId
    }

    /// Collapse subtrees level by level until at most `max_leaves` remain.
    fn reduce_leaves(&mut self, max_leaves: usize) {
        let mut level = LEAF_MASK;
        while self.leaf_count > max_leaves {
            let mut candidates = Vec::new();
            self.collect_internal_at(0, level, &mut candidates);
            // Stable sort keeps depth-first order among equal counts.
            candidates.sort_by_key(|&id| self.nodes[id as usize].pixel_count);
            for id in candidates {
                if self.leaf_count <= max_leaves {
                    break;
                }
                self.collapse(id, max_leaves);
            }
            if level == ROOT_MASK {
                break;
            }
            level <<= 1;
        }
    }

    /// Merge the children of `id`. If turning the whole node into a leaf
    /// would drop below `max_leaves`, only enough children are merged to
    /// land exactly on the budget.
    fn collapse(&mut self, id: NodeId, max_leaves: usize) {
        let Some(children) = self.nodes[id as usize].children else {
            return;
        };
        let present: Vec<NodeId> = children.iter().flatten().copied().collect();
        let n = present.len();

        if self.leaf_count + 1 - n >= max_leaves {
            self.nodes[id as usize].children = None;
            self.leaf_count = self.leaf_count + 1 - n;
            return;
        }

        let mut merged = Node::new(LEAF_MASK);
        merged.mask = self.nodes[id as usize].mask >> 1;
        let mut slots = children;
        for slot in slots.iter_mut() {
            let Some(child) = slot.take() else {
                continue;
            };
            let child = &self.nodes[child as usize];
            merged.pixel_count += child.pixel_count;
            merged.r_sum += child.r_sum;
            merged.g_sum += child.g_sum;
            merged.b_sum += child.b_sum;
            self.leaf_count -= 1;
            if self.leaf_count < max_leaves {
                break;
            }
        }
        if merged.pixel_count > 0 {
            merged.children = None;
            self.leaf_count += 1;
            self.nodes.push(merged);
            slots[0] = Some((self.nodes.len() - 1) as NodeId);
        }
        self.nodes[id as usize].children = Some(slots);
    }

    fn collect_internal_at(&self, id: NodeId, level: u8, out: &mut Vec<NodeId>) {
        let node = &self.nodes[id as usize];
        let Some(children) = node.children.as_ref() else {
            return;
        };
        for &child in children.iter().flatten() {
            self.collect_internal_at(child, level, out);
        }
        if node.mask == level {
            out.push(id);
        }
    }

    fn collect_leaves(&self, id: NodeId, out: &mut Vec<NodeId>) {
        match self.nodes[id as usize].children.as_ref() {
            Some(children) => {
                for &child in children.iter().flatten() {
                    self.collect_leaves(child, out);
                }
            }
            None => out.push(id),
        }
    }
}

#[inline]
fn child_slot(color: RGB8, mask: u8) -> usize {
    let mut slot = 0;
    if color.r & mask != 0 {
        slot += 4;
    }
    if color.g & mask != 0 {
        slot += 2;
    }
    if color.b & mask != 0 {
        slot += 1;
    }
    slot
}

/// Rec. 601 luma scaled by 1000.
#[inline]
fn luma(color: RGB8) -> u32 {
    299 * color.r as u32 + 587 * color.g as u32 + 114 * color.b as u32
}

#[inline]
fn pack(color: RGB8) -> u32 {
    (color.r as u32) << 16 | (color.g as u32) << 8 | color.b as u32
}

#[inline]
fn unpack(key: u32) -> RGB8 {
    RGB8 {
        r: (key >> 16) as u8,
        g: (key >> 8) as u8,
        b: key as u8,
    }
}
