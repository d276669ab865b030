// tree.rs -- BSP tree storage
//
// Nodes and portals live in arenas owned by the Tree; everything
// refers to them by index. A node with planenum PLANENUM_LEAF is a
// leaf and owns its fragment brushes.

use crate::brushbsp::BspBrush;
use crate::map::Plane;
use log::debug;
use tmap_shared::defines::ContentFlags;
use tmap_shared::defines::SurfaceFlags;
use tmap_shared::math::Bounds;
use tmap_shared::winding::Winding;

pub const PLANENUM_LEAF: i32 = -1;

#[derive(Debug, Default)]
pub struct Node {
    pub planenum: i32,
    pub parent: Option<usize>,
    pub children: [Option<usize>; 2],
    /// Valid once portals exist; grown from portal windings.
    pub bounds: Bounds,
    pub contents: ContentFlags,
    /// Fragment brushes, only on leafs.
    pub brushes: Vec<BspBrush>,
    /// The node's convex region, carried during construction.
    pub volume: Option<BspBrush>,
    /// Surface flags of the chosen splitter (hint bookkeeping).
    pub split_surface_flags: SurfaceFlags,
    /// Portals bounding this node, as indices into the portal arena.
    pub portals: Vec<usize>,
    /// Faces built on this node, as indices into the face arena.
    pub faces: Vec<usize>,
}

impl Node {
    pub fn is_leaf(&self) -> bool {
        self.planenum == PLANENUM_LEAF
    }
}

/// The polygon between two BSP regions. `nodes[0]` is the node on the
/// front of the portal plane. A live portal is listed by both of its
/// nodes; a portal dropped from the node lists is dead.
#[derive(Debug, Default, Clone)]
pub struct Portal {
    pub plane: Plane,
    /// The node the portal was split on; None for the outside box.
    pub onnode: Option<usize>,
    pub nodes: [usize; 2],
    pub winding: Option<Winding>,
    /// True once side matching ran, whether or not it found one.
    pub sidefound: bool,
    pub side: Option<PortalSide>,
}

/// The brush side a portal shows, recorded for face emission.
#[derive(Debug, Clone)]
pub struct PortalSide {
    pub planenum: u16,
    pub texinfo: u16,
    pub surface_flags: SurfaceFlags,
    /// (brush, side) indices into the parsed map data.
    pub original: (usize, usize),
}

#[derive(Debug, Default)]
pub struct Tree {
    pub nodes: Vec<Node>,
    pub portals: Vec<Portal>,
    pub headnode: usize,
    /// Pseudo-node representing everything beyond the tile bounds.
    pub outside_node: usize,
    pub bounds: Bounds,
}

impl Tree {
    pub fn new() -> Self {
        Tree::default()
    }

    pub fn alloc_node(&mut self) -> usize {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }

    pub fn alloc_portal(&mut self) -> usize {
        self.portals.push(Portal::default());
        self.portals.len() - 1
    }

    pub fn node(&self, num: usize) -> &Node {
        &self.nodes[num]
    }

    pub fn node_mut(&mut self, num: usize) -> &mut Node {
        &mut self.nodes[num]
    }

    /// Links a portal into both of its bounding nodes. `front` is the
    /// node on the front of the portal plane.
    pub fn add_portal_to_nodes(&mut self, portal: usize, front: usize, back: usize) {
        debug_assert_ne!(front, back);
        self.portals[portal].nodes = [front, back];
        self.nodes[front].portals.push(portal);
        self.nodes[back].portals.push(portal);
    }

    /// Unlinks a portal from both of its nodes.
    pub fn remove_portal_from_nodes(&mut self, portal: usize) {
        for i in 0..2 {
            let node = self.portals[portal].nodes[i];
            self.nodes[node].portals.retain(|&p| p != portal);
        }
    }

    /// Walks up from `node`, returning true if any ancestor already
    /// splits on `planenum`.
    pub fn plane_used_by_parents(&self, mut node: usize, planenum: i32) -> bool {
        while let Some(parent) = self.nodes[node].parent {
            if self.nodes[parent].planenum == planenum {
                return true;
            }
            node = parent;
        }
        false
    }
}

/// Collapses nodes whose children are both solid leaves into a single
/// solid leaf. The interior structure of fully solid regions carries
/// no information.
pub fn prune_nodes(tree: &mut Tree, node: usize) {
    let mut pruned = 0;
    prune_r(tree, node, &mut pruned);
    if pruned > 0 {
        debug!("pruned {pruned} solid nodes");
    }
}

fn prune_r(tree: &mut Tree, node: usize, pruned: &mut usize) {
    if tree.nodes[node].is_leaf() {
        return;
    }
    let children = tree.nodes[node].children;
    for child in children.into_iter().flatten() {
        prune_r(tree, child, pruned);
    }

    let both_solid = children.into_iter().all(|c| match c {
        Some(c) => {
            let n = &tree.nodes[c];
            n.is_leaf()
                && n.contents.contains(ContentFlags::SOLID)
                && !n.contents.contains(ContentFlags::PASSABLE)
        }
        None => false,
    });
    if !both_solid {
        return;
    }

    // merge the children into this node and make it a solid leaf
    let mut brushes = Vec::new();
    let mut contents = ContentFlags::SOLID;
    for child in children.into_iter().flatten() {
        brushes.append(&mut tree.nodes[child].brushes);
        contents |= tree.nodes[child].contents;
    }
    let n = &mut tree.nodes[node];
    n.planenum = PLANENUM_LEAF;
    n.children = [None, None];
    n.brushes = brushes;
    n.contents = contents;
    n.faces.clear();
    *pruned += 1;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut Tree, contents: ContentFlags) -> usize {
        let n = tree.alloc_node();
        tree.nodes[n].planenum = PLANENUM_LEAF;
        tree.nodes[n].contents = contents;
        n
    }

    #[test]
    fn test_prune_merges_solid_children() {
        let mut tree = Tree::new();
        let head = tree.alloc_node();
        let a = leaf(&mut tree, ContentFlags::SOLID);
        let b = leaf(&mut tree, ContentFlags::SOLID | ContentFlags::LEVEL_1);
        tree.nodes[head].planenum = 0;
        tree.nodes[head].children = [Some(a), Some(b)];
        tree.nodes[a].parent = Some(head);
        tree.nodes[b].parent = Some(head);

        prune_nodes(&mut tree, head);
        assert!(tree.nodes[head].is_leaf());
        assert!(tree.nodes[head].contents.contains(ContentFlags::SOLID));
    }

    #[test]
    fn test_prune_keeps_mixed_children() {
        let mut tree = Tree::new();
        let head = tree.alloc_node();
        let a = leaf(&mut tree, ContentFlags::SOLID);
        let b = leaf(&mut tree, ContentFlags::empty());
        tree.nodes[head].planenum = 4;
        tree.nodes[head].children = [Some(a), Some(b)];
        tree.nodes[a].parent = Some(head);
        tree.nodes[b].parent = Some(head);

        prune_nodes(&mut tree, head);
        assert!(!tree.nodes[head].is_leaf());
    }

    #[test]
    fn test_plane_used_by_parents() {
        let mut tree = Tree::new();
        let head = tree.alloc_node();
        tree.nodes[head].planenum = 8;
        let child = tree.alloc_node();
        tree.nodes[child].parent = Some(head);
        tree.nodes[child].planenum = 2;
        assert!(tree.plane_used_by_parents(child, 8));
        assert!(!tree.plane_used_by_parents(child, 4));
    }
}
