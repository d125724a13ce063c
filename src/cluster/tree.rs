//! Hierarchical cluster tree over weighted points.
//!
//! Levels are built bottom-up by clustering with a doubling distance
//! threshold until a single root remains. Each node remembers the threshold
//! (`min_dist`) at which it was formed, so a query can stop descending once
//! the requested granularity is reached and emit one representative cluster
//! per visible region.

use super::{group_nearby, Cluster, ClusterSource, Point, Rect};

/// Read-only zoomable cluster hierarchy.
#[derive(Debug)]
pub struct ClusterTree {
    root: XNode,
    /// All source indices, laid out so every node's membership is one
    /// contiguous range.
    elem: Vec<usize>,
}

#[derive(Debug)]
struct XNode {
    center: Point,
    bounds: Rect,

    /// Children of this node are at least this far apart.
    min_dist: f64,

    children: Vec<XNode>,

    /// Range of this node's membership in `ClusterTree::elem`.
    start: usize,
    end: usize,
}

/// Intermediate node used while the levels are being merged.
struct BuildNode {
    center: Point,
    /// Total number of source elements below this node.
    weight: usize,
    bounds: Rect,
    min_dist: f64,
    children: Vec<BuildNode>,
    elems: Vec<usize>,
}

struct NodeSource<'a>(&'a [BuildNode]);

impl ClusterSource for NodeSource<'_> {
    fn len(&self) -> usize {
        self.0.len()
    }

    fn at(&self, i: usize) -> (f64, f64) {
        let c = self.0[i].center;
        (c.x, c.y)
    }

    fn weight(&self, i: usize) -> f64 {
        self.0[i].weight as f64
    }
}

impl ClusterTree {
    /// Builds the tree for `src`, merging from `min_dist` upwards.
    ///
    /// Panics when `src` is empty; callers are expected to reject sources
    /// with no elements up front.
    pub fn new<S: ClusterSource + ?Sized>(src: &S, min_dist: f64) -> Self {
        assert!(!src.is_empty(), "cluster tree needs at least one element");
        let root = make_tree(src, min_dist);
        let mut elem = Vec::with_capacity(src.len());
        let root = finalize(root, &mut elem);
        ClusterTree { root, elem }
    }

    /// Visits the coarsest clusters within `x0, y0, x1, y1` whose formation
    /// threshold is still at least `min_dist`. A `min_dist` of zero visits
    /// the leaf clustering.
    pub fn query<F: FnMut(Point, &[usize])>(
        &self,
        x0: f64,
        y0: f64,
        x1: f64,
        y1: f64,
        min_dist: f64,
        mut f: F,
    ) {
        let bounds = Rect::new(x0, y0, x1, y1);
        self.visit(&self.root, &bounds, min_dist, &mut f);
    }

    fn visit<F: FnMut(Point, &[usize])>(
        &self,
        n: &XNode,
        bounds: &Rect,
        min_dist: f64,
        f: &mut F,
    ) {
        if !bounds.overlaps(&n.bounds) {
            return;
        }
        let show_children = !n.children.iter().any(|c| c.min_dist < min_dist);
        if !show_children || n.children.is_empty() {
            f(n.center, &self.elem[n.start..n.end]);
            return;
        }
        for c in &n.children {
            self.visit(c, bounds, min_dist, f);
        }
    }
}

fn make_tree<S: ClusterSource + ?Sized>(src: &S, min_dist: f64) -> BuildNode {
    let mut dist = min_dist;
    let mut nodes: Vec<BuildNode> = group_nearby(src, dist)
        .into_iter()
        .map(|Cluster { center, elems }| BuildNode {
            center,
            weight: elems.len(),
            bounds: Rect::around(center, dist),
            min_dist: dist,
            children: Vec::new(),
            elems,
        })
        .collect();

    while nodes.len() > 1 {
        dist *= 2.0;
        let grps = group_nearby(&NodeSource(&nodes), dist);
        if grps.len() == nodes.len() {
            // nothing was merged at this threshold
            continue;
        }
        let mut below: Vec<Option<BuildNode>> = nodes.into_iter().map(Some).collect();
        nodes = Vec::with_capacity(grps.len());
        for grp in grps {
            let g = grp.elems;
            if g.len() == 1 {
                // promote the inner node to this level
                let mut node = below[g[0]].take().expect("node used twice");
                node.min_dist = dist;
                node.bounds.extend(Rect::around(node.center, dist));
                nodes.push(node);
            } else {
                let mut children = Vec::with_capacity(g.len());
                let mut nimg = 0;
                for &i in &g {
                    let n = below[i].take().expect("node used twice");
                    nimg += n.elems.len();
                    children.push(n);
                }
                let mut c = Point::default();
                let mut cw = 0usize;
                let mut bounds = Rect::default();
                let mut elems = Vec::with_capacity(nimg);
                for n in &children {
                    c.x += n.center.x * n.weight as f64;
                    c.y += n.center.y * n.weight as f64;
                    cw += n.weight;
                    bounds.extend(n.bounds);
                    elems.extend_from_slice(&n.elems);
                }
                c.x /= cw as f64;
                c.y /= cw as f64;
                bounds.extend(Rect::around(c, dist));
                nodes.push(BuildNode {
                    center: c,
                    weight: cw,
                    bounds,
                    min_dist: dist,
                    children,
                    elems,
                });
            }
        }
    }
    nodes.into_iter().next().expect("tree build left no root")
}

/// Flattens the membership lists into one shared vector; every node ends up
/// owning a contiguous `start..end` range covering its children's ranges.
fn finalize(n: BuildNode, elem: &mut Vec<usize>) -> XNode {
    let start = elem.len();
    let children = if n.children.is_empty() {
        elem.extend_from_slice(&n.elems);
        Vec::new()
    } else {
        n.children.into_iter().map(|c| finalize(c, elem)).collect()
    };
    XNode {
        center: n.center,
        bounds: n.bounds,
        min_dist: n.min_dist,
        children,
        start,
        end: elem.len(),
    }
}
