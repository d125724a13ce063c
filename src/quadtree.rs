//! Static point quadtree for position based lookups.
//!
//! The tree is bulk-built once from a [`PointSource`] and is read-only
//! afterwards, which makes it safe to share across request handlers without
//! synchronisation. Queries visit indices into the original source through a
//! callback that may abort the traversal early by returning `false`.

/// Provides positions for a quadtree.
pub trait PointSource {
    /// Number of elements.
    fn len(&self) -> usize;

    /// Position of the ith element.
    fn at(&self, i: usize) -> (f64, f64);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Construction options for [`Quadtree`].
#[derive(Debug, Clone, Default)]
pub struct QuadtreeOptions {
    max_leaf: Option<usize>,
    min_dist: Option<f64>,
    max_depth: Option<u32>,
}

impl QuadtreeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum leaf length before a node is subdivided. Defaults to 16.
    pub fn with_max_leaf(mut self, n: usize) -> Self {
        self.max_leaf = Some(n);
        self
    }

    /// Minimum node side length that may still be subdivided.
    pub fn with_min_dist(mut self, d: f64) -> Self {
        self.min_dist = Some(d);
        self
    }

    /// Maximum tree depth; derives the minimum node size from the root side.
    /// Zero means no subdivision. Ignored when `with_min_dist` is also set.
    pub fn with_max_depth(mut self, d: u32) -> Self {
        self.max_depth = Some(d);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Pt {
    x: f64,
    y: f64,
}

#[derive(Debug)]
struct Node {
    min: Pt,
    max: Pt,
    /// 0 to 4 subtrees; empty quadrants are omitted.
    children: Vec<Node>,
    /// Indices into the source, only populated on leaf nodes.
    leaves: Vec<usize>,
}

/// A data structure for efficient position based lookups.
#[derive(Debug)]
pub struct Quadtree {
    pts: Vec<Pt>,
    root: Node,
    max_leaf: usize,
    min_dist: f64,
}

impl Quadtree {
    pub fn new(src: &dyn PointSource) -> Self {
        Self::with_options(src, QuadtreeOptions::default())
    }

    pub fn with_options(src: &dyn PointSource, opts: QuadtreeOptions) -> Self {
        let pts: Vec<Pt> = (0..src.len())
            .map(|i| {
                let (x, y) = src.at(i);
                Pt { x, y }
            })
            .collect();

        let (mut min, mut max) = match pts.first() {
            Some(p) => (*p, *p),
            None => (Pt { x: 0.0, y: 0.0 }, Pt { x: 0.0, y: 0.0 }),
        };
        for p in pts.iter().skip(1) {
            min.x = min.x.min(p.x);
            min.y = min.y.min(p.y);
            max.x = max.x.max(p.x);
            max.y = max.y.max(p.y);
        }

        // expand the shorter side so the root node is a square
        let (sx, sy) = (max.x - min.x, max.y - min.y);
        let size;
        if sx > sy {
            size = sx;
            let cy = (min.y + max.y) / 2.0;
            min.y = min.y.min(cy - size / 2.0);
            max.y = max.y.max(cy + size / 2.0);
        } else {
            size = sy;
            let cx = (min.x + max.x) / 2.0;
            min.x = min.x.min(cx - size / 2.0);
            max.x = max.x.max(cx + size / 2.0);
        }

        let leaves: Vec<usize> = (0..pts.len()).collect();

        let max_leaf = opts.max_leaf.unwrap_or(16);
        let min_dist = match (opts.min_dist, opts.max_depth) {
            (Some(d), _) => d,
            (None, Some(depth)) => size / 2f64.powi(depth as i32),
            (None, None) => size / 2f64.powi(24),
        };

        let qt = Quadtree {
            pts,
            root: Node {
                min,
                max,
                children: Vec::new(),
                leaves: Vec::new(),
            },
            max_leaf,
            min_dist,
        };

        let mut root = Node {
            min,
            max,
            children: Vec::new(),
            leaves,
        };
        qt.subdivide(&mut root);

        Quadtree { root, ..qt }
    }

    /// Like [`Quadtree::rect_fn`], but `f` may also be called with indices
    /// outside the query rectangle. Useful for callers that filter cheaply
    /// themselves, or whose query already carries a safety margin.
    pub fn near_fn<F: FnMut(usize) -> bool>(
        &self,
        minx: f64,
        miny: f64,
        maxx: f64,
        maxy: f64,
        mut f: F,
    ) {
        self.query(
            &self.root,
            Pt { x: minx, y: miny },
            Pt { x: maxx, y: maxy },
            &mut f,
        );
    }

    /// Calls `f(i)` for every index whose position lies within the rectangle
    /// `minx, miny, maxx, maxy` (inclusive). `f` returning `false` aborts
    /// the traversal.
    pub fn rect_fn<F: FnMut(usize) -> bool>(
        &self,
        minx: f64,
        miny: f64,
        maxx: f64,
        maxy: f64,
        mut f: F,
    ) {
        self.near_fn(minx, miny, maxx, maxy, |i| {
            let p = self.pts[i];
            if minx <= p.x && p.x <= maxx && miny <= p.y && p.y <= maxy {
                f(i)
            } else {
                true
            }
        });
    }

    /// Calls `f(i)` for every index within the circle at `cx, cy` with
    /// radius `r`. `f` returning `false` aborts the traversal.
    pub fn circle_fn<F: FnMut(usize) -> bool>(&self, cx: f64, cy: f64, r: f64, mut f: F) {
        self.near_fn(cx - r, cy - r, cx + r, cy + r, |i| {
            let p = self.pts[i];
            let (dx, dy) = (p.x - cx, p.y - cy);
            if (dx * dx + dy * dy).sqrt() <= r {
                f(i)
            } else {
                true
            }
        });
    }

    pub fn near(&self, minx: f64, miny: f64, maxx: f64, maxy: f64) -> Vec<usize> {
        let mut v = Vec::new();
        self.near_fn(minx, miny, maxx, maxy, |i| {
            v.push(i);
            true
        });
        v
    }

    pub fn rect(&self, minx: f64, miny: f64, maxx: f64, maxy: f64) -> Vec<usize> {
        let mut v = Vec::new();
        self.rect_fn(minx, miny, maxx, maxy, |i| {
            v.push(i);
            true
        });
        v
    }

    pub fn circle(&self, cx: f64, cy: f64, r: f64) -> Vec<usize> {
        let mut v = Vec::new();
        self.circle_fn(cx, cy, r, |i| {
            v.push(i);
            true
        });
        v
    }

    fn query<F: FnMut(usize) -> bool>(&self, n: &Node, min: Pt, max: Pt, f: &mut F) -> bool {
        if max.x < n.min.x || n.max.x < min.x || max.y < n.min.y || n.max.y < min.y {
            return true;
        }
        if !n.children.is_empty() {
            for c in &n.children {
                if !self.query(c, min, max, f) {
                    return false;
                }
            }
        } else {
            for &i in &n.leaves {
                if !f(i) {
                    return false;
                }
            }
        }
        true
    }

    fn subdivide(&self, n: &mut Node) {
        if n.leaves.len() < self.max_leaf || n.min.x + self.min_dist >= n.max.x {
            return; // no need to or cannot subdivide
        }

        let center = Pt {
            x: (n.min.x + n.max.x) / 2.0,
            y: (n.min.y + n.max.y) / 2.0,
        };

        // Quadrant layout around the center:
        //  0 | 1
        // ---+---
        //  2 | 3
        let quad = |i: usize| -> usize {
            let p = self.pts[i];
            (center.x <= p.x) as usize + 2 * ((center.y <= p.y) as usize)
        };

        let mut leaves = std::mem::take(&mut n.leaves);
        leaves.sort_by_key(|&i| quad(i));

        let mut children: Vec<Node> = Vec::with_capacity(4);
        let mut last_qi = usize::MAX;
        for i in leaves {
            let qi = quad(i);
            if qi != last_qi {
                let (min, max) = match qi {
                    0 => (n.min, center),
                    1 => (
                        Pt {
                            x: center.x,
                            y: n.min.y,
                        },
                        Pt {
                            x: n.max.x,
                            y: center.y,
                        },
                    ),
                    2 => (
                        Pt {
                            x: n.min.x,
                            y: center.y,
                        },
                        Pt {
                            x: center.x,
                            y: n.max.y,
                        },
                    ),
                    _ => (center, n.max),
                };
                children.push(Node {
                    min,
                    max,
                    children: Vec::new(),
                    leaves: vec![i],
                });
                last_qi = qi;
            } else {
                children.last_mut().unwrap().leaves.push(i);
            }
        }

        for c in &mut children {
            self.subdivide(c);
        }
        n.children = children;
    }
}
