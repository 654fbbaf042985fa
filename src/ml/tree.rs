//! Regression trees over gradient statistics
//!
//! Every tree-based family reduces to the same builder:
//! - boosting passes log-loss gradients and hessians
//! - the random forest passes `g = -y`, `h = 1`, which turns the gain into
//!   variance reduction and the leaf value into the mean label
//!
//! Split search is either exact (sorted scan over raw values) or over
//! pre-computed quantile bins. Growth always expands the open leaf with the
//! highest gain first; without a leaf limit that yields the same tree as
//! level-by-level growth.

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Binary tree stored as an arena; node 0 is the root
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

impl RegressionTree {
    /// Rows with `x[feature] <= threshold` go left
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let x = features.get(*feature).copied().unwrap_or(f64::NAN);
                    idx = if x <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n, Node::Leaf { .. })).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes.get(idx) {
                Some(Node::Split { left, right, .. }) => 1 + walk(nodes, *left).max(walk(nodes, *right)),
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Growth limits and regularization
#[derive(Debug, Clone)]
pub(crate) struct TreeParams {
    pub max_depth: usize,
    pub max_leaves: Option<usize>,
    /// L2 penalty on leaf values
    pub lambda: f64,
    /// Minimum gain to accept a split
    pub gamma: f64,
    pub min_child_weight: f64,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Random feature subset drawn at every split
    pub features_per_split: Option<usize>,
}

/// Quantile bins per feature: `bins[f][row]` indexes `edges[f]`, and a value
/// falls in the first bin whose upper edge is >= the value
#[derive(Debug, Clone)]
pub(crate) struct FeatureBins {
    edges: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl FeatureBins {
    pub fn new(x: &[&[f64]], max_bin: usize) -> Self {
        let max_bin = max_bin.clamp(2, u16::MAX as usize);
        let width = x.first().map(|r| r.len()).unwrap_or(0);
        let mut edges = Vec::with_capacity(width);
        let mut bins = Vec::with_capacity(width);

        for f in 0..width {
            let mut values: Vec<f64> = x.iter().map(|r| r[f]).collect();
            values.sort_by(|a, b| a.total_cmp(b));

            let mut unique = values.clone();
            unique.dedup();

            let feature_edges = if unique.len() <= max_bin {
                unique
            } else {
                let mut quantiles: Vec<f64> = (1..=max_bin)
                    .map(|k| values[(k * values.len() / max_bin).saturating_sub(1)])
                    .collect();
                quantiles.dedup();
                if let Some(&max) = values.last() {
                    if quantiles.last() != Some(&max) {
                        quantiles.push(max);
                    }
                }
                quantiles
            };

            let last = feature_edges.len().saturating_sub(1);
            let feature_bins = x
                .iter()
                .map(|r| feature_edges.partition_point(|e| *e < r[f]).min(last) as u16)
                .collect();

            edges.push(feature_edges);
            bins.push(feature_bins);
        }

        Self { edges, bins }
    }
}

pub(crate) enum SplitSearch<'a> {
    Exact,
    Histogram(&'a FeatureBins),
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

struct OpenLeaf {
    node: usize,
    rows: Vec<usize>,
    depth: usize,
    best: Option<SplitCandidate>,
}

pub(crate) struct TreeBuilder<'a> {
    pub x: &'a [&'a [f64]],
    pub grad: &'a [f64],
    pub hess: &'a [f64],
    pub params: &'a TreeParams,
    pub search: SplitSearch<'a>,
    /// Features this tree may split on
    pub features: &'a [usize],
}

impl<'a> TreeBuilder<'a> {
    /// Grow one tree over `rows` (indices into `x`, repeats allowed).
    /// Returns the tree and the total gain credited to each feature.
    pub fn grow(&self, rows: Vec<usize>, rng: &mut StdRng) -> (RegressionTree, Vec<f64>) {
        let width = self.x.first().map(|r| r.len()).unwrap_or(0);
        let mut importance = vec![0.0; width];
        let mut nodes = vec![Node::Leaf {
            value: self.leaf_value(&rows),
        }];
        let mut open = vec![self.open_leaf(0, rows, 0, rng)];
        let mut leaves = 1;

        while self.params.max_leaves.map_or(true, |max| leaves < max) {
            let next = open
                .iter()
                .enumerate()
                .filter_map(|(i, leaf)| leaf.best.map(|b| (i, b.gain)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i);
            let Some(pos) = next else { break };

            let leaf = open.swap_remove(pos);
            let Some(split) = leaf.best else { continue };
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = leaf
                .rows
                .iter()
                .partition(|&&i| self.x[i][split.feature] <= split.threshold);
            if left_rows.is_empty() || right_rows.is_empty() {
                continue;
            }

            let left = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(&left_rows),
            });
            let right = nodes.len();
            nodes.push(Node::Leaf {
                value: self.leaf_value(&right_rows),
            });
            nodes[leaf.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            importance[split.feature] += split.gain;
            leaves += 1;

            open.push(self.open_leaf(left, left_rows, leaf.depth + 1, rng));
            open.push(self.open_leaf(right, right_rows, leaf.depth + 1, rng));
        }

        (RegressionTree { nodes }, importance)
    }

    fn open_leaf(&self, node: usize, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> OpenLeaf {
        let splittable = depth < self.params.max_depth
            && rows.len() >= self.params.min_samples_split.max(2)
            && rows.len() >= 2 * self.params.min_samples_leaf.max(1);
        let best = if splittable {
            self.best_split(&rows, rng)
        } else {
            None
        };
        OpenLeaf {
            node,
            rows,
            depth,
            best,
        }
    }

    fn leaf_value(&self, rows: &[usize]) -> f64 {
        let (g, h) = self.sums(rows);
        let denom = h + self.params.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            -g / denom
        }
    }

    fn sums(&self, rows: &[usize]) -> (f64, f64) {
        rows.iter()
            .fold((0.0, 0.0), |(g, h), &i| (g + self.grad[i], h + self.hess[i]))
    }

    fn score(&self, g: f64, h: f64) -> f64 {
        let denom = h + self.params.lambda;
        if denom <= 0.0 {
            0.0
        } else {
            g * g / denom
        }
    }

    fn gain(&self, left: (f64, f64), right: (f64, f64), parent: f64) -> f64 {
        0.5 * (self.score(left.0, left.1) + self.score(right.0, right.1) - parent) - self.params.gamma
    }

    fn admissible(&self, n_left: usize, n_right: usize, h_left: f64, h_right: f64) -> bool {
        let min_leaf = self.params.min_samples_leaf.max(1);
        n_left >= min_leaf
            && n_right >= min_leaf
            && h_left >= self.params.min_child_weight
            && h_right >= self.params.min_child_weight
    }

    fn best_split(&self, rows: &[usize], rng: &mut StdRng) -> Option<SplitCandidate> {
        let (g, h) = self.sums(rows);
        let parent = self.score(g, h);

        let candidates = match self.params.features_per_split {
            Some(k) if k < self.features.len() => sample_without_replacement(self.features, k, rng),
            _ => self.features.to_vec(),
        };

        candidates
            .into_iter()
            .filter_map(|feature| match self.search {
                SplitSearch::Exact => self.exact_split(feature, rows, (g, h), parent),
                SplitSearch::Histogram(bins) => self.histogram_split(bins, feature, rows, (g, h), parent),
            })
            .filter(|c| c.gain > 1e-12)
            .max_by(|a, b| a.gain.total_cmp(&b.gain))
    }

    fn exact_split(&self, feature: usize, rows: &[usize], total: (f64, f64), parent: f64) -> Option<SplitCandidate> {
        let mut order = rows.to_vec();
        order.sort_by(|&a, &b| self.x[a][feature].total_cmp(&self.x[b][feature]));

        let n = order.len();
        let (mut gl, mut hl) = (0.0, 0.0);
        let mut best: Option<SplitCandidate> = None;

        for w in 0..n.saturating_sub(1) {
            let i = order[w];
            gl += self.grad[i];
            hl += self.hess[i];

            let value = self.x[i][feature];
            let next = self.x[order[w + 1]][feature];
            if value == next {
                continue;
            }

            let (gr, hr) = (total.0 - gl, total.1 - hl);
            if !self.admissible(w + 1, n - w - 1, hl, hr) {
                continue;
            }

            let gain = self.gain((gl, hl), (gr, hr), parent);
            if best.map_or(true, |b| gain > b.gain) {
                let mid = value + (next - value) / 2.0;
                let threshold = if mid < next { mid } else { value };
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    gain,
                });
            }
        }

        best
    }

    fn histogram_split(
        &self,
        bins: &FeatureBins,
        feature: usize,
        rows: &[usize],
        total: (f64, f64),
        parent: f64,
    ) -> Option<SplitCandidate> {
        let edges = &bins.edges[feature];
        let n_bins = edges.len();
        if n_bins < 2 {
            return None;
        }

        let mut hist = vec![(0.0, 0.0, 0usize); n_bins];
        for &i in rows {
            let b = bins.bins[feature][i] as usize;
            hist[b].0 += self.grad[i];
            hist[b].1 += self.hess[i];
            hist[b].2 += 1;
        }

        let n = rows.len();
        let (mut gl, mut hl, mut nl) = (0.0, 0.0, 0usize);
        let mut best: Option<SplitCandidate> = None;

        for (b, (g, h, count)) in hist.iter().enumerate().take(n_bins - 1) {
            gl += g;
            hl += h;
            nl += count;
            if *count == 0 || nl == n {
                continue;
            }

            let (gr, hr) = (total.0 - gl, total.1 - hl);
            if !self.admissible(nl, n - nl, hl, hr) {
                continue;
            }

            let gain = self.gain((gl, hl), (gr, hr), parent);
            if best.map_or(true, |c| gain > c.gain) {
                best = Some(SplitCandidate {
                    feature,
                    threshold: edges[b],
                    gain,
                });
            }
        }

        best
    }
}

/// Partial Fisher-Yates shuffle
pub(crate) fn sample_without_replacement(items: &[usize], k: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut pool = items.to_vec();
    let k = k.min(pool.len());
    for i in 0..k {
        let j = rng.random_range(i..pool.len());
        pool.swap(i, j);
    }
    pool.truncate(k);
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn params(max_leaves: Option<usize>) -> TreeParams {
        TreeParams {
            max_depth: 4,
            max_leaves,
            lambda: 0.0,
            gamma: 0.0,
            min_child_weight: 0.0,
            min_samples_split: 2,
            min_samples_leaf: 1,
            features_per_split: None,
        }
    }

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>, Vec<f64>) {
        // y = 1 when x0 > 5, x1 is noise
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64 / 2.0, (i * 7 % 5) as f64]).collect();
        let grad: Vec<f64> = x.iter().map(|r| if r[0] > 5.0 { -1.0 } else { 0.0 }).collect();
        let hess = vec![1.0; 20];
        (x, grad, hess)
    }

    #[test]
    fn test_exact_split_recovers_step() {
        let (x, grad, hess) = step_data();
        let rows: Vec<&[f64]> = x.iter().map(|r| r.as_slice()).collect();
        let p = params(None);
        let builder = TreeBuilder {
            x: &rows,
            grad: &grad,
            hess: &hess,
            params: &p,
            search: SplitSearch::Exact,
            features: &[0, 1],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let (tree, importance) = builder.grow((0..20).collect(), &mut rng);

        assert!((tree.predict(&[9.0, 0.0]) - 1.0).abs() < 1e-12);
        assert!(tree.predict(&[1.0, 0.0]).abs() < 1e-12);
        assert!(importance[0] > 0.0);
        assert_eq!(importance[1], 0.0);
    }

    #[test]
    fn test_histogram_split_matches_exact_on_step() {
        let (x, grad, hess) = step_data();
        let rows: Vec<&[f64]> = x.iter().map(|r| r.as_slice()).collect();
        let bins = FeatureBins::new(&rows, 8);
        let p = params(Some(4));
        let builder = TreeBuilder {
            x: &rows,
            grad: &grad,
            hess: &hess,
            params: &p,
            search: SplitSearch::Histogram(&bins),
            features: &[0, 1],
        };
        let mut rng = StdRng::seed_from_u64(1);
        let (tree, _) = builder.grow((0..20).collect(), &mut rng);

        assert!(tree.leaf_count() <= 4);
        assert!(tree.predict(&[9.5, 0.0]) > 0.5);
        assert!(tree.predict(&[0.0, 0.0]) < 0.5);
    }

    #[test]
    fn test_leaf_limit_and_depth_respected() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let rows: Vec<&[f64]> = x.iter().map(|r| r.as_slice()).collect();
        let grad: Vec<f64> = (0..64).map(|i| if i % 2 == 0 { -1.0 } else { 1.0 }).collect();
        let hess = vec![1.0; 64];

        let limited = params(Some(3));
        let builder = TreeBuilder {
            x: &rows,
            grad: &grad,
            hess: &hess,
            params: &limited,
            search: SplitSearch::Exact,
            features: &[0],
        };
        let mut rng = StdRng::seed_from_u64(3);
        let (tree, _) = builder.grow((0..64).collect(), &mut rng);
        assert!(tree.leaf_count() <= 3);
        assert!(tree.depth() <= 4);
    }

    #[test]
    fn test_bins_assign_values_to_upper_edges() {
        let x: Vec<Vec<f64>> = vec![vec![1.0], vec![2.0], vec![2.0], vec![3.0]];
        let rows: Vec<&[f64]> = x.iter().map(|r| r.as_slice()).collect();
        let bins = FeatureBins::new(&rows, 16);
        assert_eq!(bins.edges[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(bins.bins[0], vec![0, 1, 1, 2]);
    }

    #[test]
    fn test_sampling_without_replacement() {
        let mut rng = StdRng::seed_from_u64(9);
        let sample = sample_without_replacement(&[0, 1, 2, 3, 4, 5], 3, &mut rng);
        assert_eq!(sample.len(), 3);
        let mut sorted = sample.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 3);
    }
}
