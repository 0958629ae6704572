//! Earth Mover's Distance via the transportation problem
//!
//! # How EMD Works
//!
//! Think of `h1` as piles of earth and `h2` as holes. Moving one unit from
//! pile `i` to hole `j` costs `D[i][j]`. The EMD is the cheapest total cost of
//! filling the holes, divided by the amount of earth moved:
//!
//! ```text
//! minimise   Σ F[i][j]·D[i][j]
//! subject to Σ_j F[i][j] <= h1[i]     (a pile cannot give more than it has)
//!            Σ_i F[i][j] >= h2[j]     (every hole gets filled)
//!            F >= 0
//! EMD = objective / min(Σh1, Σh2)
//! ```
//!
//! ## Balancing
//!
//! The heavier histogram is the supply side. The lighter side gets one extra
//! dummy bin holding the surplus, reachable from every supply bin at zero
//! cost, so the problem is always feasible and balanced. With balanced totals
//! and non-negative costs the inequality constraints are tight and the LP is
//! the classic balanced transportation problem.
//!
//! ## Solver
//!
//! Transportation simplex: a north-west corner basic solution, then MODI
//! potentials (`u_i + v_j = D[i][j]` on basic cells) to price the non-basic
//! cells, and stepping-stone pivots along the unique cycle the entering cell
//! closes in the basis tree. Degenerate pivots (zero flow moved) can cycle in
//! theory; after a run of them the entering rule switches to Bland's rule.

use crate::error::{Result, SimilarityError};
use crate::linalg::Matrix;
use std::collections::VecDeque;
use tracing::debug;

/// Relative tolerance on reduced costs and flows.
const TOLERANCE: f64 = 1e-12;

/// Earth Mover's Distance between two weighted histograms.
///
/// `ground` is `h1.len() × h2.len()`. Weights and ground distances must be
/// finite and non-negative, and both histograms must carry some mass.
pub fn earth_movers_distance(h1: &[f64], h2: &[f64], ground: &Matrix) -> Result<f64> {
    validate(h1, h2, ground)?;

    let total1: f64 = h1.iter().sum();
    let total2: f64 = h2.iter().sum();
    if total1 <= 0.0 || total2 <= 0.0 {
        return Err(SimilarityError::invalid("histogram carries no mass"));
    }

    // Supply must be the heavier side.
    if total1 < total2 {
        return earth_movers_distance(h2, h1, &ground.transpose());
    }

    let mut demand = h2.to_vec();
    let mut cost: Vec<Vec<f64>> = ground.iter_rows().map(|r| r.to_vec()).collect();
    if total1 > total2 {
        demand.push(total1 - total2);
        for row in &mut cost {
            row.push(0.0);
        }
    }

    let objective = TransportProblem::new(h1.to_vec(), demand, cost)?.solve()?;
    Ok(objective / total2)
}

fn validate(h1: &[f64], h2: &[f64], ground: &Matrix) -> Result<()> {
    if ground.rows() != h1.len() || ground.cols() != h2.len() {
        return Err(SimilarityError::invalid(format!(
            "ground distance matrix is {}x{} for histograms of {} and {} bins",
            ground.rows(),
            ground.cols(),
            h1.len(),
            h2.len()
        )));
    }
    if h1.is_empty() || h2.is_empty() {
        return Err(SimilarityError::invalid("histogram has no bins"));
    }
    if h1.iter().chain(h2).any(|w| !w.is_finite() || *w < 0.0) {
        return Err(SimilarityError::invalid("histogram weights must be finite and non-negative"));
    }
    if ground.as_slice().iter().any(|d| !d.is_finite() || *d < 0.0) {
        return Err(SimilarityError::invalid("ground distances must be finite and non-negative"));
    }
    Ok(())
}

/// Node in the bipartite basis tree: supply rows first, then demand columns.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Node {
    Row(usize),
    Col(usize),
}

struct TransportProblem {
    m: usize,
    n: usize,
    cost: Vec<Vec<f64>>,
    flow: Vec<Vec<f64>>,
    basic: Vec<Vec<bool>>,
    basis: Vec<(usize, usize)>,
    cost_tol: f64,
    flow_tol: f64,
}

impl TransportProblem {
    /// Build the problem and its north-west corner starting basis.
    fn new(mut supply: Vec<f64>, mut demand: Vec<f64>, cost: Vec<Vec<f64>>) -> Result<Self> {
        let m = supply.len();
        let n = demand.len();
        let total: f64 = supply.iter().sum();
        let max_cost = cost.iter().flatten().fold(0.0f64, |a, &c| a.max(c.abs()));

        let mut tp = Self {
            m,
            n,
            cost,
            flow: vec![vec![0.0; n]; m],
            basic: vec![vec![false; n]; m],
            basis: Vec::with_capacity(m + n - 1),
            cost_tol: TOLERANCE * max_cost.max(1.0),
            flow_tol: TOLERANCE * total.max(1.0),
        };

        // Exactly m + n - 1 cells: every step but the last advances one
        // row or one column, from (0, 0) to (m-1, n-1).
        let (mut i, mut j) = (0, 0);
        loop {
            let amount = supply[i].min(demand[j]);
            tp.flow[i][j] = amount;
            tp.basic[i][j] = true;
            tp.basis.push((i, j));
            supply[i] -= amount;
            demand[j] -= amount;

            if i + 1 < m && (supply[i] <= tp.flow_tol || j + 1 == n) {
                i += 1;
            } else if j + 1 < n {
                j += 1;
            } else {
                break;
            }
        }

        let residue: f64 = supply.iter().chain(demand.iter()).map(|v| v.abs()).sum();
        if residue > 1e-9 * total.max(1.0) {
            return Err(SimilarityError::InfeasibleTransport(format!(
                "padded histograms are unbalanced by {:.3e}",
                residue
            )));
        }
        Ok(tp)
    }

    fn solve(self) -> Result<f64> {
        let max_iterations = 50 * (self.m + self.n) * (self.m + self.n) + 100;
        self.solve_within(max_iterations)
    }

    /// Pivot until no cell improves the objective. Running out of pivots
    /// is an error: the flow at that point need not be optimal.
    fn solve_within(mut self, max_iterations: usize) -> Result<f64> {
        let bland_after = 2 * (self.m + self.n);
        let mut degenerate_run = 0usize;
        let mut iterations = 0usize;

        loop {
            let (u, v) = self.potentials()?;
            let entering = if degenerate_run > bland_after {
                self.first_improving(&u, &v)
            } else {
                self.most_improving(&u, &v)
            };
            let Some((p, q)) = entering else {
                break;
            };
            if iterations >= max_iterations {
                return Err(SimilarityError::InfeasibleTransport(format!(
                    "transport simplex did not converge within {} pivots",
                    max_iterations
                )));
            }

            let moved = self.pivot(p, q)?;
            degenerate_run = if moved <= self.flow_tol { degenerate_run + 1 } else { 0 };

            iterations += 1;
        }

        debug!(iterations, bins = self.m, "transport simplex converged");
        Ok(self.objective())
    }

    fn objective(&self) -> f64 {
        let mut total = 0.0;
        for i in 0..self.m {
            for j in 0..self.n {
                total += self.flow[i][j] * self.cost[i][j];
            }
        }
        total
    }

    /// Adjacency of the basis tree.
    fn adjacency(&self) -> (Vec<Vec<usize>>, Vec<Vec<usize>>) {
        let mut by_row = vec![Vec::new(); self.m];
        let mut by_col = vec![Vec::new(); self.n];
        for &(i, j) in &self.basis {
            by_row[i].push(j);
            by_col[j].push(i);
        }
        (by_row, by_col)
    }

    /// MODI dual values with `u[0] = 0`.
    fn potentials(&self) -> Result<(Vec<f64>, Vec<f64>)> {
        let (by_row, by_col) = self.adjacency();
        let mut u: Vec<Option<f64>> = vec![None; self.m];
        let mut v: Vec<Option<f64>> = vec![None; self.n];
        u[0] = Some(0.0);

        let mut queue = VecDeque::from([Node::Row(0)]);
        while let Some(node) = queue.pop_front() {
            match node {
                Node::Row(i) => {
                    let ui = u[i].unwrap_or(0.0);
                    for &j in &by_row[i] {
                        if v[j].is_none() {
                            v[j] = Some(self.cost[i][j] - ui);
                            queue.push_back(Node::Col(j));
                        }
                    }
                }
                Node::Col(j) => {
                    let vj = v[j].unwrap_or(0.0);
                    for &i in &by_col[j] {
                        if u[i].is_none() {
                            u[i] = Some(self.cost[i][j] - vj);
                            queue.push_back(Node::Row(i));
                        }
                    }
                }
            }
        }

        let u: Option<Vec<f64>> = u.into_iter().collect();
        let v: Option<Vec<f64>> = v.into_iter().collect();
        match (u, v) {
            (Some(u), Some(v)) => Ok((u, v)),
            _ => Err(SimilarityError::InfeasibleTransport(
                "basis does not span every bin".to_string(),
            )),
        }
    }

    fn reduced_cost(&self, i: usize, j: usize, u: &[f64], v: &[f64]) -> f64 {
        self.cost[i][j] - u[i] - v[j]
    }

    /// Dantzig's rule: most negative reduced cost.
    fn most_improving(&self, u: &[f64], v: &[f64]) -> Option<(usize, usize)> {
        let mut best: Option<((usize, usize), f64)> = None;
        for i in 0..self.m {
            for j in 0..self.n {
                if self.basic[i][j] {
                    continue;
                }
                let r = self.reduced_cost(i, j, u, v);
                if r < -self.cost_tol && best.map_or(true, |(_, b)| r < b) {
                    best = Some(((i, j), r));
                }
            }
        }
        best.map(|(cell, _)| cell)
    }

    /// Bland's rule: first improving cell in row-major order.
    fn first_improving(&self, u: &[f64], v: &[f64]) -> Option<(usize, usize)> {
        for i in 0..self.m {
            for j in 0..self.n {
                if !self.basic[i][j] && self.reduced_cost(i, j, u, v) < -self.cost_tol {
                    return Some((i, j));
                }
            }
        }
        None
    }

    /// Tree path from `Row(p)` to `Col(q)` as a list of basic cells.
    fn tree_path(&self, p: usize, q: usize) -> Result<Vec<(usize, usize)>> {
        let (by_row, by_col) = self.adjacency();
        let mut row_parent: Vec<Option<Node>> = vec![None; self.m];
        let mut col_parent: Vec<Option<Node>> = vec![None; self.n];
        let mut row_seen = vec![false; self.m];
        let mut col_seen = vec![false; self.n];
        row_seen[p] = true;

        let mut queue = VecDeque::from([Node::Row(p)]);
        while let Some(node) = queue.pop_front() {
            match node {
                Node::Row(i) => {
                    for &j in &by_row[i] {
                        if !col_seen[j] {
                            col_seen[j] = true;
                            col_parent[j] = Some(node);
                            queue.push_back(Node::Col(j));
                        }
                    }
                }
                Node::Col(j) => {
                    if j == q {
                        break;
                    }
                    for &i in &by_col[j] {
                        if !row_seen[i] {
                            row_seen[i] = true;
                            row_parent[i] = Some(node);
                            queue.push_back(Node::Row(i));
                        }
                    }
                }
            }
        }

        if !col_seen[q] {
            return Err(SimilarityError::InfeasibleTransport(format!(
                "no basis path closes a cycle through cell ({}, {})",
                p, q
            )));
        }

        // Walk back from Col(q) to Row(p), then reverse.
        let mut cells = Vec::new();
        let mut node = Node::Col(q);
        loop {
            let parent = match node {
                Node::Row(i) if i == p => break,
                Node::Row(i) => row_parent[i],
                Node::Col(j) => col_parent[j],
            };
            let Some(parent) = parent else {
                return Err(SimilarityError::InfeasibleTransport("broken basis tree".to_string()));
            };
            let cell = match (node, parent) {
                (Node::Col(j), Node::Row(i)) | (Node::Row(i), Node::Col(j)) => (i, j),
                _ => {
                    return Err(SimilarityError::InfeasibleTransport(
                        "basis tree is not bipartite".to_string(),
                    ))
                }
            };
            cells.push(cell);
            node = parent;
        }
        cells.reverse();
        Ok(cells)
    }

    /// Bring `(p, q)` into the basis. Returns the amount of flow moved.
    fn pivot(&mut self, p: usize, q: usize) -> Result<f64> {
        // Path from Row(p) alternates: the first edge shares row p with the
        // entering cell so it loses flow, the next gains, and so on.
        let path = self.tree_path(p, q)?;
        let mut theta = f64::INFINITY;
        let mut leaving = None;
        for (k, &(i, j)) in path.iter().enumerate() {
            if k % 2 == 0 && self.flow[i][j] < theta {
                theta = self.flow[i][j];
                leaving = Some(k);
            }
        }
        let Some(leaving) = leaving else {
            return Err(SimilarityError::InfeasibleTransport(format!(
                "cycle through ({}, {}) has no donor cell",
                p, q
            )));
        };

        self.flow[p][q] += theta;
        for (k, &(i, j)) in path.iter().enumerate() {
            if k % 2 == 0 {
                self.flow[i][j] = (self.flow[i][j] - theta).max(0.0);
            } else {
                self.flow[i][j] += theta;
            }
        }

        let (li, lj) = path[leaving];
        self.flow[li][lj] = 0.0;
        self.basic[li][lj] = false;
        self.basic[p][q] = true;
        if let Some(slot) = self.basis.iter_mut().find(|cell| **cell == (li, lj)) {
            *slot = (p, q);
        }
        Ok(theta)
    }
}
