//! Statistical distance primitives
//!
//! Pure functions over vectors and matrices; engines decide what goes in.
//!
//! - [`kl`]: symmetric Kullback-Leibler divergence between Gaussians, and the
//!   ground-distance matrix between two sets of Gaussians
//! - [`emd`]: Earth Mover's Distance (optimal transport between histograms)
//! - [`qcd`]: Quadratic-Chi cross-bin histogram distance
//!
//! Every function returns a distance in `[0, ∞)` or an error; none of them
//! lets a NaN through.

pub mod emd;
pub mod kl;
pub mod qcd;

pub use emd::earth_movers_distance;
pub use kl::{kl_ground_distances, symmetric_kl, Gaussian};
pub use qcd::quadratic_chi_distance;
