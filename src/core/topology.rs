//! Topology represents a regular n-dimensional grid through a list of dimensions
//! and corresponding stride values. The struct converts between linear indices
//! and coordinates in this n-dimensional space, and enumerates annular
//! neighbourhoods (all points whose Chebyshev distance from a centre lies in
//! `(inner_r, outer_r]`).
//!
//! Both the input bit field and the column grid are n-dimensional spaces.
//! Local inhibition, boosting, and the proximal receptive fields all reason
//! about neighbourhoods, so the same structure serves both spaces.

use serde::{Deserialize, Serialize};

/// The shape of an n-dimensional grid, with precomputed stride values for
/// linear index conversions. `dims` stores the size of each dimension, while
/// `strides` stores the cumulative product of dimension sizes to enable fast
/// index calculations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    dims: Vec<usize>,
    strides: Vec<usize>,
}

impl Topology {
    /// Creates a new `Topology` from a slice of dimension sizes.
    /// All dimensions must be positive.
    #[inline]
    pub fn new(dimensions: &[usize]) -> Self {
        assert!(
            !dimensions.is_empty() && dimensions.iter().all(|&d| d > 0),
            "topology dimensions must be non-empty and positive: {:?}",
            dimensions
        );
        let dims = dimensions.to_vec();
        let strides = Self::strides(&dims);

        Self { dims, strides }
    }

    /// Computes the stride values used to convert coordinates into a single
    /// linear index.
    #[inline]
    fn strides(dims: &[usize]) -> Vec<usize> {
        let mut strides = vec![1; dims.len()];

        for i in (0..dims.len() - 1).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }

        strides
    }

    /// The dimension sizes.
    #[inline]
    pub fn dimensions(&self) -> &[usize] {
        &self.dims
    }

    /// Total number of points in the grid (product of dimensions).
    #[inline]
    pub fn size(&self) -> usize {
        self.dims.iter().product()
    }

    /// Converts a linear index into its coordinates, one per dimension.
    #[inline]
    pub fn coord_of(&self, index: usize) -> Vec<usize> {
        let mut remainder = index;

        self.strides
            .iter()
            .map(|&stride| {
                let coord = remainder / stride;
                remainder %= stride;
                coord
            })
            .collect()
    }

    /// Converts coordinates to a single linear index. The length of `coords`
    /// must match the number of dimensions.
    #[inline]
    pub fn index_of(&self, coords: &[usize]) -> usize {
        debug_assert_eq!(coords.len(), self.dims.len());
        coords.iter().zip(&self.strides).map(|(&c, &s)| c * s).sum()
    }

    /// Chebyshev distance between two coordinate tuples: the maximum
    /// per-dimension absolute difference.
    #[inline]
    pub fn coord_distance(a: &[usize], b: &[usize]) -> usize {
        a.iter()
            .zip(b)
            .map(|(&x, &y)| x.abs_diff(y))
            .max()
            .unwrap_or(0)
    }

    /// Returns an iterator over the annular neighbourhood of `centre`: all
    /// grid points whose Chebyshev distance `d` from the centre satisfies
    /// `inner_r < d <= outer_r`. The neighbourhood is clipped at grid
    /// boundaries. The centre itself (distance 0) is never yielded.
    #[inline]
    pub fn neighbours(&self, centre: &[usize], outer_r: usize, inner_r: usize) -> NeighbourIter {
        debug_assert_eq!(centre.len(), self.dims.len());
        let bounds: Vec<(usize, usize)> = centre
            .iter()
            .zip(&self.dims)
            .map(|(&c, &dim)| (c.saturating_sub(outer_r), (c + outer_r + 1).min(dim)))
            .collect();

        let current = if inner_r < outer_r {
            Some(bounds.iter().map(|&(low, _)| low).collect())
        } else {
            None
        };

        NeighbourIter {
            topology: self,
            centre: centre.to_vec(),
            bounds,
            current,
            outer_r,
            inner_r,
        }
    }
}

/// Iterator yielding all indices within an annular neighbourhood of a centre
/// coordinate. Walks the bounding box in odometer order and skips points
/// outside the `(inner_r, outer_r]` Chebyshev annulus.
pub struct NeighbourIter<'a> {
    topology: &'a Topology,
    centre: Vec<usize>,
    bounds: Vec<(usize, usize)>,
    current: Option<Vec<usize>>,
    outer_r: usize,
    inner_r: usize,
}

impl NeighbourIter<'_> {
    /// Advances the odometer; sets `current` to `None` when exhausted.
    fn advance(&mut self) {
        let Some(current) = self.current.as_mut() else {
            return;
        };

        for i in (0..current.len()).rev() {
            if current[i] + 1 < self.bounds[i].1 {
                current[i] += 1;
                for j in i + 1..current.len() {
                    current[j] = self.bounds[j].0;
                }
                return;
            }
        }

        self.current = None;
    }
}

impl Iterator for NeighbourIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let coords = self.current.as_ref()?.clone();
            self.advance();

            let d = Topology::coord_distance(&coords, &self.centre);
            if d > self.inner_r && d <= self.outer_r {
                return Some(self.topology.index_of(&coords));
            }
        }
    }
}
