//! Column inhibition: selecting the sparse active set.
//!
//! Given per-column excitation, inhibition admits roughly
//! `activation_level * n_columns` winners. The global variant simply takes
//! the top N by excitation; the local variant walks candidates in descending
//! excitation order and vetoes a column when a stronger, already-admitted
//! column sits within its inhibition radius (but outside the base distance,
//! which close neighbours are exempt from).

use super::topology::Topology;
use fxhash::{FxHashMap, FxHashSet};

/// Number of columns inhibition aims to admit.
#[inline]
pub fn n_on(activation_level: f32, n_columns: usize) -> usize {
    ((activation_level * n_columns as f32).round() as usize).max(1)
}

/// Sorts candidate columns by excitation descending, ties by ascending
/// column id for determinism.
fn ranked(excitation: &FxHashMap<usize, f32>) -> Vec<usize> {
    let mut cols: Vec<usize> = excitation.keys().copied().collect();
    cols.sort_unstable_by(|&a, &b| {
        excitation[&b]
            .partial_cmp(&excitation[&a])
            .unwrap()
            .then(a.cmp(&b))
    });
    cols
}

/// Global inhibition: the top `n_on` columns by excitation.
pub fn select_global(excitation: &FxHashMap<usize, f32>, n_on: usize) -> FxHashSet<usize> {
    let mut cols = ranked(excitation);
    cols.truncate(n_on);
    cols.into_iter().collect()
}

/// Local inhibition: admits candidates in rank order unless a strictly
/// stronger admitted column lies within Chebyshev distance
/// `(base_distance, inh_radius]`, stopping once `n_on` are admitted.
pub fn select_local(
    excitation: &FxHashMap<usize, f32>,
    topology: &Topology,
    n_on: usize,
    inh_radius: usize,
    base_distance: usize,
) -> FxHashSet<usize> {
    let mut admitted: Vec<(usize, Vec<usize>)> = Vec::with_capacity(n_on);

    for col in ranked(excitation) {
        if admitted.len() >= n_on {
            break;
        }
        let coord = topology.coord_of(col);
        let vetoed = admitted.iter().any(|(other, other_coord)| {
            let d = Topology::coord_distance(&coord, other_coord);
            d > base_distance && d <= inh_radius && excitation[other] > excitation[&col]
        });
        if !vetoed {
            admitted.push((col, coord));
        }
    }

    admitted.into_iter().map(|(col, _)| col).collect()
}

/// Dispatches to the configured inhibition variant.
pub fn select_active_columns(
    excitation: &FxHashMap<usize, f32>,
    topology: &Topology,
    activation_level: f32,
    global: bool,
    inh_radius: usize,
    base_distance: usize,
) -> FxHashSet<usize> {
    let n_columns = topology.size();
    let target = n_on(activation_level, n_columns);
    if global {
        select_global(excitation, target)
    } else {
        select_local(excitation, topology, target, inh_radius, base_distance)
    }
}

/// Derives the inhibition radius from the average extent, on the input
/// space, of each column's connected proximal synapses, rescaled onto the
/// column grid. Falls back to 1 while columns have no connected synapses.
pub fn inhibition_radius(
    mean_connected_span: f32,
    column_topology: &Topology,
    input_topology: &Topology,
) -> usize {
    if mean_connected_span <= 0.0 {
        return 1;
    }
    // Average number of columns per input cell across dimensions.
    let dims = column_topology.dimensions();
    let in_dims = input_topology.dimensions();
    let n = dims.len().max(in_dims.len());
    let mut ratio = 0.0f32;
    for d in 0..n {
        let cols = dims.get(d).copied().unwrap_or(1) as f32;
        let inputs = in_dims.get(d).copied().unwrap_or(1) as f32;
        ratio += cols / inputs;
    }
    ratio /= n as f32;

    let diameter = mean_connected_span * ratio;
    (((diameter - 1.0) / 2.0).round() as isize).max(1) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exc(pairs: &[(usize, f32)]) -> FxHashMap<usize, f32> {
        pairs.iter().copied().collect()
    }

    #[test]
    fn n_on_is_at_least_one() {
        assert_eq!(n_on(0.02, 16), 1);
        assert_eq!(n_on(0.02, 1000), 20);
        assert_eq!(n_on(0.5, 20), 10);
    }

    #[test]
    fn global_takes_top_n_with_deterministic_ties() {
        let e = exc(&[(3, 5.0), (1, 5.0), (7, 9.0), (4, 1.0)]);
        let on = select_global(&e, 2);
        // 7 wins outright; 1 beats 3 on the id tie-break.
        assert!(on.contains(&7));
        assert!(on.contains(&1));
        assert_eq!(on.len(), 2);
    }

    #[test]
    fn global_admits_all_when_short() {
        let e = exc(&[(2, 1.0)]);
        assert_eq!(select_global(&e, 5).len(), 1);
        assert!(select_global(&FxHashMap::default(), 5).is_empty());
    }

    #[test]
    fn local_vetoes_weaker_neighbours() {
        let topo = Topology::new(&[10]);
        // Column 4 outranks its neighbour 5; 9 is out of range.
        let e = exc(&[(4, 9.0), (5, 5.0), (9, 5.0)]);
        let on = select_local(&e, &topo, 3, 2, 0);
        assert!(on.contains(&4));
        assert!(!on.contains(&5));
        assert!(on.contains(&9));
    }

    #[test]
    fn local_base_distance_exempts_close_neighbours() {
        let topo = Topology::new(&[10]);
        let e = exc(&[(4, 9.0), (5, 5.0)]);
        // Distance 1 falls inside the base distance, so 5 survives.
        let on = select_local(&e, &topo, 3, 2, 1);
        assert!(on.contains(&4));
        assert!(on.contains(&5));
    }

    #[test]
    fn radius_scales_span_onto_columns() {
        let cols = Topology::new(&[10]);
        let inputs = Topology::new(&[100]);
        // Span of 40 input cells at a 1:10 ratio is a diameter of 4 columns.
        assert_eq!(inhibition_radius(40.0, &cols, &inputs), 2);
        assert_eq!(inhibition_radius(0.0, &cols, &inputs), 1);
    }
}
