use rayon::prelude::*;

use crate::{
    DbErr, Result,
    codec::Tensor,
    snapshot::{Snapshot, UpdateRecord},
};

/// Relative tolerance between aggregations of the same updates in different orders.
pub const TOLERANCE: f32 = 1e-6;

/// Folds a batch of client updates into `base` using federated averaging.
///
/// Every variable becomes `base[i] + Σ (n_u / N) * u[i]`, where `n_u` is the
/// update's example count and `N` the total over all updates. Updates are
/// scaled in parallel and their contributions are reduced pairwise, so
/// the result only depends on the order of `updates` up to `TOLERANCE`.
///
/// # Arguments
/// * `base` - The snapshot the updates were computed against.
/// * `updates` - The pending updates.
///
/// # Returns
/// The new snapshot, laid out exactly like `base`, or
/// * `DbErr::NoUpdates` if `updates` is empty.
/// * `DbErr::VarCountMismatch` or `DbErr::ShapeMismatch` if any update doesn't match `base`.
/// * `DbErr::EmptyWeight` if the total example count is zero.
pub fn aggregate(base: &Snapshot, updates: &[UpdateRecord]) -> Result<Snapshot> {
    if updates.is_empty() {
        return Err(DbErr::NoUpdates);
    }

    for update in updates {
        base.check_layout(update.vars())?;
    }

    let total: u128 = updates.iter().map(|u| u.num_examples() as u128).sum();
    if total == 0 {
        return Err(DbErr::EmptyWeight);
    }

    let total = total as f64;
    let delta = updates
        .par_iter()
        .map(|update| {
            let frac = (update.num_examples() as f64 / total) as f32;
            Ok::<_, DbErr>(update.vars().iter().map(|var| var * frac).collect::<Vec<_>>())
        })
        .try_reduce_with(|acc, other| sum_vars(&acc, &other))
        .ok_or(DbErr::NoUpdates)??;

    Ok(Snapshot::new(sum_vars(base.vars(), &delta)?))
}

fn sum_vars(a: &[Tensor], b: &[Tensor]) -> Result<Vec<Tensor>> {
    a.iter()
        .zip(b)
        .enumerate()
        .map(|(index, (x, y))| {
            x.add(y).map_err(|e| match e {
                DbErr::ShapeMismatch { got, expected, .. } => DbErr::ShapeMismatch {
                    index,
                    got,
                    expected,
                },
                e => e,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(values: &[f32]) -> Tensor {
        Tensor::from_shape_vec(&[values.len()], values.to_vec()).unwrap()
    }

    fn assert_close(got: &Snapshot, expected: &Snapshot) {
        assert_eq!(got.len(), expected.len());

        for (g, e) in got.vars().iter().zip(expected.vars()) {
            assert_eq!(g.shape(), e.shape());

            for (a, b) in g.as_array().iter().zip(e.as_array()) {
                let scale = a.abs().max(b.abs()).max(1.);
                assert!((a - b).abs() / scale <= TOLERANCE, "{a} != {b}");
            }
        }
    }

    #[test]
    fn weights_by_example_count() {
        let base = Snapshot::new(vec![Tensor::scalar(5.)]);
        let updates = [
            UpdateRecord::new(1, vec![Tensor::scalar(2.)]),
            UpdateRecord::new(3, vec![Tensor::scalar(4.)]),
        ];

        let snapshot = aggregate(&base, &updates).unwrap();
        assert_close(&snapshot, &Snapshot::new(vec![Tensor::scalar(8.5)]));
    }

    #[test]
    fn keeps_layout_of_base() {
        let matrix = Tensor::from_shape_vec(&[2, 2], vec![1., 1., 1., 1.]).unwrap();
        let base = Snapshot::new(vec![matrix, vector(&[0., 0., 0.])]);
        let updates = [
            UpdateRecord::new(
                2,
                vec![
                    Tensor::from_shape_vec(&[2, 2], vec![1., 2., 3., 4.]).unwrap(),
                    vector(&[1., 1., 1.]),
                ],
            ),
            UpdateRecord::new(
                2,
                vec![
                    Tensor::from_shape_vec(&[2, 2], vec![3., 2., 1., 0.]).unwrap(),
                    vector(&[-1., 1., 3.]),
                ],
            ),
        ];

        let snapshot = aggregate(&base, &updates).unwrap();
        let expected = Snapshot::new(vec![
            Tensor::from_shape_vec(&[2, 2], vec![3., 3., 3., 3.]).unwrap(),
            vector(&[0., 1., 2.]),
        ]);

        assert_close(&snapshot, &expected);
    }

    #[test]
    fn update_order_does_not_matter() {
        let base = Snapshot::new(vec![vector(&[0.1, -0.2, 0.3])]);
        let mut updates: Vec<_> = (1..=16)
            .map(|i| {
                let x = i as f32;
                UpdateRecord::new(i, vec![vector(&[x * 0.01, -x * 0.3, 1. / x])])
            })
            .collect();

        let forward = aggregate(&base, &updates).unwrap();
        updates.reverse();
        let backward = aggregate(&base, &updates).unwrap();

        assert_close(&forward, &backward);
    }

    #[test]
    fn zero_total_weight_is_rejected() {
        let base = Snapshot::new(vec![Tensor::scalar(1.)]);
        let updates = [UpdateRecord::new(0, vec![Tensor::scalar(3.)])];

        let err = aggregate(&base, &updates).unwrap_err();
        assert!(matches!(err, DbErr::EmptyWeight));
    }

    #[test]
    fn zero_weight_update_contributes_nothing() {
        let base = Snapshot::new(vec![Tensor::scalar(1.)]);
        let updates = [
            UpdateRecord::new(0, vec![Tensor::scalar(100.)]),
            UpdateRecord::new(5, vec![Tensor::scalar(2.)]),
        ];

        let snapshot = aggregate(&base, &updates).unwrap();
        assert_close(&snapshot, &Snapshot::new(vec![Tensor::scalar(3.)]));
    }

    #[test]
    fn shape_mismatch_is_checked_before_weights() {
        let base = Snapshot::new(vec![vector(&[1., 2.])]);
        let updates = [
            UpdateRecord::new(0, vec![vector(&[1., 2.])]),
            UpdateRecord::new(0, vec![vector(&[1., 2., 3.])]),
        ];

        let err = aggregate(&base, &updates).unwrap_err();
        assert!(matches!(err, DbErr::ShapeMismatch { index: 0, .. }));
    }

    #[test]
    fn var_count_mismatch_is_rejected() {
        let base = Snapshot::new(vec![Tensor::scalar(1.), Tensor::scalar(2.)]);
        let updates = [UpdateRecord::new(1, vec![Tensor::scalar(1.)])];

        let err = aggregate(&base, &updates).unwrap_err();
        assert!(matches!(err, DbErr::VarCountMismatch { got: 1, expected: 2 }));
    }

    #[test]
    fn empty_batch_is_rejected() {
        let base = Snapshot::new(vec![Tensor::scalar(1.)]);
        let err = aggregate(&base, &[]).unwrap_err();
        assert!(matches!(err, DbErr::NoUpdates));
    }
}
