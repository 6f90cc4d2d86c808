use ndarray::{Array1, Array2, ArrayBase, Axis, Data, Ix1, Ix2, Zip};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use ndarray_stats::QuantileExt;
use rand::Rng;
use crate::error::{Error, Result};


pub fn one_hot(y: &Array1<usize>, num_classes: usize) -> Result<Array2<f32>> {
    let mut encoded = Array2::zeros((y.len(), num_classes));
    for (i, &label) in y.iter().enumerate() {
        if label >= num_classes {
            return Err(Error::Shape(format!("label {} out of range for {} classes", label, num_classes)));
        }
        encoded[[i, label]] = 1.0;
    }
    Ok(encoded)
}

/// Index of the largest entry of every row, the first one on ties.
pub fn argmax_rows<S>(x: &ArrayBase<S, Ix2>) -> Result<Array1<usize>>
where
    S: Data<Elem = f32>,
{
    x.axis_iter(Axis(0))
        .map(|row| row.argmax().map_err(|e| Error::Shape(format!("argmax failed: {}", e))))
        .collect::<Result<Vec<usize>>>()
        .map(Array1::from)
}

pub fn mask_indices(mask: &ArrayBase<impl Data<Elem = bool>, Ix1>) -> Vec<usize> {
    mask.iter().enumerate().filter(|(_, m)| **m).map(|(i, _)| i).collect()
}

pub fn relu(x: &Array2<f32>) -> Array2<f32> {
    x.mapv(|a| a.max(0.0))
}

/// Passes `grad` where the pre-activation was positive.
pub fn relu_backward(grad: &Array2<f32>, pre: &Array2<f32>) -> Array2<f32> {
    Zip::from(grad).and(pre).map_collect(|g, p| if *p > 0.0 { *g } else { 0.0 })
}

pub fn log_softmax(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(f32::NEG_INFINITY, |m, &a| m.max(a));
        let log_sum = row.mapv(|a| (a - max).exp()).sum().ln() + max;
        row.mapv_inplace(|a| a - log_sum);
    }
    out
}

/// Mean cross-entropy over the selected rows. The gradient has the shape of
/// `logits` and is zero outside `rows`.
pub fn cross_entropy(logits: &Array2<f32>, y: &Array1<usize>, rows: &[usize]) -> Result<(f32, Array2<f32>)> {

    if rows.is_empty() {
        return Err(Error::Shape("cross entropy over an empty selection".to_string()));
    }

    let log_probs = log_softmax(logits);
    let mut grad = Array2::zeros(logits.raw_dim());
    let scale = 1.0 / rows.len() as f32;
    let mut loss = 0.0;

    for &i in rows {
        let label = *y.get(i).ok_or_else(|| Error::Shape(format!("no label for row {}", i)))?;
        if label >= logits.ncols() {
            return Err(Error::Shape(format!("label {} out of range for {} classes", label, logits.ncols())));
        }
        loss -= log_probs[[i, label]];
        let mut g = grad.row_mut(i);
        g.assign(&log_probs.row(i).mapv(f32::exp));
        g[label] -= 1.0;
        g *= scale;
    }

    Ok((loss * scale, grad))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reduction {
    Mean,
    Sum,
}

/// Squared error between `pred` and `target` restricted to masked rows.
pub fn masked_mse(pred: &Array2<f32>, target: &Array2<f32>, mask: &Array1<bool>, reduction: Reduction) -> f32 {
    let mut total = 0.0;
    let mut count = 0usize;
    for (i, _) in mask.iter().enumerate().filter(|(_, m)| **m) {
        total += (&pred.row(i) - &target.row(i)).mapv(|d| d.powi(2)).sum();
        count += pred.ncols();
    }
    match reduction {
        Reduction::Sum => total,
        Reduction::Mean if count == 0 => 0.0,
        Reduction::Mean => total / count as f32,
    }
}

/// Inverted dropout. Returns the dropped input and the scaled keep mask used,
/// which the backward pass multiplies into the incoming gradient.
pub fn dropout<R: Rng>(x: &Array2<f32>, p: f32, rng: &mut R) -> (Array2<f32>, Array2<f32>) {
    if p <= 0.0 {
        return (x.clone(), Array2::ones(x.raw_dim()));
    }
    let keep = 1.0 - p;
    let mask = Array2::random_using(x.raw_dim(), Uniform::new(0.0f32, 1.0), rng)
        .mapv(|u| if u < keep { 1.0 / keep } else { 0.0 });
    (x * &mask, mask)
}


#[cfg(test)]
mod tests {

    use super::{argmax_rows, cross_entropy, dropout, log_softmax, mask_indices, masked_mse, one_hot, Reduction};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn one_hot_and_argmax() {
        let y = array![2, 0, 1];
        let encoded = one_hot(&y, 3).unwrap();
        assert_eq!(argmax_rows(&encoded).unwrap(), y);
        assert!(one_hot(&y, 2).is_err());
        // first index wins on ties
        assert_eq!(argmax_rows(&array![[1.0, 1.0]]).unwrap(), array![0]);
    }

    #[test]
    fn log_softmax_rows_normalize() {
        let out = log_softmax(&array![[1.0, 2.0, 3.0], [1000.0, 1000.0, 1000.0]]);
        for row in out.rows() {
            assert_abs_diff_eq!(row.mapv(f32::exp).sum(), 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn cross_entropy_gradient_matches_finite_differences() {
        let logits = array![[0.2, -0.4, 1.0], [0.5, 0.1, -0.3], [1.5, 0.0, 0.3]];
        let y = array![2, 0, 1];
        let rows = [0, 2];
        let (loss, grad) = cross_entropy(&logits, &y, &rows).unwrap();
        assert!(loss > 0.0);
        assert_eq!(grad.row(1).sum(), 0.0);

        let h = 1e-2;
        for i in 0..3 {
            for j in 0..3 {
                let mut plus = logits.clone();
                plus[[i, j]] += h;
                let mut minus = logits.clone();
                minus[[i, j]] -= h;
                let numeric = (cross_entropy(&plus, &y, &rows).unwrap().0 - cross_entropy(&minus, &y, &rows).unwrap().0) / (2.0 * h);
                assert_abs_diff_eq!(grad[[i, j]], numeric, epsilon = 1e-3);
            }
        }
        assert!(cross_entropy(&logits, &y, &[]).is_err());
    }

    #[test]
    fn masked_mse_reductions() {
        let pred = array![[1.0, 0.0], [0.0, 0.0], [2.0, 2.0]];
        let target = array![[0.0, 0.0], [5.0, 5.0], [0.0, 1.0]];
        let mask = array![true, false, true];
        assert_eq!(masked_mse(&pred, &target, &mask, Reduction::Sum), 6.0);
        assert_eq!(masked_mse(&pred, &target, &mask, Reduction::Mean), 1.5);
        assert_eq!(mask_indices(&mask), vec![0, 2]);
    }

    #[test]
    fn dropout_scales_kept_units() {
        let mut rng = StdRng::seed_from_u64(7);
        let x = Array2::<f32>::ones((50, 20));
        let (out, mask) = dropout(&x, 0.5, &mut rng);
        assert!(out.iter().all(|v| *v == 0.0 || *v == 2.0));
        assert_eq!(out, mask);
        let kept = out.iter().filter(|v| **v > 0.0).count();
        assert!(kept > 300 && kept < 700);

        let (same, _) = dropout(&x, 0.0, &mut rng);
        assert_eq!(same, x);
    }
}
