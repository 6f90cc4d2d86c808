use ndarray::Array1;
use serde::Serialize;


/// Fraction of exact matches between predictions and labels.
pub fn accuracy_score(preds: &[usize], truth: &[usize]) -> f32 {
    if truth.is_empty() {
        return 0.0;
    }
    let hits = preds.iter().zip(truth).filter(|(p, t)| p == t).count();
    hits as f32 / truth.len() as f32
}

/// Accuracy over the rows selected by `mask`.
pub fn masked_accuracy(preds: &Array1<usize>, truth: &Array1<usize>, mask: &Array1<bool>) -> f32 {
    let (selected_preds, selected_truth): (Vec<usize>, Vec<usize>) = mask.iter()
        .zip(preds.iter().zip(truth.iter()))
        .filter(|(m, _)| **m)
        .map(|(_, (p, t))| (*p, *t))
        .unzip();
    accuracy_score(&selected_preds, &selected_truth)
}

/// Share of positions where two prediction vectors agree.
pub fn similarity(current: &Array1<usize>, previous: &Array1<usize>) -> f32 {
    if current.is_empty() {
        return 1.0;
    }
    let same = current.iter().zip(previous.iter()).filter(|(a, b)| a == b).count();
    same as f32 / current.len() as f32
}


/// Keeps the test accuracy of the epoch with the best validation accuracy.
/// Only a strictly better validation score replaces the record, so ties keep the earliest epoch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BestTracker {
    pub best_val_acc: f32,
    pub best_test_acc: f32,
    pub best_epoch: Option<usize>,
}

impl BestTracker {

    pub fn new() -> BestTracker {
        Self::default()
    }

    /// returns true when the epoch became the new best
    pub fn update(&mut self, epoch: usize, val_acc: f32, test_acc: f32) -> bool {
        if val_acc > self.best_val_acc {
            self.best_val_acc = val_acc;
            self.best_test_acc = test_acc;
            self.best_epoch = Some(epoch);
            return true;
        }
        false
    }
}


#[cfg(test)]
mod tests {

    use super::{accuracy_score, masked_accuracy, similarity, BestTracker};
    use ndarray::array;

    #[test]
    fn accuracy_counts_exact_matches() {
        assert_eq!(accuracy_score(&[1, 2, 3, 4], &[1, 0, 3, 0]), 0.5);
        assert_eq!(accuracy_score(&[], &[]), 0.0);
        assert_eq!(masked_accuracy(&array![1, 2, 3], &array![1, 0, 0], &array![true, false, true]), 0.5);
    }

    #[test]
    fn similarity_of_predictions() {
        assert_eq!(similarity(&array![0, 1, 2, 3], &array![0, 1, 2, 0]), 0.75);
    }

    #[test]
    fn best_test_follows_first_max_validation() {
        let history = [(0.2, 0.1), (0.5, 0.4), (0.5, 0.9), (0.3, 0.95), (0.45, 0.2)];
        let mut tracker = BestTracker::new();
        for (epoch, (val, test)) in history.iter().enumerate() {
            tracker.update(epoch + 1, *val, *test);
        }
        assert_eq!(tracker.best_val_acc, 0.5);
        assert_eq!(tracker.best_test_acc, 0.4);
        assert_eq!(tracker.best_epoch, Some(2));
    }
}
