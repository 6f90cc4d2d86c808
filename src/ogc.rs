use std::time::Instant;
use ndarray::{Array1, Array2};
use serde::Serialize;
use tracing::{debug, info};
use crate::config::OgcParams;
use crate::datasets::PlanetoidDataset;
use crate::error::{Error, Result};
use crate::functional::{mask_indices, one_hot};
use crate::graph::GraphData;
use crate::metrics::similarity;
use crate::model::{LinearNeuralNetwork, LinearTest};
use crate::sparse::SparseMatrix;
use crate::transforms::{Compose, FeatureNorm, GcnNorm, NormalizeFeatures, Transform};


/// Quantities fixed for the whole run.
#[derive(Clone, Debug)]
pub struct OgcSetup {
    pub y: Array1<usize>,
    pub y_one_hot: Array2<f32>,
    pub trainval_mask: Array1<bool>,
    pub test_mask: Array1<bool>,
    /// diagonal selector with ones on training rows only
    pub selector: SparseMatrix,
    /// `beta * A + (1 - beta) * I`
    pub lazy_adj: SparseMatrix,
}

impl OgcSetup {

    pub fn new(graph: &GraphData, beta: f32) -> Result<OgcSetup> {

        let adj = graph.adj.as_ref().ok_or(Error::MissingAdjacency)?;
        let masks = graph.masks()?;
        if graph.y.len() != graph.num_nodes() {
            return Err(Error::Shape(format!("{} labels for {} nodes", graph.y.len(), graph.num_nodes())));
        }

        // validation rows stay out of the supervised term
        let selector = SparseMatrix::from_diag(&masks.train.mapv(|m| if m { 1.0 } else { 0.0 }).to_vec());
        let lazy_adj = adj.scale(beta).add(&SparseMatrix::identity(graph.num_nodes()).scale(1.0 - beta))?;

        Ok(Self {
            y: graph.y.clone(),
            y_one_hot: one_hot(&graph.y, graph.num_classes)?,
            trainval_mask: masks.trainval(),
            test_mask: masks.test.clone(),
            selector,
            lazy_adj,
        })
    }
}


/// Values threaded from one iteration to the next.
#[derive(Clone, Debug)]
pub struct OgcState {
    pub u: Array2<f32>,
    pub eta_sup: f32,
    pub last_pred: Array1<usize>,
    pub last_acc: f32,
}

impl OgcState {

    /// Lazy graph convolution followed by the supervised embedding step, then decays `eta_sup`.
    pub fn update_u(&mut self, setup: &OgcSetup, pred: &Array2<f32>, w: &Array2<f32>, decline: f32) -> Result<()> {

        let smoothed = setup.lazy_adj.matmul(&self.u)?;
        let residual = pred - &setup.y_one_hot;
        let du_sup = setup.selector.matmul(&residual)?.dot(w) * 2.0;

        self.u = smoothed - &(du_sup * self.eta_sup);
        self.eta_sup *= decline;
        Ok(())
    }

    /// Compares `outcome` with the previous predictions and returns true when
    /// `stopping` fires. The outcome of a stopping iteration is not recorded.
    pub fn advance(&mut self, outcome: LinearTest, stopping: &mut EarlyStopping) -> bool {
        let sim = similarity(&outcome.pred, &self.last_pred);
        if stopping.observe(sim) {
            debug!("prediction similarity {:.4}, patience {}", sim, stopping.patience());
            return true;
        }
        self.last_acc = outcome.test_acc;
        self.last_pred = outcome.pred;
        false
    }
}


/// Patience counter over the prediction similarity of successive iterations.
/// Unless `reset_on_dissimilar` is set the counter only ever grows.
#[derive(Clone, Copy, Debug)]
pub struct EarlyStopping {
    pub max_sim_tol: f32,
    pub max_patience: usize,
    pub reset_on_dissimilar: bool,
    patience: usize,
}

impl EarlyStopping {

    pub fn new(max_sim_tol: f32, max_patience: usize, reset_on_dissimilar: bool) -> EarlyStopping {
        Self { max_sim_tol, max_patience, reset_on_dissimilar, patience: 0 }
    }

    pub fn patience(&self) -> usize {
        self.patience
    }

    /// returns true once the loop should stop
    pub fn observe(&mut self, sim: f32) -> bool {
        if sim > self.max_sim_tol {
            self.patience += 1;
            return self.patience > self.max_patience;
        }
        if self.reset_on_dissimilar {
            self.patience = 0;
        }
        false
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct OgcReport {
    pub test_acc: f32,
    pub iterations: usize,
    pub stopped_early: bool,
    pub eta_sup: f32,
}


/// Runs the OGC iterations on a graph whose features and adjacency are already normalized.
pub fn ogc(graph: &GraphData, params: &OgcParams) -> Result<OgcReport> {

    let setup = OgcSetup::new(graph, params.beta)?;
    debug!("{} train+val rows, {} test rows", mask_indices(&setup.trainval_mask).len(), mask_indices(&setup.test_mask).len());

    let mut model = LinearNeuralNetwork::new(graph.x.ncols(), graph.num_classes, false, params.seed);
    let initial = model.test(&graph.x, &setup.y_one_hot, &setup.y, &setup.trainval_mask, &setup.test_mask)?;

    let mut state = OgcState {
        u: graph.x.clone(),
        eta_sup: params.eta_sup,
        last_pred: initial.pred,
        last_acc: initial.test_acc,
    };
    let mut stopping = EarlyStopping::new(params.max_sim_tol, params.max_patience, params.reset_patience);
    let mut iterations = 0;
    let mut stopped_early = false;

    for i in 1..=params.max_iters {

        iterations = i;
        let (pred, w) = model.update_w(&state.u, &setup.y_one_hot, &setup.trainval_mask, params.eta_w)?;
        state.update_u(&setup, &pred, &w, params.decline)?;

        let outcome = model.test(&state.u, &setup.y_one_hot, &setup.y, &setup.trainval_mask, &setup.test_mask)?;
        println!("Epoch: {:02}, Loss: {:.4}, Train+Val Acc: {:.4} Test Acc {:.4}", i, outcome.loss, outcome.trainval_acc, outcome.test_acc);

        if state.advance(outcome, &mut stopping) {
            debug!("stopping at iteration {}", i);
            stopped_early = true;
            break;
        }
    }

    Ok(OgcReport { test_acc: state.last_acc, iterations, stopped_early, eta_sup: state.eta_sup })
}


/// Loads the Planetoid dataset, normalizes features (sum) and adjacency (GCN), runs OGC.
pub fn run(params: &OgcParams) -> Result<OgcReport> {

    info!("{}", params);
    let transforms: Vec<Box<dyn Transform>> = vec![
        Box::new(NormalizeFeatures::new(FeatureNorm::Sum)),
        Box::new(GcnNorm),
    ];
    let transform = Compose::new(transforms);
    let graph = PlanetoidDataset::new(&params.data_dir, params.dataset).load(Some(&transform))?;
    info!("{}", graph);

    let start = Instant::now();
    let report = ogc(&graph, params)?;
    println!("Total Time: {:.4}s", start.elapsed().as_secs_f32());
    println!("Test Accuracy: {:.4}", report.test_acc);

    Ok(report)
}


#[cfg(test)]
mod tests {

    use super::{ogc, EarlyStopping, OgcSetup, OgcState};
    use crate::config::OgcParams;
    use crate::graph::{GraphData, Masks};
    use crate::model::LinearTest;
    use crate::sparse::SparseMatrix;
    use crate::transforms::gcn_norm;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};

    /// two triangles joined by one edge, one class per triangle
    fn two_communities() -> GraphData {
        let edges = [(0, 1), (1, 2), (0, 2), (2, 3), (3, 4), (4, 5), (3, 5)];
        let undirected: Vec<(usize, usize)> = edges.iter().flat_map(|&(u, v)| [(u, v), (v, u)]).collect();
        let adj = gcn_norm(&SparseMatrix::from_edges(6, &undirected).unwrap()).unwrap();
        let x = array![
            [0.8, 0.2, 0.0], [0.6, 0.4, 0.0], [0.5, 0.3, 0.2],
            [0.2, 0.3, 0.5], [0.0, 0.4, 0.6], [0.1, 0.1, 0.8]
        ];
        let masks = Masks::new(
            array![true, false, false, true, false, false],
            array![false, true, false, false, true, false],
            array![false, false, true, false, false, true],
        ).unwrap();
        GraphData::new(x, array![0, 0, 0, 1, 1, 1], Some(adj)).unwrap().with_masks(masks).unwrap()
    }

    #[test]
    fn setup_selects_training_rows_only() {
        let graph = two_communities();
        let setup = OgcSetup::new(&graph, 0.1).unwrap();
        assert_eq!(setup.selector.to_dense().diag().to_vec(), vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(setup.trainval_mask, array![true, true, false, true, true, false]);

        let adj = graph.adj.as_ref().unwrap();
        assert_abs_diff_eq!(setup.lazy_adj.get(0, 1), 0.1 * adj.get(0, 1), epsilon = 1e-7);
        assert_abs_diff_eq!(setup.lazy_adj.get(2, 2), 0.1 * adj.get(2, 2) + 0.9, epsilon = 1e-6);
    }

    #[test]
    fn frozen_iterations_stop_after_third_similar_round() {
        let params = OgcParams { beta: 0.0, eta_w: 0.0, eta_sup: 0.0, ..OgcParams::default() };
        let report = ogc(&two_communities(), &params).unwrap();
        assert!(report.stopped_early);
        assert_eq!(report.iterations, 3);
    }

    #[test]
    fn loop_is_bounded_by_max_iters() {
        let params = OgcParams { max_sim_tol: 1.0, ..OgcParams::default() };
        let report = ogc(&two_communities(), &params).unwrap();
        assert!(!report.stopped_early);
        assert_eq!(report.iterations, 64);
        assert!((0.0..=1.0).contains(&report.test_acc));
    }

    #[test]
    fn eta_sup_decays_geometrically() {
        for k in [1usize, 5, 10] {
            let params = OgcParams { max_sim_tol: 1.0, max_iters: k, ..OgcParams::default() };
            let report = ogc(&two_communities(), &params).unwrap();
            assert_abs_diff_eq!(report.eta_sup, 0.001 * 0.9f32.powi(k as i32), epsilon = 1e-9);
        }
    }

    #[test]
    fn update_u_smooths_then_corrects_training_rows() {
        let graph = two_communities();
        let setup = OgcSetup::new(&graph, 0.5).unwrap();
        let mut state = OgcState { u: graph.x.clone(), eta_sup: 0.1, last_pred: array![0, 0, 0, 0, 0, 0], last_acc: 0.0 };
        let pred = Array2::<f32>::zeros((6, 2));
        let w = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];

        state.update_u(&setup, &pred, &w, 0.9).unwrap();

        let smoothed = setup.lazy_adj.matmul(&graph.x).unwrap();
        // untouched rows only see the smoothing
        assert_abs_diff_eq!(state.u[[1, 0]], smoothed[[1, 0]], epsilon = 1e-6);
        // row 0 has label 0, residual -1 on class 0, so column 0 grows by 0.1 * 2
        assert_abs_diff_eq!(state.u[[0, 0]], smoothed[[0, 0]] + 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(state.eta_sup, 0.09, epsilon = 1e-7);
    }

    #[test]
    fn stopping_iteration_accuracy_is_not_recorded() {
        let n = 1000;
        let mut state = OgcState { u: Array2::zeros((n, 1)), eta_sup: 0.001, last_pred: Array1::zeros(n), last_acc: 0.1 };
        let mut stopping = EarlyStopping::new(0.995, 2, false);

        // every round flips one more node: similarity 0.999, accuracy keeps moving
        let mut pred = Array1::<usize>::zeros(n);
        let mut accs = Vec::new();
        let mut stopped_at = None;
        for i in 1..=5 {
            pred[i] = 1;
            let test_acc = 0.5 + 0.1 * i as f32;
            accs.push(test_acc);
            let outcome = LinearTest { loss: 0.0, trainval_acc: 0.0, test_acc, pred: pred.clone() };
            if state.advance(outcome, &mut stopping) {
                stopped_at = Some(i);
                break;
            }
        }

        assert_eq!(stopped_at, Some(3));
        assert_eq!(state.last_acc, accs[1]);
        assert_ne!(state.last_acc, accs[2]);
        assert_eq!(state.last_pred[3], 0);
        assert_eq!(state.last_pred[2], 1);
    }

    #[test]
    fn patience_counting_modes() {
        let rounds = [1.0, 0.5, 1.0, 0.2, 1.0];

        let mut monotonic = EarlyStopping::new(0.995, 2, false);
        let stops: Vec<bool> = rounds.iter().map(|s| monotonic.observe(*s)).collect();
        assert_eq!(stops, vec![false, false, false, false, true]);

        let mut resetting = EarlyStopping::new(0.995, 2, true);
        assert!(rounds.iter().all(|s| !resetting.observe(*s)));
        assert_eq!(resetting.patience(), 1);
    }

    #[test]
    fn graph_without_masks_is_rejected() {
        let mut graph = two_communities();
        graph.masks = None;
        assert!(ogc(&graph, &OgcParams::default()).is_err());
    }
}
