use ndarray::{Array1, Array2, Axis};
use tracing::debug;
use crate::error::{Error, Result};
use crate::graph::{AnyGraph, GraphData};
use crate::sparse::SparseMatrix;


/// A graph transform rewrites its input in place and hands the same graph back,
/// so calls can be chained.
pub trait Transform {

    fn forward<'a>(&self, data: &'a mut AnyGraph) -> Result<&'a mut AnyGraph>;

    fn apply(&self, graph: GraphData) -> Result<GraphData> {
        let mut data = AnyGraph::Homo(graph);
        self.forward(&mut data)?;
        data.into_homo()
    }
}


/// `D^{-1/2} (A + I) D^{-1/2}` with `D` the degree matrix of `A + I`.
/// Nodes of degree zero get a zero scale instead of an infinity.
pub fn gcn_norm(adj: &SparseMatrix) -> Result<SparseMatrix> {

    if !adj.is_square() {
        return Err(Error::Shape(format!("gcn normalization needs a square adjacency, got {:?}", adj.shape())));
    }

    let adj = adj.add(&SparseMatrix::identity(adj.nrows()))?;
    let d_inv_sqrt: Vec<f32> = adj.row_sums().iter().map(|d| {
        if *d > 0.0 { d.powf(-0.5) } else { 0.0 }
    }).collect();

    adj.scale_rows_cols(&d_inv_sqrt, &d_inv_sqrt)
}


/// Symmetric GCN normalization of the adjacency (Kipf & Welling, 2017).
///
/// Homogeneous graphs must carry an adjacency. On heterogeneous graphs the
/// top-level adjacency and every non-bipartite edge store are normalized
/// independently; stores without an adjacency are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct GcnNorm;

impl Transform for GcnNorm {

    fn forward<'a>(&self, data: &'a mut AnyGraph) -> Result<&'a mut AnyGraph> {

        match data {
            AnyGraph::Homo(graph) => {
                let adj = graph.adj.as_ref().ok_or(Error::MissingAdjacency)?;
                graph.adj = Some(gcn_norm(adj)?);
            },
            AnyGraph::Hetero(graph) => {
                graph.adj = graph.adj.as_ref().map(gcn_norm).transpose()?;
                for store in graph.edge_stores.iter_mut() {
                    if store.is_bipartite() {
                        debug!("skipping bipartite edge store {:?}", store.key());
                        continue;
                    }
                    store.adj = store.adj.as_ref().map(gcn_norm).transpose()?;
                }
            },
        }

        Ok(data)
    }
}


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureNorm {
    /// rows sum to one
    Sum,
    /// rows have unit euclidean norm
    L2,
}

/// Row-wise normalization of node features.
#[derive(Clone, Copy, Debug)]
pub struct NormalizeFeatures {
    pub mode: FeatureNorm,
}

impl NormalizeFeatures {

    pub fn new(mode: FeatureNorm) -> NormalizeFeatures {
        Self { mode }
    }

    fn normalize_rows(&self, x: &mut Array2<f32>) {
        for mut row in x.axis_iter_mut(Axis(0)) {
            let norm = match self.mode {
                FeatureNorm::Sum => row.sum(),
                FeatureNorm::L2 => row.mapv(|a| a.powi(2)).sum().sqrt(),
            };
            // all-zero rows stay zero
            if norm != 0.0 {
                row.mapv_inplace(|a| a / norm);
            }
        }
    }
}

impl Transform for NormalizeFeatures {

    fn forward<'a>(&self, data: &'a mut AnyGraph) -> Result<&'a mut AnyGraph> {
        match data {
            AnyGraph::Homo(graph) => self.normalize_rows(&mut graph.x),
            AnyGraph::Hetero(graph) => {
                for store in graph.node_stores.values_mut() {
                    if let Some(x) = store.x.as_mut() {
                        self.normalize_rows(x);
                    }
                }
            },
        }
        Ok(data)
    }
}


/// Runs transforms one after the other.
pub struct Compose {
    transforms: Vec<Box<dyn Transform>>,
}

impl Compose {
    pub fn new(transforms: Vec<Box<dyn Transform>>) -> Compose {
        Self { transforms }
    }
}

impl Transform for Compose {

    fn forward<'a>(&self, data: &'a mut AnyGraph) -> Result<&'a mut AnyGraph> {
        for transform in &self.transforms {
            transform.forward(data)?;
        }
        Ok(data)
    }
}


/// Builds an undirected homogeneous graph over `n_src + n_tgt` nodes from an edge list
/// whose endpoints already live in the unified index space.
pub fn build_homo_graph(
    edges: &[(usize, usize)],
    n_src: usize,
    n_tgt: usize,
    x: Array2<f32>,
    y: Array1<usize>,
    transform: Option<&dyn Transform>,
) -> Result<GraphData> {

    let num_nodes = n_src + n_tgt;
    if x.nrows() != num_nodes {
        return Err(Error::Shape(format!("{} feature rows for {} nodes", x.nrows(), num_nodes)));
    }

    let undirected: Vec<(usize, usize)> = edges.iter().flat_map(|&(u, v)| [(u, v), (v, u)]).collect();
    let adj = SparseMatrix::from_edges(num_nodes, &undirected)?;
    debug!("built adjacency with {} entries from {} edges", adj.nnz(), edges.len());

    let graph = GraphData::new(x, y, Some(adj))?;
    match transform {
        Some(transform) => transform.apply(graph),
        None => Ok(graph),
    }
}
