use std::collections::BTreeMap;
use std::fmt::Display;
use ndarray::{Array1, Array2};
use crate::error::{Error, Result};
use crate::sparse::SparseMatrix;
use crate::table::Table;


/// Train / validation / test split over the labelled rows.
#[derive(Clone, Debug, PartialEq)]
pub struct Masks {
    pub train: Array1<bool>,
    pub val: Array1<bool>,
    pub test: Array1<bool>,
}

impl Masks {

    pub fn new(train: Array1<bool>, val: Array1<bool>, test: Array1<bool>) -> Result<Masks> {
        if train.len() != val.len() || train.len() != test.len() {
            return Err(Error::Shape(format!(
                "mask lengths differ: train {}, val {}, test {}", train.len(), val.len(), test.len()
            )));
        }
        Ok(Self { train, val, test })
    }

    pub fn len(&self) -> usize {
        self.train.len()
    }

    pub fn is_empty(&self) -> bool {
        self.train.is_empty()
    }

    /// union of the train and validation masks
    pub fn trainval(&self) -> Array1<bool> {
        ndarray::Zip::from(&self.train).and(&self.val).map_collect(|t, v| *t || *v)
    }
}


/// Homogeneous graph: one node type, one adjacency.
/// `y` may be shorter than the node count when only the leading rows are labelled.
#[derive(Clone, Debug)]
pub struct GraphData {
    pub x: Array2<f32>,
    pub y: Array1<usize>,
    pub adj: Option<SparseMatrix>,
    pub masks: Option<Masks>,
    pub num_classes: usize,
    tables: BTreeMap<String, Table>,
}

impl Display for GraphData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph: {} nodes, {} features, {} edges, {} classes",
            self.num_nodes(),
            self.x.ncols(),
            self.adj.as_ref().map(|a| a.nnz()).unwrap_or(0),
            self.num_classes
        )
    }
}

impl GraphData {

    pub fn new(x: Array2<f32>, y: Array1<usize>, adj: Option<SparseMatrix>) -> Result<GraphData> {

        if let Some(adj) = &adj {
            if adj.shape() != (x.nrows(), x.nrows()) {
                return Err(Error::Shape(format!("adjacency {:?} for {} nodes", adj.shape(), x.nrows())));
            }
        }
        if y.len() > x.nrows() {
            return Err(Error::Shape(format!("{} labels for {} nodes", y.len(), x.nrows())));
        }

        let num_classes = y.iter().max().map(|m| m + 1).unwrap_or(0);
        Ok(Self { x, y, adj, masks: None, num_classes, tables: BTreeMap::new() })
    }

    pub fn with_masks(mut self, masks: Masks) -> Result<GraphData> {
        if masks.len() != self.y.len() {
            return Err(Error::Shape(format!("masks of length {} for {} labels", masks.len(), self.y.len())));
        }
        self.masks = Some(masks);
        Ok(self)
    }

    pub fn num_nodes(&self) -> usize {
        self.x.nrows()
    }

    pub fn masks(&self) -> Result<&Masks> {
        self.masks.as_ref().ok_or_else(|| Error::Dataset("graph has no split masks".to_string()))
    }

    /// Attaches a table under `name`, replacing any table already stored there.
    pub fn set_table(&mut self, name: &str, table: Table) {
        self.tables.insert(name.to_string(), table);
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| Error::Dataset(format!("graph has no table named {}", name)))
    }
}


#[derive(Clone, Debug, Default)]
pub struct NodeStore {
    pub num_nodes: usize,
    pub x: Option<Array2<f32>>,
}

#[derive(Clone, Debug)]
pub struct EdgeStore {
    pub src_type: String,
    pub relation: String,
    pub dst_type: String,
    pub adj: Option<SparseMatrix>,
}

impl EdgeStore {

    pub fn new(src_type: &str, relation: &str, dst_type: &str, adj: Option<SparseMatrix>) -> EdgeStore {
        Self {
            src_type: src_type.to_string(),
            relation: relation.to_string(),
            dst_type: dst_type.to_string(),
            adj,
        }
    }

    /// connects two different node types
    pub fn is_bipartite(&self) -> bool {
        self.src_type != self.dst_type
    }

    pub fn key(&self) -> (&str, &str, &str) {
        (self.src_type.as_str(), self.relation.as_str(), self.dst_type.as_str())
    }
}

/// Heterogeneous graph: typed node stores and `(src, relation, dst)` edge stores.
#[derive(Clone, Debug, Default)]
pub struct HeteroGraphData {
    pub adj: Option<SparseMatrix>,
    pub node_stores: BTreeMap<String, NodeStore>,
    pub edge_stores: Vec<EdgeStore>,
}

impl HeteroGraphData {

    pub fn new() -> HeteroGraphData {
        Self::default()
    }

    pub fn add_node_type(&mut self, node_type: &str, num_nodes: usize, x: Option<Array2<f32>>) -> Result<()> {
        if let Some(x) = &x {
            if x.nrows() != num_nodes {
                return Err(Error::Shape(format!("{} feature rows for {} nodes of type {}", x.nrows(), num_nodes, node_type)));
            }
        }
        self.node_stores.insert(node_type.to_string(), NodeStore { num_nodes, x });
        Ok(())
    }

    /// Adds an edge store, the adjacency shape must match the registered node counts.
    pub fn add_edge_store(&mut self, src_type: &str, relation: &str, dst_type: &str, adj: Option<SparseMatrix>) -> Result<()> {

        let count = |node_type: &str| -> Result<usize> {
            self.node_stores.get(node_type).map(|s| s.num_nodes)
                .ok_or_else(|| Error::Dataset(format!("unknown node type {}", node_type)))
        };
        let expected = (count(src_type)?, count(dst_type)?);
        if let Some(adj) = &adj {
            if adj.shape() != expected {
                return Err(Error::Shape(format!(
                    "adjacency {:?} for edge type ({}, {}, {}) expected {:?}", adj.shape(), src_type, relation, dst_type, expected
                )));
            }
        }

        self.edge_stores.push(EdgeStore::new(src_type, relation, dst_type, adj));
        Ok(())
    }

    pub fn edge_store(&self, src_type: &str, relation: &str, dst_type: &str) -> Option<&EdgeStore> {
        self.edge_stores.iter().find(|s| s.key() == (src_type, relation, dst_type))
    }
}


/// Either graph flavour, as accepted by transforms.
#[derive(Clone, Debug)]
pub enum AnyGraph {
    Homo(GraphData),
    Hetero(HeteroGraphData),
}

impl From<GraphData> for AnyGraph {
    fn from(graph: GraphData) -> Self {
        AnyGraph::Homo(graph)
    }
}

impl From<HeteroGraphData> for AnyGraph {
    fn from(graph: HeteroGraphData) -> Self {
        AnyGraph::Hetero(graph)
    }
}

impl AnyGraph {

    pub fn into_homo(self) -> Result<GraphData> {
        match self {
            AnyGraph::Homo(graph) => Ok(graph),
            AnyGraph::Hetero(_) => Err(Error::Dataset("expected a homogeneous graph".to_string())),
        }
    }

    pub fn into_hetero(self) -> Result<HeteroGraphData> {
        match self {
            AnyGraph::Hetero(graph) => Ok(graph),
            AnyGraph::Homo(_) => Err(Error::Dataset("expected a heterogeneous graph".to_string())),
        }
    }
}


#[cfg(test)]
mod tests {

    use super::{GraphData, HeteroGraphData, Masks};
    use crate::sparse::SparseMatrix;
    use ndarray::{array, Array2};

    #[test]
    fn trainval_is_union() {
        let masks = Masks::new(array![true, false, false], array![false, true, false], array![false, false, true]).unwrap();
        assert_eq!(masks.trainval(), array![true, true, false]);
        assert!(Masks::new(array![true], array![true, false], array![true]).is_err());
    }

    #[test]
    fn graph_checks_shapes() {
        let x = Array2::<f32>::zeros((3, 2));
        let adj = SparseMatrix::identity(2);
        assert!(GraphData::new(x.clone(), array![0, 1], Some(adj)).is_err());

        let graph = GraphData::new(x, array![0, 4], Some(SparseMatrix::identity(3))).unwrap();
        assert_eq!(graph.num_classes, 5);
        assert!(graph.table("paper_table").is_err());
        assert!(graph.masks().is_err());
    }

    #[test]
    fn edge_store_bipartite_flag() {
        let mut hetero = HeteroGraphData::new();
        hetero.add_node_type("paper", 2, None).unwrap();
        hetero.add_node_type("author", 3, None).unwrap();
        hetero.add_edge_store("paper", "cites", "paper", Some(SparseMatrix::identity(2))).unwrap();
        hetero.add_edge_store("paper", "written_by", "author", None).unwrap();
        assert!(hetero.add_edge_store("paper", "cites", "author", Some(SparseMatrix::identity(2))).is_err());

        assert!(!hetero.edge_store("paper", "cites", "paper").unwrap().is_bipartite());
        assert!(hetero.edge_store("paper", "written_by", "author").unwrap().is_bipartite());
    }
}
