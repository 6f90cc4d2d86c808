use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use clap::ValueEnum;
use flate2::read::GzDecoder;
use ndarray::{Array1, Array2};
use ndarray_npy::read_npy;
use tracing::{debug, info};
use crate::error::{Error, Result};
use crate::graph::{GraphData, Masks};
use crate::sparse::SparseMatrix;
use crate::table::{ColumnType, Relation, Table};
use crate::transforms::Transform;


#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, ValueEnum)]
pub enum PlanetoidName {
    #[value(name = "citeseer")]
    CiteSeer,
    #[value(name = "cora")]
    Cora,
    #[value(name = "pubmed")]
    PubMed,
}

impl Display for PlanetoidName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PlanetoidName::CiteSeer => "citeseer",
            PlanetoidName::Cora => "cora",
            PlanetoidName::PubMed => "pubmed",
        };
        write!(f, "{}", name)
    }
}


fn read_masks(dir: &Path) -> Result<Masks> {
    let train: Array1<bool> = read_npy(dir.join("train_mask.npy"))?;
    let val: Array1<bool> = read_npy(dir.join("val_mask.npy"))?;
    let test: Array1<bool> = read_npy(dir.join("test_mask.npy"))?;
    Masks::new(train, val, test)
}

fn to_labels(raw: &Array1<i64>) -> Result<Array1<usize>> {
    raw.iter().map(|&v| {
        usize::try_from(v).map_err(|_| Error::Dataset(format!("negative label {}", v)))
    }).collect::<Result<Vec<usize>>>().map(Array1::from)
}

/// Opens `<dir>/<stem>.csv`, falling back to a gzipped `<dir>/<stem>.csv.gz`.
fn open_csv(dir: &Path, stem: &str) -> Result<Box<dyn Read>> {
    let plain = dir.join(format!("{}.csv", stem));
    if plain.exists() {
        return Ok(Box::new(BufReader::new(File::open(plain)?)));
    }
    let gz = dir.join(format!("{}.csv.gz", stem));
    if gz.exists() {
        return Ok(Box::new(GzDecoder::new(BufReader::new(File::open(gz)?))));
    }
    Err(Error::Dataset(format!("neither {}.csv nor {}.csv.gz found in {}", stem, stem, dir.display())))
}


/// Citation graphs stored as npy arrays under `<root>/<name>/`.
#[derive(Clone, Debug)]
pub struct PlanetoidDataset {
    pub root: PathBuf,
    pub name: PlanetoidName,
}

impl PlanetoidDataset {

    pub fn new<P: AsRef<Path>>(root: P, name: PlanetoidName) -> PlanetoidDataset {
        Self { root: root.as_ref().to_path_buf(), name }
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.root.join(self.name.to_string())
    }

    /// Reads features, labels, edges and split masks; edges are made undirected.
    pub fn load(&self, transform: Option<&dyn Transform>) -> Result<GraphData> {

        let dir = self.raw_dir();
        info!("loading {} from {}", self.name, dir.display());

        let x: Array2<f32> = read_npy(dir.join("x.npy"))?;
        let y = to_labels(&read_npy(dir.join("y.npy"))?)?;
        let edge_index: Array2<i64> = read_npy(dir.join("edge_index.npy"))?;

        if edge_index.nrows() != 2 {
            return Err(Error::Shape(format!("edge_index must have 2 rows, got {:?}", edge_index.dim())));
        }
        if y.len() != x.nrows() {
            return Err(Error::Shape(format!("{} labels for {} nodes", y.len(), x.nrows())));
        }

        let num_nodes = x.nrows();
        let mut edges = Vec::with_capacity(2 * edge_index.ncols());
        for (&src, &dst) in edge_index.row(0).iter().zip(edge_index.row(1).iter()) {
            let (u, v) = match (usize::try_from(src), usize::try_from(dst)) {
                (Ok(u), Ok(v)) if u < num_nodes && v < num_nodes => (u, v),
                _ => return Err(Error::Dataset(format!("edge ({}, {}) outside {} nodes", src, dst, num_nodes))),
            };
            edges.push((u, v));
            edges.push((v, u));
        }

        let adj = SparseMatrix::from_edges(num_nodes, &edges)?;
        let graph = GraphData::new(x, y, Some(adj))?.with_masks(read_masks(&dir)?)?;
        debug!("{}", graph);

        match transform {
            Some(transform) => transform.apply(graph),
            None => Ok(graph),
        }
    }
}


/// The TACM12K relational dataset: papers, authors, citations, authorship
/// and precomputed embeddings for both entity tables.
#[derive(Clone, Debug)]
pub struct Tacm12kDataset {
    pub paper_table: Table,
    pub author_table: Table,
    pub citations: Relation,
    pub writings: Relation,
    pub paper_embeddings: Array2<f32>,
    pub author_embeddings: Array2<f32>,
}

impl Tacm12kDataset {

    pub const DIR: &'static str = "tacm12k";

    /// Reads `<root>/tacm12k/`. Split masks are attached to the paper table.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Tacm12kDataset> {

        let dir = root.as_ref().join(Self::DIR);
        info!("loading TACM12K from {}", dir.display());

        let paper_schema = [
            ("year", ColumnType::Categorical),
            ("conference", ColumnType::Categorical),
            ("title", ColumnType::Text),
            ("abstract", ColumnType::Text),
        ];
        let paper_table = Table::from_csv_reader("papers", open_csv(&dir, "papers")?, "paper_id", &paper_schema, Some("label"))?
            .with_masks(read_masks(&dir)?)?;

        let author_schema = [
            ("name", ColumnType::Text),
            ("firm", ColumnType::Categorical),
        ];
        let author_table = Table::from_csv_reader("authors", open_csv(&dir, "authors")?, "author_id", &author_schema, None)?;

        let citations = Relation::from_csv_reader("citations", open_csv(&dir, "citations")?, "paper_id", "paper_id_cited")?;
        let writings = Relation::from_csv_reader("writings", open_csv(&dir, "writings")?, "paper_id", "author_id")?;

        let paper_embeddings: Array2<f32> = read_npy(dir.join("paper_embeddings.npy"))?;
        let author_embeddings: Array2<f32> = read_npy(dir.join("author_embeddings.npy"))?;

        if paper_embeddings.nrows() != paper_table.len() || author_embeddings.nrows() != author_table.len() {
            return Err(Error::Shape(format!(
                "embeddings of {} papers and {} authors for tables of {} and {} rows",
                paper_embeddings.nrows(), author_embeddings.nrows(), paper_table.len(), author_table.len()
            )));
        }
        if paper_embeddings.ncols() != author_embeddings.ncols() {
            return Err(Error::Shape(format!(
                "paper embedding width {} differs from author embedding width {}",
                paper_embeddings.ncols(), author_embeddings.ncols()
            )));
        }

        info!("{}", paper_table);
        info!("{}", author_table);
        debug!("{} citations, {} writings", citations.len(), writings.len());

        Ok(Self { paper_table, author_table, citations, writings, paper_embeddings, author_embeddings })
    }
}


#[cfg(test)]
mod tests {

    use super::{PlanetoidDataset, PlanetoidName, Tacm12kDataset};
    use crate::transforms::GcnNorm;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use ndarray::{array, Array2};
    use ndarray_npy::write_npy;
    use std::fs::{self, File};
    use std::io::Write;
    use std::path::Path;

    fn write_planetoid(root: &Path, name: &str, edges: Array2<i64>) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        write_npy(dir.join("x.npy"), &array![[1.0f32, 0.0], [0.0, 1.0], [1.0, 1.0]]).unwrap();
        write_npy(dir.join("y.npy"), &array![0i64, 1, 0]).unwrap();
        write_npy(dir.join("edge_index.npy"), &edges).unwrap();
        write_npy(dir.join("train_mask.npy"), &array![true, false, false]).unwrap();
        write_npy(dir.join("val_mask.npy"), &array![false, true, false]).unwrap();
        write_npy(dir.join("test_mask.npy"), &array![false, false, true]).unwrap();
    }

    #[test]
    fn planetoid_layout_is_read() {
        let root = tempfile::tempdir().unwrap();
        write_planetoid(root.path(), "citeseer", array![[0i64, 1], [1, 2]]);

        let dataset = PlanetoidDataset::new(root.path(), PlanetoidName::CiteSeer);
        let graph = dataset.load(None).unwrap();
        assert_eq!(graph.num_nodes(), 3);
        assert_eq!(graph.num_classes, 2);
        let adj = graph.adj.as_ref().unwrap();
        assert_eq!(adj.get(1, 0), 1.0);
        assert_eq!(adj.get(2, 1), 1.0);
        assert_eq!(adj.get(0, 2), 0.0);
        assert_eq!(graph.masks().unwrap().trainval(), array![true, true, false]);

        let normalized = dataset.load(Some(&GcnNorm)).unwrap();
        assert_eq!(normalized.adj.unwrap().nnz(), 7);
    }

    #[test]
    fn planetoid_rejects_dangling_edges() {
        let root = tempfile::tempdir().unwrap();
        write_planetoid(root.path(), "cora", array![[0i64], [5]]);
        assert!(PlanetoidDataset::new(root.path(), PlanetoidName::Cora).load(None).is_err());
        assert!(PlanetoidDataset::new(root.path(), PlanetoidName::PubMed).load(None).is_err());
    }

    #[test]
    fn tacm12k_reads_plain_and_gzipped_csv() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join(Tacm12kDataset::DIR);
        fs::create_dir_all(&dir).unwrap();

        fs::write(dir.join("papers.csv"), "paper_id,year,conference,title,abstract,label\n\
            10,2001,KDD,a,x,0\n11,2002,KDD,b,y,1\n12,2001,SIGIR,c,z,1\n").unwrap();
        fs::write(dir.join("authors.csv"), "author_id,name,firm\n7,Ann,uni\n8,Bo,lab\n").unwrap();
        fs::write(dir.join("citations.csv"), "paper_id,paper_id_cited\n10,11\n12,10\n").unwrap();

        let mut gz = GzEncoder::new(File::create(dir.join("writings.csv.gz")).unwrap(), Compression::default());
        gz.write_all(b"paper_id,author_id\n10,7\n11,8\n12,8\n").unwrap();
        gz.finish().unwrap();

        write_npy(dir.join("paper_embeddings.npy"), &Array2::<f32>::ones((3, 4))).unwrap();
        write_npy(dir.join("author_embeddings.npy"), &Array2::<f32>::zeros((2, 4))).unwrap();
        write_npy(dir.join("train_mask.npy"), &array![true, false, false]).unwrap();
        write_npy(dir.join("val_mask.npy"), &array![false, true, false]).unwrap();
        write_npy(dir.join("test_mask.npy"), &array![false, false, true]).unwrap();

        let dataset = Tacm12kDataset::load(root.path()).unwrap();
        assert_eq!(dataset.paper_table.len(), 3);
        assert_eq!(dataset.paper_table.num_classes(), 2);
        assert!(dataset.paper_table.masks().is_some());
        assert_eq!(dataset.author_table.position("8"), Some(1));
        assert_eq!(dataset.citations.pairs[1], ("12".to_string(), "10".to_string()));
        assert_eq!(dataset.writings.len(), 3);

        fs::remove_file(dir.join("authors.csv")).unwrap();
        assert!(Tacm12kDataset::load(root.path()).is_err());
    }

    #[test]
    fn dataset_names_match_directories() {
        assert_eq!(PlanetoidName::CiteSeer.to_string(), "citeseer");
        assert_eq!(PlanetoidName::PubMed.to_string(), "pubmed");
    }
}
