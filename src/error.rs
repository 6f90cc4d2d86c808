use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("graph has no adjacency matrix")]
    MissingAdjacency,

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("unknown id '{id}' in column '{column}'")]
    UnknownId { column: String, id: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    ReadNpy(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    NdShape(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, Error>;
