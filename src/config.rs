use std::fmt::Display;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use serde_json::Value;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;
use crate::datasets::PlanetoidName;
use crate::error::{Error, Result};


#[derive(Parser, Debug, Clone)]
#[command(name = "bridge_tacm12k", about = "BRIDGE (table encoder + GCN) on the TACM12K citation dataset")]
pub struct BridgeArgs {
    /// Categorical embedding dim of the table encoder
    #[arg(long = "tab_dim", default_value_t = 256)]
    pub tab_dim: usize,

    /// Dropout for GCN
    #[arg(long = "gcn_dropout", default_value_t = 0.5)]
    pub gcn_dropout: f32,

    /// Training epochs
    #[arg(long, default_value_t = 100)]
    pub epochs: usize,

    /// Learning rate of the table encoder
    #[arg(long, default_value_t = 0.001)]
    pub lr: f32,

    /// Weight decay of the table encoder, off unless given (e.g. 5e-4)
    #[arg(long)]
    pub wd: Option<f32>,

    /// Learning rate of the graph encoder
    #[arg(long = "graph_lr", default_value_t = 0.01)]
    pub graph_lr: f32,

    /// Weight decay of the graph encoder
    #[arg(long = "graph_wd", default_value_t = 1e-4)]
    pub graph_wd: f32,

    #[arg(long = "graph_hidden_dim", default_value_t = 128)]
    pub graph_hidden_dim: usize,

    #[arg(long = "graph_layers", default_value_t = 2)]
    pub graph_layers: usize,

    /// Directory holding the `tacm12k` dataset folder
    #[arg(long = "data_dir", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Worker threads for sparse products (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// JSON file whose keys override the flags above
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct BridgeParams {
    pub tab_dim: usize,
    pub gcn_dropout: f32,
    pub epochs: usize,
    pub lr: f32,
    /// table encoder weight decay, `None` trains it without decay
    pub wd: Option<f32>,
    pub graph_lr: f32,
    pub graph_wd: f32,
    pub graph_hidden_dim: usize,
    pub graph_layers: usize,
    pub data_dir: PathBuf,
    pub seed: u64,
    pub threads: usize,
}

impl Display for BridgeParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        data_dir: {},
        tab_dim: {},
        gcn_dropout: {},
        epochs: {},
        lr: {}, wd: {},
        graph_lr: {}, graph_wd: {},
        graph_hidden_dim: {},
        graph_layers: {},
        seed: {},
        threads: {}",
        self.data_dir.display(), self.tab_dim, self.gcn_dropout, self.epochs, self.lr, self.wd.unwrap_or(0.0),
        self.graph_lr, self.graph_wd, self.graph_hidden_dim, self.graph_layers, self.seed, self.threads
        )
    }
}

impl Default for BridgeParams {
    fn default() -> Self {
        Self {
            tab_dim: 256,
            gcn_dropout: 0.5,
            epochs: 100,
            lr: 0.001,
            wd: None,
            graph_lr: 0.01,
            graph_wd: 1e-4,
            graph_hidden_dim: 128,
            graph_layers: 2,
            data_dir: PathBuf::from("data"),
            seed: 42,
            threads: 0,
        }
    }
}

impl BridgeParams {

    pub fn new(args: &BridgeArgs) -> Result<BridgeParams> {

        let mut params = Self {
            tab_dim: args.tab_dim,
            gcn_dropout: args.gcn_dropout,
            epochs: args.epochs,
            lr: args.lr,
            wd: args.wd,
            graph_lr: args.graph_lr,
            graph_wd: args.graph_wd,
            graph_hidden_dim: args.graph_hidden_dim,
            graph_layers: args.graph_layers,
            data_dir: args.data_dir.clone(),
            seed: args.seed,
            threads: args.threads,
        };

        if let Some(path) = &args.config {
            params.override_from(&read_json(path)?)?;
        }
        params.validate()?;
        Ok(params)
    }

    /// Keys present in `json` replace the current values.
    pub fn override_from(&mut self, json: &Value) -> Result<()> {
        self.tab_dim = json_usize(json, "tab_dim", self.tab_dim)?;
        self.gcn_dropout = json_f32(json, "gcn_dropout", self.gcn_dropout)?;
        self.epochs = json_usize(json, "epochs", self.epochs)?;
        self.lr = json_f32(json, "lr", self.lr)?;
        if json.get("wd").is_some() {
            self.wd = Some(json_f32(json, "wd", 0.0)?);
        }
        self.graph_lr = json_f32(json, "graph_lr", self.graph_lr)?;
        self.graph_wd = json_f32(json, "graph_wd", self.graph_wd)?;
        self.graph_hidden_dim = json_usize(json, "graph_hidden_dim", self.graph_hidden_dim)?;
        self.graph_layers = json_usize(json, "graph_layers", self.graph_layers)?;
        self.seed = json_usize(json, "seed", self.seed as usize)? as u64;
        self.threads = json_usize(json, "threads", self.threads)?;
        if let Some(dir) = json_str(json, "data_dir")? {
            self.data_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.gcn_dropout) {
            return Err(Error::Config(format!("gcn_dropout must be in [0, 1), got {}", self.gcn_dropout)));
        }
        if self.tab_dim == 0 || self.graph_hidden_dim == 0 || self.graph_layers == 0 {
            return Err(Error::Config("tab_dim, graph_hidden_dim and graph_layers must be positive".to_string()));
        }
        if self.lr <= 0.0 || self.graph_lr <= 0.0 || self.wd.map_or(false, |wd| wd < 0.0) || self.graph_wd < 0.0 {
            return Err(Error::Config("learning rates must be positive and weight decays non-negative".to_string()));
        }
        Ok(())
    }
}


#[derive(Parser, Debug, Clone)]
#[command(name = "ogc", about = "OGC (lazy graph convolution + supervised embedding updates) on Planetoid datasets")]
pub struct OgcArgs {
    #[arg(long, value_enum, default_value_t = PlanetoidName::Cora)]
    pub dataset: PlanetoidName,

    /// Directory holding one folder per Planetoid dataset
    #[arg(long = "data_dir", default_value = "data")]
    pub data_dir: PathBuf,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Worker threads for sparse products (0 = one per core)
    #[arg(long, default_value_t = 0)]
    pub threads: usize,

    /// Reset the patience counter after an iteration whose predictions changed
    #[arg(long = "reset_patience")]
    pub reset_patience: bool,

    /// JSON file with algorithm constants (decline, eta_sup, eta_w, beta, ...)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, short)]
    pub verbose: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OgcParams {
    pub dataset: PlanetoidName,
    pub data_dir: PathBuf,
    pub seed: u64,
    pub threads: usize,
    /// decay applied to `eta_sup` after every iteration
    pub decline: f32,
    /// learning rate of the supervised embedding update
    pub eta_sup: f32,
    /// learning rate of the linear map
    pub eta_w: f32,
    /// probability that a node moves to its neighbours
    pub beta: f32,
    /// prediction similarity above which an iteration counts as stable
    pub max_sim_tol: f32,
    pub max_patience: usize,
    pub max_iters: usize,
    pub reset_patience: bool,
}

impl Display for OgcParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "using hyper-params:
        dataset: {},
        data_dir: {},
        decline: {},
        eta_sup: {},
        eta_w: {},
        beta: {},
        max_sim_tol: {},
        max_patience: {},
        max_iters: {},
        reset_patience: {},
        seed: {}",
        self.dataset, self.data_dir.display(), self.decline, self.eta_sup, self.eta_w, self.beta,
        self.max_sim_tol, self.max_patience, self.max_iters, self.reset_patience, self.seed
        )
    }
}

impl Default for OgcParams {
    fn default() -> Self {
        Self {
            dataset: PlanetoidName::Cora,
            data_dir: PathBuf::from("data"),
            seed: 42,
            threads: 0,
            decline: 0.9,
            eta_sup: 0.001,
            eta_w: 0.5,
            beta: 0.1,
            max_sim_tol: 0.995,
            max_patience: 2,
            max_iters: 64,
            reset_patience: false,
        }
    }
}

impl OgcParams {

    pub fn new(args: &OgcArgs) -> Result<OgcParams> {

        let mut params = Self {
            dataset: args.dataset,
            data_dir: args.data_dir.clone(),
            seed: args.seed,
            threads: args.threads,
            reset_patience: args.reset_patience,
            ..Self::default()
        };

        if let Some(path) = &args.config {
            params.override_from(&read_json(path)?)?;
        }
        params.validate()?;
        Ok(params)
    }

    pub fn override_from(&mut self, json: &Value) -> Result<()> {
        self.decline = json_f32(json, "decline", self.decline)?;
        self.eta_sup = json_f32(json, "eta_sup", self.eta_sup)?;
        self.eta_w = json_f32(json, "eta_w", self.eta_w)?;
        self.beta = json_f32(json, "beta", self.beta)?;
        self.max_sim_tol = json_f32(json, "max_sim_tol", self.max_sim_tol)?;
        self.max_patience = json_usize(json, "max_patience", self.max_patience)?;
        self.max_iters = json_usize(json, "max_iters", self.max_iters)?;
        self.reset_patience = json_bool(json, "reset_patience", self.reset_patience)?;
        self.seed = json_usize(json, "seed", self.seed as usize)? as u64;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(Error::Config(format!("beta must be in [0, 1], got {}", self.beta)));
        }
        if self.max_iters == 0 {
            return Err(Error::Config("max_iters must be positive".to_string()));
        }
        if self.eta_sup < 0.0 || self.eta_w < 0.0 || self.decline < 0.0 {
            return Err(Error::Config("eta_sup, eta_w and decline must be non-negative".to_string()));
        }
        Ok(())
    }
}


pub fn read_json(path: &Path) -> Result<Value> {
    let f = BufReader::new(File::open(path)?);
    let json: Value = serde_json::from_reader(f)?;
    Ok(json)
}

fn json_usize(json: &Value, key: &str, default: usize) -> Result<usize> {
    match json.get(key) {
        Some(value) => value.as_u64().map(|v| v as usize)
            .ok_or_else(|| Error::Config(format!("given {} is not a non-negative integer", key))),
        None => Ok(default),
    }
}

fn json_f32(json: &Value, key: &str, default: f32) -> Result<f32> {
    match json.get(key) {
        Some(value) => value.as_f64().map(|v| v as f32)
            .ok_or_else(|| Error::Config(format!("given {} is not numeric", key))),
        None => Ok(default),
    }
}

fn json_bool(json: &Value, key: &str, default: bool) -> Result<bool> {
    match json.get(key) {
        Some(value) => value.as_bool().ok_or_else(|| Error::Config(format!("given {} is not boolean", key))),
        None => Ok(default),
    }
}

fn json_str<'a>(json: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match json.get(key) {
        Some(value) => value.as_str().map(Some).ok_or_else(|| Error::Config(format!("given {} is not a string", key))),
        None => Ok(None),
    }
}


/// Installs the global fmt subscriber, debug level when `verbose`.
pub fn init_tracing(verbose: bool) -> std::result::Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
}

/// Sizes the global rayon pool, `0` keeps rayon's default.
pub fn init_threads(threads: usize) -> std::result::Result<(), rayon::ThreadPoolBuildError> {
    if threads == 0 {
        return Ok(());
    }
    ThreadPoolBuilder::new().num_threads(threads).build_global()
}


#[cfg(test)]
mod tests {

    use super::{BridgeArgs, BridgeParams, OgcArgs, OgcParams};
    use crate::datasets::PlanetoidName;
    use clap::Parser;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn bridge_flags_and_defaults() {
        let args = BridgeArgs::parse_from(["bridge_tacm12k", "--tab_dim", "64", "--epochs", "5"]);
        let params = BridgeParams::new(&args).unwrap();
        assert_eq!(params.tab_dim, 64);
        assert_eq!(params.epochs, 5);
        assert_eq!(params.gcn_dropout, 0.5);
        assert_eq!(params.lr, 0.001);
        assert_eq!(params.wd, None);
        assert_eq!(params.graph_lr, 0.01);

        let args = BridgeArgs::parse_from(["bridge_tacm12k", "--wd", "5e-4"]);
        assert_eq!(BridgeParams::new(&args).unwrap().wd, Some(5e-4));
    }

    #[test]
    fn dataset_choices_are_distinct() {
        for (flag, name) in [("citeseer", PlanetoidName::CiteSeer), ("cora", PlanetoidName::Cora), ("pubmed", PlanetoidName::PubMed)] {
            let args = OgcArgs::try_parse_from(["ogc", "--dataset", flag]).unwrap();
            assert_eq!(args.dataset, name);
        }
        assert!(OgcArgs::try_parse_from(["ogc", "--dataset", "citeseer, cora, pubmed"]).is_err());
        assert_eq!(OgcArgs::parse_from(["ogc"]).dataset, PlanetoidName::Cora);
    }

    #[test]
    fn json_overrides_and_validation() {
        let mut params = OgcParams::default();
        params.override_from(&json!({"beta": 0.25, "max_patience": 4, "reset_patience": true})).unwrap();
        assert_eq!(params.beta, 0.25);
        assert_eq!(params.max_patience, 4);
        assert!(params.reset_patience);
        assert_eq!(params.decline, 0.9);

        assert!(params.override_from(&json!({"beta": "high"})).is_err());
        params.beta = 1.5;
        assert!(params.validate().is_err());

        let mut bridge = BridgeParams::default();
        bridge.override_from(&json!({"wd": 0.001})).unwrap();
        assert_eq!(bridge.wd, Some(0.001));
        bridge.override_from(&json!({"gcn_dropout": 1.0})).unwrap();
        assert!(bridge.validate().is_err());
    }

    #[test]
    fn config_file_is_read() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"eta_sup\": 0.01, \"max_iters\": 10}}").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let args = OgcArgs::parse_from(["ogc", "--dataset", "pubmed", "--config", path.as_str()]);
        let params = OgcParams::new(&args).unwrap();
        assert_eq!(params.dataset, PlanetoidName::PubMed);
        assert_eq!(params.eta_sup, 0.01);
        assert_eq!(params.max_iters, 10);
    }
}
