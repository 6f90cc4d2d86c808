use std::time::Instant;
use ndarray::{concatenate, Axis};
use serde::Serialize;
use tracing::{debug, info};
use crate::config::BridgeParams;
use crate::datasets::Tacm12kDataset;
use crate::error::{Error, Result};
use crate::functional::{argmax_rows, cross_entropy, mask_indices};
use crate::graph::GraphData;
use crate::metrics::{masked_accuracy, BestTracker};
use crate::model::{Bridge, BridgeConfig};
use crate::optim::{Adam, AdamGroup};
use crate::table::{Relation, Table};
use crate::transforms::{build_homo_graph, GcnNorm};


pub const PAPER_TABLE: &str = "paper_table";
pub const AUTHOR_TABLE: &str = "author_table";


fn lookup(table: &Table, column: &str, id: &str) -> Result<usize> {
    table.position(id).ok_or_else(|| Error::UnknownId { column: column.to_string(), id: id.to_string() })
}

/// Citation edges followed by authorship edges, in one index space where
/// papers take `0..n_papers` and authors `n_papers..n_papers + n_authors`.
pub fn relation_edges(papers: &Table, authors: &Table, citations: &Relation, writings: &Relation) -> Result<Vec<(usize, usize)>> {

    let offset = papers.len();
    let mut edges = Vec::with_capacity(citations.len() + writings.len());

    for (src, dst) in &citations.pairs {
        edges.push((lookup(papers, &citations.src_col, src)?, lookup(papers, &citations.dst_col, dst)?));
    }
    for (paper, author) in &writings.pairs {
        edges.push((lookup(papers, &writings.src_col, paper)?, offset + lookup(authors, &writings.dst_col, author)?));
    }

    Ok(edges)
}

/// Builds the normalized paper + author graph and attaches both tables to it.
pub fn prepare_graph(dataset: Tacm12kDataset) -> Result<GraphData> {

    let Tacm12kDataset { paper_table, author_table, citations, writings, paper_embeddings, author_embeddings } = dataset;

    let edges = relation_edges(&paper_table, &author_table, &citations, &writings)?;
    let x = concatenate(Axis(0), &[paper_embeddings.view(), author_embeddings.view()])?;
    let y = paper_table.y().cloned()
        .ok_or_else(|| Error::Dataset(format!("table {} has no target column", paper_table.name())))?;
    let masks = paper_table.masks().cloned()
        .ok_or_else(|| Error::Dataset(format!("table {} has no split masks", paper_table.name())))?;

    let mut graph = build_homo_graph(&edges, paper_table.len(), author_table.len(), x, y, Some(&GcnNorm))?
        .with_masks(masks)?;
    graph.set_table(PAPER_TABLE, paper_table);
    graph.set_table(AUTHOR_TABLE, author_table);

    info!("{}", graph);
    Ok(graph)
}


#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EpochMetrics {
    pub train_acc: f32,
    pub val_acc: f32,
    pub test_acc: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BridgeReport {
    pub losses: Vec<f32>,
    pub best: BestTracker,
}


/// Adam groups for the table encoder and the graph encoder, in that order.
/// The table encoder is trained without weight decay unless `wd` is set.
pub fn adam_groups(params: &BridgeParams) -> Vec<AdamGroup> {
    vec![
        AdamGroup { lr: params.lr, weight_decay: params.wd.unwrap_or(0.0) },
        AdamGroup { lr: params.graph_lr, weight_decay: params.graph_wd },
    ]
}


/// Model, optimizer and the node counts the forward pass needs.
pub struct BridgeTrainer {
    pub model: Bridge,
    optimizer: Adam,
    n_target: usize,
    n_total: usize,
}

impl BridgeTrainer {

    pub fn new(graph: &GraphData, params: &BridgeParams) -> Result<BridgeTrainer> {

        let papers = graph.table(PAPER_TABLE)?;
        let authors = graph.table(AUTHOR_TABLE)?;

        let config = BridgeConfig {
            tab_dim: params.tab_dim,
            table_hidden_dim: graph.x.ncols(),
            graph_hidden_dim: params.graph_hidden_dim,
            graph_output_dim: papers.num_classes(),
            graph_layers: params.graph_layers,
            graph_dropout: params.gcn_dropout,
            seed: params.seed,
        };
        debug!("{:?}", config);

        let optimizer = Adam::new(adam_groups(params));
        debug!("{:?}", optimizer.groups());

        Ok(Self {
            model: Bridge::new(&config, &papers.stats_dict())?,
            optimizer,
            n_target: papers.len(),
            n_total: papers.len() + authors.len(),
        })
    }

    /// One optimizer step on the training rows, returns the loss.
    pub fn train_epoch(&mut self, graph: &GraphData) -> Result<f32> {

        let adj = graph.adj.as_ref().ok_or(Error::MissingAdjacency)?;
        let train_rows = mask_indices(&graph.masks()?.train);

        self.model.train();
        self.model.zero_grad();
        let logits = self.model.forward(graph.table(PAPER_TABLE)?, &graph.x, adj, self.n_target, self.n_total)?;
        let (loss, grad) = cross_entropy(&logits, &graph.y, &train_rows)?;
        self.model.backward(&grad, adj)?;

        let model = &mut self.model;
        self.optimizer.step(vec![model.table_encoder.parameters_mut(), model.graph_encoder.parameters_mut()])?;
        Ok(loss)
    }

    pub fn test_epoch(&mut self, graph: &GraphData) -> Result<EpochMetrics> {

        let adj = graph.adj.as_ref().ok_or(Error::MissingAdjacency)?;
        let masks = graph.masks()?;

        self.model.eval();
        let logits = self.model.forward(graph.table(PAPER_TABLE)?, &graph.x, adj, self.n_target, self.n_total)?;
        let preds = argmax_rows(&logits)?;

        Ok(EpochMetrics {
            train_acc: masked_accuracy(&preds, &graph.y, &masks.train),
            val_acc: masked_accuracy(&preds, &graph.y, &masks.val),
            test_acc: masked_accuracy(&preds, &graph.y, &masks.test),
        })
    }
}


/// Trains for `params.epochs` epochs, keeping the test accuracy of the best validation epoch.
pub fn train(graph: &GraphData, params: &BridgeParams) -> Result<BridgeReport> {

    let mut trainer = BridgeTrainer::new(graph, params)?;
    let mut best = BestTracker::new();
    let mut losses = Vec::with_capacity(params.epochs);

    for epoch in 1..=params.epochs {
        let loss = trainer.train_epoch(graph)?;
        let metrics = trainer.test_epoch(graph)?;
        println!("Epoch: [{}/{}]Loss: {:.4} train_acc: {:.4} val_acc: {:.4} test_acc: {:.4} ",
            epoch, params.epochs, loss, metrics.train_acc, metrics.val_acc, metrics.test_acc);

        if best.update(epoch, metrics.val_acc, metrics.test_acc) {
            debug!("new best validation accuracy at epoch {}", epoch);
        }
        losses.push(loss);
    }

    Ok(BridgeReport { losses, best })
}

pub fn run(params: &BridgeParams) -> Result<BridgeReport> {

    info!("{}", params);
    let graph = prepare_graph(Tacm12kDataset::load(&params.data_dir)?)?;

    let start = Instant::now();
    let report = train(&graph, params)?;
    println!("Total Time: {:.4}s", start.elapsed().as_secs_f32());
    println!("Bridge result: Best Val acc: {:.4}, Best Test acc: {:.4}", report.best.best_val_acc, report.best.best_test_acc);

    Ok(report)
}
