use std::collections::BTreeMap;
use ndarray::{s, Array1, Array2, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use crate::error::{Error, Result};
use crate::functional::{self, Reduction};
use crate::metrics::masked_accuracy;
use crate::optim::Sgd;
use crate::sparse::SparseMatrix;
use crate::table::{ColumnData, ColumnStats, Table};


/// A trainable matrix and its accumulated gradient.
#[derive(Clone, Debug)]
pub struct Param {
    pub value: Array2<f32>,
    pub grad: Array2<f32>,
}

impl Param {

    pub fn new(value: Array2<f32>) -> Param {
        let grad = Array2::zeros(value.raw_dim());
        Self { value, grad }
    }

    pub fn zeros(rows: usize, cols: usize) -> Param {
        Param::new(Array2::zeros((rows, cols)))
    }

    /// Glorot (Xavier) uniform initialisation.
    pub fn glorot<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Param {
        let bound = (6.0 / (rows + cols) as f32).sqrt();
        Param::new(Array2::random_using((rows, cols), Uniform::new_inclusive(-bound, bound), rng))
    }

    /// Uniform in `[-1/sqrt(fan_in), 1/sqrt(fan_in)]`, the usual linear layer default.
    pub fn fan_in_uniform<R: Rng>(rows: usize, cols: usize, fan_in: usize, rng: &mut R) -> Param {
        let bound = 1.0 / (fan_in.max(1) as f32).sqrt();
        Param::new(Array2::random_using((rows, cols), Uniform::new_inclusive(-bound, bound), rng))
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }
}


/// Graph convolution `Z = A (H W) + b`.
#[derive(Clone, Debug)]
pub struct GcnConv {
    pub weight: Param,
    pub bias: Param,
    input: Option<Array2<f32>>,
}

impl GcnConv {

    pub fn new<R: Rng>(in_dim: usize, out_dim: usize, rng: &mut R) -> GcnConv {
        Self {
            weight: Param::glorot(in_dim, out_dim, rng),
            bias: Param::zeros(1, out_dim),
            input: None,
        }
    }

    pub fn forward(&mut self, h: &Array2<f32>, adj: &SparseMatrix) -> Result<Array2<f32>> {
        let hw = h.dot(&self.weight.value);
        let z = adj.matmul(&hw)? + &self.bias.value.row(0);
        self.input = Some(h.clone());
        Ok(z)
    }

    /// Accumulates parameter gradients and returns the gradient w.r.t. the layer input.
    /// `adj_t` is the transpose of the adjacency used in `forward`.
    pub fn backward(&mut self, dz: &Array2<f32>, adj_t: &SparseMatrix) -> Result<Array2<f32>> {
        let input = self.input.as_ref().ok_or_else(|| Error::Shape("backward called before forward".to_string()))?;
        let dhw = adj_t.matmul(dz)?;
        self.weight.grad += &input.t().dot(&dhw);
        self.bias.grad += &dz.sum_axis(Axis(0)).insert_axis(Axis(0));
        Ok(dhw.dot(&self.weight.value.t()))
    }
}


/// Stacked GCN layers with ReLU in between and dropout in front of every layer.
#[derive(Clone, Debug)]
pub struct GraphEncoder {
    pub convs: Vec<GcnConv>,
    pub dropout: f32,
    training: bool,
    rng: StdRng,
    dropout_masks: Vec<Array2<f32>>,
    pre_activations: Vec<Array2<f32>>,
}

impl GraphEncoder {

    pub fn new(in_dim: usize, hidden_dim: usize, out_dim: usize, num_layers: usize, dropout: f32, seed: u64) -> Result<GraphEncoder> {

        if num_layers == 0 {
            return Err(Error::Config("graph encoder needs at least one layer".to_string()));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let convs = (0..num_layers).map(|l| {
            let fan_in = if l == 0 { in_dim } else { hidden_dim };
            let fan_out = if l + 1 == num_layers { out_dim } else { hidden_dim };
            GcnConv::new(fan_in, fan_out, &mut rng)
        }).collect();

        Ok(Self {
            convs,
            dropout,
            training: true,
            rng,
            dropout_masks: Vec::new(),
            pre_activations: Vec::new(),
        })
    }

    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    pub fn forward(&mut self, x: &Array2<f32>, adj: &SparseMatrix) -> Result<Array2<f32>> {

        self.dropout_masks.clear();
        self.pre_activations.clear();
        let num_layers = self.convs.len();
        let p = if self.training { self.dropout } else { 0.0 };

        let mut h = x.clone();
        for (l, conv) in self.convs.iter_mut().enumerate() {
            let (dropped, mask) = functional::dropout(&h, p, &mut self.rng);
            self.dropout_masks.push(mask);
            let z = conv.forward(&dropped, adj)?;
            if l + 1 < num_layers {
                h = functional::relu(&z);
                self.pre_activations.push(z);
            } else {
                h = z;
            }
        }
        Ok(h)
    }

    pub fn backward(&mut self, dout: &Array2<f32>, adj: &SparseMatrix) -> Result<Array2<f32>> {

        let adj_t = adj.transpose();
        let num_layers = self.convs.len();
        if self.dropout_masks.len() != num_layers {
            return Err(Error::Shape("backward called before forward".to_string()));
        }

        let mut grad = dout.clone();
        for l in (0..num_layers).rev() {
            if l + 1 < num_layers {
                grad = functional::relu_backward(&grad, &self.pre_activations[l]);
            }
            grad = self.convs[l].backward(&grad, &adj_t)?;
            grad *= &self.dropout_masks[l];
        }
        Ok(grad)
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Param> {
        self.convs.iter_mut().flat_map(|c| [&mut c.weight, &mut c.bias]).collect()
    }
}


struct CategoricalEmbedding {
    column: String,
    table: Param,
}

struct NumericalEmbedding {
    column: String,
    mean: f32,
    std: f32,
    weight: Param,
    bias: Param,
}

struct TableCache {
    codes: Vec<Vec<usize>>,
    values: Vec<Array1<f32>>,
    pooled: Array2<f32>,
    pre: Array2<f32>,
}

/// Encodes table rows: every categorical and numerical column becomes a
/// `tab_dim` token, tokens are mean-pooled and projected with `ReLU(r W + b)`.
/// Text columns are not encoded.
pub struct TableEncoder {
    categorical: Vec<CategoricalEmbedding>,
    numerical: Vec<NumericalEmbedding>,
    proj_w: Param,
    proj_b: Param,
    tab_dim: usize,
    cache: Option<TableCache>,
}

impl TableEncoder {

    pub fn new(stats_dict: &BTreeMap<String, ColumnStats>, tab_dim: usize, hidden_dim: usize, seed: u64) -> TableEncoder {

        let mut rng = StdRng::seed_from_u64(seed);
        let mut categorical = Vec::new();
        let mut numerical = Vec::new();

        for (column, stats) in stats_dict {
            match *stats {
                ColumnStats::Categorical { cardinality } => categorical.push(CategoricalEmbedding {
                    column: column.clone(),
                    table: Param::glorot(cardinality.max(1), tab_dim, &mut rng),
                }),
                ColumnStats::Numerical { mean, std } => numerical.push(NumericalEmbedding {
                    column: column.clone(),
                    mean,
                    std: if std > 0.0 { std } else { 1.0 },
                    weight: Param::glorot(1, tab_dim, &mut rng),
                    bias: Param::zeros(1, tab_dim),
                }),
                ColumnStats::Text => {},
            }
        }

        Self {
            categorical,
            numerical,
            proj_w: Param::glorot(tab_dim, hidden_dim, &mut rng),
            proj_b: Param::zeros(1, hidden_dim),
            tab_dim,
            cache: None,
        }
    }

    fn num_tokens(&self) -> usize {
        self.categorical.len() + self.numerical.len()
    }

    pub fn forward(&mut self, table: &Table) -> Result<Array2<f32>> {

        let n = table.len();
        let mut pooled = Array2::<f32>::zeros((n, self.tab_dim));

        let mut codes = Vec::with_capacity(self.categorical.len());
        for emb in &self.categorical {
            let column_codes = match table.column(&emb.column).map(|c| &c.data) {
                Some(ColumnData::Categorical { codes, .. }) => codes.clone(),
                _ => return Err(Error::Dataset(format!("table {} has no categorical column {}", table.name(), emb.column))),
            };
            for (i, &code) in column_codes.iter().enumerate() {
                if code >= emb.table.value.nrows() {
                    return Err(Error::Shape(format!("code {} out of range in column {}", code, emb.column)));
                }
                pooled.row_mut(i).scaled_add(1.0, &emb.table.value.row(code));
            }
            codes.push(column_codes);
        }

        let mut values = Vec::with_capacity(self.numerical.len());
        for emb in &self.numerical {
            let standardized = match table.column(&emb.column).map(|c| &c.data) {
                Some(ColumnData::Numerical(raw)) => raw.mapv(|v| (v - emb.mean) / emb.std),
                _ => return Err(Error::Dataset(format!("table {} has no numerical column {}", table.name(), emb.column))),
            };
            for (i, &v) in standardized.iter().enumerate() {
                let mut row = pooled.row_mut(i);
                row.scaled_add(v, &emb.weight.value.row(0));
                row += &emb.bias.value.row(0);
            }
            values.push(standardized);
        }

        let tokens = self.num_tokens();
        if tokens > 0 {
            pooled /= tokens as f32;
        }

        let pre = pooled.dot(&self.proj_w.value) + &self.proj_b.value.row(0);
        let out = functional::relu(&pre);
        self.cache = Some(TableCache { codes, values, pooled, pre });
        Ok(out)
    }

    pub fn backward(&mut self, dout: &Array2<f32>) -> Result<()> {

        let tokens = self.num_tokens().max(1) as f32;
        let cache = self.cache.as_ref().ok_or_else(|| Error::Shape("backward called before forward".to_string()))?;

        let dpre = functional::relu_backward(dout, &cache.pre);
        self.proj_w.grad += &cache.pooled.t().dot(&dpre);
        self.proj_b.grad += &dpre.sum_axis(Axis(0)).insert_axis(Axis(0));
        let dpooled = dpre.dot(&self.proj_w.value.t()) / tokens;

        for (emb, column_codes) in self.categorical.iter_mut().zip(&cache.codes) {
            for (i, &code) in column_codes.iter().enumerate() {
                emb.table.grad.row_mut(code).scaled_add(1.0, &dpooled.row(i));
            }
        }

        for (emb, standardized) in self.numerical.iter_mut().zip(&cache.values) {
            let mut dw = emb.weight.grad.row_mut(0);
            for (i, &v) in standardized.iter().enumerate() {
                dw.scaled_add(v, &dpooled.row(i));
            }
            emb.bias.grad += &dpooled.sum_axis(Axis(0)).insert_axis(Axis(0));
        }

        Ok(())
    }

    pub fn parameters_mut(&mut self) -> Vec<&mut Param> {
        let mut params: Vec<&mut Param> = Vec::new();
        for emb in self.categorical.iter_mut() {
            params.push(&mut emb.table);
        }
        for emb in self.numerical.iter_mut() {
            params.push(&mut emb.weight);
            params.push(&mut emb.bias);
        }
        params.push(&mut self.proj_w);
        params.push(&mut self.proj_b);
        params
    }
}


/// Hybrid table + graph model: the table encoder embeds the target rows,
/// the remaining node features are appended and a GCN runs over the whole graph.
pub struct Bridge {
    pub table_encoder: TableEncoder,
    pub graph_encoder: GraphEncoder,
    n_target: usize,
    n_total: usize,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub tab_dim: usize,
    pub table_hidden_dim: usize,
    pub graph_hidden_dim: usize,
    pub graph_output_dim: usize,
    pub graph_layers: usize,
    pub graph_dropout: f32,
    pub seed: u64,
}

impl Bridge {

    pub fn new(config: &BridgeConfig, stats_dict: &BTreeMap<String, ColumnStats>) -> Result<Bridge> {
        Ok(Self {
            table_encoder: TableEncoder::new(stats_dict, config.tab_dim, config.table_hidden_dim, config.seed),
            graph_encoder: GraphEncoder::new(
                config.table_hidden_dim,
                config.graph_hidden_dim,
                config.graph_output_dim,
                config.graph_layers,
                config.graph_dropout,
                config.seed.wrapping_add(1),
            )?,
            n_target: 0,
            n_total: 0,
        })
    }

    // the table encoder has no dropout, so only the graph encoder carries a mode
    pub fn train(&mut self) {
        self.graph_encoder.set_training(true);
    }

    pub fn eval(&mut self) {
        self.graph_encoder.set_training(false);
    }

    /// Logits for rows `0..n_target`.
    pub fn forward(&mut self, table: &Table, x: &Array2<f32>, adj: &SparseMatrix, n_target: usize, n_total: usize) -> Result<Array2<f32>> {

        if table.len() != n_target || n_total > x.nrows() || n_target > n_total {
            return Err(Error::Shape(format!(
                "table of {} rows with n_target {}, n_total {} and {} feature rows", table.len(), n_target, n_total, x.nrows()
            )));
        }

        let table_embeddings = self.table_encoder.forward(table)?;
        if table_embeddings.ncols() != x.ncols() {
            return Err(Error::Shape(format!(
                "table encoder width {} differs from node feature width {}", table_embeddings.ncols(), x.ncols()
            )));
        }

        let node_feats = ndarray::concatenate(Axis(0), &[table_embeddings.view(), x.slice(s![n_target..n_total, ..])])?;
        let out = self.graph_encoder.forward(&node_feats, adj)?;
        self.n_target = n_target;
        self.n_total = n_total;
        Ok(out.slice(s![..n_target, ..]).to_owned())
    }

    pub fn backward(&mut self, dlogits: &Array2<f32>, adj: &SparseMatrix) -> Result<()> {
        let mut dout = Array2::zeros((self.n_total, dlogits.ncols()));
        dout.slice_mut(s![..self.n_target, ..]).assign(dlogits);
        let dfeats = self.graph_encoder.backward(&dout, adj)?;
        self.table_encoder.backward(&dfeats.slice(s![..self.n_target, ..]).to_owned())
    }

    pub fn zero_grad(&mut self) {
        self.table_encoder.parameters_mut().into_iter().for_each(Param::zero_grad);
        self.graph_encoder.parameters_mut().into_iter().for_each(Param::zero_grad);
    }
}


/// Evaluation of the linear map on the current embeddings.
#[derive(Clone, Debug)]
pub struct LinearTest {
    pub loss: f32,
    pub trainval_acc: f32,
    pub test_acc: f32,
    pub pred: Array1<usize>,
}

/// `out = U W^T (+ b)`, with `W` of shape `classes x features`.
pub struct LinearNeuralNetwork {
    pub weight: Param,
    pub bias: Option<Param>,
}

impl LinearNeuralNetwork {

    pub fn new(num_features: usize, num_classes: usize, bias: bool, seed: u64) -> LinearNeuralNetwork {
        let mut rng = StdRng::seed_from_u64(seed);
        let weight = Param::fan_in_uniform(num_classes, num_features, num_features, &mut rng);
        let bias = if bias { Some(Param::fan_in_uniform(1, num_classes, num_features, &mut rng)) } else { None };
        Self { weight, bias }
    }

    pub fn forward(&self, u: &Array2<f32>) -> Array2<f32> {
        let out = u.dot(&self.weight.value.t());
        match &self.bias {
            Some(b) => out + &b.value.row(0),
            None => out,
        }
    }

    /// One SGD step on the summed squared error over `mask` rows.
    /// Returns the refreshed predictions and the updated weight.
    pub fn update_w(&mut self, u: &Array2<f32>, y_one_hot: &Array2<f32>, mask: &Array1<bool>, lr: f32) -> Result<(Array2<f32>, Array2<f32>)> {

        if u.nrows() != y_one_hot.nrows() || mask.len() != u.nrows() {
            return Err(Error::Shape(format!(
                "embeddings {:?}, targets {:?}, mask {}", u.dim(), y_one_hot.dim(), mask.len()
            )));
        }

        self.weight.zero_grad();
        let pred = self.forward(u);
        let mut residual = pred - y_one_hot;
        for (mut row, keep) in residual.axis_iter_mut(Axis(0)).zip(mask.iter()) {
            if !*keep {
                row.fill(0.0);
            }
        }
        residual *= 2.0;

        self.weight.grad += &residual.t().dot(u);
        let optimizer = Sgd::new(lr);
        match self.bias.as_mut() {
            Some(b) => {
                b.zero_grad();
                b.grad += &residual.sum_axis(Axis(0)).insert_axis(Axis(0));
                optimizer.step(&mut [&mut self.weight, b]);
            },
            None => optimizer.step(&mut [&mut self.weight]),
        }

        Ok((self.forward(u), self.weight.value.clone()))
    }

    pub fn test(&self, u: &Array2<f32>, y_one_hot: &Array2<f32>, y: &Array1<usize>, trainval_mask: &Array1<bool>, test_mask: &Array1<bool>) -> Result<LinearTest> {
        let out = self.forward(u);
        let loss = functional::masked_mse(&out, y_one_hot, trainval_mask, Reduction::Mean);
        let pred = functional::argmax_rows(&out)?;
        Ok(LinearTest {
            loss,
            trainval_acc: masked_accuracy(&pred, y, trainval_mask),
            test_acc: masked_accuracy(&pred, y, test_mask),
            pred,
        })
    }
}
