use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::io::Read;
use ndarray::Array1;
use crate::error::{Error, Result};
use crate::graph::Masks;


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Categorical,
    Numerical,
    Text,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    /// dense codes into `vocab`, in order of first appearance
    Categorical { codes: Vec<usize>, vocab: Vec<String> },
    Numerical(Array1<f32>),
    Text(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {

    pub fn categorical(name: &str, values: &[&str]) -> Column {
        let owned: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        Column::categorical_owned(name, owned)
    }

    fn categorical_owned(name: &str, values: Vec<String>) -> Column {
        let mut vocab: Vec<String> = Vec::new();
        let mut lookup: HashMap<String, usize> = HashMap::new();
        let codes = values.into_iter().map(|v| {
            *lookup.entry(v.clone()).or_insert_with(|| {
                vocab.push(v);
                vocab.len() - 1
            })
        }).collect();
        Column { name: name.to_string(), data: ColumnData::Categorical { codes, vocab } }
    }

    /// NaN entries are replaced by the mean of the finite ones.
    pub fn numerical(name: &str, values: Vec<f32>) -> Column {
        let finite: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let mean = if finite.is_empty() { 0.0 } else { finite.iter().sum::<f32>() / finite.len() as f32 };
        let filled = values.into_iter().map(|v| if v.is_finite() { v } else { mean }).collect::<Vec<f32>>();
        Column { name: name.to_string(), data: ColumnData::Numerical(Array1::from(filled)) }
    }

    pub fn text(name: &str, values: Vec<String>) -> Column {
        Column { name: name.to_string(), data: ColumnData::Text(values) }
    }

    pub fn column_type(&self) -> ColumnType {
        match self.data {
            ColumnData::Categorical { .. } => ColumnType::Categorical,
            ColumnData::Numerical(_) => ColumnType::Numerical,
            ColumnData::Text(_) => ColumnType::Text,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            ColumnData::Categorical { codes, .. } => codes.len(),
            ColumnData::Numerical(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> ColumnStats {
        match &self.data {
            ColumnData::Categorical { vocab, .. } => ColumnStats::Categorical { cardinality: vocab.len() },
            ColumnData::Numerical(values) => {
                let mean = values.mean().unwrap_or(0.0);
                let std = if values.is_empty() { 0.0 } else { values.std(0.0) };
                ColumnStats::Numerical { mean, std }
            },
            ColumnData::Text(_) => ColumnStats::Text,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ColumnStats {
    Categorical { cardinality: usize },
    Numerical { mean: f32, std: f32 },
    Text,
}


/// A relational entity table: one row per identifier, typed feature columns,
/// and optionally a target column with its split masks.
#[derive(Clone, Debug)]
pub struct Table {
    name: String,
    ids: Vec<String>,
    id2pos: HashMap<String, usize>,
    columns: Vec<Column>,
    y: Option<Array1<usize>>,
    masks: Option<Masks>,
}

impl Display for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "table {}: {} rows, {} columns, {} classes", self.name, self.len(), self.columns.len(), self.num_classes())
    }
}

impl Table {

    pub fn new(name: &str, ids: Vec<String>, columns: Vec<Column>) -> Result<Table> {

        if let Some(column) = columns.iter().find(|c| c.len() != ids.len()) {
            return Err(Error::Shape(format!(
                "column {} has {} values but table {} has {} rows", column.name, column.len(), name, ids.len()
            )));
        }

        let mut id2pos = HashMap::with_capacity(ids.len());
        for (pos, id) in ids.iter().enumerate() {
            if id2pos.insert(id.clone(), pos).is_some() {
                return Err(Error::Dataset(format!("duplicate id {} in table {}", id, name)));
            }
        }

        Ok(Self { name: name.to_string(), ids, id2pos, columns, y: None, masks: None })
    }

    /// Reads a table from csv. `schema` names the encoded feature columns, `target`
    /// the integer label column; any other column is ignored.
    pub fn from_csv_reader<R: Read>(
        name: &str,
        reader: R,
        index_col: &str,
        schema: &[(&str, ColumnType)],
        target: Option<&str>,
    ) -> Result<Table> {

        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let position = |col: &str| -> Result<usize> {
            headers.iter().position(|h| h == col)
                .ok_or_else(|| Error::Dataset(format!("column {} missing from table {}", col, name)))
        };

        let index_pos = position(index_col)?;
        let schema_pos = schema.iter().map(|(col, _)| position(*col)).collect::<Result<Vec<usize>>>()?;
        let target_pos = target.map(position).transpose()?;

        let mut ids: Vec<String> = Vec::new();
        let mut raw: Vec<Vec<String>> = vec![Vec::new(); schema.len()];
        let mut labels: Vec<usize> = Vec::new();

        for record in rdr.records() {
            let record = record?;
            ids.push(record.get(index_pos).unwrap_or_default().trim().to_string());
            for (k, pos) in schema_pos.iter().enumerate() {
                raw[k].push(record.get(*pos).unwrap_or_default().to_string());
            }
            if let Some(pos) = target_pos {
                let value = record.get(pos).unwrap_or_default().trim();
                let label = value.parse::<usize>().map_err(|_| {
                    Error::Dataset(format!("label '{}' in table {} is not a class index", value, name))
                })?;
                labels.push(label);
            }
        }

        let columns = schema.iter().zip(raw).map(|((col, kind), values)| match kind {
            ColumnType::Categorical => Column::categorical_owned(col, values),
            ColumnType::Numerical => Column::numerical(col, values.iter().map(|v| v.trim().parse::<f32>().unwrap_or(f32::NAN)).collect()),
            ColumnType::Text => Column::text(col, values),
        }).collect();

        let table = Table::new(name, ids, columns)?;
        match target_pos {
            Some(_) => table.with_target(Array1::from(labels)),
            None => Ok(table),
        }
    }

    pub fn with_target(mut self, y: Array1<usize>) -> Result<Table> {
        if y.len() != self.len() {
            return Err(Error::Shape(format!("{} labels for {} rows in table {}", y.len(), self.len(), self.name)));
        }
        self.y = Some(y);
        Ok(self)
    }

    pub fn with_masks(mut self, masks: Masks) -> Result<Table> {
        if masks.len() != self.len() {
            return Err(Error::Shape(format!("masks of length {} for {} rows in table {}", masks.len(), self.len(), self.name)));
        }
        self.masks = Some(masks);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.id2pos.get(id).copied()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn y(&self) -> Option<&Array1<usize>> {
        self.y.as_ref()
    }

    pub fn masks(&self) -> Option<&Masks> {
        self.masks.as_ref()
    }

    pub fn num_classes(&self) -> usize {
        self.y.as_ref().and_then(|y| y.iter().max().map(|m| m + 1)).unwrap_or(0)
    }

    pub fn stats_dict(&self) -> BTreeMap<String, ColumnStats> {
        self.columns.iter().map(|c| (c.name.clone(), c.stats())).collect()
    }

}


/// Pairs of identifiers read from a two-column relation table.
#[derive(Clone, Debug, PartialEq)]
pub struct Relation {
    pub name: String,
    pub src_col: String,
    pub dst_col: String,
    pub pairs: Vec<(String, String)>,
}

impl Relation {

    pub fn from_csv_reader<R: Read>(name: &str, reader: R, src_col: &str, dst_col: &str) -> Result<Relation> {

        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.clone();
        let position = |col: &str| -> Result<usize> {
            headers.iter().position(|h| h == col)
                .ok_or_else(|| Error::Dataset(format!("column {} missing from relation {}", col, name)))
        };
        let (src_pos, dst_pos) = (position(src_col)?, position(dst_col)?);

        let mut pairs = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let src = record.get(src_pos).unwrap_or_default().trim().to_string();
            let dst = record.get(dst_pos).unwrap_or_default().trim().to_string();
            pairs.push((src, dst));
        }

        Ok(Self { name: name.to_string(), src_col: src_col.to_string(), dst_col: dst_col.to_string(), pairs })
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
