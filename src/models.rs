//! Inference-only regression models
//!
//! The pipeline treats both models as deterministic vector-in/vector-out
//! functions. Two serialized forms are supported: multi-output linear
//! regression (the pocket-motion correction model) and gradient-boosted
//! regression trees (the energy model).

use flate2::read::GzDecoder;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::error::{MetabolicsError, Result};
use crate::types::{CORRECTION_DIM_31, FEATURE_DIM_108, STRIDE_DIM_90};

pub trait Model: Send + Sync {
    fn input_dim(&self) -> usize;
    fn output_dim(&self) -> usize;
    fn predict(&self, input: &[f64]) -> Result<Vec<f64>>;
}

/// `y = W·x + b`, `W` stored row-per-output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
}

impl LinearModel {
    pub fn new(coefficients: Vec<Vec<f64>>, intercept: Vec<f64>) -> Result<Self> {
        let model = Self {
            coefficients,
            intercept,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        let inputs = self.input_dim();
        if self.coefficients.is_empty() || inputs == 0 {
            return Err(MetabolicsError::ModelLoad(
                "linear model has no coefficients".to_string(),
            ));
        }
        if let Some(row) = self.coefficients.iter().position(|r| r.len() != inputs) {
            return Err(MetabolicsError::ModelLoad(format!(
                "coefficient row {} has {} values, expected {}",
                row,
                self.coefficients[row].len(),
                inputs
            )));
        }
        if self.intercept.len() != self.coefficients.len() {
            return Err(MetabolicsError::ModelLoad(format!(
                "{} intercepts for {} outputs",
                self.intercept.len(),
                self.coefficients.len()
            )));
        }
        Ok(())
    }
}

impl Model for LinearModel {
    fn input_dim(&self) -> usize {
        self.coefficients.first().map_or(0, |r| r.len())
    }

    fn output_dim(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, input: &[f64]) -> Result<Vec<f64>> {
        check_input("linear", self.input_dim(), input)?;
        Ok(self
            .coefficients
            .iter()
            .zip(&self.intercept)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        yes: usize,
        no: usize,
        /// Branch taken for NaN input; defaults to `yes`
        #[serde(default)]
        missing: Option<usize>,
    },
    Leaf {
        leaf: f64,
    },
}

/// Flat node list; node 0 is the root and children always follow their parent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    pub nodes: Vec<TreeNode>,
}

impl Tree {
    fn evaluate(&self, input: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                TreeNode::Leaf { leaf } => return *leaf,
                TreeNode::Split {
                    feature,
                    threshold,
                    yes,
                    no,
                    missing,
                } => {
                    let x = input[*feature];
                    id = if x.is_nan() {
                        missing.unwrap_or(*yes)
                    } else if x < *threshold {
                        *yes
                    } else {
                        *no
                    };
                }
            }
        }
    }

    fn validate(&self, index: usize, num_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(MetabolicsError::ModelLoad(format!("tree {} is empty", index)));
        }
        for (id, node) in self.nodes.iter().enumerate() {
            if let TreeNode::Split {
                feature,
                yes,
                no,
                missing,
                ..
            } = node
            {
                if *feature >= num_features {
                    return Err(MetabolicsError::ModelLoad(format!(
                        "tree {} node {} splits on feature {} of {}",
                        index, id, feature, num_features
                    )));
                }
                let children = [Some(*yes), Some(*no), *missing];
                if children
                    .iter()
                    .flatten()
                    .any(|&child| child <= id || child >= self.nodes.len())
                {
                    return Err(MetabolicsError::ModelLoad(format!(
                        "tree {} node {} has an out-of-order child",
                        index, id
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Gradient-boosted regression trees with a single output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub num_features: usize,
    #[serde(default)]
    pub base_score: f64,
    pub trees: Vec<Tree>,
}

impl TreeEnsemble {
    pub fn new(num_features: usize, base_score: f64, trees: Vec<Tree>) -> Result<Self> {
        let model = Self {
            num_features,
            base_score,
            trees,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<()> {
        if self.num_features == 0 {
            return Err(MetabolicsError::ModelLoad(
                "tree ensemble declares no features".to_string(),
            ));
        }
        for (i, tree) in self.trees.iter().enumerate() {
            tree.validate(i, self.num_features)?;
        }
        Ok(())
    }
}

impl Model for TreeEnsemble {
    fn input_dim(&self) -> usize {
        self.num_features
    }

    fn output_dim(&self) -> usize {
        1
    }

    fn predict(&self, input: &[f64]) -> Result<Vec<f64>> {
        check_input("tree ensemble", self.num_features, input)?;
        let total = self.trees.iter().map(|t| t.evaluate(input)).sum::<f64>();
        Ok(vec![self.base_score + total])
    }
}

/// On-disk model, tagged by `kind`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelFile {
    Linear(LinearModel),
    TreeEnsemble(TreeEnsemble),
}

impl ModelFile {
    pub fn into_model(self) -> Result<Arc<dyn Model>> {
        match self {
            ModelFile::Linear(m) => {
                m.validate()?;
                Ok(Arc::new(m))
            }
            ModelFile::TreeEnsemble(m) => {
                m.validate()?;
                Ok(Arc::new(m))
            }
        }
    }
}

/// Load a model from `.json` or gzip-compressed `.json.gz`.
pub fn load_model(path: &Path) -> Result<Arc<dyn Model>> {
    let file = File::open(path)
        .map_err(|e| MetabolicsError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };
    let model_file: ModelFile = serde_json::from_reader(BufReader::new(reader))
        .map_err(|e| MetabolicsError::ModelLoad(format!("{}: {}", path.display(), e)))?;
    let model = model_file.into_model()?;
    info!(
        "Loaded model {} ({} -> {})",
        path.display(),
        model.input_dim(),
        model.output_dim()
    );
    Ok(model)
}

/// The two models a session needs, shape-checked once.
#[derive(Clone)]
pub struct ModelSet {
    pub correction: Arc<dyn Model>,
    pub energy: Arc<dyn Model>,
}

impl ModelSet {
    pub fn new(correction: Arc<dyn Model>, energy: Arc<dyn Model>) -> Result<Self> {
        check_shape("correction", correction.as_ref(), CORRECTION_DIM_31, STRIDE_DIM_90)?;
        check_shape("energy", energy.as_ref(), FEATURE_DIM_108, 1)?;
        Ok(Self { correction, energy })
    }

    pub fn load(correction: &Path, energy: &Path) -> Result<Self> {
        Self::new(load_model(correction)?, load_model(energy)?)
    }
}

fn check_shape(name: &'static str, model: &dyn Model, input: usize, output: usize) -> Result<()> {
    if model.input_dim() != input || model.output_dim() != output {
        return Err(MetabolicsError::model(
            name,
            format!(
                "expected {} -> {}, model is {} -> {}",
                input,
                output,
                model.input_dim(),
                model.output_dim()
            ),
            input,
        ));
    }
    Ok(())
}

fn check_input(name: &'static str, expected: usize, input: &[f64]) -> Result<()> {
    if input.len() != expected {
        return Err(MetabolicsError::model(
            name,
            format!("expected {} inputs, got {}", expected, input.len()),
            input.len(),
        ));
    }
    Ok(())
}
