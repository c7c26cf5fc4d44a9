use std::fs;
use std::path::Path;

use ndarray::{Array1, Axis};
use ort::CPUExecutionProvider;
use ort::CUDAExecutionProvider;
use ort::GraphOptimizationLevel;
use ort::Session;
use serde::Deserialize;

use log::*;

use crate::config::{AppConfig, Device};
use crate::error::SquadronError;
use crate::hub::{CONFIG_FILE, MODEL_FILE};

/// Subset of a checkpoint's `config.json` the runtime cares about.
#[derive(Debug, Default, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub max_position_embeddings: Option<usize>,
}

impl ModelConfig {
    pub fn load(dir: &Path) -> Result<ModelConfig, SquadronError> {
        let raw = fs::read_to_string(dir.join(CONFIG_FILE))?;
        serde_json::from_str(&raw)
            .map_err(|e| SquadronError::model(format!("{}: {}", CONFIG_FILE, e)))
    }

    /// Longest sequence the encoder accepts. RoBERTa-family checkpoints
    /// reserve two position slots for the padding offset.
    pub fn usable_positions(&self) -> Option<usize> {
        let positions = self.max_position_embeddings?;
        match self.model_type.as_deref() {
            Some("roberta") | Some("camembert") | Some("xlm-roberta") => {
                Some(positions.saturating_sub(2))
            }
            _ => Some(positions),
        }
    }
}

/// ONNX Runtime session specialized for extractive QA graphs.
///
/// Input and output bindings are resolved from the graph's own metadata
/// at load time, so both two-input (RoBERTa) and three-input (BERT)
/// exports run through the same call.
pub struct QaSession {
    session: Session,
    wants_token_types: bool,
    start_index: usize,
    end_index: usize,
}

impl QaSession {
    /// Build the runtime environment and load `model.onnx` from `dir`.
    pub fn load(dir: &Path, cfg: &AppConfig) -> Result<QaSession, SquadronError> {
        let model_path = dir.join(MODEL_FILE);
        info!("creating session from {}", model_path.display());
        match cfg.device {
            Device::Cpu => ort::init()
                .with_name("squadron")
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .commit()?,
            Device::Cuda(id) => ort::init()
                .with_name("squadron")
                .with_execution_providers([
                    CUDAExecutionProvider::default().with_device_id(id).build(),
                    CPUExecutionProvider::default().build(),
                ])
                .commit()?,
        };
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level1)?
            .with_intra_threads(cfg.intra_threads)?
            .commit_from_file(model_path)?;
        if session.outputs.len() < 2 {
            return Err(SquadronError::model(format!(
                "graph exposes {} outputs, need start and end logits",
                session.outputs.len()
            )));
        }
        let input_names: Vec<&str> = session.inputs.iter().map(|i| i.name.as_str()).collect();
        let wants_token_types = graph_wants_token_types(&input_names)?;
        // positional 0/1 is the conventional export order when names differ
        let start_index = output_position(&session, "start_logits").unwrap_or(0);
        let end_index = output_position(&session, "end_logits").unwrap_or(1);
        debug!(
            "graph bindings: token_type_ids={} start={} end={}",
            wants_token_types, start_index, end_index
        );
        Ok(QaSession {
            session,
            wants_token_types,
            start_index,
            end_index,
        })
    }

    /// Run one encoded sequence through the graph and return the raw
    /// `(start, end)` logits, one value per token.
    pub fn run(
        &self,
        ids: &[u32],
        attention_mask: &[u32],
        type_ids: &[u32],
    ) -> Result<(Vec<f32>, Vec<f32>), SquadronError> {
        let input_ids = to_batch(ids);
        let mask = to_batch(attention_mask);
        let outputs = if self.wants_token_types {
            let types = to_batch(type_ids);
            self.session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => mask,
                "token_type_ids" => types,
            ]?)?
        } else {
            self.session.run(ort::inputs![
                "input_ids" => input_ids,
                "attention_mask" => mask,
            ]?)?
        };
        let start = outputs[self.start_index]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect::<Vec<f32>>();
        let end = outputs[self.end_index]
            .try_extract_tensor::<f32>()?
            .iter()
            .copied()
            .collect::<Vec<f32>>();
        if start.len() != ids.len() || end.len() != ids.len() {
            return Err(SquadronError::inference(format!(
                "expected {} logits per head, got {} starts and {} ends",
                ids.len(),
                start.len(),
                end.len()
            )));
        }
        Ok((start, end))
    }
}

/// Check the graph's declared inputs up front: `input_ids` and
/// `attention_mask` are required, `token_type_ids` is optional. A graph
/// that is not a QA encoder fails here at load instead of on the first
/// request.
fn graph_wants_token_types(names: &[&str]) -> Result<bool, SquadronError> {
    for required in ["input_ids", "attention_mask"] {
        if !names.contains(&required) {
            return Err(SquadronError::model(format!(
                "graph declares inputs {:?}, missing {}",
                names, required
            )));
        }
    }
    Ok(names.contains(&"token_type_ids"))
}

fn output_position(session: &Session, name: &str) -> Option<usize> {
    session.outputs.iter().position(|o| o.name == name)
}

fn to_batch(values: &[u32]) -> ndarray::Array2<i64> {
    let row: Vec<i64> = values.iter().map(|v| *v as i64).collect();
    Array1::from_vec(row).insert_axis(Axis(0))
}
