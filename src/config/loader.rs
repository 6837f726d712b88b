//! Load model configs from a directory of JSON files.

use crate::config::ModelConfig;
use crate::error::ConfigError;
use serde_json::Value;
use std::path::Path;

/// Each `*.json` file holds one model object or an array of models. Files load in name order.
pub async fn load_models_from_dir(dir: impl AsRef<Path>) -> Result<Vec<ModelConfig>, ConfigError> {
    let dir = dir.as_ref();
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| ConfigError::Load(format!("{}: {}", dir.display(), e)))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ConfigError::Load(e.to_string()))?
    {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut out = Vec::new();
    for path in paths {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        let parsed = parse_models(&raw).map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        tracing::debug!(file = %path.display(), count = parsed.len(), "loaded model config");
        out.extend(parsed);
    }
    Ok(out)
}

pub fn parse_models(raw: &str) -> Result<Vec<ModelConfig>, serde_json::Error> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Array(items) => items.into_iter().map(serde_json::from_value).collect(),
        single => Ok(vec![serde_json::from_value(single)?]),
    }
}
