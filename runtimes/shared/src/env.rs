use crate::AdapterError;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::{debug, warn};

/// Per-function environment overrides loaded from a JSON file of the form
/// `{"FunctionName": {"VAR": "value"}}`.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    functions: HashMap<String, BTreeMap<String, String>>,
}

impl EnvOverrides {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_file(path: &Path) -> Result<Self, AdapterError> {
        let contents = std::fs::read_to_string(path).map_err(|e| AdapterError::InvalidOverrideFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::from_json_str(&contents).map_err(|reason| AdapterError::InvalidOverrideFile {
            path: path.to_path_buf(),
            reason,
        })
    }

    pub fn from_json_str(contents: &str) -> Result<Self, String> {
        let root: HashMap<String, Value> =
            serde_json::from_str(contents).map_err(|e| e.to_string())?;
        let mut functions = HashMap::new();

        for (function, variables) in root {
            let Value::Object(variables) = variables else {
                warn!("Ignoring environment overrides for {}: expected an object", function);
                continue;
            };

            let mut resolved = BTreeMap::new();
            for (key, value) in variables {
                match scalar_to_string(&value) {
                    Some(value) => {
                        resolved.insert(key, value);
                    }
                    None => warn!("Ignoring non-scalar override {}.{}", function, key),
                }
            }
            functions.insert(function, resolved);
        }

        Ok(Self { functions })
    }

    pub fn for_function(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Builds the environment a function container starts with.
///
/// Precedence, lowest first: `base`, the variables the function declares, the
/// host environment for declared names, the override file for declared names.
pub fn merge_environment<F>(
    base: &BTreeMap<String, String>,
    declared: &BTreeMap<String, String>,
    host_lookup: F,
    overrides: Option<&BTreeMap<String, String>>,
) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut merged = base.clone();

    for (key, value) in declared {
        let value = host_lookup(key).unwrap_or_else(|| value.clone());
        merged.insert(key.clone(), value);
    }

    if let Some(overrides) = overrides {
        for (key, value) in overrides {
            if declared.contains_key(key) {
                merged.insert(key.clone(), value.clone());
            } else {
                debug!("Skipping override for undeclared variable {}", key);
            }
        }
    }

    merged
}
