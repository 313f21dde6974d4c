//! Shared operator instances keyed by their configuration string.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use moka::sync::Cache;
use tracing::info;

use crate::core::ResampleFilter;
use crate::enhance::{ClassicalEnhancer, CommandOperator, EnhanceOperator, NearestOperator, ResampleOperator};
use crate::error::EnhanceError;

/// Parsed operator configuration.
///
/// Text forms: `classical`, `resample[:<filter>]`, `nearest`,
/// `command:<program>[#<model>]`, `remote:<url>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum OperatorSpec {
    #[default]
    Classical,
    Resample(ResampleFilter),
    Nearest,
    Command { program: PathBuf, model: Option<String> },
    Remote { url: String },
}

impl OperatorSpec {
    pub fn build(&self) -> Result<Arc<dyn EnhanceOperator>, EnhanceError> {
        let op: Arc<dyn EnhanceOperator> = match self {
            OperatorSpec::Classical => Arc::new(ClassicalEnhancer::default()),
            OperatorSpec::Resample(filter) => Arc::new(ResampleOperator::new(*filter)),
            OperatorSpec::Nearest => Arc::new(NearestOperator),
            OperatorSpec::Command { program, model } => {
                let op = CommandOperator::new(program.clone());
                match model {
                    Some(model) => Arc::new(op.with_model(model.clone())),
                    None => Arc::new(op),
                }
            }
            #[cfg(feature = "remote")]
            OperatorSpec::Remote { url } => Arc::new(crate::enhance::RemoteOperator::new(url.clone())?),
            #[cfg(not(feature = "remote"))]
            OperatorSpec::Remote { .. } => {
                return Err(EnhanceError::UnknownOperator(format!(
                    "{self} (built without the `remote` feature)"
                )))
            }
        };
        Ok(op)
    }
}

impl fmt::Display for OperatorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatorSpec::Classical => write!(f, "classical"),
            OperatorSpec::Resample(filter) => write!(f, "resample:{filter}"),
            OperatorSpec::Nearest => write!(f, "nearest"),
            OperatorSpec::Command { program, model: None } => write!(f, "command:{}", program.display()),
            OperatorSpec::Command {
                program,
                model: Some(model),
            } => write!(f, "command:{}#{model}", program.display()),
            OperatorSpec::Remote { url } => write!(f, "remote:{url}"),
        }
    }
}

impl FromStr for OperatorSpec {
    type Err = EnhanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind, Some(arg)),
            None => (s, None),
        };
        let unknown = || EnhanceError::UnknownOperator(s.to_string());
        match (kind.to_lowercase().as_str(), arg) {
            ("classical", None) => Ok(OperatorSpec::Classical),
            ("nearest", None) => Ok(OperatorSpec::Nearest),
            ("resample", None) => Ok(OperatorSpec::Resample(ResampleFilter::default())),
            ("resample", Some(filter)) => filter
                .parse()
                .map(OperatorSpec::Resample)
                .map_err(|_| unknown()),
            ("command", Some(rest)) if !rest.is_empty() => {
                let (program, model) = match rest.split_once('#') {
                    Some((program, model)) => (program, Some(model.to_string())),
                    None => (rest, None),
                };
                Ok(OperatorSpec::Command {
                    program: PathBuf::from(program),
                    model,
                })
            }
            ("remote", Some(url)) if url.starts_with("http://") || url.starts_with("https://") => {
                Ok(OperatorSpec::Remote { url: url.to_string() })
            }
            _ => Err(unknown()),
        }
    }
}

/// Process-wide pool of constructed operators.
///
/// Construction can be expensive (model handles, HTTP clients), so each
/// configuration is built at most once and then shared.
#[derive(Clone)]
pub struct OperatorCache {
    cache: Cache<String, Arc<dyn EnhanceOperator>>,
}

impl OperatorCache {
    pub fn new(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    pub fn get(&self, spec: &OperatorSpec) -> Result<Arc<dyn EnhanceOperator>, EnhanceError> {
        let key = spec.to_string();
        if let Some(op) = self.cache.get(&key) {
            return Ok(op);
        }
        let op = spec.build()?;
        info!(operator = %key, "constructed enhance operator");
        self.cache.insert(key, op.clone());
        Ok(op)
    }

    /// Parse `spec` and look it up.
    pub fn get_str(&self, spec: &str) -> Result<Arc<dyn EnhanceOperator>, EnhanceError> {
        self.get(&spec.parse()?)
    }
}

impl Default for OperatorCache {
    fn default() -> Self {
        Self::new(16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        for text in [
            "classical",
            "nearest",
            "resample:bicubic",
            "command:/opt/realesrgan-ncnn-vulkan#realesrgan-x4plus",
            "command:./upscaler",
            "remote:http://localhost:5000/enhance",
        ] {
            let spec: OperatorSpec = text.parse().unwrap();
            assert_eq!(spec.to_string(), text);
        }
        assert_eq!(
            "resample".parse::<OperatorSpec>().unwrap(),
            OperatorSpec::Resample(ResampleFilter::Lanczos3)
        );
    }

    #[test]
    fn test_parse_rejects_unknown() {
        for text in ["", "magic", "resample:sinc", "command:", "remote:ftp://x", "classical:fast"] {
            assert!(
                matches!(text.parse::<OperatorSpec>(), Err(EnhanceError::UnknownOperator(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn test_cache_shares_instances() {
        let cache = OperatorCache::default();
        let a = cache.get_str("resample:bilinear").unwrap();
        let b = cache.get_str("resample:bilinear").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_str("nearest").unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.name(), "nearest");
    }
}
