//! `[pipeline]` section configuration.
//!
//! Order of the four transforms for each build mode. Cleaning always runs
//! first and static copying always runs last; neither is listed here.

use super::defaults;
use crate::pipeline::Transform;
use educe::Educe;
use serde::{Deserialize, Serialize};

/// `[pipeline]` section in kiln.toml.
///
/// # Example
/// ```toml
/// [pipeline]
/// development = ["scripts", "styles", "templates", "images"]
/// production = ["styles", "templates", "scripts", "images"]
/// ```
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default = "defaults::pipeline::development")]
    #[educe(Default = defaults::pipeline::development())]
    pub development: Vec<Transform>,

    #[serde(default = "defaults::pipeline::production")]
    #[educe(Default = defaults::pipeline::production())]
    pub production: Vec<Transform>,
}

impl PipelineConfig {
    /// Check that `order` lists every transform exactly once.
    pub fn check_order(name: &str, order: &[Transform]) -> Result<(), String> {
        for transform in Transform::ALL {
            match order.iter().filter(|t| **t == transform).count() {
                1 => {}
                0 => return Err(format!("[pipeline.{name}] is missing `{}`", transform.name())),
                _ => return Err(format!("[pipeline.{name}] lists `{}` twice", transform.name())),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;

    #[test]
    fn test_pipeline_defaults_keep_both_orders() {
        let config: ProjectConfig = toml::from_str("").unwrap();
        assert_eq!(
            config.pipeline.development,
            vec![Transform::Scripts, Transform::Styles, Transform::Templates, Transform::Images]
        );
        assert_eq!(
            config.pipeline.production,
            vec![Transform::Styles, Transform::Templates, Transform::Scripts, Transform::Images]
        );
    }

    #[test]
    fn test_pipeline_custom_order() {
        let config = r#"
            [pipeline]
            production = ["images", "scripts", "styles", "templates"]
        "#;
        let config: ProjectConfig = toml::from_str(config).unwrap();
        assert_eq!(config.pipeline.production[0], Transform::Images);
        assert!(PipelineConfig::check_order("production", &config.pipeline.production).is_ok());
    }

    #[test]
    fn test_check_order_rejects_missing_and_duplicates() {
        let missing = [Transform::Scripts, Transform::Styles, Transform::Templates];
        let err = PipelineConfig::check_order("development", &missing).unwrap_err();
        assert!(err.contains("missing `images`"));

        let twice = [
            Transform::Scripts,
            Transform::Scripts,
            Transform::Styles,
            Transform::Templates,
            Transform::Images,
        ];
        let err = PipelineConfig::check_order("development", &twice).unwrap_err();
        assert!(err.contains("`scripts` twice"));
    }

    #[test]
    fn test_unknown_transform_rejected() {
        let config = r#"
            [pipeline]
            development = ["scripts", "fonts"]
        "#;
        let result: Result<ProjectConfig, _> = toml::from_str(config);
        assert!(result.is_err());
    }
}
