//! Plugin settings: declared schema and effective values.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Persisted setting values, keyed by setting id.
pub type SettingsMap = HashMap<String, serde_json::Value>;

/// Kind of input a setting expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SettingKind {
    /// Free-form text
    Text {
        #[serde(default)]
        secret: bool,
    },
    /// Numeric value with optional bounds
    Number {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<f64>,
    },
    /// On/off toggle
    Switch,
    /// One of a fixed set of options
    Select { options: Vec<String> },
}

/// A setting as declared in the plugin manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingDeclaration {
    /// Setting id, unique within the plugin
    pub id: String,

    /// Human-readable label
    pub label: String,

    /// Help text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input kind
    #[serde(flatten)]
    pub kind: SettingKind,

    /// Value used when nothing has been persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<serde_json::Value>,
}

/// A declared setting together with its current effective value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Setting {
    #[serde(flatten)]
    pub declaration: SettingDeclaration,

    /// Effective value: persisted value, else the declared default
    pub value: Option<serde_json::Value>,
}

impl Setting {
    pub fn id(&self) -> &str {
        &self.declaration.id
    }
}

/// Merge declared settings with persisted values, keeping declaration order.
///
/// Persisted keys without a declaration are ignored.
pub fn resolve_settings(
    declarations: &[SettingDeclaration],
    persisted: &SettingsMap,
) -> Vec<Setting> {
    declarations
        .iter()
        .map(|declaration| Setting {
            value: persisted
                .get(&declaration.id)
                .cloned()
                .or_else(|| declaration.default_value.clone()),
            declaration: declaration.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn declarations() -> Vec<SettingDeclaration> {
        vec![
            SettingDeclaration {
                id: "api_key".to_string(),
                label: "API key".to_string(),
                description: None,
                kind: SettingKind::Text { secret: true },
                default_value: None,
            },
            SettingDeclaration {
                id: "temp".to_string(),
                label: "Temperature".to_string(),
                description: Some("Sampling temperature".to_string()),
                kind: SettingKind::Number {
                    min: Some(0.0),
                    max: Some(2.0),
                },
                default_value: Some(json!(1.0)),
            },
        ]
    }

    #[test]
    fn test_resolve_uses_defaults() {
        let settings = resolve_settings(&declarations(), &SettingsMap::new());
        assert_eq!(settings.len(), 2);
        assert_eq!(settings[0].value, None);
        assert_eq!(settings[1].value, Some(json!(1.0)));
    }

    #[test]
    fn test_resolve_prefers_persisted_and_keeps_order() {
        let mut persisted = SettingsMap::new();
        persisted.insert("temp".to_string(), json!(0.5));
        persisted.insert("unknown".to_string(), json!("ignored"));

        let settings = resolve_settings(&declarations(), &persisted);
        let ids: Vec<_> = settings.iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec!["api_key", "temp"]);
        assert_eq!(settings[1].value, Some(json!(0.5)));
    }

    #[test]
    fn test_declaration_from_toml() {
        let declaration: SettingDeclaration = toml::from_str(
            r#"
id = "units"
label = "Units"
type = "select"
options = ["metric", "imperial"]
default_value = "metric"
"#,
        )
        .unwrap();

        assert_eq!(
            declaration.kind,
            SettingKind::Select {
                options: vec!["metric".to_string(), "imperial".to_string()]
            }
        );
        assert_eq!(declaration.default_value, Some(json!("metric")));
    }
}
