//! Package manifests and rendering
//!
//! A package lists the apps of a release with default properties. Rendering
//! overlays release config values onto those defaults and produces the
//! manifest stored with each release version: a JSON array of [`AppManifest`].
//!
//! Config values are keyed by app name:
//!
//! ```json
//! { "time": { "version": "2.0.0", "application_properties": { "trigger.fixed-delay": "5" } } }
//! ```

pub mod diff;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ControllerError;
use crate::models::release::PackageMetadata;

/// Deployable description of one logical app
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppManifest {
    pub name: String,
    pub resource: String,
    pub version: String,
    #[serde(default)]
    pub application_properties: BTreeMap<String, String>,
    #[serde(default)]
    pub deployment_properties: BTreeMap<String, String>,
}

/// Versioned bundle of app manifests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub metadata: PackageMetadata,
    pub apps: Vec<AppManifest>,
}

/// Overlay config values onto the package defaults
pub fn render(package: &Package, config_values: &Value) -> Result<String, ControllerError> {
    let overrides = match config_values {
        Value::Null => None,
        Value::Object(map) => Some(map),
        _ => {
            return Err(ControllerError::ValidationError(
                "Config values must be a JSON object keyed by app name".to_string(),
            ))
        }
    };

    let mut apps = Vec::with_capacity(package.apps.len());
    for app in &package.apps {
        let mut rendered = app.clone();
        if let Some(values) = overrides.and_then(|o| o.get(&app.name)) {
            apply_overrides(&mut rendered, values)?;
        }
        apps.push(rendered);
    }

    Ok(serde_json::to_string_pretty(&apps)?)
}

/// Parse a rendered manifest
pub fn parse(manifest: &str) -> Result<Vec<AppManifest>, ControllerError> {
    if manifest.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(manifest)?)
}

fn apply_overrides(app: &mut AppManifest, values: &Value) -> Result<(), ControllerError> {
    let values = values.as_object().ok_or_else(|| {
        ControllerError::ValidationError(format!(
            "Config values for app [{}] must be a JSON object",
            app.name
        ))
    })?;

    for (key, value) in values {
        match key.as_str() {
            "resource" => app.resource = scalar(value),
            "version" => app.version = scalar(value),
            "application_properties" => merge_properties(&mut app.application_properties, value),
            "deployment_properties" => merge_properties(&mut app.deployment_properties, value),
            other => {
                return Err(ControllerError::ValidationError(format!(
                    "Unknown config key [{}] for app [{}]",
                    other, app.name
                )))
            }
        }
    }
    Ok(())
}

fn merge_properties(target: &mut BTreeMap<String, String>, value: &Value) {
    if let Some(map) = value.as_object() {
        for (key, value) in map {
            target.insert(key.clone(), scalar(value));
        }
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
