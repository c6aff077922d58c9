//! Loading desired-state declarations from YAML manifests.
//!
//! A manifest is a stream of YAML documents, each one a resource tagged
//! with its `kind`:
//!
//! ```yaml
//! kind: Ride
//! metadata:
//!   name: coaster
//! spec:
//!   type: roller-coaster
//!   capacity: 4
//! ---
//! kind: Operator
//! metadata:
//!   name: op1
//! spec:
//!   frequency: 20
//!   rideRef:
//!     name: coaster
//! ```

use std::path::Path;

use itertools::Itertools;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::resource::Managed;

/// Parse every resource declared in `text`.
///
/// # Errors
///
/// Returns an error if a document is not a valid resource, a name is
/// empty, or the same kind/name pair is declared twice.
pub fn parse_manifests(text: &str) -> Result<Vec<Managed>> {
    let mut resources = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        if value.is_null() {
            continue;
        }
        let resource: Managed =
            serde_yaml::from_value(value).map_err(|e| Error::yaml_parse_failed(e.to_string()))?;
        resources.push(resource);
    }
    checked(resources)
}

/// Parse a JSON manifest: a single resource or an array of resources.
///
/// # Errors
///
/// Same conditions as [`parse_manifests`].
pub fn parse_json_manifests(text: &str) -> Result<Vec<Managed>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Document {
        Many(Vec<Managed>),
        One(Box<Managed>),
    }

    let document: Document =
        serde_json::from_str(text).map_err(|e| Error::json_parse_failed(e.to_string()))?;
    let resources = match document {
        Document::Many(resources) => resources,
        Document::One(resource) => vec![*resource],
    };
    checked(resources)
}

/// Read and parse a manifest file. Files ending in `.json` are read as
/// JSON, anything else as YAML.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn load_manifests(path: impl AsRef<Path>) -> Result<Vec<Managed>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::manifest_read_failed(path, e.to_string()))?;
    if path.extension().is_some_and(|e| e == "json") {
        parse_json_manifests(&text)
    } else {
        parse_manifests(&text)
    }
}

fn checked(resources: Vec<Managed>) -> Result<Vec<Managed>> {
    resources.iter().try_for_each(validate)?;
    if let Some(key) = resources.iter().map(Managed::key).duplicates().next() {
        return Err(Error::DuplicateResource {
            kind: key.kind.to_string(),
            name: key.name,
        });
    }
    debug!(count = resources.len(), "Parsed manifests");
    Ok(resources)
}

fn validate(resource: &Managed) -> Result<()> {
    if resource.name().trim().is_empty() {
        return Err(Error::invalid_resource(
            resource.kind().to_string(),
            "metadata.name must not be empty",
        ));
    }
    match resource {
        Managed::Ride(ride) if ride.status.operator_ref.is_some() => Err(Error::invalid_resource(
            ride.name(),
            "status.operatorRef is set by reconciliation and cannot be declared",
        )),
        _ => Ok(()),
    }
}
