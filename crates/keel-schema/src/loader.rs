//! Decoding specs from YAML.
//!
//! Two encodings are accepted. The resource envelope
//!
//! ```yaml
//! apiVersion: schemas.example.io/v1alpha4
//! kind: Table
//! metadata:
//!   name: users
//! spec:
//!   name: users
//!   schema: { ... }
//! ```
//!
//! is tried first and only accepted when its nested spec carries a schema
//! block. Anything else is decoded as a bare spec.

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{DataTypeSpec, Result, TableSpec};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    #[serde(default)]
    metadata: Option<Metadata>,
    spec: Option<T>,
}

#[derive(Deserialize)]
struct Metadata {
    #[serde(default)]
    name: Option<String>,
}

trait Named {
    fn name_mut(&mut self) -> &mut String;
    fn has_schema(&self) -> bool;
}

impl Named for TableSpec {
    fn name_mut(&mut self) -> &mut String {
        &mut self.name
    }

    fn has_schema(&self) -> bool {
        self.schema.is_some()
    }
}

impl Named for DataTypeSpec {
    fn name_mut(&mut self) -> &mut String {
        &mut self.name
    }

    fn has_schema(&self) -> bool {
        self.schema.is_some()
    }
}

fn parse<T: DeserializeOwned + Named>(input: &str) -> Result<T> {
    if let Ok(envelope) = serde_yaml::from_str::<Envelope<T>>(input)
        && let Some(mut spec) = envelope.spec
        && spec.has_schema()
    {
        // The resource name stands in for a spec that omits its own.
        if spec.name_mut().is_empty()
            && let Some(name) = envelope.metadata.and_then(|m| m.name)
        {
            *spec.name_mut() = name;
        }
        return Ok(spec);
    }

    Ok(serde_yaml::from_str(input)?)
}

/// Decode a table spec without validating it. A spec with no schema block
/// decodes fine; callers that skip such specs check
/// [`TableSpec::schema_for`] before calling [`TableSpec::validate`].
pub fn decode_table_spec(input: &str) -> Result<TableSpec> {
    parse(input)
}

/// Decode and validate a table spec.
pub fn parse_table_spec(input: &str) -> Result<TableSpec> {
    let spec = decode_table_spec(input)?;
    spec.validate()?;
    Ok(spec)
}

/// Decode and validate a type spec.
pub fn parse_type_spec(input: &str) -> Result<DataTypeSpec> {
    let spec: DataTypeSpec = parse(input)?;
    spec.validate()?;
    Ok(spec)
}
