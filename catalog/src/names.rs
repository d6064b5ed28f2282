use crate::schema::Entity;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("query references unknown table '{0}'")]
    UnknownTable(String),
    #[error("unclosed table reference starting at byte {0}")]
    Unclosed(usize),
}

/// Maps logical TPC-H table names to the physical names of one target.
///
/// Query templates reference tables as `{lineitem}`; the same template can then run against a
/// target that keeps its tables in another schema or under other names.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TableMap {
    /// optional schema every table without an explicit override is qualified with
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub names: BTreeMap<Entity, String>,
}

impl TableMap {
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn with_name(mut self, entity: Entity, name: impl Into<String>) -> Self {
        self.names.insert(entity, name.into());
        self
    }

    /// physical name of a table, overrides take precedence and are used verbatim
    pub fn physical(&self, entity: Entity) -> String {
        match (self.names.get(&entity), &self.schema) {
            (Some(name), _) => name.clone(),
            (None, Some(schema)) => format!("{schema}.{}", entity.name()),
            (None, None) => entity.name().to_owned(),
        }
    }

    /// names that are not plain (optionally qualified) SQL identifiers
    pub fn invalid_names(&self) -> Vec<String> {
        self.schema
            .iter()
            .chain(self.names.values())
            .filter(|name| !is_identifier(name))
            .cloned()
            .collect()
    }

    /// substitute every `{table}` reference in `template`
    pub fn resolve(&self, template: &str) -> Result<String, ResolveError> {
        let mut resolved = String::with_capacity(template.len());
        let mut rest = template;
        let mut offset = 0;

        while let Some(start) = rest.find('{') {
            resolved.push_str(&rest[..start]);

            let end = rest[start..]
                .find('}')
                .ok_or(ResolveError::Unclosed(offset + start))?;
            let name = rest[start + 1..start + end].trim();
            let entity = name
                .parse::<Entity>()
                .map_err(|_| ResolveError::UnknownTable(name.to_owned()))?;

            resolved.push_str(&self.physical(entity));

            offset += start + end + 1;
            rest = &rest[start + end + 1..];
        }

        resolved.push_str(rest);

        Ok(resolved)
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|part| {
            part.chars()
                .next()
                .map_or(false, |first| first.is_ascii_alphabetic() || first == '_')
                && part.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}
