//! Build parameters — ordered name/type/value triples.
//!
//! Canonical names (`cds.*`, `git.*`) are wire-stable; see
//! [`crate::services::params`] for the merge precedence rules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Text,
    Number,
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub value: String,
}

impl Parameter {
    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Parameter {
        Parameter {
            name: name.into(),
            kind: ParameterKind::String,
            value: value.into(),
        }
    }
}

/// Append a string parameter.
pub fn add_parameter(params: &mut Vec<Parameter>, name: &str, value: impl Into<String>) {
    params.push(Parameter::string(name, value));
}

/// Value of the first parameter with the given name.
pub fn value_of<'a>(params: &'a [Parameter], name: &str) -> Option<&'a str> {
    params
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.value.as_str())
}

/// The build's branch as recorded in its parameters.
///
/// Historical builds carry the key as `.git.branch`; newer ones as
/// `git.branch`. Both spellings are honored, canonical one first.
pub fn branch_of(params: &[Parameter]) -> Option<&str> {
    value_of(params, "git.branch")
        .or_else(|| value_of(params, ".git.branch"))
        .filter(|v| !v.is_empty())
}
