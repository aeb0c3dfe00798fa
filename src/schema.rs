//! Response conversion
//!
//! Handlers return raw JSON (an object, an array of objects, or anything
//! else). The declared response type decides what happens next:
//!
//! - `serde_json::Value` keeps the payload unconstrained;
//! - any `DeserializeOwned` type (including `Vec<T>`) is validated and converted;
//! - [`OneOf<S, E>`] tries the success schema first and the error schema second.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Convert a raw payload into the declared response type.
pub fn convert_response<T: DeserializeOwned>(raw: Value) -> Result<T> {
    Ok(serde_json::from_value(raw)?)
}

/// Union of a success schema and an error schema.
///
/// Returned by methods whose upstream answers with either shape without
/// raising; matching the error variant is the caller's business.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOf<S, E> {
    Success(S),
    Error(E),
}

impl<S, E> OneOf<S, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, OneOf::Success(_))
    }

    pub fn success(self) -> Option<S> {
        match self {
            OneOf::Success(s) => Some(s),
            OneOf::Error(_) => None,
        }
    }

    pub fn into_result(self) -> std::result::Result<S, E> {
        match self {
            OneOf::Success(s) => Ok(s),
            OneOf::Error(e) => Err(e),
        }
    }
}
