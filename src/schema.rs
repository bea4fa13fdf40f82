// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Message Schemas
//!
//! A message schema is a Rust type: `serde` describes its shape and
//! `validator` its rules. Bodies travel as UTF-8 JSON.

use crate::errors::ValidationError;
use serde::{de::DeserializeOwned, Serialize};
use validator::Validate;

/// Types that can be published and consumed.
pub trait MessageSchema: Serialize + DeserializeOwned + Validate + Send + Sync + 'static {}

impl<T> MessageSchema for T where T: Serialize + DeserializeOwned + Validate + Send + Sync + 'static {}

/// Checks the validation rules of `message`.
pub fn validate<T: MessageSchema>(message: &T) -> Result<(), ValidationError> {
    message
        .validate()
        .map_err(|errs| ValidationError::Invalid(errs.to_string()))
}

/// Decodes a message body.
///
/// The body must be UTF-8 JSON, shaped like `T`, and pass `T`'s rules.
pub fn decode<T: MessageSchema>(body: &[u8]) -> Result<T, ValidationError> {
    let text = std::str::from_utf8(body).map_err(|err| ValidationError::Encoding(err.to_string()))?;

    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|err| ValidationError::Malformed(err.to_string()))?;

    let message: T =
        serde_json::from_value(value).map_err(|err| ValidationError::Mismatch(err.to_string()))?;

    validate(&message)?;
    Ok(message)
}

/// Validates `message` and encodes it as a JSON body.
pub fn encode<T: MessageSchema>(message: &T) -> Result<Vec<u8>, ValidationError> {
    validate(message)?;
    serde_json::to_vec(message).map_err(|err| ValidationError::Mismatch(err.to_string()))
}
