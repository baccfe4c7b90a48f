use std::fmt;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

/// Pure, deterministic content rewrite applied to every downloaded file.
pub trait ContentTransform: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, TransformError>;

    /// `apply(apply(x)) == apply(x)` for every input `apply` accepts.
    fn is_idempotent(&self) -> bool {
        false
    }
}

/// Uppercases every letter of UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Uppercase;

impl ContentTransform for Uppercase {
    fn name(&self) -> &str {
        "uppercase"
    }

    fn apply(&self, input: &[u8]) -> Result<Vec<u8>, TransformError> {
        let text = std::str::from_utf8(input)
            .map_err(|e| TransformError(format!("content is not UTF-8 text: {}", e)))?;
        Ok(text.to_uppercase().into_bytes())
    }

    fn is_idempotent(&self) -> bool {
        true
    }
}
