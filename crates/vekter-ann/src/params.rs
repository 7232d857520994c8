//! Runtime parameter DSL.
//!
//! Parameters arrive as a human-readable comma-separated `key=value` string
//! (the convention of the factory-style index libraries this engine mirrors)
//! and are parsed into a typed form before being applied, so unknown keys
//! are reported against the composed index rather than silently ignored.

use bincode::{Decode, Encode};

use crate::error::{AnnError, AnnResult};
use crate::factory::IndexSpec;

/// Typed, validated runtime parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Encode, Decode)]
pub struct RuntimeParams {
    /// Number of inverted lists probed per query. Defaults to 1.
    pub nprobe: Option<usize>,
}

impl RuntimeParams {
    /// Effective probe count.
    pub fn effective_nprobe(&self) -> usize {
        self.nprobe.unwrap_or(1)
    }

    /// Parse and validate a parameter string against an index composition.
    pub fn resolve(spec: &IndexSpec, raw: &str) -> AnnResult<Self> {
        let mut params = Self::default();
        for (key, value) in split_pairs(spec, raw)? {
            match key.as_str() {
                "nprobe" if spec.has_ivf() => {
                    let n: usize =
                        value
                            .parse()
                            .map_err(|_| AnnError::InvalidParameterValue {
                                key: key.clone(),
                                value: value.clone(),
                                message: "expected a positive integer".to_string(),
                            })?;
                    if n == 0 {
                        return Err(AnnError::InvalidParameterValue {
                            key: key.clone(),
                            value: value.clone(),
                            message: "nprobe must be > 0".to_string(),
                        });
                    }
                    params.nprobe = Some(n);
                }
                _ => {
                    return Err(AnnError::UnknownParameter {
                        key: key.clone(),
                        descriptor: spec.descriptor.clone(),
                    })
                }
            }
        }
        Ok(params)
    }
}

/// Split `key=value,key=value` into trimmed pairs.
fn split_pairs(spec: &IndexSpec, raw: &str) -> AnnResult<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    for part in raw.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        match part.split_once('=') {
            Some((key, value)) => {
                pairs.push((key.trim().to_string(), value.trim().to_string()))
            }
            None => {
                return Err(AnnError::UnknownParameter {
                    key: part.to_string(),
                    descriptor: spec.descriptor.clone(),
                })
            }
        }
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory;

    #[test]
    fn test_resolve_nprobe() {
        let spec = factory::parse("IVF16,Flat").unwrap();
        let params = RuntimeParams::resolve(&spec, "nprobe=4").unwrap();
        assert_eq!(params.nprobe, Some(4));
        assert_eq!(params.effective_nprobe(), 4);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let spec = factory::parse("IVF16,Flat").unwrap();
        let err = RuntimeParams::resolve(&spec, "quantizer_efSearch=40").unwrap_err();
        assert!(matches!(err, AnnError::UnknownParameter { ref key, .. } if key == "quantizer_efSearch"));
    }

    #[test]
    fn test_nprobe_invalid_on_flat() {
        let spec = factory::parse("Flat").unwrap();
        assert!(matches!(
            RuntimeParams::resolve(&spec, "nprobe=4"),
            Err(AnnError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_bad_values_rejected() {
        let spec = factory::parse("IVF16,Flat").unwrap();
        assert!(matches!(
            RuntimeParams::resolve(&spec, "nprobe=zero"),
            Err(AnnError::InvalidParameterValue { .. })
        ));
        assert!(matches!(
            RuntimeParams::resolve(&spec, "nprobe=0"),
            Err(AnnError::InvalidParameterValue { .. })
        ));
        assert!(matches!(
            RuntimeParams::resolve(&spec, "nprobe"),
            Err(AnnError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn test_empty_string_is_defaults() {
        let spec = factory::parse("IVF16,Flat").unwrap();
        let params = RuntimeParams::resolve(&spec, "").unwrap();
        assert_eq!(params, RuntimeParams::default());
        assert_eq!(params.effective_nprobe(), 1);
    }
}
