//! Factory descriptor parsing.
//!
//! Index composition is described by a short comma-separated DSL in the
//! style of the FAISS index factory:
//!
//! - `Flat` — exact flat index, trained on construction
//! - `IVF<nlist>,Flat` — inverted-file coarse quantizer over flat storage
//! - `PQ<m>` — product-quantized storage with `m` sub-quantizers
//! - `IVF<nlist>,PQ<m>` — both
//!
//! Anything else is rejected with the offending component named.

use bincode::{Decode, Encode};

use crate::error::{AnnError, AnnResult};

/// Storage layout for encoded vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum StorageKind {
    /// Full-precision f32 rows.
    Flat,
    /// Product-quantized codes, `m` sub-quantizers of 256 centroids each.
    Pq { m: usize },
}

/// Parsed index composition.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct IndexSpec {
    /// The descriptor as written.
    pub descriptor: String,

    /// Inverted-file list count, when an IVF component is present.
    pub nlist: Option<usize>,

    /// Vector storage layout.
    pub storage: StorageKind,
}

impl IndexSpec {
    /// Whether training is required before vectors can be added.
    ///
    /// A flat index with no coarse quantizer has no learned parameters.
    pub fn requires_training(&self) -> bool {
        self.nlist.is_some() || matches!(self.storage, StorageKind::Pq { .. })
    }

    /// Whether the composition has an IVF component.
    pub fn has_ivf(&self) -> bool {
        self.nlist.is_some()
    }
}

/// Parse a factory descriptor.
pub fn parse(descriptor: &str) -> AnnResult<IndexSpec> {
    let components: Vec<&str> = descriptor
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .collect();
    if components.is_empty() {
        return Err(AnnError::factory(descriptor, "descriptor is empty"));
    }

    let mut nlist: Option<usize> = None;
    let mut storage: Option<StorageKind> = None;

    for component in &components {
        if *component == "Flat" {
            if storage.is_some() {
                return Err(AnnError::factory(descriptor, "multiple storage components"));
            }
            storage = Some(StorageKind::Flat);
        } else if let Some(rest) = component.strip_prefix("IVF") {
            if nlist.is_some() {
                return Err(AnnError::factory(descriptor, "multiple IVF components"));
            }
            let n: usize = rest.parse().map_err(|_| {
                AnnError::factory(
                    descriptor,
                    format!("unsupported component '{}'", component),
                )
            })?;
            if n == 0 {
                return Err(AnnError::factory(descriptor, "IVF list count must be > 0"));
            }
            nlist = Some(n);
        } else if let Some(rest) = component.strip_prefix("PQ") {
            if storage.is_some() {
                return Err(AnnError::factory(descriptor, "multiple storage components"));
            }
            let m: usize = rest.parse().map_err(|_| {
                AnnError::factory(
                    descriptor,
                    format!("unsupported component '{}'", component),
                )
            })?;
            if m == 0 {
                return Err(AnnError::factory(descriptor, "PQ sub-quantizer count must be > 0"));
            }
            storage = Some(StorageKind::Pq { m });
        } else {
            return Err(AnnError::factory(
                descriptor,
                format!("unsupported component '{}'", component),
            ));
        }
    }

    let storage = match storage {
        Some(s) => s,
        // Bare "IVF<n>" is rejected; the storage layout must be explicit.
        None => {
            return Err(AnnError::factory(
                descriptor,
                "missing storage component (expected Flat or PQ<m>)",
            ))
        }
    };

    Ok(IndexSpec {
        descriptor: descriptor.to_string(),
        nlist,
        storage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flat() {
        let spec = parse("Flat").unwrap();
        assert_eq!(spec.storage, StorageKind::Flat);
        assert_eq!(spec.nlist, None);
        assert!(!spec.requires_training());
    }

    #[test]
    fn test_parse_ivf_flat() {
        let spec = parse("IVF64,Flat").unwrap();
        assert_eq!(spec.nlist, Some(64));
        assert_eq!(spec.storage, StorageKind::Flat);
        assert!(spec.requires_training());
    }

    #[test]
    fn test_parse_pq() {
        let spec = parse("PQ8").unwrap();
        assert_eq!(spec.storage, StorageKind::Pq { m: 8 });
        assert!(spec.requires_training());
    }

    #[test]
    fn test_parse_ivf_pq() {
        let spec = parse("IVF256,PQ16").unwrap();
        assert_eq!(spec.nlist, Some(256));
        assert_eq!(spec.storage, StorageKind::Pq { m: 16 });
    }

    #[test]
    fn test_reject_unknown_component() {
        let err = parse("OPQ64,IVF50000_HNSW32,PQ64").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("OPQ64") || msg.contains("IVF50000_HNSW32"));
    }

    #[test]
    fn test_reject_bare_ivf() {
        assert!(parse("IVF16").is_err());
    }

    #[test]
    fn test_reject_empty_and_zero() {
        assert!(parse("").is_err());
        assert!(parse("IVF0,Flat").is_err());
        assert!(parse("PQ0").is_err());
    }
}
