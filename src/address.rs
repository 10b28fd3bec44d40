//! Request addressing.
//!
//! Every batch request carries a custom id that encodes exactly which
//! (project, document, category, chunk) it belongs to:
//!
//! ```text
//! <project>/<document>/<category>/chunk_<index>
//! ```
//!
//! The encoding is injective and losslessly decodable. Reconciliation
//! depends on that round trip: a result line whose id cannot be decoded
//! becomes a fallback record instead of being silently misattributed.

use crate::categories::Category;
use anyhow::{bail, Context, Result};

/// Decoded identity of one batch request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestAddress {
    pub project: String,
    pub document: String,
    pub category: Category,
    pub chunk_index: usize,
}

impl RequestAddress {
    /// Encode as a custom id. Fails when a field contains the `/`
    /// separator, which would make the id ambiguous to decode.
    pub fn encode(&self) -> Result<String> {
        for (field, value) in [("project", &self.project), ("document", &self.document)] {
            if value.contains('/') {
                bail!("Address {} must not contain '/': {:?}", field, value);
            }
            if value.is_empty() {
                bail!("Address {} must not be empty", field);
            }
        }
        Ok(format!(
            "{}/{}/{}/chunk_{}",
            self.project, self.document, self.category, self.chunk_index
        ))
    }

    /// Decode a custom id. Any deviation from the four-segment form is an
    /// explicit error, never a guess.
    pub fn decode(custom_id: &str) -> Result<RequestAddress> {
        let segments: Vec<&str> = custom_id.split('/').collect();
        let &[project, document, category, chunk] = segments.as_slice() else {
            bail!(
                "Invalid custom id (expected 4 '/'-separated segments): {:?}",
                custom_id
            );
        };
        if project.is_empty() || document.is_empty() {
            bail!("Invalid custom id (empty segment): {:?}", custom_id);
        }
        let category = Category::parse(category)
            .with_context(|| format!("Invalid custom id: {:?}", custom_id))?;
        let Some(index) = chunk.strip_prefix("chunk_") else {
            bail!(
                "Invalid custom id (chunk segment must be 'chunk_<index>'): {:?}",
                custom_id
            );
        };
        let chunk_index: usize = index
            .parse()
            .with_context(|| format!("Invalid chunk index in custom id: {:?}", custom_id))?;
        Ok(RequestAddress {
            project: project.to_string(),
            document: document.to_string(),
            category,
            chunk_index,
        })
    }
}

impl std::fmt::Display for RequestAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}/chunk_{}",
            self.project, self.document, self.category, self.chunk_index
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> RequestAddress {
        RequestAddress {
            project: "CFA009660".to_string(),
            document: "IXP-2024-001".to_string(),
            category: Category::Audit,
            chunk_index: 2,
        }
    }

    #[test]
    fn test_encode_format() {
        assert_eq!(addr().encode().unwrap(), "CFA009660/IXP-2024-001/audit/chunk_2");
    }

    #[test]
    fn test_round_trip_lossless() {
        let a = addr();
        let decoded = RequestAddress::decode(&a.encode().unwrap()).unwrap();
        assert_eq!(decoded, a);
    }

    #[test]
    fn test_round_trip_all_categories() {
        for category in Category::ALL {
            let a = RequestAddress {
                category,
                ..addr()
            };
            assert_eq!(RequestAddress::decode(&a.encode().unwrap()).unwrap(), a);
        }
    }

    #[test]
    fn test_encode_rejects_separator_in_fields() {
        let mut a = addr();
        a.document = "IXP/2024".to_string();
        assert!(a.encode().is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_segment_count() {
        assert!(RequestAddress::decode("p/d/audit").is_err());
        assert!(RequestAddress::decode("p/d/audit/chunk_0/extra").is_err());
        assert!(RequestAddress::decode("").is_err());
    }

    #[test]
    fn test_decode_rejects_bad_chunk_segment() {
        assert!(RequestAddress::decode("p/d/audit/chunk_").is_err());
        assert!(RequestAddress::decode("p/d/audit/chunk_x").is_err());
        assert!(RequestAddress::decode("p/d/audit/2").is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_category() {
        assert!(RequestAddress::decode("p/d/metrics/chunk_0").is_err());
    }
}
