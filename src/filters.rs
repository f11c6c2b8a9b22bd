use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Immutable set of bestseller list filters for one fetch. Equality for
/// caching purposes is equality of the canonical serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSet {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isbn: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_api_key: Option<String>,
}

impl FilterSet {
    /// Canonical serialization: struct field order fixes the key order
    /// and absent fields are omitted entirely, so two equal filter sets
    /// always produce byte-identical output regardless of how they were
    /// constructed.
    pub fn canonical_json(&self) -> String {
        // Serializing a plain struct with skipped Nones cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Stable cache key for this filter set: hex SHA-256 of the
    /// canonical serialization. Survives process restarts; never depends
    /// on object identity or map iteration order.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.canonical_json().as_bytes());
        hex::encode(digest)
    }

    /// Outbound query parameters, excluding the API key (the client
    /// resolves the effective key separately). Absent fields are omitted;
    /// the isbn list is joined with `;` as the upstream expects.
    pub fn to_query_params(&self) -> Vec<(&'static str, String)> {
        let mut params = Vec::new();

        if let Some(author) = &self.author {
            params.push(("author", author.clone()));
        }
        if let Some(title) = &self.title {
            params.push(("title", title.clone()));
        }
        if let Some(offset) = self.offset {
            params.push(("offset", offset.to_string()));
        }
        if let Some(isbn) = &self.isbn {
            params.push(("isbn", isbn.join(";")));
        }

        params
    }
}
