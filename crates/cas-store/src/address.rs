use std::fmt;

use cas_types::ObjectId;
use url::Url;

use crate::error::{StoreError, StoreResult};
use crate::traits::BlobKey;

/// The only scheme a store address may use.
pub const STORE_SCHEME: &str = "s3";

/// Parsed store address: `s3://bucket/prefix`.
///
/// The bucket is the URL host and must be non-empty. The prefix is the
/// percent-decoded URL path with surrounding slashes removed and may be empty, in which case
/// objects live at the root of the bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreAddress {
    bucket: String,
    prefix: String,
}

impl StoreAddress {
    pub fn parse(address: &str) -> StoreResult<Self> {
        let url = Url::parse(address).map_err(|e| StoreError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        if url.scheme() != STORE_SCHEME {
            return Err(StoreError::UnsupportedScheme {
                address: address.to_string(),
                scheme: url.scheme().to_string(),
            });
        }
        let bucket = url.host_str().unwrap_or_default();
        if bucket.is_empty() {
            return Err(StoreError::InvalidAddress {
                address: address.to_string(),
                reason: "missing bucket name".into(),
            });
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(StoreError::InvalidAddress {
                address: address.to_string(),
                reason: "query strings and fragments are not allowed".into(),
            });
        }
        let path = urlencoding::decode(url.path()).map_err(|e| StoreError::InvalidAddress {
            address: address.to_string(),
            reason: format!("prefix is not valid UTF-8: {e}"),
        })?;
        let prefix = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect::<Vec<_>>()
            .join("/");
        Ok(Self {
            bucket: bucket.to_string(),
            prefix,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Backend key for an object: `prefix/objectID` inside the bucket.
    pub fn key_for(&self, id: &ObjectId) -> BlobKey {
        let key = if self.prefix.is_empty() {
            id.to_hex()
        } else {
            format!("{}/{}", self.prefix, id.to_hex())
        };
        BlobKey::new(self.bucket.clone(), key)
    }
}

impl fmt::Display for StoreAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{STORE_SCHEME}://{}", self.bucket)
        } else {
            write!(f, "{STORE_SCHEME}://{}/{}", self.bucket, self.prefix)
        }
    }
}

impl std::str::FromStr for StoreAddress {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
