//! Read-only view of the host's catalog model
//!
//! The host owns catalogs, resources and representations; the writer only
//! needs their ids, their optional JSON property bags and the sample
//! period each representation is produced at.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// A catalog: slash-delimited id plus optional property bag
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    /// Path-like id such as `/SAMPLE/LOCAL`
    pub id: String,
    /// Free-form metadata persisted as the `properties` attribute
    pub properties: Option<Value>,
}

impl Catalog {
    /// Catalog without properties
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: None,
        }
    }

    /// Attach a property bag
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// A resource within a catalog
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Id unique within the catalog
    pub id: String,
    /// Free-form metadata persisted as the `properties` attribute
    pub properties: Option<Value>,
}

impl Resource {
    /// Resource without properties
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            properties: None,
        }
    }

    /// Attach a property bag
    #[must_use]
    pub fn with_properties(mut self, properties: Value) -> Self {
        self.properties = Some(properties);
        self
    }
}

/// One way a resource is sampled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Representation {
    /// Representation id, e.g. `1_s`
    pub id: String,
    /// Time between two samples
    pub sample_period: Duration,
}

impl Representation {
    /// Create a representation
    pub fn new(id: impl Into<String>, sample_period: Duration) -> Self {
        Self {
            id: id.into(),
            sample_period,
        }
    }
}

/// Identifies one logical time series
///
/// Catalog and resource are shared so that many items of the same
/// resource stay cheap to clone.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    /// Owning catalog
    pub catalog: Arc<Catalog>,
    /// Owning resource
    pub resource: Arc<Resource>,
    /// Representation persisted by this item
    pub representation: Representation,
    /// Disambiguates representations sharing an id (e.g. a resampling window)
    pub parameters: Option<BTreeMap<String, String>>,
}

impl CatalogItem {
    /// Item without parameters
    pub fn new(
        catalog: Arc<Catalog>,
        resource: Arc<Resource>,
        representation: Representation,
    ) -> Self {
        Self {
            catalog,
            resource,
            representation,
            parameters: None,
        }
    }

    /// Attach representation parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: BTreeMap<String, String>) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Human-readable `catalog/resource/representation` path for logs and errors
    pub fn path(&self) -> String {
        format!(
            "{}/{}/{}",
            self.catalog.id.trim_end_matches('/'),
            self.resource.id,
            crate::naming::dataset_name(&self.representation.id, self.parameters.as_ref())
        )
    }
}

/// A block of samples destined for one catalog item
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRequest {
    /// Target time series
    pub item: CatalogItem,
    /// Samples starting at the write offset
    pub samples: Vec<f64>,
}

impl WriteRequest {
    /// Create a request
    pub fn new(item: CatalogItem, samples: Vec<f64>) -> Self {
        Self { item, samples }
    }
}
