//! Group/dataset tree of one period file
//!
//! [`NamespaceTree::build`] resolves every catalog item of an open call into
//! physical names and chunk geometry without touching storage, so naming
//! conflicts and geometry errors surface before a file exists.
//! [`NamespaceTree::commit`] then creates the tree in a container and
//! returns the [`DatasetIndex`] the dispatcher resolves writes through.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tessera_format::FilterPipeline;
use tracing::debug;

use crate::backend::{ContainerFile, DatasetSpec};
use crate::catalog::CatalogItem;
use crate::error::{Result, WriterError};
use crate::naming;
use crate::planner::{ChunkLayout, ChunkPlanner, total_length};

/// Root attribute holding the period begin
pub const DATE_TIME_ATTRIBUTE: &str = "date_time";
/// Root attribute holding the sample period unit string
pub const SAMPLE_PERIOD_ATTRIBUTE: &str = "sample_period";
/// Group attribute holding the indented JSON property bag
pub const PROPERTIES_ATTRIBUTE: &str = "properties";

/// Physical address of one dataset
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatasetKey {
    /// Catalog group name
    pub catalog_physical_id: String,
    /// Resource group name
    pub resource_id: String,
    /// Dataset name
    pub dataset_name: String,
}

impl DatasetKey {
    /// Key of the dataset persisting `item`
    pub fn for_item(item: &CatalogItem) -> Self {
        Self {
            catalog_physical_id: naming::physical_id(&item.catalog.id),
            resource_id: item.resource.id.clone(),
            dataset_name: naming::dataset_name(&item.representation.id, item.parameters.as_ref()),
        }
    }

    /// Slash-separated path inside the container
    pub fn path(&self) -> String {
        format!(
            "/{}/{}/{}",
            self.catalog_physical_id, self.resource_id, self.dataset_name
        )
    }
}

/// Dataset handles created at open, keyed by physical address
#[derive(Debug, Clone)]
pub struct DatasetIndex<N> {
    datasets: HashMap<DatasetKey, N>,
    total_length: u64,
}

impl<N: Copy> DatasetIndex<N> {
    /// Handle of the dataset at `key`
    pub fn get(&self, key: &DatasetKey) -> Option<N> {
        self.datasets.get(key).copied()
    }

    /// Element count shared by every dataset
    pub fn total_length(&self) -> u64 {
        self.total_length
    }

    /// Number of datasets
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// Whether no dataset was declared
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Planned dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetEntry {
    /// Dataset name
    pub name: String,
    /// Chunk geometry
    pub chunks: ChunkLayout,
}

/// Planned resource group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    /// Group name (raw resource id)
    pub id: String,
    /// Indented JSON of the property bag
    pub properties: Option<String>,
    /// Datasets in first-seen order
    pub datasets: Vec<DatasetEntry>,
}

/// Planned catalog group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogGroup {
    /// Catalog id as supplied by the host
    pub catalog_id: String,
    /// Group name
    pub physical_id: String,
    /// Indented JSON of the property bag
    pub properties: Option<String>,
    /// Resources in first-seen order
    pub resources: Vec<ResourceGroup>,
}

/// Complete namespace of one period file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTree {
    /// Value of the `date_time` root attribute
    pub date_time: String,
    /// Value of the `sample_period` root attribute
    pub sample_period: String,
    /// Samples per dataset
    pub total_length: u64,
    /// Catalogs in first-seen order
    pub catalogs: Vec<CatalogGroup>,
}

fn properties_json(properties: Option<&Value>) -> Result<Option<String>> {
    properties
        .map(serde_json::to_string_pretty)
        .transpose()
        .map_err(WriterError::from)
}

impl NamespaceTree {
    /// Resolve `items` into the tree of a file covering `file_period` from
    /// `period_begin`, sampled every `sample_period`
    ///
    /// # Errors
    ///
    /// - `SampleRateTooLow` when no sample or no chunk fits the period
    /// - `InvalidRequest` for an item sampled at another period
    /// - `DuplicateName` for colliding catalog groups or dataset names
    /// - `Serialization` for a property bag that cannot be rendered
    pub fn build(
        period_begin: DateTime<Utc>,
        file_period: Duration,
        sample_period: Duration,
        items: &[CatalogItem],
        planner: &ChunkPlanner,
    ) -> Result<Self> {
        let total_length = total_length(file_period, sample_period)?;
        let chunks = planner.plan(total_length);
        if total_length == 0 || chunks.chunk_length == 0 {
            return Err(WriterError::SampleRateTooLow {
                file_period,
                sample_period,
                total_length,
            });
        }

        let mut catalogs: Vec<CatalogGroup> = Vec::new();
        for item in items {
            if item.representation.sample_period != sample_period {
                return Err(WriterError::InvalidRequest(format!(
                    "{} is sampled every {:?}, file is sampled every {:?}",
                    item.path(),
                    item.representation.sample_period,
                    sample_period
                )));
            }

            let catalog = match catalogs
                .iter()
                .position(|c| c.catalog_id == item.catalog.id)
            {
                Some(index) => &mut catalogs[index],
                None => {
                    let physical_id = naming::physical_id(&item.catalog.id);
                    if physical_id.is_empty() {
                        return Err(WriterError::InvalidRequest(format!(
                            "catalog id '{}' maps to an empty group name",
                            item.catalog.id
                        )));
                    }
                    if let Some(other) = catalogs.iter().find(|c| c.physical_id == physical_id) {
                        return Err(WriterError::DuplicateName {
                            scope: format!(
                                "catalogs '{}' and '{}'",
                                other.catalog_id, item.catalog.id
                            ),
                            name: physical_id,
                        });
                    }
                    catalogs.push(CatalogGroup {
                        catalog_id: item.catalog.id.clone(),
                        physical_id,
                        properties: properties_json(item.catalog.properties.as_ref())?,
                        resources: Vec::new(),
                    });
                    let last = catalogs.len() - 1;
                    &mut catalogs[last]
                }
            };

            let resource = match catalog
                .resources
                .iter()
                .position(|r| r.id == item.resource.id)
            {
                Some(index) => &mut catalog.resources[index],
                None => {
                    check_segment("resource id", &item.resource.id)?;
                    catalog.resources.push(ResourceGroup {
                        id: item.resource.id.clone(),
                        properties: properties_json(item.resource.properties.as_ref())?,
                        datasets: Vec::new(),
                    });
                    let last = catalog.resources.len() - 1;
                    &mut catalog.resources[last]
                }
            };

            let name = naming::dataset_name(&item.representation.id, item.parameters.as_ref());
            check_segment("dataset name", &name)?;
            if resource.datasets.iter().any(|d| d.name == name) {
                return Err(WriterError::DuplicateName {
                    scope: format!("resource {}/{}", catalog.physical_id, resource.id),
                    name,
                });
            }
            resource.datasets.push(DatasetEntry { name, chunks });
        }

        Ok(Self {
            date_time: naming::date_time(period_begin),
            sample_period: naming::unit_string(sample_period),
            total_length,
            catalogs,
        })
    }

    /// Number of datasets in the tree
    pub fn dataset_count(&self) -> usize {
        self.catalogs
            .iter()
            .flat_map(|c| &c.resources)
            .map(|r| r.datasets.len())
            .sum()
    }

    /// Create the tree in `file`
    pub fn commit<F: ContainerFile>(
        &self,
        file: &mut F,
        pipeline: FilterPipeline,
    ) -> Result<DatasetIndex<F::Node>> {
        let root = file.root();
        file.set_attribute(root, DATE_TIME_ATTRIBUTE, &self.date_time)?;
        file.set_attribute(root, SAMPLE_PERIOD_ATTRIBUTE, &self.sample_period)?;

        let mut datasets = HashMap::with_capacity(self.dataset_count());
        for catalog in &self.catalogs {
            let catalog_node = file.create_group(root, &catalog.physical_id)?;
            if let Some(properties) = &catalog.properties {
                file.set_attribute(catalog_node, PROPERTIES_ATTRIBUTE, properties)?;
            }

            for resource in &catalog.resources {
                let resource_node = file.create_group(catalog_node, &resource.id)?;
                if let Some(properties) = &resource.properties {
                    file.set_attribute(resource_node, PROPERTIES_ATTRIBUTE, properties)?;
                }

                for dataset in &resource.datasets {
                    let spec = DatasetSpec {
                        chunks: dataset.chunks,
                        pipeline,
                    };
                    let node = file.create_dataset(resource_node, &dataset.name, spec)?;
                    datasets.insert(
                        DatasetKey {
                            catalog_physical_id: catalog.physical_id.clone(),
                            resource_id: resource.id.clone(),
                            dataset_name: dataset.name.clone(),
                        },
                        node,
                    );
                }
            }
            debug!(
                catalog = %catalog.catalog_id,
                group = %catalog.physical_id,
                resources = catalog.resources.len(),
                "created catalog group"
            );
        }

        Ok(DatasetIndex {
            datasets,
            total_length: self.total_length,
        })
    }
}

/// A group or dataset name must be one non-empty path segment
fn check_segment(what: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains('/') {
        return Err(WriterError::InvalidRequest(format!(
            "{what} '{name}' is not a single path segment"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Representation, Resource};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn begin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn item(catalog: &Arc<Catalog>, resource: &str, representation: &str) -> CatalogItem {
        CatalogItem::new(
            Arc::clone(catalog),
            Arc::new(Resource::new(resource)),
            Representation::new(representation, Duration::from_secs(1)),
        )
    }

    fn build(items: &[CatalogItem]) -> Result<NamespaceTree> {
        NamespaceTree::build(
            begin(),
            Duration::from_secs(2_000),
            Duration::from_secs(1),
            items,
            &ChunkPlanner::default(),
        )
    }

    #[test]
    fn test_groups_by_catalog_and_resource() {
        let a = Arc::new(Catalog::new("/A/B/C").with_properties(json!({"a": 1})));
        let b = Arc::new(Catalog::new("/D/E/F"));
        let items = vec![
            item(&a, "T1", "1_s"),
            item(&b, "V1", "1_s"),
            item(&a, "T1", "1_s").with_parameters(BTreeMap::from([(
                "window".to_string(),
                "5".to_string(),
            )])),
            item(&a, "T2", "1_s"),
        ];

        let tree = build(&items).expect("Test operation should succeed");
        assert_eq!(tree.date_time, "2020-01-01T00:00:00Z");
        assert_eq!(tree.sample_period, "1 s");
        assert_eq!(tree.total_length, 2_000);
        assert_eq!(tree.dataset_count(), 4);

        let groups: Vec<&str> = tree.catalogs.iter().map(|c| c.physical_id.as_str()).collect();
        assert_eq!(groups, vec!["A_B_C", "D_E_F"]);
        assert_eq!(
            tree.catalogs[0].properties.as_deref(),
            Some("{\n  \"a\": 1\n}")
        );
        assert_eq!(tree.catalogs[1].properties, None);

        let t1 = &tree.catalogs[0].resources[0];
        let names: Vec<&str> = t1.datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["dataset_1_s", "dataset_1_s(window=5)"]);
        assert_eq!(
            t1.datasets[0].chunks,
            ChunkLayout {
                chunk_length: 2_000,
                chunk_count: 1
            }
        );
    }

    #[test]
    fn test_duplicate_dataset_rejected() {
        let a = Arc::new(Catalog::new("/A"));
        let items = vec![item(&a, "T1", "1_s"), item(&a, "T1", "1_s")];
        assert!(matches!(
            build(&items),
            Err(WriterError::DuplicateName { name, .. }) if name == "dataset_1_s"
        ));
    }

    #[test]
    fn test_colliding_catalog_ids_rejected() {
        let a = Arc::new(Catalog::new("/A/B"));
        let b = Arc::new(Catalog::new("A_B"));
        let items = vec![item(&a, "T1", "1_s"), item(&b, "T1", "1_s")];
        assert!(matches!(
            build(&items),
            Err(WriterError::DuplicateName { name, .. }) if name == "A_B"
        ));
    }

    #[test]
    fn test_mismatched_sample_period_rejected() {
        let a = Arc::new(Catalog::new("/A"));
        let slow = CatalogItem::new(
            a,
            Arc::new(Resource::new("T1")),
            Representation::new("1_min", Duration::from_secs(60)),
        );
        assert!(matches!(build(&[slow]), Err(WriterError::InvalidRequest(_))));
    }

    #[test]
    fn test_sample_period_longer_than_file() {
        let result = NamespaceTree::build(
            begin(),
            Duration::from_secs(10),
            Duration::from_secs(60),
            &[],
            &ChunkPlanner::default(),
        );
        assert!(matches!(
            result,
            Err(WriterError::SampleRateTooLow { total_length: 0, .. })
        ));
    }

    #[test]
    fn test_unaddressable_names_rejected() {
        let root = Arc::new(Catalog::new("/"));
        assert!(matches!(
            build(&[item(&root, "T1", "1_s")]),
            Err(WriterError::InvalidRequest(_))
        ));

        let a = Arc::new(Catalog::new("/A"));
        for resource in ["", "T/1"] {
            assert!(
                matches!(build(&[item(&a, resource, "1_s")]), Err(WriterError::InvalidRequest(_))),
                "resource {resource:?}"
            );
        }

        assert!(matches!(
            build(&[item(&a, "T1", "1/s")]),
            Err(WriterError::InvalidRequest(_))
        ));
        let with_slash = item(&a, "T1", "1_s").with_parameters(BTreeMap::from([(
            "path".to_string(),
            "a/b".to_string(),
        )]));
        assert!(matches!(build(&[with_slash]), Err(WriterError::InvalidRequest(_))));

        // Nested catalog ids flatten to one segment
        assert!(build(&[item(&Arc::new(Catalog::new("/A/B")), "T1", "1_s")]).is_ok());
    }

    #[test]
    fn test_dataset_key_matches_item() {
        let a = Arc::new(Catalog::new("/SAMPLE/LOCAL"));
        let key = DatasetKey::for_item(&item(&a, "T1", "1_s"));
        assert_eq!(key.path(), "/SAMPLE_LOCAL/T1/dataset_1_s");
    }
}
