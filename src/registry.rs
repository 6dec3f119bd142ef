use crate::catalog::Catalog;
use serde::Serialize;
use std::collections::BTreeMap;

/// One entry in the `/datasets` listing: a dataset name and the HTTP verbs it supports.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct DatasetListing {
    pub name: String,
    #[serde(rename = "type")]
    pub verbs: Vec<&'static str>,
}

/// Builds the dataset listing as the union of configured producer and consumer datasets,
/// annotated with the verbs each supports.
pub fn list(catalog: &Catalog) -> Vec<DatasetListing> {
    let mut verbs_by_name: BTreeMap<&str, Vec<&'static str>> = BTreeMap::new();

    for producer in &catalog.producers {
        verbs_by_name.entry(&producer.dataset).or_default().push("POST");
    }

    for consumer in &catalog.consumers {
        verbs_by_name.entry(&consumer.dataset).or_default().push("GET");
    }

    verbs_by_name
        .into_iter()
        .map(|(name, verbs)| DatasetListing {
            name: name.to_string(),
            verbs,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ConsumerConfig, ProducerConfig};

    fn producer(dataset: &str) -> ProducerConfig {
        ProducerConfig {
            dataset: dataset.to_string(),
            topic: "t".to_string(),
            create_topic: false,
            topic_settings: None,
            strip_props: false,
            key: None,
        }
    }

    fn consumer(dataset: &str) -> ConsumerConfig {
        ConsumerConfig {
            dataset: dataset.to_string(),
            topic: "t".to_string(),
            group_id: "g".to_string(),
            value_decoder: None,
            position: None,
            name_space: "ns".to_string(),
            base_name_space: "http://example.com/".to_string(),
            include_headers: false,
            entity_id_constructor: "%v".to_string(),
            types: vec![],
            field_mappings: vec![],
            schema_registry: None,
            protobuf_schema: None,
        }
    }

    #[test]
    fn lists_producer_and_consumer_only_datasets_separately() {
        let catalog = Catalog {
            id: None,
            producers: vec![producer("json-producer-ds")],
            consumers: vec![consumer("json-consumer-ds")],
        };

        let listing = list(&catalog);
        assert_eq!(
            listing,
            vec![
                DatasetListing {
                    name: "json-consumer-ds".to_string(),
                    verbs: vec!["GET"],
                },
                DatasetListing {
                    name: "json-producer-ds".to_string(),
                    verbs: vec!["POST"],
                },
            ]
        );
    }

    #[test]
    fn dataset_with_both_roles_lists_both_verbs() {
        let catalog = Catalog {
            id: None,
            producers: vec![producer("both-ds")],
            consumers: vec![consumer("both-ds")],
        };

        let listing = list(&catalog);
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].verbs, vec!["POST", "GET"]);
    }
}
