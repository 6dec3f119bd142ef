use crate::catalog::{ConsumerConfig, FieldMapping};
use crate::entity::Entity;
use serde_json::{Map, Value};
use serde_json_path::JsonPath;
use std::collections::HashMap;

/// Flattens a decoded JSON record (and, optionally, its broker headers) into an [`Entity`]
/// according to a consumer dataset's field mappings.
///
/// If `value` is not parseable JSON, an empty entity is returned rather than an error — a
/// malformed record is dropped from the change set, not treated as a fatal condition.
pub fn encode(
    key: Option<&[u8]>,
    value: &[u8],
    headers: &[(String, Vec<u8>)],
    config: &ConsumerConfig,
) -> Entity {
    let Ok(document) = serde_json::from_slice::<Value>(value) else {
        return Entity::empty();
    };

    let mappings_by_field: HashMap<&str, &FieldMapping> = config
        .field_mappings
        .iter()
        .map(|m| (m.field_name.as_str(), m))
        .collect();

    let mut entity = Entity::empty();
    let raw_key = key.map(|k| String::from_utf8_lossy(k).into_owned());

    if let Value::Object(top) = &document {
        for (k, v) in top {
            flatten("", k, v, &document, &mut entity, &mappings_by_field, config, raw_key.as_deref());
        }
    }

    if config.include_headers {
        for (name, value) in headers {
            let header_value = Value::String(String::from_utf8_lossy(value).into_owned());
            flatten(
                "kafka_header.",
                &name.to_lowercase(),
                &header_value,
                &document,
                &mut entity,
                &mappings_by_field,
                config,
                raw_key.as_deref(),
            );
        }
    }

    entity
}

#[allow(clippy::too_many_arguments)]
fn flatten(
    prefix: &str,
    k: &str,
    v: &Value,
    document: &Value,
    entity: &mut Entity,
    mappings: &HashMap<&str, &FieldMapping>,
    config: &ConsumerConfig,
    key: Option<&str>,
) {
    match v {
        Value::Object(obj) => {
            let next_prefix = format!("{prefix}{k}.");
            for (k2, v2) in obj {
                flatten(&next_prefix, k2, v2, document, entity, mappings, config, key);
            }
        }
        Value::Array(items) if !items.is_empty() && items.iter().all(|i| i.is_object()) => {
            for (idx, item) in items.iter().enumerate() {
                let next_prefix = format!("{prefix}{k}[{idx}].");
                if let Value::Object(obj) = item {
                    for (k2, v2) in obj {
                        flatten(&next_prefix, k2, v2, document, entity, mappings, config, key);
                    }
                }
            }
        }
        Value::Array(items) => {
            if items.is_empty() || !is_homogeneous_scalar(items) {
                return;
            }
            emit_leaf(prefix, k, v, document, entity, mappings, config, key);
        }
        _ => emit_leaf(prefix, k, v, document, entity, mappings, config, key),
    }
}

fn is_homogeneous_scalar(items: &[Value]) -> bool {
    let discriminant = |v: &Value| match v {
        Value::String(_) => Some(0),
        Value::Number(_) => Some(1),
        Value::Bool(_) => Some(2),
        _ => None,
    };

    let Some(first) = discriminant(&items[0]) else {
        return false;
    };

    items.iter().all(|v| discriminant(v) == Some(first))
}

#[allow(clippy::too_many_arguments)]
fn emit_leaf(
    prefix: &str,
    k: &str,
    v: &Value,
    document: &Value,
    entity: &mut Entity,
    mappings: &HashMap<&str, &FieldMapping>,
    config: &ConsumerConfig,
    key: Option<&str>,
) {
    let dotted_field_name = format!("ns0:{prefix}{k}");

    let Some(mapping) = mappings.get(k) else {
        entity.properties.insert(dotted_field_name, v.clone());
        return;
    };

    if mapping.ignore_field {
        return;
    }

    let prop_name = format!(
        "ns0:{}",
        mapping.property_name.as_deref().unwrap_or(&mapping.field_name)
    );

    let extracted = extract(document, &mapping.path, key);

    if mapping.is_id_field {
        if mapping.path == "kafkaKey" {
            entity.id = format!(
                "{}{}",
                config.base_name_space,
                apply_template(&config.entity_id_constructor, key.unwrap_or_default())
            );
        } else {
            entity.id = format!(
                "{}{}",
                config.base_name_space,
                apply_template(&config.entity_id_constructor, &printf_string(&extracted))
            );
            entity.properties.insert(dotted_field_name, v.clone());
        }
    } else if mapping.is_deleted_field {
        entity.deleted = extracted.as_bool().unwrap_or(false);
    } else if mapping.is_reference {
        if !extracted.is_null() {
            let template = mapping.reference_template.as_deref().unwrap_or("%v");
            entity.references.insert(
                prop_name,
                Value::String(apply_template(template, &printf_string(&extracted))),
            );
            entity.properties.insert(dotted_field_name, v.clone());
        }
    } else {
        entity.properties.insert(prop_name, extracted);
    }
}

/// Extracts the value named by a declarative field-mapping path. `kafkaKey` is a literal
/// sentinel meaning "the record's broker key", not a JSON path; every other path is evaluated as
/// a JSONPath expression against the decoded document (with a leading `$.` prefix applied).
fn extract(document: &Value, path: &str, key: Option<&str>) -> Value {
    if path == "kafkaKey" {
        return key.map(|k| Value::String(k.to_string())).unwrap_or(Value::Null);
    }

    let expr = if let Some(stripped) = path.strip_prefix('$') {
        stripped.to_string()
    } else {
        format!(".{path}")
    };

    let Ok(jsonpath) = JsonPath::parse(&format!("${expr}")) else {
        return Value::Null;
    };

    jsonpath
        .query(document)
        .first()
        .cloned()
        .unwrap_or(Value::Null)
}

/// Renders a JSON value the way Go's `fmt.Sprintf("%v", ...)` would for the scalar types this
/// system deals in: strings unquoted, numbers and bools via their natural textual form.
fn printf_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Substitutes the first `%v` occurrence in a printf-style template with `value`.
fn apply_template(template: &str, value: &str) -> String {
    match template.find("%v") {
        Some(idx) => format!("{}{}{}", &template[..idx], value, &template[idx + 2..]),
        None => template.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FieldMapping;

    fn base_config(mappings: Vec<FieldMapping>) -> ConsumerConfig {
        ConsumerConfig {
            dataset: "ds".into(),
            topic: "topic".into(),
            group_id: "group".into(),
            value_decoder: None,
            position: None,
            name_space: "ns".into(),
            base_name_space: "http://example.com/ns/".into(),
            include_headers: false,
            entity_id_constructor: "%v".into(),
            types: vec![],
            field_mappings: mappings,
            schema_registry: None,
            protobuf_schema: None,
        }
    }

    fn mapping(field_name: &str) -> FieldMapping {
        FieldMapping {
            path: format!("{field_name}"),
            field_name: field_name.to_string(),
            property_name: None,
            is_id_field: false,
            is_deleted_field: false,
            is_reference: false,
            reference_template: None,
            ignore_field: false,
        }
    }

    #[test]
    fn plain_field_without_mapping_is_dotted_property() {
        let config = base_config(vec![]);
        let entity = encode(None, br#"{"name":"hi"}"#, &[], &config);
        assert_eq!(entity.properties.get("ns0:name").unwrap(), "hi");
    }

    #[test]
    fn id_mapping_sets_id_and_keeps_raw_property() {
        let mut m = mapping("sku");
        m.is_id_field = true;
        let config = base_config(vec![m]);
        let entity = encode(None, br#"{"sku":"abc-1"}"#, &[], &config);
        assert_eq!(entity.id, "http://example.com/ns/abc-1");
        assert_eq!(entity.properties.get("ns0:sku").unwrap(), "abc-1");
    }

    #[test]
    fn kafka_key_id_mapping_uses_record_key_only() {
        let mut m = mapping("ignored");
        m.path = "kafkaKey".to_string();
        m.is_id_field = true;
        let config = base_config(vec![m]);
        let entity = encode(Some(b"record-key"), br#"{"ignored":"x"}"#, &[], &config);
        assert_eq!(entity.id, "http://example.com/ns/record-key");
        assert!(!entity.properties.contains_key("ns0:ignored"));
    }

    #[test]
    fn ignore_drops_field_entirely() {
        let mut m = mapping("secret");
        m.ignore_field = true;
        let config = base_config(vec![m]);
        let entity = encode(None, br#"{"secret":"x"}"#, &[], &config);
        assert!(!entity.properties.contains_key("ns0:secret"));
        assert!(!entity.properties.contains_key("secret"));
    }

    #[test]
    fn reference_mapping_emits_reference_and_raw_property() {
        let mut m = mapping("parent");
        m.is_reference = true;
        m.reference_template = Some("http://example.com/ns/%v".to_string());
        let config = base_config(vec![m]);
        let entity = encode(None, br#"{"parent":"parent-1"}"#, &[], &config);
        assert_eq!(
            entity.references.get("ns0:parent").unwrap(),
            "http://example.com/ns/parent-1"
        );
        assert_eq!(entity.properties.get("ns0:parent").unwrap(), "parent-1");
    }

    #[test]
    fn deleted_mapping_sets_flag() {
        let mut m = mapping("deleted");
        m.is_deleted_field = true;
        let config = base_config(vec![m]);
        let entity = encode(None, br#"{"deleted":true}"#, &[], &config);
        assert!(entity.deleted);
    }

    #[test]
    fn nested_object_flattens_dotted_path() {
        let config = base_config(vec![]);
        let entity = encode(None, br#"{"o1":{"o2":{"a":1}}}"#, &[], &config);
        assert_eq!(entity.properties.get("ns0:o1.o2.a").unwrap(), 1);
    }

    #[test]
    fn array_of_objects_flattens_with_bracket_index() {
        let config = base_config(vec![]);
        let entity = encode(None, br#"{"items":[{"a":1},{"a":2}]}"#, &[], &config);
        assert_eq!(entity.properties.get("ns0:items[0].a").unwrap(), 1);
        assert_eq!(entity.properties.get("ns0:items[1].a").unwrap(), 2);
    }

    #[test]
    fn homogeneous_scalar_array_is_kept() {
        let config = base_config(vec![]);
        let entity = encode(None, br#"{"tags":["a","b"]}"#, &[], &config);
        assert!(entity.properties.get("ns0:tags").unwrap().is_array());
    }

    #[test]
    fn heterogeneous_scalar_array_is_dropped() {
        let config = base_config(vec![]);
        let entity = encode(None, br#"{"mixed":["a",1]}"#, &[], &config);
        assert!(!entity.properties.contains_key("ns0:mixed"));
    }

    #[test]
    fn unparseable_json_yields_empty_entity() {
        let config = base_config(vec![]);
        let entity = encode(None, b"not json", &[], &config);
        assert_eq!(entity, Entity::empty());
    }

    #[test]
    fn headers_are_projected_under_prefix_when_enabled() {
        let mut config = base_config(vec![]);
        config.include_headers = true;
        let headers = vec![("Trace-Id".to_string(), b"abc".to_vec())];
        let entity = encode(None, br#"{}"#, &headers, &config);
        assert_eq!(
            entity.properties.get("ns0:kafka_header.trace-id").unwrap(),
            "abc"
        );
    }
}
