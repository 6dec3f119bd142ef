use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Synthetic entity id for the namespace-declaration entity emitted first in every consumer
/// stream.
pub const CONTEXT_ID: &str = "@context";

/// Synthetic entity id for the cursor-carrying entity emitted last in a consumer stream.
pub const CONTINUATION_ID: &str = "@continuation";

/// The wire entity: an identifier, a deletion flag, properties, and references. Property and
/// reference keys carry their namespace prefix (`ns0:...`) already applied by the encoder.
///
/// The `@context` element is a structural outlier: it carries a `namespaces` table and drops
/// `deleted`/`props`/`refs` entirely (`GetContext` in `internal/kafka/consumer.go`), so
/// `Entity` gets a hand-written [`Serialize`] impl that branches on `namespaces` rather than
/// the derive.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Entity {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, rename = "props")]
    pub properties: Map<String, Value>,
    #[serde(default, rename = "refs")]
    pub references: Map<String, Value>,
    #[serde(skip)]
    pub namespaces: Option<Map<String, Value>>,
}

impl Entity {
    /// Creates a new, empty entity with no id — the shape produced when the encoder cannot parse
    /// its input.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds the `@context` entity declaring the `ns0` and `rdf` namespace prefixes.
    pub fn context(namespace_uri: &str) -> Self {
        let mut namespaces = Map::new();
        namespaces.insert("ns0".to_string(), Value::String(namespace_uri.to_string()));
        namespaces.insert(
            "rdf".to_string(),
            Value::String("http://www.w3.org/1999/02/22-rdf-syntax-ns#".to_string()),
        );

        Self {
            id: CONTEXT_ID.to_string(),
            namespaces: Some(namespaces),
            ..Self::default()
        }
    }

    /// Builds the `@continuation` entity carrying the resumption token.
    pub fn continuation(token: &str) -> Self {
        let mut properties = Map::new();
        properties.insert("token".to_string(), Value::String(token.to_string()));

        Self {
            id: CONTINUATION_ID.to_string(),
            properties,
            ..Self::default()
        }
    }

    /// Serializes the entity as a `serde_json::Value` in the wire shape (no internal-only
    /// fields leak through).
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).expect("entity serializes")
    }
}

impl Serialize for Entity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match &self.namespaces {
            Some(namespaces) => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("id", &self.id)?;
                map.serialize_entry("namespaces", namespaces)?;
                map.end()
            }
            None => {
                let mut map = serializer.serialize_map(Some(4))?;
                map.serialize_entry("id", &self.id)?;
                map.serialize_entry("deleted", &self.deleted)?;
                map.serialize_entry("props", &self.properties)?;
                map.serialize_entry("refs", &self.references)?;
                map.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_declares_namespaces() {
        let ctx = Entity::context("http://example.com/ns0/");
        assert_eq!(ctx.id, CONTEXT_ID);
        assert_eq!(
            ctx.namespaces.as_ref().unwrap().get("ns0").unwrap(),
            "http://example.com/ns0/"
        );
    }

    #[test]
    fn context_serializes_as_namespaces_not_props() {
        let json = Entity::context("http://example.com/ns0/").to_json();
        assert_eq!(json.get("id").unwrap(), CONTEXT_ID);
        assert_eq!(
            json.get("namespaces").unwrap().get("rdf").unwrap(),
            "http://www.w3.org/1999/02/22-rdf-syntax-ns#"
        );
        assert!(json.get("props").is_none());
        assert!(json.get("refs").is_none());
        assert!(json.get("deleted").is_none());
    }

    #[test]
    fn continuation_carries_token() {
        let cont = Entity::continuation("eyIwIjowfQ==");
        assert_eq!(cont.id, CONTINUATION_ID);
        assert_eq!(cont.properties.get("token").unwrap(), "eyIwIjowfQ==");
    }

    #[test]
    fn entity_round_trips_props_and_refs_wire_keys() {
        let input = serde_json::json!({
            "id": "ns0:howdy",
            "props": {"ns0:line": "How are all y'all doing!"}
        });
        let entity: Entity = serde_json::from_value(input).unwrap();
        assert_eq!(
            entity.properties.get("ns0:line").unwrap(),
            "How are all y'all doing!"
        );
        assert_eq!(
            entity.to_json().get("props").unwrap().get("ns0:line").unwrap(),
            "How are all y'all doing!"
        );
    }
}
