use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer};

/// One catalog entity (product, product group, or store) as the remote
/// server last reported it. The overlay reads only `id`; everything
/// else is passed through untouched for presentation.
#[derive(Clone, Debug, Deserialize)]
pub struct RemoteEntity {
    #[serde(deserialize_with = "entity_id_as_string")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

// Remote servers serialize entity ids as integers or strings depending
// on endpoint and version. Normalize to the string form, which is also
// what the compound-id derivation consumes.
fn entity_id_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "entity id must be a string or number, got {other}"
        ))),
    }
}

/// Decodes the JSON array an entity collection endpoint returns.
/// Fetching the snapshot is the network collaborator's concern.
pub fn parse_entity_snapshot(json: &str) -> Result<Vec<RemoteEntity>> {
    serde_json::from_str(json).map_err(|e| anyhow!("invalid entity snapshot: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_accepts_integer_and_string_ids() {
        let json = r#"[
            {"id": 12, "name": "Oat milk", "description": null, "active": true},
            {"id": "p-7", "name": "Coffee beans"}
        ]"#;

        let entities = parse_entity_snapshot(json).expect("parse snapshot");
        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].id, "12");
        assert_eq!(entities[0].name, "Oat milk");
        assert!(entities[0].active);
        assert_eq!(entities[1].id, "p-7");
        assert_eq!(entities[1].description, None);
        assert!(entities[1].active);
    }

    #[test]
    fn snapshot_rejects_non_scalar_ids() {
        let json = r#"[{"id": {"nested": 1}, "name": "bad"}]"#;
        assert!(parse_entity_snapshot(json).is_err());
    }
}
