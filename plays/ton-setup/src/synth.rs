//! JSON documents of an instance.
//!
//! Every document is read whole, amended at one or two keys and written back
//! whole. Keys that are not targeted are left exactly as they were read.

use std::{net::Ipv4Addr, path::Path};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::{
    descriptor::{KeySet, Mode},
    error::{DocumentError, Result, SetupError},
    net::ipv4_to_config_int,
};

pub type Document = Map<String, Value>;

/// Rights granted to the console client: the full control bitmask.
pub const CONTROL_PERMISSIONS: u32 = 15;

/// How an entry lands under its key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Merge {
    /// Push onto the array at the key; a missing or non-array value becomes
    /// a one element array.
    Append,
    /// The key holds exactly this one entry afterwards.
    Set,
}

pub async fn read_document(path: &Path) -> Result<Document> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| SetupError::document(path, e))?;
    match serde_json::from_slice::<Value>(&raw).map_err(|e| SetupError::document(path, e))? {
        Value::Object(map) => Ok(map),
        _ => Err(SetupError::document(path, DocumentError::NotAnObject)),
    }
}

/// Pretty print with four space indentation.
pub fn render_document<T: Serialize + ?Sized>(doc: &T) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    doc.serialize(&mut ser)?;
    Ok(buf)
}

pub async fn write_document<T: Serialize + ?Sized>(path: &Path, doc: &T) -> Result<()> {
    let bytes = render_document(doc).map_err(|e| SetupError::document(path, e))?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| SetupError::document(path, e))
}

pub fn merge_entry(doc: &mut Document, key: &str, entry: Value, merge: Merge) {
    match merge {
        Merge::Set => {
            doc.insert(key.to_string(), Value::Array(vec![entry]));
        }
        Merge::Append => match doc.get_mut(key) {
            Some(Value::Array(items)) => items.push(entry),
            _ => {
                doc.insert(key.to_string(), Value::Array(vec![entry]));
            }
        },
    }
}

pub fn liteserver_entry(keys: &KeySet, ls_port: u16) -> Value {
    json!({
        "@type": "engine.liteServer",
        "id": keys.liteserver.public_id_hash,
        "port": ls_port,
    })
}

pub fn control_entry(keys: &KeySet, console_port: u16) -> Value {
    json!({
        "@type": "engine.controlInterface",
        "id": keys.server.public_id_hash,
        "port": console_port,
        "allowed": [
            {
                "@type": "engine.controlProcess",
                "id": keys.client.public_id_hash,
                "permissions": CONTROL_PERMISSIONS,
            }
        ],
    })
}

/// Expose the liteserver and the control interface in the engine's config.
pub fn bind_node_endpoints(doc: &mut Document, keys: &KeySet, ls_port: u16, console_port: u16) {
    merge_entry(doc, "liteservers", liteserver_entry(keys, ls_port), Merge::Append);
    merge_entry(doc, "control", control_entry(keys, console_port), Merge::Set);
}

/// How lite clients reach this node.
pub fn node_snippet(address: Ipv4Addr, ls_port: u16, keys: &KeySet) -> Value {
    json!({
        "ip": ipv4_to_config_int(address),
        "port": ls_port,
        "id": {
            "@type": "pub.ed25519",
            "key": keys.liteserver.public_key_base64,
        },
    })
}

/// Unsigned address list of a DHT server; `generate-random-id -m dht` turns
/// it into a signed node record.
pub fn dht_address_list(address: Ipv4Addr, service_port: u16) -> Value {
    json!({
        "@type": "adnl.addressList",
        "addrs": [
            {
                "@type": "adnl.address.udp",
                "ip": ipv4_to_config_int(address),
                "port": service_port,
            }
        ],
        "version": 0,
        "reinit_date": 0,
        "priority": 0,
        "expire_at": 0,
    })
}

/// The global config with this instance's snippet added under the key its
/// mode publishes to.
pub fn local_config(mut global: Document, mode: Mode, snippet: Value) -> Document {
    let merge = match mode {
        Mode::Node => Merge::Append,
        Mode::Dht => Merge::Set,
    };
    merge_entry(&mut global, mode.snippet_key(), snippet, merge);
    global
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::KeyMaterial;

    fn keys() -> KeySet {
        let km = |id: &str| KeyMaterial {
            short_id: format!("{id}-short"),
            public_id_hash: format!("{id}-hash"),
            public_key_base64: format!("{id}-b64"),
        };
        KeySet {
            server: km("server"),
            client: km("client"),
            liteserver: km("ls"),
        }
    }

    fn doc(raw: &str) -> Document {
        match serde_json::from_str(raw).unwrap() {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn node_binding_leaves_unrelated_keys_untouched() {
        let original = doc(
            r#"{"@type": "engine.validator.config", "out_port": 3278,
                "addrs": [{"ip": 1, "port": 2}], "adnl": [{"id": "x", "category": 0}],
                "dht": [{"id": "d"}], "liteservers": [], "validators": []}"#,
        );
        let mut amended = original.clone();
        bind_node_endpoints(&mut amended, &keys(), 41001, 41002);

        for (key, value) in &original {
            if key == "liteservers" {
                continue;
            }
            assert_eq!(
                serde_json::to_string(&amended[key]).unwrap(),
                serde_json::to_string(value).unwrap(),
                "key {key} changed"
            );
        }
        assert_eq!(amended.len(), original.len() + 1);
        let keys: Vec<&String> = amended.keys().collect();
        assert_eq!(keys.last().unwrap().as_str(), "control");
    }

    #[test]
    fn node_binding_shapes() {
        let mut amended = doc(r#"{"liteservers": [{"id": "existing"}]}"#);
        bind_node_endpoints(&mut amended, &keys(), 41001, 41002);

        let ls = amended["liteservers"].as_array().unwrap();
        assert_eq!(ls.len(), 2);
        assert_eq!(ls[0]["id"], "existing");
        assert_eq!(ls[1]["@type"], "engine.liteServer");
        assert_eq!(ls[1]["id"], "ls-hash");
        assert_eq!(ls[1]["port"], 41001);

        let control = &amended["control"][0];
        assert_eq!(control["@type"], "engine.controlInterface");
        assert_eq!(control["id"], "server-hash");
        assert_eq!(control["port"], 41002);
        assert_eq!(control["allowed"][0]["@type"], "engine.controlProcess");
        assert_eq!(control["allowed"][0]["id"], "client-hash");
        assert_eq!(control["allowed"][0]["permissions"], 15);
    }

    #[test]
    fn control_is_replaced_not_appended() {
        let mut amended = doc(r#"{"control": [{"id": "stale"}, {"id": "stale2"}]}"#);
        bind_node_endpoints(&mut amended, &keys(), 1, 2);
        assert_eq!(amended["control"].as_array().unwrap().len(), 1);
        assert_eq!(amended["control"][0]["id"], "server-hash");
    }

    #[test]
    fn node_snippet_encodes_address_as_signed_int() {
        let snip = node_snippet(Ipv4Addr::LOCALHOST, 41001, &keys());
        assert_eq!(snip["ip"], 2130706433);
        assert_eq!(snip["port"], 41001);
        assert_eq!(snip["id"]["@type"], "pub.ed25519");
        assert_eq!(snip["id"]["key"], "ls-b64");
    }

    #[test]
    fn dht_local_config_replaces_dht_and_keeps_the_rest() {
        let global = doc(
            r#"{"@type": "config.global",
                "dht": {"@type": "dht.config.global", "k": 6, "a": 3},
                "liteservers": [{"ip": 1, "port": 2}],
                "validator": {"zero_state": {"workchain": -1}}}"#,
        );
        let record = json!({"@type": "dht.node", "signature": "sig"});
        let local = local_config(global.clone(), Mode::Dht, record.clone());

        assert_eq!(local["dht"], json!([record]));
        assert_eq!(local["liteservers"], global["liteservers"]);
        assert_eq!(local["validator"], global["validator"]);
        assert_eq!(local["@type"], global["@type"]);
    }

    #[test]
    fn node_local_config_appends_liteserver() {
        let global = doc(r#"{"liteservers": [{"ip": 1, "port": 2}], "dht": {"k": 6}}"#);
        let snip = node_snippet(Ipv4Addr::new(1, 2, 3, 4), 5, &keys());
        let local = local_config(global, Mode::Node, snip.clone());
        let ls = local["liteservers"].as_array().unwrap();
        assert_eq!(ls.len(), 2);
        assert_eq!(ls[1], snip);
        assert_eq!(local["dht"]["k"], 6);
    }

    #[test]
    fn dht_record_template() {
        let record = dht_address_list(Ipv4Addr::new(10, 0, 0, 1), 30310);
        assert_eq!(record["@type"], "adnl.addressList");
        assert_eq!(record["addrs"][0]["@type"], "adnl.address.udp");
        assert_eq!(record["addrs"][0]["ip"], 167772161);
        assert_eq!(record["addrs"][0]["port"], 30310);
        assert_eq!(record["expire_at"], 0);
    }

    #[test]
    fn rendering_uses_four_space_indent() {
        let text = String::from_utf8(render_document(&json!({"a": [1]})).unwrap()).unwrap();
        assert_eq!(text, "{\n    \"a\": [\n        1\n    ]\n}");
    }

    #[tokio::test]
    async fn non_object_documents_are_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[1, 2]").unwrap();
        let err = read_document(tmp.path()).await.unwrap_err();
        assert!(matches!(
            err,
            SetupError::Document {
                source: DocumentError::NotAnObject,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_document_is_fatal() {
        let err = read_document(Path::new("/nonexistent/config.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SetupError::Document { .. }));
    }
}
