//! The persisted JSON document: entries plus server settings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::EntryKind;

/// One redirect mapping. The key (name or hostname) is the map key in [`Document`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entry {
    pub fn new(target: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            target: target.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Server settings stored alongside the entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(
        default = "default_port",
        serialize_with = "serialize_port",
        deserialize_with = "deserialize_port"
    )]
    pub port: u16,

    #[serde(default)]
    pub admin_token: String,

    #[serde(default)]
    pub redirect_token: String,

    #[serde(default)]
    pub domain_token: String,

    #[serde(default = "default_max_redirect_count")]
    pub max_redirect_count: usize,

    #[serde(default = "default_max_domain_count")]
    pub max_domain_count: usize,
}

fn default_port() -> u16 {
    8001
}

fn default_max_redirect_count() -> usize {
    20
}

fn default_max_domain_count() -> usize {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: default_port(),
            admin_token: String::new(),
            redirect_token: String::new(),
            domain_token: String::new(),
            max_redirect_count: default_max_redirect_count(),
            max_domain_count: default_max_domain_count(),
        }
    }
}

// Older documents store the port as a string; keep writing it that way.
fn serialize_port<S: serde::Serializer>(port: &u16, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&port.to_string())
}

fn deserialize_port<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawPort {
        Number(u16),
        Text(String),
    }

    match RawPort::deserialize(deserializer)? {
        RawPort::Number(port) => Ok(port),
        RawPort::Text(text) => text
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid port: {text:?}"))),
    }
}

/// Whole-file representation of the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub forwardings: BTreeMap<String, Entry>,

    #[serde(default)]
    pub domains: BTreeMap<String, Entry>,

    #[serde(default)]
    pub server: Settings,
}

impl Document {
    pub fn entries(&self, kind: EntryKind) -> &BTreeMap<String, Entry> {
        match kind {
            EntryKind::Path => &self.forwardings,
            EntryKind::Domain => &self.domains,
        }
    }

    pub fn entries_mut(&mut self, kind: EntryKind) -> &mut BTreeMap<String, Entry> {
        match kind {
            EntryKind::Path => &mut self.forwardings,
            EntryKind::Domain => &mut self.domains,
        }
    }

    pub fn capacity(&self, kind: EntryKind) -> usize {
        match kind {
            EntryKind::Path => self.server.max_redirect_count,
            EntryKind::Domain => self.server.max_domain_count,
        }
    }
}
