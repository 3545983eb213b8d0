use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A reified tree of files and directories, used to load fixtures into
/// [`InMemoryFs`](crate::InMemoryFs).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum VfsSnapshot {
    File {
        #[serde(with = "serde_bytes_compat")]
        contents: Vec<u8>,
    },
    Dir {
        children: BTreeMap<String, VfsSnapshot>,
    },
}

impl VfsSnapshot {
    pub fn file<C: Into<Vec<u8>>>(contents: C) -> Self {
        Self::File {
            contents: contents.into(),
        }
    }

    pub fn dir<K: Into<String>, I: IntoIterator<Item = (K, VfsSnapshot)>>(children: I) -> Self {
        Self::Dir {
            children: children
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        }
    }

    pub fn empty_dir() -> Self {
        Self::Dir {
            children: BTreeMap::new(),
        }
    }
}

/// Serializes file contents as a UTF-8 string when possible, falling back to
/// a byte sequence otherwise.
mod serde_bytes_compat {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        match std::str::from_utf8(value) {
            Ok(text) => serializer.serialize_str(text),
            Err(_) => serializer.serialize_bytes(value),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Contents {
            Text(String),
            Bytes(Vec<u8>),
        }

        match Contents::deserialize(deserializer) {
            Ok(Contents::Text(text)) => Ok(text.into_bytes()),
            Ok(Contents::Bytes(bytes)) => Ok(bytes),
            Err(err) => Err(D::Error::custom(err)),
        }
    }
}
