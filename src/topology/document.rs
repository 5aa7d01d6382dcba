//! The JSON topology document used by `save`, `restore`, `add` and `delete`.
//!
//! ```json
//! {
//! 	"Schema": [
//! 		{
//! 			"IP": "127.0.0.1:7000",
//! 			"Type": 0,
//! 			"Master": "",
//! 			"Slot": [[0, 8191]],
//! 			"Status": 1,
//! 			"Id": "07c37dfeb235213a872192d90877d0cd55635b91"
//! 		}
//! 	],
//! 	"Logfile": ""
//! }
//! ```
//!
//! Field names are matched case-insensitively on load for the common
//! spellings (`IP`/`ip`, `Type`/`type`, ...).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::client::types::{LinkStatus, NodeRole};
use crate::controller::error::{Error, Result};
use crate::slots::SlotRange;
use crate::topology::endpoint::Endpoint;
use crate::topology::model::{NodeRecord, TopologyTable};

/// One node entry in the document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    #[serde(rename = "IP", alias = "ip", alias = "Ip")]
    pub ip: String,
    #[serde(rename = "Type", alias = "type")]
    pub role: NodeRole,
    #[serde(rename = "Master", alias = "master", default, deserialize_with = "nullable")]
    pub master: String,
    #[serde(rename = "Slot", alias = "slot", default, deserialize_with = "nullable")]
    pub slot: Vec<SlotRange>,
    #[serde(rename = "Status", alias = "status", default)]
    pub status: LinkStatus,
    #[serde(rename = "Id", alias = "id", alias = "ID", default, deserialize_with = "nullable")]
    pub id: String,
}

/// A declared (or snapshotted) cluster topology.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyDocument {
    #[serde(rename = "Schema", alias = "schema", default, deserialize_with = "nullable")]
    pub schema: Vec<NodeDescriptor>,
    /// Log destination; empty for none.
    #[serde(rename = "Logfile", alias = "logfile", default, deserialize_with = "nullable")]
    pub logfile: String,
}

/// Treat JSON `null` like a missing field.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl TopologyDocument {
    /// Read a document from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| Error::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        let document = Self::from_json_str(&content).map_err(|e| match e {
            Error::Document { source, .. } => Error::Document {
                path: Some(path.to_path_buf()),
                source,
            },
            other => other,
        })?;
        debug!(path = %path.display(), nodes = document.schema.len(), "Loaded topology document");
        Ok(document)
    }

    /// Parse a document from JSON text.
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|source| Error::Document { path: None, source })
    }

    /// Render as tab-indented JSON with a trailing newline.
    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"\t");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)
            .map_err(|source| Error::Document { path: None, source })?;
        buf.push(b'\n');
        String::from_utf8(buf).map_err(|e| Error::Document {
            path: None,
            source: serde::ser::Error::custom(e),
        })
    }

    /// Write the document to any writer.
    pub fn write_to(&self, writer: &mut impl Write) -> Result<()> {
        let content = self.to_json_string()?;
        writer
            .write_all(content.as_bytes())
            .map_err(|source| Error::FileIo {
                path: PathBuf::from("<stdout>"),
                source,
            })
    }

    /// Write the document to a file, replacing its contents.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_json_string()?;
        fs::write(path, content).map_err(|source| Error::FileIo {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), nodes = self.schema.len(), "Saved topology document");
        Ok(())
    }

    /// Build a document from a table, entries ordered by address.
    pub fn from_table(table: &TopologyTable, logfile: impl Into<String>) -> Self {
        let schema = table
            .iter()
            .map(|node| NodeDescriptor {
                ip: node.address.clone(),
                role: node.role,
                master: node.master_address.clone().unwrap_or_default(),
                slot: node.slots.iter().copied().collect(),
                status: node.link,
                id: node.id.clone(),
            })
            .collect();

        Self {
            schema,
            logfile: logfile.into(),
        }
    }

    /// Validate and convert into a desired table.
    ///
    /// Addresses are canonicalized; an invalid `IP` or `Master` fails with
    /// [`Error::InvalidAddress`].
    pub fn to_table(&self) -> Result<TopologyTable> {
        let mut table = TopologyTable::new();

        for entry in &self.schema {
            let address = canonical(&entry.ip)?;
            let master_address = match entry.master.trim() {
                "" | "-" => None,
                master => Some(canonical(master)?),
            };

            let record = NodeRecord {
                id: entry.id.clone(),
                address: address.clone(),
                role: entry.role,
                master_address,
                slots: entry.slot.iter().copied().collect(),
                link: entry.status,
                pending: Default::default(),
            };

            if table.insert(record).is_some() {
                warn!(address = %address, "Duplicate node entry in document, keeping the last one");
            }
        }

        Ok(table)
    }
}

fn canonical(address: &str) -> Result<String> {
    Endpoint::parse(address.trim())
        .map(|e| e.to_string())
        .map_err(|_| Error::InvalidAddress(address.to_string()))
}
