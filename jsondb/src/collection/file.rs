// Collection file I/O: { "id": "<uuid>", "items": [ {...}, ... ] }

use crate::document::Document;
use crate::error::{JsonDbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::ser::PrettyFormatter;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Parsed contents of a collection file. Items are raw so each one can be
/// normalized into a [`Document`] by the caller.
#[derive(Debug, Deserialize)]
pub struct CollectionFile {
    #[serde(alias = "_id")]
    pub id: String,
    #[serde(default, alias = "collection_data")]
    pub items: Vec<Value>,
}

#[derive(Serialize)]
struct CollectionFileRef<'a> {
    id: &'a str,
    items: Vec<&'a Document>,
}

/// Serialize a collection in document order.
pub fn encode<'a>(
    id: &str,
    documents: impl IntoIterator<Item = &'a Document>,
    indent: usize,
) -> Result<Vec<u8>> {
    let file = CollectionFileRef {
        id,
        items: documents.into_iter().collect(),
    };

    let mut out = Vec::new();
    if indent == 0 {
        serde_json::to_writer(&mut out, &file)?;
    } else {
        let spaces = vec![b' '; indent];
        let mut ser = serde_json::Serializer::with_formatter(&mut out, PrettyFormatter::with_indent(&spaces));
        file.serialize(&mut ser)?;
    }
    Ok(out)
}

pub fn decode(path: &Path, bytes: &[u8]) -> Result<CollectionFile> {
    serde_json::from_slice(bytes).map_err(|source| JsonDbError::MalformedFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Write `bytes` over the whole file. Not an atomic swap: a crash mid-write
/// can leave a truncated file behind.
pub fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn read(path: &Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}

/// Create an empty collection file with a fresh identifier.
pub fn create(path: &Path, id: &str, indent: usize) -> Result<()> {
    let bytes = encode(id, std::iter::empty(), indent)?;
    std::fs::write(path, bytes).map_err(|source| JsonDbError::Bootstrap {
        path: path.to_path_buf(),
        source,
    })
}

/// Hex SHA-256 of the file bytes.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
