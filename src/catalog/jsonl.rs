//! JSON-lines product catalog, e.g. the output of `mongoexport`.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use super::{ProductRecord, ProductSource, RecordError, RecordResult};

/// Reads one product per line from a JSONL file.
///
/// `_id` may be a plain string, a number, or extended JSON (`{"$oid": "..."}`).
#[derive(Debug, Clone)]
pub struct JsonlCatalog {
    path: PathBuf,
}

impl JsonlCatalog {
    /// Catalog backed by `path`; the file is opened on iteration.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProductSource for JsonlCatalog {
    fn products(&mut self) -> Result<Box<dyn Iterator<Item = RecordResult> + '_>> {
        let file = File::open(&self.path)
            .with_context(|| format!("failed to open catalog {:?}", self.path))?;
        let lines = BufReader::new(file)
            .lines()
            .enumerate()
            .filter_map(|(line_no, line)| match line {
                Ok(line) if line.trim().is_empty() => None,
                Ok(line) => Some(parse_line(&line, line_no + 1)),
                Err(err) => Some(Err(RecordError::new(
                    None,
                    anyhow!(err)
                        .context(format!("failed to read catalog line {}", line_no + 1)),
                ))),
            });
        Ok(Box::new(lines))
    }
}

#[derive(Deserialize)]
struct RawProduct {
    #[serde(rename = "_id")]
    id: RawId,
    #[serde(default)]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(i64),
    Oid {
        #[serde(rename = "$oid")]
        oid: String,
    },
}

impl RawId {
    fn into_string(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Number(n) => n.to_string(),
            Self::Oid { oid } => oid,
        }
    }
}

fn parse_line(line: &str, line_no: usize) -> RecordResult {
    let raw: RawProduct = serde_json::from_str(line).map_err(|err| {
        RecordError::new(
            None,
            anyhow!(err).context(format!("invalid product record at line {line_no}")),
        )
    })?;
    Ok(ProductRecord {
        id: raw.id.into_string(),
        images: raw.images.unwrap_or_default(),
    })
}
