//! Dump command implementation.

use super::{connect, ConnectOptions};
use kvclone_codec::UpdateRecord;
use serde::Serialize;

/// Record representation for output.
#[derive(Debug, Serialize)]
pub struct RecordInfo {
    /// Key.
    pub key: String,
    /// Sequence that last set the key.
    pub sequence: u64,
    /// Value, decoded as UTF-8 with replacement.
    pub value: String,
    /// Properties in wire order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<(String, String)>,
}

impl From<&UpdateRecord> for RecordInfo {
    fn from(record: &UpdateRecord) -> Self {
        Self {
            key: record.key.clone(),
            sequence: record.sequence,
            value: String::from_utf8_lossy(&record.body).into_owned(),
            properties: record
                .properties
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Runs the dump command.
pub async fn run(options: ConnectOptions, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = connect(options).await?;
    let entries = client.entries().await;
    let cursor = client.status().cursor;
    client.shutdown().await;

    let records: Vec<RecordInfo> = entries?.iter().map(RecordInfo::from).collect();
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        _ => {
            print!("{}", format_text(&records, cursor));
        }
    }

    Ok(())
}

fn format_text(records: &[RecordInfo], cursor: u64) -> String {
    let mut out = String::new();
    for record in records {
        out.push_str(&format!("{} = {} (seq {}", record.key, record.value, record.sequence));
        for (name, value) in &record.properties {
            out.push_str(&format!(", {}={}", name, value));
        }
        out.push_str(")\n");
    }
    out.push_str(&format!("{} keys at sequence {}\n", records.len(), cursor));
    out
}
