// ============================================================
// Layer 4 — Dataset Loader
// ============================================================
// Reads line datasets stored as JSON lines. Each line is one record:
//
//   {"features": [[0.1, 0.2, ...], ...], "text": "hello"}
//   {"features": [[...], ...], "label": [7, 4, 11, 11, 14]}
//   {"features": [[...], ...]}                       ← unlabelled
//
// `features` is the [time, num_features] matrix produced by the
// line-image preprocessing. A record is labelled either by a raw
// transcription (`text`, encoded through the charset) or directly by
// token ids (`label`). Blank lines are skipped.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::data::dataset::HtrSample;
use crate::domain::{
    charset::Charset,
    error::{CtcError, Result},
};

/// One raw line of a dataset file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HtrRecord {
    pub features: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text:     Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label:    Option<Vec<u32>>,
}

impl HtrRecord {
    /// Convert into a sample, encoding `text` when no explicit label is given.
    pub fn into_sample(self, charset: &Charset) -> Result<HtrSample> {
        let label = match (self.label, self.text) {
            (Some(label), _)   => label,
            (None, Some(text)) => charset.encode(&text)?,
            (None, None)       => Vec::new(),
        };
        HtrSample::new(self.features, label)
    }
}

pub struct JsonlLoader {
    path: PathBuf,
}

impl JsonlLoader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    /// Parse every record and check that all rows share one feature width.
    pub fn load_records(&self) -> Result<Vec<HtrRecord>> {
        let file    = File::open(&self.path)?;
        let reader  = BufReader::new(file);
        let mut records: Vec<HtrRecord> = Vec::new();
        let mut width: Option<usize>   = None;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let record: HtrRecord = serde_json::from_str(&line)?;

            for row in &record.features {
                match width {
                    None => width = Some(row.len()),
                    Some(w) if w != row.len() => {
                        return Err(CtcError::BatchShape(format!(
                            "{}:{}: feature row has {} values, expected {}",
                            self.path.display(), line_no + 1, row.len(), w
                        )));
                    }
                    Some(_) => {}
                }
            }
            records.push(record);
        }

        tracing::info!(
            "Loaded {} records from '{}'", records.len(), self.path.display()
        );
        Ok(records)
    }

    /// Load records and convert them into samples with the given charset.
    pub fn load_samples(&self, charset: &Charset) -> Result<Vec<HtrSample>> {
        self.load_records()?
            .into_iter()
            .map(|r| r.into_sample(charset))
            .collect()
    }
}

/// Distinct characters of every transcription in the records.
pub fn charset_from_records(records: &[HtrRecord]) -> Charset {
    Charset::from_texts(records.iter().filter_map(|r| r.text.as_deref()))
}
