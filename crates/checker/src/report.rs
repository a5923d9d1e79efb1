//! Incremental JSON report of a consistency run.
//!
//! The document has the shape
//! `{"tenant":..,"cache":[..],"cacheCount":n,"primary":[..],"primaryCount":n,"backup":[..],"backupCount":n}`.
//! Lines are serialized one at a time, so a run over millions of blobs never
//! holds the report in memory.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use stratum_storage::StorageError;

/// Audit record for one blob in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResultLine {
    pub id: String,
    pub filename: String,
    pub in_cache: bool,
    pub in_backup: bool,
    #[serde(rename = "primaryHashOK")]
    pub primary_hash_ok: bool,
    #[serde(rename = "backupHashOK")]
    pub backup_hash_ok: bool,
    pub has_error: bool,
    #[serde(default)]
    pub messages: Vec<String>,
}

impl CheckResultLine {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// Record a problem and flag the line as an error.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.has_error = true;
        self.messages.push(message.into());
    }
}

/// One pass of the report, in document order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Cache,
    Primary,
    Backup,
}

impl Section {
    fn key(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Primary => "primary",
            Self::Backup => "backup",
        }
    }
}

/// Streams a report document into an [`AsyncWrite`] sink.
///
/// Call [`open`](Self::open) and [`close`](Self::close) once per section,
/// with any number of [`write_line`](Self::write_line) calls in between,
/// then [`finish`](Self::finish).
pub struct ReportWriter<'a, W: ?Sized> {
    sink: &'a mut W,
    open: Option<(Section, usize)>,
}

impl<'a, W> ReportWriter<'a, W>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    /// Start the document for `tenant`.
    pub async fn begin(sink: &'a mut W, tenant: &str) -> Result<Self, StorageError> {
        let mut writer = Self { sink, open: None };
        writer.raw("{\"tenant\":").await?;
        writer.raw(&serde_json::to_string(tenant)?).await?;
        Ok(writer)
    }

    async fn raw(&mut self, text: &str) -> Result<(), StorageError> {
        self.sink.write_all(text.as_bytes()).await?;
        Ok(())
    }

    pub async fn open(&mut self, section: Section) -> Result<(), StorageError> {
        if self.open.is_some() {
            return Err(StorageError::InvalidInput(format!(
                "section {} opened inside another section",
                section.key()
            )));
        }
        self.raw(&format!(",\"{}\":[", section.key())).await?;
        self.open = Some((section, 0));
        Ok(())
    }

    pub async fn write_line(&mut self, line: &CheckResultLine) -> Result<(), StorageError> {
        let Some((_, count)) = self.open else {
            return Err(StorageError::InvalidInput("line written outside a section".into()));
        };
        let json = serde_json::to_string(line)?;
        if count > 0 {
            self.raw(",").await?;
        }
        self.raw(&json).await?;
        self.open = self.open.map(|(section, n)| (section, n + 1));
        Ok(())
    }

    /// Close the open section, emit its count and return it.
    pub async fn close(&mut self) -> Result<usize, StorageError> {
        let Some((section, count)) = self.open.take() else {
            return Err(StorageError::InvalidInput("no open section".into()));
        };
        self.raw(&format!("],\"{}Count\":{count}", section.key())).await?;
        Ok(count)
    }

    pub async fn finish(mut self) -> Result<(), StorageError> {
        if self.open.is_some() {
            self.close().await?;
        }
        self.raw("}").await?;
        self.sink.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[tokio::test]
    async fn writes_a_valid_document() {
        let mut out = Vec::new();
        let mut report = ReportWriter::begin(&mut out, "acme").await.unwrap();

        report.open(Section::Cache).await.unwrap();
        assert_eq!(report.close().await.unwrap(), 0);

        report.open(Section::Primary).await.unwrap();
        let mut ok = CheckResultLine::new("a");
        ok.primary_hash_ok = true;
        report.write_line(&ok).await.unwrap();
        let mut bad = CheckResultLine::new("b");
        bad.fail("primary: hash mismatch");
        report.write_line(&bad).await.unwrap();
        assert_eq!(report.close().await.unwrap(), 2);

        report.open(Section::Backup).await.unwrap();
        report.finish().await.unwrap();

        let doc: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(doc["tenant"], "acme");
        assert_eq!(doc["cacheCount"], 0);
        assert_eq!(doc["primaryCount"], 2);
        assert_eq!(doc["backupCount"], 0);
        assert_eq!(doc["primary"][0]["primaryHashOK"], true);
        assert_eq!(doc["primary"][1]["hasError"], true);
        assert_eq!(doc["primary"][1]["messages"][0], "primary: hash mismatch");
        assert_eq!(doc["primary"][0]["messages"], Value::Array(Vec::new()));
    }

    #[tokio::test]
    async fn lines_need_an_open_section() {
        let mut out = Vec::new();
        let mut report = ReportWriter::begin(&mut out, "acme").await.unwrap();
        let err = report.write_line(&CheckResultLine::new("x")).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
        report.open(Section::Cache).await.unwrap();
        assert!(report.open(Section::Primary).await.is_err());
    }

    #[test]
    fn line_ids_are_escaped() {
        let line = CheckResultLine::new("quote\"id");
        let json = serde_json::to_string(&line).unwrap();
        let back: CheckResultLine = serde_json::from_str(&json).unwrap();
        assert_eq!(back, line);
    }
}
