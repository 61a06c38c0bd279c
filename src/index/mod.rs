pub mod embeddings;

pub use embeddings::{EmbeddingProvider, HashEmbedding, OpenAiEmbedding, create_embedding_provider};

use crate::error::IndexError;
use crate::mail::Email;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const SNIPPET_LIMIT: usize = 240;
const MANIFEST_FILE: &str = "meta.json";
const VECTORS_FILE: &str = "vectors.bin";

/// Metadata stored alongside each embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub mail_id: String,
    pub thread_id: String,
    #[serde(default)]
    pub subject: Option<String>,
    pub snippet: String,
}

/// One ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub record: VectorRecord,
    pub score: f32,
}

#[derive(Serialize, Deserialize)]
struct IndexManifest {
    dimensions: usize,
    records: Vec<VectorRecord>,
}

#[derive(Default)]
struct IndexState {
    records: Vec<VectorRecord>,
    embeddings: Vec<Vec<f32>>,
    known: HashSet<String>,
}

/// Append-only-by-identifier similarity index over emails.
///
/// Records and embeddings are parallel arrays: index `i` in one always
/// corresponds to index `i` in the other. All mutation goes through one
/// write-locked path, and the lock is never held across an `.await`, so
/// `add` is safe to call concurrently with `search`.
pub struct SemanticIndex {
    embedder: Arc<dyn EmbeddingProvider>,
    state: RwLock<IndexState>,
}

impl SemanticIndex {
    #[must_use]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            state: RwLock::new(IndexState::default()),
        }
    }

    /// Index every email whose identifier is not yet known; already-indexed
    /// identifiers are silently skipped. Returns how many records were added.
    pub async fn add(&self, emails: &[Email]) -> anyhow::Result<usize> {
        let mut pending: Vec<(VectorRecord, String)> = Vec::new();
        {
            let state = self.read_state();
            let mut batch_seen: HashSet<&str> = HashSet::new();
            for email in emails {
                if state.known.contains(&email.mail_id) || !batch_seen.insert(&email.mail_id) {
                    continue;
                }
                pending.push((record_for(email), email_to_text(email)));
            }
        }
        if pending.is_empty() {
            return Ok(0);
        }

        let texts: Vec<&str> = pending.iter().map(|(_, text)| text.as_str()).collect();
        let mut embeddings = self.embedder.embed(&texts).await?;
        anyhow::ensure!(
            embeddings.len() == pending.len(),
            "embedder returned {} vectors for {} texts",
            embeddings.len(),
            pending.len()
        );

        let expected = self.embedder.dimensions();
        for embedding in &mut embeddings {
            if expected != 0 && embedding.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    got: embedding.len(),
                }
                .into());
            }
            normalize(embedding);
        }

        let mut state = self.write_state();
        let mut added = 0;
        for ((record, _), embedding) in pending.into_iter().zip(embeddings) {
            // A racing add may have indexed the same id while we embedded.
            if !state.known.insert(record.mail_id.clone()) {
                continue;
            }
            state.records.push(record);
            state.embeddings.push(embedding);
            added += 1;
        }
        Ok(added)
    }

    /// Top-`limit` records by cosine similarity, descending. Blank queries
    /// and an empty index yield no results; `limit` is clamped to the index
    /// size.
    pub async fn search(&self, query: &str, limit: usize) -> anyhow::Result<Vec<SearchHit>> {
        let normalized_query = query.trim();
        if normalized_query.is_empty() || self.read_state().records.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_embedding = self.embedder.embed_one(normalized_query).await?;
        normalize(&mut query_embedding);

        let state = self.read_state();
        let mut scored: Vec<(usize, f32)> = state
            .embeddings
            .iter()
            .enumerate()
            .map(|(position, embedding)| (position, dot(embedding, &query_embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit.min(state.records.len()));

        Ok(scored
            .into_iter()
            .map(|(position, score)| SearchHit {
                record: state.records[position].clone(),
                score,
            })
            .collect())
    }

    /// Clear all state and re-index from scratch, for resynchronizing from
    /// the store of record.
    pub async fn rebuild(&self, emails: &[Email]) -> anyhow::Result<usize> {
        {
            let mut state = self.write_state();
            state.records.clear();
            state.embeddings.clear();
            state.known.clear();
        }
        self.add(emails).await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read_state().records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persist both artifacts (embeddings and metadata) together.
    pub fn save(&self, dir: &Path) -> anyhow::Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating index directory {}", dir.display()))?;

        let (manifest, vector_bytes) = {
            let state = self.read_state();
            let dimensions = state
                .embeddings
                .first()
                .map_or_else(|| self.embedder.dimensions(), Vec::len);

            let mut bytes =
                Vec::with_capacity(8 + state.embeddings.len() * dimensions * 4);
            bytes.extend_from_slice(&u32::try_from(dimensions)?.to_le_bytes());
            bytes.extend_from_slice(&u32::try_from(state.embeddings.len())?.to_le_bytes());
            for embedding in &state.embeddings {
                for value in embedding {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
            }

            (
                IndexManifest {
                    dimensions,
                    records: state.records.clone(),
                },
                bytes,
            )
        };

        std::fs::write(dir.join(VECTORS_FILE), vector_bytes)?;
        std::fs::write(
            dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?,
        )?;
        Ok(())
    }

    /// Reload a saved index. Both artifacts must be present; a missing one is
    /// an error, never a silent empty index.
    pub fn load(dir: &Path, embedder: Arc<dyn EmbeddingProvider>) -> anyhow::Result<Self> {
        let manifest_path = dir.join(MANIFEST_FILE);
        let vectors_path = dir.join(VECTORS_FILE);
        for path in [&manifest_path, &vectors_path] {
            if !path.exists() {
                return Err(IndexError::MissingArtifact(path.clone()).into());
            }
        }

        let manifest: IndexManifest =
            serde_json::from_str(&std::fs::read_to_string(&manifest_path)?)
                .with_context(|| format!("parsing {}", manifest_path.display()))?;
        let bytes = std::fs::read(&vectors_path)?;

        if bytes.len() < 8 {
            return Err(IndexError::Corrupt("vectors artifact truncated".into()).into());
        }
        let dimensions = u32::from_le_bytes(bytes[0..4].try_into()?) as usize;
        let count = u32::from_le_bytes(bytes[4..8].try_into()?) as usize;
        if dimensions != manifest.dimensions {
            return Err(IndexError::Corrupt(format!(
                "manifest says {} dimensions, vectors say {dimensions}",
                manifest.dimensions
            ))
            .into());
        }
        if count != manifest.records.len() {
            return Err(IndexError::Corrupt(format!(
                "{} metadata records but {count} stored vectors",
                manifest.records.len()
            ))
            .into());
        }
        if bytes.len() != 8 + dimensions * count * 4 {
            return Err(IndexError::Corrupt("vectors artifact length mismatch".into()).into());
        }
        if dimensions == 0 && count > 0 {
            return Err(IndexError::Corrupt("stored vectors have zero dimensions".into()).into());
        }

        let embeddings: Vec<Vec<f32>> = if count == 0 {
            Vec::new()
        } else {
            bytes[8..]
                .chunks_exact(dimensions * 4)
                .map(|chunk| {
                    chunk
                        .chunks_exact(4)
                        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                        .collect()
                })
                .collect()
        };
        let known = manifest
            .records
            .iter()
            .map(|record| record.mail_id.clone())
            .collect();

        Ok(Self {
            embedder,
            state: RwLock::new(IndexState {
                records: manifest.records,
                embeddings,
                known,
            }),
        })
    }

    // Lock poisoning is downgraded to the inner state; the parallel arrays
    // are only touched after both pushes succeed.
    fn read_state(&self) -> RwLockReadGuard<'_, IndexState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, IndexState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record_for(email: &Email) -> VectorRecord {
    VectorRecord {
        mail_id: email.mail_id.clone(),
        thread_id: email.thread_id.clone(),
        subject: email.subject.clone(),
        snippet: build_snippet(email, SNIPPET_LIMIT),
    }
}

/// Canonical rendering an embedding is computed from: subject, sender,
/// recipients, cc, body, in that fixed order, one per line.
pub(crate) fn email_to_text(email: &Email) -> String {
    let subject = email.subject.as_deref().unwrap_or("(no subject)");
    let sender = match &email.from_name {
        Some(name) => format!("{name} <{}>", email.from_email),
        None => email.from_email.clone(),
    };
    let to_part = if email.to.is_empty() {
        "(no recipients)".to_string()
    } else {
        email.to.join(", ")
    };
    let cc_part = if email.cc.is_empty() {
        "(no cc)".to_string()
    } else {
        email.cc.join(", ")
    };
    format!(
        "Subject: {subject}\nFrom: {sender}\nTo: {to_part}\nCc: {cc_part}\nBody:\n{}",
        email.body
    )
}

/// Body excerpt truncated at the last whitespace boundary before the limit.
fn build_snippet(email: &Email, limit: usize) -> String {
    let body: String = email.body.trim().replace("\r\n", " ").replace('\n', " ");
    if body.chars().count() <= limit {
        return body;
    }
    let truncated: String = body.chars().take(limit).collect();
    let base = match truncated.rfind(' ') {
        Some(position) if position > 0 => &truncated[..position],
        _ => truncated.as_str(),
    };
    format!("{base}...")
}

fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| f64::from(*x) * f64::from(*x)).sum::<f64>().sqrt();
    if norm < f64::EPSILON || !norm.is_finite() {
        return;
    }
    #[allow(clippy::cast_possible_truncation)]
    for value in v {
        *value = (f64::from(*value) / norm) as f32;
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashEmbedding::with_seed(32, 7))
    }

    fn email(mail_id: &str, body: &str) -> Email {
        Email {
            mail_id: mail_id.into(),
            external_id: None,
            thread_id: "t-1".into(),
            from_name: Some("Alex".into()),
            from_email: "alex@example.com".into(),
            to: vec!["sam@example.com".into()],
            cc: vec![],
            subject: Some(format!("About {mail_id}")),
            body: body.into(),
            received_at: Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn canonical_text_orders_fields() {
        let text = email_to_text(&email("m-1", "hello"));
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("Subject:"));
        assert!(lines[1].starts_with("From:"));
        assert!(lines[2].starts_with("To:"));
        assert!(lines[3].starts_with("Cc: (no cc)"));
        assert_eq!(lines[4], "Body:");
        assert_eq!(lines[5], "hello");
    }

    #[test]
    fn snippet_short_body_kept_whole() {
        let m = email("m-1", "short body");
        assert_eq!(build_snippet(&m, 240), "short body");
    }

    #[test]
    fn snippet_truncates_at_word_boundary() {
        let body = "word ".repeat(100);
        let snippet = build_snippet(&email("m-1", &body), 240);
        assert!(snippet.ends_with("..."));
        assert!(snippet.len() <= 243);
        assert!(!snippet.trim_end_matches("...").ends_with(' '));
    }

    #[test]
    fn snippet_flattens_newlines() {
        let snippet = build_snippet(&email("m-1", "line one\r\nline two\nline three"), 240);
        assert_eq!(snippet, "line one line two line three");
    }

    #[tokio::test]
    async fn add_is_idempotent_per_identifier() {
        let index = SemanticIndex::new(embedder());
        let m = email("m-1", "quarterly budget review");

        assert_eq!(index.add(std::slice::from_ref(&m)).await.unwrap(), 1);
        assert_eq!(index.add(std::slice::from_ref(&m)).await.unwrap(), 0);
        assert_eq!(index.len(), 1);

        let hits = index.search("budget", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.mail_id, "m-1");
    }

    #[tokio::test]
    async fn duplicate_ids_within_one_batch_collapse() {
        let index = SemanticIndex::new(embedder());
        let m = email("m-1", "same id twice");
        assert_eq!(index.add(&[m.clone(), m]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn blank_query_and_empty_index_return_nothing() {
        let index = SemanticIndex::new(embedder());
        assert!(index.search("anything", 5).await.unwrap().is_empty());

        index.add(&[email("m-1", "text")]).await.unwrap();
        assert!(index.search("   ", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn limit_is_clamped_to_index_size() {
        let index = SemanticIndex::new(embedder());
        index
            .add(&[email("m-1", "alpha"), email("m-2", "beta")])
            .await
            .unwrap();
        let hits = index.search("alpha", 50).await.unwrap();
        assert_eq!(hits.len(), 2);
    }

    #[tokio::test]
    async fn scores_rank_exact_content_first() {
        let index = SemanticIndex::new(embedder());
        let target = email("m-1", "unique phrase about llamas");
        index
            .add(&[target.clone(), email("m-2", "unrelated budget talk")])
            .await
            .unwrap();

        let hits = index.search(&email_to_text(&target), 2).await.unwrap();
        assert_eq!(hits[0].record.mail_id, "m-1");
        assert!(hits[0].score > hits[1].score);
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn rebuild_replaces_all_state() {
        let index = SemanticIndex::new(embedder());
        index.add(&[email("m-1", "old")]).await.unwrap();
        index.rebuild(&[email("m-2", "new")]).await.unwrap();

        assert_eq!(index.len(), 1);
        let hits = index.search("new", 5).await.unwrap();
        assert_eq!(hits[0].record.mail_id, "m-2");
    }

    #[tokio::test]
    async fn save_load_round_trip_preserves_ranking() {
        let tmp = TempDir::new().unwrap();
        let index = SemanticIndex::new(embedder());
        index
            .add(&[
                email("m-1", "llama care and feeding"),
                email("m-2", "quarterly budget numbers"),
                email("m-3", "meeting follow-up notes"),
            ])
            .await
            .unwrap();

        let before = index.search("budget numbers", 3).await.unwrap();
        index.save(tmp.path()).unwrap();

        let reloaded = SemanticIndex::load(tmp.path(), embedder()).unwrap();
        let after = reloaded.search("budget numbers", 3).await.unwrap();

        assert_eq!(before.len(), after.len());
        for (a, b) in before.iter().zip(after.iter()) {
            assert_eq!(a.record.mail_id, b.record.mail_id);
            assert!((a.score - b.score).abs() < 1e-6);
        }
    }

    #[tokio::test]
    async fn reloaded_index_stays_idempotent() {
        let tmp = TempDir::new().unwrap();
        let index = SemanticIndex::new(embedder());
        let m = email("m-1", "persisted once");
        index.add(std::slice::from_ref(&m)).await.unwrap();
        index.save(tmp.path()).unwrap();

        let reloaded = SemanticIndex::load(tmp.path(), embedder()).unwrap();
        assert_eq!(reloaded.add(&[m]).await.unwrap(), 0);
    }

    #[test]
    fn load_missing_artifact_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE), "{\"dimensions\":8,\"records\":[]}")
            .unwrap();

        let err = SemanticIndex::load(tmp.path(), embedder()).unwrap_err();
        assert!(err.to_string().contains(VECTORS_FILE));
    }

    #[test]
    fn load_empty_directory_is_an_error() {
        let tmp = TempDir::new().unwrap();
        assert!(SemanticIndex::load(tmp.path(), embedder()).is_err());
    }
}
