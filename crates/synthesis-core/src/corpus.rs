//! Read-only metadata index over a corpus snapshot.
//!
//! Built once per detection run from the current version of every document
//! (plus the version under detection) and shared by all engines. Nothing in
//! the index is mutable after construction, so engines can read it from any
//! number of threads without locking.
//!
//! Tag lists are normalized once here, so engines comparing tag sets pay for
//! set construction per chunk rather than per pair.

use std::collections::{BTreeSet, HashMap};

use crate::models::{ChunkMetadata, ChunkRecord};
use crate::similarity::tag_set;

/// Normalized tag sets of one chunk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkTags {
    pub themes: BTreeSet<String>,
    pub structural_patterns: BTreeSet<String>,
    pub emotional_tones: BTreeSet<String>,
}

impl ChunkTags {
    pub fn from_metadata(metadata: &ChunkMetadata) -> Self {
        Self {
            themes: tag_set(&metadata.themes),
            structural_patterns: tag_set(&metadata.structural_patterns),
            emotional_tones: tag_set(&metadata.emotional_tones),
        }
    }
}

#[derive(Debug, Default)]
pub struct CorpusIndex {
    chunks: Vec<ChunkRecord>,
    tags: Vec<ChunkTags>,
    by_id: HashMap<String, usize>,
}

impl CorpusIndex {
    /// Build an index. When a chunk id appears twice the later record wins.
    ///
    /// Chunk ids are unique across documents (the stores reject an import
    /// that reuses another document's id), so a repeat can only be a newer
    /// version of the same document's chunk.
    pub fn new(records: Vec<ChunkRecord>) -> Self {
        let mut chunks: Vec<ChunkRecord> = Vec::with_capacity(records.len());
        let mut tags: Vec<ChunkTags> = Vec::with_capacity(records.len());
        let mut by_id: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for record in records {
            let record_tags = ChunkTags::from_metadata(&record.metadata);
            match by_id.get(&record.chunk_id) {
                Some(&idx) => {
                    chunks[idx] = record;
                    tags[idx] = record_tags;
                }
                None => {
                    by_id.insert(record.chunk_id.clone(), chunks.len());
                    chunks.push(record);
                    tags.push(record_tags);
                }
            }
        }
        Self {
            chunks,
            tags,
            by_id,
        }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord> {
        self.chunks.iter()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&ChunkRecord> {
        self.by_id.get(chunk_id).map(|&i| &self.chunks[i])
    }

    /// Tag sets for `chunk`: the indexed ones when `chunk` is the indexed
    /// record, otherwise computed from its own metadata.
    pub fn tags_for(&self, chunk: &ChunkRecord) -> ChunkTags {
        match self.by_id.get(&chunk.chunk_id) {
            Some(&i) if self.chunks[i] == *chunk => self.tags[i].clone(),
            _ => ChunkTags::from_metadata(&chunk.metadata),
        }
    }

    /// Every chunk except `source` itself.
    pub fn others<'a>(&'a self, source: &'a ChunkRecord) -> impl Iterator<Item = &'a ChunkRecord> {
        self.others_tagged(source).map(|(chunk, _)| chunk)
    }

    /// [`others`](Self::others) paired with each chunk's normalized tags.
    pub fn others_tagged<'a>(
        &'a self,
        source: &'a ChunkRecord,
    ) -> impl Iterator<Item = (&'a ChunkRecord, &'a ChunkTags)> {
        self.entries()
            .filter(move |(c, _)| c.chunk_id != source.chunk_id)
    }

    /// Chunks belonging to documents other than `source`'s.
    pub fn cross_document<'a>(
        &'a self,
        source: &'a ChunkRecord,
    ) -> impl Iterator<Item = &'a ChunkRecord> {
        self.cross_document_tagged(source).map(|(chunk, _)| chunk)
    }

    /// [`cross_document`](Self::cross_document) paired with each chunk's
    /// normalized tags.
    pub fn cross_document_tagged<'a>(
        &'a self,
        source: &'a ChunkRecord,
    ) -> impl Iterator<Item = (&'a ChunkRecord, &'a ChunkTags)> {
        self.entries()
            .filter(move |(c, _)| c.document_id != source.document_id)
    }

    fn entries(&self) -> impl Iterator<Item = (&ChunkRecord, &ChunkTags)> {
        self.chunks.iter().zip(self.tags.iter())
    }
}
