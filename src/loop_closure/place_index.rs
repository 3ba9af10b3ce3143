//! Place recognition index.
//!
//! The detector only depends on the [`PlaceIndex`] trait. The default
//! implementation is a bag-of-words database over a DBoW2-style vocabulary
//! tree with an inverted file and L1 scoring.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use tracing::info;

use crate::tracking::matching::{descriptor_distance, Descriptor};
use crate::types::FrameId;

/// Candidate frame and its similarity to the query.
pub type PlaceMatch = (FrameId, f64);

/// Opaque database of previously seen places.
pub trait PlaceIndex: Send {
    /// Adds the descriptors of frame `id`.
    fn add(&mut self, id: FrameId, descriptors: &[Descriptor]);

    /// Up to `max_results` stored frames ranked by decreasing similarity.
    /// May be empty.
    fn query(&self, descriptors: &[Descriptor], max_results: usize) -> Vec<PlaceMatch>;

    /// Similarity between the query and one stored frame, `None` if `id` is
    /// unknown.
    fn similarity(&self, descriptors: &[Descriptor], id: FrameId) -> Option<f64>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// word id -> L1-normalized weight.
pub type BowVector = HashMap<u32, f64>;

#[derive(Debug, Clone)]
struct VocabNode {
    parent: Option<usize>,
    children: Vec<usize>,
    descriptor: Descriptor,
    weight: f64,
    word_id: Option<u32>,
}

impl VocabNode {
    fn new(parent: Option<usize>, descriptor: Descriptor, weight: f64) -> Self {
        Self {
            parent,
            children: Vec::new(),
            descriptor,
            weight,
            word_id: None,
        }
    }
}

/// Hierarchical k-means vocabulary over binary descriptors.
#[derive(Debug, Clone)]
pub struct Vocabulary {
    nodes: Vec<VocabNode>,
    num_words: usize,
}

impl Vocabulary {
    /// Loads a DBoW2 text vocabulary:
    ///
    /// ```text
    /// k L scoring weighting
    /// parent_id is_leaf d0 .. d31 weight
    /// ```
    pub fn load_from_text<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("failed to open vocabulary {}", path.display()))?;
        let mut lines = BufReader::new(file).lines();

        let header = lines.next().context("empty vocabulary file")??;
        let header: Vec<&str> = header.split_whitespace().collect();
        ensure!(header.len() >= 2, "invalid vocabulary header, expected `k L [scoring weighting]`");
        let k: usize = header[0].parse().context("invalid branching factor")?;
        let l: usize = header[1].parse().context("invalid depth")?;

        let mut vocab = Self {
            nodes: vec![VocabNode::new(None, [0u8; 32], 0.0)],
            num_words: 0,
        };
        for (line_num, line) in lines.enumerate() {
            let line = line?;
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.is_empty() {
                continue;
            }
            if parts.len() < 35 {
                bail!("line {}: expected 35 fields, found {}", line_num + 2, parts.len());
            }
            let parent: usize = parts[0]
                .parse()
                .with_context(|| format!("line {}: invalid parent id", line_num + 2))?;
            ensure!(parent < vocab.nodes.len(), "line {}: unknown parent {}", line_num + 2, parent);
            let mut descriptor = [0u8; 32];
            for (byte, field) in descriptor.iter_mut().zip(&parts[2..34]) {
                *byte = field
                    .parse()
                    .with_context(|| format!("line {}: invalid descriptor byte", line_num + 2))?;
            }
            let weight: f64 = parts[34]
                .parse()
                .with_context(|| format!("line {}: invalid weight", line_num + 2))?;
            vocab.push_node(parent, descriptor, weight, parts[1] == "1");
        }

        info!(
            "Loaded vocabulary: k={}, L={}, {} nodes, {} words",
            k,
            l,
            vocab.nodes.len(),
            vocab.num_words
        );
        Ok(vocab)
    }

    /// Single-level vocabulary whose words are the given descriptors, all
    /// with unit weight.
    pub fn from_words(words: &[Descriptor]) -> Self {
        let mut vocab = Self {
            nodes: vec![VocabNode::new(None, [0u8; 32], 0.0)],
            num_words: 0,
        };
        for w in words {
            vocab.push_node(0, *w, 1.0, true);
        }
        vocab
    }

    fn push_node(&mut self, parent: usize, descriptor: Descriptor, weight: f64, is_leaf: bool) {
        let id = self.nodes.len();
        let mut node = VocabNode::new(Some(parent), descriptor, weight);
        if is_leaf {
            node.word_id = Some(self.num_words as u32);
            self.num_words += 1;
        }
        self.nodes[parent].children.push(id);
        self.nodes.push(node);
    }

    pub fn num_words(&self) -> usize {
        self.num_words
    }

    /// Descends to the closest leaf. Returns `(word_id, weight)`.
    fn quantize(&self, desc: &Descriptor) -> Option<(u32, f64)> {
        let mut node_id = 0;
        while let Some(&first) = self.nodes[node_id].children.first() {
            node_id = self.nodes[node_id]
                .children
                .iter()
                .copied()
                .min_by_key(|&c| descriptor_distance(desc, &self.nodes[c].descriptor))
                .unwrap_or(first);
        }
        let node = &self.nodes[node_id];
        node.word_id.map(|w| (w, node.weight))
    }

    pub fn transform(&self, descriptors: &[Descriptor]) -> BowVector {
        let mut bow = BowVector::new();
        for desc in descriptors {
            if let Some((word, weight)) = self.quantize(desc) {
                *bow.entry(word).or_insert(0.0) += weight;
            }
        }
        let sum: f64 = bow.values().sum();
        if sum > 0.0 {
            for v in bow.values_mut() {
                *v /= sum;
            }
        }
        bow
    }

    /// L1 score `1 - 0.5 |v1 - v2|₁` in `[0, 1]`.
    pub fn score(v1: &BowVector, v2: &BowVector) -> f64 {
        let mut diff = 0.0;
        for (word, w1) in v1 {
            diff += (w1 - v2.get(word).copied().unwrap_or(0.0)).abs();
        }
        for (word, w2) in v2 {
            if !v1.contains_key(word) {
                diff += w2.abs();
            }
        }
        1.0 - 0.5 * diff
    }
}

/// Bag-of-words database with an inverted file.
pub struct BowDatabase {
    vocabulary: Vocabulary,
    entries: HashMap<FrameId, BowVector>,
    inverted: HashMap<u32, Vec<FrameId>>,
}

impl BowDatabase {
    pub fn new(vocabulary: Vocabulary) -> Self {
        Self {
            vocabulary,
            entries: HashMap::new(),
            inverted: HashMap::new(),
        }
    }
}

impl PlaceIndex for BowDatabase {
    fn add(&mut self, id: FrameId, descriptors: &[Descriptor]) {
        let bow = self.vocabulary.transform(descriptors);
        for word in bow.keys() {
            self.inverted.entry(*word).or_default().push(id);
        }
        self.entries.insert(id, bow);
    }

    fn query(&self, descriptors: &[Descriptor], max_results: usize) -> Vec<PlaceMatch> {
        let query = self.vocabulary.transform(descriptors);

        // Only frames sharing at least one word can score above zero.
        let mut candidates: Vec<FrameId> = query
            .keys()
            .filter_map(|w| self.inverted.get(w))
            .flatten()
            .copied()
            .collect();
        candidates.sort_unstable();
        candidates.dedup();

        let mut results: Vec<PlaceMatch> = candidates
            .into_iter()
            .filter_map(|id| {
                let score = Vocabulary::score(&query, self.entries.get(&id)?);
                (score > 0.0).then_some((id, score))
            })
            .collect();
        results.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        results.truncate(max_results);
        results
    }

    fn similarity(&self, descriptors: &[Descriptor], id: FrameId) -> Option<f64> {
        let stored = self.entries.get(&id)?;
        Some(Vocabulary::score(&self.vocabulary.transform(descriptors), stored))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
