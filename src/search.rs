//! In-memory inverted index over the content store.
//!
//! A [`SearchIndex`] is built once per reindex run from every stored item and
//! then shared read-only behind an `Arc`. Scoring is keyword based:
//!
//! ```text
//! raw   = coverage · Σ idf(t) · (tf_body'(t) + title_boost · tf_title'(t))
//! score = base · recency · usage · boost
//! ```
//!
//! where `base` is `raw`, or `(1 - α) · norm(raw) + α · similarity` when a
//! [`SimilaritySignal`] is plugged in. Exact term matching runs first; fuzzy
//! matching (bounded edit distance) only runs when exact matching finds
//! nothing, so an exact hit always outranks a fuzzy one.

use std::collections::{BTreeMap, HashMap};

use crate::config::RetrievalConfig;
use crate::models::{IndexedItem, ItemKind, MatchKind, SearchHit, UsageStats};
use crate::tokenize::{query_terms, token_spans, tokenize};

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;
const FUZZY_MIN_TERM_CHARS: usize = 4;
const FUZZY_PENALTY: f64 = 0.5;
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Optional relevance signal mixed into keyword scores.
///
/// Implementations return a similarity in `[0, 1]` between a query and an
/// item, or `None` when they have no opinion about that item.
pub trait SimilaritySignal: Send + Sync {
    fn similarity(&self, query: &str, item: &IndexedItem) -> Option<f64>;
}

/// Filters and bounds for one query.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub kind: Option<ItemKind>,
    pub path_prefix: Option<String>,
    /// Lowercased file extension, e.g. `md`.
    pub doc_type: Option<String>,
    pub limit: usize,
}

impl SearchOptions {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }

    pub fn kind(mut self, kind: ItemKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

/// Everything outside the index that influences ranking.
#[derive(Clone, Copy)]
pub struct Ranking<'a> {
    pub retrieval: &'a RetrievalConfig,
    pub usage: Option<&'a HashMap<String, UsageStats>>,
    pub similarity: Option<&'a dyn SimilaritySignal>,
}

impl<'a> Ranking<'a> {
    pub fn new(retrieval: &'a RetrievalConfig) -> Self {
        Self {
            retrieval,
            usage: None,
            similarity: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Posting {
    item: usize,
    body_tf: u32,
    title_tf: u32,
}

pub struct SearchIndex {
    items: Vec<IndexedItem>,
    by_id: HashMap<String, usize>,
    /// Term → postings sorted by item index.
    postings: BTreeMap<String, Vec<Posting>>,
    body_len: Vec<u32>,
    avg_body_len: f64,
    newest_indexed_at: i64,
}

impl SearchIndex {
    pub fn empty() -> Self {
        Self::build(Vec::new())
    }

    pub fn build(mut items: Vec<IndexedItem>) -> Self {
        items.sort_by(|a, b| a.path.cmp(&b.path).then_with(|| a.id.cmp(&b.id)));

        let mut postings: BTreeMap<String, Vec<Posting>> = BTreeMap::new();
        let mut body_len = Vec::with_capacity(items.len());
        let mut by_id = HashMap::with_capacity(items.len());

        for (idx, item) in items.iter().enumerate() {
            by_id.insert(item.id.clone(), idx);

            let mut counts: HashMap<String, (u32, u32)> = HashMap::new();
            let body_terms = tokenize(&item.content);
            body_len.push(body_terms.len() as u32);
            for term in body_terms {
                counts.entry(term).or_default().0 += 1;
            }
            for term in tokenize(&item.title) {
                counts.entry(term).or_default().1 += 1;
            }

            for (term, (body_tf, title_tf)) in counts {
                postings.entry(term).or_default().push(Posting {
                    item: idx,
                    body_tf,
                    title_tf,
                });
            }
        }

        let avg_body_len = if body_len.is_empty() {
            0.0
        } else {
            body_len.iter().map(|l| *l as f64).sum::<f64>() / body_len.len() as f64
        };
        let newest_indexed_at = items.iter().map(|i| i.indexed_at).max().unwrap_or(0);

        Self {
            items,
            by_id,
            postings,
            body_len,
            avg_body_len,
            newest_indexed_at,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&IndexedItem> {
        self.by_id.get(id).map(|idx| &self.items[*idx])
    }

    /// All items, ordered by path then id.
    pub fn items(&self) -> &[IndexedItem] {
        &self.items
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    /// True when the item's title or content contains every given term.
    pub fn item_has_terms(&self, id: &str, terms: &[String]) -> bool {
        let Some(&idx) = self.by_id.get(id) else {
            return false;
        };
        !terms.is_empty()
            && terms.iter().all(|term| {
                self.postings
                    .get(term)
                    .map(|p| p.binary_search_by_key(&idx, |p| p.item).is_ok())
                    .unwrap_or(false)
            })
    }

    pub fn search(&self, query: &str, opts: &SearchOptions, ranking: &Ranking<'_>) -> Vec<SearchHit> {
        self.search_boosted(query, opts, ranking, &|_| 1.0)
    }

    /// Search with an extra per-item multiplier applied before truncation.
    pub fn search_boosted(
        &self,
        query: &str,
        opts: &SearchOptions,
        ranking: &Ranking<'_>,
        boost: &dyn Fn(&IndexedItem) -> f64,
    ) -> Vec<SearchHit> {
        let cfg = ranking.retrieval;
        if opts.limit == 0 || query.trim().chars().count() < cfg.min_query_chars.max(1) {
            return Vec::new();
        }
        let terms = query_terms(query);

        let mut match_kind = MatchKind::Exact;
        let mut scored = self.score_terms(&terms, opts, cfg, false);
        if scored.is_empty() && cfg.fuzzy_max_distance > 0 {
            scored = self.score_terms(&terms, opts, cfg, true);
            match_kind = MatchKind::Fuzzy;
        }

        if let Some(signal) = ranking.similarity {
            scored = self.mix_similarity(query, scored, opts, cfg.semantic_weight, signal);
        }

        let mut hits: Vec<(f64, usize, Vec<String>)> = scored
            .into_iter()
            .map(|(idx, base, matched)| {
                let item = &self.items[idx];
                let score = base
                    * self.recency_factor(item, cfg)
                    * usage_factor(ranking.usage, &item.id, cfg.usage_weight)
                    * boost(item);
                (score, idx, matched)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| self.items[a.1].path.cmp(&self.items[b.1].path))
                .then_with(|| self.items[a.1].id.cmp(&self.items[b.1].id))
        });
        hits.truncate(opts.limit);

        hits.into_iter()
            .map(|(score, idx, matched)| self.to_hit(idx, score, match_kind, &matched, cfg))
            .collect()
    }

    fn passes(&self, idx: usize, opts: &SearchOptions) -> bool {
        let item = &self.items[idx];
        if let Some(kind) = opts.kind {
            if item.kind != kind {
                return false;
            }
        }
        if let Some(prefix) = &opts.path_prefix {
            if !item.path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(doc_type) = &opts.doc_type {
            if !item.doc_type().eq_ignore_ascii_case(doc_type.trim_start_matches('.')) {
                return false;
            }
        }
        true
    }

    /// Vocabulary terms standing in for `term`, with their score multiplier.
    fn expansions(&self, term: &str, fuzzy: bool, max_distance: usize) -> Vec<(&str, f64)> {
        if !fuzzy {
            return self
                .postings
                .get_key_value(term)
                .map(|(k, _)| vec![(k.as_str(), 1.0)])
                .unwrap_or_default();
        }

        let len = term.chars().count();
        if len < FUZZY_MIN_TERM_CHARS {
            return Vec::new();
        }
        self.postings
            .keys()
            .filter(|candidate| candidate.chars().count().abs_diff(len) <= max_distance)
            .filter(|candidate| {
                let distance = levenshtein::levenshtein(term, candidate);
                distance > 0 && distance <= max_distance
            })
            .map(|candidate| (candidate.as_str(), FUZZY_PENALTY))
            .collect()
    }

    /// Raw keyword score per matching item, with the vocabulary terms that hit.
    fn score_terms(
        &self,
        terms: &[String],
        opts: &SearchOptions,
        cfg: &RetrievalConfig,
        fuzzy: bool,
    ) -> Vec<(usize, f64, Vec<String>)> {
        if terms.is_empty() {
            return Vec::new();
        }
        let n = self.items.len() as f64;

        // item -> (best contribution per query term, matched vocabulary terms)
        let mut acc: BTreeMap<usize, (Vec<f64>, Vec<String>)> = BTreeMap::new();

        for (qi, term) in terms.iter().enumerate() {
            for (vocab, penalty) in self.expansions(term, fuzzy, cfg.fuzzy_max_distance) {
                let Some(list) = self.postings.get(vocab) else {
                    continue;
                };
                let df = list.len() as f64;
                let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();

                for posting in list {
                    if !self.passes(posting.item, opts) {
                        continue;
                    }
                    let contribution = idf
                        * (self.body_tf_weight(posting)
                            + cfg.title_boost * title_tf_weight(posting.title_tf))
                        * penalty;

                    let entry = acc
                        .entry(posting.item)
                        .or_insert_with(|| (vec![0.0; terms.len()], Vec::new()));
                    if contribution > entry.0[qi] {
                        entry.0[qi] = contribution;
                    }
                    if !entry.1.iter().any(|m| m == vocab) {
                        entry.1.push(vocab.to_string());
                    }
                }
            }
        }

        acc.into_iter()
            .map(|(idx, (per_term, matched))| {
                let covered = per_term.iter().filter(|c| **c > 0.0).count() as f64;
                let coverage = covered / terms.len() as f64;
                (idx, per_term.iter().sum::<f64>() * coverage, matched)
            })
            .filter(|(_, score, _)| *score > 0.0)
            .collect()
    }

    fn body_tf_weight(&self, posting: &Posting) -> f64 {
        if posting.body_tf == 0 {
            return 0.0;
        }
        let tf = posting.body_tf as f64;
        let len_ratio = if self.avg_body_len > 0.0 {
            self.body_len[posting.item] as f64 / self.avg_body_len
        } else {
            1.0
        };
        tf / (tf + BM25_K1 * (1.0 - BM25_B + BM25_B * len_ratio))
    }

    fn mix_similarity(
        &self,
        query: &str,
        keyword: Vec<(usize, f64, Vec<String>)>,
        opts: &SearchOptions,
        alpha: f64,
        signal: &dyn SimilaritySignal,
    ) -> Vec<(usize, f64, Vec<String>)> {
        let raw: Vec<f64> = keyword.iter().map(|(_, s, _)| *s).collect();
        let norm = normalize_scores(&raw);

        let mut merged: BTreeMap<usize, (f64, Vec<String>)> = keyword
            .into_iter()
            .zip(norm)
            .map(|((idx, _, matched), k)| (idx, ((1.0 - alpha) * k, matched)))
            .collect();

        for idx in (0..self.items.len()).filter(|idx| self.passes(*idx, opts)) {
            let Some(sim) = signal.similarity(query, &self.items[idx]) else {
                continue;
            };
            let sim = sim.clamp(0.0, 1.0);
            if sim <= 0.0 {
                continue;
            }
            merged.entry(idx).or_insert_with(|| (0.0, Vec::new())).0 += alpha * sim;
        }

        merged
            .into_iter()
            .filter(|(_, (score, matched))| *score > 0.0 || !matched.is_empty())
            .map(|(idx, (score, matched))| (idx, score, matched))
            .collect()
    }

    fn recency_factor(&self, item: &IndexedItem, cfg: &RetrievalConfig) -> f64 {
        if cfg.recency_weight <= 0.0 || cfg.recency_half_life_days <= 0.0 {
            return 1.0;
        }
        let age_days = (self.newest_indexed_at - item.indexed_at).max(0) as f64 / SECONDS_PER_DAY;
        1.0 + cfg.recency_weight * 0.5f64.powf(age_days / cfg.recency_half_life_days)
    }

    fn to_hit(
        &self,
        idx: usize,
        score: f64,
        match_kind: MatchKind,
        matched: &[String],
        cfg: &RetrievalConfig,
    ) -> SearchHit {
        let item = &self.items[idx];
        let match_at = token_spans(&item.content)
            .into_iter()
            .find(|t| matched.contains(&t.term))
            .map(|t| t.start);

        let section = if item.kind == ItemKind::Document {
            let at = match_at.unwrap_or(0);
            item.sections()
                .into_iter()
                .filter(|s| s.content_offset <= at)
                .last()
                .map(|s| s.title)
        } else {
            None
        };

        SearchHit {
            id: item.id.clone(),
            path: item.path.clone(),
            kind: item.kind,
            title: item.title.clone(),
            score,
            match_kind,
            snippet: snippet(&item.content, match_at.unwrap_or(0), cfg.snippet_chars),
            section,
            doc_type: item.doc_type(),
            metadata: item.metadata.clone(),
            code: item.code.clone(),
        }
    }
}

fn title_tf_weight(tf: u32) -> f64 {
    let tf = tf as f64;
    tf / (tf + 1.0)
}

/// `1 + w · ln(1 + count)`, or 1 for unused items.
pub fn usage_factor(usage: Option<&HashMap<String, UsageStats>>, id: &str, weight: f64) -> f64 {
    let count = usage.and_then(|u| u.get(id)).map(|s| s.count).unwrap_or(0);
    1.0 + weight * (1.0 + count as f64).ln()
}

/// A window of at most `max_chars` characters starting shortly before byte `at`.
pub fn snippet(content: &str, at: usize, max_chars: usize) -> String {
    if max_chars == 0 || content.is_empty() {
        return String::new();
    }
    let lead = max_chars / 4;

    let at = at.min(content.len());
    let chars_before = content[..floor_char_boundary(content, at)].chars().count();
    let start_char = chars_before.saturating_sub(lead);

    let window: String = content.chars().skip(start_char).take(max_chars).collect();
    let mut out = window.split_whitespace().collect::<Vec<_>>().join(" ");
    if start_char > 0 {
        out.insert_str(0, "...");
    }
    if start_char + max_chars < content.chars().count() {
        out.push_str("...");
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Min-max normalize raw scores into `[0, 1]`. Equal scores all map to 1.
fn normalize_scores(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }

    let s_min = raw.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = raw.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    raw.iter()
        .map(|s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{document_id, Section};

    fn doc(path: &str, title: &str, content: &str, indexed_at: i64) -> IndexedItem {
        IndexedItem {
            id: document_id(path),
            path: path.to_string(),
            fingerprint: "f".to_string(),
            kind: ItemKind::Document,
            title: title.to_string(),
            content: content.to_string(),
            metadata: serde_json::json!({}),
            indexed_at,
            code: None,
        }
    }

    fn cfg() -> RetrievalConfig {
        RetrievalConfig::default()
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.id.as_str()).collect()
    }

    fn corpus() -> SearchIndex {
        SearchIndex::build(vec![
            doc(
                "docs/guide.md",
                "Retry Policy",
                "Retry failed calls with exponential backoff.",
                100,
            ),
            doc("docs/deploy.md", "Deployment", "Ship containers to the cluster.", 100),
            doc(
                "docs/notes.md",
                "Notes",
                "Sometimes a retry happens here among many other unrelated words about things.",
                100,
            ),
        ])
    }

    #[test]
    fn title_match_outranks_body_match() {
        let index = corpus();
        let cfg = cfg();
        let hits = index.search("retry", &SearchOptions::new(10), &Ranking::new(&cfg));
        assert_eq!(ids(&hits), vec!["doc:docs/guide.md", "doc:docs/notes.md"]);
        assert_eq!(hits[0].match_kind, MatchKind::Exact);
    }

    #[test]
    fn short_or_empty_queries_return_nothing() {
        let index = corpus();
        let cfg = cfg();
        let ranking = Ranking::new(&cfg);
        assert!(index.search("", &SearchOptions::new(10), &ranking).is_empty());
        assert!(index.search("r", &SearchOptions::new(10), &ranking).is_empty());
        assert!(index.search("   ", &SearchOptions::new(10), &ranking).is_empty());
    }

    #[test]
    fn fuzzy_only_when_exact_misses() {
        let index = corpus();
        let cfg = cfg();
        let ranking = Ranking::new(&cfg);

        let hits = index.search("retyr", &SearchOptions::new(10), &ranking);
        assert!(hits.is_empty(), "transposition is distance 2");

        let hits = index.search("retri", &SearchOptions::new(10), &ranking);
        assert_eq!(hits[0].id, "doc:docs/guide.md");
        assert!(hits.iter().all(|h| h.match_kind == MatchKind::Fuzzy));

        // Short terms never go fuzzy
        assert!(index.search("shi", &SearchOptions::new(10), &ranking).is_empty());
    }

    #[test]
    fn ties_break_by_path() {
        let index = SearchIndex::build(vec![
            doc("b.md", "Same", "same words", 1),
            doc("a.md", "Same", "same words", 1),
        ]);
        let cfg = cfg();
        let hits = index.search("same", &SearchOptions::new(10), &Ranking::new(&cfg));
        assert_eq!(ids(&hits), vec!["doc:a.md", "doc:b.md"]);
    }

    #[test]
    fn filters_and_limit_apply() {
        let index = corpus();
        let cfg = cfg();
        let ranking = Ranking::new(&cfg);

        let opts = SearchOptions {
            path_prefix: Some("docs/notes".to_string()),
            ..SearchOptions::new(10)
        };
        assert_eq!(ids(&index.search("retry", &opts, &ranking)), vec!["doc:docs/notes.md"]);

        let code_only = SearchOptions::new(10).kind(ItemKind::CodeEntity);
        assert!(index.search("retry", &code_only, &ranking).is_empty());

        assert_eq!(index.search("retry", &SearchOptions::new(1), &ranking).len(), 1);

        let txt_only = SearchOptions {
            doc_type: Some("txt".to_string()),
            ..SearchOptions::new(10)
        };
        assert!(index.search("retry", &txt_only, &ranking).is_empty());
    }

    #[test]
    fn usage_lifts_an_otherwise_equal_item() {
        let index = SearchIndex::build(vec![
            doc("a.md", "Same", "same words", 1),
            doc("b.md", "Same", "same words", 1),
        ]);
        let cfg = cfg();
        let mut usage = HashMap::new();
        let mut stats = UsageStats::default();
        stats.observe(None);
        stats.observe(None);
        usage.insert("doc:b.md".to_string(), stats);

        let ranking = Ranking {
            usage: Some(&usage),
            ..Ranking::new(&cfg)
        };
        let hits = index.search("same", &SearchOptions::new(10), &ranking);
        assert_eq!(hits[0].id, "doc:b.md");
    }

    #[test]
    fn newer_items_get_recency_lift() {
        let index = SearchIndex::build(vec![
            doc("a.md", "Same", "same words", 0),
            doc("b.md", "Same", "same words", 90 * 86_400),
        ]);
        let cfg = cfg();
        let hits = index.search("same", &SearchOptions::new(10), &Ranking::new(&cfg));
        assert_eq!(hits[0].id, "doc:b.md");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn hit_reports_section_of_first_match() {
        let mut item = doc(
            "guide.md",
            "Guide",
            "Guide\nIntro text.\nRetry\nUse backoff.",
            1,
        );
        let sections = vec![
            Section {
                title: "Guide".to_string(),
                level: 1,
                byte_offset: 0,
                content_offset: 0,
            },
            Section {
                title: "Retry".to_string(),
                level: 2,
                byte_offset: 20,
                content_offset: 18,
            },
        ];
        item.metadata = serde_json::json!({ "sections": sections });
        let index = SearchIndex::build(vec![item]);
        let cfg = cfg();
        let hits = index.search("backoff", &SearchOptions::new(10), &Ranking::new(&cfg));
        assert_eq!(hits[0].section.as_deref(), Some("Retry"));
        assert!(hits[0].snippet.contains("backoff"));
    }

    struct Fixed;
    impl SimilaritySignal for Fixed {
        fn similarity(&self, _query: &str, item: &IndexedItem) -> Option<f64> {
            (item.path == "docs/deploy.md").then_some(1.0)
        }
    }

    #[test]
    fn similarity_signal_can_surface_keyword_misses() {
        let index = corpus();
        let mut cfg = cfg();
        cfg.semantic_weight = 1.0;
        let ranking = Ranking {
            similarity: Some(&Fixed),
            ..Ranking::new(&cfg)
        };
        let hits = index.search("retry", &SearchOptions::new(10), &ranking);
        assert_eq!(hits[0].id, "doc:docs/deploy.md");
    }

    #[test]
    fn semantic_weight_zero_keeps_keyword_order() {
        let index = corpus();
        let mut cfg = cfg();
        cfg.semantic_weight = 0.0;
        let ranking = Ranking {
            similarity: Some(&Fixed),
            ..Ranking::new(&cfg)
        };
        let hits = index.search("retry", &SearchOptions::new(10), &ranking);
        assert_eq!(ids(&hits), vec!["doc:docs/guide.md", "doc:docs/notes.md"]);
    }

    #[test]
    fn item_has_terms_checks_all() {
        let index = corpus();
        let terms = vec!["retry".to_string(), "backoff".to_string()];
        assert!(index.item_has_terms("doc:docs/guide.md", &terms));
        assert!(!index.item_has_terms("doc:docs/notes.md", &terms));
        assert!(!index.item_has_terms("doc:missing.md", &terms));
    }

    #[test]
    fn snippet_is_bounded_and_marked() {
        let text = "word ".repeat(100);
        let s = snippet(&text, 250, 40);
        assert!(s.starts_with("..."));
        assert!(s.ends_with("..."));
        assert!(s.chars().count() <= 46);
        assert_eq!(snippet("short", 0, 40), "short");
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let result = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((result[0] - 1.0).abs() < 1e-9);
        assert!((result[1] - 0.5).abs() < 1e-9);
        assert!((result[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        for score in normalize_scores(&[3.0, 3.0]) {
            assert!((score - 1.0).abs() < 1e-9);
        }
    }
}
