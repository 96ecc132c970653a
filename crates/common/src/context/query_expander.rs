//! Query Expander - weighted synonym expansion and query variants
//!
//! Provides:
//! - Tokenization with stopword filtering
//! - Synonym expansion with decaying weights (forward and reverse lookup)
//! - Context-aware reordering of synonyms
//! - Query-string variants for channels with different match styles

use crate::config::ExpansionConfig;
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use regex_lite::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;
use tracing::debug;

static WORD_PATTERN: OnceLock<Regex> = OnceLock::new();

fn word_pattern() -> &'static Regex {
    // Keeps shell compounds like `docker-compose` together
    WORD_PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9_]+(?:[-.][A-Za-z0-9_]+)*").expect("Invalid word regex pattern")
    })
}

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "am",
    "in", "on", "at", "to", "for", "of", "with", "by", "from", "into",
    "and", "or", "but", "not", "this", "that", "these", "those",
    "it", "its", "as", "do", "does", "did", "has", "have", "had",
    "can", "could", "will", "would", "should", "may", "might",
    "i", "me", "my", "we", "you", "your", "please", "how", "what",
];

/// Lowercased word tokens of `text`
pub fn tokenize(text: &str) -> Vec<String> {
    word_pattern()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Whether `word` is a stopword
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word)
}

/// Content words of `text`. Falls back to every token when all are stopwords.
pub fn keywords(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let filtered: Vec<String> = tokens.iter().filter(|t| !is_stopword(t)).cloned().collect();
    if filtered.is_empty() {
        tokens
    } else {
        filtered
    }
}

/// Term to synonym mapping with a reverse index
#[derive(Debug, Clone, Default)]
pub struct SynonymTable {
    forward: HashMap<String, Vec<String>>,
    reverse: HashMap<String, Vec<String>>,
}

impl SynonymTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(term, [synonyms])` pairs
    pub fn from_pairs<'a, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [&'a str])>,
    {
        let mut table = Self::new();
        for (term, synonyms) in pairs {
            for synonym in synonyms {
                table.insert(term, synonym);
            }
        }
        table
    }

    /// Curated shell-domain thesaurus
    pub fn shell_defaults() -> Self {
        Self::from_pairs([
            ("install", &["setup", "add"][..]),
            ("remove", &["uninstall", "delete", "purge"][..]),
            ("delete", &["rm", "remove", "erase"][..]),
            ("list", &["ls", "show", "enumerate"][..]),
            ("find", &["search", "locate", "grep"][..]),
            ("search", &["grep", "find"][..]),
            ("copy", &["cp", "duplicate"][..]),
            ("move", &["mv", "rename"][..]),
            ("firewall", &["iptables", "ufw"][..]),
            ("process", &["ps", "pid", "task"][..]),
            ("kill", &["terminate", "stop", "pkill"][..]),
            ("start", &["run", "launch", "begin"][..]),
            ("restart", &["reload", "reboot"][..]),
            ("network", &["net", "ip", "interface"][..]),
            ("disk", &["storage", "df", "volume"][..]),
            ("memory", &["ram", "mem", "free"][..]),
            ("permission", &["chmod", "chown", "access"][..]),
            ("download", &["fetch", "curl", "wget"][..]),
            ("archive", &["tar", "zip", "compress"][..]),
            ("extract", &["untar", "unzip", "decompress"][..]),
            ("container", &["docker", "podman"][..]),
            ("package", &["apt", "pkg", "brew"][..]),
            ("log", &["journal", "journalctl", "syslog"][..]),
            ("error", &["failure", "exception", "fault"][..]),
            ("edit", &["modify", "change", "vim"][..]),
            ("branch", &["checkout", "switch"][..]),
            ("commit", &["save", "snapshot"][..]),
        ])
    }

    /// Register `synonym` for `term`. Duplicates are ignored.
    pub fn insert(&mut self, term: &str, synonym: &str) {
        let term = term.trim().to_lowercase();
        let synonym = synonym.trim().to_lowercase();
        if term.is_empty() || synonym.is_empty() || term == synonym {
            return;
        }

        let forward = self.forward.entry(term.clone()).or_default();
        if !forward.contains(&synonym) {
            forward.push(synonym.clone());
        }
        let reverse = self.reverse.entry(synonym).or_default();
        if !reverse.contains(&term) {
            reverse.push(term);
        }
    }

    /// Direct synonyms of `term`
    pub fn synonyms_of(&self, term: &str) -> &[String] {
        self.forward.get(term).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Terms that list `synonym` as a synonym
    pub fn terms_for(&self, synonym: &str) -> &[String] {
        self.reverse.get(synonym).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Candidates for `token`: direct synonyms, or through the reverse index
    /// the owning terms followed by their other synonyms.
    fn candidates(&self, token: &str) -> Vec<String> {
        let direct = self.synonyms_of(token);
        if !direct.is_empty() {
            return direct.to_vec();
        }

        let mut out: IndexSet<String> = IndexSet::new();
        for term in self.terms_for(token) {
            out.insert(term.clone());
            for sibling in self.synonyms_of(term) {
                if sibling != token {
                    out.insert(sibling.clone());
                }
            }
        }
        out.into_iter().collect()
    }

    /// Number of terms with synonyms
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

/// Query strings for each match style
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryVariants {
    /// The query as typed, whitespace collapsed
    pub phrase: String,

    /// Original terms followed by their synonyms
    pub expanded: String,

    /// Stopword-filtered terms
    pub keywords: String,

    /// `term*` form, only for queries longer than `prefix_min_chars`
    pub prefix: Option<String>,
}

impl QueryVariants {
    pub fn is_empty(&self) -> bool {
        self.phrase.is_empty()
    }
}

/// Weighted synonym expander
pub struct QueryExpander {
    config: ExpansionConfig,
    table: RwLock<SynonymTable>,
}

impl QueryExpander {
    /// Create an expander over the default shell thesaurus
    pub fn new(config: ExpansionConfig) -> Self {
        Self::with_table(config, SynonymTable::shell_defaults())
    }

    pub fn with_table(config: ExpansionConfig, table: SynonymTable) -> Self {
        Self {
            config,
            table: RwLock::new(table),
        }
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    /// Add a synonym at runtime
    pub fn add_synonym(&self, term: &str, synonym: &str) {
        self.table.write().insert(term, synonym);
    }

    /// Weight of the `position`-th synonym of a token
    fn synonym_weight(&self, position: usize) -> f32 {
        let decayed = self.config.synonym_weight - self.config.decay_step * position as f32;
        decayed.max(self.config.min_synonym_weight)
    }

    /// Expand `query` into a weighted term map.
    ///
    /// Original tokens come first with `original_weight`, followed by each
    /// token's synonyms in decaying order. When `context` is given, synonyms
    /// that occur in it are promoted ahead of the rest.
    pub fn expand(&self, query: &str, context: Option<&str>) -> IndexMap<String, f32> {
        let tokens = keywords(query);
        let mut terms: IndexMap<String, f32> = IndexMap::new();
        if tokens.is_empty() {
            return terms;
        }

        for token in &tokens {
            terms.entry(token.clone()).or_insert(self.config.original_weight);
        }

        let context_words: HashSet<String> = context.map(tokenize).unwrap_or_default().into_iter().collect();
        let table = self.table.read();

        for token in &tokens {
            let mut candidates = table.candidates(token);
            if !context_words.is_empty() {
                // Stable partition: synonyms seen in the context go first
                let (mut seen, unseen): (Vec<String>, Vec<String>) = candidates
                    .into_iter()
                    .partition(|c| tokenize(c).iter().all(|w| context_words.contains(w)));
                seen.extend(unseen);
                candidates = seen;
            }

            for (position, synonym) in candidates
                .into_iter()
                .filter(|c| c != token)
                .take(self.config.max_expansions)
                .enumerate()
            {
                let weight = self.synonym_weight(position);
                terms.entry(synonym).or_insert(weight);
            }
        }

        debug!(query, terms = terms.len(), "Expanded query");
        terms
    }

    /// Stopword-filtered tokens of `query`
    pub fn keywords(&self, query: &str) -> Vec<String> {
        keywords(query)
    }

    /// Query strings for each match style
    pub fn variant_set(&self, query: &str) -> QueryVariants {
        let phrase = query.split_whitespace().collect::<Vec<_>>().join(" ");
        if phrase.is_empty() {
            return QueryVariants::default();
        }

        let expanded = self.expand(query, None).into_keys().collect::<Vec<_>>().join(" ");
        let words = keywords(query);
        let prefix = (!words.is_empty() && phrase.chars().count() > self.config.prefix_min_chars)
            .then(|| words.iter().map(|w| format!("{}*", w)).collect::<Vec<_>>().join(" "));

        QueryVariants {
            phrase,
            expanded,
            keywords: words.join(" "),
            prefix,
        }
    }

    /// Query-string variants in priority order: exact phrase, expansion,
    /// keyword list, and a prefix form for longer queries. Duplicates are
    /// dropped.
    pub fn variants(&self, query: &str) -> Vec<String> {
        let set = self.variant_set(query);
        let mut variants: IndexSet<String> = IndexSet::new();
        for variant in [Some(set.phrase), Some(set.expanded), Some(set.keywords), set.prefix]
            .into_iter()
            .flatten()
        {
            if !variant.is_empty() {
                variants.insert(variant);
            }
        }
        variants.into_iter().collect()
    }
}

impl Default for QueryExpander {
    fn default() -> Self {
        Self::new(ExpansionConfig::default())
    }
}
