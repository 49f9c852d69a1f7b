//! Per-tenant keyword rules, global block list, and match settings.
//!
//! All mutation operations are plain methods on an owned [`RuleSet`]. The
//! tenant store applies them to a private copy and swaps the result in, so
//! readers only ever see a complete value.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::rules::term::{Term, TermPattern};

/// Activation state of a rule, derived from its word's pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleState {
    Active,
    Inactive { reason: String },
}

/// One keyword rule: the word itself plus optional include/exclude terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredRule")]
pub struct KeywordRule {
    word: Term,
    include: Vec<Term>,
    exclude: Vec<Term>,
}

impl KeywordRule {
    pub fn new(word: &str) -> Self {
        Self {
            word: Term::new(word),
            include: Vec::new(),
            exclude: Vec::new(),
        }
    }

    pub fn word(&self) -> &str {
        self.word.text()
    }

    /// Case-normalized primary key.
    pub fn key(&self) -> &str {
        self.word.key()
    }

    pub fn word_term(&self) -> &Term {
        &self.word
    }

    pub fn include_terms(&self) -> &[Term] {
        &self.include
    }

    pub fn exclude_terms(&self) -> &[Term] {
        &self.exclude
    }

    pub fn is_regex(&self) -> bool {
        !matches!(self.word.pattern(), TermPattern::Literal)
    }

    /// The compiled pattern, present only in regex mode when compilation succeeded.
    pub fn compiled_pattern(&self) -> Option<&regex::Regex> {
        match self.word.pattern() {
            TermPattern::Regex(re) => Some(re),
            _ => None,
        }
    }

    pub fn state(&self) -> RuleState {
        match self.word.pattern() {
            TermPattern::Invalid(reason) => RuleState::Inactive {
                reason: reason.clone(),
            },
            _ => RuleState::Active,
        }
    }

    fn terms_mut(&mut self) -> impl Iterator<Item = &mut Term> {
        std::iter::once(&mut self.word)
            .chain(self.include.iter_mut())
            .chain(self.exclude.iter_mut())
    }
}

/// Accepted on-disk rule shapes. Older config files stored bare strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRule {
    Word(String),
    Full {
        word: String,
        #[serde(default)]
        include: Vec<Term>,
        #[serde(default)]
        exclude: Vec<Term>,
    },
}

impl From<StoredRule> for KeywordRule {
    fn from(stored: StoredRule) -> Self {
        match stored {
            StoredRule::Word(word) => KeywordRule::new(&word),
            StoredRule::Full {
                word,
                include,
                exclude,
            } => {
                let mut rule = KeywordRule::new(&word);
                union_terms(&mut rule.include, include);
                union_terms(&mut rule.exclude, exclude);
                rule
            }
        }
    }
}

/// How `add_or_merge_rule` treats an existing rule's term sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetMode {
    /// Union new terms into the existing sets.
    #[default]
    None,
    /// Empty both sets before adding.
    ClearAll,
    /// Empty only the include set before adding.
    ClearInclude,
    /// Empty only the exclude set before adding.
    ClearExclude,
}

/// Result of an add/merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleChange {
    Created,
    Updated,
}

/// Include/exclude terms applied to newly created rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleDefaults {
    pub include: Vec<Term>,
    pub exclude: Vec<Term>,
}

/// Per-tenant match settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub match_summary: bool,
    pub full_word_match: bool,
    pub regex_match: bool,
    #[serde(rename = "check_min_interval")]
    pub min_interval_secs: u64,
    #[serde(rename = "check_max_interval")]
    pub max_interval_secs: u64,
    /// Dedup history bound; 0 disables eviction.
    pub max_notified_entries: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            match_summary: true,
            full_word_match: false,
            regex_match: false,
            min_interval_secs: 30,
            max_interval_secs: 60,
            max_notified_entries: 50,
        }
    }
}

/// A single validated settings change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Setting {
    MatchSummary(bool),
    FullWordMatch(bool),
    RegexMatch(bool),
    Interval { min: i64, max: i64 },
    MaxNotifiedEntries(i64),
}

impl Settings {
    /// Validate and apply. On error `self` is untouched.
    pub fn apply(&mut self, setting: Setting) -> Result<(), ValidationError> {
        match setting {
            Setting::MatchSummary(v) => self.match_summary = v,
            Setting::FullWordMatch(v) => self.full_word_match = v,
            Setting::RegexMatch(v) => self.regex_match = v,
            Setting::Interval { min, max } => {
                if min <= 0 || max <= 0 || min > max {
                    return Err(ValidationError::InvalidInterval { min, max });
                }
                self.min_interval_secs = min as u64;
                self.max_interval_secs = max as u64;
            }
            Setting::MaxNotifiedEntries(n) => {
                let bound = usize::try_from(n).map_err(|_| ValidationError::InvalidSetting {
                    setting: "max_notified_entries".into(),
                    reason: format!("{n} must be >= 0"),
                })?;
                self.max_notified_entries = bound;
            }
        }
        Ok(())
    }

    /// Interval bounds repaired the way the poll loop needs them: both > 0, min <= max.
    pub fn effective_interval(&self) -> (u64, u64) {
        let defaults = Settings::default();
        let min = if self.min_interval_secs == 0 {
            defaults.min_interval_secs
        } else {
            self.min_interval_secs
        };
        let max = if self.max_interval_secs < min {
            min.max(defaults.max_interval_secs)
        } else {
            self.max_interval_secs
        };
        (min, max)
    }
}

/// A term that failed to compile as a regex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTerm {
    /// Owning rule's word, or `None` for a global block term.
    pub rule: Option<String>,
    pub term: String,
    pub reason: String,
}

/// A tenant's full rule configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    #[serde(rename = "keywords", with = "rule_list")]
    rules: IndexMap<String, KeywordRule>,
    #[serde(rename = "exclude_keywords", deserialize_with = "dedup_terms")]
    global_exclude: Vec<Term>,
    defaults: RuleDefaults,
    settings: Settings,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rules in insertion (evaluation) order.
    pub fn rules(&self) -> impl Iterator<Item = &KeywordRule> {
        self.rules.values()
    }

    pub fn rule(&self, word: &str) -> Option<&KeywordRule> {
        self.rules.get(&normalize_key(word))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn global_exclude(&self) -> &[Term] {
        &self.global_exclude
    }

    pub fn defaults(&self) -> &RuleDefaults {
        &self.defaults
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Create `word`, or merge terms into the existing rule according to `reset`.
    ///
    /// Defaults are applied only to a newly created rule with no reset flag.
    pub fn add_or_merge_rule(
        &mut self,
        word: &str,
        include_add: &[String],
        exclude_add: &[String],
        reset: ResetMode,
    ) -> Result<RuleChange, ValidationError> {
        let key = normalize_key(word);
        if key.is_empty() {
            return Err(ValidationError::MissingArgument("keyword".into()));
        }

        let change = if self.rules.contains_key(&key) {
            RuleChange::Updated
        } else {
            let mut rule = KeywordRule::new(word);
            if reset == ResetMode::None {
                union_terms(&mut rule.include, self.defaults.include.iter().cloned());
                union_terms(&mut rule.exclude, self.defaults.exclude.iter().cloned());
            }
            self.rules.insert(key.clone(), rule);
            RuleChange::Created
        };

        let Some(rule) = self.rules.get_mut(&key) else {
            return Err(ValidationError::MissingArgument("keyword".into()));
        };
        match reset {
            ResetMode::None => {}
            ResetMode::ClearAll => {
                rule.include.clear();
                rule.exclude.clear();
            }
            ResetMode::ClearInclude => rule.include.clear(),
            ResetMode::ClearExclude => rule.exclude.clear(),
        }
        union_terms(&mut rule.include, include_add.iter().map(Term::new));
        union_terms(&mut rule.exclude, exclude_add.iter().map(Term::new));

        self.compile();
        Ok(change)
    }

    /// Remove a rule. Absent words are a no-op; returns whether one was removed.
    pub fn delete_rule(&mut self, word: &str) -> bool {
        self.rules.shift_remove(&normalize_key(word)).is_some()
    }

    /// Add a global block term; returns whether the list changed.
    pub fn block_global(&mut self, term: &str) -> bool {
        let term = Term::new(term);
        if term.is_empty() || self.global_exclude.contains(&term) {
            return false;
        }
        self.global_exclude.push(term);
        self.compile();
        true
    }

    /// Remove a global block term; returns whether the list changed.
    pub fn unblock_global(&mut self, term: &str) -> bool {
        let term = Term::new(term);
        let before = self.global_exclude.len();
        self.global_exclude.retain(|t| *t != term);
        self.global_exclude.len() != before
    }

    /// Validate and apply a setting. Toggling regex mode recompiles every term.
    pub fn set_setting(&mut self, setting: Setting) -> Result<(), ValidationError> {
        let regex_before = self.settings.regex_match;
        self.settings.apply(setting)?;
        if self.settings.regex_match != regex_before {
            self.compile();
        }
        Ok(())
    }

    /// Replace the default include terms; an empty list clears them.
    pub fn set_default_includes(&mut self, terms: &[String]) {
        self.defaults.include.clear();
        union_terms(&mut self.defaults.include, terms.iter().map(Term::new));
    }

    /// Replace the default exclude terms; an empty list clears them.
    pub fn set_default_excludes(&mut self, terms: &[String]) {
        self.defaults.exclude.clear();
        union_terms(&mut self.defaults.exclude, terms.iter().map(Term::new));
    }

    /// Compile every term for the current regex mode and report the failures.
    pub fn compile(&mut self) -> Vec<InvalidTerm> {
        let regex_mode = self.settings.regex_match;
        for rule in self.rules.values_mut() {
            for term in rule.terms_mut() {
                term.compile(regex_mode);
            }
        }
        for term in &mut self.global_exclude {
            term.compile(regex_mode);
        }
        self.invalid_terms()
    }

    /// Terms currently marked invalid, rules first then global block terms.
    pub fn invalid_terms(&self) -> Vec<InvalidTerm> {
        let mut invalid = Vec::new();
        for rule in self.rules.values() {
            let terms = std::iter::once(&rule.word)
                .chain(rule.include.iter())
                .chain(rule.exclude.iter());
            for term in terms {
                if let TermPattern::Invalid(reason) = term.pattern() {
                    invalid.push(InvalidTerm {
                        rule: Some(rule.word().to_string()),
                        term: term.text().to_string(),
                        reason: reason.clone(),
                    });
                }
            }
        }
        for term in &self.global_exclude {
            if let TermPattern::Invalid(reason) = term.pattern() {
                invalid.push(InvalidTerm {
                    rule: None,
                    term: term.text().to_string(),
                    reason: reason.clone(),
                });
            }
        }
        invalid
    }
}

fn normalize_key(word: &str) -> String {
    word.trim().to_lowercase()
}

/// Append terms not already present (case-insensitive), skipping empties.
fn union_terms(target: &mut Vec<Term>, terms: impl IntoIterator<Item = Term>) {
    for term in terms {
        if !term.is_empty() && !target.contains(&term) {
            target.push(term);
        }
    }
}

fn dedup_terms<'de, D>(deserializer: D) -> Result<Vec<Term>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<Term>::deserialize(deserializer)?;
    let mut terms = Vec::with_capacity(raw.len());
    union_terms(&mut terms, raw);
    Ok(terms)
}

/// Rules persist as a JSON list; the first occurrence of a word wins.
mod rule_list {
    use indexmap::IndexMap;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::KeywordRule;

    pub fn serialize<S>(rules: &IndexMap<String, KeywordRule>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(rules.values())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<IndexMap<String, KeywordRule>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let list = Vec::<KeywordRule>::deserialize(deserializer)?;
        let mut rules = IndexMap::with_capacity(list.len());
        for rule in list {
            if rule.key().is_empty() {
                continue;
            }
            rules.entry(rule.key().to_string()).or_insert(rule);
        }
        Ok(rules)
    }
}
