//! Keyword rules and the matcher that evaluates entries against them.

pub mod matcher;
pub mod ruleset;
pub mod term;

pub use matcher::{RuleMatch, evaluate};
pub use ruleset::{
    InvalidTerm, KeywordRule, ResetMode, RuleChange, RuleDefaults, RuleSet, RuleState, Setting,
    Settings,
};
pub use term::{Term, TermPattern};
