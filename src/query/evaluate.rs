//! Query evaluation
//!
//! A [`Subquery`] is compiled once into a [`Matcher`] that mirrors the tree
//! but holds pre-folded comparison values, then the matcher runs against each
//! entry. Text comparisons ignore case and diacritics on both sides.
//!
//! Evaluation rules:
//! - empty property value: always true
//! - missing field: `doesNot*` true, `equals`/`contains` false
//! - empty level set: always true
//! - `AND([])` and `OR([])`: true

use crate::model::{Entry, LogLevel};
use crate::query::ast::{Comparison, CompoundVariant, Property, Subquery, SubqueryKind};
use std::borrow::Cow;
use std::collections::BTreeSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Lowercase and strip diacritics.
///
/// ASCII input skips normalization entirely, which is the common case for
/// subsystems, processes and most messages.
pub fn fold(text: &str) -> Cow<'_, str> {
    if text.is_ascii() {
        if text.bytes().any(|b| b.is_ascii_uppercase()) {
            Cow::Owned(text.to_ascii_lowercase())
        } else {
            Cow::Borrowed(text)
        }
    } else {
        Cow::Owned(
            text.nfd()
                .filter(|c| !is_combining_mark(*c))
                .flat_map(char::to_lowercase)
                .collect(),
        )
    }
}

/// Stringified value of `property` on `entry`, or `None` if the entry has no
/// such field
pub fn field_value(entry: &Entry, property: Property) -> Option<Cow<'_, str>> {
    match property {
        Property::Subsystem => entry.subsystem.as_deref().map(Cow::Borrowed),
        Property::Category => entry.category.as_deref().map(Cow::Borrowed),
        Property::Message => Some(Cow::Borrowed(entry.message.as_str())),
        Property::Process => Some(Cow::Borrowed(entry.process.as_str())),
        Property::Pid => Some(Cow::Owned(entry.pid.to_string())),
        Property::Sender => Some(Cow::Borrowed(entry.sender.as_str())),
        Property::Activity => Some(Cow::Owned(entry.activity_id.to_string())),
        Property::Thread => Some(Cow::Owned(entry.thread_id.to_string())),
    }
}

/// Compiled form of a query tree
#[derive(Debug, Clone)]
pub enum Matcher {
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Property {
        property: Property,
        comparison: Comparison,
        /// Folded comparison value; `None` when the value was empty
        needle: Option<String>,
    },
    Levels(BTreeSet<LogLevel>),
}

impl Matcher {
    pub fn compile(query: &Subquery) -> Self {
        match &query.kind {
            SubqueryKind::Compound { variant, children } => {
                let children = children.iter().map(Matcher::compile).collect();
                match variant {
                    CompoundVariant::And => Matcher::All(children),
                    CompoundVariant::Or => Matcher::Any(children),
                }
            }
            SubqueryKind::Property {
                property,
                comparison,
                value,
            } => Matcher::Property {
                property: *property,
                comparison: *comparison,
                needle: if value.is_empty() {
                    None
                } else {
                    Some(fold(value).into_owned())
                },
            },
            SubqueryKind::LogLevel { levels } => Matcher::Levels(levels.clone()),
        }
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Matcher::All(children) => children.iter().all(|c| c.matches(entry)),
            Matcher::Any(children) => {
                children.is_empty() || children.iter().any(|c| c.matches(entry))
            }
            Matcher::Property {
                property,
                comparison,
                needle,
            } => {
                let Some(needle) = needle else {
                    return true;
                };
                match field_value(entry, *property) {
                    Some(value) => compare(&fold(&value), needle, *comparison),
                    None => comparison.matches_missing(),
                }
            }
            Matcher::Levels(levels) => {
                levels.is_empty() || entry.level.map(|l| levels.contains(&l)).unwrap_or(false)
            }
        }
    }
}

fn compare(haystack: &str, needle: &str, comparison: Comparison) -> bool {
    match comparison {
        Comparison::Contains => haystack.contains(needle),
        Comparison::Equals => haystack == needle,
        Comparison::DoesNotContain => !haystack.contains(needle),
        Comparison::DoesNotEqual => haystack != needle,
    }
}

impl Subquery {
    /// Evaluate this query against one entry.
    ///
    /// For many entries compile a [`Matcher`] once instead.
    pub fn evaluate(&self, entry: &Entry) -> bool {
        Matcher::compile(self).matches(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn otter() -> Entry {
        Entry::log(Utc.timestamp_opt(1_700_000_000, 0).unwrap(), "I am Otter, hear me roar.")
            .with_subsystem("com.jollycode.otter")
            .with_category("Loading")
            .with_process("Otter", 4242)
            .with_sender("Otter")
            .with_activity_id(77)
            .with_thread_id(1234)
            .with_level(LogLevel::Info)
    }

    #[test]
    fn test_fold() {
        assert_eq!(fold("Hello"), "hello");
        assert_eq!(fold("Crème Brûlée"), "creme brulee");
        assert_eq!(fold("ÅNGSTRÖM"), "angstrom");
        assert!(matches!(fold("plain"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_contains_message() {
        let entry = otter();
        assert!(Subquery::contains(Property::Message, "hear me roar").evaluate(&entry));
        assert!(Subquery::contains(Property::Message, "HEAR ME").evaluate(&entry));
        assert!(!Subquery::contains(Property::Message, "whisper").evaluate(&entry));
    }

    #[test]
    fn test_equals_is_case_insensitive() {
        let entry = otter();
        assert!(Subquery::equals(Property::Subsystem, "COM.JOLLYCODE.OTTER").evaluate(&entry));
        assert!(!Subquery::equals(Property::Subsystem, "com.jollycode").evaluate(&entry));
        assert!(Subquery::does_not_equal(Property::Subsystem, "com.jollycode").evaluate(&entry));
    }

    #[test]
    fn test_does_not_contain_process() {
        let entry = otter();
        assert!(!Subquery::does_not_contain(Property::Process, "Otter").evaluate(&entry));
        assert!(Subquery::does_not_contain(Property::Process, "Beaver").evaluate(&entry));
    }

    #[test]
    fn test_diacritic_insensitive_contains() {
        let entry = Entry::log(Utc.timestamp_opt(0, 0).unwrap(), "Café opened");
        assert!(Subquery::contains(Property::Message, "cafe").evaluate(&entry));
        assert!(Subquery::contains(Property::Message, "CAFÉ").evaluate(&entry));
    }

    #[test]
    fn test_numeric_fields_stringify() {
        let entry = otter();
        assert!(Subquery::equals(Property::Pid, "4242").evaluate(&entry));
        assert!(Subquery::equals(Property::Activity, "77").evaluate(&entry));
        assert!(Subquery::contains(Property::Thread, "23").evaluate(&entry));
    }

    #[test]
    fn test_missing_field_rule() {
        let entry = Entry::log(Utc.timestamp_opt(0, 0).unwrap(), "no subsystem here");
        assert!(!Subquery::equals(Property::Subsystem, "x").evaluate(&entry));
        assert!(!Subquery::contains(Property::Subsystem, "x").evaluate(&entry));
        assert!(Subquery::does_not_equal(Property::Subsystem, "x").evaluate(&entry));
        assert!(Subquery::does_not_contain(Property::Category, "x").evaluate(&entry));
    }

    #[test]
    fn test_empty_value_always_matches() {
        let entry = otter();
        let missing = Entry::log(Utc.timestamp_opt(0, 0).unwrap(), "");
        for property in Property::all() {
            for comparison in [
                Comparison::Contains,
                Comparison::Equals,
                Comparison::DoesNotContain,
                Comparison::DoesNotEqual,
            ] {
                let query = Subquery::property(*property, comparison, "");
                assert!(query.evaluate(&entry));
                assert!(query.evaluate(&missing));
            }
        }
    }

    #[test]
    fn test_log_levels() {
        let entry = otter();
        assert!(Subquery::levels([]).evaluate(&entry));
        assert!(Subquery::levels([LogLevel::Info, LogLevel::Error]).evaluate(&entry));
        assert!(!Subquery::levels([LogLevel::Fault]).evaluate(&entry));

        let activity = Entry::activity(Utc.timestamp_opt(0, 0).unwrap(), 1, "act");
        assert!(!Subquery::levels([LogLevel::Info]).evaluate(&activity));
        assert!(Subquery::levels([]).evaluate(&activity));
    }

    #[test]
    fn test_empty_compounds_are_vacuously_true() {
        let entry = otter();
        assert!(Subquery::and(vec![]).evaluate(&entry));
        assert!(Subquery::or(vec![]).evaluate(&entry));
    }

    #[test]
    fn test_compound_semantics() {
        let entry = otter();
        let hit = Subquery::contains(Property::Message, "roar");
        let miss = Subquery::contains(Property::Message, "meow");

        assert!(Subquery::and(vec![hit.clone(), hit.clone()]).evaluate(&entry));
        assert!(!Subquery::and(vec![hit.clone(), miss.clone()]).evaluate(&entry));
        assert!(Subquery::or(vec![miss.clone(), hit.clone()]).evaluate(&entry));
        assert!(!Subquery::or(vec![miss.clone(), miss]).evaluate(&entry));
    }

    #[test]
    fn test_optimize_preserves_evaluation() {
        let entries = vec![
            otter(),
            Entry::log(Utc.timestamp_opt(5, 0).unwrap(), "other").with_level(LogLevel::Error),
            Entry::activity(Utc.timestamp_opt(6, 0).unwrap(), 3, "activity"),
        ];
        let queries = vec![
            Subquery::and(vec![
                Subquery::contains(Property::Message, ""),
                Subquery::or(vec![
                    Subquery::levels([LogLevel::Error]),
                    Subquery::contains(Property::Subsystem, "jolly"),
                ]),
            ]),
            Subquery::or(vec![
                Subquery::levels([]),
                Subquery::does_not_contain(Property::Category, "load"),
            ]),
            Subquery::and(vec![Subquery::levels([]), Subquery::or(vec![])]),
        ];

        for query in &queries {
            for entry in &entries {
                match query.optimize() {
                    Some(optimized) => {
                        assert_eq!(query.evaluate(entry), optimized.evaluate(entry))
                    }
                    None => assert!(query.evaluate(entry)),
                }
            }
        }
    }
}
