//! Query Abstract Syntax Tree
//!
//! A query is a tree of [`Subquery`] nodes:
//!
//! ```text
//! Compound(AND | OR, [children])
//! Property(field, comparison, value)
//! LogLevel({levels})
//! ```
//!
//! Trees are values. Editing helpers return a new tree with one subtree
//! replaced; every node keeps a stable [`Uuid`] so front ends can diff and
//! reorder rows. Node ids never take part in equality or evaluation.

use crate::model::LogLevel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

/// How the children of a compound node combine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompoundVariant {
    And,
    Or,
}

impl std::fmt::Display for CompoundVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// Entry fields a property node can test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Property {
    Subsystem,
    Category,
    Message,
    Process,
    Pid,
    Sender,
    Activity,
    Thread,
}

impl Property {
    pub fn all() -> &'static [Property] {
        &[
            Property::Subsystem,
            Property::Category,
            Property::Message,
            Property::Process,
            Property::Pid,
            Property::Sender,
            Property::Activity,
            Property::Thread,
        ]
    }

    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "subsystem" => Some(Self::Subsystem),
            "category" => Some(Self::Category),
            "message" => Some(Self::Message),
            "process" => Some(Self::Process),
            "pid" => Some(Self::Pid),
            "sender" | "library" => Some(Self::Sender),
            "activity" => Some(Self::Activity),
            "thread" => Some(Self::Thread),
            _ => None,
        }
    }
}

impl std::fmt::Display for Property {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subsystem => write!(f, "subsystem"),
            Self::Category => write!(f, "category"),
            Self::Message => write!(f, "message"),
            Self::Process => write!(f, "process"),
            Self::Pid => write!(f, "pid"),
            Self::Sender => write!(f, "sender"),
            Self::Activity => write!(f, "activity"),
            Self::Thread => write!(f, "thread"),
        }
    }
}

/// Comparison applied by a property node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Comparison {
    Contains,
    Equals,
    DoesNotContain,
    DoesNotEqual,
}

impl Comparison {
    /// Whether this comparison matches entries that lack the field
    pub fn matches_missing(&self) -> bool {
        matches!(self, Self::DoesNotContain | Self::DoesNotEqual)
    }

    /// Operator token used by the text syntax
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Contains => "~",
            Self::Equals => "=",
            Self::DoesNotContain => "!~",
            Self::DoesNotEqual => "!=",
        }
    }

    /// Parse from an operator token
    pub fn from_symbol(s: &str) -> Option<Self> {
        match s {
            "~" => Some(Self::Contains),
            "=" | "==" => Some(Self::Equals),
            "!~" => Some(Self::DoesNotContain),
            "!=" | "<>" => Some(Self::DoesNotEqual),
            _ => None,
        }
    }
}

impl std::fmt::Display for Comparison {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Contains => write!(f, "contains"),
            Self::Equals => write!(f, "equals"),
            Self::DoesNotContain => write!(f, "doesNotContain"),
            Self::DoesNotEqual => write!(f, "doesNotEqual"),
        }
    }
}

/// The shape of a query node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubqueryKind {
    Compound {
        variant: CompoundVariant,
        children: Vec<Subquery>,
    },
    Property {
        property: Property,
        comparison: Comparison,
        value: String,
    },
    LogLevel {
        levels: BTreeSet<LogLevel>,
    },
}

/// One node of a query tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subquery {
    pub id: Uuid,
    #[serde(flatten)]
    pub kind: SubqueryKind,
}

impl PartialEq for Subquery {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Subquery {
    /// Wrap a node shape with a fresh identity
    pub fn new(kind: SubqueryKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
        }
    }

    pub fn compound(variant: CompoundVariant, children: Vec<Subquery>) -> Self {
        Self::new(SubqueryKind::Compound { variant, children })
    }

    pub fn and(children: Vec<Subquery>) -> Self {
        Self::compound(CompoundVariant::And, children)
    }

    pub fn or(children: Vec<Subquery>) -> Self {
        Self::compound(CompoundVariant::Or, children)
    }

    pub fn property(property: Property, comparison: Comparison, value: impl Into<String>) -> Self {
        Self::new(SubqueryKind::Property {
            property,
            comparison,
            value: value.into(),
        })
    }

    pub fn contains(property: Property, value: impl Into<String>) -> Self {
        Self::property(property, Comparison::Contains, value)
    }

    pub fn equals(property: Property, value: impl Into<String>) -> Self {
        Self::property(property, Comparison::Equals, value)
    }

    pub fn does_not_contain(property: Property, value: impl Into<String>) -> Self {
        Self::property(property, Comparison::DoesNotContain, value)
    }

    pub fn does_not_equal(property: Property, value: impl Into<String>) -> Self {
        Self::property(property, Comparison::DoesNotEqual, value)
    }

    pub fn levels(levels: impl IntoIterator<Item = LogLevel>) -> Self {
        Self::new(SubqueryKind::LogLevel {
            levels: levels.into_iter().collect(),
        })
    }

    /// Drop everything that does not constrain the result.
    ///
    /// Property nodes with an empty value and level nodes with an empty set
    /// disappear; a compound left with no children disappears; a compound
    /// left with one child becomes that child. An OR with an unconstrained
    /// child disappears as a whole. `None` means "matches everything".
    pub fn optimize(&self) -> Option<Subquery> {
        match &self.kind {
            SubqueryKind::Property { value, .. } => {
                if value.is_empty() {
                    None
                } else {
                    Some(self.clone())
                }
            }
            SubqueryKind::LogLevel { levels } => {
                if levels.is_empty() {
                    None
                } else {
                    Some(self.clone())
                }
            }
            SubqueryKind::Compound { variant, children } => {
                let optimized: Vec<Option<Subquery>> =
                    children.iter().map(Subquery::optimize).collect();
                // An unconstrained child makes an OR match everything
                if *variant == CompoundVariant::Or && optimized.iter().any(Option::is_none) {
                    return None;
                }
                let mut survivors: Vec<Subquery> = optimized.into_iter().flatten().collect();
                match survivors.len() {
                    0 => None,
                    1 => survivors.pop(),
                    _ => Some(Subquery {
                        id: self.id,
                        kind: SubqueryKind::Compound {
                            variant: *variant,
                            children: survivors,
                        },
                    }),
                }
            }
        }
    }

    /// Structural signature without literal filter text.
    ///
    /// Two queries that differ only in what the user typed share a
    /// signature, which makes it usable as a grouping key in logs.
    pub fn signature(&self) -> String {
        match &self.kind {
            SubqueryKind::Compound { variant, children } => {
                let inner: Vec<String> = children.iter().map(Subquery::signature).collect();
                format!("{}({})", variant, inner.join(","))
            }
            SubqueryKind::Property {
                property,
                comparison,
                ..
            } => format!("{} {}", property, comparison),
            SubqueryKind::LogLevel { levels } => {
                let names: Vec<String> = levels.iter().map(|l| l.to_string()).collect();
                format!("level[{}]", names.join(","))
            }
        }
    }

    /// Find a node by identity
    pub fn find(&self, id: Uuid) -> Option<&Subquery> {
        if self.id == id {
            return Some(self);
        }
        match &self.kind {
            SubqueryKind::Compound { children, .. } => {
                children.iter().find_map(|child| child.find(id))
            }
            _ => None,
        }
    }

    /// Return a copy of this tree with the node `id` replaced by `replacement`
    pub fn replacing(&self, id: Uuid, replacement: &Subquery) -> Subquery {
        if self.id == id {
            return replacement.clone();
        }
        match &self.kind {
            SubqueryKind::Compound { variant, children } => Subquery {
                id: self.id,
                kind: SubqueryKind::Compound {
                    variant: *variant,
                    children: children
                        .iter()
                        .map(|child| child.replacing(id, replacement))
                        .collect(),
                },
            },
            _ => self.clone(),
        }
    }

    /// Return a copy of this tree without the node `id`.
    ///
    /// Removing the root yields `None`.
    pub fn removing(&self, id: Uuid) -> Option<Subquery> {
        if self.id == id {
            return None;
        }
        match &self.kind {
            SubqueryKind::Compound { variant, children } => Some(Subquery {
                id: self.id,
                kind: SubqueryKind::Compound {
                    variant: *variant,
                    children: children.iter().filter_map(|c| c.removing(id)).collect(),
                },
            }),
            _ => Some(self.clone()),
        }
    }

    /// Number of nodes in the tree
    pub fn node_count(&self) -> usize {
        match &self.kind {
            SubqueryKind::Compound { children, .. } => {
                1 + children.iter().map(Subquery::node_count).sum::<usize>()
            }
            _ => 1,
        }
    }
}

/// Renders the text syntax accepted by [`crate::query::parse_query`]
impl std::fmt::Display for Subquery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            SubqueryKind::Compound { variant, children } => {
                write!(f, "(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", variant)?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            SubqueryKind::Property {
                property,
                comparison,
                value,
            } => write!(
                f,
                "{} {} \"{}\"",
                property,
                comparison.symbol(),
                value.replace('\\', "\\\\").replace('"', "\\\"")
            ),
            SubqueryKind::LogLevel { levels } => {
                let names: Vec<String> = levels.iter().map(|l| l.to_string()).collect();
                write!(f, "level:{}", names.join(","))
            }
        }
    }
}
