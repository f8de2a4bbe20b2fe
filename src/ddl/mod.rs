//! DDL classification
//!
//! Turns a single CREATE/ALTER/DROP statement into a [`Classification`]:
//! what it does, which object it targets, and how it can safely be run.
//!
//! 1. **Lexer**: lossless token stream (trivia included)
//! 2. **Parser**: typed parse tree over the supported DDL subset
//! 3. **Classifier**: rule walk over the tree, consulting injected [`Checkers`]

pub mod checkers;
pub mod classifier;
pub mod lexer;
pub mod parser;
pub mod tree;

pub use checkers::{Checkers, ColumnInfo};
pub use classifier::{classify_sql, Classifier};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while parsing or classifying a statement
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassifyError {
    /// The text does not match the supported grammar
    #[error("{0}")]
    Syntax(String),

    /// A recognized construct that is not allowed
    #[error("{0}")]
    Validation(String),

    /// No rule determined a run type. Always a defect in the rule table.
    #[error("{0}")]
    Internal(String),
}

impl ClassifyError {
    pub fn code(&self) -> &'static str {
        match self {
            ClassifyError::Syntax(_) => "SYNTAX_ERROR",
            ClassifyError::Validation(_) => "VALIDATION_ERROR",
            ClassifyError::Internal(_) => "INTERNAL_CLASSIFICATION_ERROR",
        }
    }
}

pub(crate) fn syntax_error(msg: impl Into<String>) -> ClassifyError {
    ClassifyError::Syntax(msg.into())
}

pub(crate) fn validation_error(msg: impl Into<String>) -> ClassifyError {
    ClassifyError::Validation(msg.into())
}

/// What the statement does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlAction {
    Create,
    Drop,
    Alter,
}

/// What kind of object the statement targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DdlMode {
    Table,
    View,
}

/// Final run-type produced by the classifier.
///
/// The `Maybe*` variants are ambiguous and must be resolved by an operator
/// when the migration is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedRun {
    Short,
    Long,
    MaybeShort,
    MaybeNoCheckAlter,
}

/// Result of classifying one statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Rewritten, whitespace-normalized statement
    pub statement: String,
    pub run: ClassifiedRun,
    /// First target name
    pub table: String,
    pub table_names: Vec<String>,
    pub mode: DdlMode,
    pub action: DdlAction,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

pub(crate) use text_enum;

text_enum!(DdlAction {
    Create => "create",
    Drop => "drop",
    Alter => "alter",
});

text_enum!(DdlMode {
    Table => "table",
    View => "view",
});

text_enum!(ClassifiedRun {
    Short => "short",
    Long => "long",
    MaybeShort => "maybe_short",
    MaybeNoCheckAlter => "maybe_no_check_alter",
});
