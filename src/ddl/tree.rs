//! Parse tree over a single DDL statement
//!
//! The tree owns the token stream; nodes only carry token index spans. Rules
//! query nodes by kind and record token rewrites, which are applied when the
//! statement is serialized.

use super::lexer::{Token, TokenKind};
use std::collections::VecDeque;
use std::ops::Range;

/// Every production the parser can emit. Rules match on this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    CreateTable,
    CreateView,
    AlterTable,
    DropTable,
    DropView,

    TableName,
    ViewName,
    ColumnName,
    IndexName,
    ForeignKeySymbol,

    /// `name column_definition` inside CREATE TABLE or `ADD (..)`
    ColumnSpec,
    ColumnDefinition,
    DataType(DataTypeKind),
    /// Parenthesized literal list of an ENUM/SET type
    StringList,
    NullStatus(Nullability),
    DefaultValue,
    CharsetName(CharsetKind),
    Collation,
    ColumnPosition,

    /// Index, key or constraint shared between CREATE and ALTER
    Constraint(ConstraintKind),
    ReferenceDefinition,

    AlterCommands,
    AlterSpec(AlterSpecKind),

    TableOptions,
    TableOption(TableOptionKind),

    PartitionOptions(PartitionOptionKind),
    PartitionDefinition,
    PartitionValuesLessThan,
    NodeGroup,

    ViewBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataTypeKind {
    Enum,
    Set,
    Spatial,
    Scalar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nullability {
    Null,
    NotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharsetKind {
    /// The `DEFAULT` keyword in place of a name
    Default,
    Named,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    PrimaryKey,
    Index,
    Unique,
    Fulltext,
    Spatial,
    ForeignKey,
    Check,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlterSpecKind {
    TableOptions,
    AddColumn,
    AddColumns,
    AddConstraint,
    AddPartition,
    AlterColumnDefault,
    ChangeColumn,
    ModifyColumn,
    DropColumn,
    DropPrimaryKey,
    DropIndex,
    DropForeignKey,
    DropPartition,
    DisableKeys,
    EnableKeys,
    Tablespace,
    Rename,
    OrderBy,
    ConvertCharset,
    CharsetCollate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableOptionKind {
    CharacterSet,
    Collate,
    Connection,
    DataDirectory,
    IndexDirectory,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionOptionKind {
    PartitionBy,
    RemovePartitioning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub kind: NodeKind,
    /// Token indices covered by this node
    pub span: Range<usize>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(kind: NodeKind, span: Range<usize>, children: Vec<Node>) -> Self {
        Self {
            kind,
            span,
            children,
        }
    }

    /// This node and all descendants matching `pred`, in pre-order
    pub fn find_all(&self, pred: impl Fn(NodeKind) -> bool) -> Vec<&Node> {
        let mut found = Vec::new();
        self.collect(&pred, &mut found);
        found
    }

    fn collect<'a>(&'a self, pred: &impl Fn(NodeKind) -> bool, found: &mut Vec<&'a Node>) {
        if pred(self.kind) {
            found.push(self);
        }
        for child in &self.children {
            child.collect(pred, found);
        }
    }

    /// Shallowest descendant matching `pred` (breadth-first, left to right)
    pub fn find_top(&self, pred: impl Fn(NodeKind) -> bool) -> Option<&Node> {
        let mut queue: VecDeque<&Node> = self.children.iter().collect();
        while let Some(node) = queue.pop_front() {
            if pred(node.kind) {
                return Some(node);
            }
            queue.extend(node.children.iter());
        }
        None
    }

    /// Leftmost descendant matching `pred` (pre-order, self excluded)
    pub fn find_left(&self, pred: impl Fn(NodeKind) -> bool) -> Option<&Node> {
        self.leftmost(&pred)
    }

    fn leftmost(&self, pred: &dyn Fn(NodeKind) -> bool) -> Option<&Node> {
        for child in &self.children {
            if pred(child.kind) {
                return Some(child);
            }
            if let Some(found) = child.leftmost(pred) {
                return Some(found);
            }
        }
        None
    }

    /// Direct children matching `pred`
    pub fn children_of(&self, pred: impl Fn(NodeKind) -> bool) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(move |c| pred(c.kind))
    }
}

/// A token edit recorded by a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rewrite {
    /// Replace the text of one token
    Replace { index: usize, text: String },
    /// Serialize the token without a separating space before it
    Tighten { index: usize },
}

#[derive(Debug, Clone)]
pub struct ParseTree {
    tokens: Vec<Token>,
    /// `tight[i]` means no space is emitted before token `i`
    tight: Vec<bool>,
    root: Node,
}

impl ParseTree {
    pub fn new(tokens: Vec<Token>, tight: Vec<bool>, root: Node) -> Self {
        Self {
            tokens,
            tight,
            root,
        }
    }

    pub fn root(&self) -> &Node {
        &self.root
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Tokens covered by `node`
    pub fn node_tokens(&self, node: &Node) -> &[Token] {
        &self.tokens[node.span.clone()]
    }

    /// Raw text of `node`
    pub fn text(&self, node: &Node) -> String {
        self.node_tokens(node).iter().map(|t| t.text.as_str()).collect()
    }

    /// Index of the last identifier token inside `node`
    pub fn name_token(&self, node: &Node) -> Option<usize> {
        node.span
            .clone()
            .rev()
            .find(|&i| self.tokens[i].is_identifier())
    }

    /// Unquoted name of a name node (`db`.`tbl` yields `tbl`)
    pub fn norm_name(&self, node: &Node) -> String {
        self.name_token(node)
            .map(|i| self.tokens[i].identifier())
            .unwrap_or_default()
    }

    /// String members of a literal list node
    pub fn list_items(&self, node: &Node) -> Vec<&Token> {
        self.node_tokens(node).iter().filter(|t| t.is_string()).collect()
    }

    /// Inner text of a parenthesized list with trivia dropped: `( 'a', 'b' )` gives `'a','b'`
    pub fn compact_list(&self, node: &Node) -> String {
        let significant: Vec<&Token> = self
            .node_tokens(node)
            .iter()
            .filter(|t| !t.is_trivia())
            .collect();
        let inner = match significant.as_slice() {
            [first, inner @ .., last] if first.is_punct("(") && last.is_punct(")") => inner,
            all => all,
        };
        inner.iter().map(|t| t.text.as_str()).collect()
    }

    /// Indices of the significant tokens inside `node`
    pub fn significant(&self, node: &Node) -> Vec<usize> {
        node.span
            .clone()
            .filter(|&i| self.tokens[i].kind != TokenKind::Trivia)
            .collect()
    }

    pub fn apply(&mut self, rewrites: &[Rewrite]) {
        for rewrite in rewrites {
            match rewrite {
                Rewrite::Replace { index, text } => {
                    if let Some(token) = self.tokens.get_mut(*index) {
                        token.text = text.clone();
                    }
                }
                Rewrite::Tighten { index } => {
                    if let Some(tight) = self.tight.get_mut(*index) {
                        *tight = true;
                    }
                }
            }
        }
    }

    /// Significant tokens joined by single spaces, honoring tight tokens
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        for (i, token) in self.tokens.iter().enumerate() {
            if token.is_trivia() {
                continue;
            }
            if !out.is_empty() && !self.tight.get(i).copied().unwrap_or(false) {
                out.push(' ');
            }
            out.push_str(&token.text);
        }
        out
    }
}
