//! Recursive-descent parser for CREATE/ALTER/DROP TABLE and CREATE/DROP VIEW
//!
//! The grammar is intentionally narrow: anything outside the supported
//! subset is a syntax error rather than a best-effort guess.

use super::lexer::{tokenize, Token, TokenKind};
use super::tree::{
    AlterSpecKind, CharsetKind, ConstraintKind, DataTypeKind, Node, NodeKind, Nullability,
    ParseTree, PartitionOptionKind, TableOptionKind,
};
use super::{syntax_error, ClassifyError};

type PResult<T> = Result<T, ClassifyError>;

/// Words that cannot be used as unquoted identifiers
const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BIGINT", "BINARY", "BLOB", "BY",
    "CASCADE", "CHANGE", "CHAR", "CHARACTER", "CHECK", "COLLATE", "COLUMN", "CONSTRAINT",
    "CONVERT", "CREATE", "DECIMAL", "DEFAULT", "DELETE", "DESC", "DOUBLE", "DROP", "EXISTS",
    "FLOAT", "FOREIGN", "FROM", "FULLTEXT", "IF", "IGNORE", "IN", "INDEX", "INSERT", "INT",
    "INTEGER", "INTO", "IS", "KEY", "KEYS", "LIKE", "LONGBLOB", "LONGTEXT", "MEDIUMBLOB",
    "MEDIUMINT", "MEDIUMTEXT", "NOT", "NULL", "NUMERIC", "ON", "OR", "ORDER", "PARTITION",
    "PRIMARY", "REAL", "REFERENCES", "RENAME", "REPLACE", "RESTRICT", "SELECT", "SET",
    "SMALLINT", "SPATIAL", "TABLE", "TINYBLOB", "TINYINT", "TINYTEXT", "TO", "UNIQUE",
    "UNSIGNED", "UPDATE", "USING", "VARBINARY", "VARCHAR", "WHERE", "WITH", "ZEROFILL",
];

const SCALAR_TYPES: &[&str] = &[
    "BIT", "TINYINT", "SMALLINT", "MEDIUMINT", "INT", "INTEGER", "BIGINT", "SERIAL", "BOOL",
    "BOOLEAN", "REAL", "DOUBLE", "FLOAT", "DECIMAL", "DEC", "NUMERIC", "FIXED", "DATE", "TIME",
    "TIMESTAMP", "DATETIME", "YEAR", "CHAR", "CHARACTER", "VARCHAR", "NCHAR", "NVARCHAR",
    "NATIONAL", "BINARY", "VARBINARY", "TINYBLOB", "BLOB", "MEDIUMBLOB", "LONGBLOB", "TINYTEXT",
    "TEXT", "MEDIUMTEXT", "LONGTEXT", "LONG", "JSON",
];

const SPATIAL_TYPES: &[&str] = &[
    "GEOMETRY",
    "POINT",
    "LINESTRING",
    "POLYGON",
    "MULTIPOINT",
    "MULTILINESTRING",
    "MULTIPOLYGON",
    "GEOMETRYCOLLECTION",
];

const GENERIC_TABLE_OPTIONS: &[&str] = &[
    "ENGINE",
    "AUTO_INCREMENT",
    "AVG_ROW_LENGTH",
    "CHECKSUM",
    "COMMENT",
    "COMPRESSION",
    "DELAY_KEY_WRITE",
    "ENCRYPTION",
    "INSERT_METHOD",
    "KEY_BLOCK_SIZE",
    "MAX_ROWS",
    "MIN_ROWS",
    "PACK_KEYS",
    "PASSWORD",
    "ROW_FORMAT",
    "STATS_AUTO_RECALC",
    "STATS_PERSISTENT",
    "STATS_SAMPLE_PAGES",
    "TABLESPACE",
];

fn is_reserved(word: &str) -> bool {
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(word))
}

fn is_identifier_token(token: &Token) -> bool {
    match token.kind {
        TokenKind::QuotedIdent => true,
        TokenKind::Word => !is_reserved(&token.text),
        _ => false,
    }
}

/// Parse one statement into a [`ParseTree`]
pub fn parse(sql: &str) -> PResult<ParseTree> {
    let tokens = tokenize(sql)?;
    let (root, tight) = {
        let mut parser = Parser::new(&tokens);
        let root = parser.statement()?;
        (root, parser.tight)
    };
    Ok(ParseTree::new(tokens, tight, root))
}

struct Parser<'t> {
    tokens: &'t [Token],
    /// Indices of the non-trivia tokens
    sig: Vec<usize>,
    cursor: usize,
    tight: Vec<bool>,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        let sig = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.is_trivia())
            .map(|(i, _)| i)
            .collect();
        Self {
            tokens,
            sig,
            cursor: 0,
            tight: vec![false; tokens.len()],
        }
    }

    // ------------------------------------------------------------------
    // Cursor helpers
    // ------------------------------------------------------------------

    fn peek_nth(&self, n: usize) -> Option<&'t Token> {
        let tokens = self.tokens;
        self.sig.get(self.cursor + n).map(|&i| &tokens[i])
    }

    fn peek(&self) -> Option<&'t Token> {
        self.peek_nth(0)
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.sig.len()
    }

    fn bump(&mut self) -> PResult<usize> {
        match self.sig.get(self.cursor) {
            Some(&index) => {
                self.cursor += 1;
                Ok(index)
            }
            None => Err(self.unexpected()),
        }
    }

    fn unexpected(&self) -> ClassifyError {
        match self.peek() {
            Some(token) => syntax_error(format!("syntax error near '{}'", token.text)),
            None => syntax_error("unexpected end of statement"),
        }
    }

    fn at_kw_nth(&self, n: usize, keyword: &str) -> bool {
        self.peek_nth(n).is_some_and(|t| t.is_keyword(keyword))
    }

    fn at_kw(&self, keyword: &str) -> bool {
        self.at_kw_nth(0, keyword)
    }

    fn at_any_kw(&self, keywords: &[&str]) -> bool {
        keywords.iter().any(|kw| self.at_kw(kw))
    }

    fn at_seq_from(&self, n: usize, keywords: &[&str]) -> bool {
        keywords
            .iter()
            .enumerate()
            .all(|(offset, kw)| self.at_kw_nth(n + offset, kw))
    }

    fn at_seq(&self, keywords: &[&str]) -> bool {
        self.at_seq_from(0, keywords)
    }

    fn eat_kw(&mut self, keyword: &str) -> bool {
        if self.at_kw(keyword) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn eat_seq(&mut self, keywords: &[&str]) -> bool {
        if self.at_seq(keywords) {
            self.cursor += keywords.len();
            true
        } else {
            false
        }
    }

    fn expect_kw(&mut self, keyword: &str) -> PResult<()> {
        if self.eat_kw(keyword) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn expect_seq(&mut self, keywords: &[&str]) -> PResult<()> {
        for kw in keywords {
            self.expect_kw(kw)?;
        }
        Ok(())
    }

    fn at_punct(&self, punct: &str) -> bool {
        self.peek().is_some_and(|t| t.is_punct(punct))
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.at_punct(punct) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> PResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn eat_equals(&mut self) {
        self.eat_punct("=");
    }

    fn mark(&self) -> usize {
        self.cursor
    }

    /// Close a node that started at cursor position `start`
    fn node(&self, kind: NodeKind, start: usize, children: Vec<Node>) -> Node {
        let span = if self.cursor > start {
            self.sig[start]..self.sig[self.cursor - 1] + 1
        } else {
            let at = self.sig.get(start).copied().unwrap_or(self.tokens.len());
            at..at
        };
        Node::new(kind, span, children)
    }

    /// Consume a balanced parenthesized group without interpreting it
    fn parenthesized(&mut self) -> PResult<()> {
        self.expect_punct("(")?;
        let mut depth = 1usize;
        while depth > 0 {
            let index = self.bump()?;
            let token = &self.tokens[index];
            if token.is_punct("(") {
                depth += 1;
            } else if token.is_punct(")") {
                depth -= 1;
            }
        }
        Ok(())
    }

    fn string_literal(&mut self) -> PResult<()> {
        match self.peek() {
            Some(t) if t.is_string() => self.bump().map(|_| ()),
            _ => Err(self.unexpected()),
        }
    }

    /// A single non-punctuation token: `InnoDB`, `0`, `'text'`, `DEFAULT`
    fn option_value(&mut self) -> PResult<()> {
        match self.peek() {
            Some(t) if t.kind != TokenKind::Punct => self.bump().map(|_| ()),
            _ => Err(self.unexpected()),
        }
    }

    /// Literal after DEFAULT or ON UPDATE
    fn literal_value(&mut self) -> PResult<()> {
        if self.at_punct("(") {
            return self.parenthesized();
        }
        if self.at_punct("-") || self.at_punct("+") {
            self.bump()?;
        }
        let token = self.peek().ok_or_else(|| self.unexpected())?;
        match token.kind {
            TokenKind::SingleQuoted | TokenKind::DoubleQuoted | TokenKind::Number => {
                self.bump()?;
            }
            TokenKind::Word if token.is_keyword("NULL") || !is_reserved(&token.text) => {
                self.bump()?;
                if self.at_punct("(") {
                    self.parenthesized()?;
                } else if self.peek().is_some_and(|t| t.is_string()) {
                    // b'0101', x'ff', _utf8'text'
                    self.bump()?;
                }
            }
            _ => return Err(self.unexpected()),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn at_identifier(&self) -> bool {
        self.peek().is_some_and(is_identifier_token)
    }

    fn identifier(&mut self) -> PResult<usize> {
        if self.at_identifier() {
            self.bump()
        } else {
            Err(self.unexpected())
        }
    }

    /// `name` or `db.name`
    fn name(&mut self, kind: NodeKind) -> PResult<Node> {
        let start = self.mark();
        self.identifier()?;
        if self.at_punct(".") {
            let dot = self.bump()?;
            self.tight[dot] = true;
            let second = self.identifier()?;
            self.tight[second] = true;
        }
        Ok(self.node(kind, start, Vec::new()))
    }

    fn simple_name(&mut self, kind: NodeKind) -> PResult<Node> {
        let start = self.mark();
        self.identifier()?;
        Ok(self.node(kind, start, Vec::new()))
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self) -> PResult<Node> {
        let statement = if self.at_kw("CREATE") {
            self.create()?
        } else if self.at_kw("ALTER") {
            self.alter_table()?
        } else if self.at_kw("DROP") {
            self.drop()?
        } else {
            return Err(self.unexpected());
        };

        self.eat_punct(";");
        if !self.at_end() {
            return Err(self.unexpected());
        }
        Ok(statement)
    }

    fn create(&mut self) -> PResult<Node> {
        let start = self.mark();
        self.expect_kw("CREATE")?;
        if self.at_kw("TEMPORARY") || self.at_kw("TABLE") {
            self.create_table(start)
        } else {
            self.create_view(start)
        }
    }

    fn create_table(&mut self, start: usize) -> PResult<Node> {
        self.eat_kw("TEMPORARY");
        self.expect_kw("TABLE")?;
        self.eat_seq(&["IF", "NOT", "EXISTS"]);

        let mut children = vec![self.name(NodeKind::TableName)?];

        if self.eat_kw("LIKE") {
            children.push(self.name(NodeKind::TableName)?);
            return Ok(self.node(NodeKind::CreateTable, start, children));
        }

        self.expect_punct("(")?;
        if self.eat_kw("LIKE") {
            children.push(self.name(NodeKind::TableName)?);
            self.expect_punct(")")?;
            return Ok(self.node(NodeKind::CreateTable, start, children));
        }
        loop {
            children.push(self.create_definition()?);
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;

        if self.at_table_option() {
            children.push(self.table_options(true)?);
        }
        if let Some(partitions) = self.partition_options()? {
            children.push(partitions);
        }
        Ok(self.node(NodeKind::CreateTable, start, children))
    }

    fn create_view(&mut self, start: usize) -> PResult<Node> {
        if self.eat_kw("OR") {
            self.expect_kw("REPLACE")?;
        }
        if self.eat_kw("ALGORITHM") {
            self.expect_punct("=")?;
            self.option_value()?;
        }
        if self.eat_kw("DEFINER") {
            self.expect_punct("=")?;
            self.definer()?;
        }
        if self.eat_seq(&["SQL", "SECURITY"]) {
            self.option_value()?;
        }
        self.expect_kw("VIEW")?;

        let mut children = vec![self.name(NodeKind::ViewName)?];
        if self.eat_punct("(") {
            loop {
                children.push(self.simple_name(NodeKind::ColumnName)?);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
        }
        self.expect_kw("AS")?;
        children.push(self.view_body()?);
        Ok(self.node(NodeKind::CreateView, start, children))
    }

    fn definer(&mut self) -> PResult<()> {
        if self.eat_kw("CURRENT_USER") {
            if self.eat_punct("(") {
                self.expect_punct(")")?;
            }
            return Ok(());
        }
        self.option_value()?;
        if self.eat_punct("@") {
            self.option_value()?;
        }
        Ok(())
    }

    /// Everything after AS, minus a trailing `;`
    fn view_body(&mut self) -> PResult<Node> {
        let start = self.mark();
        let mut end = self.sig.len();
        if end > self.cursor && self.tokens[self.sig[end - 1]].is_punct(";") {
            end -= 1;
        }
        if end <= self.cursor {
            return Err(self.unexpected());
        }
        self.cursor = end;
        Ok(self.node(NodeKind::ViewBody, start, Vec::new()))
    }

    fn drop(&mut self) -> PResult<Node> {
        let start = self.mark();
        self.expect_kw("DROP")?;
        let (kind, name_kind) = if self.eat_kw("VIEW") {
            (NodeKind::DropView, NodeKind::ViewName)
        } else {
            self.eat_kw("TEMPORARY");
            self.expect_kw("TABLE")?;
            (NodeKind::DropTable, NodeKind::TableName)
        };
        self.eat_seq(&["IF", "EXISTS"]);

        let mut children = Vec::new();
        loop {
            children.push(self.name(name_kind)?);
            if !self.eat_punct(",") {
                break;
            }
        }
        if !self.eat_kw("RESTRICT") {
            self.eat_kw("CASCADE");
        }
        Ok(self.node(kind, start, children))
    }

    fn alter_table(&mut self) -> PResult<Node> {
        let start = self.mark();
        self.expect_kw("ALTER")?;
        if !self.eat_kw("ONLINE") {
            self.eat_kw("OFFLINE");
        }
        self.eat_kw("IGNORE");
        self.expect_kw("TABLE")?;

        let mut children = vec![self.name(NodeKind::TableName)?];
        children.push(self.alter_commands()?);
        if let Some(partitions) = self.partition_options()? {
            children.push(partitions);
        }
        Ok(self.node(NodeKind::AlterTable, start, children))
    }

    // ------------------------------------------------------------------
    // ALTER specifications
    // ------------------------------------------------------------------

    fn at_partition_options(&self) -> bool {
        self.at_seq(&["REMOVE", "PARTITIONING"]) || self.at_seq(&["PARTITION", "BY"])
    }

    fn alter_commands(&mut self) -> PResult<Node> {
        let start = self.mark();
        let mut specs = Vec::new();
        if !(self.at_end() || self.at_punct(";") || self.at_partition_options()) {
            loop {
                specs.push(self.alter_spec()?);
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        Ok(self.node(NodeKind::AlterCommands, start, specs))
    }

    fn alter_spec(&mut self) -> PResult<Node> {
        use AlterSpecKind::*;

        let start = self.mark();
        let mut children = Vec::new();

        let kind = if self.eat_kw("ADD") {
            if self.eat_kw("PARTITION") {
                self.expect_punct("(")?;
                loop {
                    children.push(self.partition_definition()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                AddPartition
            } else if self.at_constraint_start() {
                children.push(self.constraint()?);
                AddConstraint
            } else {
                self.eat_kw("COLUMN");
                if self.eat_punct("(") {
                    loop {
                        children.push(self.column_spec()?);
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                    self.expect_punct(")")?;
                    AddColumns
                } else {
                    children.push(self.column_spec()?);
                    children.extend(self.column_position()?);
                    AddColumn
                }
            }
        } else if self.eat_kw("ALTER") {
            self.eat_kw("COLUMN");
            children.push(self.simple_name(NodeKind::ColumnName)?);
            if self.eat_seq(&["SET", "DEFAULT"]) {
                self.literal_value()?;
            } else {
                self.expect_seq(&["DROP", "DEFAULT"])?;
            }
            AlterColumnDefault
        } else if self.eat_kw("CHANGE") {
            self.eat_kw("COLUMN");
            children.push(self.simple_name(NodeKind::ColumnName)?);
            children.push(self.simple_name(NodeKind::ColumnName)?);
            children.push(self.column_definition()?);
            children.extend(self.column_position()?);
            ChangeColumn
        } else if self.eat_kw("MODIFY") {
            self.eat_kw("COLUMN");
            children.push(self.simple_name(NodeKind::ColumnName)?);
            children.push(self.column_definition()?);
            children.extend(self.column_position()?);
            ModifyColumn
        } else if self.eat_kw("DROP") {
            if self.eat_seq(&["PRIMARY", "KEY"]) {
                DropPrimaryKey
            } else if self.eat_seq(&["FOREIGN", "KEY"]) {
                children.push(self.simple_name(NodeKind::ForeignKeySymbol)?);
                DropForeignKey
            } else if self.eat_kw("INDEX") || self.eat_kw("KEY") {
                children.push(self.simple_name(NodeKind::IndexName)?);
                DropIndex
            } else if self.eat_kw("PARTITION") {
                self.identifier()?;
                // further names only when the list clearly continues
                while self.at_punct(",")
                    && self.peek_nth(1).is_some_and(is_identifier_token)
                    && (self.peek_nth(2).is_none()
                        || self.peek_nth(2).is_some_and(|t| t.is_punct(",") || t.is_punct(";")))
                {
                    self.bump()?;
                    self.identifier()?;
                }
                DropPartition
            } else {
                self.eat_kw("COLUMN");
                children.push(self.simple_name(NodeKind::ColumnName)?);
                DropColumn
            }
        } else if self.eat_seq(&["DISABLE", "KEYS"]) {
            DisableKeys
        } else if self.eat_seq(&["ENABLE", "KEYS"]) {
            EnableKeys
        } else if self.eat_kw("DISCARD") || self.eat_kw("IMPORT") {
            self.expect_kw("TABLESPACE")?;
            Tablespace
        } else if self.eat_kw("RENAME") {
            if self.eat_kw("INDEX") || self.eat_kw("KEY") {
                children.push(self.simple_name(NodeKind::IndexName)?);
                self.expect_kw("TO")?;
                children.push(self.simple_name(NodeKind::IndexName)?);
            } else if self.eat_kw("COLUMN") {
                children.push(self.simple_name(NodeKind::ColumnName)?);
                self.expect_kw("TO")?;
                children.push(self.simple_name(NodeKind::ColumnName)?);
            } else {
                if !self.eat_kw("TO") {
                    self.eat_kw("AS");
                }
                children.push(self.name(NodeKind::TableName)?);
            }
            Rename
        } else if self.eat_seq(&["ORDER", "BY"]) {
            loop {
                children.push(self.simple_name(NodeKind::ColumnName)?);
                if !self.eat_kw("ASC") {
                    self.eat_kw("DESC");
                }
                if !self.eat_punct(",") {
                    break;
                }
            }
            OrderBy
        } else if self.eat_kw("CONVERT") {
            self.expect_kw("TO")?;
            children.push(self.charset_clause()?);
            if self.eat_kw("COLLATE") {
                self.eat_equals();
                children.push(self.collation()?);
            }
            ConvertCharset
        } else if self.at_alter_charset() {
            self.eat_kw("DEFAULT");
            if self.at_charset_clause() {
                children.push(self.charset_clause()?);
            }
            if self.eat_kw("COLLATE") {
                self.eat_equals();
                children.push(self.collation()?);
            }
            CharsetCollate
        } else if self.at_table_option() {
            children.push(self.table_options(false)?);
            TableOptions
        } else {
            return Err(self.unexpected());
        };

        Ok(self.node(NodeKind::AlterSpec(kind), start, children))
    }

    fn at_alter_charset(&self) -> bool {
        self.at_charset_clause()
            || self.at_kw("COLLATE")
            || (self.at_kw("DEFAULT")
                && (self.at_seq_from(1, &["CHARACTER", "SET"])
                    || self.at_kw_nth(1, "CHARSET")
                    || self.at_kw_nth(1, "COLLATE")))
    }

    fn column_position(&mut self) -> PResult<Option<Node>> {
        let start = self.mark();
        if self.eat_kw("FIRST") {
            return Ok(Some(self.node(NodeKind::ColumnPosition, start, Vec::new())));
        }
        if self.eat_kw("AFTER") {
            let column = self.simple_name(NodeKind::ColumnName)?;
            return Ok(Some(self.node(NodeKind::ColumnPosition, start, vec![column])));
        }
        Ok(None)
    }

    // ------------------------------------------------------------------
    // Columns
    // ------------------------------------------------------------------

    fn create_definition(&mut self) -> PResult<Node> {
        if self.at_constraint_start() {
            self.constraint()
        } else {
            self.column_spec()
        }
    }

    fn column_spec(&mut self) -> PResult<Node> {
        let start = self.mark();
        let name = self.simple_name(NodeKind::ColumnName)?;
        let definition = self.column_definition()?;
        Ok(self.node(NodeKind::ColumnSpec, start, vec![name, definition]))
    }

    fn column_definition(&mut self) -> PResult<Node> {
        let start = self.mark();
        let mut children = vec![self.data_type()?];

        loop {
            let attr = self.mark();
            if self.eat_seq(&["NOT", "NULL"]) {
                children.push(self.node(NodeKind::NullStatus(Nullability::NotNull), attr, Vec::new()));
            } else if self.eat_kw("NULL") {
                children.push(self.node(NodeKind::NullStatus(Nullability::Null), attr, Vec::new()));
            } else if self.eat_kw("DEFAULT") {
                self.literal_value()?;
                children.push(self.node(NodeKind::DefaultValue, attr, Vec::new()));
            } else if self.at_charset_clause() {
                children.push(self.charset_clause()?);
            } else if self.eat_kw("COLLATE") {
                children.push(self.collation()?);
            } else if self.at_kw("REFERENCES") {
                children.push(self.reference_definition()?);
            } else if self.eat_kw("UNIQUE") {
                self.eat_kw("KEY");
            } else if self.eat_kw("COMMENT") {
                self.string_literal()?;
            } else if self.eat_kw("COLUMN_FORMAT") || self.eat_kw("STORAGE") {
                self.option_value()?;
            } else if self.eat_seq(&["ON", "UPDATE"]) {
                self.literal_value()?;
            } else if self.eat_seq(&["GENERATED", "ALWAYS"]) || self.at_kw("AS") {
                self.expect_kw("AS")?;
                self.parenthesized()?;
                if !self.eat_kw("VIRTUAL") {
                    self.eat_kw("STORED");
                }
            } else if !(self.eat_kw("AUTO_INCREMENT")
                || self.eat_seq(&["PRIMARY", "KEY"])
                || self.eat_kw("KEY")
                || self.eat_kw("VISIBLE")
                || self.eat_kw("INVISIBLE"))
            {
                break;
            }
        }

        Ok(self.node(NodeKind::ColumnDefinition, start, children))
    }

    fn data_type(&mut self) -> PResult<Node> {
        let start = self.mark();
        let word = match self.peek() {
            Some(t) if t.kind == TokenKind::Word => t.text.to_ascii_uppercase(),
            _ => return Err(self.unexpected()),
        };

        if word == "ENUM" || word == "SET" {
            self.bump()?;
            let list = self.string_list()?;
            let kind = if word == "ENUM" {
                DataTypeKind::Enum
            } else {
                DataTypeKind::Set
            };
            return Ok(self.node(NodeKind::DataType(kind), start, vec![list]));
        }

        if SPATIAL_TYPES.contains(&word.as_str()) {
            self.bump()?;
            return Ok(self.node(NodeKind::DataType(DataTypeKind::Spatial), start, Vec::new()));
        }

        if !SCALAR_TYPES.contains(&word.as_str()) {
            return Err(self.unexpected());
        }
        self.bump()?;

        match word.as_str() {
            "DOUBLE" => {
                self.eat_kw("PRECISION");
            }
            "CHAR" | "CHARACTER" => {
                self.eat_kw("VARYING");
            }
            "NATIONAL" => {
                if !(self.eat_kw("CHAR") || self.eat_kw("CHARACTER") || self.eat_kw("VARCHAR")) {
                    return Err(self.unexpected());
                }
                self.eat_kw("VARYING");
            }
            "LONG" => {
                if !self.eat_kw("VARCHAR") {
                    self.eat_kw("VARBINARY");
                }
            }
            _ => {}
        }

        if self.at_punct("(") {
            self.parenthesized()?;
        }
        while self.eat_kw("UNSIGNED")
            || self.eat_kw("SIGNED")
            || self.eat_kw("ZEROFILL")
            || self.eat_kw("BINARY")
            || self.eat_kw("ASCII")
            || self.eat_kw("UNICODE")
        {}

        Ok(self.node(NodeKind::DataType(DataTypeKind::Scalar), start, Vec::new()))
    }

    /// `('a', 'b', ...)` of an ENUM or SET type
    fn string_list(&mut self) -> PResult<Node> {
        let start = self.mark();
        self.expect_punct("(")?;
        loop {
            self.string_literal()?;
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(")")?;
        Ok(self.node(NodeKind::StringList, start, Vec::new()))
    }

    fn at_charset_clause(&self) -> bool {
        self.at_seq(&["CHARACTER", "SET"]) || self.at_kw("CHARSET")
    }

    fn charset_clause(&mut self) -> PResult<Node> {
        if !self.eat_seq(&["CHARACTER", "SET"]) {
            self.expect_kw("CHARSET")?;
        }
        self.eat_equals();
        self.charset_name()
    }

    fn charset_name(&mut self) -> PResult<Node> {
        let start = self.mark();
        if self.eat_kw("DEFAULT") {
            return Ok(self.node(NodeKind::CharsetName(CharsetKind::Default), start, Vec::new()));
        }
        match self.peek() {
            Some(t) if t.is_identifier() || t.is_string() => {
                self.bump()?;
            }
            _ => return Err(self.unexpected()),
        }
        Ok(self.node(NodeKind::CharsetName(CharsetKind::Named), start, Vec::new()))
    }

    fn collation(&mut self) -> PResult<Node> {
        let start = self.mark();
        match self.peek() {
            Some(t) if t.is_identifier() || t.is_string() => {
                self.bump()?;
            }
            _ => return Err(self.unexpected()),
        }
        Ok(self.node(NodeKind::Collation, start, Vec::new()))
    }

    // ------------------------------------------------------------------
    // Keys and constraints
    // ------------------------------------------------------------------

    fn at_constraint_start(&self) -> bool {
        self.at_any_kw(&[
            "CONSTRAINT",
            "PRIMARY",
            "UNIQUE",
            "INDEX",
            "KEY",
            "FULLTEXT",
            "SPATIAL",
            "FOREIGN",
            "CHECK",
        ])
    }

    fn constraint(&mut self) -> PResult<Node> {
        use ConstraintKind::*;

        let start = self.mark();
        let mut children = Vec::new();
        if self.eat_kw("CONSTRAINT") && self.at_identifier() {
            children.push(self.simple_name(NodeKind::IndexName)?);
        }

        let kind = if self.eat_seq(&["PRIMARY", "KEY"]) {
            PrimaryKey
        } else if self.eat_kw("UNIQUE") {
            self.eat_index_word();
            Unique
        } else if self.eat_kw("FULLTEXT") {
            self.eat_index_word();
            Fulltext
        } else if self.eat_kw("SPATIAL") {
            self.eat_index_word();
            Spatial
        } else if self.eat_seq(&["FOREIGN", "KEY"]) {
            ForeignKey
        } else if self.eat_kw("CHECK") {
            self.parenthesized()?;
            return Ok(self.node(NodeKind::Constraint(Check), start, children));
        } else if self.eat_index_word() {
            Index
        } else {
            return Err(self.unexpected());
        };

        if kind != PrimaryKey && self.at_identifier() {
            children.push(self.simple_name(NodeKind::IndexName)?);
        }
        self.index_type()?;
        self.parenthesized()?;

        if kind == ForeignKey {
            children.push(self.reference_definition()?);
        } else {
            self.index_options()?;
        }
        Ok(self.node(NodeKind::Constraint(kind), start, children))
    }

    fn eat_index_word(&mut self) -> bool {
        self.eat_kw("INDEX") || self.eat_kw("KEY")
    }

    fn index_type(&mut self) -> PResult<()> {
        if self.eat_kw("USING") {
            self.option_value()?;
        }
        Ok(())
    }

    fn index_options(&mut self) -> PResult<()> {
        loop {
            if self.eat_kw("KEY_BLOCK_SIZE") {
                self.eat_equals();
                self.option_value()?;
            } else if self.at_kw("USING") {
                self.index_type()?;
            } else if self.eat_kw("COMMENT") {
                self.string_literal()?;
            } else if self.eat_seq(&["WITH", "PARSER"]) {
                self.identifier()?;
            } else if !(self.eat_kw("VISIBLE") || self.eat_kw("INVISIBLE")) {
                return Ok(());
            }
        }
    }

    fn reference_definition(&mut self) -> PResult<Node> {
        let start = self.mark();
        self.expect_kw("REFERENCES")?;
        let table = self.name(NodeKind::TableName)?;
        if self.at_punct("(") {
            self.parenthesized()?;
        }
        if self.eat_kw("MATCH") {
            self.option_value()?;
        }
        while self.eat_kw("ON") {
            if !(self.eat_kw("DELETE") || self.eat_kw("UPDATE")) {
                return Err(self.unexpected());
            }
            let known = self.eat_kw("RESTRICT")
                || self.eat_kw("CASCADE")
                || self.eat_seq(&["SET", "NULL"])
                || self.eat_seq(&["SET", "DEFAULT"])
                || self.eat_seq(&["NO", "ACTION"]);
            if !known {
                return Err(self.unexpected());
            }
        }
        Ok(self.node(NodeKind::ReferenceDefinition, start, vec![table]))
    }

    // ------------------------------------------------------------------
    // Table options
    // ------------------------------------------------------------------

    fn at_table_option(&self) -> bool {
        let Some(token) = self.peek() else {
            return false;
        };
        if token.kind != TokenKind::Word {
            return false;
        }
        let word = token.text.to_ascii_uppercase();
        GENERIC_TABLE_OPTIONS.contains(&word.as_str())
            || matches!(word.as_str(), "CONNECTION" | "UNION" | "COLLATE" | "CHARSET")
            || self.at_charset_clause()
            || (matches!(word.as_str(), "DATA" | "INDEX") && self.at_kw_nth(1, "DIRECTORY"))
            || (word == "DEFAULT"
                && (self.at_kw_nth(1, "CHARSET")
                    || self.at_kw_nth(1, "COLLATE")
                    || self.at_seq_from(1, &["CHARACTER", "SET"])))
    }

    /// One or more table options. CREATE TABLE also allows commas between them.
    fn table_options(&mut self, allow_commas: bool) -> PResult<Node> {
        let start = self.mark();
        let mut options = vec![self.table_option()?];
        loop {
            if allow_commas && self.at_punct(",") {
                self.bump()?;
                options.push(self.table_option()?);
            } else if self.at_table_option() {
                options.push(self.table_option()?);
            } else {
                break;
            }
        }
        Ok(self.node(NodeKind::TableOptions, start, options))
    }

    fn table_option(&mut self) -> PResult<Node> {
        use TableOptionKind::*;

        let start = self.mark();
        self.eat_kw("DEFAULT");

        if self.at_charset_clause() {
            let charset = self.charset_clause()?;
            return Ok(self.node(NodeKind::TableOption(CharacterSet), start, vec![charset]));
        }
        if self.eat_kw("COLLATE") {
            self.eat_equals();
            let collation = self.collation()?;
            return Ok(self.node(NodeKind::TableOption(Collate), start, vec![collation]));
        }

        let kind = if self.eat_seq(&["DATA", "DIRECTORY"]) {
            self.eat_equals();
            self.string_literal()?;
            DataDirectory
        } else if self.eat_seq(&["INDEX", "DIRECTORY"]) {
            self.eat_equals();
            self.string_literal()?;
            IndexDirectory
        } else if self.eat_kw("CONNECTION") {
            self.eat_equals();
            self.string_literal()?;
            Connection
        } else if self.eat_kw("UNION") {
            self.eat_equals();
            self.parenthesized()?;
            Other
        } else if self.at_any_kw(GENERIC_TABLE_OPTIONS) {
            self.bump()?;
            self.eat_equals();
            self.option_value()?;
            Other
        } else {
            return Err(self.unexpected());
        };

        Ok(self.node(NodeKind::TableOption(kind), start, Vec::new()))
    }

    // ------------------------------------------------------------------
    // Partitioning
    // ------------------------------------------------------------------

    fn partition_options(&mut self) -> PResult<Option<Node>> {
        let start = self.mark();
        if self.eat_seq(&["REMOVE", "PARTITIONING"]) {
            let kind = NodeKind::PartitionOptions(PartitionOptionKind::RemovePartitioning);
            return Ok(Some(self.node(kind, start, Vec::new())));
        }
        if !self.eat_seq(&["PARTITION", "BY"]) {
            return Ok(None);
        }

        // scheme tokens are kept opaque up to the definition list
        let mut children = Vec::new();
        while !self.at_end() && !self.at_punct(";") {
            if self.at_punct("(") && self.at_kw_nth(1, "PARTITION") {
                self.bump()?;
                loop {
                    children.push(self.partition_definition()?);
                    if !self.eat_punct(",") {
                        break;
                    }
                }
                self.expect_punct(")")?;
                break;
            } else if self.at_punct("(") {
                self.parenthesized()?;
            } else {
                self.bump()?;
            }
        }

        let kind = NodeKind::PartitionOptions(PartitionOptionKind::PartitionBy);
        Ok(Some(self.node(kind, start, children)))
    }

    fn partition_definition(&mut self) -> PResult<Node> {
        let start = self.mark();
        self.expect_kw("PARTITION")?;
        self.identifier()?;

        let mut children = Vec::new();
        let values = self.mark();
        if self.eat_seq(&["VALUES", "LESS", "THAN"]) {
            if !self.eat_kw("MAXVALUE") {
                self.parenthesized()?;
            }
            children.push(self.node(NodeKind::PartitionValuesLessThan, values, Vec::new()));
        } else if self.eat_seq(&["VALUES", "IN"]) {
            self.parenthesized()?;
        }

        loop {
            let option = self.mark();
            if self.eat_seq(&["STORAGE", "ENGINE"]) || self.eat_kw("ENGINE") {
                self.eat_equals();
                self.option_value()?;
            } else if self.eat_kw("COMMENT") {
                self.eat_equals();
                self.string_literal()?;
            } else if self.eat_seq(&["DATA", "DIRECTORY"]) {
                self.eat_equals();
                self.string_literal()?;
                let kind = NodeKind::TableOption(TableOptionKind::DataDirectory);
                children.push(self.node(kind, option, Vec::new()));
            } else if self.eat_seq(&["INDEX", "DIRECTORY"]) {
                self.eat_equals();
                self.string_literal()?;
                let kind = NodeKind::TableOption(TableOptionKind::IndexDirectory);
                children.push(self.node(kind, option, Vec::new()));
            } else if self.eat_kw("MAX_ROWS") || self.eat_kw("MIN_ROWS") || self.eat_kw("TABLESPACE") {
                self.eat_equals();
                self.option_value()?;
            } else if self.eat_kw("NODEGROUP") {
                self.eat_equals();
                self.option_value()?;
                children.push(self.node(NodeKind::NodeGroup, option, Vec::new()));
            } else {
                break;
            }
        }

        if self.at_punct("(") {
            self.parenthesized()?;
        }
        Ok(self.node(NodeKind::PartitionDefinition, start, children))
    }
}
