//! Rule walk over a parsed statement
//!
//! Rules are dispatched on [`NodeKind`] with an exhaustive match: a new
//! production without a rule does not compile. Rules never share hidden
//! state; everything they learn goes into the [`Accumulator`] threaded
//! through the walk.

use super::checkers::Checkers;
use super::lexer::{quote_identifier, Token, TokenKind};
use super::parser::parse;
use super::tree::{
    AlterSpecKind, CharsetKind, ConstraintKind, DataTypeKind, Node, NodeKind, Nullability,
    ParseTree, PartitionOptionKind, Rewrite, TableOptionKind,
};
use super::{validation_error, ClassifiedRun, Classification, ClassifyError, DdlAction, DdlMode};
use std::collections::BTreeSet;
use tracing::{debug, error};

type Result<T> = std::result::Result<T, ClassifyError>;

/// ENUM columns above this many members need two bytes per value
pub const MAX_SHORT_ENUM_MEMBERS: usize = 255;

/// Column types that can be converted to an ENUM in place
const ENUM_COMPATIBLE_TYPES: [&str; 3] = ["enum", "varchar", "set"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Short,
    Long,
    NoCheckAlter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Votes {
    pub short: bool,
    pub long: bool,
    pub no_check_alter: bool,
}

/// State collected by the rule walk
#[derive(Debug, Default)]
pub struct Accumulator {
    pub votes: Votes,
    pub action: Option<DdlAction>,
    pub mode: Option<DdlMode>,
    pub table_names: Vec<String>,
    /// Foreign key names after the underscore toggle
    pub dropped_foreign_keys: BTreeSet<String>,
    pub rewrites: Vec<Rewrite>,
}

impl Accumulator {
    pub fn vote(&mut self, vote: Vote) {
        match vote {
            Vote::Short => self.votes.short = true,
            Vote::Long => self.votes.long = true,
            Vote::NoCheckAlter => self.votes.no_check_alter = true,
        }
    }

    fn target(&self) -> Option<&str> {
        self.table_names.first().map(String::as_str)
    }
}

/// `fk` becomes `_fk` and `_fk` becomes `fk`
pub fn toggle_underscore(name: &str) -> String {
    match name.strip_prefix('_') {
        Some(rest) => rest.to_string(),
        None => format!("_{}", name),
    }
}

/// Final run type from the collected votes
pub fn resolve(votes: Votes, action: DdlAction) -> Result<ClassifiedRun> {
    if votes.no_check_alter {
        Ok(ClassifiedRun::MaybeNoCheckAlter)
    } else if votes.long {
        Ok(ClassifiedRun::Long)
    } else if matches!(action, DdlAction::Create | DdlAction::Drop) {
        Ok(ClassifiedRun::Short)
    } else if votes.short {
        Ok(ClassifiedRun::MaybeShort)
    } else {
        error!(action = %action, "no rule determined a run type");
        Err(ClassifyError::Internal(
            "no rule determined a run type".to_string(),
        ))
    }
}

/// Classify `sql` with the given checkers
pub fn classify_sql(sql: &str, checkers: &Checkers) -> Result<Classification> {
    Classifier::new(checkers.clone()).classify(sql)
}

#[derive(Debug, Clone, Default)]
pub struct Classifier {
    checkers: Checkers,
}

impl Classifier {
    pub fn new(checkers: Checkers) -> Self {
        Self { checkers }
    }

    pub fn classify(&self, sql: &str) -> Result<Classification> {
        let tree = parse(sql)?;
        self.classify_tree(tree)
    }

    pub fn classify_tree(&self, mut tree: ParseTree) -> Result<Classification> {
        let acc = self.walk(&tree)?;

        self.check_foreign_keys(&acc)?;

        let (Some(action), Some(mode)) = (acc.action, acc.mode) else {
            error!("statement rule did not set action and mode");
            return Err(ClassifyError::Internal(
                "statement rule did not set action and mode".to_string(),
            ));
        };

        let mut votes = acc.votes;
        if action == DdlAction::Alter && self.checkers.avoid_temporal_upgrade() == Some(false) {
            votes.long = true;
        }
        let run = resolve(votes, action)?;

        tree.apply(&acc.rewrites);
        let classification = Classification {
            statement: tree.to_sql(),
            run,
            table: acc.target().unwrap_or_default().to_string(),
            table_names: acc.table_names,
            mode,
            action,
        };

        debug!(
            action = %classification.action,
            mode = %classification.mode,
            run = %classification.run,
            table = %classification.table,
            "Classified statement"
        );
        Ok(classification)
    }

    /// Run every rule and return what they collected
    pub fn walk(&self, tree: &ParseTree) -> Result<Accumulator> {
        check_tokens(tree)?;
        let mut acc = Accumulator::default();
        self.visit(tree, tree.root(), &mut acc)?;
        Ok(acc)
    }

    /// Post-order: children are checked before the production that contains them
    fn visit(&self, tree: &ParseTree, node: &Node, acc: &mut Accumulator) -> Result<()> {
        for child in &node.children {
            self.visit(tree, child, acc)?;
        }

        match node.kind {
            NodeKind::CreateTable => self.enter_create(tree, node, DdlMode::Table, acc),
            NodeKind::CreateView => self.enter_create(tree, node, DdlMode::View, acc),
            NodeKind::AlterTable => self.enter_alter(tree, node, acc),
            NodeKind::DropTable => self.enter_drop(tree, node, DdlMode::Table, acc),
            NodeKind::DropView => self.enter_drop(tree, node, DdlMode::View, acc),

            NodeKind::AlterCommands => {
                match node.children.len() {
                    0 => acc.vote(Vote::Short),
                    1 => {}
                    _ => acc.vote(Vote::Long),
                }
                Ok(())
            }
            NodeKind::AlterSpec(kind) => alter_spec(tree, node, kind, acc),

            NodeKind::DataType(DataTypeKind::Enum) => {
                compact_enum(tree, node, acc);
                Ok(())
            }
            NodeKind::DataType(DataTypeKind::Spatial) => {
                Err(validation_error("spatial type not supported"))
            }
            NodeKind::DataType(DataTypeKind::Set | DataTypeKind::Scalar) => Ok(()),

            NodeKind::CharsetName(CharsetKind::Named) => Err(validation_error(format!(
                "charset {} not supported.",
                tree.text(node)
            ))),
            NodeKind::CharsetName(CharsetKind::Default) => Ok(()),

            NodeKind::Constraint(ConstraintKind::Spatial) => {
                Err(validation_error("spatial not supported"))
            }
            NodeKind::Constraint(ConstraintKind::ForeignKey) => {
                Err(validation_error("foreign key not supported"))
            }
            NodeKind::Constraint(
                ConstraintKind::PrimaryKey
                | ConstraintKind::Index
                | ConstraintKind::Unique
                | ConstraintKind::Fulltext
                | ConstraintKind::Check,
            ) => Ok(()),

            NodeKind::TableOption(TableOptionKind::DataDirectory) => {
                Err(validation_error("data directory not supported"))
            }
            NodeKind::TableOption(TableOptionKind::IndexDirectory) => {
                Err(validation_error("index directory not supported"))
            }
            NodeKind::TableOption(TableOptionKind::Connection) => {
                Err(validation_error("connection not supported"))
            }
            NodeKind::TableOption(
                TableOptionKind::CharacterSet | TableOptionKind::Collate | TableOptionKind::Other,
            ) => Ok(()),

            NodeKind::PartitionOptions(PartitionOptionKind::RemovePartitioning) => {
                acc.vote(Vote::Long);
                Ok(())
            }
            NodeKind::PartitionOptions(PartitionOptionKind::PartitionBy) => {
                Err(validation_error("partition by not supported"))
            }
            NodeKind::PartitionValuesLessThan => check_less_than(tree, node),
            NodeKind::NodeGroup => Err(validation_error("nodegroup not supported")),

            NodeKind::TableName
            | NodeKind::ViewName
            | NodeKind::ColumnName
            | NodeKind::IndexName
            | NodeKind::ForeignKeySymbol
            | NodeKind::ColumnSpec
            | NodeKind::ColumnDefinition
            | NodeKind::StringList
            | NodeKind::NullStatus(_)
            | NodeKind::DefaultValue
            | NodeKind::Collation
            | NodeKind::ColumnPosition
            | NodeKind::ReferenceDefinition
            | NodeKind::TableOptions
            | NodeKind::PartitionDefinition
            | NodeKind::ViewBody => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Statement rules
    // ------------------------------------------------------------------

    fn enter_create(&self, tree: &ParseTree, node: &Node, mode: DdlMode, acc: &mut Accumulator) -> Result<()> {
        acc.vote(Vote::Short);
        acc.action = Some(DdlAction::Create);
        acc.mode = Some(mode);
        acc.table_names = target_name(tree, node, mode).into_iter().collect();

        if let Some(name) = acc.target() {
            if self.checkers.table_exists(mode, name) == Some(true) {
                return Err(validation_error(format!("{} already exists!", mode)));
            }
        }
        Ok(())
    }

    fn enter_drop(&self, tree: &ParseTree, node: &Node, mode: DdlMode, acc: &mut Accumulator) -> Result<()> {
        acc.vote(Vote::Short);
        acc.action = Some(DdlAction::Drop);
        acc.mode = Some(mode);

        let name_kind = name_kind(mode);
        acc.table_names = node
            .children_of(|k| k == name_kind)
            .map(|n| tree.norm_name(n))
            .collect();
        if acc.table_names.len() > 1 {
            return Err(validation_error(format!(
                "dropping multiple {}s is not supported!",
                mode
            )));
        }

        if let Some(name) = acc.target() {
            if self.checkers.table_exists(mode, name) == Some(false) {
                return Err(validation_error(format!("{} does not exist!", mode)));
            }
        }
        Ok(())
    }

    fn enter_alter(&self, tree: &ParseTree, node: &Node, acc: &mut Accumulator) -> Result<()> {
        acc.action = Some(DdlAction::Alter);
        acc.mode = Some(DdlMode::Table);
        acc.table_names = target_name(tree, node, DdlMode::Table).into_iter().collect();

        let table = acc.target().unwrap_or_default().to_string();
        if self.checkers.table_exists(DdlMode::Table, &table) == Some(false) {
            return Err(validation_error("table does not exist!"));
        }

        self.check_column_changes(tree, node, &table, acc)
    }

    /// MODIFY/CHANGE: renames need no-check-alter, enum changes may stay in place
    fn check_column_changes(&self, tree: &ParseTree, node: &Node, table: &str, acc: &mut Accumulator) -> Result<()> {
        let specs = node.find_all(|k| {
            matches!(
                k,
                NodeKind::AlterSpec(AlterSpecKind::ModifyColumn | AlterSpecKind::ChangeColumn)
            )
        });
        if specs.is_empty() {
            return Ok(());
        }

        let columns = self.checkers.get_columns(table);

        for spec in specs {
            let enum_type = spec
                .find_top(|k| k == NodeKind::ColumnDefinition)
                .and_then(|def| def.find_left(|k| k == NodeKind::DataType(DataTypeKind::Enum)));

            let names: Vec<String> = spec
                .children_of(|k| k == NodeKind::ColumnName)
                .map(|n| tree.norm_name(n))
                .collect();
            let renamed = names.len() == 2 && names[0] != names[1];
            if renamed {
                acc.vote(Vote::NoCheckAlter);
            }

            if enum_type.is_none() {
                acc.vote(Vote::Long);
            }

            let Some(columns) = columns.as_ref() else {
                if enum_type.is_some() {
                    acc.vote(Vote::Short);
                }
                continue;
            };

            let column = names.first().cloned().unwrap_or_default();
            let Some(info) = columns.get(&column) else {
                return Err(validation_error(format!("column {} not found", column)));
            };

            let Some(enum_type) = enum_type else {
                continue;
            };

            let current = info.column_type.to_ascii_lowercase();
            if !ENUM_COMPATIBLE_TYPES.iter().any(|t| current.starts_with(t)) {
                acc.vote(Vote::Long);
                continue;
            }
            if renamed {
                continue;
            }

            let Some(list) = enum_type.find_top(|k| k == NodeKind::StringList) else {
                acc.vote(Vote::Long);
                continue;
            };
            let proposed = tree.compact_list(list);
            let members = tree.list_items(list).len();

            match existing_enum_members(&info.column_type) {
                Some(existing) if appends_members(existing, &proposed) && members <= MAX_SHORT_ENUM_MEMBERS => {
                    acc.vote(Vote::Short)
                }
                _ => acc.vote(Vote::Long),
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Post-walk validation
    // ------------------------------------------------------------------

    fn check_foreign_keys(&self, acc: &Accumulator) -> Result<()> {
        if acc.action == Some(DdlAction::Drop) {
            return Ok(());
        }
        let Some(table) = acc.target() else {
            return Ok(());
        };

        if self.checkers.has_referenced_foreign_keys(table) == Some(true) {
            return Err(validation_error("table is referenced by foreign keys"));
        }

        if let Some(declared) = self.checkers.get_foreign_keys(table) {
            let all_dropped = declared
                .iter()
                .all(|fk| acc.dropped_foreign_keys.contains(&toggle_underscore(fk)));
            if !all_dropped {
                return Err(validation_error(
                    "table has foreign keys which are not all being dropped",
                ));
            }
        }
        Ok(())
    }
}

fn name_kind(mode: DdlMode) -> NodeKind {
    match mode {
        DdlMode::Table => NodeKind::TableName,
        DdlMode::View => NodeKind::ViewName,
    }
}

fn target_name(tree: &ParseTree, node: &Node, mode: DdlMode) -> Option<String> {
    let kind = name_kind(mode);
    node.find_top(|k| k == kind).map(|n| tree.norm_name(n))
}

/// Member list of an `enum(...)` column type as the server prints it
fn existing_enum_members(column_type: &str) -> Option<&str> {
    let lower = column_type.to_ascii_lowercase();
    if lower.starts_with("enum(") && column_type.ends_with(')') {
        Some(&column_type[5..column_type.len() - 1])
    } else {
        None
    }
}

/// `proposed` keeps every existing member unchanged and only adds after them
fn appends_members(existing: &str, proposed: &str) -> bool {
    match proposed.strip_prefix(existing) {
        Some(rest) => rest.is_empty() || rest.starts_with(','),
        None => false,
    }
}

fn check_tokens(tree: &ParseTree) -> Result<()> {
    for token in tree.tokens() {
        match token.kind {
            TokenKind::DoubleQuoted => {
                return Err(validation_error("only single quoted string supported"));
            }
            TokenKind::QuotedIdent if token.identifier().is_empty() => {
                return Err(validation_error("empty identifier not supported"));
            }
            _ => {}
        }
    }
    Ok(())
}

fn alter_spec(tree: &ParseTree, node: &Node, kind: AlterSpecKind, acc: &mut Accumulator) -> Result<()> {
    use AlterSpecKind::*;

    match kind {
        AddColumn | AddColumns => {
            acc.vote(Vote::Long);
            require_default_when_not_null(node)
        }
        // RENAME COLUMN is a CHANGE that keeps the definition
        Rename if node.find_top(|k| k == NodeKind::ColumnName).is_some() => {
            acc.vote(Vote::NoCheckAlter);
            Ok(())
        }
        TableOptions | AddConstraint | AddPartition | DropPartition | AlterColumnDefault
        | DropColumn | DisableKeys | EnableKeys | Tablespace | Rename | ConvertCharset
        | CharsetCollate => {
            acc.vote(Vote::Long);
            Ok(())
        }
        DropIndex => {
            acc.vote(Vote::Short);
            Ok(())
        }
        DropForeignKey => {
            acc.vote(Vote::Long);
            toggle_foreign_key(tree, node, acc)
        }
        // checked by the ALTER TABLE rule, which knows the target table
        ChangeColumn | ModifyColumn => Ok(()),
        DropPrimaryKey => Err(validation_error("drop primary key not supported")),
        OrderBy => Err(validation_error("order by not supported")),
    }
}

fn require_default_when_not_null(spec: &Node) -> Result<()> {
    for definition in spec.find_all(|k| k == NodeKind::ColumnDefinition) {
        let not_null = definition
            .find_top(|k| matches!(k, NodeKind::NullStatus(_)))
            .is_some_and(|n| n.kind == NodeKind::NullStatus(Nullability::NotNull));
        let has_default = definition.find_top(|k| k == NodeKind::DefaultValue).is_some();
        if not_null && !has_default {
            return Err(validation_error("NOT NULL column needs a default value"));
        }
    }
    Ok(())
}

fn toggle_foreign_key(tree: &ParseTree, spec: &Node, acc: &mut Accumulator) -> Result<()> {
    let Some(index) = spec
        .find_top(|k| k == NodeKind::ForeignKeySymbol)
        .and_then(|symbol| tree.name_token(symbol))
    else {
        return Ok(());
    };

    let token = &tree.tokens()[index];
    let toggled = toggle_underscore(&token.identifier());
    if toggled.is_empty() {
        return Err(validation_error("foreign key name '_' not supported"));
    }
    let text = match token.kind {
        TokenKind::QuotedIdent => quote_identifier(&toggled),
        _ => toggled.clone(),
    };

    acc.dropped_foreign_keys.insert(toggled);
    acc.rewrites.push(Rewrite::Replace { index, text });
    Ok(())
}

/// Drop the whitespace inside an ENUM literal list
fn compact_enum(tree: &ParseTree, node: &Node, acc: &mut Accumulator) {
    let Some(list) = node.find_top(|k| k == NodeKind::StringList) else {
        return;
    };
    acc.rewrites.extend(
        tree.significant(list)
            .into_iter()
            .skip(1)
            .map(|index| Rewrite::Tighten { index }),
    );
}

fn check_less_than(tree: &ParseTree, node: &Node) -> Result<()> {
    let tokens: Vec<_> = tree
        .node_tokens(node)
        .iter()
        .filter(|t| !t.is_trivia())
        .skip(3)
        .collect();
    let value = match tokens.as_slice() {
        [open, inner @ .., close] if open.is_punct("(") && close.is_punct(")") => inner,
        all => all,
    };

    let natural = match value {
        [token] if token.is_keyword("MAXVALUE") => true,
        [token] if token.kind == TokenKind::Number => token
            .text
            .parse::<f64>()
            .is_ok_and(|n| n >= 0.0 && n.fract() == 0.0),
        expression => fold_integer(expression).is_some_and(|n| n >= 0),
    };
    if natural {
        Ok(())
    } else {
        Err(validation_error("only natural number (>= 0) supported"))
    }
}

/// Evaluate `a + b * c - d` over integer literals; anything else is `None`
fn fold_integer(tokens: &[&Token]) -> Option<i64> {
    fn integer(token: Option<&&Token>) -> Option<i64> {
        token
            .filter(|t| t.kind == TokenKind::Number)
            .and_then(|t| t.text.parse::<i64>().ok())
    }

    let mut total = 0i64;
    let mut negate = false;
    let mut i = 0;
    loop {
        let mut term = integer(tokens.get(i))?;
        i += 1;
        while tokens.get(i).is_some_and(|t| t.is_punct("*")) {
            term = term.checked_mul(integer(tokens.get(i + 1))?)?;
            i += 2;
        }
        total = if negate {
            total.checked_sub(term)?
        } else {
            total.checked_add(term)?
        };

        match tokens.get(i) {
            None => return Some(total),
            Some(t) if t.is_punct("+") => negate = false,
            Some(t) if t.is_punct("-") => negate = true,
            Some(_) => return None,
        }
        i += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ddl::ColumnInfo;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn classify(sql: &str) -> Classification {
        classify_sql(sql, &Checkers::none()).unwrap()
    }

    fn run(sql: &str) -> ClassifiedRun {
        classify(sql).run
    }

    fn run_with(sql: &str, checkers: Checkers) -> ClassifiedRun {
        Classifier::new(checkers).classify(sql).unwrap().run
    }

    fn rejection(sql: &str, checkers: Checkers) -> String {
        match Classifier::new(checkers).classify(sql) {
            Err(ClassifyError::Validation(msg)) => msg,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    fn columns(defs: &[(&str, &str)]) -> Checkers {
        let map: HashMap<String, ColumnInfo> = defs
            .iter()
            .map(|(name, ty)| (name.to_string(), ColumnInfo::new(*ty)))
            .collect();
        Checkers::none().with_get_columns(move |_| map.clone())
    }

    fn foreign_keys(names: &[&str]) -> Checkers {
        let set: BTreeSet<String> = names.iter().map(|s| s.to_string()).collect();
        Checkers::none().with_get_foreign_keys(move |_| set.clone())
    }

    #[test]
    fn test_bare_alter_is_maybe_short() {
        let result = classify("ALTER TABLE invoices");
        assert_eq!(result.action, DdlAction::Alter);
        assert_eq!(result.mode, DdlMode::Table);
        assert_eq!(result.run, ClassifiedRun::MaybeShort);
        assert_eq!(result.statement, "ALTER TABLE invoices");
    }

    #[test]
    fn test_multiple_specs_are_long() {
        assert_eq!(run("ALTER TABLE t DROP INDEX ix1"), ClassifiedRun::MaybeShort);
        assert_eq!(run("ALTER TABLE t DROP INDEX a, DROP INDEX b"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t ADD COLUMN c INT, DROP INDEX ix1"), ClassifiedRun::Long);
    }

    #[test]
    fn test_single_spec_votes() {
        assert_eq!(run("ALTER TABLE t ADD COLUMN c INT"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t DROP COLUMN c"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t ENABLE KEYS"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t RENAME TO u"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t ENGINE=InnoDB"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t ALTER COLUMN c SET DEFAULT 1"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t ADD INDEX ix (c)"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t DISCARD TABLESPACE"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE abc REMOVE PARTITIONING"), ClassifiedRun::Long);
        assert_eq!(run("ALTER TABLE t MODIFY COLUMN y INT"), ClassifiedRun::Long);
    }

    #[test]
    fn test_create_and_drop_are_short() {
        let created = classify("CREATE TABLE t (id INT)");
        assert_eq!(
            (created.action, created.mode, created.run),
            (DdlAction::Create, DdlMode::Table, ClassifiedRun::Short)
        );
        assert_eq!(created.table, "t");

        let view = classify("CREATE VIEW asd AS def");
        assert_eq!((view.mode, view.run), (DdlMode::View, ClassifiedRun::Short));
        assert_eq!(view.statement, "CREATE VIEW asd AS def");

        let dropped = classify("DROP TABLE asd.dsa");
        assert_eq!(dropped.run, ClassifiedRun::Short);
        assert_eq!(dropped.table, "dsa");
        assert_eq!(dropped.statement, "DROP TABLE asd.dsa");
    }

    #[test]
    fn test_create_table_statement_is_normalized() {
        let result = classify("CREATE TABLE Persons\n(\nPersonID int,\nLastName varchar(255)\n)");
        assert_eq!(
            result.statement,
            "CREATE TABLE Persons ( PersonID int , LastName varchar ( 255 ) )"
        );
    }

    #[test]
    fn test_enum_prefix_superset_is_maybe_short() {
        let checkers = || columns(&[("x", "enum('a','b')")]);
        assert_eq!(
            run_with("ALTER TABLE t MODIFY COLUMN x ENUM ('a', 'b', 'c')", checkers()),
            ClassifiedRun::MaybeShort
        );
        assert_eq!(
            run_with("ALTER TABLE t MODIFY COLUMN x ENUM ('x', 'a', 'b')", checkers()),
            ClassifiedRun::Long
        );
        assert_eq!(
            run_with("ALTER TABLE t MODIFY COLUMN x ENUM ('a')", checkers()),
            ClassifiedRun::Long
        );
    }

    #[test]
    fn test_enum_member_edit_is_not_an_append() {
        let checkers = || columns(&[("x", "enum('a','b')")]);
        assert_eq!(
            run_with("ALTER TABLE t MODIFY COLUMN x ENUM ('a', 'b''x')", checkers()),
            ClassifiedRun::Long
        );
        assert_eq!(
            run_with("ALTER TABLE t MODIFY COLUMN x ENUM ('a', 'bc')", checkers()),
            ClassifiedRun::Long
        );
        assert_eq!(
            run_with("ALTER TABLE t MODIFY COLUMN x ENUM ('a', 'b')", checkers()),
            ClassifiedRun::MaybeShort
        );
    }

    #[test]
    fn test_enum_member_limit() {
        let checkers = || columns(&[("x", "enum('1','2')")]);
        let list = |n: usize| (1..=n).map(|i| format!("'{}'", i)).collect::<Vec<_>>().join(",");

        let at_limit = format!("ALTER TABLE t MODIFY COLUMN x ENUM ({})", list(255));
        assert_eq!(run_with(&at_limit, checkers()), ClassifiedRun::MaybeShort);

        let over = format!("ALTER TABLE t MODIFY COLUMN x ENUM ({})", list(256));
        assert_eq!(run_with(&over, checkers()), ClassifiedRun::Long);
    }

    #[test]
    fn test_enum_list_whitespace_is_removed() {
        let result = classify(
            "ALTER TABLE bogus MODIFY COLUMN x ENUM ('a''def', 'b'     ,    'c''d'      ), MODIFY COLUMN y ENUM ('a', 'b', 'c')",
        );
        assert_eq!(
            result.statement,
            "ALTER TABLE bogus MODIFY COLUMN x ENUM ('a''def','b','c''d') , MODIFY COLUMN y ENUM ('a','b','c')"
        );
    }

    #[test]
    fn test_enum_without_column_checker_is_optimistic() {
        assert_eq!(
            run("ALTER TABLE t MODIFY COLUMN x ENUM ('a', 'b')"),
            ClassifiedRun::MaybeShort
        );
    }

    #[test]
    fn test_non_enum_current_type_is_long() {
        assert_eq!(
            run_with("ALTER TABLE t MODIFY x ENUM('a')", columns(&[("x", "int(11)")])),
            ClassifiedRun::Long
        );
    }

    #[test]
    fn test_change_with_rename_votes_no_check_alter() {
        let checkers = || columns(&[("dd", "enum('a')")]);
        assert_eq!(
            run_with("ALTER TABLE asd CHANGE COLUMN dd dd ENUM('a', 'b')", checkers()),
            ClassifiedRun::MaybeShort
        );
        assert_eq!(
            run_with("ALTER TABLE asd CHANGE COLUMN dd de ENUM('a', 'b')", checkers()),
            ClassifiedRun::MaybeNoCheckAlter
        );
        assert_eq!(
            run_with("ALTER TABLE asd CHANGE COLUMN dd dd int(11)", checkers()),
            ClassifiedRun::Long
        );
        assert_eq!(
            run_with("ALTER TABLE asd CHANGE COLUMN dd de int(11)", checkers()),
            ClassifiedRun::MaybeNoCheckAlter
        );
    }

    #[test]
    fn test_unknown_column_is_rejected() {
        let msg = rejection(
            "ALTER TABLE bogus MODIFY COLUMN x ENUM ('a', 'b', 'c')",
            columns(&[("y", "enum('a','b')")]),
        );
        assert_eq!(msg, "column x not found");
    }

    #[test]
    fn test_drop_foreign_key_toggles_underscore() {
        let result = classify(
            "ALTER TABLE Orders DROP FOREIGN KEY\n      fk_PerOrders /* ignore this */  , DROP FOREIGN KEY `a\n\nbc` -- , DROP FOREIGN KEY def",
        );
        assert_eq!(
            result.statement,
            "ALTER TABLE Orders DROP FOREIGN KEY _fk_PerOrders , DROP FOREIGN KEY `_a\n\nbc`"
        );

        let stripped = classify("ALTER TABLE bogus DROP FOREIGN KEY _fk3");
        assert_eq!(stripped.statement, "ALTER TABLE bogus DROP FOREIGN KEY fk3");

        let twice = classify(&classify("ALTER TABLE t DROP FOREIGN KEY fk1").statement);
        assert_eq!(twice.statement, "ALTER TABLE t DROP FOREIGN KEY fk1");
    }

    #[test]
    fn test_bare_underscore_foreign_key_is_rejected() {
        assert_eq!(
            rejection("ALTER TABLE t DROP FOREIGN KEY _", Checkers::none()),
            "foreign key name '_' not supported"
        );
        assert_eq!(
            rejection("ALTER TABLE t DROP FOREIGN KEY `_`", Checkers::none()),
            "foreign key name '_' not supported"
        );
        assert_eq!(
            classify("ALTER TABLE t DROP FOREIGN KEY __").statement,
            "ALTER TABLE t DROP FOREIGN KEY _"
        );
    }

    #[test]
    fn test_declared_foreign_keys_must_all_be_dropped() {
        let both = "ALTER TABLE t DROP FOREIGN KEY fk1, DROP FOREIGN KEY fk2";
        assert_eq!(run_with(both, foreign_keys(&["fk1", "fk2"])), ClassifiedRun::Long);

        let one = "ALTER TABLE t DROP FOREIGN KEY fk1";
        assert_eq!(
            rejection(one, foreign_keys(&["fk1", "fk2"])),
            "table has foreign keys which are not all being dropped"
        );

        // dropping the table makes its own keys irrelevant
        assert_eq!(run_with("DROP TABLE t", foreign_keys(&["fk1"])), ClassifiedRun::Short);
    }

    #[test]
    fn test_referenced_table_is_rejected_unless_dropped() {
        let referenced = || Checkers::none().with_has_referenced_foreign_keys(|_| true);
        assert_eq!(
            rejection("ALTER TABLE t ADD COLUMN c INT", referenced()),
            "table is referenced by foreign keys"
        );
        assert_eq!(run_with("DROP TABLE t", referenced()), ClassifiedRun::Short);
    }

    #[test]
    fn test_existence_checks() {
        let exists = |answer: bool| Checkers::none().with_table_exists(move |_, _| answer);

        assert_eq!(rejection("CREATE TABLE t (id INT)", exists(true)), "table already exists!");
        assert_eq!(rejection("CREATE VIEW v AS SELECT 1", exists(true)), "view already exists!");
        assert_eq!(rejection("ALTER TABLE t ENGINE=InnoDB", exists(false)), "table does not exist!");
        assert_eq!(rejection("DROP TABLE t", exists(false)), "table does not exist!");
        assert_eq!(rejection("DROP VIEW v", exists(false)), "view does not exist!");
        assert_eq!(run_with("DROP VIEW v", exists(true)), ClassifiedRun::Short);
    }

    #[test]
    fn test_dropping_multiple_objects_is_rejected() {
        assert_eq!(
            rejection("DROP TABLE a, b", Checkers::none()),
            "dropping multiple tables is not supported!"
        );
        assert_eq!(
            rejection("DROP VIEW a, b", Checkers::none()),
            "dropping multiple views is not supported!"
        );
    }

    #[test]
    fn test_temporal_upgrade_forces_alters_long() {
        let avoid = |answer: bool| Checkers::none().with_avoid_temporal_upgrade(move || answer);
        assert_eq!(run_with("ALTER TABLE abc", avoid(false)), ClassifiedRun::Long);
        assert_eq!(run_with("ALTER TABLE abc", avoid(true)), ClassifiedRun::MaybeShort);
        assert_eq!(run_with("DROP TABLE abc", avoid(false)), ClassifiedRun::Short);
        // a column rename still needs an explicit no-check-alter choice
        assert_eq!(
            run_with("ALTER TABLE abc CHANGE a b INT", avoid(false)),
            ClassifiedRun::MaybeNoCheckAlter
        );
    }

    #[test]
    fn test_rename_column_matches_change_rename() {
        assert_eq!(run("ALTER TABLE t RENAME COLUMN a TO b"), ClassifiedRun::MaybeNoCheckAlter);
        assert_eq!(run("ALTER TABLE t CHANGE a b INT"), ClassifiedRun::MaybeNoCheckAlter);
        assert_eq!(run("ALTER TABLE t RENAME TO u"), ClassifiedRun::Long);
    }

    #[test]
    fn test_unsupported_constructs_are_rejected() {
        let cases = [
            ("ALTER TABLE t ADD COLUMN g POINT", "spatial type not supported"),
            ("ALTER TABLE t ADD SPATIAL INDEX sx (g)", "spatial not supported"),
            (
                "ALTER TABLE t ADD CONSTRAINT fk FOREIGN KEY (a) REFERENCES u (id)",
                "foreign key not supported",
            ),
            ("ALTER TABLE t CONVERT TO CHARACTER SET utf8", "charset utf8 not supported."),
            ("ALTER TABLE abc ORDER BY a, b, c", "order by not supported"),
            ("ALTER TABLE t DATA DIRECTORY = '/tmp'", "data directory not supported"),
            ("ALTER TABLE t INDEX DIRECTORY = '/tmp'", "index directory not supported"),
            ("ALTER TABLE t CONNECTION = 'mysql://x'", "connection not supported"),
            ("ALTER TABLE t DROP PRIMARY KEY", "drop primary key not supported"),
            ("ALTER TABLE t PARTITION BY HASH (id)", "partition by not supported"),
            (
                "ALTER TABLE t ADD PARTITION (PARTITION p1 VALUES LESS THAN (-1))",
                "only natural number (>= 0) supported",
            ),
            (
                "ALTER TABLE t ADD PARTITION (PARTITION p1 VALUES LESS THAN (1.5))",
                "only natural number (>= 0) supported",
            ),
            (
                "ALTER TABLE t ADD PARTITION (PARTITION p1 VALUES LESS THAN (10) NODEGROUP 2)",
                "nodegroup not supported",
            ),
            (
                "ALTER TABLE bogus MODIFY COLUMN x ENUM (\"def\", 'b')",
                "only single quoted string supported",
            ),
            ("ALTER TABLE `` ENGINE=InnoDB", "empty identifier not supported"),
            ("ALTER TABLE t ADD COLUMN c INT NOT NULL", "NOT NULL column needs a default value"),
        ];
        for (sql, expected) in cases {
            assert_eq!(rejection(sql, Checkers::none()), expected, "{}", sql);
        }
    }

    #[test]
    fn test_partition_bounds_fold_integer_arithmetic() {
        assert_eq!(
            run("ALTER TABLE t ADD PARTITION (PARTITION p1 VALUES LESS THAN (10+5))"),
            ClassifiedRun::Long
        );
        assert_eq!(
            run("ALTER TABLE t ADD PARTITION (PARTITION p1 VALUES LESS THAN (2 * 3 - 1))"),
            ClassifiedRun::Long
        );
        for bound in ["(1 - 2)", "(10 / 2)", "(1 +)"] {
            let sql = format!("ALTER TABLE t ADD PARTITION (PARTITION p1 VALUES LESS THAN {})", bound);
            assert_eq!(
                rejection(&sql, Checkers::none()),
                "only natural number (>= 0) supported",
                "{}",
                sql
            );
        }
    }

    #[test]
    fn test_partition_changes_are_long() {
        assert_eq!(
            run("ALTER TABLE t ADD PARTITION (PARTITION p3 VALUES LESS THAN (2000))"),
            ClassifiedRun::Long
        );
        assert_eq!(run("ALTER TABLE t DROP PARTITION p0"), ClassifiedRun::Long);
    }

    #[test]
    fn test_not_null_with_default_is_accepted() {
        let result = classify("ALTER TABLE transmission_entries ADD COLUMN live boolean NOT NULL DEFAULT 0");
        assert_eq!(result.run, ClassifiedRun::Long);
    }

    #[test]
    fn test_default_charset_name_is_accepted() {
        assert_eq!(run("ALTER TABLE t CONVERT TO CHARACTER SET DEFAULT"), ClassifiedRun::Long);
    }

    #[test]
    fn test_resolution_order() {
        let votes = |short, long, no_check_alter| Votes {
            short,
            long,
            no_check_alter,
        };
        assert_eq!(
            resolve(votes(true, true, true), DdlAction::Alter),
            Ok(ClassifiedRun::MaybeNoCheckAlter)
        );
        assert_eq!(resolve(votes(true, true, false), DdlAction::Alter), Ok(ClassifiedRun::Long));
        assert_eq!(resolve(votes(false, false, false), DdlAction::Drop), Ok(ClassifiedRun::Short));
        assert_eq!(resolve(votes(true, false, false), DdlAction::Alter), Ok(ClassifiedRun::MaybeShort));
        assert!(matches!(
            resolve(Votes::default(), DdlAction::Alter),
            Err(ClassifyError::Internal(_))
        ));
    }

    #[test]
    fn test_toggle_underscore_is_an_involution() {
        assert_eq!(toggle_underscore("fk1"), "_fk1");
        assert_eq!(toggle_underscore("_fk1"), "fk1");
        assert_eq!(toggle_underscore(&toggle_underscore("fk1")), "fk1");
    }
}
