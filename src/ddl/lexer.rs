//! Lossless tokenizer for the supported DDL subset
//!
//! Every byte of the input ends up in exactly one token, so the statement can
//! be re-serialized after rewrites without losing anything the parser skipped.

use super::{syntax_error, ClassifyError};
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag, take_until, take_while, take_while1},
    character::complete::{anychar, char, digit0, digit1, multispace1, not_line_ending, one_of},
    combinator::{map, opt, recognize},
    multi::{many0, many1},
    sequence::{pair, preceded, tuple},
    IResult,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Whitespace and comments, collapsed into one token per run
    Trivia,
    Word,
    /// `` `ident` ``
    QuotedIdent,
    /// `'text'`
    SingleQuoted,
    /// `"text"`
    DoubleQuoted,
    Number,
    Punct,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn is_trivia(&self) -> bool {
        self.kind == TokenKind::Trivia
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    pub fn is_identifier(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }

    pub fn is_string(&self) -> bool {
        matches!(self.kind, TokenKind::SingleQuoted | TokenKind::DoubleQuoted)
    }

    /// Identifier text without quoting
    pub fn identifier(&self) -> String {
        match self.kind {
            TokenKind::QuotedIdent => unquote_identifier(&self.text),
            _ => self.text.clone(),
        }
    }
}

pub fn unquote_identifier(text: &str) -> String {
    text.strip_prefix('`')
        .and_then(|t| t.strip_suffix('`'))
        .unwrap_or(text)
        .replace("``", "`")
}

pub fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Split `input` into tokens. Carriage returns are dropped first.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ClassifyError> {
    let cleaned = input.replace('\r', "");
    let mut rest = cleaned.as_str();
    let mut tokens = Vec::new();

    while !rest.is_empty() {
        match token(rest) {
            Ok((remaining, tok)) => {
                tokens.push(tok);
                rest = remaining;
            }
            Err(_) => return Err(describe_failure(rest)),
        }
    }

    Ok(tokens)
}

fn describe_failure(rest: &str) -> ClassifyError {
    match rest.chars().next() {
        Some(q @ ('\'' | '"' | '`')) => syntax_error(format!("unterminated quoted text starting with {}", q)),
        Some(c) => syntax_error(format!("unexpected character '{}'", c)),
        None => syntax_error("unexpected end of statement"),
    }
}

fn token(input: &str) -> IResult<&str, Token> {
    alt((
        map(trivia, |t| tok(TokenKind::Trivia, t)),
        map(backtick_ident, |t| tok(TokenKind::QuotedIdent, t)),
        map(single_quoted, |t| tok(TokenKind::SingleQuoted, t)),
        map(double_quoted, |t| tok(TokenKind::DoubleQuoted, t)),
        map(word, |t| tok(TokenKind::Word, t)),
        map(number, |t| tok(TokenKind::Number, t)),
        map(punct, |t| tok(TokenKind::Punct, t)),
    ))(input)
}

fn tok(kind: TokenKind, text: &str) -> Token {
    Token {
        kind,
        text: text.to_string(),
    }
}

fn trivia(input: &str) -> IResult<&str, &str> {
    recognize(many1(alt((
        multispace1,
        recognize(pair(alt((tag("--"), tag("#"))), not_line_ending)),
        recognize(tuple((tag("/*"), take_until("*/"), tag("*/")))),
    ))))(input)
}

fn backtick_ident(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('`'),
        many0(alt((tag("``"), is_not("`")))),
        char('`'),
    )))(input)
}

fn single_quoted(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('\''),
        many0(alt((
            tag("''"),
            recognize(preceded(char('\\'), anychar)),
            is_not("'\\"),
        ))),
        char('\''),
    )))(input)
}

fn double_quoted(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        char('"'),
        many0(alt((
            tag("\"\""),
            recognize(preceded(char('\\'), anychar)),
            is_not("\"\\"),
        ))),
        char('"'),
    )))(input)
}

fn word(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_alphabetic() || c == '_' || c == '$'),
        take_while(|c: char| c.is_alphanumeric() || c == '_' || c == '$'),
    ))(input)
}

fn number(input: &str) -> IResult<&str, &str> {
    recognize(tuple((
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    )))(input)
}

fn punct(input: &str) -> IResult<&str, &str> {
    alt((
        tag("<=>"),
        tag("<="),
        tag(">="),
        tag("<>"),
        tag("!="),
        tag(":="),
        tag("||"),
        tag("&&"),
        recognize(one_of("(),;=.+-*/<>!@:%&|^~?{}")),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        tokenize(sql).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_tokens_cover_the_whole_input() {
        let sql = "ALTER TABLE `t` ADD c INT DEFAULT 'x''y' -- note\n, DROP INDEX ix1;";
        let tokens = tokenize(sql).unwrap();
        let joined: String = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(joined, sql);
    }

    #[test]
    fn test_comments_and_whitespace_collapse_into_one_trivia_token() {
        assert_eq!(
            kinds("a /* x */ -- y\n  b"),
            vec![TokenKind::Word, TokenKind::Trivia, TokenKind::Word]
        );
    }

    #[test]
    fn test_quoted_forms() {
        let tokens = tokenize("`a``b` 'it''s' \"dq\" 12.5e3").unwrap();
        let significant: Vec<_> = tokens.iter().filter(|t| !t.is_trivia()).collect();
        assert_eq!(significant[0].kind, TokenKind::QuotedIdent);
        assert_eq!(significant[0].identifier(), "a`b");
        assert_eq!(significant[1].kind, TokenKind::SingleQuoted);
        assert_eq!(significant[2].kind, TokenKind::DoubleQuoted);
        assert_eq!(significant[3].kind, TokenKind::Number);
        assert_eq!(significant[3].text, "12.5e3");
    }

    #[test]
    fn test_carriage_returns_are_dropped() {
        let tokens = tokenize("DROP\r\nTABLE t").unwrap();
        assert_eq!(tokens[1].text, "\n");
    }

    #[test]
    fn test_unterminated_string_is_a_syntax_error() {
        let err = tokenize("ALTER TABLE t COMMENT 'oops").unwrap_err();
        assert!(matches!(err, ClassifyError::Syntax(_)));
    }

    #[test]
    fn test_empty_backtick_identifier_still_tokenizes() {
        let tokens = tokenize("``").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::QuotedIdent);
        assert_eq!(tokens[0].identifier(), "");
    }
}
