//! Pest-based tokenizer

use pest::error::{InputLocation, LineColLocation};
use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

use crate::error::{Position, SyntaxError};

#[derive(Parser)]
#[grammar = "sql.pest"]
struct SqlLexer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Select,
    Distinct,
    All,
    From,
    Where,
    Group,
    By,
    Having,
    Order,
    Asc,
    Desc,
    Limit,
    Offset,
    Insert,
    Into,
    Values,
    Update,
    Set,
    Delete,
    And,
    Or,
    Not,
    Like,
    In,
    Is,
    Null,
    True,
    False,
    Between,
    As,
    Join,
    Inner,
    Left,
    Right,
    Full,
    Outer,
    Cross,
    On,
    Exists,
    Over,
    Partition,
    Cast,
}

impl Keyword {
    fn from_word(word: &str) -> Option<Self> {
        let kw = match word.to_ascii_uppercase().as_str() {
            "SELECT" => Keyword::Select,
            "DISTINCT" => Keyword::Distinct,
            "ALL" => Keyword::All,
            "FROM" => Keyword::From,
            "WHERE" => Keyword::Where,
            "GROUP" => Keyword::Group,
            "BY" => Keyword::By,
            "HAVING" => Keyword::Having,
            "ORDER" => Keyword::Order,
            "ASC" => Keyword::Asc,
            "DESC" => Keyword::Desc,
            "LIMIT" => Keyword::Limit,
            "OFFSET" => Keyword::Offset,
            "INSERT" => Keyword::Insert,
            "INTO" => Keyword::Into,
            "VALUES" => Keyword::Values,
            "UPDATE" => Keyword::Update,
            "SET" => Keyword::Set,
            "DELETE" => Keyword::Delete,
            "AND" => Keyword::And,
            "OR" => Keyword::Or,
            "NOT" => Keyword::Not,
            "LIKE" => Keyword::Like,
            "IN" => Keyword::In,
            "IS" => Keyword::Is,
            "NULL" => Keyword::Null,
            "TRUE" => Keyword::True,
            "FALSE" => Keyword::False,
            "BETWEEN" => Keyword::Between,
            "AS" => Keyword::As,
            "JOIN" => Keyword::Join,
            "INNER" => Keyword::Inner,
            "LEFT" => Keyword::Left,
            "RIGHT" => Keyword::Right,
            "FULL" => Keyword::Full,
            "OUTER" => Keyword::Outer,
            "CROSS" => Keyword::Cross,
            "ON" => Keyword::On,
            "EXISTS" => Keyword::Exists,
            "OVER" => Keyword::Over,
            "PARTITION" => Keyword::Partition,
            "CAST" => Keyword::Cast,
            _ => return None,
        };
        Some(kw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Keyword(Keyword),
    Ident,
    /// `"name"` or `` `name` ``
    QuotedIdent,
    Number,
    String,
    /// `?`
    Placeholder,
    /// `:name`
    NamedParam,
    Operator,
    Punct,
    Eof,
}

/// A lexical unit. `text` holds the decoded value: strings and quoted
/// identifiers without quotes, named parameters without the colon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub position: Position,
}

impl Token {
    pub fn is_keyword(&self, kw: Keyword) -> bool {
        self.kind == TokenKind::Keyword(kw)
    }

    pub fn is_punct(&self, ch: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == ch
    }

    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident | TokenKind::QuotedIdent)
    }

    /// How the token reads in an error message.
    pub fn describe(&self) -> String {
        match self.kind {
            TokenKind::Eof => "end of input".to_string(),
            TokenKind::String => format!("'{}'", self.text),
            TokenKind::NamedParam => format!(":{}", self.text),
            _ => self.text.clone(),
        }
    }
}

/// Split SQL source into tokens, ending with an `Eof` token.
pub fn tokenize(source: &str) -> Result<Vec<Token>, SyntaxError> {
    let pairs = SqlLexer::parse(Rule::tokens, source).map_err(|e| lex_error(source, e))?;

    let mut tokens = Vec::new();
    for pair in pairs.flatten() {
        let kind = match pair.as_rule() {
            Rule::number => TokenKind::Number,
            Rule::string => TokenKind::String,
            Rule::quoted_ident => TokenKind::QuotedIdent,
            Rule::placeholder => TokenKind::Placeholder,
            Rule::named_param => TokenKind::NamedParam,
            Rule::word => match Keyword::from_word(pair.as_str()) {
                Some(kw) => TokenKind::Keyword(kw),
                None => TokenKind::Ident,
            },
            Rule::operator => TokenKind::Operator,
            Rule::punct => TokenKind::Punct,
            Rule::EOI => TokenKind::Eof,
            _ => continue,
        };
        tokens.push(Token {
            text: decode(&kind, pair.as_str()),
            position: position_of(&pair),
            kind,
        });
    }

    // EOI is always produced, but make the invariant local.
    if !matches!(tokens.last(), Some(t) if t.kind == TokenKind::Eof) {
        tokens.push(Token {
            kind: TokenKind::Eof,
            text: String::new(),
            position: end_position(source),
        });
    }
    Ok(tokens)
}

fn decode(kind: &TokenKind, raw: &str) -> String {
    match kind {
        TokenKind::String => raw[1..raw.len() - 1].replace("''", "'"),
        TokenKind::QuotedIdent if raw.starts_with('"') => raw[1..raw.len() - 1].replace("\"\"", "\""),
        TokenKind::QuotedIdent => raw[1..raw.len() - 1].to_string(),
        TokenKind::NamedParam => raw[1..].to_string(),
        _ => raw.to_string(),
    }
}

fn position_of(pair: &Pair<'_, Rule>) -> Position {
    let start = pair.as_span().start_pos();
    let (line, column) = start.line_col();
    Position {
        offset: start.pos(),
        line,
        column,
    }
}

fn end_position(source: &str) -> Position {
    let line = source.matches('\n').count() + 1;
    let column = source.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
    Position {
        offset: source.len(),
        line,
        column,
    }
}

fn lex_error(source: &str, err: pest::error::Error<Rule>) -> SyntaxError {
    let offset = match err.location {
        InputLocation::Pos(p) => p,
        InputLocation::Span((start, _)) => start,
    };
    let (line, column) = match err.line_col {
        LineColLocation::Pos(lc) => lc,
        LineColLocation::Span(lc, _) => lc,
    };
    let found = source.get(offset..).and_then(|rest| rest.chars().next());
    let message = match found {
        Some('\'') => "unterminated string literal".to_string(),
        Some(ch) => format!("unexpected character '{}'", ch),
        None => "unexpected end of input".to_string(),
    };
    SyntaxError::new(
        message,
        Position {
            offset,
            line,
            column,
        },
        found.map(String::from),
    )
}
