//! Recursive-descent parser over the token stream
//!
//! Precedence, lowest first: `OR`, `AND`, `NOT`, predicates (comparison,
//! `LIKE`, `IN`, `IS`, `BETWEEN`), additive, multiplicative, unary, primary.

use crate::ast::*;
use crate::error::SyntaxError;
use crate::lexer::{tokenize, Keyword, Token, TokenKind};

/// Parse SQL source text into a statement.
pub fn parse(source: &str) -> Result<Statement, SyntaxError> {
    let tokens = tokenize(source)?;
    let mut parser = Parser::new(tokens);
    let statement = parser.parse_statement()?;
    parser.eat_punct(";");
    parser.expect_end()?;
    Ok(statement)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    positional: usize,
    // Inside an INSERT document literal, the strings '?' and ':name' are placeholders.
    document_params: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            positional: 0,
            document_params: false,
        }
    }

    // Token access

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + n).min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if token.kind != TokenKind::Eof {
            self.pos += 1;
        }
        token
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        let token = self.peek();
        let found = (token.kind != TokenKind::Eof).then(|| token.text.clone());
        SyntaxError::new(message, token.position, found)
    }

    fn unexpected(&self, expected: &str) -> SyntaxError {
        let message = format!("expected {}, found {}", expected, self.peek().describe());
        self.error_here(message)
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.peek().is_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, kw: Keyword) -> Result<(), SyntaxError> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("{:?}", kw).to_uppercase()))
        }
    }

    fn eat_punct(&mut self, ch: &str) -> bool {
        if self.peek().is_punct(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, ch: &str) -> Result<(), SyntaxError> {
        if self.eat_punct(ch) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", ch)))
        }
    }

    fn eat_operator(&mut self, op: &str) -> bool {
        if self.peek().is_operator(op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.peek().kind == TokenKind::Eof {
            Ok(())
        } else {
            Err(self.error_here(format!("unexpected {}", self.peek().describe())))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, SyntaxError> {
        if self.peek().is_ident() {
            Ok(self.advance().text)
        } else {
            Err(self.unexpected(what))
        }
    }

    fn optional_alias(&mut self) -> Result<Option<String>, SyntaxError> {
        if self.eat_keyword(Keyword::As) {
            return self.expect_ident("alias").map(Some);
        }
        if self.peek().is_ident() {
            return Ok(Some(self.advance().text));
        }
        Ok(None)
    }

    fn comma_separated<T>(
        &mut self,
        mut item: impl FnMut(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<Vec<T>, SyntaxError> {
        let mut items = vec![item(self)?];
        while self.eat_punct(",") {
            items.push(item(self)?);
        }
        Ok(items)
    }

    // Statements

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let token = self.peek();
        if token.is_keyword(Keyword::Select) {
            self.parse_select().map(Statement::Select)
        } else if token.is_keyword(Keyword::Insert) {
            self.parse_insert().map(Statement::Insert)
        } else if token.is_keyword(Keyword::Update) {
            self.parse_update().map(Statement::Update)
        } else if token.is_keyword(Keyword::Delete) {
            self.parse_delete().map(Statement::Delete)
        } else {
            Err(self.unexpected("SELECT, INSERT, UPDATE or DELETE"))
        }
    }

    fn parse_select(&mut self) -> Result<Select, SyntaxError> {
        self.expect_keyword(Keyword::Select)?;
        let distinct = self.eat_keyword(Keyword::Distinct);
        if !distinct {
            self.eat_keyword(Keyword::All);
        }

        let items = self.comma_separated(Self::parse_select_item)?;

        self.expect_keyword(Keyword::From)?;
        let from = self.parse_table_ref()?;

        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let group_by = if self.eat_keyword(Keyword::Group) {
            self.expect_keyword(Keyword::By)?;
            self.comma_separated(Self::parse_expr)?
        } else {
            Vec::new()
        };

        let having = if self.eat_keyword(Keyword::Having) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let order_by = if self.eat_keyword(Keyword::Order) {
            self.expect_keyword(Keyword::By)?;
            self.comma_separated(Self::parse_order_item)?
        } else {
            Vec::new()
        };

        let limit = if self.eat_keyword(Keyword::Limit) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        let offset = if self.eat_keyword(Keyword::Offset) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Select {
            distinct,
            items,
            from,
            selection,
            group_by,
            having,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_select_item(&mut self) -> Result<SelectItem, SyntaxError> {
        if self.eat_operator("*") {
            return Ok(SelectItem::Wildcard);
        }
        let expr = self.parse_expr()?;
        let alias = self.optional_alias()?;
        Ok(SelectItem::Expr { expr, alias })
    }

    fn parse_order_item(&mut self) -> Result<OrderByExpr, SyntaxError> {
        let expr = self.parse_expr()?;
        let desc = if self.eat_keyword(Keyword::Desc) {
            true
        } else {
            self.eat_keyword(Keyword::Asc);
            false
        };
        Ok(OrderByExpr { expr, desc })
    }

    fn parse_table_ref(&mut self) -> Result<TableRef, SyntaxError> {
        let mut table = self.parse_table_primary()?;
        loop {
            let kind = if self.eat_keyword(Keyword::Join) {
                JoinKind::Inner
            } else if self.eat_keyword(Keyword::Inner) {
                self.expect_keyword(Keyword::Join)?;
                JoinKind::Inner
            } else if self.eat_keyword(Keyword::Cross) {
                self.expect_keyword(Keyword::Join)?;
                JoinKind::Cross
            } else if let Some(kind) = self.outer_join_kind() {
                self.eat_keyword(Keyword::Outer);
                self.expect_keyword(Keyword::Join)?;
                kind
            } else {
                return Ok(table);
            };

            let right = self.parse_table_primary()?;
            let on = if self.eat_keyword(Keyword::On) {
                Some(self.parse_expr()?)
            } else {
                None
            };
            table = TableRef::Join {
                left: Box::new(table),
                right: Box::new(right),
                kind,
                on,
            };
        }
    }

    fn outer_join_kind(&mut self) -> Option<JoinKind> {
        let kind = match self.peek().kind {
            TokenKind::Keyword(Keyword::Left) => JoinKind::Left,
            TokenKind::Keyword(Keyword::Right) => JoinKind::Right,
            TokenKind::Keyword(Keyword::Full) => JoinKind::Full,
            _ => return None,
        };
        self.pos += 1;
        Some(kind)
    }

    fn parse_table_primary(&mut self) -> Result<TableRef, SyntaxError> {
        if self.eat_punct("(") {
            let subquery = self.parse_select()?;
            self.expect_punct(")")?;
            let alias = self.optional_alias()?;
            return Ok(TableRef::Derived {
                subquery: Box::new(subquery),
                alias,
            });
        }
        let name = self.parse_collection_name()?;
        let alias = self.optional_alias()?;
        Ok(TableRef::Collection { name, alias })
    }

    /// `coll` or `db.coll`; the database qualifier is dropped.
    fn parse_collection_name(&mut self) -> Result<String, SyntaxError> {
        let mut name = self.expect_ident("collection name")?;
        while self.eat_punct(".") {
            name = self.expect_ident("collection name")?;
        }
        Ok(name)
    }

    fn parse_insert(&mut self) -> Result<Insert, SyntaxError> {
        self.expect_keyword(Keyword::Insert)?;
        self.expect_keyword(Keyword::Into)?;
        let collection = self.parse_collection_name()?;

        let source = if self.peek().is_punct("{") {
            InsertSource::Documents(vec![self.parse_document_literal()?])
        } else if self.eat_operator("<<") {
            let docs = self.comma_separated(Self::parse_document_literal)?;
            if !self.eat_operator(">>") {
                return Err(self.unexpected("'>>'"));
            }
            InsertSource::Documents(docs)
        } else {
            let columns = if self.eat_punct("(") {
                let columns = self.comma_separated(Self::parse_column_ref)?;
                self.expect_punct(")")?;
                columns
            } else {
                Vec::new()
            };
            self.expect_keyword(Keyword::Values)?;
            let rows = self.comma_separated(|p| {
                p.expect_punct("(")?;
                let row = p.comma_separated(Self::parse_expr)?;
                p.expect_punct(")")?;
                Ok(row)
            })?;
            InsertSource::Values { columns, rows }
        };

        Ok(Insert { collection, source })
    }

    fn parse_document_literal(&mut self) -> Result<Expr, SyntaxError> {
        if !self.peek().is_punct("{") {
            return Err(self.unexpected("document literal"));
        }
        self.document_params = true;
        let doc = self.parse_primary();
        self.document_params = false;
        doc
    }

    fn parse_update(&mut self) -> Result<Update, SyntaxError> {
        self.expect_keyword(Keyword::Update)?;
        let collection = self.parse_collection_name()?;
        let alias = if self.peek().is_keyword(Keyword::Set) {
            None
        } else {
            self.optional_alias()?
        };
        self.expect_keyword(Keyword::Set)?;

        let assignments = self.comma_separated(|p| {
            let column = p.parse_column_ref()?;
            if !p.eat_operator("=") {
                return Err(p.unexpected("'='"));
            }
            let value = p.parse_expr()?;
            Ok(Assignment { column, value })
        })?;

        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };

        Ok(Update {
            collection,
            alias,
            assignments,
            selection,
        })
    }

    fn parse_delete(&mut self) -> Result<Delete, SyntaxError> {
        self.expect_keyword(Keyword::Delete)?;
        self.expect_keyword(Keyword::From)?;
        let collection = self.parse_collection_name()?;
        let alias = self.optional_alias()?;
        let selection = if self.eat_keyword(Keyword::Where) {
            Some(self.parse_expr()?)
        } else {
            None
        };
        Ok(Delete {
            collection,
            alias,
            selection,
        })
    }

    // Expressions

    fn parse_expr(&mut self) -> Result<Expr, SyntaxError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword(Keyword::Or) {
            let right = self.parse_and()?;
            left = Expr::BooleanOp {
                op: BoolOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword(Keyword::And) {
            let right = self.parse_not()?;
            left = Expr::BooleanOp {
                op: BoolOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_keyword(Keyword::Not) {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_predicate()
    }

    fn parse_predicate(&mut self) -> Result<Expr, SyntaxError> {
        let left = self.parse_additive()?;

        if let Some(op) = self.comparison_op() {
            let right = self.parse_additive()?;
            return Ok(Expr::Comparison {
                op,
                left: Box::new(left),
                right: Box::new(right),
            });
        }

        if self.eat_keyword(Keyword::Is) {
            let negated = self.eat_keyword(Keyword::Not);
            self.expect_keyword(Keyword::Null)?;
            return Ok(Expr::IsNull {
                expr: Box::new(left),
                negated,
            });
        }

        let negated = self.peek().is_keyword(Keyword::Not)
            && matches!(
                self.peek_nth(1).kind,
                TokenKind::Keyword(Keyword::Like | Keyword::In | Keyword::Between)
            );
        if negated {
            self.pos += 1;
        }

        if self.eat_keyword(Keyword::Like) {
            let pattern = self.parse_additive()?;
            return Ok(Expr::Like {
                expr: Box::new(left),
                pattern: Box::new(pattern),
                negated,
            });
        }

        if self.eat_keyword(Keyword::In) {
            self.expect_punct("(")?;
            if self.peek().is_keyword(Keyword::Select) {
                let subquery = self.parse_select()?;
                self.expect_punct(")")?;
                return Ok(Expr::InSubquery {
                    expr: Box::new(left),
                    subquery: Box::new(subquery),
                    negated,
                });
            }
            let list = self.comma_separated(Self::parse_expr)?;
            self.expect_punct(")")?;
            return Ok(Expr::InList {
                expr: Box::new(left),
                list,
                negated,
            });
        }

        if self.eat_keyword(Keyword::Between) {
            let low = self.parse_additive()?;
            self.expect_keyword(Keyword::And)?;
            let high = self.parse_additive()?;
            return Ok(Expr::Between {
                expr: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
                negated,
            });
        }

        Ok(left)
    }

    fn comparison_op(&mut self) -> Option<ComparisonOp> {
        let token = self.peek();
        if token.kind != TokenKind::Operator {
            return None;
        }
        let op = match token.text.as_str() {
            "=" | "==" => ComparisonOp::Eq,
            "!=" | "<>" => ComparisonOp::Ne,
            "<" => ComparisonOp::Lt,
            "<=" => ComparisonOp::Le,
            ">" => ComparisonOp::Gt,
            ">=" => ComparisonOp::Ge,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_operator("+") {
                ArithOp::Add
            } else if self.eat_operator("-") {
                ArithOp::Sub
            } else if self.eat_operator("||") {
                ArithOp::Concat
            } else {
                return Ok(left);
            };
            let right = self.parse_multiplicative()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = if self.eat_operator("*") {
                ArithOp::Mul
            } else if self.eat_operator("/") {
                ArithOp::Div
            } else if self.eat_operator("%") {
                ArithOp::Mod
            } else {
                return Ok(left);
            };
            let right = self.parse_unary()?;
            left = Expr::Arithmetic {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat_operator("-") {
            let inner = self.parse_unary()?;
            return Ok(match inner {
                Expr::Literal(Literal::Integer(i)) => Expr::Literal(Literal::Integer(-i)),
                Expr::Literal(Literal::Number(n)) => Expr::Literal(Literal::Number(format!("-{}", n))),
                other => Expr::Negate(Box::new(other)),
            });
        }
        if self.eat_operator("+") {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SyntaxError> {
        let token = self.peek().clone();
        match &token.kind {
            TokenKind::Number => {
                self.pos += 1;
                Ok(Expr::Literal(number_literal(&token.text)))
            }
            TokenKind::String => {
                self.pos += 1;
                if self.document_params {
                    if token.text == "?" {
                        return Ok(self.next_positional());
                    }
                    if let Some(name) = token.text.strip_prefix(':') {
                        if is_param_name(name) {
                            return Ok(Expr::Placeholder(Placeholder::Named(name.to_string())));
                        }
                    }
                }
                Ok(Expr::Literal(Literal::String(token.text)))
            }
            TokenKind::Placeholder => {
                self.pos += 1;
                Ok(self.next_positional())
            }
            TokenKind::NamedParam => {
                self.pos += 1;
                Ok(Expr::Placeholder(Placeholder::Named(token.text)))
            }
            TokenKind::Keyword(Keyword::Null) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Null))
            }
            TokenKind::Keyword(Keyword::True) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Bool(true)))
            }
            TokenKind::Keyword(Keyword::False) => {
                self.pos += 1;
                Ok(Expr::Literal(Literal::Bool(false)))
            }
            TokenKind::Keyword(Keyword::Exists) => {
                self.pos += 1;
                self.expect_punct("(")?;
                let subquery = self.parse_select()?;
                self.expect_punct(")")?;
                Ok(Expr::Exists {
                    subquery: Box::new(subquery),
                    negated: false,
                })
            }
            TokenKind::Keyword(Keyword::Cast) => {
                self.pos += 1;
                self.parse_cast()
            }
            TokenKind::Punct if token.text == "(" => {
                self.pos += 1;
                if self.peek().is_keyword(Keyword::Select) {
                    let subquery = self.parse_select()?;
                    self.expect_punct(")")?;
                    return Ok(Expr::Subquery(Box::new(subquery)));
                }
                let inner = self.parse_expr()?;
                self.expect_punct(")")?;
                Ok(inner)
            }
            TokenKind::Punct if token.text == "[" => {
                self.pos += 1;
                let items = if self.peek().is_punct("]") {
                    Vec::new()
                } else {
                    self.comma_separated(Self::parse_expr)?
                };
                self.expect_punct("]")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct if token.text == "{" => {
                self.pos += 1;
                let fields = if self.peek().is_punct("}") {
                    Vec::new()
                } else {
                    self.comma_separated(|p| {
                        let kind = p.peek().kind.clone();
                        let key = match kind {
                            TokenKind::String | TokenKind::Ident | TokenKind::QuotedIdent => p.advance().text,
                            _ => return Err(p.unexpected("field name")),
                        };
                        p.expect_punct(":")?;
                        let value = p.parse_expr()?;
                        Ok((key, value))
                    })?
                };
                self.expect_punct("}")?;
                Ok(Expr::Object(fields))
            }
            TokenKind::Ident | TokenKind::QuotedIdent => {
                if token.kind == TokenKind::Ident && self.peek_nth(1).is_punct("(") {
                    return self.parse_function_call();
                }
                self.parse_column_ref().map(Expr::Column)
            }
            _ => Err(self.unexpected("expression")),
        }
    }

    fn next_positional(&mut self) -> Expr {
        let index = self.positional;
        self.positional += 1;
        Expr::Placeholder(Placeholder::Positional(index))
    }

    fn parse_column_ref(&mut self) -> Result<ColumnRef, SyntaxError> {
        let mut segments = vec![PathSegment::Field(self.expect_ident("column name")?)];
        loop {
            if self.eat_punct(".") {
                segments.push(PathSegment::Field(self.expect_ident("field name")?));
            } else if self.eat_punct("[") {
                let token = self.peek().clone();
                let index = match token.kind {
                    TokenKind::Number => token.text.parse::<usize>().ok(),
                    _ => None,
                };
                let index = index.ok_or_else(|| self.unexpected("array index"))?;
                self.pos += 1;
                self.expect_punct("]")?;
                segments.push(PathSegment::Index(index));
            } else {
                return Ok(ColumnRef { segments });
            }
        }
    }

    fn parse_function_call(&mut self) -> Result<Expr, SyntaxError> {
        let name = self.advance().text;
        self.expect_punct("(")?;

        let distinct = self.eat_keyword(Keyword::Distinct);
        let args = if self.eat_punct(")") {
            Vec::new()
        } else {
            let args = self.comma_separated(|p| {
                if p.eat_operator("*") {
                    Ok(FunctionArg::Wildcard)
                } else {
                    p.parse_expr().map(FunctionArg::Expr)
                }
            })?;
            self.expect_punct(")")?;
            args
        };

        let over = if self.eat_keyword(Keyword::Over) {
            self.expect_punct("(")?;
            let partition_by = if self.eat_keyword(Keyword::Partition) {
                self.expect_keyword(Keyword::By)?;
                self.comma_separated(Self::parse_expr)?
            } else {
                Vec::new()
            };
            let order_by = if self.eat_keyword(Keyword::Order) {
                self.expect_keyword(Keyword::By)?;
                self.comma_separated(Self::parse_order_item)?
            } else {
                Vec::new()
            };
            self.expect_punct(")")?;
            Some(WindowSpec {
                partition_by,
                order_by,
            })
        } else {
            None
        };

        Ok(Expr::FunctionCall(FunctionCall {
            name,
            args,
            distinct,
            over,
        }))
    }

    fn parse_cast(&mut self) -> Result<Expr, SyntaxError> {
        self.expect_punct("(")?;
        let expr = self.parse_expr()?;
        self.expect_keyword(Keyword::As)?;

        let mut data_type = self.expect_ident("type name")?;
        while self.peek().kind == TokenKind::Ident {
            data_type.push(' ');
            data_type.push_str(&self.advance().text);
        }
        if self.eat_punct("(") {
            let mut params = Vec::new();
            loop {
                if self.peek().kind != TokenKind::Number {
                    return Err(self.unexpected("type parameter"));
                }
                params.push(self.advance().text);
                if !self.eat_punct(",") {
                    break;
                }
            }
            self.expect_punct(")")?;
            data_type = format!("{}({})", data_type, params.join(","));
        }

        self.expect_punct(")")?;
        Ok(Expr::Cast {
            expr: Box::new(expr),
            data_type,
        })
    }
}

fn number_literal(text: &str) -> Literal {
    let integral = !text.contains(['.', 'e', 'E']);
    match text.parse::<i64>() {
        Ok(i) if integral => Literal::Integer(i),
        _ => Literal::Number(text.to_string()),
    }
}

fn is_param_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn select(sql: &str) -> Select {
        match parse(sql).unwrap() {
            Statement::Select(s) => s,
            other => panic!("expected SELECT, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_simple_query() {
        let s = select("SELECT name, age FROM users WHERE age > 25 ORDER BY age LIMIT 10");
        assert_eq!(s.items.len(), 2);
        assert_eq!(
            s.from,
            TableRef::Collection {
                name: "users".to_string(),
                alias: None
            }
        );
        assert_eq!(
            s.selection,
            Some(Expr::Comparison {
                op: ComparisonOp::Gt,
                left: Box::new(Expr::column("age")),
                right: Box::new(Expr::Literal(Literal::Integer(25))),
            })
        );
        assert_eq!(s.order_by, vec![OrderByExpr { expr: Expr::column("age"), desc: false }]);
        assert_eq!(s.limit, Some(Expr::Literal(Literal::Integer(10))));
    }

    #[test]
    fn test_precedence() {
        // a OR b AND NOT c  =>  a OR (b AND (NOT c))
        let s = select("SELECT * FROM t WHERE a = 1 OR b = 2 AND NOT c = 3");
        match s.selection.unwrap() {
            Expr::BooleanOp { op: BoolOp::Or, right, .. } => match *right {
                Expr::BooleanOp { op: BoolOp::And, right, .. } => {
                    assert!(matches!(*right, Expr::Not(_)));
                }
                other => panic!("expected AND, got {:?}", other),
            },
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic_precedence() {
        let s = select("SELECT a + b * 2 AS x FROM t");
        match &s.items[0] {
            SelectItem::Expr { expr: Expr::Arithmetic { op: ArithOp::Add, right, .. }, alias } => {
                assert!(matches!(**right, Expr::Arithmetic { op: ArithOp::Mul, .. }));
                assert_eq!(alias.as_deref(), Some("x"));
            }
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_predicates() {
        let s = select(
            "SELECT * FROM t WHERE a BETWEEN 1 AND 5 AND b NOT IN (1, 2) AND c NOT LIKE 'x%' AND d IS NOT NULL",
        );
        let mut kinds = Vec::new();
        s.selection.unwrap().walk(&mut |e| match e {
            Expr::Between { negated, .. } => kinds.push(("between", *negated)),
            Expr::InList { negated, .. } => kinds.push(("in", *negated)),
            Expr::Like { negated, .. } => kinds.push(("like", *negated)),
            Expr::IsNull { negated, .. } => kinds.push(("isnull", *negated)),
            _ => {}
        });
        assert_eq!(
            kinds,
            vec![("between", false), ("in", true), ("like", true), ("isnull", true)]
        );
    }

    #[test]
    fn test_nested_paths_and_params() {
        let s = select("SELECT items[0].name FROM orders o WHERE o.customer.id = ? AND total > :min");
        match &s.items[0] {
            SelectItem::Expr { expr: Expr::Column(col), .. } => assert_eq!(col.path(&[]), "items.0.name"),
            other => panic!("unexpected item {:?}", other),
        }
        let mut params = Vec::new();
        s.selection.unwrap().walk(&mut |e| {
            if let Expr::Placeholder(p) = e {
                params.push(p.clone());
            }
        });
        assert_eq!(
            params,
            vec![Placeholder::Positional(0), Placeholder::Named("min".to_string())]
        );
    }

    #[test]
    fn test_group_having_offset() {
        let s = select(
            "SELECT age, COUNT(*) FROM users GROUP BY age HAVING COUNT(*) > 1 ORDER BY age DESC LIMIT 5 OFFSET 10;",
        );
        assert_eq!(s.group_by, vec![Expr::column("age")]);
        assert!(s.having.is_some());
        assert!(s.order_by[0].desc);
        assert_eq!(s.offset, Some(Expr::Literal(Literal::Integer(10))));
    }

    #[test]
    fn test_insert_forms() {
        match parse("INSERT INTO users (id, name) VALUES (1, 'a'), (2, 'b')").unwrap() {
            Statement::Insert(Insert { source: InsertSource::Values { columns, rows }, .. }) => {
                assert_eq!(columns.len(), 2);
                assert_eq!(rows.len(), 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("INSERT INTO items << {'a': '?'}, {'a': ':b'} >>").unwrap() {
            Statement::Insert(Insert { source: InsertSource::Documents(docs), .. }) => {
                assert_eq!(
                    docs,
                    vec![
                        Expr::Object(vec![("a".to_string(), Expr::Placeholder(Placeholder::Positional(0)))]),
                        Expr::Object(vec![("a".to_string(), Expr::Placeholder(Placeholder::Named("b".to_string())))]),
                    ]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_update_and_delete() {
        match parse("UPDATE users SET age = age + 1, name = 'x' WHERE id = 3").unwrap() {
            Statement::Update(u) => {
                assert_eq!(u.assignments.len(), 2);
                assert!(u.selection.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
        match parse("DELETE FROM users").unwrap() {
            Statement::Delete(d) => assert!(d.selection.is_none()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_syntax_still_parses() {
        assert!(parse("SELECT * FROM a JOIN b ON a.id = b.a_id").is_ok());
        assert!(parse("SELECT * FROM (SELECT * FROM t) x").is_ok());
        assert!(parse("SELECT * FROM t WHERE id IN (SELECT id FROM u)").is_ok());
        assert!(parse("SELECT ROW_NUMBER() OVER (PARTITION BY a ORDER BY b) FROM t").is_ok());
    }

    #[test]
    fn test_clause_order_error_position() {
        let err = parse("SELECT a FROM t LIMIT 1 WHERE a = 1").unwrap_err();
        assert_eq!(err.found.as_deref(), Some("WHERE"));
        assert_eq!(err.position.column, 25);
    }

    #[test]
    fn test_missing_from() {
        let err = parse("SELECT a WHERE a = 1").unwrap_err();
        assert_eq!(err.message, "expected FROM, found WHERE");
        assert_eq!(err.position.offset, 9);
    }

    #[test]
    fn test_cast() {
        let s = select("SELECT CAST(price AS DECIMAL(10, 2)) AS p FROM t");
        match &s.items[0] {
            SelectItem::Expr { expr: Expr::Cast { data_type, .. }, .. } => assert_eq!(data_type, "DECIMAL(10,2)"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
