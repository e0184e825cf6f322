//! 过滤查询的语法分析器
//!
//! ## 解析流程图
//!
//! ```text
//! parse()
//!   └─ parse_node()                      右结合: clause (op? node)?
//!        ├─ parse_clause()
//!        │    ├─ "NOT" → LeftOnly { leading_operator: NOT }
//!        │    └─ parse_group()
//!        │         ├─ "(" node ")"       → 加括号的节点
//!        │         └─ parse_field_exp()
//!        │              ├─ ["-" | "+"] field ":" value
//!        │              │     ├─ "(" ... ")"        字段分组，字段下推到组内裸词
//!        │              │     ├─ "[" a TO b "]"     区间，"{" "}" 表示开区间
//!        │              │     └─ ["-"] term | "quoted"
//!        │              └─ ["-" | "+"] term | "quoted"
//!        └─ 运算符: AND | OR | NOT | AND NOT | OR NOT | && | || | 空格(隐式 AND)
//! ```
//!
//! ## 取反规则
//!
//! - `-foo`、`-level:info`: 整个谓词取反
//! - `level:-info`: 搜索值为 `-info`，谓词不取反
//!
//! ## 解析示例
//!
//! ```text
//! foo bar                       隐式 AND
//! level:info OR level:warn
//! service:api -level:debug
//! duration:[100 TO 200}
//! level:(info OR warn) "exact phrase"
//! url:http://example.com        URL 中的冒号在解析前被保护
//! ```

use crate::ast::{BoolOp, FieldRef, Node, Query, RangedTerm, Term};
use crate::escape::{decode_special_tokens, encode_special_tokens, raw_offset};
use crate::lexer::Lexer;
use crate::token::{Span, Token, TokenKind};

/// 嵌套层数上限，超过时报错而不是耗尽栈空间
const MAX_DEPTH: usize = 128;

/// 整个查询的子句总数上限。运算符链折叠成右结合的树，树高随子句数增长
pub const MAX_CLAUSES: usize = 1024;

pub struct Parser<'a> {
    tokens: &'a [Token<'a>],
    position: usize,
    /// `field:( ... )` 分组内，裸词继承的字段
    field_context: Option<String>,
    depth: usize,
    clauses: usize,
}

/// `span` 是相对原始查询文本的字节区间
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub span: Option<Span>,
}

impl ParseError {
    fn new(message: String, span: Option<Span>) -> Self {
        Self { message, span }
    }

    fn at_position(message: String, span: Span) -> Self {
        Self {
            message,
            span: Some(span),
        }
    }

    /// 把编码后文本上的区间换算回原始文本
    fn into_raw(self, encoded: &str) -> Self {
        let span = self
            .span
            .map(|span| Span::new(raw_offset(encoded, span.start), raw_offset(encoded, span.end)));
        Self { span, ..self }
    }
}

/// 解析原始查询文本: 先保护特殊冒号，再分词、解析
pub fn parse(raw: &str) -> Result<Query, ParseError> {
    let encoded = encode_special_tokens(raw);
    let tokens: Vec<_> = Lexer::new(&encoded).collect();
    Parser::new(&tokens).parse().map_err(|err| err.into_raw(&encoded))
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token<'a>]) -> Self {
        Self {
            tokens,
            position: 0,
            field_context: None,
            depth: 0,
            clauses: 0,
        }
    }

    /// 返回当前 token，不推进位置
    fn peek(&self) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position)
    }

    /// 返回当前 token 之后的第 n 个 token
    fn peek_nth(&self, n: usize) -> Option<&'a Token<'a>> {
        self.tokens.get(self.position + n)
    }

    /// 返回当前 token 并推进位置
    fn advance(&mut self) -> Option<&'a Token<'a>> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    /// 检查当前 token 是否匹配给定类型
    fn match_token(&self, kind: &TokenKind) -> bool {
        if let Some(token) = self.peek() {
            std::mem::discriminant(&token.kind) == std::mem::discriminant(kind)
        } else {
            false
        }
    }

    /// 期望特定类型的 token 并推进，否则返回错误
    fn expect(&mut self, expected: TokenKind) -> Result<Span, ParseError> {
        match self.peek() {
            Some(token) if std::mem::discriminant(&token.kind) == std::mem::discriminant(&expected) => {
                let span = token.span;
                self.position += 1;
                Ok(span)
            }
            Some(token) => Err(ParseError::at_position(
                format!("Expected {:?}, found {:?}", expected, token.kind),
                token.span,
            )),
            None => Err(ParseError::new(
                format!("Expected {:?}, but reached end of input", expected),
                None,
            )),
        }
    }

    fn unexpected(&self, what: &str) -> ParseError {
        match self.peek() {
            Some(token) => ParseError::at_position(
                format!("Expected {}, found {:?}", what, token.kind),
                token.span,
            ),
            None => ParseError::new(format!("Expected {}, but reached end of input", what), None),
        }
    }

    pub fn parse(&mut self) -> Result<Query, ParseError> {
        if self.tokens.is_empty() {
            return Ok(Query { root: None });
        }

        let root = self.parse_node()?;

        if let Some(token) = self.peek() {
            return Err(ParseError::at_position(
                format!("Unexpected token: {:?}", token.kind),
                token.span,
            ));
        }

        Ok(Query { root: Some(root) })
    }

    /// 在嵌套层数限制内执行 `f`
    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, ParseError>) -> Result<T, ParseError> {
        if self.depth >= MAX_DEPTH {
            return Err(self.unexpected("a less deeply nested query"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    /// 计数后解析一个子句，超过 [`MAX_CLAUSES`] 时报错
    fn counted_clause(&mut self) -> Result<Node, ParseError> {
        if self.clauses >= MAX_CLAUSES {
            return Err(self.unexpected("fewer search clauses"));
        }
        self.clauses += 1;
        self.parse_clause()
    }

    /// 解析由运算符连接的子句序列，运算符右结合:
    /// `a b c` → `a AND (b AND c)`，但后者不加括号
    fn parse_node(&mut self) -> Result<Node, ParseError> {
        let mut clauses = vec![self.counted_clause()?];
        let mut operators = Vec::new();

        loop {
            let operator = match self.peek().map(|t| &t.kind) {
                None | Some(TokenKind::RParen) => break,
                Some(TokenKind::And) => {
                    self.advance();
                    if self.match_token(&TokenKind::Not) {
                        self.advance();
                        BoolOp::AndNot
                    } else {
                        BoolOp::And
                    }
                }
                Some(TokenKind::Or) => {
                    self.advance();
                    if self.match_token(&TokenKind::Not) {
                        self.advance();
                        BoolOp::OrNot
                    } else {
                        BoolOp::Or
                    }
                }
                Some(TokenKind::Not) => {
                    self.advance();
                    BoolOp::Not
                }
                Some(kind) if kind.starts_clause() => BoolOp::Implicit,
                Some(_) => return Err(self.unexpected("an operator or a clause")),
            };

            if !self.peek().is_some_and(|t| t.kind.starts_clause()) {
                return Err(self.unexpected("a clause after the operator"));
            }

            operators.push(operator);
            clauses.push(self.counted_clause()?);
        }

        // 从右向左折叠
        let mut node = clauses.pop().ok_or_else(|| self.unexpected("a clause"))?;
        while let (Some(operator), Some(left)) = (operators.pop(), clauses.pop()) {
            node = Node::Binary {
                left: Box::new(left),
                operator,
                right: Box::new(node),
                parenthesized: false,
            };
        }
        Ok(node)
    }

    /// 解析子句，`NOT` 只作用于紧随其后的一个分组
    fn parse_clause(&mut self) -> Result<Node, ParseError> {
        if self.match_token(&TokenKind::Not) {
            self.advance(); // 消费 NOT
            let inner = self.nested(Self::parse_clause)?;
            return Ok(Node::LeftOnly {
                left: Box::new(inner),
                leading_operator: Some(BoolOp::Not),
                parenthesized: false,
            });
        }
        self.parse_group()
    }

    fn parse_group(&mut self) -> Result<Node, ParseError> {
        if self.match_token(&TokenKind::LParen) {
            return self.parse_paren_group();
        }
        self.parse_field_exp()
    }

    /// `( node )`，调用时当前 token 是左括号
    fn parse_paren_group(&mut self) -> Result<Node, ParseError> {
        let open = self.expect(TokenKind::LParen)?;
        if self.match_token(&TokenKind::RParen) {
            return Err(ParseError::at_position("Empty group".to_string(), open));
        }
        let inner = self.nested(Self::parse_node)?;
        self.expect(TokenKind::RParen)?;
        Ok(inner.parenthesized())
    }

    fn parse_field_exp(&mut self) -> Result<Node, ParseError> {
        let mut negated = false;
        let mut prefixed = false;
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Minus) => {
                self.advance();
                negated = true;
                prefixed = true;
            }
            Some(TokenKind::Plus) => {
                self.advance();
                prefixed = true;
            }
            _ => {}
        }

        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("a term"));
        };

        match token.kind {
            TokenKind::Term(name) if self.peek_nth(1).is_some_and(|t| t.kind == TokenKind::Colon) => {
                self.advance(); // 字段名
                self.advance(); // 消费 ':'
                self.parse_field_value(decode_special_tokens(name), negated)
            }
            TokenKind::Term(text) => {
                self.advance();
                Ok(Node::Term(Term {
                    field: self.context_field(),
                    text: decode_special_tokens(text),
                    quoted: false,
                    negated,
                }))
            }
            TokenKind::Quoted(text) => {
                self.advance();
                Ok(Node::Term(Term {
                    field: self.context_field(),
                    text: decode_special_tokens(text),
                    quoted: true,
                    negated,
                }))
            }
            // `-( ... )` 取反整个分组，`+( ... )` 等同于不带前缀
            TokenKind::LParen if prefixed => {
                let group = self.parse_paren_group()?;
                Ok(if negated { negate(group) } else { group })
            }
            TokenKind::Unterminated(_) => Err(ParseError::at_position(
                "Unterminated quoted string".to_string(),
                token.span,
            )),
            _ => Err(self.unexpected("a term")),
        }
    }

    fn context_field(&self) -> FieldRef {
        match &self.field_context {
            Some(field) => FieldRef::Named(field.clone()),
            None => FieldRef::Implicit,
        }
    }

    /// 解析 `field:` 之后的部分
    fn parse_field_value(&mut self, field: String, negated: bool) -> Result<Node, ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("a value after the field"));
        };

        match token.kind {
            TokenKind::LParen => {
                let saved = self.field_context.replace(field);
                let group = self.parse_paren_group();
                self.field_context = saved;
                let group = group?;
                Ok(if negated { negate(group) } else { group })
            }
            TokenKind::LBracket | TokenKind::LBrace => self.parse_range(field, negated),
            TokenKind::Minus | TokenKind::Plus => {
                self.advance();
                let prefix = if token.kind == TokenKind::Minus { "-" } else { "" };
                let (text, quoted) = self.parse_value_literal()?;
                Ok(Node::Term(Term {
                    field: FieldRef::Named(field),
                    text: format!("{}{}", prefix, text),
                    quoted,
                    negated,
                }))
            }
            _ => {
                let (text, quoted) = self.parse_value_literal()?;
                Ok(Node::Term(Term {
                    field: FieldRef::Named(field),
                    text,
                    quoted,
                    negated,
                }))
            }
        }
    }

    /// 解析一个值字面量，返回解码后的文本和是否带引号
    fn parse_value_literal(&mut self) -> Result<(String, bool), ParseError> {
        let Some(token) = self.peek().cloned() else {
            return Err(self.unexpected("a value"));
        };
        match token.kind {
            TokenKind::Term(text) => {
                self.advance();
                Ok((decode_special_tokens(text), false))
            }
            TokenKind::Quoted(text) => {
                self.advance();
                Ok((decode_special_tokens(text), true))
            }
            TokenKind::Unterminated(_) => Err(ParseError::at_position(
                "Unterminated quoted string".to_string(),
                token.span,
            )),
            _ => Err(self.unexpected("a value")),
        }
    }

    /// `[min TO max]`，方括号为闭区间，花括号为开区间，两端可以混用
    fn parse_range(&mut self, field: String, negated: bool) -> Result<Node, ParseError> {
        let min_inclusive = match self.advance().map(|t| &t.kind) {
            Some(TokenKind::LBracket) => true,
            Some(TokenKind::LBrace) => false,
            _ => return Err(self.unexpected("'[' or '{'")),
        };

        let min = self.parse_range_bound()?;
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Term("TO")) => {
                self.advance();
            }
            _ => return Err(self.unexpected("TO")),
        }
        let max = self.parse_range_bound()?;

        let max_inclusive = match self.peek().map(|t| &t.kind) {
            Some(TokenKind::RBracket) => true,
            Some(TokenKind::RBrace) => false,
            _ => return Err(self.unexpected("']' or '}'")),
        };
        self.advance();

        Ok(Node::Range(RangedTerm {
            field: FieldRef::Named(field),
            min,
            max,
            min_inclusive,
            max_inclusive,
            negated,
        }))
    }

    fn parse_range_bound(&mut self) -> Result<String, ParseError> {
        let prefix = if self.match_token(&TokenKind::Minus) {
            self.advance();
            "-"
        } else {
            ""
        };
        match self.peek().map(|t| &t.kind) {
            Some(TokenKind::Term("TO")) => Err(self.unexpected("a range bound")),
            Some(TokenKind::Term(_)) | Some(TokenKind::Quoted(_)) => {
                let (text, _) = self.parse_value_literal()?;
                Ok(format!("{}{}", prefix, text))
            }
            _ => Err(self.unexpected("a range bound")),
        }
    }
}

fn negate(node: Node) -> Node {
    Node::LeftOnly {
        left: Box::new(node),
        leading_operator: Some(BoolOp::Not),
        parenthesized: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root(input: &str) -> Node {
        parse(input).unwrap().root.expect("non-empty query")
    }

    fn term(field: FieldRef, text: &str, quoted: bool, negated: bool) -> Node {
        Node::Term(Term {
            field,
            text: text.to_string(),
            quoted,
            negated,
        })
    }

    fn named(name: &str) -> FieldRef {
        FieldRef::Named(name.to_string())
    }

    #[test]
    fn test_blank_query() {
        assert_eq!(parse("").unwrap().root, None);
        assert_eq!(parse("   ").unwrap().root, None);
    }

    #[test]
    fn test_simple_bare_term() {
        assert_eq!(root("foo"), term(FieldRef::Implicit, "foo", false, false));
    }

    #[test]
    fn test_field_term() {
        assert_eq!(root("level:info"), term(named("level"), "info", false, false));
    }

    #[test]
    fn test_implicit_and_is_right_associative() {
        let node = root("a b c");
        if let Node::Binary { left, operator, right, parenthesized } = node {
            assert_eq!(*left, term(FieldRef::Implicit, "a", false, false));
            assert_eq!(operator, BoolOp::Implicit);
            assert!(!parenthesized);
            assert!(matches!(*right, Node::Binary { operator: BoolOp::Implicit, parenthesized: false, .. }));
        } else {
            panic!("Expected binary node");
        }
    }

    #[test]
    fn test_explicit_operators() {
        for (input, expected) in [
            ("a AND b", BoolOp::And),
            ("a && b", BoolOp::And),
            ("a OR b", BoolOp::Or),
            ("a || b", BoolOp::Or),
            ("a NOT b", BoolOp::Not),
            ("a AND NOT b", BoolOp::AndNot),
            ("a OR NOT b", BoolOp::OrNot),
        ] {
            match root(input) {
                Node::Binary { operator, .. } => assert_eq!(operator, expected, "{}", input),
                other => panic!("Expected binary node for {}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_leading_not() {
        assert_eq!(
            root("NOT foo"),
            Node::LeftOnly {
                left: Box::new(term(FieldRef::Implicit, "foo", false, false)),
                leading_operator: Some(BoolOp::Not),
                parenthesized: false,
            }
        );
    }

    #[test]
    fn test_negation_asymmetry() {
        assert_eq!(root("-foo"), term(FieldRef::Implicit, "foo", false, true));
        assert_eq!(root("-level:info"), term(named("level"), "info", false, true));
        assert_eq!(root("level:-5"), term(named("level"), "-5", false, false));
    }

    #[test]
    fn test_quoted_terms() {
        assert_eq!(root(r#""foo bar""#), term(FieldRef::Implicit, "foo bar", true, false));
        assert_eq!(root(r#"service:"api gw""#), term(named("service"), "api gw", true, false));
        assert_eq!(root(r#""say \"hi\"""#), term(FieldRef::Implicit, r#"say "hi""#, true, false));
    }

    #[test]
    fn test_parenthesized_group() {
        let node = root("foo (bar baz)");
        if let Node::Binary { right, .. } = node {
            assert!(matches!(*right, Node::Binary { parenthesized: true, .. }));
        } else {
            panic!("Expected binary node");
        }
    }

    #[test]
    fn test_single_term_group() {
        assert_eq!(
            root("(foo)"),
            Node::LeftOnly {
                left: Box::new(term(FieldRef::Implicit, "foo", false, false)),
                leading_operator: None,
                parenthesized: true,
            }
        );
    }

    #[test]
    fn test_field_group_pushes_field_down() {
        let node = root("level:(info OR warn)");
        if let Node::Binary { left, right, operator, parenthesized } = node {
            assert_eq!(operator, BoolOp::Or);
            assert!(parenthesized);
            assert_eq!(*left, term(named("level"), "info", false, false));
            assert_eq!(*right, term(named("level"), "warn", false, false));
        } else {
            panic!("Expected binary node");
        }
    }

    #[test]
    fn test_ranges() {
        assert_eq!(
            root("duration:[10 TO 20}"),
            Node::Range(RangedTerm {
                field: named("duration"),
                min: "10".to_string(),
                max: "20".to_string(),
                min_inclusive: true,
                max_inclusive: false,
                negated: false,
            })
        );
        assert_eq!(
            root("-temp:{-5 TO 5]"),
            Node::Range(RangedTerm {
                field: named("temp"),
                min: "-5".to_string(),
                max: "5".to_string(),
                min_inclusive: false,
                max_inclusive: true,
                negated: true,
            })
        );
    }

    #[test]
    fn test_urls_are_not_fields() {
        assert_eq!(
            root("url:http://example.com/path"),
            term(named("url"), "http://example.com/path", false, false)
        );
        assert_eq!(root("localhost:8080"), term(FieldRef::Implicit, "localhost:8080", false, false));
        assert_eq!(root(r"time\:stamp"), term(FieldRef::Implicit, "time:stamp", false, false));
    }

    #[test]
    fn test_wildcards_are_kept_in_text() {
        assert_eq!(root("*foo*"), term(FieldRef::Implicit, "*foo*", false, false));
    }

    #[test]
    fn test_errors() {
        for input in [
            r#"foo "bar"#,
            "(foo",
            "foo)",
            "()",
            "foo AND",
            "OR foo",
            "level:",
            "duration:[1 TO",
            "duration:[1 2]",
        ] {
            assert!(parse(input).is_err(), "expected error for {:?}", input);
        }
    }

    #[test]
    fn test_error_carries_span() {
        let err = parse(r#"foo "bar"#).unwrap_err();
        assert_eq!(err.span, Some(Span::new(4, 8)));
    }

    #[test]
    fn test_long_chain_is_not_limited_by_nesting() {
        let query = vec!["foo"; MAX_CLAUSES].join(" ");
        assert!(parse(&query).is_ok());
    }

    #[test]
    fn test_clause_limit() {
        let query = vec!["foo"; MAX_CLAUSES + 1].join(" ");
        let err = parse(&query).unwrap_err();
        // 第 MAX_CLAUSES + 1 个 foo 的位置
        let start = MAX_CLAUSES * 4;
        assert_eq!(err.span, Some(Span::new(start, start + 3)));

        // 分组内的子句同样计数
        let grouped = format!("({}) bar", vec!["foo"; MAX_CLAUSES].join(" "));
        assert!(parse(&grouped).is_err());
    }

    #[test]
    fn test_plus_prefixed_group() {
        assert_eq!(root("+(foo)"), root("(foo)"));
        assert_eq!(
            root("+(foo bar) baz"),
            Node::Binary {
                left: Box::new(root("(foo bar)")),
                operator: BoolOp::Implicit,
                right: Box::new(term(FieldRef::Implicit, "baz", false, false)),
                parenthesized: false,
            }
        );
    }

    #[test]
    fn test_error_span_points_into_raw_text() {
        let raw = "url:http://example.com )";
        let err = parse(raw).unwrap_err();
        assert_eq!(err.span, Some(Span::new(23, 24)));
        assert_eq!(&raw[23..24], ")");

        let raw = r#"a\b "open"#;
        let err = parse(raw).unwrap_err();
        assert_eq!(err.span, Some(Span::new(5, 10)));
    }

    #[test]
    fn test_depth_limit() {
        let deep = format!("{}foo{}", "(".repeat(500), ")".repeat(500));
        assert!(parse(&deep).is_err());
    }
}
