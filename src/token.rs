//! 过滤查询语言的 token 定义

/// A token is a single unit of the language, with a specific kind and location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub span: Span,
}

/// The kind of a token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind<'a> {
    // Keywords (大小写敏感)
    And, // "AND" or "&&"
    Or,  // "OR" or "||"
    Not, // "NOT"

    // Literals
    /// 未加引号的词，保留原始的反斜杠转义
    Term(&'a str),
    /// 引号内的原始内容，不包含两侧引号
    Quoted(&'a str),
    /// 缺少结束引号的字符串
    Unterminated(&'a str),

    // Punctuation
    Colon,    // :
    LParen,   // (
    RParen,   // )
    LBracket, // [
    RBracket, // ]
    LBrace,   // {
    RBrace,   // }

    // Prefix operators, only emitted when glued to the following token
    Minus, // -
    Plus,  // +
}

impl TokenKind<'_> {
    /// 该 token 是否可以作为一个子句的开头
    pub fn starts_clause(&self) -> bool {
        matches!(
            self,
            TokenKind::Term(_)
                | TokenKind::Quoted(_)
                | TokenKind::Unterminated(_)
                | TokenKind::LParen
                | TokenKind::Minus
                | TokenKind::Plus
                | TokenKind::Not
        )
    }
}

/// Represents a span in the source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Span {
    /// The starting byte offset.
    pub start: usize,
    /// The ending byte offset.
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}
