//! 过滤查询的词法分析器

use crate::token::{Span, Token, TokenKind};

pub struct Lexer<'a> {
    input: &'a str,
    /// 输入字符串中的当前位置（字节索引）
    position: usize,
}

/// 结束一个未加引号的词的字符
fn is_term_terminator(c: char) -> bool {
    c.is_whitespace() || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ':')
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Lexer { input, position: 0 }
    }

    /// 返回当前位置的字符，不推进位置
    fn peek(&self) -> Option<char> {
        self.input[self.position..].chars().next()
    }

    /// 推进位置一个字符并返回该字符
    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if let Some(c) = c {
            self.position += c.len_utf8();
        }
        c
    }

    /// 跳过空白字符
    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.bump();
            } else {
                break;
            }
        }
    }

    fn token(&self, kind: TokenKind<'a>, start: usize) -> Token<'a> {
        Token {
            kind,
            span: Span::new(start, self.position),
        }
    }

    /// 读取双引号包围的字符串
    /// 注意：开始的引号已经被调用者消费，`\"` 不会结束字符串
    fn read_quoted(&mut self, start: usize) -> Token<'a> {
        let content_start = self.position;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.bump();
                    self.bump();
                }
                '"' => {
                    let content = &self.input[content_start..self.position];
                    self.bump(); // 消费结束引号
                    return self.token(TokenKind::Quoted(content), start);
                }
                _ => {
                    self.bump();
                }
            }
        }
        let content = &self.input[content_start..self.position];
        self.token(TokenKind::Unterminated(content), start)
    }

    /// 读取一个词或关键字
    /// 反斜杠会把下一个字符并入当前词
    fn read_term(&mut self, start: usize) -> Token<'a> {
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                self.bump();
            } else if is_term_terminator(c) {
                break;
            } else {
                self.bump();
            }
        }
        let literal = &self.input[start..self.position];
        self.token(match_keyword(literal), start)
    }
}

fn match_keyword(s: &str) -> TokenKind<'_> {
    match s {
        "AND" | "&&" => TokenKind::And,
        "OR" | "||" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        _ => TokenKind::Term(s),
    }
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.skip_whitespace();
        let start = self.position;

        let c = self.peek()?;

        let token = match c {
            ':' | '(' | ')' | '[' | ']' | '{' | '}' => {
                self.bump();
                let kind = match c {
                    ':' => TokenKind::Colon,
                    '(' => TokenKind::LParen,
                    ')' => TokenKind::RParen,
                    '[' => TokenKind::LBracket,
                    ']' => TokenKind::RBracket,
                    '{' => TokenKind::LBrace,
                    _ => TokenKind::RBrace,
                };
                self.token(kind, start)
            }
            '"' => {
                self.bump();
                self.read_quoted(start)
            }
            '-' | '+' => {
                self.bump();
                // 只有紧贴后续内容时才是前缀运算符，否则它本身就是一个词
                match self.peek() {
                    Some(next) if !next.is_whitespace() && !matches!(next, ')' | ']' | '}' | ':') => {
                        let kind = if c == '-' { TokenKind::Minus } else { TokenKind::Plus };
                        self.token(kind, start)
                    }
                    _ => self.read_term(start),
                }
            }
            _ => self.read_term(start),
        };
        Some(token)
    }
}
