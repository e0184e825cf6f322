/// AST 的根节点, 代表一个完整的查询语句
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// 空查询 (或只有空白) 时为 None
    pub root: Option<Node>,
}

/// 查询语法树的节点，由解析器一次性构建，之后不可变
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// 单个词，例如 `foo`、`level:info`、`"foo bar"`
    Term(Term),
    /// 区间，例如 `duration:[10 TO 20]`
    Range(RangedTerm),
    /// 两个子句由布尔运算符连接
    Binary {
        left: Box<Node>,
        operator: BoolOp,
        right: Box<Node>,
        parenthesized: bool,
    },
    /// 单个子句，可能带有前导运算符 (`NOT foo`) 或括号 (`(foo)`)
    LeftOnly {
        left: Box<Node>,
        leading_operator: Option<BoolOp>,
        parenthesized: bool,
    },
}

/// 子句所作用的字段
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldRef {
    /// 未指定字段，搜索全文列
    Implicit,
    Named(String),
}

impl FieldRef {
    pub fn is_implicit(&self) -> bool {
        matches!(self, FieldRef::Implicit)
    }
}

/// `negated` 表示整个谓词取反。
/// 裸词前的 `-` 以及具名字段前的 `-` (`-level:info`) 都会设置它；
/// 而 `level:-info` 中的 `-` 属于搜索值本身。
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub field: FieldRef,
    pub text: String,
    pub quoted: bool,
    pub negated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangedTerm {
    pub field: FieldRef,
    pub min: String,
    pub max: String,
    pub min_inclusive: bool,
    pub max_inclusive: bool,
    pub negated: bool,
}

/// 布尔运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,      // AND, &&
    Or,       // OR, ||
    Not,      // NOT
    AndNot,   // AND NOT
    OrNot,    // OR NOT
    Implicit, // 空格
}

impl BoolOp {
    /// 查询语法中的写法，隐式 AND 为空
    pub fn keyword(&self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
            BoolOp::Not => "NOT",
            BoolOp::AndNot => "AND NOT",
            BoolOp::OrNot => "OR NOT",
            BoolOp::Implicit => "",
        }
    }
}

impl Node {
    pub fn parenthesized(self) -> Node {
        match self {
            Node::Binary { left, operator, right, .. } => Node::Binary {
                left,
                operator,
                right,
                parenthesized: true,
            },
            Node::LeftOnly {
                left,
                leading_operator,
                parenthesized: false,
            } => Node::LeftOnly {
                left,
                leading_operator,
                parenthesized: true,
            },
            other => Node::LeftOnly {
                left: Box::new(other),
                leading_operator: None,
                parenthesized: true,
            },
        }
    }
}
