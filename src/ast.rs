use std::sync::Arc;

use crate::diagnostics::SourceSpan;

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    String(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    And,
    Or,
    Coalesce,
    In,
    Range,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Coalesce => "??",
            BinaryOp::In => "in",
            BinaryOp::Range => "..",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Plus,
    Not,
    AddressOf,
    Deref,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostfixOp {
    Increment,
    Decrement,
}

/// `=` or one of the compound forms, which reuse the infix rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Debug, Clone)]
pub struct FunctionParam {
    pub name: String,
    pub default: Option<Expr>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct FunctionLiteral {
    pub name: Option<String>,
    pub params: Vec<FunctionParam>,
    pub body: Arc<Block>,
    pub is_async: bool,
}

/// A call argument; `name` is set for keyword arguments (`f(x = 1)`).
#[derive(Debug, Clone)]
pub struct Argument {
    pub name: Option<String>,
    pub value: Expr,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Literal),
    Variable(String),
    At,
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Postfix {
        op: PostfixOp,
        target: Box<Expr>,
    },
    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Argument>,
    },
    Method {
        target: Box<Expr>,
        name: String,
        args: Vec<Argument>,
    },
    Property {
        target: Box<Expr>,
        name: String,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Option<Box<Expr>>,
        end: Option<Box<Expr>>,
    },
    ArrayLiteral(Vec<Expr>),
    DictLiteral(Vec<(Expr, Expr)>),
    Group(Box<Expr>),
    Function(Arc<FunctionLiteral>),
    If {
        condition: Box<Expr>,
        then_branch: Block,
        else_branch: Option<Block>,
    },
    Switch {
        subject: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Option<Block>,
    },
    Match {
        subject: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    Await(Box<Expr>),
    Channel(Option<Box<Expr>>),
}

#[derive(Debug, Clone)]
pub enum CaseKind {
    /// `case a, b { }`: compared against the subject by type and rendering.
    Values(Vec<Expr>),
    /// `case let n if guard { }`: binds the subject in a fresh scope.
    Binding { name: String, guard: Option<Expr> },
}

#[derive(Debug, Clone)]
pub struct SwitchCase {
    pub kind: CaseKind,
    pub body: Block,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Block,
    pub span: SourceSpan,
}

#[derive(Debug, Clone)]
pub enum Pattern {
    Wildcard,
    Binding(String),
    Array {
        elements: Vec<Pattern>,
        rest: Option<String>,
    },
    Dict(Vec<(Expr, Pattern)>),
    Value(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Declarative {
    Todo,
    Warn,
    Info,
    Debug,
    Note,
    Success,
}

impl Declarative {
    pub fn tag(self) -> &'static str {
        match self {
            Declarative::Todo => "TODO",
            Declarative::Warn => "WARN",
            Declarative::Info => "INFO",
            Declarative::Debug => "DEBUG",
            Declarative::Note => "NOTE",
            Declarative::Success => "SUCCESS",
        }
    }
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    Let {
        name: String,
        value: Expr,
    },
    Const {
        name: String,
        value: Expr,
    },
    Expr(Expr),
    Block(Block),
    While {
        condition: Expr,
        body: Block,
    },
    For {
        first: String,
        second: Option<String>,
        iterable: Expr,
        body: Block,
    },
    Repeat {
        count: Expr,
        body: Block,
    },
    Return(Option<Expr>),
    Break,
    Continue,
    Package {
        name: String,
        body: Block,
    },
    Import(Vec<String>),
    Include(Expr),
    Enum {
        name: String,
        members: Vec<(String, Option<Expr>)>,
    },
    ErrorType {
        name: String,
        params: Vec<String>,
    },
    Raise(Expr),
    Throw(Expr),
    Defer(Expr),
    Go(Expr),
    Declarative {
        kind: Declarative,
        value: Expr,
    },
}

#[derive(Debug, Clone)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub statements: Block,
}
