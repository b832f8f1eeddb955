/// Condition language syntax tree.
///
/// The tree covers every form the parser accepts, including the ones the
/// policy pass always rejects, so rejection can name the offending construct.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
    Template {
        quasis: Vec<String>,
        exprs: Vec<Expr>,
    },
    Ident(String),
    Array(Vec<Expr>),
    Object(Vec<ObjectEntry>),
    Member {
        object: Box<Expr>,
        property: MemberKey,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },

    // Always rejected
    Function,
    Arrow,
    Class,
    Assignment {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Update(Box<Expr>),
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    This,
    Sequence(Vec<Expr>),
    Spread(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum MemberKey {
    /// `a.b`
    Static(String),
    /// `a[expr]`
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ObjectEntry {
    Property { key: PropertyKey, value: Expr },
    Spread(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKey {
    Static(String),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    TypeOf,
    Void,
    Delete,
    BitNot,
    Await,
}

impl UnaryOp {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "-" => UnaryOp::Neg,
            "+" => UnaryOp::Plus,
            "!" => UnaryOp::Not,
            "typeof" => UnaryOp::TypeOf,
            "void" => UnaryOp::Void,
            "delete" => UnaryOp::Delete,
            "~" => UnaryOp::BitNot,
            "await" => UnaryOp::Await,
            _ => return None,
        })
    }

    pub fn token(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::TypeOf => "typeof",
            UnaryOp::Void => "void",
            UnaryOp::Delete => "delete",
            UnaryOp::BitNot => "~",
            UnaryOp::Await => "await",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    In,
    InstanceOf,
}

impl BinaryOp {
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "%" => BinaryOp::Rem,
            "**" => BinaryOp::Pow,
            "==" => BinaryOp::Eq,
            "!=" => BinaryOp::NotEq,
            "===" => BinaryOp::StrictEq,
            "!==" => BinaryOp::StrictNotEq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::LtEq,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::GtEq,
            "in" => BinaryOp::In,
            "instanceof" => BinaryOp::InstanceOf,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}
