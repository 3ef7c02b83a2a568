//! A restricted arithmetic expression language for cost formulas in input tables.
//!
//! Expressions may contain numeric literals, a fixed set of named variables, the operators
//! `+ - * /`, exponentiation (`**` or `^`), parentheses and the functions `min`, `max`, `log`
//! (natural logarithm) and `exp`. Variable names are resolved when the expression is compiled, so
//! evaluation cannot fail.
use anyhow::{Context, Result, bail, ensure};
use std::fmt;

/// A binary arithmetic operator
#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// A built-in function
#[derive(Debug, Clone, Copy, PartialEq)]
enum Function {
    Min,
    Max,
    Log,
    Exp,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            "log" => Some(Self::Log),
            "exp" => Some(Self::Exp),
            _ => None,
        }
    }

    fn check_arity(self, count: usize) -> Result<()> {
        match self {
            Self::Min | Self::Max => ensure!(count >= 1, "{self:?} needs at least one argument"),
            Self::Log | Self::Exp => ensure!(count == 1, "{self:?} takes exactly one argument"),
        }

        Ok(())
    }
}

/// A node of a compiled expression
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Constant(f64),
    Variable(usize),
    Negate(Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Call(Function, Vec<Node>),
}

impl Node {
    fn eval(&self, vars: &[f64]) -> f64 {
        match self {
            Self::Constant(value) => *value,
            Self::Variable(idx) => vars[*idx],
            Self::Negate(node) => -node.eval(vars),
            Self::Binary(op, lhs, rhs) => {
                let (lhs, rhs) = (lhs.eval(vars), rhs.eval(vars));
                match op {
                    BinaryOp::Add => lhs + rhs,
                    BinaryOp::Sub => lhs - rhs,
                    BinaryOp::Mul => lhs * rhs,
                    BinaryOp::Div => lhs / rhs,
                    BinaryOp::Pow => lhs.powf(rhs),
                }
            }
            Self::Call(function, args) => {
                let mut values = args.iter().map(|arg| arg.eval(vars));
                match function {
                    Function::Min => values.fold(f64::INFINITY, f64::min),
                    Function::Max => values.fold(f64::NEG_INFINITY, f64::max),
                    Function::Log => values.next().unwrap_or(f64::NAN).ln(),
                    Function::Exp => values.next().unwrap_or(f64::NAN).exp(),
                }
            }
        }
    }
}

/// An expression compiled against a fixed list of variable names
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    variables: &'static [&'static str],
    root: Node,
}

impl Expression {
    /// Compile `source`, allowing only the named `variables`.
    ///
    /// Values for the variables are passed to [`Expression::eval`] in the same order.
    pub fn compile(source: &str, variables: &'static [&'static str]) -> Result<Self> {
        let root = Parser::new(source, variables)
            .and_then(Parser::parse)
            .with_context(|| format!("Invalid expression: {source}"))?;

        Ok(Self {
            source: source.trim().to_string(),
            variables,
            root,
        })
    }

    /// Evaluate with the given variable values
    pub fn eval(&self, vars: &[f64]) -> f64 {
        debug_assert_eq!(vars.len(), self.variables.len());
        self.root.eval(vars)
    }

    /// Whether the expression depends on any variable
    pub fn is_constant(&self) -> bool {
        fn has_variable(node: &Node) -> bool {
            match node {
                Node::Constant(_) => false,
                Node::Variable(_) => true,
                Node::Negate(node) => has_variable(node),
                Node::Binary(_, lhs, rhs) => has_variable(lhs) || has_variable(rhs),
                Node::Call(_, args) => args.iter().any(has_variable),
            }
        }

        !has_variable(&self.root)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Name(String),
    Op(BinaryOp),
    LeftParen,
    RightParen,
    Comma,
}

fn tokenise(source: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            _ if c.is_whitespace() => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                // Exponent, e.g. 1.5e-3
                if i < chars.len() && matches!(chars[i], 'e' | 'E') {
                    let mut j = i + 1;
                    if j < chars.len() && matches!(chars[j], '+' | '-') {
                        j += 1;
                    }
                    if j < chars.len() && chars[j].is_ascii_digit() {
                        i = j;
                        while i < chars.len() && chars[i].is_ascii_digit() {
                            i += 1;
                        }
                    }
                }
                let text: String = chars[start..i].iter().collect();
                let value = text
                    .parse()
                    .with_context(|| format!("Invalid number '{text}'"))?;
                tokens.push(Token::Number(value));
            }
            _ if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                tokens.push(Token::Name(chars[start..i].iter().collect()));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Op(BinaryOp::Pow));
                i += 2;
            }
            _ => {
                tokens.push(match c {
                    '+' => Token::Op(BinaryOp::Add),
                    '-' => Token::Op(BinaryOp::Sub),
                    '*' => Token::Op(BinaryOp::Mul),
                    '/' => Token::Op(BinaryOp::Div),
                    '^' => Token::Op(BinaryOp::Pow),
                    '(' => Token::LeftParen,
                    ')' => Token::RightParen,
                    ',' => Token::Comma,
                    _ => bail!("Unexpected character '{c}'"),
                });
                i += 1;
            }
        }
    }

    Ok(tokens)
}

/// Recursive descent parser.
///
/// Grammar, loosest binding first:
///
/// ```text
/// sum     := product (("+" | "-") product)*
/// product := unary (("*" | "/") unary)*
/// unary   := ("+" | "-") unary | power
/// power   := primary (("**" | "^") unary)?
/// primary := number | name | name "(" sum ("," sum)* ")" | "(" sum ")"
/// ```
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    variables: &'static [&'static str],
}

impl Parser {
    fn new(source: &str, variables: &'static [&'static str]) -> Result<Self> {
        Ok(Self {
            tokens: tokenise(source)?,
            pos: 0,
            variables,
        })
    }

    fn parse(mut self) -> Result<Node> {
        ensure!(!self.tokens.is_empty(), "Empty expression");
        let node = self.sum()?;
        if let Some(token) = self.peek() {
            bail!("Unexpected {token:?} after end of expression");
        }

        Ok(node)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn sum(&mut self) -> Result<Node> {
        let mut node = self.product()?;
        while let Some(Token::Op(op @ (BinaryOp::Add | BinaryOp::Sub))) = self.peek().cloned() {
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.product()?));
        }

        Ok(node)
    }

    fn product(&mut self) -> Result<Node> {
        let mut node = self.unary()?;
        while let Some(Token::Op(op @ (BinaryOp::Mul | BinaryOp::Div))) = self.peek().cloned() {
            self.pos += 1;
            node = Node::Binary(op, Box::new(node), Box::new(self.unary()?));
        }

        Ok(node)
    }

    fn unary(&mut self) -> Result<Node> {
        match self.peek() {
            Some(Token::Op(BinaryOp::Sub)) => {
                self.pos += 1;
                Ok(Node::Negate(Box::new(self.unary()?)))
            }
            Some(Token::Op(BinaryOp::Add)) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Node> {
        let base = self.primary()?;
        if let Some(Token::Op(BinaryOp::Pow)) = self.peek() {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(Node::Binary(
                BinaryOp::Pow,
                Box::new(base),
                Box::new(exponent),
            ));
        }

        Ok(base)
    }

    fn primary(&mut self) -> Result<Node> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Node::Constant(value)),
            Some(Token::LeftParen) => {
                let node = self.sum()?;
                self.expect_right_paren()?;
                Ok(node)
            }
            Some(Token::Name(name)) => {
                if let Some(Token::LeftParen) = self.peek() {
                    self.pos += 1;
                    self.call(&name)
                } else {
                    let idx = self
                        .variables
                        .iter()
                        .position(|var| *var == name)
                        .with_context(|| {
                            format!(
                                "Unknown name '{name}' (allowed: {})",
                                self.variables.join(", ")
                            )
                        })?;
                    Ok(Node::Variable(idx))
                }
            }
            Some(token) => bail!("Unexpected {token:?}"),
            None => bail!("Unexpected end of expression"),
        }
    }

    fn call(&mut self, name: &str) -> Result<Node> {
        let function =
            Function::from_name(name).with_context(|| format!("Unknown function '{name}'"))?;
        let mut args = vec![self.sum()?];
        while let Some(Token::Comma) = self.peek() {
            self.pos += 1;
            args.push(self.sum()?);
        }
        self.expect_right_paren()?;
        function.check_arity(args.len())?;

        Ok(Node::Call(function, args))
    }

    fn expect_right_paren(&mut self) -> Result<()> {
        match self.next() {
            Some(Token::RightParen) => Ok(()),
            _ => bail!("Expected ')'"),
        }
    }
}
