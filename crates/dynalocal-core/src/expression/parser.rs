//! Lexer and recursive-descent parser for DynamoDB expressions.
//!
//! Supports condition/filter/key-condition expressions and projection
//! expressions. Keywords are matched case-insensitively; function names are
//! kept exactly as written and checked by the analysis pass.
//!
//! Syntax errors carry the offending token and the source text from the
//! start of the preceding token to the end of the offending one, which is
//! how the service reports them:
//!
//! ```text
//! Syntax error; token: "<EOF>", near: "= "
//! ```

use super::ast::{AttributePath, CompareOp, Expr, FunctionCall, LogicalOp, Operand, PathElement};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors produced during expression parsing, analysis or evaluation.
///
/// The `Display` text of every variant is the exact service message; callers
/// add the `Invalid FilterExpression: ` style prefix.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    /// Empty or whitespace-only expression text.
    #[error("The expression can not be empty;")]
    Empty,
    /// Expression text longer than the configured maximum.
    #[error("Expression size has exceeded the maximum allowed size; expression size: {size}")]
    TooLong {
        /// Length of the expression in bytes.
        size: usize,
    },
    /// An unexpected token was encountered.
    #[error("Syntax error; token: \"{token}\", near: \"{near}\"")]
    Syntax {
        /// Source text of the offending token, or `<EOF>`.
        token: String,
        /// Source text around the offending token.
        near: String,
    },
    /// A parenthesized group directly wraps another one.
    #[error("The expression has redundant parentheses;")]
    RedundantParentheses,
    /// Call of a function that does not exist.
    #[error("Invalid function name; function: {name}")]
    UnknownFunction {
        /// Function name as written.
        name: String,
    },
    /// A function used where it is not allowed.
    #[error("The function is not allowed to be used this way in an expression; function: {name}")]
    MisplacedFunction {
        /// Function name.
        name: String,
    },
    /// A bare attribute name that collides with a reserved word.
    #[error("Attribute name is a reserved keyword; reserved keyword: {name}")]
    ReservedKeyword {
        /// The name as written.
        name: String,
    },
    /// Wrong number of operands for a function.
    #[error(
        "Incorrect number of operands for operator or function; operator or function: {name}, \
         number of operands: {count}"
    )]
    OperandCount {
        /// Operator or function name.
        name: String,
        /// Number of operands supplied.
        count: usize,
    },
    /// Too many `IN` candidates.
    #[error("The IN operator is provided with too many operands; number of operands: {count}")]
    TooManyInOperands {
        /// Number of candidates supplied.
        count: usize,
    },
    /// `#alias` missing from `ExpressionAttributeNames`.
    #[error(
        "An expression attribute name used in the document path is not defined; attribute \
         name: {name}"
    )]
    UndefinedName {
        /// The alias, including `#`.
        name: String,
    },
    /// `:value` missing from `ExpressionAttributeValues`.
    #[error("An expression attribute value used in expression is not defined; attribute value: {name}")]
    UndefinedValue {
        /// The placeholder, including `:`.
        name: String,
    },
    /// The first operand repeats among the remaining ones.
    #[error(
        "The first operand must be distinct from the remaining operands for this operator or \
         function; operator: {operator}, first operand: {operand}"
    )]
    DuplicateOperand {
        /// Operator or function name.
        operator: String,
        /// The resolved path, rendered as `[a, b]`.
        operand: String,
    },
    /// A function argument that must be a document path is not one.
    #[error("Operator or function requires a document path; operator or function: {name}")]
    RequiresPath {
        /// Function name.
        name: String,
    },
    /// An operand of the wrong type.
    #[error(
        "Incorrect operand type for operator or function; operator or function: {name}, operand \
         type: {operand_type}"
    )]
    OperandType {
        /// Operator or function name.
        name: String,
        /// Type descriptor of the offending operand.
        operand_type: String,
    },
    /// `attribute_type` called with an unknown type name.
    #[error(
        "Invalid attribute type name found; type: {value}, valid types: {{ B NULL SS BOOL L BS N \
         NS S M }}"
    )]
    InvalidTypeName {
        /// The supplied type name.
        value: String,
    },
    /// Constant BETWEEN bounds in the wrong order.
    #[error(
        "The BETWEEN operator requires upper bound to be greater than or equal to lower bound; \
         lower bound operand: AttributeValue: {low}, upper bound operand: AttributeValue: {high}"
    )]
    BetweenBounds {
        /// Rendered lower bound.
        low: String,
        /// Rendered upper bound.
        high: String,
    },
    /// Constant BETWEEN bounds of different types.
    #[error(
        "The BETWEEN operator requires same data type for lower and upper bounds; lower bound \
         operand: AttributeValue: {low}, upper bound operand: AttributeValue: {high}"
    )]
    BetweenTypes {
        /// Rendered lower bound.
        low: String,
        /// Rendered upper bound.
        high: String,
    },
    /// Two projection paths where one contains the other.
    #[error(
        "Two document paths overlap with each other; must remove or rewrite one of these paths; \
         path one: {one}, path two: {two}"
    )]
    OverlappingPaths {
        /// First path, rendered as `[a, b]`.
        one: String,
        /// Second path.
        two: String,
    },
    /// Two projection paths that use a key and an index at the same position.
    #[error(
        "Two document paths conflict with each other; must remove or rewrite one of these paths; \
         path one: {one}, path two: {two}"
    )]
    ConflictingPaths {
        /// First path, rendered as `[a, b]`.
        one: String,
        /// Second path.
        two: String,
    },
}

// ---------------------------------------------------------------------------
// Token type
// ---------------------------------------------------------------------------

/// Lexer token kinds for DynamoDB expressions.
#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    /// A plain identifier (attribute or function name).
    Identifier(String),
    /// An expression attribute name reference, including `#`.
    NameRef(String),
    /// An expression attribute value reference, including `:`.
    ValueRef(String),
    /// A run of decimal digits (used for list indices).
    Number(String),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Dot,
    Comma,
    LParen,
    RParen,
    LBracket,
    RBracket,
    And,
    Or,
    Not,
    Between,
    In,
    /// Any character that starts no valid token.
    Unknown,
    /// End of input.
    Eof,
}

/// A token with its byte span in the source.
#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    start: usize,
    end: usize,
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

/// Tokenizer for DynamoDB expression strings.
struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Tokenize the entire input. The last token is always `Eof`.
    fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let tok = self.next_token();
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                return tokens;
            }
        }
    }

    fn peek_char(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while self.peek_char().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.pos;
        let Some(ch) = self.bump() else {
            return Token {
                kind: TokenKind::Eof,
                start,
                end: start,
            };
        };

        let kind = match ch {
            '#' => self.read_placeholder(start, TokenKind::NameRef),
            ':' => self.read_placeholder(start, TokenKind::ValueRef),
            '=' => TokenKind::Eq,
            '<' => match self.peek_char() {
                Some('=') => {
                    self.bump();
                    TokenKind::Le
                }
                Some('>') => {
                    self.bump();
                    TokenKind::Ne
                }
                _ => TokenKind::Lt,
            },
            '>' => {
                if self.peek_char() == Some('=') {
                    self.bump();
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '.' => TokenKind::Dot,
            ',' => TokenKind::Comma,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            c if c.is_ascii_digit() => {
                self.eat_while(|c| c.is_ascii_digit());
                TokenKind::Number(self.input[start..self.pos].to_owned())
            }
            c if is_ident_start(c) => {
                self.eat_while(is_ident_continue);
                keyword_or_identifier(&self.input[start..self.pos])
            }
            _ => TokenKind::Unknown,
        };

        Token {
            kind,
            start,
            end: self.pos,
        }
    }

    fn read_placeholder(&mut self, start: usize, make: fn(String) -> TokenKind) -> TokenKind {
        let body_start = self.pos;
        self.eat_while(is_ident_continue);
        if self.pos == body_start {
            TokenKind::Unknown
        } else {
            make(self.input[start..self.pos].to_owned())
        }
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek_char().is_some_and(&pred) {
            self.bump();
        }
    }
}

fn keyword_or_identifier(ident: &str) -> TokenKind {
    match ident.to_ascii_uppercase().as_str() {
        "AND" => TokenKind::And,
        "OR" => TokenKind::Or,
        "NOT" => TokenKind::Not,
        "BETWEEN" => TokenKind::Between,
        "IN" => TokenKind::In,
        _ => TokenKind::Identifier(ident.to_owned()),
    }
}

/// Returns `true` if `c` can start an identifier.
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

/// Returns `true` if `c` can continue an identifier or placeholder.
fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Returns `true` if `key` is a well-formed placeholder with the given sigil.
#[must_use]
pub fn is_placeholder(key: &str, sigil: char) -> bool {
    key.strip_prefix(sigil)
        .is_some_and(|body| !body.is_empty() && body.chars().all(is_ident_continue))
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Recursive-descent parser for DynamoDB expressions.
struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Lexer::new(source).tokenize(),
            pos: 0,
        }
    }

    fn peek(&self) -> &TokenKind {
        self.tokens
            .get(self.pos)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        self.tokens
            .get(self.pos + offset)
            .map_or(&TokenKind::Eof, |t| &t.kind)
    }

    fn advance(&mut self) -> TokenKind {
        let kind = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        kind
    }

    fn eat(&mut self, expected: &TokenKind) -> bool {
        if self.peek() == expected {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &TokenKind) -> Result<(), ExpressionError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.syntax_error())
        }
    }

    fn at_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }

    /// Syntax error at the current token.
    fn syntax_error(&self) -> ExpressionError {
        let len = self.source.len();
        let (cur_start, cur_end, is_eof) = self.tokens.get(self.pos).map_or((len, len, true), |t| {
            (t.start, t.end, t.kind == TokenKind::Eof)
        });
        let near_start = self
            .pos
            .checked_sub(1)
            .and_then(|prev| self.tokens.get(prev))
            .map_or(cur_start, |t| t.start);
        let token = if is_eof {
            "<EOF>".to_owned()
        } else {
            self.source[cur_start..cur_end].to_owned()
        };
        ExpressionError::Syntax {
            token,
            near: self.source[near_start..cur_end].to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Condition expression parsing (precedence climbing)
// ---------------------------------------------------------------------------

impl Parser<'_> {
    /// Parse a full condition expression (OR is lowest precedence).
    fn parse_or_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_and_expr()?;
        while self.eat(&TokenKind::Or) {
            let right = self.parse_and_expr()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Parse AND expressions.
    fn parse_and_expr(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_not_expr()?;
        while self.eat(&TokenKind::And) {
            let right = self.parse_not_expr()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    /// Parse NOT expressions.
    fn parse_not_expr(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&TokenKind::Not) {
            let expr = self.parse_not_expr()?;
            return Ok(Expr::Not(Box::new(expr)));
        }
        self.parse_primary_expr()
    }

    /// Parse primary expressions: comparisons, BETWEEN, IN, functions, and
    /// parenthesized groups.
    fn parse_primary_expr(&mut self) -> Result<Expr, ExpressionError> {
        if self.eat(&TokenKind::LParen) {
            let expr = self.parse_or_expr()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(Expr::Paren(Box::new(expr)));
        }

        let operand = self.parse_operand()?;
        let has_operator = matches!(
            self.peek(),
            TokenKind::Eq
                | TokenKind::Ne
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::Between
                | TokenKind::In
        );
        if has_operator {
            return self.parse_postfix_expr(operand);
        }
        match operand {
            Operand::Function(call) => Ok(Expr::Function(call)),
            _ => Err(self.syntax_error()),
        }
    }

    /// After parsing a left operand, parse comparison, BETWEEN, or IN.
    fn parse_postfix_expr(&mut self, left: Operand) -> Result<Expr, ExpressionError> {
        if self.eat(&TokenKind::Between) {
            let low = self.parse_operand()?;
            self.expect(&TokenKind::And)?;
            let high = self.parse_operand()?;
            return Ok(Expr::Between {
                value: Box::new(left),
                low: Box::new(low),
                high: Box::new(high),
            });
        }
        if self.eat(&TokenKind::In) {
            self.expect(&TokenKind::LParen)?;
            let list = self.parse_operand_list()?;
            self.expect(&TokenKind::RParen)?;
            return Ok(Expr::In {
                value: Box::new(left),
                list,
            });
        }
        let op = match self.peek() {
            TokenKind::Eq => CompareOp::Eq,
            TokenKind::Ne => CompareOp::Ne,
            TokenKind::Lt => CompareOp::Lt,
            TokenKind::Le => CompareOp::Le,
            TokenKind::Gt => CompareOp::Gt,
            TokenKind::Ge => CompareOp::Ge,
            _ => return Err(self.syntax_error()),
        };
        self.advance();
        let right = self.parse_operand()?;
        Ok(Expr::Compare {
            left: Box::new(left),
            op,
            right: Box::new(right),
        })
    }
}

// ---------------------------------------------------------------------------
// Operand & path parsing
// ---------------------------------------------------------------------------

impl Parser<'_> {
    /// Parse an operand: a value reference, a function call, or an attribute path.
    fn parse_operand(&mut self) -> Result<Operand, ExpressionError> {
        match self.peek() {
            TokenKind::ValueRef(_) => {
                let TokenKind::ValueRef(name) = self.advance() else {
                    return Err(self.syntax_error());
                };
                Ok(Operand::Value(name))
            }
            TokenKind::Identifier(_) if *self.peek_at(1) == TokenKind::LParen => {
                let TokenKind::Identifier(name) = self.advance() else {
                    return Err(self.syntax_error());
                };
                self.advance(); // consume '('
                let args = self.parse_operand_list()?;
                self.expect(&TokenKind::RParen)?;
                Ok(Operand::Function(FunctionCall { name, args }))
            }
            _ => Ok(Operand::Path(self.parse_attribute_path()?)),
        }
    }

    /// Parse one or more comma-separated operands.
    fn parse_operand_list(&mut self) -> Result<Vec<Operand>, ExpressionError> {
        let mut list = vec![self.parse_operand()?];
        while self.eat(&TokenKind::Comma) {
            list.push(self.parse_operand()?);
        }
        Ok(list)
    }

    /// Parse an attribute path like `info.rating`, `#name`, `myList[0].value`.
    fn parse_attribute_path(&mut self) -> Result<AttributePath, ExpressionError> {
        let mut elements = vec![self.parse_path_name()?];

        loop {
            if self.eat(&TokenKind::Dot) {
                elements.push(self.parse_path_name()?);
            } else if self.eat(&TokenKind::LBracket) {
                let TokenKind::Number(digits) = self.peek() else {
                    return Err(self.syntax_error());
                };
                let Ok(idx) = digits.parse::<usize>() else {
                    return Err(self.syntax_error());
                };
                self.advance();
                self.expect(&TokenKind::RBracket)?;
                elements.push(PathElement::Index(idx));
            } else {
                break;
            }
        }

        Ok(AttributePath { elements })
    }

    /// Parse a name element (identifier or `#name`).
    fn parse_path_name(&mut self) -> Result<PathElement, ExpressionError> {
        match self.peek() {
            TokenKind::Identifier(_) => {
                let TokenKind::Identifier(name) = self.advance() else {
                    return Err(self.syntax_error());
                };
                Ok(PathElement::Name(name))
            }
            TokenKind::NameRef(_) => {
                let TokenKind::NameRef(name) = self.advance() else {
                    return Err(self.syntax_error());
                };
                Ok(PathElement::Alias(name))
            }
            _ => Err(self.syntax_error()),
        }
    }
}

// ---------------------------------------------------------------------------
// Projection expression parsing
// ---------------------------------------------------------------------------

impl Parser<'_> {
    /// Parse a projection expression: comma-separated attribute paths.
    fn parse_projection_expr(&mut self) -> Result<Vec<AttributePath>, ExpressionError> {
        let mut paths = vec![self.parse_attribute_path()?];
        while self.eat(&TokenKind::Comma) {
            paths.push(self.parse_attribute_path()?);
        }
        Ok(paths)
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Which grammar to parse with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpressionKind {
    /// Condition, filter or key-condition expression.
    Condition,
    /// Comma-separated document paths.
    Projection,
}

/// Result of [`parse_expression`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedExpression {
    /// A condition tree.
    Condition(Expr),
    /// A list of projected paths.
    Projection(Vec<AttributePath>),
}

/// Parse an expression of the given kind.
///
/// # Errors
///
/// Returns `ExpressionError` if the expression is empty or syntactically invalid.
pub fn parse_expression(
    input: &str,
    kind: ExpressionKind,
) -> Result<ParsedExpression, ExpressionError> {
    match kind {
        ExpressionKind::Condition => parse_condition(input).map(ParsedExpression::Condition),
        ExpressionKind::Projection => parse_projection(input).map(ParsedExpression::Projection),
    }
}

/// Parse a condition, filter, or key-condition expression.
///
/// # Errors
///
/// Returns `ExpressionError` if the expression is empty or syntactically invalid.
pub fn parse_condition(input: &str) -> Result<Expr, ExpressionError> {
    if input.trim().is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser::new(input);
    let expr = parser.parse_or_expr()?;
    if !parser.at_end() {
        return Err(parser.syntax_error());
    }
    Ok(expr)
}

/// Parse a projection expression (comma-separated attribute paths).
///
/// # Errors
///
/// Returns `ExpressionError` if the expression is empty or syntactically invalid.
pub fn parse_projection(input: &str) -> Result<Vec<AttributePath>, ExpressionError> {
    if input.trim().is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser::new(input);
    let paths = parser.parse_projection_expr()?;
    if !parser.at_end() {
        return Err(parser.syntax_error());
    }
    Ok(paths)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
