//! AST types for DynamoDB condition, filter, key-condition and projection
//! expressions.
//!
//! The parser keeps function calls by their source name and keeps
//! parenthesized groups as [`Expr::Paren`] nodes so that the analysis pass can
//! report unknown functions and redundant parentheses with the exact
//! service wording. Evaluation treats `Paren` as transparent.

use std::collections::HashMap;
use std::fmt;

/// Expression AST node for condition, filter, and key-condition expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Comparison expression: `left op right`.
    Compare {
        /// Left-hand operand.
        left: Box<Operand>,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand operand.
        right: Box<Operand>,
    },
    /// Between expression: `value BETWEEN low AND high`.
    Between {
        /// Value to test.
        value: Box<Operand>,
        /// Lower bound (inclusive).
        low: Box<Operand>,
        /// Upper bound (inclusive).
        high: Box<Operand>,
    },
    /// In expression: `value IN (list...)`.
    In {
        /// Value to search for.
        value: Box<Operand>,
        /// List of candidate values.
        list: Vec<Operand>,
    },
    /// Logical combination: `left AND right` or `left OR right`.
    Logical {
        /// Logical operator.
        op: LogicalOp,
        /// Left-hand expression.
        left: Box<Expr>,
        /// Right-hand expression.
        right: Box<Expr>,
    },
    /// Logical negation: `NOT expr`.
    Not(Box<Expr>),
    /// Function call used as a condition: `function_name(args...)`.
    Function(FunctionCall),
    /// Parenthesized group: `( expr )`.
    Paren(Box<Expr>),
}

impl Expr {
    /// Strip any number of enclosing parentheses.
    #[must_use]
    pub fn unparen(&self) -> &Self {
        let mut current = self;
        while let Self::Paren(inner) = current {
            current = inner;
        }
        current
    }
}

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (`=`).
    Eq,
    /// Not equal (`<>`).
    Ne,
    /// Less than (`<`).
    Lt,
    /// Less than or equal (`<=`).
    Le,
    /// Greater than (`>`).
    Gt,
    /// Greater than or equal (`>=`).
    Ge,
}

impl CompareOp {
    /// `true` for the ordering operators `<`, `<=`, `>` and `>=`.
    #[must_use]
    pub fn is_ordering(self) -> bool {
        !matches!(self, Self::Eq | Self::Ne)
    }

    /// The operator with its operands swapped: `a < b` is `b > a`.
    #[must_use]
    pub fn flipped(self) -> Self {
        match self {
            Self::Lt => Self::Gt,
            Self::Le => Self::Ge,
            Self::Gt => Self::Lt,
            Self::Ge => Self::Le,
            other => other,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "<>"),
            Self::Lt => write!(f, "<"),
            Self::Le => write!(f, "<="),
            Self::Gt => write!(f, ">"),
            Self::Ge => write!(f, ">="),
        }
    }
}

/// Logical operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// Logical AND.
    And,
    /// Logical OR.
    Or,
}

impl fmt::Display for LogicalOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}

/// Built-in DynamoDB expression function names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionName {
    /// `attribute_exists(path)` - true if the attribute exists.
    AttributeExists,
    /// `attribute_not_exists(path)` - true if the attribute does not exist.
    AttributeNotExists,
    /// `attribute_type(path, type)` - true if the attribute is of the given type.
    AttributeType,
    /// `begins_with(path, substr)` - true if the string begins with the prefix.
    BeginsWith,
    /// `contains(path, operand)` - true if string contains substring or set contains element.
    Contains,
    /// `size(path)` - returns the size of the attribute.
    Size,
}

impl FunctionName {
    /// Look up a function by its exact (case-sensitive) name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "attribute_exists" => Some(Self::AttributeExists),
            "attribute_not_exists" => Some(Self::AttributeNotExists),
            "attribute_type" => Some(Self::AttributeType),
            "begins_with" => Some(Self::BeginsWith),
            "contains" => Some(Self::Contains),
            "size" => Some(Self::Size),
            _ => None,
        }
    }

    /// Required number of arguments.
    #[must_use]
    pub fn arity(self) -> usize {
        match self {
            Self::AttributeExists | Self::AttributeNotExists | Self::Size => 1,
            Self::AttributeType | Self::BeginsWith | Self::Contains => 2,
        }
    }

    /// `true` for functions that produce a boolean condition; `size` is the
    /// only operand-producing function.
    #[must_use]
    pub fn is_condition(self) -> bool {
        !matches!(self, Self::Size)
    }
}

impl fmt::Display for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AttributeExists => write!(f, "attribute_exists"),
            Self::AttributeNotExists => write!(f, "attribute_not_exists"),
            Self::AttributeType => write!(f, "attribute_type"),
            Self::BeginsWith => write!(f, "begins_with"),
            Self::Contains => write!(f, "contains"),
            Self::Size => write!(f, "size"),
        }
    }
}

/// A function call as written in the source.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Function name exactly as written.
    pub name: String,
    /// Function arguments.
    pub args: Vec<Operand>,
}

impl FunctionCall {
    /// The built-in function this call refers to, if the name is known.
    #[must_use]
    pub fn function(&self) -> Option<FunctionName> {
        FunctionName::from_name(&self.name)
    }
}

/// An operand in an expression (a value producer).
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A document path reference (e.g., `info.rating`, `#name`, `myList[0]`).
    Path(AttributePath),
    /// An expression attribute value reference, including the leading `:`.
    Value(String),
    /// A function call used as an operand, normally `size(path)`.
    Function(FunctionCall),
}

impl Operand {
    /// Returns the path if this operand is a document path.
    #[must_use]
    pub fn as_path(&self) -> Option<&AttributePath> {
        match self {
            Self::Path(path) => Some(path),
            _ => None,
        }
    }
}

/// A document path consisting of one or more elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributePath {
    /// The path elements in order.
    pub elements: Vec<PathElement>,
}

impl AttributePath {
    /// A single-element path naming a top-level attribute literally.
    #[must_use]
    pub fn attribute(name: impl Into<String>) -> Self {
        Self {
            elements: vec![PathElement::Name(name.into())],
        }
    }

    /// Substitute `#alias` elements through `names`.
    ///
    /// Returns `None` if an alias is not defined.
    #[must_use]
    #[allow(clippy::implicit_hasher)]
    pub fn resolve<'a>(&'a self, names: &'a HashMap<String, String>) -> Option<Vec<PathSegment<'a>>> {
        self.elements
            .iter()
            .map(|element| match element {
                PathElement::Name(name) => Some(PathSegment::Key(name.as_str())),
                PathElement::Alias(alias) => names.get(alias).map(|n| PathSegment::Key(n.as_str())),
                PathElement::Index(idx) => Some(PathSegment::Index(*idx)),
            })
            .collect()
    }

    /// Resolved name of the top-level attribute, if the path is a plain
    /// single attribute.
    #[must_use]
    #[allow(clippy::implicit_hasher)]
    pub fn top_level_name<'a>(&'a self, names: &'a HashMap<String, String>) -> Option<&'a str> {
        match self.resolve(names)?.first()? {
            PathSegment::Key(name) => Some(name),
            PathSegment::Index(_) => None,
        }
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, elem) in self.elements.iter().enumerate() {
            match elem {
                PathElement::Name(name) | PathElement::Alias(name) => {
                    if i > 0 {
                        write!(f, ".{name}")?;
                    } else {
                        write!(f, "{name}")?;
                    }
                }
                PathElement::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// A single element in an attribute path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathElement {
    /// A literal attribute name.
    Name(String),
    /// An expression attribute name reference, including the leading `#`.
    Alias(String),
    /// A list index dereference (e.g., `[0]`).
    Index(usize),
}

/// A path element after `#alias` substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathSegment<'a> {
    /// A map key or top-level attribute name.
    Key(&'a str),
    /// A list index.
    Index(usize),
}

/// Render resolved segments the way the service prints document paths:
/// `[a, b, [1]]`.
#[must_use]
pub fn format_segments(segments: &[PathSegment<'_>]) -> String {
    let parts: Vec<String> = segments
        .iter()
        .map(|segment| match segment {
            PathSegment::Key(name) => (*name).to_owned(),
            PathSegment::Index(idx) => format!("[{idx}]"),
        })
        .collect();
    format!("[{}]", parts.join(", "))
}
