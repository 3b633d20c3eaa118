//! DynamoDB expression parsing, analysis and evaluation.
//!
//! The pipeline is:
//!
//! 1. **Lexing and parsing**: build an AST with recursive descent.
//! 2. **Analysis**: run the service's post-parse checks in their fixed order
//!    and collect the referenced placeholders.
//! 3. **Evaluation**: walk the AST to evaluate conditions or project paths.

pub mod analysis;
pub mod ast;
pub mod evaluator;
pub mod parser;
pub mod placeholders;
pub mod projection;
pub mod reserved;

pub use analysis::{Usage, analyze_condition, analyze_projection, check_length};
pub use ast::{AttributePath, CompareOp, Expr, FunctionCall, FunctionName, Operand, PathElement};
pub use evaluator::EvalContext;
pub use parser::{
    ExpressionError, ExpressionKind, ParsedExpression, parse_condition, parse_expression,
    parse_projection,
};
pub use projection::project;
