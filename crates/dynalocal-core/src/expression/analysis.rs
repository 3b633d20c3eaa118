//! Post-parse checks for condition and projection expressions.
//!
//! The checks run as separate passes in a fixed order, and the first
//! failing category is reported. Within a category the first offending node
//! in source order wins. Successful analysis returns the placeholders the
//! expression references, which the executor uses for unused-entry checks.

use std::collections::{HashMap, HashSet};

use dynalocal_model::AttributeValue;

use super::ast::{AttributePath, Expr, FunctionCall, FunctionName, Operand, PathElement, format_segments};
use super::parser::ExpressionError;
use super::reserved::is_reserved;
use crate::comparator;

/// Maximum number of candidates accepted by `IN`.
pub const MAX_IN_OPERANDS: usize = 100;

/// Types accepted by `<`, `<=`, `>`, `>=` and `BETWEEN`.
pub(crate) const ORDERED_TYPES: &[&str] = &["S", "N", "B"];
/// Types accepted by `begins_with`.
pub(crate) const PREFIX_TYPES: &[&str] = &["S", "B"];
/// Types accepted by `size`.
pub(crate) const SIZED_TYPES: &[&str] = &["S", "B", "SS", "NS", "BS", "L", "M"];
/// Types rejected as the searched-for operand of `contains`.
pub(crate) const CONTAINS_REJECTED: &[&str] = &["SS", "NS", "BS", "L", "M"];
/// Type names accepted by `attribute_type`.
pub(crate) const TYPE_NAMES: &[&str] = &["B", "NULL", "SS", "BOOL", "L", "BS", "N", "NS", "S", "M"];

/// Placeholders referenced by one or more expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Usage {
    /// Referenced `#name` aliases.
    pub names: HashSet<String>,
    /// Referenced `:value` placeholders.
    pub values: HashSet<String>,
}

impl Usage {
    /// Add another expression's references.
    pub fn merge(&mut self, other: Self) {
        self.names.extend(other.names);
        self.values.extend(other.values);
    }
}

/// Where a function call appears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    /// As a standalone condition.
    Condition,
    /// As an operand of a comparison, `BETWEEN` or `IN`.
    Operand,
    /// As an argument of another function.
    Argument,
}

/// Every node of a condition tree, flattened in source order.
#[derive(Default)]
struct Nodes<'e> {
    exprs: Vec<&'e Expr>,
    calls: Vec<(&'e FunctionCall, Position)>,
    paths: Vec<&'e AttributePath>,
    values: Vec<&'e str>,
}

impl<'e> Nodes<'e> {
    fn collect(expr: &'e Expr) -> Self {
        let mut nodes = Self::default();
        nodes.visit_expr(expr);
        nodes
    }

    fn visit_expr(&mut self, expr: &'e Expr) {
        self.exprs.push(expr);
        match expr {
            Expr::Compare { left, right, .. } => {
                self.visit_operand(left, Position::Operand);
                self.visit_operand(right, Position::Operand);
            }
            Expr::Between { value, low, high } => {
                self.visit_operand(value, Position::Operand);
                self.visit_operand(low, Position::Operand);
                self.visit_operand(high, Position::Operand);
            }
            Expr::In { value, list } => {
                self.visit_operand(value, Position::Operand);
                for item in list {
                    self.visit_operand(item, Position::Operand);
                }
            }
            Expr::Logical { left, right, .. } => {
                self.visit_expr(left);
                self.visit_expr(right);
            }
            Expr::Not(inner) | Expr::Paren(inner) => self.visit_expr(inner),
            Expr::Function(call) => self.visit_call(call, Position::Condition),
        }
    }

    fn visit_call(&mut self, call: &'e FunctionCall, position: Position) {
        self.calls.push((call, position));
        for arg in &call.args {
            self.visit_operand(arg, Position::Argument);
        }
    }

    fn visit_operand(&mut self, operand: &'e Operand, position: Position) {
        match operand {
            Operand::Path(path) => self.paths.push(path),
            Operand::Value(name) => self.values.push(name),
            Operand::Function(call) => self.visit_call(call, position),
        }
    }
}

/// Run every post-parse check on a condition expression.
///
/// # Errors
///
/// Returns the first violation, in check order.
#[allow(clippy::implicit_hasher)]
pub fn analyze_condition(
    expr: &Expr,
    names: &HashMap<String, String>,
    values: &HashMap<String, AttributeValue>,
) -> Result<Usage, ExpressionError> {
    let nodes = Nodes::collect(expr);

    check_redundant_parentheses(&nodes)?;
    check_function_names(&nodes)?;
    check_function_positions(&nodes)?;
    check_reserved_words(nodes.paths.iter().copied())?;
    check_operand_counts(&nodes)?;
    check_names_defined(nodes.paths.iter().copied(), names)?;
    check_values_defined(&nodes, values)?;
    check_distinct_operands(&nodes, names)?;
    check_document_paths(&nodes)?;
    check_constant_types(&nodes, values)?;
    check_type_names(&nodes, values)?;
    check_between_bounds(&nodes, values)?;

    Ok(Usage {
        names: collect_aliases(nodes.paths.iter().copied()),
        values: nodes.values.iter().map(|v| (*v).to_owned()).collect(),
    })
}

/// Run the post-parse checks on a projection expression.
///
/// # Errors
///
/// Returns the first violation, in check order.
#[allow(clippy::implicit_hasher)]
pub fn analyze_projection(
    paths: &[AttributePath],
    names: &HashMap<String, String>,
) -> Result<Usage, ExpressionError> {
    check_reserved_words(paths.iter())?;
    check_names_defined(paths.iter(), names)?;
    check_path_overlaps(paths, names)?;
    Ok(Usage {
        names: collect_aliases(paths.iter()),
        values: HashSet::new(),
    })
}

/// Fail with `TooLong` when `text` exceeds `max` bytes.
///
/// # Errors
///
/// Returns `ExpressionError::TooLong` carrying the actual size.
pub fn check_length(text: &str, max: usize) -> Result<(), ExpressionError> {
    if text.len() > max {
        return Err(ExpressionError::TooLong { size: text.len() });
    }
    Ok(())
}

/// Resolved top-level attribute names referenced anywhere in a condition.
#[must_use]
#[allow(clippy::implicit_hasher)]
pub fn top_level_names<'e>(expr: &'e Expr, names: &'e HashMap<String, String>) -> Vec<&'e str> {
    let nodes = Nodes::collect(expr);
    let mut seen = Vec::new();
    for path in nodes.paths {
        if let Some(name) = path.top_level_name(names) {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
    }
    seen
}

fn collect_aliases<'p>(paths: impl Iterator<Item = &'p AttributePath>) -> HashSet<String> {
    paths
        .flat_map(|path| path.elements.iter())
        .filter_map(|element| match element {
            PathElement::Alias(alias) => Some(alias.clone()),
            _ => None,
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Individual passes
// ---------------------------------------------------------------------------

fn check_redundant_parentheses(nodes: &Nodes<'_>) -> Result<(), ExpressionError> {
    let redundant = nodes
        .exprs
        .iter()
        .any(|expr| matches!(expr, Expr::Paren(inner) if matches!(inner.as_ref(), Expr::Paren(_))));
    if redundant {
        return Err(ExpressionError::RedundantParentheses);
    }
    Ok(())
}

fn check_function_names(nodes: &Nodes<'_>) -> Result<(), ExpressionError> {
    match nodes.calls.iter().find(|(call, _)| call.function().is_none()) {
        Some((call, _)) => Err(ExpressionError::UnknownFunction {
            name: call.name.clone(),
        }),
        None => Ok(()),
    }
}

fn check_function_positions(nodes: &Nodes<'_>) -> Result<(), ExpressionError> {
    for (call, position) in &nodes.calls {
        let Some(function) = call.function() else {
            continue;
        };
        let allowed = match position {
            Position::Condition => function.is_condition(),
            Position::Operand => !function.is_condition(),
            Position::Argument => false,
        };
        if !allowed {
            return Err(ExpressionError::MisplacedFunction {
                name: call.name.clone(),
            });
        }
    }
    Ok(())
}

fn check_reserved_words<'p>(
    paths: impl Iterator<Item = &'p AttributePath>,
) -> Result<(), ExpressionError> {
    for path in paths {
        for element in &path.elements {
            if let PathElement::Name(name) = element {
                if is_reserved(name) {
                    return Err(ExpressionError::ReservedKeyword { name: name.clone() });
                }
            }
        }
    }
    Ok(())
}

fn check_operand_counts(nodes: &Nodes<'_>) -> Result<(), ExpressionError> {
    for (call, _) in &nodes.calls {
        if let Some(function) = call.function() {
            if call.args.len() != function.arity() {
                return Err(ExpressionError::OperandCount {
                    name: call.name.clone(),
                    count: call.args.len(),
                });
            }
        }
    }
    for expr in &nodes.exprs {
        if let Expr::In { list, .. } = expr {
            if list.len() > MAX_IN_OPERANDS {
                return Err(ExpressionError::TooManyInOperands { count: list.len() });
            }
        }
    }
    Ok(())
}

fn check_names_defined<'p>(
    paths: impl Iterator<Item = &'p AttributePath>,
    names: &HashMap<String, String>,
) -> Result<(), ExpressionError> {
    for path in paths {
        for element in &path.elements {
            if let PathElement::Alias(alias) = element {
                if !names.contains_key(alias) {
                    return Err(ExpressionError::UndefinedName {
                        name: alias.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_values_defined(
    nodes: &Nodes<'_>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(), ExpressionError> {
    match nodes.values.iter().find(|v| !values.contains_key(**v)) {
        Some(name) => Err(ExpressionError::UndefinedValue {
            name: (*name).to_owned(),
        }),
        None => Ok(()),
    }
}

fn check_distinct_operands(
    nodes: &Nodes<'_>,
    names: &HashMap<String, String>,
) -> Result<(), ExpressionError> {
    let same_path = |operator: &str, first: &Operand, other: &Operand| {
        let (Some(a), Some(b)) = (first.as_path(), other.as_path()) else {
            return Ok(());
        };
        match (a.resolve(names), b.resolve(names)) {
            (Some(x), Some(y)) if x == y => Err(ExpressionError::DuplicateOperand {
                operator: operator.to_owned(),
                operand: format_segments(&x),
            }),
            _ => Ok(()),
        }
    };

    for expr in &nodes.exprs {
        match expr {
            Expr::Compare { left, op, right } => same_path(&op.to_string(), left, right)?,
            Expr::Between { value, low, high } => {
                same_path("BETWEEN", value, low)?;
                same_path("BETWEEN", value, high)?;
            }
            Expr::In { value, list } => {
                for item in list {
                    same_path("IN", value, item)?;
                }
            }
            _ => {}
        }
    }
    for (call, _) in &nodes.calls {
        if matches!(
            call.function(),
            Some(FunctionName::Contains | FunctionName::BeginsWith | FunctionName::AttributeType)
        ) {
            if let [first, second, ..] = call.args.as_slice() {
                same_path(&call.name, first, second)?;
            }
        }
    }
    Ok(())
}

fn check_document_paths(nodes: &Nodes<'_>) -> Result<(), ExpressionError> {
    for (call, _) in &nodes.calls {
        let needs_path = matches!(
            call.function(),
            Some(
                FunctionName::AttributeExists
                    | FunctionName::AttributeNotExists
                    | FunctionName::AttributeType
            )
        );
        if needs_path && call.args.first().and_then(Operand::as_path).is_none() {
            return Err(ExpressionError::RequiresPath {
                name: call.name.clone(),
            });
        }
    }
    Ok(())
}

/// Type of an operand whose value is known before any item is read.
pub(crate) fn constant_type(
    operand: &Operand,
    values: &HashMap<String, AttributeValue>,
) -> Option<&'static str> {
    match operand {
        Operand::Path(_) => None,
        Operand::Value(name) => values.get(name).map(AttributeValue::type_descriptor),
        Operand::Function(_) => Some("N"),
    }
}

/// Fail with `Incorrect operand type` unless `descriptor` is in `allowed`.
pub(crate) fn require_type(
    name: &str,
    descriptor: &str,
    allowed: &[&str],
) -> Result<(), ExpressionError> {
    if allowed.contains(&descriptor) {
        Ok(())
    } else {
        Err(operand_type_error(name, descriptor))
    }
}

pub(crate) fn operand_type_error(name: &str, descriptor: &str) -> ExpressionError {
    ExpressionError::OperandType {
        name: name.to_owned(),
        operand_type: descriptor.to_owned(),
    }
}

fn check_constant_types(
    nodes: &Nodes<'_>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(), ExpressionError> {
    let check = |name: &str, operand: &Operand, allowed: &[&str]| match constant_type(operand, values) {
        Some(descriptor) => require_type(name, descriptor, allowed),
        None => Ok(()),
    };

    for expr in &nodes.exprs {
        match expr {
            Expr::Compare { left, op, right } if op.is_ordering() => {
                let name = op.to_string();
                check(&name, left, ORDERED_TYPES)?;
                check(&name, right, ORDERED_TYPES)?;
            }
            Expr::Between { value, low, high } => {
                check("BETWEEN", value, ORDERED_TYPES)?;
                check("BETWEEN", low, ORDERED_TYPES)?;
                check("BETWEEN", high, ORDERED_TYPES)?;
            }
            _ => {}
        }
    }

    for (call, _) in &nodes.calls {
        match (call.function(), call.args.as_slice()) {
            (Some(FunctionName::BeginsWith), [first, second]) => {
                check(&call.name, first, PREFIX_TYPES)?;
                check(&call.name, second, PREFIX_TYPES)?;
            }
            (Some(FunctionName::Contains), [_, second]) => {
                if let Some(descriptor) = constant_type(second, values) {
                    if CONTAINS_REJECTED.contains(&descriptor) {
                        return Err(operand_type_error(&call.name, descriptor));
                    }
                }
            }
            (Some(FunctionName::Size), [arg]) => check(&call.name, arg, SIZED_TYPES)?,
            (Some(FunctionName::AttributeType), [_, second]) => {
                check(&call.name, second, &["S"])?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn check_type_names(
    nodes: &Nodes<'_>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(), ExpressionError> {
    for (call, _) in &nodes.calls {
        if call.function() != Some(FunctionName::AttributeType) {
            continue;
        }
        if let Some(Operand::Value(name)) = call.args.get(1) {
            if let Some(AttributeValue::S(type_name)) = values.get(name) {
                if !TYPE_NAMES.contains(&type_name.as_str()) {
                    return Err(ExpressionError::InvalidTypeName {
                        value: type_name.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn check_between_bounds(
    nodes: &Nodes<'_>,
    values: &HashMap<String, AttributeValue>,
) -> Result<(), ExpressionError> {
    for expr in &nodes.exprs {
        let Expr::Between { low, high, .. } = expr else {
            continue;
        };
        let (Operand::Value(low), Operand::Value(high)) = (&**low, &**high) else {
            continue;
        };
        let (Some(low), Some(high)) = (values.get(low), values.get(high)) else {
            continue;
        };
        between_bounds(low, high)?;
    }
    Ok(())
}

/// Check that two BETWEEN bounds share a type and are in order.
pub(crate) fn between_bounds(
    low: &AttributeValue,
    high: &AttributeValue,
) -> Result<(), ExpressionError> {
    if low.type_descriptor() != high.type_descriptor() {
        return Err(ExpressionError::BetweenTypes {
            low: low.to_string(),
            high: high.to_string(),
        });
    }
    if comparator::compare(low, high) == Some(std::cmp::Ordering::Greater) {
        return Err(ExpressionError::BetweenBounds {
            low: low.to_string(),
            high: high.to_string(),
        });
    }
    Ok(())
}

fn check_path_overlaps(
    paths: &[AttributePath],
    names: &HashMap<String, String>,
) -> Result<(), ExpressionError> {
    use super::ast::PathSegment;

    let resolved: Vec<Vec<PathSegment<'_>>> =
        paths.iter().filter_map(|path| path.resolve(names)).collect();

    for (i, one) in resolved.iter().enumerate() {
        for two in &resolved[i + 1..] {
            let diverge = one.iter().zip(two.iter()).find(|(a, b)| a != b);
            match diverge {
                None => {
                    return Err(ExpressionError::OverlappingPaths {
                        one: format_segments(one),
                        two: format_segments(two),
                    });
                }
                Some((PathSegment::Key(_), PathSegment::Index(_)))
                | Some((PathSegment::Index(_), PathSegment::Key(_))) => {
                    return Err(ExpressionError::ConflictingPaths {
                        one: format_segments(one),
                        two: format_segments(two),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}
