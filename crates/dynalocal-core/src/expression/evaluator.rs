//! Expression evaluator for DynamoDB condition and filter expressions.
//!
//! The evaluator resolves expression attribute names and values against an
//! item, then evaluates the condition to a boolean. Missing data paths and
//! data of the wrong type make a comparison false; only missing placeholders
//! and constants of the wrong type are errors.

use std::collections::HashMap;

use dynalocal_model::AttributeValue;

use super::analysis::{
    CONTAINS_REJECTED, ORDERED_TYPES, PREFIX_TYPES, SIZED_TYPES, TYPE_NAMES, operand_type_error,
    require_type,
};
use super::ast::{
    AttributePath, CompareOp, Expr, FunctionCall, FunctionName, LogicalOp, Operand, PathSegment,
};
use super::parser::ExpressionError;
use crate::comparator::{compare, equals, set_contains};

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Evaluation context binding an item to its expression attribute name/value mappings.
#[derive(Debug)]
pub struct EvalContext<'a> {
    /// The DynamoDB item being evaluated.
    pub item: &'a HashMap<String, AttributeValue>,
    /// Expression attribute name substitutions (`#name` -> actual attribute name).
    pub names: &'a HashMap<String, String>,
    /// Expression attribute value substitutions (`:val` -> `AttributeValue`).
    pub values: &'a HashMap<String, AttributeValue>,
}

/// A resolved operand, tagged with whether it came from the request rather
/// than from the item.
#[derive(Debug)]
struct Resolved {
    value: Option<AttributeValue>,
    constant: bool,
}

// ---------------------------------------------------------------------------
// Condition evaluation
// ---------------------------------------------------------------------------

impl EvalContext<'_> {
    /// Evaluate a condition expression against the item, returning `true` or `false`.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError` if a placeholder cannot be resolved or a
    /// constant operand has the wrong type.
    pub fn evaluate(&self, expr: &Expr) -> Result<bool, ExpressionError> {
        match expr {
            Expr::Compare { left, op, right } => self.eval_compare(left, *op, right),
            Expr::Between { value, low, high } => self.eval_between(value, low, high),
            Expr::In { value, list } => self.eval_in(value, list),
            Expr::Logical { op, left, right } => self.eval_logical(*op, left, right),
            Expr::Not(inner) => self.evaluate(inner).map(|v| !v),
            Expr::Function(call) => self.eval_function(call),
            Expr::Paren(inner) => self.evaluate(inner),
        }
    }

    fn eval_compare(
        &self,
        left: &Operand,
        op: CompareOp,
        right: &Operand,
    ) -> Result<bool, ExpressionError> {
        let lval = self.resolve_typed(left)?;
        let rval = self.resolve_typed(right)?;

        if op.is_ordering() {
            let name = op.to_string();
            check_constant(&name, &lval, ORDERED_TYPES)?;
            check_constant(&name, &rval, ORDERED_TYPES)?;
        }

        let (Some(lv), Some(rv)) = (&lval.value, &rval.value) else {
            return Ok(op == CompareOp::Ne);
        };

        Ok(match op {
            CompareOp::Eq => equals(lv, rv),
            CompareOp::Ne => !equals(lv, rv),
            CompareOp::Lt => compare(lv, rv).is_some_and(std::cmp::Ordering::is_lt),
            CompareOp::Le => compare(lv, rv).is_some_and(std::cmp::Ordering::is_le),
            CompareOp::Gt => compare(lv, rv).is_some_and(std::cmp::Ordering::is_gt),
            CompareOp::Ge => compare(lv, rv).is_some_and(std::cmp::Ordering::is_ge),
        })
    }

    fn eval_between(
        &self,
        value: &Operand,
        low: &Operand,
        high: &Operand,
    ) -> Result<bool, ExpressionError> {
        let v = self.resolve_typed(value)?;
        let lo = self.resolve_typed(low)?;
        let hi = self.resolve_typed(high)?;
        for operand in [&v, &lo, &hi] {
            check_constant("BETWEEN", operand, ORDERED_TYPES)?;
        }

        let (Some(v), Some(lo), Some(hi)) = (&v.value, &lo.value, &hi.value) else {
            return Ok(false);
        };

        let ge_low = compare(v, lo).is_some_and(std::cmp::Ordering::is_ge);
        let le_high = compare(v, hi).is_some_and(std::cmp::Ordering::is_le);
        Ok(ge_low && le_high)
    }

    fn eval_in(&self, value: &Operand, list: &[Operand]) -> Result<bool, ExpressionError> {
        let v = self.resolve_operand(value)?;
        let Some(v) = &v else {
            return Ok(false);
        };
        for item in list {
            if let Some(candidate) = self.resolve_operand(item)? {
                if equals(v, &candidate) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn eval_logical(
        &self,
        op: LogicalOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<bool, ExpressionError> {
        match op {
            LogicalOp::And => {
                if !self.evaluate(left)? {
                    return Ok(false);
                }
                self.evaluate(right)
            }
            LogicalOp::Or => {
                if self.evaluate(left)? {
                    return Ok(true);
                }
                self.evaluate(right)
            }
        }
    }

    fn eval_function(&self, call: &FunctionCall) -> Result<bool, ExpressionError> {
        let Some(function) = call.function() else {
            return Err(ExpressionError::UnknownFunction {
                name: call.name.clone(),
            });
        };
        match (function, call.args.as_slice()) {
            (FunctionName::AttributeExists, [arg]) => {
                let path = operand_as_path(arg, &call.name)?;
                Ok(self.resolve_path(path).is_some())
            }
            (FunctionName::AttributeNotExists, [arg]) => {
                let path = operand_as_path(arg, &call.name)?;
                Ok(self.resolve_path(path).is_none())
            }
            (FunctionName::AttributeType, [target, type_name]) => {
                let path = operand_as_path(target, &call.name)?;
                let expected = self.resolve_typed(type_name)?;
                check_constant(&call.name, &expected, &["S"])?;
                let Some(AttributeValue::S(expected)) = expected.value else {
                    return Ok(false);
                };
                if !TYPE_NAMES.contains(&expected.as_str()) {
                    return Err(ExpressionError::InvalidTypeName { value: expected });
                }
                Ok(self
                    .resolve_path(path)
                    .is_some_and(|val| val.type_descriptor() == expected))
            }
            (FunctionName::BeginsWith, [target, prefix]) => {
                let target = self.resolve_typed(target)?;
                let prefix = self.resolve_typed(prefix)?;
                check_constant(&call.name, &target, PREFIX_TYPES)?;
                check_constant(&call.name, &prefix, PREFIX_TYPES)?;
                Ok(match (&target.value, &prefix.value) {
                    (Some(AttributeValue::S(s)), Some(AttributeValue::S(p))) => s.starts_with(p.as_str()),
                    (Some(AttributeValue::B(b)), Some(AttributeValue::B(p))) => b.starts_with(p),
                    _ => false,
                })
            }
            (FunctionName::Contains, [target, operand]) => {
                let target = self.resolve_operand(target)?;
                let operand = self.resolve_typed(operand)?;
                if let (true, Some(value)) = (operand.constant, &operand.value) {
                    let descriptor = value.type_descriptor();
                    if CONTAINS_REJECTED.contains(&descriptor) {
                        return Err(operand_type_error(&call.name, descriptor));
                    }
                }
                let (Some(target), Some(operand)) = (&target, &operand.value) else {
                    return Ok(false);
                };
                Ok(contains(target, operand))
            }
            (FunctionName::Size, _) => Err(ExpressionError::MisplacedFunction {
                name: call.name.clone(),
            }),
            (_, args) => Err(ExpressionError::OperandCount {
                name: call.name.clone(),
                count: args.len(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Operand resolution
// ---------------------------------------------------------------------------

impl EvalContext<'_> {
    /// Resolve an operand to its concrete `AttributeValue`, if present.
    ///
    /// # Errors
    ///
    /// Returns `ExpressionError` if a value reference (`:name`) cannot be found
    /// in the values map, or `size` is applied to a constant without a size.
    pub fn resolve_operand(
        &self,
        operand: &Operand,
    ) -> Result<Option<AttributeValue>, ExpressionError> {
        self.resolve_typed(operand).map(|resolved| resolved.value)
    }

    fn resolve_typed(&self, operand: &Operand) -> Result<Resolved, ExpressionError> {
        match operand {
            Operand::Path(path) => Ok(Resolved {
                value: self.resolve_path(path).cloned(),
                constant: false,
            }),
            Operand::Value(name) => match self.values.get(name) {
                Some(value) => Ok(Resolved {
                    value: Some(value.clone()),
                    constant: true,
                }),
                None => Err(ExpressionError::UndefinedValue { name: name.clone() }),
            },
            Operand::Function(call) => self.resolve_size(call),
        }
    }

    fn resolve_size(&self, call: &FunctionCall) -> Result<Resolved, ExpressionError> {
        let (Some(FunctionName::Size), [arg]) = (call.function(), call.args.as_slice()) else {
            return Err(ExpressionError::MisplacedFunction {
                name: call.name.clone(),
            });
        };
        let target = self.resolve_typed(arg)?;
        if target.constant {
            if let Some(value) = &target.value {
                require_type(&call.name, value.type_descriptor(), SIZED_TYPES)?;
            }
        }
        Ok(Resolved {
            value: target
                .value
                .as_ref()
                .and_then(attribute_size)
                .map(|size| AttributeValue::N(size.to_string())),
            constant: true,
        })
    }

    /// Walk an attribute path against the item, resolving `#name` placeholders
    /// through the names map.
    #[must_use]
    pub fn resolve_path(&self, path: &AttributePath) -> Option<&AttributeValue> {
        let segments = path.resolve(self.names)?;
        let (first, rest) = segments.split_first()?;
        let PathSegment::Key(name) = first else {
            return None;
        };
        let mut current = self.item.get(*name)?;
        for segment in rest {
            current = match segment {
                PathSegment::Key(key) => current.as_m()?.get(*key)?,
                PathSegment::Index(idx) => current.as_l()?.get(*idx)?,
            };
        }
        Some(current)
    }
}

// ---------------------------------------------------------------------------
// Helper functions
// ---------------------------------------------------------------------------

/// Reject a constant operand whose type is not in `allowed`; data operands
/// pass through.
fn check_constant(name: &str, operand: &Resolved, allowed: &[&str]) -> Result<(), ExpressionError> {
    match (&operand.value, operand.constant) {
        (Some(value), true) => require_type(name, value.type_descriptor(), allowed),
        _ => Ok(()),
    }
}

/// `size()` of a value: characters for `S`, bytes for `B`, elements for
/// collections. Scalars without a size yield `None`.
fn attribute_size(val: &AttributeValue) -> Option<usize> {
    match val {
        AttributeValue::S(s) => Some(s.chars().count()),
        AttributeValue::B(b) => Some(b.len()),
        AttributeValue::Ss(v) | AttributeValue::Ns(v) => Some(v.len()),
        AttributeValue::Bs(v) => Some(v.len()),
        AttributeValue::L(v) => Some(v.len()),
        AttributeValue::M(m) => Some(m.len()),
        AttributeValue::N(_) | AttributeValue::Bool(_) | AttributeValue::Null(_) => None,
    }
}

fn contains(target: &AttributeValue, operand: &AttributeValue) -> bool {
    match (target, operand) {
        (AttributeValue::S(s), AttributeValue::S(sub)) => s.contains(sub.as_str()),
        (AttributeValue::B(b), AttributeValue::B(sub)) => {
            sub.is_empty() || b.windows(sub.len()).any(|window| window == &sub[..])
        }
        (AttributeValue::Ss(_) | AttributeValue::Ns(_) | AttributeValue::Bs(_), _) => {
            set_contains(target, operand)
        }
        (AttributeValue::L(list), _) => list.iter().any(|element| equals(element, operand)),
        _ => false,
    }
}

/// Extract the path argument from an operand, returning an error if it is not a path.
fn operand_as_path<'o>(
    operand: &'o Operand,
    function_name: &str,
) -> Result<&'o AttributePath, ExpressionError> {
    operand
        .as_path()
        .ok_or_else(|| ExpressionError::RequiresPath {
            name: function_name.to_owned(),
        })
}
