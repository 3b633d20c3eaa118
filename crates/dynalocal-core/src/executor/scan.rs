//! `Scan`.

use std::collections::HashMap;

use dynalocal_model::input::ScanInput;
use dynalocal_model::output::ScanOutput;
use dynalocal_model::types::Select;
use dynalocal_model::{DynamoDBError, ValidationErrors};
use tracing::debug;

use super::request::{
    attributes_to_get, check_consistent_read, check_index_name, check_limit, check_not_mixed,
    check_segment_ranges, check_table_name, prepare_condition, prepare_projection, resolve_index, resolve_segments,
    resolve_select, start_position, validate_select,
};
use super::{Executor, PagePlan, clamp_count, consumed_capacity, log_page};
use crate::error::storage_error_to_dynamodb;
use crate::expression::Usage;
use crate::expression::placeholders::{ExpressionSite, check_names, check_unused, check_values};
use crate::legacy::compile_conditions;
use crate::segment::{bucket_range, segment_of};
use crate::storage::TableCatalog;

impl Executor {
    /// Execute a `Scan`.
    ///
    /// # Errors
    ///
    /// Returns a `ValidationException` for any invalid parameter, and a
    /// `ResourceNotFoundException` for an unknown table.
    #[allow(clippy::needless_pass_by_value, clippy::too_many_lines)]
    pub fn execute_scan(
        &self,
        catalog: &dyn TableCatalog,
        input: ScanInput,
    ) -> Result<ScanOutput, DynamoDBError> {
        let mut errors = ValidationErrors::new();
        check_table_name(&mut errors, &input.table_name);
        check_index_name(&mut errors, input.index_name.as_deref());
        check_limit(&mut errors, input.limit);
        check_segment_ranges(&mut errors, input.segment, input.total_segments);
        errors.into_result()?;

        let (segment, total_segments) = resolve_segments(input.segment, input.total_segments)?;

        let mut legacy = Vec::new();
        if input.attributes_to_get.is_some() {
            legacy.push("AttributesToGet");
        }
        if input.scan_filter.is_some() {
            legacy.push("ScanFilter");
        }
        if input.conditional_operator.is_some() {
            legacy.push("ConditionalOperator");
        }
        let mut expressions = Vec::new();
        if input.projection_expression.is_some() {
            expressions.push("ProjectionExpression");
        }
        if input.filter_expression.is_some() {
            expressions.push("FilterExpression");
        }
        check_not_mixed(&legacy, &expressions)?;

        let names = input.expression_attribute_names.as_ref();
        let values = input.expression_attribute_values.as_ref();
        check_names(names, !expressions.is_empty())?;
        check_values(values, input.filter_expression.is_some(), ExpressionSite::Scan)?;

        let legacy_projection = attributes_to_get(input.attributes_to_get.as_deref())?;
        let has_projection = input.projection_expression.is_some();
        validate_select(input.select, has_projection, legacy_projection.is_some())?;

        let empty_names = HashMap::new();
        let empty_values = HashMap::new();
        let names = names.unwrap_or(&empty_names);
        let max_bytes = self.config.max_expression_bytes;
        let mut usage = Usage::default();

        let filter = input
            .filter_expression
            .as_deref()
            .map(|text| {
                prepare_condition(
                    "FilterExpression",
                    text,
                    names,
                    values.unwrap_or(&empty_values),
                    max_bytes,
                    &mut usage,
                )
            })
            .transpose()?;
        let projection = match input.projection_expression.as_deref() {
            Some(text) => Some(prepare_projection(text, names, max_bytes, &mut usage)?),
            None => legacy_projection,
        };
        let compiled = input
            .scan_filter
            .as_ref()
            .map(|conditions| compile_conditions(conditions, input.conditional_operator))
            .transpose()?
            .flatten();
        if self.config.strict_placeholders {
            check_unused(input.expression_attribute_names.as_ref(), values, &usage)?;
        }

        let table = catalog
            .table(&input.table_name)
            .ok_or_else(|| DynamoDBError::resource_not_found("Requested resource not found"))?;
        let schema = table.schema();
        let index = resolve_index(schema, input.index_name.as_deref())?;
        let select = resolve_select(input.select, index, projection.is_some())?;
        check_consistent_read(index, input.consistent_read)?;

        let start = start_position(schema, index, input.exclusive_start_key.as_ref())?;
        if let Some(start) = &start {
            if segment_of(start.bucket, total_segments) != segment {
                return Err(DynamoDBError::validation(format!(
                    "Invalid ExclusiveStartKey. Please use ExclusiveStartKey with correct \
                     Segment. TotalSegments: {total_segments} Segment: {segment}"
                )));
            }
        }

        let (filter, filter_values) = match (&filter, &compiled) {
            (Some(expr), _) => (Some(expr), values.unwrap_or(&empty_values)),
            (None, Some(compiled)) => (Some(&compiled.expr), &compiled.values),
            (None, None) => (None, &empty_values),
        };
        let plan = PagePlan {
            schema,
            index,
            key: None,
            filter,
            names,
            values: filter_values,
            projection: projection.as_deref(),
            select,
            limit: input.limit.and_then(|l| usize::try_from(l).ok()),
            max_page_bytes: u64::try_from(self.config.max_page_bytes).unwrap_or(u64::MAX),
        };

        debug!(
            table = %schema.name,
            index = input.index_name.as_deref(),
            segment,
            total_segments,
            resumed = start.is_some(),
            "scan"
        );
        let page = match bucket_range(segment, total_segments) {
            Some(buckets) => {
                let items = table
                    .scan(input.index_name.as_deref(), buckets, start.as_ref())
                    .map_err(storage_error_to_dynamodb)?;
                plan.run(items)?
            }
            None => super::Page::default(),
        };
        log_page("Scan", schema, index, &page);

        let consumed_capacity = consumed_capacity(
            input.return_consumed_capacity.as_ref(),
            schema,
            index,
            page.bytes,
            input.consistent_read.unwrap_or(false),
        );
        Ok(ScanOutput {
            items: (select != Select::Count).then_some(page.items),
            count: clamp_count(page.count),
            scanned_count: clamp_count(page.scanned_count),
            last_evaluated_key: page.last_evaluated_key,
            consumed_capacity,
        })
    }
}
