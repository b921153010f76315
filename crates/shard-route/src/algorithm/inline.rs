use super::{
    find_target_by_name, prop_bool, prop_string, push_unique, required_string, unsupported, Props,
    ShardingAlgorithm, ShardingInput,
};
use crate::expression::InlineTemplate;
use shard_core::{Result, ShardError, Value};

const ALLOW_RANGE: &str = "allow-range-query-with-inline-sharding";

fn range_query(
    algorithm: &dyn ShardingAlgorithm,
    template: &InlineTemplate,
    allow_range: bool,
    targets: &[String],
) -> Result<Vec<String>> {
    if allow_range {
        return Ok(targets.to_vec());
    }
    Err(ShardError::ConfigurationError(format!(
        "{} expression `{}` does not support range queries; set `{}` to route them to every target",
        algorithm.algorithm_type(),
        template.source(),
        ALLOW_RANGE
    )))
}

/// Single-column expression such as `t_order_${order_id % 2}`.
#[derive(Debug, Clone)]
pub struct InlineShardingAlgorithm {
    template: InlineTemplate,
    allow_range: bool,
}

impl InlineShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        let expression = required_string("INLINE", props, "algorithm-expression")?;
        Ok(Self {
            template: InlineTemplate::parse(&expression)?,
            allow_range: prop_bool(props, ALLOW_RANGE),
        })
    }
}

impl ShardingAlgorithm for InlineShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "INLINE"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        match input {
            ShardingInput::Precise { column, value } => {
                let name = self.template.evaluate(|placeholder| {
                    placeholder
                        .eq_ignore_ascii_case(column)
                        .then(|| (*value).clone())
                })?;
                Ok(find_target_by_name(targets, &name).into_iter().collect())
            }
            ShardingInput::Range { .. } => {
                range_query(self, &self.template, self.allow_range, targets)
            }
            _ => Err(unsupported(self, input)),
        }
    }
}

/// Multi-column expression such as `t_order_${user_id % 2}_${order_id % 2}`.
#[derive(Debug, Clone)]
pub struct ComplexInlineShardingAlgorithm {
    template: InlineTemplate,
    sharding_columns: Vec<String>,
    allow_range: bool,
}

impl ComplexInlineShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        let expression = required_string("COMPLEX_INLINE", props, "algorithm-expression")?;
        let template = InlineTemplate::parse(&expression)?;
        let sharding_columns = match prop_string(props, "sharding-columns") {
            Some(columns) => columns
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
            None => template.columns().iter().map(|c| c.to_string()).collect(),
        };
        Ok(Self {
            template,
            sharding_columns,
            allow_range: prop_bool(props, ALLOW_RANGE),
        })
    }

    pub fn sharding_columns(&self) -> &[String] {
        &self.sharding_columns
    }
}

impl ShardingAlgorithm for ComplexInlineShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "COMPLEX_INLINE"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        let ShardingInput::Complex { values, ranges } = input else {
            return Err(unsupported(self, input));
        };
        if !ranges.is_empty() {
            return range_query(self, &self.template, self.allow_range, targets);
        }
        let columns = self.template.columns();
        let mut per_column: Vec<&Vec<Value>> = Vec::with_capacity(columns.len());
        for column in &columns {
            match values.iter().find(|(name, _)| name.eq_ignore_ascii_case(column)) {
                Some((_, column_values)) => per_column.push(column_values),
                // Unconstrained column: any target may hold the row.
                None => return Ok(targets.to_vec()),
            }
        }

        let mut combinations: Vec<Vec<&Value>> = vec![Vec::new()];
        for column_values in per_column {
            combinations = combinations
                .iter()
                .flat_map(|prefix| {
                    column_values.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.push(value);
                        next
                    })
                })
                .collect();
        }

        let mut out = Vec::new();
        for combination in combinations {
            let name = self.template.evaluate(|placeholder| {
                columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(placeholder))
                    .map(|i| combination[i].clone())
            })?;
            if let Some(target) = find_target_by_name(targets, &name) {
                push_unique(&mut out, target);
            }
        }
        Ok(out)
    }
}

/// Expression over hint values, `${value}` by default.
#[derive(Debug, Clone)]
pub struct HintInlineShardingAlgorithm {
    template: InlineTemplate,
}

impl HintInlineShardingAlgorithm {
    pub fn new(props: &Props) -> Result<Self> {
        let expression =
            prop_string(props, "algorithm-expression").unwrap_or_else(|| "${value}".to_string());
        Ok(Self {
            template: InlineTemplate::parse(&expression)?,
        })
    }
}

impl ShardingAlgorithm for HintInlineShardingAlgorithm {
    fn algorithm_type(&self) -> &'static str {
        "HINT_INLINE"
    }

    fn do_sharding(&self, targets: &[String], input: &ShardingInput<'_>) -> Result<Vec<String>> {
        let ShardingInput::Hint { values } = input else {
            return Err(unsupported(self, input));
        };
        let mut out = Vec::new();
        for value in values.iter() {
            let name = self.template.evaluate(|_| Some(value.clone()))?;
            if let Some(target) = find_target_by_name(targets, &name) {
                push_unique(&mut out, target);
            }
        }
        Ok(out)
    }
}
