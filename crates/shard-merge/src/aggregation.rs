//! Cross-shard combination of partial aggregate values.

use shard_core::{AggregationType, Result, Value};

/// Folds one aggregate's per-shard partial values into the final value.
///
/// `merge` receives a single value for COUNT/SUM/MAX/MIN and the
/// `[count, sum]` pair for AVG.
pub trait AggregationUnit: Send {
    fn merge(&mut self, values: &[Value]) -> Result<()>;

    fn result(&self) -> Value;
}

pub fn create_unit(kind: AggregationType) -> Box<dyn AggregationUnit> {
    match kind {
        AggregationType::Count => Box::new(AccumulationUnit {
            total: Value::Null,
            empty: Value::Int64(0),
        }),
        AggregationType::Sum => Box::new(AccumulationUnit {
            total: Value::Null,
            empty: Value::Null,
        }),
        AggregationType::Max => Box::new(ComparableUnit {
            best: Value::Null,
            keep_greater: true,
        }),
        AggregationType::Min => Box::new(ComparableUnit {
            best: Value::Null,
            keep_greater: false,
        }),
        AggregationType::Avg => Box::new(AverageUnit {
            count: Value::Null,
            sum: Value::Null,
        }),
    }
}

/// COUNT and SUM: add the partials together.
struct AccumulationUnit {
    total: Value,
    empty: Value,
}

impl AggregationUnit for AccumulationUnit {
    fn merge(&mut self, values: &[Value]) -> Result<()> {
        if let Some(value) = values.first() {
            self.total = self.total.add(value)?;
        }
        Ok(())
    }

    fn result(&self) -> Value {
        if self.total.is_null() {
            self.empty.clone()
        } else {
            self.total.clone()
        }
    }
}

/// MAX and MIN. NULL partials are ignored.
struct ComparableUnit {
    best: Value,
    keep_greater: bool,
}

impl AggregationUnit for ComparableUnit {
    fn merge(&mut self, values: &[Value]) -> Result<()> {
        let Some(value) = values.first() else {
            return Ok(());
        };
        if value.is_null() {
            return Ok(());
        }
        let replace = self.best.is_null() || {
            let ordering = value.compare(&self.best);
            if self.keep_greater {
                ordering.is_gt()
            } else {
                ordering.is_lt()
            }
        };
        if replace {
            self.best = value.clone();
        }
        Ok(())
    }

    fn result(&self) -> Value {
        self.best.clone()
    }
}

/// AVG recomputed from the derived COUNT and SUM columns.
struct AverageUnit {
    count: Value,
    sum: Value,
}

impl AggregationUnit for AverageUnit {
    fn merge(&mut self, values: &[Value]) -> Result<()> {
        if let [count, sum, ..] = values {
            self.count = self.count.add(count)?;
            self.sum = self.sum.add(sum)?;
        }
        Ok(())
    }

    fn result(&self) -> Value {
        match (self.count.as_f64(), self.sum.as_f64()) {
            (Some(count), Some(sum)) if count != 0.0 => Value::Float64(sum / count),
            _ => Value::Null,
        }
    }
}
