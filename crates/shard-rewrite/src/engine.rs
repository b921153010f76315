use crate::context::{RewriteContext, UnitScope};
use crate::generator::{default_generators, TokenGenerator};
use crate::token::splice;
use serde::{Deserialize, Serialize};
use shard_core::{Result, Value};
use shard_route::RouteUnit;
use std::fmt;

/// SQL text and parameters for one physical execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlUnit {
    pub sql: String,
    pub parameters: Vec<Value>,
}

/// A rewritten statement bound to the unit it runs on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionUnit {
    pub route_unit: RouteUnit,
    pub sql_unit: SqlUnit,
}

impl ExecutionUnit {
    pub fn data_source(&self) -> &str {
        self.route_unit.data_source_name()
    }
}

impl fmt::Display for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ::: {}", self.data_source(), self.sql_unit.sql)?;
        if !self.sql_unit.parameters.is_empty() {
            let params: Vec<String> = self.sql_unit.parameters.iter().map(|p| p.to_string()).collect();
            write!(f, " ::: [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Produces one [`ExecutionUnit`] per route unit from an ordered list of
/// token generators.
pub struct RewriteEngine {
    generators: Vec<Box<dyn TokenGenerator>>,
}

impl RewriteEngine {
    pub fn new() -> Self {
        Self {
            generators: default_generators(),
        }
    }

    /// Append a generator; it runs after the built-in ones.
    pub fn with_generator(mut self, generator: Box<dyn TokenGenerator>) -> Self {
        self.generators.push(generator);
        self
    }

    pub fn generator_names(&self) -> Vec<&'static str> {
        self.generators.iter().map(|g| g.name()).collect()
    }

    pub fn rewrite(&self, context: &RewriteContext<'_>) -> Result<Vec<ExecutionUnit>> {
        let applicable: Vec<&dyn TokenGenerator> = self
            .generators
            .iter()
            .map(|g| g.as_ref())
            .filter(|g| g.is_applicable(context))
            .collect();

        let mut units = Vec::with_capacity(context.route.len());
        for route_unit in context.route.units() {
            let scope = UnitScope::new(context, route_unit);
            let mut tokens = Vec::new();
            for generator in &applicable {
                match generator.generate(context, &scope) {
                    Ok(generated) => tokens.extend(generated),
                    Err(e) => {
                        tracing::error!(
                            generator = generator.name(),
                            unit = %route_unit,
                            error = %e,
                            "Token generation failed"
                        );
                        return Err(e);
                    }
                }
            }
            let sql = splice(context.sql, tokens).map_err(|e| {
                tracing::error!(unit = %route_unit, error = %e, sql = context.sql, "SQL splice failed");
                e
            })?;
            let parameters = scope
                .parameters
                .apply(context.params, context.parameter_overrides());
            units.push(ExecutionUnit {
                route_unit: route_unit.clone(),
                sql_unit: SqlUnit { sql, parameters },
            });
        }
        tracing::debug!(units = units.len(), generators = applicable.len(), "Statement rewritten");
        Ok(units)
    }
}

impl Default for RewriteEngine {
    fn default() -> Self {
        Self::new()
    }
}
