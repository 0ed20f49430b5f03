//! Executes single AST nodes against an execution context

use mscript_dsl::{AstNode, Command, ScriptValue, StopCondition};
use tracing::debug;

use crate::context::ScriptExecutionContext;
use crate::error::{Result, VMError};

/// Applies one command at a time to a context
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    /// Propagation interval when neither a stop condition nor a propagator supplies one
    default_step_seconds: f64,
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new(60.0)
    }
}

impl CommandExecutor {
    /// Create a new executor
    pub fn new(default_step_seconds: f64) -> Self {
        Self {
            default_step_seconds,
        }
    }

    /// Execute one node
    pub fn execute(&self, node: &AstNode, ctx: &mut ScriptExecutionContext) -> Result<()> {
        match &node.command {
            Command::Create {
                object_type,
                object_name,
            } => {
                if ctx.create_object(object_type, object_name).is_some() {
                    debug!(object = %object_name, "rebinding existing object");
                }
                ctx.log(format!("Created {} {}", object_type, object_name));
                Ok(())
            }
            Command::Set {
                object_name,
                property_name,
                value,
            } => self.execute_set(ctx, object_name, property_name, value),
            Command::Propagate {
                propagator,
                spacecraft,
                stop_condition,
            } => self.execute_propagate(ctx, propagator, spacecraft, stop_condition.as_ref()),
            Command::Report { tokens } => {
                let fields: Vec<String> = tokens
                    .iter()
                    .map(|token| format!("{}={}", token, ctx.resolve_report_token(token)))
                    .collect();
                ctx.log(format!("Report: {}", fields.join(" ")));
                Ok(())
            }
            Command::Variable { name, value } => {
                ctx.set_variable(name.clone(), value.clone());
                ctx.log(format!("Variable {} = {}", name, value));
                Ok(())
            }
            Command::Save { object_name } => {
                ctx.log(format!("Saved {}", object_name));
                Ok(())
            }
            Command::If { .. }
            | Command::Else
            | Command::EndIf
            | Command::While { .. }
            | Command::EndWhile => {
                debug!(line = node.line_number, "control flow is recorded, not interpreted");
                Ok(())
            }
            Command::Comment { .. } | Command::Unknown => Ok(()),
        }
    }

    fn execute_set(
        &self,
        ctx: &mut ScriptExecutionContext,
        object_name: &str,
        property_name: &str,
        value: &ScriptValue,
    ) -> Result<()> {
        match ctx.get_object_mut(object_name) {
            Some(object) => object.set_property(property_name, value.clone())?,
            // Not an object: the assignment becomes a variable
            None => ctx.set_variable(format!("{}.{}", object_name, property_name), value.clone()),
        }
        ctx.log(format!("Set {}.{} = {}", object_name, property_name, value));
        Ok(())
    }

    fn execute_propagate(
        &self,
        ctx: &mut ScriptExecutionContext,
        propagator: &str,
        spacecraft: &str,
        stop_condition: Option<&StopCondition>,
    ) -> Result<()> {
        let days = match stop_condition {
            Some(stop) => stop.value.as_f64().ok_or_else(|| {
                VMError::ExecutionError(format!(
                    "Stop value '{}' for {}.{} is not numeric",
                    stop.value, stop.object_name, stop.property_name
                ))
            })?,
            None => {
                let step = ctx
                    .get_object(propagator)
                    .and_then(|obj| obj.as_propagator())
                    .map(|prop| prop.step_size)
                    .unwrap_or(self.default_step_seconds);
                step / 86_400.0
            }
        };

        let craft = ctx
            .get_object_mut(spacecraft)
            .ok_or_else(|| VMError::ObjectNotFound(spacecraft.to_string()))?
            .as_spacecraft_mut()
            .ok_or_else(|| {
                VMError::ExecutionError(format!("'{}' is not a Spacecraft", spacecraft))
            })?;
        craft.propagate_days(days)?;

        ctx.log(format!(
            "Propagated {} with {} for {:.6} days",
            spacecraft, propagator, days
        ));
        Ok(())
    }
}
