//! Per-job execution state

use std::collections::{BTreeMap, HashMap};

use mscript_dsl::ScriptValue;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, VMError};
use crate::objects::ScriptObject;

/// Literal emitted by `Report` for a name that resolves to nothing
pub const UNDEFINED: &str = "undefined";
/// Literal emitted by `Report` for an unresolvable `Object.Property`
pub const NOT_AVAILABLE: &str = "N/A";

/// Live bindings for one job. Objects and variables are separate namespaces.
#[derive(Debug)]
pub struct ScriptExecutionContext {
    pub objects: HashMap<String, ScriptObject>,
    pub variables: BTreeMap<String, ScriptValue>,
    pub output_log: Vec<String>,
    cancellation: CancellationToken,
}

impl ScriptExecutionContext {
    pub fn new(cancellation: CancellationToken) -> Self {
        Self {
            objects: HashMap::new(),
            variables: BTreeMap::new(),
            output_log: Vec::new(),
            cancellation,
        }
    }

    pub fn is_cancellation_requested(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn throw_if_cancellation_requested(&self) -> Result<()> {
        if self.is_cancellation_requested() {
            return Err(VMError::Cancelled);
        }
        Ok(())
    }

    /// Bind a fresh object under `name`. Returns the object it replaced.
    pub fn create_object(&mut self, object_type: &str, name: &str) -> Option<ScriptObject> {
        self.objects
            .insert(name.to_string(), ScriptObject::create(object_type))
    }

    pub fn get_object(&self, name: &str) -> Option<&ScriptObject> {
        self.objects.get(name)
    }

    pub fn get_object_mut(&mut self, name: &str) -> Option<&mut ScriptObject> {
        self.objects.get_mut(name)
    }

    pub fn set_variable(&mut self, name: impl Into<String>, value: ScriptValue) {
        self.variables.insert(name.into(), value);
    }

    pub fn get_variable(&self, name: &str) -> Option<&ScriptValue> {
        self.variables.get(name)
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.output_log.push(line.into());
    }

    /// Resolve one `Report` token to its display text.
    ///
    /// `Obj.Prop` goes through the object's accessors when `Obj` is an
    /// object and is `N/A` for an unknown property. Otherwise the whole token
    /// is looked up as a variable, which is where `Set` stores assignments to
    /// non-objects.
    pub fn resolve_report_token(&self, token: &str) -> String {
        match token.split_once('.') {
            Some((object, property)) => match self.get_object(object) {
                Some(obj) => obj
                    .report_property(property)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
                None => self
                    .get_variable(token)
                    .map(ToString::to_string)
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            },
            None => self
                .get_variable(token)
                .map(ToString::to_string)
                .unwrap_or_else(|| UNDEFINED.to_string()),
        }
    }

    /// Hand back the parts that outlive the job
    pub fn into_results(self) -> (BTreeMap<String, ScriptValue>, Vec<String>) {
        (self.variables, self.output_log)
    }
}
