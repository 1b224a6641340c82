//! Variable object cache
//!
//! GDB variable objects are server-side handles to evaluated expressions.
//! Creating one is a command (`var-create`), so the cache exists to create
//! each object exactly once per session and reuse it for every later read.
//! Values go stale while the target runs; a bulk `var-update` refresh is
//! issued best-effort before stack-variable reads and applied here as a
//! changelist. Objects live until session teardown.

use espdap_mi::MiValue;
use tracing::debug;

use crate::error::Result;
use crate::handles::{HandleTable, VAR_REF_START};
use crate::protocol::Variable;

/// A live GDB variable object.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableObject {
    /// Identity: the name registered with GDB. Synthetic for top-level
    /// locals, debugger-assigned for children.
    pub name: String,
    /// The source expression this object evaluates
    pub expression: String,
    pub value: String,
    pub var_type: Option<String>,
    pub num_child: u32,
    pub has_more: Option<u32>,
}

impl VariableObject {
    /// Build from a `var-create` reply. GDB echoes the name we chose, so
    /// the expression is supplied by the caller.
    pub fn from_create(expression: &str, fields: &MiValue) -> Result<Self> {
        Ok(Self {
            name: fields.expect_str("name")?.to_string(),
            expression: expression.to_string(),
            value: fields.get_str("value").unwrap_or_default().to_string(),
            var_type: fields.get_str("type").map(str::to_string),
            num_child: fields.expect_u64("numchild")? as u32,
            has_more: fields.get_str("has_more").and_then(|v| v.parse().ok()),
        })
    }

    /// Build from one `child` tuple of a `var-list-children` reply.
    pub fn from_child(fields: &MiValue) -> Result<Self> {
        Ok(Self {
            name: fields.expect_str("name")?.to_string(),
            expression: fields.expect_str("exp")?.to_string(),
            value: fields.get_str("value").unwrap_or_default().to_string(),
            var_type: fields.get_str("type").map(str::to_string),
            num_child: fields.expect_u64("numchild")? as u32,
            has_more: fields.get_str("has_more").and_then(|v| v.parse().ok()),
        })
    }

    /// Apply one element of a `var-update` changelist.
    pub fn apply_update(&mut self, change: &MiValue) {
        if let Some(value) = change.get_str("value") {
            self.value = value.to_string();
        }
    }

    /// Shape for the editor. A zero-child object reports reference 0,
    /// which tells the editor it is not expandable.
    pub fn to_variable(&self, handle: u32) -> Variable {
        Variable {
            name: self.expression.clone(),
            value: self.value.clone(),
            var_type: self.var_type.clone(),
            variables_reference: if self.num_child == 0 { 0 } else { handle },
        }
    }
}

/// Identity-keyed cache of live variable objects.
pub struct VariableCache {
    table: HandleTable<VariableObject>,
}

impl VariableCache {
    pub fn new() -> Self {
        Self {
            table: HandleTable::new(VAR_REF_START),
        }
    }

    pub fn get(&self, handle: u32) -> Option<&VariableObject> {
        self.table.get(handle)
    }

    pub fn lookup(&self, identity: &str) -> Option<(u32, &VariableObject)> {
        self.table.get_by_identity(identity)
    }

    /// Register a freshly created object; its `name` is the identity.
    pub fn insert(&mut self, object: VariableObject) -> u32 {
        self.table.create(object.name.clone(), object)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Apply a `var-update --all-values *` changelist to the cached
    /// objects. Entries for unknown objects are ignored with a debug log;
    /// GDB may report children we never materialized.
    pub fn apply_changelist(&mut self, changelist: &MiValue) {
        let Some(changes) = changelist.as_list() else {
            return;
        };
        for change in changes {
            let Some(name) = change.get_str("name") else {
                debug!("changelist entry without a name, skipping");
                continue;
            };
            match self.table.get_mut_by_identity(name) {
                Some(object) => object.apply_update(change),
                None => debug!(name, "changelist entry for unknown variable object"),
            }
        }
    }
}

impl Default for VariableCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Synthetic identity for a top-level local; children use GDB's own names.
pub fn local_identity(expression: &str) -> String {
    format!("Local_Var_({expression})")
}
