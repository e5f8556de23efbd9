//! Scopes and variables

use serde::{Deserialize, Serialize};

/// Backend handle for a value with children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableRef(pub i64);

impl std::fmt::Display for VariableRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Local,
    Argument,
    Closure,
    Global,
    With,
    Catch,
    Other,
}

impl ScopeKind {
    /// Map a backend scope label ("Locals", "Arguments", "Global", ...) to a kind.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase();
        if label.starts_with("local") {
            ScopeKind::Local
        } else if label.starts_with("arg") {
            ScopeKind::Argument
        } else if label.starts_with("closure") {
            ScopeKind::Closure
        } else if label.starts_with("global") {
            ScopeKind::Global
        } else if label.starts_with("with") {
            ScopeKind::With
        } else if label.starts_with("catch") {
            ScopeKind::Catch
        } else {
            ScopeKind::Other
        }
    }
}

/// Variable grouping owned by one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scope {
    pub index: usize,
    pub frame_index: usize,
    pub kind: ScopeKind,
    pub name: String,
    pub reference: VariableRef,
    #[serde(default)]
    pub expensive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<Variable>>,
}

impl Scope {
    pub fn new(index: usize, frame_index: usize, name: impl Into<String>, reference: i64) -> Self {
        let name = name.into();
        Self {
            index,
            frame_index,
            kind: ScopeKind::from_label(&name),
            name,
            reference: VariableRef(reference),
            expensive: false,
            variables: None,
        }
    }
}

/// A value in the inspector tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "type")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<VariableRef>,
    /// The value has children that have not been fetched yet.
    #[serde(default)]
    pub children: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<Variable>>,
}

impl PartialEq for Variable {
    fn eq(&self, other: &Self) -> bool {
        match (self.reference, other.reference) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.name == other.name,
            _ => false,
        }
    }
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            type_name: None,
            reference: None,
            children: false,
            evaluate_name: None,
            error: None,
            properties: None,
        }
    }

    /// A value whose children can be fetched through `reference`.
    pub fn with_reference(mut self, reference: i64) -> Self {
        if reference > 0 {
            self.reference = Some(VariableRef(reference));
            self.children = true;
        }
        self
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    /// Placeholder for an expression that failed to evaluate.
    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            value: error.clone(),
            error: Some(error),
            ..Self::new(name, "")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_kind_from_label() {
        assert_eq!(ScopeKind::from_label("Locals"), ScopeKind::Local);
        assert_eq!(ScopeKind::from_label("Arguments"), ScopeKind::Argument);
        assert_eq!(ScopeKind::from_label("Closure (outer)"), ScopeKind::Closure);
        assert_eq!(ScopeKind::from_label("Global"), ScopeKind::Global);
        assert_eq!(ScopeKind::from_label("Registers"), ScopeKind::Other);
    }

    #[test]
    fn test_variable_equality_by_ref() {
        let a = Variable::new("a", "{..}").with_reference(5);
        let b = Variable::new("b", "[..]").with_reference(5);
        let plain = Variable::new("a", "1");
        assert_eq!(a, b);
        assert_ne!(a, plain);
        assert_eq!(plain, Variable::new("a", "2"));
    }

    #[test]
    fn test_zero_reference_has_no_children() {
        let v = Variable::new("n", "1").with_reference(0);
        assert!(v.reference.is_none());
        assert!(!v.children);
    }
}
