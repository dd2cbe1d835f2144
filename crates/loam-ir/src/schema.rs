//! Declarative opcode metadata.
//!
//! Each registered opcode carries an [`OpcodeSpec`] describing its label,
//! parameters, and return kind. The interpreter ignores this entirely; it
//! exists for external tooling (script editors, docs), which consume the
//! schema as TOML or JSON.

use serde::{Deserialize, Serialize};

/// Runtime value kinds, as seen by tooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ValueKind {
    String,
    Number,
    Bool,
    Object,
    Array,
    Null,
    Any,
}

/// A single opcode parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ValueKind,
    #[serde(default)]
    pub optional: bool,
}

impl ParamSpec {
    pub fn new(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: false,
        }
    }

    pub fn optional(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            optional: true,
        }
    }
}

/// Metadata for one registered opcode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcodeSpec {
    /// Full opcode name (e.g. `"if"`, `"fs.read"`).
    pub name: String,
    /// Short label for editors.
    pub label: String,
    /// Library category (e.g. `"core"`, `"entity"`, `"fs"`).
    pub category: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    pub returns: ValueKind,
    /// Lazy opcodes defer evaluation of some arguments (`if`, `and`, `try`).
    #[serde(default)]
    pub lazy: bool,
    /// Variadic opcodes accept any number of trailing arguments.
    #[serde(default)]
    pub variadic: bool,
}

impl OpcodeSpec {
    pub fn new(name: &str, label: &str, category: &str, returns: ValueKind) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            category: category.to_string(),
            params: Vec::new(),
            returns,
            lazy: false,
            variadic: false,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamSpec>) -> Self {
        self.params = params;
        self
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = true;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// The library prefix (text before the first dot), or the whole name.
    pub fn library(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }
}

/// A snapshot of every registered opcode, exportable for tooling.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpcodeSchema {
    pub opcode: Vec<OpcodeSpec>,
}

impl OpcodeSchema {
    pub fn find(&self, name: &str) -> Option<&OpcodeSpec> {
        self.opcode.iter().find(|op| op.name == name)
    }

    /// Groups specs by library prefix.
    pub fn by_library(&self) -> std::collections::HashMap<String, Vec<&OpcodeSpec>> {
        let mut map = std::collections::HashMap::new();
        for spec in &self.opcode {
            map.entry(spec.library().to_string())
                .or_insert_with(Vec::new)
                .push(spec);
        }
        map
    }

    /// Renders the schema as TOML for editor consumption.
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}
