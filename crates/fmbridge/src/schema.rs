//! Compiles JSON-Schema-like documents into the engine's typed schema graph.
//!
//! The supported subset is what tool declarations and structured-output
//! requests use in practice: the primitive types, arrays, objects, string
//! enums, `anyOf`/`oneOf`, and references of the form `#/definitions/<name>`.
//!
//! Compilation is deterministic. Nodes that need a name and have no title or
//! definition key get a generated one from a per-document counter, so the
//! same document always produces the same graph.
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::errors::SchemaError;
use crate::models::schema::{CompiledSchema, Definition, Property, SchemaNode};

const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// Compile a schema document
pub fn compile(doc: &Value) -> Result<CompiledSchema, SchemaError> {
    Compiler::default().compile_document(doc, None)
}

/// Compile a schema document, naming an anonymous root object after `hint`
pub fn compile_with_hint(doc: &Value, hint: &str) -> Result<CompiledSchema, SchemaError> {
    Compiler::default().compile_document(doc, Some(hint))
}

/// Parse and compile a schema document from its JSON text
pub fn compile_str(raw: &str) -> Result<CompiledSchema, SchemaError> {
    let doc: Value =
        serde_json::from_str(raw).map_err(|e| SchemaError::InvalidDocument(e.to_string()))?;
    compile(&doc)
}

/// Extract `<name>` from `#/definitions/<name>`
fn definition_name(reference: &Value) -> Result<String, SchemaError> {
    let reference = reference
        .as_str()
        .ok_or_else(|| SchemaError::InvalidDocument("$ref must be a string".to_string()))?;
    match reference.strip_prefix(DEFINITIONS_PREFIX) {
        Some(name) if !name.is_empty() && !name.contains('/') => Ok(name.to_string()),
        _ => Err(SchemaError::UnsupportedReference(reference.to_string())),
    }
}

/// The single string value of a one-choice `enum` or a string `const`
fn single_enum_value(branch: &Value) -> Option<String> {
    if let Some(choices) = branch.get("enum").and_then(Value::as_array) {
        if let [Value::String(choice)] = choices.as_slice() {
            return Some(choice.clone());
        }
        return None;
    }
    branch.get("const").and_then(Value::as_str).map(String::from)
}

fn enum_choice(value: &Value) -> String {
    match value {
        Value::String(choice) => choice.clone(),
        other => other.to_string(),
    }
}

/// The declared type, skipping `"null"` in type arrays like `["string", "null"]`
fn declared_type(schema: &Map<String, Value>) -> Option<&str> {
    match schema.get("type")? {
        Value::String(kind) => Some(kind),
        Value::Array(kinds) => kinds
            .iter()
            .filter_map(Value::as_str)
            .find(|kind| *kind != "null"),
        _ => None,
    }
}

#[derive(Default)]
struct Compiler {
    generated: usize,
}

impl Compiler {
    fn fresh_name(&mut self, prefix: &str) -> String {
        self.generated += 1;
        format!("{}{}", prefix, self.generated)
    }

    fn compile_document(
        &mut self,
        doc: &Value,
        hint: Option<&str>,
    ) -> Result<CompiledSchema, SchemaError> {
        let document = doc.as_object().ok_or_else(|| {
            SchemaError::InvalidDocument("schema document must be a JSON object".to_string())
        })?;

        let root_ref = document.get("$ref").map(definition_name).transpose()?;

        let empty = Map::new();
        let definitions = match document.get("definitions") {
            None => &empty,
            Some(Value::Object(definitions)) => definitions,
            Some(_) => {
                return Err(SchemaError::InvalidDocument(
                    "definitions must be an object".to_string(),
                ))
            }
        };

        let mut dependencies = Vec::new();
        for (name, definition) in definitions {
            if root_ref.as_deref() == Some(name.as_str()) {
                continue;
            }
            let schema = self.node(definition, Some(name))?;
            dependencies.push(Definition {
                name: name.clone(),
                schema,
            });
        }

        let root = match &root_ref {
            Some(name) => {
                let target = definitions
                    .get(name)
                    .ok_or_else(|| SchemaError::UnresolvedReference(name.clone()))?;
                self.node(target, Some(name))?
            }
            None => {
                let title = document.get("title").and_then(Value::as_str);
                self.node_body(document, title.or(hint))?
            }
        };

        let compiled = CompiledSchema { root, dependencies };
        check_references(&compiled)?;
        tracing::debug!(
            root = ?compiled.root.name(),
            dependencies = compiled.dependencies.len(),
            "compiled schema"
        );
        Ok(compiled)
    }

    fn node(&mut self, schema: &Value, name: Option<&str>) -> Result<SchemaNode, SchemaError> {
        match schema {
            Value::Object(schema) => {
                if let Some(reference) = schema.get("$ref") {
                    return Ok(SchemaNode::Ref {
                        name: definition_name(reference)?,
                    });
                }
                self.node_body(schema, name)
            }
            // `true` accepts anything; the closest the engine can express is free text
            Value::Bool(true) => Ok(SchemaNode::Str),
            other => Err(SchemaError::InvalidDocument(format!(
                "expected a schema object, found {}",
                other
            ))),
        }
    }

    fn node_body(
        &mut self,
        schema: &Map<String, Value>,
        name: Option<&str>,
    ) -> Result<SchemaNode, SchemaError> {
        let name = schema.get("title").and_then(Value::as_str).or(name);

        if let Some(branches) = schema.get("anyOf").or_else(|| schema.get("oneOf")) {
            let branches = branches.as_array().ok_or_else(|| {
                SchemaError::InvalidDocument("anyOf must be an array".to_string())
            })?;
            return self.any_of(branches, name);
        }

        if let Some(choices) = schema.get("enum") {
            let choices = choices.as_array().ok_or_else(|| {
                SchemaError::InvalidDocument("enum must be an array".to_string())
            })?;
            return Ok(SchemaNode::Enum {
                name: self.name_or_fresh(name, "Enum"),
                choices: choices.iter().map(enum_choice).collect(),
            });
        }

        if let Some(Value::String(value)) = schema.get("const") {
            return Ok(SchemaNode::Enum {
                name: self.name_or_fresh(name, "Enum"),
                choices: vec![value.clone()],
            });
        }

        let kind = declared_type(schema).or_else(|| {
            if schema.contains_key("properties") {
                Some("object")
            } else if schema.contains_key("items") {
                Some("array")
            } else {
                None
            }
        });

        match kind {
            Some("number") => Ok(SchemaNode::Num),
            Some("integer") => Ok(SchemaNode::Int),
            Some("boolean") => Ok(SchemaNode::Bool),
            Some("array") => self.array(schema),
            Some("object") => self.object(schema, name),
            _ => Ok(SchemaNode::Str),
        }
    }

    fn name_or_fresh(&mut self, name: Option<&str>, prefix: &str) -> String {
        match name {
            Some(name) => name.to_string(),
            None => self.fresh_name(prefix),
        }
    }

    fn any_of(
        &mut self,
        branches: &[Value],
        name: Option<&str>,
    ) -> Result<SchemaNode, SchemaError> {
        if branches.is_empty() {
            return Err(SchemaError::InvalidDocument(
                "anyOf must have at least one branch".to_string(),
            ));
        }

        let choices: Vec<String> = branches.iter().filter_map(single_enum_value).collect();
        if choices.len() == branches.len() {
            return Ok(SchemaNode::Enum {
                name: self.name_or_fresh(name, "Enum"),
                choices,
            });
        }

        // Mixed or general branches each compile on their own, so one-value
        // enum branches survive as one-choice Enum nodes inside the union.
        let name = self.name_or_fresh(name, "Union");
        let choices = branches
            .iter()
            .map(|branch| self.node(branch, None))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SchemaNode::Union { name, choices })
    }

    fn array(&mut self, schema: &Map<String, Value>) -> Result<SchemaNode, SchemaError> {
        let item = match schema.get("items") {
            None => SchemaNode::Str,
            // Tuple-style items: the engine only knows homogeneous arrays
            Some(Value::Array(items)) => match items.first() {
                Some(first) => self.node(first, None)?,
                None => SchemaNode::Str,
            },
            Some(items) => self.node(items, None)?,
        };
        Ok(SchemaNode::Arr {
            item: Box::new(item),
            min: schema.get("minItems").and_then(Value::as_u64),
            max: schema.get("maxItems").and_then(Value::as_u64),
        })
    }

    fn object(
        &mut self,
        schema: &Map<String, Value>,
        name: Option<&str>,
    ) -> Result<SchemaNode, SchemaError> {
        let name = self.name_or_fresh(name, "Object");

        let required: HashSet<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|required| required.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut properties = Vec::new();
        if let Some(declared) = schema.get("properties") {
            let declared = declared.as_object().ok_or_else(|| {
                SchemaError::InvalidDocument(format!("properties of {} must be an object", name))
            })?;
            for (property, property_schema) in declared {
                properties.push(Property {
                    name: property.clone(),
                    schema: self.node(property_schema, None)?,
                    description: property_schema
                        .get("description")
                        .and_then(Value::as_str)
                        .map(String::from),
                    optional: !required.contains(property.as_str()),
                });
            }
        }

        Ok(SchemaNode::Obj { name, properties })
    }
}

/// Every `Ref` must name a dependency, or the root itself for recursive schemas
fn check_references(compiled: &CompiledSchema) -> Result<(), SchemaError> {
    let mut known: HashSet<&str> = compiled
        .dependencies
        .iter()
        .map(|definition| definition.name.as_str())
        .collect();
    if let Some(root) = compiled.root.name() {
        known.insert(root);
    }

    let dangling = std::iter::once(&compiled.root)
        .chain(compiled.dependencies.iter().map(|definition| &definition.schema))
        .flat_map(SchemaNode::references)
        .find(|name| !known.contains(name));

    match dangling {
        Some(name) => Err(SchemaError::UnresolvedReference(name.to_string())),
        None => Ok(()),
    }
}
