use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// A node in the engine's typed schema graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SchemaNode {
    Str,
    Num,
    Int,
    Bool,
    Arr {
        item: Box<SchemaNode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        min: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max: Option<u64>,
    },
    Obj {
        name: String,
        properties: Vec<Property>,
    },
    Enum {
        name: String,
        choices: Vec<String>,
    },
    Union {
        name: String,
        choices: Vec<SchemaNode>,
    },
    Ref {
        name: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub schema: SchemaNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub optional: bool,
}

/// A named sub-schema the root refers to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub name: String,
    pub schema: SchemaNode,
}

/// A compiled schema: the root node plus every definition it may reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledSchema {
    pub root: SchemaNode,
    pub dependencies: Vec<Definition>,
}

impl SchemaNode {
    /// The node's name, for the variants that carry one
    pub fn name(&self) -> Option<&str> {
        match self {
            SchemaNode::Obj { name, .. }
            | SchemaNode::Enum { name, .. }
            | SchemaNode::Union { name, .. }
            | SchemaNode::Ref { name } => Some(name),
            _ => None,
        }
    }

    /// Collect the names of every `Ref` reachable from this node
    pub fn references(&self) -> Vec<&str> {
        let mut refs = Vec::new();
        self.collect_references(&mut refs);
        refs
    }

    fn collect_references<'a>(&'a self, refs: &mut Vec<&'a str>) {
        match self {
            SchemaNode::Ref { name } => refs.push(name),
            SchemaNode::Arr { item, .. } => item.collect_references(refs),
            SchemaNode::Obj { properties, .. } => {
                for property in properties {
                    property.schema.collect_references(refs);
                }
            }
            SchemaNode::Union { choices, .. } => {
                for choice in choices {
                    choice.collect_references(refs);
                }
            }
            _ => {}
        }
    }

    /// Render back into a JSON-Schema-shaped document
    pub fn to_json_schema(&self) -> Value {
        match self {
            SchemaNode::Str => json!({"type": "string"}),
            SchemaNode::Num => json!({"type": "number"}),
            SchemaNode::Int => json!({"type": "integer"}),
            SchemaNode::Bool => json!({"type": "boolean"}),
            SchemaNode::Arr { item, min, max } => {
                let mut schema = json!({"type": "array", "items": item.to_json_schema()});
                if let Some(min) = min {
                    schema["minItems"] = json!(min);
                }
                if let Some(max) = max {
                    schema["maxItems"] = json!(max);
                }
                schema
            }
            SchemaNode::Obj { name, properties } => {
                let mut rendered = Map::new();
                let mut required = Vec::new();
                for property in properties {
                    let mut schema = property.schema.to_json_schema();
                    if let Some(description) = &property.description {
                        schema["description"] = json!(description);
                    }
                    if !property.optional {
                        required.push(json!(property.name));
                    }
                    rendered.insert(property.name.clone(), schema);
                }
                json!({
                    "type": "object",
                    "title": name,
                    "properties": rendered,
                    "required": required,
                })
            }
            SchemaNode::Enum { choices, .. } => json!({"type": "string", "enum": choices}),
            SchemaNode::Union { choices, .. } => json!({
                "anyOf": choices.iter().map(SchemaNode::to_json_schema).collect::<Vec<_>>()
            }),
            SchemaNode::Ref { name } => json!({"$ref": format!("#/definitions/{}", name)}),
        }
    }
}

impl CompiledSchema {
    pub fn new(root: SchemaNode) -> Self {
        CompiledSchema {
            root,
            dependencies: Vec::new(),
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&SchemaNode> {
        self.dependencies
            .iter()
            .find(|definition| definition.name == name)
            .map(|definition| &definition.schema)
    }

    /// Render the whole graph, with dependencies under `definitions`
    pub fn to_json_schema(&self) -> Value {
        let mut schema = self.root.to_json_schema();
        if !self.dependencies.is_empty() {
            let definitions: Map<String, Value> = self
                .dependencies
                .iter()
                .map(|definition| (definition.name.clone(), definition.schema.to_json_schema()))
                .collect();
            schema["definitions"] = Value::Object(definitions);
        }
        schema
    }
}
