use serde::Serialize;
use std::collections::BTreeMap;

/// Value type of a schema attribute
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "element", rename_all = "snake_case")]
pub enum AttributeType {
    String,
    Bool,
    Int64,
    Set(Box<AttributeType>),
    List(Box<AttributeType>),
    Map(Box<AttributeType>),
    /// Nested attribute block, collected according to `mode`
    Nested {
        mode: NestingMode,
        attributes: BTreeMap<String, Attribute>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    Single,
    List,
    Set,
    Map,
}

/// Plan-time behaviour attached to an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanModifier {
    /// Any change to the attribute destroys and recreates the resource
    RequiresReplace,
    /// An unset computed value keeps whatever the prior state held
    UseStateForUnknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attribute {
    #[serde(rename = "type")]
    pub ty: AttributeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_description: Option<String>,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub plan_modifiers: Vec<PlanModifier>,
}

impl Attribute {
    pub fn new(ty: AttributeType) -> Self {
        Self {
            ty,
            markdown_description: None,
            required: false,
            optional: false,
            computed: false,
            plan_modifiers: Vec::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(AttributeType::String)
    }

    pub fn bool() -> Self {
        Self::new(AttributeType::Bool)
    }

    pub fn int64() -> Self {
        Self::new(AttributeType::Int64)
    }

    pub fn set_of(element: AttributeType) -> Self {
        Self::new(AttributeType::Set(Box::new(element)))
    }

    pub fn nested(mode: NestingMode, attributes: BTreeMap<String, Attribute>) -> Self {
        Self::new(AttributeType::Nested { mode, attributes })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn markdown(mut self, description: impl Into<String>) -> Self {
        self.markdown_description = Some(description.into());
        self
    }

    pub fn plan_modifier(mut self, modifier: PlanModifier) -> Self {
        self.plan_modifiers.push(modifier);
        self
    }

    pub fn has_modifier(&self, modifier: PlanModifier) -> bool {
        self.plan_modifiers.contains(&modifier)
    }

    /// Whether the value comes from configuration rather than the provider
    pub fn is_configurable(&self) -> bool {
        self.required || self.optional
    }
}

/// Schema of a provider, resource or data source
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Schema {
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub markdown_description: Option<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn markdown(mut self, description: impl Into<String>) -> Self {
        self.markdown_description = Some(description.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }
}
