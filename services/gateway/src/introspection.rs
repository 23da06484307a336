//! Schema introspection answered by the gateway
//!
//! Introspection queries are not forwarded. The engine's SDL is fetched,
//! merged with the built-in scalars, directives and introspection types, and
//! turned into a standard `__schema` result.

use std::collections::HashMap;

use async_graphql_parser::{
    Positioned, parse_schema,
    types::{
        BaseType, ConstDirective, DirectiveDefinition, EnumValueDefinition, FieldDefinition,
        InputValueDefinition, ServiceDocument, Type, TypeDefinition, TypeKind,
        TypeSystemDefinition,
    },
};
use async_graphql_value::ConstValue;
use serde_json::{Value, json};

use crate::error::{GatewayError, GatewayResult};

/// Marker the standard introspection query carries in its operation name
pub const INTROSPECTION_MARKER: &[u8] = b"IntrospectionQuery";

const DEFAULT_DEPRECATION_REASON: &str = "No longer supported";

/// Definitions every schema implicitly contains
const BASE_SCHEMA: &str = r#"
"The `Int` scalar type represents non-fractional signed whole numeric values. Int can represent values between -(2^31) and 2^31 - 1."
scalar Int

"The `Float` scalar type represents signed double-precision fractional values as specified by IEEE 754."
scalar Float

"The `String` scalar type represents textual data, represented as UTF-8 character sequences."
scalar String

"The `Boolean` scalar type represents `true` or `false`."
scalar Boolean

"The `ID` scalar type represents a unique identifier, often used to refetch an object or as key for a cache."
scalar ID

"Directs the executor to include this field or fragment only when the `if` argument is true."
directive @include("Included when true." if: Boolean!) on FIELD | FRAGMENT_SPREAD | INLINE_FRAGMENT

"Directs the executor to skip this field or fragment when the `if` argument is true."
directive @skip("Skipped when true." if: Boolean!) on FIELD | FRAGMENT_SPREAD | INLINE_FRAGMENT

"Marks an element of a GraphQL schema as no longer supported."
directive @deprecated(reason: String = "No longer supported") on FIELD_DEFINITION | ARGUMENT_DEFINITION | INPUT_FIELD_DEFINITION | ENUM_VALUE

"Exposes a URL that specifies the behaviour of this scalar."
directive @specifiedBy(url: String!) on SCALAR

"A GraphQL Schema defines the capabilities of a GraphQL server."
type __Schema {
  description: String
  types: [__Type!]!
  queryType: __Type!
  mutationType: __Type
  subscriptionType: __Type
  directives: [__Directive!]!
}

type __Type {
  kind: __TypeKind!
  name: String
  description: String
  specifiedByURL: String
  fields(includeDeprecated: Boolean = false): [__Field!]
  interfaces: [__Type!]
  possibleTypes: [__Type!]
  enumValues(includeDeprecated: Boolean = false): [__EnumValue!]
  inputFields(includeDeprecated: Boolean = false): [__InputValue!]
  ofType: __Type
}

"An enum describing what kind of type a given `__Type` is."
enum __TypeKind {
  SCALAR
  OBJECT
  INTERFACE
  UNION
  ENUM
  INPUT_OBJECT
  LIST
  NON_NULL
}

type __Field {
  name: String!
  description: String
  args(includeDeprecated: Boolean = false): [__InputValue!]!
  type: __Type!
  isDeprecated: Boolean!
  deprecationReason: String
}

type __InputValue {
  name: String!
  description: String
  type: __Type!
  defaultValue: String
  isDeprecated: Boolean!
  deprecationReason: String
}

type __EnumValue {
  name: String!
  description: String
  isDeprecated: Boolean!
  deprecationReason: String
}

type __Directive {
  name: String!
  description: String
  isRepeatable: Boolean!
  locations: [__DirectiveLocation!]!
  args(includeDeprecated: Boolean = false): [__InputValue!]!
}

"A Directive can be adjacent to many parts of the GraphQL language."
enum __DirectiveLocation {
  QUERY
  MUTATION
  SUBSCRIPTION
  FIELD
  FRAGMENT_DEFINITION
  FRAGMENT_SPREAD
  INLINE_FRAGMENT
  VARIABLE_DEFINITION
  SCHEMA
  SCALAR
  OBJECT
  FIELD_DEFINITION
  ARGUMENT_DEFINITION
  INTERFACE
  UNION
  ENUM
  ENUM_VALUE
  INPUT_OBJECT
  INPUT_FIELD_DEFINITION
}
"#;

/// Whether a request body is an introspection query
#[must_use]
pub fn is_introspection(body: &[u8]) -> bool {
    body.windows(INTROSPECTION_MARKER.len())
        .any(|window| window == INTROSPECTION_MARKER)
}

/// Build the `{"data": {"__schema": ..}}` response for an engine SDL document
pub fn introspection_response(sdl: &str) -> GatewayResult<Value> {
    let document = parse_schema(sdl)
        .map_err(|e| GatewayError::Introspection(format!("invalid engine schema: {e}")))?;
    let base = parse_schema(BASE_SCHEMA)
        .map_err(|e| GatewayError::Introspection(format!("invalid base schema: {e}")))?;

    let schema = MergedSchema::merge(document, base);
    let data = schema.generate()?;
    Ok(json!({ "data": { "__schema": data } }))
}

/// Engine document merged with the base definitions
#[derive(Debug, Default)]
struct MergedSchema {
    types: Vec<TypeDefinition>,
    directives: Vec<DirectiveDefinition>,
    query: Option<String>,
    mutation: Option<String>,
    subscription: Option<String>,
}

impl MergedSchema {
    fn merge(document: ServiceDocument, base: ServiceDocument) -> Self {
        let mut schema = Self::default();
        for definition in document.definitions.into_iter().chain(base.definitions) {
            match definition {
                TypeSystemDefinition::Schema(Positioned { node, .. }) => {
                    if let Some(query) = node.query {
                        schema.query = Some(query.node.to_string());
                    }
                    if let Some(mutation) = node.mutation {
                        schema.mutation = Some(mutation.node.to_string());
                    }
                    if let Some(subscription) = node.subscription {
                        schema.subscription = Some(subscription.node.to_string());
                    }
                }
                TypeSystemDefinition::Type(Positioned { node, .. }) => schema.add_type(node),
                TypeSystemDefinition::Directive(Positioned { node, .. }) => {
                    if !schema
                        .directives
                        .iter()
                        .any(|existing| existing.name.node == node.name.node)
                    {
                        schema.directives.push(node);
                    }
                }
            }
        }

        for (slot, default_name) in [
            (&mut schema.query, "Query"),
            (&mut schema.mutation, "Mutation"),
            (&mut schema.subscription, "Subscription"),
        ] {
            if slot.is_none()
                && schema
                    .types
                    .iter()
                    .any(|definition| definition.name.node.as_str() == default_name)
            {
                *slot = Some(default_name.to_string());
            }
        }
        schema
    }

    fn add_type(&mut self, mut definition: TypeDefinition) {
        let existing = self
            .types
            .iter_mut()
            .find(|existing| existing.name.node == definition.name.node);

        match existing {
            // Extensions add to a type defined earlier.
            Some(existing) if definition.extend => extend_type(existing, definition.kind),
            // The engine's own definition wins over the base one.
            Some(_) => {}
            None => {
                definition.extend = false;
                self.types.push(definition);
            }
        }
    }

    fn generate(&self) -> GatewayResult<Value> {
        let query = self
            .query
            .as_deref()
            .ok_or_else(|| GatewayError::Introspection("schema has no query type".to_string()))?;

        let kinds: HashMap<&str, &'static str> = self
            .types
            .iter()
            .map(|definition| (definition.name.node.as_str(), type_kind(&definition.kind)))
            .collect();
        let generator = Generator {
            schema: self,
            kinds,
        };

        let types = self
            .types
            .iter()
            .map(|definition| generator.full_type(definition))
            .collect::<GatewayResult<Vec<_>>>()?;
        let directives = self
            .directives
            .iter()
            .map(|directive| generator.directive(directive))
            .collect::<GatewayResult<Vec<_>>>()?;

        Ok(json!({
            "queryType": generator.root(Some(query))?,
            "mutationType": generator.root(self.mutation.as_deref())?,
            "subscriptionType": generator.root(self.subscription.as_deref())?,
            "types": types,
            "directives": directives,
        }))
    }
}

fn extend_type(existing: &mut TypeDefinition, extension: TypeKind) {
    match (&mut existing.kind, extension) {
        (TypeKind::Object(target), TypeKind::Object(extra)) => {
            target.implements.extend(extra.implements);
            target.fields.extend(extra.fields);
        }
        (TypeKind::Interface(target), TypeKind::Interface(extra)) => {
            target.implements.extend(extra.implements);
            target.fields.extend(extra.fields);
        }
        (TypeKind::Union(target), TypeKind::Union(extra)) => target.members.extend(extra.members),
        (TypeKind::Enum(target), TypeKind::Enum(extra)) => target.values.extend(extra.values),
        (TypeKind::InputObject(target), TypeKind::InputObject(extra)) => {
            target.fields.extend(extra.fields);
        }
        _ => {}
    }
}

const fn type_kind(kind: &TypeKind) -> &'static str {
    match kind {
        TypeKind::Scalar => "SCALAR",
        TypeKind::Object(_) => "OBJECT",
        TypeKind::Interface(_) => "INTERFACE",
        TypeKind::Union(_) => "UNION",
        TypeKind::Enum(_) => "ENUM",
        TypeKind::InputObject(_) => "INPUT_OBJECT",
    }
}

struct Generator<'a> {
    schema: &'a MergedSchema,
    kinds: HashMap<&'a str, &'static str>,
}

impl Generator<'_> {
    fn named(&self, name: &str) -> GatewayResult<Value> {
        let kind = self
            .kinds
            .get(name)
            .ok_or_else(|| GatewayError::Introspection(format!("unknown type '{name}'")))?;
        Ok(json!({ "kind": kind, "name": name, "ofType": null }))
    }

    fn root(&self, name: Option<&str>) -> GatewayResult<Value> {
        match name {
            Some(name) => {
                self.named(name)?;
                Ok(json!({ "name": name }))
            }
            None => Ok(Value::Null),
        }
    }

    fn type_ref(&self, ty: &Type) -> GatewayResult<Value> {
        let inner = match &ty.base {
            BaseType::Named(name) => self.named(name.as_str())?,
            BaseType::List(item) => {
                json!({ "kind": "LIST", "name": null, "ofType": self.type_ref(item)? })
            }
        };
        if ty.nullable {
            Ok(inner)
        } else {
            Ok(json!({ "kind": "NON_NULL", "name": null, "ofType": inner }))
        }
    }

    fn full_type(&self, definition: &TypeDefinition) -> GatewayResult<Value> {
        let name = definition.name.node.as_str();
        let mut fields = Value::Null;
        let mut input_fields = Value::Null;
        let mut interfaces = Value::Null;
        let mut enum_values = Value::Null;
        let mut possible_types = Value::Null;

        match &definition.kind {
            TypeKind::Scalar => {}
            TypeKind::Object(object) => {
                fields = self.fields(&object.fields)?;
                interfaces = self.named_list(object.implements.iter().map(|i| i.node.as_str()))?;
            }
            TypeKind::Interface(interface) => {
                fields = self.fields(&interface.fields)?;
                interfaces =
                    self.named_list(interface.implements.iter().map(|i| i.node.as_str()))?;
                possible_types = self.named_list(self.implementors(name))?;
            }
            TypeKind::Union(union) => {
                possible_types = self.named_list(union.members.iter().map(|m| m.node.as_str()))?;
            }
            TypeKind::Enum(enumeration) => {
                enum_values = Value::Array(
                    enumeration
                        .values
                        .iter()
                        .map(|value| enum_value(&value.node))
                        .collect(),
                );
            }
            TypeKind::InputObject(input) => {
                input_fields = self.input_values(&input.fields)?;
            }
        }

        Ok(json!({
            "kind": type_kind(&definition.kind),
            "name": name,
            "description": description(definition.description.as_ref()),
            "fields": fields,
            "inputFields": input_fields,
            "interfaces": interfaces,
            "enumValues": enum_values,
            "possibleTypes": possible_types,
        }))
    }

    fn implementors<'b>(&'b self, interface: &'b str) -> impl Iterator<Item = &'b str> + 'b {
        self.schema.types.iter().filter_map(move |definition| match &definition.kind {
            TypeKind::Object(object)
                if object
                    .implements
                    .iter()
                    .any(|implemented| implemented.node.as_str() == interface) =>
            {
                Some(definition.name.node.as_str())
            }
            _ => None,
        })
    }

    fn named_list<'b>(&self, names: impl Iterator<Item = &'b str>) -> GatewayResult<Value> {
        names
            .map(|name| self.named(name))
            .collect::<GatewayResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn fields(&self, fields: &[Positioned<FieldDefinition>]) -> GatewayResult<Value> {
        fields
            .iter()
            .map(|field| &field.node)
            .filter(|field| !field.name.node.as_str().starts_with("__"))
            .map(|field| {
                let (is_deprecated, reason) = deprecation(&field.directives);
                Ok(json!({
                    "name": field.name.node.as_str(),
                    "description": description(field.description.as_ref()),
                    "args": self.input_values(&field.arguments)?,
                    "type": self.type_ref(&field.ty.node)?,
                    "isDeprecated": is_deprecated,
                    "deprecationReason": reason,
                }))
            })
            .collect::<GatewayResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn input_values(&self, values: &[Positioned<InputValueDefinition>]) -> GatewayResult<Value> {
        values
            .iter()
            .map(|value| {
                let value = &value.node;
                Ok(json!({
                    "name": value.name.node.as_str(),
                    "description": description(value.description.as_ref()),
                    "type": self.type_ref(&value.ty.node)?,
                    "defaultValue": value
                        .default_value
                        .as_ref()
                        .map(|default| default.node.to_string()),
                }))
            })
            .collect::<GatewayResult<Vec<_>>>()
            .map(Value::Array)
    }

    fn directive(&self, directive: &DirectiveDefinition) -> GatewayResult<Value> {
        let locations: Vec<String> = directive
            .locations
            .iter()
            .map(|location| screaming_snake_case(&format!("{:?}", location.node)))
            .collect();

        Ok(json!({
            "name": directive.name.node.as_str(),
            "description": description(directive.description.as_ref()),
            "locations": locations,
            "args": self.input_values(&directive.arguments)?,
            "isRepeatable": directive.is_repeatable,
        }))
    }
}

fn enum_value(value: &EnumValueDefinition) -> Value {
    let (is_deprecated, reason) = deprecation(&value.directives);
    json!({
        "name": value.value.node.as_str(),
        "description": description(value.description.as_ref()),
        "isDeprecated": is_deprecated,
        "deprecationReason": reason,
    })
}

fn description(description: Option<&Positioned<String>>) -> Value {
    description.map_or(Value::Null, |text| Value::String(text.node.clone()))
}

fn deprecation(directives: &[Positioned<ConstDirective>]) -> (bool, Value) {
    let Some(deprecated) = directives
        .iter()
        .find(|directive| directive.node.name.node.as_str() == "deprecated")
    else {
        return (false, Value::Null);
    };

    let reason = deprecated
        .node
        .arguments
        .iter()
        .find(|(name, _)| name.node.as_str() == "reason")
        .and_then(|(_, value)| match &value.node {
            ConstValue::String(reason) => Some(reason.clone()),
            _ => None,
        })
        .unwrap_or_else(|| DEFAULT_DEPRECATION_REASON.to_string());
    (true, Value::String(reason))
}

/// `FragmentSpread` -> `FRAGMENT_SPREAD`
fn screaming_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.extend(ch.to_uppercase());
    }
    out
}
