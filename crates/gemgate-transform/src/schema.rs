use serde_json::{Map, Value};

/// `format` values the Gemini function-declaration schema accepts on strings.
const ALLOWED_STRING_FORMATS: [&str; 2] = ["enum", "date-time"];

/// Keywords whose value is a map of property name -> schema.
const SCHEMA_MAP_KEYWORDS: [&str; 4] = ["properties", "patternProperties", "$defs", "definitions"];

/// Rewrite a JSON schema into the subset Gemini accepts for tool parameters.
///
/// `additionalProperties` and `$schema` are removed at every depth, and string
/// nodes lose any `format` other than `enum` / `date-time`.
pub fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(sanitize_node(map)),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_schema).collect()),
        other => other,
    }
}

fn sanitize_node(mut node: Map<String, Value>) -> Map<String, Value> {
    node.remove("additionalProperties");
    node.remove("$schema");

    if is_string_node(&node) {
        let keep = node
            .get("format")
            .and_then(Value::as_str)
            .is_some_and(|format| ALLOWED_STRING_FORMATS.contains(&format));
        if !keep {
            node.remove("format");
        }
    }

    node.into_iter()
        .map(|(key, value)| {
            let value = if SCHEMA_MAP_KEYWORDS.contains(&key.as_str()) {
                sanitize_schema_map(value)
            } else {
                sanitize_schema(value)
            };
            (key, value)
        })
        .collect()
}

// Property names are data, not keywords: a property literally called
// `additionalProperties` must survive.
fn sanitize_schema_map(value: Value) -> Value {
    match value {
        Value::Object(props) => Value::Object(
            props
                .into_iter()
                .map(|(name, schema)| (name, sanitize_schema(schema)))
                .collect(),
        ),
        other => other,
    }
}

fn is_string_node(node: &Map<String, Value>) -> bool {
    match node.get("type") {
        Some(Value::String(ty)) => ty == "string",
        Some(Value::Array(types)) => types.iter().any(|ty| ty.as_str() == Some("string")),
        _ => false,
    }
}
