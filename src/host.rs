//! Host data adapter.
//!
//! Converts JSON-shaped host data into runtime values so an embedding
//! application can hand a script its input without writing natives:
//!
//! ```rust,ignore
//! let input = serde_json::json!({"user": {"name": "ada", "age": 36}});
//! let frame = evaluator.gen_bindings();
//! host::bind_json(&frame, input.as_object().unwrap());
//! // (hash-get user :name) => "ada"
//! ```

use std::collections::BTreeMap;

use serde_json::{Map, Value as JsonValue};

use crate::environment::Frame;
use crate::value::Value;

/// Convert a JSON value. Booleans become the atoms `:true`/`:false`, and
/// every number becomes a double.
pub fn from_json(json: &JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Nil,
        JsonValue::Bool(b) => Value::bool(*b),
        JsonValue::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        JsonValue::String(s) => Value::from(s.as_str()),
        JsonValue::Array(items) => Value::from(items.iter().map(from_json).collect::<Vec<_>>()),
        JsonValue::Object(entries) => Value::from(
            entries
                .iter()
                .map(|(key, value)| (key.clone(), from_json(value)))
                .collect::<BTreeMap<_, _>>(),
        ),
    }
}

/// Bind each entry of a JSON object as a local of `frame`, overwriting
/// existing locals of the same name
pub fn bind_json(frame: &Frame, object: &Map<String, JsonValue>) {
    for (key, value) in object {
        frame.bind_local(key.as_str(), from_json(value));
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::evaluator::test_support::*;
    use serde_json::json;

    #[test]
    fn test_from_json_conversions() {
        let test_cases = vec![
            (json!(null), Value::Nil),
            (json!(true), Value::bool(true)),
            (json!(false), Value::bool(false)),
            (json!(42), Value::Number(42.0)),
            (json!(-1.5), Value::Number(-1.5)),
            (json!("text"), Value::from("text")),
            (json!([1, "a", null]), Value::from(vec![Value::Number(1.0), Value::from("a"), Value::Nil])),
            (json!([]), Value::from(Vec::new())),
        ];
        for (input, expected) in test_cases {
            assert_eq!(from_json(&input), expected, "converting {input}");
        }

        let nested = from_json(&json!({"b": {"c": [true]}, "a": 1}));
        assert_eq!(nested.to_string(), "{a=1, b={c=[:true]}}");
    }

    #[test]
    fn test_bound_json_is_visible_to_scripts() {
        let input = json!({
            "user": {"name": "ada", "age": 36, "admin": false},
            "limit": 40
        });

        let test_cases = vec![
            ("(hash-get user :name)", success("ada")),
            ("(less (hash-get user :age) limit)", success(true)),
            ("(if (hash-get user \"admin\") :yes :no)", success(Value::atom("no"))),
            ("(reflect-type user)", success(Value::atom("hash"))),
            ("(hash-get user :missing)", EvalResult(Value::Nil)),
        ];

        for (i, (source, expected)) in test_cases.iter().enumerate() {
            let mut evaluator = standard_evaluator();
            let frame = evaluator.gen_bindings();
            bind_json(&frame, input.as_object().unwrap());
            execute_test_case(&mut evaluator, &frame, source, expected, &format!("Host test #{}", i + 1));
        }
    }

    #[test]
    fn test_bind_json_overwrites_locals() {
        let frame = Frame::root();
        frame.bind_local("limit", Value::Number(1.0));
        bind_json(&frame, json!({"limit": 2}).as_object().unwrap());
        assert_eq!(frame.resolve("limit"), Some(Value::Number(2.0)));
    }
}
