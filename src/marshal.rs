//! JSON ↔ guest value marshalling.
//!
//! The bridge only exchanges JSON-shaped values plus error messages.
//! Marshalling is depth-capped in both directions: guest object graphs with
//! cycles hit the cap and surface as a conversion error rather than hanging
//! the walk.

use rquickjs::{Coerced, Ctx, Exception, FromJs, IntoJs, Object, Value};

const MAX_JSON_DEPTH: usize = 64;

/// Materialise a host JSON value into the guest context.
pub(crate) fn json_to_js<'js>(
    ctx: &Ctx<'js>,
    value: &serde_json::Value,
) -> rquickjs::Result<Value<'js>> {
    json_to_js_inner(ctx, value, 0)
}

fn json_to_js_inner<'js>(
    ctx: &Ctx<'js>,
    value: &serde_json::Value,
    depth: usize,
) -> rquickjs::Result<Value<'js>> {
    if depth > MAX_JSON_DEPTH {
        return Err(rquickjs::Error::new_into_js_message(
            "json",
            "value",
            "JSON value too deep",
        ));
    }

    match value {
        serde_json::Value::Null => Ok(Value::new_null(ctx.clone())),
        serde_json::Value::Bool(b) => Ok(Value::new_bool(ctx.clone(), *b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64().and_then(|i| i32::try_from(i).ok()) {
                Ok(Value::new_int(ctx.clone(), i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::new_float(ctx.clone(), f))
            } else {
                Ok(Value::new_null(ctx.clone()))
            }
        }
        serde_json::Value::String(s) => s.as_str().into_js(ctx),
        serde_json::Value::Array(items) => {
            let array = rquickjs::Array::new(ctx.clone())?;
            for (index, item) in items.iter().enumerate() {
                array.set(index, json_to_js_inner(ctx, item, depth + 1)?)?;
            }
            Ok(array.into_value())
        }
        serde_json::Value::Object(map) => {
            let object = Object::new(ctx.clone())?;
            for (key, item) in map {
                object.set(key.as_str(), json_to_js_inner(ctx, item, depth + 1)?)?;
            }
            Ok(object.into_value())
        }
    }
}

/// Deep-copy a guest value into a host JSON value.
///
/// Functions, symbols and other non-JSON guest values collapse to null, the
/// way `JSON.stringify` drops them.
pub(crate) fn js_to_json(value: &Value<'_>) -> rquickjs::Result<serde_json::Value> {
    js_to_json_inner(value, 0)
}

fn js_to_json_inner(value: &Value<'_>, depth: usize) -> rquickjs::Result<serde_json::Value> {
    if depth > MAX_JSON_DEPTH {
        return Err(rquickjs::Error::new_into_js_message(
            "value",
            "json",
            "value too deep or contains cycles",
        ));
    }

    if value.is_null() || value.is_undefined() {
        return Ok(serde_json::Value::Null);
    }
    if let Some(b) = value.as_bool() {
        return Ok(serde_json::Value::Bool(b));
    }
    if let Some(i) = value.as_int() {
        return Ok(serde_json::json!(i));
    }
    if let Some(f) = value.as_float() {
        return Ok(serde_json::json!(f));
    }
    if let Some(s) = value.as_string() {
        return Ok(serde_json::Value::String(s.to_string()?));
    }
    if let Some(array) = value.as_array() {
        let mut items = Vec::with_capacity(array.len());
        for index in 0..array.len() {
            let item: Value<'_> = array.get(index)?;
            items.push(js_to_json_inner(&item, depth + 1)?);
        }
        return Ok(serde_json::Value::Array(items));
    }
    if let Some(object) = value.as_object() {
        let mut map = serde_json::Map::new();
        for entry in object.props::<String, Value<'_>>() {
            let (key, item) = entry?;
            map.insert(key, js_to_json_inner(&item, depth + 1)?);
        }
        return Ok(serde_json::Value::Object(map));
    }
    Ok(serde_json::Value::Null)
}

/// Render a caught guest exception as a plain message string.
pub(crate) fn format_exception<'js>(ctx: &Ctx<'js>, caught: Value<'js>) -> String {
    if let Ok(object) = caught.clone().try_into_object() {
        if let Some(exception) = Exception::from_object(object) {
            if let Some(message) = exception.message() {
                return message;
            }
            if let Some(stack) = exception.stack() {
                return stack;
            }
        }
    }

    match Coerced::<String>::from_js(ctx, caught) {
        Ok(value) => value.0,
        Err(err) => format!("(failed to render guest exception: {err})"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rquickjs::{AsyncContext, AsyncRuntime};
    use serde_json::json;

    async fn with_context<R, F>(f: F) -> R
    where
        F: for<'js> FnOnce(Ctx<'js>) -> R + rquickjs::markers::ParallelSend,
        R: rquickjs::markers::ParallelSend,
    {
        let runtime = AsyncRuntime::new().unwrap();
        let context = AsyncContext::full(&runtime).await.unwrap();
        context.with(f).await
    }

    #[tokio::test]
    async fn test_json_round_trip() {
        let original = json!({
            "n": 42,
            "f": 1.5,
            "s": "hello",
            "b": true,
            "missing": null,
            "nested": { "list": [1, "two", [3]] },
        });
        let round_tripped = with_context(move |ctx| {
            let js = json_to_js(&ctx, &original).unwrap();
            let back = js_to_json(&js).unwrap();
            (original, back)
        })
        .await;
        assert_eq!(round_tripped.0, round_tripped.1);
    }

    #[tokio::test]
    async fn test_guest_function_collapses_to_null() {
        let back = with_context(|ctx| {
            let value: Value<'_> = ctx.eval("(() => 1)").unwrap();
            js_to_json(&value).unwrap()
        })
        .await;
        assert_eq!(back, serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_cyclic_guest_value_errors() {
        let result = with_context(|ctx| {
            let value: Value<'_> = ctx.eval("const a = {}; a.self = a; a").unwrap();
            js_to_json(&value).map(|_| ())
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_exception_formatting_uses_message() {
        let message = with_context(|ctx| {
            let err = ctx.eval::<(), _>("throw new Error('boom')").unwrap_err();
            assert!(matches!(err, rquickjs::Error::Exception));
            format_exception(&ctx, ctx.catch())
        })
        .await;
        assert_eq!(message, "boom");
    }
}
