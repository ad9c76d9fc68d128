//! Persistent store transfer.
//!
//! Between executions the store is a plain host mapping; during an execution
//! the guest sees it as a live `globalThis.store` object. Immediately before
//! evaluation the previous execution's return value is installed under the
//! reserved `_prev` key as a non-writable, non-configurable, enumerable
//! property; it is stripped again before the store is re-absorbed into the
//! host.

use rquickjs::{Ctx, Value};
use serde_json::Map;

use crate::marshal::{js_to_json, json_to_js};

/// Reserved read-only slot carrying the previous execution's return value.
pub const PREV_KEY: &str = "_prev";

/// Initialisation script run after the store globals are staged.
const STORE_PRELUDE: &str = r#"
globalThis.store = globalThis.__store_init;
delete globalThis.__store_init;
Object.defineProperty(globalThis.store, "_prev", {
    value: globalThis.__store_prev,
    writable: false,
    configurable: false,
    enumerable: true,
});
delete globalThis.__store_prev;
"#;

/// Install `globalThis.store` with the host mapping and the `_prev` slot.
pub(crate) fn hydrate(
    ctx: &Ctx<'_>,
    store: &Map<String, serde_json::Value>,
    prev: &serde_json::Value,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();
    globals.set(
        "__store_init",
        json_to_js(ctx, &serde_json::Value::Object(store.clone()))?,
    )?;
    globals.set("__store_prev", json_to_js(ctx, prev)?)?;
    ctx.eval::<(), _>(STORE_PRELUDE)
}

/// Read the guest store back into a host mapping, stripping `_prev`.
pub(crate) fn read_back(ctx: &Ctx<'_>) -> rquickjs::Result<Map<String, serde_json::Value>> {
    let store: Value<'_> = ctx.globals().get("store")?;
    let mut map = match js_to_json(&store)? {
        serde_json::Value::Object(map) => map,
        // The guest replaced `store` with a non-object; nothing to persist.
        _ => Map::new(),
    };
    map.remove(PREV_KEY);
    Ok(map)
}
