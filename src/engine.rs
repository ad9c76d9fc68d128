//! Execution engine.
//!
//! One [`run_execution`] call is one execution: it provisions a fresh guest
//! context, installs the host functions and the store, evaluates the user
//! program as an async IIFE, then enters the polling loop: drain the guest
//! microtask queue, check the main promise, spawn newly requested tool
//! tasks, and wait up to one poll interval for the next tool resolution.
//!
//! Settlement of the main promise is the execution barrier: the interrupt
//! hook aborts any further guest work and queued tool resolutions are
//! dropped before they touch the VM. Loser handlers of a `Promise.race` are
//! not cancelled host-side; they finish in the background and their results
//! are discarded.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use rquickjs::function::{Func, Opt};
use rquickjs::{AsyncContext, AsyncRuntime, Coerced, Ctx, FromJs, Function, IntoJs, Value};
use serde_json::json;
use tokio::sync::{mpsc, OnceCell};
use tokio::time::timeout;

use crate::blobs::{extract_blobs, BlobTable};
use crate::bridge::{
    run_tool_call, PendingCall, ToolCompletion, BRIDGE_PRELUDE, TOOL_ENQUEUE_FN, TOOL_SETTLE_FN,
};
use crate::marshal::{format_exception, js_to_json, json_to_js};
use crate::sandbox::SandboxState;
use crate::store;
use crate::types::ExecuteResult;

/// Native function the main promise settles through.
const MAIN_SETTLE_FN: &str = "__host_main_settled";

/// QuickJS's stock stack ceiling, restored when an execution sets no
/// explicit `max_stack_bytes`.
const DEFAULT_MAX_STACK_BYTES: usize = 256 * 1024;

/// Process-wide engine capability, created lazily on the first execution and
/// shared by every sandbox. Each execution provisions its own context on it.
static SANDBOX_RUNTIME: OnceCell<Arc<AsyncRuntime>> = OnceCell::const_new();

/// One execution drives the shared runtime at a time: the interrupt handler
/// and resource limits installed for an execution must stay in place until
/// its VM work is done.
static RUNTIME_GATE: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

async fn shared_runtime() -> Result<Arc<AsyncRuntime>> {
    SANDBOX_RUNTIME
        .get_or_try_init(|| async {
            let runtime = AsyncRuntime::new().map_err(map_js_error)?;
            Ok(Arc::new(runtime))
        })
        .await
        .map(Arc::clone)
}

/// Outcome of the main guest promise.
enum MainOutcome {
    Fulfilled(serde_json::Value),
    Rejected(String),
}

/// State shared between the driver, the guest natives, and the interrupt
/// hook for the duration of one execution.
struct ExecShared {
    /// Guest `tool()` invocations awaiting a host task.
    calls: Arc<Mutex<VecDeque<PendingCall>>>,
    call_seq: Arc<AtomicU64>,
    main: Arc<Mutex<Option<MainOutcome>>>,
    /// Set the moment the main promise settles; the interrupt hook and the
    /// resolution queue both consult it.
    main_done: Arc<AtomicBool>,
    /// Set once the VM is torn down; any resolution after this is a no-op.
    disposed: Arc<AtomicBool>,
    budget_tripped: Arc<AtomicBool>,
}

impl ExecShared {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(VecDeque::new())),
            call_seq: Arc::new(AtomicU64::new(0)),
            main: Arc::new(Mutex::new(None)),
            main_done: Arc::new(AtomicBool::new(false)),
            disposed: Arc::new(AtomicBool::new(false)),
            budget_tripped: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Run one execution. Never fails from the caller's perspective: every
/// fault is reported inside the [`ExecuteResult`].
pub(crate) async fn run_execution(state: &SandboxState, code: &str) -> ExecuteResult {
    match execute_inner(state, code).await {
        Ok(result) => result,
        Err(err) => ExecuteResult::failure(err.to_string(), state.blobs.lock().snapshot()),
    }
}

async fn execute_inner(state: &SandboxState, code: &str) -> Result<ExecuteResult> {
    let shared = ExecShared::new();
    state.blobs.lock().clear();

    let runtime = shared_runtime().await?;
    let _gate = RUNTIME_GATE.lock().await;

    // Limits are runtime-wide on the shared capability, so every execution
    // (re)applies its own; an absent memory limit is effectively unbounded.
    runtime
        .set_memory_limit(state.config.memory_limit_bytes.unwrap_or(usize::MAX))
        .await;
    runtime
        .set_max_stack_size(
            state
                .config
                .max_stack_bytes
                .unwrap_or(DEFAULT_MAX_STACK_BYTES),
        )
        .await;
    install_interrupt_handler(&runtime, &shared, state.config.instruction_budget).await;

    let context = AsyncContext::full(&runtime).await.map_err(map_js_error)?;

    let result = drive(state, &shared, &runtime, &context, code).await;

    // Teardown. Resolutions dequeued after this point must be no-ops, and
    // late faults are logged rather than surfaced. Jobs this execution left
    // behind are flushed before the next execution reuses the runtime.
    shared.disposed.store(true, Ordering::SeqCst);
    shared.main_done.store(true, Ordering::SeqCst);
    let _ = drain_jobs(&runtime, &shared).await;
    drop(context);

    result
}

async fn drive(
    state: &SandboxState,
    shared: &ExecShared,
    runtime: &AsyncRuntime,
    context: &AsyncContext,
    code: &str,
) -> Result<ExecuteResult> {
    let store_snapshot = state.store.lock().clone();
    let prev_snapshot = state.prev_result.lock().clone();

    {
        let calls = shared.calls.clone();
        let call_seq = shared.call_seq.clone();
        let main = shared.main.clone();
        let main_done = shared.main_done.clone();
        context
            .with(move |ctx| -> rquickjs::Result<()> {
                install_host_functions(&ctx, calls, call_seq, main, main_done)?;
                store::hydrate(&ctx, &store_snapshot, &prev_snapshot)?;
                Ok(())
            })
            .await
            .map_err(map_js_error)?;
    }

    // Evaluate the user program. The async wrapper converts an immediate
    // throw into a rejection of the main promise; an eval error here is a
    // parse failure.
    let wrapped = wrap_user_code(code);
    let compile_error: Option<String> = context
        .with(move |ctx| match ctx.eval::<(), _>(wrapped.as_str()) {
            Ok(()) => None,
            Err(rquickjs::Error::Exception) => Some(format_exception(&ctx, ctx.catch())),
            Err(err) => Some(err.to_string()),
        })
        .await;
    if let Some(message) = compile_error {
        let message = if shared.budget_tripped.load(Ordering::SeqCst) {
            "Execution budget exceeded".to_string()
        } else {
            augment_error_message(&message)
        };
        return Ok(ExecuteResult::failure(message, state.blobs.lock().snapshot()));
    }

    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel::<ToolCompletion>();

    let mut iterations = 0usize;
    let main_outcome: Option<MainOutcome> = loop {
        if let Err(message) = drain_jobs(runtime, shared).await {
            return Ok(ExecuteResult::failure(
                augment_error_message(&message),
                state.blobs.lock().snapshot(),
            ));
        }
        if let Some(outcome) = shared.main.lock().take() {
            break Some(outcome);
        }
        spawn_pending_calls(state, shared, &completion_tx);

        if iterations >= state.config.max_poll_iterations {
            break None;
        }
        iterations += 1;

        let wait = Duration::from_millis(state.config.poll_interval_ms);
        match timeout(wait, completion_rx.recv()).await {
            Ok(Some(completion)) => {
                deliver_completion(context, shared, &state.blobs, completion).await?;
            }
            // The engine keeps a sender alive, so the channel cannot close;
            // a timeout is just the next poll tick.
            Ok(None) | Err(_) => {}
        }
    };

    // Execution barrier: from here on the interrupt hook stops guest work.
    shared.main_done.store(true, Ordering::SeqCst);

    let Some(outcome) = main_outcome else {
        let message = if shared.budget_tripped.load(Ordering::SeqCst) {
            "Execution budget exceeded"
        } else {
            "Execution timed out"
        };
        return Ok(ExecuteResult::failure(
            message,
            state.blobs.lock().snapshot(),
        ));
    };

    read_back_store(state, context).await;

    let blobs = state.blobs.lock().snapshot();
    Ok(match outcome {
        MainOutcome::Fulfilled(value) => {
            *state.prev_result.lock() = value.clone();
            let serialized_chars = serde_json::to_string(&value)
                .map(|text| text.chars().count())
                .unwrap_or(0);
            let cap = state.config.max_result_chars;
            let error = (serialized_chars > cap)
                .then(|| format!("Result truncated ({serialized_chars} > {cap} chars)"));
            ExecuteResult {
                success: true,
                result: Some(value),
                error,
                blobs,
            }
        }
        MainOutcome::Rejected(message) => {
            // An interrupt raised by the instruction budget can surface as a
            // rejection of the main promise; normalise its message.
            let message = if shared.budget_tripped.load(Ordering::SeqCst) {
                "Execution budget exceeded".to_string()
            } else {
                augment_error_message(&message)
            };
            ExecuteResult::failure(message, blobs)
        }
    })
}

/// Read the guest store back into the host, stripping `_prev`. Faults here
/// are host-internal: logged, never surfaced into the result.
async fn read_back_store(state: &SandboxState, context: &AsyncContext) {
    let read = context.with(|ctx| store::read_back(&ctx)).await;
    match read {
        Ok(map) => *state.store.lock() = map,
        Err(err) => tracing::warn!("failed to read back sandbox store: {err}"),
    }
}

/// Drain the guest microtask queue until fixpoint.
///
/// After the main promise settles, interrupted or failing jobs are expected
/// (abandoned race losers) and are flushed quietly.
async fn drain_jobs(runtime: &AsyncRuntime, shared: &ExecShared) -> Result<(), String> {
    loop {
        match runtime.execute_pending_job().await {
            Ok(true) => continue,
            Ok(false) => return Ok(()),
            Err(err) => {
                if shared.main_done.load(Ordering::SeqCst) {
                    tracing::debug!("guest job dropped after main settled: {err}");
                    continue;
                }
                if shared.budget_tripped.load(Ordering::SeqCst) {
                    return Err("Execution budget exceeded".to_string());
                }
                return Err(format!("{err}"));
            }
        }
    }
}

/// Spawn a host task for every tool call the guest has enqueued.
///
/// Tool lookup happens here, at bridge-call time, against the current
/// registry snapshot.
fn spawn_pending_calls(
    state: &SandboxState,
    shared: &ExecShared,
    completion_tx: &mpsc::UnboundedSender<ToolCompletion>,
) {
    let mut queue = shared.calls.lock();
    while let Some(call) = queue.pop_front() {
        let tool = state.registry.read().find(&call.name).cloned();
        let callbacks = state.callbacks.clone();
        let tx = completion_tx.clone();
        tracing::debug!(call_id = %call.call_id, tool = %call.name, "spawning tool task");
        tokio::spawn(async move {
            let outcome = run_tool_call(tool, call.name, call.args, &callbacks).await;
            // The engine may already have moved on; a closed channel just
            // means this resolution is discarded.
            let _ = tx.send(ToolCompletion {
                call_id: call.call_id,
                outcome,
            });
        });
    }
}

/// Deliver one dequeued tool resolution into the guest.
///
/// Resolutions are serialised by the caller (one channel, one consumer);
/// each checks the execution barrier first and silently drops when the main
/// program has settled or the VM is gone. Success values pass through the
/// blob extractor before materialisation, falling back to their raw JSON
/// text if materialisation fails.
async fn deliver_completion(
    context: &AsyncContext,
    shared: &ExecShared,
    blobs: &Arc<Mutex<BlobTable>>,
    completion: ToolCompletion,
) -> Result<()> {
    if shared.main_done.load(Ordering::SeqCst) || shared.disposed.load(Ordering::SeqCst) {
        tracing::debug!(call_id = %completion.call_id, "dropping tool resolution after execution settled");
        return Ok(());
    }

    let outcome = match completion.outcome {
        Ok(value) => Ok(extract_blobs(&value, &mut blobs.lock())),
        Err(message) => Err(message),
    };
    let call_id = completion.call_id;

    context
        .with(move |ctx| -> rquickjs::Result<()> {
            let settle: Function<'_> = ctx.globals().get(TOOL_SETTLE_FN)?;
            match &outcome {
                Ok(value) => {
                    let materialised = match json_to_js(&ctx, value) {
                        Ok(js) => js,
                        Err(_) => value.to_string().into_js(&ctx)?,
                    };
                    settle.call::<_, ()>((call_id.as_str(), true, materialised))
                }
                Err(message) => settle.call::<_, ()>((call_id.as_str(), false, message.as_str())),
            }
        })
        .await
        .map_err(|err| anyhow!("tool resolution failed: {err}"))
}

fn install_host_functions<'js>(
    ctx: &Ctx<'js>,
    calls: Arc<Mutex<VecDeque<PendingCall>>>,
    call_seq: Arc<AtomicU64>,
    main: Arc<Mutex<Option<MainOutcome>>>,
    main_done: Arc<AtomicBool>,
) -> rquickjs::Result<()> {
    let globals = ctx.globals();

    globals.set(
        TOOL_ENQUEUE_FN,
        Func::from(
            move |name: String, args: Opt<Value<'_>>| -> rquickjs::Result<String> {
                let payload = match args.0 {
                    None => json!({}),
                    Some(value) if value.is_undefined() || value.is_null() => json!({}),
                    Some(value) => js_to_json(&value)?,
                };
                let call_id = format!("call-{}", call_seq.fetch_add(1, Ordering::Relaxed) + 1);
                calls.lock().push_back(PendingCall {
                    call_id: call_id.clone(),
                    name,
                    args: payload,
                });
                Ok(call_id)
            },
        ),
    )?;

    globals.set(
        MAIN_SETTLE_FN,
        Func::from(
            move |ctx: Ctx<'js>, ok: bool, value: Value<'js>| -> rquickjs::Result<()> {
                let outcome = if ok {
                    match js_to_json(&value) {
                        Ok(json) => MainOutcome::Fulfilled(json),
                        Err(err) => {
                            MainOutcome::Rejected(format!("Failed to serialize result: {err}"))
                        }
                    }
                } else {
                    let message = Coerced::<String>::from_js(&ctx, value)
                        .map(|coerced| coerced.0)
                        .unwrap_or_else(|_| "unknown error".to_string());
                    MainOutcome::Rejected(message)
                };
                *main.lock() = Some(outcome);
                main_done.store(true, Ordering::SeqCst);
                Ok(())
            },
        ),
    )?;

    globals.set(
        "atob",
        Func::from(|data: String| -> rquickjs::Result<String> {
            let bytes = STANDARD.decode(data.trim()).map_err(|_| {
                rquickjs::Error::new_into_js_message("string", "bytes", "invalid base64 input")
            })?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }),
    )?;

    globals.set(
        "btoa",
        Func::from(|text: String| -> rquickjs::Result<String> {
            Ok(STANDARD.encode(text.as_bytes()))
        }),
    )?;

    ctx.eval::<(), _>(BRIDGE_PRELUDE)
}

async fn install_interrupt_handler(
    runtime: &AsyncRuntime,
    shared: &ExecShared,
    instruction_budget: Option<u64>,
) {
    let main_done = shared.main_done.clone();
    let budget_tripped = shared.budget_tripped.clone();
    let ticks = AtomicU64::new(0);
    runtime
        .set_interrupt_handler(Some(Box::new(move || {
            if main_done.load(Ordering::SeqCst) {
                return true;
            }
            if let Some(limit) = instruction_budget {
                if ticks.fetch_add(1, Ordering::Relaxed) + 1 > limit {
                    budget_tripped.store(true, Ordering::SeqCst);
                    return true;
                }
            }
            false
        })))
        .await;
}

fn wrap_user_code(code: &str) -> String {
    format!(
        "(async () => {{\n{code}\n}})().then(\n\
         (value) => {{ {MAIN_SETTLE_FN}(true, value); }},\n\
         (error) => {{ {MAIN_SETTLE_FN}(false, (error && error.message !== undefined) ? String(error.message) : String(error)); }}\n\
         );"
    )
}

/// Augment common "not defined" messages with a pointer at the sleep tool.
fn augment_error_message(message: &str) -> String {
    if message.contains("not defined")
        && (message.contains("setTimeout") || message.contains("setInterval"))
    {
        format!(
            "{message}. Timers are not available in the sandbox; use tool('sleep', {{ms}}) to wait."
        )
    } else {
        message.to_string()
    }
}

fn map_js_error(err: rquickjs::Error) -> anyhow::Error {
    anyhow!("QuickJS: {err}")
}
