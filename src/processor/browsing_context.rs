//! Browsing context domain: commands and CDP event handling
//!
//! Hosts both halves of the context lifecycle: the `browsingContext.*`
//! commands, and the listeners that mirror the browser's target/frame tree
//! into the storages as CDP events arrive.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;

use crate::cdp::types::{
    PageCaptureScreenshot, PageCaptureScreenshotResult, PageFrameAttachedEvent,
    PageFrameDetachedEvent, PageFrameNavigatedEvent, PageLifecycleEvent, PagePrintToPdf,
    PagePrintToPdfResult, RuntimeConsoleApiCalledEvent, RuntimeExceptionThrownEvent,
    RuntimeExecutionContextCreatedEvent, RuntimeExecutionContextDestroyedEvent,
    RuntimeRunIfWaitingForDebugger, TargetAttachedToTargetEvent, TargetCloseTarget,
    TargetCreateTarget, TargetCreateTargetResult, TargetDetachedFromTargetEvent,
};
use crate::cdp::CdpEvent;
use crate::context::BrowsingContext;
use crate::core::Core;
use crate::error::{Error, Result};
use crate::log;
use crate::protocol::commands::{
    parse_params, CaptureScreenshotParams, CloseParams, CreateParams, CreateType, GetTreeParams,
    NavigateParams, PrintParams, ReloadParams,
};
use crate::realm::{new_realm_id, Realm, RealmType};
use crate::storage::RealmFilter;
use crate::target::CdpTarget;

const CM_PER_INCH: f64 = 2.54;

pub async fn process_command(core: &Arc<Core>, method: &str, params: &Value) -> Result<Value> {
    match method {
        "browsingContext.getTree" => get_tree(core, parse_params(params)?),
        "browsingContext.create" => create(core, parse_params(params)?).await,
        "browsingContext.navigate" => navigate(core, parse_params(params)?).await,
        "browsingContext.reload" => reload(core, parse_params(params)?).await,
        "browsingContext.close" => close(core, parse_params(params)?).await,
        "browsingContext.captureScreenshot" => {
            capture_screenshot(core, parse_params(params)?).await
        }
        "browsingContext.print" => print(core, parse_params(params)?).await,
        _ => Err(Error::UnknownCommand(method.to_string())),
    }
}

// === commands ===

/// Context info payload used in `getTree` results and lifecycle events
pub fn context_info(core: &Core, context: &BrowsingContext, max_depth: u64) -> Value {
    let children = if max_depth == 0 {
        Value::Null
    } else {
        Value::Array(
            core.contexts
                .children_of(context.id())
                .iter()
                .map(|child| context_info(core, child, max_depth - 1))
                .collect(),
        )
    };
    let mut info = Map::new();
    info.insert("context".to_string(), json!(context.id()));
    info.insert("url".to_string(), json!(context.url()));
    info.insert("children".to_string(), children);
    if let Some(parent) = context.parent_id() {
        info.insert("parent".to_string(), json!(parent));
    }
    Value::Object(info)
}

fn get_tree(core: &Arc<Core>, params: GetTreeParams) -> Result<Value> {
    let max_depth = params.max_depth.unwrap_or(u64::MAX);
    let roots = match &params.root {
        Some(root) => vec![core.contexts.get_context(root)?],
        None => core.contexts.top_level_contexts(),
    };
    let contexts: Vec<Value> = roots
        .iter()
        .map(|context| context_info(core, context, max_depth))
        .collect();
    Ok(json!({ "contexts": contexts }))
}

async fn create(core: &Arc<Core>, params: CreateParams) -> Result<Value> {
    if let Some(reference) = &params.reference_context {
        core.contexts.get_context(reference)?;
    }
    let result: TargetCreateTargetResult = core
        .browser_client()
        .send_command(
            "Target.createTarget",
            &TargetCreateTarget {
                url: "about:blank".to_string(),
                new_window: Some(params.r#type == CreateType::Window),
            },
        )
        .await?;

    // The context materializes through Target.attachedToTarget; hand it
    // back only once its target finished setting up.
    let context = core.contexts.await_context(&result.target_id).await?;
    context.await_unblocked().await?;
    Ok(json!({ "context": context.id() }))
}

async fn navigate(core: &Arc<Core>, params: NavigateParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    context.navigate(&params.url, params.wait).await
}

async fn reload(core: &Arc<Core>, params: ReloadParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    context.reload(params.ignore_cache, params.wait).await
}

async fn close(core: &Arc<Core>, params: CloseParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    if !context.is_top_level() {
        return Err(Error::invalid_argument(
            "Only top-level browsing contexts can be closed",
        ));
    }
    core.browser_client()
        .send_command::<_, Value>(
            "Target.closeTarget",
            &TargetCloseTarget {
                target_id: context.id().to_string(),
            },
        )
        .await?;
    // Resolve only once the detach round-trips through the event handler
    // and the context is really gone.
    core.contexts.await_deleted(context.id()).await?;
    Ok(json!({}))
}

async fn capture_screenshot(core: &Arc<Core>, params: CaptureScreenshotParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    context.await_unblocked().await?;
    let result: PageCaptureScreenshotResult = context
        .target()
        .client()
        .send_command(
            "Page.captureScreenshot",
            &PageCaptureScreenshot {
                format: Some("png".to_string()),
                quality: None,
            },
        )
        .await
        .map_err(|e| match context.clarify_gone(e) {
            gone @ Error::NoSuchFrame(_) => gone,
            other => Error::unknown(other.to_string()),
        })?;
    Ok(json!({ "data": result.data }))
}

async fn print(core: &Arc<Core>, params: PrintParams) -> Result<Value> {
    let context = core.contexts.get_context(&params.context)?;
    context.await_unblocked().await?;

    let margin = params.margin.unwrap_or_default();
    let page = params.page.unwrap_or_default();
    let request = PagePrintToPdf {
        landscape: params.orientation.as_deref().map(|o| o == "landscape"),
        print_background: params.background,
        scale: params.scale,
        // BiDi measures in centimeters, CDP in inches.
        paper_width: page.width.map(|w| w / CM_PER_INCH),
        paper_height: page.height.map(|h| h / CM_PER_INCH),
        margin_top: margin.top.map(|m| m / CM_PER_INCH),
        margin_bottom: margin.bottom.map(|m| m / CM_PER_INCH),
        margin_left: margin.left.map(|m| m / CM_PER_INCH),
        margin_right: margin.right.map(|m| m / CM_PER_INCH),
        page_ranges: params.page_ranges.map(|ranges| {
            ranges
                .iter()
                .map(|r| match r {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",")
        }),
        prefer_css_page_size: params.shrink_to_fit.map(|shrink| !shrink),
    };

    let result: PagePrintToPdfResult = context
        .target()
        .client()
        .send_command("Page.printToPDF", &request)
        .await
        .map_err(|e| match context.clarify_gone(e) {
            gone @ Error::NoSuchFrame(_) => gone,
            other => Error::unknown(other.to_string()),
        })?;
    Ok(json!({ "data": result.data }))
}

// === CDP event handling ===

/// Listen for target attach/detach on the browser session. Must run before
/// `Target.setAutoAttach` is issued.
pub fn spawn_browser_event_loop(core: &Arc<Core>) {
    let mut rx = core.connection.add_listener(None, None);
    let core = Arc::clone(core);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event.method.as_str() {
                "Target.attachedToTarget" => match serde_json::from_value(event.params) {
                    Ok(attached) => handle_attached_to_target(&core, attached).await,
                    Err(e) => tracing::warn!("Bad attachedToTarget payload: {}", e),
                },
                "Target.detachedFromTarget" => match serde_json::from_value(event.params) {
                    Ok(detached) => handle_detached_from_target(&core, detached),
                    Err(e) => tracing::warn!("Bad detachedFromTarget payload: {}", e),
                },
                _ => {}
            }
        }
    });
}

/// A target attached: wire up its session, mirror it as a context, and run
/// the setup sequence.
pub async fn handle_attached_to_target(core: &Arc<Core>, event: TargetAttachedToTargetEvent) {
    let target_id = event.target_info.target_id.clone();
    let session_client = core.session_client(&event.session_id);

    // The mediator's own tab never surfaces: release its pause and move on.
    // Targets we cannot mirror (workers, service workers) get the same
    // treatment so they do not hang on the debugger.
    if target_id == core.self_target_id
        || !matches!(event.target_info.r#type.as_str(), "page" | "iframe")
    {
        let released = session_client
            .send_command::<_, Value>(
                "Runtime.runIfWaitingForDebugger",
                &RuntimeRunIfWaitingForDebugger {},
            )
            .await;
        if let Err(e) = released {
            tracing::debug!("Could not release target {}: {}", target_id, e);
        }
        return;
    }

    let target = CdpTarget::new(&target_id, &event.session_id, session_client.clone());
    let events_rx = session_client.subscribe(None);
    spawn_target_event_loop(core, Arc::clone(&target), events_rx);

    match core.contexts.find_context(&target_id) {
        // A frame moving to a new process keeps its context; only the
        // target behind it changes.
        Some(existing) => existing.set_target(Arc::clone(&target)),
        None => {
            let context = BrowsingContext::new(
                target_id.clone(),
                None,
                event.target_info.url.clone(),
                Arc::clone(&target),
            );
            core.contexts.add_context(Arc::clone(&context));
            core.events.register_event(
                "browsingContext.contextCreated",
                Some(&target_id),
                context_info(core, &context, 0),
            );
        }
    }

    let top_level = core
        .contexts
        .top_level_ancestor(&target_id)
        .map(|c| c.id().to_string())
        .unwrap_or_else(|_| target_id.clone());
    if let Err(e) = target.init(&core.preload, &top_level).await {
        tracing::error!("Target {} setup failed: {}", target_id, e);
        delete_context_subtree(core, &target_id);
    }
}

fn handle_detached_from_target(core: &Arc<Core>, event: TargetDetachedFromTargetEvent) {
    let target_id = event
        .target_id
        .clone()
        .or_else(|| find_context_by_session(core, &event.session_id));
    if let Some(target_id) = &target_id {
        core.preload.remove_target(target_id);
        delete_context_subtree(core, target_id);
    }
    core.realms.delete_realms(&RealmFilter {
        session_id: Some(event.session_id.clone()),
        ..Default::default()
    });
    core.connection.remove_session_listeners(&event.session_id);
    tracing::debug!(
        "Session {} detached (target {:?})",
        event.session_id,
        target_id
    );
}

fn find_context_by_session(core: &Core, session_id: &str) -> Option<String> {
    core.contexts
        .top_level_contexts()
        .iter()
        .find(|c| c.target().session_id() == session_id)
        .map(|c| c.id().to_string())
}

/// Remove a context and its descendants, with realm, handle, and buffer
/// cleanup plus `contextDestroyed` events.
pub fn delete_context_subtree(core: &Arc<Core>, id: &str) {
    for context in core.contexts.delete_subtree(id) {
        context.mark_deleted();
        core.realms.delete_realms(&RealmFilter {
            context_id: Some(context.id().to_string()),
            ..Default::default()
        });
        core.events.clear_context(context.id());

        let mut info = Map::new();
        info.insert("context".to_string(), json!(context.id()));
        info.insert("url".to_string(), json!(context.url()));
        info.insert("children".to_string(), Value::Null);
        if let Some(parent) = context.parent_id() {
            info.insert("parent".to_string(), json!(parent));
        }
        core.events.register_event(
            "browsingContext.contextDestroyed",
            Some(context.id()),
            Value::Object(info),
        );
    }
}

fn spawn_target_event_loop(
    core: &Arc<Core>,
    target: Arc<CdpTarget>,
    mut rx: mpsc::UnboundedReceiver<CdpEvent>,
) {
    let core = Arc::clone(core);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handle_target_event(&core, &target, event).await;
        }
        tracing::debug!("Event loop for session {} ended", target.session_id());
    });
}

async fn handle_target_event(core: &Arc<Core>, target: &Arc<CdpTarget>, event: CdpEvent) {
    core.events.register_event(
        "cdp.eventReceived",
        None,
        json!({
            "cdpMethod": event.method.clone(),
            "cdpParams": event.params.clone(),
            "cdpSession": target.session_id(),
        }),
    );

    match event.method.as_str() {
        "Target.attachedToTarget" => {
            // OOPIF targets attach through their parent's session.
            match serde_json::from_value::<TargetAttachedToTargetEvent>(event.params) {
                Ok(attached) => {
                    let core = Arc::clone(core);
                    tokio::spawn(async move {
                        handle_attached_to_target(&core, attached).await;
                    });
                }
                Err(e) => tracing::warn!("Bad attachedToTarget payload: {}", e),
            }
        }
        "Target.detachedFromTarget" => {
            match serde_json::from_value::<TargetDetachedFromTargetEvent>(event.params) {
                Ok(detached) => handle_detached_from_target(core, detached),
                Err(e) => tracing::warn!("Bad detachedFromTarget payload: {}", e),
            }
        }
        "Page.frameAttached" => {
            if let Ok(attached) = serde_json::from_value::<PageFrameAttachedEvent>(event.params) {
                handle_frame_attached(core, target, attached);
            }
        }
        "Page.frameDetached" => {
            if let Ok(detached) = serde_json::from_value::<PageFrameDetachedEvent>(event.params) {
                if detached.reason.as_deref() == Some("swap") {
                    return;
                }
                delete_context_subtree(core, &detached.frame_id);
            }
        }
        "Page.frameNavigated" => {
            if let Ok(navigated) = serde_json::from_value::<PageFrameNavigatedEvent>(event.params)
            {
                if let Some(context) = core.contexts.find_context(&navigated.frame.id) {
                    context.on_frame_navigated(&navigated.frame.url, &navigated.frame.loader_id);
                }
            }
        }
        "Page.lifecycleEvent" => {
            if let Ok(lifecycle) = serde_json::from_value::<PageLifecycleEvent>(event.params) {
                handle_lifecycle_event(core, lifecycle);
            }
        }
        "Page.fileChooserOpened" => {
            tracing::trace!("File chooser opened on session {}", target.session_id());
        }
        "Runtime.executionContextCreated" => {
            if let Ok(created) =
                serde_json::from_value::<RuntimeExecutionContextCreatedEvent>(event.params)
            {
                handle_execution_context_created(core, target, created);
            }
        }
        "Runtime.executionContextDestroyed" => {
            if let Ok(destroyed) =
                serde_json::from_value::<RuntimeExecutionContextDestroyedEvent>(event.params)
            {
                if let Some(realm) = core
                    .realms
                    .find_by_execution_context(target.session_id(), destroyed.execution_context_id)
                {
                    core.realms.delete_realm(realm.realm_id());
                }
            }
        }
        "Runtime.executionContextsCleared" => {
            core.realms.delete_realms(&RealmFilter {
                session_id: Some(target.session_id().to_string()),
                ..Default::default()
            });
        }
        "Runtime.consoleAPICalled" => {
            if let Ok(console) =
                serde_json::from_value::<RuntimeConsoleApiCalledEvent>(event.params)
            {
                if let Some(realm) = core
                    .realms
                    .find_by_execution_context(target.session_id(), console.execution_context_id)
                {
                    let core = Arc::clone(core);
                    tokio::spawn(async move {
                        let entry = log::console_entry(&realm, &console).await;
                        core.events.register_event(
                            "log.entryAdded",
                            Some(realm.context_id()),
                            entry,
                        );
                    });
                }
            }
        }
        "Runtime.exceptionThrown" => {
            if let Ok(thrown) =
                serde_json::from_value::<RuntimeExceptionThrownEvent>(event.params)
            {
                let Some(execution_context_id) = thrown.exception_details.execution_context_id
                else {
                    return;
                };
                if let Some(realm) = core
                    .realms
                    .find_by_execution_context(target.session_id(), execution_context_id)
                {
                    let core = Arc::clone(core);
                    tokio::spawn(async move {
                        let entry = log::exception_entry(&realm, &thrown).await;
                        core.events.register_event(
                            "log.entryAdded",
                            Some(realm.context_id()),
                            entry,
                        );
                    });
                }
            }
        }
        _ => {}
    }
}

fn handle_frame_attached(core: &Arc<Core>, target: &Arc<CdpTarget>, event: PageFrameAttachedEvent) {
    if core.contexts.has_context(&event.frame_id) {
        return;
    }
    let Some(parent) = core.contexts.find_context(&event.parent_frame_id) else {
        tracing::warn!(
            "Frame {} attached under unknown parent {}",
            event.frame_id,
            event.parent_frame_id
        );
        return;
    };
    // Same-process frames live on the session that announced them.
    let context = BrowsingContext::new(
        event.frame_id.clone(),
        Some(parent.id().to_string()),
        "about:blank",
        Arc::clone(target),
    );
    core.contexts.add_context(Arc::clone(&context));
    core.events.register_event(
        "browsingContext.contextCreated",
        Some(context.id()),
        context_info(core, &context, 0),
    );
}

fn handle_lifecycle_event(core: &Arc<Core>, event: PageLifecycleEvent) {
    let Some(context) = core.contexts.find_context(&event.frame_id) else {
        return;
    };
    context.on_lifecycle_event(&event.name, &event.loader_id);

    let bidi_event = match event.name.as_str() {
        "DOMContentLoaded" => "browsingContext.domContentLoaded",
        "load" => "browsingContext.load",
        _ => return,
    };
    core.events.register_event(
        bidi_event,
        Some(context.id()),
        json!({
            "context": context.id(),
            "navigation": event.loader_id,
            "url": context.url(),
            "timestamp": event.timestamp,
        }),
    );
}

fn handle_execution_context_created(
    core: &Arc<Core>,
    target: &Arc<CdpTarget>,
    event: RuntimeExecutionContextCreatedEvent,
) {
    let description = event.context;
    let aux = description.aux_data.unwrap_or_default();
    let Some(frame_id) = aux.frame_id else {
        return;
    };
    let Some(context) = core.contexts.find_context(&frame_id) else {
        return;
    };

    let is_default = aux.is_default.unwrap_or(true);
    let sandbox = if is_default {
        None
    } else {
        Some(description.name.clone())
    };
    let realm_type = match aux.r#type.as_deref() {
        Some("worker") => RealmType::Worker,
        _ => RealmType::Window,
    };
    let navigable_id = context
        .navigable_id()
        .unwrap_or_else(|| context.id().to_string());

    core.realms.add_realm(Realm::new(
        new_realm_id(),
        context.id().to_string(),
        description.id,
        description.origin,
        realm_type,
        sandbox,
        navigable_id,
        target.client().clone(),
    ));
}
