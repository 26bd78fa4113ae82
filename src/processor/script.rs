//! Script domain: evaluation, realms, handles, preload scripts

use std::sync::Arc;

use serde_json::{json, Value};

use crate::cdp::types::{PageCreateIsolatedWorld, PageCreateIsolatedWorldResult};
use crate::context::BrowsingContext;
use crate::core::Core;
use crate::error::{Error, Result};
use crate::protocol::commands::{
    parse_params, AddPreloadScriptParams, CallFunctionParams, DisownParams, EvaluateParams,
    GetRealmsParams, RemovePreloadScriptParams, ScriptTarget,
};
use crate::realm::{new_realm_id, Realm, RealmType};
use crate::storage::preload::BidiPreloadScript;
use crate::storage::{RealmFilter, SandboxFilter};

pub async fn process_command(core: &Arc<Core>, method: &str, params: &Value) -> Result<Value> {
    match method {
        "script.evaluate" => evaluate(core, parse_params(params)?).await,
        "script.callFunction" => call_function(core, parse_params(params)?).await,
        "script.disown" => disown(core, parse_params(params)?).await,
        "script.getRealms" => get_realms(core, parse_params(params)?),
        "script.addPreloadScript" => add_preload_script(core, parse_params(params)?).await,
        "script.removePreloadScript" => {
            let params: RemovePreloadScriptParams = parse_params(params)?;
            core.preload.remove_script(&params.script).await?;
            Ok(json!({}))
        }
        _ => Err(Error::UnknownCommand(method.to_string())),
    }
}

/// Resolve a script target to a realm. Context targets wait for the
/// context to be operational; a missing sandbox realm is created on demand.
async fn realm_for_target(core: &Arc<Core>, target: &ScriptTarget) -> Result<Arc<Realm>> {
    match target {
        ScriptTarget::Realm { realm } => core
            .realms
            .find_realm_by_id(realm)
            .ok_or_else(|| Error::NoSuchRealm(realm.clone())),
        ScriptTarget::Context { context, sandbox } => {
            let ctx = core.contexts.get_context(context)?;
            ctx.await_unblocked().await?;
            let filter = RealmFilter {
                context_id: Some(context.clone()),
                realm_type: Some(RealmType::Window),
                sandbox: match sandbox {
                    None => SandboxFilter::Principal,
                    Some(name) => SandboxFilter::Named(name.clone()),
                },
                ..Default::default()
            };
            match core.realms.get_realm(&filter) {
                Ok(realm) => Ok(realm),
                Err(Error::NoSuchRealm(_)) => match sandbox {
                    Some(name) => create_sandbox_realm(core, &ctx, name).await,
                    // The principal realm announcement may still be in
                    // flight right after setup; wait for it.
                    None => core.realms.await_realm(&filter).await,
                },
                Err(e) => Err(e),
            }
        }
    }
}

async fn create_sandbox_realm(
    core: &Arc<Core>,
    context: &Arc<BrowsingContext>,
    sandbox: &str,
) -> Result<Arc<Realm>> {
    let target = context.target();
    let result: PageCreateIsolatedWorldResult = target
        .client()
        .send_command(
            "Page.createIsolatedWorld",
            &PageCreateIsolatedWorld {
                frame_id: context.id().to_string(),
                world_name: Some(sandbox.to_string()),
                grant_universal_access: Some(false),
            },
        )
        .await?;
    let navigable_id = context
        .navigable_id()
        .unwrap_or_else(|| context.id().to_string());
    // The storage dedupes against the realm the executionContextCreated
    // event may have inserted concurrently.
    Ok(core.realms.add_realm(Realm::new(
        new_realm_id(),
        context.id().to_string(),
        result.execution_context_id,
        String::new(),
        RealmType::Window,
        Some(sandbox.to_string()),
        navigable_id,
        target.client().clone(),
    )))
}

async fn evaluate(core: &Arc<Core>, params: EvaluateParams) -> Result<Value> {
    let realm = realm_for_target(core, &params.target).await?;
    realm
        .script_evaluate(
            &core.realms,
            &params.expression,
            params.await_promise,
            params.result_ownership,
            params.serialization_options,
        )
        .await
}

async fn call_function(core: &Arc<Core>, params: CallFunctionParams) -> Result<Value> {
    let realm = realm_for_target(core, &params.target).await?;
    realm
        .call_function(
            &core.realms,
            &params.function_declaration,
            params.this.as_ref(),
            params.arguments.as_deref().unwrap_or(&[]),
            params.await_promise,
            params.result_ownership,
            params.serialization_options,
        )
        .await
}

async fn disown(core: &Arc<Core>, params: DisownParams) -> Result<Value> {
    let realm = realm_for_target(core, &params.target).await?;
    for handle in &params.handles {
        realm.disown(&core.realms, handle).await?;
    }
    Ok(json!({}))
}

fn get_realms(core: &Arc<Core>, params: GetRealmsParams) -> Result<Value> {
    if let Some(context) = &params.context {
        core.contexts.get_context(context)?;
    }
    let realm_type = match &params.r#type {
        None => None,
        Some(name) => Some(
            RealmType::parse(name)
                .ok_or_else(|| Error::invalid_argument(format!("Unknown realm type {}", name)))?,
        ),
    };
    let realms = core.realms.find_realms(&RealmFilter {
        context_id: params.context.clone(),
        realm_type,
        ..Default::default()
    });
    let infos: Vec<Value> = realms.iter().map(|realm| realm.realm_info()).collect();
    Ok(json!({ "realms": infos }))
}

async fn add_preload_script(core: &Arc<Core>, params: AddPreloadScriptParams) -> Result<Value> {
    if params.arguments.as_ref().is_some_and(|args| !args.is_empty()) {
        return Err(Error::UnsupportedOperation(
            "Preload script arguments are not supported".to_string(),
        ));
    }
    if let Some(context) = &params.context {
        let ctx = core.contexts.get_context(context)?;
        if !ctx.is_top_level() {
            return Err(Error::invalid_argument(
                "Preload scripts can only target top-level browsing contexts",
            ));
        }
    }

    let script = BidiPreloadScript::new(
        params.context,
        params.function_declaration,
        params.sandbox,
    );
    core.preload.add_script(Arc::clone(&script));

    for context in core.contexts.top_level_contexts() {
        if script.applies_to(context.id()) {
            script.install_on(&context.target()).await?;
        }
    }

    Ok(json!({ "script": script.id() }))
}
