//! JavaScript execution realms
//!
//! A [`Realm`] pairs a browsing context with one CDP execution context and
//! carries the script operations: evaluate, call function, disown, and the
//! serialization of CDP objects into BiDi remote values.

use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::cdp::types::{
    CallArgument, RemoteObject, RuntimeCallFunctionOn, RuntimeEvaluate, RuntimeEvaluateResult,
    RuntimeReleaseObject, SerializationOptions,
};
use crate::cdp::CdpClient;
use crate::error::{Error, Result};
use crate::protocol::commands::ResultOwnership;
use crate::protocol::values::{deep_to_remote_value, local_value_to_call_argument};
use crate::storage::RealmStorage;

/// Realm flavor, mirroring the BiDi realm type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealmType {
    Window,
    DedicatedWorker,
    SharedWorker,
    ServiceWorker,
    Worker,
    PaintWorklet,
    AudioWorklet,
    Worklet,
}

impl RealmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RealmType::Window => "window",
            RealmType::DedicatedWorker => "dedicated-worker",
            RealmType::SharedWorker => "shared-worker",
            RealmType::ServiceWorker => "service-worker",
            RealmType::Worker => "worker",
            RealmType::PaintWorklet => "paint-worklet",
            RealmType::AudioWorklet => "audio-worklet",
            RealmType::Worklet => "worklet",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "window" => Some(RealmType::Window),
            "dedicated-worker" => Some(RealmType::DedicatedWorker),
            "shared-worker" => Some(RealmType::SharedWorker),
            "service-worker" => Some(RealmType::ServiceWorker),
            "worker" => Some(RealmType::Worker),
            "paint-worklet" => Some(RealmType::PaintWorklet),
            "audio-worklet" => Some(RealmType::AudioWorklet),
            "worklet" => Some(RealmType::Worklet),
            _ => None,
        }
    }
}

/// Generate a fresh server-side realm id
pub fn new_realm_id() -> String {
    format!("{:032x}", rand::random::<u128>())
}

/// One JavaScript execution environment inside a browsing context
pub struct Realm {
    realm_id: String,
    context_id: String,
    execution_context_id: i64,
    origin: String,
    realm_type: RealmType,
    sandbox: Option<String>,
    /// Loader id of the document this realm belongs to; scopes `sharedId`s
    navigable_id: String,
    client: CdpClient,
}

impl std::fmt::Debug for Realm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Realm")
            .field("realm_id", &self.realm_id)
            .field("context_id", &self.context_id)
            .field("execution_context_id", &self.execution_context_id)
            .field("origin", &self.origin)
            .field("realm_type", &self.realm_type)
            .field("sandbox", &self.sandbox)
            .field("navigable_id", &self.navigable_id)
            .finish()
    }
}

impl Realm {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        realm_id: String,
        context_id: String,
        execution_context_id: i64,
        origin: String,
        realm_type: RealmType,
        sandbox: Option<String>,
        navigable_id: String,
        client: CdpClient,
    ) -> Arc<Self> {
        Arc::new(Self {
            realm_id,
            context_id,
            execution_context_id,
            origin,
            realm_type,
            sandbox,
            navigable_id,
            client,
        })
    }

    pub fn realm_id(&self) -> &str {
        &self.realm_id
    }

    pub fn context_id(&self) -> &str {
        &self.context_id
    }

    pub fn execution_context_id(&self) -> i64 {
        self.execution_context_id
    }

    pub fn realm_type(&self) -> RealmType {
        self.realm_type
    }

    pub fn sandbox(&self) -> Option<&str> {
        self.sandbox.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.client.session_id()
    }

    /// The realm description used in `script.getRealms` results
    pub fn realm_info(&self) -> Value {
        let mut info = Map::new();
        info.insert("realm".to_string(), json!(self.realm_id));
        info.insert("origin".to_string(), json!(self.origin));
        info.insert("type".to_string(), json!(self.realm_type.as_str()));
        info.insert("context".to_string(), json!(self.context_id));
        if let Some(sandbox) = &self.sandbox {
            info.insert("sandbox".to_string(), json!(sandbox));
        }
        Value::Object(info)
    }

    /// Evaluate an expression in this realm
    pub async fn script_evaluate(
        &self,
        realms: &RealmStorage,
        expression: &str,
        await_promise: bool,
        ownership: ResultOwnership,
        options: Option<SerializationOptions>,
    ) -> Result<Value> {
        let cdp_result: RuntimeEvaluateResult = self
            .client
            .send_command(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    context_id: Some(self.execution_context_id),
                    await_promise: Some(await_promise),
                    serialization_options: Some(options.unwrap_or_default()),
                },
            )
            .await?;
        self.into_bidi_result(realms, cdp_result, ownership)
    }

    /// Call a function in this realm with an explicit `this` and arguments
    pub async fn call_function(
        &self,
        realms: &RealmStorage,
        function_declaration: &str,
        this: Option<&Value>,
        arguments: &[Value],
        await_promise: bool,
        ownership: ResultOwnership,
        options: Option<SerializationOptions>,
    ) -> Result<Value> {
        let mut call_arguments = Vec::with_capacity(arguments.len() + 1);
        let this = this.cloned().unwrap_or(json!({ "type": "undefined" }));
        call_arguments.push(self.to_call_argument(realms, &this)?);
        for argument in arguments {
            call_arguments.push(self.to_call_argument(realms, argument)?);
        }

        // The wrapper rebinds `this` from the first argument so the user
        // function sees BiDi semantics regardless of CDP's receiver.
        let wrapper = format!(
            "function(...args) {{ return ({}).apply(args[0], args.slice(1)); }}",
            function_declaration
        );

        let cdp_result: RuntimeEvaluateResult = self
            .client
            .send_command(
                "Runtime.callFunctionOn",
                &RuntimeCallFunctionOn {
                    function_declaration: wrapper,
                    object_id: None,
                    execution_context_id: Some(self.execution_context_id),
                    arguments: Some(call_arguments),
                    await_promise: Some(await_promise),
                    return_by_value: None,
                    serialization_options: Some(options.unwrap_or_default()),
                },
            )
            .await?;
        self.into_bidi_result(realms, cdp_result, ownership)
    }

    fn to_call_argument(&self, realms: &RealmStorage, value: &Value) -> Result<CallArgument> {
        if let Some(handle) = value.get("handle").and_then(Value::as_str) {
            if realms.realm_for_handle(handle).is_none() {
                return Err(Error::NoSuchHandle(handle.to_string()));
            }
        }
        local_value_to_call_argument(value)
    }

    /// Release a handle owned by this realm. A no-op for unknown handles and
    /// handles belonging to a different realm.
    pub async fn disown(&self, realms: &RealmStorage, handle: &str) -> Result<()> {
        match realms.realm_for_handle(handle) {
            Some(owner) if owner == self.realm_id => {}
            _ => return Ok(()),
        }
        realms.remove_handle(handle);
        let released = self
            .client
            .send_command::<_, Value>(
                "Runtime.releaseObject",
                &RuntimeReleaseObject {
                    object_id: handle.to_string(),
                },
            )
            .await;
        match released {
            Ok(_) => Ok(()),
            // The browser may have collected the object already.
            Err(e) if e.is_stale_object_id() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Serialize an arbitrary CDP remote object into a BiDi remote value
    pub async fn serialize_cdp_object(&self, remote: &RemoteObject) -> Result<Value> {
        let argument = remote_object_to_argument(remote);
        let cdp_result: RuntimeEvaluateResult = self
            .client
            .send_command(
                "Runtime.callFunctionOn",
                &RuntimeCallFunctionOn {
                    function_declaration: "(value) => value".to_string(),
                    object_id: None,
                    execution_context_id: Some(self.execution_context_id),
                    arguments: Some(vec![argument]),
                    await_promise: Some(false),
                    return_by_value: None,
                    serialization_options: Some(SerializationOptions::deep()),
                },
            )
            .await?;
        let deep = cdp_result
            .result
            .deep_serialized_value
            .ok_or_else(|| Error::unknown("CDP returned no deep serialized value"))?;
        Ok(deep_to_remote_value(deep, &self.navigable_id))
    }

    /// Render a CDP remote object as its JavaScript string form
    pub async fn stringify_object(&self, remote: &RemoteObject) -> Result<String> {
        let argument = remote_object_to_argument(remote);
        let cdp_result: RuntimeEvaluateResult = self
            .client
            .send_command(
                "Runtime.callFunctionOn",
                &RuntimeCallFunctionOn {
                    function_declaration: "(value) => String(value)".to_string(),
                    object_id: None,
                    execution_context_id: Some(self.execution_context_id),
                    arguments: Some(vec![argument]),
                    await_promise: Some(false),
                    return_by_value: Some(true),
                    serialization_options: None,
                },
            )
            .await?;
        Ok(cdp_result
            .result
            .value
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default())
    }

    fn into_bidi_result(
        &self,
        realms: &RealmStorage,
        cdp_result: RuntimeEvaluateResult,
        ownership: ResultOwnership,
    ) -> Result<Value> {
        if let Some(details) = cdp_result.exception_details {
            return Ok(json!({
                "exceptionDetails": self.transform_exception(details),
            }));
        }

        let remote = cdp_result.result;
        let deep = remote
            .deep_serialized_value
            .ok_or_else(|| Error::unknown("CDP returned no deep serialized value"))?;
        let mut value = deep_to_remote_value(deep, &self.navigable_id);

        if let Some(object_id) = remote.object_id {
            match ownership {
                ResultOwnership::Root => {
                    value["handle"] = json!(object_id);
                    realms.register_handle(&object_id, &self.realm_id);
                }
                ResultOwnership::None => {
                    // Fire and forget; a stale object id is not an error.
                    let client = self.client.clone();
                    tokio::spawn(async move {
                        let released = client
                            .send_command::<_, Value>(
                                "Runtime.releaseObject",
                                &RuntimeReleaseObject {
                                    object_id: object_id.clone(),
                                },
                            )
                            .await;
                        if let Err(e) = released {
                            if !e.is_stale_object_id() {
                                tracing::warn!("Failed to release {}: {}", object_id, e);
                            }
                        }
                    });
                }
            }
        }

        Ok(value)
    }

    fn transform_exception(&self, details: Value) -> Value {
        let mut out = Map::new();
        let text = details
            .get("exception")
            .and_then(|e| e.get("description"))
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or_default();
        out.insert("text".to_string(), json!(text));
        out.insert(
            "lineNumber".to_string(),
            details.get("lineNumber").cloned().unwrap_or(json!(0)),
        );
        out.insert(
            "columnNumber".to_string(),
            details.get("columnNumber").cloned().unwrap_or(json!(0)),
        );
        if let Some(deep) = details
            .get("exception")
            .and_then(|e| e.get("deepSerializedValue"))
        {
            out.insert(
                "exception".to_string(),
                deep_to_remote_value(deep.clone(), &self.navigable_id),
            );
        }
        Value::Object(out)
    }
}

fn remote_object_to_argument(remote: &RemoteObject) -> CallArgument {
    if let Some(object_id) = &remote.object_id {
        CallArgument {
            object_id: Some(object_id.clone()),
            ..Default::default()
        }
    } else if let Some(unserializable) = &remote.unserializable_value {
        CallArgument {
            unserializable_value: Some(unserializable.clone()),
            ..Default::default()
        }
    } else {
        CallArgument {
            value: Some(remote.value.clone().unwrap_or(Value::Null)),
            ..Default::default()
        }
    }
}
