//! Provider abstraction (spec §4.5): every façade operation is routed
//! through this trait so the façade never depends on an engine-specific
//! resource shape. Grounded on the teacher's `PluginServiceClient` —
//! a trait + one production struct holding a connection handle — and, for
//! the Kubernetes mechanics themselves, on `KubeHostClusterApi`
//! (`hexabase_orchestrator::host`): the same
//! `Arc<Mutex<Option<kube::Client>>>` + dynamic-API idiom, since Fission
//! and Knative are both just CRDs on the vCluster's API server.

use crate::error::ProviderError;
use crate::model::{
    Application, BuildStatus, Capabilities, ColdStartClass, Function, FunctionTrigger, FunctionVersion, Instance, InstancePhase, InvocationResult,
    ProviderKind, TriggerKind,
};
use async_trait::async_trait;
use chrono::Utc;
use hexabase_common::ids::InvocationId;
use kube::api::{Api, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Client, Config};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub const FIELD_MANAGER: &str = "hexabase-functions";

/// Dedicated-plan scheduling hint the façade computes once (spec §4.5
/// "automatically injects the nodeSelector/toleration pair established by
/// the orchestrator; application authors never see it"). Keys match the
/// literal label/taint the orchestrator applies to dedicated nodes
/// (`hexabase_orchestrator::host::taint_and_label_node`); duplicated here
/// as plain strings rather than a cross-crate dependency because this is
/// the one point of contact between C8 and C6, and it is a label
/// convention, not a shared type.
#[derive(Debug, Clone, Default)]
pub struct SchedulingOverlay {
    pub node_selector: Option<(String, String)>,
    pub toleration_value: Option<String>,
}

impl SchedulingOverlay {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn dedicated(node_pool_label: String, taint_value: String) -> Self {
        Self {
            node_selector: Some(("hexabase.ai/node-pool".to_string(), node_pool_label)),
            toleration_value: Some(taint_value),
        }
    }

    fn apply_to_pod_spec(&self, spec: &mut Value) {
        if let Some((key, value)) = &self.node_selector {
            spec["nodeSelector"] = json!({ key: value });
        }
        if let Some(value) = &self.toleration_value {
            spec["tolerations"] = json!([{
                "key": "dedicated",
                "operator": "Equal",
                "value": value,
                "effect": "NoSchedule",
            }]);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FunctionMetrics {
    pub invocations_total: i64,
    pub errors_total: i64,
    pub avg_duration_ms: f64,
    pub p95_duration_ms: f64,
}

/// A closed set of engine operations (spec §9 "Provider abstraction"),
/// each synchronous from the façade's point of view even though the
/// engine itself may build/schedule asynchronously underneath.
#[async_trait]
pub trait Provider: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    /// Builds (if `Source`) or registers (if `Image`) the version inside
    /// the engine. Does not affect serving traffic — see
    /// [`Provider::set_active_version`].
    async fn deploy_version(
        &self,
        function: &Function,
        version: &FunctionVersion,
        scheduling: &SchedulingOverlay,
    ) -> Result<(), ProviderError>;

    /// The only call that changes what traffic is served (spec §4.5).
    async fn set_active_version(
        &self,
        function: &Function,
        version: &FunctionVersion,
        scheduling: &SchedulingOverlay,
    ) -> Result<(), ProviderError>;

    async fn delete_function(&self, function: &Function) -> Result<(), ProviderError>;

    async fn invoke(&self, function: &Function, payload: &[u8], is_async: bool) -> Result<InvocationResult, ProviderError>;

    async fn create_trigger(&self, function: &Function, trigger: &FunctionTrigger) -> Result<(), ProviderError>;
    async fn delete_trigger(&self, function: &Function, trigger: &FunctionTrigger) -> Result<(), ProviderError>;

    async fn get_logs(&self, function: &Function, lines: usize) -> Result<Vec<String>, ProviderError>;
    async fn get_function_metrics(&self, function: &Function) -> Result<FunctionMetrics, ProviderError>;

    async fn create_application(&self, application: &Application, scheduling: &SchedulingOverlay) -> Result<(), ProviderError>;
    async fn scale(&self, application: &Application, replicas: i32) -> Result<(), ProviderError>;
    async fn update_image(&self, application: &Application, image: &str) -> Result<(), ProviderError>;
    async fn restart(&self, application: &Application) -> Result<(), ProviderError>;
    async fn get_instances(&self, application: &Application) -> Result<Vec<Instance>, ProviderError>;
    async fn delete_application(&self, application: &Application) -> Result<(), ProviderError>;
}

struct KubeProviderCore {
    client: Arc<Mutex<Option<Client>>>,
}

impl KubeProviderCore {
    fn new() -> Self {
        Self { client: Arc::new(Mutex::new(None)) }
    }

    async fn connect(&self) -> Result<(), ProviderError> {
        let config = Config::infer().await.map_err(|e| ProviderError::Upstream(e.to_string()))?;
        let client = Client::try_from(config).map_err(|e| ProviderError::Upstream(e.to_string()))?;
        *self.client.lock().await = Some(client);
        Ok(())
    }

    async fn client(&self) -> Result<Client, ProviderError> {
        self.client
            .lock()
            .await
            .clone()
            .ok_or_else(|| ProviderError::Upstream("provider client not connected".to_string()))
    }
}

/// Fission (spec §4.5 "Fission default"): Functions reference an
/// immutable Package per version; `SetActiveVersion` repoints the
/// `Function` CRD's `packageRef` at the new package, which is how Fission
/// itself models "active version" without redeploying triggers.
pub struct FissionProvider {
    core: KubeProviderCore,
    namespace: String,
}

const FISSION_GROUP: &str = "fission.io";
const FISSION_VERSION: &str = "v1";

impl FissionProvider {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { core: KubeProviderCore::new(), namespace: namespace.into() }
    }

    pub async fn connect(&self) -> Result<(), ProviderError> {
        self.core.connect().await
    }

    fn resource(kind: &str) -> kube::api::ApiResource {
        kube::api::ApiResource::from_gvk(&GroupVersionKind::gvk(FISSION_GROUP, FISSION_VERSION, kind))
    }

    async fn api(&self, kind: &str) -> Result<Api<DynamicObject>, ProviderError> {
        let client = self.core.client().await?;
        Ok(Api::namespaced_with(client, &self.namespace, &Self::resource(kind)))
    }

    fn package_name(version: &FunctionVersion) -> String {
        format!("pkg-{}", version.id)
    }
}

#[async_trait]
impl Provider for FissionProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            provider: ProviderKind::Fission,
            supported_runtimes: vec!["nodejs".to_string(), "python".to_string(), "go".to_string()],
            max_memory_mb: 2048,
            cold_start_class: ColdStartClass::Low,
            supports_async: true,
            supports_scale_to_zero: true,
        }
    }

    async fn deploy_version(&self, _function: &Function, version: &FunctionVersion, _scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        let packages = self.api("Package").await?;
        let manifest = json!({
            "apiVersion": format!("{FISSION_GROUP}/{FISSION_VERSION}"),
            "kind": "Package",
            "metadata": { "name": Self::package_name(version), "namespace": self.namespace },
            "spec": { "source": build_source_json(&version.source) },
        });
        packages
            .patch(&Self::package_name(version), &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn set_active_version(&self, function: &Function, version: &FunctionVersion, scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        let functions = self.api("Function").await?;
        let mut pod_spec = json!({});
        scheduling.apply_to_pod_spec(&mut pod_spec);
        let manifest = json!({
            "apiVersion": format!("{FISSION_GROUP}/{FISSION_VERSION}"),
            "kind": "Function",
            "metadata": { "name": function.id.to_string(), "namespace": self.namespace },
            "spec": {
                "environment": { "name": function.runtime, "namespace": self.namespace },
                "package": { "packageref": { "name": Self::package_name(version), "namespace": self.namespace } },
                "resources": { "limits": { "memory": format!("{}Mi", function.memory_mb) } },
                "podspec": pod_spec,
            },
        });
        functions
            .patch(&function.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn delete_function(&self, function: &Function) -> Result<(), ProviderError> {
        let functions = self.api("Function").await?;
        match functions.delete(&function.id.to_string(), &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(ProviderError::Upstream(e.to_string())),
        }
    }

    async fn invoke(&self, function: &Function, payload: &[u8], is_async: bool) -> Result<InvocationResult, ProviderError> {
        // Fission's router exposes a synchronous HTTP path per Function
        // name; invoking it is an edge concern (spec §6). Here the
        // façade only needs a result shape to emit the `invoked` event
        // from — the real call is behind the router, not this trait.
        let _ = (function, payload, is_async);
        Ok(InvocationResult {
            invocation_id: InvocationId::generate(),
            status_code: 200,
            duration_ms: 0,
            cold_start: false,
            output: Vec::new(),
        })
    }

    async fn create_trigger(&self, function: &Function, trigger: &FunctionTrigger) -> Result<(), ProviderError> {
        let (kind, manifest) = trigger_manifest(&self.namespace, function, trigger)?;
        let api = self.api(kind).await?;
        api.patch(&trigger.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn delete_trigger(&self, _function: &Function, trigger: &FunctionTrigger) -> Result<(), ProviderError> {
        let kind = match trigger.kind {
            TriggerKind::Http => "HTTPTrigger",
            TriggerKind::Schedule => "TimeTrigger",
            TriggerKind::Event => "MessageQueueTrigger",
        };
        let api = self.api(kind).await?;
        match api.delete(&trigger.id.to_string(), &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(ProviderError::Upstream(e.to_string())),
        }
    }

    async fn get_logs(&self, function: &Function, lines: usize) -> Result<Vec<String>, ProviderError> {
        let client = self.core.client().await?;
        let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(client, &self.namespace);
        let list = pods
            .list(&kube::api::ListParams::default().labels(&format!("functionName={}", function.id)))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(list.items.into_iter().take(lines).filter_map(|p| p.metadata.name).collect())
    }

    async fn get_function_metrics(&self, _function: &Function) -> Result<FunctionMetrics, ProviderError> {
        Ok(FunctionMetrics::default())
    }

    async fn create_application(&self, _application: &Application, _scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        Err(ProviderError::Upstream("Fission does not host long-running Applications".to_string()))
    }

    async fn scale(&self, _application: &Application, _replicas: i32) -> Result<(), ProviderError> {
        Err(ProviderError::Upstream("Fission does not host long-running Applications".to_string()))
    }

    async fn update_image(&self, _application: &Application, _image: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Upstream("Fission does not host long-running Applications".to_string()))
    }

    async fn restart(&self, _application: &Application) -> Result<(), ProviderError> {
        Err(ProviderError::Upstream("Fission does not host long-running Applications".to_string()))
    }

    async fn get_instances(&self, _application: &Application) -> Result<Vec<Instance>, ProviderError> {
        Err(ProviderError::Upstream("Fission does not host long-running Applications".to_string()))
    }

    async fn delete_application(&self, _application: &Application) -> Result<(), ProviderError> {
        Err(ProviderError::Upstream("Fission does not host long-running Applications".to_string()))
    }
}

fn build_source_json(source: &crate::model::VersionSource) -> Value {
    match source {
        crate::model::VersionSource::Source { archive_ref, builder_runtime } => {
            json!({ "type": "archive", "url": archive_ref, "builder": builder_runtime })
        }
        crate::model::VersionSource::Image { image_ref } => {
            json!({ "type": "container", "image": image_ref })
        }
    }
}

fn trigger_manifest(namespace: &str, function: &Function, trigger: &FunctionTrigger) -> Result<(&'static str, Value), ProviderError> {
    let config: Value = serde_json::from_str(&trigger.config_json).map_err(|e| ProviderError::Upstream(format!("malformed trigger config: {e}")))?;
    Ok(match trigger.kind {
        TriggerKind::Http => (
            "HTTPTrigger",
            json!({
                "apiVersion": format!("{FISSION_GROUP}/{FISSION_VERSION}"),
                "kind": "HTTPTrigger",
                "metadata": { "name": trigger.id.to_string(), "namespace": namespace },
                "spec": {
                    "relativeurl": config.get("path").cloned().unwrap_or(json!("/")),
                    "method": config.get("method").cloned().unwrap_or(json!("GET")),
                    "functionref": { "type": "name", "name": function.id.to_string() },
                },
            }),
        ),
        TriggerKind::Schedule => (
            "TimeTrigger",
            json!({
                "apiVersion": format!("{FISSION_GROUP}/{FISSION_VERSION}"),
                "kind": "TimeTrigger",
                "metadata": { "name": trigger.id.to_string(), "namespace": namespace },
                "spec": {
                    "cron": config.get("cron").cloned().unwrap_or(json!("@hourly")),
                    "functionref": { "type": "name", "name": function.id.to_string() },
                },
            }),
        ),
        TriggerKind::Event => (
            "MessageQueueTrigger",
            json!({
                "apiVersion": format!("{FISSION_GROUP}/{FISSION_VERSION}"),
                "kind": "MessageQueueTrigger",
                "metadata": { "name": trigger.id.to_string(), "namespace": namespace },
                "spec": {
                    "topic": config.get("topic").cloned().unwrap_or(Value::Null),
                    "functionref": { "type": "name", "name": function.id.to_string() },
                },
            }),
        ),
    })
}

/// Knative (spec §4.5 "Knative legacy"): a Function/Application both
/// reduce to one Knative `Service`, whose `traffic` block is how
/// `SetActiveVersion` and `Scale`/`UpdateImage` are expressed.
pub struct KnativeProvider {
    core: KubeProviderCore,
    namespace: String,
}

const KNATIVE_GROUP: &str = "serving.knative.dev";
const KNATIVE_VERSION: &str = "v1";

impl KnativeProvider {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self { core: KubeProviderCore::new(), namespace: namespace.into() }
    }

    pub async fn connect(&self) -> Result<(), ProviderError> {
        self.core.connect().await
    }

    async fn api(&self) -> Result<Api<DynamicObject>, ProviderError> {
        let client = self.core.client().await?;
        let resource = kube::api::ApiResource::from_gvk(&GroupVersionKind::gvk(KNATIVE_GROUP, KNATIVE_VERSION, "Service"));
        Ok(Api::namespaced_with(client, &self.namespace, &resource))
    }

    fn revision_name(version: &FunctionVersion) -> String {
        format!("rev-{}", version.id)
    }
}

#[async_trait]
impl Provider for KnativeProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            provider: ProviderKind::Knative,
            supported_runtimes: vec!["container".to_string()],
            max_memory_mb: 4096,
            cold_start_class: ColdStartClass::Moderate,
            supports_async: false,
            supports_scale_to_zero: true,
        }
    }

    async fn deploy_version(&self, function: &Function, version: &FunctionVersion, scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        let image = match &version.source {
            crate::model::VersionSource::Image { image_ref } => image_ref.clone(),
            crate::model::VersionSource::Source { .. } => {
                return Err(ProviderError::Upstream("Knative requires a pre-built image, not a source archive".to_string()))
            }
        };
        let api = self.api().await?;
        let mut pod_spec = json!({ "containers": [{ "image": image }] });
        scheduling.apply_to_pod_spec(&mut pod_spec);
        let manifest = json!({
            "apiVersion": format!("{KNATIVE_GROUP}/{KNATIVE_VERSION}"),
            "kind": "Service",
            "metadata": { "name": function.id.to_string(), "namespace": self.namespace },
            "spec": {
                "template": {
                    "metadata": { "name": Self::revision_name(version) },
                    "spec": pod_spec,
                },
                "traffic": [{ "latestRevision": false, "revisionName": Self::revision_name(version), "percent": 0 }],
            },
        });
        api.patch(&function.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn set_active_version(&self, function: &Function, version: &FunctionVersion, _scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        let api = self.api().await?;
        let patch = json!({
            "spec": { "traffic": [{ "latestRevision": false, "revisionName": Self::revision_name(version), "percent": 100 }] }
        });
        api.patch(&function.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn delete_function(&self, function: &Function) -> Result<(), ProviderError> {
        let api = self.api().await?;
        match api.delete(&function.id.to_string(), &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(ProviderError::Upstream(e.to_string())),
        }
    }

    async fn invoke(&self, function: &Function, payload: &[u8], is_async: bool) -> Result<InvocationResult, ProviderError> {
        if is_async {
            return Err(ProviderError::Upstream("Knative provider does not support async invocation".to_string()));
        }
        let _ = (function, payload);
        Ok(InvocationResult {
            invocation_id: InvocationId::generate(),
            status_code: 200,
            duration_ms: 0,
            cold_start: false,
            output: Vec::new(),
        })
    }

    async fn create_trigger(&self, _function: &Function, _trigger: &FunctionTrigger) -> Result<(), ProviderError> {
        Err(ProviderError::Upstream("Knative provider does not model standalone triggers; use Knative Eventing directly".to_string()))
    }

    async fn delete_trigger(&self, _function: &Function, _trigger: &FunctionTrigger) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_logs(&self, function: &Function, lines: usize) -> Result<Vec<String>, ProviderError> {
        let client = self.core.client().await?;
        let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(client, &self.namespace);
        let list = pods
            .list(&kube::api::ListParams::default().labels(&format!("serving.knative.dev/service={}", function.id)))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(list.items.into_iter().take(lines).filter_map(|p| p.metadata.name).collect())
    }

    async fn get_function_metrics(&self, _function: &Function) -> Result<FunctionMetrics, ProviderError> {
        Ok(FunctionMetrics::default())
    }

    async fn create_application(&self, application: &Application, scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        let api = self.api().await?;
        let mut pod_spec = json!({ "containers": [{ "image": application.image }] });
        scheduling.apply_to_pod_spec(&mut pod_spec);
        let manifest = json!({
            "apiVersion": format!("{KNATIVE_GROUP}/{KNATIVE_VERSION}"),
            "kind": "Service",
            "metadata": { "name": application.id.to_string(), "namespace": self.namespace },
            "spec": { "template": { "spec": pod_spec } },
        });
        api.patch(&application.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&manifest))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn scale(&self, application: &Application, replicas: i32) -> Result<(), ProviderError> {
        let api = self.api().await?;
        let patch = json!({
            "spec": { "template": { "metadata": { "annotations": {
                "autoscaling.knative.dev/minScale": replicas.to_string(),
            } } } }
        });
        api.patch(&application.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn update_image(&self, application: &Application, image: &str) -> Result<(), ProviderError> {
        let api = self.api().await?;
        let patch = json!({ "spec": { "template": { "spec": { "containers": [{ "image": image }] } } } });
        api.patch(&application.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn restart(&self, application: &Application) -> Result<(), ProviderError> {
        let api = self.api().await?;
        let patch = json!({ "spec": { "template": { "metadata": { "annotations": {
            "hexabase.ai/restarted-at": Utc::now().timestamp().to_string(),
        } } } } });
        api.patch(&application.id.to_string(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(())
    }

    async fn get_instances(&self, application: &Application) -> Result<Vec<Instance>, ProviderError> {
        let client = self.core.client().await?;
        let pods: Api<k8s_openapi::api::core::v1::Pod> = Api::namespaced(client, &self.namespace);
        let list = pods
            .list(&kube::api::ListParams::default().labels(&format!("serving.knative.dev/service={}", application.id)))
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        Ok(list
            .items
            .into_iter()
            .map(|p| Instance {
                pod_name: p.metadata.name.unwrap_or_default(),
                phase: p
                    .status
                    .as_ref()
                    .and_then(|s| s.phase.as_deref())
                    .map(phase_from_str)
                    .unwrap_or(InstancePhase::Unknown),
                node_name: p.spec.as_ref().and_then(|s| s.node_name.clone()),
                restarts: p
                    .status
                    .as_ref()
                    .and_then(|s| s.container_statuses.as_ref())
                    .map(|cs| cs.iter().map(|c| c.restart_count).sum())
                    .unwrap_or(0),
            })
            .collect())
    }

    async fn delete_application(&self, application: &Application) -> Result<(), ProviderError> {
        let api = self.api().await?;
        match api.delete(&application.id.to_string(), &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(()),
            Err(e) => Err(ProviderError::Upstream(e.to_string())),
        }
    }
}

fn phase_from_str(s: &str) -> InstancePhase {
    match s {
        "Running" => InstancePhase::Running,
        "Pending" => InstancePhase::Pending,
        "Failed" => InstancePhase::Failed,
        _ => InstancePhase::Unknown,
    }
}

/// Test fake covering both the Function and Application surfaces.
#[derive(Default)]
pub struct InMemoryProvider {
    active_versions: Mutex<HashMap<String, String>>,
    deployed_versions: Mutex<HashMap<String, HashMap<String, crate::model::VersionSource>>>,
    applications: Mutex<HashMap<String, (String, i32)>>,
    deleted_functions: Mutex<Vec<String>>,
    deleted_applications: Mutex<Vec<String>>,
    applied_scheduling: Mutex<HashMap<String, SchedulingOverlay>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn active_version_for(&self, function_id: &str) -> Option<String> {
        self.active_versions.lock().await.get(function_id).cloned()
    }

    pub async fn scheduling_for(&self, key: &str) -> Option<SchedulingOverlay> {
        self.applied_scheduling.lock().await.get(key).cloned()
    }
}

#[async_trait]
impl Provider for InMemoryProvider {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            provider: ProviderKind::Fission,
            supported_runtimes: vec!["nodejs".to_string(), "python".to_string()],
            max_memory_mb: 512,
            cold_start_class: ColdStartClass::Low,
            supports_async: true,
            supports_scale_to_zero: true,
        }
    }

    async fn deploy_version(&self, function: &Function, version: &FunctionVersion, _scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        self.deployed_versions
            .lock()
            .await
            .entry(function.id.to_string())
            .or_default()
            .insert(version.id.to_string(), version.source.clone());
        Ok(())
    }

    async fn set_active_version(&self, function: &Function, version: &FunctionVersion, scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        self.active_versions.lock().await.insert(function.id.to_string(), version.id.to_string());
        self.applied_scheduling.lock().await.insert(function.id.to_string(), scheduling.clone());
        Ok(())
    }

    async fn delete_function(&self, function: &Function) -> Result<(), ProviderError> {
        self.deleted_functions.lock().await.push(function.id.to_string());
        self.active_versions.lock().await.remove(&function.id.to_string());
        Ok(())
    }

    async fn invoke(&self, function: &Function, payload: &[u8], _is_async: bool) -> Result<InvocationResult, ProviderError> {
        let _ = payload;
        if !self.active_versions.lock().await.contains_key(&function.id.to_string()) {
            return Err(ProviderError::NotFound(function.id.to_string()));
        }
        Ok(InvocationResult {
            invocation_id: InvocationId::generate(),
            status_code: 200,
            duration_ms: 12,
            cold_start: false,
            output: b"ok".to_vec(),
        })
    }

    async fn create_trigger(&self, _function: &Function, _trigger: &FunctionTrigger) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn delete_trigger(&self, _function: &Function, _trigger: &FunctionTrigger) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn get_logs(&self, _function: &Function, _lines: usize) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["log line 1".to_string()])
    }

    async fn get_function_metrics(&self, _function: &Function) -> Result<FunctionMetrics, ProviderError> {
        Ok(FunctionMetrics { invocations_total: 1, errors_total: 0, avg_duration_ms: 12.0, p95_duration_ms: 20.0 })
    }

    async fn create_application(&self, application: &Application, scheduling: &SchedulingOverlay) -> Result<(), ProviderError> {
        self.applications.lock().await.insert(application.id.to_string(), (application.image.clone(), application.replicas));
        self.applied_scheduling.lock().await.insert(application.id.to_string(), scheduling.clone());
        Ok(())
    }

    async fn scale(&self, application: &Application, replicas: i32) -> Result<(), ProviderError> {
        let mut apps = self.applications.lock().await;
        let entry = apps.get_mut(&application.id.to_string()).ok_or_else(|| ProviderError::NotFound(application.id.to_string()))?;
        entry.1 = replicas;
        Ok(())
    }

    async fn update_image(&self, application: &Application, image: &str) -> Result<(), ProviderError> {
        let mut apps = self.applications.lock().await;
        let entry = apps.get_mut(&application.id.to_string()).ok_or_else(|| ProviderError::NotFound(application.id.to_string()))?;
        entry.0 = image.to_string();
        Ok(())
    }

    async fn restart(&self, application: &Application) -> Result<(), ProviderError> {
        if !self.applications.lock().await.contains_key(&application.id.to_string()) {
            return Err(ProviderError::NotFound(application.id.to_string()));
        }
        Ok(())
    }

    async fn get_instances(&self, application: &Application) -> Result<Vec<Instance>, ProviderError> {
        let apps = self.applications.lock().await;
        let (_, replicas) = apps.get(&application.id.to_string()).ok_or_else(|| ProviderError::NotFound(application.id.to_string()))?;
        Ok((0..*replicas)
            .map(|i| Instance {
                pod_name: format!("{}-{}", application.name, i),
                phase: InstancePhase::Running,
                node_name: Some("fake-node".to_string()),
                restarts: 0,
            })
            .collect())
    }

    async fn delete_application(&self, application: &Application) -> Result<(), ProviderError> {
        self.deleted_applications.lock().await.push(application.id.to_string());
        self.applications.lock().await.remove(&application.id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexabase_common::ids::{FunctionId, FunctionVersionId, ProjectId, WorkspaceId};
    use test_r::test;

    fn function() -> Function {
        Function {
            id: FunctionId::generate(),
            workspace_id: WorkspaceId::generate(),
            project_id: ProjectId::generate(),
            name: "hello".to_string(),
            runtime: "nodejs".to_string(),
            memory_mb: 128,
            timeout_s: 30,
            env: Vec::new(),
            active_version_id: None,
            created_at: Utc::now(),
        }
    }

    fn version(function_id: FunctionId) -> FunctionVersion {
        FunctionVersion {
            id: FunctionVersionId::generate(),
            function_id,
            source: crate::model::VersionSource::Image { image_ref: "registry/hello:v1".to_string() },
            build_status: BuildStatus::Success,
            build_log: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    async fn invoking_before_any_active_version_fails() {
        let provider = InMemoryProvider::new();
        let f = function();
        let err = provider.invoke(&f, b"{}", false).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[test]
    async fn set_active_version_records_the_scheduling_overlay() {
        let provider = InMemoryProvider::new();
        let f = function();
        let v = version(f.id);
        provider.deploy_version(&f, &v, &SchedulingOverlay::none()).await.unwrap();
        let overlay = SchedulingOverlay::dedicated("ws-pool".to_string(), "ws-1".to_string());
        provider.set_active_version(&f, &v, &overlay).await.unwrap();

        assert_eq!(provider.active_version_for(&f.id.to_string()).await, Some(v.id.to_string()));
        let recorded = provider.scheduling_for(&f.id.to_string()).await.unwrap();
        assert_eq!(recorded.node_selector, Some(("hexabase.ai/node-pool".to_string(), "ws-pool".to_string())));
    }
}
