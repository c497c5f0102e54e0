//! Cluster inventory for idle resource detection
//!
//! Lists pods, persistent volume claims and services through the Kubernetes
//! API and reports objects that cost money without serving a workload.

use super::InventorySource;
use crate::error::Result;
use crate::models::{IdleKind, IdleResource};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::Client;
use std::collections::{BTreeMap, HashSet};
use tracing::debug;

const UPSTREAM: &str = crate::health::components::INVENTORY;

/// Prices for inventory objects
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InventoryPricing {
    pub storage_gib_month: f64,
    pub load_balancer_month: f64,
}

impl Default for InventoryPricing {
    fn default() -> Self {
        Self {
            storage_gib_month: 0.10,
            load_balancer_month: 18.25,
        }
    }
}

/// Inventory source backed by the Kubernetes API
pub struct KubeInventory {
    client: Client,
    pricing: InventoryPricing,
}

impl KubeInventory {
    pub fn new(client: Client, pricing: InventoryPricing) -> Self {
        Self { client, pricing }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn try_default(pricing: InventoryPricing) -> Result<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, pricing))
    }
}

#[async_trait]
impl InventorySource for KubeInventory {
    fn name(&self) -> &str {
        UPSTREAM
    }

    async fn fetch_idle_resources(&self) -> Result<Vec<IdleResource>> {
        let params = ListParams::default();
        let pods = Api::<Pod>::all(self.client.clone()).list(&params).await?.items;
        let claims = Api::<PersistentVolumeClaim>::all(self.client.clone())
            .list(&params)
            .await?
            .items;
        let services = Api::<Service>::all(self.client.clone())
            .list(&params)
            .await?
            .items;

        debug!(
            pods = pods.len(),
            claims = claims.len(),
            services = services.len(),
            "Listed cluster inventory"
        );

        Ok(find_idle_resources(&pods, &claims, &services, &self.pricing))
    }
}

fn is_live(pod: &Pod) -> bool {
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Running") | Some("Pending")
    )
}

fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

/// Idle PVCs (bound but not mounted by a live pod) and LoadBalancer services
/// whose selector matches no running pod
pub(crate) fn find_idle_resources(
    pods: &[Pod],
    claims: &[PersistentVolumeClaim],
    services: &[Service],
    pricing: &InventoryPricing,
) -> Vec<IdleResource> {
    let mut idle = Vec::new();

    let mounted: HashSet<(String, String)> = pods
        .iter()
        .filter(|p| is_live(p))
        .flat_map(|pod| {
            let namespace = pod.metadata.namespace.clone().unwrap_or_default();
            pod.spec
                .iter()
                .flat_map(|spec| spec.volumes.iter().flatten())
                .filter_map(|v| v.persistent_volume_claim.as_ref())
                .map(move |c| (namespace.clone(), c.claim_name.clone()))
                .collect::<Vec<_>>()
        })
        .collect();

    for claim in claims {
        let (Some(namespace), Some(name)) = (&claim.metadata.namespace, &claim.metadata.name) else {
            continue;
        };
        let bound = claim.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Bound");
        if !bound || mounted.contains(&(namespace.clone(), name.clone())) {
            continue;
        }

        let storage = claim
            .status
            .as_ref()
            .and_then(|s| s.capacity.as_ref())
            .and_then(|c| c.get("storage"))
            .or_else(|| {
                claim
                    .spec
                    .as_ref()
                    .and_then(|s| s.resources.as_ref())
                    .and_then(|r| r.requests.as_ref())
                    .and_then(|r| r.get("storage"))
            })
            .and_then(parse_quantity_gib)
            .unwrap_or(0.0);

        idle.push(IdleResource {
            namespace: namespace.clone(),
            name: name.clone(),
            kind: IdleKind::PersistentVolumeClaim,
            monthly_cost: storage * pricing.storage_gib_month,
        });
    }

    for service in services {
        let (Some(namespace), Some(name)) = (&service.metadata.namespace, &service.metadata.name)
        else {
            continue;
        };
        let Some(spec) = &service.spec else { continue };
        if spec.type_.as_deref() != Some("LoadBalancer") {
            continue;
        }
        // Services without a selector are backed by manual endpoints
        let Some(selector) = spec.selector.as_ref().filter(|s| !s.is_empty()) else {
            continue;
        };

        let backed = pods.iter().filter(|p| is_running(p)).any(|pod| {
            pod.metadata.namespace.as_deref() == Some(namespace.as_str())
                && labels_match(selector, pod.metadata.labels.as_ref())
        });

        if !backed {
            idle.push(IdleResource {
                namespace: namespace.clone(),
                name: name.clone(),
                kind: IdleKind::LoadBalancer,
                monthly_cost: pricing.load_balancer_month,
            });
        }
    }

    idle
}

fn labels_match(
    selector: &BTreeMap<String, String>,
    labels: Option<&BTreeMap<String, String>>,
) -> bool {
    let Some(labels) = labels else {
        return false;
    };
    selector.iter().all(|(k, v)| labels.get(k) == Some(v))
}

/// Convert a Kubernetes storage quantity (`10Gi`, `500M`, `1073741824`) to GiB
pub fn parse_quantity_gib(quantity: &Quantity) -> Option<f64> {
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let raw = quantity.0.trim();

    let split = raw
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let number: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => GIB,
        "Ti" => GIB * 1024.0,
        "Pi" => GIB * 1024.0 * 1024.0,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        _ => return None,
    };

    Some(number * multiplier / GIB)
}
