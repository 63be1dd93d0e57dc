//! Pod usage from the metrics-server (`metrics.k8s.io/v1beta1` PodMetrics).

use std::collections::{BTreeMap, HashMap, HashSet};

use kube::{
    api::{Api, ListParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    Client,
};
use tracing::debug;

use kestrel_core::{MetricSample, ObjectIdentity};

use crate::facade::{MetricsProvider, MetricsUnavailable};

pub struct MetricsServerProvider {
    client: Client,
    resource: ApiResource,
}

impl MetricsServerProvider {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self { client, resource: ApiResource::from_gvk_with_plural(&gvk, "pods") }
    }
}

#[async_trait::async_trait]
impl MetricsProvider for MetricsServerProvider {
    async fn fetch(&self, pods: &[ObjectIdentity]) -> Result<HashMap<ObjectIdentity, MetricSample>, MetricsUnavailable> {
        let mut by_ns: BTreeMap<&str, HashSet<&str>> = BTreeMap::new();
        for p in pods {
            by_ns.entry(p.namespace.as_str()).or_default().insert(p.name.as_str());
        }
        let lists = futures::future::try_join_all(by_ns.iter().map(|(ns, _)| {
            let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), ns, &self.resource);
            async move { api.list(&ListParams::default()).await.map(|l| (*ns, l.items)) }
        }))
        .await
        .map_err(|e| MetricsUnavailable(e.to_string()))?;

        let mut out = HashMap::new();
        for (ns, items) in lists {
            let wanted = &by_ns[ns];
            for obj in items {
                let Some(name) = obj.metadata.name.as_deref() else { continue };
                if !wanted.contains(name) {
                    continue;
                }
                if let Some(sample) = sample_from(&obj.data) {
                    out.insert(ObjectIdentity::new(ns, name), sample);
                }
            }
        }
        debug!(requested = pods.len(), found = out.len(), "kubehub: pod metrics fetched");
        Ok(out)
    }
}

/// Sum container usage of one PodMetrics body.
pub fn sample_from(data: &serde_json::Value) -> Option<MetricSample> {
    let containers = data.get("containers")?.as_array()?;
    let mut sample = MetricSample::default();
    for c in containers {
        let usage = c.get("usage");
        let cpu = usage.and_then(|u| u.get("cpu")).and_then(|v| v.as_str()).and_then(parse_cpu_millis);
        let mem = usage.and_then(|u| u.get("memory")).and_then(|v| v.as_str()).and_then(parse_memory_bytes);
        sample.cpu_millicores += cpu.unwrap_or(0);
        sample.memory_bytes += mem.unwrap_or(0);
    }
    sample.window_secs = data.get("window").and_then(|v| v.as_str()).and_then(parse_window_secs);
    sample.timestamp = data
        .get("timestamp")
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&chrono::Utc));
    Some(sample)
}

/// CPU quantity (`250m`, `1`, `1.5`, `12345n`, `500u`) in millicores.
pub fn parse_cpu_millis(q: &str) -> Option<u64> {
    let q = q.trim();
    let (num, scale) = if let Some(n) = q.strip_suffix('n') {
        (n, 1e-6)
    } else if let Some(n) = q.strip_suffix('u') {
        (n, 1e-3)
    } else if let Some(n) = q.strip_suffix('m') {
        (n, 1.0)
    } else {
        (q, 1000.0)
    };
    let v: f64 = num.parse().ok()?;
    if v < 0.0 {
        return None;
    }
    Some((v * scale).round() as u64)
}

/// Memory quantity (`128Mi`, `1Gi`, `500k`, `1e3`, `1024`) in bytes.
pub fn parse_memory_bytes(q: &str) -> Option<u64> {
    const SUFFIXES: [(&str, f64); 12] = [
        ("Ki", 1024.0),
        ("Mi", 1048576.0),
        ("Gi", 1073741824.0),
        ("Ti", 1099511627776.0),
        ("Pi", 1125899906842624.0),
        ("Ei", 1152921504606846976.0),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    let q = q.trim();
    let (num, scale) = SUFFIXES
        .iter()
        .find_map(|(s, m)| q.strip_suffix(s).map(|n| (n, *m)))
        .unwrap_or((q, 1.0));
    let v: f64 = num.parse().ok()?;
    if v < 0.0 {
        return None;
    }
    Some((v * scale).round() as u64)
}

/// Duration as rendered by metrics-server (`30s`, `10.5s`, `1m0s`, `1h0m0s`, `500ms`).
pub fn parse_window_secs(s: &str) -> Option<u64> {
    let mut rest = s.trim();
    if rest.is_empty() {
        return None;
    }
    let mut total = 0f64;
    while !rest.is_empty() {
        let num_end = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
        if num_end == 0 {
            return None;
        }
        let value: f64 = rest[..num_end].parse().ok()?;
        rest = &rest[num_end..];
        let unit_end = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
        let scale = match &rest[..unit_end] {
            "h" => 3600.0,
            "m" => 60.0,
            "s" => 1.0,
            "ms" => 1e-3,
            "us" | "\u{b5}s" => 1e-6,
            "ns" => 1e-9,
            _ => return None,
        };
        total += value * scale;
        rest = &rest[unit_end..];
    }
    Some(total.round() as u64)
}
