//! Local HTTP API a UI process uses to drive the alarm cluster.

use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::Result;
use chrono::{Local, Utc};
use log::{debug, error, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tiny_http::{Header, Method, Response, Server, StatusCode};

use crate::alarm::calculator::{TimeDisplayMode, format_local_fire_time};
use crate::alarm::lifecycle::{ClusterError, ClusterManager, SharedCluster};
use crate::alarm::model::{ClusterProfile, format_wake_time, parse_wake_time_of_day};
use crate::alarm::scheduler::{AlarmScheduler, OverlayPermission};
use crate::alarm::tone::{Tone, TonePool};
use crate::notice::Notice;
use crate::store::KeyValueStore;

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OccurrenceView {
    pub index: u32,
    pub fire_at: String,
    pub fire_at_local: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tone_uri: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleView {
    pub wake_time: String,
    pub last_fire_time: String,
    pub interval: u32,
    pub alarm_count: u32,
    pub tone_pool: TonePool,
    pub occurrences: Vec<OccurrenceView>,
}

impl ScheduleView {
    pub fn from_profile(profile: &ClusterProfile, mode: TimeDisplayMode) -> Self {
        Self {
            wake_time: format_wake_time(profile.wake_time),
            last_fire_time: format_wake_time(profile.last_fire_time()),
            interval: profile.interval_minutes,
            alarm_count: profile.alarm_count,
            tone_pool: profile.tone_pool.clone(),
            occurrences: profile
                .occurrences()
                .map(|occurrence| OccurrenceView {
                    index: occurrence.index,
                    fire_at: format_wake_time(occurrence.fire_at),
                    fire_at_local: format_local_fire_time(occurrence.fire_at, mode),
                    tone_name: occurrence.tone.map(|tone| tone.name.clone()),
                    tone_uri: occurrence.tone.map(|tone| tone.uri.clone()),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftView {
    pub wake_time_of_day: String,
    pub interval: u32,
    pub alarm_count: u32,
    pub tone_pool: TonePool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSnapshot {
    pub active: bool,
    pub draft: DraftView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<ScheduleView>,
    pub overlay_permission_missing: bool,
}

pub fn snapshot<S, A, P>(manager: &ClusterManager<S, A, P>) -> ClusterSnapshot
where
    S: KeyValueStore,
    A: AlarmScheduler,
    P: OverlayPermission,
{
    let draft = manager.draft();
    ClusterSnapshot {
        active: manager.is_active(),
        draft: DraftView {
            wake_time_of_day: draft.wake_time_of_day().format("%H:%M").to_string(),
            interval: draft.interval_minutes(),
            alarm_count: draft.alarm_count(),
            tone_pool: draft.tone_pool().clone(),
        },
        schedule: manager
            .active_profile()
            .map(|profile| ScheduleView::from_profile(profile, TimeDisplayMode::Hour24)),
        overlay_permission_missing: manager.overlay_permission_missing(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiReply {
    pub status: u16,
    pub body: Value,
}

impl ApiReply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        let message = message.into();
        let notice = Notice::Error {
            message: message.clone(),
        };
        Self {
            status: 400,
            body: json!({ "error": message, "notice": notice.presentation() }),
        }
    }

    fn internal_error(message: String) -> Self {
        let notice = Notice::Error {
            message: message.clone(),
        };
        Self {
            status: 500,
            body: json!({ "error": message, "notice": notice.presentation() }),
        }
    }

    fn not_found() -> Self {
        Self {
            status: 404,
            body: json!({ "error": "not found" }),
        }
    }

    fn from_cluster_error(err: &ClusterError) -> Self {
        let status = match err {
            ClusterError::ClusterLocked | ClusterError::Busy => 409,
            ClusterError::PermissionDenied => 412,
            ClusterError::SchedulerCall(_) => 502,
            ClusterError::Persistence(_) => 500,
        };
        let notice = Notice::from(err);
        Self {
            status,
            body: json!({ "error": err.to_string(), "notice": notice.presentation() }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DraftBody {
    wake_time: Option<String>,
    interval: Option<Value>,
    alarm_count: Option<Value>,
    #[serde(default)]
    accept_degraded: bool,
}

#[derive(Debug, Deserialize)]
struct DefaultTonesBody {
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CustomToneEntry {
    name: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct CustomTonesBody {
    tones: Vec<CustomToneEntry>,
}

#[derive(Debug, Deserialize)]
struct RemoveToneBody {
    uri: String,
}

/// Dispatches one request against the cluster. Kept apart from the socket so the
/// routing can be exercised directly.
pub fn route<S, A, P>(
    method: &Method,
    path: &str,
    body: &str,
    cluster: &SharedCluster<S, A, P>,
) -> ApiReply
where
    S: KeyValueStore,
    A: AlarmScheduler,
    P: OverlayPermission,
{
    match (method, path) {
        (Method::Get, "/healthz") => ApiReply::ok(json!({ "status": "ok" })),
        (Method::Get, "/v1/cluster") => {
            let view = cluster.inspect(snapshot);
            json_reply(&view)
        }
        (Method::Get, "/v1/cluster/preview") => respond(cluster.exclusive(|manager| {
            let profile = manager.preview()?;
            Ok(ScheduleView::from_profile(&profile, TimeDisplayMode::Hour24))
        })),
        (Method::Post, "/v1/cluster/draft") => {
            let body = match parse_body::<DraftBody>(body) {
                Ok(body) => body,
                Err(reply) => return reply,
            };
            let wake_time = match parse_optional_wake_time(body.wake_time.as_deref()) {
                Ok(wake_time) => wake_time,
                Err(reply) => return reply,
            };
            respond(cluster.exclusive(|manager| {
                apply_draft(manager, wake_time, &body)?;
                Ok(snapshot(manager))
            }))
        }
        (Method::Post, "/v1/cluster/activate") => {
            let body = match parse_body::<DraftBody>(body) {
                Ok(body) => body,
                Err(reply) => return reply,
            };
            let wake_time = match parse_optional_wake_time(body.wake_time.as_deref()) {
                Ok(wake_time) => wake_time,
                Err(reply) => return reply,
            };
            respond(cluster.exclusive(|manager| {
                apply_draft(manager, wake_time, &body)?;
                if body.accept_degraded {
                    manager.acknowledge_degraded_mode();
                }
                let profile = manager.activate_draft()?;
                let notice = Notice::Success {
                    message: format!(
                        "{} alarms from {}",
                        profile.alarm_count,
                        format_local_fire_time(profile.wake_time, TimeDisplayMode::Hour24)
                    ),
                };
                Ok(json!({
                    "schedule": ScheduleView::from_profile(&profile, TimeDisplayMode::Hour24),
                    "notice": notice.presentation(),
                }))
            }))
        }
        (Method::Post, "/v1/cluster/deactivate") => respond(cluster.exclusive(|manager| {
            let was_active = manager.deactivate()?;
            Ok(json!({ "deactivated": was_active }))
        })),
        (Method::Post, "/v1/cluster/reconcile") => respond(cluster.exclusive(|manager| {
            let report = manager.reconcile(Utc::now())?;
            Ok(json!({ "report": format!("{report:?}") }))
        })),
        (Method::Get, "/v1/tones") => {
            let pool = cluster.inspect(|manager| manager.draft().tone_pool().clone());
            json_reply(&pool)
        }
        (Method::Get, "/v1/tones/defaults") => {
            let available = cluster.inspect(|manager| manager.available_default_tones());
            json_reply(&available)
        }
        (Method::Post, "/v1/tones/defaults") => {
            let body = match parse_body::<DefaultTonesBody>(body) {
                Ok(body) => body,
                Err(reply) => return reply,
            };
            respond(cluster.exclusive(|manager| {
                let selected = manager
                    .available_default_tones()
                    .into_iter()
                    .filter(|tone| tone.id.as_ref().is_some_and(|id| body.ids.contains(id)))
                    .collect::<Vec<_>>();
                let added = manager.add_default_tones(selected)?;
                Ok(json!({ "added": added }))
            }))
        }
        (Method::Post, "/v1/tones/custom") => {
            let body = match parse_body::<CustomTonesBody>(body) {
                Ok(body) => body,
                Err(reply) => return reply,
            };
            let selected = body
                .tones
                .into_iter()
                .map(|entry| Tone::custom(entry.name, entry.uri))
                .collect::<Vec<_>>();
            respond(cluster.exclusive(|manager| {
                let added = manager.add_custom_tones(selected)?;
                Ok(json!({ "added": added }))
            }))
        }
        (Method::Delete, "/v1/tones") => {
            let body = match parse_body::<RemoveToneBody>(body) {
                Ok(body) => body,
                Err(reply) => return reply,
            };
            respond(cluster.exclusive(|manager| {
                let removed = manager.remove_tone(&body.uri)?;
                Ok(json!({ "removed": removed.is_some() }))
            }))
        }
        (Method::Post, "/v1/sound/stop") => respond(cluster.exclusive(|manager| {
            manager.stop_current_sound()?;
            Ok(json!({ "stopped": true }))
        })),
        _ => ApiReply::not_found(),
    }
}

fn respond<T: Serialize>(result: Result<T, ClusterError>) -> ApiReply {
    match result {
        Ok(payload) => json_reply(&payload),
        Err(err) => {
            warn!("event=api_request module=api status=error error={err}");
            ApiReply::from_cluster_error(&err)
        }
    }
}

fn json_reply<T: Serialize>(payload: &T) -> ApiReply {
    match serde_json::to_value(payload) {
        Ok(body) => ApiReply::ok(body),
        Err(err) => {
            error!("event=api_encode module=api status=error error={err}");
            ApiReply::internal_error(format!("failed to encode response: {err}"))
        }
    }
}

fn parse_body<T>(body: &str) -> Result<T, ApiReply>
where
    T: for<'de> Deserialize<'de>,
{
    let text = if body.trim().is_empty() { "{}" } else { body };
    serde_json::from_str(text).map_err(|err| {
        ApiReply::bad_request(format!(
            "invalid JSON at line {}, column {}: {err}",
            err.line(),
            err.column()
        ))
    })
}

fn parse_optional_wake_time(raw: Option<&str>) -> Result<Option<chrono::NaiveTime>, ApiReply> {
    raw.map(parse_wake_time_of_day)
        .transpose()
        .map_err(|err| ApiReply::bad_request(err.to_string()))
}

fn apply_draft<S, A, P>(
    manager: &mut ClusterManager<S, A, P>,
    wake_time: Option<chrono::NaiveTime>,
    body: &DraftBody,
) -> Result<(), ClusterError>
where
    S: KeyValueStore,
    A: AlarmScheduler,
    P: OverlayPermission,
{
    if wake_time.is_none() && body.interval.is_none() && body.alarm_count.is_none() {
        return Ok(());
    }
    manager.edit_draft(|draft| {
        if let Some(wake_time) = wake_time {
            draft.set_wake_time_of_day(wake_time);
        }
        if let Some(interval) = &body.interval {
            draft.set_interval(&raw_number(interval));
        }
        if let Some(alarm_count) = &body.alarm_count {
            draft.set_alarm_count(&raw_number(alarm_count));
        }
    })
}

fn raw_number(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub struct ApiServer {
    stop: Arc<AtomicBool>,
    http_join: Option<JoinHandle<()>>,
}

impl ApiServer {
    pub fn start<S, A, P>(config: ApiServerConfig, cluster: SharedCluster<S, A, P>) -> Result<Self>
    where
        S: KeyValueStore + Send + 'static,
        A: AlarmScheduler + Send + 'static,
        P: OverlayPermission + Send + 'static,
    {
        let bind = format!("{}:{}", config.bind_addr, config.port);
        let server = Server::http(&bind)
            .map_err(|err| anyhow::anyhow!("failed to start API server on {bind}: {err}"))?;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_for_thread = Arc::clone(&stop);
        let http_join = thread::spawn(move || run_server_loop(server, cluster, stop_for_thread));
        log::info!("event=api_start module=api status=ok bind={bind}");
        Ok(Self {
            stop,
            http_join: Some(http_join),
        })
    }

    /// Blocks until the server thread exits.
    pub fn wait(mut self) {
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

impl Drop for ApiServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.http_join.take() {
            let _ = join.join();
        }
    }
}

fn run_server_loop<S, A, P>(server: Server, cluster: SharedCluster<S, A, P>, stop: Arc<AtomicBool>)
where
    S: KeyValueStore,
    A: AlarmScheduler,
    P: OverlayPermission,
{
    while !stop.load(Ordering::Relaxed) {
        match server.recv_timeout(Duration::from_millis(200)) {
            Ok(Some(request)) => handle_request(request, &cluster),
            Ok(None) => continue,
            Err(_) => continue,
        }
    }
}

fn handle_request<S, A, P>(mut request: tiny_http::Request, cluster: &SharedCluster<S, A, P>)
where
    S: KeyValueStore,
    A: AlarmScheduler,
    P: OverlayPermission,
{
    let Some(remote_ip) = request.remote_addr().map(|addr| addr.ip()) else {
        let _ = send_json(request, 400, &json!({ "error": "missing remote address" }));
        return;
    };
    if !is_local_network_ip(remote_ip) {
        let _ = send_json(request, 403, &json!({ "error": "forbidden: local network only" }));
        return;
    }

    let mut body = String::new();
    if let Err(err) = request.as_reader().read_to_string(&mut body) {
        let _ = send_json(request, 400, &json!({ "error": format!("unreadable body: {err}") }));
        return;
    }

    let method = request.method().clone();
    let url = request.url().to_string();
    let path = url.split_once('?').map(|(path, _)| path).unwrap_or(&url);
    let reply = route(&method, path, &body, cluster);
    debug!(
        "event=api_request module=api method={method} path={path} status={} at={}",
        reply.status,
        Local::now().format("%H:%M:%S%.3f")
    );
    if let Err(err) = send_json(request, reply.status, &reply.body) {
        warn!("event=api_respond module=api status=error error={err}");
    }
}

fn send_json<T: Serialize>(request: tiny_http::Request, status: u16, body: &T) -> Result<()> {
    let payload = serde_json::to_vec(body)?;
    let content_type = Header::from_str("Content-Type: application/json; charset=utf-8")
        .map_err(|_| anyhow::anyhow!("failed to build content-type header"))?;
    request.respond(
        Response::from_data(payload)
            .with_status_code(StatusCode(status))
            .with_header(content_type),
    )?;
    Ok(())
}

fn is_local_network_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || is_unique_local_v6(v6)
                || v6.to_ipv4_mapped().is_some_and(|v4| {
                    v4.is_loopback() || v4.is_private() || v4.is_link_local()
                })
        }
    }
}

fn is_unique_local_v6(v6: Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}
