//! Route-level tests for the plugin protocol.

use super::*;
use axum::body::{Body, to_bytes};
use axum::http::Request;
use chrono::{TimeZone, Utc};
use rstest::rstest;
use serde_json::{Value, json};
use tower::ServiceExt;

use crate::driver::Scope;

#[derive(Debug, Default)]
struct StubPlugin {
    fail_with: Option<String>,
}

impl StubPlugin {
    fn failing(message: &str) -> Self {
        Self {
            fail_with: Some(message.to_owned()),
        }
    }

    fn outcome<T>(&self, value: T) -> Result<T, PluginError> {
        self.fail_with
            .as_ref()
            .map_or(Ok(value), |message| Err(PluginError::new(message.clone())))
    }
}

impl VolumePlugin for StubPlugin {
    fn create<'a>(
        &'a self,
        name: &'a str,
        options: &'a BTreeMap<String, String>,
    ) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            assert_eq!(name, "data");
            assert_eq!(options.get("size").map(String::as_str), Some("10"));
            self.outcome(())
        })
    }

    fn remove<'a>(&'a self, _name: &'a str) -> PluginFuture<'a, ()> {
        Box::pin(async move { self.outcome(()) })
    }

    fn get<'a>(&'a self, name: &'a str) -> PluginFuture<'a, VolumeInfo> {
        Box::pin(async move {
            self.outcome(VolumeInfo {
                name: name.to_owned(),
                mountpoint: Some(Utf8PathBuf::from("/mnt/req-1")),
                created_at: Utc
                    .with_ymd_and_hms(2024, 5, 1, 10, 0, 0)
                    .single()
                    .unwrap_or_default(),
                status: BTreeMap::from([(String::from("mounted"), Value::Bool(true))]),
            })
        })
    }

    fn list(&self) -> PluginFuture<'_, Vec<VolumeSummary>> {
        Box::pin(async move {
            self.outcome(vec![
                VolumeSummary {
                    name: String::from("data"),
                    mountpoint: Some(Utf8PathBuf::from("/mnt/req-1")),
                },
                VolumeSummary {
                    name: String::from("cache"),
                    mountpoint: None,
                },
            ])
        })
    }

    fn path<'a>(&'a self, _name: &'a str) -> PluginFuture<'a, Option<Utf8PathBuf>> {
        Box::pin(async move { self.outcome(None) })
    }

    fn mount<'a>(&'a self, _name: &'a str, id: &'a str) -> PluginFuture<'a, Utf8PathBuf> {
        Box::pin(async move { self.outcome(Utf8PathBuf::from("/mnt").join(id)) })
    }

    fn unmount<'a>(&'a self, _name: &'a str, _id: &'a str) -> PluginFuture<'a, ()> {
        Box::pin(async move { self.outcome(()) })
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            scope: Scope::Global,
        }
    }
}

async fn call(plugin: StubPlugin, route: &str, body: &str) -> (StatusCode, Value) {
    let response = router(Arc::new(plugin))
        .oneshot(
            Request::post(route)
                .body(Body::from(body.to_owned()))
                .unwrap_or_else(|err| panic!("request: {err}")),
        )
        .await
        .unwrap_or_else(|err| panic!("router is infallible: {err}"));
    let status = response.status();
    assert_eq!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok()),
        Some(PLUGIN_CONTENT_TYPE)
    );
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_else(|err| panic!("body: {err}"));
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|err| panic!("json: {err}"));
    (status, value)
}

#[tokio::test]
async fn activate_announces_volume_driver() {
    let (status, body) = call(StubPlugin::default(), "/Plugin.Activate", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Implements": ["VolumeDriver"]}));
}

#[tokio::test]
async fn create_forwards_name_and_options() {
    let (status, body) = call(
        StubPlugin::default(),
        "/VolumeDriver.Create",
        r#"{"Name":"data","Opts":{"size":"10"}}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Err": ""}));
}

#[tokio::test]
async fn failures_surface_message_in_err_field() {
    let (status, body) = call(
        StubPlugin::failing("volume docker-data not found"),
        "/VolumeDriver.Remove",
        r#"{"Name":"data"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"Err": "volume docker-data not found"}));
}

#[rstest]
#[case("/VolumeDriver.Create", "{not json")]
#[case("/VolumeDriver.Mount", r#"{"Name":"data"}"#)]
#[case("/VolumeDriver.Get", "")]
#[tokio::test]
async fn malformed_requests_are_rejected(#[case] route: &str, #[case] body: &str) {
    let (status, reply) = call(StubPlugin::default(), route, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(
        reply["Err"]
            .as_str()
            .is_some_and(|message| message.starts_with("malformed request"))
    );
}

#[tokio::test]
async fn get_reports_volume_body() {
    let (status, body) = call(StubPlugin::default(), "/VolumeDriver.Get", r#"{"Name":"data"}"#).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "Volume": {
                "Name": "data",
                "Mountpoint": "/mnt/req-1",
                "CreatedAt": "2024-05-01T10:00:00+00:00",
                "Status": {"mounted": true}
            },
            "Err": ""
        })
    );
}

#[tokio::test]
async fn list_omits_missing_mountpoints() {
    let (status, body) = call(StubPlugin::default(), "/VolumeDriver.List", "").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "Volumes": [
                {"Name": "data", "Mountpoint": "/mnt/req-1"},
                {"Name": "cache"}
            ],
            "Err": ""
        })
    );
}

#[tokio::test]
async fn mount_returns_mountpoint_under_root() {
    let (status, body) = call(
        StubPlugin::default(),
        "/VolumeDriver.Mount",
        r#"{"Name":"data","ID":"req-1"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Mountpoint": "/mnt/req-1", "Err": ""}));
}

#[tokio::test]
async fn path_of_unmounted_volume_is_empty() {
    let (_, body) = call(StubPlugin::default(), "/VolumeDriver.Path", r#"{"Name":"data"}"#).await;
    assert_eq!(body, json!({"Mountpoint": "", "Err": ""}));
}

#[tokio::test]
async fn unmount_acknowledges() {
    let (status, body) = call(
        StubPlugin::default(),
        "/VolumeDriver.Unmount",
        r#"{"Name":"data","ID":"req-1"}"#,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"Err": ""}));
}

#[tokio::test]
async fn capabilities_report_global_scope() {
    let (_, body) = call(StubPlugin::default(), "/VolumeDriver.Capabilities", "").await;
    assert_eq!(body, json!({"Capabilities": {"Scope": "global"}}));
}
