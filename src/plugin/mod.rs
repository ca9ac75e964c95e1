//! Docker volume plugin protocol served over a Unix socket.
//!
//! Docker posts JSON bodies to `/Plugin.Activate` and `/VolumeDriver.*`
//! routes. Each handler decodes the request, forwards it to a
//! [`VolumePlugin`] and encodes the result, reporting failures through the
//! `Err` field.

mod types;

use std::collections::BTreeMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::net::UnixListener;
use tracing::{error, info};

use crate::backend::{ActionWaiter, ServerApi, VolumeApi};
use crate::driver::{Capabilities, DriverError, VolumeDriver, VolumeInfo, VolumeSummary};
use crate::host::Host;

pub use types::{
    ActivateResponse, CapabilitiesBody, CapabilitiesResponse, CreateRequest, ErrResponse,
    GetResponse, ListResponse, MountRequest, MountpointResponse, NameRequest, VolumeBody,
};

/// Media type Docker uses for plugin messages.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Boxed future returned by [`VolumePlugin`] operations.
pub type PluginFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, PluginError>> + Send + 'a>>;

/// Failure surfaced verbatim in a response's `Err` field.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{message}")]
pub struct PluginError {
    /// Human-readable message.
    pub message: String,
}

impl PluginError {
    /// Wraps a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl<E> From<DriverError<E>> for PluginError
where
    E: std::error::Error + 'static,
{
    fn from(err: DriverError<E>) -> Self {
        Self::new(err.to_string())
    }
}

/// Operations the protocol layer needs from a volume driver.
pub trait VolumePlugin: Send + Sync {
    /// Creates a volume.
    fn create<'a>(
        &'a self,
        name: &'a str,
        options: &'a BTreeMap<String, String>,
    ) -> PluginFuture<'a, ()>;
    /// Removes a volume.
    fn remove<'a>(&'a self, name: &'a str) -> PluginFuture<'a, ()>;
    /// Describes a volume.
    fn get<'a>(&'a self, name: &'a str) -> PluginFuture<'a, VolumeInfo>;
    /// Lists volumes.
    fn list(&self) -> PluginFuture<'_, Vec<VolumeSummary>>;
    /// Reports a volume's mountpoint.
    fn path<'a>(&'a self, name: &'a str) -> PluginFuture<'a, Option<Utf8PathBuf>>;
    /// Mounts a volume for `id`.
    fn mount<'a>(&'a self, name: &'a str, id: &'a str) -> PluginFuture<'a, Utf8PathBuf>;
    /// Unmounts a volume for `id`.
    fn unmount<'a>(&'a self, name: &'a str, id: &'a str) -> PluginFuture<'a, ()>;
    /// Reports driver capabilities.
    fn capabilities(&self) -> Capabilities;
}

impl<B, H> VolumePlugin for VolumeDriver<B, H>
where
    B: VolumeApi + ServerApi + ActionWaiter,
    H: Host,
{
    fn create<'a>(
        &'a self,
        name: &'a str,
        options: &'a BTreeMap<String, String>,
    ) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            Self::create(self, name, options)
                .await
                .map(drop)
                .map_err(PluginError::from)
        })
    }

    fn remove<'a>(&'a self, name: &'a str) -> PluginFuture<'a, ()> {
        Box::pin(async move { Self::remove(self, name).await.map_err(PluginError::from) })
    }

    fn get<'a>(&'a self, name: &'a str) -> PluginFuture<'a, VolumeInfo> {
        Box::pin(async move { Self::get(self, name).await.map_err(PluginError::from) })
    }

    fn list(&self) -> PluginFuture<'_, Vec<VolumeSummary>> {
        Box::pin(async move { Self::list(self).await.map_err(PluginError::from) })
    }

    fn path<'a>(&'a self, name: &'a str) -> PluginFuture<'a, Option<Utf8PathBuf>> {
        Box::pin(async move { Self::path(self, name).await.map_err(PluginError::from) })
    }

    fn mount<'a>(&'a self, name: &'a str, id: &'a str) -> PluginFuture<'a, Utf8PathBuf> {
        Box::pin(async move { Self::mount(self, name, id).await.map_err(PluginError::from) })
    }

    fn unmount<'a>(&'a self, name: &'a str, id: &'a str) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            Self::unmount(self, name, id)
                .await
                .map(drop)
                .map_err(PluginError::from)
        })
    }

    fn capabilities(&self) -> Capabilities {
        Self::capabilities(self)
    }
}

/// Shared handle to the plugin implementation.
pub type SharedPlugin = Arc<dyn VolumePlugin>;

/// Errors raised while serving the plugin socket.
#[derive(Debug, Error)]
pub enum ServeError {
    /// Raised when the socket path cannot be prepared or bound.
    #[error("binding plugin socket {path}: {source}")]
    Bind {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Raised when the server loop fails.
    #[error("serving plugin socket {path}: {source}")]
    Serve {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Builds the protocol router.
pub fn router(plugin: SharedPlugin) -> Router {
    Router::new()
        .route("/Plugin.Activate", post(activate))
        .route("/VolumeDriver.Create", post(create))
        .route("/VolumeDriver.Remove", post(remove))
        .route("/VolumeDriver.Get", post(get))
        .route("/VolumeDriver.List", post(list))
        .route("/VolumeDriver.Path", post(path))
        .route("/VolumeDriver.Mount", post(mount))
        .route("/VolumeDriver.Unmount", post(unmount))
        .route("/VolumeDriver.Capabilities", post(capabilities))
        .with_state(plugin)
}

/// Serves the protocol on `socket` until `shutdown` resolves.
///
/// A stale socket file left by a previous run is removed before binding.
///
/// # Errors
///
/// Returns [`ServeError`] when the socket cannot be bound or the server
/// loop fails.
pub async fn serve<F>(socket: &Utf8Path, plugin: SharedPlugin, shutdown: F) -> Result<(), ServeError>
where
    F: Future<Output = ()> + Send + 'static,
{
    let bind_error = |source| ServeError::Bind {
        path: socket.to_path_buf(),
        source,
    };
    if let Some(parent) = socket.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(bind_error)?;
    }
    match tokio::fs::remove_file(socket).await {
        Ok(()) => info!(%socket, "removed stale plugin socket"),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => return Err(bind_error(err)),
    }

    let listener = UnixListener::bind(socket).map_err(bind_error)?;
    info!(%socket, "plugin listening");
    axum::serve(listener, router(plugin))
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|source| ServeError::Serve {
            path: socket.to_path_buf(),
            source,
        })?;
    info!(%socket, "plugin stopped");
    Ok(())
}

fn reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_vec(body) {
        Ok(encoded) => {
            (status, [(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], encoded).into_response()
        }
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

fn decode<T: DeserializeOwned>(body: &Bytes) -> Result<T, Response> {
    let raw: &[u8] = if body.iter().all(u8::is_ascii_whitespace) {
        b"{}"
    } else {
        body
    };
    serde_json::from_slice(raw).map_err(|err| {
        reply(
            StatusCode::BAD_REQUEST,
            &ErrResponse::failed(format!("malformed request: {err}")),
        )
    })
}

fn failure<T: Serialize>(route: &str, err: &PluginError, body: &T) -> Response {
    error!(route, error = %err, "plugin request failed");
    reply(StatusCode::INTERNAL_SERVER_ERROR, body)
}

async fn activate() -> Response {
    reply(
        StatusCode::OK,
        &ActivateResponse {
            implements: vec!["VolumeDriver"],
        },
    )
}

async fn create(State(plugin): State<SharedPlugin>, body: Bytes) -> Response {
    let request: CreateRequest = match decode(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    let options = request.opts.unwrap_or_default();
    match plugin.create(&request.name, &options).await {
        Ok(()) => reply(StatusCode::OK, &ErrResponse::default()),
        Err(err) => failure("create", &err, &ErrResponse::failed(err.message.clone())),
    }
}

async fn remove(State(plugin): State<SharedPlugin>, body: Bytes) -> Response {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    match plugin.remove(&request.name).await {
        Ok(()) => reply(StatusCode::OK, &ErrResponse::default()),
        Err(err) => failure("remove", &err, &ErrResponse::failed(err.message.clone())),
    }
}

async fn get(State(plugin): State<SharedPlugin>, body: Bytes) -> Response {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    match plugin.get(&request.name).await {
        Ok(info) => reply(
            StatusCode::OK,
            &GetResponse {
                volume: Some(info.into()),
                err: String::new(),
            },
        ),
        Err(err) => failure(
            "get",
            &err,
            &GetResponse {
                volume: None,
                err: err.message.clone(),
            },
        ),
    }
}

async fn list(State(plugin): State<SharedPlugin>) -> Response {
    match plugin.list().await {
        Ok(volumes) => reply(
            StatusCode::OK,
            &ListResponse {
                volumes: volumes.into_iter().map(VolumeBody::from).collect(),
                err: String::new(),
            },
        ),
        Err(err) => failure(
            "list",
            &err,
            &ListResponse {
                volumes: Vec::new(),
                err: err.message.clone(),
            },
        ),
    }
}

async fn path(State(plugin): State<SharedPlugin>, body: Bytes) -> Response {
    let request: NameRequest = match decode(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    match plugin.path(&request.name).await {
        Ok(mountpoint) => reply(
            StatusCode::OK,
            &MountpointResponse {
                mountpoint: mountpoint.map(String::from).unwrap_or_default(),
                err: String::new(),
            },
        ),
        Err(err) => failure(
            "path",
            &err,
            &MountpointResponse {
                mountpoint: String::new(),
                err: err.message.clone(),
            },
        ),
    }
}

async fn mount(State(plugin): State<SharedPlugin>, body: Bytes) -> Response {
    let request: MountRequest = match decode(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    match plugin.mount(&request.name, &request.id).await {
        Ok(mountpoint) => reply(
            StatusCode::OK,
            &MountpointResponse {
                mountpoint: mountpoint.into_string(),
                err: String::new(),
            },
        ),
        Err(err) => failure(
            "mount",
            &err,
            &MountpointResponse {
                mountpoint: String::new(),
                err: err.message.clone(),
            },
        ),
    }
}

async fn unmount(State(plugin): State<SharedPlugin>, body: Bytes) -> Response {
    let request: MountRequest = match decode(&body) {
        Ok(request) => request,
        Err(rejection) => return rejection,
    };
    match plugin.unmount(&request.name, &request.id).await {
        Ok(()) => reply(StatusCode::OK, &ErrResponse::default()),
        Err(err) => failure("unmount", &err, &ErrResponse::failed(err.message.clone())),
    }
}

async fn capabilities(State(plugin): State<SharedPlugin>) -> Response {
    reply(
        StatusCode::OK,
        &CapabilitiesResponse {
            capabilities: CapabilitiesBody {
                scope: plugin.capabilities().scope.as_str(),
            },
        },
    )
}

#[cfg(test)]
mod tests;
