//! Host UI surfaces (tabs or windows) and the controller that keeps one of them per purpose.
//!
//! The runtime never creates windows itself. A [`SurfaceHost`] does that (a browser
//! extension API, a desktop shell, a test fake) and reports what happens to its surfaces as
//! [`HostEvent`]s. A [`SurfaceController`] turns that into "at most one surface for this
//! purpose" plus [`SurfaceEvent`]s about it.
mod controller;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use url::Url;

use crate::errors::ClientError;

pub use controller::{SurfaceController, SurfaceHandle};

/// Identifier the host assigned to a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u64);

impl std::fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    Tab,
    Window,
    Popup,
}

/// What to create.
#[derive(Debug, Clone, PartialEq)]
pub struct SurfacePayload {
    pub url: Url,
    pub kind: SurfaceKind,
    pub focused: bool,
}

/// Reported by the host for any surface it manages, not just ours.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    Closed(SurfaceId),
    FocusChanged { id: SurfaceId, focused: bool },
    ContentChanged { id: SurfaceId, url: Url },
}

/// Lifecycle of the surface a controller owns.
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Created(SurfaceId),
    Revealed(SurfaceId),
    Closed(SurfaceId),
    FocusChanged { id: SurfaceId, focused: bool },
    ContentChanged { id: SurfaceId, url: Url },
}

pub trait SurfaceHost: Send + Sync {
    fn create(&self, payload: SurfacePayload) -> BoxFuture<'_, Result<SurfaceId, ClientError>>;
    fn focus(&self, id: SurfaceId) -> BoxFuture<'_, Result<(), ClientError>>;
    fn close(&self, id: SurfaceId) -> BoxFuture<'_, Result<(), ClientError>>;
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;
}

/// Decides what a controller creates and gets told what happens to it.
pub trait SurfaceDelegate: Send + Sync {
    fn creation_payload(&self) -> SurfacePayload;

    fn on_created(&self, _id: SurfaceId) {}
    fn on_revealed(&self, _id: SurfaceId) {}
    fn on_closed(&self, _id: SurfaceId) {}
    fn on_focus_changed(&self, _id: SurfaceId, _focused: bool) {}
    fn on_content_changed(&self, _id: SurfaceId, _url: &Url) {}
}

/// Delegate that always opens the same URL.
pub struct StaticSurface {
    payload: SurfacePayload,
}

impl StaticSurface {
    pub fn new(url: Url, kind: SurfaceKind) -> Self {
        Self {
            payload: SurfacePayload { url, kind, focused: true },
        }
    }
}

impl SurfaceDelegate for StaticSurface {
    fn creation_payload(&self) -> SurfacePayload {
        self.payload.clone()
    }
}
