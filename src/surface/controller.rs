use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::errors::ClientError;
use crate::surface::{HostEvent, SurfaceDelegate, SurfaceEvent, SurfaceHost, SurfaceId};
use crate::DEFAULT_CHANNEL_CAPACITY;

/// The controller's view of its surface. It "exists" while `id` is set or creation is
/// still in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurfaceHandle {
    pub id: Option<SurfaceId>,
    pub opening: bool,
    pub focused: bool,
}

impl SurfaceHandle {
    pub fn exists(&self) -> bool {
        self.id.is_some() || self.opening
    }
}

struct Shared {
    name: String,
    host: Arc<dyn SurfaceHost>,
    delegate: Arc<dyn SurfaceDelegate>,
    handle: Mutex<SurfaceHandle>,
    events: broadcast::Sender<SurfaceEvent>,
}

impl Shared {
    fn publish(&self, event: SurfaceEvent) {
        match &event {
            SurfaceEvent::Created(id) => self.delegate.on_created(*id),
            SurfaceEvent::Revealed(id) => self.delegate.on_revealed(*id),
            SurfaceEvent::Closed(id) => self.delegate.on_closed(*id),
            SurfaceEvent::FocusChanged { id, focused } => self.delegate.on_focus_changed(*id, *focused),
            SurfaceEvent::ContentChanged { id, url } => self.delegate.on_content_changed(*id, url),
        }
        log::debug!("{}: {event:?}", self.name);
        // Ignore send error if there are no receivers
        let _ = self.events.send(event);
    }

    /// Applies a host event if it is about our surface.
    fn on_host_event(&self, event: HostEvent) {
        let forwarded = {
            let mut handle = self.handle.lock();
            match event {
                HostEvent::Closed(id) if handle.id == Some(id) => {
                    handle.id = None;
                    handle.focused = false;
                    Some(SurfaceEvent::Closed(id))
                }
                HostEvent::FocusChanged { id, focused } if handle.id == Some(id) => {
                    handle.focused = focused;
                    Some(SurfaceEvent::FocusChanged { id, focused })
                }
                HostEvent::ContentChanged { id, url } if handle.id == Some(id) => {
                    Some(SurfaceEvent::ContentChanged { id, url })
                }
                _ => None,
            }
        };

        if let Some(event) = forwarded {
            self.publish(event);
        }
    }
}

/// Keeps at most one host surface alive for one purpose.
///
/// Host events are subscribed once, in [`new`](Self::new), and only those about the current
/// surface are acted upon. Must be created within a Tokio runtime.
pub struct SurfaceController {
    shared: Arc<Shared>,
    listener: JoinHandle<()>,
}

impl SurfaceController {
    pub fn new(
        name: impl Into<String>,
        host: Arc<dyn SurfaceHost>,
        delegate: Arc<dyn SurfaceDelegate>,
    ) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);
        let mut host_events = host.subscribe();
        let shared = Arc::new(Shared {
            name: name.into(),
            host,
            delegate,
            handle: Mutex::new(SurfaceHandle::default()),
            events,
        });

        let listener_shared = shared.clone();
        let listener = tokio::spawn(async move {
            loop {
                match host_events.recv().await {
                    Ok(event) => listener_shared.on_host_event(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("{}: missed {n} host events", listener_shared.name);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self { shared, listener }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Focuses the existing surface (firing `Revealed`) or creates a new one (firing
    /// `Created`). Calling this while a creation is in flight does nothing.
    pub async fn open(&self) -> Result<(), ClientError> {
        let existing = {
            let mut handle = self.shared.handle.lock();
            if let Some(id) = handle.id {
                Some(id)
            } else if handle.opening {
                log::debug!("{}: open while creation in flight", self.shared.name);
                return Ok(());
            } else {
                handle.opening = true;
                None
            }
        };

        if let Some(id) = existing {
            self.shared.host.focus(id).await?;
            self.shared.handle.lock().focused = true;
            self.shared.publish(SurfaceEvent::Revealed(id));
            return Ok(());
        }

        let payload = self.shared.delegate.creation_payload();
        let focused = payload.focused;
        match self.shared.host.create(payload).await {
            Ok(id) => {
                {
                    let mut handle = self.shared.handle.lock();
                    handle.id = Some(id);
                    handle.opening = false;
                    handle.focused = focused;
                }
                self.shared.publish(SurfaceEvent::Created(id));
                Ok(())
            }
            Err(e) => {
                self.shared.handle.lock().opening = false;
                Err(e)
            }
        }
    }

    /// Closes the surface. No-op if there is none.
    pub async fn close(&self) -> Result<(), ClientError> {
        let id = {
            let mut handle = self.shared.handle.lock();
            let Some(id) = handle.id.take() else {
                return Ok(());
            };
            handle.focused = false;
            id
        };

        self.shared.publish(SurfaceEvent::Closed(id));
        self.shared.host.close(id).await
    }

    pub fn exists(&self) -> bool {
        self.shared.handle.lock().exists()
    }

    pub fn id(&self) -> Option<SurfaceId> {
        self.shared.handle.lock().id
    }

    pub fn handle(&self) -> SurfaceHandle {
        self.shared.handle.lock().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SurfaceEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for SurfaceController {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
