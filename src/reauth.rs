//! Interactive re-login when the LMS session dies.
//!
//! ```text
//!            relogin()                     landing page reached
//!   Idle ─────────────────▶ LoggingIn ─────────────────────────▶ Idle (all waiters Ok)
//!                              │
//!                              ├── deny() ─────────────────────▶ Idle (all waiters ReloginDenied)
//!                              └── login surface closed ───────▶ Idle (all waiters LoginSurfaceClosed)
//! ```
//!
//! Every caller that hits a 401 while a login is already running joins the same waiter list,
//! so there is only ever one login surface, and all waiters are released in one go.
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::cookies::{CookieLoader, CookieStore};
use crate::errors::ClientError;
use crate::surface::{StaticSurface, SurfaceController, SurfaceEvent, SurfaceHost, SurfaceKind};
use crate::DEFAULT_CHANNEL_CAPACITY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthState {
    Idle,
    LoggingIn,
}

/// How a login round ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReauthOutcome {
    LoggedIn,
    Denied,
    SurfaceClosed,
}

type Waiter = oneshot::Sender<Result<(), ClientError>>;

struct Machine {
    state: ReauthState,
    waiters: Vec<Waiter>,
    /// The landing page was reached and teardown is running.
    settling: bool,
}

pub struct ReauthOrchestrator {
    config: Arc<ClientConfig>,
    primary: Arc<SurfaceController>,
    login: SurfaceController,
    store: Arc<CookieStore>,
    refresher: Option<Arc<dyn CookieLoader>>,
    machine: Mutex<Machine>,
    state_tx: watch::Sender<ReauthState>,
    outcomes: broadcast::Sender<ReauthOutcome>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl ReauthOrchestrator {
    /// `primary` is the client's main UI surface. The login surface is created on `host`
    /// when needed. Must be called within a Tokio runtime.
    pub fn new(
        config: Arc<ClientConfig>,
        primary: Arc<SurfaceController>,
        host: Arc<dyn SurfaceHost>,
        store: Arc<CookieStore>,
        refresher: Option<Arc<dyn CookieLoader>>,
    ) -> Result<Arc<Self>, ClientError> {
        let login_page = StaticSurface::new(config.login_url()?, SurfaceKind::Popup);
        let login = SurfaceController::new("login", host, Arc::new(login_page));
        let mut login_events = login.subscribe();

        let (state_tx, _) = watch::channel(ReauthState::Idle);
        let (outcomes, _) = broadcast::channel(DEFAULT_CHANNEL_CAPACITY);

        let this = Arc::new(Self {
            config,
            primary,
            login,
            store,
            refresher,
            machine: Mutex::new(Machine {
                state: ReauthState::Idle,
                waiters: Vec::new(),
                settling: false,
            }),
            state_tx,
            outcomes,
            listener: Mutex::new(None),
        });

        let weak: Weak<Self> = Arc::downgrade(&this);
        let listener = tokio::spawn(async move {
            loop {
                match login_events.recv().await {
                    Ok(event) => {
                        let Some(this) = weak.upgrade() else { break };
                        this.on_login_event(event).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("reauth: missed {n} login surface events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *this.listener.lock() = Some(listener);

        Ok(this)
    }

    pub fn state(&self) -> ReauthState {
        self.machine.lock().state
    }

    pub fn login_surface(&self) -> &SurfaceController {
        &self.login
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReauthOutcome> {
        self.outcomes.subscribe()
    }

    /// Starts (or joins) an interactive login and waits for it to finish.
    pub async fn relogin(&self) -> Result<(), ClientError> {
        if !self.primary.exists() {
            return Err(ClientError::ExtensionMustBeOpen);
        }

        let (tx, rx) = oneshot::channel();
        let start = {
            let mut m = self.machine.lock();
            m.waiters.push(tx);
            if m.state == ReauthState::Idle {
                m.state = ReauthState::LoggingIn;
                true
            } else {
                false
            }
        };

        if start {
            log::info!("session expired, opening login surface");
            self.state_tx.send_replace(ReauthState::LoggingIn);
            if let Err(e) = self.login.open().await {
                log::warn!("could not open login surface: {e}");
                let msg = e.to_string();
                self.fail_all(ReauthOutcome::SurfaceClosed, || ClientError::Surface(msg.clone()));
            }
        } else {
            log::debug!("relogin already in progress, joining");
        }

        rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// The user declined to log in.
    pub async fn deny(&self) {
        if self.state() != ReauthState::LoggingIn {
            return;
        }
        log::info!("relogin denied");
        self.fail_all(ReauthOutcome::Denied, || ClientError::ReloginDenied);

        if let Err(e) = self.login.close().await {
            log::warn!("could not close login surface: {e}");
        }
    }

    /// Waits for the next successful login. If the login surface is closed first, waits for
    /// one more round before giving up.
    pub async fn wait_for_reload(&self) -> Result<(), ClientError> {
        for attempt in 0..2 {
            let mut outcomes = self.outcomes.subscribe();
            loop {
                match outcomes.recv().await {
                    Ok(ReauthOutcome::LoggedIn) => return Ok(()),
                    Ok(ReauthOutcome::Denied) => return Err(ClientError::ReloginDenied),
                    Ok(ReauthOutcome::SurfaceClosed) => break,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return Err(ClientError::ChannelClosed),
                }
            }
            log::debug!("login surface closed before reload (attempt {})", attempt + 1);
        }
        Err(ClientError::LoginSurfaceClosed)
    }

    /// Resolves immediately when idle, otherwise once the current login round ends.
    pub async fn wait_until_idle(&self) -> Result<(), ClientError> {
        let mut rx = self.state_tx.subscribe();
        rx.wait_for(|s| *s == ReauthState::Idle)
            .await
            .map_err(|_| ClientError::ChannelClosed)?;
        Ok(())
    }

    async fn on_login_event(&self, event: SurfaceEvent) {
        let (logging_in, settling) = {
            let m = self.machine.lock();
            (m.state == ReauthState::LoggingIn, m.settling)
        };
        if !logging_in || settling {
            return;
        }

        match event {
            SurfaceEvent::ContentChanged { url, .. } if self.config.is_landing(&url) => {
                self.complete().await;
            }
            SurfaceEvent::Closed(_) => {
                log::info!("login surface closed before login completed");
                self.fail_all(ReauthOutcome::SurfaceClosed, || ClientError::LoginSurfaceClosed);
            }
            _ => {}
        }
    }

    async fn complete(&self) {
        {
            let mut m = self.machine.lock();
            if m.state != ReauthState::LoggingIn || m.settling {
                return;
            }
            m.settling = true;
        }
        log::info!("login completed");

        if let Err(e) = self.login.close().await {
            log::warn!("could not close login surface: {e}");
        }
        if let Some(loader) = &self.refresher {
            if let Err(e) = loader.load_cookies(&self.store).await {
                log::warn!("cookie refresh after login failed: {e}");
            }
        }
        if let Err(e) = self.primary.open().await {
            log::warn!("could not reveal primary surface: {e}");
        }

        let waiters = {
            let mut m = self.machine.lock();
            m.state = ReauthState::Idle;
            m.settling = false;
            std::mem::take(&mut m.waiters)
        };
        self.state_tx.send_replace(ReauthState::Idle);
        let _ = self.outcomes.send(ReauthOutcome::LoggedIn);

        for waiter in waiters {
            let _ = waiter.send(Ok(()));
        }
    }

    fn fail_all(&self, outcome: ReauthOutcome, error: impl Fn() -> ClientError) {
        let waiters = {
            let mut m = self.machine.lock();
            m.state = ReauthState::Idle;
            m.settling = false;
            std::mem::take(&mut m.waiters)
        };
        self.state_tx.send_replace(ReauthState::Idle);
        let _ = self.outcomes.send(outcome);

        for waiter in waiters {
            let _ = waiter.send(Err(error()));
        }
    }
}

impl Drop for ReauthOrchestrator {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookies::Cookie;
    use crate::session::SessionCookieFormat;
    use crate::surface::testing::FakeHost;
    use crate::surface::HostEvent;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct Fixture {
        host: Arc<FakeHost>,
        primary: Arc<SurfaceController>,
        reauth: Arc<ReauthOrchestrator>,
        store: Arc<CookieStore>,
    }

    struct SessionLoader {
        calls: AtomicUsize,
    }

    impl CookieLoader for SessionLoader {
        fn load_cookies<'a>(&'a self, store: &'a CookieStore) -> BoxFuture<'a, Result<usize, ClientError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = store.store(vec![Cookie::new("session_router", "id:_2_1,xsrf:new")]);
            Box::pin(async move { Ok(n) })
        }
    }

    fn fixture(loader: Option<Arc<dyn CookieLoader>>) -> Fixture {
        let config = Arc::new(ClientConfig::default());
        let host = FakeHost::new();
        let primary = Arc::new(SurfaceController::new(
            "primary",
            host.clone(),
            Arc::new(StaticSurface::new(config.landing_url().unwrap(), SurfaceKind::Tab)),
        ));
        let store = CookieStore::new(config.target_host(), SessionCookieFormat::default());
        let reauth =
            ReauthOrchestrator::new(config, primary.clone(), host.clone(), store.clone(), loader).unwrap();
        Fixture { host, primary, reauth, store }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    fn spawn_relogin(reauth: &Arc<ReauthOrchestrator>) -> JoinHandle<Result<(), ClientError>> {
        let r = reauth.clone();
        tokio::spawn(async move { r.relogin().await })
    }

    #[tokio::test]
    async fn relogin_requires_primary_surface() {
        let f = fixture(None);
        assert!(matches!(f.reauth.relogin().await, Err(ClientError::ExtensionMustBeOpen)));
        assert_eq!(f.reauth.state(), ReauthState::Idle);
        assert!(f.host.created.lock().is_empty());
    }

    #[tokio::test]
    async fn concurrent_relogins_share_one_login() {
        let loader = Arc::new(SessionLoader { calls: AtomicUsize::new(0) });
        let f = fixture(Some(loader.clone()));
        f.primary.open().await.unwrap();
        let primary_id = f.primary.id().unwrap();

        let a = spawn_relogin(&f.reauth);
        let b = spawn_relogin(&f.reauth);
        settle().await;

        assert_eq!(f.reauth.state(), ReauthState::LoggingIn);
        // primary + exactly one login surface
        assert_eq!(f.host.created.lock().len(), 2);
        let login_id = f.reauth.login_surface().id().unwrap();

        f.host.emit(HostEvent::ContentChanged {
            id: login_id,
            url: Url::parse("https://learn.example.com/webapps/portal").unwrap(),
        });
        settle().await;
        assert_eq!(f.reauth.state(), ReauthState::LoggingIn);

        f.host.emit(HostEvent::ContentChanged {
            id: login_id,
            url: Url::parse("https://learn.example.com/ultra/stream").unwrap(),
        });

        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();
        assert_eq!(f.reauth.state(), ReauthState::Idle);
        assert!(!f.reauth.login_surface().exists());
        assert!(f.host.focused.lock().contains(&primary_id));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.store.identity().user_id.as_deref(), Some("_2_1"));
    }

    #[tokio::test]
    async fn deny_rejects_every_waiter() {
        let f = fixture(None);
        f.primary.open().await.unwrap();

        let a = spawn_relogin(&f.reauth);
        let b = spawn_relogin(&f.reauth);
        settle().await;

        f.reauth.deny().await;
        assert!(matches!(a.await.unwrap(), Err(ClientError::ReloginDenied)));
        assert!(matches!(b.await.unwrap(), Err(ClientError::ReloginDenied)));
        assert_eq!(f.reauth.state(), ReauthState::Idle);
        assert_eq!(f.host.closed.lock().len(), 1);
    }

    #[tokio::test]
    async fn external_close_fails_instead_of_hanging() {
        let f = fixture(None);
        f.primary.open().await.unwrap();

        let a = spawn_relogin(&f.reauth);
        let b = spawn_relogin(&f.reauth);
        settle().await;

        let login_id = f.reauth.login_surface().id().unwrap();
        f.host.emit(HostEvent::Closed(login_id));

        assert!(matches!(a.await.unwrap(), Err(ClientError::LoginSurfaceClosed)));
        assert!(matches!(b.await.unwrap(), Err(ClientError::LoginSurfaceClosed)));
        assert_eq!(f.reauth.state(), ReauthState::Idle);
    }

    #[tokio::test]
    async fn wait_for_reload_survives_one_closed_surface() {
        let f = fixture(None);
        f.primary.open().await.unwrap();

        let r = f.reauth.clone();
        let waiting = tokio::spawn(async move { r.wait_for_reload().await });
        settle().await;

        let first = spawn_relogin(&f.reauth);
        settle().await;
        f.host.emit(HostEvent::Closed(f.reauth.login_surface().id().unwrap()));
        assert!(first.await.unwrap().is_err());

        let second = spawn_relogin(&f.reauth);
        settle().await;
        f.host.emit(HostEvent::ContentChanged {
            id: f.reauth.login_surface().id().unwrap(),
            url: Url::parse("https://learn.example.com/ultra").unwrap(),
        });

        second.await.unwrap().unwrap();
        waiting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn wait_until_idle_blocks_during_login() {
        let f = fixture(None);
        f.primary.open().await.unwrap();
        f.reauth.wait_until_idle().await.unwrap();

        let a = spawn_relogin(&f.reauth);
        settle().await;

        let r = f.reauth.clone();
        let idle = tokio::spawn(async move { r.wait_until_idle().await });
        settle().await;
        assert!(!idle.is_finished());

        f.reauth.deny().await;
        idle.await.unwrap().unwrap();
        assert!(a.await.unwrap().is_err());
    }
}
