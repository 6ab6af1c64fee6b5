//! The [`ApiClient`] served over the bridge.
//!
//! | layer     | method         | args                 |
//! |-----------|----------------|----------------------|
//! | `courses` | `all`          |                      |
//! | `courses` | `get`          | course id            |
//! | `grades`  | `forCourse`    | course id            |
//! | `grades`  | `forCourses`   | list of course ids   |
//! | `stream`  | `entries`      |                      |
//! | `users`   | `me`           |                      |
//! | `users`   | `get`          | user id              |
//! | `session` | `identity`     |                      |
//! | `session` | `refreshAll`   |                      |
//! | `session` | `watchIdentity`| (subscription)       |
//!
//! Every layer but `session` is gated on an authenticated session.
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::envelope::CallEnvelope;
use super::server::{BridgeServer, CallContext, Layer};
use crate::client::ApiClient;
use crate::reauth::ReauthState;

const UNGATED_LAYER: &str = "session";

/// Rejects calls while no user is signed in or a relogin is in progress.
pub fn auth_ready(client: &ApiClient, call: &CallEnvelope) -> anyhow::Result<()> {
    if call.layer == UNGATED_LAYER {
        return Ok(());
    }
    if client.resolver().user_id().is_none() {
        anyhow::bail!("not signed in");
    }
    if client.reauth().is_some_and(|r| r.state() != ReauthState::Idle) {
        anyhow::bail!("login in progress");
    }
    Ok(())
}

/// Builds a server exposing `client`'s layers.
pub fn api_server(client: ApiClient) -> BridgeServer {
    let gate = client.clone();

    BridgeServer::new()
        .middleware(move |call: &CallEnvelope| {
            let ready = auth_ready(&gate, call);
            async move { ready }
        })
        .layer("courses", courses(&client))
        .layer("grades", grades(&client))
        .layer("stream", stream(&client))
        .layer("users", users(&client))
        .layer("session", session(&client))
}

fn courses(client: &ApiClient) -> Layer {
    let (all, get) = (client.clone(), client.clone());
    Layer::new()
        .method("all", move |_| {
            let client = all.clone();
            async move { anyhow::Ok(client.courses().all().await?) }
        })
        .method("get", move |ctx: CallContext| {
            let client = get.clone();
            async move {
                let id: String = ctx.arg(0)?;
                anyhow::Ok(client.courses().get(&id).await?)
            }
        })
}

fn grades(client: &ApiClient) -> Layer {
    let (one, many) = (client.clone(), client.clone());
    Layer::new()
        .method("forCourse", move |ctx: CallContext| {
            let client = one.clone();
            async move {
                let id: String = ctx.arg(0)?;
                anyhow::Ok(client.grades().for_course(&id).await?)
            }
        })
        .method("forCourses", move |ctx: CallContext| {
            let client = many.clone();
            async move {
                let ids: Vec<String> = ctx.arg(0)?;
                let results = client.grades().for_courses(&ids).await?;
                anyhow::Ok(Value::Array(
                    results
                        .into_iter()
                        .map(|r| match r {
                            Ok(grade) => json!({"ok": grade}),
                            Err(e) => json!({"error": e.to_string()}),
                        })
                        .collect(),
                ))
            }
        })
}

fn stream(client: &ApiClient) -> Layer {
    let client = client.clone();
    Layer::new().method("entries", move |_| {
        let client = client.clone();
        async move { anyhow::Ok(client.stream().entries().await?) }
    })
}

fn users(client: &ApiClient) -> Layer {
    let (me, get) = (client.clone(), client.clone());
    Layer::new()
        .method("me", move |_| {
            let client = me.clone();
            async move { anyhow::Ok(client.users().me().await?) }
        })
        .method("get", move |ctx: CallContext| {
            let client = get.clone();
            async move {
                let id: String = ctx.arg(0)?;
                anyhow::Ok(client.users().get(&id).await?)
            }
        })
}

fn session(client: &ApiClient) -> Layer {
    let (identity, refresh, watch) = (client.clone(), client.clone(), client.clone());
    Layer::new()
        .method("identity", move |_| {
            let id = identity.resolver().identity();
            async move { anyhow::Ok(json!({"userId": id.user_id, "signedIn": id.xsrf_token.is_some()})) }
        })
        .method("refreshAll", move |_| {
            refresh.refresh_all();
            async { anyhow::Ok(Value::Null) }
        })
        .method("watchIdentity", move |ctx: CallContext| {
            let mut changes = watch.cookie_store().subscribe_identity();
            async move {
                if !ctx.is_subscribed() {
                    anyhow::bail!("watchIdentity needs a subscription");
                }
                let events = ctx.clone();
                ctx.spawn_subscription(async move {
                    loop {
                        match changes.recv().await {
                            Ok(change) => {
                                let event = json!({"previous": change.previous, "current": change.current});
                                if events.emit(event).is_err() {
                                    break;
                                }
                            }
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                })?;
                anyhow::Ok(Value::Null)
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{channel_pair, BridgeClient};
    use crate::client::testing::{logged_in_client, FakeTransport};
    use crate::cookies::Cookie;
    use crate::errors::ClientError;
    use futures::StreamExt;
    use std::sync::Arc;

    fn connect(client: ApiClient) -> BridgeClient {
        serve(client).0
    }

    fn serve(client: ApiClient) -> (BridgeClient, Arc<BridgeServer>) {
        let (client_end, server_end) = channel_pair();
        let server = Arc::new(api_server(client));
        server.clone().serve(server_end.stream, server_end.sink);
        (BridgeClient::new(client_end.sink, client_end.stream), server)
    }

    #[tokio::test]
    async fn layers_are_reachable_through_the_bridge() {
        let transport = FakeTransport::new(|req| (200, json!({"path": req.url.path()})));
        let bridge = connect(logged_in_client(transport.clone()));

        let me = bridge.layer("users").call("me", vec![]).await.unwrap();
        assert_eq!(me["path"], "/learn/api/v1/users/me");

        let course = bridge.call("courses", "get", vec![json!("_7_1")]).await.unwrap();
        assert_eq!(course["path"], "/learn/api/v1/courses/_7_1");

        let identity = bridge.call("session", "identity", vec![]).await.unwrap();
        assert_eq!(identity, json!({"userId": "_1_1", "signedIn": true}));
    }

    #[tokio::test]
    async fn calls_are_rejected_until_signed_in() {
        let transport = FakeTransport::new(|_| (200, Value::Null));
        let client = logged_in_client(transport.clone());
        client.cookie_store().clear();
        let bridge = connect(client);

        let err = bridge.call("courses", "all", vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::Bridge(msg) if msg == "not signed in"));
        assert!(transport.requests.lock().is_empty());

        // The session layer stays reachable.
        let identity = bridge.call("session", "identity", vec![]).await.unwrap();
        assert_eq!(identity["signedIn"], false);
    }

    #[tokio::test]
    async fn identity_changes_are_streamed() {
        let transport = FakeTransport::new(|_| (200, Value::Null));
        let client = logged_in_client(transport);
        let bridge = connect(client.clone());

        let mut changes = bridge.subscribe("session", "watchIdentity", vec![]).await.unwrap();
        client
            .cookie_store()
            .store(vec![Cookie::new("session_router", "id:_2_1,xsrf:tok")]);

        assert_eq!(
            changes.next().await.unwrap(),
            json!({"previous": "_1_1", "current": "_2_1"})
        );
    }

    #[tokio::test]
    async fn identity_watch_ends_when_the_caller_drops_it() {
        let transport = FakeTransport::new(|_| (200, Value::Null));
        let client = logged_in_client(transport);
        let (bridge, server) = serve(client.clone());

        let changes = bridge.subscribe("session", "watchIdentity", vec![]).await.unwrap();
        assert_eq!(server.active_subscriptions(), 1);

        drop(changes);
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(server.active_subscriptions(), 0);
    }
}
