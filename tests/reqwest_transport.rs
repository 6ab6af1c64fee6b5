use http::{HeaderMap, HeaderValue, Method};
use lms_bridge::net::{ApiRequest, ReqwestTransport, Transport};
use lms_bridge::{ApiClient, ClientConfig, ClientError, Cookie};
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn transport_sends_json_and_reports_raw_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/learn/api/v1/streams/ultra"))
        .and(header("x-xsrf", "tok"))
        .and(body_json(json!({"retrieveOnly": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "JSESSIONID=abc; Path=/; HttpOnly")
                .set_body_json(json!({"sv_streamEntries": []})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let mut headers = HeaderMap::new();
    headers.insert("x-xsrf", HeaderValue::from_static("tok"));
    let url = Url::parse(&format!("{}/learn/api/v1/streams/ultra", server.uri())).unwrap();

    let res = transport
        .execute(
            ApiRequest::new(Method::POST, url)
                .with_headers(headers)
                .with_body(json!({"retrieveOnly": true})),
        )
        .await
        .unwrap();

    assert!(res.is_success());
    assert_eq!(res.json_value(), json!({"sv_streamEntries": []}));
    assert_eq!(res.headers["set-cookie"], "JSESSIONID=abc; Path=/; HttpOnly");
}

#[tokio::test]
async fn redirects_are_not_followed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/login"))
        .expect(1)
        .mount(&server)
        .await;

    let transport = ReqwestTransport::new().unwrap();
    let url = Url::parse(&format!("{}/learn/api/v1/users/me", server.uri())).unwrap();
    let res = transport.execute(ApiRequest::new(Method::GET, url)).await.unwrap();

    assert_eq!(res.status, 302);
    assert!(!res.is_success());
}

#[tokio::test]
async fn client_rotates_session_cookie_from_responses() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/learn/api/v1/users/me"))
        .and(header("x-xsrf", "tok"))
        .and(header("cookie", "session_router=id:_1_1,xsrf:tok"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "session_router=id:_1_1,xsrf:tok2; Path=/")
                .set_body_json(json!({"id": "_1_1", "userName": "student"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let config = ClientConfig::builder().base_url(&server.uri()).unwrap().build().unwrap();
    let client = ApiClient::builder(config).build().unwrap();
    client
        .cookie_store()
        .store(vec![Cookie::new("session_router", "id:_1_1,xsrf:tok")]);

    let me = client.users().me().await.unwrap();
    assert_eq!(me["userName"], "student");
    assert_eq!(client.resolver().xsrf().as_deref(), Some("tok2"));
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"message": "private"})))
        .mount(&server)
        .await;

    let config = ClientConfig::builder().base_url(&server.uri()).unwrap().build().unwrap();
    let client = ApiClient::builder(config).build().unwrap();
    client
        .cookie_store()
        .store(vec![Cookie::new("session_router", "id:_1_1,xsrf:tok")]);

    match client.courses().get("_9_1").await {
        Err(ClientError::Api { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body["message"], "private");
        }
        other => panic!("unexpected {other:?}"),
    }
}
