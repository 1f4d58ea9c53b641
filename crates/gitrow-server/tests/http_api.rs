//! The router served on a loopback port, driven by the real wire client

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use common::{update, Fixture};
use gitrow_server::{AppState, Backend};
use libgitrow_core::config::{HelperConfig, ServerConfig};
use libgitrow_wire::{Credential, CredentialProvider, RemoteLocation, WireClient, WireError};
use tokio::net::TcpListener;

struct Token(&'static str);

#[async_trait]
impl CredentialProvider for Token {
    async fn fetch(&self) -> Result<Credential, WireError> {
        Ok(Credential::new(self.0))
    }

    fn name(&self) -> &str {
        "test"
    }
}

async fn start(fx: &Fixture, tokens: &[&str]) -> (String, Arc<Backend>) {
    let config = ServerConfig {
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        ..fx.config()
    };
    let backend = Arc::new(Backend::open(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(gitrow_server::serve(
        listener,
        AppState::new(backend.clone()),
        std::future::pending(),
    ));
    (base, backend)
}

fn client(base: &str, token: &'static str, multipart: bool) -> WireClient {
    let location = RemoteLocation::parse(&format!("gitrow::{}/orgs/acme/repos/widgets", base)).unwrap();
    let config = HelperConfig {
        multipart,
        initial_backoff_ms: 1,
        max_backoff_ms: 5,
        ..HelperConfig::default()
    };
    WireClient::new(location, Arc::new(Token(token)), &config).unwrap()
}

#[tokio::test]
async fn test_push_list_fetch_over_http() {
    let fx = Fixture::new();
    let a = fx.commit("README", "hello", &[]);
    let pack = fx.pack(&[a], &[]);
    let (base, _backend) = start(&fx, &["secret"]).await;
    let client = client(&base, "secret", true);

    let outcome = client
        .push(&[update(a, "refs/heads/main", false)], &pack)
        .await
        .unwrap();
    assert!(outcome.ok);
    assert!(client.uses_multipart());

    let refs = client.list_refs().await.unwrap();
    assert_eq!(refs.refs.len(), 1);
    assert_eq!(refs.refs[0].target_sha, a.to_string());
    assert_eq!(refs.head.unwrap().target, "refs/heads/main");

    let fetched = client.fetch(None).await.unwrap().unwrap();
    assert_eq!(fetched.pack_bytes().unwrap(), pack);
    assert_eq!(fetched.keep, Some(true));

    let wanted = client.fetch(Some(vec![a.to_string()])).await.unwrap().unwrap();
    assert_eq!(wanted.keep, Some(false));
    assert!(client.fetch(Some(vec!["4".repeat(40)])).await.unwrap().is_none());
}

#[tokio::test]
async fn test_json_push_body() {
    let fx = Fixture::new();
    let a = fx.commit("f", "a", &[]);
    let b = fx.commit("f", "b", &[a]);
    let (base, backend) = start(&fx, &[]).await;
    let client = client(&base, "anything", false);

    let first = client
        .push(&[update(a, "refs/heads/main", false)], &fx.pack(&[a], &[]))
        .await
        .unwrap();
    assert!(first.ok);
    let second = client
        .push(&[update(b, "refs/heads/main", false)], &fx.pack(&[b], &[a]))
        .await
        .unwrap();
    assert!(second.ok);
    assert_eq!(backend.store().pack_count("acme", "widgets"), 2);
}

#[tokio::test]
async fn test_wrong_token_is_auth_error() {
    let fx = Fixture::new();
    let (base, _backend) = start(&fx, &["secret"]).await;
    let err = client(&base, "guess", true).list_refs().await.unwrap_err();
    assert!(err.is_auth(), "{:?}", err);
}

#[tokio::test]
async fn test_error_bodies_and_health() {
    let fx = Fixture::new();
    let (base, _backend) = start(&fx, &["secret"]).await;
    let http = reqwest::Client::new();

    let health = http.get(format!("{}/health", base)).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 200);

    let resp = http
        .post(format!("{}/orgs/acme/repos/widgets/git/push", base))
        .bearer_auth("secret")
        .header("content-type", "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 415);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "unsupported_media_type");

    let resp = http
        .post(format!("{}/orgs/acme/repos/widgets/git/push", base))
        .bearer_auth("secret")
        .json(&serde_json::json!({ "updates": [{"src": "a", "dst": "refs/heads/x"}], "pack": "***" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 422);

    let resp = http
        .post(format!("{}/orgs/acme/repos/widgets/git/fetch", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
}
