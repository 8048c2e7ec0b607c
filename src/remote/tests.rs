use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tiny_http::{Header, Method, Request, Response, Server};

use super::{EventHandler, RemoteError, Repository};
use crate::{auth::ScopeManager, Descriptor, MediaType, Reference, ReferrersState};

/// Start a HTTP server in a random port.
///
/// Request are handled in `handler`. The server is stopped when the
/// function returns `false`
///
/// Returns the port number of the server.
pub(super) fn test_http_server<F>(mut handler: F) -> u16
where
    F: FnMut(u16, Request) -> bool,
    F: Send + 'static,
{
    let server = Server::http("127.1:0").expect("start HTTP server");
    let port = server.server_addr().to_ip().unwrap().port();

    std::thread::spawn(move || {
        let timeout = Duration::from_secs(60);
        while let Ok(Some(request)) = server.recv_timeout(timeout) {
            if !handler(port, request) {
                break;
            }
        }
    });

    port
}

fn open_repository(port: u16) -> Repository {
    let reference = format!("127.0.0.1:{port}/abc/def");
    Repository::new(Reference::try_from(reference.as_str()).unwrap())
}

fn subject() -> Descriptor {
    Descriptor::from_content(MediaType::OciManifestV1.as_str(), b"subject")
}

#[derive(Default)]
struct RecordedEvents(Mutex<Vec<String>>);

impl EventHandler for Arc<RecordedEvents> {
    fn registry_request(&self, method: &str, url: &str) {
        self.0.lock().unwrap().push(format!("{method} {url}"));
    }

    fn referrers_state(&self, supported: bool) {
        self.0.lock().unwrap().push(format!("supported={supported}"));
    }
}

#[test]
fn request_token_with_registry_scopes() {
    const SERVICE: &str = "registry.example.com";

    let token_scopes = Arc::new(Mutex::new(Vec::new()));

    let server_port = test_http_server({
        let token_scopes = Arc::clone(&token_scopes);
        move |port, req| {
            // Use the `url` crate to parse the request query.
            let base_url = url::Url::parse("http://0").ok();
            let url_parser = url::Url::options().base_url(base_url.as_ref());

            let req_url = url_parser.parse(req.url()).unwrap();

            let authorization = req
                .headers()
                .iter()
                .find(|h| h.field.equiv("authorization"))
                .map(|h| h.value.to_string());

            let response = match (req_url.path(), authorization) {
                ("/token", None) => {
                    let mut scopes = Vec::new();
                    for (k, v) in req_url.query_pairs() {
                        match &*k {
                            "service" => assert_eq!(v, SERVICE),
                            "scope" => scopes.push(v.into_owned()),
                            _ => panic!("Invalid query: {k:?} = {v:?}"),
                        }
                    }

                    let token = format!("T{}", scopes.join(" "));
                    token_scopes.lock().unwrap().push(scopes.join(" "));

                    Response::from_string(format!(r#"{{"token": "{token}"}}"#))
                }

                (path, None) if path.starts_with("/v2/abc/def/") => {
                    let auth = format!(
                        r#"Bearer realm="http://127.1:{port}/token",service="{SERVICE}",scope="repository:abc/def:pull""#
                    );

                    Response::from_data(vec![])
                        .with_status_code(401)
                        .with_header(Header::from_bytes("WWW-Authenticate", auth).unwrap())
                }

                (_, Some(_)) if *req.method() == Method::Delete => {
                    Response::from_data(vec![]).with_status_code(202)
                }

                _ => Response::from_string("Not Found").with_status_code(404),
            };

            req.respond(response).expect("Send response");

            true
        }
    });

    let repository = open_repository(server_port);
    let subject = subject();

    // The registry requires a token. The index does not exist.
    assert!(matches!(repository.fetch_referrers_index(&subject), Ok(None)));

    // `delete` is added to the scopes, so the previous token is not
    // valid anymore.
    repository.delete_manifest(&subject.digest).unwrap();

    // Scopes are not changed, so the last token is reused.
    assert!(matches!(repository.fetch_referrers_index(&subject), Ok(None)));

    assert_eq!(
        *token_scopes.lock().unwrap(),
        ["repository:abc/def:pull", "repository:abc/def:pull,delete"]
    );

    assert_eq!(
        repository.scopes().get_scope_strings_for_host(&repository.reference().registry),
        ["repository:abc/def:pull,delete"]
    );
}

#[test]
fn missing_challenge_is_an_error() {
    let server_port = test_http_server(|_, req| {
        let response = Response::from_data(vec![]).with_status_code(401);
        req.respond(response).expect("Send response");
        true
    });

    let error = open_repository(server_port).delete_manifest(&subject().digest).unwrap_err();
    assert!(matches!(error, RemoteError::Http(e) if matches!(*e, ureq::Error::Status(401, _))));
}

#[test]
fn detect_referrers_api() {
    // Registry without the referrers API.
    let server_port = test_http_server(|_, req| {
        let response = Response::from_string("Not Found").with_status_code(404);
        req.respond(response).expect("Send response");
        true
    });

    let events = Arc::new(RecordedEvents::default());
    let repository = open_repository(server_port).event_handler(Arc::clone(&events));

    assert_eq!(repository.referrers_state(), ReferrersState::Unknown);
    assert!(!repository.ping_referrers().unwrap());
    assert!(!repository.ping_referrers().unwrap());
    assert_eq!(repository.referrers_state(), ReferrersState::NotSupported);

    // The registry is queried only once.
    assert_eq!(
        *events.0.lock().unwrap(),
        [
            format!(
                "GET http://127.0.0.1:{server_port}/v2/abc/def/referrers/{}",
                super::EMPTY_SHA256
            ),
            "supported=false".to_string(),
        ]
    );

    // Registry with the referrers API.
    let server_port = test_http_server(|_, req| {
        let response = Response::from_string(r#"{"schemaVersion":2,"manifests":[]}"#).with_header(
            Header::from_bytes("Content-Type", MediaType::OciImageIndex.as_str()).unwrap(),
        );
        req.respond(response).expect("Send response");
        true
    });

    let repository = open_repository(server_port);
    assert!(repository.ping_referrers().unwrap());
    assert_eq!(repository.referrers_state(), ReferrersState::Supported);

    // The state can't be changed.
    assert!(repository.set_referrers_state(true).is_ok());
    assert!(matches!(
        repository.set_referrers_state(false),
        Err(RemoteError::ReferrersStateConflict)
    ));
}

#[test]
fn share_scopes_between_repositories() {
    let scopes = Arc::new(ScopeManager::new());

    let server_port = test_http_server(|_, req| {
        let response = Response::from_string("Not Found").with_status_code(404);
        req.respond(response).expect("Send response");
        true
    });

    let first = open_repository(server_port).scope_manager(Arc::clone(&scopes));

    let reference = format!("127.0.0.1:{server_port}/other");
    let second = Repository::new(Reference::try_from(reference.as_str()).unwrap())
        .scope_manager(Arc::clone(&scopes));

    assert!(!first.ping_referrers().unwrap());
    assert!(second.delete_manifest(&subject().digest).unwrap_err().is_not_found());

    assert_eq!(
        scopes.get_scope_strings_for_host(&format!("127.0.0.1:{server_port}")),
        ["repository:abc/def:pull", "repository:other:delete"]
    );
}
