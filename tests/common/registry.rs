use std::{
    collections::HashMap,
    io::{Cursor, Read},
    sync::{Arc, Mutex},
    time::Duration,
};

use oci_referrers::{Digest, MediaType, Reference};
use tiny_http::{Header, Method, Request, Response, Server};

/// Content of the registry.
#[derive(Default)]
pub struct State {
    /// Manifests by digest, with their media type.
    pub manifests: HashMap<String, (String, Vec<u8>)>,

    /// Digest for each tag.
    pub tags: HashMap<String, String>,

    /// `METHOD /path` of every request.
    pub requests: Vec<String>,
}

/// In-memory registry with a single repository.
///
/// It implements the manifest endpoints. The referrers API is only
/// available if `referrers_api` is `true`.
pub struct Registry {
    pub port: u16,
    repository: &'static str,
    state: Arc<Mutex<State>>,
}

impl Registry {
    pub fn start(repository: &'static str, referrers_api: bool) -> Registry {
        let server = Server::http("127.1:0").expect("start registry server");
        let port = server.server_addr().to_ip().unwrap().port();

        let state = Arc::new(Mutex::new(State::default()));

        std::thread::spawn({
            let state = Arc::clone(&state);
            let prefix = format!("/v2/{repository}/");

            move || {
                let timeout = Duration::from_secs(30);

                while let Ok(Some(request)) = server.recv_timeout(timeout) {
                    handle(&state, &prefix, referrers_api, request);
                }
            }
        });

        Registry {
            port,
            repository,
            state,
        }
    }

    pub fn reference(&self) -> Reference {
        let reference = format!("127.0.0.1:{}/{}", self.port, self.repository);
        Reference::try_from(reference.as_str()).unwrap()
    }

    pub fn contains(&self, digest: &str) -> bool {
        self.state.lock().unwrap().manifests.contains_key(digest)
    }

    pub fn tag(&self, tag: &str) -> Option<String> {
        self.state.lock().unwrap().tags.get(tag).cloned()
    }

    /// Number of `PUT` requests for `reference`.
    pub fn puts(&self, reference: &str) -> usize {
        let path = format!("PUT /v2/{}/manifests/{reference}", self.repository);
        let state = self.state.lock().unwrap();
        state.requests.iter().filter(|r| **r == path).count()
    }
}

fn handle(state: &Mutex<State>, prefix: &str, referrers_api: bool, mut request: Request) {
    let method = request.method().clone();
    let url = request.url().to_owned();

    let mut state = state.lock().unwrap();
    state.requests.push(format!("{method} {url}"));

    let path = url.strip_prefix(prefix).unwrap_or_default();

    let response = if let Some(reference) = path.strip_prefix("manifests/") {
        match method {
            Method::Get => {
                let digest = state.tags.get(reference).map(String::as_str).unwrap_or(reference);
                match state.manifests.get(digest) {
                    Some((media_type, content)) => response(
                        200,
                        &[
                            ("Content-Type", media_type.as_str()),
                            ("Docker-Content-Digest", digest),
                        ],
                        content.clone(),
                    ),
                    None => not_found(),
                }
            }

            Method::Put => {
                let media_type = header(&request, "Content-Type").unwrap_or_default();

                let mut content = Vec::new();
                request.as_reader().read_to_end(&mut content).unwrap();

                let digest = Digest::sha256(&content).to_string();
                let subject = subject_digest(&content);

                state.manifests.insert(digest.clone(), (media_type, content));
                if !reference.starts_with("sha256:") {
                    state.tags.insert(reference.to_owned(), digest.clone());
                }

                let mut headers = vec![("Docker-Content-Digest", digest.as_str())];
                if let Some(subject) = subject.as_deref().filter(|_| referrers_api) {
                    headers.push(("OCI-Subject", subject));
                }

                response(201, &headers, Vec::new())
            }

            Method::Delete => {
                if state.manifests.remove(reference).is_some() {
                    state.tags.retain(|_, digest| *digest != reference);
                    response(202, &[], Vec::new())
                } else {
                    not_found()
                }
            }

            _ => response(405, &[], Vec::new()),
        }
    } else if path.starts_with("referrers/") && referrers_api {
        response(
            200,
            &[("Content-Type", MediaType::OciImageIndex.as_str())],
            br#"{"schemaVersion":2,"manifests":[]}"#.to_vec(),
        )
    } else {
        not_found()
    };

    drop(state);
    request.respond(response).expect("Send response");
}

fn header(request: &Request, name: &'static str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.equiv(name))
        .map(|h| h.value.to_string())
}

/// Digest in the `subject` field of a manifest.
fn subject_digest(content: &[u8]) -> Option<String> {
    let manifest: serde_json::Value = serde_json::from_slice(content).ok()?;
    Some(manifest["subject"]["digest"].as_str()?.to_owned())
}

fn response(status: u16, headers: &[(&str, &str)], body: Vec<u8>) -> Response<Cursor<Vec<u8>>> {
    headers.iter().fold(
        Response::from_data(body).with_status_code(status),
        |response, (name, value)| response.with_header(Header::from_bytes(*name, *value).unwrap()),
    )
}

fn not_found() -> Response<Cursor<Vec<u8>>> {
    response(404, &[], b"Not Found".to_vec())
}
