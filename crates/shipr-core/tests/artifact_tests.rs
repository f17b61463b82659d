//! Bundle fetch and verification gates.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use tempfile::TempDir;

use shipr_core::artifact::{sha256_file, ArtifactVerifier, ScriptKind};
use shipr_core::cli::ProgressManager;
use shipr_core::fetch::{CancelToken, Fetcher};
use shipr_core::http::HttpClient;
use shipr_core::trust::{SignatureBackend, VerifyOutcome};
use shipr_core::Result;

fn spawn_server(routes: Vec<(&'static str, u16, Vec<u8>)>) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().to_ip().unwrap().port();

    thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let found = routes.iter().find(|(path, _, _)| url == *path);
            let response = match found {
                Some((_, status, body)) => {
                    tiny_http::Response::from_data(body.clone()).with_status_code(*status)
                }
                None => tiny_http::Response::from_data(b"not found".to_vec()).with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });

    format!("http://127.0.0.1:{}", port)
}

fn fetcher() -> Fetcher {
    Fetcher::new(
        Arc::new(HttpClient::new().unwrap()),
        Arc::new(ProgressManager::new(false)),
    )
}

/// Backend returning a fixed verdict and recording what it was asked.
struct StubBackend {
    outcome: VerifyOutcome,
    calls: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl StubBackend {
    fn new(outcome: VerifyOutcome) -> Arc<Self> {
        Arc::new(Self {
            outcome,
            calls: Mutex::new(Vec::new()),
        })
    }
}

impl SignatureBackend for StubBackend {
    fn verify(&self, file: &Path, signature: &Path) -> Result<VerifyOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push((file.to_path_buf(), signature.to_path_buf()));
        Ok(self.outcome)
    }
}

fn verifier(
    base: &str,
    dest: &Path,
    backend: Arc<StubBackend>,
) -> ArtifactVerifier<StubBackend> {
    ArtifactVerifier::new(fetcher(), backend)
        .unwrap()
        .with_base_url(base)
        .with_dest_dir(dest.to_path_buf())
}

#[test]
fn test_bundle_urls_derivation() {
    let backend = StubBackend::new(VerifyOutcome::Valid);
    let dir = TempDir::new().unwrap();
    let verifier = verifier("https://example.com/bucket", dir.path(), backend);

    let (script, signature) = verifier.bundle_urls(ScriptKind::Install, "v1.2.3");
    assert_eq!(
        script,
        "https://example.com/bucket/nimbus-install-v1.2.3.sh"
    );
    assert_eq!(
        signature,
        "https://example.com/bucket/nimbus-install-v1.2.3.sig"
    );
}

#[tokio::test]
async fn test_bundle_valid_signature_succeeds() {
    let base = spawn_server(vec![
        ("/nimbus-install-v1.2.3.sh", 200, b"#!/bin/sh\n".to_vec()),
        ("/nimbus-install-v1.2.3.sig", 200, b"detached".to_vec()),
    ]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Valid);
    let verifier = verifier(&base, dir.path(), Arc::clone(&backend));

    let ok = verifier
        .get_script_bundle(ScriptKind::Install, "v1.2.3", &CancelToken::new())
        .await;
    assert!(ok);

    // Both halves of the bundle landed, and the keyring saw those two paths.
    let script = dir.path().join("nimbus-install-v1.2.3.sh");
    let signature = dir.path().join("nimbus-install-v1.2.3.sig");
    assert!(script.is_file());
    assert!(signature.is_file());

    let calls = backend.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], (script.clone(), signature));

    // Owner-only rwx; the executable bit carries no trust either way.
    let mode = fs::metadata(&script).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o700);
}

#[tokio::test]
async fn test_bundle_bad_signature_fails() {
    let base = spawn_server(vec![
        ("/nimbus-install-v1.2.3.sh", 200, b"#!/bin/sh\n".to_vec()),
        ("/nimbus-install-v1.2.3.sig", 200, b"detached".to_vec()),
    ]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Bad);
    let verifier = verifier(&base, dir.path(), backend);

    let ok = verifier
        .get_script_bundle(ScriptKind::Install, "v1.2.3", &CancelToken::new())
        .await;
    assert!(!ok);
}

#[tokio::test]
async fn test_bundle_indeterminate_verdict_fails() {
    // An unconfirmed signature gates exactly like a bad one.
    let base = spawn_server(vec![
        ("/nimbus-debug-v2.0.0.sh", 200, b"#!/bin/sh\n".to_vec()),
        ("/nimbus-debug-v2.0.0.sig", 200, b"detached".to_vec()),
    ]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Indeterminate);
    let verifier = verifier(&base, dir.path(), backend);

    let ok = verifier
        .get_script_bundle(ScriptKind::Debug, "v2.0.0", &CancelToken::new())
        .await;
    assert!(!ok);
}

#[tokio::test]
async fn test_bundle_download_failure_is_false_not_error() {
    let base = spawn_server(vec![(
        "/nimbus-install-v1.2.3.sh",
        200,
        b"#!/bin/sh\n".to_vec(),
    )]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Valid);
    let verifier = verifier(&base, dir.path(), Arc::clone(&backend));

    // The signature 404s; the whole bundle fails quietly.
    let ok = verifier
        .get_script_bundle(ScriptKind::Install, "v1.2.3", &CancelToken::new())
        .await;
    assert!(!ok);
    assert!(backend.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_verified_accepts_exact_digest() {
    let body = b"validator-binary-bytes".to_vec();
    let base = spawn_server(vec![("/goss-linux-amd64", 200, body.clone())]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Valid);
    let verifier = verifier(&base, dir.path(), backend);

    let reference = dir.path().join("reference");
    fs::write(&reference, &body).unwrap();
    let digest = sha256_file(&reference).unwrap();

    let dest = dir.path().join("goss-linux-amd64");
    let ok = verifier
        .fetch_verified(
            &format!("{}/goss-linux-amd64", base),
            &dest,
            &digest,
            &CancelToken::new(),
        )
        .await;
    assert!(ok);
    assert_eq!(fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn test_fetch_verified_rejects_single_character_drift() {
    let body = b"validator-binary-bytes".to_vec();
    let base = spawn_server(vec![("/goss-linux-amd64", 200, body.clone())]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Valid);
    let verifier = verifier(&base, dir.path(), backend);

    let reference = dir.path().join("reference");
    fs::write(&reference, &body).unwrap();
    let digest = sha256_file(&reference).unwrap();
    let mut wrong = digest.clone();
    let flipped = if wrong.ends_with('0') { "1" } else { "0" };
    wrong.replace_range(wrong.len() - 1.., flipped);

    let dest = dir.path().join("goss-linux-amd64");
    let ok = verifier
        .fetch_verified(
            &format!("{}/goss-linux-amd64", base),
            &dest,
            &wrong,
            &CancelToken::new(),
        )
        .await;
    assert!(!ok);
}

#[tokio::test]
async fn test_fetch_verified_download_failure_is_false() {
    let base = spawn_server(vec![]);
    let dir = TempDir::new().unwrap();
    let backend = StubBackend::new(VerifyOutcome::Valid);
    let verifier = verifier(&base, dir.path(), backend);

    let dest = dir.path().join("goss-linux-amd64");
    let ok = verifier
        .fetch_verified(
            &format!("{}/goss-linux-amd64", base),
            &dest,
            "0000000000000000000000000000000000000000000000000000000000000000",
            &CancelToken::new(),
        )
        .await;
    assert!(!ok);
}
