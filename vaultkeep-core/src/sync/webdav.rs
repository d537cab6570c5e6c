//! WebDAV remote over HTTPS with Basic auth.

use crate::sync::config::{SyncConfig, SyncCredentials};
use crate::sync::remote::{NetworkError, RemoteStore};
use crate::{Result, VaultError};
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use std::time::Duration;
use tracing::debug;

/// Name of the encrypted vault document
pub const PAYLOAD_FILE: &str = "vault.json";

/// Name of the checksum file
pub const CHECKSUM_FILE: &str = "vault.checksum";

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?><propfind xmlns="DAV:"><prop><resourcetype/></prop></propfind>"#;

/// HTTP client for a WebDAV folder.
pub struct WebDavRemote {
    client: reqwest::Client,
    folder_url: String,
    credentials: SyncCredentials,
    timeout_secs: u64,
}

impl WebDavRemote {
    /// Create a new client. Rejects anything but `https://` URLs, including
    /// redirects to plain HTTP.
    pub fn new(config: &SyncConfig, credentials: SyncCredentials) -> Result<Self> {
        config.validate()?;
        let base = config
            .server_url
            .as_deref()
            .ok_or_else(|| VaultError::Configuration("No server URL set".to_string()))?;

        Self::connect(
            format!("{}{}", base.trim_end_matches('/'), config.folder_path()),
            credentials,
            config.timeout_secs,
            true,
        )
    }

    fn connect(
        folder_url: String,
        credentials: SyncCredentials,
        timeout_secs: u64,
        https_only: bool,
    ) -> Result<Self> {
        basic_auth_password(&credentials)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .https_only(https_only)
            .build()
            .map_err(|e| NetworkError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            folder_url,
            credentials,
            timeout_secs,
        })
    }

    pub fn folder_url(&self) -> &str {
        &self.folder_url
    }

    fn file_url(&self, name: &str) -> String {
        format!("{}{}", self.folder_url, name)
    }

    fn request(&self, method: Method, url: &str) -> Result<reqwest::RequestBuilder> {
        let password = basic_auth_password(&self.credentials)?;
        Ok(self
            .client
            .request(method, url)
            .basic_auth(&self.credentials.username, Some(password)))
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Response> {
        builder.send().await.map_err(|e| self.transport_error(e))
    }

    fn transport_error(&self, e: reqwest::Error) -> VaultError {
        if e.is_timeout() {
            NetworkError::Timeout(self.timeout_secs).into()
        } else {
            NetworkError::Transport(e.to_string()).into()
        }
    }

    /// GET a file, `None` on 404
    async fn get_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let resp = self
            .send(self.request(Method::GET, &self.file_url(name))?)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp).await?;
        let bytes = resp.bytes().await.map_err(|e| self.transport_error(e))?;
        Ok(Some(bytes.to_vec()))
    }

    async fn put_file(&self, name: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let builder = self
            .request(Method::PUT, &self.file_url(name))?
            .header("Content-Type", content_type)
            .body(body);
        check_status(self.send(builder).await?).await?;
        Ok(())
    }

    async fn ensure_folder(&self) -> Result<()> {
        let mkcol = method("MKCOL")?;
        let resp = self.send(self.request(mkcol, &self.folder_url)?).await?;
        match resp.status() {
            // Already exists
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::MOVED_PERMANENTLY => Ok(()),
            _ => check_status(resp).await.map(|_| ()),
        }
    }

    /// DELETE a file, missing files are fine
    async fn delete_file(&self, name: &str) -> Result<()> {
        let resp = self
            .send(self.request(Method::DELETE, &self.file_url(name))?)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(resp).await.map(|_| ())
    }
}

#[async_trait]
impl RemoteStore for WebDavRemote {
    async fn test_connection(&self) -> Result<()> {
        let propfind = method("PROPFIND")?;
        let builder = self
            .request(propfind, &self.folder_url)?
            .header("Depth", "0")
            .header("Content-Type", "application/xml")
            .body(PROPFIND_BODY);
        let resp = self.send(builder).await?;

        // A missing folder still proves the server and credentials work
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("Remote folder {} does not exist yet", self.folder_url);
            return Ok(());
        }
        check_status(resp).await?;
        Ok(())
    }

    async fn fetch_checksum(&self) -> Result<Option<String>> {
        Ok(self
            .get_file(CHECKSUM_FILE)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
            .filter(|s| !s.is_empty()))
    }

    async fn download(&self) -> Result<Option<Vec<u8>>> {
        self.get_file(PAYLOAD_FILE).await
    }

    /// Checksum is removed first and written last
    async fn upload(&self, payload: Vec<u8>, checksum: &str) -> Result<()> {
        self.ensure_folder().await?;
        self.delete_file(CHECKSUM_FILE).await?;
        self.put_file(PAYLOAD_FILE, payload, "application/json")
            .await?;
        self.put_file(CHECKSUM_FILE, checksum.as_bytes().to_vec(), "text/plain")
            .await?;
        debug!("Uploaded vault document to {}", self.folder_url);
        Ok(())
    }
}

fn basic_auth_password(credentials: &SyncCredentials) -> Result<&str> {
    credentials.password.as_str().ok_or_else(|| {
        VaultError::Configuration("Sync password is not valid UTF-8".to_string())
    })
}

fn method(name: &str) -> Result<Method> {
    Method::from_bytes(name.as_bytes())
        .map_err(|e| NetworkError::Transport(format!("Invalid method {}: {}", name, e)).into())
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(NetworkError::Unauthorized.into());
    }
    let message = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
    Err(NetworkError::Status {
        code: status.as_u16(),
        message: message.chars().take(200).collect(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::SecureBuffer;
    use wiremock::matchers::{self, header};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> SyncCredentials {
        SyncCredentials {
            username: "alice".to_string(),
            password: SecureBuffer::from("secret"),
        }
    }

    /// Remote pointed at a local plain-HTTP server
    fn local_remote(server: &MockServer) -> WebDavRemote {
        WebDavRemote::connect(format!("{}/vault/", server.uri()), credentials(), 5, false).unwrap()
    }

    async fn respond(server: &MockServer, verb: &str, at: &str, status: u16) {
        Mock::given(matchers::method(verb))
            .and(matchers::path(at))
            .respond_with(ResponseTemplate::new(status))
            .mount(server)
            .await;
    }

    async fn request_log(server: &MockServer) -> Vec<(String, String)> {
        server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| (r.method.to_string(), r.url.path().to_string()))
            .collect()
    }

    #[test]
    fn builds_folder_url() {
        let config = SyncConfig {
            server_url: Some("https://dav.example.com/remote.php/webdav/".to_string()),
            remote_path: "vaultkeep".to_string(),
            ..SyncConfig::default()
        };
        let remote = WebDavRemote::new(&config, credentials()).unwrap();
        assert_eq!(
            remote.folder_url(),
            "https://dav.example.com/remote.php/webdav/vaultkeep/"
        );
        assert_eq!(
            remote.file_url(PAYLOAD_FILE),
            "https://dav.example.com/remote.php/webdav/vaultkeep/vault.json"
        );
    }

    #[test]
    fn rejects_plain_http() {
        let config = SyncConfig {
            server_url: Some("http://dav.example.com".to_string()),
            ..SyncConfig::default()
        };
        assert!(matches!(
            WebDavRemote::new(&config, credentials()),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_non_utf8_password() {
        let config = SyncConfig {
            server_url: Some("https://dav.example.com".to_string()),
            ..SyncConfig::default()
        };
        let credentials = SyncCredentials {
            username: "alice".to_string(),
            password: SecureBuffer::new(vec![0xff, 0xfe]),
        };
        assert!(matches!(
            WebDavRemote::new(&config, credentials),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn custom_methods_parse() {
        assert!(method("PROPFIND").is_ok());
        assert!(method("MKCOL").is_ok());
    }

    #[tokio::test]
    async fn https_only_client_never_sends_plain_http() {
        let server = MockServer::start().await;
        respond(&server, "PROPFIND", "/vault/", 207).await;

        let remote =
            WebDavRemote::connect(format!("{}/vault/", server.uri()), credentials(), 5, true)
                .unwrap();
        assert!(matches!(
            remote.test_connection().await,
            Err(VaultError::Network(NetworkError::Transport(_)))
        ));
        assert!(request_log(&server).await.is_empty());
    }

    #[tokio::test]
    async fn auth_failures_map_to_unauthorized() {
        let server = MockServer::start().await;
        respond(&server, "GET", "/vault/vault.checksum", 401).await;
        respond(&server, "GET", "/vault/vault.json", 403).await;
        let remote = local_remote(&server);

        assert!(matches!(
            remote.fetch_checksum().await,
            Err(VaultError::Network(NetworkError::Unauthorized))
        ));
        assert!(matches!(
            remote.download().await,
            Err(VaultError::Network(NetworkError::Unauthorized))
        ));
    }

    #[tokio::test]
    async fn missing_files_read_as_none() {
        let server = MockServer::start().await;
        respond(&server, "GET", "/vault/vault.checksum", 404).await;
        respond(&server, "GET", "/vault/vault.json", 404).await;
        let remote = local_remote(&server);

        assert_eq!(remote.fetch_checksum().await.unwrap(), None);
        assert_eq!(remote.download().await.unwrap(), None);
    }

    #[tokio::test]
    async fn server_errors_carry_status() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/vault/vault.json"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;
        let remote = local_remote(&server);

        match remote.download().await {
            Err(VaultError::Network(NetworkError::Status { code, message })) => {
                assert_eq!(code, 500);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn fetch_checksum_trims_body() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("GET"))
            .and(matchers::path("/vault/vault.checksum"))
            .respond_with(ResponseTemplate::new(200).set_body_string("abc123\n"))
            .mount(&server)
            .await;
        let remote = local_remote(&server);

        assert_eq!(remote.fetch_checksum().await.unwrap().as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_connection_sends_shallow_propfind() {
        let server = MockServer::start().await;
        Mock::given(matchers::method("PROPFIND"))
            .and(matchers::path("/vault/"))
            .and(header("Depth", "0"))
            .and(header("Authorization", "Basic YWxpY2U6c2VjcmV0"))
            .respond_with(ResponseTemplate::new(207))
            .expect(1)
            .mount(&server)
            .await;

        local_remote(&server).test_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_accepts_missing_folder() {
        let server = MockServer::start().await;
        respond(&server, "PROPFIND", "/vault/", 404).await;
        local_remote(&server).test_connection().await.unwrap();

        let server = MockServer::start().await;
        respond(&server, "PROPFIND", "/vault/", 401).await;
        assert!(matches!(
            local_remote(&server).test_connection().await,
            Err(VaultError::Network(NetworkError::Unauthorized))
        ));
    }

    #[tokio::test]
    async fn upload_into_existing_folder() {
        let server = MockServer::start().await;
        respond(&server, "MKCOL", "/vault/", 405).await;
        respond(&server, "DELETE", "/vault/vault.checksum", 404).await;
        respond(&server, "PUT", "/vault/vault.json", 201).await;
        respond(&server, "PUT", "/vault/vault.checksum", 201).await;

        local_remote(&server)
            .upload(b"{}".to_vec(), "abc123")
            .await
            .unwrap();

        assert_eq!(
            request_log(&server).await,
            vec![
                ("MKCOL".to_string(), "/vault/".to_string()),
                ("DELETE".to_string(), "/vault/vault.checksum".to_string()),
                ("PUT".to_string(), "/vault/vault.json".to_string()),
                ("PUT".to_string(), "/vault/vault.checksum".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn failed_payload_write_leaves_checksum_removed() {
        let server = MockServer::start().await;
        respond(&server, "MKCOL", "/vault/", 201).await;
        respond(&server, "DELETE", "/vault/vault.checksum", 204).await;
        respond(&server, "PUT", "/vault/vault.json", 507).await;

        assert!(matches!(
            local_remote(&server).upload(b"{}".to_vec(), "abc123").await,
            Err(VaultError::Network(NetworkError::Status { code: 507, .. }))
        ));

        let log = request_log(&server).await;
        assert_eq!(log[1], ("DELETE".to_string(), "/vault/vault.checksum".to_string()));
        assert!(!log.contains(&("PUT".to_string(), "/vault/vault.checksum".to_string())));
    }
}
