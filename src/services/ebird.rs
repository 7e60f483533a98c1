//! eBird upstream client
//!
//! Holds the single cookie-bearing session used for every request to eBird.
//! Barchart data is only served to logged-in users, so the session is
//! validated with a probe against a page that redirects to the Cornell CAS
//! login when the cookies are stale, and refreshed by submitting the login
//! form. Only HTML documents and TSV are requested; no page assets load.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{StatusCode, Url};
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::services::fetch::UpstreamSource;
use crate::services::session::SessionBackend;

/// Literal marker of an HTML page where TSV was expected.
const HTML_MARKER: &str = "<!doctype html>";

/// Login credentials. The password is kept out of `Debug` output.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct EbirdSettings {
    pub base_url: String,
    pub login_url: String,
    pub credentials: Credentials,
    pub session_file: PathBuf,
    pub request_timeout: Duration,
}

/// Session artifact persisted between restarts.
#[derive(Debug, Serialize, Deserialize)]
struct SessionArtifact {
    cookies: String,
    saved_at: DateTime<Utc>,
}

#[derive(Debug)]
struct LoginForm {
    action: Url,
    fields: Vec<(String, String)>,
}

/// Client for eBird pages that require an authenticated session.
pub struct EbirdClient {
    http: reqwest::Client,
    jar: Arc<Jar>,
    base_url: Url,
    login_url: Url,
    credentials: Credentials,
    session_file: PathBuf,
}

impl EbirdClient {
    /// Build the client and load any previously persisted session cookies.
    pub fn new(settings: EbirdSettings) -> Result<Self, UpstreamError> {
        let base_url = Url::parse(&settings.base_url)
            .map_err(|e| UpstreamError::Config(format!("invalid base url: {e}")))?;
        let login_url = Url::parse(&settings.login_url)
            .map_err(|e| UpstreamError::Config(format!("invalid login url: {e}")))?;

        let jar = Arc::new(Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .user_agent("Mozilla/5.0 (compatible; HotspotRank/0.1)")
            .timeout(settings.request_timeout)
            .build()?;

        let client = Self {
            http,
            jar,
            base_url,
            login_url,
            credentials: settings.credentials,
            session_file: settings.session_file,
        };

        match client.restore_session() {
            Ok(true) => tracing::info!(path = %client.session_file.display(), "Restored persisted eBird session"),
            Ok(false) => tracing::info!("No persisted eBird session, will log in on first use"),
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable session file"),
        }

        Ok(client)
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, UpstreamError> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::Config(format!("invalid path {path}: {e}")))
    }

    fn restore_session(&self) -> Result<bool, UpstreamError> {
        if !self.session_file.exists() {
            return Ok(false);
        }
        let raw = std::fs::read_to_string(&self.session_file)?;
        let artifact: SessionArtifact = serde_json::from_str(&raw)
            .map_err(|e| UpstreamError::Config(format!("corrupt session file: {e}")))?;

        for pair in artifact.cookies.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            self.jar.add_cookie_str(pair, &self.base_url);
        }
        Ok(true)
    }

    /// Write the current session cookies to the session file.
    pub async fn persist_session(&self) -> Result<(), UpstreamError> {
        let cookies = match self.jar.cookies(&self.base_url) {
            Some(header) => header
                .to_str()
                .map_err(|e| UpstreamError::Config(format!("non-ascii cookie: {e}")))?
                .to_string(),
            None => return Ok(()),
        };

        let artifact = SessionArtifact {
            cookies,
            saved_at: Utc::now(),
        };
        let json = serde_json::to_string_pretty(&artifact)
            .map_err(|e| UpstreamError::Config(e.to_string()))?;
        tokio::fs::write(&self.session_file, json).await?;

        tracing::debug!(path = %self.session_file.display(), "Persisted eBird session");
        Ok(())
    }

    async fn get_text(&self, url: Url) -> Result<(Url, String), UpstreamError> {
        let response = self.http.get(url).send().await?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        let final_url = response.url().clone();
        let body = response.text().await?;
        Ok((final_url, body))
    }
}

#[async_trait]
impl SessionBackend for EbirdClient {
    async fn probe(&self) -> Result<(), UpstreamError> {
        let url = self.endpoint("/prefs")?;
        let response = self.http.get(url).send().await?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        if is_login_url(response.url()) {
            return Err(UpstreamError::SessionInvalid);
        }
        Ok(())
    }

    async fn authenticate(&self) -> Result<(), UpstreamError> {
        tracing::info!(username = %self.credentials.username, "Logging in to eBird");

        let (page_url, html) = self.get_text(self.login_url.clone()).await?;
        let form = parse_login_form(&html, &page_url)?;

        let mut fields = form.fields;
        fields.push(("username".to_string(), self.credentials.username.clone()));
        fields.push(("password".to_string(), self.credentials.password.clone()));

        let response = self.http.post(form.action).form(&fields).send().await?;
        if let Some(err) = classify_status(response.status()) {
            return Err(err);
        }
        let landed_on = response.url().clone();
        let body = response.text().await?;
        if parse_login_form(&body, &landed_on).is_ok() {
            return Err(UpstreamError::Login(
                "credentials rejected, login form shown again".to_string(),
            ));
        }

        self.persist_session().await?;
        tracing::info!("eBird login succeeded, session saved");
        Ok(())
    }

    async fn teardown(&self) -> Result<(), UpstreamError> {
        self.persist_session().await
    }
}

#[async_trait]
impl UpstreamSource for EbirdClient {
    async fn barchart(
        &self,
        location_id: &str,
        start_year: i32,
        end_year: i32,
    ) -> Result<String, UpstreamError> {
        let mut url = self.endpoint("/barchartData")?;
        url.query_pairs_mut()
            .append_pair("r", location_id)
            .append_pair("byr", &start_year.to_string())
            .append_pair("eyr", &end_year.to_string())
            .append_pair("bmo", "1")
            .append_pair("emo", "12")
            .append_pair("fmt", "tsv");

        let (_, body) = self.get_text(url).await?;
        if looks_like_html(&body) {
            return Err(UpstreamError::Blocked);
        }
        Ok(body)
    }

    async fn species_page(&self, species_code: &str) -> Result<String, UpstreamError> {
        let url = self.endpoint(&format!("/species/{species_code}"))?;
        let (_, body) = self.get_text(url).await?;
        Ok(body)
    }
}

fn is_login_url(url: &Url) -> bool {
    url.as_str().to_ascii_lowercase().contains("login")
}

fn looks_like_html(body: &str) -> bool {
    body.to_ascii_lowercase().contains(HTML_MARKER)
}

/// Rate-limit and server-busy responses are retryable.
fn classify_status(status: StatusCode) -> Option<UpstreamError> {
    match status {
        StatusCode::TOO_MANY_REQUESTS
        | StatusCode::INTERNAL_SERVER_ERROR
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => Some(UpstreamError::Transient(status.as_u16())),
        s if s.is_client_error() || s.is_server_error() => {
            Some(UpstreamError::Unexpected(s.as_u16()))
        }
        _ => None,
    }
}

/// Find the form that holds the username input and collect its hidden fields.
fn parse_login_form(html: &str, page_url: &Url) -> Result<LoginForm, UpstreamError> {
    let document = Html::parse_document(html);
    let form_sel = Selector::parse("form").expect("valid selector");
    let username_sel = Selector::parse(r#"input[name="username"]"#).expect("valid selector");
    let hidden_sel = Selector::parse(r#"input[type="hidden"]"#).expect("valid selector");

    let form = document
        .select(&form_sel)
        .find(|form| form.select(&username_sel).next().is_some())
        .ok_or_else(|| UpstreamError::Login("login form not found".to_string()))?;

    let action = form.value().attr("action").unwrap_or("");
    let action = page_url
        .join(action)
        .map_err(|e| UpstreamError::Login(format!("bad form action: {e}")))?;

    let fields = form
        .select(&hidden_sel)
        .filter_map(|input| {
            let name = input.value().attr("name")?;
            let value = input.value().attr("value").unwrap_or("");
            Some((name.to_string(), value.to_string()))
        })
        .collect();

    Ok(LoginForm { action, fields })
}

/// Extract the lead image URL from a species page.
pub fn parse_species_image(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let img_sel = Selector::parse("img.Species-media-image").expect("valid selector");
    let og_sel = Selector::parse(r#"meta[property="og:image"]"#).expect("valid selector");

    document
        .select(&img_sel)
        .find_map(|img| img.value().attr("src"))
        .or_else(|| {
            document
                .select(&og_sel)
                .find_map(|meta| meta.value().attr("content"))
        })
        .map(str::trim)
        .filter(|src| !src.is_empty())
        .map(str::to_string)
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("HTTP request to eBird failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("eBird is rate limiting or busy (HTTP {0})")]
    Transient(u16),

    #[error("eBird returned unexpected HTTP {0}")]
    Unexpected(u16),

    #[error("eBird returned an HTML page instead of barchart data (blocked or session expired)")]
    Blocked,

    #[error("eBird session is not logged in")]
    SessionInvalid,

    #[error("eBird login failed: {0}")]
    Login(String),

    #[error("Session file error: {0}")]
    Persist(#[from] std::io::Error),

    #[error("eBird client configuration error: {0}")]
    Config(String),
}

impl UpstreamError {
    /// Whether a repeated attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UpstreamError::Http(_) | UpstreamError::Transient(_) | UpstreamError::Blocked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, dir: &tempfile::TempDir) -> EbirdClient {
        EbirdClient::new(EbirdSettings {
            base_url: server.uri(),
            login_url: format!("{}/cassso/login", server.uri()),
            credentials: Credentials {
                username: "birder".to_string(),
                password: "hunter2".to_string(),
            },
            session_file: dir.path().join("session.json"),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "birder".to_string(),
            password: "hunter2".to_string(),
        };
        let debug = format!("{creds:?}");
        assert!(debug.contains("birder"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_parse_login_form_collects_hidden_fields() {
        let html = r#"
        <html><body>
          <form action="/search"><input name="q"></form>
          <form method="post" action="login?service=x">
            <input type="hidden" name="execution" value="e1s1">
            <input type="hidden" name="_eventId" value="submit">
            <input name="username"><input type="password" name="password">
          </form>
        </body></html>"#;
        let page = Url::parse("https://secure.example.org/cassso/login").unwrap();
        let form = parse_login_form(html, &page).unwrap();
        assert_eq!(form.action.as_str(), "https://secure.example.org/cassso/login?service=x");
        assert_eq!(
            form.fields,
            vec![
                ("execution".to_string(), "e1s1".to_string()),
                ("_eventId".to_string(), "submit".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_login_form_missing() {
        let page = Url::parse("https://example.org/").unwrap();
        assert!(matches!(
            parse_login_form("<html><body>hi</body></html>", &page),
            Err(UpstreamError::Login(_))
        ));
    }

    #[test]
    fn test_parse_species_image() {
        let html = r#"<html><body><img class="Species-media-image" src="https://cdn.example/robin.jpg"></body></html>"#;
        assert_eq!(parse_species_image(html).as_deref(), Some("https://cdn.example/robin.jpg"));

        let og = r#"<html><head><meta property="og:image" content="https://cdn.example/og.jpg"></head></html>"#;
        assert_eq!(parse_species_image(og).as_deref(), Some("https://cdn.example/og.jpg"));

        assert_eq!(parse_species_image("<html></html>"), None);
    }

    #[test]
    fn test_classify_status() {
        assert!(classify_status(StatusCode::OK).is_none());
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            Some(UpstreamError::Transient(429))
        ));
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND),
            Some(UpstreamError::Unexpected(404))
        ));
    }

    #[tokio::test]
    async fn test_barchart_returns_tsv() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/barchartData"))
            .and(query_param("r", "L901084"))
            .and(query_param("byr", "1900"))
            .and(query_param("eyr", "2025"))
            .and(query_param("fmt", "tsv"))
            .respond_with(ResponseTemplate::new(200).set_body_string("row\tdata"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        let body = client.barchart("L901084", 1900, 2025).await.unwrap();
        assert_eq!(body, "row\tdata");
    }

    #[tokio::test]
    async fn test_barchart_html_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/barchartData"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<!DOCTYPE html><html>login</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        let err = client.barchart("L1", 2000, 2001).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Blocked));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_barchart_rate_limited_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/barchartData"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        assert!(matches!(
            client.barchart("L1", 2000, 2001).await,
            Err(UpstreamError::Transient(503))
        ));
    }

    #[tokio::test]
    async fn test_probe_detects_login_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prefs"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/cassso/login", server.uri()).as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/cassso/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        assert!(matches!(client.probe().await, Err(UpstreamError::SessionInvalid)));
    }

    #[tokio::test]
    async fn test_probe_valid_session() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prefs"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>prefs</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        assert!(client.probe().await.is_ok());
    }

    #[tokio::test]
    async fn test_authenticate_submits_form_and_persists_cookies() {
        let server = MockServer::start().await;
        let login_page = r#"<html><body><form method="post" action="/cassso/login">
            <input type="hidden" name="execution" value="abc">
            <input name="username"><input type="password" name="password">
        </form></body></html>"#;
        Mock::given(method("GET"))
            .and(path("/cassso/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cassso/login"))
            .and(body_string_contains("execution=abc"))
            .and(body_string_contains("username=birder"))
            .and(body_string_contains("password=hunter2"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Set-Cookie", "EBIRD_SESSIONID=s3cr3t; Path=/")
                    .insert_header("Location", format!("{}/home", server.uri()).as_str()),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/home"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>home</html>"))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        client.authenticate().await.unwrap();

        let saved = std::fs::read_to_string(dir.path().join("session.json")).unwrap();
        assert!(saved.contains("EBIRD_SESSIONID=s3cr3t"));

        // a fresh client picks the persisted cookies back up
        let restored = client_for(&server, &dir);
        let header = restored.jar.cookies(restored.base_url()).unwrap();
        assert!(header.to_str().unwrap().contains("EBIRD_SESSIONID=s3cr3t"));
    }

    #[tokio::test]
    async fn test_authenticate_rejected_credentials() {
        let server = MockServer::start().await;
        let login_page = r#"<form action="/cassso/login"><input name="username"></form>"#;
        Mock::given(method("GET"))
            .and(path("/cassso/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/cassso/login"))
            .respond_with(ResponseTemplate::new(200).set_body_string(login_page))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let client = client_for(&server, &dir);
        assert!(matches!(client.authenticate().await, Err(UpstreamError::Login(_))));
        assert!(!dir.path().join("session.json").exists());
    }
}
