//! iCloud Drive over the iCloud web services
//!
//! Signs in against Apple's identity service, performs the second-factor
//! handshake when asked to, then walks iCloud Drive folders by name through
//! the `drivews` service and downloads documents through `docws`.
//!
//! Session identifiers, the trust token and cookies are kept in a
//! [`StoredSession`] between runs. A session trusted after a second factor
//! signs in again without a code until Apple expires the trust.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::drive::{
    Drive, DriveEntry, DrivePath, DriveSession, PendingChallenge, sidecar_path,
};
use super::error::{AuthError, ClientError, DriveError};
use super::rest::{DEFAULT_TIMEOUT, truncate};
use crate::config::Secret;

const AUTH_ENDPOINT: &str = "https://idmsa.apple.com/appleauth/auth";
const SETUP_ENDPOINT: &str = "https://setup.icloud.com/setup/ws/1";
const HOME_ENDPOINT: &str = "https://www.icloud.com";
const WIDGET_KEY: &str = "d39ba9916b7251055b22c7f910e2ea796ee65e98b2ddecea8f5dde8d9d1a815d";
const ROOT_FOLDER: &str = "FOLDER::com.apple.CloudDocs::root";

/// Identity and setup service base URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub auth: String,
    pub setup: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth: AUTH_ENDPOINT.to_string(),
            setup: SETUP_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    /// URLs whose cookies are carried between runs
    fn cookie_urls(&self) -> [String; 2] {
        [format!("{}/", self.auth), format!("{}/", self.setup)]
    }
}

/// Session identifiers carried between sign-in steps
#[derive(Clone, Default, Serialize, Deserialize)]
struct SessionData {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    scnt: Option<String>,
    #[serde(default)]
    session_token: Option<String>,
    #[serde(default)]
    account_country: Option<String>,
    #[serde(default)]
    trust_token: Option<String>,
}

impl SessionData {
    fn capture(&mut self, headers: &HeaderMap) {
        let read = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(String::from)
        };
        if let Some(v) = read("X-Apple-ID-Session-Id") {
            self.session_id = Some(v);
        }
        if let Some(v) = read("scnt") {
            self.scnt = Some(v);
        }
        if let Some(v) = read("X-Apple-Session-Token") {
            self.session_token = Some(v);
        }
        if let Some(v) = read("X-Apple-ID-Account-Country") {
            self.account_country = Some(v);
        }
        if let Some(v) = read("X-Apple-TwoSV-Trust-Token") {
            self.trust_token = Some(v);
        }
    }
}

/// Sign-in state saved between runs
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default)]
    account: String,
    #[serde(default)]
    session: SessionData,
    /// `Cookie` header value per service URL
    #[serde(default)]
    cookies: BTreeMap<String, String>,
}

impl fmt::Debug for StoredSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredSession")
            .field("account", &self.account)
            .field("trusted", &self.is_trusted())
            .field("cookies", &self.cookies.len())
            .finish()
    }
}

impl StoredSession {
    /// Session file stored next to a database
    pub fn default_path(database: &Path) -> PathBuf {
        sidecar_path(database, ".session.json")
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    /// True when a trust token was granted
    pub fn is_trusted(&self) -> bool {
        self.session.trust_token.is_some()
    }

    /// Load a saved session; `None` when there is none
    pub async fn load(path: &Path) -> Result<Option<Self>, AuthError> {
        let json = match tokio::fs::read_to_string(path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(session_error(path, e)),
        };
        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| session_error(path, e))
    }

    /// Write the session
    pub async fn save(&self, path: &Path) -> Result<(), AuthError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| session_error(path, e))?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| session_error(path, e))
    }
}

fn session_error(path: &Path, err: impl fmt::Display) -> AuthError {
    AuthError::Session {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// Web service URLs returned by account login
#[derive(Debug, Clone, PartialEq, Eq)]
struct Services {
    dsid: String,
    drivews: String,
    docws: String,
    trusted: bool,
    challenge_required: bool,
}

/// Node in an iCloud Drive listing
#[derive(Debug, Clone, PartialEq, Eq)]
struct DriveItem {
    drivews_id: String,
    docws_id: Option<String>,
    zone: String,
    name: String,
    is_folder: bool,
    size: Option<u64>,
}

/// iCloud Drive client
pub struct ICloudDrive {
    client: reqwest::Client,
    jar: Arc<Jar>,
    endpoints: Endpoints,
    account: String,
    session: SessionData,
    needs_code: bool,
    services: Option<Services>,
    folders: Mutex<HashMap<String, Vec<DriveItem>>>,
}

impl fmt::Debug for ICloudDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ICloudDrive")
            .field("account", &self.account)
            .field("needs_code", &self.needs_code)
            .field("logged_in", &self.services.is_some())
            .finish()
    }
}

impl ICloudDrive {
    fn with_session(
        endpoints: Endpoints,
        account: &str,
        session: SessionData,
        cookies: &BTreeMap<String, String>,
    ) -> Result<Self, AuthError> {
        let jar = Arc::new(Jar::default());
        for (url, header) in cookies {
            let Ok(url) = url.parse::<Url>() else {
                continue;
            };
            for pair in header.split("; ").filter(|p| !p.is_empty()) {
                jar.add_cookie_str(pair, &url);
            }
        }

        let client = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;
        Ok(Self {
            client,
            jar,
            endpoints,
            account: account.to_string(),
            session,
            needs_code: false,
            services: None,
            folders: Mutex::new(HashMap::new()),
        })
    }

    /// Sign in with an Apple ID and password, reusing a saved session
    pub async fn sign_in(
        apple_id: &str,
        password: &Secret,
        saved: Option<&StoredSession>,
    ) -> Result<Self, AuthError> {
        Self::sign_in_at(Endpoints::default(), apple_id, password, saved).await
    }

    /// Sign in against the given service endpoints
    pub async fn sign_in_at(
        endpoints: Endpoints,
        apple_id: &str,
        password: &Secret,
        saved: Option<&StoredSession>,
    ) -> Result<Self, AuthError> {
        tracing::info!(account = apple_id, "Authenticating with iCloud");
        let saved = saved.filter(|s| s.account == apple_id);
        let mut drive = match saved {
            Some(saved) => {
                tracing::debug!(trusted = saved.is_trusted(), "Reusing saved session");
                Self::with_session(endpoints, apple_id, saved.session.clone(), &saved.cookies)?
            }
            None => Self::with_session(
                endpoints,
                apple_id,
                SessionData::default(),
                &BTreeMap::new(),
            )?,
        };

        let url = format!("{}/signin?isRememberMeEnabled=true", drive.endpoints.auth);
        let body = signin_body(apple_id, password, &drive.session);
        let response = drive
            .client
            .post(&url)
            .headers(drive.auth_headers())
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;
        drive.session.capture(response.headers());

        match response.status() {
            StatusCode::CONFLICT => {
                drive.needs_code = true;
            }
            status if status.is_success() => {
                drive.account_login().await?;
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(AuthError::SignInFailed {
                    account: apple_id.to_string(),
                    message: "invalid Apple ID or password".to_string(),
                });
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                return Err(ClientError::Status {
                    url,
                    status: status.as_u16(),
                    body: truncate(&body, 512),
                }
                .into());
            }
        }

        Ok(drive)
    }

    /// Rebuild a session that stopped at a second-factor prompt
    pub fn resume(challenge: &PendingChallenge) -> Result<Self, AuthError> {
        let stored: StoredSession = serde_json::from_value(challenge.context.clone()).map_err(
            |e| AuthError::Challenge {
                path: "context".to_string(),
                message: e.to_string(),
            },
        )?;
        if stored.session.session_id.is_none() || stored.session.scnt.is_none() {
            return Err(AuthError::NoPendingChallenge);
        }
        let mut drive = Self::with_session(
            Endpoints::default(),
            &challenge.account,
            stored.session,
            &stored.cookies,
        )?;
        drive.needs_code = true;
        Ok(drive)
    }

    /// Current session state, for saving between runs
    pub fn snapshot(&self) -> StoredSession {
        let mut cookies = BTreeMap::new();
        for url in self.endpoints.cookie_urls() {
            let Ok(parsed) = url.parse::<Url>() else {
                continue;
            };
            if let Some(header) = self.jar.cookies(&parsed)
                && let Ok(text) = header.to_str()
            {
                cookies.insert(url, text.to_string());
            }
        }
        StoredSession {
            account: self.account.clone(),
            session: self.session.clone(),
            cookies,
        }
    }

    fn auth_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let mut put = |name: &'static str, value: &str| {
            if let Ok(value) = value.parse() {
                headers.insert(name, value);
            }
        };
        put("Accept", "application/json");
        put("Content-Type", "application/json");
        put("Origin", HOME_ENDPOINT);
        put("Referer", &format!("{HOME_ENDPOINT}/"));
        put("X-Apple-OAuth-Client-Id", WIDGET_KEY);
        put("X-Apple-OAuth-Client-Type", "firstPartyAuth");
        put("X-Apple-OAuth-Redirect-URI", HOME_ENDPOINT);
        put("X-Apple-OAuth-Require-Grant-Code", "true");
        put("X-Apple-OAuth-Response-Mode", "web_message");
        put("X-Apple-OAuth-Response-Type", "code");
        put("X-Apple-Widget-Key", WIDGET_KEY);
        if let Some(id) = &self.session.session_id {
            put("X-Apple-ID-Session-Id", id);
        }
        if let Some(scnt) = &self.session.scnt {
            put("scnt", scnt);
        }
        headers
    }

    async fn account_login(&mut self) -> Result<(), AuthError> {
        let token = self
            .session
            .session_token
            .clone()
            .ok_or_else(|| AuthError::SignInFailed {
                account: self.account.clone(),
                message: "no session token returned".to_string(),
            })?;
        let url = format!("{}/accountLogin", self.endpoints.setup);
        let body = json!({
            "accountCountryCode": self.session.account_country,
            "dsWebAuthToken": token,
            "extended_login": true,
            "trustToken": self.session.trust_token.clone().unwrap_or_default(),
        });
        let response = self
            .client
            .post(&url)
            .header("Origin", HOME_ENDPOINT)
            .header("Referer", format!("{HOME_ENDPOINT}/"))
            .json(&body)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;
        let value = read_json(&url, response).await?;
        let services = parse_account_login(&value).map_err(|e| AuthError::SignInFailed {
            account: self.account.clone(),
            message: e.to_string(),
        })?;
        self.needs_code = services.challenge_required;
        self.services = Some(services);
        Ok(())
    }

    fn services(&self) -> Result<&Services, DriveError> {
        self.services.as_ref().ok_or(DriveError::NotAuthenticated)
    }

    async fn children(&self, folder_id: &str) -> Result<Vec<DriveItem>, DriveError> {
        if let Some(items) = self.folders.lock().await.get(folder_id) {
            return Ok(items.clone());
        }

        let services = self.services()?;
        let url = format!(
            "{}/retrieveItemDetailsInFolders?dsid={}",
            services.drivews, services.dsid
        );
        let response = self
            .client
            .post(&url)
            .header("Origin", HOME_ENDPOINT)
            .json(&json!([{ "drivewsid": folder_id, "partialData": false }]))
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;
        let value = read_json(&url, response).await?;
        let items = parse_folder_items(&value)?;

        self.folders
            .lock()
            .await
            .insert(folder_id.to_string(), items.clone());
        Ok(items)
    }

    /// Walk `path` from the drive root, returning the node it names
    async fn resolve(&self, path: &DrivePath) -> Result<Option<DriveItem>, DriveError> {
        let mut current = DriveItem {
            drivews_id: ROOT_FOLDER.to_string(),
            docws_id: None,
            zone: "com.apple.CloudDocs".to_string(),
            name: String::new(),
            is_folder: true,
            size: None,
        };
        for segment in path.segments() {
            if !current.is_folder {
                return Ok(None);
            }
            let children = self.children(&current.drivews_id).await?;
            match children.into_iter().find(|item| &item.name == segment) {
                Some(item) => current = item,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }
}

/// Sign-in request body; a saved trust token skips the second factor
fn signin_body(apple_id: &str, password: &Secret, session: &SessionData) -> Value {
    json!({
        "accountName": apple_id,
        "password": password.expose(),
        "rememberMe": true,
        "trustTokens": session.trust_token.iter().collect::<Vec<_>>(),
    })
}

async fn read_json(url: &str, response: reqwest::Response) -> Result<Value, ClientError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            url: url.to_string(),
            status: status.as_u16(),
            body: truncate(&body, 512),
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| ClientError::InvalidResponse {
            url: url.to_string(),
            message: e.to_string(),
        })
}

fn parse_account_login(value: &Value) -> Result<Services, DriveError> {
    let dsid = match value.pointer("/dsInfo/dsid") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return Err(DriveError::Protocol("accountLogin: missing dsInfo.dsid".into())),
    };
    let service_url = |name: &str| {
        value
            .pointer(&format!("/webservices/{name}/url"))
            .and_then(Value::as_str)
            .map(|s| s.trim_end_matches('/').to_string())
            .ok_or_else(|| DriveError::Protocol(format!("accountLogin: no {name} service")))
    };
    Ok(Services {
        dsid,
        drivews: service_url("drivews")?,
        docws: service_url("docws")?,
        trusted: value
            .get("hsaTrustedBrowser")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        challenge_required: value
            .get("hsaChallengeRequired")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Display name of a node: files carry their extension separately
fn display_name(item: &Value) -> Option<String> {
    let name = item.get("name")?.as_str()?;
    match item.get("extension").and_then(Value::as_str) {
        Some(ext) if !ext.is_empty() => Some(format!("{name}.{ext}")),
        _ => Some(name.to_string()),
    }
}

fn parse_folder_items(value: &Value) -> Result<Vec<DriveItem>, DriveError> {
    let folder = value
        .as_array()
        .and_then(|a| a.first())
        .ok_or_else(|| DriveError::Protocol("retrieveItemDetailsInFolders: empty".into()))?;
    let Some(items) = folder.get("items").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    Ok(items
        .iter()
        .filter_map(|item| {
            let drivews_id = item.get("drivewsid")?.as_str()?.to_string();
            let kind = item.get("type").and_then(Value::as_str).unwrap_or("FILE");
            Some(DriveItem {
                drivews_id,
                docws_id: item.get("docwsid").and_then(Value::as_str).map(String::from),
                zone: item
                    .get("zone")
                    .and_then(Value::as_str)
                    .unwrap_or("com.apple.CloudDocs")
                    .to_string(),
                name: display_name(item)?,
                is_folder: kind.eq_ignore_ascii_case("FOLDER")
                    || kind.eq_ignore_ascii_case("APP_LIBRARY"),
                size: item.get("size").and_then(Value::as_u64),
            })
        })
        .collect())
}

fn parse_download_url(value: &Value) -> Option<&str> {
    value
        .pointer("/data_token/url")
        .or_else(|| value.pointer("/package_token/url"))
        .and_then(Value::as_str)
}

#[async_trait]
impl DriveSession for ICloudDrive {
    fn requires_second_factor(&self) -> bool {
        self.needs_code
    }

    fn is_trusted(&self) -> bool {
        self.services.as_ref().is_some_and(|s| s.trusted)
    }

    async fn validate_code(&mut self, code: &str) -> Result<bool, AuthError> {
        let url = format!("{}/verify/trusteddevice/securitycode", self.endpoints.auth);
        let response = self
            .client
            .post(&url)
            .headers(self.auth_headers())
            .json(&json!({ "securityCode": { "code": code } }))
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;
        self.session.capture(response.headers());

        let status = response.status();
        if status.is_success() {
            self.needs_code = false;
            return Ok(true);
        }
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Ok(false);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ClientError::Status {
            url,
            status: status.as_u16(),
            body: truncate(&body, 512),
        }
        .into())
    }

    async fn trust_session(&mut self) -> Result<bool, AuthError> {
        let url = format!("{}/2sv/trust", self.endpoints.auth);
        let response = self
            .client
            .get(&url)
            .headers(self.auth_headers())
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;
        self.session.capture(response.headers());
        let trusted = response.status().is_success();

        // account login is needed either way to reach the drive services
        self.account_login().await?;
        Ok(trusted)
    }

    fn challenge_context(&self) -> Value {
        serde_json::to_value(self.snapshot()).unwrap_or(Value::Null)
    }
}

#[async_trait]
impl Drive for ICloudDrive {
    async fn list(&self, path: &DrivePath) -> Result<Option<Vec<DriveEntry>>, DriveError> {
        let Some(node) = self.resolve(path).await? else {
            return Ok(None);
        };
        if !node.is_folder {
            return Ok(None);
        }
        let mut entries: Vec<DriveEntry> = self
            .children(&node.drivews_id)
            .await?
            .into_iter()
            .map(|item| {
                if item.is_folder {
                    DriveEntry::folder(item.name)
                } else {
                    DriveEntry::file(item.name, item.size)
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Some(entries))
    }

    async fn read(&self, path: &DrivePath) -> Result<Vec<u8>, DriveError> {
        let node = self
            .resolve(path)
            .await?
            .filter(|n| !n.is_folder)
            .ok_or_else(|| DriveError::NotFound(path.to_string()))?;
        let document_id = node
            .docws_id
            .as_deref()
            .ok_or_else(|| DriveError::Protocol(format!("{path}: no document id")))?;
        let services = self.services()?;

        let url = format!(
            "{}/ws/{}/download/by_id?document_id={}&dsid={}",
            services.docws,
            node.zone,
            urlencoding::encode(document_id),
            services.dsid
        );
        let response = self
            .client
            .get(&url)
            .header("Origin", HOME_ENDPOINT)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: url.clone(),
                source,
            })?;
        let token = read_json(&url, response).await?;
        let download = parse_download_url(&token)
            .ok_or_else(|| DriveError::Protocol(format!("{path}: no download url")))?
            .to_string();

        let response = self
            .client
            .get(&download)
            .send()
            .await
            .map_err(|source| ClientError::Request {
                url: download.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status {
                url: download,
                status: status.as_u16(),
                body: String::new(),
            }
            .into());
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|source| ClientError::Request {
                url: download,
                source,
            })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AuthOutcome, authenticate};
    use axum::Router;
    use axum::body::Body;
    use axum::http::{HeaderMap as RequestHeaders, Response};
    use axum::routing::post;
    use tempfile::TempDir;

    const TRUSTED: &str = "trusted-token";

    /// Signs in without a code only for a trusted token sent with its cookie
    async fn fake_signin(
        headers: RequestHeaders,
        axum::Json(body): axum::Json<Value>,
    ) -> Response<Body> {
        let has_token = body["trustTokens"]
            .as_array()
            .is_some_and(|tokens| tokens.iter().any(|t| t == TRUSTED));
        let has_cookie = headers
            .get("cookie")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("aasp=cookie-1"));
        let status = if has_token && has_cookie { 200 } else { 409 };
        Response::builder()
            .status(status)
            .header("X-Apple-ID-Session-Id", "sess-1")
            .header("scnt", "scnt-1")
            .header("X-Apple-Session-Token", "token-1")
            .header("Set-Cookie", "aasp=cookie-1; Path=/")
            .body(Body::from("{}"))
            .unwrap()
    }

    async fn fake_account_login(axum::Json(body): axum::Json<Value>) -> axum::Json<Value> {
        axum::Json(json!({
            "dsInfo": {"dsid": "42"},
            "hsaTrustedBrowser": body["trustToken"] == TRUSTED,
            "hsaChallengeRequired": false,
            "webservices": {
                "drivews": {"url": "http://127.0.0.1:9/drivews"},
                "docws": {"url": "http://127.0.0.1:9/docws"}
            }
        }))
    }

    async fn serve_fake_icloud() -> Endpoints {
        let app = Router::new()
            .route("/auth/signin", post(fake_signin))
            .route("/setup/accountLogin", post(fake_account_login));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Endpoints {
            auth: format!("http://{addr}/auth"),
            setup: format!("http://{addr}/setup"),
        }
    }

    #[tokio::test]
    async fn test_first_sign_in_needs_code() {
        let endpoints = serve_fake_icloud().await;
        let password = Secret::new("hunter2");
        let drive = ICloudDrive::sign_in_at(endpoints, "me@example.com", &password, None)
            .await
            .unwrap();
        let AuthOutcome::NeedsCode(challenge) = authenticate(&drive, "me@example.com") else {
            panic!("expected a challenge");
        };
        assert_eq!(challenge.context["session"]["scnt"], "scnt-1");
        assert_eq!(challenge.context["account"], "me@example.com");
        let cookies = challenge.context["cookies"].as_object().unwrap();
        assert!(cookies.values().any(|c| c.as_str().unwrap().contains("aasp=cookie-1")));
    }

    #[tokio::test]
    async fn test_saved_trusted_session_skips_code() {
        let endpoints = serve_fake_icloud().await;
        let password = Secret::new("hunter2");
        let first = ICloudDrive::sign_in_at(endpoints.clone(), "me@example.com", &password, None)
            .await
            .unwrap();
        assert!(first.requires_second_factor());

        // trust granted by a completed second factor
        let mut stored = first.snapshot();
        stored.session.trust_token = Some(TRUSTED.to_string());
        let dir = TempDir::new().unwrap();
        let path = StoredSession::default_path(&dir.path().join("arc_timeline.duckdb"));
        stored.save(&path).await.unwrap();

        let saved = StoredSession::load(&path).await.unwrap().unwrap();
        assert!(saved.is_trusted());
        assert_eq!(saved.account(), "me@example.com");

        let drive = ICloudDrive::sign_in_at(endpoints, "me@example.com", &password, Some(&saved))
            .await
            .unwrap();
        assert_eq!(authenticate(&drive, "me@example.com"), AuthOutcome::Ready);
        assert!(drive.is_trusted());
        assert!(drive.snapshot().is_trusted());
    }

    #[tokio::test]
    async fn test_saved_session_for_other_account_is_ignored() {
        let endpoints = serve_fake_icloud().await;
        let password = Secret::new("hunter2");
        let first = ICloudDrive::sign_in_at(endpoints.clone(), "me@example.com", &password, None)
            .await
            .unwrap();
        let mut stored = first.snapshot();
        stored.session.trust_token = Some(TRUSTED.to_string());

        let drive =
            ICloudDrive::sign_in_at(endpoints, "other@example.com", &password, Some(&stored))
                .await
                .unwrap();
        assert!(drive.requires_second_factor());
    }

    #[tokio::test]
    async fn test_missing_session_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.session.json");
        assert!(StoredSession::load(&path).await.unwrap().is_none());

        std::fs::write(&path, "not json").unwrap();
        let err = StoredSession::load(&path).await.unwrap_err();
        assert!(matches!(err, AuthError::Session { .. }));
        assert!(err.user_message().contains("Delete"));
    }

    #[test]
    fn test_parse_account_login() {
        let value = json!({
            "dsInfo": {"dsid": 12345},
            "hsaTrustedBrowser": true,
            "webservices": {
                "drivews": {"url": "https://p01-drivews.icloud.com:443/"},
                "docws": {"url": "https://p01-docws.icloud.com:443"}
            }
        });
        let services = parse_account_login(&value).unwrap();
        assert_eq!(services.dsid, "12345");
        assert_eq!(services.drivews, "https://p01-drivews.icloud.com:443");
        assert!(services.trusted);
        assert!(!services.challenge_required);
    }

    #[test]
    fn test_parse_account_login_without_drive() {
        let value = json!({"dsInfo": {"dsid": "1"}, "webservices": {}});
        assert!(parse_account_login(&value).is_err());
    }

    #[test]
    fn test_parse_folder_items() {
        let value = json!([{
            "drivewsid": "FOLDER::com.apple.CloudDocs::abc",
            "items": [
                {"drivewsid": "FOLDER::com.apple.CloudDocs::1", "name": "items", "type": "FOLDER"},
                {
                    "drivewsid": "FILE::com.apple.CloudDocs::2",
                    "docwsid": "doc-2",
                    "name": "metadata",
                    "extension": "json",
                    "type": "FILE",
                    "size": 42
                },
                {"name": "broken"}
            ]
        }]);
        let items = parse_folder_items(&value).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_folder);
        assert_eq!(items[1].name, "metadata.json");
        assert_eq!(items[1].docws_id.as_deref(), Some("doc-2"));
        assert_eq!(items[1].size, Some(42));
    }

    #[test]
    fn test_parse_download_url() {
        let value = json!({"data_token": {"url": "https://cvws.icloud-content.com/x"}});
        assert_eq!(parse_download_url(&value), Some("https://cvws.icloud-content.com/x"));
        assert_eq!(parse_download_url(&json!({})), None);
    }

    #[test]
    fn test_session_context_roundtrip() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Apple-ID-Session-Id", "sess".parse().unwrap());
        headers.insert("scnt", "counter".parse().unwrap());
        let mut session = SessionData::default();
        session.capture(&headers);
        let mut cookies = BTreeMap::new();
        cookies.insert(
            format!("{AUTH_ENDPOINT}/"),
            "aasp=abc; acn01=def".to_string(),
        );
        let stored = StoredSession {
            account: "me@example.com".to_string(),
            session,
            cookies,
        };

        let challenge =
            PendingChallenge::new("me@example.com", serde_json::to_value(&stored).unwrap());
        let drive = ICloudDrive::resume(&challenge).unwrap();
        assert!(drive.requires_second_factor());
        assert!(!drive.is_trusted());
        assert!(!format!("{drive:?}").contains("sess"));

        let snapshot = drive.snapshot();
        assert_eq!(snapshot.account(), "me@example.com");
        let restored = &snapshot.cookies[&format!("{AUTH_ENDPOINT}/")];
        assert!(restored.contains("aasp=abc"));
        assert!(restored.contains("acn01=def"));
    }

    #[test]
    fn test_resume_without_session_is_rejected() {
        let challenge = PendingChallenge::new("me@example.com", json!({}));
        assert!(matches!(
            ICloudDrive::resume(&challenge),
            Err(AuthError::NoPendingChallenge)
        ));
    }
}
