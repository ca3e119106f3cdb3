//! Authenticated HTTP client for the portal API
//!
//! Every request must look like it comes from the browser session that
//! solved the CAPTCHA: the session cookies, the `fingerprint` header, and
//! the full browser header set ride on all requests. This module owns that
//! surface and the endpoint URLs. It never interprets response statuses;
//! classification belongs to the fetch layer.

use crate::model::{CertificateKey, Scope};
use crate::session::SessionCredential;
use crate::ConfigError;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, DNT, ORIGIN,
    REFERER, USER_AGENT,
};
use reqwest::{Client, Response};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// The production portal origin
pub const PORTAL_BASE_URL: &str = "https://portalbnmp.cnj.jus.br";

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/143.0.0.0 Safari/537.36";

/// Parameters for the paged warrant search endpoint.
///
/// The filter fields serialize into the POST body with the portal's own
/// field names; page, size and sort travel as query parameters instead and
/// are skipped during body serialization.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub busca_orgao_recursivo: bool,

    /// Issuing-organ filter; the engine always sends it empty
    pub orgao_expeditor: serde_json::Map<String, serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_estado: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_municipio: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub numero_processo: Option<String>,

    #[serde(skip)]
    pub page: u32,

    #[serde(skip)]
    pub size: u32,

    #[serde(skip)]
    pub sort: String,
}

impl SearchQuery {
    fn empty() -> Self {
        Self {
            busca_orgao_recursivo: false,
            orgao_expeditor: serde_json::Map::new(),
            id_estado: None,
            id_municipio: None,
            numero_processo: None,
            page: 0,
            size: 10,
            sort: String::new(),
        }
    }

    /// Query covering one geographic scope
    pub fn for_scope(scope: &Scope) -> Self {
        Self {
            id_estado: Some(scope.state_id),
            id_municipio: scope.municipality_id,
            ..Self::empty()
        }
    }

    /// Query for a single case by its normalized process number
    pub fn for_process_number(number: impl Into<String>) -> Self {
        Self {
            numero_processo: Some(number.into()),
            ..Self::empty()
        }
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn size(mut self, size: u32) -> Self {
        self.size = size;
        self
    }
}

/// Builder for [`BnmpClient`]
#[derive(Debug, Default)]
pub struct BnmpClientBuilder {
    credential: Option<SessionCredential>,
    credential_file: Option<PathBuf>,
    fingerprint: Option<String>,
    base_url: Option<String>,
}

impl BnmpClientBuilder {
    /// Uses an already loaded credential. Takes precedence over
    /// [`credential_file`](Self::credential_file).
    pub fn credential(mut self, credential: SessionCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    /// Loads the credential from a JSON file at build time
    pub fn credential_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_file = Some(path.into());
        self
    }

    /// Overrides the fingerprint header, replacing whatever the credential
    /// carries
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// Points the client at a different origin (used by tests)
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Builds the client.
    ///
    /// Fails before any network activity when no credential source was
    /// given, the credential file cannot be loaded, or the base URL does
    /// not parse.
    pub fn build(self) -> crate::Result<BnmpClient> {
        let credential = match (self.credential, self.credential_file) {
            (Some(credential), _) => credential,
            (None, Some(path)) => SessionCredential::load(&path)?,
            (None, None) => return Err(ConfigError::MissingCredentials.into()),
        };

        if credential.is_empty() {
            tracing::warn!("Session credential carries no cookies, requests will likely be rejected");
        }

        let fingerprint = self.fingerprint.or_else(|| credential.fingerprint.clone());

        let base_url = self
            .base_url
            .unwrap_or_else(|| PORTAL_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let base = Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let headers = build_default_headers(fingerprint.as_deref())?;
        let jar = build_cookie_jar(&credential, &base);

        let http = Client::builder()
            .default_headers(headers)
            .cookie_provider(Arc::new(jar))
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()?;

        Ok(BnmpClient {
            http,
            base_url,
            fingerprint,
        })
    }
}

/// Client for the portal's JSON API.
///
/// Methods return the raw [`Response`]; callers decide what each status
/// means in their context.
#[derive(Debug, Clone)]
pub struct BnmpClient {
    http: Client,
    base_url: String,
    fingerprint: Option<String>,
}

impl BnmpClient {
    pub fn builder() -> BnmpClientBuilder {
        BnmpClientBuilder::default()
    }

    /// The fingerprint header value this client sends, if any
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// POST `/bnmpportal/api/pesquisa-pecas/filter` with paging query
    /// parameters and the filter body
    pub async fn search_records(&self, query: &SearchQuery) -> Result<Response, reqwest::Error> {
        let url = format!("{}/bnmpportal/api/pesquisa-pecas/filter", self.base_url);
        self.http
            .post(&url)
            .query(&[
                ("page", query.page.to_string()),
                ("size", query.size.to_string()),
                ("sort", query.sort.clone()),
            ])
            .json(query)
            // json() sets a bare application/json; the portal's front end
            // sends the charset suffix, so keep matching it
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("application/json;charset=UTF-8"),
            )
            .send()
            .await
    }

    /// GET `/bnmpportal/api/dominio/estados`, the state listing
    pub async fn list_states(&self) -> Result<Response, reqwest::Error> {
        let url = format!("{}/bnmpportal/api/dominio/estados", self.base_url);
        self.http.get(&url).send().await
    }

    /// GET `/bnmpportal/api/dominio/por-uf/{state_id}`, the municipality
    /// listing for one state
    pub async fn list_municipalities(&self, state_id: i64) -> Result<Response, reqwest::Error> {
        let url = format!("{}/bnmpportal/api/dominio/por-uf/{}", self.base_url, state_id);
        self.http.get(&url).send().await
    }

    /// POST `/bnmpportal/api/certidaos/relatorio/{id}/{tipo}`, returning
    /// one certificate PDF
    pub async fn fetch_certificate(&self, key: CertificateKey) -> Result<Response, reqwest::Error> {
        let url = format!(
            "{}/bnmpportal/api/certidaos/relatorio/{}/{}",
            self.base_url, key.certificate_id, key.piece_type_id
        );
        self.http.post(&url).send().await
    }
}

/// The header set the portal's front end sends from a real browser
fn build_default_headers(fingerprint: Option<&str>) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9,pt-BR;q=0.8,pt;q=0.7"),
    );
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/json;charset=UTF-8"),
    );
    headers.insert(
        REFERER,
        HeaderValue::from_static("https://portalbnmp.cnj.jus.br/"),
    );
    headers.insert(
        ORIGIN,
        HeaderValue::from_static("https://portalbnmp.cnj.jus.br"),
    );
    headers.insert(DNT, HeaderValue::from_static("1"));
    headers.insert(
        HeaderName::from_static("sec-ch-ua"),
        HeaderValue::from_static(
            r#""Google Chrome";v="143", "Chromium";v="143", "Not A(Brand";v="24""#,
        ),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-mobile"),
        HeaderValue::from_static("?0"),
    );
    headers.insert(
        HeaderName::from_static("sec-ch-ua-platform"),
        HeaderValue::from_static(r#""Windows""#),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("same-origin"),
    );

    if let Some(fingerprint) = fingerprint {
        let value = HeaderValue::from_str(fingerprint).map_err(|_| {
            ConfigError::Validation(
                "fingerprint contains characters not valid in an HTTP header".to_string(),
            )
        })?;
        headers.insert(HeaderName::from_static("fingerprint"), value);
    }

    Ok(headers)
}

/// Populates a cookie jar from the browser-exported cookies.
///
/// Each cookie is registered against its own domain when it names one, so
/// the jar keeps working even when the client is pointed at a test origin.
fn build_cookie_jar(credential: &SessionCredential, base: &Url) -> reqwest::cookie::Jar {
    let jar = reqwest::cookie::Jar::default();

    for cookie in &credential.cookies {
        let mut cookie_str = format!("{}={}; Path={}", cookie.name, cookie.value, cookie.path);
        if !cookie.domain.is_empty() {
            cookie_str.push_str(&format!("; Domain={}", cookie.domain));
        }

        let origin = if cookie.domain.is_empty() {
            base.clone()
        } else {
            let host = cookie.domain.trim_start_matches('.');
            match Url::parse(&format!("https://{}/", host)) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Cookie {} has unusable domain {}: {}", cookie.name, cookie.domain, e);
                    base.clone()
                }
            }
        };

        jar.add_cookie_str(&cookie_str, &origin);
    }

    jar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Cookie;
    use std::io::Write;

    fn create_test_credential() -> SessionCredential {
        SessionCredential {
            cookies: vec![Cookie {
                name: "portal_sessao".to_string(),
                value: "abc".to_string(),
                domain: ".cnj.jus.br".to_string(),
                path: "/".to_string(),
                extra: serde_json::Map::new(),
            }],
            fingerprint: Some("fp-from-credential".to_string()),
        }
    }

    #[test]
    fn test_build_requires_a_credential_source() {
        let result = BnmpClient::builder().build();
        assert!(matches!(
            result,
            Err(crate::HarvestError::Config(ConfigError::MissingCredentials))
        ));
    }

    #[test]
    fn test_build_with_inline_credential() {
        let client = BnmpClient::builder()
            .credential(create_test_credential())
            .build()
            .unwrap();
        assert_eq!(client.fingerprint(), Some("fp-from-credential"));
    }

    #[test]
    fn test_explicit_fingerprint_wins_over_credential() {
        let client = BnmpClient::builder()
            .credential(create_test_credential())
            .fingerprint("fp-override")
            .build()
            .unwrap();
        assert_eq!(client.fingerprint(), Some("fp-override"));
    }

    #[test]
    fn test_build_from_credential_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{"cookies": [{"name": "a", "value": "1"}], "fingerprint": "fp-file"}"#)
            .unwrap();
        file.flush().unwrap();

        let client = BnmpClient::builder()
            .credential_file(file.path())
            .build()
            .unwrap();
        assert_eq!(client.fingerprint(), Some("fp-file"));
    }

    #[test]
    fn test_missing_credential_file_fails() {
        let result = BnmpClient::builder()
            .credential_file("/nonexistent/cookies.json")
            .build();
        assert!(matches!(result, Err(crate::HarvestError::Session(_))));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let result = BnmpClient::builder()
            .credential(create_test_credential())
            .base_url("not a url")
            .build();
        assert!(matches!(
            result,
            Err(crate::HarvestError::Config(ConfigError::InvalidUrl(_)))
        ));
    }

    #[test]
    fn test_scope_query_body_shape() {
        let scope = Scope::municipality(5, "Bahia", 102, "Salvador");
        let query = SearchQuery::for_scope(&scope).page(3).size(30);

        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(
            body,
            serde_json::json!({
                "buscaOrgaoRecursivo": false,
                "orgaoExpeditor": {},
                "idEstado": 5,
                "idMunicipio": 102
            })
        );
        // Paging stays out of the body
        assert_eq!(query.page, 3);
        assert_eq!(query.size, 30);
    }

    #[test]
    fn test_state_query_omits_municipality() {
        let query = SearchQuery::for_scope(&Scope::state(5, "Bahia"));
        let body = serde_json::to_value(&query).unwrap();
        assert!(body.get("idMunicipio").is_none());
        assert_eq!(body["idEstado"], 5);
    }

    #[test]
    fn test_process_number_query() {
        let query = SearchQuery::for_process_number("00000000000000000000");
        let body = serde_json::to_value(&query).unwrap();
        assert_eq!(body["numeroProcesso"], "00000000000000000000");
        assert!(body.get("idEstado").is_none());
    }
}
