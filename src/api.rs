use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, ClientBuilder};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Certificate;
use reqwest::Method;
use serde::Deserialize;
use url::form_urlencoded;
use url::Url;

use crate::config::{HttpOptions, ServerSettings};
use crate::secret::{get_secret, secret_name_to_id, Secret};

#[cfg(test)]
use mockall::automock;

static USER_AGENT_NAME: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

static CERTIFICATE_ERROR_DECODE: &str = "could not decode certificate";
static CERTIFICATE_ERROR_OPEN: &str = "could not open certificate";
static CERTIFICATE_ERROR_READ: &str = "could not read certificate";

// URL path components below the server base url
static API_PATH: &str = "api/v1";
static TOKEN_PATH: &str = "oauth2/token";

static GRANT_TYPE_PASSWORD: &str = "password";

const PARSE_URL_ERROR_INVALID_SCHEME: &str =
    "Url has unsupported scheme (only http & https schemes are supported)";

pub fn parse_url(src: &str) -> Result<Url> {
    let url = Url::parse(src)?;

    // validate url
    match url.scheme() {
        "http" => {}
        "https" => {}
        _ => return Err(anyhow!(PARSE_URL_ERROR_INVALID_SCHEME)),
    };
    url.host().ok_or_else(|| anyhow!("Url has invalid host"))?;
    url.port_or_known_default()
        .ok_or_else(|| anyhow!("Url is missing a port"))?;

    Ok(url)
}

enum CertificateEncoding {
    DER,
    PEM,
}

fn load_root_certificate(encoding: CertificateEncoding, path: &PathBuf) -> Result<Certificate> {
    let mut buf = Vec::new();
    File::open(path)
        .context(CERTIFICATE_ERROR_OPEN)?
        .read_to_end(&mut buf)
        .context(CERTIFICATE_ERROR_READ)?;

    let cert_result = match encoding {
        CertificateEncoding::DER => Certificate::from_der(&buf),
        CertificateEncoding::PEM => Certificate::from_pem(&buf),
    };

    let cert = cert_result.context(CERTIFICATE_ERROR_DECODE)?;

    Ok(cert)
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(String),
    Form(String),
}

pub fn make_request(
    http_options: &HttpOptions,
    url: Url,
    method: Method,
    body: Option<RequestBody>,
    bearer_token: Option<&str>,
) -> Result<Vec<u8>> {
    let redirect_policy: Policy = match http_options.max_redirects {
        0 => Policy::none(),
        _ => Policy::limited(http_options.max_redirects),
    };

    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_NAME));

    if let Some(token) = bearer_token {
        let value = HeaderValue::from_str(&format!("Bearer {}", token))
            .context("access token is not a valid header value")?;
        headers.insert(AUTHORIZATION, value);
    }

    let mut client_builder: ClientBuilder = Client::builder()
        .redirect(redirect_policy)
        .timeout(Duration::from_secs(http_options.timeout as u64));

    if let Some(cert_der_path) = &http_options.der_root_certificate_path {
        let cert_der = load_root_certificate(CertificateEncoding::DER, cert_der_path)
            .context("adding DER root certificate failed")?;
        client_builder = client_builder.add_root_certificate(cert_der);
    }

    if let Some(cert_pem_path) = &http_options.pem_root_certificate_path {
        let cert_pem = load_root_certificate(CertificateEncoding::PEM, cert_pem_path)
            .context("adding PEM root certificate failed")?;
        client_builder = client_builder.add_root_certificate(cert_pem);
    }

    // we always use native-tls for making dangerous calls
    // because right now rust-tls cannot handle all of them
    if http_options.use_native_tls || http_options.danger_disable_tls_verification {
        client_builder = client_builder
            .use_native_tls()
            .danger_accept_invalid_certs(http_options.danger_disable_tls_verification)
            .danger_accept_invalid_hostnames(http_options.danger_disable_tls_verification);
    } else {
        client_builder = client_builder.use_rustls_tls();
    }

    let client = client_builder
        .build()
        .context("building reqwest client failed")?;

    let mut request_builder = client.request(method, url);

    match body {
        Some(RequestBody::Json(json)) => {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            request_builder = request_builder.body(json);
        }
        Some(RequestBody::Form(form)) => {
            headers.insert(
                CONTENT_TYPE,
                HeaderValue::from_static("application/x-www-form-urlencoded"),
            );
            request_builder = request_builder.body(form);
        }
        None => {}
    }

    let response = request_builder
        .headers(headers)
        .send()
        .context("request failed")?;

    let status = response.status();

    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("unknown").to_owned();
        return Err(anyhow!("{}: {}", status, reason));
    }

    let body_raw = response.bytes().context("read response body failed")?;

    let vec = body_raw.to_vec();

    Ok(vec)
}

/// One call against a REST resource of the Secret Server api.
///
/// `path` is joined below the resource segment; a path starting with `?` is
/// appended as the query string instead. `body`, when present, is a JSON
/// document.
#[cfg_attr(test, automock)]
pub trait ResourceAccessor {
    fn access_resource(
        &self,
        method: Method,
        resource: &str,
        path: &str,
        body: Option<String>,
    ) -> Result<Vec<u8>>;
}

/// Response of the token endpoint; only the token itself is of interest.
#[derive(Debug, Clone, Deserialize)]
struct AccessGrant {
    access_token: String,
}

/// Client for one Secret Server installation.
///
/// Every resource access obtains an OAuth2 access token via the password
/// grant and performs a blocking call against `{base}/api/v1`. Tokens are
/// not cached between calls, so the client carries no session state.
pub struct SecretServer {
    server_settings: ServerSettings,
    http_options: HttpOptions,
}

impl SecretServer {
    pub fn new(server_settings: ServerSettings, http_options: HttpOptions) -> Self {
        SecretServer {
            server_settings,
            http_options,
        }
    }

    /// Gets the secret with `id`, with file attachment fields resolved.
    pub fn secret(&self, id: i64) -> Result<Secret> {
        get_secret(self, id)
    }

    /// Resolves the id of the secret named `name`.
    pub fn secret_name_to_id(&self, name: &str) -> Result<i64> {
        secret_name_to_id(self, name)
    }

    fn resource_url(&self, resource: &str, path: &str) -> Result<Url> {
        let base = self.server_settings.base_url()?;
        let base = base.as_str().trim_end_matches('/');

        let composed = if let Some(query) = path.strip_prefix('?') {
            format!("{}/{}/{}?{}", base, API_PATH, resource, query)
        } else if path.is_empty() {
            format!("{}/{}/{}", base, API_PATH, resource)
        } else {
            format!(
                "{}/{}/{}/{}",
                base,
                API_PATH,
                resource,
                path.trim_start_matches('/')
            )
        };

        Url::parse(&composed)
            .with_context(|| format!("composed invalid url for resource {}", resource))
    }

    fn token_url(&self) -> Result<Url> {
        let base = self.server_settings.base_url()?;
        let base = base.as_str().trim_end_matches('/');

        Url::parse(&format!("{}/{}", base, TOKEN_PATH)).context("composed invalid token url")
    }

    fn token_request_form(&self) -> String {
        form_urlencoded::Serializer::new(String::new())
            .append_pair("username", &self.server_settings.username)
            .append_pair("password", &self.server_settings.password)
            .append_pair("grant_type", GRANT_TYPE_PASSWORD)
            .finish()
    }

    fn grant_access_token(&self) -> Result<String> {
        let raw = make_request(
            &self.http_options,
            self.token_url()?,
            Method::POST,
            Some(RequestBody::Form(self.token_request_form())),
            None,
        )
        .context("requesting access token failed")?;

        let grant: AccessGrant =
            serde_json::from_slice(&raw).context("parsing access token response failed")?;

        Ok(grant.access_token)
    }
}

impl ResourceAccessor for SecretServer {
    fn access_resource(
        &self,
        method: Method,
        resource: &str,
        path: &str,
        body: Option<String>,
    ) -> Result<Vec<u8>> {
        let token = self.grant_access_token()?;
        let url = self.resource_url(resource, path)?;

        make_request(
            &self.http_options,
            url,
            method,
            body.map(RequestBody::Json),
            Some(&token),
        )
    }
}
