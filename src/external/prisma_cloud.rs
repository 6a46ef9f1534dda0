use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::EtlError;
use crate::models::{CoverageEntry, Credentials, Defender, Validation, DEFAULT_ACCOUNT_ID};

const DEFENDERS_PAGE_SIZE: usize = 50;

/// Thin client for the cloud-security API we extract from.
#[derive(Clone)]
pub struct PrismaCloudClient {
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct ApiDefender {
    hostname: String,
    version: String,
    #[serde(rename = "type")]
    defender_type: String,
    category: String,
    connected: bool,
    #[serde(rename = "cloudMetadata", default)]
    cloud_metadata: Option<ApiCloudMetadata>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiCloudMetadata {
    #[serde(rename = "accountID")]
    account_id: Option<String>,
}

impl From<ApiDefender> for Defender {
    fn from(d: ApiDefender) -> Self {
        let account_id = d
            .cloud_metadata
            .and_then(|m| m.account_id)
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string());
        Defender {
            hostname: d.hostname,
            version: d.version,
            defender_type: d.defender_type,
            category: d.category,
            connected: d.connected,
            account_id,
        }
    }
}

/// Row of the cloud discovery CSV export; columns we do not keep are ignored.
#[derive(Debug, Deserialize)]
struct DiscoveryCsvRow {
    #[serde(rename = "Provider")]
    provider: String,
    #[serde(rename = "Service", alias = "Service Type")]
    service: String,
    #[serde(rename = "Region")]
    region: String,
    #[serde(rename = "Registry", default)]
    registry: Option<String>,
    #[serde(rename = "Credential", alias = "Credential ID", default)]
    credential: Option<String>,
    #[serde(rename = "Account ID", alias = "accountID", default)]
    account_id: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "VM Instance", alias = "VM Instances", default)]
    vm_instance: Option<String>,
    #[serde(rename = "Defended")]
    defended: String,
    #[serde(rename = "Runtime", default)]
    runtime: Option<String>,
    #[serde(rename = "Version", default)]
    version: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse_defended(raw: &str) -> Result<bool, EtlError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "defended" | "1" => Ok(true),
        "false" | "no" | "undefended" | "0" | "" => Ok(false),
        other => Err(EtlError::UpstreamData(format!("unexpected Defended value {:?}", other))),
    }
}

impl TryFrom<DiscoveryCsvRow> for CoverageEntry {
    type Error = EtlError;

    fn try_from(row: DiscoveryCsvRow) -> Result<Self, Self::Error> {
        Ok(CoverageEntry {
            defended: parse_defended(&row.defended)?,
            provider: row.provider,
            service: row.service,
            region: row.region,
            registry: non_empty(row.registry).unwrap_or_default(),
            credential: non_empty(row.credential).unwrap_or_default(),
            account_id: non_empty(row.account_id),
            name: non_empty(row.name),
            vm_instance: non_empty(row.vm_instance),
            runtime: non_empty(row.runtime),
            version: non_empty(row.version),
        })
    }
}

/// Parses the discovery export. A missing required column fails the whole batch.
pub fn parse_discovery_csv(body: &str) -> Result<Vec<CoverageEntry>, EtlError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(body.as_bytes());

    reader
        .deserialize::<DiscoveryCsvRow>()
        .map(|row| {
            row.map_err(|e| EtlError::UpstreamData(format!("discovery csv: {}", e)))
                .and_then(CoverageEntry::try_from)
        })
        .collect()
}

impl PrismaCloudClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn post_login(&self, credentials: &Credentials) -> Result<reqwest::Response, EtlError> {
        self.client
            .post(credentials.login_url())
            .json(&LoginRequest {
                username: &credentials.key,
                password: &credentials.secret,
            })
            .send()
            .await
            .map_err(|e| EtlError::TransientInfra(format!("upstream login: {}", e)))
    }

    /// Lightweight auth check. Transport failures are `Err`, refusals are `Rejected`.
    pub async fn validate(&self, credentials: &Credentials) -> Result<Validation, EtlError> {
        let resp = self.post_login(credentials).await?;
        match resp.status() {
            StatusCode::OK => Ok(Validation::Valid),
            status => Ok(Validation::Rejected {
                status: status.as_u16(),
            }),
        }
    }

    pub async fn login(&self, credentials: &Credentials) -> Result<String, EtlError> {
        let resp = self.post_login(credentials).await?;
        if resp.status() != StatusCode::OK {
            return Err(EtlError::NotReady(format!(
                "upstream login returned {}",
                resp.status()
            )));
        }
        let body: LoginResponse = resp
            .json()
            .await
            .map_err(|e| EtlError::UpstreamData(format!("login response: {}", e)))?;
        Ok(body.token)
    }

    /// Every connected defender, walking the paginated listing.
    pub async fn list_connected_defenders(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<Defender>, EtlError> {
        let token = self.login(credentials).await?;
        let url = format!("{}/api/v1/defenders", credentials.url.trim_end_matches('/'));

        let mut defenders = Vec::new();
        let mut offset = 0usize;
        loop {
            let resp = self
                .client
                .get(&url)
                .bearer_auth(&token)
                .query(&[
                    ("connected", "true".to_string()),
                    ("offset", offset.to_string()),
                    ("limit", DEFENDERS_PAGE_SIZE.to_string()),
                ])
                .send()
                .await?
                .error_for_status()
                .map_err(|e| EtlError::UpstreamData(format!("defenders listing: {}", e)))?;

            // the API answers `null` rather than `[]` past the last page
            let page: Option<Vec<ApiDefender>> = resp
                .json()
                .await
                .map_err(|e| EtlError::UpstreamData(format!("defenders listing: {}", e)))?;
            let page = page.unwrap_or_default();
            let count = page.len();
            debug!("fetched {} defenders at offset {}", count, offset);
            defenders.extend(page.into_iter().map(Defender::from));

            if count < DEFENDERS_PAGE_SIZE {
                break;
            }
            offset += count;
        }

        info!("fetched {} connected defenders", defenders.len());
        Ok(defenders)
    }

    pub async fn download_cloud_discovery(
        &self,
        credentials: &Credentials,
    ) -> Result<Vec<CoverageEntry>, EtlError> {
        let token = self.login(credentials).await?;
        let url = format!(
            "{}/api/v1/cloud/discovery/download",
            credentials.url.trim_end_matches('/')
        );

        let body = self
            .client
            .get(&url)
            .bearer_auth(&token)
            .send()
            .await?
            .error_for_status()
            .map_err(|e| EtlError::UpstreamData(format!("cloud discovery download: {}", e)))?
            .text()
            .await?;

        let entries = parse_discovery_csv(&body)?;
        info!("parsed {} cloud discovery rows", entries.len());
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn creds(url: &str) -> Credentials {
        Credentials {
            url: url.to_string(),
            key: "access-key".into(),
            secret: "secret-key".into(),
        }
    }

    #[tokio::test]
    async fn test_validate_distinguishes_rejection() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/login")
            .match_body(Matcher::Json(serde_json::json!({
                "username": "access-key",
                "password": "secret-key"
            })))
            .with_status(401)
            .create_async()
            .await;

        let client = PrismaCloudClient::new(reqwest::Client::new());
        let result = client.validate(&creds(&server.url())).await.unwrap();
        assert_eq!(result, Validation::Rejected { status: 401 });
    }

    #[tokio::test]
    async fn test_validate_transport_failure_is_transient() {
        let client = PrismaCloudClient::new(reqwest::Client::new());
        let err = client.validate(&creds("http://127.0.0.1:1")).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_list_defenders_defaults_missing_account() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"token":"t0k"}"#)
            .create_async()
            .await;
        let listing = server
            .mock("GET", "/api/v1/defenders")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("connected".into(), "true".into()),
                Matcher::UrlEncoded("offset".into(), "0".into()),
            ]))
            .match_header("authorization", "Bearer t0k")
            .with_status(200)
            .with_body(
                serde_json::json!([
                    {"hostname": "node-1", "version": "31.00.129", "type": "daemonset",
                     "category": "container", "connected": true,
                     "cloudMetadata": {"accountID": "123456789012"}},
                    {"hostname": "node-2", "version": "31.00.129", "type": "serverLinux",
                     "category": "host", "connected": true, "cloudMetadata": {}}
                ])
                .to_string(),
            )
            .create_async()
            .await;

        let client = PrismaCloudClient::new(reqwest::Client::new());
        let defenders = client.list_connected_defenders(&creds(&server.url())).await.unwrap();

        assert_eq!(defenders.len(), 2);
        assert_eq!(defenders[0].account_id, "123456789012");
        assert_eq!(defenders[1].account_id, DEFAULT_ACCOUNT_ID);
        assert_eq!(defenders[1].defender_type, "serverLinux");
        listing.assert_async().await;
    }

    #[tokio::test]
    async fn test_list_defenders_malformed_body_is_upstream_data() {
        let mut server = mockito::Server::new_async().await;
        let _login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"token":"t0k"}"#)
            .create_async()
            .await;
        let _listing = server
            .mock("GET", "/api/v1/defenders")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"unexpected": "shape"}"#)
            .create_async()
            .await;

        let client = PrismaCloudClient::new(reqwest::Client::new());
        let err = client
            .list_connected_defenders(&creds(&server.url()))
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::UpstreamData(_)));
    }

    #[test]
    fn test_parse_discovery_csv_keeps_wanted_columns() {
        let body = "\
Provider,Service,Region,Registry,Credential,Account ID,Name,VM Instance,Defended,Runtime,Version,ARN,Status
aws,aws-eks,us-east-1,,aws-prod,123,cluster-a,,true,docker,1.27,arn:x,ok
gcp,gcp-gke,us-central1,gcr.io,gcp-main,,cluster-b,,false,,,arn:y,ok
";
        let entries = parse_discovery_csv(body).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].provider, "aws");
        assert!(entries[0].defended);
        assert_eq!(entries[0].account_id.as_deref(), Some("123"));
        assert_eq!(entries[0].registry, "");
        assert_eq!(entries[1].registry, "gcr.io");
        assert!(!entries[1].defended);
        assert_eq!(entries[1].runtime, None);
    }

    #[test]
    fn test_parse_discovery_csv_missing_column_fails() {
        let body = "Provider,Region,Defended\naws,us-east-1,true\n";
        let err = parse_discovery_csv(body).unwrap_err();
        assert!(matches!(err, EtlError::UpstreamData(_)));
    }
}
