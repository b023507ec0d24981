//! Velneo egress connector

use crate::{
    EgressError, Result,
    client::{HttpClientConfig, create_client},
    payload::{ParsedPayload, parse_collection, parse_record},
};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};
use velroute_core::{
    EntityKind, OperationKind, RecordSet, RemoteGateway, RemoteRequest, TenantConfiguration,
};

/// Remote location of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEndpoint {
    /// Path relative to the tenant base URL, may carry a fixed query string
    pub endpoint: String,
    /// Name of the array property in wrapped list responses
    pub collection: String,
}

impl EntityEndpoint {
    pub fn new(endpoint: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            collection: collection.into(),
        }
    }

    fn default_for(entity: EntityKind) -> Self {
        Self::new(entity.default_endpoint(), entity.default_collection())
    }

    /// Endpoint path without any fixed query string
    pub fn path(&self) -> &str {
        self.endpoint
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.endpoint)
            .trim_matches('/')
    }
}

/// Velneo connector configuration
#[derive(Debug, Clone, Default)]
pub struct VelneoConfig {
    /// HTTP client configuration
    pub client_config: HttpClientConfig,

    /// Per-entity overrides of the default endpoints
    pub endpoints: HashMap<EntityKind, EntityEndpoint>,
}

impl VelneoConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_config(mut self, client_config: HttpClientConfig) -> Self {
        self.client_config = client_config;
        self
    }

    /// Override the endpoint and collection name of one entity
    pub fn with_endpoint(mut self, entity: EntityKind, endpoint: EntityEndpoint) -> Self {
        self.endpoints.insert(entity, endpoint);
        self
    }

    pub fn endpoint(&self, entity: EntityKind) -> EntityEndpoint {
        self.endpoints
            .get(&entity)
            .cloned()
            .unwrap_or_else(|| EntityEndpoint::default_for(entity))
    }
}

/// HTTP method used for each operation
pub fn http_method(operation: OperationKind) -> Method {
    match operation {
        OperationKind::Get | OperationKind::Search => Method::GET,
        OperationKind::Create => Method::POST,
        OperationKind::Update => Method::PUT,
        OperationKind::Delete => Method::DELETE,
    }
}

/// Connector to the Velneo REST API
///
/// Performs exactly one HTTP attempt per `call`. Retries, deadlines and
/// circuit breaking happen in the dispatcher.
pub struct VelneoConnector {
    config: VelneoConfig,
    client: Client,
}

impl VelneoConnector {
    /// Create a new Velneo connector
    pub fn new(config: VelneoConfig) -> Result<Self> {
        let client = create_client(&config.client_config)?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &VelneoConfig {
        &self.config
    }

    /// Build `{base_url}/{endpoint}[/{id}]?api_key=...` plus search filters
    pub fn build_url(&self, tenant: &TenantConfiguration, request: &RemoteRequest) -> Result<Url> {
        let endpoint = self.config.endpoint(request.entity);
        let fixed_query = endpoint.endpoint.split_once('?').map(|(_, query)| query);

        let raw = format!(
            "{}/{}",
            tenant.base_url.trim_end_matches('/'),
            endpoint.path()
        );
        let mut url = Url::parse(&raw).map_err(|e| {
            EgressError::ConfigError(format!(
                "Invalid base URL '{}' for tenant {}: {}",
                tenant.base_url, tenant.tenant_id, e
            ))
        })?;

        if let Some(id) = &request.payload.id {
            url.path_segments_mut()
                .map_err(|_| {
                    EgressError::ConfigError(format!(
                        "Base URL '{}' cannot carry a path",
                        tenant.base_url
                    ))
                })?
                .push(id);
        }

        url.set_query(fixed_query);
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("api_key", &tenant.api_key);
            for (key, value) in &request.payload.query {
                pairs.append_pair(key, value);
            }
        }

        Ok(url)
    }

    fn parse(&self, request: &RemoteRequest, body: &[u8]) -> ParsedPayload {
        let collection = self.config.endpoint(request.entity).collection;
        let lists = matches!(request.operation, OperationKind::Search)
            || (request.operation == OperationKind::Get && request.payload.id.is_none());

        if lists {
            parse_collection(body, &collection)
        } else {
            parse_record(body, &collection)
        }
    }
}

#[async_trait]
impl RemoteGateway for VelneoConnector {
    #[instrument(
        skip(self, tenant, request),
        fields(tenant = %tenant.tenant_id, entity = %request.entity, operation = %request.operation)
    )]
    async fn call(
        &self,
        tenant: &TenantConfiguration,
        request: &RemoteRequest,
    ) -> velroute_core::Result<RecordSet> {
        let url = self.build_url(tenant, request)?;
        let method = http_method(request.operation);
        // The query carries the API key, so only the path is logged
        debug!(method = %method, path = url.path(), "Sending request to Velneo");

        let mut builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        if request.operation.is_write()
            && let Some(body) = &request.payload.body
        {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                EgressError::Timeout(self.config.client_config.timeout_secs)
            } else {
                EgressError::HttpError(e)
            }
        })?;

        let status = response.status();
        debug!(status = status.as_u16(), "Velneo responded");

        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error body".to_string());
            return Err(EgressError::UpstreamStatus {
                status_code: status.as_u16(),
                message,
            }
            .into());
        }

        let body = response.bytes().await.map_err(EgressError::from)?;
        let parsed = self.parse(request, &body);
        if let ParsedPayload::Failed { reason } = &parsed {
            warn!(
                tenant = %tenant.tenant_id,
                entity = %request.entity,
                reason = %reason,
                "Velneo payload matched neither the wrapper nor the array shape"
            );
        }

        parsed.into_record_set()
    }

    fn resource(&self, entity: EntityKind) -> String {
        self.config.endpoint(entity).path().to_string()
    }
}
