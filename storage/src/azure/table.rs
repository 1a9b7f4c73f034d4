use super::{StorageAccount, join_segments, observe, request_date, unexpected_status};
use crate::error::StorageError;
use crate::table::{TableStore, validate_key};
use crate::types::{Continuation, EntityPage, TableEntity};
use async_trait::async_trait;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, IF_MATCH};
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use url::Url;

const API_VERSION: &str = "2019-02-02";
const ACCEPT_NO_METADATA: &str = "application/json;odata=nometadata";
const NEXT_PARTITION_KEY: &str = "x-ms-continuation-nextpartitionkey";
const NEXT_ROW_KEY: &str = "x-ms-continuation-nextrowkey";

const PARTITION_KEY: &str = "PartitionKey";
const ROW_KEY: &str = "RowKey";
const TIMESTAMP: &str = "Timestamp";

#[derive(Deserialize)]
struct QueryResponse {
    value: Vec<Map<String, Value>>,
}

/// One table of an Azure storage account.
pub struct AzureTableStore {
    client: reqwest::Client,
    account: StorageAccount,
    table: String,
}

impl AzureTableStore {
    /// Connects to `table`, creating it if it does not exist yet.
    pub async fn connect(
        account: StorageAccount,
        table: &str,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let store = AzureTableStore {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            account,
            table: table.to_string(),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    fn request(&self, method: Method, url: Url) -> Result<RequestBuilder, StorageError> {
        let date = request_date();
        let string_to_sign = format!("{date}\n{}", self.account.canonical_resource(&url));

        Ok(self
            .client
            .request(method, url)
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header("DataServiceVersion", "3.0;NetFx")
            .header(ACCEPT, ACCEPT_NO_METADATA)
            .header(AUTHORIZATION, self.account.authorization(&string_to_sign)?))
    }

    async fn ensure_table(&self) -> Result<(), StorageError> {
        let url = join_segments(&self.account.table_endpoint, ["Tables"])?;
        let response = self
            .request(Method::POST, url)?
            .header(CONTENT_TYPE, "application/json")
            .header("Prefer", "return-no-content")
            .json(&serde_json::json!({ "TableName": self.table }))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => Ok(()),
            status if status.is_success() => {
                tracing::info!(table = %self.table, "created table");
                Ok(())
            }
            _ => Err(unexpected_status(response).await),
        }
    }

    fn entity_url(&self, partition_key: &str, row_key: &str) -> Result<Url, StorageError> {
        validate_key(partition_key)?;
        validate_key(row_key)?;
        let segment = format!(
            "{}(PartitionKey='{}',RowKey='{}')",
            self.table,
            escape_literal(partition_key),
            escape_literal(row_key)
        );
        join_segments(&self.account.table_endpoint, [segment.as_str()])
    }

    fn query_url(
        &self,
        filter: Option<&str>,
        continuation: Option<&Continuation>,
    ) -> Result<Url, StorageError> {
        let segment = format!("{}()", self.table);
        let mut url = join_segments(&self.account.table_endpoint, [segment.as_str()])?;

        let mut params = Vec::new();
        if let Some(filter) = filter {
            params.push(("$filter", filter));
        }
        if let Some(continuation) = continuation {
            params.push(("NextPartitionKey", continuation.next_partition_key.as_str()));
            if let Some(row_key) = &continuation.next_row_key {
                params.push(("NextRowKey", row_key.as_str()));
            }
        }
        if !params.is_empty() {
            let query = params
                .iter()
                .map(|(name, value)| {
                    format!("{name}={}", utf8_percent_encode(value, NON_ALPHANUMERIC))
                })
                .collect::<Vec<_>>()
                .join("&");
            url.set_query(Some(&query));
        }
        Ok(url)
    }

    async fn query(
        &self,
        filter: Option<&str>,
        continuation: Option<&Continuation>,
    ) -> Result<EntityPage, StorageError> {
        let url = self.query_url(filter, continuation)?;
        let response = self.request(Method::GET, url)?.send().await?;
        if !response.status().is_success() {
            return Err(unexpected_status(response).await);
        }

        let header = |name: &str| {
            response
                .headers()
                .get(name)
                .and_then(|value| value.to_str().ok())
                .map(String::from)
        };
        let continuation =
            header(NEXT_PARTITION_KEY).map(|pk| Continuation::new(pk, header(NEXT_ROW_KEY)));

        let body: QueryResponse = response.json().await?;
        let entities = body
            .value
            .into_iter()
            .filter_map(entity_from_json)
            .collect();

        Ok(EntityPage {
            entities,
            continuation,
        })
    }

    async fn put(&self, entity: TableEntity) -> Result<(), StorageError> {
        let url = self.entity_url(&entity.partition_key, &entity.row_key)?;
        let body = entity_to_json(entity);
        let response = self
            .request(Method::PUT, url)?
            .header(CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected_status(response).await)
        }
    }

    async fn remove(&self, partition_key: &str, row_key: &str) -> Result<(), StorageError> {
        let url = self.entity_url(partition_key, row_key)?;
        let response = self
            .request(Method::DELETE, url)?
            .header(IF_MATCH, "*")
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            _ => Err(unexpected_status(response).await),
        }
    }

    async fn find_all(&self, property: &str, value: &str) -> Result<Vec<TableEntity>, StorageError> {
        let filter = format!("{property} eq '{}'", escape_literal(value));
        let mut found = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.query(Some(&filter), continuation.as_ref()).await?;
            found.extend(page.entities);
            match page.continuation {
                Some(next) => continuation = Some(next),
                None => return Ok(found),
            }
        }
    }
}

/// OData string literals escape a quote by doubling it.
fn escape_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn entity_to_json(entity: TableEntity) -> Map<String, Value> {
    let mut body = entity.properties;
    body.insert(PARTITION_KEY.into(), Value::String(entity.partition_key));
    body.insert(ROW_KEY.into(), Value::String(entity.row_key));
    body
}

fn entity_from_json(mut raw: Map<String, Value>) -> Option<TableEntity> {
    let partition_key = match raw.remove(PARTITION_KEY) {
        Some(Value::String(pk)) => pk,
        _ => return None,
    };
    let row_key = match raw.remove(ROW_KEY) {
        Some(Value::String(rk)) => rk,
        _ => return None,
    };
    raw.remove(TIMESTAMP);
    raw.retain(|name, _| !name.starts_with("odata."));

    Some(TableEntity {
        partition_key,
        row_key,
        properties: raw,
    })
}

#[async_trait]
impl TableStore for AzureTableStore {
    async fn upsert(&self, entity: TableEntity) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.put(entity).await;
        observe("table", "upsert", start, &result);
        result
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), StorageError> {
        let start = Instant::now();
        let result = self.remove(partition_key, row_key).await;
        observe("table", "delete", start, &result);
        result
    }

    async fn list_page(
        &self,
        continuation: Option<&Continuation>,
    ) -> Result<EntityPage, StorageError> {
        let start = Instant::now();
        let result = self.query(None, continuation).await;
        observe("table", "list", start, &result);
        result
    }

    async fn find(&self, property: &str, value: &str) -> Result<Vec<TableEntity>, StorageError> {
        let start = Instant::now();
        let result = self.find_all(property, value).await;
        observe("table", "find", start, &result);
        result
    }
}
