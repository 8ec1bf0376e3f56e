use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::provider::ProvideCredentials;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue, BillingMode, KeySchemaElement, KeyType,
    ScalarAttributeType, TableStatus,
};
use aws_sdk_dynamodb::Client as DynamoDbClient;
use chrono::{DateTime, SecondsFormat, Utc};
use statelock_core::{LockError, LockResult};
use tracing::{debug, instrument, warn};

/// Partition key of the lock table.
pub const STATE_FILE_ID: &str = "StateFileId";
pub const USERNAME: &str = "Username";
pub const HOSTNAME: &str = "Hostname";
pub const CREATION_DATE: &str = "CreationDate";

const TABLE_ACTIVE_MAX_POLLS: u32 = 30;
const TABLE_ACTIVE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// The item stored while a lock is held.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRecord {
    pub state_file_id: String,
    pub username: String,
    pub hostname: String,
    pub created_at: DateTime<Utc>,
}

impl LockRecord {
    /// Record for the current user and host, timestamped now.
    pub fn for_current_process(state_file_id: impl Into<String>) -> Self {
        Self {
            state_file_id: state_file_id.into(),
            username: env_or_unknown(&["USER", "USERNAME"]),
            hostname: env_or_unknown(&["HOSTNAME", "COMPUTERNAME"]),
            created_at: Utc::now(),
        }
    }

    pub fn to_item(&self) -> HashMap<String, AttributeValue> {
        let mut item = HashMap::new();
        item.insert(
            STATE_FILE_ID.to_string(),
            AttributeValue::S(self.state_file_id.clone()),
        );
        item.insert(USERNAME.to_string(), AttributeValue::S(self.username.clone()));
        item.insert(HOSTNAME.to_string(), AttributeValue::S(self.hostname.clone()));
        item.insert(
            CREATION_DATE.to_string(),
            AttributeValue::S(self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
        );
        item
    }

    pub fn from_item(item: &HashMap<String, AttributeValue>) -> LockResult<Self> {
        let created_at = string_attr(item, CREATION_DATE)?;
        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| {
                LockError::transport("decode lock item", CREATION_DATE, e)
            })?
            .with_timezone(&Utc);

        Ok(Self {
            state_file_id: string_attr(item, STATE_FILE_ID)?,
            username: string_attr(item, USERNAME)?,
            hostname: string_attr(item, HOSTNAME)?,
            created_at,
        })
    }
}

impl fmt::Display for LockRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} since {}",
            self.username,
            self.hostname,
            self.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )
    }
}

fn env_or_unknown(names: &[&str]) -> String {
    names
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn string_attr(item: &HashMap<String, AttributeValue>, name: &str) -> LockResult<String> {
    item.get(name)
        .and_then(|value| value.as_s().ok())
        .cloned()
        .ok_or_else(|| LockError::transport("decode lock item", name, "missing string attribute"))
}

/// Conditional-write table operations the DynamoDB lock needs.
///
/// Implementations must make `put_if_absent` atomic: of any number of
/// concurrent callers for the same id, at most one sees `true`.
#[async_trait]
pub trait LockTable: Send + Sync {
    /// Make sure the lock table exists and is active, creating it if needed.
    async fn ensure_table(&self, table_name: &str) -> LockResult<()>;

    /// Write `record` unless an item with the same id exists.
    /// Returns `false` when the item already exists.
    async fn put_if_absent(&self, table_name: &str, record: &LockRecord) -> LockResult<bool>;

    /// Current holder of `state_file_id`, if any.
    async fn get_record(
        &self,
        table_name: &str,
        state_file_id: &str,
    ) -> LockResult<Option<LockRecord>>;

    /// Delete the item for `state_file_id`. Deleting a missing item succeeds.
    async fn delete_record(&self, table_name: &str, state_file_id: &str) -> LockResult<()>;
}

/// `LockTable` over the AWS DynamoDB API.
#[derive(Clone, Debug)]
pub struct DynamoDbTable {
    client: DynamoDbClient,
}

impl DynamoDbTable {
    pub fn new(client: DynamoDbClient) -> Self {
        Self { client }
    }

    /// Build a client for `region` from the default AWS credential chain.
    ///
    /// Fails with `CredentialsMissing` when the chain yields no credentials,
    /// before any table call is made.
    #[instrument(level = "debug")]
    pub async fn connect(region: &str) -> LockResult<Self> {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;

        let provider = config.credentials_provider().ok_or_else(|| {
            LockError::CredentialsMissing("no AWS credentials provider is configured".to_string())
        })?;
        provider.provide_credentials().await.map_err(|e| {
            LockError::CredentialsMissing(format!("unable to load AWS credentials: {}", e))
        })?;

        debug!("DynamoDB client ready for region {}", region);
        Ok(Self::new(DynamoDbClient::new(&config)))
    }

    async fn create_table(&self, table_name: &str) -> LockResult<()> {
        let key_schema = KeySchemaElement::builder()
            .attribute_name(STATE_FILE_ID)
            .key_type(KeyType::Hash)
            .build()
            .map_err(|e| LockError::transport("build key schema", table_name, e))?;

        let key_attr = AttributeDefinition::builder()
            .attribute_name(STATE_FILE_ID)
            .attribute_type(ScalarAttributeType::S)
            .build()
            .map_err(|e| LockError::transport("build attribute definition", table_name, e))?;

        let result = self
            .client
            .create_table()
            .table_name(table_name)
            .billing_mode(BillingMode::PayPerRequest)
            .key_schema(key_schema)
            .attribute_definitions(key_attr)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Created lock table {}", table_name);
                Ok(())
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_in_use_exception() {
                    debug!("Lock table {} created concurrently", table_name);
                    Ok(())
                } else {
                    Err(LockError::transport("create table", table_name, service_error))
                }
            }
        }
    }

    async fn wait_for_table_active(&self, table_name: &str) -> LockResult<()> {
        for attempt in 1..=TABLE_ACTIVE_MAX_POLLS {
            let status = match self
                .client
                .describe_table()
                .table_name(table_name)
                .send()
                .await
            {
                Ok(output) => output.table().and_then(|t| t.table_status()).cloned(),
                Err(e) => {
                    let service_error = e.into_service_error();
                    if !service_error.is_resource_not_found_exception() {
                        return Err(LockError::transport("describe table", table_name, service_error));
                    }
                    // DescribeTable is eventually consistent right after CreateTable.
                    Some(TableStatus::Creating)
                }
            };

            match status {
                Some(TableStatus::Active) => return Ok(()),
                Some(TableStatus::Creating) | Some(TableStatus::Updating) => {
                    debug!(attempt, "Waiting for lock table {} to become active", table_name);
                    tokio::time::sleep(TABLE_ACTIVE_POLL_INTERVAL).await;
                }
                other => {
                    return Err(LockError::transport(
                        "describe table",
                        table_name,
                        format!("unexpected table status {:?}", other),
                    ));
                }
            }
        }

        Err(LockError::transport(
            "describe table",
            table_name,
            format!("not active after {} polls", TABLE_ACTIVE_MAX_POLLS),
        ))
    }
}

#[async_trait]
impl LockTable for DynamoDbTable {
    #[instrument(skip(self), level = "debug")]
    async fn ensure_table(&self, table_name: &str) -> LockResult<()> {
        match self
            .client
            .describe_table()
            .table_name(table_name)
            .send()
            .await
        {
            Ok(output) => {
                if output.table().and_then(|t| t.table_status()) == Some(&TableStatus::Active) {
                    return Ok(());
                }
            }
            Err(e) => {
                let service_error = e.into_service_error();
                if !service_error.is_resource_not_found_exception() {
                    return Err(LockError::transport("describe table", table_name, service_error));
                }
                warn!("Lock table {} does not exist, creating it", table_name);
                self.create_table(table_name).await?;
            }
        }

        self.wait_for_table_active(table_name).await
    }

    #[instrument(skip(self, record), level = "debug", fields(state_file_id = %record.state_file_id))]
    async fn put_if_absent(&self, table_name: &str, record: &LockRecord) -> LockResult<bool> {
        let result = self
            .client
            .put_item()
            .table_name(table_name)
            .set_item(Some(record.to_item()))
            .condition_expression(format!("attribute_not_exists({})", STATE_FILE_ID))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_conditional_check_failed_exception() {
                    Ok(false)
                } else {
                    Err(LockError::transport("put lock item", table_name, service_error))
                }
            }
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn get_record(
        &self,
        table_name: &str,
        state_file_id: &str,
    ) -> LockResult<Option<LockRecord>> {
        let output = self
            .client
            .get_item()
            .table_name(table_name)
            .key(STATE_FILE_ID, AttributeValue::S(state_file_id.to_string()))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| LockError::transport("get lock item", table_name, e.into_service_error()))?;

        output.item().map(LockRecord::from_item).transpose()
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_record(&self, table_name: &str, state_file_id: &str) -> LockResult<()> {
        let result = self
            .client
            .delete_item()
            .table_name(table_name)
            .key(STATE_FILE_ID, AttributeValue::S(state_file_id.to_string()))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_resource_not_found_exception() {
                    debug!("Lock table {} is gone, nothing to delete", table_name);
                    Ok(())
                } else {
                    Err(LockError::transport("delete lock item", table_name, service_error))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use aws_sdk_dynamodb::config::{BehaviorVersion, Credentials};
    use chrono::TimeZone;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    const AMZ_JSON: &str = "application/x-amz-json-1.0";

    fn record() -> LockRecord {
        LockRecord {
            state_file_id: "prod/terraform.tfstate".to_string(),
            username: "ci".to_string(),
            hostname: "runner-7".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 10, 19, 8, 30, 0).unwrap(),
        }
    }

    fn table_for(server: &MockServer) -> DynamoDbTable {
        let config = aws_sdk_dynamodb::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1"))
            .endpoint_url(server.uri())
            .credentials_provider(Credentials::new("test", "test", None, None, "test"))
            .build();
        DynamoDbTable::new(DynamoDbClient::from_conf(config))
    }

    fn target(operation: &str) -> String {
        format!("DynamoDB_20120810.{}", operation)
    }

    #[test]
    fn test_record_item_roundtrip_keeps_attribute_names() {
        let item = record().to_item();
        assert_eq!(
            item.get(CREATION_DATE),
            Some(&AttributeValue::S("2026-10-19T08:30:00Z".to_string()))
        );
        assert_eq!(LockRecord::from_item(&item).unwrap(), record());
    }

    #[test]
    fn test_record_from_incomplete_item() {
        let mut item = record().to_item();
        item.remove(USERNAME);
        assert!(LockRecord::from_item(&item).is_err());
    }

    #[test]
    fn test_record_display() {
        assert_eq!(record().to_string(), "ci@runner-7 since 2026-10-19T08:30:00Z");
    }

    #[tokio::test]
    async fn test_put_if_absent_granted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("PutItem").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", AMZ_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let table = table_for(&server);
        assert!(table.put_if_absent("locks", &record()).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_if_absent_conditional_check_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("PutItem").as_str()))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"__type":"com.amazonaws.dynamodb.v20120810#ConditionalCheckFailedException","message":"The conditional request failed"}"#,
                AMZ_JSON,
            ))
            .mount(&server)
            .await;

        let table = table_for(&server);
        assert!(!table.put_if_absent("locks", &record()).await.unwrap());
    }

    #[tokio::test]
    async fn test_put_if_absent_other_error_is_transport() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("PutItem").as_str()))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"__type":"com.amazonaws.dynamodb.v20120810#ResourceNotFoundException","message":"Requested resource not found"}"#,
                AMZ_JSON,
            ))
            .mount(&server)
            .await;

        let table = table_for(&server);
        let err = table.put_if_absent("locks", &record()).await.unwrap_err();
        assert!(matches!(err, LockError::Transport { .. }), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_get_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("GetItem").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"Item":{"StateFileId":{"S":"prod/terraform.tfstate"},"Username":{"S":"ci"},"Hostname":{"S":"runner-7"},"CreationDate":{"S":"2026-10-19T08:30:00Z"}}}"#,
                AMZ_JSON,
            ))
            .mount(&server)
            .await;

        let table = table_for(&server);
        let holder = table
            .get_record("locks", "prod/terraform.tfstate")
            .await
            .unwrap();
        assert_eq!(holder, Some(record()));
    }

    #[tokio::test]
    async fn test_get_record_absent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("GetItem").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", AMZ_JSON))
            .mount(&server)
            .await;

        let table = table_for(&server);
        assert_eq!(table.get_record("locks", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("DeleteItem").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", AMZ_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let table = table_for(&server);
        table
            .delete_record("locks", "prod/terraform.tfstate")
            .await
            .unwrap();
    }

    const NOT_FOUND: &str = r#"{"__type":"com.amazonaws.dynamodb.v20120810#ResourceNotFoundException","message":"Requested resource not found"}"#;
    const ACTIVE: &str = r#"{"Table":{"TableName":"locks","TableStatus":"ACTIVE"}}"#;

    fn describe_not_found(times: u64) -> Mock {
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("DescribeTable").as_str()))
            .respond_with(ResponseTemplate::new(400).set_body_raw(NOT_FOUND, AMZ_JSON))
            .up_to_n_times(times)
    }

    fn describe_active() -> Mock {
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("DescribeTable").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(ACTIVE, AMZ_JSON))
    }

    #[tokio::test]
    async fn test_ensure_table_creates_and_waits_through_not_found() {
        let server = MockServer::start().await;
        // Missing before creation, then not yet visible on the first poll.
        describe_not_found(2).mount(&server).await;
        describe_active().mount(&server).await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("CreateTable").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", AMZ_JSON))
            .expect(1)
            .mount(&server)
            .await;

        let table = table_for(&server);
        table.ensure_table("locks").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_table_created_concurrently() {
        let server = MockServer::start().await;
        describe_not_found(1).mount(&server).await;
        describe_active().mount(&server).await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("CreateTable").as_str()))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"__type":"com.amazonaws.dynamodb.v20120810#ResourceInUseException","message":"Table already exists: locks"}"#,
                AMZ_JSON,
            ))
            .expect(1)
            .mount(&server)
            .await;

        let table = table_for(&server);
        table.ensure_table("locks").await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_table_other_describe_error_while_waiting() {
        let server = MockServer::start().await;
        describe_not_found(1).mount(&server).await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("DescribeTable").as_str()))
            .respond_with(ResponseTemplate::new(400).set_body_raw(
                r#"{"__type":"com.amazonaws.dynamodb.v20120810#AccessDeniedException","message":"not authorized"}"#,
                AMZ_JSON,
            ))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("CreateTable").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", AMZ_JSON))
            .mount(&server)
            .await;

        let table = table_for(&server);
        let err = table.ensure_table("locks").await.unwrap_err();
        assert!(matches!(err, LockError::Transport { .. }), "unexpected error: {err:?}");
    }

    #[tokio::test]
    async fn test_ensure_table_already_active() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("DescribeTable").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"{"Table":{"TableName":"locks","TableStatus":"ACTIVE"}}"#,
                AMZ_JSON,
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("x-amz-target", target("CreateTable").as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_raw("{}", AMZ_JSON))
            .expect(0)
            .mount(&server)
            .await;

        let table = table_for(&server);
        table.ensure_table("locks").await.unwrap();
    }
}
