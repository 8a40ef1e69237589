use crate::core::ledger::LedgerDriver;
use crate::domain::model::{ApiRequest, ApiResponse, Person};
use crate::domain::ports::DocumentKey;
use crate::utils::error::{PatternError, Result};
use serde_json::{json, Value};
use uuid::Uuid;

/// CRUD handler for person records kept in the ledger.
pub struct PersonApi {
    driver: LedgerDriver,
    table: String,
}

impl PersonApi {
    pub fn new(driver: LedgerDriver, table: impl Into<String>) -> Self {
        Self {
            driver,
            table: table.into(),
        }
    }

    pub async fn handle(&self, request: ApiRequest) -> ApiResponse {
        let method = request.method();
        tracing::info!("{} person request", method);

        let result = match method.as_str() {
            "POST" => self.create(&request).await,
            "GET" => match Self::person_id(&request) {
                Ok(id) => self.fetch(id).await,
                Err(e) => Err(e),
            },
            "PUT" => self.update(&request).await,
            "DELETE" => match Self::person_id(&request) {
                Ok(id) => self.delete(id).await,
                Err(e) => Err(e),
            },
            other => Ok(ApiResponse::message(
                405,
                format!("Method {} not allowed", other),
            )),
        };

        result.unwrap_or_else(|e| ApiResponse::from_error(&e))
    }

    fn person_id(request: &ApiRequest) -> Result<&str> {
        request
            .path_parameter("personId")
            .ok_or_else(|| PatternError::validation("personId path parameter is required"))
    }

    fn parse_body(request: &ApiRequest) -> Result<Person> {
        let body = request
            .body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| PatternError::validation("Request body is required"))?;
        let person: Person = serde_json::from_str(body)?;
        if person.first_name.trim().is_empty() || person.last_name.trim().is_empty() {
            return Err(PatternError::validation("firstName and lastName are required"));
        }
        Ok(person)
    }

    fn key(&self, id: &str) -> DocumentKey {
        DocumentKey::new(&self.table, id)
    }

    /// Check-then-write: an existing record under the same id is returned untouched,
    /// so a retried create never overwrites.
    async fn create(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut person = Self::parse_body(request)?;
        if person.person_id.is_empty() {
            person.person_id = request
                .path_parameter("personId")
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
        }

        let key = self.key(&person.person_id);
        let document = serde_json::to_value(&person)?;
        let (created, stored) = self
            .driver
            .execute(move |txn| {
                let key = key.clone();
                let document = document.clone();
                Box::pin(async move {
                    if let Some(existing) = txn.get(&key).await? {
                        return Ok((false, existing));
                    }
                    txn.put(key, document.clone());
                    Ok((true, document))
                })
            })
            .await?;

        if created {
            tracing::info!("Created person {}", person.person_id);
            Ok(ApiResponse::json(201, &stored))
        } else {
            tracing::info!("Person {} already exists", person.person_id);
            Ok(ApiResponse::json(200, &stored))
        }
    }

    async fn fetch(&self, id: &str) -> Result<ApiResponse> {
        let key = self.key(id);
        let found = self
            .driver
            .execute(move |txn| {
                let key = key.clone();
                Box::pin(async move { txn.get(&key).await })
            })
            .await?;

        match found {
            Some(document) => Ok(ApiResponse::json(200, &document)),
            None => Err(PatternError::not_found("Person", id)),
        }
    }

    async fn update(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let id = Self::person_id(request)?.to_string();
        let mut person = Self::parse_body(request)?;
        person.person_id = id.clone();

        let key = self.key(&id);
        let document = serde_json::to_value(&person)?;
        let updated = self
            .driver
            .execute(move |txn| {
                let key = key.clone();
                let document = document.clone();
                Box::pin(async move {
                    if txn.get(&key).await?.is_none() {
                        return Err(PatternError::not_found("Person", key.id.clone()));
                    }
                    txn.put(key, document.clone());
                    Ok(document)
                })
            })
            .await?;

        tracing::info!("Updated person {}", id);
        Ok(ApiResponse::json(200, &updated))
    }

    async fn delete(&self, id: &str) -> Result<ApiResponse> {
        let key = self.key(id);
        self.driver
            .execute(move |txn| {
                let key = key.clone();
                Box::pin(async move {
                    if txn.get(&key).await?.is_none() {
                        return Err(PatternError::not_found("Person", key.id.clone()));
                    }
                    txn.delete(key);
                    Ok(())
                })
            })
            .await?;

        tracing::info!("Deleted person {}", id);
        Ok(ApiResponse::json(
            200,
            &json!({ "message": "Person deleted", "personId": id }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::InMemoryLedger;
    use crate::domain::settings::RetryPolicy;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn api(ledger: Arc<InMemoryLedger>) -> PersonApi {
        PersonApi::new(LedgerDriver::new(ledger, RetryPolicy::no_delay(4)), "people")
    }

    fn request(method: &str, id: Option<&str>, body: Option<Value>) -> ApiRequest {
        ApiRequest {
            http_method: method.to_string(),
            path_parameters: id
                .map(|id| HashMap::from([("personId".to_string(), id.to_string())]))
                .unwrap_or_default(),
            body: body.map(|b| b.to_string()),
            ..ApiRequest::default()
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let ledger = Arc::new(InMemoryLedger::new());
        let api = api(ledger.clone());
        let body = json!({"personId": "p-1", "firstName": "Ada", "lastName": "Lovelace"});

        let first = api.handle(request("POST", None, Some(body.clone()))).await;
        assert_eq!(first.status_code, 201);

        let again = json!({"personId": "p-1", "firstName": "Other", "lastName": "Name"});
        let second = api.handle(request("POST", None, Some(again))).await;
        assert_eq!(second.status_code, 200);
        assert_eq!(second.body_json().unwrap()["firstName"], "Ada");
        assert_eq!(ledger.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_records_map_to_404() {
        let api = api(Arc::new(InMemoryLedger::new()));
        let body = json!({"firstName": "Ada", "lastName": "Lovelace"});

        assert_eq!(api.handle(request("GET", Some("nope"), None)).await.status_code, 404);
        assert_eq!(
            api.handle(request("PUT", Some("nope"), Some(body))).await.status_code,
            404
        );
        assert_eq!(api.handle(request("DELETE", Some("nope"), None)).await.status_code, 404);
    }

    #[tokio::test]
    async fn test_update_survives_conflicts() {
        let ledger = Arc::new(InMemoryLedger::new());
        let api = api(ledger.clone());
        let created = json!({"personId": "p-2", "firstName": "Alan", "lastName": "Turing"});
        api.handle(request("POST", None, Some(created))).await;

        ledger.inject_conflicts(2);
        let changed = json!({"firstName": "Alan", "lastName": "Turing", "address": "Bletchley"});
        let response = api.handle(request("PUT", Some("p-2"), Some(changed))).await;

        assert_eq!(response.status_code, 200);
        let fetched = api.handle(request("GET", Some("p-2"), None)).await;
        assert_eq!(fetched.body_json().unwrap()["address"], "Bletchley");
    }

    #[tokio::test]
    async fn test_exhausted_conflicts_are_500() {
        let ledger = Arc::new(InMemoryLedger::new());
        let api = api(ledger.clone());
        ledger.inject_conflicts(100);
        let body = json!({"firstName": "Grace", "lastName": "Hopper"});

        let response = api.handle(request("POST", None, Some(body))).await;
        assert_eq!(response.status_code, 500);
        assert_eq!(response.body_json().unwrap()["message"], "Internal Server Error");
    }

    #[tokio::test]
    async fn test_validation_and_method_errors() {
        let api = api(Arc::new(InMemoryLedger::new()));

        let no_names = json!({"firstName": "", "lastName": "X"});
        assert_eq!(api.handle(request("POST", None, Some(no_names))).await.status_code, 400);
        assert_eq!(api.handle(request("POST", None, None)).await.status_code, 400);

        let mut malformed = request("POST", None, None);
        malformed.body = Some("{not json".to_string());
        assert_eq!(api.handle(malformed).await.status_code, 400);

        assert_eq!(api.handle(request("GET", None, None)).await.status_code, 400);
        assert_eq!(api.handle(request("PATCH", Some("p"), None)).await.status_code, 405);
    }

    #[tokio::test]
    async fn test_delete_removes_record() {
        let api = api(Arc::new(InMemoryLedger::new()));
        let body = json!({"personId": "p-3", "firstName": "Edsger", "lastName": "Dijkstra"});
        api.handle(request("POST", None, Some(body))).await;

        assert_eq!(api.handle(request("DELETE", Some("p-3"), None)).await.status_code, 200);
        assert_eq!(api.handle(request("GET", Some("p-3"), None)).await.status_code, 404);
    }
}
