//! Callable cloud functions over HTTPS.
//!
//! Request body: `{ "data": <args> }`, authenticated with the user's ID token.
//! Response body: `{ "result": <value> }` on success, `{ "error": { "status", "message" } }` otherwise.
use std::sync::{PoisonError, RwLock};

use futures::FutureExt;
use futures::future::BoxFuture;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::SyncConfig;
use crate::data_model::MasteryRecord;
use crate::error::RemoteCallError;
use crate::remote::ReviewRemote;

const APPLY_REVIEW_OUTCOME: &str = "applyReviewOutcome";
const GET_DUE_REVIEW_ITEMS: &str = "getDueReviewItems";

pub struct CallableRemote {
    client: reqwest::Client,
    base_url: String,
    id_token: RwLock<Option<String>>,
}

impl CallableRemote {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            id_token: RwLock::new(None),
        }
    }

    pub fn from_config(config: &SyncConfig) -> Option<Self> {
        config.functions_base_url.as_deref().map(Self::new)
    }

    /// Set (or clear, on sign-out) the token sent with every call.
    pub fn set_id_token(&self, id_token: Option<String>) {
        *self
            .id_token
            .write()
            .unwrap_or_else(PoisonError::into_inner) = id_token;
    }

    async fn call(&self, name: &str, data: Value) -> Result<Value, RemoteCallError> {
        let Some(id_token) = self
            .id_token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
        else {
            return Err(RemoteCallError::Unauthenticated);
        };

        let url = format!("{}/{name}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(id_token)
            .json(&json!({ "data": data }))
            .send()
            .await
            .map_err(|e| RemoteCallError::Network(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RemoteCallError::Unauthenticated);
        }

        let body = response
            .text()
            .await
            .map_err(|e| RemoteCallError::Network(e.to_string()))?;

        parse_callable_response(status, &body)
    }
}

impl ReviewRemote for CallableRemote {
    fn apply_review_outcome<'a>(
        &'a self,
        user_id: &'a str,
        item_id: &'a str,
        is_correct: bool,
    ) -> BoxFuture<'a, Result<(), RemoteCallError>> {
        async move {
            log::debug!("Calling {APPLY_REVIEW_OUTCOME} for {user_id}, item {item_id}");
            self.call(
                APPLY_REVIEW_OUTCOME,
                json!({ "itemId": item_id, "isCorrect": is_correct }),
            )
            .await
            .map(|_| ())
        }
        .boxed()
    }

    fn get_due_review_items<'a>(
        &'a self,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<Vec<MasteryRecord>, RemoteCallError>> {
        async move {
            log::debug!("Calling {GET_DUE_REVIEW_ITEMS} for {user_id}");
            let result = self.call(GET_DUE_REVIEW_ITEMS, json!({})).await?;
            parse_due_items(result)
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
struct CallableResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<CallableError>,
}

#[derive(Debug, Deserialize)]
struct CallableError {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn parse_callable_response(status: StatusCode, body: &str) -> Result<Value, RemoteCallError> {
    let parsed: Result<CallableResponse, _> = serde_json::from_str(body);

    match parsed {
        Ok(CallableResponse {
            error: Some(error), ..
        }) => {
            if error.status.as_deref() == Some("UNAUTHENTICATED") {
                return Err(RemoteCallError::Unauthenticated);
            }
            Err(RemoteCallError::Rejected(
                error
                    .message
                    .or(error.status)
                    .unwrap_or_else(|| format!("status {status}")),
            ))
        }
        Ok(CallableResponse { result, .. }) if status.is_success() => {
            Ok(result.unwrap_or(Value::Null))
        }
        Ok(_) => Err(RemoteCallError::Rejected(format!("status {status}"))),
        Err(e) if status.is_success() => Err(RemoteCallError::Malformed(format!(
            "{e}\nResponse body: {body}"
        ))),
        Err(_) => Err(RemoteCallError::Rejected(format!("status {status}: {body}"))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DueItemsPayload {
    List(Vec<MasteryRecord>),
    Wrapped { items: Vec<MasteryRecord> },
}

fn parse_due_items(result: Value) -> Result<Vec<MasteryRecord>, RemoteCallError> {
    if result.is_null() {
        return Ok(Vec::new());
    }
    match serde_json::from_value::<DueItemsPayload>(result) {
        Ok(DueItemsPayload::List(items)) | Ok(DueItemsPayload::Wrapped { items }) => Ok(items),
        Err(e) => Err(RemoteCallError::Malformed(format!(
            "failed to parse due items: {e}"
        ))),
    }
}
