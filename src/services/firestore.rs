use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use super::identity::{AuthError, IdentityProvider};
use crate::models::{ChatSession, Message, Sender};

const DEFAULT_BASE_URL: &str = "https://firestore.googleapis.com/v1";
const PAGE_SIZE: &str = "100";
/// Firestore rejects commits with more writes than this.
const MAX_COMMIT_WRITES: usize = 500;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Firestore rejected the request (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Malformed document: {0}")]
    Malformed(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Per-user chat documents, newest first.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list_sessions(&self, uid: &str) -> Result<Vec<ChatSession>, StoreError>;

    /// Create or fully replace one session document.
    async fn upsert_session(&self, uid: &str, session: &ChatSession) -> Result<(), StoreError>;

    async fn delete_session(&self, uid: &str, session_id: &str) -> Result<(), StoreError>;

    /// Delete every chat document of `uid` in a single commit.
    async fn delete_all(&self, uid: &str) -> Result<(), StoreError>;
}

/// A typed Firestore value as it appears in the REST API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    StringValue(String),
    TimestampValue(String),
    ArrayValue {
        #[serde(default)]
        values: Vec<Value>,
    },
    MapValue {
        #[serde(default)]
        fields: BTreeMap<String, Value>,
    },
}

impl Value {
    fn timestamp(at: &DateTime<Utc>) -> Self {
        Value::TimestampValue(at.to_rfc3339_opts(SecondsFormat::Micros, true))
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Value::StringValue(s) => Some(s),
            _ => None,
        }
    }

    fn as_bool(&self) -> Option<bool> {
        match self {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }

    fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::TimestampValue(raw) => DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Document {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    documents: Vec<Document>,
    next_page_token: Option<String>,
}

#[derive(Debug, Serialize)]
struct CommitRequest {
    writes: Vec<Write>,
}

#[derive(Debug, Serialize)]
struct Write {
    delete: String,
}

/// Deletes for `names`, split into commits Firestore accepts.
fn delete_batches(names: Vec<String>) -> Vec<CommitRequest> {
    names
        .chunks(MAX_COMMIT_WRITES)
        .map(|chunk| CommitRequest {
            writes: chunk
                .iter()
                .map(|name| Write {
                    delete: name.clone(),
                })
                .collect(),
        })
        .collect()
}

fn encode_message(message: &Message) -> Value {
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), Value::StringValue(message.id.clone()));
    fields.insert("text".to_string(), Value::StringValue(message.text.clone()));
    fields.insert(
        "sender".to_string(),
        Value::StringValue(message.sender.as_str().to_string()),
    );
    fields.insert("timestamp".to_string(), Value::timestamp(&message.timestamp));
    if message.is_error {
        fields.insert("isError".to_string(), Value::BooleanValue(true));
    }
    if message.streaming {
        fields.insert("streaming".to_string(), Value::BooleanValue(true));
    }
    Value::MapValue { fields }
}

fn decode_message(value: &Value) -> Result<Message, StoreError> {
    let Value::MapValue { fields } = value else {
        return Err(StoreError::Malformed("message is not a map".into()));
    };
    let text_field = |key: &str| {
        fields
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::Malformed(format!("message field `{}` missing", key)))
    };
    let flag = |key: &str| fields.get(key).and_then(Value::as_bool).unwrap_or(false);

    let sender = Sender::from_str(text_field("sender")?)
        .ok_or_else(|| StoreError::Malformed("unknown sender".into()))?;
    let timestamp = fields
        .get("timestamp")
        .and_then(Value::as_timestamp)
        .ok_or_else(|| StoreError::Malformed("message timestamp missing".into()))?;

    Ok(Message {
        id: text_field("id")?.to_string(),
        text: text_field("text")?.to_string(),
        sender,
        timestamp,
        is_error: flag("isError"),
        streaming: flag("streaming"),
    })
}

/// Document fields mirroring a session, with native timestamp values.
pub fn encode_session(session: &ChatSession) -> BTreeMap<String, Value> {
    let mut fields = BTreeMap::new();
    fields.insert("id".to_string(), Value::StringValue(session.id.clone()));
    fields.insert("title".to_string(), Value::StringValue(session.title.clone()));
    fields.insert(
        "messages".to_string(),
        Value::ArrayValue {
            values: session.messages.iter().map(encode_message).collect(),
        },
    );
    fields.insert("lastActive".to_string(), Value::timestamp(&session.last_active));
    if let Some(instruction) = &session.system_instruction {
        fields.insert(
            "systemInstruction".to_string(),
            Value::StringValue(instruction.clone()),
        );
    }
    fields
}

/// Rebuild a session; its id is the last segment of the document name.
pub fn decode_session(document: &Document) -> Result<ChatSession, StoreError> {
    let id = document
        .name
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::Malformed("document has no name".into()))?;
    let fields = &document.fields;

    let messages = match fields.get("messages") {
        Some(Value::ArrayValue { values }) => values
            .iter()
            .map(decode_message)
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };
    let last_active = fields
        .get("lastActive")
        .and_then(Value::as_timestamp)
        .ok_or_else(|| StoreError::Malformed(format!("{}: lastActive missing", id)))?;

    Ok(ChatSession {
        id: id.to_string(),
        title: fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        messages,
        last_active,
        system_instruction: fields
            .get("systemInstruction")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

/// Firestore over REST, authenticated with the identity provider's ID token.
pub struct FirestoreStore {
    client: Client,
    base_url: String,
    project_id: String,
    identity: Arc<dyn IdentityProvider>,
}

impl FirestoreStore {
    pub fn new(project_id: String, identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            client: Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            project_id,
            identity,
        }
    }

    fn database_name(&self) -> String {
        format!("projects/{}/databases/(default)", self.project_id)
    }

    /// `.../documents/users/{uid}/chats[/{id}]`, with every segment escaped.
    fn chats_url(&self, uid: &str, session_id: Option<&str>) -> Result<Url, StoreError> {
        let mut url = Url::parse(&self.base_url)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StoreError::Malformed("base URL cannot be a base".into()))?;
            segments.extend([
                "projects",
                self.project_id.as_str(),
                "databases",
                "(default)",
                "documents",
                "users",
                uid,
                "chats",
            ]);
            if let Some(id) = session_id {
                segments.push(id);
            }
        }
        Ok(url)
    }

    fn commit_url(&self) -> String {
        format!("{}/{}/documents:commit", self.base_url, self.database_name())
    }

    async fn send(
        &self,
        method: Method,
        url: impl reqwest::IntoUrl,
        query: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<String, StoreError> {
        let token = self.identity.id_token().await?;
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::NetworkError(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::NetworkError(e.to_string()))?;

        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: error_message(&text),
            });
        }
        Ok(text)
    }

    async fn list_documents(&self, uid: &str, ordered: bool) -> Result<Vec<Document>, StoreError> {
        let url = self.chats_url(uid, None)?;
        let mut documents = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![("pageSize", PAGE_SIZE)];
            if ordered {
                query.push(("orderBy", "lastActive desc"));
            }
            if let Some(token) = page_token.as_deref() {
                query.push(("pageToken", token));
            }

            let body = self.send(Method::GET, url.clone(), &query, None).await?;
            let page: ListResponse =
                serde_json::from_str(&body).map_err(|e| StoreError::Malformed(e.to_string()))?;
            documents.extend(page.documents);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(documents)
    }
}

fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct Envelope {
        error: Inner,
    }
    #[derive(Deserialize)]
    struct Inner {
        message: String,
    }
    serde_json::from_str::<Envelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(200).collect())
}

#[async_trait]
impl DocumentStore for FirestoreStore {
    async fn list_sessions(&self, uid: &str) -> Result<Vec<ChatSession>, StoreError> {
        let documents = self.list_documents(uid, true).await?;
        let mut sessions = Vec::with_capacity(documents.len());
        for document in &documents {
            match decode_session(document) {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping unreadable chat document: {}", e),
            }
        }
        Ok(sessions)
    }

    async fn upsert_session(&self, uid: &str, session: &ChatSession) -> Result<(), StoreError> {
        let url = self.chats_url(uid, Some(&session.id))?;
        let document = Document {
            name: String::new(),
            fields: encode_session(session),
        };
        let body =
            serde_json::to_value(&document).map_err(|e| StoreError::Malformed(e.to_string()))?;
        self.send(Method::PATCH, url, &[], Some(body)).await?;
        Ok(())
    }

    async fn delete_session(&self, uid: &str, session_id: &str) -> Result<(), StoreError> {
        let url = self.chats_url(uid, Some(session_id))?;
        self.send(Method::DELETE, url, &[], None).await?;
        Ok(())
    }

    async fn delete_all(&self, uid: &str) -> Result<(), StoreError> {
        let documents = self.list_documents(uid, false).await?;
        let names = documents.into_iter().map(|d| d.name).collect();
        for commit in delete_batches(names) {
            let body = serde_json::to_value(&commit)
                .map_err(|e| StoreError::Malformed(e.to_string()))?;
            self.send(Method::POST, self.commit_url(), &[], Some(body))
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use chrono::TimeZone;

    /// Keeps documents in memory; can be told to fail reads.
    #[derive(Default)]
    pub(crate) struct MemoryStore {
        pub docs: Mutex<BTreeMap<String, BTreeMap<String, Document>>>,
        pub fail_reads: bool,
    }

    impl MemoryStore {
        pub(crate) fn failing() -> Self {
            Self {
                fail_reads: true,
                ..Default::default()
            }
        }

        pub(crate) fn stored(&self, uid: &str) -> Vec<ChatSession> {
            self.docs
                .lock()
                .unwrap()
                .get(uid)
                .map(|chats| chats.values().map(|d| decode_session(d).unwrap()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl DocumentStore for MemoryStore {
        async fn list_sessions(&self, uid: &str) -> Result<Vec<ChatSession>, StoreError> {
            if self.fail_reads {
                return Err(StoreError::NetworkError("offline".into()));
            }
            let mut sessions = self.stored(uid);
            sessions.sort_by(|a, b| b.last_active.cmp(&a.last_active));
            Ok(sessions)
        }

        async fn upsert_session(&self, uid: &str, session: &ChatSession) -> Result<(), StoreError> {
            let document = Document {
                name: format!("users/{}/chats/{}", uid, session.id),
                fields: encode_session(session),
            };
            self.docs
                .lock()
                .unwrap()
                .entry(uid.to_string())
                .or_default()
                .insert(session.id.clone(), document);
            Ok(())
        }

        async fn delete_session(&self, uid: &str, session_id: &str) -> Result<(), StoreError> {
            if let Some(chats) = self.docs.lock().unwrap().get_mut(uid) {
                chats.remove(session_id);
            }
            Ok(())
        }

        async fn delete_all(&self, uid: &str) -> Result<(), StoreError> {
            self.docs.lock().unwrap().remove(uid);
            Ok(())
        }
    }

    struct NoIdentity;

    #[async_trait]
    impl IdentityProvider for NoIdentity {
        async fn restore(&self) -> Result<Option<crate::models::User>, AuthError> {
            Ok(None)
        }
        async fn sign_in(&self) -> Result<crate::models::User, AuthError> {
            Err(AuthError::NoCredential)
        }
        async fn sign_out(&self) -> Result<(), AuthError> {
            Ok(())
        }
        async fn id_token(&self) -> Result<String, AuthError> {
            Err(AuthError::NotSignedIn)
        }
    }

    fn sample_session() -> ChatSession {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let mut user = Message::user("What is Rust?");
        user.timestamp = at;
        let mut bot = Message::bot("1-bot-streaming".to_string(), "A language.");
        bot.timestamp = at;
        let mut err = Message::error("error-2".to_string(), "Error from AI: boom");
        err.timestamp = at;
        ChatSession {
            id: "1714566600000-session".to_string(),
            title: "What is Rust?".to_string(),
            messages: vec![user, bot, err],
            last_active: at,
            system_instruction: Some("Be brief".to_string()),
        }
    }

    #[test]
    fn test_document_wire_shape() {
        let document = Document {
            name: String::new(),
            fields: encode_session(&sample_session()),
        };
        let json = serde_json::to_value(&document).unwrap();
        assert!(json.get("name").is_none());
        assert_eq!(
            json["fields"]["lastActive"]["timestampValue"],
            "2024-05-01T12:30:00.000000Z"
        );
        let messages = &json["fields"]["messages"]["arrayValue"]["values"];
        assert_eq!(messages[0]["mapValue"]["fields"]["sender"]["stringValue"], "user");
        assert_eq!(messages[2]["mapValue"]["fields"]["isError"]["booleanValue"], true);
        assert!(messages[0]["mapValue"]["fields"].get("isError").is_none());
    }

    #[test]
    fn test_session_document_round_trip() {
        let session = sample_session();
        let document = Document {
            name: format!("projects/p/databases/(default)/documents/users/u/chats/{}", session.id),
            fields: encode_session(&session),
        };
        let json = serde_json::to_string(&document).unwrap();
        let parsed: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(decode_session(&parsed).unwrap(), session);
    }

    #[test]
    fn test_decode_tolerates_missing_optional_fields() {
        let body = r#"{
            "name": "projects/p/databases/(default)/documents/users/u/chats/abc",
            "fields": {
                "lastActive": {"timestampValue": "2024-05-01T12:30:00.123456Z"},
                "messages": {"arrayValue": {}},
                "systemInstruction": {"nullValue": null}
            },
            "createTime": "2024-05-01T12:30:00Z"
        }"#;
        let document: Document = serde_json::from_str(body).unwrap();
        let session = decode_session(&document).unwrap();
        assert_eq!(session.id, "abc");
        assert!(session.messages.is_empty());
        assert!(session.system_instruction.is_none());
        assert_eq!(session.title, "");
    }

    #[test]
    fn test_delete_batches_respect_commit_limit() {
        let names: Vec<String> = (0..1201).map(|i| format!("chats/{}", i)).collect();
        let batches = delete_batches(names);
        let sizes: Vec<usize> = batches.iter().map(|b| b.writes.len()).collect();
        assert_eq!(sizes, vec![500, 500, 201]);
        assert_eq!(batches[2].writes[200].delete, "chats/1200");
        assert!(delete_batches(Vec::new()).is_empty());
    }

    #[test]
    fn test_list_response_paging_fields() {
        let body = r#"{"documents":[{"name":"a/b/chats/x","fields":{}}],"nextPageToken":"t2"}"#;
        let page: ListResponse = serde_json::from_str(body).unwrap();
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.next_page_token.as_deref(), Some("t2"));
        let empty: ListResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.documents.is_empty());
    }

    #[test]
    fn test_chat_urls_escape_segments() {
        let store = FirestoreStore::new("demo".to_string(), Arc::new(NoIdentity));
        let url = store.chats_url("uid/with slash", Some("s1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents/users/uid%2Fwith%20slash/chats/s1"
        );
        assert_eq!(
            store.commit_url(),
            "https://firestore.googleapis.com/v1/projects/demo/databases/(default)/documents:commit"
        );
    }

    #[tokio::test]
    async fn test_requests_need_a_signed_in_user() {
        let store = FirestoreStore::new("demo".to_string(), Arc::new(NoIdentity));
        let err = store.list_sessions("u").await.unwrap_err();
        assert!(matches!(err, StoreError::Auth(AuthError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_memory_store_delete_paths() {
        let store = MemoryStore::default();
        let session = sample_session();
        store.upsert_session("u", &session).await.unwrap();
        assert_eq!(store.list_sessions("u").await.unwrap().len(), 1);
        store.delete_session("u", &session.id).await.unwrap();
        assert!(store.list_sessions("u").await.unwrap().is_empty());
        store.upsert_session("u", &session).await.unwrap();
        store.delete_all("u").await.unwrap();
        assert!(store.stored("u").is_empty());
    }
}
