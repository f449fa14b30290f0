use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use leitner_core::{
    clean_tags, BoxId, CardError, CardInput, CardPatch, CoreError, Difficulty, QuestionType,
    SyncError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

/// Card submission as posted by a form client.
#[derive(Debug, Default, Deserialize)]
pub struct CardForm {
    pub deck_id: String,
    pub box_id: Option<BoxId>,
    pub question_type: Option<String>,
    pub question: Option<String>,
    pub answer: String,
    pub notes: Option<String>,
    pub media: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl TryFrom<CardForm> for CardInput {
    type Error = ApiError;

    fn try_from(f: CardForm) -> Result<Self, Self::Error> {
        let deck_id = Uuid::parse_str(f.deck_id.trim())
            .map_err(|_| ApiError::bad_request("deck_id must be a uuid"))?;
        let question_type = match f.question_type.as_deref() {
            None | Some("") => QuestionType::Classic,
            Some(s) => s.parse::<QuestionType>()?,
        };
        Ok(CardInput {
            deck_id,
            box_id: f.box_id,
            question_type,
            question: non_blank(f.question),
            answer: f.answer,
            notes: non_blank(f.notes),
            media: non_blank(f.media),
            tags: clean_tags(&f.tags),
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PatchIn {
    pub box_id: Option<BoxId>,
    pub question: Option<String>,
    pub answer: Option<String>,
    pub notes: Option<String>,
    pub media: Option<String>,
    pub tags: Option<Vec<String>>,
}

impl From<PatchIn> for CardPatch {
    fn from(p: PatchIn) -> Self {
        CardPatch {
            box_id: p.box_id,
            question: p.question,
            answer: p.answer,
            notes: p.notes,
            media: p.media,
            tags: p.tags.map(|t| clean_tags(&t)),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TagsIn {
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnswerIn {
    pub difficulty: String,
}

impl AnswerIn {
    pub fn difficulty(&self) -> Result<Difficulty, ApiError> {
        Ok(self.difficulty.parse()?)
    }
}

#[derive(Debug, Serialize)]
pub struct TagOut {
    pub id: i64,
    pub name: String,
}

/// Error body: `{"error": "...", "phase": "create tags"}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub phase: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            phase: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, phase = ?self.phase, "{}", self.message);
        }
        let body = match self.phase {
            Some(phase) => json!({ "error": self.message, "phase": phase }),
            None => json!({ "error": self.message }),
        };
        (self.status, Json(body)).into_response()
    }
}

fn core_status(e: &CoreError) -> StatusCode {
    match e {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Invalid(_) => StatusCode::BAD_REQUEST,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        Self {
            status: core_status(&e),
            message: e.to_string(),
            phase: None,
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(e: SyncError) -> Self {
        let status = match &e {
            SyncError::Invalid(_) => StatusCode::BAD_REQUEST,
            SyncError::Timeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Phase { source, .. } => core_status(source),
            SyncError::Unresolved { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
            phase: e.phase().map(|p| p.as_str()),
        }
    }
}

impl From<CardError> for ApiError {
    fn from(e: CardError) -> Self {
        match e {
            CardError::Store(e) => e.into(),
            CardError::Tags(e) => e.into(),
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use leitner_core::SyncPhase;
    use std::time::Duration;

    fn form(deck_id: &str) -> CardForm {
        CardForm {
            deck_id: deck_id.into(),
            question: Some("hola".into()),
            answer: "hello".into(),
            ..Default::default()
        }
    }

    #[test]
    fn form_converts_and_cleans_tags() {
        let id = Uuid::new_v4();
        let mut f = form(&id.to_string());
        f.tags = vec![" verbs ".into(), "".into(), "basics".into()];
        f.notes = Some("  ".into());

        let input = CardInput::try_from(f).unwrap();

        assert_eq!(input.deck_id, id);
        assert_eq!(input.question_type, QuestionType::Classic);
        assert_eq!(input.tags, vec!["verbs", "basics"]);
        assert_eq!(input.notes, None);
    }

    #[test]
    fn form_rejects_bad_deck_and_type() {
        let err = CardInput::try_from(form("not-a-uuid")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let mut f = form(&Uuid::new_v4().to_string());
        f.question_type = Some("video".into());
        let err = CardInput::try_from(f).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn sync_errors_map_to_status_and_phase() {
        let timeout = ApiError::from(SyncError::Timeout {
            phase: SyncPhase::CreateTags,
            after: Duration::from_secs(5),
        });
        assert_eq!(timeout.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(timeout.phase, Some("create tags"));

        let storage = ApiError::from(SyncError::Phase {
            phase: SyncPhase::Commit,
            source: CoreError::storage("commit", "disk full"),
        });
        assert_eq!(storage.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(storage.phase, Some("commit"));

        let missing = ApiError::from(CardError::Tags(SyncError::Phase {
            phase: SyncPhase::LockCard,
            source: CoreError::NotFound("card"),
        }));
        assert_eq!(missing.status, StatusCode::NOT_FOUND);

        let invalid = ApiError::from(SyncError::Invalid("tag name"));
        assert_eq!(invalid.status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.phase, None);
    }

    #[test]
    fn core_errors_map_to_status() {
        assert_eq!(
            ApiError::from(CoreError::Conflict("deck name")).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(CardError::Store(CoreError::NotFound("card"))).status,
            StatusCode::NOT_FOUND
        );
    }
}
