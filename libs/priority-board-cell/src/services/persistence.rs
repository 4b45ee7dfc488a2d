use async_trait::async_trait;
use reqwest::Method;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::{ApiError, RestClient};

use crate::{Board, BoardPayload, FilterRange, PriorityBoardError, SubmitMovesRequest, SubmitMovesResponse};

/// The persistence collaborator: one batched write and one full read.
#[async_trait]
pub trait BoardPersistence: Send + Sync {
    async fn submit_moves(
        &self,
        request: &SubmitMovesRequest,
    ) -> Result<SubmitMovesResponse, PriorityBoardError>;

    async fn fetch_board(&self, filter: &FilterRange) -> Result<Board, PriorityBoardError>;
}

const MOVES_PATH: &str = "/rest/v1/priority/moves";
const BOARD_PATH: &str = "/rest/v1/priority/board";

pub struct HttpBoardPersistence {
    client: RestClient,
}

impl std::fmt::Debug for HttpBoardPersistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBoardPersistence").finish_non_exhaustive()
    }
}

impl HttpBoardPersistence {
    pub fn new(config: &AppConfig) -> Result<Self, PriorityBoardError> {
        if config.scheduling_api_url.is_empty() {
            return Err(PriorityBoardError::ConfigError(
                "SCHEDULING_API_URL is required".to_string(),
            ));
        }
        Ok(Self {
            client: RestClient::new(config),
        })
    }

    pub fn with_client(client: RestClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BoardPersistence for HttpBoardPersistence {
    async fn submit_moves(
        &self,
        request: &SubmitMovesRequest,
    ) -> Result<SubmitMovesResponse, PriorityBoardError> {
        debug!("Submitting {} moves", request.moves.len());
        let body = serde_json::to_value(request)?;
        let response = self
            .client
            .request(Method::POST, MOVES_PATH, &[], Some(body))
            .await?;
        Ok(response)
    }

    async fn fetch_board(&self, filter: &FilterRange) -> Result<Board, PriorityBoardError> {
        let query = [
            ("from", filter.from.to_rfc3339()),
            ("to", filter.to.to_rfc3339()),
        ];
        let payload: BoardPayload = self
            .client
            .request(Method::GET, BOARD_PATH, &query, None)
            .await?;

        let (board, orphans) = payload.into_board();
        if !orphans.is_empty() {
            warn!("Dropped {} items referencing unknown columns", orphans.len());
        }
        Ok(board)
    }
}

impl From<ApiError> for PriorityBoardError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status, body } => PriorityBoardError::Rejected {
                status,
                message: body,
            },
            other => PriorityBoardError::Transport(other.to_string()),
        }
    }
}
