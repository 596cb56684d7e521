use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, Utc};
use serde::{ser, Deserialize, Serialize, Serializer};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::coordinator::QueryCoordinator;
use crate::error::ContributionError;
use crate::models::ParticipantAddress;

#[derive(Deserialize)]
pub struct ContributionQuery {
    pub address: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContributionResponse {
    pub address: ParticipantAddress,
    #[serde(serialize_with = "as_number")]
    pub contribution: BigDecimal,
    #[serde(serialize_with = "as_number")]
    pub expected_tokens: BigDecimal,
    pub computed_at: DateTime<Utc>,
}

// Exact values are only rounded here, at the JSON boundary.
fn as_number<S: Serializer>(value: &BigDecimal, serializer: S) -> Result<S::Ok, S::Error> {
    let float = value.to_f64().filter(|f| f.is_finite()).ok_or_else(|| {
        <S::Error as ser::Error>::custom(format!("{} is not representable as a number", value))
    })?;
    serializer.serialize_f64(float)
}

pub fn router(coordinator: QueryCoordinator) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(|| async { "Contribution aggregator running" }))
        .route("/contribution", get(get_contribution))
        .layer(cors)
        .with_state(coordinator)
}

pub async fn serve(port: u16, coordinator: QueryCoordinator) -> eyre::Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    info!("API listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(coordinator).into_make_service()).await?;

    Ok(())
}

async fn get_contribution(
    State(coordinator): State<QueryCoordinator>,
    Query(q): Query<ContributionQuery>,
) -> Result<Json<ContributionResponse>, ContributionError> {
    let raw = q
        .address
        .ok_or_else(|| ContributionError::InvalidAddress("(missing)".to_string()))?;
    let address = ParticipantAddress::parse(&raw)?;
    let entry = coordinator.query(address).await?;

    Ok(Json(ContributionResponse {
        address,
        contribution: entry.value.contribution,
        expected_tokens: entry.value.expected_allocation,
        computed_at: entry.computed_at_utc,
    }))
}
