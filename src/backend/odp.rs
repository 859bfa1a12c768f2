//! Segment membership lookups against the data platform's GraphQL API.

use super::datafile::OdpSettings;
use super::{BackendError, RequestHandler};
use serde::Deserialize;
use std::collections::HashMap;

const SEGMENTS_QUERY: &str = "query($userId: String, $audiences: [String]) \
    {customer(fs_user_id: $userId) {audiences(subset: $audiences) {edges {node {name state}}}}}";

const QUALIFIED: &str = "qualified";

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<GraphQlData>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlData {
    customer: Option<Customer>,
}

#[derive(Debug, Deserialize)]
struct Customer {
    audiences: AudienceEdges,
}

#[derive(Debug, Deserialize)]
struct AudienceEdges {
    edges: Vec<AudienceEdge>,
}

#[derive(Debug, Deserialize)]
struct AudienceEdge {
    node: AudienceNode,
}

#[derive(Debug, Deserialize)]
struct AudienceNode {
    name: String,
    state: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

/// Ask which of `segments_to_check` the user currently qualifies for.
pub async fn fetch_segments(
    requests: &dyn RequestHandler,
    odp: &OdpSettings,
    user_id: &str,
    segments_to_check: &[String],
) -> Result<Vec<String>, BackendError> {
    if segments_to_check.is_empty() {
        return Ok(Vec::new());
    }

    let url = format!("{}/v3/graphql", odp.host.trim_end_matches('/'));
    let headers = HashMap::from([
        ("Content-Type".to_string(), "application/json".to_string()),
        ("x-api-key".to_string(), odp.public_key.clone()),
    ]);
    let body = serde_json::json!({
        "query": SEGMENTS_QUERY,
        "variables": {
            "userId": user_id,
            "audiences": segments_to_check,
        },
    });

    let response = requests
        .make_request(&url, &headers, "POST", Some(body.to_string()))
        .response()
        .await?;

    if !response.is_success() {
        return Err(BackendError::Segments(format!(
            "request failed with status {}",
            response.status_code
        )));
    }

    parse_segments(&response.body)
}

fn parse_segments(body: &str) -> Result<Vec<String>, BackendError> {
    let parsed: GraphQlResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::Segments(format!("invalid response: {}", e)))?;

    if let Some(error) = parsed.errors.first() {
        return Err(BackendError::Segments(error.message.clone()));
    }

    let customer = parsed
        .data
        .and_then(|data| data.customer)
        .ok_or_else(|| BackendError::Segments("response has no customer".to_string()))?;

    Ok(customer
        .audiences
        .edges
        .into_iter()
        .filter(|edge| edge.node.state == QUALIFIED)
        .map(|edge| edge.node.name)
        .collect())
}
