use log::{debug, info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationState {
    Pending,
    Found,
    NxDomain,
    WrongContent,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DnsPropagationResult {
    pub state: PropagationState,
    pub reason: Option<String>,
    pub observed_values: Vec<String>,
}

/// Raw TXT lookup outcome across all configured resolvers.
#[derive(Debug, Clone, Serialize)]
pub struct TxtLookup {
    pub record_name: String,
    pub values: Vec<String>,
    pub resolvers_answered: usize,
    pub nxdomain: bool,
}

#[derive(Debug, Deserialize, Clone)]
struct DohAnswer {
    #[serde(rename = "data")]
    data: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
struct DohResponse {
    #[serde(rename = "Status")]
    status: u32,
    #[serde(rename = "Answer")]
    answer: Option<Vec<DohAnswer>>,
}

/// Queries every resolver concurrently; resolvers that fail are logged and skipped.
async fn query_txt(client: &Client, resolvers: &[String], record_name: &str) -> Vec<DohResponse> {
    let mut queries = JoinSet::new();
    for resolver in resolvers {
        let client = client.clone();
        let resolver = resolver.clone();
        let record_name = record_name.to_string();
        queries.spawn(async move {
            debug!("[dns-check] querying {} for {}", resolver, record_name);
            let response = client
                .get(&resolver)
                .query(&[("name", record_name.as_str()), ("type", "TXT")])
                .header("Accept", "application/dns-json")
                .send()
                .await
                .and_then(|resp| resp.error_for_status());
            let parsed = match response {
                Ok(resp) => resp.json::<DohResponse>().await,
                Err(err) => Err(err),
            };
            (resolver, parsed)
        });
    }

    let mut responses = Vec::new();
    while let Some(joined) = queries.join_next().await {
        match joined {
            Ok((resolver, Ok(parsed))) => {
                debug!(
                    "[dns-check] {} responded: status={}, has_answer={}",
                    resolver,
                    parsed.status,
                    parsed.answer.is_some()
                );
                responses.push(parsed);
            }
            Ok((resolver, Err(err))) => {
                warn!("[dns-check] {} query failed: {}", resolver, err);
            }
            Err(err) => warn!("[dns-check] resolver task failed: {}", err),
        }
    }
    responses
}

/// Returns the TXT values currently served for `record_name`.
pub async fn lookup_txt(client: &Client, resolvers: &[String], record_name: &str) -> TxtLookup {
    let responses = query_txt(client, resolvers, record_name).await;
    let mut values: Vec<String> = observed_values(&responses);
    values.sort();
    values.dedup();
    TxtLookup {
        record_name: record_name.to_string(),
        values,
        resolvers_answered: responses.len(),
        nxdomain: !responses.is_empty() && responses.iter().all(|r| r.status == 3),
    }
}

pub async fn check_txt_record(
    client: &Client,
    resolvers: &[String],
    record_name: &str,
    expected_value: &str,
) -> DnsPropagationResult {
    let responses = query_txt(client, resolvers, record_name).await;
    let result = interpret_dns_results(&responses, record_name, expected_value);
    info!(
        "[dns-check] {} state={:?} observed={:?}",
        record_name, result.state, result.observed_values
    );
    result
}

fn trim_txt_quotes(value: &str) -> String {
    value.trim_matches('"').trim().to_string()
}

fn observed_values(responses: &[DohResponse]) -> Vec<String> {
    responses
        .iter()
        .filter_map(|response| response.answer.as_ref())
        .flatten()
        .filter_map(|answer| answer.data.as_deref())
        .map(trim_txt_quotes)
        .collect()
}

fn interpret_dns_results(
    responses: &[DohResponse],
    record_name: &str,
    expected_value: &str,
) -> DnsPropagationResult {
    let observed = observed_values(responses);
    let expected = trim_txt_quotes(expected_value);
    let mut saw_nxdomain = false;
    let mut saw_ok = false;

    for response in responses {
        match response.status {
            0 => saw_ok = true,
            3 => saw_nxdomain = true,
            other => warn!("[dns-check] unexpected status {} for {}", other, record_name),
        }
    }

    if observed.iter().any(|val| val == &expected) {
        return DnsPropagationResult {
            state: PropagationState::Found,
            reason: None,
            observed_values: observed,
        };
    }

    if !observed.is_empty() {
        return DnsPropagationResult {
            state: PropagationState::WrongContent,
            reason: Some("TXT record present with different value".to_string()),
            observed_values: observed,
        };
    }

    if saw_ok {
        return DnsPropagationResult {
            state: PropagationState::Pending,
            reason: Some("record not found yet".to_string()),
            observed_values: observed,
        };
    }

    if saw_nxdomain {
        return DnsPropagationResult {
            state: PropagationState::NxDomain,
            reason: Some("record not found (NXDOMAIN)".to_string()),
            observed_values: observed,
        };
    }

    DnsPropagationResult {
        state: PropagationState::Error,
        reason: Some("no responses from DNS resolvers".to_string()),
        observed_values: observed,
    }
}
