//! Authenticated GET against a dependent endpoint.
//!
//! Used to check that the managed token actually works against the API it
//! was issued for, with the same retry and reauthentication rules as every
//! other dependent call.

use graphlink_core::{OperationError, Outcome, ResilientOperation, TokenManager};
use reqwest::StatusCode;
use tracing::debug;

/// Map a non-success HTTP response onto an [`OperationError`].
///
/// Authorization failures, throttling, timeouts and server errors are
/// retried; every other client error is final.
pub fn response_error(status: StatusCode, body: &str) -> OperationError {
    let err = OperationError::new(format!("{}: {}", status, body.trim())).with_status(status.as_u16());

    let retryable = status == StatusCode::UNAUTHORIZED
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error();

    if retryable {
        err
    } else {
        OperationError::fatal(err.message).with_status(status.as_u16())
    }
}

/// GET `url` with the managed bearer token and return the response body.
pub async fn probe<M>(
    operation: &ResilientOperation<'_, M>,
    client: &reqwest::Client,
    url: &str,
) -> Outcome<String>
where
    M: TokenManager + ?Sized,
{
    operation
        .run(|token| {
            let request = client.get(url).bearer_auth(token.expose());
            async move {
                let response = request
                    .send()
                    .await
                    .map_err(|e| OperationError::new(format!("request failed: {}", e)))?;

                let status = response.status();
                let body = response
                    .text()
                    .await
                    .map_err(|e| OperationError::new(format!("failed to read body: {}", e)))?;
                debug!(%status, bytes = body.len(), "probe response");

                if status.is_success() {
                    Ok(body)
                } else {
                    Err(response_error(status, &body))
                }
            }
        })
        .await
}
