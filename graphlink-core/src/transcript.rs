//! Interpretation of meeting-transcript lookups.
//!
//! A transcript request can succeed at the HTTP level and still carry four
//! different answers. [`classify_transcript`] turns the raw lookup into an
//! [`Outcome`] so callers can render the right message.

use std::future::Future;

use serde::{Deserialize, Serialize};

use crate::resilience::{OperationError, Outcome, ResilientOperation};
use crate::store::Secret;
use crate::token::TokenManager;

/// Raw result of a transcript lookup, as reported by the provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptLookup {
    /// A recording exists for the meeting.
    pub recording_found: bool,

    /// Transcript metadata exists for the meeting.
    pub metadata_found: bool,

    /// Transcript text, when it could be downloaded.
    pub content: Option<String>,

    /// Why the text could not be extracted, when metadata was found.
    pub extraction_error: Option<String>,
}

/// Transcript text ready for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transcript {
    pub content: String,
}

/// Map a lookup onto an outcome.
///
/// - Non-empty content: [`Outcome::Success`]
/// - Metadata with a failed extraction: [`Outcome::PartialMatch`]
/// - Recording without metadata or content: [`Outcome::ProcessingPending`]
/// - Metadata alone: [`Outcome::PartialMatch`]
/// - Nothing: [`Outcome::NotFound`]
pub fn classify_transcript(lookup: TranscriptLookup) -> Outcome<Transcript> {
    if let Some(content) = lookup.content.filter(|c| !c.trim().is_empty()) {
        return Outcome::Success(Transcript { content });
    }

    match (lookup.metadata_found, lookup.extraction_error, lookup.recording_found) {
        (true, Some(error), _) => Outcome::PartialMatch {
            detail: format!("transcript found but could not be extracted: {}", error),
        },
        (false, _, true) => Outcome::ProcessingPending,
        (true, None, _) => Outcome::PartialMatch {
            detail: "transcript found but extraction produced no content".to_string(),
        },
        (false, _, false) => Outcome::NotFound,
    }
}

/// Fetch a transcript through `operation` and classify the result.
pub async fn fetch_transcript<M, F, Fut>(
    operation: &ResilientOperation<'_, M>,
    lookup: F,
) -> Outcome<Transcript>
where
    M: TokenManager + ?Sized,
    F: FnMut(Secret) -> Fut,
    Fut: Future<Output = Result<TranscriptLookup, OperationError>>,
{
    operation.run_classified(lookup, classify_transcript).await
}
