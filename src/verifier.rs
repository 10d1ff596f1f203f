//! Submission verification against an external judge.
//!
//! The registry unlocks a player's weapons when the judge confirms an
//! accepted submission. [`SubmissionVerifier`] abstracts that judge so the
//! registry never talks HTTP itself: tests script verdicts, local play uses
//! [`Unverified`], and production enables the `verifier-codeforces` feature
//! for [`codeforces::CodeforcesVerifier`].

use async_trait::async_trait;

use crate::error::Result;

/// An external judge that can vouch for handles and accepted submissions.
///
/// Implementations must be cheap to share (`Send + Sync`); the registry
/// calls them with no session lock held, so a slow judge delays only the
/// requesting player.
#[async_trait]
pub trait SubmissionVerifier: Send + Sync + 'static {
    /// Whether the judge knows this handle.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::VerificationUnavailable`](crate::SessionError::VerificationUnavailable)
    /// when the judge cannot be reached.
    async fn handle_exists(&self, handle: &str) -> Result<bool>;

    /// Whether the handle's recent submissions include an accepted one for
    /// the given problem.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::VerificationUnavailable`](crate::SessionError::VerificationUnavailable)
    /// when the judge cannot be reached.
    async fn accepted(&self, handle: &str, contest_id: i32, problem_index: &str) -> Result<bool>;
}

/// A verifier that accepts every handle and every submission.
///
/// The default for [`SessionRegistry::new`](crate::SessionRegistry::new) —
/// right for local play, demos and tests where no judge is reachable.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unverified;

#[async_trait]
impl SubmissionVerifier for Unverified {
    async fn handle_exists(&self, _handle: &str) -> Result<bool> {
        Ok(true)
    }

    async fn accepted(&self, _handle: &str, _contest_id: i32, _problem_index: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(feature = "verifier-codeforces")]
pub mod codeforces {
    //! Codeforces-backed [`SubmissionVerifier`].

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;
    use serde::Deserialize;
    use tracing::debug;

    use crate::error::{Result, SessionError};

    use super::SubmissionVerifier;

    /// Request timeout so a stalled judge cannot hang a verification.
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

    /// How long a handle-existence answer is reused.
    const HANDLE_CACHE_TTL: Duration = Duration::from_secs(600);

    /// How many recent submissions to scan for an accepted verdict.
    const RECENT_SUBMISSION_COUNT: u32 = 10;

    #[derive(Debug, Deserialize)]
    struct UserStatusResponse {
        status: String,
        #[serde(default)]
        result: Vec<Submission>,
    }

    #[derive(Debug, Deserialize)]
    struct Submission {
        verdict: Option<String>,
        problem: Problem,
    }

    #[derive(Debug, Deserialize)]
    struct Problem {
        #[serde(rename = "contestId")]
        contest_id: Option<i32>,
        index: String,
    }

    /// [`SubmissionVerifier`] backed by the Codeforces REST API.
    ///
    /// Handle-existence answers are cached for ten minutes; accepted-submission
    /// checks always hit the API because the whole point is noticing a verdict
    /// that just landed.
    pub struct CodeforcesVerifier {
        client: reqwest::Client,
        base_url: String,
        handle_cache: Mutex<HashMap<String, (Instant, bool)>>,
    }

    impl Default for CodeforcesVerifier {
        fn default() -> Self {
            Self::new()
        }
    }

    impl CodeforcesVerifier {
        /// Verifier against the public Codeforces API.
        pub fn new() -> Self {
            Self::with_base_url("https://codeforces.com/api")
        }

        /// Verifier against a different API root (mirrors, test servers).
        pub fn with_base_url(base_url: impl Into<String>) -> Self {
            Self {
                client: reqwest::Client::builder()
                    .timeout(REQUEST_TIMEOUT)
                    .build()
                    .unwrap_or_else(|_| reqwest::Client::new()),
                base_url: base_url.into(),
                handle_cache: Mutex::new(HashMap::new()),
            }
        }

        fn cached_handle(&self, handle: &str) -> Option<bool> {
            let cache = self.handle_cache.lock().ok()?;
            let (stamped, exists) = cache.get(handle)?;
            (stamped.elapsed() < HANDLE_CACHE_TTL).then_some(*exists)
        }

        fn cache_handle(&self, handle: &str, exists: bool) {
            if let Ok(mut cache) = self.handle_cache.lock() {
                cache.insert(handle.to_string(), (Instant::now(), exists));
            }
        }
    }

    #[async_trait]
    impl SubmissionVerifier for CodeforcesVerifier {
        async fn handle_exists(&self, handle: &str) -> Result<bool> {
            if let Some(exists) = self.cached_handle(handle) {
                return Ok(exists);
            }

            let url = format!("{}/user.info?handles={}", self.base_url, handle);
            let response = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SessionError::VerificationUnavailable(e.to_string()))?;

            // The API answers 400 with status FAILED for unknown handles, so
            // a non-success response is a "no", not an outage.
            let exists = if response.status().is_success() {
                let body: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| SessionError::VerificationUnavailable(e.to_string()))?;
                body.get("status").and_then(|v| v.as_str()) == Some("OK")
            } else {
                false
            };

            debug!(handle, exists, "handle existence checked");
            self.cache_handle(handle, exists);
            Ok(exists)
        }

        async fn accepted(
            &self,
            handle: &str,
            contest_id: i32,
            problem_index: &str,
        ) -> Result<bool> {
            let url = format!(
                "{}/user.status?handle={}&from=1&count={}",
                self.base_url, handle, RECENT_SUBMISSION_COUNT
            );
            let response: UserStatusResponse = self
                .client
                .get(&url)
                .send()
                .await
                .map_err(|e| SessionError::VerificationUnavailable(e.to_string()))?
                .json()
                .await
                .map_err(|e| SessionError::VerificationUnavailable(e.to_string()))?;

            if response.status != "OK" {
                return Err(SessionError::VerificationUnavailable(format!(
                    "user.status answered {}",
                    response.status
                )));
            }

            let accepted = response.result.iter().any(|submission| {
                submission.verdict.as_deref() == Some("OK")
                    && submission.problem.contest_id == Some(contest_id)
                    && submission.problem.index == problem_index
            });
            debug!(handle, contest_id, problem_index, accepted, "submission checked");
            Ok(accepted)
        }
    }

    #[cfg(test)]
    #[allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::indexing_slicing
    )]
    mod tests {
        use super::*;

        #[test]
        fn user_status_response_parses() {
            let body = r#"{
                "status": "OK",
                "result": [
                    {
                        "id": 1,
                        "verdict": "OK",
                        "problem": { "contestId": 566, "index": "A", "name": "x", "tags": [] }
                    },
                    {
                        "id": 2,
                        "verdict": "WRONG_ANSWER",
                        "problem": { "contestId": 566, "index": "B", "name": "y", "tags": [] }
                    }
                ]
            }"#;
            let parsed: UserStatusResponse = serde_json::from_str(body).unwrap();
            assert_eq!(parsed.status, "OK");
            assert_eq!(parsed.result.len(), 2);
            assert_eq!(parsed.result[0].verdict.as_deref(), Some("OK"));
            assert_eq!(parsed.result[0].problem.contest_id, Some(566));
        }

        #[test]
        fn pending_submission_has_no_verdict() {
            let body = r#"{
                "status": "OK",
                "result": [
                    { "problem": { "index": "A" } }
                ]
            }"#;
            let parsed: UserStatusResponse = serde_json::from_str(body).unwrap();
            assert!(parsed.result[0].verdict.is_none());
            assert!(parsed.result[0].problem.contest_id.is_none());
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unverified_accepts_everything() {
        let verifier = Unverified;
        assert!(verifier.handle_exists("anyone").await.unwrap());
        assert!(verifier.accepted("anyone", 566, "A").await.unwrap());
    }
}
