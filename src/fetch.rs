use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::blocking::Client;

use crate::cancel::CancelToken;
use crate::elo::{EloConfig, INITIAL_RATING, compute_elo};
use crate::error::AcquisitionError;
use crate::payload::{SnapshotPayload, StrengthRating};
use crate::provider::{EntityKey, ProviderId, SourceType};
use crate::results::ResultsDb;

/// One provider's fetch for one source type. Implementations return payloads
/// already normalised to this crate's shapes.
pub trait FeedFetcher: Send + Sync {
    fn source(&self) -> SourceType;

    fn fetch(
        &self,
        entity: &EntityKey,
        cancel: &CancelToken,
    ) -> Result<SnapshotPayload, AcquisitionError>;
}

pub const TEAM_PLACEHOLDER: &str = "{team_id}";
pub const MATCH_PLACEHOLDER: &str = "{match_id}";

const USER_AGENT: &str = "wc26-predictor/0.1";

static CLIENT: OnceCell<Client> = OnceCell::new();

/// Blocking client shared by every HTTP feed in the process.
fn shared_client() -> anyhow::Result<&'static Client> {
    CLIENT.get_or_try_init(|| {
        Client::builder()
            .timeout(request_timeout())
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build http client")
    })
}

fn request_timeout() -> Duration {
    let secs = env::var("PREDICT_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|val| val.parse::<u64>().ok())
        .unwrap_or(10)
        .clamp(1, 120);
    Duration::from_secs(secs)
}

/// Fetches a JSON document per entity from a URL template such as
/// `https://api.example.com/form?team={team_id}`.
pub struct HttpFeedFetcher {
    provider: ProviderId,
    source: SourceType,
    url_template: String,
    auth_header: Option<(String, String)>,
}

impl HttpFeedFetcher {
    pub fn new(provider: ProviderId, source: SourceType, url_template: impl Into<String>) -> Self {
        Self {
            provider,
            source,
            url_template: url_template.into(),
            auth_header: None,
        }
    }

    pub fn with_auth_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth_header = Some((name.into(), value.into()));
        self
    }

    pub fn url_for(&self, entity: &EntityKey) -> String {
        match entity {
            EntityKey::Team(id) => self.url_template.replace(TEAM_PLACEHOLDER, &id.to_string()),
            EntityKey::Match(id) => self.url_template.replace(MATCH_PLACEHOLDER, id),
        }
    }
}

impl FeedFetcher for HttpFeedFetcher {
    fn source(&self) -> SourceType {
        self.source
    }

    fn fetch(
        &self,
        entity: &EntityKey,
        cancel: &CancelToken,
    ) -> Result<SnapshotPayload, AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        let client = shared_client()
            .map_err(|err| AcquisitionError::unavailable(&self.provider, err.to_string()))?;

        let mut req = client.get(self.url_for(entity));
        if let Some((name, value)) = self.auth_header.as_ref() {
            req = req.header(name.as_str(), value.as_str());
        }
        let resp = req
            .send()
            .map_err(|err| AcquisitionError::unavailable(&self.provider, err.to_string()))?;
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(AcquisitionError::QuotaExhausted {
                provider: self.provider.clone(),
            });
        }
        let body = resp
            .text()
            .map_err(|err| AcquisitionError::unavailable(&self.provider, err.to_string()))?;
        if !status.is_success() {
            let snippet = body
                .trim()
                .replace(['\n', '\r'], " ")
                .chars()
                .take(220)
                .collect::<String>();
            return Err(AcquisitionError::unavailable(
                &self.provider,
                format!("http {status}: {snippet}"),
            ));
        }
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }

        SnapshotPayload::from_json(self.source, &body)
            .map_err(|err| AcquisitionError::malformed(self.source, err.to_string()))
    }
}

const RATINGS_REFRESH: Duration = Duration::from_secs(60 * 60);

/// Strength ratings computed locally from the historical results table.
pub struct EloRatingFetcher {
    provider: ProviderId,
    results: Arc<ResultsDb>,
    cfg: EloConfig,
    ratings: Mutex<Option<(Instant, HashMap<u32, f64>)>>,
}

impl EloRatingFetcher {
    pub fn new(provider: ProviderId, results: Arc<ResultsDb>, cfg: EloConfig) -> Self {
        Self {
            provider,
            results,
            cfg,
            ratings: Mutex::new(None),
        }
    }

    fn rating_for(&self, team_id: u32) -> Result<f64, AcquisitionError> {
        let mut cached = self.ratings.lock();
        let stale = cached
            .as_ref()
            .is_none_or(|(at, _)| at.elapsed() >= RATINGS_REFRESH);
        if stale {
            let results = self
                .results
                .load_finished(None)
                .map_err(|err| AcquisitionError::unavailable(&self.provider, format!("{err:#}")))?;
            *cached = Some((Instant::now(), compute_elo(&results, self.cfg)));
        }
        Ok(cached
            .as_ref()
            .and_then(|(_, table)| table.get(&team_id).copied())
            .unwrap_or(INITIAL_RATING))
    }
}

impl FeedFetcher for EloRatingFetcher {
    fn source(&self) -> SourceType {
        SourceType::StrengthRating
    }

    fn fetch(
        &self,
        entity: &EntityKey,
        cancel: &CancelToken,
    ) -> Result<SnapshotPayload, AcquisitionError> {
        if cancel.is_cancelled() {
            return Err(AcquisitionError::Cancelled);
        }
        let Some(team_id) = entity.team_id() else {
            return Err(AcquisitionError::malformed(
                SourceType::StrengthRating,
                format!("ratings are per team, got {entity}"),
            ));
        };
        let rating = self.rating_for(team_id)?;
        Ok(SnapshotPayload::StrengthRating(StrengthRating { team_id, rating }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::tests::played;
    use chrono::{TimeZone, Utc};

    #[test]
    fn url_template_substitutes_entity() {
        let f = HttpFeedFetcher::new(
            ProviderId::new("fbref"),
            SourceType::ExpectedGoals,
            "https://example.test/xg?team={team_id}",
        );
        assert_eq!(
            f.url_for(&EntityKey::Team(33)),
            "https://example.test/xg?team=33"
        );
        let odds = HttpFeedFetcher::new(
            ProviderId::new("odds"),
            SourceType::MatchOdds,
            "https://example.test/odds/{match_id}",
        );
        assert_eq!(
            odds.url_for(&EntityKey::Match("4711".to_string())),
            "https://example.test/odds/4711"
        );
    }

    #[test]
    fn cancelled_http_fetch_never_calls_out() {
        let f = HttpFeedFetcher::new(
            ProviderId::new("fbref"),
            SourceType::Form,
            "http://127.0.0.1:9/form/{team_id}",
        );
        let cancel = CancelToken::new();
        cancel.cancel();
        assert_eq!(
            f.fetch(&EntityKey::Team(1), &cancel),
            Err(AcquisitionError::Cancelled)
        );
    }

    #[test]
    fn elo_fetcher_rates_teams_from_results() {
        let db = Arc::new(ResultsDb::open_in_memory().unwrap());
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap();
        db.upsert_matches(&[played("1", t, 1, 2, 4, 0)]).unwrap();
        let f = EloRatingFetcher::new(ProviderId::new("local_elo"), db, EloConfig::default());
        let cancel = CancelToken::new();

        let SnapshotPayload::StrengthRating(winner) = f.fetch(&EntityKey::Team(1), &cancel).unwrap()
        else {
            panic!("expected a rating payload");
        };
        assert!(winner.rating > INITIAL_RATING);

        let SnapshotPayload::StrengthRating(unseen) = f.fetch(&EntityKey::Team(99), &cancel).unwrap()
        else {
            panic!("expected a rating payload");
        };
        assert_eq!(unseen.rating, INITIAL_RATING);
        assert!(f.fetch(&EntityKey::Match("m".to_string()), &cancel).is_err());
    }
}
