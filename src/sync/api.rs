use crate::calendar::{Event, FeedLocation, Location};
use crate::storage::session::UserProfile;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("Request error: {0}")]
    RequestError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limit exceeded")]
    RateLimited,
    #[error("Authentication failed")]
    AuthenticationFailed,
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Event has no server identifier")]
    MissingId,
}

/// Event as exchanged with `/events/`.
#[derive(Debug, Serialize, Deserialize)]
struct CloudEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<i64>,
    title: String,
    #[serde(default)]
    description: Option<String>,
    start_time: String,
    #[serde(default)]
    end_time: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    latitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    longitude: Option<f64>,
    #[serde(default)]
    reminder_minutes: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    subscription_id: Option<i64>,
}

/// `GET /events/` answers either with a bare array or a paginated envelope.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EventListResponse {
    Page { results: Vec<CloudEvent> },
    Bare(Vec<CloudEvent>),
}

impl EventListResponse {
    fn into_events(self) -> Vec<CloudEvent> {
        match self {
            EventListResponse::Page { results } => results,
            EventListResponse::Bare(events) => events,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub access: Option<String>,
    #[serde(default)]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

#[derive(Debug, Deserialize)]
struct LoginUrlResponse {
    #[serde(alias = "authorize_url", alias = "url")]
    apply_code_url: String,
}

#[derive(Debug, Serialize)]
struct CallbackRequest<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LunarDate {
    pub lunar_date: String,
    pub year: i32,
    pub month: String,
    pub day: String,
    pub zodiac: String,
    pub solar_date: String,
}

/// One entry of `GET /holidays/?year=`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Holiday {
    Major {
        name: String,
        date: NaiveDate,
    },
    Vacation {
        name: String,
        start_date: NaiveDate,
        end_date: NaiveDate,
        days: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HolidayList {
    pub year: i32,
    #[serde(default)]
    pub holidays: Vec<Holiday>,
    /// Set when the server has no data for the year.
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HolidayInfo {
    pub holiday_name: Option<String>,
    pub holiday_type: Option<String>,
    #[serde(default)]
    pub is_workday: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Festival {
    pub name: String,
    #[serde(default)]
    pub emoji: String,
}

/// Answer of `GET /holidays/check/` and `GET /holidays/today/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DayHolidays {
    pub date: NaiveDate,
    #[serde(default)]
    pub holiday: Option<HolidayInfo>,
    #[serde(default)]
    pub traditional_festivals: Vec<Festival>,
    #[serde(default)]
    pub international_festivals: Vec<Festival>,
}

impl DayHolidays {
    pub fn is_ordinary(&self) -> bool {
        self.holiday.is_none()
            && self.traditional_festivals.is_empty()
            && self.international_festivals.is_empty()
    }
}

/// Event fields extracted from free text by `POST /ai/parse-event/`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParsedEvent {
    pub title: String,
    pub date: NaiveDate,
    /// `HH:MM`, absent when the text names no time.
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub reminder_minutes: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ParseEventResponse {
    event: ParsedEvent,
}

#[derive(Debug, Serialize)]
struct ParseEventRequest<'a> {
    text: &'a str,
}

impl ParsedEvent {
    /// Start used when the text carries a date but no time.
    pub fn default_start() -> NaiveTime {
        NaiveTime::from_hms_opt(9, 0, 0).unwrap_or_default()
    }

    /// Build an unsaved event, reading the date and time in `offset`.
    pub fn to_event(&self, offset: FixedOffset, default_reminder: u32) -> Result<Event, ApiError> {
        let time = match self.time.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            Some(value) => NaiveTime::parse_from_str(value, "%H:%M")
                .map_err(|e| ApiError::ParseError(format!("Invalid time '{}': {}", value, e)))?,
            None => Self::default_start(),
        };
        let start = self
            .date
            .and_time(time)
            .and_local_timezone(offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ApiError::ParseError(format!("No instant for {} {}", self.date, time)))?;

        let mut event = Event::new(self.title.clone(), start)
            .with_reminder(self.reminder_minutes.unwrap_or(default_reminder));
        event.description = self.description.clone().filter(|d| !d.is_empty());
        Ok(event)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedPayload {
    pub ics: String,
    pub events_count: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct FeedEnvelope {
    ics: String,
    #[serde(default)]
    events_count: Option<usize>,
}

/// CRUD against the hosted event service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteEventService: Send + Sync {
    async fn list_events(&self, token: &str) -> Result<Vec<Event>, ApiError>;

    async fn create_event(&self, token: &str, event: &Event) -> Result<Event, ApiError>;

    async fn update_event(&self, token: &str, event: &Event) -> Result<(), ApiError>;

    async fn delete_event(&self, token: &str, event_id: i64) -> Result<(), ApiError>;
}

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn login_url(&self, provider: &str) -> Result<String, ApiError>;

    async fn exchange_code(
        &self,
        provider: &str,
        code: &str,
        state: Option<&str>,
    ) -> Result<AuthResponse, ApiError>;

    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    async fn fetch_feed(&self, location: &FeedLocation) -> Result<FeedPayload, ApiError>;
}

pub struct BackendClient {
    base_url: String,
    offset: FixedOffset,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            offset: Utc.fix(),
            client: reqwest::Client::new(),
        }
    }

    /// Offset used to read timestamps the server sends without one.
    pub fn with_offset(mut self, offset: FixedOffset) -> Self {
        self.offset = offset;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn lunar_date(&self, date: NaiveDate) -> Result<LunarDate, ApiError> {
        let date_param = date.format("%Y-%m-%d").to_string();
        tracing::info!("Fetching lunar date for {}", date_param);

        let response = self
            .client
            .get(self.url("lunar/"))
            .query(&[("date", date_param.as_str())])
            .send()
            .await?;

        let response = check_status(response, "lunar date").await?;
        Ok(response.json().await?)
    }

    pub async fn holidays(&self, year: i32) -> Result<HolidayList, ApiError> {
        tracing::info!("Fetching holidays for {}", year);

        let response = self
            .client
            .get(self.url("holidays/"))
            .query(&[("year", year.to_string())])
            .send()
            .await?;

        let response = check_status(response, "holidays").await?;
        Ok(response.json().await?)
    }

    pub async fn check_holiday(&self, date: NaiveDate) -> Result<DayHolidays, ApiError> {
        let date_param = date.format("%Y-%m-%d").to_string();
        tracing::info!("Checking holidays on {}", date_param);

        let response = self
            .client
            .get(self.url("holidays/check/"))
            .query(&[("date", date_param.as_str())])
            .send()
            .await?;

        let response = check_status(response, "holiday check").await?;
        Ok(response.json().await?)
    }

    /// Holidays for the server's current date.
    pub async fn today_holidays(&self) -> Result<DayHolidays, ApiError> {
        let response = self.client.get(self.url("holidays/today/")).send().await?;

        let response = check_status(response, "today's holidays").await?;
        Ok(response.json().await?)
    }

    pub async fn parse_event_text(&self, token: &str, text: &str) -> Result<ParsedEvent, ApiError> {
        tracing::info!("Parsing event from {} characters of text", text.chars().count());

        let response = self
            .client
            .post(self.url("ai/parse-event/"))
            .bearer_auth(token)
            .json(&ParseEventRequest { text })
            .send()
            .await?;

        let response = check_status(response, "event parsing").await?;
        let body: ParseEventResponse = response.json().await?;
        Ok(body.event)
    }

    fn parse_timestamp(&self, value: &str) -> Result<DateTime<Utc>, ApiError> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
            return Ok(parsed.with_timezone(&Utc));
        }
        let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
            .map_err(|e| ApiError::ParseError(format!("Invalid timestamp '{}': {}", value, e)))?;
        naive
            .and_local_timezone(self.offset)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| ApiError::ParseError(format!("Ambiguous timestamp '{}'", value)))
    }

    fn convert_from_cloud_event(&self, ce: CloudEvent) -> Result<Event, ApiError> {
        let start = self.parse_timestamp(&ce.start_time)?;
        let end = match ce.end_time.as_deref() {
            Some(value) if !value.is_empty() => Some(self.parse_timestamp(value)?),
            _ => None,
        };

        let location = ce
            .location
            .filter(|name| !name.is_empty())
            .map(|name| Location {
                name,
                latitude: ce.latitude.unwrap_or_default(),
                longitude: ce.longitude.unwrap_or_default(),
            });

        Ok(Event {
            id: Some(ce.id.ok_or_else(|| ApiError::ParseError("Missing event id".to_string()))?),
            title: ce.title,
            description: ce.description.filter(|d| !d.is_empty()),
            start,
            end,
            reminder_minutes: ce.reminder_minutes,
            location,
            subscription_id: ce.subscription_id,
        })
    }

    fn convert_to_cloud_event(&self, event: &Event, include_id: bool) -> CloudEvent {
        let start_time = event.start.with_timezone(&self.offset).to_rfc3339();
        // The backend requires an end; zero-length events end where they start.
        let end_time = event
            .end
            .map(|end| end.with_timezone(&self.offset).to_rfc3339())
            .unwrap_or_else(|| start_time.clone());

        CloudEvent {
            id: if include_id { event.id } else { None },
            title: event.title.clone(),
            description: Some(event.description.clone().unwrap_or_default()),
            start_time,
            end_time: Some(end_time),
            location: Some(
                event
                    .location
                    .as_ref()
                    .map(|l| l.name.clone())
                    .unwrap_or_default(),
            ),
            latitude: event.location.as_ref().map(|l| l.latitude),
            longitude: event.location.as_ref().map(|l| l.longitude),
            reminder_minutes: event.reminder_minutes,
            subscription_id: None,
        }
    }
}

async fn check_status(response: reqwest::Response, what: &str) -> Result<reqwest::Response, ApiError> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    if status == 401 {
        tracing::error!("Authentication failed when requesting {}", what);
        return Err(ApiError::AuthenticationFailed);
    }

    if status == 404 {
        tracing::error!("{} not found", what);
        return Err(ApiError::NotFound(what.to_string()));
    }

    if status == 429 {
        tracing::warn!("Rate limit exceeded");
        return Err(ApiError::RateLimited);
    }

    let body = response.text().await?;
    tracing::error!("Failed to request {}. Status: {}, Body: {}", what, status, body);
    Err(ApiError::RequestError(format!("Status {}: {}", status, body)))
}

#[async_trait]
impl RemoteEventService for BackendClient {
    async fn list_events(&self, token: &str) -> Result<Vec<Event>, ApiError> {
        tracing::info!("Fetching events from {}", self.base_url);

        let response = self
            .client
            .get(self.url("events/"))
            .bearer_auth(token)
            .send()
            .await?;

        tracing::info!("Fetch events response status: {}", response.status());
        let response = check_status(response, "events").await?;

        let event_list: EventListResponse = response.json().await?;

        let events: Vec<Event> = event_list
            .into_events()
            .into_iter()
            .filter_map(|ce| match self.convert_from_cloud_event(ce) {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("Skipping malformed event: {}", e);
                    None
                }
            })
            .collect();

        tracing::info!("Fetched {} events successfully", events.len());
        Ok(events)
    }

    async fn create_event(&self, token: &str, event: &Event) -> Result<Event, ApiError> {
        let url = self.url("events/");
        let cloud_event = self.convert_to_cloud_event(event, false);

        tracing::info!("Creating event: {} on {}", event.title, event.start);
        tracing::debug!("POST {} with payload: {:?}", url, cloud_event);

        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&cloud_event)
            .send()
            .await?;

        tracing::info!("Create event response status: {}", response.status());
        let response = check_status(response, "event creation").await?;

        let created: CloudEvent = response.json().await?;
        let created = self.convert_from_cloud_event(created)?;
        tracing::info!("Event created successfully with ID: {:?}", created.id);
        Ok(created)
    }

    async fn update_event(&self, token: &str, event: &Event) -> Result<(), ApiError> {
        let event_id = event.id.ok_or(ApiError::MissingId)?;
        let url = self.url(&format!("events/{}/", event_id));
        let cloud_event = self.convert_to_cloud_event(event, true);

        tracing::info!("Updating event {}: {}", event_id, event.title);
        tracing::debug!("PUT {} with payload: {:?}", url, cloud_event);

        let response = self
            .client
            .put(&url)
            .bearer_auth(token)
            .json(&cloud_event)
            .send()
            .await?;

        tracing::info!("Update event response status: {}", response.status());
        check_status(response, &format!("event {}", event_id)).await?;

        tracing::info!("Event {} updated successfully", event_id);
        Ok(())
    }

    async fn delete_event(&self, token: &str, event_id: i64) -> Result<(), ApiError> {
        let url = self.url(&format!("events/{}/", event_id));

        let response = self
            .client
            .delete(&url)
            .bearer_auth(token)
            .send()
            .await?;

        check_status(response, &format!("event {}", event_id)).await?;
        tracing::info!("Event {} deleted", event_id);
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for BackendClient {
    async fn login_url(&self, provider: &str) -> Result<String, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("auth/{}/login/", provider)))
            .send()
            .await?;

        let response = check_status(response, "login url").await?;
        let body: LoginUrlResponse = response.json().await?;
        Ok(body.apply_code_url)
    }

    async fn exchange_code(
        &self,
        provider: &str,
        code: &str,
        state: Option<&str>,
    ) -> Result<AuthResponse, ApiError> {
        tracing::info!("Exchanging {} authorization code", provider);

        let response = self
            .client
            .post(self.url(&format!("auth/{}/callback/", provider)))
            .json(&CallbackRequest { code, state })
            .send()
            .await?;

        let response = check_status(response, "code exchange").await?;
        Ok(response.json().await?)
    }

    async fn current_user(&self, token: &str) -> Result<UserProfile, ApiError> {
        let response = self
            .client
            .get(self.url("auth/me/"))
            .bearer_auth(token)
            .send()
            .await?;

        let response = check_status(response, "current user").await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl FeedFetcher for BackendClient {
    async fn fetch_feed(&self, location: &FeedLocation) -> Result<FeedPayload, ApiError> {
        let url = match location {
            FeedLocation::Slug(slug) => self.url(&format!("calendars/{}/feed/", slug)),
            FeedLocation::Url(url) => url.clone(),
        };
        tracing::info!("Fetching subscription feed {}", url);

        let response = self.client.get(&url).send().await?;
        let response = check_status(response, "subscription feed").await?;
        let body = response.text().await?;

        match serde_json::from_str::<FeedEnvelope>(&body) {
            Ok(envelope) => Ok(FeedPayload {
                ics: envelope.ics,
                events_count: envelope.events_count,
            }),
            Err(_) if body.trim_start().starts_with("BEGIN:VCALENDAR") => Ok(FeedPayload {
                ics: body,
                events_count: None,
            }),
            Err(e) => Err(ApiError::ParseError(format!("Unrecognised feed body: {}", e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 10, h, m, 0).unwrap()
    }

    fn client_for(server: &MockServer) -> BackendClient {
        BackendClient::new(format!("{}/api/", server.uri()))
    }

    fn cloud_event_json(id: i64, title: &str) -> serde_json::Value {
        json!({
            "id": id,
            "title": title,
            "description": "",
            "start_time": "2025-11-10T09:00:00Z",
            "end_time": "2025-11-10T09:30:00Z",
            "location": "",
            "reminder_minutes": 15,
            "created_at": "2025-11-01T00:00:00Z",
            "updated_at": "2025-11-01T00:00:00Z"
        })
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = BackendClient::new("http://localhost:8000/api/");

        assert_eq!(client.base_url(), "http://localhost:8000/api");
        assert_eq!(client.url("events/"), "http://localhost:8000/api/events/");
    }

    #[test]
    fn naive_timestamps_use_configured_offset() {
        let client = BackendClient::new("http://localhost")
            .with_offset(FixedOffset::east_opt(8 * 3600).unwrap());

        let parsed = client.parse_timestamp("2025-11-10T17:00:00").unwrap();

        assert_eq!(parsed, at(9, 0));
    }

    #[tokio::test]
    async fn list_accepts_paginated_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events/"))
            .and(header("authorization", "Bearer token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 1,
                "next": null,
                "previous": null,
                "results": [cloud_event_json(1, "Standup")]
            })))
            .mount(&server)
            .await;

        let events = client_for(&server).list_events("token").await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, Some(1));
        assert_eq!(events[0].description, None);
        assert_eq!(events[0].location, None);
        assert_eq!(events[0].end, Some(at(9, 30)));
    }

    #[tokio::test]
    async fn list_accepts_bare_array() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                cloud_event_json(1, "Standup"),
                cloud_event_json(2, "Review")
            ])))
            .mount(&server)
            .await;

        let events = client_for(&server).list_events("token").await.unwrap();

        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn list_maps_401_to_authentication_failed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/events/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let result = client_for(&server).list_events("stale").await;

        assert!(matches!(result, Err(ApiError::AuthenticationFailed)));
    }

    #[tokio::test]
    async fn create_returns_server_assigned_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events/"))
            .respond_with(ResponseTemplate::new(201).set_body_json(cloud_event_json(41, "Standup")))
            .expect(1)
            .mount(&server)
            .await;

        let event = Event::new("Standup", at(9, 0)).with_reminder(15);
        let created = client_for(&server).create_event("token", &event).await.unwrap();

        assert_eq!(created.id, Some(41));
        assert_eq!(created.title, "Standup");
    }

    #[tokio::test]
    async fn update_puts_to_event_path() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/events/41/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(cloud_event_json(41, "Moved")))
            .expect(1)
            .mount(&server)
            .await;

        let event = Event::new("Moved", at(10, 0)).with_id(41);

        client_for(&server).update_event("token", &event).await.unwrap();
    }

    #[tokio::test]
    async fn update_without_id_is_rejected_locally() {
        let server = MockServer::start().await;

        let result = client_for(&server)
            .update_event("token", &Event::new("Unsaved", at(10, 0)))
            .await;

        assert!(matches!(result, Err(ApiError::MissingId)));
    }

    #[tokio::test]
    async fn delete_maps_404_to_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/events/9/"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = client_for(&server).delete_event("token", 9).await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn server_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/events/9/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let result = client_for(&server).delete_event("token", 9).await;

        match result {
            Err(ApiError::RequestError(message)) => assert!(message.contains("boom")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn login_url_reads_apply_code_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/qq/login/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "apply_code_url": "https://graph.qq.com/oauth2.0/authorize?state=abc"
            })))
            .mount(&server)
            .await;

        let url = client_for(&server).login_url("qq").await.unwrap();

        assert_eq!(url, "https://graph.qq.com/oauth2.0/authorize?state=abc");
    }

    #[tokio::test]
    async fn exchange_code_posts_code_and_state() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/auth/qq/callback/"))
            .and(body_json(json!({"code": "abc", "state": "xyz"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access": "a",
                "refresh": "r",
                "user": {"id": 3, "username": "lin", "email": null}
            })))
            .mount(&server)
            .await;

        let response = client_for(&server)
            .exchange_code("qq", "abc", Some("xyz"))
            .await
            .unwrap();

        assert_eq!(response.access.as_deref(), Some("a"));
        assert_eq!(response.user.unwrap().username, "lin");
    }

    #[tokio::test]
    async fn current_user_requires_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/auth/me/"))
            .and(header("authorization", "Bearer good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3, "username": "lin", "email": "lin@example.com"
            })))
            .mount(&server)
            .await;

        let user = client_for(&server).current_user("good").await.unwrap();

        assert_eq!(user.email.as_deref(), Some("lin@example.com"));
    }

    #[tokio::test]
    async fn lunar_date_passes_iso_date() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/lunar/"))
            .and(query_param("date", "2025-11-05"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "lunar_date": "农历2025年九月十六",
                "year": 2025,
                "month": "九月",
                "day": "十六",
                "zodiac": "蛇",
                "solar_date": "2025-11-05"
            })))
            .mount(&server)
            .await;

        let lunar = client_for(&server)
            .lunar_date(NaiveDate::from_ymd_opt(2025, 11, 5).unwrap())
            .await
            .unwrap();

        assert_eq!(lunar.zodiac, "蛇");
        assert_eq!(lunar.solar_date, "2025-11-05");
    }

    #[tokio::test]
    async fn holidays_reads_single_days_and_vacations() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/holidays/"))
            .and(query_param("year", "2025"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "year": 2025,
                "holidays": [
                    {"name": "元旦", "date": "2025-01-01", "type": "major"},
                    {
                        "name": "国庆节假期",
                        "dates": ["2025-10-01", "2025-10-02", "2025-10-03"],
                        "start_date": "2025-10-01",
                        "end_date": "2025-10-03",
                        "type": "vacation",
                        "days": 3
                    }
                ]
            })))
            .mount(&server)
            .await;

        let list = client_for(&server).holidays(2025).await.unwrap();

        assert_eq!(
            list.holidays,
            vec![
                Holiday::Major {
                    name: "元旦".to_string(),
                    date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                },
                Holiday::Vacation {
                    name: "国庆节假期".to_string(),
                    start_date: NaiveDate::from_ymd_opt(2025, 10, 1).unwrap(),
                    end_date: NaiveDate::from_ymd_opt(2025, 10, 3).unwrap(),
                    days: 3,
                },
            ]
        );
        assert_eq!(list.message, None);
    }

    #[tokio::test]
    async fn holidays_for_unknown_year_carries_message() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/holidays/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "year": 1999,
                "holidays": [],
                "message": "1999年节假日数据未找到"
            })))
            .mount(&server)
            .await;

        let list = client_for(&server).holidays(1999).await.unwrap();

        assert!(list.holidays.is_empty());
        assert!(list.message.is_some());
    }

    #[tokio::test]
    async fn check_holiday_reads_holiday_and_festivals() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/holidays/check/"))
            .and(query_param("date", "2025-10-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "date": "2025-10-01",
                "holiday": {
                    "is_holiday": true,
                    "is_workday": false,
                    "holiday_name": "国庆节",
                    "holiday_type": "vacation"
                },
                "traditional_festivals": [],
                "international_festivals": [
                    {"name": "国庆节", "emoji": "🇨🇳", "type": "international"}
                ]
            })))
            .mount(&server)
            .await;

        let day = client_for(&server)
            .check_holiday(NaiveDate::from_ymd_opt(2025, 10, 1).unwrap())
            .await
            .unwrap();

        assert_eq!(day.holiday.unwrap().holiday_name.as_deref(), Some("国庆节"));
        assert_eq!(day.international_festivals[0].emoji, "🇨🇳");
    }

    #[tokio::test]
    async fn today_holidays_on_ordinary_day() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/holidays/today/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "date": "2025-11-12",
                "holiday": null,
                "traditional_festivals": [],
                "international_festivals": []
            })))
            .mount(&server)
            .await;

        let day = client_for(&server).today_holidays().await.unwrap();

        assert!(day.is_ordinary());
    }

    #[tokio::test]
    async fn parse_event_text_posts_text_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ai/parse-event/"))
            .and(header("authorization", "Bearer good"))
            .and(body_json(json!({"text": "明天下午3点开会"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "event": {
                    "title": "项目会议",
                    "date": "2025-11-13",
                    "time": "15:00",
                    "reminder_minutes": 30
                },
                "raw_response": "{}"
            })))
            .mount(&server)
            .await;

        let parsed = client_for(&server)
            .parse_event_text("good", "明天下午3点开会")
            .await
            .unwrap();
        let event = parsed.to_event(FixedOffset::east_opt(8 * 3600).unwrap(), 15).unwrap();

        assert_eq!(event.title, "项目会议");
        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 11, 13, 7, 0, 0).unwrap());
        assert_eq!(event.reminder_minutes, 30);
        assert_eq!(event.id, None);
    }

    #[tokio::test]
    async fn parse_event_text_failure_keeps_server_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ai/parse-event/"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "AI返回格式错误",
                "raw_response": "not json"
            })))
            .mount(&server)
            .await;

        let result = client_for(&server).parse_event_text("good", "???").await;

        match result {
            Err(ApiError::RequestError(message)) => assert!(message.contains("AI返回格式错误")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn parsed_event_without_time_starts_at_nine() {
        let parsed = ParsedEvent {
            title: "Dentist".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 11, 13).unwrap(),
            time: None,
            description: Some(String::new()),
            reminder_minutes: None,
        };

        let event = parsed.to_event(FixedOffset::east_opt(0).unwrap(), 15).unwrap();

        assert_eq!(event.start, Utc.with_ymd_and_hms(2025, 11, 13, 9, 0, 0).unwrap());
        assert_eq!(event.reminder_minutes, 15);
        assert_eq!(event.description, None);
    }

    #[test]
    fn parsed_event_with_bad_time_is_a_parse_error() {
        let parsed = ParsedEvent {
            title: "Dentist".to_string(),
            date: NaiveDate::from_ymd_opt(2025, 11, 13).unwrap(),
            time: Some("afternoon".to_string()),
            description: None,
            reminder_minutes: None,
        };

        let result = parsed.to_event(FixedOffset::east_opt(0).unwrap(), 15);

        assert!(matches!(result, Err(ApiError::ParseError(_))));
    }

    #[tokio::test]
    async fn slug_feed_reads_json_envelope() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/calendars/china-holidays/feed/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ics": "BEGIN:VCALENDAR\nEND:VCALENDAR",
                "events_count": 0
            })))
            .mount(&server)
            .await;

        let feed = client_for(&server)
            .fetch_feed(&FeedLocation::Slug("china-holidays".to_string()))
            .await
            .unwrap();

        assert_eq!(feed.events_count, Some(0));
        assert!(feed.ics.starts_with("BEGIN:VCALENDAR"));
    }

    #[tokio::test]
    async fn url_feed_accepts_raw_icalendar() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feeds/world.ics"))
            .respond_with(ResponseTemplate::new(200).set_body_string("BEGIN:VCALENDAR\r\nEND:VCALENDAR\r\n"))
            .mount(&server)
            .await;

        let feed = client_for(&server)
            .fetch_feed(&FeedLocation::Url(format!("{}/feeds/world.ics", server.uri())))
            .await
            .unwrap();

        assert_eq!(feed.events_count, None);
    }
}
