//! Ampache XML API client
//!
//! Builds `xml.server.php` request URLs, executes them through the host
//! [`HttpClient`], and hands back the tokenized body together with any error
//! envelope it contains. Entity decoding happens in the sync engine.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bridge_traits::http::{HttpClient, HttpRequest};
use bridge_traits::time::{Clock, SystemClock};
use chrono::{DateTime, SecondsFormat, Utc};
use core_auth::{
    AuthError, Authenticator, ChangeSnapshot, Credentials, HandshakeResult, RemoteCounts,
};
use core_runtime::logging::redact_query;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::envelope::ApiFault;
use crate::error::{AmpacheError, Result};
use crate::xml::{text_of, tokenize, XmlToken};

/// Path of the XML endpoint below the server root
pub const XML_ENDPOINT: &str = "server/xml.server.php";

/// API version announced during the handshake
pub const CLIENT_API_VERSION: &str = "440000";

/// Session lifetime assumed when the handshake omits `session_expire`
const DEFAULT_SESSION_SECS: i64 = 3600;

/// Remote actions used by the sync engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Handshake,
    Ping,
    Genres,
    Artists,
    Artist,
    ArtistAlbums,
    Albums,
    Album,
    AlbumSongs,
    Songs,
    Song,
    Playlists,
    Playlist,
    PlaylistSongs,
    PlaylistCreate,
    PlaylistEdit,
    PlaylistDelete,
    PlaylistAddSong,
    PlaylistRemoveSong,
    Podcasts,
    Podcast,
    PodcastEpisodes,
    Catalogs,
    Browse,
    SearchSongs,
    Stats,
    Flag,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Handshake => "handshake",
            Action::Ping => "ping",
            Action::Genres => "genres",
            Action::Artists => "artists",
            Action::Artist => "artist",
            Action::ArtistAlbums => "artist_albums",
            Action::Albums => "albums",
            Action::Album => "album",
            Action::AlbumSongs => "album_songs",
            Action::Songs => "songs",
            Action::Song => "song",
            Action::Playlists => "playlists",
            Action::Playlist => "playlist",
            Action::PlaylistSongs => "playlist_songs",
            Action::PlaylistCreate => "playlist_create",
            Action::PlaylistEdit => "playlist_edit",
            Action::PlaylistDelete => "playlist_delete",
            Action::PlaylistAddSong => "playlist_add_song",
            Action::PlaylistRemoveSong => "playlist_remove_song",
            Action::Podcasts => "podcasts",
            Action::Podcast => "podcast",
            Action::PodcastEpisodes => "podcast_episodes",
            Action::Catalogs => "catalogs",
            Action::Browse => "browse",
            Action::SearchSongs => "search_songs",
            Action::Stats => "stats",
            Action::Flag => "flag",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One API call: an action plus its query parameters
///
/// # Example
///
/// ```
/// use provider_ampache::{Action, ApiRequest};
///
/// let request = ApiRequest::new(Action::Artists).offset(500).limit(500);
/// assert_eq!(request.get("offset"), Some("500"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    pub action: Action,
    params: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            params: Vec::new(),
        }
    }

    /// Set a parameter, replacing an earlier value of the same key
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        let key = key.into();
        let value = value.to_string();
        match self.params.iter_mut().find(|(k, _)| *k == key) {
            Some(existing) => existing.1 = value,
            None => self.params.push((key, value)),
        }
        self
    }

    pub fn filter(self, value: impl ToString) -> Self {
        self.param("filter", value)
    }

    pub fn offset(self, offset: u64) -> Self {
        self.param("offset", offset)
    }

    pub fn limit(self, limit: u64) -> Self {
        self.param("limit", limit)
    }

    /// Only entities added after `since`
    pub fn added_since(self, since: DateTime<Utc>) -> Self {
        self.param("add", since.to_rfc3339_opts(SecondsFormat::Secs, true))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

/// Tokenized response body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub tokens: Vec<XmlToken>,
    /// Error envelope found in the body, if any
    pub fault: Option<ApiFault>,
}

impl ApiResponse {
    pub fn from_body(body: &str) -> Result<Self> {
        let tokens = tokenize(body)?;
        let fault = ApiFault::from_tokens(&tokens);
        Ok(Self { tokens, fault })
    }

    /// Fail with `AmpacheError::Fault` when the body is an error envelope
    pub fn into_result(self) -> Result<Vec<XmlToken>> {
        match self.fault {
            Some(fault) => Err(AmpacheError::Fault(fault)),
            None => Ok(self.tokens),
        }
    }
}

/// Ampache XML API client
///
/// Cheap to clone; every clone shares the same `HttpClient`.
#[derive(Clone)]
pub struct AmpacheClient {
    http: Arc<dyn HttpClient>,
    server_url: String,
    clock: Arc<dyn Clock>,
    timeout: Option<Duration>,
}

impl AmpacheClient {
    pub fn new(http: Arc<dyn HttpClient>, server_url: impl Into<String>) -> Self {
        Self {
            http,
            server_url: server_url.into().trim_end_matches('/').to_string(),
            clock: Arc::new(SystemClock),
            timeout: None,
        }
    }

    /// Time source for handshake timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Full request URL for `request`, optionally carrying a session token
    pub fn build_url(&self, request: &ApiRequest, auth: Option<&str>) -> Result<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.server_url, XML_ENDPOINT))
            .map_err(|e| AmpacheError::InvalidUrl(format!("{}: {}", self.server_url, e)))?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("action", request.action.as_str());
            if let Some(auth) = auth {
                query.append_pair("auth", auth);
            }
            for (key, value) in &request.params {
                query.append_pair(key, value);
            }
        }

        Ok(url)
    }

    /// Execute an authenticated call
    ///
    /// Transport failures come back as `AmpacheError::Transport`. An error
    /// envelope is not an error at this level; it is returned in
    /// [`ApiResponse::fault`].
    #[instrument(skip(self, request, auth), fields(action = %request.action))]
    pub async fn call(&self, request: &ApiRequest, auth: &str) -> Result<ApiResponse> {
        let url = self.build_url(request, Some(auth))?;
        self.get(url).await
    }

    async fn get(&self, url: Url) -> Result<ApiResponse> {
        debug!(url = %redact_query(url.as_str()), "Ampache request");

        let mut http_request = HttpRequest::get(url.as_str()).accept("text/xml");
        if let Some(timeout) = self.timeout {
            http_request = http_request.timeout(timeout);
        }

        let response = self.http.execute(http_request).await?;
        let body = response.text()?;

        // Some servers pair an error envelope with a 4xx status
        match ApiResponse::from_body(&body) {
            Ok(parsed) if parsed.fault.is_some() => Ok(parsed),
            _ if !response.is_success() => Err(AmpacheError::Http {
                status: response.status,
            }),
            result => result,
        }
    }

    async fn run_handshake(&self, credentials: &Credentials) -> Result<HandshakeResult> {
        let timestamp = self.clock.unix_timestamp();
        let mut request = ApiRequest::new(Action::Handshake)
            .param("auth", credentials.handshake_auth(timestamp))
            .param("version", CLIENT_API_VERSION);
        if credentials.is_password() {
            request = request
                .param("timestamp", timestamp)
                .param("user", &credentials.username);
        }

        let url = self.build_url(&request, None)?;
        let tokens = self.get(url).await?.into_result()?;
        self.parse_handshake(&tokens)
    }

    fn parse_handshake(&self, tokens: &[XmlToken]) -> Result<HandshakeResult> {
        let token = text_of(tokens, "auth")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AmpacheError::Handshake("missing <auth> element".to_string()))?
            .to_string();

        let expires_at = text_of(tokens, "session_expire")
            .and_then(parse_timestamp)
            .unwrap_or_else(|| self.clock.now() + chrono::Duration::seconds(DEFAULT_SESSION_SECS));

        let count = |tag: &str| {
            text_of(tokens, tag)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(0)
        };

        let api_version = text_of(tokens, "api").map(parse_api_version).unwrap_or(0);

        Ok(HandshakeResult {
            token,
            expires_at,
            counts: RemoteCounts {
                songs: count("songs"),
                albums: count("albums"),
                artists: count("artists"),
                genres: count("genres"),
                playlists: count("playlists"),
                podcasts: count("podcasts"),
                podcast_episodes: count("podcast_episodes"),
                catalogs: count("catalogs"),
            },
            snapshot: ChangeSnapshot {
                update: text_of(tokens, "update").and_then(parse_timestamp),
                add: text_of(tokens, "add").and_then(parse_timestamp),
                clean: text_of(tokens, "clean").and_then(parse_timestamp),
            },
            api_version,
        })
    }
}

#[async_trait]
impl Authenticator for AmpacheClient {
    #[instrument(skip(self, credentials), fields(server = %self.server_url))]
    async fn handshake(&self, credentials: &Credentials) -> core_auth::Result<HandshakeResult> {
        match self.run_handshake(credentials).await {
            Ok(result) => {
                info!(api_version = result.api_version, "Ampache handshake accepted");
                Ok(result)
            }
            Err(e) => {
                warn!(error = %e, "Ampache handshake failed");
                Err(match AuthError::from(e) {
                    AuthError::HandshakeFailed { reason, .. } => AuthError::HandshakeFailed {
                        server: self.server_url.clone(),
                        reason,
                    },
                    other => other,
                })
            }
        }
    }
}

/// ISO-8601 timestamp as sent by the server
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Numeric API version
///
/// Accepts both the numeric form (`440001`) and dotted semver (`4.2.0`,
/// which maps to `420000`).
pub fn parse_api_version(value: &str) -> u32 {
    let value = value.trim();
    if let Ok(numeric) = value.parse::<u32>() {
        return numeric;
    }

    let mut parts = value
        .split(['.', '-'])
        .map(|p| p.parse::<u32>().unwrap_or(0));
    let major = parts.next().unwrap_or(0);
    let minor = parts.next().unwrap_or(0);
    let patch = parts.next().unwrap_or(0);
    major * 100_000 + minor * 10_000 + patch * 1_000
}
